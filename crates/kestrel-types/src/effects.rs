//! Effect set algebra.
//!
//! Effect sets are small ordered lists of [`EffectRef`]. Order is the order of
//! first appearance and is kept stable so diagnostics read the way the source
//! was written; every operation here treats the lists as sets.

use crate::symbol::EffectId;
use crate::ty::EffectRef;
use std::collections::HashMap;

/// Remove duplicates, keeping the first occurrence.
pub fn dedup(effects: &[EffectRef]) -> Vec<EffectRef> {
    let mut out: Vec<EffectRef> = Vec::with_capacity(effects.len());
    for e in effects {
        if !out.contains(e) {
            out.push(e.clone());
        }
    }
    out
}

/// Set union; `a`'s order first, then new members of `b`.
pub fn union(a: &[EffectRef], b: &[EffectRef]) -> Vec<EffectRef> {
    let mut out = dedup(a);
    for e in b {
        if !out.contains(e) {
            out.push(e.clone());
        }
    }
    out
}

/// Fold a sequence of effect sets into their union.
pub fn union_all<'a, I>(sets: I) -> Vec<EffectRef>
where
    I: IntoIterator<Item = &'a [EffectRef]>,
{
    sets.into_iter()
        .fold(Vec::new(), |acc, set| union(&acc, set))
}

/// Every member except the given effect.
pub fn without(effects: &[EffectRef], effect: EffectId) -> Vec<EffectRef> {
    dedup(effects)
        .into_iter()
        .filter(|e| *e != EffectRef::Ref(effect))
        .collect()
}

/// Members of `a` that are not in `b`.
pub fn difference(a: &[EffectRef], b: &[EffectRef]) -> Vec<EffectRef> {
    dedup(a).into_iter().filter(|e| !b.contains(e)).collect()
}

/// Is `a ⊆ b`?
pub fn is_subset(a: &[EffectRef], b: &[EffectRef]) -> bool {
    a.iter().all(|e| b.contains(e))
}

#[inline]
pub fn contains(effects: &[EffectRef], effect: EffectId) -> bool {
    effects.contains(&EffectRef::Ref(effect))
}

/// Set equality.
pub fn same(a: &[EffectRef], b: &[EffectRef]) -> bool {
    is_subset(a, b) && is_subset(b, a)
}

/// Replace effect variables found in `mapping` (keyed by unique) with their
/// expansion. Unmapped variables are kept.
pub fn expand_vars(effects: &[EffectRef], mapping: &HashMap<u32, Vec<EffectRef>>) -> Vec<EffectRef> {
    let mut out = Vec::with_capacity(effects.len());
    for e in effects {
        match e {
            EffectRef::Var(sym) => match mapping.get(&sym.unique) {
                Some(expansion) => out.extend(expansion.iter().cloned()),
                None => out.push(e.clone()),
            },
            EffectRef::Ref(_) => out.push(e.clone()),
        }
    }
    dedup(&out)
}

/// Concrete effect ids, dropping variables.
pub fn concrete(effects: &[EffectRef]) -> Vec<EffectId> {
    effects
        .iter()
        .filter_map(|e| match e {
            EffectRef::Ref(id) => Some(*id),
            EffectRef::Var(_) => None,
        })
        .collect()
}
