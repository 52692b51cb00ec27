//! Structural compatibility, generic instantiation and inference-variable solving.
//!
//! ```rust
//! use kestrel_types::{Symbol, Type, Unifier};
//! use kestrel_types::env::GlobalEnv;
//! let mut u = Unifier::new();
//! let x = u.open_var(Symbol::new("x", 0));
//! assert!(u.fits(&Type::int(), &x));
//! let solution = u.solve(&GlobalEnv::new()).unwrap();
//! assert_eq!(x.subst_types(&solution), Type::int());
//! ```

use crate::effects;
use crate::env::GlobalEnv;
use crate::error::TypeErrorKind;
use crate::symbol::Symbol;
use crate::ty::{EffectRef, LambdaType, Type};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Bound on substitution chasing; deeper chains are reported as infinite types.
const MAX_CHASE: usize = 64;
/// Bound on constraints processed per definition; cyclic forwarding between
/// variables would otherwise never settle.
const MAX_CONSTRAINTS: usize = 100_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    /// The variable's solution must fit `other`.
    Equal,
    /// `other` must fit the variable's solution.
    LargerThan,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypeConstraint {
    pub kind: ConstraintKind,
    pub other: Type,
}

impl TypeConstraint {
    pub fn equal(other: Type) -> Self {
        TypeConstraint {
            kind: ConstraintKind::Equal,
            other,
        }
    }

    pub fn larger_than(other: Type) -> Self {
        TypeConstraint {
            kind: ConstraintKind::LargerThan,
            other,
        }
    }
}

/// Inference state of one definition: the open variables and the constraints
/// collected against them.
#[derive(Clone, Debug, Default)]
pub struct Unifier {
    open: BTreeMap<u32, Symbol>,
    pending: Vec<(u32, TypeConstraint)>,
}

impl Unifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sym` as an open inference variable.
    pub fn open_var(&mut self, sym: Symbol) -> Type {
        self.open.insert(sym.unique, sym.clone());
        Type::Var(sym)
    }

    /// Names take part in the check: bound variables of other definitions may
    /// reuse a unique.
    #[inline]
    pub fn is_open(&self, sym: &Symbol) -> bool {
        self.open.get(&sym.unique) == Some(sym)
    }

    pub fn open_vars(&self) -> impl Iterator<Item = &Symbol> {
        self.open.values()
    }

    pub fn pending(&self) -> &[(u32, TypeConstraint)] {
        &self.pending
    }

    fn open_in(&self, ty: &Type) -> Option<u32> {
        match ty {
            Type::Var(sym) if self.is_open(sym) => Some(sym.unique),
            _ => None,
        }
    }

    /// Can a value of type `found` be used where `expected` is required?
    ///
    /// Open variables on either side are not compared; a constraint is
    /// recorded instead and checked by [`Unifier::solve`]. A failed check
    /// leaves no constraints behind.
    pub fn fits(&mut self, found: &Type, expected: &Type) -> bool {
        let mark = self.pending.len();
        let ok = self.fits_inner(found, expected);
        if !ok {
            self.pending.truncate(mark);
        }
        ok
    }

    fn fits_inner(&mut self, found: &Type, expected: &Type) -> bool {
        if let Some(var) = self.open_in(expected) {
            if self.open_in(found) != Some(var) {
                self.pending
                    .push((var, TypeConstraint::larger_than(found.clone())));
            }
            return true;
        }
        if let Some(var) = self.open_in(found) {
            self.pending
                .push((var, TypeConstraint::equal(expected.clone())));
            return true;
        }
        match (found, expected) {
            (Type::Var(a), Type::Var(b)) => a.unique == b.unique,
            (
                Type::Ref {
                    reference: r1,
                    type_args: t1,
                    effect_args: e1,
                },
                Type::Ref {
                    reference: r2,
                    type_args: t2,
                    effect_args: e2,
                },
            ) => {
                r1 == r2
                    && t1.len() == t2.len()
                    && t1.iter().zip(t2).all(|(a, b)| self.fits_inner(a, b))
                    && effects::same(e1, e2)
            }
            (Type::Lambda(f), Type::Lambda(e)) => self.lambda_fits(f, e),
            _ => false,
        }
    }

    fn lambda_fits(&mut self, found: &LambdaType, expected: &LambdaType) -> bool {
        if found.args.len() != expected.args.len()
            || found.type_vars.len() != expected.type_vars.len()
            || found.effect_vars.len() != expected.effect_vars.len()
            || found.rest.is_some() != expected.rest.is_some()
        {
            return false;
        }
        for (f, e) in found.type_vars.iter().zip(&expected.type_vars) {
            if !same_members(&f.subtypes, &e.subtypes) {
                return false;
            }
        }

        // Compare up to renaming of the quantified variables.
        let renamed;
        let found = if found.type_vars.is_empty() && found.effect_vars.is_empty() {
            found
        } else {
            let types: HashMap<u32, Type> = found
                .type_vars
                .iter()
                .zip(&expected.type_vars)
                .map(|(f, e)| (f.sym.unique, Type::Var(e.sym.clone())))
                .collect();
            let effs: HashMap<u32, Vec<EffectRef>> = found
                .effect_vars
                .iter()
                .zip(&expected.effect_vars)
                .map(|(f, e)| (f.unique, vec![EffectRef::Var(e.clone())]))
                .collect();
            renamed = found.transform(
                &mut |sym| types.get(&sym.unique).cloned(),
                &mut |list| effects::expand_vars(list, &effs),
            );
            &renamed
        };

        found
            .args
            .iter()
            .zip(&expected.args)
            .all(|(f, e)| self.fits_inner(e, f))
            && match (&found.rest, &expected.rest) {
                (Some(f), Some(e)) => self.fits_inner(e, f),
                _ => true,
            }
            && effects::is_subset(&found.effects, &expected.effects)
            && self.fits_inner(&found.result, &expected.result)
    }

    /// Fold one constraint into the current solution of a variable.
    ///
    /// `None` adopts the constraint's type. An open variable meeting a concrete
    /// type forwards the constraint to that variable. Two distinct open
    /// variables are rejected.
    pub fn unify(
        &mut self,
        env: &GlobalEnv,
        current: Option<Type>,
        constraint: TypeConstraint,
    ) -> Result<Type, TypeErrorKind> {
        let TypeConstraint { kind, other } = constraint;
        let Some(current) = current else {
            return Ok(other);
        };
        match (self.open_in(&current), self.open_in(&other)) {
            (Some(a), Some(b)) if a == b => Ok(current),
            (Some(_), Some(_)) => Err(TypeErrorKind::Unsupported(format!(
                "cannot unify inference variables `{}` and `{}`; add a type annotation",
                env.show_type(&current),
                env.show_type(&other)
            ))),
            (Some(a), None) => {
                self.pending.push((a, TypeConstraint { kind, other }));
                Ok(current)
            }
            (None, Some(b)) => {
                let flipped = match kind {
                    ConstraintKind::Equal => ConstraintKind::LargerThan,
                    ConstraintKind::LargerThan => ConstraintKind::Equal,
                };
                self.pending.push((
                    b,
                    TypeConstraint {
                        kind: flipped,
                        other: current.clone(),
                    },
                ));
                Ok(current)
            }
            (None, None) => {
                let ok = match kind {
                    ConstraintKind::Equal => self.fits(&current, &other),
                    ConstraintKind::LargerThan => self.fits(&other, &current),
                };
                if ok {
                    Ok(current)
                } else {
                    Err(TypeErrorKind::TypeMismatch {
                        expected: env.show_type(&other),
                        found: env.show_type(&current),
                    })
                }
            }
        }
    }

    /// Solve every pending constraint. The result maps variable uniques to
    /// types with all solvable variables substituted.
    pub fn solve(&mut self, env: &GlobalEnv) -> Result<HashMap<u32, Type>, TypeErrorKind> {
        let mut raw: HashMap<u32, Type> = HashMap::new();
        let mut cursor = 0;
        while cursor < self.pending.len() {
            if cursor == MAX_CONSTRAINTS {
                return Err(TypeErrorKind::Unsupported(
                    "inference did not settle; add a type annotation".to_string(),
                ));
            }
            let (var, constraint) = self.pending[cursor].clone();
            cursor += 1;
            let current = raw.remove(&var);
            let next = self.unify(env, current, constraint)?;
            raw.insert(var, next);
        }
        self.pending.clear();

        let mut solution = HashMap::with_capacity(raw.len());
        for (var, ty) in &raw {
            let mut ty = ty.clone();
            let mut rounds = 0;
            while ty.vars().iter().any(|v| raw.contains_key(&v.unique)) {
                if rounds == MAX_CHASE {
                    return Err(TypeErrorKind::Unsupported(format!(
                        "infinite type for `{}`",
                        self.open.get(var).map(|s| s.name.as_str()).unwrap_or("?")
                    )));
                }
                ty = ty.subst_types(&raw);
                rounds += 1;
            }
            solution.insert(*var, ty);
        }
        debug!(solved = solution.len(), "solved inference variables");
        Ok(solution)
    }
}

fn same_members<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a.len() == b.len() && a.iter().all(|x| b.contains(x))
}

/// Plain compatibility check with no inference variables in play.
pub fn fits_expectation(found: &Type, expected: &Type) -> bool {
    Unifier::new().fits(found, expected)
}

/// Bind a lambda's type parameters, checking arity and subtype bounds.
pub fn apply_type_variables(
    env: &GlobalEnv,
    lambda: &LambdaType,
    type_args: &[Type],
) -> Result<LambdaType, TypeErrorKind> {
    if type_args.len() != lambda.type_vars.len() {
        return Err(TypeErrorKind::ArityMismatch {
            expected: lambda.type_vars.len(),
            found: type_args.len(),
        });
    }
    let mut mapping = HashMap::new();
    for (decl, arg) in lambda.type_vars.iter().zip(type_args) {
        for required in &decl.subtypes {
            let ok = match arg {
                Type::Var(_) => true,
                other => other
                    .record_id()
                    .is_some_and(|id| env.has_subtype(id, *required)),
            };
            if !ok {
                return Err(TypeErrorKind::SubtypeError {
                    ty: env.show_type(arg),
                    required: env.record(*required).name.clone(),
                });
            }
        }
        mapping.insert(decl.sym.unique, arg.clone());
    }
    let mut out = lambda.transform(
        &mut |sym| mapping.get(&sym.unique).cloned(),
        &mut |effs| effs.to_vec(),
    );
    out.type_vars.clear();
    Ok(out)
}

/// Bind a lambda's effect variable to a list of effects and expand it
/// everywhere in the signature. Only one effect variable is supported.
pub fn apply_effect_variables(
    lambda: &LambdaType,
    effects: &[EffectRef],
) -> Result<LambdaType, TypeErrorKind> {
    let var = match lambda.effect_vars.as_slice() {
        [] if effects.is_empty() => return Ok(lambda.clone()),
        [] => {
            return Err(TypeErrorKind::ArityMismatch {
                expected: 0,
                found: effects.len(),
            })
        }
        [var] => var,
        _ => {
            return Err(TypeErrorKind::Unsupported(format!(
                "lambda declares {} effect variables; only one is supported",
                lambda.effect_vars.len()
            )))
        }
    };
    let mut mapping = HashMap::new();
    mapping.insert(var.unique, effects::dedup(effects));
    let mut out = lambda.transform(&mut |_| None, &mut |effs| {
        effects::expand_vars(effs, &mapping)
    });
    out.effect_vars.clear();
    Ok(out)
}
