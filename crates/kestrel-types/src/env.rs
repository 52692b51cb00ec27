//! Compilation context.
//!
//! [`GlobalEnv`] is an append-only arena of effects, record types and typed
//! toplevel terms, keyed by content hash. It is passed explicitly; independent
//! compilations each own one. [`LocalEnv`] holds the per-definition scopes and
//! inference state, and is thrown away once a definition is typed.

use crate::symbol::{EffectId, Symbol, TermId, TypeId};
use crate::term::Term;
use crate::ty::{EffectRef, LambdaType, Reference, Type, TypeVarDecl};
use crate::unify::Unifier;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct EffectConstrDef {
    pub name: String,
    pub args: Vec<Type>,
    pub ret: Type,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct EffectDef {
    pub name: String,
    pub hash: String,
    pub constrs: Vec<EffectConstrDef>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordRowDef {
    pub name: String,
    pub ty: Type,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordDef {
    pub name: String,
    pub hash: String,
    /// Directly included record types, in declaration order.
    pub subtypes: Vec<TypeId>,
    /// Own rows only; rows of subtypes live in their own definitions.
    pub rows: Vec<RecordRowDef>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct TermDef {
    pub name: String,
    pub hash: String,
    pub term: Term,
}

/// Serializable contents of a [`GlobalEnv`]. Indexes and builtins are rebuilt
/// on restore.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvSnapshot {
    pub effects: Vec<EffectDef>,
    pub types: Vec<RecordDef>,
    pub terms: Vec<TermDef>,
}

#[derive(Clone, Debug)]
pub struct GlobalEnv {
    effects: Vec<EffectDef>,
    types: Vec<RecordDef>,
    terms: Vec<TermDef>,

    effect_names: HashMap<String, EffectId>,
    type_names: HashMap<String, TypeId>,
    term_names: HashMap<String, TermId>,
    /// `"Effect.constr"` → (effect, constructor index)
    effect_constructors: HashMap<String, (EffectId, usize)>,
    /// attribute name → every (record, row index) declaring it
    attribute_names: HashMap<String, Vec<(TypeId, usize)>>,

    effect_hashes: HashMap<String, EffectId>,
    type_hashes: HashMap<String, TypeId>,
    term_hashes: HashMap<String, TermId>,

    builtins: BTreeMap<String, Type>,
}

impl Default for GlobalEnv {
    fn default() -> Self {
        Self::new()
    }
}

fn content_hash(kind: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

fn builtin_table() -> BTreeMap<String, Type> {
    let int2 = |result: Type| Type::lambda(vec![Type::int(), Type::int()], vec![], result);
    let mut table = BTreeMap::new();
    for op in ["+", "-", "*", "/"] {
        table.insert(op.to_string(), int2(Type::int()));
    }
    for op in ["<", ">", "<=", ">="] {
        table.insert(op.to_string(), int2(Type::bool_()));
    }
    table.insert(
        "++".to_string(),
        Type::lambda(vec![Type::string(), Type::string()], vec![], Type::string()),
    );

    let t = Symbol::new("T", 0);
    let mut eq = LambdaType::new(
        vec![Type::var(t.clone()), Type::var(t.clone())],
        vec![],
        Type::bool_(),
    );
    eq.type_vars.push(TypeVarDecl {
        sym: t,
        subtypes: vec![],
    });
    table.insert("==".to_string(), Type::Lambda(eq));

    table.insert(
        "intToString".to_string(),
        Type::lambda(vec![Type::int()], vec![], Type::string()),
    );
    table.insert(
        "stringLength".to_string(),
        Type::lambda(vec![Type::string()], vec![], Type::int()),
    );
    let mut concat_all = LambdaType::new(vec![], vec![], Type::string());
    concat_all.rest = Some(Box::new(Type::string()));
    table.insert("concatAll".to_string(), Type::Lambda(concat_all));
    table
}

impl GlobalEnv {
    pub fn new() -> Self {
        GlobalEnv {
            effects: vec![],
            types: vec![],
            terms: vec![],
            effect_names: HashMap::new(),
            type_names: HashMap::new(),
            term_names: HashMap::new(),
            effect_constructors: HashMap::new(),
            attribute_names: HashMap::new(),
            effect_hashes: HashMap::new(),
            type_hashes: HashMap::new(),
            term_hashes: HashMap::new(),
            builtins: builtin_table(),
        }
    }

    // ---- Registration ----

    /// Register an effect declaration. Identical content yields the existing id.
    pub fn register_effect(&mut self, name: &str, constrs: Vec<EffectConstrDef>) -> EffectId {
        let hash = content_hash("effect", &format!("{name}{constrs:?}"));
        if let Some(id) = self.effect_hashes.get(&hash) {
            let id = *id;
            self.index_effect(id);
            return id;
        }
        let id = EffectId(self.effects.len() as u32);
        debug!(effect = name, %hash, %id, "registered effect");
        self.effects.push(EffectDef {
            name: name.to_string(),
            hash,
            constrs,
        });
        self.index_effect(id);
        id
    }

    pub fn register_record(
        &mut self,
        name: &str,
        subtypes: Vec<TypeId>,
        rows: Vec<RecordRowDef>,
    ) -> TypeId {
        let hash = content_hash("record", &format!("{name}{subtypes:?}{rows:?}"));
        if let Some(id) = self.type_hashes.get(&hash) {
            let id = *id;
            self.index_record(id);
            return id;
        }
        let id = TypeId(self.types.len() as u32);
        debug!(record = name, %hash, %id, "registered record");
        self.types.push(RecordDef {
            name: name.to_string(),
            hash,
            subtypes,
            rows,
        });
        self.index_record(id);
        id
    }

    pub fn register_term(&mut self, name: &str, term: Term) -> TermId {
        let hash = content_hash("term", &format!("{name}{:?}", term.without_spans()));
        if let Some(id) = self.term_hashes.get(&hash) {
            let id = *id;
            self.term_names.insert(name.to_string(), id);
            return id;
        }
        let id = TermId(self.terms.len() as u32);
        debug!(term = name, %hash, %id, "registered definition");
        self.terms.push(TermDef {
            name: name.to_string(),
            hash: hash.clone(),
            term,
        });
        self.term_names.insert(name.to_string(), id);
        self.term_hashes.insert(hash, id);
        id
    }

    fn index_effect(&mut self, id: EffectId) {
        let def = &self.effects[id.index()];
        if let Some(old) = self.effect_names.insert(def.name.clone(), id) {
            if old != id {
                // The name moved; the old declaration's constructors go with it.
                self.effect_constructors.retain(|_, (owner, _)| *owner != old);
            }
        }
        self.effect_hashes.insert(def.hash.clone(), id);
        for (idx, constr) in def.constrs.iter().enumerate() {
            self.effect_constructors
                .insert(format!("{}.{}", def.name, constr.name), (id, idx));
        }
    }

    fn index_record(&mut self, id: TypeId) {
        let def = &self.types[id.index()];
        self.type_names.insert(def.name.clone(), id);
        self.type_hashes.insert(def.hash.clone(), id);
        for (idx, row) in def.rows.iter().enumerate() {
            let slot = self.attribute_names.entry(row.name.clone()).or_default();
            if !slot.contains(&(id, idx)) {
                slot.push((id, idx));
            }
        }
    }

    // ---- Lookup ----

    pub fn effect(&self, id: EffectId) -> &EffectDef {
        &self.effects[id.index()]
    }

    pub fn record(&self, id: TypeId) -> &RecordDef {
        &self.types[id.index()]
    }

    pub fn term(&self, id: TermId) -> &TermDef {
        &self.terms[id.index()]
    }

    pub fn effect_by_name(&self, name: &str) -> Option<EffectId> {
        self.effect_names.get(name).copied()
    }

    pub fn record_by_name(&self, name: &str) -> Option<TypeId> {
        self.type_names.get(name).copied()
    }

    pub fn term_by_name(&self, name: &str) -> Option<TermId> {
        self.term_names.get(name).copied()
    }

    /// Resolve `Effect.constr`.
    pub fn effect_constructor(&self, effect: &str, constr: &str) -> Option<(EffectId, usize)> {
        self.effect_constructors
            .get(&format!("{effect}.{constr}"))
            .copied()
    }

    pub fn attribute(&self, name: &str) -> &[(TypeId, usize)] {
        self.attribute_names
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn builtin(&self, name: &str) -> Option<&Type> {
        self.builtins.get(name)
    }

    pub fn terms(&self) -> impl Iterator<Item = (TermId, &TermDef)> {
        self.terms
            .iter()
            .enumerate()
            .map(|(i, def)| (TermId(i as u32), def))
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    pub fn record_count(&self) -> usize {
        self.types.len()
    }

    /// Every record transitively included by `id`, depth first, without `id`.
    pub fn all_subtypes(&self, id: TypeId) -> Vec<TypeId> {
        let mut out = vec![];
        let mut stack: Vec<TypeId> = self.record(id).subtypes.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            if next == id || out.contains(&next) {
                continue;
            }
            out.push(next);
            stack.extend(self.record(next).subtypes.iter().rev().copied());
        }
        out
    }

    /// Does record `ty` equal or include `sub`?
    pub fn has_subtype(&self, ty: TypeId, sub: TypeId) -> bool {
        ty == sub || self.all_subtypes(ty).contains(&sub)
    }

    // ---- Rendering ----

    pub fn show_effect(&self, effect: &EffectRef) -> String {
        match effect {
            EffectRef::Ref(id) => self
                .effects
                .get(id.index())
                .map(|d| d.name.clone())
                .unwrap_or_else(|| id.to_string()),
            EffectRef::Var(sym) => sym.name.clone(),
        }
    }

    pub fn show_effects(&self, effects: &[EffectRef]) -> String {
        let names: Vec<String> = effects.iter().map(|e| self.show_effect(e)).collect();
        format!("{{{}}}", names.join(", "))
    }

    /// Like `Display for Type`, with declared names instead of ids.
    pub fn show_type(&self, ty: &Type) -> String {
        match ty {
            Type::Var(sym) => sym.name.clone(),
            Type::Ref {
                reference,
                type_args,
                ..
            } => {
                let mut out = match reference {
                    Reference::Builtin(name) => name.clone(),
                    Reference::User(id) => self
                        .types
                        .get(id.index())
                        .map(|d| d.name.clone())
                        .unwrap_or_else(|| id.to_string()),
                };
                if !type_args.is_empty() {
                    let args: Vec<String> = type_args.iter().map(|t| self.show_type(t)).collect();
                    out.push_str(&format!("<{}>", args.join(", ")));
                }
                out
            }
            Type::Lambda(l) => {
                let mut out = String::new();
                if !l.type_vars.is_empty() {
                    let vars: Vec<String> = l
                        .type_vars
                        .iter()
                        .map(|d| {
                            if d.subtypes.is_empty() {
                                d.sym.name.clone()
                            } else {
                                let bounds: Vec<String> = d
                                    .subtypes
                                    .iter()
                                    .map(|s| self.show_type(&Type::user(*s)))
                                    .collect();
                                format!("{}: {}", d.sym.name, bounds.join(" + "))
                            }
                        })
                        .collect();
                    out.push_str(&format!("<{}>", vars.join(", ")));
                }
                if !l.effect_vars.is_empty() {
                    let vars: Vec<&str> = l.effect_vars.iter().map(|s| s.name.as_str()).collect();
                    out.push_str(&format!("{{{}}}", vars.join(", ")));
                }
                let mut args: Vec<String> = l.args.iter().map(|t| self.show_type(t)).collect();
                if let Some(rest) = &l.rest {
                    args.push(format!("...{}", self.show_type(rest)));
                }
                out.push_str(&format!(
                    "({}) ={}> {}",
                    args.join(", "),
                    self.show_effects(&l.effects),
                    self.show_type(&l.result)
                ));
                out
            }
        }
    }

    // ---- Persistence ----

    pub fn snapshot(&self) -> EnvSnapshot {
        EnvSnapshot {
            effects: self.effects.clone(),
            types: self.types.clone(),
            terms: self.terms.clone(),
        }
    }

    /// Rebuild an environment from a snapshot; ids are preserved.
    pub fn from_snapshot(snapshot: EnvSnapshot) -> Self {
        let mut env = GlobalEnv::new();
        env.effects = snapshot.effects;
        env.types = snapshot.types;
        env.terms = snapshot.terms;
        for i in 0..env.effects.len() {
            env.index_effect(EffectId(i as u32));
        }
        for i in 0..env.types.len() {
            env.index_record(TypeId(i as u32));
        }
        for i in 0..env.terms.len() {
            let def = &env.terms[i];
            env.term_names.insert(def.name.clone(), TermId(i as u32));
            env.term_hashes.insert(def.hash.clone(), TermId(i as u32));
        }
        env
    }
}

#[derive(Clone, Debug, Default)]
struct Frame {
    values: HashMap<String, (Symbol, Type)>,
    type_vars: HashMap<String, Symbol>,
    effect_vars: HashMap<String, Symbol>,
}

/// Scopes and inference state for one definition.
#[derive(Clone, Debug)]
pub struct LocalEnv {
    frames: Vec<Frame>,
    self_binding: Option<(String, Type)>,
    next_unique: u32,
    pub depth: usize,
    pub unifier: Unifier,
}

impl Default for LocalEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEnv {
    pub fn new() -> Self {
        LocalEnv {
            frames: vec![Frame::default()],
            self_binding: None,
            next_unique: 0,
            depth: 0,
            unifier: Unifier::new(),
        }
    }

    /// Make the definition being typed visible to its own body.
    pub fn set_self(&mut self, name: &str, ty: Type) {
        self.self_binding = Some((name.to_string(), ty));
    }

    pub fn self_binding(&self) -> Option<(&str, &Type)> {
        self.self_binding.as_ref().map(|(n, t)| (n.as_str(), t))
    }

    /// Mint a symbol with a unique never handed out before in this definition.
    pub fn mint(&mut self, name: &str) -> Symbol {
        let sym = Symbol::new(name, self.next_unique);
        self.next_unique += 1;
        sym
    }

    /// A fresh open inference variable.
    pub fn fresh_var(&mut self, name: &str) -> Type {
        let sym = self.mint(&format!("?{name}"));
        self.unifier.open_var(sym)
    }

    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    fn top(&mut self) -> &mut Frame {
        if self.frames.is_empty() {
            self.frames.push(Frame::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    pub fn bind_value(&mut self, sym: Symbol, ty: Type) {
        self.top().values.insert(sym.name.clone(), (sym, ty));
    }

    pub fn bind_type_var(&mut self, sym: Symbol) {
        self.top().type_vars.insert(sym.name.clone(), sym);
    }

    pub fn bind_effect_var(&mut self, sym: Symbol) {
        self.top().effect_vars.insert(sym.name.clone(), sym);
    }

    pub fn lookup_value(&self, name: &str) -> Option<(&Symbol, &Type)> {
        self.frames
            .iter()
            .rev()
            .find_map(|f| f.values.get(name))
            .map(|(s, t)| (s, t))
    }

    pub fn lookup_type_var(&self, name: &str) -> Option<&Symbol> {
        self.frames.iter().rev().find_map(|f| f.type_vars.get(name))
    }

    pub fn lookup_effect_var(&self, name: &str) -> Option<&Symbol> {
        self.frames.iter().rev().find_map(|f| f.effect_vars.get(name))
    }
}

/// What the typer threads through every call.
pub struct Env<'g> {
    pub global: &'g GlobalEnv,
    pub local: LocalEnv,
}

impl<'g> Env<'g> {
    pub fn new(global: &'g GlobalEnv) -> Self {
        Env {
            global,
            local: LocalEnv::new(),
        }
    }

    pub fn with_local(global: &'g GlobalEnv, local: LocalEnv) -> Self {
        Env { global, local }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, ty: Type) -> RecordRowDef {
        RecordRowDef {
            name: name.to_string(),
            ty,
        }
    }

    #[test]
    fn registration_is_idempotent_by_content() {
        let mut env = GlobalEnv::new();
        let log = vec![EffectConstrDef {
            name: "log".into(),
            args: vec![Type::string()],
            ret: Type::void(),
        }];
        let a = env.register_effect("Log", log.clone());
        let b = env.register_effect("Log", log);
        assert_eq!(a, b);
        assert_eq!(env.effect_count(), 1);
        assert_eq!(env.effect_constructor("Log", "log"), Some((a, 0)));
        assert_eq!(env.effect(a).hash.len(), 16);
    }

    #[test]
    fn different_content_gets_a_new_id() {
        let mut env = GlobalEnv::new();
        let a = env.register_effect("Read", vec![]);
        let b = env.register_effect("Write", vec![]);
        assert_ne!(a, b);
        assert_ne!(env.effect(a).hash, env.effect(b).hash);
    }

    #[test]
    fn redeclared_effect_drops_old_constructors() {
        let mut env = GlobalEnv::new();
        let constr = |name: &str| EffectConstrDef {
            name: name.into(),
            args: vec![Type::string()],
            ret: Type::void(),
        };
        let old = env.register_effect("Log", vec![constr("log")]);
        let new = env.register_effect("Log", vec![constr("write")]);
        assert_ne!(old, new);
        assert_eq!(env.effect_by_name("Log"), Some(new));
        assert_eq!(env.effect_constructor("Log", "log"), None);
        assert_eq!(env.effect_constructor("Log", "write"), Some((new, 0)));

        // Going back to the first declaration restores its constructors.
        assert_eq!(env.register_effect("Log", vec![constr("log")]), old);
        assert_eq!(env.effect_constructor("Log", "log"), Some((old, 0)));
        assert_eq!(env.effect_constructor("Log", "write"), None);
    }

    #[test]
    fn definitions_hash_without_their_spans() {
        use kestrel_ast::span::Span;

        let at = |start: u32| {
            let body = Term::new(crate::term::TermKind::Int(1), Type::int(), Span { start, end: start + 1 });
            Term::new(
                crate::term::TermKind::Lambda {
                    args: vec![],
                    body: Box::new(body),
                },
                Type::lambda(vec![], vec![], Type::int()),
                Span { start, end: start + 5 },
            )
        };
        let mut env = GlobalEnv::new();
        let a = env.register_term("one", at(0));
        let b = env.register_term("one", at(40));
        assert_eq!(a, b);
        assert_eq!(env.terms().count(), 1);
        assert_ne!(env.register_term("uno", at(0)), a);
    }

    #[test]
    fn subtypes_are_transitive() {
        let mut env = GlobalEnv::new();
        let named = env.register_record("Named", vec![], vec![row("name", Type::string())]);
        let person = env.register_record("Person", vec![named], vec![row("age", Type::int())]);
        let employee =
            env.register_record("Employee", vec![person], vec![row("company", Type::string())]);
        assert_eq!(env.all_subtypes(employee), vec![person, named]);
        assert!(env.has_subtype(employee, named));
        assert!(env.has_subtype(named, named));
        assert!(!env.has_subtype(named, person));
        assert_eq!(env.attribute("age"), &[(person, 0)]);
    }

    #[test]
    fn show_type_uses_declared_names() {
        let mut env = GlobalEnv::new();
        let log = env.register_effect("Log", vec![]);
        let t = Type::lambda(vec![Type::string()], vec![EffectRef::Ref(log)], Type::void());
        assert_eq!(env.show_type(&t), "(string) ={Log}> void");
        assert_eq!(
            env.show_type(env.builtin("==").unwrap()),
            "<T>(T, T) ={}> bool"
        );
    }

    #[test]
    fn snapshot_restores_ids_and_indexes() {
        let mut env = GlobalEnv::new();
        env.register_effect("Read", vec![]);
        let log = env.register_effect(
            "Log",
            vec![EffectConstrDef {
                name: "log".into(),
                args: vec![Type::string()],
                ret: Type::void(),
            }],
        );
        let restored = GlobalEnv::from_snapshot(env.snapshot());
        assert_eq!(restored.effect_by_name("Log"), Some(log));
        assert_eq!(restored.effect_constructor("Log", "log"), Some((log, 0)));
        assert_eq!(restored.snapshot(), env.snapshot());
    }

    #[test]
    fn local_scopes_shadow_and_unwind() {
        let mut local = LocalEnv::new();
        let outer = local.mint("x");
        local.bind_value(outer.clone(), Type::int());
        local.push_frame();
        let inner = local.mint("x");
        local.bind_value(inner.clone(), Type::string());
        assert_eq!(local.lookup_value("x").unwrap().0, &inner);
        local.pop_frame();
        assert_eq!(local.lookup_value("x").unwrap().0, &outer);
        assert_ne!(outer.unique, inner.unique);
    }
}
