//! The type vocabulary: references, lambdas with latent effect sets, and variables.

use crate::symbol::{EffectId, Symbol, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

pub const INT: &str = "int";
pub const FLOAT: &str = "float";
pub const STRING: &str = "string";
pub const BOOL: &str = "bool";
pub const VOID: &str = "void";

/// Builtin type names, in display order.
pub const BUILTIN_TYPES: &[&str] = &[INT, FLOAT, STRING, BOOL, VOID];

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Reference {
    Builtin(String),
    User(TypeId),
}

/// A declared effect, or an effect variable standing for a set of effects
/// that is substituted at instantiation.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EffectRef {
    Ref(EffectId),
    Var(Symbol),
}

/// A type variable binder with the record types it must include.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeVarDecl {
    pub sym: Symbol,
    pub subtypes: Vec<TypeId>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LambdaType {
    pub args: Vec<Type>,
    /// Latent effect set: performed when the lambda is called.
    pub effects: Vec<EffectRef>,
    /// Quantified effect variables. At most one is supported at instantiation.
    pub effect_vars: Vec<Symbol>,
    /// Quantified type variables.
    pub type_vars: Vec<TypeVarDecl>,
    /// Element type of trailing rest arguments.
    pub rest: Option<Box<Type>>,
    pub result: Box<Type>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Ref {
        reference: Reference,
        type_args: Vec<Type>,
        effect_args: Vec<EffectRef>,
    },
    Lambda(LambdaType),
    /// A type variable: either bound by an enclosing lambda's `type_vars`, or an
    /// open inference variable (only while a definition is being typed).
    Var(Symbol),
}

impl Type {
    pub fn builtin(name: &str) -> Self {
        Type::Ref {
            reference: Reference::Builtin(name.to_string()),
            type_args: vec![],
            effect_args: vec![],
        }
    }
    #[inline]
    pub fn int() -> Self {
        Type::builtin(INT)
    }
    #[inline]
    pub fn float() -> Self {
        Type::builtin(FLOAT)
    }
    #[inline]
    pub fn string() -> Self {
        Type::builtin(STRING)
    }
    #[inline]
    pub fn bool_() -> Self {
        Type::builtin(BOOL)
    }
    #[inline]
    pub fn void() -> Self {
        Type::builtin(VOID)
    }
    pub fn user(id: TypeId) -> Self {
        Type::Ref {
            reference: Reference::User(id),
            type_args: vec![],
            effect_args: vec![],
        }
    }
    pub fn var(sym: Symbol) -> Self {
        Type::Var(sym)
    }

    /// Monomorphic lambda type.
    pub fn lambda(args: Vec<Type>, effects: Vec<EffectRef>, result: Type) -> Self {
        Type::Lambda(LambdaType::new(args, effects, result))
    }

    pub fn as_lambda(&self) -> Option<&LambdaType> {
        match self {
            Type::Lambda(l) => Some(l),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Ref { reference: Reference::Builtin(name), .. } if name == VOID)
    }

    /// The record a type refers to, if it is a user reference.
    pub fn record_id(&self) -> Option<TypeId> {
        match self {
            Type::Ref {
                reference: Reference::User(id),
                ..
            } => Some(*id),
            _ => None,
        }
    }

    /// Rebuild the type bottom-up. `on_var` may replace a type variable;
    /// `on_effects` rewrites every effect list (lambda effects and reference
    /// effect arguments).
    pub fn transform<V, E>(&self, on_var: &mut V, on_effects: &mut E) -> Type
    where
        V: FnMut(&Symbol) -> Option<Type>,
        E: FnMut(&[EffectRef]) -> Vec<EffectRef>,
    {
        match self {
            Type::Var(sym) => on_var(sym).unwrap_or_else(|| self.clone()),
            Type::Ref {
                reference,
                type_args,
                effect_args,
            } => Type::Ref {
                reference: reference.clone(),
                type_args: type_args
                    .iter()
                    .map(|t| t.transform(on_var, on_effects))
                    .collect(),
                effect_args: on_effects(effect_args),
            },
            Type::Lambda(l) => Type::Lambda(l.transform(on_var, on_effects)),
        }
    }

    /// Replace type variables by unique.
    pub fn subst_types(&self, mapping: &HashMap<u32, Type>) -> Type {
        self.transform(&mut |sym| mapping.get(&sym.unique).cloned(), &mut |effs| {
            effs.to_vec()
        })
    }

    /// Expand effect variables by unique into effect lists.
    pub fn subst_effects(&self, mapping: &HashMap<u32, Vec<EffectRef>>) -> Type {
        self.transform(&mut |_| None, &mut |effs| {
            crate::effects::expand_vars(effs, mapping)
        })
    }

    /// Every type variable occurring in the type.
    pub fn vars(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<Symbol>) {
        match self {
            Type::Var(sym) => {
                out.insert(sym.clone());
            }
            Type::Ref { type_args, .. } => type_args.iter().for_each(|t| t.collect_vars(out)),
            Type::Lambda(l) => {
                l.args.iter().for_each(|t| t.collect_vars(out));
                if let Some(rest) = &l.rest {
                    rest.collect_vars(out);
                }
                l.result.collect_vars(out);
            }
        }
    }
}

impl LambdaType {
    pub fn new(args: Vec<Type>, effects: Vec<EffectRef>, result: Type) -> Self {
        LambdaType {
            args,
            effects,
            effect_vars: vec![],
            type_vars: vec![],
            rest: None,
            result: Box::new(result),
        }
    }

    /// Whether calls use the continuation-passing convention
    /// `(...args, handlers, done)`.
    pub fn is_cps(&self) -> bool {
        !self.effects.is_empty() || !self.effect_vars.is_empty()
    }

    pub fn transform<V, E>(&self, on_var: &mut V, on_effects: &mut E) -> LambdaType
    where
        V: FnMut(&Symbol) -> Option<Type>,
        E: FnMut(&[EffectRef]) -> Vec<EffectRef>,
    {
        LambdaType {
            args: self
                .args
                .iter()
                .map(|t| t.transform(on_var, on_effects))
                .collect(),
            effects: on_effects(&self.effects),
            effect_vars: self.effect_vars.clone(),
            type_vars: self.type_vars.clone(),
            rest: self
                .rest
                .as_ref()
                .map(|r| Box::new(r.transform(on_var, on_effects))),
            result: Box::new(self.result.transform(on_var, on_effects)),
        }
    }
}

impl fmt::Display for EffectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectRef::Ref(id) => write!(f, "{id}"),
            EffectRef::Var(sym) => write!(f, "{sym}"),
        }
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

// Names of user types and effects need the environment; see `GlobalEnv::show_type`.
impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Var(sym) => write!(f, "{sym}"),
            Type::Ref {
                reference,
                type_args,
                ..
            } => {
                match reference {
                    Reference::Builtin(name) => write!(f, "{name}")?,
                    Reference::User(id) => write!(f, "{id}")?,
                }
                if !type_args.is_empty() {
                    write!(f, "<")?;
                    write_list(f, type_args)?;
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Lambda(l) => {
                if !l.type_vars.is_empty() {
                    let names: Vec<_> = l.type_vars.iter().map(|d| d.sym.clone()).collect();
                    write!(f, "<")?;
                    write_list(f, &names)?;
                    write!(f, ">")?;
                }
                if !l.effect_vars.is_empty() {
                    write!(f, "{{")?;
                    write_list(f, &l.effect_vars)?;
                    write!(f, "}}")?;
                }
                write!(f, "(")?;
                write_list(f, &l.args)?;
                if let Some(rest) = &l.rest {
                    if !l.args.is_empty() {
                        write!(f, ", ")?;
                    }
                    write!(f, "...{rest}")?;
                }
                write!(f, ") ={{")?;
                write_list(f, &l.effects)?;
                write!(f, "}}> {}", l.result)
            }
        }
    }
}
