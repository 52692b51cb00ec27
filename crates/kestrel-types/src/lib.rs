#![deny(unused_must_use)]
#![warn(clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![forbid(unsafe_code)]

pub mod effects;
pub mod env;
mod error;
mod symbol;
pub mod term;
mod ty;
pub mod typer;
mod unify;
mod uniqueness;

pub use env::{Env, EnvSnapshot, GlobalEnv, LocalEnv};
pub use error::{CheckError, InternalError, TypeError, TypeErrorKind, TypeResult};
pub use symbol::{EffectId, Symbol, TermId, TypeId, HANDLERS_UNIQUE};
pub use term::{Term, TermKind};
pub use ty::{EffectRef, LambdaType, Reference, Type, TypeVarDecl, BUILTIN_TYPES};
pub use typer::{type_expr, type_module, type_toplevel, TypedToplevel};
pub use unify::{
    apply_effect_variables, apply_type_variables, fits_expectation, ConstraintKind,
    TypeConstraint, Unifier,
};
pub use uniqueness::{check_binders, check_uniqueness};
