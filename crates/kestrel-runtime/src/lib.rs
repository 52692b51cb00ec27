#![deny(unused_must_use)]
#![warn(clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![forbid(unsafe_code)]

mod builtins;
mod error;
pub mod eval;
pub mod protocol;
mod value;

pub use error::RuntimeError;
pub use eval::{Machine, MAX_CALL_DEPTH};
pub use protocol::{install_handler, raise, Dispatcher, HandlerList};
pub use value::{Closure, Env, Native, RecordValue, Value};

use kestrel_lower::{lower_define, lower_expr, Cps, LowerError};
use kestrel_types::TypedToplevel;

/// Lower one checked toplevel and hand it to `machine`. Definitions are
/// registered; an expression comes back lowered so the caller decides when
/// to run it.
pub fn load_toplevel(machine: &mut Machine, item: &TypedToplevel) -> Result<Option<Cps>, LowerError> {
    match item {
        TypedToplevel::Define { id, term, .. } => {
            machine.define(*id, lower_define(term, *id)?);
            Ok(None)
        }
        TypedToplevel::Expr(term) => lower_expr(term).map(Some),
        TypedToplevel::Effect(_) | TypedToplevel::Record(_) => Ok(None),
    }
}
