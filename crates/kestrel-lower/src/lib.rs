#![deny(unused_must_use)]
#![warn(clippy::dbg_macro, clippy::todo, clippy::unimplemented)]
#![forbid(unsafe_code)]

pub mod cps;
mod lower;

pub use cps::{Cps, CpsGroup};
pub use lower::{callee_is_cps, needs_cps, Lowerer};

use kestrel_types::{check_binders, InternalError, Term, TermId};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LowerError {
    #[error("recursive reference outside of a definition")]
    UnboundRecursion,
    #[error(transparent)]
    Internal(#[from] InternalError),
}

/// Lower the body of toplevel definition `id`.
pub fn lower_define(term: &Term, id: TermId) -> Result<Cps, LowerError> {
    lower_with(term, Some(id))
}

/// Lower a toplevel expression.
pub fn lower_expr(term: &Term) -> Result<Cps, LowerError> {
    lower_with(term, None)
}

fn lower_with(term: &Term, self_id: Option<TermId>) -> Result<Cps, LowerError> {
    let first = term.max_unique().map_or(0, |m| m + 1);
    let mut lowerer = Lowerer::new(first, self_id);
    let cps = lowerer.lower_pure(term)?;
    check_lowered(&cps)?;
    debug!(definition = ?self_id, "lowered");
    Ok(cps)
}

/// Every binder in lowered code has its own unique, the handler list aside.
pub fn check_lowered(cps: &Cps) -> Result<(), InternalError> {
    let mut binders = vec![];
    cps.visit(&mut |node| binders.extend(node.binders()));
    check_binders(binders)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_types::Symbol;

    #[test]
    fn handler_list_may_be_rebound() {
        let inner = Cps::lambda(vec![Symbol::handlers()], Cps::handlers());
        let outer = Cps::lambda(vec![Symbol::handlers(), Symbol::new("x", 0)], inner);
        assert_eq!(check_lowered(&outer), Ok(()));
    }

    #[test]
    fn repeated_binder_is_reported() {
        let x = Symbol::new("x", 3);
        let y = Symbol::new("y", 3);
        let cps = Cps::let_(x, Cps::Int(1), Cps::lambda(vec![y], Cps::Unit));
        assert_eq!(
            check_lowered(&cps),
            Err(InternalError::UniquenessViolation {
                unique: 3,
                first: "x".to_string(),
                second: "y".to_string(),
            })
        );
    }
}
