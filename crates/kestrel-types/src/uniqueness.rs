//! Binder uniqueness: every symbol bound in a definition has its own unique.
//!
//! Lowering and evaluation key environments by unique alone, so a repeat is a
//! compiler bug rather than a user error.

use crate::error::InternalError;
use crate::symbol::Symbol;
use crate::term::Term;
use std::collections::HashMap;

pub fn check_uniqueness(term: &Term) -> Result<(), InternalError> {
    let mut binders = vec![];
    term.visit(&mut |t| binders.extend(t.binders()));
    check_binders(binders)
}

/// First repeated unique among `binders`, in order. The reserved handler
/// symbol may be bound any number of times.
pub fn check_binders<'a>(binders: impl IntoIterator<Item = &'a Symbol>) -> Result<(), InternalError> {
    let mut seen: HashMap<u32, &str> = HashMap::new();
    for sym in binders {
        if sym.is_reserved() {
            continue;
        }
        if let Some(first) = seen.insert(sym.unique, &sym.name) {
            return Err(InternalError::UniquenessViolation {
                unique: sym.unique,
                first: first.to_string(),
                second: sym.name.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::Symbol;
    use crate::term::{TermKind, TypedStmt};
    use crate::ty::Type;
    use kestrel_ast::span::Span;

    fn let_(name: &str, unique: u32) -> TypedStmt {
        TypedStmt::Let {
            binding: Symbol::new(name, unique),
            value: Term::new(TermKind::Int(1), Type::int(), Span::default()),
        }
    }

    #[test]
    fn distinct_binders_pass() {
        let seq = Term::new(
            TermKind::Sequence(vec![let_("a", 0), let_("b", 1)]),
            Type::void(),
            Span::default(),
        );
        assert_eq!(check_uniqueness(&seq), Ok(()));
    }

    #[test]
    fn reserved_handler_symbol_may_repeat() {
        let handlers = Symbol::handlers();
        let x = Symbol::new("x", 1);
        assert_eq!(check_binders([&handlers, &x, &handlers]), Ok(()));
        assert!(check_binders([&x, &handlers, &x]).is_err());
    }

    #[test]
    fn repeated_unique_is_reported() {
        let seq = Term::new(
            TermKind::Sequence(vec![let_("a", 4), let_("b", 4)]),
            Type::void(),
            Span::default(),
        );
        assert_eq!(
            check_uniqueness(&seq),
            Err(InternalError::UniquenessViolation {
                unique: 4,
                first: "a".to_string(),
                second: "b".to_string(),
            })
        );
    }
}
