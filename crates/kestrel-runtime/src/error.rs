use kestrel_types::{EffectId, TermId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    /// No installed handler matches a raised effect. The handler list is
    /// rendered innermost first.
    #[error("uncaught effect {effect}; installed handlers: [{handlers}]")]
    UncaughtEffect { effect: EffectId, handlers: String },

    #[error("continuation resumed twice")]
    ResumedTwice,

    #[error("handler for {effect} has no case {idx}")]
    NoSuchCase { effect: EffectId, idx: usize },

    #[error("cannot call {0}")]
    NotAFunction(String),

    #[error("{callee} expects {expected} arguments, got {found}")]
    ArityMismatch {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: String,
    },

    #[error("unbound variable {0}")]
    UnboundVariable(String),

    #[error("unknown definition {0}")]
    UnknownGlobal(TermId),

    #[error("definition {0} refers to its own value while being evaluated")]
    CyclicGlobal(TermId),

    #[error("effectful code finished without delivering a result")]
    NoResult,

    #[error("record has no group for {0}")]
    MissingRecordGroup(String),

    #[error("{0}")]
    Builtin(String),

    #[error("maximum call depth exceeded (limit: {0} calls)")]
    DepthLimitExceeded(usize),
}
