use kestrel_ast::span::Span;
use thiserror::Error;

/// A located type error. Typing of the enclosing toplevel stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at {}..{}", span.start, span.end)]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub span: Span,
}

/// Types inside messages are pre-rendered with `GlobalEnv::show_type` so the
/// error outlives the environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeErrorKind {
    #[error("unbound identifier `{0}`")]
    UnboundIdentifier(String),

    #[error("arity mismatch: expected {expected}, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("unknown effect constructor `{effect}.{constr}`")]
    UnknownEffectConstructor { effect: String, constr: String },

    #[error("effect `{effect}` is handled but never raised by a target of type {target}")]
    EffectNotRaised { effect: String, target: String },

    #[error("missing attribute `{name}` for record `{record}`")]
    MissingAttribute { record: String, name: String },

    #[error("attribute `{name}` of record `{record}` supplied twice")]
    DuplicateAttribute { record: String, name: String },

    #[error("cannot spread a value of type {found} into record `{record}`")]
    InvalidSpread { record: String, found: String },

    #[error("{ty} does not include required subtype `{required}`")]
    SubtypeError { ty: String, required: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("unknown effect `{0}`")]
    UnknownEffect(String),

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("record `{record}` has no attribute `{name}`")]
    UnknownAttribute { record: String, name: String },

    #[error("body performs effect `{effect}` which the lambda does not declare")]
    UndeclaredEffect { effect: String },

    #[error("toplevel performs unhandled effects {effects}")]
    UnhandledEffect { effects: String },

    #[error("no case for `{effect}.{constr}`")]
    MissingHandlerCase { effect: String, constr: String },

    #[error("more than one case for `{effect}.{constr}`")]
    DuplicateHandlerCase { effect: String, constr: String },

    #[error("could not infer type variable `{0}`")]
    UnresolvedTypeVariable(String),

    #[error("expression nesting exceeds {0}")]
    DepthLimitExceeded(usize),
}

impl TypeErrorKind {
    #[inline]
    pub fn at(self, span: Span) -> TypeError {
        TypeError { kind: self, span }
    }
}

/// Compiler bugs. These abort a whole module instead of being reported next to
/// user errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("internal error: unique {unique} is bound by both `{first}` and `{second}`")]
    UniquenessViolation {
        unique: u32,
        first: String,
        second: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Internal(#[from] InternalError),
}

pub type TypeResult<T> = Result<T, TypeError>;
