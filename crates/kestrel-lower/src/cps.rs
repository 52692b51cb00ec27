//! Continuation-passing IR.
//!
//! Effectful functions take two trailing arguments, the handler list and a
//! `done` continuation, and deliver their result by calling `done(handlers,
//! value)` instead of returning. Pure code is unchanged. The handler list is
//! always bound to [`Symbol::handlers`], rebound by every lambda that receives
//! one.

use kestrel_types::{EffectId, Symbol, TermId, TypeId};
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug, PartialEq)]
pub enum Cps {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Unit,
    Var(Symbol),
    Builtin(String),
    Global(TermId),
    Call {
        target: Box<Cps>,
        args: Vec<Cps>,
    },
    Lambda {
        args: Vec<Symbol>,
        body: Rc<Cps>,
    },
    If {
        cond: Box<Cps>,
        yes: Box<Cps>,
        no: Box<Cps>,
    },
    Let {
        binding: Symbol,
        value: Box<Cps>,
        body: Box<Cps>,
    },
    /// Evaluate in order; the value is the last one's.
    Sequence(Vec<Cps>),
    Record {
        ty: TypeId,
        spreads: Vec<Cps>,
        groups: Vec<CpsGroup>,
    },
    Attribute {
        target: Box<Cps>,
        record: TypeId,
        idx: usize,
    },
    /// The handler list of a program that has installed nothing.
    EmptyHandlers,
    /// Dispatch to the innermost handler for `effect`. `done` receives
    /// `(handlers, value)` when a case resumes.
    Raise {
        handlers: Box<Cps>,
        effect: EffectId,
        idx: usize,
        args: Vec<Cps>,
        done: Box<Cps>,
    },
    /// Install one handler frame and run `body(handlers, done)`. Cases are
    /// `(handlers, args.., k)`, the pure case `(handlers, value)`.
    Handle {
        effect: EffectId,
        body: Box<Cps>,
        cases: Vec<Cps>,
        pure: Box<Cps>,
        handlers: Box<Cps>,
    },
    /// Run `body` with `done` bound to a continuation that records its value,
    /// and evaluate to that value. This is where effectful code re-enters
    /// direct style.
    Capture {
        done: Symbol,
        body: Box<Cps>,
    },
}

/// See `kestrel_types::term::RecordGroup`.
#[derive(Clone, Debug, PartialEq)]
pub struct CpsGroup {
    pub ty: TypeId,
    pub spread: Option<usize>,
    pub rows: Vec<Option<Cps>>,
}

impl Cps {
    pub fn var(sym: &Symbol) -> Cps {
        Cps::Var(sym.clone())
    }

    pub fn handlers() -> Cps {
        Cps::Var(Symbol::handlers())
    }

    pub fn call(target: Cps, args: Vec<Cps>) -> Cps {
        Cps::Call {
            target: Box::new(target),
            args,
        }
    }

    pub fn lambda(args: Vec<Symbol>, body: Cps) -> Cps {
        Cps::Lambda {
            args,
            body: Rc::new(body),
        }
    }

    pub fn let_(binding: Symbol, value: Cps, body: Cps) -> Cps {
        Cps::Let {
            binding,
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    /// Direct subnodes, lambda bodies included.
    pub fn children(&self) -> Vec<&Cps> {
        match self {
            Cps::Int(_)
            | Cps::Float(_)
            | Cps::Bool(_)
            | Cps::Str(_)
            | Cps::Unit
            | Cps::Var(_)
            | Cps::Builtin(_)
            | Cps::Global(_)
            | Cps::EmptyHandlers => vec![],
            Cps::Call { target, args } => {
                let mut out = vec![target.as_ref()];
                out.extend(args.iter());
                out
            }
            Cps::Lambda { body, .. } => vec![body.as_ref()],
            Cps::If { cond, yes, no } => vec![cond.as_ref(), yes.as_ref(), no.as_ref()],
            Cps::Let { value, body, .. } => vec![value.as_ref(), body.as_ref()],
            Cps::Sequence(items) => items.iter().collect(),
            Cps::Record {
                spreads, groups, ..
            } => spreads
                .iter()
                .chain(groups.iter().flat_map(|g| g.rows.iter().flatten()))
                .collect(),
            Cps::Attribute { target, .. } => vec![target.as_ref()],
            Cps::Raise {
                handlers,
                args,
                done,
                ..
            } => {
                let mut out = vec![handlers.as_ref()];
                out.extend(args.iter());
                out.push(done);
                out
            }
            Cps::Handle {
                body,
                cases,
                pure,
                handlers,
                ..
            } => {
                let mut out = vec![body.as_ref()];
                out.extend(cases.iter());
                out.push(pure);
                out.push(handlers);
                out
            }
            Cps::Capture { body, .. } => vec![body.as_ref()],
        }
    }

    /// Symbols bound by this node.
    pub fn binders(&self) -> Vec<&Symbol> {
        match self {
            Cps::Lambda { args, .. } => args.iter().collect(),
            Cps::Let { binding, .. } => vec![binding],
            Cps::Capture { done, .. } => vec![done],
            _ => vec![],
        }
    }

    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Cps)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Cps]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Cps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cps::Int(n) => write!(f, "{n}"),
            Cps::Float(x) => write!(f, "{x:?}"),
            Cps::Bool(b) => write!(f, "{b}"),
            Cps::Str(s) => write!(f, "{s:?}"),
            Cps::Unit => write!(f, "()"),
            Cps::Var(sym) => write!(f, "{sym}"),
            Cps::Builtin(name) => write!(f, "builtin({name})"),
            Cps::Global(id) => write!(f, "{id}"),
            Cps::Call { target, args } => {
                write!(f, "{target}(")?;
                write_list(f, args)?;
                write!(f, ")")
            }
            Cps::Lambda { args, body } => {
                let names: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "(({}) => {body})", names.join(", "))
            }
            Cps::If { cond, yes, no } => write!(f, "if {cond} {{ {yes} }} else {{ {no} }}"),
            Cps::Let {
                binding,
                value,
                body,
            } => write!(f, "let {binding} = {value}; {body}"),
            Cps::Sequence(items) => {
                write!(f, "{{ ")?;
                for item in items {
                    write!(f, "{item}; ")?;
                }
                write!(f, "}}")
            }
            Cps::Record {
                ty,
                spreads,
                groups,
            } => {
                write!(f, "{ty} {{")?;
                if !spreads.is_empty() {
                    write!(f, " spreads: [")?;
                    write_list(f, spreads)?;
                    write!(f, "]")?;
                }
                for group in groups {
                    write!(f, " {}: [", group.ty)?;
                    for (i, row) in group.rows.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        match (row, group.spread) {
                            (Some(row), _) => write!(f, "{row}")?,
                            (None, Some(s)) => write!(f, "...{s}")?,
                            (None, None) => write!(f, "?")?,
                        }
                    }
                    write!(f, "]")?;
                }
                write!(f, " }}")
            }
            Cps::Attribute { target, record, idx } => write!(f, "{target}.{record}[{idx}]"),
            Cps::EmptyHandlers => write!(f, "[]"),
            Cps::Raise {
                handlers,
                effect,
                idx,
                args,
                done,
            } => {
                write!(f, "raise({handlers}, {effect}, {idx}, [")?;
                write_list(f, args)?;
                write!(f, "], {done})")
            }
            Cps::Handle {
                effect,
                body,
                cases,
                pure,
                handlers,
            } => {
                write!(f, "handle({effect}, {body}, [")?;
                write_list(f, cases)?;
                write!(f, "], {pure}, {handlers})")
            }
            Cps::Capture { done, body } => write!(f, "capture {done} {{ {body} }}"),
        }
    }
}
