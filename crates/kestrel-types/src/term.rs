//! Typed terms produced by the typer and consumed by lowering.

use crate::effects;
use crate::symbol::{EffectId, Symbol, TermId, TypeId};
use crate::ty::{EffectRef, LambdaType, Type};
use kestrel_ast::span::Span;
use std::collections::HashMap;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct Term {
    pub kind: TermKind,
    /// Resolved type. Contains no open inference variable once typing of the
    /// enclosing definition has finished.
    pub is: Type,
    pub span: Span,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum TermKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    /// Local binding.
    Var(Symbol),
    /// Toplevel definition.
    Ref(TermId),
    Builtin(String),
    /// The definition currently being typed.
    Recur,
    Apply {
        /// The callee; its `is` keeps the declared (uninstantiated) type, which
        /// fixes the calling convention.
        target: Box<Term>,
        args: Vec<Term>,
        /// Callee signature after type and effect instantiation.
        signature: LambdaType,
    },
    Lambda {
        args: Vec<Symbol>,
        body: Box<Term>,
    },
    If {
        cond: Box<Term>,
        yes: Box<Term>,
        no: Option<Box<Term>>,
    },
    Sequence(Vec<TypedStmt>),
    Record(Box<RecordTerm>),
    Attribute {
        target: Box<Term>,
        record: TypeId,
        idx: usize,
    },
    Raise {
        effect: EffectId,
        idx: usize,
        args: Vec<Term>,
    },
    Handle {
        target: Box<Term>,
        effect: EffectId,
        /// One case per constructor, in constructor order.
        cases: Vec<HandleCase>,
        pure: Box<PureCase>,
    },
    /// A pure function value used at a continuation-passing type; `is` is
    /// that type. Lowering wraps the value to answer through `done`.
    Coerce(Box<Term>),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum TypedStmt {
    Let { binding: Symbol, value: Term },
    Expr(Term),
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordTerm {
    pub ty: TypeId,
    /// Spread values, evaluated once each before any row.
    pub spreads: Vec<Term>,
    /// The constructed record's own rows first, then one group per included
    /// subtype in `GlobalEnv::all_subtypes` order.
    pub groups: Vec<RecordGroup>,
}

/// Rows of one record type inside a construction. A `None` row is copied from
/// the spread at index `spread`.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordGroup {
    pub ty: TypeId,
    pub spread: Option<usize>,
    pub rows: Vec<Option<Term>>,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct HandleCase {
    pub constr: usize,
    pub args: Vec<Symbol>,
    pub k: Symbol,
    pub body: Term,
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub struct PureCase {
    pub arg: Symbol,
    pub body: Term,
}

impl Term {
    pub fn new(kind: TermKind, is: Type, span: Span) -> Self {
        Term { kind, is, span }
    }

    /// `self` used where `expected` is wanted. A pure function standing in
    /// for a continuation-passing one is wrapped in [`TermKind::Coerce`];
    /// anything else comes back unchanged.
    pub fn coerced(self, expected: &Type) -> Term {
        let convention_changes = match (self.is.as_lambda(), expected.as_lambda()) {
            (Some(found), Some(wanted)) => !found.is_cps() && wanted.is_cps(),
            _ => false,
        };
        if !convention_changes {
            return self;
        }
        let span = self.span;
        Term::new(TermKind::Coerce(Box::new(self)), expected.clone(), span)
    }

    /// Effects performed by evaluating this term (not by calling its value).
    pub fn effects(&self) -> Vec<EffectRef> {
        match &self.kind {
            TermKind::Int(_)
            | TermKind::Float(_)
            | TermKind::Str(_)
            | TermKind::Bool(_)
            | TermKind::Var(_)
            | TermKind::Ref(_)
            | TermKind::Builtin(_)
            | TermKind::Recur
            | TermKind::Lambda { .. } => vec![],
            TermKind::Apply {
                target,
                args,
                signature,
            } => {
                let mut out = target.effects();
                for arg in args {
                    out = effects::union(&out, &arg.effects());
                }
                effects::union(&out, &signature.effects)
            }
            TermKind::Raise { effect, args, .. } => {
                let mut out = vec![];
                for arg in args {
                    out = effects::union(&out, &arg.effects());
                }
                effects::union(&out, &[EffectRef::Ref(*effect)])
            }
            TermKind::Handle {
                target,
                effect,
                cases,
                pure,
            } => {
                let mut out = target.effects();
                if let Some(lambda) = target.is.as_lambda() {
                    out = effects::union(&out, &effects::without(&lambda.effects, *effect));
                }
                for case in cases {
                    out = effects::union(&out, &case.body.effects());
                }
                effects::union(&out, &pure.body.effects())
            }
            _ => {
                let mut out = vec![];
                for child in self.children() {
                    out = effects::union(&out, &child.effects());
                }
                out
            }
        }
    }

    /// Direct subterms in evaluation order.
    pub fn children(&self) -> Vec<&Term> {
        match &self.kind {
            TermKind::Int(_)
            | TermKind::Float(_)
            | TermKind::Str(_)
            | TermKind::Bool(_)
            | TermKind::Var(_)
            | TermKind::Ref(_)
            | TermKind::Builtin(_)
            | TermKind::Recur => vec![],
            TermKind::Apply { target, args, .. } => {
                let mut out = vec![target.as_ref()];
                out.extend(args.iter());
                out
            }
            TermKind::Lambda { body, .. } => vec![body.as_ref()],
            TermKind::If { cond, yes, no } => {
                let mut out = vec![cond.as_ref(), yes.as_ref()];
                if let Some(no) = no {
                    out.push(no);
                }
                out
            }
            TermKind::Sequence(stmts) => stmts
                .iter()
                .map(|s| match s {
                    TypedStmt::Let { value, .. } => value,
                    TypedStmt::Expr(e) => e,
                })
                .collect(),
            TermKind::Record(record) => record
                .spreads
                .iter()
                .chain(record.groups.iter().flat_map(|g| g.rows.iter().flatten()))
                .collect(),
            TermKind::Attribute { target, .. } | TermKind::Coerce(target) => vec![target.as_ref()],
            TermKind::Raise { args, .. } => args.iter().collect(),
            TermKind::Handle {
                target,
                cases,
                pure,
                ..
            } => {
                let mut out = vec![target.as_ref()];
                out.extend(cases.iter().map(|c| &c.body));
                out.push(&pure.body);
                out
            }
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Term> {
        match &mut self.kind {
            TermKind::Int(_)
            | TermKind::Float(_)
            | TermKind::Str(_)
            | TermKind::Bool(_)
            | TermKind::Var(_)
            | TermKind::Ref(_)
            | TermKind::Builtin(_)
            | TermKind::Recur => vec![],
            TermKind::Apply { target, args, .. } => {
                let mut out = vec![target.as_mut()];
                out.extend(args.iter_mut());
                out
            }
            TermKind::Lambda { body, .. } => vec![body.as_mut()],
            TermKind::If { cond, yes, no } => {
                let mut out = vec![cond.as_mut(), yes.as_mut()];
                if let Some(no) = no {
                    out.push(no);
                }
                out
            }
            TermKind::Sequence(stmts) => stmts
                .iter_mut()
                .map(|s| match s {
                    TypedStmt::Let { value, .. } => value,
                    TypedStmt::Expr(e) => e,
                })
                .collect(),
            TermKind::Record(record) => {
                let record = record.as_mut();
                record
                    .spreads
                    .iter_mut()
                    .chain(record.groups.iter_mut().flat_map(|g| g.rows.iter_mut().flatten()))
                    .collect()
            }
            TermKind::Attribute { target, .. } | TermKind::Coerce(target) => vec![target.as_mut()],
            TermKind::Raise { args, .. } => args.iter_mut().collect(),
            TermKind::Handle {
                target,
                cases,
                pure,
                ..
            } => {
                let mut out = vec![target.as_mut()];
                out.extend(cases.iter_mut().map(|c| &mut c.body));
                out.push(&mut pure.body);
                out
            }
        }
    }

    /// Copy with every span reset, so equal definitions hash alike wherever
    /// they were written.
    pub fn without_spans(&self) -> Term {
        let mut out = self.clone();
        out.clear_spans();
        out
    }

    fn clear_spans(&mut self) {
        self.span = Span::default();
        for child in self.children_mut() {
            child.clear_spans();
        }
    }

    /// Pre-order traversal.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a Term)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Replace solved inference variables throughout the tree.
    pub fn substitute(&mut self, solution: &HashMap<u32, Type>) {
        if solution.is_empty() {
            return;
        }
        self.is = self.is.subst_types(solution);
        if let TermKind::Apply { signature, .. } = &mut self.kind {
            *signature = signature.transform(
                &mut |sym| solution.get(&sym.unique).cloned(),
                &mut |effs| effs.to_vec(),
            );
        }
        for child in self.children_mut() {
            child.substitute(solution);
        }
    }

    /// Symbols introduced by this node (not its children).
    pub fn binders(&self) -> Vec<&Symbol> {
        match &self.kind {
            TermKind::Lambda { args, .. } => args.iter().collect(),
            TermKind::Sequence(stmts) => stmts
                .iter()
                .filter_map(|s| match s {
                    TypedStmt::Let { binding, .. } => Some(binding),
                    TypedStmt::Expr(_) => None,
                })
                .collect(),
            TermKind::Handle { cases, pure, .. } => {
                let mut out: Vec<&Symbol> = vec![];
                for case in cases {
                    out.extend(case.args.iter());
                    out.push(&case.k);
                }
                out.push(&pure.arg);
                out
            }
            _ => vec![],
        }
    }

    /// Largest unique bound or referenced anywhere in the tree.
    pub fn max_unique(&self) -> Option<u32> {
        let mut max: Option<u32> = None;
        self.visit(&mut |t| {
            let mut note = |sym: &Symbol| {
                if !sym.is_reserved() {
                    max = Some(max.map_or(sym.unique, |m| m.max(sym.unique)));
                }
            };
            if let TermKind::Var(sym) = &t.kind {
                note(sym);
            }
            for sym in t.binders() {
                note(sym);
            }
        });
        max
    }
}
