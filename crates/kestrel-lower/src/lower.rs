//! Typed terms to continuation-passing form.
//!
//! Lowering is driven by a meta-continuation: `lower_cps(term, k)` produces
//! code that evaluates `term` and then runs whatever `k` builds from the
//! term's value. Pure subterms are handed to `k` directly; an effectful one
//! ends in a call whose `done` lambda binds the value and continues with `k`.

use crate::cps::{Cps, CpsGroup};
use crate::LowerError;
use kestrel_types::term::{RecordTerm, TypedStmt};
use kestrel_types::{LambdaType, Symbol, Term, TermId, TermKind, Type};
use tracing::trace;

type Next<'t> = Box<dyn FnOnce(&mut Lowerer, Cps) -> Result<Cps, LowerError> + 't>;
type NextMany<'t> = Box<dyn FnOnce(&mut Lowerer, Vec<Cps>) -> Result<Cps, LowerError> + 't>;

/// Does calling a value of this declared type use the continuation-passing
/// convention?
pub fn callee_is_cps(target: &Term) -> bool {
    target.is.as_lambda().is_some_and(LambdaType::is_cps)
}

/// Does evaluating `term` (not calling it) need a handler list?
pub fn needs_cps(term: &Term) -> bool {
    match &term.kind {
        TermKind::Raise { .. } | TermKind::Handle { .. } => true,
        TermKind::Lambda { .. } => false,
        TermKind::Apply { target, .. } if callee_is_cps(target) => true,
        _ => term.children().into_iter().any(needs_cps),
    }
}

fn deliver<'t>(to: Symbol) -> Next<'t> {
    Box::new(move |_, value| Ok(Cps::call(Cps::Var(to), vec![Cps::handlers(), value])))
}

fn seq(first: Cps, rest: Cps) -> Cps {
    match rest {
        Cps::Sequence(mut items) => {
            items.insert(0, first);
            Cps::Sequence(items)
        }
        rest => Cps::Sequence(vec![first, rest]),
    }
}

pub struct Lowerer {
    next: u32,
    self_id: Option<TermId>,
}

impl Lowerer {
    /// `first_unique` must be above every unique used in the terms lowered.
    pub fn new(first_unique: u32, self_id: Option<TermId>) -> Self {
        Lowerer {
            next: first_unique,
            self_id,
        }
    }

    fn fresh(&mut self, name: &str) -> Symbol {
        let sym = Symbol::new(name, self.next);
        self.next += 1;
        sym
    }

    fn recur(&self) -> Result<Cps, LowerError> {
        self.self_id
            .map(Cps::Global)
            .ok_or(LowerError::UnboundRecursion)
    }

    /// Lower a term in direct style. Effectful parts run under a fresh, empty
    /// handler list and are captured back into a value.
    pub fn lower_pure(&mut self, term: &Term) -> Result<Cps, LowerError> {
        if needs_cps(term) {
            return self.capture(term);
        }
        Ok(match &term.kind {
            TermKind::Int(n) => Cps::Int(*n),
            TermKind::Float(x) => Cps::Float(*x),
            TermKind::Str(s) => Cps::Str(s.clone()),
            TermKind::Bool(b) => Cps::Bool(*b),
            TermKind::Var(sym) => Cps::var(sym),
            TermKind::Ref(id) => Cps::Global(*id),
            TermKind::Builtin(name) => Cps::Builtin(name.clone()),
            TermKind::Recur => self.recur()?,
            TermKind::Apply { target, args, .. } => {
                let callee = self.lower_pure(target)?;
                let mut values = Vec::with_capacity(args.len());
                for (i, arg) in args.iter().enumerate() {
                    let value = self.lower_pure(arg)?;
                    values.push(self.adapt(target, i, arg, value));
                }
                Cps::call(callee, values)
            }
            TermKind::Lambda { args, body } => self.lower_lambda(term, args, body)?,
            TermKind::If { cond, yes, no } => Cps::If {
                cond: Box::new(self.lower_pure(cond)?),
                yes: Box::new(self.lower_pure(yes)?),
                no: Box::new(match no {
                    Some(no) => self.lower_pure(no)?,
                    None => Cps::Unit,
                }),
            },
            TermKind::Sequence(stmts) => self.lower_stmts_pure(stmts)?,
            TermKind::Record(record) => {
                let spreads = record
                    .spreads
                    .iter()
                    .map(|s| self.lower_pure(s))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut rows = vec![];
                for term in record.groups.iter().flat_map(|g| g.rows.iter().flatten()) {
                    rows.push(self.lower_pure(term)?);
                }
                rebuild_record(record, spreads, rows)
            }
            TermKind::Attribute {
                target,
                record,
                idx,
            } => Cps::Attribute {
                target: Box::new(self.lower_pure(target)?),
                record: *record,
                idx: *idx,
            },
            TermKind::Coerce(inner) => {
                let value = self.lower_pure(inner)?;
                self.coerce(term, value)
            }
            TermKind::Raise { .. } | TermKind::Handle { .. } => self.capture(term)?,
        })
    }

    fn capture(&mut self, term: &Term) -> Result<Cps, LowerError> {
        let done = self.fresh("done");
        let body = self.lower_cps(term, deliver(done.clone()))?;
        Ok(Cps::Capture {
            done,
            body: Box::new(Cps::let_(Symbol::handlers(), Cps::EmptyHandlers, body)),
        })
    }

    fn lower_stmts_pure(&mut self, stmts: &[TypedStmt]) -> Result<Cps, LowerError> {
        let Some((first, rest)) = stmts.split_first() else {
            return Ok(Cps::Unit);
        };
        match first {
            TypedStmt::Let { binding, value } => {
                let value = self.lower_pure(value)?;
                let body = self.lower_stmts_pure(rest)?;
                Ok(Cps::let_(binding.clone(), value, body))
            }
            TypedStmt::Expr(expr) => {
                let value = self.lower_pure(expr)?;
                if rest.is_empty() {
                    Ok(value)
                } else {
                    Ok(seq(value, self.lower_stmts_pure(rest)?))
                }
            }
        }
    }

    fn lower_lambda(&mut self, term: &Term, args: &[Symbol], body: &Term) -> Result<Cps, LowerError> {
        if !term.is.as_lambda().is_some_and(LambdaType::is_cps) {
            return Ok(Cps::lambda(args.to_vec(), self.lower_pure(body)?));
        }
        let done = self.fresh("done");
        let mut params = args.to_vec();
        params.push(Symbol::handlers());
        params.push(done.clone());
        let body = self.lower_cps(body, deliver(done))?;
        Ok(Cps::lambda(params, body))
    }

    /// A pure function passed where an effectful one is declared gets wrapped
    /// so it answers through `done` like any other effectful function.
    fn adapt(&mut self, target: &Term, idx: usize, arg: &Term, value: Cps) -> Cps {
        let Some(declared) = target.is.as_lambda() else {
            return value;
        };
        let Some(Type::Lambda(param)) = declared.args.get(idx).or(declared.rest.as_deref()) else {
            return value;
        };
        if !param.is_cps() || arg.is.as_lambda().map_or(true, LambdaType::is_cps) {
            return value;
        }
        trace!(arg = idx, "wrapping pure argument for an effectful parameter");
        self.wrap_pure(param, value)
    }

    /// Lowered [`TermKind::Coerce`]: `term.is` is the continuation-passing
    /// shape the value must take.
    fn coerce(&mut self, term: &Term, value: Cps) -> Cps {
        match term.is.as_lambda() {
            Some(shape) => {
                trace!("wrapping pure function for a continuation-passing type");
                self.wrap_pure(shape, value)
            }
            None => value,
        }
    }

    /// `value` is a pure function; the result takes `shape`'s arguments plus
    /// `handlers` and `done`, and delivers the pure result through `done`.
    fn wrap_pure(&mut self, shape: &LambdaType, value: Cps) -> Cps {
        let inner = self.fresh("f");
        let done = self.fresh("done");
        let params: Vec<Symbol> = (0..shape.args.len())
            .map(|n| self.fresh(&format!("a{n}")))
            .collect();
        let call = Cps::call(Cps::var(&inner), params.iter().map(Cps::var).collect());
        let mut outer = params;
        outer.push(Symbol::handlers());
        outer.push(done.clone());
        Cps::let_(
            inner,
            value,
            Cps::lambda(outer, Cps::call(Cps::Var(done), vec![Cps::handlers(), call])),
        )
    }

    /// Lower `term` in continuation-passing style. The handler list in scope
    /// is [`Symbol::handlers`].
    pub fn lower_cps<'t>(&mut self, term: &'t Term, k: Next<'t>) -> Result<Cps, LowerError> {
        if !needs_cps(term) {
            let value = self.lower_pure(term)?;
            return k(self, value);
        }
        match &term.kind {
            TermKind::Apply { target, args, .. } => {
                let mut parts: Vec<&'t Term> = vec![&**target];
                parts.extend(args.iter());
                self.lift(
                    parts,
                    Box::new(move |l, mut values| {
                        let callee = values.remove(0);
                        let mut adapted = Vec::with_capacity(values.len() + 2);
                        for (i, (value, arg)) in values.into_iter().zip(args).enumerate() {
                            adapted.push(l.adapt(target, i, arg, value));
                        }
                        if !callee_is_cps(target) {
                            return k(l, Cps::call(callee, adapted));
                        }
                        let r = l.fresh("r");
                        let cont = Cps::lambda(vec![Symbol::handlers(), r.clone()], k(l, Cps::Var(r))?);
                        adapted.push(Cps::handlers());
                        adapted.push(cont);
                        Ok(Cps::call(callee, adapted))
                    }),
                )
            }
            TermKind::Raise { effect, idx, args } => {
                let (effect, idx) = (*effect, *idx);
                self.lift(
                    args.iter().collect(),
                    Box::new(move |l, values| {
                        let r = l.fresh("r");
                        let done = Cps::lambda(vec![Symbol::handlers(), r.clone()], k(l, Cps::Var(r))?);
                        Ok(Cps::Raise {
                            handlers: Box::new(Cps::handlers()),
                            effect,
                            idx,
                            args: values,
                            done: Box::new(done),
                        })
                    }),
                )
            }
            TermKind::Handle {
                target,
                effect,
                cases,
                pure,
            } => {
                let effect = *effect;
                self.lift(
                    vec![&**target],
                    Box::new(move |l, mut values| {
                        let body = values.remove(0);
                        let join = l.fresh("join");
                        let r = l.fresh("r");
                        let join_fn = Cps::lambda(vec![Symbol::handlers(), r.clone()], k(l, Cps::Var(r))?);

                        let mut lowered = Vec::with_capacity(cases.len());
                        for case in cases {
                            let mut params = vec![Symbol::handlers()];
                            params.extend(case.args.iter().cloned());
                            params.push(case.k.clone());
                            let body = l.lower_cps(&case.body, deliver(join.clone()))?;
                            lowered.push(Cps::lambda(params, body));
                        }
                        let pure_body = l.lower_cps(&pure.body, deliver(join.clone()))?;
                        let pure_fn = Cps::lambda(vec![Symbol::handlers(), pure.arg.clone()], pure_body);

                        Ok(Cps::let_(
                            join,
                            join_fn,
                            Cps::Handle {
                                effect,
                                body: Box::new(body),
                                cases: lowered,
                                pure: Box::new(pure_fn),
                                handlers: Box::new(Cps::handlers()),
                            },
                        ))
                    }),
                )
            }
            TermKind::If { cond, yes, no } => self.lift(
                vec![&**cond],
                Box::new(move |l, mut values| {
                    let cond = Box::new(values.remove(0));
                    let effectful = needs_cps(yes) || no.as_deref().is_some_and(needs_cps);
                    if !effectful {
                        let yes = Box::new(l.lower_pure(yes)?);
                        let no = Box::new(match no {
                            Some(no) => l.lower_pure(no)?,
                            None => Cps::Unit,
                        });
                        return k(l, Cps::If { cond, yes, no });
                    }
                    let join = l.fresh("join");
                    let r = l.fresh("r");
                    let join_fn = Cps::lambda(vec![Symbol::handlers(), r.clone()], k(l, Cps::Var(r))?);
                    let yes = l.lower_cps(yes, deliver(join.clone()))?;
                    let no = match no {
                        Some(no) => l.lower_cps(no, deliver(join.clone()))?,
                        None => deliver(join.clone())(l, Cps::Unit)?,
                    };
                    Ok(Cps::let_(
                        join,
                        join_fn,
                        Cps::If {
                            cond,
                            yes: Box::new(yes),
                            no: Box::new(no),
                        },
                    ))
                }),
            ),
            TermKind::Sequence(stmts) => self.lower_stmts_cps(stmts, k),
            TermKind::Record(record) => {
                let mut parts: Vec<&'t Term> = record.spreads.iter().collect();
                parts.extend(record.groups.iter().flat_map(|g| g.rows.iter().flatten()));
                self.lift(
                    parts,
                    Box::new(move |l, mut values| {
                        let rows = values.split_off(record.spreads.len());
                        k(l, rebuild_record(record, values, rows))
                    }),
                )
            }
            TermKind::Attribute {
                target,
                record,
                idx,
            } => {
                let (record, idx) = (*record, *idx);
                self.lift(
                    vec![&**target],
                    Box::new(move |l, mut values| {
                        let target = Box::new(values.remove(0));
                        k(l, Cps::Attribute { target, record, idx })
                    }),
                )
            }
            TermKind::Coerce(inner) => self.lift(
                vec![&**inner],
                Box::new(move |l, mut values| {
                    let value = l.coerce(term, values.remove(0));
                    k(l, value)
                }),
            ),
            _ => {
                let value = self.lower_pure(term)?;
                k(self, value)
            }
        }
    }

    fn lower_stmts_cps<'t>(&mut self, stmts: &'t [TypedStmt], k: Next<'t>) -> Result<Cps, LowerError> {
        let Some((first, rest)) = stmts.split_first() else {
            return k(self, Cps::Unit);
        };
        match first {
            TypedStmt::Let { binding, value } => self.lower_cps(
                value,
                Box::new(move |l, value| {
                    let body = l.lower_stmts_cps(rest, k)?;
                    Ok(Cps::let_(binding.clone(), value, body))
                }),
            ),
            TypedStmt::Expr(expr) if rest.is_empty() => self.lower_cps(expr, k),
            TypedStmt::Expr(expr) => self.lower_cps(
                expr,
                Box::new(move |l, value| {
                    let tail = l.lower_stmts_cps(rest, k)?;
                    Ok(seq(value, tail))
                }),
            ),
        }
    }

    /// Evaluate `terms` left to right, then continue with their values.
    fn lift<'t>(&mut self, mut terms: Vec<&'t Term>, k: NextMany<'t>) -> Result<Cps, LowerError> {
        if terms.is_empty() {
            return k(self, vec![]);
        }
        let first = terms.remove(0);
        self.lower_cps(
            first,
            Box::new(move |l, value| {
                l.lift(
                    terms,
                    Box::new(move |l, mut values| {
                        values.insert(0, value);
                        k(l, values)
                    }),
                )
            }),
        )
    }
}

/// Reassemble a record from its lowered spreads and its explicit rows in
/// group order.
fn rebuild_record(record: &RecordTerm, spreads: Vec<Cps>, rows: Vec<Cps>) -> Cps {
    let mut rows = rows.into_iter();
    let groups = record
        .groups
        .iter()
        .map(|g| CpsGroup {
            ty: g.ty,
            spread: g.spread,
            rows: g
                .rows
                .iter()
                .map(|row| row.as_ref().and_then(|_| rows.next()))
                .collect(),
        })
        .collect();
    Cps::Record {
        ty: record.ty,
        spreads,
        groups,
    }
}
