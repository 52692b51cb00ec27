//! Expression typer: untyped surface tree to typed [`Term`]s.
//!
//! Every function takes the [`Env`] of the definition being typed. Errors are
//! located and abort the current toplevel; see [`type_module`].

mod apply;
mod handle;
mod lambda;
mod record;
mod toplevel;
mod types;

pub use apply::type_apply;
pub use handle::type_handle;
pub use lambda::type_lambda;
pub use record::type_record;
pub use toplevel::{type_module, type_toplevel, TypedToplevel};
pub use types::{resolve_effect, type_type};

use crate::env::Env;
use crate::error::{TypeErrorKind, TypeResult};
use crate::term::{Term, TermKind, TypedStmt};
use crate::ty::Type;
use crate::unify::apply_type_variables;
use kestrel_ast::ast::{BinOp, Expr, Ident, Lit, Stmt};
use kestrel_ast::span::Span;

/// Maximum expression nesting, to keep pathological input off the stack limit.
pub const MAX_TYPE_DEPTH: usize = 512;

fn enter_depth(env: &mut Env, span: Span) -> TypeResult<()> {
    env.local.depth += 1;
    if env.local.depth > MAX_TYPE_DEPTH {
        env.local.depth -= 1;
        return Err(TypeErrorKind::DepthLimitExceeded(MAX_TYPE_DEPTH).at(span));
    }
    Ok(())
}

fn exit_depth(env: &mut Env) {
    env.local.depth = env.local.depth.saturating_sub(1);
}

/// Type `expr`. `hint` is the type the context expects, if known; it guides
/// inference but is not itself checked here.
pub fn type_expr(env: &mut Env, expr: &Expr, hint: Option<&Type>) -> TypeResult<Term> {
    enter_depth(env, expr.span())?;
    let out = type_expr_inner(env, expr, hint);
    exit_depth(env);
    out
}

fn type_expr_inner(env: &mut Env, expr: &Expr, hint: Option<&Type>) -> TypeResult<Term> {
    match expr {
        Expr::Lit(lit, span) => Ok(type_lit(lit, *span)),
        Expr::Var(ident) => type_ident(env, ident),
        Expr::Lambda(lambda) => type_lambda(env, lambda, hint),
        Expr::Apply {
            target,
            args,
            type_args,
            effect_args,
            span,
        } => type_apply(env, target, args, type_args, effect_args.as_deref(), *span),
        Expr::Attribute { target, name, span } => type_attribute(env, target, name, *span),
        Expr::Binary { lhs, op, rhs, span } => type_binary(env, lhs, *op, rhs, *span),
        Expr::If { cond, yes, no, span } => type_if(env, cond, yes, no.as_deref(), hint, *span),
        Expr::Block { stmts, span } => {
            env.local.push_frame();
            let out = type_block(env, stmts, hint, *span);
            env.local.pop_frame();
            out
        }
        Expr::Record { name, rows, span } => type_record(env, name, rows, *span),
        Expr::Raise {
            effect,
            constr,
            args,
            span,
        } => type_raise(env, effect, constr, args, *span),
        Expr::Handle {
            target,
            cases,
            pure,
            span,
        } => type_handle(env, target, cases, pure, *span),
    }
}

/// Check `found` against `expected`, recording inference constraints.
pub(crate) fn expect_fits(env: &mut Env, found: &Type, expected: &Type, span: Span) -> TypeResult<()> {
    if env.local.unifier.fits(found, expected) {
        Ok(())
    } else {
        Err(TypeErrorKind::TypeMismatch {
            expected: env.global.show_type(expected),
            found: env.global.show_type(found),
        }
        .at(span))
    }
}

/// Check `term` against `expected` where the value is kept at the expected
/// type: a pure function may stand in for a continuation-passing one.
pub(crate) fn coerce(env: &mut Env, term: Term, expected: &Type) -> TypeResult<Term> {
    expect_fits(env, &term.is, expected, term.span)?;
    Ok(term.coerced(expected))
}

fn type_lit(lit: &Lit, span: Span) -> Term {
    let (kind, is) = match lit {
        Lit::Int(n) => (TermKind::Int(*n), Type::int()),
        Lit::Float(x) => (TermKind::Float(*x), Type::float()),
        Lit::Str(s) => (TermKind::Str(s.clone()), Type::string()),
        Lit::Bool(b) => (TermKind::Bool(*b), Type::bool_()),
    };
    Term::new(kind, is, span)
}

/// Locals, then the definition being typed, then toplevels, then builtins.
fn type_ident(env: &mut Env, ident: &Ident) -> TypeResult<Term> {
    if let Some((sym, ty)) = env.local.lookup_value(&ident.text) {
        return Ok(Term::new(TermKind::Var(sym.clone()), ty.clone(), ident.span));
    }
    if let Some((name, ty)) = env.local.self_binding() {
        if name == ident.text {
            return Ok(Term::new(TermKind::Recur, ty.clone(), ident.span));
        }
    }
    if let Some(id) = env.global.term_by_name(&ident.text) {
        let ty = env.global.term(id).term.is.clone();
        return Ok(Term::new(TermKind::Ref(id), ty, ident.span));
    }
    if let Some(ty) = env.global.builtin(&ident.text) {
        return Ok(Term::new(
            TermKind::Builtin(ident.text.clone()),
            ty.clone(),
            ident.span,
        ));
    }
    Err(TypeErrorKind::UnboundIdentifier(ident.text.clone()).at(ident.span))
}

/// Operators are calls of the builtin of the same name. A builtin generic in
/// one type variable is instantiated with the left operand's type, so both
/// operands must agree.
fn type_binary(env: &mut Env, lhs: &Expr, op: BinOp, rhs: &Expr, span: Span) -> TypeResult<Term> {
    let name = op.symbol();
    let op_ty = match env.global.builtin(name) {
        Some(Type::Lambda(l)) => l.clone(),
        _ => return Err(TypeErrorKind::UnboundIdentifier(name.to_string()).at(span)),
    };
    let lhs = type_expr(env, lhs, op_ty.args.first())?;
    let signature = if op_ty.type_vars.len() == 1 {
        apply_type_variables(env.global, &op_ty, &[lhs.is.clone()]).map_err(|k| k.at(span))?
    } else {
        op_ty.clone()
    };
    if signature.args.len() != 2 {
        return Err(TypeErrorKind::ArityMismatch {
            expected: signature.args.len(),
            found: 2,
        }
        .at(span));
    }
    let rhs = type_expr(env, rhs, Some(&signature.args[1]))?;
    expect_fits(env, &lhs.is, &signature.args[0], lhs.span)?;
    expect_fits(env, &rhs.is, &signature.args[1], rhs.span)?;
    let result = (*signature.result).clone();
    let target = Term::new(
        TermKind::Builtin(name.to_string()),
        Type::Lambda(op_ty),
        span,
    );
    Ok(Term::new(
        TermKind::Apply {
            target: Box::new(target),
            args: vec![lhs, rhs],
            signature,
        },
        result,
        span,
    ))
}

fn type_if(
    env: &mut Env,
    cond: &Expr,
    yes: &Expr,
    no: Option<&Expr>,
    hint: Option<&Type>,
    span: Span,
) -> TypeResult<Term> {
    let cond = type_expr(env, cond, Some(&Type::bool_()))?;
    expect_fits(env, &cond.is, &Type::bool_(), cond.span)?;
    let yes = type_expr(env, yes, hint)?;
    let (no, is) = match no {
        None => {
            expect_fits(env, &yes.is, &Type::void(), yes.span)?;
            (None, Type::void())
        }
        Some(no) => {
            let no = type_expr(env, no, Some(&yes.is))?;
            let no = coerce(env, no, &yes.is)?;
            let is = yes.is.clone();
            (Some(Box::new(no)), is)
        }
    };
    Ok(Term::new(
        TermKind::If {
            cond: Box::new(cond),
            yes: Box::new(yes),
            no,
        },
        is,
        span,
    ))
}

fn type_block(env: &mut Env, stmts: &[Stmt], hint: Option<&Type>, span: Span) -> TypeResult<Term> {
    let mut typed = Vec::with_capacity(stmts.len());
    let mut is = Type::void();
    for (i, stmt) in stmts.iter().enumerate() {
        let last = i + 1 == stmts.len();
        match stmt {
            Stmt::Let {
                name, ann, value, ..
            } => {
                let ann = ann.as_ref().map(|a| type_type(env, a)).transpose()?;
                let value = type_expr(env, value, ann.as_ref())?;
                let value = match &ann {
                    Some(ann) => coerce(env, value, ann)?,
                    None => value,
                };
                let binding = env.local.mint(&name.text);
                env.local
                    .bind_value(binding.clone(), ann.unwrap_or_else(|| value.is.clone()));
                typed.push(TypedStmt::Let { binding, value });
                is = Type::void();
            }
            Stmt::Expr(expr) => {
                let term = type_expr(env, expr, if last { hint } else { None })?;
                is = term.is.clone();
                typed.push(TypedStmt::Expr(term));
            }
        }
    }
    Ok(Term::new(TermKind::Sequence(typed), is, span))
}

/// `expr.name`: the row is looked up on the target's record first, then on the
/// records it includes.
fn type_attribute(env: &mut Env, target: &Expr, name: &Ident, span: Span) -> TypeResult<Term> {
    let target = type_expr(env, target, None)?;
    let Some(record) = target.is.record_id() else {
        return Err(TypeErrorKind::TypeMismatch {
            expected: "a record".to_string(),
            found: env.global.show_type(&target.is),
        }
        .at(target.span));
    };
    let candidates = env.global.attribute(&name.text);
    let found = candidates
        .iter()
        .find(|(owner, _)| *owner == record)
        .or_else(|| {
            candidates
                .iter()
                .find(|(owner, _)| env.global.has_subtype(record, *owner))
        })
        .copied();
    let Some((owner, idx)) = found else {
        return Err(TypeErrorKind::UnknownAttribute {
            record: env.global.record(record).name.clone(),
            name: name.text.clone(),
        }
        .at(name.span));
    };
    let is = env.global.record(owner).rows[idx].ty.clone();
    Ok(Term::new(
        TermKind::Attribute {
            target: Box::new(target),
            record: owner,
            idx,
        },
        is,
        span,
    ))
}

/// `raise!(Effect.constr(args))` has the constructor's return type and
/// requires exactly the constructor's effect.
fn type_raise(
    env: &mut Env,
    effect: &Ident,
    constr: &Ident,
    args: &[Expr],
    span: Span,
) -> TypeResult<Term> {
    let Some((effect_id, idx)) = env.global.effect_constructor(&effect.text, &constr.text) else {
        return Err(TypeErrorKind::UnknownEffectConstructor {
            effect: effect.text.clone(),
            constr: constr.text.clone(),
        }
        .at(span));
    };
    let def = env.global.effect(effect_id).constrs[idx].clone();
    if args.len() != def.args.len() {
        return Err(TypeErrorKind::ArityMismatch {
            expected: def.args.len(),
            found: args.len(),
        }
        .at(span));
    }
    let mut typed = Vec::with_capacity(args.len());
    for (arg, expected) in args.iter().zip(&def.args) {
        let arg = type_expr(env, arg, Some(expected))?;
        expect_fits(env, &arg.is, expected, arg.span)?;
        typed.push(arg);
    }
    Ok(Term::new(
        TermKind::Raise {
            effect: effect_id,
            idx,
            args: typed,
        },
        def.ret,
        span,
    ))
}
