//! Function application, including type and effect variable instantiation.

use super::{expect_fits, resolve_effect, type_expr, type_type};
use crate::effects;
use crate::env::Env;
use crate::error::{TypeErrorKind, TypeResult};
use crate::symbol::Symbol;
use crate::term::{Term, TermKind};
use crate::ty::{EffectRef, LambdaType, Type};
use crate::unify::{apply_effect_variables, apply_type_variables};
use kestrel_ast::ast::{Expr, Ident, TypeExpr};
use kestrel_ast::span::Span;
use tracing::debug;

/// Type of the parameter an argument at `idx` binds to.
fn param_type(sig: &LambdaType, idx: usize) -> Option<&Type> {
    sig.args.get(idx).or(sig.rest.as_deref())
}

pub fn type_apply(
    env: &mut Env,
    target: &Expr,
    args: &[Expr],
    type_args: &[TypeExpr],
    effect_args: Option<&[Ident]>,
    span: Span,
) -> TypeResult<Term> {
    let target = type_expr(env, target, None)?;
    match target.is.clone() {
        Type::Var(sym) if env.local.unifier.is_open(&sym) => {
            apply_open(env, target, args, type_args, effect_args, span)
        }
        Type::Lambda(lambda) => apply_lambda(env, target, lambda, args, type_args, effect_args, span),
        other => Err(TypeErrorKind::TypeMismatch {
            expected: "a function".to_string(),
            found: env.global.show_type(&other),
        }
        .at(target.span)),
    }
}

/// Callee whose type is still being inferred (a recursive call without an
/// annotation). Its shape is taken from the arguments and assumed pure.
fn apply_open(
    env: &mut Env,
    target: Term,
    args: &[Expr],
    type_args: &[TypeExpr],
    effect_args: Option<&[Ident]>,
    span: Span,
) -> TypeResult<Term> {
    if !type_args.is_empty() || effect_args.is_some() {
        return Err(TypeErrorKind::Unsupported(
            "type or effect arguments on a callee of unknown type".to_string(),
        )
        .at(span));
    }
    let args = args
        .iter()
        .map(|a| type_expr(env, a, None))
        .collect::<TypeResult<Vec<_>>>()?;
    let result = env.local.fresh_var("ret");
    let signature = LambdaType::new(
        args.iter().map(|a| a.is.clone()).collect(),
        vec![],
        result.clone(),
    );
    expect_fits(env, &target.is, &Type::Lambda(signature.clone()), target.span)?;
    Ok(Term::new(
        TermKind::Apply {
            target: Box::new(target),
            args,
            signature,
        },
        result,
        span,
    ))
}

fn apply_lambda(
    env: &mut Env,
    target: Term,
    lambda: LambdaType,
    args: &[Expr],
    type_args: &[TypeExpr],
    effect_args: Option<&[Ident]>,
    span: Span,
) -> TypeResult<Term> {
    let mut sig = instantiate_types(env, &lambda, type_args, span)?;

    let mut typed = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let hint = param_type(&sig, i).cloned();
        typed.push(type_expr(env, arg, hint.as_ref())?);
    }

    sig = match effect_args {
        Some(names) => {
            let effs = names
                .iter()
                .map(|n| resolve_effect(env, n))
                .collect::<TypeResult<Vec<_>>>()?;
            apply_effect_variables(&sig, &effs).map_err(|k| k.at(span))?
        }
        None if sig.effect_vars.len() == 1 => {
            let var = sig.effect_vars[0].clone();
            let inferred = infer_effect_var(&sig, &var, &typed);
            debug!(
                var = %var,
                effects = %env.global.show_effects(&inferred),
                "inferred effect argument"
            );
            apply_effect_variables(&sig, &inferred).map_err(|k| k.at(span))?
        }
        None => apply_effect_variables(&sig, &[]).map_err(|k| k.at(span))?,
    };

    let arity_ok = match sig.rest {
        Some(_) => typed.len() >= sig.args.len(),
        None => typed.len() == sig.args.len(),
    };
    if !arity_ok {
        return Err(TypeErrorKind::ArityMismatch {
            expected: sig.args.len(),
            found: typed.len(),
        }
        .at(span));
    }
    for (i, arg) in typed.iter().enumerate() {
        if let Some(param) = param_type(&sig, i).cloned() {
            expect_fits(env, &arg.is, &param, arg.span)?;
        }
    }

    let result = (*sig.result).clone();
    Ok(Term::new(
        TermKind::Apply {
            target: Box::new(target),
            args: typed,
            signature: sig,
        },
        result,
        span,
    ))
}

/// Explicit type arguments are checked against the binders. Omitted ones
/// become fresh inference variables, which is only allowed for unbounded
/// binders.
fn instantiate_types(
    env: &mut Env,
    lambda: &LambdaType,
    type_args: &[TypeExpr],
    span: Span,
) -> TypeResult<LambdaType> {
    if !type_args.is_empty() {
        let tys = type_args
            .iter()
            .map(|t| type_type(env, t))
            .collect::<TypeResult<Vec<_>>>()?;
        return apply_type_variables(env.global, lambda, &tys).map_err(|k| k.at(span));
    }
    if lambda.type_vars.is_empty() {
        return Ok(lambda.clone());
    }
    if lambda.type_vars.iter().any(|d| !d.subtypes.is_empty()) {
        return Err(TypeErrorKind::ArityMismatch {
            expected: lambda.type_vars.len(),
            found: 0,
        }
        .at(span));
    }
    let fresh = lambda
        .type_vars
        .iter()
        .map(|d| env.local.fresh_var(&d.sym.name))
        .collect::<Vec<_>>();
    apply_type_variables(env.global, lambda, &fresh).map_err(|k| k.at(span))
}

/// The effects an argument performs beyond what its parameter already names
/// are what the variable has to stand for.
fn infer_effect_var(sig: &LambdaType, var: &Symbol, args: &[Term]) -> Vec<EffectRef> {
    let var_ref = EffectRef::Var(var.clone());
    let mut out = vec![];
    for (i, arg) in args.iter().enumerate() {
        let Some(Type::Lambda(param)) = param_type(sig, i) else {
            continue;
        };
        if !param.effects.contains(&var_ref) {
            continue;
        }
        let Some(found) = arg.is.as_lambda() else {
            continue;
        };
        let named = effects::difference(&param.effects, &[var_ref.clone()]);
        out = effects::union(&out, &effects::difference(&found.effects, &named));
    }
    out
}
