//! Typing of `handle!` expressions.
//!
//! A handle runs a zero-argument function and intercepts one effect. The
//! `pure` case receives the function's result and fixes the type of the whole
//! expression; every constructor case must produce that same type. Inside a
//! case, `k` resumes the suspended computation. It takes the constructor's
//! return value (nothing for `void`) and still performs the handled effect,
//! since handlers are shallow: resuming does not reinstall the case.

use super::{coerce, type_expr};
use crate::effects;
use crate::env::Env;
use crate::error::{TypeErrorKind, TypeResult};
use crate::term::{self, Term, TermKind};
use crate::ty::{LambdaType, Type};
use kestrel_ast::ast::{Expr, HandleCase, PureCase};
use kestrel_ast::span::Span;

pub fn type_handle(
    env: &mut Env,
    target: &Expr,
    cases: &[HandleCase],
    pure: &PureCase,
    span: Span,
) -> TypeResult<Term> {
    let target = type_expr(env, target, None)?;
    let lambda = match target.is.as_lambda() {
        Some(l)
            if l.args.is_empty()
                && l.rest.is_none()
                && l.type_vars.is_empty()
                && l.effect_vars.is_empty() =>
        {
            l.clone()
        }
        _ => {
            return Err(TypeErrorKind::TypeMismatch {
                expected: "a function taking no arguments".to_string(),
                found: env.global.show_type(&target.is),
            }
            .at(target.span))
        }
    };

    let Some(first) = cases.first() else {
        return Err(TypeErrorKind::Unsupported("handle without effect cases".to_string()).at(span));
    };
    if let Some(other) = cases.iter().find(|c| c.effect.text != first.effect.text) {
        return Err(TypeErrorKind::Unsupported(format!(
            "one handle may only intercept one effect, found `{}` and `{}`",
            first.effect.text, other.effect.text
        ))
        .at(other.span));
    }
    let Some(effect) = env.global.effect_by_name(&first.effect.text) else {
        return Err(TypeErrorKind::UnknownEffect(first.effect.text.clone()).at(first.effect.span));
    };
    if !effects::contains(&lambda.effects, effect) {
        return Err(TypeErrorKind::EffectNotRaised {
            effect: first.effect.text.clone(),
            target: env.global.show_type(&target.is),
        }
        .at(span));
    }

    env.local.push_frame();
    let pure = type_pure(env, pure, &lambda);
    env.local.pop_frame();
    let pure = pure?;
    let result = pure.body.is.clone();

    let def = env.global.effect(effect).clone();
    let mut slots: Vec<Option<term::HandleCase>> = def.constrs.iter().map(|_| None).collect();
    for case in cases {
        let Some(idx) = def.constrs.iter().position(|c| c.name == case.constr.text) else {
            return Err(TypeErrorKind::UnknownEffectConstructor {
                effect: def.name.clone(),
                constr: case.constr.text.clone(),
            }
            .at(case.span));
        };
        if slots[idx].is_some() {
            return Err(TypeErrorKind::DuplicateHandlerCase {
                effect: def.name.clone(),
                constr: case.constr.text.clone(),
            }
            .at(case.span));
        }
        env.local.push_frame();
        let typed = type_case(env, case, idx, &def.constrs[idx], &lambda, &result);
        env.local.pop_frame();
        slots[idx] = Some(typed?);
    }

    let mut typed_cases = Vec::with_capacity(slots.len());
    for (slot, constr) in slots.into_iter().zip(&def.constrs) {
        match slot {
            Some(case) => typed_cases.push(case),
            None => {
                return Err(TypeErrorKind::MissingHandlerCase {
                    effect: def.name.clone(),
                    constr: constr.name.clone(),
                }
                .at(span))
            }
        }
    }

    Ok(Term::new(
        TermKind::Handle {
            target: Box::new(target),
            effect,
            cases: typed_cases,
            pure: Box::new(pure),
        },
        result,
        span,
    ))
}

fn type_pure(env: &mut Env, pure: &PureCase, target: &LambdaType) -> TypeResult<term::PureCase> {
    let arg = env.local.mint(&pure.arg.text);
    env.local.bind_value(arg.clone(), (*target.result).clone());
    let body = type_expr(env, &pure.body, None)?;
    Ok(term::PureCase { arg, body })
}

fn type_case(
    env: &mut Env,
    case: &HandleCase,
    idx: usize,
    constr: &crate::env::EffectConstrDef,
    target: &LambdaType,
    result: &Type,
) -> TypeResult<term::HandleCase> {
    if case.args.len() != constr.args.len() {
        return Err(TypeErrorKind::ArityMismatch {
            expected: constr.args.len(),
            found: case.args.len(),
        }
        .at(case.span));
    }
    let mut args = Vec::with_capacity(case.args.len());
    for (name, ty) in case.args.iter().zip(&constr.args) {
        let sym = env.local.mint(&name.text);
        env.local.bind_value(sym.clone(), ty.clone());
        args.push(sym);
    }
    let resumed = if constr.ret.is_void() {
        vec![]
    } else {
        vec![constr.ret.clone()]
    };
    let k_ty = Type::lambda(resumed, target.effects.clone(), (*target.result).clone());
    let k = env.local.mint(&case.k.text);
    env.local.bind_value(k.clone(), k_ty);

    let body = type_expr(env, &case.body, Some(result))?;
    let body = coerce(env, body, result)?;
    Ok(term::HandleCase {
        constr: idx,
        args,
        k,
        body,
    })
}
