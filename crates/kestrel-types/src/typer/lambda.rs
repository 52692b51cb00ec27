use super::types::{bind_effect_vars, bind_type_vars, resolve_effects};
use super::{coerce, type_expr, type_type};
use crate::env::Env;
use crate::error::{TypeErrorKind, TypeResult};
use crate::term::{Term, TermKind};
use crate::ty::{LambdaType, Type};
use kestrel_ast::ast::LambdaExpr;

/// Type a lambda literal. Without an effect annotation the lambda performs
/// whatever its body performs; with one, the body may not exceed it.
pub fn type_lambda(env: &mut Env, lambda: &LambdaExpr, hint: Option<&Type>) -> TypeResult<Term> {
    env.local.push_frame();
    let out = type_lambda_inner(env, lambda, hint);
    env.local.pop_frame();
    out
}

fn type_lambda_inner(env: &mut Env, lambda: &LambdaExpr, hint: Option<&Type>) -> TypeResult<Term> {
    let type_vars = bind_type_vars(env, &lambda.type_vars)?;
    let effect_vars = bind_effect_vars(env, &lambda.effect_vars);

    let mut arg_syms = Vec::with_capacity(lambda.args.len());
    let mut arg_tys = Vec::with_capacity(lambda.args.len());
    for param in &lambda.args {
        let ty = type_type(env, &param.ty)?;
        let sym = env.local.mint(&param.name.text);
        env.local.bind_value(sym.clone(), ty.clone());
        arg_syms.push(sym);
        arg_tys.push(ty);
    }

    let ret = lambda.ret.as_ref().map(|r| type_type(env, r)).transpose()?;
    let body_hint = ret
        .clone()
        .or_else(|| hint.and_then(Type::as_lambda).map(|l| (*l.result).clone()));
    let body = type_expr(env, &lambda.body, body_hint.as_ref())?;
    let body = match &ret {
        Some(ret) => coerce(env, body, ret)?,
        None => body,
    };

    let performed = body.effects();
    let effects = match &lambda.effects {
        Some(names) => {
            let declared = resolve_effects(env, names)?;
            if let Some(extra) = performed.iter().find(|e| !declared.contains(e)) {
                return Err(TypeErrorKind::UndeclaredEffect {
                    effect: env.global.show_effect(extra),
                }
                .at(body.span));
            }
            declared
        }
        None => performed,
    };

    let result = ret.unwrap_or_else(|| body.is.clone());
    let is = Type::Lambda(LambdaType {
        args: arg_tys,
        effects,
        effect_vars,
        type_vars,
        rest: None,
        result: Box::new(result),
    });
    Ok(Term::new(
        TermKind::Lambda {
            args: arg_syms,
            body: Box::new(body),
        },
        is,
        lambda.span,
    ))
}
