//! Type expressions, type/effect variable binders and effect names.

use crate::env::Env;
use crate::error::{TypeErrorKind, TypeResult};
use crate::symbol::Symbol;
use crate::ty::{EffectRef, LambdaType, Type, TypeVarDecl, BUILTIN_TYPES};
use kestrel_ast::ast::{Ident, TypeExpr, TypeVar};

/// Resolve a surface type in the current scope.
pub fn type_type(env: &mut Env, ty: &TypeExpr) -> TypeResult<Type> {
    match ty {
        TypeExpr::Named(ident) => {
            if let Some(sym) = env.local.lookup_type_var(&ident.text) {
                return Ok(Type::Var(sym.clone()));
            }
            if BUILTIN_TYPES.contains(&ident.text.as_str()) {
                return Ok(Type::builtin(&ident.text));
            }
            match env.global.record_by_name(&ident.text) {
                Some(id) => Ok(Type::user(id)),
                None => Err(TypeErrorKind::UnknownType(ident.text.clone()).at(ident.span)),
            }
        }
        TypeExpr::Lambda {
            type_vars,
            effect_vars,
            args,
            effects,
            ret,
            ..
        } => {
            env.local.push_frame();
            let out = lambda_type(env, type_vars, effect_vars, args, effects, ret);
            env.local.pop_frame();
            out
        }
    }
}

fn lambda_type(
    env: &mut Env,
    type_vars: &[TypeVar],
    effect_vars: &[Ident],
    args: &[TypeExpr],
    effects: &[Ident],
    ret: &TypeExpr,
) -> TypeResult<Type> {
    let type_vars = bind_type_vars(env, type_vars)?;
    let effect_vars = bind_effect_vars(env, effect_vars);
    let args = args
        .iter()
        .map(|a| type_type(env, a))
        .collect::<TypeResult<Vec<_>>>()?;
    let effects = resolve_effects(env, effects)?;
    let result = type_type(env, ret)?;
    Ok(Type::Lambda(LambdaType {
        args,
        effects,
        effect_vars,
        type_vars,
        rest: None,
        result: Box::new(result),
    }))
}

/// Mint and bind type variables in the innermost frame.
pub(crate) fn bind_type_vars(env: &mut Env, vars: &[TypeVar]) -> TypeResult<Vec<TypeVarDecl>> {
    let mut out = Vec::with_capacity(vars.len());
    for var in vars {
        let mut subtypes = Vec::with_capacity(var.subtypes.len());
        for bound in &var.subtypes {
            match env.global.record_by_name(&bound.text) {
                Some(id) => subtypes.push(id),
                None => return Err(TypeErrorKind::UnknownType(bound.text.clone()).at(bound.span)),
            }
        }
        let sym = env.local.mint(&var.name.text);
        env.local.bind_type_var(sym.clone());
        out.push(TypeVarDecl { sym, subtypes });
    }
    Ok(out)
}

pub(crate) fn bind_effect_vars(env: &mut Env, vars: &[Ident]) -> Vec<Symbol> {
    vars.iter()
        .map(|v| {
            let sym = env.local.mint(&v.text);
            env.local.bind_effect_var(sym.clone());
            sym
        })
        .collect()
}

/// An effect variable in scope, else a declared effect.
pub fn resolve_effect(env: &Env, name: &Ident) -> TypeResult<EffectRef> {
    if let Some(sym) = env.local.lookup_effect_var(&name.text) {
        return Ok(EffectRef::Var(sym.clone()));
    }
    env.global
        .effect_by_name(&name.text)
        .map(EffectRef::Ref)
        .ok_or_else(|| TypeErrorKind::UnknownEffect(name.text.clone()).at(name.span))
}

pub(crate) fn resolve_effects(env: &Env, names: &[Ident]) -> TypeResult<Vec<EffectRef>> {
    let refs = names
        .iter()
        .map(|n| resolve_effect(env, n))
        .collect::<TypeResult<Vec<_>>>()?;
    Ok(crate::effects::dedup(&refs))
}
