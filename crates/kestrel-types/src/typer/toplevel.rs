//! Toplevel items and whole modules.

use super::{coerce, type_expr, type_type};
use crate::env::{EffectConstrDef, Env, GlobalEnv, RecordRowDef};
use crate::error::{CheckError, InternalError, TypeError, TypeErrorKind};
use crate::symbol::{EffectId, TermId, TypeId};
use crate::term::Term;
use crate::uniqueness::check_uniqueness;
use kestrel_ast::ast::{Define, EffectDecl, Expr, RecordDecl, RecordItem, Toplevel, TypeExpr};
use kestrel_ast::span::Span;
use tracing::{debug, warn};

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, PartialEq)]
pub enum TypedToplevel {
    Effect(EffectId),
    Record(TypeId),
    Define { id: TermId, name: String, term: Term },
    Expr(Term),
}

/// Type one toplevel item and register what it declares.
pub fn type_toplevel(global: &mut GlobalEnv, item: &Toplevel) -> Result<TypedToplevel, CheckError> {
    match item {
        Toplevel::Effect(decl) => {
            let constrs = effect_constrs(global, decl)?;
            Ok(TypedToplevel::Effect(global.register_effect(&decl.name.text, constrs)))
        }
        Toplevel::Record(decl) => {
            let (subtypes, rows) = record_rows(global, decl)?;
            Ok(TypedToplevel::Record(global.register_record(
                &decl.name.text,
                subtypes,
                rows,
            )))
        }
        Toplevel::Define(def) => {
            let term = type_define(global, def)?;
            let id = global.register_term(&def.name.text, term.clone());
            Ok(TypedToplevel::Define {
                id,
                name: def.name.text.clone(),
                term,
            })
        }
        Toplevel::Expr(expr) => {
            let mut env = Env::new(global);
            let term = type_expr(&mut env, expr, None)?;
            Ok(TypedToplevel::Expr(finish(&mut env, term, expr.span())?))
        }
    }
}

/// Type every item in order. A type error only drops its own item; an internal
/// error aborts the module.
pub fn type_module(
    global: &mut GlobalEnv,
    module: &kestrel_ast::ast::Module,
) -> Result<Vec<Result<TypedToplevel, TypeError>>, InternalError> {
    let mut out = Vec::with_capacity(module.items.len());
    for item in &module.items {
        match type_toplevel(global, item) {
            Ok(typed) => out.push(Ok(typed)),
            Err(CheckError::Type(err)) => {
                warn!(%err, "toplevel rejected");
                out.push(Err(err));
            }
            Err(CheckError::Internal(err)) => return Err(err),
        }
    }
    Ok(out)
}

fn effect_constrs(global: &GlobalEnv, decl: &EffectDecl) -> Result<Vec<EffectConstrDef>, TypeError> {
    let mut env = Env::new(global);
    let mut out: Vec<EffectConstrDef> = Vec::with_capacity(decl.constrs.len());
    for constr in &decl.constrs {
        if out.iter().any(|c| c.name == constr.name.text) {
            return Err(TypeErrorKind::DuplicateHandlerCase {
                effect: decl.name.text.clone(),
                constr: constr.name.text.clone(),
            }
            .at(constr.span));
        }
        let args = constr
            .args
            .iter()
            .map(|a| type_type(&mut env, a))
            .collect::<Result<Vec<_>, _>>()?;
        let ret = type_type(&mut env, &constr.ret)?;
        out.push(EffectConstrDef {
            name: constr.name.text.clone(),
            args,
            ret,
        });
    }
    Ok(out)
}

fn record_rows(
    global: &GlobalEnv,
    decl: &RecordDecl,
) -> Result<(Vec<TypeId>, Vec<RecordRowDef>), TypeError> {
    let mut env = Env::new(global);
    let mut subtypes = vec![];
    let mut rows: Vec<RecordRowDef> = vec![];
    for item in &decl.items {
        match item {
            RecordItem::Spread(name) => match global.record_by_name(&name.text) {
                Some(id) if !subtypes.contains(&id) => subtypes.push(id),
                Some(_) => {}
                None => return Err(TypeErrorKind::UnknownType(name.text.clone()).at(name.span)),
            },
            RecordItem::Row { name, ty } => {
                if rows.iter().any(|r| r.name == name.text) {
                    return Err(TypeErrorKind::DuplicateAttribute {
                        record: decl.name.text.clone(),
                        name: name.text.clone(),
                    }
                    .at(name.span));
                }
                let ty = type_type(&mut env, ty)?;
                rows.push(RecordRowDef {
                    name: name.text.clone(),
                    ty,
                });
            }
        }
    }
    Ok((subtypes, rows))
}

/// The type a definition is known by while its own body is typed: the
/// annotation, else a fully annotated lambda header, else an inference
/// variable.
fn type_define(global: &GlobalEnv, def: &Define) -> Result<Term, CheckError> {
    let mut env = Env::new(global);
    let header = match (&def.ann, &def.value) {
        (Some(ann), _) => Some(ann.clone()),
        (None, Expr::Lambda(lambda)) => match (&lambda.ret, &lambda.effects) {
            (Some(ret), Some(effects)) => Some(TypeExpr::Lambda {
                type_vars: lambda.type_vars.clone(),
                effect_vars: lambda.effect_vars.clone(),
                args: lambda.args.iter().map(|p| p.ty.clone()).collect(),
                effects: effects.clone(),
                ret: Box::new(ret.clone()),
                span: lambda.span,
            }),
            _ => None,
        },
        (None, _) => None,
    };
    let self_ty = match header {
        Some(header) => type_type(&mut env, &header)?,
        None => env.local.fresh_var(&def.name.text),
    };
    env.local.set_self(&def.name.text, self_ty.clone());

    let term = type_expr(&mut env, &def.value, Some(&self_ty))?;
    let term = coerce(&mut env, term, &self_ty)?;
    let term = finish(&mut env, term, def.span)?;
    debug!(name = %def.name.text, ty = %global.show_type(&term.is), "typed definition");
    Ok(term)
}

/// Solve inference, substitute, and check what a finished toplevel must
/// satisfy: fully resolved, no pending effects, unique binders.
fn finish(env: &mut Env, mut term: Term, span: Span) -> Result<Term, CheckError> {
    let solution = env
        .local
        .unifier
        .solve(env.global)
        .map_err(|kind| kind.at(span))?;
    term.substitute(&solution);

    let unifier = &env.local.unifier;
    let mut unresolved = None;
    term.visit(&mut |t| {
        if unresolved.is_none() {
            if let Some(var) = t.is.vars().into_iter().find(|v| unifier.is_open(v)) {
                unresolved = Some((var, t.span));
            }
        }
    });
    if let Some((var, at)) = unresolved {
        let name = var.name.trim_start_matches('?').to_string();
        return Err(TypeErrorKind::UnresolvedTypeVariable(name).at(at).into());
    }

    let performed = term.effects();
    if !performed.is_empty() {
        return Err(TypeErrorKind::UnhandledEffect {
            effects: env.global.show_effects(&performed),
        }
        .at(span)
        .into());
    }

    check_uniqueness(&term)?;
    Ok(term)
}
