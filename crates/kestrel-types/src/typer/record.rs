use super::{coerce, type_expr};
use crate::env::Env;
use crate::error::{TypeErrorKind, TypeResult};
use crate::term::{RecordGroup, RecordTerm, Term, TermKind};
use crate::ty::Type;
use kestrel_ast::ast::{Ident, RecordRow};
use kestrel_ast::span::Span;

/// Type a record construction.
///
/// A record carries its own rows plus those of every included record. Each
/// group is filled either row by row or from a spread of a value whose type is
/// one of the groups; a spread also fills the groups its type includes.
/// Explicit rows win over spread ones.
pub fn type_record(env: &mut Env, name: &Ident, rows: &[RecordRow], span: Span) -> TypeResult<Term> {
    let Some(ty) = env.global.record_by_name(&name.text) else {
        return Err(TypeErrorKind::UnknownType(name.text.clone()).at(name.span));
    };
    let mut order = vec![ty];
    order.extend(env.global.all_subtypes(ty));

    let mut groups: Vec<RecordGroup> = order
        .iter()
        .map(|&gid| RecordGroup {
            ty: gid,
            spread: None,
            rows: env.global.record(gid).rows.iter().map(|_| None).collect(),
        })
        .collect();
    let mut spreads = vec![];

    for row in rows {
        match row {
            RecordRow::Spread(expr) => {
                let value = type_expr(env, expr, None)?;
                let source = value.is.record_id().filter(|id| order.contains(id));
                let Some(source) = source else {
                    return Err(TypeErrorKind::InvalidSpread {
                        record: name.text.clone(),
                        found: env.global.show_type(&value.is),
                    }
                    .at(value.span));
                };
                let idx = spreads.len();
                let mut covered = vec![source];
                covered.extend(env.global.all_subtypes(source));
                for group in groups.iter_mut().filter(|g| covered.contains(&g.ty)) {
                    if group.spread.is_some() {
                        return Err(TypeErrorKind::DuplicateAttribute {
                            record: env.global.record(group.ty).name.clone(),
                            name: format!("...{}", env.global.record(source).name),
                        }
                        .at(value.span));
                    }
                    group.spread = Some(idx);
                }
                spreads.push(value);
            }
            RecordRow::Field { name: field, value } => {
                let attrs = env.global.attribute(&field.text);
                let found = order.iter().enumerate().find_map(|(gi, gid)| {
                    attrs
                        .iter()
                        .find(|(owner, _)| owner == gid)
                        .map(|(_, ri)| (gi, *ri))
                });
                let Some((gi, ri)) = found else {
                    return Err(TypeErrorKind::UnknownAttribute {
                        record: name.text.clone(),
                        name: field.text.clone(),
                    }
                    .at(field.span));
                };
                if groups[gi].rows[ri].is_some() {
                    return Err(TypeErrorKind::DuplicateAttribute {
                        record: env.global.record(order[gi]).name.clone(),
                        name: field.text.clone(),
                    }
                    .at(field.span));
                }
                let row_ty = env.global.record(order[gi]).rows[ri].ty.clone();
                let value = type_expr(env, value, Some(&row_ty))?;
                let value = coerce(env, value, &row_ty)?;
                groups[gi].rows[ri] = Some(value);
            }
        }
    }

    for group in &groups {
        if group.spread.is_some() {
            continue;
        }
        if let Some(ri) = group.rows.iter().position(Option::is_none) {
            let def = env.global.record(group.ty);
            return Err(TypeErrorKind::MissingAttribute {
                record: def.name.clone(),
                name: def.rows[ri].name.clone(),
            }
            .at(span));
        }
    }

    Ok(Term::new(
        TermKind::Record(Box::new(RecordTerm { ty, spreads, groups })),
        Type::user(ty),
        span,
    ))
}
