//! Check, lower and run JSON-encoded modules.

use crate::config::Limits;
use anyhow::{bail, Context, Result};
use kestrel_ast::ast::Module;
use kestrel_lower::{lower_define, lower_expr, Cps};
use kestrel_runtime::Machine;
use kestrel_types::{type_module, GlobalEnv, TypeError, TypedToplevel};
use std::path::Path;
use tracing::{debug, info};

pub fn read_module(path: &Path, limits: &Limits) -> Result<Module> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read module '{}'", path.display()))?;
    if src.len() > limits.max_source_size {
        bail!(
            "module exceeds the {} byte limit ({} bytes)",
            limits.max_source_size,
            src.len()
        );
    }
    serde_json::from_str(&src)
        .with_context(|| format!("'{}' is not a JSON-encoded module", path.display()))
}

/// A missing snapshot file means a fresh environment.
pub fn load_snapshot(path: &Path) -> Result<GlobalEnv> {
    if !path.exists() {
        return Ok(GlobalEnv::new());
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot '{}'", path.display()))?;
    let snapshot = serde_json::from_str(&text)
        .with_context(|| format!("invalid snapshot '{}'", path.display()))?;
    Ok(GlobalEnv::from_snapshot(snapshot))
}

pub fn save_snapshot(path: &Path, global: &GlobalEnv) -> Result<()> {
    let json = serde_json::to_string(&global.snapshot())?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write snapshot '{}'", path.display()))
}

/// Accepted toplevels and the errors of rejected ones.
#[derive(Debug, Default)]
pub struct Report {
    pub items: Vec<TypedToplevel>,
    pub errors: Vec<TypeError>,
}

pub fn check(global: &mut GlobalEnv, module: &Module) -> Result<Report> {
    let mut report = Report::default();
    for result in type_module(global, module)? {
        match result {
            Ok(item) => report.items.push(item),
            Err(err) => report.errors.push(err),
        }
    }
    info!(
        accepted = report.items.len(),
        rejected = report.errors.len(),
        "module checked"
    );
    Ok(report)
}

/// One line per accepted toplevel: what it is and its type.
pub fn describe(global: &GlobalEnv, items: &[TypedToplevel]) -> Vec<String> {
    items
        .iter()
        .map(|item| match item {
            TypedToplevel::Effect(id) => format!("effect {}", global.effect(*id).name),
            TypedToplevel::Record(id) => format!("record {}", global.record(*id).name),
            TypedToplevel::Define { name, term, .. } => {
                format!("{name} : {}", global.show_type(&term.is))
            }
            TypedToplevel::Expr(term) => format!("_ : {}", global.show_type(&term.is)),
        })
        .collect()
}

/// Lowered definitions and expressions, labelled for display.
pub fn lower(items: &[TypedToplevel]) -> Result<Vec<(String, Cps)>> {
    let mut out = vec![];
    for item in items {
        match item {
            TypedToplevel::Define { id, name, term } => {
                out.push((name.clone(), lower_define(term, *id)?));
            }
            TypedToplevel::Expr(term) => out.push(("_".to_string(), lower_expr(term)?)),
            TypedToplevel::Effect(_) | TypedToplevel::Record(_) => {}
        }
    }
    Ok(out)
}

/// Run every toplevel expression in order and render its value. Every
/// definition in `global` is available, snapshot ones included.
pub fn run(global: &GlobalEnv, items: &[TypedToplevel], max_call_depth: usize) -> Result<Vec<String>> {
    let mut machine = Machine::new(max_call_depth);
    for (id, def) in global.terms() {
        machine.define(id, lower_define(&def.term, id)?);
    }
    debug!(definitions = global.terms().count(), "definitions loaded");
    let mut out = vec![];
    for item in items {
        if let TypedToplevel::Expr(term) = item {
            let value = machine.eval(&lower_expr(term)?)?;
            out.push(value.to_string());
        }
    }
    Ok(out)
}
