//! Relocate a declaration between files (and optionally into a class).

use std::path::PathBuf;

use crate::error::NtsError;
use crate::error::Result;

use super::ChangeDetail;
use super::Plan;
use super::PlanCtx;
use super::PlannedFile;
use super::RefactorParams;
use super::read_source;
use super::require;
use super::resolve_origin;
use super::resolve_target_name;

pub(crate) fn plan(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<Plan> {
    let origin = resolve_origin(ctx, params)?;
    let name = resolve_target_name(ctx, params, &origin)?;
    let target_raw = require(&params.target_path, "targetPath")?;
    let target_path = {
        let p = PathBuf::from(&target_raw);
        if p.is_absolute() {
            p
        } else {
            ctx.roots
                .first()
                .map(|root| root.join(&p))
                .unwrap_or(p)
        }
    };
    if target_path == origin {
        return Err(NtsError::InvalidArgument(
            "targetPath equals the source file".to_string(),
        ));
    }

    let symbols = ctx.symbols.list_symbols(&origin)?;
    let symbol = symbols
        .iter()
        .filter(|s| s.name == name)
        .min_by_key(|s| s.location.end_line - s.location.start_line)
        .ok_or_else(|| NtsError::SymbolNotFound {
            name: name.clone(),
            suggestions: symbols.iter().map(|s| s.name.clone()).take(5).collect(),
        })?;

    let source_content = read_source(&origin)?;
    let source_lines: Vec<&str> = source_content.split('\n').collect();
    let start = symbol.location.start_line.saturating_sub(1);
    let end = symbol.location.end_line.min(source_lines.len());
    let block: Vec<String> = source_lines[start..end].iter().map(|s| s.to_string()).collect();

    // Source loses the block (plus one blank separator if present).
    let mut remaining: Vec<String> = Vec::new();
    remaining.extend(source_lines[..start].iter().map(|s| s.to_string()));
    let mut tail = end;
    if source_lines.get(tail).is_some_and(|l| l.trim().is_empty()) {
        tail += 1;
    }
    remaining.extend(source_lines[tail..].iter().map(|s| s.to_string()));
    let source_updated = remaining.join("\n");

    // Target gains the block, inside `targetClass` when given.
    let target_original = if target_path.exists() {
        read_source(&target_path)?
    } else {
        String::new()
    };
    let target_updated = match &params.target_class {
        Some(class_name) if target_path.exists() => {
            let target_symbols = ctx.symbols.list_symbols(&target_path)?;
            let class = target_symbols
                .iter()
                .find(|s| s.name == *class_name && s.kind.is_container())
                .ok_or_else(|| NtsError::SymbolNotFound {
                    name: class_name.clone(),
                    suggestions: target_symbols
                        .iter()
                        .filter(|s| s.kind.is_container())
                        .map(|s| s.name.clone())
                        .collect(),
                })?;
            let mut lines: Vec<String> = target_original
                .split('\n')
                .map(|s| s.to_string())
                .collect();
            let insert_at = class.location.end_line.saturating_sub(1).min(lines.len());
            lines.insert(insert_at, format!("\n{}", block.join("\n")));
            lines.join("\n")
        }
        _ => {
            let mut text = target_original.clone();
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&block.join("\n"));
            text.push('\n');
            text
        }
    };

    Ok(Plan {
        summary: format!(
            "move '{}' from {} to {}",
            name,
            origin.display(),
            target_path.display()
        ),
        files: vec![
            PlannedFile {
                path: origin,
                original: source_content,
                updated: source_updated,
                occurrences: 1,
                details: vec![ChangeDetail {
                    line: symbol.location.start_line,
                    before: block.first().cloned().unwrap_or_default(),
                    after: format!("(moved to {})", target_path.display()),
                    confidence: None,
                }],
            },
            PlannedFile {
                path: target_path,
                original: target_original,
                updated: target_updated,
                occurrences: 1,
                details: vec![ChangeDetail {
                    line: 1,
                    before: String::new(),
                    after: block.first().cloned().unwrap_or_default(),
                    confidence: None,
                }],
            },
        ],
        suggestions: Vec::new(),
    })
}
