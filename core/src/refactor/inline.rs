//! Inline a field, constant, or trivially-bodied method into its use sites.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::NtsError;
use crate::error::Result;
use crate::symbols::ReferenceScope;
use crate::symbols::SymbolKind;

use super::ChangeDetail;
use super::Plan;
use super::PlanCtx;
use super::PlannedFile;
use super::RefactorParams;
use super::TokenEdit;
use super::apply_token_edits;
use super::read_source;
use super::resolve_origin;
use super::resolve_target_name;

pub(crate) fn plan(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<Plan> {
    let origin = resolve_origin(ctx, params)?;
    let name = resolve_target_name(ctx, params, &origin)?;
    let symbol = ctx
        .symbols
        .locate_symbol(&ctx.roots, Some(&origin), &name, params.kind)?;
    let definition_path = PathBuf::from(&symbol.location.path);
    let definition_source = read_source(&definition_path)?;
    let definition_lines: Vec<&str> = definition_source.split('\n').collect();

    let replacement = match symbol.kind {
        SymbolKind::Field | SymbolKind::Variable => {
            initializer_of(&definition_lines, symbol.location.start_line, &name)
        }
        SymbolKind::Method | SymbolKind::Function => trivial_body(
            &definition_lines,
            symbol.location.start_line,
            symbol.location.end_line,
        ),
        other => {
            return Err(NtsError::InvalidArgument(format!(
                "cannot inline a {other:?}"
            )));
        }
    }
    .ok_or_else(|| {
        NtsError::InvalidArgument(format!(
            "'{name}' is not semantically trivial (needs an initializer or a single-return body)"
        ))
    })?;

    let references = ctx.symbols.find_references_by_name(
        &ctx.roots,
        &definition_path,
        &name,
        ReferenceScope::Project,
        false,
    )?;
    let is_callable = matches!(symbol.kind, SymbolKind::Method | SymbolKind::Function);

    let mut by_file: BTreeMap<String, Vec<TokenEdit>> = BTreeMap::new();
    for reference in &references {
        if reference.path == symbol.location.path
            && reference.line >= symbol.location.start_line
            && reference.line <= symbol.location.end_line
        {
            continue;
        }
        // For callables the call's argument list is replaced together with
        // the name; only zero-argument calls are trivial enough.
        let old = if is_callable {
            format!("{name}()")
        } else {
            name.clone()
        };
        by_file.entry(reference.path.clone()).or_default().push(TokenEdit {
            line: reference.line,
            column: reference.column,
            old,
            new: replacement.clone(),
            confidence: None,
        });
    }

    let mut files = Vec::new();
    for (path_str, edits) in by_file {
        let path = PathBuf::from(&path_str);
        let content = read_source(&path)?;
        let (mut updated, details, applied) = apply_token_edits(&content, &edits);
        if applied == 0 {
            continue;
        }
        if path == definition_path {
            updated = drop_definition(
                &updated,
                symbol.location.start_line,
                symbol.location.end_line,
            );
        }
        files.push(PlannedFile {
            path,
            original: content,
            updated,
            occurrences: applied,
            details,
        });
    }

    // The definition disappears even when its file had no other use sites.
    if !files.iter().any(|f| f.path == definition_path) {
        let updated = drop_definition(
            &definition_source,
            symbol.location.start_line,
            symbol.location.end_line,
        );
        let before = definition_lines
            .get(symbol.location.start_line.saturating_sub(1))
            .copied()
            .unwrap_or_default()
            .to_string();
        files.push(PlannedFile {
            path: definition_path,
            original: definition_source,
            updated,
            occurrences: 1,
            details: vec![ChangeDetail {
                line: symbol.location.start_line,
                before,
                after: format!("(definition of '{name}' inlined away)"),
                confidence: None,
            }],
        });
    }

    Ok(Plan {
        summary: format!(
            "inline '{}' = {} into {} reference(s)",
            name,
            replacement,
            references.len()
        ),
        files,
        suggestions: Vec::new(),
    })
}

/// `private static final int LIMIT = 42;` -> `42`.
fn initializer_of(lines: &[&str], line: usize, name: &str) -> Option<String> {
    let text = lines.get(line.saturating_sub(1))?;
    let after_name = text.split_once(name)?.1;
    let initializer = after_name.split_once('=')?.1;
    let trimmed = initializer.trim().trim_end_matches(';').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// A method whose body is exactly one `return <expr>;` yields that expr.
fn trivial_body(lines: &[&str], start: usize, end: usize) -> Option<String> {
    let body: Vec<&str> = lines
        .get(start.saturating_sub(1)..end.min(lines.len()))?
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && *l != "{" && *l != "}")
        .collect();
    // Expect the signature line plus a lone return statement.
    let returns: Vec<&&str> = body.iter().filter(|l| l.starts_with("return ")).collect();
    if returns.len() != 1 || body.len() > 2 {
        return None;
    }
    let expr = returns[0]
        .trim_start_matches("return ")
        .trim_end_matches(';')
        .trim();
    if expr.is_empty() {
        None
    } else {
        Some(expr.to_string())
    }
}

fn drop_definition(content: &str, start: usize, end: usize) -> String {
    let lines: Vec<&str> = content.split('\n').collect();
    let mut kept: Vec<&str> = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if index + 1 >= start && index + 1 <= end {
            continue;
        }
        kept.push(line);
    }
    kept.join("\n")
}
