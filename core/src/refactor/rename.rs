//! Rename a symbol across the requested scope.
//!
//! AST-confirmed occurrences are always applied. In hybrid mode the plan
//! additionally reports text-only matches (comments, strings, unparseable
//! files) tagged TEXT_ONLY; those are applied only when the caller opts in
//! with `includeTextMatches`.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::path::PathBuf;

use crate::error::NtsError;
use crate::error::Result;
use crate::symbols::ReferenceScope;
use crate::symbols::word_pattern;

use super::Confidence;
use super::Plan;
use super::PlanCtx;
use super::PlannedFile;
use super::RefactorParams;
use super::TokenEdit;
use super::apply_token_edits;
use super::read_source;
use super::require;
use super::resolve_origin;
use super::resolve_target_name;

pub(crate) fn plan(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<Plan> {
    let origin = resolve_origin(ctx, params)?;
    let name = resolve_target_name(ctx, params, &origin)?;
    let new_name = require(&params.new_name, "newName")?;
    word_pattern(&new_name)?;
    if new_name == name {
        return Err(NtsError::InvalidArgument(
            "newName equals the current name".to_string(),
        ));
    }

    let scope = params.scope.unwrap_or(ReferenceScope::Project);
    let hybrid = params.hybrid_mode.unwrap_or(false);
    let include_text = params.include_text_matches.unwrap_or(false);

    // Verify the symbol exists somewhere we can see; the kind filter guards
    // against renaming an unrelated homonym.
    let symbol = ctx
        .symbols
        .locate_symbol(&ctx.roots, Some(&origin), &name, params.kind)?;

    let references = ctx
        .symbols
        .find_references_by_name(&ctx.roots, &origin, &name, scope, true)?;

    // Group by file; remember which occurrences are AST-confirmed.
    let mut by_file: BTreeMap<String, Vec<(usize, usize)>> = BTreeMap::new();
    for reference in &references {
        by_file
            .entry(reference.path.clone())
            .or_default()
            .push((reference.line, reference.column));
    }

    let mut files = Vec::new();
    for (path_str, occurrences) in by_file {
        let path = PathBuf::from(&path_str);
        let content = read_source(&path)?;
        let semantic: HashSet<(usize, usize)> = ctx
            .symbols
            .ast_occurrences(&path, &name)
            .map(|refs| refs.into_iter().map(|r| (r.line, r.column)).collect())
            .unwrap_or_default();

        let mut edits = Vec::new();
        let mut reported_only = 0usize;
        for (line, column) in occurrences {
            let is_semantic = semantic.contains(&(line, column));
            let confidence = if hybrid {
                Some(if is_semantic {
                    Confidence::Semantic
                } else {
                    Confidence::TextOnly
                })
            } else {
                None
            };
            let apply = is_semantic || (hybrid && include_text);
            if !apply && !hybrid {
                // Plain mode quietly drops unconfirmed text hits.
                continue;
            }
            if !apply {
                reported_only += 1;
            }
            edits.push(TokenEdit {
                line,
                column,
                old: if apply { name.clone() } else { String::new() },
                new: if apply {
                    new_name.clone()
                } else {
                    String::new()
                },
                confidence,
            });
        }

        // Text-only reports keep their detail rows without editing the line.
        let applied_edits: Vec<TokenEdit> =
            edits.iter().filter(|e| !e.old.is_empty()).cloned().collect();
        let (updated, mut details, applied) = apply_token_edits(&content, &applied_edits);
        for edit in edits.iter().filter(|e| e.old.is_empty()) {
            details.push(super::ChangeDetail {
                line: edit.line,
                before: content
                    .split('\n')
                    .nth(edit.line.saturating_sub(1))
                    .unwrap_or_default()
                    .to_string(),
                after: format!("(text-only match for '{name}', not applied)"),
                confidence: edit.confidence,
            });
        }
        details.sort_by_key(|d| d.line);

        if applied == 0 && reported_only == 0 {
            continue;
        }
        files.push(PlannedFile {
            path,
            original: content,
            updated,
            occurrences: applied,
            details,
        });
    }

    let affected = files.len();
    Ok(Plan {
        summary: format!(
            "rename {} '{}' to '{}' across {} file(s)",
            format!("{:?}", symbol.kind).to_lowercase(),
            name,
            new_name,
            affected
        ),
        files,
        suggestions: Vec::new(),
    })
}
