//! Delete a definition, handling surviving references per policy.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::NtsError;
use crate::error::Result;
use crate::symbols::ReferenceScope;

use super::ChangeDetail;
use super::Plan;
use super::PlanCtx;
use super::PlannedFile;
use super::RefactorParams;
use super::ReferencePolicy;
use super::read_source;
use super::resolve_origin;
use super::resolve_target_name;

pub(crate) fn plan(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<Plan> {
    let origin = resolve_origin(ctx, params)?;
    let name = resolve_target_name(ctx, params, &origin)?;
    let policy = params.handle_references.unwrap_or(ReferencePolicy::Error);

    let symbol = ctx
        .symbols
        .locate_symbol(&ctx.roots, Some(&origin), &name, params.kind)?;
    let definition_path = PathBuf::from(&symbol.location.path);

    let references = ctx.symbols.find_references_by_name(
        &ctx.roots,
        &definition_path,
        &name,
        ReferenceScope::Project,
        false,
    )?;
    // Uses inside the definition's own span die with it.
    let external_refs: Vec<_> = references
        .iter()
        .filter(|r| {
            !(r.path == symbol.location.path
                && r.line >= symbol.location.start_line
                && r.line <= symbol.location.end_line)
        })
        .collect();

    if policy == ReferencePolicy::Error && !external_refs.is_empty() {
        return Err(NtsError::InvalidArgument(format!(
            "'{name}' still has {} reference(s); pass handleReferences=comment|remove",
            external_refs.len()
        )));
    }

    // Per file: the set of lines to comment out or delete.
    let mut reference_lines: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for reference in &external_refs {
        reference_lines
            .entry(reference.path.clone())
            .or_default()
            .push(reference.line);
    }

    let mut files = Vec::new();

    // The definition file loses the symbol's span entirely.
    {
        let content = read_source(&definition_path)?;
        let lines: Vec<&str> = content.split('\n').collect();
        let start = symbol.location.start_line.saturating_sub(1);
        let end = symbol.location.end_line.min(lines.len());

        let mut kept: Vec<String> = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let in_definition = index >= start && index < end;
            let reference_here = reference_lines
                .get(&symbol.location.path)
                .is_some_and(|ls| ls.contains(&(index + 1)));
            if in_definition {
                continue;
            }
            if reference_here && !in_definition {
                match policy {
                    ReferencePolicy::Remove => continue,
                    ReferencePolicy::Comment => {
                        kept.push(comment_out(&definition_path, line));
                        continue;
                    }
                    ReferencePolicy::Error => {}
                }
            }
            kept.push(line.to_string());
        }
        let updated = kept.join("\n");
        files.push(PlannedFile {
            path: definition_path.clone(),
            original: content.clone(),
            updated,
            occurrences: 1,
            details: vec![ChangeDetail {
                line: symbol.location.start_line,
                before: lines.get(start).copied().unwrap_or_default().to_string(),
                after: format!("(definition of '{name}' removed)"),
                confidence: None,
            }],
        });
    }

    // Other files only have their reference lines treated.
    for (path_str, line_numbers) in &reference_lines {
        if *path_str == symbol.location.path {
            continue;
        }
        let path = PathBuf::from(path_str);
        let content = read_source(&path)?;
        let lines: Vec<&str> = content.split('\n').collect();
        let mut kept: Vec<String> = Vec::new();
        let mut details = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            if line_numbers.contains(&(index + 1)) {
                details.push(ChangeDetail {
                    line: index + 1,
                    before: line.to_string(),
                    after: match policy {
                        ReferencePolicy::Remove => "(removed)".to_string(),
                        _ => comment_out(&path, line),
                    },
                    confidence: None,
                });
                match policy {
                    ReferencePolicy::Remove => continue,
                    ReferencePolicy::Comment => {
                        kept.push(comment_out(&path, line));
                        continue;
                    }
                    ReferencePolicy::Error => {}
                }
            }
            kept.push(line.to_string());
        }
        files.push(PlannedFile {
            path,
            original: content,
            updated: kept.join("\n"),
            occurrences: line_numbers.len(),
            details,
        });
    }

    Ok(Plan {
        summary: format!(
            "delete '{name}' ({} external reference(s), policy {:?})",
            external_refs.len(),
            policy
        ),
        files,
        suggestions: Vec::new(),
    })
}

fn comment_out(path: &std::path::Path, line: &str) -> String {
    let prefix = crate::symbols::LanguageId::from_path(path)
        .map(|l| l.line_comment())
        .unwrap_or("// ");
    let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
    format!("{indent}{prefix}{}", line.trim_start())
}
