//! Change a method's name and parameter list, updating every known call
//! site. Parameter entries are declarative: the list given is the final
//! signature, in order. Calls are padded with `defaultValue` where a new
//! parameter has one; a new parameter without a default raises a conflict.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::NtsError;
use crate::error::Result;
use crate::symbols::ReferenceScope;
use crate::symbols::SymbolKind;
use crate::symbols::split_top_level;

use super::ChangeDetail;
use super::Plan;
use super::PlanCtx;
use super::PlannedFile;
use super::RefactorParams;
use super::read_source;
use super::require;
use super::resolve_origin;

pub(crate) fn plan(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<Plan> {
    let origin = resolve_origin(ctx, params)?;
    let name = params
        .symbol
        .clone()
        .or_else(|| params.method_name.clone())
        .ok_or_else(|| {
            NtsError::InvalidArgument("provide 'symbol' or 'methodName'".to_string())
        })?;
    let new_params = require(&params.parameters, "parameters")?;
    let new_name = params.new_name.clone().unwrap_or_else(|| name.clone());

    let symbol = ctx
        .symbols
        .locate_symbol(&ctx.roots, Some(&origin), &name, None)?;
    if !matches!(symbol.kind, SymbolKind::Method | SymbolKind::Function) {
        return Err(NtsError::InvalidArgument(format!(
            "'{name}' is a {:?}, not a method",
            symbol.kind
        )));
    }

    // Old parameter names by position, from the declaration.
    let old_names: Vec<String> = symbol
        .parameters
        .clone()
        .unwrap_or_default()
        .iter()
        .filter_map(|p| param_name(p))
        .collect();

    // Where each final parameter takes its call-site argument from: either
    // an old position (carried over by name) or a default value.
    let mut argument_plan: Vec<ArgumentSource> = Vec::new();
    for spec in &new_params {
        match old_names.iter().position(|old| *old == spec.name) {
            Some(index) => argument_plan.push(ArgumentSource::OldPosition(index)),
            None => match &spec.default_value {
                Some(default) => argument_plan.push(ArgumentSource::Default(default.clone())),
                None => {
                    return Err(NtsError::SignatureConflict(format!(
                        "new parameter '{}' has no defaultValue; call sites cannot supply it",
                        spec.name
                    )));
                }
            },
        }
    }

    let declaration_params = new_params
        .iter()
        .map(|p| format!("{} {}", p.param_type, p.name))
        .collect::<Vec<_>>()
        .join(", ");

    let references = ctx.symbols.find_references_by_name(
        &ctx.roots,
        &PathBuf::from(&symbol.location.path),
        &name,
        ReferenceScope::Project,
        true,
    )?;

    let mut by_file: BTreeMap<String, Vec<(usize, usize, bool)>> = BTreeMap::new();
    for reference in &references {
        // Declarations (the target itself, plus any implementations of an
        // interface method) keep the parameter list; call sites get
        // rebuilt arguments.
        let is_declaration = reference.is_definition
            || (reference.path == symbol.location.path
                && reference.line == symbol.location.start_line);
        by_file
            .entry(reference.path.clone())
            .or_default()
            .push((reference.line, reference.column, is_declaration));
    }

    let mut files = Vec::new();
    for (path_str, mut sites) in by_file {
        let path = PathBuf::from(&path_str);
        let content = read_source(&path)?;
        let mut lines: Vec<String> = content.split('\n').map(|s| s.to_string()).collect();
        sites.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1)));

        let mut details = Vec::new();
        let mut occurrences = 0usize;
        for (line_number, column, is_declaration) in sites {
            let Some(line) = lines.get_mut(line_number - 1) else {
                continue;
            };
            let before = line.clone();
            let Some((args_start, args_end)) = call_parens(line, column, &name) else {
                continue;
            };
            let replacement_args = if is_declaration {
                declaration_params.clone()
            } else {
                let old_args = split_top_level(&line[args_start + 1..args_end]);
                match rebuild_arguments(&argument_plan, &old_args, &name) {
                    Ok(args) => args,
                    Err(err) => return Err(err),
                }
            };
            let mut rebuilt = String::new();
            rebuilt.push_str(&line[..column]);
            rebuilt.push_str(&new_name);
            rebuilt.push('(');
            rebuilt.push_str(&replacement_args);
            rebuilt.push_str(&line[args_end..]);
            *line = rebuilt;
            occurrences += 1;
            details.push(ChangeDetail {
                line: line_number,
                before,
                after: line.clone(),
                confidence: None,
            });
        }

        if occurrences == 0 {
            continue;
        }
        details.sort_by_key(|d| d.line);
        files.push(PlannedFile {
            path,
            original: content,
            updated: lines.join("\n"),
            occurrences,
            details,
        });
    }

    Ok(Plan {
        summary: format!(
            "change signature of '{}' to {}({})",
            name, new_name, declaration_params
        ),
        files,
        suggestions: Vec::new(),
    })
}

enum ArgumentSource {
    OldPosition(usize),
    Default(String),
}

fn rebuild_arguments(
    plan: &[ArgumentSource],
    old_args: &[String],
    name: &str,
) -> Result<String> {
    let mut out = Vec::new();
    for source in plan {
        match source {
            ArgumentSource::OldPosition(index) => match old_args.get(*index) {
                Some(arg) => out.push(arg.clone()),
                None => {
                    return Err(NtsError::SignatureConflict(format!(
                        "a call to '{name}' does not supply argument {index}"
                    )));
                }
            },
            ArgumentSource::Default(value) => out.push(value.clone()),
        }
    }
    Ok(out.join(", "))
}

/// `private String run` -> `run`; `String task` -> `task`.
fn param_name(param: &str) -> Option<String> {
    param
        .split_whitespace()
        .last()
        .map(|word| {
            word.trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
                .to_string()
        })
        .filter(|word| !word.is_empty())
}

/// Locate the argument list that follows `name` at `column` on this line:
/// returns byte offsets of the opening and closing parens.
fn call_parens(line: &str, column: usize, name: &str) -> Option<(usize, usize)> {
    let after_name = column + name.len();
    let rest = line.get(after_name..)?;
    let relative_open = rest.find(|c: char| !c.is_whitespace())?;
    if rest.as_bytes().get(relative_open) != Some(&b'(') {
        return None;
    }
    let open = after_name + relative_open;
    let mut depth = 0i32;
    for (offset, ch) in line[open..].char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((open, open + offset));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn call_parens_finds_balanced_list() {
        let line = r#"        service.run("task1", f(x));"#;
        let column = line.find("run").unwrap();
        let (open, close) = call_parens(line, column, "run").unwrap();
        assert_eq!(&line[open..=close], r#"("task1", f(x))"#);
    }

    #[test]
    fn param_name_takes_last_word() {
        assert_eq!(param_name("String task").unwrap(), "task");
        assert_eq!(param_name("int priority").unwrap(), "priority");
    }
}
