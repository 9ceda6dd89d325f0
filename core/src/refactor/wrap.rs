//! Enclose a line range in language-appropriate control-flow syntax,
//! re-indenting the body by one level relative to the range's base indent.

use crate::error::NtsError;
use crate::error::Result;
use crate::symbols::LanguageId;

use super::ChangeDetail;
use super::Plan;
use super::PlanCtx;
use super::PlannedFile;
use super::RefactorParams;
use super::WrapKind;
use super::leading_indent;
use super::read_source;
use super::require;
use super::resolve_origin;

const INDENT_STEP: &str = "    ";

pub(crate) fn plan(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<Plan> {
    let origin = resolve_origin(ctx, params)?;
    let start = require(&params.start_line, "startLine")?;
    let end = require(&params.end_line, "endLine")?;
    let wrapper = require(&params.wrapper, "wrapper")?;
    if start == 0 || end < start {
        return Err(NtsError::InvalidArgument(format!(
            "invalid range {start}-{end}"
        )));
    }

    let language = LanguageId::from_path(&origin)
        .ok_or_else(|| NtsError::UnsupportedLanguage(origin.to_string_lossy().into_owned()))?;
    let content = read_source(&origin)?;
    let lines: Vec<&str> = content.split('\n').collect();
    if end > lines.len() {
        return Err(NtsError::InvalidArgument(format!(
            "endLine {end} is past the end of the file ({} lines)",
            lines.len()
        )));
    }

    let range = &lines[start - 1..end];
    let base_indent = range
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| leading_indent(l))
        .min_by_key(|i| i.len())
        .unwrap_or_default();

    let (header, footer) = templates(language, wrapper, params.code_pattern.as_deref(), &base_indent);

    let mut new_lines: Vec<String> = Vec::new();
    new_lines.extend(lines[..start - 1].iter().map(|s| s.to_string()));
    new_lines.extend(header.clone());
    for line in range {
        if line.trim().is_empty() {
            new_lines.push(String::new());
        } else {
            new_lines.push(format!("{INDENT_STEP}{line}"));
        }
    }
    new_lines.extend(footer.clone());
    new_lines.extend(lines[end..].iter().map(|s| s.to_string()));
    let updated = new_lines.join("\n");

    Ok(Plan {
        summary: format!(
            "wrap lines {start}-{end} of {} in {:?}",
            origin.display(),
            wrapper
        ),
        files: vec![PlannedFile {
            path: origin,
            original: content.clone(),
            updated,
            occurrences: 1,
            details: vec![ChangeDetail {
                line: start,
                before: range.first().copied().unwrap_or_default().to_string(),
                after: header.first().cloned().unwrap_or_default(),
                confidence: None,
            }],
        }],
        suggestions: Vec::new(),
    })
}

/// Header and footer lines for the wrapper, already carrying `indent`.
fn templates(
    language: LanguageId,
    wrapper: WrapKind,
    pattern: Option<&str>,
    indent: &str,
) -> (Vec<String>, Vec<String>) {
    let line = |text: &str| format!("{indent}{text}");
    if language == LanguageId::Python {
        return match wrapper {
            WrapKind::TryCatch => (
                vec![line("try:")],
                vec![line("except Exception as exc:"), line(&format!("{INDENT_STEP}raise"))],
            ),
            WrapKind::TryFinally => (
                vec![line("try:")],
                vec![line("finally:"), line(&format!("{INDENT_STEP}pass"))],
            ),
            WrapKind::TryWithResources => (
                vec![line(&format!(
                    "with {}:",
                    pattern.unwrap_or("open(resource) as resource")
                ))],
                vec![],
            ),
            WrapKind::If | WrapKind::IfElse => {
                let mut footer = Vec::new();
                if wrapper == WrapKind::IfElse {
                    footer.push(line("else:"));
                    footer.push(line(&format!("{INDENT_STEP}pass")));
                }
                (
                    vec![line(&format!("if {}:", pattern.unwrap_or("True")))],
                    footer,
                )
            }
            WrapKind::For | WrapKind::Foreach => (
                vec![line(&format!(
                    "for {}:",
                    pattern.unwrap_or("item in items")
                ))],
                vec![],
            ),
            WrapKind::While => (
                vec![line(&format!("while {}:", pattern.unwrap_or("True")))],
                vec![],
            ),
            WrapKind::Synchronized => (
                vec![line(&format!(
                    "with {}:",
                    pattern.unwrap_or("self._lock")
                ))],
                vec![],
            ),
            WrapKind::Custom => (
                vec![line(&format!("{}:", pattern.unwrap_or("if True")))],
                vec![],
            ),
        };
    }

    // Brace languages share the Java shapes.
    match wrapper {
        WrapKind::TryCatch => (
            vec![line("try {")],
            vec![
                line("} catch (Exception e) {"),
                line(&format!("{INDENT_STEP}throw new RuntimeException(e);")),
                line("}"),
            ],
        ),
        WrapKind::TryFinally => (
            vec![line("try {")],
            vec![line("} finally {"), line("}")],
        ),
        WrapKind::TryWithResources => (
            vec![line(&format!(
                "try ({}) {{",
                pattern.unwrap_or("AutoCloseable resource = null")
            ))],
            vec![line("}")],
        ),
        WrapKind::If => (
            vec![line(&format!("if ({}) {{", pattern.unwrap_or("true")))],
            vec![line("}")],
        ),
        WrapKind::IfElse => (
            vec![line(&format!("if ({}) {{", pattern.unwrap_or("true")))],
            vec![line("} else {"), line("}")],
        ),
        WrapKind::For => (
            vec![line(&format!(
                "for ({}) {{",
                pattern.unwrap_or("int i = 0; i < count; i++")
            ))],
            vec![line("}")],
        ),
        WrapKind::Foreach => (
            vec![line(&format!(
                "for ({}) {{",
                pattern.unwrap_or("Object item : items")
            ))],
            vec![line("}")],
        ),
        WrapKind::While => (
            vec![line(&format!("while ({}) {{", pattern.unwrap_or("true")))],
            vec![line("}")],
        ),
        WrapKind::Synchronized => (
            vec![line(&format!(
                "synchronized ({}) {{",
                pattern.unwrap_or("this")
            ))],
            vec![line("}")],
        ),
        WrapKind::Custom => (
            vec![line(&format!("{} {{", pattern.unwrap_or("")))],
            vec![line("}")],
        ),
    }
}
