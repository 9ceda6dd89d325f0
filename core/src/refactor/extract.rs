//! Extract a line range into a new method.
//!
//! The range is data-flow analysed: identifiers declared inside stay local,
//! identifiers flowing in become parameters, and a value declared inside
//! but used after the range is returned. The new method lands at the end of
//! the enclosing class; the range is replaced with a call.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use tree_sitter::Node;

use crate::error::NtsError;
use crate::error::Result;
use crate::symbols::LanguageId;
use crate::symbols::Symbol;
use crate::symbols::SymbolKind;

use super::ChangeDetail;
use super::Plan;
use super::PlanCtx;
use super::PlannedFile;
use super::RefactorParams;
use super::leading_indent;
use super::require;
use super::resolve_origin;

const INDENT_STEP: &str = "    ";

pub(crate) fn plan(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<Plan> {
    let origin = resolve_origin(ctx, params)?;
    let method_name = require(&params.method_name, "methodName")?;
    let parsed = ctx.symbols.parse(&origin)?;
    let language = parsed.language;
    let content = parsed.content.clone();
    let lines: Vec<&str> = content.split('\n').collect();

    let (start, end) = resolve_range(params, &lines)?;
    if end > lines.len() || start == 0 || end < start {
        return Err(NtsError::InvalidArgument(format!(
            "invalid range {start}-{end} for a {}-line file",
            lines.len()
        )));
    }

    let symbols = ctx.symbols.list_symbols(&origin)?;
    let enclosing_method = innermost(
        symbols
            .iter()
            .filter(|s| matches!(s.kind, SymbolKind::Method | SymbolKind::Function))
            .filter(|s| s.location.start_line <= start && s.location.end_line >= end),
    );
    let enclosing_class = innermost(
        symbols
            .iter()
            .filter(|s| s.kind.is_container())
            .filter(|s| s.location.start_line <= start && s.location.end_line >= end),
    );
    let Some(method) = enclosing_method else {
        return Err(NtsError::InvalidArgument(format!(
            "lines {start}-{end} are not inside a single method"
        )));
    };

    let flow = analyse_flow(&parsed.tree.root_node(), language, &content, start, end, method);

    // Static context decides whether the generated member may see `this`.
    let point = tree_sitter::Point {
        row: start - 1,
        column: lines[start - 1].len().saturating_sub(1),
    };
    let root = parsed.tree.root_node();
    let is_static = root
        .descendant_for_point_range(point, point)
        .map(|node| language.is_static_context(node, &content))
        .unwrap_or(true);

    let range_lines: Vec<&str> = lines[start - 1..end].to_vec();
    let base_indent = range_lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| leading_indent(l))
        .min_by_key(|i| i.len())
        .unwrap_or_default();

    let access = params.access_modifier.clone().unwrap_or_else(|| "private".to_string());
    let return_override = params.return_type.clone();

    let (method_text, call_line) = match language {
        LanguageId::Python => python_member(
            &method_name,
            &flow,
            &range_lines,
            &base_indent,
            is_static,
            enclosing_class.is_some(),
        ),
        _ => brace_member(
            &method_name,
            &flow,
            &range_lines,
            &base_indent,
            is_static,
            &access,
            return_override.as_deref(),
        ),
    };

    // Replace the range with the call, then append the member at the end of
    // the enclosing class (or after the enclosing function for Python).
    let mut new_lines: Vec<String> = Vec::new();
    new_lines.extend(lines[..start - 1].iter().map(|s| s.to_string()));
    new_lines.push(call_line.clone());
    new_lines.extend(lines[end..].iter().map(|s| s.to_string()));

    // Line indices below are 0-based positions in `new_lines`, where the
    // replaced range has already collapsed to one call line.
    let removed = end - start + 1;
    let insert_at = match (&enclosing_class, language) {
        (Some(class), lang) if lang != LanguageId::Python => {
            // Just before the class's (shifted) closing brace.
            class.location.end_line - removed
        }
        _ => {
            // Right after the enclosing function's (shifted) last line.
            method.location.end_line - removed + 1
        }
    }
    .min(new_lines.len());
    new_lines.insert(insert_at, format!("\n{method_text}"));
    let updated = new_lines.join("\n");

    Ok(Plan {
        summary: format!(
            "extract lines {start}-{end} into {}({})",
            method_name,
            flow.params
                .iter()
                .map(|p| p.0.clone())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        files: vec![PlannedFile {
            path: origin,
            original: content.clone(),
            updated,
            occurrences: 1,
            details: vec![ChangeDetail {
                line: start,
                before: range_lines.first().copied().unwrap_or_default().to_string(),
                after: call_line.trim_start().to_string(),
                confidence: None,
            }],
        }],
        suggestions: Vec::new(),
    })
}

fn resolve_range(params: &RefactorParams, lines: &[&str]) -> Result<(usize, usize)> {
    if let (Some(start), Some(end)) = (params.start_line, params.end_line) {
        return Ok((start, end));
    }
    if let Some(pattern) = &params.code_pattern {
        let needles: Vec<&str> = pattern.lines().filter(|l| !l.trim().is_empty()).collect();
        if needles.is_empty() {
            return Err(NtsError::InvalidArgument("empty codePattern".to_string()));
        }
        for i in 0..lines.len() {
            let window_ok = needles.iter().enumerate().all(|(j, needle)| {
                lines
                    .get(i + j)
                    .is_some_and(|line| line.trim() == needle.trim())
            });
            if window_ok {
                return Ok((i + 1, i + needles.len()));
            }
        }
        return Err(NtsError::InvalidArgument(
            "codePattern not found in file".to_string(),
        ));
    }
    Err(NtsError::InvalidArgument(
        "provide startLine/endLine or codePattern".to_string(),
    ))
}

fn innermost<'a>(candidates: impl Iterator<Item = &'a Symbol>) -> Option<&'a Symbol> {
    candidates.min_by_key(|s| s.location.end_line - s.location.start_line)
}

/// Variables crossing the range boundary.
struct Flow {
    /// (name, type) pairs flowing into the range.
    params: Vec<(String, String)>,
    /// Variable declared inside and needed afterwards, with its type.
    returned: Option<(String, String)>,
    /// The range contains a `return` of the enclosing method.
    has_return: bool,
}

fn analyse_flow(
    root: &Node<'_>,
    language: LanguageId,
    source: &str,
    start: usize,
    end: usize,
    method: &Symbol,
) -> Flow {
    // Declaration sites across the whole method, name -> (line, type).
    let mut declarations: BTreeMap<String, (usize, String)> = BTreeMap::new();
    // Identifier uses: (line, name).
    let mut uses: Vec<(usize, String)> = Vec::new();
    scan(root, language, source, &mut declarations, &mut uses, method);

    let mut declared_inside: BTreeSet<String> = BTreeSet::new();
    for (name, (line, _)) in &declarations {
        if *line >= start && *line <= end {
            declared_inside.insert(name.clone());
        }
    }

    let mut params: Vec<(String, String)> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for (line, name) in &uses {
        if *line < start || *line > end || seen.contains(name) || declared_inside.contains(name) {
            continue;
        }
        if let Some((decl_line, decl_type)) = declarations.get(name) {
            if *decl_line < start {
                seen.insert(name.clone());
                params.push((name.clone(), decl_type.clone()));
            }
        }
    }

    let mut returned = None;
    for name in &declared_inside {
        let used_after = uses
            .iter()
            .any(|(line, used)| *line > end && *line <= method.location.end_line && used == name);
        if used_after {
            let decl_type = declarations
                .get(name)
                .map(|(_, t)| t.clone())
                .unwrap_or_else(|| "Object".to_string());
            returned = Some((name.clone(), decl_type));
            break;
        }
    }

    let has_return = source
        .split('\n')
        .skip(start - 1)
        .take(end - start + 1)
        .any(|line| {
            let trimmed = line.trim_start();
            trimmed == "return" || trimmed == "return;" || trimmed.starts_with("return ")
        });

    Flow {
        params,
        returned,
        has_return,
    }
}

fn scan(
    node: &Node<'_>,
    language: LanguageId,
    source: &str,
    declarations: &mut BTreeMap<String, (usize, String)>,
    uses: &mut Vec<(usize, String)>,
    method: &Symbol,
) {
    let line = node.start_position().row + 1;
    let in_method = line >= method.location.start_line && line <= method.location.end_line;

    if in_method && language.identifier_kinds().contains(&node.kind()) {
        let name = node.utf8_text(source.as_bytes()).unwrap_or_default().to_string();
        if !name.is_empty() && !is_call_name(*node) && node.kind() != "type_identifier" {
            if let Some(declared_type) = declaration_type(*node, source, language) {
                declarations.entry(name.clone()).or_insert((line, declared_type));
            }
            uses.push((line, name));
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        scan(&child, language, source, declarations, uses, method);
    }
}

/// The identifier names a callable in a call expression, not a variable.
fn is_call_name(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    let call_like = matches!(
        parent.kind(),
        "method_invocation" | "call_expression" | "call" | "function_call_expression"
    );
    call_like
        && parent
            .child_by_field_name("name")
            .or_else(|| parent.child_by_field_name("function"))
            .is_some_and(|n| n.id() == node.id())
}

/// If this identifier is a declaration site, recover its declared type.
fn declaration_type(node: Node<'_>, source: &str, language: LanguageId) -> Option<String> {
    let parent = node.parent()?;
    let named_here = parent
        .child_by_field_name("name")
        .is_some_and(|n| n.id() == node.id());
    if !named_here {
        // Python assignments declare on the left-hand side.
        if language == LanguageId::Python
            && parent.kind() == "assignment"
            && parent
                .child_by_field_name("left")
                .is_some_and(|n| n.id() == node.id())
        {
            return Some(String::new());
        }
        return None;
    }
    match parent.kind() {
        "variable_declarator" => {
            let declaration = parent.parent()?;
            declaration
                .child_by_field_name("type")
                .and_then(|t| t.utf8_text(source.as_bytes()).ok())
                .map(|t| t.to_string())
                .or(Some("Object".to_string()))
        }
        "formal_parameter" | "parameter" | "typed_parameter" => parent
            .child_by_field_name("type")
            .and_then(|t| t.utf8_text(source.as_bytes()).ok())
            .map(|t| t.to_string())
            .or(Some("Object".to_string())),
        "let_declaration" => Some("auto".to_string()),
        _ => None,
    }
}

fn brace_member(
    name: &str,
    flow: &Flow,
    range_lines: &[&str],
    base_indent: &str,
    is_static: bool,
    access: &str,
    return_override: Option<&str>,
) -> (String, String) {
    let member_indent = INDENT_STEP.to_string();
    let params = flow
        .params
        .iter()
        .map(|(n, t)| format!("{t} {n}"))
        .collect::<Vec<_>>()
        .join(", ");
    let args = flow
        .params
        .iter()
        .map(|(n, _)| n.clone())
        .collect::<Vec<_>>()
        .join(", ");

    let return_type = return_override
        .map(|t| t.to_string())
        .unwrap_or_else(|| match &flow.returned {
            Some((_, t)) => t.clone(),
            None => "void".to_string(),
        });
    let static_kw = if is_static { "static " } else { "" };

    let mut body: Vec<String> = Vec::new();
    for line in range_lines {
        if line.trim().is_empty() {
            body.push(String::new());
        } else {
            let rebased = line.strip_prefix(base_indent).unwrap_or(line);
            body.push(format!("{member_indent}{INDENT_STEP}{rebased}"));
        }
    }
    if let Some((var, _)) = &flow.returned {
        body.push(format!("{member_indent}{INDENT_STEP}return {var};"));
    }

    let method_text = format!(
        "{member_indent}{access} {static_kw}{return_type} {name}({params}) {{\n{}\n{member_indent}}}",
        body.join("\n")
    );

    let call = match &flow.returned {
        Some((var, t)) => format!("{base_indent}{t} {var} = {name}({args});"),
        None if flow.has_return => format!("{base_indent}return {name}({args});"),
        None => format!("{base_indent}{name}({args});"),
    };
    (method_text, call)
}

fn python_member(
    name: &str,
    flow: &Flow,
    range_lines: &[&str],
    base_indent: &str,
    is_static: bool,
    in_class: bool,
) -> (String, String) {
    let mut param_names: Vec<String> = flow.params.iter().map(|(n, _)| n.clone()).collect();
    let receiver = in_class && !is_static;
    if receiver {
        param_names.insert(0, "self".to_string());
    }
    let def_indent = if in_class { INDENT_STEP } else { "" };

    let mut body: Vec<String> = Vec::new();
    for line in range_lines {
        if line.trim().is_empty() {
            body.push(String::new());
        } else {
            let rebased = line.strip_prefix(base_indent).unwrap_or(line);
            body.push(format!("{def_indent}{INDENT_STEP}{rebased}"));
        }
    }
    if let Some((var, _)) = &flow.returned {
        body.push(format!("{def_indent}{INDENT_STEP}return {var}"));
    }

    let mut header = String::new();
    if in_class && is_static {
        header.push_str(&format!("{def_indent}@staticmethod\n"));
    }
    header.push_str(&format!("{def_indent}def {name}({}):", param_names.join(", ")));
    let method_text = format!("{header}\n{}", body.join("\n"));

    let args = flow
        .params
        .iter()
        .map(|(n, _)| n.clone())
        .collect::<Vec<_>>()
        .join(", ");
    let callee = if receiver {
        format!("self.{name}")
    } else {
        name.to_string()
    };
    let call = match &flow.returned {
        Some((var, _)) => format!("{base_indent}{var} = {callee}({args})"),
        None if flow.has_return => format!("{base_indent}return {callee}({args})"),
        None => format!("{base_indent}{callee}({args})"),
    };
    (method_text, call)
}
