//! Synthesize class members: accessors, constructors, builders, equality,
//! and string rendering. Brace-language templates (Java is the reference
//! target; C# shares the shapes).

use crate::error::NtsError;
use crate::error::Result;
use crate::symbols::LanguageId;
use crate::symbols::Symbol;
use crate::symbols::SymbolKind;

use super::ChangeDetail;
use super::GenerateWhat;
use super::Plan;
use super::PlanCtx;
use super::PlannedFile;
use super::RefactorParams;
use super::leading_indent;
use super::read_source;
use super::require;
use super::resolve_origin;

/// A field with its declared type, recovered from the declaration line.
struct FieldInfo {
    name: String,
    field_type: String,
}

pub(crate) fn plan(ctx: &PlanCtx<'_>, params: &RefactorParams) -> Result<Plan> {
    let origin = resolve_origin(ctx, params)?;
    let class_name = require(&params.symbol, "symbol")?;
    let what = require(&params.what, "what")?;

    let language = LanguageId::from_path(&origin).ok_or_else(|| {
        NtsError::UnsupportedLanguage(origin.to_string_lossy().into_owned())
    })?;
    if !matches!(language, LanguageId::Java | LanguageId::CSharp) {
        return Err(NtsError::UnsupportedLanguage(format!(
            "generate targets Java/C# classes, not {language:?}"
        )));
    }

    let symbols = ctx.symbols.list_symbols(&origin)?;
    let class = symbols
        .iter()
        .find(|s| s.name == class_name && s.kind.is_container())
        .ok_or_else(|| NtsError::SymbolNotFound {
            name: class_name.clone(),
            suggestions: symbols
                .iter()
                .filter(|s| s.kind.is_container())
                .map(|s| s.name.clone())
                .collect(),
        })?;

    let mut fields: Vec<FieldInfo> = symbols
        .iter()
        .filter(|s| s.kind == SymbolKind::Field && s.parent.as_deref() == Some(class_name.as_str()))
        .filter_map(field_info)
        .collect();
    if let Some(wanted) = &params.fields {
        fields.retain(|f| wanted.contains(&f.name));
    }
    if fields.is_empty() {
        return Err(NtsError::InvalidArgument(format!(
            "class '{class_name}' has no matching fields to generate from"
        )));
    }

    let content = read_source(&origin)?;
    let lines: Vec<&str> = content.split('\n').collect();
    let class_indent = lines
        .get(class.location.start_line.saturating_sub(1))
        .map(|l| leading_indent(l))
        .unwrap_or_default();
    let member_indent = format!("{class_indent}    ");

    let members: Vec<String> = match what {
        GenerateWhat::Getter => fields.iter().map(|f| getter(f, &member_indent)).collect(),
        GenerateWhat::Setter => fields.iter().map(|f| setter(f, &member_indent)).collect(),
        GenerateWhat::Accessors => fields
            .iter()
            .flat_map(|f| [getter(f, &member_indent), setter(f, &member_indent)])
            .collect(),
        GenerateWhat::Constructor => vec![constructor(&class_name, &fields, &member_indent)],
        GenerateWhat::Builder => vec![builder(&class_name, &fields, &member_indent)],
        GenerateWhat::EqualsHashcode => vec![equals_hashcode(&class_name, &fields, &member_indent)],
        GenerateWhat::ToString => vec![to_string_member(&class_name, &fields, &member_indent)],
    };

    // Insert just before the class's closing brace.
    let insert_at = class.location.end_line.saturating_sub(1);
    let mut new_lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
    let block = format!("\n{}", members.join("\n\n"));
    new_lines.insert(insert_at, block);
    let updated = new_lines.join("\n");

    let details = vec![ChangeDetail {
        line: class.location.end_line,
        before: String::new(),
        after: format!("{} member(s) generated", members.len()),
        confidence: None,
    }];

    Ok(Plan {
        summary: format!(
            "generate {:?} for {} field(s) of '{}'",
            what,
            fields.len(),
            class_name
        ),
        files: vec![PlannedFile {
            path: origin,
            original: content,
            updated,
            occurrences: members.len(),
            details,
        }],
        suggestions: Vec::new(),
    })
}

/// `private String name;` -> (name, String). Strips modifiers and the
/// trailing declarator.
fn field_info(symbol: &Symbol) -> Option<FieldInfo> {
    let signature = symbol.signature.as_deref()?;
    let stripped = signature.trim_end_matches(';');
    let words: Vec<&str> = stripped.split_whitespace().collect();
    let name_index = words.iter().position(|w| {
        w.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_') == symbol.name
    })?;
    let field_type = words[..name_index]
        .iter()
        .filter(|w| {
            !matches!(
                **w,
                "public" | "private" | "protected" | "static" | "final" | "readonly" | "volatile"
            )
        })
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    if field_type.is_empty() {
        return None;
    }
    Some(FieldInfo {
        name: symbol.name.clone(),
        field_type,
    })
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn getter(field: &FieldInfo, indent: &str) -> String {
    format!(
        "{indent}public {} get{}() {{\n{indent}    return {};\n{indent}}}",
        field.field_type,
        capitalize(&field.name),
        field.name
    )
}

fn setter(field: &FieldInfo, indent: &str) -> String {
    format!(
        "{indent}public void set{}({} {}) {{\n{indent}    this.{} = {};\n{indent}}}",
        capitalize(&field.name),
        field.field_type,
        field.name,
        field.name,
        field.name
    )
}

fn constructor(class_name: &str, fields: &[FieldInfo], indent: &str) -> String {
    let params = fields
        .iter()
        .map(|f| format!("{} {}", f.field_type, f.name))
        .collect::<Vec<_>>()
        .join(", ");
    let assignments = fields
        .iter()
        .map(|f| format!("{indent}    this.{} = {};", f.name, f.name))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{indent}public {class_name}({params}) {{\n{assignments}\n{indent}}}")
}

fn builder(class_name: &str, fields: &[FieldInfo], indent: &str) -> String {
    let inner = format!("{indent}    ");
    let field_decls = fields
        .iter()
        .map(|f| format!("{inner}    private {} {};", f.field_type, f.name))
        .collect::<Vec<_>>()
        .join("\n");
    let setters = fields
        .iter()
        .map(|f| {
            format!(
                "{inner}    public Builder {}({} {}) {{\n{inner}        this.{} = {};\n{inner}        return this;\n{inner}    }}",
                f.name, f.field_type, f.name, f.name, f.name
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let args = fields
        .iter()
        .map(|f| f.name.clone())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{indent}public static Builder builder() {{\n{indent}    return new Builder();\n{indent}}}\n\n\
         {indent}public static final class Builder {{\n{field_decls}\n\n{setters}\n\n\
         {inner}    public {class_name} build() {{\n{inner}        return new {class_name}({args});\n{inner}    }}\n{indent}}}"
    )
}

fn equals_hashcode(class_name: &str, fields: &[FieldInfo], indent: &str) -> String {
    let comparisons = fields
        .iter()
        .map(|f| format!("java.util.Objects.equals({}, other.{})", f.name, f.name))
        .collect::<Vec<_>>()
        .join("\n            && ");
    let hash_args = fields
        .iter()
        .map(|f| f.name.clone())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{indent}@Override\n{indent}public boolean equals(Object o) {{\n\
         {indent}    if (this == o) {{\n{indent}        return true;\n{indent}    }}\n\
         {indent}    if (!(o instanceof {class_name})) {{\n{indent}        return false;\n{indent}    }}\n\
         {indent}    {class_name} other = ({class_name}) o;\n\
         {indent}    return {comparisons};\n{indent}}}\n\n\
         {indent}@Override\n{indent}public int hashCode() {{\n\
         {indent}    return java.util.Objects.hash({hash_args});\n{indent}}}"
    )
}

fn to_string_member(class_name: &str, fields: &[FieldInfo], indent: &str) -> String {
    let parts = fields
        .iter()
        .enumerate()
        .map(|(index, f)| {
            let prefix = if index == 0 {
                format!("\"{}=\"", f.name)
            } else {
                format!("\", {}=\"", f.name)
            };
            format!("{prefix} + {}", f.name)
        })
        .collect::<Vec<_>>()
        .join(" + ");
    format!(
        "{indent}@Override\n{indent}public String toString() {{\n\
         {indent}    return \"{class_name}{{\" + {parts} + \"}}\";\n{indent}}}"
    )
}
