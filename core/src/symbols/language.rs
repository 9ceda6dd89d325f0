//! Per-language extraction rules. Languages are tagged variants selected by
//! file extension; each match arm below encodes what its grammar calls a
//! definition and where the defined name lives.

use serde::Serialize;
use tree_sitter::Language;
use tree_sitter::Node;

use super::Symbol;
use super::SymbolKind;
use super::node_span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    Java,
    Kotlin,
    JavaScript,
    TypeScript,
    Python,
    Go,
    Rust,
    C,
    Cpp,
    CSharp,
    Php,
    Html,
}

impl LanguageId {
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::from_extension(&ext)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "java" => Some(LanguageId::Java),
            "kt" | "kts" => Some(LanguageId::Kotlin),
            "js" | "jsx" | "mjs" | "cjs" => Some(LanguageId::JavaScript),
            "ts" | "tsx" | "mts" => Some(LanguageId::TypeScript),
            "py" | "pyi" => Some(LanguageId::Python),
            "go" => Some(LanguageId::Go),
            "rs" => Some(LanguageId::Rust),
            "c" | "h" => Some(LanguageId::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hh" => Some(LanguageId::Cpp),
            "cs" => Some(LanguageId::CSharp),
            "php" => Some(LanguageId::Php),
            "html" | "htm" => Some(LanguageId::Html),
            _ => None,
        }
    }

    pub fn grammar(self) -> Language {
        match self {
            LanguageId::Java => tree_sitter_java::LANGUAGE.into(),
            LanguageId::Kotlin => tree_sitter_kotlin_ng::LANGUAGE.into(),
            LanguageId::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            LanguageId::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            LanguageId::Python => tree_sitter_python::LANGUAGE.into(),
            LanguageId::Go => tree_sitter_go::LANGUAGE.into(),
            LanguageId::Rust => tree_sitter_rust::LANGUAGE.into(),
            LanguageId::C => tree_sitter_c::LANGUAGE.into(),
            LanguageId::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            LanguageId::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            LanguageId::Php => tree_sitter_php::LANGUAGE_PHP.into(),
            LanguageId::Html => tree_sitter_html::LANGUAGE.into(),
        }
    }

    /// Node kinds that stand for a plain identifier use in this grammar.
    pub fn identifier_kinds(self) -> &'static [&'static str] {
        match self {
            LanguageId::Java => &["identifier", "type_identifier"],
            LanguageId::Kotlin => &["simple_identifier", "identifier", "type_identifier"],
            LanguageId::JavaScript => &[
                "identifier",
                "property_identifier",
                "shorthand_property_identifier",
            ],
            LanguageId::TypeScript => &[
                "identifier",
                "property_identifier",
                "shorthand_property_identifier",
                "type_identifier",
            ],
            LanguageId::Python => &["identifier"],
            LanguageId::Go => &["identifier", "field_identifier", "type_identifier"],
            LanguageId::Rust => &["identifier", "field_identifier", "type_identifier"],
            LanguageId::C => &["identifier", "field_identifier", "type_identifier"],
            LanguageId::Cpp => &["identifier", "field_identifier", "type_identifier"],
            LanguageId::CSharp => &["identifier"],
            LanguageId::Php => &["name", "variable_name"],
            LanguageId::Html => &["attribute_value"],
        }
    }

    pub fn line_comment(self) -> &'static str {
        match self {
            LanguageId::Python => "# ",
            LanguageId::Html => "<!-- ",
            _ => "// ",
        }
    }

    /// Extract a definition from `node`, or `None` when the node is not a
    /// definition in this language.
    pub fn extract_symbol(
        self,
        node: Node<'_>,
        source: &str,
        path: &str,
        parent: Option<&str>,
    ) -> Option<Symbol> {
        let kind = node.kind();
        let (symbol_kind, name) = match self {
            LanguageId::Java => match kind {
                "class_declaration" | "record_declaration" => {
                    (SymbolKind::Class, field_name(node, source)?)
                }
                "interface_declaration" => (SymbolKind::Interface, field_name(node, source)?),
                "enum_declaration" => (SymbolKind::Enum, field_name(node, source)?),
                "method_declaration" | "constructor_declaration" => {
                    (SymbolKind::Method, field_name(node, source)?)
                }
                "field_declaration" => (SymbolKind::Field, declarator_name(node, source)?),
                _ => return None,
            },
            LanguageId::Kotlin => match kind {
                "class_declaration" | "object_declaration" => {
                    (SymbolKind::Class, best_name(node, source)?)
                }
                "function_declaration" => (
                    if parent.is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    },
                    best_name(node, source)?,
                ),
                "property_declaration" => (SymbolKind::Field, best_name(node, source)?),
                _ => return None,
            },
            LanguageId::JavaScript | LanguageId::TypeScript => match kind {
                "function_declaration" | "generator_function_declaration" => {
                    (SymbolKind::Function, field_name(node, source)?)
                }
                "class_declaration" | "abstract_class_declaration" => {
                    (SymbolKind::Class, field_name(node, source)?)
                }
                "method_definition" => (SymbolKind::Method, field_name(node, source)?),
                "variable_declarator" => (SymbolKind::Variable, field_name(node, source)?),
                "interface_declaration" if self == LanguageId::TypeScript => {
                    (SymbolKind::Interface, field_name(node, source)?)
                }
                "type_alias_declaration" if self == LanguageId::TypeScript => {
                    (SymbolKind::TypeAlias, field_name(node, source)?)
                }
                "enum_declaration" if self == LanguageId::TypeScript => {
                    (SymbolKind::Enum, field_name(node, source)?)
                }
                "public_field_definition" if self == LanguageId::TypeScript => {
                    (SymbolKind::Field, field_name(node, source)?)
                }
                _ => return None,
            },
            LanguageId::Python => match kind {
                "function_definition" => (
                    if parent.is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    },
                    field_name(node, source)?,
                ),
                "class_definition" => (SymbolKind::Class, field_name(node, source)?),
                _ => return None,
            },
            LanguageId::Go => match kind {
                "function_declaration" => (SymbolKind::Function, field_name(node, source)?),
                "method_declaration" => (SymbolKind::Method, field_name(node, source)?),
                "type_spec" => {
                    let type_kind = node
                        .child_by_field_name("type")
                        .map(|t| t.kind())
                        .unwrap_or("");
                    let mapped = match type_kind {
                        "struct_type" => SymbolKind::Struct,
                        "interface_type" => SymbolKind::Interface,
                        _ => SymbolKind::TypeAlias,
                    };
                    (mapped, field_name(node, source)?)
                }
                "const_spec" | "var_spec" => (SymbolKind::Variable, field_name(node, source)?),
                "field_declaration" => (SymbolKind::Field, field_name(node, source)?),
                _ => return None,
            },
            LanguageId::Rust => match kind {
                "function_item" => (
                    if parent.is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    },
                    field_name(node, source)?,
                ),
                "struct_item" => (SymbolKind::Struct, field_name(node, source)?),
                "enum_item" => (SymbolKind::Enum, field_name(node, source)?),
                "trait_item" => (SymbolKind::Interface, field_name(node, source)?),
                "type_item" => (SymbolKind::TypeAlias, field_name(node, source)?),
                "const_item" | "static_item" => (SymbolKind::Variable, field_name(node, source)?),
                "field_declaration" => (SymbolKind::Field, field_name(node, source)?),
                _ => return None,
            },
            LanguageId::C | LanguageId::Cpp => match kind {
                "function_definition" => (
                    if parent.is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    },
                    declarator_name(node, source)?,
                ),
                "struct_specifier" if has_body(node) => {
                    (SymbolKind::Struct, field_name(node, source)?)
                }
                "class_specifier" if self == LanguageId::Cpp && has_body(node) => {
                    (SymbolKind::Class, field_name(node, source)?)
                }
                "enum_specifier" if has_body(node) => (SymbolKind::Enum, field_name(node, source)?),
                "type_definition" => (SymbolKind::TypeAlias, declarator_name(node, source)?),
                "field_declaration" => (SymbolKind::Field, declarator_name(node, source)?),
                _ => return None,
            },
            LanguageId::CSharp => match kind {
                "class_declaration" => (SymbolKind::Class, field_name(node, source)?),
                "interface_declaration" => (SymbolKind::Interface, field_name(node, source)?),
                "struct_declaration" => (SymbolKind::Struct, field_name(node, source)?),
                "enum_declaration" => (SymbolKind::Enum, field_name(node, source)?),
                "method_declaration" | "constructor_declaration" => {
                    (SymbolKind::Method, field_name(node, source)?)
                }
                "property_declaration" => (SymbolKind::Field, field_name(node, source)?),
                "field_declaration" => (SymbolKind::Field, declarator_name(node, source)?),
                _ => return None,
            },
            LanguageId::Php => match kind {
                "class_declaration" => (SymbolKind::Class, field_name(node, source)?),
                "interface_declaration" => (SymbolKind::Interface, field_name(node, source)?),
                "enum_declaration" => (SymbolKind::Enum, field_name(node, source)?),
                "function_definition" => (SymbolKind::Function, field_name(node, source)?),
                "method_declaration" => (SymbolKind::Method, field_name(node, source)?),
                "property_declaration" => (SymbolKind::Field, best_name(node, source)?),
                _ => return None,
            },
            LanguageId::Html => match kind {
                "element" => (SymbolKind::Variable, element_id(node, source)?),
                _ => return None,
            },
        };

        let parameters = parameter_list(node, source);
        Some(Symbol {
            language: self,
            name,
            kind: symbol_kind,
            signature: signature_line(node, source),
            parameters,
            return_type: return_type(node, source),
            docstring: doc_comment(node, source),
            location: node_span(node, path),
            parent: parent.map(|p| p.to_string()),
        })
    }

    /// Does the point sit in a context where `this`/`self` is unavailable?
    /// Walks ancestors for the nearest enclosing callable and applies the
    /// language's notion of "static".
    pub fn is_static_context(self, node: Node<'_>, source: &str) -> bool {
        let callable_kinds: &[&str] = match self {
            LanguageId::Python => &["function_definition"],
            LanguageId::Java | LanguageId::CSharp => {
                &["method_declaration", "constructor_declaration"]
            }
            LanguageId::JavaScript | LanguageId::TypeScript => {
                &["method_definition", "function_declaration", "arrow_function"]
            }
            LanguageId::Kotlin => &["function_declaration"],
            LanguageId::Rust => &["function_item"],
            LanguageId::Go => &["method_declaration", "function_declaration"],
            LanguageId::C | LanguageId::Cpp => &["function_definition"],
            LanguageId::Php => &["method_declaration", "function_definition"],
            LanguageId::Html => return true,
        };

        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if callable_kinds.contains(&current.kind()) {
                return match self {
                    LanguageId::Python => python_is_static(current, source),
                    LanguageId::Rust => !rust_has_self_param(current, source),
                    LanguageId::Go => current.kind() != "method_declaration",
                    _ => {
                        signature_line(current, source)
                            .is_some_and(|sig| contains_word(&sig, "static"))
                            || !inside_type_body(current)
                    }
                };
            }
            cursor = current.parent();
        }
        true
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn field_name(node: Node<'_>, source: &str) -> Option<String> {
    let name = node.child_by_field_name("name")?;
    Some(node_text(name, source).to_string())
}

/// Name buried inside a declarator chain (C declarations, Java fields).
fn declarator_name(node: Node<'_>, source: &str) -> Option<String> {
    if let Some(declarator) = node.child_by_field_name("declarator") {
        return innermost_identifier(declarator, source);
    }
    // Java/C# style: a variable_declarator child carries the name.
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "variable_declarator" {
            if let Some(name) = field_name(child, source) {
                return Some(name);
            }
        }
    }
    innermost_identifier(node, source)
}

/// Fallback: nearest identifier-looking descendant, depth first.
fn best_name(node: Node<'_>, source: &str) -> Option<String> {
    if let Some(name) = field_name(node, source) {
        return Some(name);
    }
    innermost_identifier(node, source)
}

const NAME_KINDS: &[&str] = &[
    "identifier",
    "simple_identifier",
    "field_identifier",
    "type_identifier",
    "property_identifier",
    "variable_name",
    "name",
];

fn innermost_identifier(node: Node<'_>, source: &str) -> Option<String> {
    if NAME_KINDS.contains(&node.kind()) {
        return Some(node_text(node, source).to_string());
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if let Some(found) = innermost_identifier(child, source) {
            return Some(found);
        }
    }
    None
}

fn has_body(node: Node<'_>) -> bool {
    node.child_by_field_name("body").is_some()
}

fn element_id(node: Node<'_>, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    let tag = node
        .named_children(&mut cursor)
        .find(|c| matches!(c.kind(), "start_tag" | "self_closing_tag"))?;
    let mut tag_cursor = tag.walk();
    for attribute in tag.named_children(&mut tag_cursor) {
        if attribute.kind() != "attribute" {
            continue;
        }
        let mut attr_cursor = attribute.walk();
        let mut name = None;
        let mut value = None;
        for part in attribute.named_children(&mut attr_cursor) {
            match part.kind() {
                "attribute_name" => name = Some(node_text(part, source)),
                "attribute_value" => value = Some(node_text(part, source)),
                "quoted_attribute_value" => {
                    let mut inner = part.walk();
                    value = part
                        .named_children(&mut inner)
                        .find(|v| v.kind() == "attribute_value")
                        .map(|v| node_text(v, source));
                }
                _ => {}
            }
        }
        if name == Some("id") {
            return value.map(|v| v.to_string());
        }
    }
    None
}

/// First line of the node, clipped at the body opener.
fn signature_line(node: Node<'_>, source: &str) -> Option<String> {
    let text = node_text(node, source);
    let first_line = text.lines().next()?;
    let clipped = match first_line.find('{') {
        Some(index) => &first_line[..index],
        None => first_line,
    };
    let trimmed = clipped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parameter_list(node: Node<'_>, source: &str) -> Option<Vec<String>> {
    let params = node.child_by_field_name("parameters")?;
    let text = node_text(params, source).trim().to_string();
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(&text);
    let split = split_top_level(inner);
    if split.is_empty() { None } else { Some(split) }
}

fn return_type(node: Node<'_>, source: &str) -> Option<String> {
    for field in ["return_type", "type", "result", "returns"] {
        if let Some(found) = node.child_by_field_name(field) {
            let text = node_text(found, source).trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn doc_comment(node: Node<'_>, source: &str) -> Option<String> {
    let previous = node.prev_named_sibling()?;
    if !previous.kind().contains("comment") {
        return None;
    }
    let text = node_text(previous, source).trim().to_string();
    if text.is_empty() { None } else { Some(text) }
}

/// Split on commas that sit outside any bracket nesting.
pub(crate) fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '(' | '[' | '{' | '<' => depth += 1,
            ')' | ']' | '}' | '>' => depth -= 1,
            ',' if depth == 0 => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    parts.push(trimmed.to_string());
                }
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
    parts
}

pub(crate) fn contains_word(haystack: &str, word: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(word) {
        let start = from + offset;
        let end = start + word.len();
        let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn python_is_static(function: Node<'_>, source: &str) -> bool {
    // Module-level functions have no instance receiver.
    let in_class = {
        let mut cursor = function.parent();
        let mut found = false;
        while let Some(parent) = cursor {
            if parent.kind() == "class_definition" {
                found = true;
                break;
            }
            if parent.kind() == "function_definition" {
                break;
            }
            cursor = parent.parent();
        }
        found
    };
    if !in_class {
        return true;
    }
    // Methods are instance-bound unless decorated @staticmethod. The
    // decorator wraps the definition in a decorated_definition node.
    if let Some(parent) = function.parent() {
        if parent.kind() == "decorated_definition" {
            let text = node_text(parent, source);
            if text.contains("@staticmethod") {
                return true;
            }
        }
    }
    false
}

fn rust_has_self_param(function: Node<'_>, source: &str) -> bool {
    function
        .child_by_field_name("parameters")
        .map(|params| node_text(params, source).contains("self"))
        .unwrap_or(false)
}

fn inside_type_body(node: Node<'_>) -> bool {
    let mut cursor = node.parent();
    while let Some(parent) = cursor {
        if parent.kind().contains("class")
            || parent.kind().contains("interface")
            || parent.kind().contains("struct")
        {
            return true;
        }
        cursor = parent.parent();
    }
    false
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extensions_map_to_languages() {
        assert_eq!(LanguageId::from_extension("java"), Some(LanguageId::Java));
        assert_eq!(LanguageId::from_extension("tsx"), Some(LanguageId::TypeScript));
        assert_eq!(LanguageId::from_extension("hpp"), Some(LanguageId::Cpp));
        assert_eq!(LanguageId::from_extension("txt"), None);
    }

    #[test]
    fn split_top_level_respects_nesting() {
        assert_eq!(
            split_top_level("Map<String, Integer> m, int x"),
            vec!["Map<String, Integer> m", "int x"]
        );
        assert_eq!(split_top_level(""), Vec::<String>::new());
    }

    #[test]
    fn contains_word_needs_boundaries() {
        assert!(contains_word("public static void main", "static"));
        assert!(!contains_word("ecstatic void", "static"));
    }

    #[test]
    fn static_detection_in_java() {
        let source = r#"public class A {
    public static int f(int x) { return x; }
    public int g(int x) { return x; }
}
"#;
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&LanguageId::Java.grammar()).unwrap();
        let tree = parser.parse(source, None).unwrap();
        let root = tree.root_node();

        let static_body = root
            .descendant_for_point_range(
                tree_sitter::Point { row: 1, column: 40 },
                tree_sitter::Point { row: 1, column: 40 },
            )
            .unwrap();
        assert!(LanguageId::Java.is_static_context(static_body, source));

        let instance_body = root
            .descendant_for_point_range(
                tree_sitter::Point { row: 2, column: 33 },
                tree_sitter::Point { row: 2, column: 33 },
            )
            .unwrap();
        assert!(!LanguageId::Java.is_static_context(instance_body, source));
    }

    #[test]
    fn static_detection_in_python() {
        let source = "class A:\n    @staticmethod\n    def f(x):\n        return x\n    def g(self):\n        return 1\n\ndef top():\n    return 2\n";
        let mut parser = tree_sitter::Parser::new();
        parser.set_language(&LanguageId::Python.grammar()).unwrap();
        let tree = parser.parse(source, None).unwrap();
        let root = tree.root_node();

        let in_f = root
            .descendant_for_point_range(
                tree_sitter::Point { row: 3, column: 12 },
                tree_sitter::Point { row: 3, column: 12 },
            )
            .unwrap();
        assert!(LanguageId::Python.is_static_context(in_f, source));

        let in_g = root
            .descendant_for_point_range(
                tree_sitter::Point { row: 5, column: 12 },
                tree_sitter::Point { row: 5, column: 12 },
            )
            .unwrap();
        assert!(!LanguageId::Python.is_static_context(in_g, source));

        let in_top = root
            .descendant_for_point_range(
                tree_sitter::Point { row: 8, column: 8 },
                tree_sitter::Point { row: 8, column: 8 },
            )
            .unwrap();
        assert!(LanguageId::Python.is_static_context(in_top, source));
    }
}
