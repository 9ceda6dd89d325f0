//! Reference search across file, directory, and project scopes.
//!
//! File and directory scopes walk ASTs inside their bound; project scope is
//! always a text scan over candidate files so usages in code the parser
//! cannot fully resolve still surface.

use std::path::Path;
use std::path::PathBuf;

use ignore::WalkBuilder;
use regex_lite::Regex;
use serde::Deserialize;
use serde::Serialize;
use tree_sitter::Node;

use super::LanguageId;
use super::Reference;
use super::Symbol;
use super::SymbolEngine;
use crate::error::NtsError;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceScope {
    File,
    Directory,
    #[default]
    Project,
}

impl SymbolEngine {
    /// The identifier under the cursor, or a suggestion-bearing error.
    pub fn identifier_at(&self, path: &Path, line: usize, column: usize) -> Result<String> {
        let parsed = self.parse(path)?;
        let point = tree_sitter::Point {
            row: line.saturating_sub(1),
            column,
        };
        let root = parsed.tree.root_node();
        let node = root
            .descendant_for_point_range(point, point)
            .filter(|n| parsed.language.identifier_kinds().contains(&n.kind()));
        match node {
            Some(node) => Ok(node
                .utf8_text(parsed.content.as_bytes())
                .unwrap_or_default()
                .to_string()),
            None => {
                let suggestions: Vec<String> = super::collect_symbols(&parsed, &path.to_string_lossy())
                    .into_iter()
                    .map(|s| s.name)
                    .take(5)
                    .collect();
                Err(NtsError::SymbolNotFound {
                    name: format!("{}:{line}:{column}", path.display()),
                    suggestions,
                })
            }
        }
    }

    pub fn find_references(
        &self,
        roots: &[PathBuf],
        path: &Path,
        line: usize,
        column: usize,
        scope: ReferenceScope,
        include_definition: bool,
    ) -> Result<Vec<Reference>> {
        let name = self.identifier_at(path, line, column)?;
        self.find_references_by_name(roots, path, &name, scope, include_definition)
    }

    pub fn find_references_by_name(
        &self,
        roots: &[PathBuf],
        origin: &Path,
        name: &str,
        scope: ReferenceScope,
        include_definition: bool,
    ) -> Result<Vec<Reference>> {
        let mut references = match scope {
            ReferenceScope::File => self.ast_occurrences(origin, name)?,
            ReferenceScope::Directory => {
                let dir = origin.parent().unwrap_or(Path::new("."));
                let mut all = Vec::new();
                for file in candidate_files(&[dir.to_path_buf()]) {
                    if let Ok(mut found) = self.ast_occurrences(&file, name) {
                        all.append(&mut found);
                    }
                }
                all
            }
            ReferenceScope::Project => {
                let mut all = Vec::new();
                for file in candidate_files(roots) {
                    if let Ok(mut found) = self.text_occurrences(&file, name) {
                        all.append(&mut found);
                    }
                }
                all
            }
        };
        if !include_definition {
            references.retain(|r| !r.is_definition);
        }
        references.sort_by(|a, b| {
            (&a.path, a.line, a.column).cmp(&(&b.path, b.line, b.column))
        });
        Ok(references)
    }

    /// AST-backed occurrences of `name` in one file.
    pub(crate) fn ast_occurrences(&self, path: &Path, name: &str) -> Result<Vec<Reference>> {
        let parsed = self.parse(path)?;
        let path_str = path.to_string_lossy().into_owned();
        let lines: Vec<&str> = parsed.content.lines().collect();
        let mut out = Vec::new();
        collect_identifier_nodes(
            parsed.tree.root_node(),
            parsed.language,
            parsed.content.as_str(),
            name,
            &mut |node| {
                let start = node.start_position();
                out.push(Reference {
                    path: path_str.clone(),
                    line: start.row + 1,
                    column: start.column,
                    line_text: lines.get(start.row).copied().unwrap_or_default().to_string(),
                    is_definition: is_definition_site(node),
                });
            },
        );
        Ok(out)
    }

    /// Word-boundary text occurrences; definition labelling is best-effort
    /// via the AST when the file parses.
    pub(crate) fn text_occurrences(&self, path: &Path, name: &str) -> Result<Vec<Reference>> {
        let bytes = std::fs::read(path)?;
        let content = String::from_utf8_lossy(&bytes);
        if !content.contains(name) {
            return Ok(Vec::new());
        }
        let pattern = word_pattern(name)?;
        let ast = self.ast_occurrences(path, name).unwrap_or_default();
        let path_str = path.to_string_lossy().into_owned();

        let mut out = Vec::new();
        for (index, line_text) in content.lines().enumerate() {
            for found in pattern.find_iter(line_text) {
                let line = index + 1;
                let column = found.start();
                let is_definition = ast
                    .iter()
                    .any(|r| r.line == line && r.column == column && r.is_definition);
                out.push(Reference {
                    path: path_str.clone(),
                    line,
                    column,
                    line_text: line_text.to_string(),
                    is_definition,
                });
            }
        }
        Ok(out)
    }

    /// Single best definition for the identifier at a position.
    pub fn resolve_definition(
        &self,
        roots: &[PathBuf],
        path: &Path,
        line: usize,
        column: usize,
    ) -> Result<Symbol> {
        let name = self.identifier_at(path, line, column)?;
        self.locate_symbol(roots, Some(path), &name, None)
    }

    /// Find the definition of `name`, preferring `origin`'s file, then the
    /// project. `kind_filter` narrows by symbol kind when the caller knows
    /// what it is renaming.
    pub fn locate_symbol(
        &self,
        roots: &[PathBuf],
        origin: Option<&Path>,
        name: &str,
        kind_filter: Option<super::SymbolKind>,
    ) -> Result<Symbol> {
        let matches_filter = |s: &Symbol| {
            s.name == name && kind_filter.map(|k| s.kind == k).unwrap_or(true)
        };

        if let Some(origin) = origin {
            if let Ok(symbols) = self.list_symbols(origin) {
                let local: Vec<Symbol> =
                    symbols.into_iter().filter(|s| matches_filter(s)).collect();
                let mut local = local;
                match local.len() {
                    1 => return Ok(local.remove(0)),
                    n if n > 1 => {
                        return Err(NtsError::AmbiguousSymbol {
                            name: name.to_string(),
                            count: n,
                        });
                    }
                    _ => {}
                }
            }
        }

        let mut found: Vec<Symbol> = Vec::new();
        for file in candidate_files(roots) {
            if let Ok(symbols) = self.list_symbols(&file) {
                found.extend(symbols.into_iter().filter(|s| matches_filter(s)));
            }
        }
        match found.len() {
            0 => {
                let suggestions = origin
                    .and_then(|o| self.list_symbols(o).ok())
                    .map(|symbols| symbols.into_iter().map(|s| s.name).take(5).collect())
                    .unwrap_or_default();
                Err(NtsError::SymbolNotFound {
                    name: name.to_string(),
                    suggestions,
                })
            }
            1 => Ok(found.remove(0)),
            n => Err(NtsError::AmbiguousSymbol {
                name: name.to_string(),
                count: n,
            }),
        }
    }
}

/// Files the reference scanners consider: anything with a supported
/// language extension, honouring ignore rules.
pub(crate) fn candidate_files(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in roots {
        for entry in WalkBuilder::new(root).build().flatten() {
            let path = entry.path();
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            if LanguageId::from_path(path).is_some() {
                files.push(path.to_path_buf());
            }
        }
    }
    files.sort();
    files.dedup();
    files
}

pub(crate) fn word_pattern(name: &str) -> Result<Regex> {
    if !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(NtsError::InvalidArgument(format!(
            "'{name}' is not a plain identifier"
        )));
    }
    Regex::new(&format!(r"\b{name}\b"))
        .map_err(|e| NtsError::Internal(format!("identifier pattern: {e}")))
}

fn collect_identifier_nodes(
    node: Node<'_>,
    language: LanguageId,
    source: &str,
    name: &str,
    sink: &mut impl FnMut(Node<'_>),
) {
    if language.identifier_kinds().contains(&node.kind())
        && node.utf8_text(source.as_bytes()).unwrap_or_default() == name
    {
        sink(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_identifier_nodes(child, language, source, name, sink);
    }
}

/// An identifier is a definition site when it is the `name` field of its
/// parent (or of a declarator wrapping it).
fn is_definition_site(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    if let Some(name_node) = parent.child_by_field_name("name") {
        if name_node.id() == node.id() {
            return true;
        }
    }
    if let Some(declarator) = parent.child_by_field_name("declarator") {
        if declarator.id() == node.id() {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const SERVICE: &str = r#"public class Service {
    public String processData(String input) {
        return input;
    }
}
"#;

    const CLIENT: &str = r#"public class Client {
    private Service service = new Service();

    public void run() {
        service.processData("hello");
        service.processData("world");
    }
}
"#;

    #[test]
    fn file_scope_finds_ast_occurrences() {
        let dir = TempDir::new().unwrap();
        let client = write(&dir, "Client.java", CLIENT);
        let engine = SymbolEngine::new();
        let refs = engine
            .find_references_by_name(
                &[dir.path().to_path_buf()],
                &client,
                "processData",
                ReferenceScope::File,
                true,
            )
            .unwrap();
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| !r.is_definition));
    }

    #[test]
    fn project_scope_spans_files_and_marks_definition() {
        let dir = TempDir::new().unwrap();
        let service = write(&dir, "Service.java", SERVICE);
        write(&dir, "Client.java", CLIENT);
        let engine = SymbolEngine::new();

        let refs = engine
            .find_references_by_name(
                &[dir.path().to_path_buf()],
                &service,
                "processData",
                ReferenceScope::Project,
                true,
            )
            .unwrap();
        assert_eq!(refs.len(), 3);
        let definition: Vec<_> = refs.iter().filter(|r| r.is_definition).collect();
        assert_eq!(definition.len(), 1);
        assert!(definition[0].path.ends_with("Service.java"));

        let usages = engine
            .find_references_by_name(
                &[dir.path().to_path_buf()],
                &service,
                "processData",
                ReferenceScope::Project,
                false,
            )
            .unwrap();
        assert_eq!(usages.len(), 2);
    }

    #[test]
    fn resolve_definition_crosses_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "Service.java", SERVICE);
        let client = write(&dir, "Client.java", CLIENT);
        let engine = SymbolEngine::new();

        // Cursor on the first call site's `processData`.
        let symbol = engine
            .resolve_definition(&[dir.path().to_path_buf()], &client, 5, 17)
            .unwrap();
        assert_eq!(symbol.name, "processData");
        assert!(symbol.location.path.ends_with("Service.java"));
        assert_eq!(symbol.parent.as_deref(), Some("Service"));
    }

    #[test]
    fn unknown_symbol_suggests_nearby_names() {
        let dir = TempDir::new().unwrap();
        let service = write(&dir, "Service.java", SERVICE);
        let engine = SymbolEngine::new();
        let err = engine
            .locate_symbol(
                &[dir.path().to_path_buf()],
                Some(&service),
                "procesData",
                None,
            )
            .unwrap_err();
        match err {
            NtsError::SymbolNotFound { suggestions, .. } => {
                assert!(suggestions.contains(&"processData".to_string()));
            }
            other => panic!("expected SymbolNotFound, got {other}"),
        }
    }

    #[test]
    fn non_identifier_names_are_rejected_for_text_scan() {
        assert!(word_pattern("a.b").is_err());
        assert!(word_pattern("processData").is_ok());
    }
}
