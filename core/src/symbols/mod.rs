//! Language-aware symbol extraction and reference search, backed by
//! tree-sitter. Parse results are cached process-wide keyed by
//! (path, size, mtime, crc) so cross-task reads stay safe; the transaction
//! layer invalidates entries after every commit.

mod language;
mod references;

pub use language::LanguageId;
pub(crate) use language::split_top_level;
pub use references::ReferenceScope;
pub(crate) use references::word_pattern;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::MutexGuard;

use serde::Deserialize;
use serde::Serialize;
use tracing::trace;
use tree_sitter::Node;
use tree_sitter::Parser;
use tree_sitter::Tree;

use crate::crc::crc32c_bytes;
use crate::error::NtsError;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Class,
    Interface,
    Method,
    Function,
    Field,
    Variable,
    Parameter,
    Struct,
    Enum,
    TypeAlias,
}

/// 1-based lines, 0-based columns, matching editor conventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpan {
    pub path: String,
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    pub language: LanguageId,
    pub name: String,
    pub kind: SymbolKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docstring: Option<String>,
    pub location: SourceSpan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// One place a name is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub line_text: String,
    pub is_definition: bool,
}

struct CachedParse {
    size: u64,
    mtime_ms: i64,
    crc: u32,
    content: String,
    tree: Tree,
    language: LanguageId,
}

/// A parse result handed out to callers: content plus a private copy of the
/// tree (tree-sitter trees are cheap to copy).
pub struct ParsedFile {
    pub language: LanguageId,
    pub content: String,
    pub tree: Tree,
}

#[derive(Default)]
pub struct SymbolEngine {
    cache: Mutex<HashMap<String, CachedParse>>,
}

impl SymbolEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `path`, reusing the cache when (size, mtime, crc) still match.
    pub fn parse(&self, path: &Path) -> Result<ParsedFile> {
        let language = LanguageId::from_path(path).ok_or_else(|| {
            NtsError::UnsupportedLanguage(
                path.extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.to_string_lossy().into_owned()),
            )
        })?;

        let key = path.to_string_lossy().into_owned();
        let metadata = std::fs::metadata(path)?;
        let size = metadata.len();
        let mtime_ms = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        {
            let cache = self.lock_cache();
            if let Some(hit) = cache.get(&key) {
                if hit.size == size && hit.mtime_ms == mtime_ms && hit.language == language {
                    trace!(path = %key, "parse cache hit");
                    return Ok(ParsedFile {
                        language,
                        content: hit.content.clone(),
                        tree: hit.tree.clone(),
                    });
                }
            }
        }

        let bytes = std::fs::read(path)?;
        let crc = crc32c_bytes(&bytes);

        // mtime or size moved but the bytes did not: refresh the stamps and
        // keep the old tree instead of reparsing.
        {
            let mut cache = self.lock_cache();
            if let Some(hit) = cache.get_mut(&key) {
                if hit.crc == crc && hit.language == language {
                    hit.size = size;
                    hit.mtime_ms = mtime_ms;
                    return Ok(ParsedFile {
                        language,
                        content: hit.content.clone(),
                        tree: hit.tree.clone(),
                    });
                }
            }
        }

        let content = String::from_utf8_lossy(&bytes).into_owned();
        let tree = parse_content(language, &content)?;

        let mut cache = self.lock_cache();
        cache.insert(
            key,
            CachedParse {
                size,
                mtime_ms,
                crc,
                content: content.clone(),
                tree: tree.clone(),
                language,
            },
        );
        Ok(ParsedFile {
            language,
            content,
            tree,
        })
    }

    /// Parse in-memory content for preview flows; never touches the cache.
    pub fn parse_virtual(&self, path: &Path, content: &str) -> Result<ParsedFile> {
        let language = LanguageId::from_path(path).ok_or_else(|| {
            NtsError::UnsupportedLanguage(path.to_string_lossy().into_owned())
        })?;
        let tree = parse_content(language, content)?;
        Ok(ParsedFile {
            language,
            content: content.to_string(),
            tree,
        })
    }

    pub fn invalidate(&self, path: &Path) {
        self.lock_cache().remove(&path.to_string_lossy().into_owned());
    }

    pub fn clear(&self) {
        self.lock_cache().clear();
    }

    /// All definitions in a file, in source order.
    pub fn list_symbols(&self, path: &Path) -> Result<Vec<Symbol>> {
        let parsed = self.parse(path)?;
        Ok(collect_symbols(&parsed, &path.to_string_lossy()))
    }

    /// Definitions whose span contains the given point.
    pub fn symbols_at(&self, path: &Path, line: usize, column: usize) -> Result<Vec<Symbol>> {
        let symbols = self.list_symbols(path)?;
        Ok(symbols
            .into_iter()
            .filter(|s| span_contains(&s.location, line, column))
            .collect())
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<String, CachedParse>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn parse_content(language: LanguageId, content: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| NtsError::Internal(format!("failed to load {language:?} grammar: {e}")))?;
    parser
        .parse(content, None)
        .ok_or_else(|| NtsError::Internal(format!("{language:?} parser returned no tree")))
}

pub(crate) fn collect_symbols(parsed: &ParsedFile, path: &str) -> Vec<Symbol> {
    let mut symbols = Vec::new();
    walk_definitions(
        parsed.tree.root_node(),
        parsed.language,
        parsed.content.as_str(),
        path,
        None,
        &mut symbols,
    );
    symbols
}

fn walk_definitions(
    node: Node<'_>,
    language: LanguageId,
    source: &str,
    path: &str,
    parent: Option<&str>,
    out: &mut Vec<Symbol>,
) {
    let extracted = language.extract_symbol(node, source, path, parent);
    let next_parent: Option<String> = match &extracted {
        Some(symbol) if symbol.kind.is_container() => Some(symbol.name.clone()),
        _ => parent.map(|p| p.to_string()),
    };
    if let Some(symbol) = extracted {
        out.push(symbol);
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        walk_definitions(child, language, source, path, next_parent.as_deref(), out);
    }
}

impl SymbolKind {
    /// Containers become the `parent` of the symbols nested inside them.
    pub fn is_container(self) -> bool {
        matches!(
            self,
            SymbolKind::Class | SymbolKind::Interface | SymbolKind::Struct | SymbolKind::Enum
        )
    }
}

pub(crate) fn span_contains(span: &SourceSpan, line: usize, column: usize) -> bool {
    if line < span.start_line || line > span.end_line {
        return false;
    }
    if line == span.start_line && column < span.start_column {
        return false;
    }
    if line == span.end_line && column > span.end_column {
        return false;
    }
    true
}

/// Node span in editor coordinates.
pub(crate) fn node_span(node: Node<'_>, path: &str) -> SourceSpan {
    let start = node.start_position();
    let end = node.end_position();
    SourceSpan {
        path: path.to_string(),
        start_line: start.row + 1,
        start_column: start.column,
        end_line: end.row + 1,
        end_column: end.column,
    }
}
