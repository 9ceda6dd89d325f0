//! Unified-diff primitives: generation, verified application, line stats.
//!
//! Generation goes through `similar`; application is hand-verified so that a
//! single mismatched context line aborts with a diagnostic instead of
//! producing a silently wrong file. All functions here are pure.

use regex_lite::Regex;
use similar::TextDiff;

use crate::error::NtsError;
use crate::error::Result;

/// Standard unified diff with `a/<path>` / `b/<path>` headers and stable
/// hunk headers. Empty string when the texts are identical.
pub fn unified_diff(before: &str, after: &str, path: &str) -> String {
    if before == after {
        return String::new();
    }
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{path}"), &format!("b/{path}"))
        .to_string()
}

/// (lines added, lines deleted) for a unified diff text.
pub fn line_stats(diff: &str) -> (usize, usize) {
    let mut added = 0;
    let mut deleted = 0;
    for line in diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") || line.starts_with('\\') {
            continue;
        }
        match line.as_bytes().first() {
            Some(b'+') => added += 1,
            Some(b'-') => deleted += 1,
            _ => {}
        }
    }
    (added, deleted)
}

/// Human-readable summary of the regions a diff touches, e.g. `lines 4-9,
/// lines 20-20`. Used for the journal's affected-blocks column.
pub fn changed_regions(diff: &str) -> String {
    parse_hunks(diff)
        .map(|hunks| {
            hunks
                .iter()
                .map(|h| {
                    let end = h.old_start + h.old_len().saturating_sub(1).max(0);
                    format!("lines {}-{}", h.old_start, end.max(h.old_start))
                })
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq)]
enum DiffLine {
    Context(String),
    Delete(String),
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    /// 1-based first line of the hunk in the old text.
    old_start: usize,
    lines: Vec<DiffLine>,
    /// `\ No newline at end of file` seen after the last new-side line.
    new_missing_newline: bool,
    /// Same marker after the last old-side line.
    old_missing_newline: bool,
}

impl Hunk {
    fn old_len(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Context(_) | DiffLine::Delete(_)))
            .count()
    }
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>> {
    #[allow(clippy::expect_used)]
    let header = Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
        .expect("hunk header regex is valid");

    let mut hunks: Vec<Hunk> = Vec::new();
    for raw in diff.lines() {
        if raw.starts_with("---") || raw.starts_with("+++") {
            continue;
        }
        if let Some(caps) = header.captures(raw) {
            let old_start: usize = caps
                .get(1)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(1);
            hunks.push(Hunk {
                old_start: old_start.max(1),
                lines: Vec::new(),
                new_missing_newline: false,
                old_missing_newline: false,
            });
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            if raw.trim().is_empty() {
                continue;
            }
            return Err(NtsError::DiffConflict(format!(
                "diff line outside of any hunk: {raw:?}"
            )));
        };
        if let Some(rest) = raw.strip_prefix('+') {
            hunk.lines.push(DiffLine::Add(rest.to_string()));
        } else if let Some(rest) = raw.strip_prefix('-') {
            hunk.lines.push(DiffLine::Delete(rest.to_string()));
        } else if let Some(rest) = raw.strip_prefix(' ') {
            hunk.lines.push(DiffLine::Context(rest.to_string()));
        } else if raw.starts_with('\\') {
            match hunk.lines.last() {
                Some(DiffLine::Add(_)) => hunk.new_missing_newline = true,
                Some(DiffLine::Delete(_)) => hunk.old_missing_newline = true,
                Some(DiffLine::Context(_)) | None => {
                    hunk.new_missing_newline = true;
                    hunk.old_missing_newline = true;
                }
            }
        } else if raw.is_empty() {
            // Some producers emit a bare empty line for empty context.
            hunk.lines.push(DiffLine::Context(String::new()));
        } else {
            return Err(NtsError::DiffConflict(format!(
                "unrecognised diff line: {raw:?}"
            )));
        }
    }
    Ok(hunks)
}

/// Apply `diff` to `text`, verifying every context and deletion line.
pub fn apply_unified_diff(text: &str, diff: &str) -> Result<String> {
    if diff.trim().is_empty() {
        return Ok(text.to_string());
    }
    let hunks = parse_hunks(diff)?;
    if hunks.is_empty() {
        return Ok(text.to_string());
    }

    let ends_with_newline = text.ends_with('\n');
    let mut old_lines: Vec<&str> = text.split('\n').collect();
    if ends_with_newline {
        old_lines.pop();
    }
    if text.is_empty() {
        old_lines.clear();
    }

    let mut out: Vec<String> = Vec::new();
    let mut cursor = 0usize;
    let mut touched_eof = false;
    let mut new_missing_newline = false;

    for hunk in &hunks {
        let start = hunk.old_start.saturating_sub(1);
        if start < cursor {
            return Err(NtsError::DiffConflict(format!(
                "overlapping hunks at line {}",
                hunk.old_start
            )));
        }
        if start > old_lines.len() {
            return Err(NtsError::DiffConflict(format!(
                "hunk starts at line {} but the file has {} lines",
                hunk.old_start,
                old_lines.len()
            )));
        }
        out.extend(old_lines[cursor..start].iter().map(|s| s.to_string()));
        cursor = start;

        for line in &hunk.lines {
            match line {
                DiffLine::Context(expected) => {
                    let actual = old_lines.get(cursor).copied().unwrap_or_default();
                    if actual != expected {
                        return Err(context_mismatch(cursor + 1, expected, actual));
                    }
                    out.push(expected.clone());
                    cursor += 1;
                }
                DiffLine::Delete(expected) => {
                    let actual = old_lines.get(cursor).copied().unwrap_or_default();
                    if actual != expected {
                        return Err(context_mismatch(cursor + 1, expected, actual));
                    }
                    cursor += 1;
                }
                DiffLine::Add(added) => {
                    out.push(added.clone());
                }
            }
        }
        if cursor >= old_lines.len() {
            touched_eof = true;
            new_missing_newline = hunk.new_missing_newline;
        }
    }

    out.extend(old_lines[cursor..].iter().map(|s| s.to_string()));

    let mut result = out.join("\n");
    let wants_trailing = if touched_eof {
        !new_missing_newline
    } else {
        ends_with_newline
    };
    if wants_trailing && !result.is_empty() {
        result.push('\n');
    }
    if out.is_empty() {
        result.clear();
    }
    Ok(result)
}

fn context_mismatch(line: usize, expected: &str, actual: &str) -> NtsError {
    NtsError::DiffConflict(format!(
        "line {line}: expected {expected:?}, found {actual:?}"
    ))
}
