//! File-level operations the tool layer exposes: token-gated reads and
//! edits, create/delete/move, all mediated by the transaction manager.
//!
//! This is where the control flow of a mutating request lives: external
//! change detection on the read path, LAT validation before any byte moves,
//! transaction begin/backup/commit around the write, token invalidation and
//! reissue after it.

use std::path::Path;

use chrono::Utc;

use crate::encoding;
use crate::error::NtsError;
use crate::error::Result;
use crate::tasks::TaskState;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// One line-range operation inside an edit request. `content == None`
/// deletes the range.
#[derive(Debug, Clone)]
pub struct EditOp {
    pub start_line: usize,
    pub end_line: usize,
    pub content: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReadOutcome {
    pub content: String,
    pub charset: &'static str,
    pub token: String,
    pub total_lines: usize,
    pub external_entry: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub transaction_id: Option<i64>,
    pub new_token: Option<String>,
    pub changed: bool,
}

/// Read a file and issue a full-access token for what was read.
pub fn read_file(
    state: &mut TaskState,
    path: &Path,
    fallback: &'static encoding_rs::Encoding,
) -> Result<ReadOutcome> {
    let external_entry = state.record_external_if_changed(path)?;
    let decoded = encoding::read_text(path, fallback)?;
    let total_lines = decoded.text.lines().count().max(1);
    let token = state.tokens.register_read(
        &path.to_string_lossy(),
        1,
        total_lines,
        &decoded.text,
        total_lines,
        now_ms(),
    )?;
    Ok(ReadOutcome {
        content: decoded.text,
        charset: decoded.charset,
        token,
        total_lines,
        external_entry,
    })
}

/// Apply line-range edits under token protection. The token must cover
/// every edited range at the file's current content.
pub fn edit_file(
    state: &mut TaskState,
    path: &Path,
    ops: &[EditOp],
    token: Option<&str>,
    fallback: &'static encoding_rs::Encoding,
) -> Result<EditOutcome> {
    if ops.is_empty() {
        return Err(NtsError::InvalidArgument(
            "edit requires at least one operation".to_string(),
        ));
    }
    let path_str = path.to_string_lossy().into_owned();
    state.record_external_if_changed(path)?;
    let decoded = encoding::read_text(path, fallback)?;
    let current = decoded.text;
    let total_lines = current.lines().count();

    for op in ops {
        if op.start_line == 0 || op.end_line < op.start_line {
            return Err(NtsError::InvalidArgument(format!(
                "invalid line range {}-{}",
                op.start_line, op.end_line
            )));
        }
        if op.start_line > total_lines.max(1) {
            return Err(NtsError::InvalidArgument(format!(
                "startLine {} is past the end of the file ({} lines)",
                op.start_line, total_lines
            )));
        }
        state
            .tokens
            .validate(token, &path_str, op.start_line, op.end_line.min(total_lines.max(1)), &current)?;
    }

    // Apply bottom-up so earlier ranges keep their coordinates.
    let had_trailing_newline = current.ends_with('\n');
    let mut lines: Vec<String> = current.lines().map(|s| s.to_string()).collect();
    let mut sorted: Vec<&EditOp> = ops.iter().collect();
    sorted.sort_by(|a, b| b.start_line.cmp(&a.start_line));
    for op in sorted {
        let start = op.start_line - 1;
        let end = op.end_line.min(lines.len());
        let replacement: Vec<String> = match &op.content {
            Some(text) => text.lines().map(|s| s.to_string()).collect(),
            None => Vec::new(),
        };
        lines.splice(start..end, replacement);
    }
    let mut updated = lines.join("\n");
    if had_trailing_newline && !updated.is_empty() {
        updated.push('\n');
    }

    if updated == current {
        // Zero-length edit: nothing changes, nothing is invalidated.
        return Ok(EditOutcome {
            transaction_id: None,
            new_token: None,
            changed: false,
        });
    }

    state.begin(&format!("edit {path_str}"))?;
    let write = (|| -> Result<()> {
        state.backup(path)?;
        std::fs::write(path, updated.as_bytes())?;
        Ok(())
    })();
    if let Err(err) = write {
        state.rollback()?;
        return Err(err);
    }
    let transaction_id = state.commit(&format!("edit {path_str}"))?;

    // Every token that intersected an edited range dies; one fresh token
    // covering the new content is returned.
    let span_start = ops.iter().map(|o| o.start_line).min().unwrap_or(1);
    let span_end = ops.iter().map(|o| o.end_line).max().unwrap_or(1);
    state
        .tokens
        .invalidate_intersecting(&path_str, span_start, span_end);
    let new_token = state
        .tokens
        .register_full_access(&path_str, &updated, now_ms())?;

    Ok(EditOutcome {
        transaction_id,
        new_token: Some(new_token),
        changed: true,
    })
}

/// Create a new file inside a transaction; fails if it already exists.
pub fn create_file(state: &mut TaskState, path: &Path, content: &str) -> Result<EditOutcome> {
    if path.exists() {
        return Err(NtsError::InvalidArgument(format!(
            "{} already exists; edit it instead",
            path.display()
        )));
    }
    let path_str = path.to_string_lossy().into_owned();
    state.begin(&format!("create {path_str}"))?;
    let write = (|| -> Result<()> {
        state.backup(path)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content.as_bytes())?;
        Ok(())
    })();
    if let Err(err) = write {
        state.rollback()?;
        return Err(err);
    }
    let transaction_id = state.commit(&format!("create {path_str}"))?;
    let token = state
        .tokens
        .register_full_access(&path_str, content, now_ms())?;
    Ok(EditOutcome {
        transaction_id,
        new_token: Some(token),
        changed: true,
    })
}

/// Delete a file. Requires a token covering the entire current content:
/// deleting mutates every line.
pub fn delete_file(
    state: &mut TaskState,
    path: &Path,
    token: Option<&str>,
    fallback: &'static encoding_rs::Encoding,
) -> Result<EditOutcome> {
    let path_str = path.to_string_lossy().into_owned();
    state.record_external_if_changed(path)?;
    let decoded = encoding::read_text(path, fallback)?;
    let total = decoded.text.lines().count().max(1);
    state
        .tokens
        .validate(token, &path_str, 1, total, &decoded.text)?;

    state.begin(&format!("delete {path_str}"))?;
    let write = (|| -> Result<()> {
        state.backup(path)?;
        std::fs::remove_file(path)?;
        Ok(())
    })();
    if let Err(err) = write {
        state.rollback()?;
        return Err(err);
    }
    let transaction_id = state.commit(&format!("delete {path_str}"))?;
    state.tokens.delete_tokens(&path_str);
    Ok(EditOutcome {
        transaction_id,
        new_token: None,
        changed: true,
    })
}

/// Move/rename a file. Content is untouched, so no token is required; the
/// alias edge keeps previously-issued tokens valid at the new location.
pub fn move_file(state: &mut TaskState, path: &Path, target: &Path) -> Result<EditOutcome> {
    if target.exists() {
        return Err(NtsError::InvalidArgument(format!(
            "{} already exists",
            target.display()
        )));
    }
    let path_str = path.to_string_lossy().into_owned();
    let target_str = target.to_string_lossy().into_owned();

    state.begin(&format!("move {path_str} -> {target_str}"))?;
    let write = (|| -> Result<()> {
        state.backup(path)?;
        state.backup(target)?;
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::rename(path, target)?;
        Ok(())
    })();
    if let Err(err) = write {
        state.rollback()?;
        return Err(err);
    }
    // The alias edge belongs to the transaction: stamp it before the entry
    // so undo does not chase the rename it is about to unwind.
    state.tokens.move_tokens(&path_str, &target_str, now_ms())?;
    let transaction_id = state.commit(&format!("move {path_str} -> {target_str}"))?;
    Ok(EditOutcome {
        transaction_id,
        new_token: None,
        changed: true,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::journal::JournalStore;
    use crate::journal::Stack;
    use crate::tasks::TaskMeta;
    use crate::tokens::TokenSet;
    use encoding_rs::WINDOWS_1251;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn state_in(dir: &TempDir) -> TaskState {
        TaskState {
            journal: JournalStore::open_in_memory().unwrap(),
            tokens: TokenSet::new([5u8; 32]),
            open_transaction: None,
            meta: TaskMeta {
                id: "ops-test".to_string(),
                created_at_ms: 0,
                updated_at_ms: 0,
                working_dir: dir.path().to_path_buf(),
                active_todo: None,
                metadata: Default::default(),
            },
            background: Default::default(),
            undo_cap: 50,
        }
    }

    #[test]
    fn edit_without_token_is_rejected_and_file_untouched() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "Content").unwrap();

        let err = edit_file(
            &mut state,
            &path,
            &[EditOp {
                start_line: 1,
                end_line: 1,
                content: Some("New".to_string()),
            }],
            None,
            WINDOWS_1251,
        )
        .unwrap_err();
        assert!(err.to_string().contains("TOKEN_REQUIRED"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Content");
    }

    #[test]
    fn edit_with_token_writes_and_reissues() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        let path = dir.path().join("t.txt");
        std::fs::write(&path, "Original").unwrap();

        let read = read_file(&mut state, &path, WINDOWS_1251).unwrap();
        assert!(read.token.starts_with("LAT:"));

        let outcome = edit_file(
            &mut state,
            &path,
            &[EditOp {
                start_line: 1,
                end_line: 1,
                content: Some("Modified".to_string()),
            }],
            Some(&read.token),
            WINDOWS_1251,
        )
        .unwrap();
        assert!(outcome.changed);
        assert!(outcome.new_token.as_deref().unwrap().starts_with("LAT:"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Modified");

        // The consumed token is now stale.
        let err = edit_file(
            &mut state,
            &path,
            &[EditOp {
                start_line: 1,
                end_line: 1,
                content: Some("Again".to_string()),
            }],
            Some(&read.token),
            WINDOWS_1251,
        )
        .unwrap_err();
        assert!(matches!(err, NtsError::TokenStale));
    }

    #[test]
    fn single_line_delete_keeps_numbering() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        let path = dir.path().join("d.txt");
        std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

        let read = read_file(&mut state, &path, WINDOWS_1251).unwrap();
        let outcome = edit_file(
            &mut state,
            &path,
            &[EditOp {
                start_line: 2,
                end_line: 2,
                content: None,
            }],
            Some(&read.token),
            WINDOWS_1251,
        )
        .unwrap();
        assert!(outcome.changed);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "one\nthree\n");
    }

    #[test]
    fn zero_length_edit_leaves_tokens_alive() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        let path = dir.path().join("z.txt");
        std::fs::write(&path, "same\n").unwrap();

        let read = read_file(&mut state, &path, WINDOWS_1251).unwrap();
        let outcome = edit_file(
            &mut state,
            &path,
            &[EditOp {
                start_line: 1,
                end_line: 1,
                content: Some("same".to_string()),
            }],
            Some(&read.token),
            WINDOWS_1251,
        )
        .unwrap();
        assert!(!outcome.changed);
        assert!(outcome.new_token.is_none());

        // The original token still validates.
        let again = edit_file(
            &mut state,
            &path,
            &[EditOp {
                start_line: 1,
                end_line: 1,
                content: Some("different".to_string()),
            }],
            Some(&read.token),
            WINDOWS_1251,
        )
        .unwrap();
        assert!(again.changed);
    }

    #[test]
    fn binary_files_are_rejected_before_any_token_exists() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        let path = dir.path().join("bin.dat");
        std::fs::write(&path, b"\x00\x01\x02").unwrap();

        let err = read_file(&mut state, &path, WINDOWS_1251).unwrap_err();
        assert!(matches!(err, NtsError::Binary { .. }));
        assert_eq!(state.tokens.live_count(&path.to_string_lossy()), 0);
    }

    #[test]
    fn move_then_undo_restores_source() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        let source = dir.path().join("source.txt");
        let target = dir.path().join("sub").join("target.txt");
        std::fs::write(&source, "move me").unwrap();

        move_file(&mut state, &source, &target).unwrap();
        assert!(!source.exists());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "move me");

        let outcome = state.smart_undo(dir.path()).unwrap();
        assert!(!outcome.stuck, "skipped: {:?}", outcome.skipped);
        assert_eq!(std::fs::read_to_string(&source).unwrap(), "move me");
        assert!(!target.exists());
    }

    #[test]
    fn create_and_delete_round_trip_through_the_journal() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(&dir);
        let path = dir.path().join("fresh.txt");

        create_file(&mut state, &path, "hello\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");

        let read = read_file(&mut state, &path, WINDOWS_1251).unwrap();
        delete_file(&mut state, &path, Some(&read.token), WINDOWS_1251).unwrap();
        assert!(!path.exists());
        assert_eq!(state.journal.count_entries(Stack::Undo).unwrap(), 2);

        // Undo the delete, then the create.
        state.smart_undo(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
        state.smart_undo(dir.path()).unwrap();
        assert!(!path.exists());
    }
}
