//! Transaction lifecycle: begin/backup/commit/rollback, checkpoints, Smart
//! Undo/Redo, bounded retention, and external-modification records.
//!
//! The journal store is the commit point. An open transaction holds
//! pre-images in memory; commit turns them into one TRANSACTION entry with
//! snapshots and diff stats, rollback writes them straight back to disk.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use chrono::Utc;
use ignore::WalkBuilder;
use tracing::debug;
use tracing::warn;

use crate::crc::crc32c_bytes;
use crate::crc::crc32c_file;
use crate::diff::apply_unified_diff;
use crate::diff::changed_regions;
use crate::diff::line_stats;
use crate::diff::unified_diff;
use crate::error::NtsError;
use crate::error::Result;
use crate::git::find_git_root;
use crate::journal::EntryType;
use crate::journal::FileSnapshot;
use crate::journal::JournalEntry;
use crate::journal::NewEntry;
use crate::journal::STATUS_STUCK;
use crate::journal::Stack;
use crate::tasks::COUNTER_EDITS_SINCE_VERIFY;
use crate::tasks::COUNTER_TOTAL_EDITS;
use crate::tasks::TaskState;

/// Marker stored in a diff stat's affected-blocks column when the
/// transaction created or deleted the file outright.
pub const BLOCKS_FILE_CREATED: &str = "file created";
pub const BLOCKS_FILE_DELETED: &str = "file deleted";

/// Pre-image captured by `backup`. `content == None` records that the file
/// did not exist when the transaction first touched it.
#[derive(Debug, Clone)]
pub struct Backup {
    pub content: Option<Vec<u8>>,
    pub crc: u32,
    pub size: i64,
}

#[derive(Debug)]
pub struct OpenTransaction {
    pub instruction: String,
    pub backups: BTreeMap<String, Backup>,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// What Smart Undo managed to do.
#[derive(Debug, Clone)]
pub struct UndoOutcome {
    pub entry_id: i64,
    pub description: Option<String>,
    pub restored: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    pub stuck: bool,
    pub git_hint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RedoOutcome {
    pub entry_id: i64,
    pub description: Option<String>,
    pub restored: Vec<String>,
    pub stuck: bool,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn crc_key(path: &str) -> String {
    format!("crc:{path}")
}

fn write_creating_dirs(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, bytes)
}

fn mtime_ms(path: &Path) -> Option<i64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(since_epoch.as_millis() as i64)
}

impl TaskState {
    // ------------------------------------------------------------------
    // begin / backup / commit / rollback
    // ------------------------------------------------------------------

    pub fn begin(&mut self, instruction: &str) -> Result<()> {
        if self.open_transaction.is_some() {
            return Err(NtsError::Internal(
                "a transaction is already open for this task".to_string(),
            ));
        }
        self.open_transaction = Some(OpenTransaction {
            instruction: instruction.to_string(),
            backups: BTreeMap::new(),
        });
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.open_transaction.is_some()
    }

    /// Record the pre-image of `path`. Idempotent for a given path within
    /// the same transaction: the first snapshot wins.
    pub fn backup(&mut self, path: &Path) -> Result<()> {
        let key = path.to_string_lossy().into_owned();
        let txn = self
            .open_transaction
            .as_mut()
            .ok_or_else(|| NtsError::Internal("backup outside of a transaction".to_string()))?;
        if txn.backups.contains_key(&key) {
            return Ok(());
        }
        let backup = if path.exists() {
            let content = std::fs::read(path)?;
            Backup {
                crc: crc32c_bytes(&content),
                size: content.len() as i64,
                content: Some(content),
            }
        } else {
            Backup {
                content: None,
                crc: 0,
                size: 0,
            }
        };
        txn.backups.insert(key, backup);
        Ok(())
    }

    /// Close the transaction, writing one TRANSACTION entry with snapshots
    /// and diff stats for every file whose content actually changed.
    /// Returns the new entry id, or `None` when nothing changed.
    pub fn commit(&mut self, description: &str) -> Result<Option<i64>> {
        self.commit_inner(description, true)
    }

    fn commit_inner(&mut self, description: &str, clear_redo: bool) -> Result<Option<i64>> {
        let txn = self
            .open_transaction
            .take()
            .ok_or_else(|| NtsError::Internal("commit outside of a transaction".to_string()))?;

        struct Changed {
            path: String,
            pre: Option<Vec<u8>>,
            pre_crc: u32,
            pre_size: i64,
            post: Option<Vec<u8>>,
        }

        let mut changed: Vec<Changed> = Vec::new();
        for (path, backup) in txn.backups {
            let post = {
                let p = Path::new(&path);
                if p.exists() { Some(std::fs::read(p)?) } else { None }
            };
            if post == backup.content {
                continue;
            }
            changed.push(Changed {
                path,
                pre: backup.content,
                pre_crc: backup.crc,
                pre_size: backup.size,
                post,
            });
        }

        if changed.is_empty() {
            debug!("transaction closed with no effective changes");
            return Ok(None);
        }

        let position = self.journal.get_max_position(Stack::Undo)? + 1;
        let entry_id = self.journal.insert_entry(
            Stack::Undo,
            EntryType::Transaction,
            position,
            now_ms(),
            NewEntry {
                description: Some(description.to_string()),
                instruction: Some(txn.instruction),
                ..NewEntry::default()
            },
        )?;

        for change in &changed {
            self.journal.insert_snapshot(
                entry_id,
                &change.path,
                change.pre.as_deref(),
                change.pre_size,
                change.pre_crc,
            )?;

            let pre_text = change
                .pre
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            let post_text = change
                .post
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            let diff = unified_diff(&pre_text, &post_text, &change.path);
            let (added, deleted) = line_stats(&diff);
            let blocks = if change.pre.is_none() {
                BLOCKS_FILE_CREATED.to_string()
            } else if change.post.is_none() {
                BLOCKS_FILE_DELETED.to_string()
            } else {
                changed_regions(&diff)
            };
            self.journal.insert_diff_stats(
                entry_id,
                &change.path,
                added as i64,
                deleted as i64,
                &blocks,
                Some(&diff),
            )?;

            match &change.post {
                Some(bytes) => self
                    .journal
                    .set_metadata(&crc_key(&change.path), &crc32c_bytes(bytes).to_string())?,
                None => self.journal.delete_metadata(&crc_key(&change.path))?,
            }
        }

        if clear_redo {
            self.journal.clear_stack(Stack::Redo)?;
        }
        self.journal.increment_counter(COUNTER_TOTAL_EDITS)?;
        self.journal.increment_counter(COUNTER_EDITS_SINCE_VERIFY)?;

        // Bounded retention.
        while self.journal.count_entries(Stack::Undo)? > self.undo_cap as i64 {
            self.journal.delete_oldest_entry(Stack::Undo)?;
        }

        Ok(Some(entry_id))
    }

    /// Abort: restore every backed-up file and discard the transaction.
    /// Invoked by the adapter on any error escaping an operation body. If a
    /// pre-image cannot be restored the failure is journaled as a STUCK
    /// transaction and upgraded to an internal error.
    pub fn rollback(&mut self) -> Result<()> {
        let Some(txn) = self.open_transaction.take() else {
            return Ok(());
        };
        let mut first_error: Option<NtsError> = None;
        for (path, backup) in &txn.backups {
            let target = Path::new(path);
            let outcome = match &backup.content {
                Some(bytes) => write_creating_dirs(target, bytes),
                None => {
                    if target.exists() {
                        std::fs::remove_file(target)
                    } else {
                        Ok(())
                    }
                }
            };
            if let Err(e) = outcome {
                warn!("rollback failed to restore {path}: {e}");
                if first_error.is_none() {
                    first_error = Some(NtsError::Internal(format!(
                        "rollback could not restore {path}: {e}"
                    )));
                }
            }
        }
        match first_error {
            Some(err) => {
                // Keep the pre-images around so a later undo can retry.
                let position = self.journal.get_max_position(Stack::Undo)? + 1;
                let entry_id = self.journal.insert_entry(
                    Stack::Undo,
                    EntryType::Transaction,
                    position,
                    now_ms(),
                    NewEntry {
                        description: Some("rollback failed".to_string()),
                        status: Some(STATUS_STUCK.to_string()),
                        instruction: Some(txn.instruction),
                        ..NewEntry::default()
                    },
                )?;
                for (path, backup) in &txn.backups {
                    self.journal.insert_snapshot(
                        entry_id,
                        path,
                        backup.content.as_deref(),
                        backup.size,
                        backup.crc,
                    )?;
                }
                Err(err)
            }
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // checkpoints
    // ------------------------------------------------------------------

    pub fn create_checkpoint(&mut self, name: &str) -> Result<i64> {
        let position = self.journal.get_max_position(Stack::Undo)? + 1;
        let id = self.journal.insert_entry(
            Stack::Undo,
            EntryType::Checkpoint,
            position,
            now_ms(),
            NewEntry {
                checkpoint_name: Some(name.to_string()),
                description: Some(format!("checkpoint '{name}'")),
                ..NewEntry::default()
            },
        )?;
        Ok(id)
    }

    /// Undo every TRANSACTION above the named checkpoint, moving the
    /// undone entries to REDO. The rollback itself is recorded as a new
    /// TRANSACTION entry (which deliberately does not clear REDO).
    pub fn rollback_to_checkpoint(&mut self, name: &str) -> Result<Vec<String>> {
        let position = self
            .journal
            .find_checkpoint_position(Stack::Undo, name)?
            .ok_or_else(|| NtsError::CheckpointNotFound(name.to_string()))?;

        let entries = self.journal.get_entries_after_position(Stack::Undo, position)?;
        self.begin(&format!("rollback to checkpoint '{name}'"))?;

        let result = (|| -> Result<Vec<String>> {
            let mut restored = Vec::new();
            for entry in &entries {
                if entry.entry_type == EntryType::Transaction {
                    for snapshot in self.journal.get_snapshots(entry.id)? {
                        let target =
                            PathBuf::from(self.resolve_snapshot_target(&snapshot, entry));
                        self.backup(&target)?;
                        self.restore_preimage(&snapshot, &target)?;
                        restored.push(target.to_string_lossy().into_owned());
                    }
                }
                let redo_position = self.journal.get_max_position(Stack::Redo)? + 1;
                self.journal.move_entry(entry.id, Stack::Redo, redo_position)?;
            }
            Ok(restored)
        })();

        match result {
            Ok(restored) => {
                self.commit_inner(&format!("rollback to checkpoint '{name}'"), false)?;
                Ok(restored)
            }
            Err(err) => {
                self.rollback()?;
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Smart Undo / Redo
    // ------------------------------------------------------------------

    pub fn smart_undo(&mut self, working_root: &Path) -> Result<UndoOutcome> {
        loop {
            let Some(entry) = self.journal.get_last_entry(Stack::Undo)? else {
                return Err(NtsError::NoOperationsToUndo);
            };
            match entry.entry_type {
                EntryType::Checkpoint => {
                    // Checkpoints ride along so positions stay gap-free.
                    let redo_position = self.journal.get_max_position(Stack::Redo)? + 1;
                    self.journal.move_entry(entry.id, Stack::Redo, redo_position)?;
                }
                EntryType::External => {
                    self.journal.set_entry_status(entry.id, STATUS_STUCK)?;
                    let redo_position = self.journal.get_max_position(Stack::Redo)? + 1;
                    self.journal.move_entry(entry.id, Stack::Redo, redo_position)?;
                    return Ok(UndoOutcome {
                        entry_id: entry.id,
                        description: entry.description.clone(),
                        restored: Vec::new(),
                        skipped: vec![SkippedFile {
                            path: entry.affected_path.clone().unwrap_or_default(),
                            reason: "change was made outside mediation".to_string(),
                        }],
                        stuck: true,
                        git_hint: None,
                    });
                }
                EntryType::Transaction => return self.undo_transaction(&entry, working_root),
            }
        }
    }

    fn undo_transaction(
        &mut self,
        entry: &JournalEntry,
        working_root: &Path,
    ) -> Result<UndoOutcome> {
        let snapshots = self.journal.get_snapshots(entry.id)?;
        let recorded: BTreeSet<String> = snapshots
            .iter()
            .map(|s| self.resolve_snapshot_target(s, entry))
            .collect();
        // Paths the transaction itself deleted: their absence is expected
        // and must not trigger CRC recovery.
        let deleted_by_txn: BTreeSet<String> = self
            .journal
            .get_diff_stats(entry.id)?
            .iter()
            .filter(|s| s.affected_blocks == BLOCKS_FILE_DELETED)
            .map(|s| s.path.clone())
            .collect();

        let mut restored = Vec::new();
        let mut skipped = Vec::new();
        let mut missing_paths = Vec::new();
        let mut created_targets: BTreeSet<String> = BTreeSet::new();

        for snapshot in &snapshots {
            let target_str = self.resolve_snapshot_target(snapshot, entry);
            let target = PathBuf::from(&target_str);

            if snapshot.was_created() {
                if target.exists() {
                    std::fs::remove_file(&target)?;
                }
                self.journal.delete_metadata(&crc_key(&target_str))?;
                created_targets.insert(target_str.clone());
                restored.push(target_str);
                continue;
            }

            if target.exists() {
                if let Some(dirt) =
                    newest_unrecorded_sibling(&target, entry.timestamp_ms, &recorded)
                {
                    skipped.push(SkippedFile {
                        path: target_str.clone(),
                        reason: format!(
                            "directory contains unrecorded newer file {dirt}"
                        ),
                    });
                    continue;
                }
                self.restore_preimage(snapshot, &target)?;
                restored.push(target_str);
                continue;
            }

            if deleted_by_txn.contains(&snapshot.path) {
                // Undo of a deletion: materialise the pre-image again.
                self.restore_preimage(snapshot, &target)?;
                restored.push(target_str);
                continue;
            }

            // Target is gone: try to find the file by its pre-image CRC.
            match find_unique_crc_match(working_root, snapshot.crc) {
                Some(found) => {
                    self.restore_preimage(snapshot, &found)?;
                    restored.push(found.to_string_lossy().into_owned());
                }
                None => {
                    missing_paths.push(target_str.clone());
                    skipped.push(SkippedFile {
                        path: target_str,
                        reason: "file is missing and no CRC match was found".to_string(),
                    });
                }
            }
        }

        // A restored source whose alias chain ends at a deleted created file
        // was a move we just unwound; drop the edge.
        for snapshot in &snapshots {
            if !snapshot.was_created()
                && created_targets.contains(&self.tokens.aliases().resolve(&snapshot.path))
            {
                self.tokens.aliases_mut().unregister(&snapshot.path);
            }
        }

        let git_hint = if missing_paths.is_empty() {
            None
        } else {
            find_git_root(working_root).map(|_| {
                format!(
                    "a git repository is available; `git log --all -- {}` may locate the content",
                    missing_paths.join(" ")
                )
            })
        };

        if skipped.is_empty() {
            let redo_position = self.journal.get_max_position(Stack::Redo)? + 1;
            self.journal.move_entry(entry.id, Stack::Redo, redo_position)?;
            Ok(UndoOutcome {
                entry_id: entry.id,
                description: entry.description.clone(),
                restored,
                skipped,
                stuck: false,
                git_hint,
            })
        } else {
            // Partial undo: the entry stays on UNDO, marked STUCK, so a
            // later attempt can finish the job once the tree settles.
            self.journal.set_entry_status(entry.id, STATUS_STUCK)?;
            Ok(UndoOutcome {
                entry_id: entry.id,
                description: entry.description.clone(),
                restored,
                skipped,
                stuck: true,
                git_hint,
            })
        }
    }

    pub fn redo(&mut self) -> Result<RedoOutcome> {
        loop {
            let Some(entry) = self.journal.get_last_entry(Stack::Redo)? else {
                return Err(NtsError::NoOperationsToRedo);
            };
            let undo_position = self.journal.get_max_position(Stack::Undo)? + 1;
            match entry.entry_type {
                EntryType::Checkpoint => {
                    self.journal.move_entry(entry.id, Stack::Undo, undo_position)?;
                }
                EntryType::External => {
                    self.journal.set_entry_status(entry.id, STATUS_STUCK)?;
                    self.journal.move_entry(entry.id, Stack::Undo, undo_position)?;
                    return Ok(RedoOutcome {
                        entry_id: entry.id,
                        description: entry.description.clone(),
                        restored: Vec::new(),
                        stuck: true,
                    });
                }
                EntryType::Transaction => {
                    let outcome = self.redo_transaction(&entry)?;
                    self.journal.move_entry(entry.id, Stack::Undo, undo_position)?;
                    return Ok(outcome);
                }
            }
        }
    }

    fn redo_transaction(&mut self, entry: &JournalEntry) -> Result<RedoOutcome> {
        let stats = self.journal.get_diff_stats(entry.id)?;
        let mut restored = Vec::new();
        for stat in &stats {
            let target_str = self
                .tokens
                .aliases()
                .resolve_since(&stat.path, entry.timestamp_ms);
            let target = PathBuf::from(&target_str);

            if stat.affected_blocks == BLOCKS_FILE_DELETED {
                if target.exists() {
                    std::fs::remove_file(&target)?;
                }
                self.journal.delete_metadata(&crc_key(&target_str))?;
                restored.push(target_str);
                continue;
            }

            let current = if target.exists() {
                String::from_utf8_lossy(&std::fs::read(&target)?).into_owned()
            } else {
                String::new()
            };
            let Some(diff) = &stat.unified_diff else {
                continue;
            };
            let next = apply_unified_diff(&current, diff)?;
            write_creating_dirs(&target, next.as_bytes())?;
            self.journal
                .set_metadata(&crc_key(&target_str), &crc32c_bytes(next.as_bytes()).to_string())?;
            restored.push(target_str);
        }
        Ok(RedoOutcome {
            entry_id: entry.id,
            description: entry.description.clone(),
            restored,
            stuck: false,
        })
    }

    // ------------------------------------------------------------------
    // external modifications
    // ------------------------------------------------------------------

    /// Compare the file's current CRC against the most recently recorded
    /// post-image; append an EXTERNAL entry when they differ. Called on the
    /// read path before any edit proceeds.
    pub fn record_external_if_changed(&mut self, path: &Path) -> Result<Option<i64>> {
        let path_str = path.to_string_lossy().into_owned();
        let Some(recorded_raw) = self.journal.get_metadata(&crc_key(&path_str))? else {
            return Ok(None);
        };
        let recorded: u32 = recorded_raw
            .parse()
            .map_err(|_| NtsError::Internal(format!("corrupt crc metadata for {path_str}")))?;

        let current = if path.exists() {
            Some(crc32c_file(path)?)
        } else {
            None
        };
        if current == Some(recorded) {
            return Ok(None);
        }

        debug!(path = %path_str, "external modification detected");
        let position = self.journal.get_max_position(Stack::Undo)? + 1;
        let entry_id = self.journal.insert_entry(
            Stack::Undo,
            EntryType::External,
            position,
            now_ms(),
            NewEntry {
                description: Some(format!("external modification of {path_str}")),
                affected_path: Some(path_str.clone()),
                previous_crc: Some(recorded),
                current_crc: current,
                ..NewEntry::default()
            },
        )?;
        match current {
            Some(crc) => self
                .journal
                .set_metadata(&crc_key(&path_str), &crc.to_string())?,
            None => self.journal.delete_metadata(&crc_key(&path_str))?,
        }
        Ok(Some(entry_id))
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    fn resolve_snapshot_target(&self, snapshot: &FileSnapshot, entry: &JournalEntry) -> String {
        self.tokens
            .aliases()
            .resolve_since(&snapshot.path, entry.timestamp_ms)
    }

    fn restore_preimage(&mut self, snapshot: &FileSnapshot, target: &Path) -> Result<()> {
        match &snapshot.content {
            Some(bytes) => {
                write_creating_dirs(target, bytes)?;
                self.journal.set_metadata(
                    &crc_key(&target.to_string_lossy()),
                    &snapshot.crc.to_string(),
                )?;
            }
            None => {
                if target.exists() {
                    std::fs::remove_file(target)?;
                }
                self.journal
                    .delete_metadata(&crc_key(&target.to_string_lossy()))?;
            }
        }
        Ok(())
    }
}

/// First regular file in `target`'s directory that is newer than the entry
/// and not part of its snapshot set ("dirty directory" probe).
fn newest_unrecorded_sibling(
    target: &Path,
    entry_ts_ms: i64,
    recorded: &BTreeSet<String>,
) -> Option<String> {
    let dir = target.parent()?;
    let entries = std::fs::read_dir(dir).ok()?;
    for item in entries.flatten() {
        let path = item.path();
        if !path.is_file() {
            continue;
        }
        let path_str = path.to_string_lossy().into_owned();
        if recorded.contains(&path_str) {
            continue;
        }
        if mtime_ms(&path).is_some_and(|ts| ts > entry_ts_ms) {
            return Some(path_str);
        }
    }
    None
}

/// Scan the working tree for exactly one file whose CRC matches; more than
/// one match is treated as no match.
fn find_unique_crc_match(working_root: &Path, needle: u32) -> Option<PathBuf> {
    let mut found: Option<PathBuf> = None;
    for entry in WalkBuilder::new(working_root).build().flatten() {
        let path = entry.path();
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        match crc32c_file(path) {
            Ok(crc) if crc == needle => {
                if found.is_some() {
                    return None;
                }
                found = Some(path.to_path_buf());
            }
            _ => {}
        }
    }
    found
}
