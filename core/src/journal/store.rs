//! SQLite-backed journal store. One connection per task, serialised by the
//! owning task context; mutating operations never run concurrently for a
//! given task.

use std::path::Path;

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use super::DiffStat;
use super::EntryType;
use super::FileSnapshot;
use super::JournalEntry;
use super::Stack;
use crate::error::NtsError;
use crate::error::Result;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    stack           TEXT    NOT NULL,
    entry_type      TEXT    NOT NULL,
    position        INTEGER NOT NULL,
    timestamp_ms    INTEGER NOT NULL,
    description     TEXT,
    status          TEXT,
    instruction     TEXT,
    checkpoint_name TEXT,
    affected_path   TEXT,
    previous_crc    INTEGER,
    current_crc     INTEGER,
    UNIQUE (stack, position)
);
CREATE TABLE IF NOT EXISTS snapshots (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id  INTEGER NOT NULL REFERENCES entries (id) ON DELETE CASCADE,
    path      TEXT    NOT NULL,
    content   BLOB,
    byte_size INTEGER NOT NULL,
    crc       INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS diff_stats (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    entry_id        INTEGER NOT NULL REFERENCES entries (id) ON DELETE CASCADE,
    path            TEXT    NOT NULL,
    lines_added     INTEGER NOT NULL,
    lines_deleted   INTEGER NOT NULL,
    affected_blocks TEXT    NOT NULL DEFAULT '',
    unified_diff    TEXT
);
CREATE TABLE IF NOT EXISTS metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS counters (
    key   TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_entries_stack_position ON entries (stack, position);
CREATE INDEX IF NOT EXISTS idx_snapshots_entry ON snapshots (entry_id);
CREATE INDEX IF NOT EXISTS idx_snapshots_path ON snapshots (path);
"#;

#[derive(Debug)]
pub struct JournalStore {
    conn: Connection,
}

/// Caller-supplied fields for a new entry; the store assigns the id.
#[derive(Debug, Default, Clone)]
pub struct NewEntry {
    pub description: Option<String>,
    pub status: Option<String>,
    pub instruction: Option<String>,
    pub checkpoint_name: Option<String>,
    pub affected_path: Option<String>,
    pub previous_crc: Option<u32>,
    pub current_crc: Option<u32>,
}

impl JournalStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Test hook: everything lives and dies with the connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ------------------------------------------------------------------
    // entries
    // ------------------------------------------------------------------

    pub fn insert_entry(
        &self,
        stack: Stack,
        entry_type: EntryType,
        position: i64,
        timestamp_ms: i64,
        fields: NewEntry,
    ) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO entries (stack, entry_type, position, timestamp_ms, description, \
             status, instruction, checkpoint_name, affected_path, previous_crc, current_crc) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                stack.as_str(),
                entry_type.as_str(),
                position,
                timestamp_ms,
                fields.description,
                fields.status,
                fields.instruction,
                fields.checkpoint_name,
                fields.affected_path,
                fields.previous_crc.map(|c| c as i64),
                fields.current_crc.map(|c| c as i64),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_entries(&self, stack: Stack) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, stack, entry_type, position, timestamp_ms, description, status, \
             instruction, checkpoint_name, affected_path, previous_crc, current_crc \
             FROM entries WHERE stack = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![stack.as_str()], row_to_entry)?;
        collect_entries(rows)
    }

    pub fn get_entry(&self, id: i64) -> Result<Option<JournalEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, stack, entry_type, position, timestamp_ms, description, status, \
                 instruction, checkpoint_name, affected_path, previous_crc, current_crc \
                 FROM entries WHERE id = ?1",
                params![id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    pub fn get_last_entry(&self, stack: Stack) -> Result<Option<JournalEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, stack, entry_type, position, timestamp_ms, description, status, \
                 instruction, checkpoint_name, affected_path, previous_crc, current_crc \
                 FROM entries WHERE stack = ?1 ORDER BY position DESC LIMIT 1",
                params![stack.as_str()],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// -1 when the stack is empty, so that `max + 1` is always the next slot.
    pub fn get_max_position(&self, stack: Stack) -> Result<i64> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(position) FROM entries WHERE stack = ?1",
            params![stack.as_str()],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(-1))
    }

    pub fn count_entries(&self, stack: Stack) -> Result<i64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE stack = ?1",
            params![stack.as_str()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn clear_stack(&self, stack: Stack) -> Result<()> {
        self.conn.execute(
            "DELETE FROM entries WHERE stack = ?1",
            params![stack.as_str()],
        )?;
        Ok(())
    }

    pub fn move_entry(&self, id: i64, new_stack: Stack, new_position: i64) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE entries SET stack = ?1, position = ?2 WHERE id = ?3",
            params![new_stack.as_str(), new_position, id],
        )?;
        if updated == 0 {
            return Err(NtsError::Internal(format!(
                "journal entry {id} vanished during move"
            )));
        }
        Ok(())
    }

    pub fn set_entry_status(&self, id: i64, status: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE entries SET status = ?1 WHERE id = ?2",
            params![status, id],
        )?;
        Ok(())
    }

    /// Bounded retention: drop the entry with the lowest position.
    pub fn delete_oldest_entry(&self, stack: Stack) -> Result<()> {
        self.conn.execute(
            "DELETE FROM entries WHERE id = (SELECT id FROM entries WHERE stack = ?1 \
             ORDER BY position ASC LIMIT 1)",
            params![stack.as_str()],
        )?;
        Ok(())
    }

    pub fn find_checkpoint_position(&self, stack: Stack, name: &str) -> Result<Option<i64>> {
        let position = self
            .conn
            .query_row(
                "SELECT position FROM entries WHERE stack = ?1 AND entry_type = 'CHECKPOINT' \
                 AND checkpoint_name = ?2 ORDER BY position DESC LIMIT 1",
                params![stack.as_str(), name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(position)
    }

    /// Entries strictly after `position`, newest first (rollback order).
    pub fn get_entries_after_position(
        &self,
        stack: Stack,
        position: i64,
    ) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, stack, entry_type, position, timestamp_ms, description, status, \
             instruction, checkpoint_name, affected_path, previous_crc, current_crc \
             FROM entries WHERE stack = ?1 AND position > ?2 ORDER BY position DESC",
        )?;
        let rows = stmt.query_map(params![stack.as_str(), position], row_to_entry)?;
        collect_entries(rows)
    }

    /// Union of both stacks ordered by timestamp (display only).
    pub fn get_all_entries(&self) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, stack, entry_type, position, timestamp_ms, description, status, \
             instruction, checkpoint_name, affected_path, previous_crc, current_crc \
             FROM entries ORDER BY timestamp_ms ASC, id ASC",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        collect_entries(rows)
    }

    /// Entries that touched `path`: snapshot parents plus EXTERNAL records.
    pub fn get_entries_for_file(&self, path: &str) -> Result<Vec<JournalEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT e.id, e.stack, e.entry_type, e.position, e.timestamp_ms, \
             e.description, e.status, e.instruction, e.checkpoint_name, e.affected_path, \
             e.previous_crc, e.current_crc \
             FROM entries e \
             LEFT JOIN snapshots s ON s.entry_id = e.id \
             WHERE s.path = ?1 OR (e.entry_type = 'EXTERNAL' AND e.affected_path = ?1) \
             ORDER BY e.timestamp_ms ASC, e.id ASC",
        )?;
        let rows = stmt.query_map(params![path], row_to_entry)?;
        collect_entries(rows)
    }

    pub fn get_all_affected_files(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT path FROM snapshots \
             UNION \
             SELECT DISTINCT affected_path FROM entries \
             WHERE entry_type = 'EXTERNAL' AND affected_path IS NOT NULL",
        )?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }
        files.sort();
        Ok(files)
    }

    // ------------------------------------------------------------------
    // snapshots / diff stats
    // ------------------------------------------------------------------

    pub fn insert_snapshot(
        &self,
        entry_id: i64,
        path: &str,
        content: Option<&[u8]>,
        byte_size: i64,
        crc: u32,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO snapshots (entry_id, path, content, byte_size, crc) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry_id, path, content, byte_size, crc as i64],
        )?;
        Ok(())
    }

    pub fn get_snapshots(&self, entry_id: i64) -> Result<Vec<FileSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, path, content, byte_size, crc FROM snapshots \
             WHERE entry_id = ?1 ORDER BY path ASC",
        )?;
        let rows = stmt.query_map(params![entry_id], |row| {
            Ok(FileSnapshot {
                entry_id: row.get(0)?,
                path: row.get(1)?,
                content: row.get(2)?,
                byte_size: row.get(3)?,
                crc: row.get::<_, i64>(4)? as u32,
            })
        })?;
        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    pub fn insert_diff_stats(
        &self,
        entry_id: i64,
        path: &str,
        lines_added: i64,
        lines_deleted: i64,
        affected_blocks: &str,
        unified_diff: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO diff_stats (entry_id, path, lines_added, lines_deleted, \
             affected_blocks, unified_diff) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry_id,
                path,
                lines_added,
                lines_deleted,
                affected_blocks,
                unified_diff
            ],
        )?;
        Ok(())
    }

    pub fn get_diff_stats(&self, entry_id: i64) -> Result<Vec<DiffStat>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, path, lines_added, lines_deleted, affected_blocks, unified_diff \
             FROM diff_stats WHERE entry_id = ?1 ORDER BY path ASC",
        )?;
        let rows = stmt.query_map(params![entry_id], |row| {
            Ok(DiffStat {
                entry_id: row.get(0)?,
                path: row.get(1)?,
                lines_added: row.get(2)?,
                lines_deleted: row.get(3)?,
                affected_blocks: row.get(4)?,
                unified_diff: row.get(5)?,
            })
        })?;
        let mut stats = Vec::new();
        for row in rows {
            stats.push(row?);
        }
        Ok(stats)
    }

    pub fn get_unified_diff(&self, entry_id: i64, path: &str) -> Result<Option<String>> {
        let diff = self
            .conn
            .query_row(
                "SELECT unified_diff FROM diff_stats WHERE entry_id = ?1 AND path = ?2",
                params![entry_id, path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(diff.flatten())
    }

    // ------------------------------------------------------------------
    // metadata / counters
    // ------------------------------------------------------------------

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn delete_metadata(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM metadata WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn set_counter(&self, key: &str, value: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO counters (key, value) VALUES (?1, ?2) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_counter(&self, key: &str) -> Result<i64> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM counters WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.unwrap_or(0))
    }

    pub fn increment_counter(&self, key: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO counters (key, value) VALUES (?1, 1) \
             ON CONFLICT (key) DO UPDATE SET value = value + 1",
            params![key],
        )?;
        self.get_counter(key)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<JournalEntry> {
    let stack_raw: String = row.get(1)?;
    let type_raw: String = row.get(2)?;
    Ok(JournalEntry {
        id: row.get(0)?,
        stack: Stack::parse(&stack_raw).unwrap_or(Stack::Undo),
        entry_type: EntryType::parse(&type_raw).unwrap_or(EntryType::Transaction),
        position: row.get(3)?,
        timestamp_ms: row.get(4)?,
        description: row.get(5)?,
        status: row.get(6)?,
        instruction: row.get(7)?,
        checkpoint_name: row.get(8)?,
        affected_path: row.get(9)?,
        previous_crc: row.get::<_, Option<i64>>(10)?.map(|c| c as u32),
        current_crc: row.get::<_, Option<i64>>(11)?.map(|c| c as u32),
    })
}

fn collect_entries(
    rows: impl Iterator<Item = rusqlite::Result<JournalEntry>>,
) -> Result<Vec<JournalEntry>> {
    let mut entries = Vec::new();
    for row in rows {
        entries.push(row?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> JournalStore {
        JournalStore::open_in_memory().unwrap()
    }

    fn push(store: &JournalStore, stack: Stack, position: i64) -> i64 {
        store
            .insert_entry(
                stack,
                EntryType::Transaction,
                position,
                1_000 + position,
                NewEntry {
                    description: Some(format!("entry {position}")),
                    ..NewEntry::default()
                },
            )
            .unwrap()
    }

    #[test]
    fn positions_are_unique_per_stack() {
        let store = store();
        push(&store, Stack::Undo, 0);
        let err = store.insert_entry(
            Stack::Undo,
            EntryType::Transaction,
            0,
            2_000,
            NewEntry::default(),
        );
        assert!(err.is_err(), "duplicate position must be rejected");
        // Same position on the other stack is fine.
        push(&store, Stack::Redo, 0);
    }

    #[test]
    fn entries_come_back_position_ordered() {
        let store = store();
        push(&store, Stack::Undo, 2);
        push(&store, Stack::Undo, 0);
        push(&store, Stack::Undo, 1);
        let entries = store.get_entries(Stack::Undo).unwrap();
        let positions: Vec<i64> = entries.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(store.get_max_position(Stack::Undo).unwrap(), 2);
        assert_eq!(store.get_max_position(Stack::Redo).unwrap(), -1);
    }

    #[test]
    fn move_entry_switches_stack() {
        let store = store();
        let id = push(&store, Stack::Undo, 0);
        store.move_entry(id, Stack::Redo, 5).unwrap();
        assert_eq!(store.count_entries(Stack::Undo).unwrap(), 0);
        let redo = store.get_entries(Stack::Redo).unwrap();
        assert_eq!(redo.len(), 1);
        assert_eq!(redo[0].position, 5);
    }

    #[test]
    fn snapshots_support_large_blobs_and_null_content() {
        let store = store();
        let id = push(&store, Stack::Undo, 0);
        let big = vec![0xABu8; 2 * 1024 * 1024];
        store
            .insert_snapshot(id, "big.bin", Some(&big), big.len() as i64, 7)
            .unwrap();
        store.insert_snapshot(id, "created.txt", None, 0, 0).unwrap();

        let snapshots = store.get_snapshots(id).unwrap();
        assert_eq!(snapshots.len(), 2);
        let by_path = |p: &str| snapshots.iter().find(|s| s.path == p).unwrap().clone();
        assert_eq!(by_path("big.bin").content.as_ref().unwrap().len(), big.len());
        assert!(by_path("created.txt").was_created());
    }

    #[test]
    fn checkpoint_lookup_and_entries_after() {
        let store = store();
        push(&store, Stack::Undo, 0);
        store
            .insert_entry(
                Stack::Undo,
                EntryType::Checkpoint,
                1,
                1_001,
                NewEntry {
                    checkpoint_name: Some("A".to_string()),
                    ..NewEntry::default()
                },
            )
            .unwrap();
        push(&store, Stack::Undo, 2);
        push(&store, Stack::Undo, 3);

        let pos = store
            .find_checkpoint_position(Stack::Undo, "A")
            .unwrap()
            .unwrap();
        assert_eq!(pos, 1);
        let after = store.get_entries_after_position(Stack::Undo, pos).unwrap();
        let positions: Vec<i64> = after.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![3, 2], "rollback wants newest first");
        assert!(
            store
                .find_checkpoint_position(Stack::Undo, "missing")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn per_file_history_unions_snapshots_and_external() {
        let store = store();
        let tx = push(&store, Stack::Undo, 0);
        store.insert_snapshot(tx, "a.txt", Some(b"x"), 1, 1).unwrap();
        store
            .insert_entry(
                Stack::Undo,
                EntryType::External,
                1,
                5_000,
                NewEntry {
                    affected_path: Some("a.txt".to_string()),
                    previous_crc: Some(1),
                    current_crc: Some(2),
                    ..NewEntry::default()
                },
            )
            .unwrap();

        let history = store.get_entries_for_file("a.txt").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].entry_type, EntryType::Transaction);
        assert_eq!(history[1].entry_type, EntryType::External);
        assert_eq!(store.get_all_affected_files().unwrap(), vec!["a.txt"]);
    }

    #[test]
    fn counters_and_metadata_round_trip() {
        let store = store();
        assert_eq!(store.get_counter("edits").unwrap(), 0);
        assert_eq!(store.increment_counter("edits").unwrap(), 1);
        assert_eq!(store.increment_counter("edits").unwrap(), 2);
        store.set_counter("edits", 10).unwrap();
        assert_eq!(store.get_counter("edits").unwrap(), 10);

        store.set_metadata("workingDir", "/tmp/x").unwrap();
        assert_eq!(
            store.get_metadata("workingDir").unwrap().as_deref(),
            Some("/tmp/x")
        );
        store.delete_metadata("workingDir").unwrap();
        assert_eq!(store.get_metadata("workingDir").unwrap(), None);
    }

    #[test]
    fn eviction_drops_lowest_position() {
        let store = store();
        push(&store, Stack::Undo, 0);
        push(&store, Stack::Undo, 1);
        store.delete_oldest_entry(Stack::Undo).unwrap();
        let entries = store.get_entries(Stack::Undo).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position, 1);
    }
}
