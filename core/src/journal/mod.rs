//! Durable per-task journal: entries, snapshots, diff stats, metadata.

mod store;

pub use store::JournalStore;
pub use store::NewEntry;

use serde::Deserialize;
use serde::Serialize;

/// Which stack an entry currently lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stack {
    Undo,
    Redo,
}

impl Stack {
    pub fn as_str(self) -> &'static str {
        match self {
            Stack::Undo => "UNDO",
            Stack::Redo => "REDO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNDO" => Some(Stack::Undo),
            "REDO" => Some(Stack::Redo),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    Transaction,
    Checkpoint,
    External,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryType::Transaction => "TRANSACTION",
            EntryType::Checkpoint => "CHECKPOINT",
            EntryType::External => "EXTERNAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRANSACTION" => Some(EntryType::Transaction),
            "CHECKPOINT" => Some(EntryType::Checkpoint),
            "EXTERNAL" => Some(EntryType::External),
            _ => None,
        }
    }
}

/// Append-only journal record. Positions are gap-free per stack; the store
/// on disk is the single source of truth for undo/redo state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: i64,
    pub stack: Stack,
    pub entry_type: EntryType,
    pub position: i64,
    /// Milliseconds since the Unix epoch; display and cross-stack fusion
    /// only, never ordering within a stack.
    pub timestamp_ms: i64,
    pub description: Option<String>,
    pub status: Option<String>,
    pub instruction: Option<String>,
    pub checkpoint_name: Option<String>,
    pub affected_path: Option<String>,
    pub previous_crc: Option<u32>,
    pub current_crc: Option<u32>,
}

/// Status value for entries Smart Undo could not fully restore.
pub const STATUS_STUCK: &str = "STUCK";

/// Pre-image of one file touched by a transaction. `content == None` means
/// the file did not exist before (it was created by the transaction).
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub entry_id: i64,
    pub path: String,
    pub content: Option<Vec<u8>>,
    pub byte_size: i64,
    pub crc: u32,
}

impl FileSnapshot {
    pub fn was_created(&self) -> bool {
        self.content.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffStat {
    pub entry_id: i64,
    pub path: String,
    pub lines_added: i64,
    pub lines_deleted: i64,
    pub affected_blocks: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unified_diff: Option<String>,
}
