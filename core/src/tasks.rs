//! Task contexts: isolated per-task state with reactivation after restart.
//!
//! A task exclusively owns its journal store handle, its in-memory undo/redo
//! summary, and its token set. Durable state (journal, todos, metadata
//! snapshot) lives under `<root>/.nts/tasks/<taskId>/` and survives
//! restarts; tokens and the alias graph deliberately do not.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::NtsError;
use crate::error::Result;
use crate::exec::BackgroundCommands;
use crate::journal::JournalStore;
use crate::journal::Stack;
use crate::tokens::TokenSet;
use crate::transactions::OpenTransaction;

pub const COUNTER_EDITS_SINCE_VERIFY: &str = "editsSinceVerify";
pub const COUNTER_TOTAL_EDITS: &str = "totalEdits";

/// Metadata snapshot persisted as `journal.json` next to the database. The
/// database remains the source of truth for undo/redo state; this file only
/// carries task-level attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMeta {
    pub id: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub active_todo: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Mutable per-task state, accessed single-writer per request.
#[derive(Debug)]
pub struct TaskState {
    pub journal: JournalStore,
    pub tokens: TokenSet,
    pub open_transaction: Option<OpenTransaction>,
    pub meta: TaskMeta,
    pub background: BackgroundCommands,
    pub undo_cap: usize,
}

#[derive(Debug)]
pub struct TaskContext {
    id: String,
    dir: PathBuf,
    state: Mutex<TaskState>,
}

impl TaskContext {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn todos_dir(&self) -> PathBuf {
        self.dir.join("todos")
    }

    /// Tasks are single-writer by contract; the mutex only defends against
    /// an adapter that failed to serialise per-task requests.
    pub fn lock(&self) -> MutexGuard<'_, TaskState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Persist the task-level metadata snapshot.
    pub fn save_journal(&self) -> Result<()> {
        let state = self.lock();
        let json = serde_json::to_string_pretty(&state.meta)?;
        drop(state);
        std::fs::write(self.dir.join("journal.json"), json)?;
        Ok(())
    }
}

/// Summary returned by init/reactivation so the agent can see where the
/// task stands.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: String,
    pub reactivated: bool,
    pub undo_entries: i64,
    pub redo_entries: i64,
    pub edits_since_verify: i64,
    pub active_todo: Option<String>,
}

pub struct TaskRegistry {
    config: EngineConfig,
    secret: [u8; 32],
    active: Mutex<HashMap<String, Arc<TaskContext>>>,
}

impl TaskRegistry {
    pub fn new(config: EngineConfig, secret: [u8; 32]) -> Self {
        Self {
            config,
            secret,
            active: Mutex::new(HashMap::new()),
        }
    }

    fn task_dir(&self, id: &str) -> PathBuf {
        self.config.tasks_dir().join(id)
    }

    pub fn is_active_in_memory(&self, id: &str) -> bool {
        self.lock_active().contains_key(id)
    }

    pub fn exists_on_disk(&self, id: &str) -> bool {
        self.task_dir(id).join("journal.db").exists()
    }

    /// Look up or create a task. Agent-chosen ids are honoured: an unknown
    /// id simply becomes a new task bound to that id. Returns the context
    /// and whether it was reactivated from disk.
    pub fn get_or_create(&self, id: Option<&str>) -> Result<(Arc<TaskContext>, bool)> {
        let id = match id {
            Some(id) if !id.trim().is_empty() => validate_task_id(id)?,
            _ => Uuid::new_v4().to_string(),
        };

        if let Some(existing) = self.lock_active().get(&id) {
            return Ok((Arc::clone(existing), false));
        }

        let reactivated = self.exists_on_disk(&id);
        let context = self.open_task(&id)?;
        if reactivated {
            info!(task = %id, "reactivated task from journal");
        } else {
            debug!(task = %id, "created task");
        }
        self.lock_active().insert(id, Arc::clone(&context));
        Ok((context, reactivated))
    }

    fn open_task(&self, id: &str) -> Result<Arc<TaskContext>> {
        let dir = self.task_dir(id);
        std::fs::create_dir_all(dir.join("todos"))?;
        std::fs::create_dir_all(dir.join("snapshots"))?;

        let journal = if self.config.ephemeral_journal {
            JournalStore::open_in_memory()?
        } else {
            JournalStore::open(&dir.join("journal.db"))?
        };

        let now = Utc::now().timestamp_millis();
        let meta = match std::fs::read_to_string(dir.join("journal.json")) {
            Ok(raw) => match serde_json::from_str::<TaskMeta>(&raw) {
                Ok(mut meta) => {
                    meta.updated_at_ms = now;
                    meta
                }
                Err(e) => {
                    debug!(task = %id, "journal.json unreadable, rebuilding: {e}");
                    fresh_meta(id, now, &self.config.primary_root)
                }
            },
            Err(_) => fresh_meta(id, now, &self.config.primary_root),
        };

        let state = TaskState {
            journal,
            tokens: TokenSet::new(self.secret),
            open_transaction: None,
            meta,
            background: BackgroundCommands::default(),
            undo_cap: self.config.undo_cap,
        };
        let context = Arc::new(TaskContext {
            id: id.to_string(),
            dir,
            state: Mutex::new(state),
        });
        context.save_journal()?;
        Ok(context)
    }

    /// Rebuild the in-memory summary for a task from its durable journal.
    /// Both stacks are restored; only tokens and the alias graph start
    /// empty.
    pub fn summarize(&self, context: &TaskContext, reactivated: bool) -> Result<TaskSummary> {
        let state = context.lock();
        Ok(TaskSummary {
            task_id: context.id().to_string(),
            reactivated,
            undo_entries: state.journal.count_entries(Stack::Undo)?,
            redo_entries: state.journal.count_entries(Stack::Redo)?,
            edits_since_verify: state.journal.get_counter(COUNTER_EDITS_SINCE_VERIFY)?,
            active_todo: state.meta.active_todo.clone(),
        })
    }

    /// Test hook: drop all in-memory state and optionally the on-disk tree.
    pub fn reset_all(&self, delete_on_disk: bool) -> Result<()> {
        self.lock_active().clear();
        if delete_on_disk {
            let tasks_dir = self.config.tasks_dir();
            if tasks_dir.exists() {
                std::fs::remove_dir_all(&tasks_dir)?;
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, Arc<TaskContext>>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn fresh_meta(id: &str, now: i64, working_dir: &Path) -> TaskMeta {
    TaskMeta {
        id: id.to_string(),
        created_at_ms: now,
        updated_at_ms: now,
        working_dir: working_dir.to_path_buf(),
        active_todo: None,
        metadata: BTreeMap::new(),
    }
}

/// Task ids become directory names; keep them boring.
fn validate_task_id(id: &str) -> Result<String> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id != "."
        && id != ".."
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !ok {
        return Err(NtsError::InvalidArgument(format!(
            "task id '{id}' may only contain alphanumerics, '-', '_', '.'"
        )));
    }
    Ok(id.to_string())
}
