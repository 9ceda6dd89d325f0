use std::path::PathBuf;

/// Name of the dot-directory that holds per-task persisted state under the
/// primary root: `<root>/.nts/tasks/<taskId>/`.
pub const STATE_DIR_NAME: &str = ".nts";

/// Per-task UNDO retention; the oldest entry is evicted on overflow.
pub const DEFAULT_UNDO_CAP: usize = 50;

/// Engine configuration assembled by the adapter before any task exists.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Primary root. `PROJECT_ROOT` overrides the process working directory.
    pub primary_root: PathBuf,

    /// Additional roots supplied by client roots negotiation.
    pub additional_roots: Vec<PathBuf>,

    /// Code page used when a buffer claims UTF-8 but fails strict validation.
    pub fallback_encoding: &'static encoding_rs::Encoding,

    /// Maximum number of UNDO entries retained per task.
    pub undo_cap: usize,

    /// Keep journal stores in memory instead of on disk (test hook).
    pub ephemeral_journal: bool,
}

impl EngineConfig {
    pub fn new(primary_root: PathBuf) -> Self {
        Self {
            primary_root,
            additional_roots: Vec::new(),
            fallback_encoding: encoding_rs::WINDOWS_1251,
            undo_cap: DEFAULT_UNDO_CAP,
            ephemeral_journal: false,
        }
    }

    /// Resolve the primary root from the environment: `PROJECT_ROOT` wins,
    /// then the current working directory.
    pub fn from_env() -> std::io::Result<Self> {
        let primary_root = match std::env::var_os("PROJECT_ROOT") {
            Some(root) if !root.is_empty() => PathBuf::from(root),
            _ => std::env::current_dir()?,
        };
        Ok(Self::new(primary_root))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.primary_root.join(STATE_DIR_NAME)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.state_dir().join("tasks")
    }
}
