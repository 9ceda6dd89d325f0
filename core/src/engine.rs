//! The process-wide engine: configuration, root set, token secret, task
//! registry, and the shared parse cache. The adapter owns exactly one of
//! these and threads it through every tool call.

use std::path::PathBuf;
use std::sync::Arc;

use rand::RngCore;
use tracing::info;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::paths::PathRegistry;
use crate::symbols::SymbolEngine;
use crate::tasks::TaskContext;
use crate::tasks::TaskRegistry;
use crate::tasks::TaskSummary;

pub struct Engine {
    pub paths: PathRegistry,
    pub tasks: TaskRegistry,
    pub symbols: SymbolEngine,
}

impl Engine {
    /// A fresh engine generates a new HMAC secret, so tokens issued before
    /// a restart fail verification by construction.
    pub fn new(config: EngineConfig) -> Self {
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);

        let paths = PathRegistry::new(config.primary_root.clone(), &config.additional_roots);
        info!(root = %config.primary_root.display(), "engine initialised");
        Self {
            paths,
            tasks: TaskRegistry::new(config, secret),
            symbols: SymbolEngine::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        self.tasks.config()
    }

    /// Look up or create the task for a request, returning its summary.
    pub fn task(&self, id: Option<&str>) -> Result<(Arc<TaskContext>, TaskSummary)> {
        let (context, reactivated) = self.tasks.get_or_create(id)?;
        let summary = self.tasks.summarize(&context, reactivated)?;
        Ok((context, summary))
    }

    /// Replace the root set after client roots discovery.
    pub fn replace_roots(&self, primary: PathBuf, additional: &[PathBuf]) {
        self.paths.replace_roots(primary, additional);
    }
}
