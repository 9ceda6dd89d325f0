//! Transactional editing core for the NTS tool server.
//!
//! The core mediates code-modifying actions issued by a remote agent:
//! capability tokens gate every edit, an append-only per-task journal makes
//! them reversible, and tree-sitter-backed symbol analysis makes the
//! refactoring operations semantically aware. The stdio adapter lives in
//! the `nts-mcp-server` crate; everything here is transport-agnostic.

pub mod config;
pub mod crc;
pub mod diff;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod exec;
pub mod git;
pub mod journal;
pub mod ops;
pub mod paths;
pub mod refactor;
pub mod symbols;
pub mod tasks;
pub mod todo;
pub mod tokens;
pub mod transactions;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::NtsError;
pub use error::Result;
