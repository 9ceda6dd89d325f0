use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NtsError>;

/// Kind-tagged error surfaced to the adapter. The tool layer renders
/// `to_string()` as the single-line error message; structured diagnostics go
/// into the tool result's content instead.
#[derive(Error, Debug)]
pub enum NtsError {
    #[error("INVALID_ARGUMENT: {0}")]
    InvalidArgument(String),

    /// The path resolved outside every configured root.
    #[error("PATH_ESCAPE: {path} is outside the configured roots")]
    PathEscape { path: PathBuf },

    #[error("NOT_FOUND: {path} does not exist")]
    NotFound { path: PathBuf },

    /// NUL byte in the first 8 KiB without a multi-byte UTF encoding.
    #[error("BINARY: {path} looks like a binary file")]
    Binary { path: PathBuf },

    /// The edit did not present a token at all.
    #[error("TOKEN_REQUIRED: read the file first to obtain a line access token")]
    TokenRequired,

    /// The token failed structural or HMAC verification.
    #[error("TOKEN_MALFORMED: the access token could not be verified")]
    TokenMalformed,

    #[error("TOKEN_PATH_MISMATCH: token was issued for a different file")]
    TokenPathMismatch,

    #[error("TOKEN_RANGE_MISMATCH: lines {start}-{end} are outside the token range {token_start}-{token_end}")]
    TokenRangeMismatch {
        start: usize,
        end: usize,
        token_start: usize,
        token_end: usize,
    },

    /// The bound CRC no longer matches the file; the caller must re-read.
    #[error("TOKEN_STALE: file content changed since the token was issued")]
    TokenStale,

    /// A context line of a unified diff did not match the target text.
    #[error("DIFF_CONFLICT: {0}")]
    DiffConflict(String),

    #[error("CHECKPOINT_NOT_FOUND: no checkpoint named '{0}'")]
    CheckpointNotFound(String),

    #[error("No operations to undo")]
    NoOperationsToUndo,

    #[error("No operations to redo")]
    NoOperationsToRedo,

    /// Smart Undo restored only a subset of the snapshots.
    #[error("PARTIAL_UNDO: {0}")]
    PartialUndo(String),

    #[error("SYMBOL_NOT_FOUND: {name}{}", suggestions_suffix(.suggestions))]
    SymbolNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("AMBIGUOUS_SYMBOL: '{name}' has {count} definitions; qualify with line/column")]
    AmbiguousSymbol { name: String, count: usize },

    #[error("UNSUPPORTED_LANGUAGE: no parser registered for '{0}'")]
    UnsupportedLanguage(String),

    /// A required parameter was dropped and a call site cannot supply a value.
    #[error("SIGNATURE_CONFLICT: {0}")]
    SignatureConflict(String),

    /// External process exceeded its budget; the handle id can be polled.
    #[error("TIMEOUT: command still running, poll handle {handle_id}")]
    Timeout { handle_id: String },

    #[error("INTERNAL: {0}")]
    Internal(String),

    // -----------------------------------------------------------------
    // Automatic conversions for common external error types
    // -----------------------------------------------------------------
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("journal store error: {0}")]
    Journal(#[from] rusqlite::Error),
}

fn suggestions_suffix(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        String::new()
    } else {
        format!(" (did you mean: {}?)", suggestions.join(", "))
    }
}

impl NtsError {
    /// True when the adapter should roll back an open transaction before
    /// propagating. Token and argument errors are raised before any write,
    /// but mid-operation failures must restore pre-images.
    pub fn is_mid_operation(&self) -> bool {
        matches!(
            self,
            NtsError::DiffConflict(_) | NtsError::Io(_) | NtsError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_required_message_contains_marker() {
        let message = NtsError::TokenRequired.to_string();
        assert!(message.contains("TOKEN_REQUIRED"));
    }

    #[test]
    fn symbol_not_found_lists_suggestions() {
        let err = NtsError::SymbolNotFound {
            name: "procesData".to_string(),
            suggestions: vec!["processData".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "SYMBOL_NOT_FOUND: procesData (did you mean: processData?)"
        );
    }

    #[test]
    fn no_redo_matches_expected_phrase() {
        assert_eq!(
            NtsError::NoOperationsToRedo.to_string(),
            "No operations to redo"
        );
    }
}
