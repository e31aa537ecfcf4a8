//! Error types for itch-core operations.
//!
//! Refresh code catches everything at the refresh boundary; launch code lets
//! playtime persistence failures reach the caller.

use std::path::PathBuf;

/// All errors that can occur in itch-core operations.
#[derive(Debug, thiserror::Error)]
pub enum ItchError {
    // ─────────────────────────────────────────────────────────────────────
    // Data store
    // ─────────────────────────────────────────────────────────────────────
    #[error("Butler database unavailable at {path}: {details}")]
    DataStoreUnavailable { path: PathBuf, details: String },

    #[error("Butler database query failed: {context}: {source}")]
    DataStoreQuery {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("No itch user found in butler database")]
    UserNotFound,

    // ─────────────────────────────────────────────────────────────────────
    // Records
    // ─────────────────────────────────────────────────────────────────────
    #[error("Malformed record for game {game_id}: {details}")]
    MalformedRecord { game_id: String, details: String },

    #[error("Executable not found: {0}")]
    ExecutableNotFound(PathBuf),

    #[error("Game not installed: {0}")]
    GameNotInstalled(String),

    // ─────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────
    #[error("Persistent cache write failed: {key}: {details}")]
    PersistenceWriteFailure { key: String, details: String },

    #[error("Persistent cache read failed: {path}: {details}")]
    PersistenceReadFailure { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Launching
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to launch {path}: {source}")]
    LaunchFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to open {uri}: {details}")]
    UriOpenFailed { uri: String, details: String },
}

impl ItchError {
    /// Stable machine-readable code, used as the wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            ItchError::DataStoreUnavailable { .. } => "data_store_unavailable",
            ItchError::DataStoreQuery { .. } => "data_store_query",
            ItchError::UserNotFound => "user_not_found",
            ItchError::MalformedRecord { .. } => "malformed_record",
            ItchError::ExecutableNotFound(_) => "executable_not_found",
            ItchError::GameNotInstalled(_) => "game_not_installed",
            ItchError::PersistenceWriteFailure { .. } => "persistence_write_failure",
            ItchError::PersistenceReadFailure { .. } => "persistence_read_failure",
            ItchError::LaunchFailed { .. } => "launch_failed",
            ItchError::UriOpenFailed { .. } => "uri_open_failed",
        }
    }

    pub(crate) fn query(context: impl Into<String>, source: rusqlite::Error) -> Self {
        ItchError::DataStoreQuery {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn malformed(game_id: impl ToString, details: impl Into<String>) -> Self {
        ItchError::MalformedRecord {
            game_id: game_id.to_string(),
            details: details.into(),
        }
    }
}

/// Convenience type alias for Results using ItchError.
pub type Result<T> = std::result::Result<T, ItchError>;

impl From<ItchError> for String {
    fn from(err: ItchError) -> String {
        err.to_string()
    }
}
