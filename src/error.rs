//! Error kinds shared across the store, search, and adapter layers.

use thiserror::Error;

/// The five error kinds StoreDB, FolderSummary, StoreSearch, and the local
/// folder adapters ever surface to a caller, plus `Invalid` for misuse.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A folder, message, or key was not found. Non-fatal for callers that
    /// expect absence (e.g. `read_folder` on an unknown name returns a zero
    /// record rather than this error).
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique-name conflict, e.g. a rename target that already exists.
    #[error("already exists: {0}")]
    Exists(String),

    /// The database file is unreadable at the storage layer. Only surfaces
    /// from `StoreDb::open` / migration; callers never see it mid-session.
    #[error("corrupt database: {0}")]
    Corrupt(String),

    /// Underlying filesystem or embedded-engine error.
    #[error("io error: {0}")]
    Io(String),

    /// The caller's cancellation token fired during a long operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Programmer error: malformed query, or misuse such as calling
    /// `get_uids_sync` before `rebuild_sync`.
    #[error("invalid: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi::ErrorCode;

        if let rusqlite::Error::SqliteFailure(sqlite_err, ref msg) = err {
            match sqlite_err.code {
                ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase | ErrorCode::CannotOpen => {
                    return StoreError::Corrupt(
                        msg.clone().unwrap_or_else(|| sqlite_err.to_string()),
                    );
                }
                ErrorCode::ConstraintViolation => {
                    return StoreError::Exists(
                        msg.clone().unwrap_or_else(|| sqlite_err.to_string()),
                    );
                }
                _ => {}
            }
        }
        if matches!(err, rusqlite::Error::QueryReturnedNoRows) {
            return StoreError::NotFound(err.to_string());
        }
        StoreError::Io(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StoreError::NotFound(err.to_string()),
            std::io::ErrorKind::AlreadyExists => StoreError::Exists(err.to_string()),
            _ => StoreError::Io(err.to_string()),
        }
    }
}

impl From<rusqlite_migration::Error> for StoreError {
    fn from(err: rusqlite_migration::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}
