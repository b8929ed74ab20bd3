use std::path::PathBuf;

use thiserror::Error;

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Failures raised by a [`crate::database::Repository`].
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("a download with id {0} already exists")]
    DuplicateId(i64),

    #[error("download {id} writes to '{file_path}', which another download already uses")]
    DuplicateFile { id: i64, file_path: String },

    #[error("no download with id {0}")]
    NotFound(i64),

    #[error("progress {downloaded} exceeds total {total} for download {id}")]
    InvalidProgress { id: i64, downloaded: u64, total: u64 },

    #[error("byte count {bytes} for download {id} does not fit the database")]
    ByteCountOverflow { id: i64, bytes: u64 },

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("sqlite error")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode request headers")]
    Headers(#[from] serde_json::Error),
}

/// Errors surfaced synchronously to the caller.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("invalid request {id}: {reason}")]
    InvalidRequest { id: i64, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("settings file '{path}': {reason}")]
    Settings { path: PathBuf, reason: String },

    #[error("failed to read request CSV")]
    Csv(#[from] csv::Error),

    #[error("download manager is no longer running")]
    ManagerClosed,
}
