use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type CookieResult<T> = Result<T, CookieError>;

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie file io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("invalid cookie json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to replace cookie store {path}: {source}")]
    Persist {
        source: tempfile::PersistError,
        path: PathBuf,
    },
}
