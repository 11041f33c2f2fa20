use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("cookie injection failed: {0}")]
    Cookies(String),
    #[error("publish driver failed: {0}")]
    Driver(String),
    #[error("publish driver returned malformed output: {0}")]
    DriverOutput(#[from] serde_json::Error),
    #[error("timeout waiting for {0}")]
    Timeout(String),
    #[error("session already closed")]
    Closed,
}

impl From<tokio::task::JoinError> for SessionError {
    fn from(err: tokio::task::JoinError) -> Self {
        SessionError::Driver(err.to_string())
    }
}
