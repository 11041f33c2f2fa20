use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Progress notification emitted at every run transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    pub message: String,
    pub details: Map<String, Value>,
}

impl StatusEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }
}

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("status receiver dropped")]
    Closed,
    #[error("status sink rejected event: {0}")]
    Rejected(String),
}

/// Receives status events. Failures are logged by the caller and never
/// interrupt a run.
pub trait StatusSink: Send + Sync {
    fn notify(&self, event: &StatusEvent) -> Result<(), StatusError>;
}

impl<F> StatusSink for F
where
    F: Fn(&StatusEvent) -> Result<(), StatusError> + Send + Sync,
{
    fn notify(&self, event: &StatusEvent) -> Result<(), StatusError> {
        self(event)
    }
}

impl StatusSink for UnboundedSender<StatusEvent> {
    fn notify(&self, event: &StatusEvent) -> Result<(), StatusError> {
        self.send(event.clone()).map_err(|_| StatusError::Closed)
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSink;

impl StatusSink for SilentSink {
    fn notify(&self, _event: &StatusEvent) -> Result<(), StatusError> {
        Ok(())
    }
}
