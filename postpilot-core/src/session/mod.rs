//! Seams to the browser-driving collaborator.
//!
//! The orchestrator only ever talks to an [`AutomationSession`]; how the page
//! is actually driven (Chromium over CDP plus an external agent process, or a
//! test double) is decided by the [`SessionFactory`] handed to it.

mod chromium;
mod driver;
mod error;
mod task;

use async_trait::async_trait;

use crate::cookies::CookieRecord;

pub use chromium::{ChromiumSession, ChromiumSessionFactory};
pub use driver::{CommandPublishDriver, DriverTarget, PublishDriver};
pub use error::{SessionError, SessionResult};
pub use task::{AttemptResult, PublishTask};

#[async_trait]
pub trait AutomationSession: Send {
    async fn inject_cookies(&mut self, cookies: &[CookieRecord]) -> SessionResult<()>;

    /// Navigates and returns the URL the page settled on.
    async fn navigate(&mut self, url: &str) -> SessionResult<String>;

    async fn attempt_publish(&mut self, task: &PublishTask) -> SessionResult<AttemptResult>;

    async fn close(&mut self) -> SessionResult<()>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> SessionResult<Box<dyn AutomationSession>>;
}
