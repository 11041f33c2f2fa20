pub mod auth;
pub mod classifier;
pub mod cleanup;
pub mod config;
pub mod content;
pub mod cookies;
pub mod error;
pub mod orchestrator;
pub mod session;

pub use auth::{AuthCheck, AuthVerifier, CookieSource};
pub use classifier::{AmbiguousPolicy, MarkerAnalysis, OutcomeClassifier, PublishOutcome, Verdict};
pub use cleanup::{CleanupOutcome, CleanupScheduler, PostQueue};
pub use config::{
    load_postpilot_config, BrowserSection, DriverSection, OrchestratorSection, PathsSection,
    PlatformSection, PostpilotConfig,
};
pub use content::{ContentError, ContentResult, ContentScanner, ImageRef, PostItem};
pub use cookies::{
    parse_cookies, CookieEnvelope, CookieError, CookiePolicy, CookieRecord, CookieResult,
    CookieStore,
};
pub use error::{ConfigError, Result};
pub use orchestrator::{
    OrchestratorError, RunResult, RunSnapshot, RunStatus, SilentSink, StatusError, StatusEvent,
    StatusSink, TaskOrchestrator, TaskRun,
};
pub use session::{
    AttemptResult, AutomationSession, ChromiumSessionFactory, CommandPublishDriver, PublishDriver,
    PublishTask, SessionError, SessionFactory, SessionResult,
};
