use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::classifier::{PublishOutcome, Verdict};
use crate::content::PostItem;

use super::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Paused,
    StopRequested,
    Stopped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::StopRequested => "stop_requested",
            RunStatus::Stopped => "stopped",
        }
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, RunStatus::StopRequested | RunStatus::Stopped)
    }
}

/// State of the current publishing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskRun {
    pub run_id: Option<Uuid>,
    pub status: RunStatus,
    pub consecutive_failures: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    pub(crate) fn started() -> Self {
        Self {
            run_id: Some(Uuid::new_v4()),
            status: RunStatus::Running,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == RunStatus::Idle && self.run_id.is_none()
    }
}

/// Point-in-time view returned by `status()`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    #[serde(flatten)]
    pub run: TaskRun,
    pub queue_len: usize,
    pub session_open: bool,
    pub cookie_login: bool,
}

/// Outcome of one queue item, or a synthetic record for a run-level failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub post_title: String,
    pub content: String,
    pub images_count: usize,
    pub raw_result: String,
    pub retry_count: usize,
    pub step_number: usize,
    pub total_steps: usize,
    pub timestamp: DateTime<Utc>,
    pub error_reason: Option<String>,
    pub verdict: Option<Verdict>,
    pub stopped: bool,
    pub fatal: bool,
}

impl RunResult {
    fn blank(post_title: impl Into<String>) -> Self {
        Self {
            success: false,
            post_title: post_title.into(),
            content: String::new(),
            images_count: 0,
            raw_result: String::new(),
            retry_count: 0,
            step_number: 0,
            total_steps: 0,
            timestamp: Utc::now(),
            error_reason: None,
            verdict: None,
            stopped: false,
            fatal: false,
        }
    }

    pub(crate) fn for_item(item: &PostItem, step_number: usize, total_steps: usize) -> Self {
        Self {
            content: item.text_content.clone(),
            images_count: item.images.len(),
            step_number,
            total_steps,
            ..Self::blank(item.title.clone())
        }
    }

    /// Run-level failure that happened before any item was attempted.
    pub(crate) fn synthetic(post_title: &str, reason: impl Into<String>) -> Self {
        Self {
            error_reason: Some(reason.into()),
            ..Self::blank(post_title)
        }
    }

    pub(crate) fn fatal(err: &OrchestratorError) -> Self {
        Self {
            fatal: true,
            error_reason: Some(err.to_string()),
            ..Self::blank("run aborted")
        }
    }

    pub(crate) fn with_outcome(mut self, outcome: &PublishOutcome, retry_count: usize) -> Self {
        self.success = outcome.verdict.is_success();
        self.raw_result = outcome.raw_result.clone();
        self.retry_count = retry_count;
        self.verdict = Some(outcome.verdict);
        if !self.success {
            self.error_reason = Some(outcome.reason.clone());
        }
        self.timestamp = Utc::now();
        self
    }

    pub(crate) fn hard_failure(mut self, reason: impl Into<String>, retry_count: usize) -> Self {
        self.success = false;
        self.retry_count = retry_count;
        self.verdict = Some(Verdict::HardFailure);
        self.error_reason = Some(reason.into());
        self.timestamp = Utc::now();
        self
    }

    pub(crate) fn interrupted(mut self, retry_count: usize) -> Self {
        self.success = false;
        self.stopped = true;
        self.retry_count = retry_count;
        self.error_reason = Some("stopped by user".into());
        self.timestamp = Utc::now();
        self
    }
}
