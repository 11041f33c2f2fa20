//! Publishing run state machine.
//!
//! `Idle -> Running -> (Paused <-> Running) -> StopRequested -> Stopped -> Idle`.
//! One run at a time; control operations may be called from any task while a
//! run is in flight and take effect at the next suspension point.

mod run;
mod status;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::AuthVerifier;
use crate::classifier::{MarkerAnalysis, OutcomeClassifier, PublishOutcome, Verdict};
use crate::cleanup::{CleanupScheduler, PostQueue};
use crate::config::{OrchestratorSection, PostpilotConfig};
use crate::content::{ContentError, ContentScanner, PostItem};
use crate::cookies::{CookiePolicy, CookieStore};
use crate::session::{AutomationSession, PublishTask, SessionError, SessionFactory};

pub use run::{RunResult, RunSnapshot, RunStatus, TaskRun};
pub use status::{SilentSink, StatusError, StatusEvent, StatusSink};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("content scan failed: {0}")]
    ScanFailed(#[from] ContentError),
    #[error("failed to open automation session: {0}")]
    SessionOpen(#[from] SessionError),
    #[error("a publishing run is already in progress")]
    AlreadyRunning,
    #[error("run loop panicked: {0}")]
    Panicked(String),
}

type SessionSlot = Option<Box<dyn AutomationSession>>;

pub struct TaskOrchestrator {
    scanner: ContentScanner,
    verifier: AuthVerifier,
    classifier: OutcomeClassifier,
    factory: Arc<dyn SessionFactory>,
    settings: OrchestratorSection,
    publish_url: String,
    queue: PostQueue,
    cleanup: CleanupScheduler,
    run: watch::Sender<TaskRun>,
    wake: Notify,
    session: Mutex<SessionSlot>,
    session_open: AtomicBool,
}

impl TaskOrchestrator {
    pub fn new(config: &PostpilotConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let scanner = ContentScanner::new(&config.paths.content_root);
        let store = CookieStore::new(
            &config.paths.cookie_dir,
            CookiePolicy::from_platform(&config.platform),
            config.platform.store_domain.clone(),
        );
        let queue = PostQueue::default();
        let cleanup = CleanupScheduler::new(scanner.root(), queue.clone());
        let (run, _) = watch::channel(TaskRun::default());
        Self {
            verifier: AuthVerifier::new(store, config.platform.clone()),
            classifier: OutcomeClassifier::new(config.orchestrator.ambiguous_result),
            settings: config.orchestrator.clone(),
            publish_url: config.platform.publish_url.clone(),
            scanner,
            factory,
            queue,
            cleanup,
            run,
            wake: Notify::new(),
            session: Mutex::new(None),
            session_open: AtomicBool::new(false),
        }
    }

    pub fn queue(&self) -> &PostQueue {
        &self.queue
    }

    pub fn cleanup(&self) -> &CleanupScheduler {
        &self.cleanup
    }

    pub fn verifier(&self) -> &AuthVerifier {
        &self.verifier
    }

    /// Replaces the live queue with a fresh scan of the content root.
    pub async fn rescan(&self) -> Result<usize, OrchestratorError> {
        let scanner = self.scanner.clone();
        let root = scanner.root().to_path_buf();
        let items = tokio::task::spawn_blocking(move || scanner.scan())
            .await
            .map_err(|err| ContentError::Io {
                source: std::io::Error::other(err),
                path: root,
            })??;
        let count = items.len();
        self.queue.replace(items);
        info!(items = count, root = %self.scanner.root().display(), "publish queue rebuilt");
        Ok(count)
    }

    /// Publishes up to `max_items` queued posts.
    ///
    /// Never fails: run-level problems come back as a single record with
    /// `fatal` set, appended after whatever items already completed.
    pub async fn run_posting_task(
        &self,
        max_items: Option<usize>,
        sink: &dyn StatusSink,
        cancel: CancellationToken,
    ) -> Vec<RunResult> {
        let Ok(mut slot) = self.session.try_lock() else {
            let err = OrchestratorError::AlreadyRunning;
            warn!("publishing run rejected, another run is active");
            self.emit(sink, StatusEvent::new("run rejected").with("error", err.to_string()));
            return vec![RunResult::fatal(&err)];
        };

        let mut results = Vec::new();
        let outcome = AssertUnwindSafe(self.execute(&mut slot, max_items, sink, &cancel, &mut results))
            .catch_unwind()
            .await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(payload) => Some(OrchestratorError::Panicked(panic_message(payload.as_ref()))),
        };
        if let Some(err) = failure {
            error!(error = %err, "publishing run aborted");
            self.emit(sink, StatusEvent::new("run aborted").with("error", err.to_string()));
            results.push(RunResult::fatal(&err));
        }

        self.finish(&mut slot, sink).await;
        results
    }

    /// Only takes effect while running.
    pub fn pause(&self) -> bool {
        let changed = self.run.send_if_modified(|run| {
            if run.status == RunStatus::Running {
                run.status = RunStatus::Paused;
                true
            } else {
                false
            }
        });
        if changed {
            info!("publishing run paused");
            self.wake.notify_waiters();
        }
        changed
    }

    pub fn resume(&self) -> bool {
        let changed = self.run.send_if_modified(|run| {
            if run.status == RunStatus::Paused {
                run.status = RunStatus::Running;
                true
            } else {
                false
            }
        });
        if changed {
            info!("publishing run resumed");
            self.wake.notify_waiters();
        }
        changed
    }

    /// Idempotent. Called while idle it leaves a stale request that the next
    /// run discards.
    pub fn request_stop(&self) {
        let changed = self.run.send_if_modified(|run| {
            if run.status.is_stopping() {
                false
            } else {
                run.status = RunStatus::StopRequested;
                true
            }
        });
        if changed {
            info!("stop requested");
        }
        self.wake.notify_waiters();
    }

    /// Requests a stop, waits for the active run to wind down, then releases
    /// the session, resets run state and rescans the content root.
    pub async fn stop(&self) -> Result<usize, OrchestratorError> {
        self.request_stop();
        let mut slot = self.session.lock().await;
        self.release_session(&mut slot).await;
        self.run.send_replace(TaskRun::default());
        info!("orchestrator stopped and reset");
        self.rescan().await
    }

    pub fn status(&self) -> RunSnapshot {
        RunSnapshot {
            run: self.run.borrow().clone(),
            queue_len: self.queue.len(),
            session_open: self.session_open.load(Ordering::SeqCst),
            cookie_login: self.verifier.cookie_login_enabled(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskRun> {
        self.run.subscribe()
    }

    async fn execute(
        &self,
        slot: &mut SessionSlot,
        max_items: Option<usize>,
        sink: &dyn StatusSink,
        cancel: &CancellationToken,
        results: &mut Vec<RunResult>,
    ) -> Result<(), OrchestratorError> {
        // Stale state is discarded before releasing, so a stop requested while
        // the old session closes survives into the new run.
        let previous = self.run.send_replace(TaskRun::default());
        if !previous.is_idle() || slot.is_some() {
            warn!(
                status = previous.status.as_str(),
                session_held = slot.is_some(),
                "stale run state found, resetting"
            );
            self.release_session(slot).await;
        }

        let run = TaskRun::started();
        let run_id = run.run_id.map(|id| id.to_string()).unwrap_or_default();
        self.run.send_modify(|current| {
            let stop_pending = current.status.is_stopping();
            *current = run;
            if stop_pending {
                current.status = RunStatus::StopRequested;
            }
        });
        info!(run_id = %run_id, "publishing run started");
        self.emit(sink, StatusEvent::new("run started").with("run_id", run_id));
        if self.interrupted_before_publishing(sink, cancel) {
            return Ok(());
        }

        if self.queue.is_empty() {
            self.emit(
                sink,
                StatusEvent::new("scanning content")
                    .with("root", self.scanner.root().display().to_string()),
            );
            self.rescan().await?;
        }

        let limit = max_items.unwrap_or(self.settings.max_items);
        let items: Vec<PostItem> = self.queue.snapshot().into_iter().take(limit).collect();
        self.emit(
            sink,
            StatusEvent::new("queue discovered")
                .with("queued", self.queue.len())
                .with("selected", items.len()),
        );
        if items.is_empty() {
            if self.queue.is_empty() {
                warn!(root = %self.scanner.root().display(), "no publishable content found");
                results.push(RunResult::synthetic(
                    "no content",
                    "no publishable content found in the content root",
                ));
            } else {
                warn!(queued = self.queue.len(), "max_items is 0, nothing selected");
                results.push(RunResult::synthetic(
                    "nothing selected",
                    format!("nothing selected (max_items = 0, {} queued)", self.queue.len()),
                ));
            }
            return Ok(());
        }
        if self.interrupted_before_publishing(sink, cancel) {
            return Ok(());
        }

        let session = slot.insert(self.factory.open().await?);
        self.session_open.store(true, Ordering::SeqCst);
        self.emit(sink, StatusEvent::new("verifying login"));
        let authenticated = self.verifier.verify(&mut **session).await;
        self.emit(
            sink,
            StatusEvent::new("login checked").with("authenticated", authenticated),
        );
        if self.interrupted_before_publishing(sink, cancel) {
            return Ok(());
        }
        if !authenticated {
            warn!("cookie login failed, aborting run");
            results.push(RunResult::synthetic(
                "login",
                "cookie login failed; refresh the cookie file and retry",
            ));
            return Ok(());
        }

        let total = items.len();
        for (index, item) in items.iter().enumerate() {
            let step = index + 1;
            if self.stop_requested(cancel) || !self.wait_while_paused(sink, cancel).await {
                break;
            }

            info!(title = %item.title, step, total, "publishing item");
            self.emit(
                sink,
                StatusEvent::new("publishing item")
                    .with("title", item.title.clone())
                    .with("step", step)
                    .with("total", total),
            );

            let result = self
                .publish_item(&mut **session, item, step, total, sink, cancel)
                .await;
            if result.stopped {
                results.push(result);
                break;
            }

            self.queue.remove(&item.source_dir);
            if result.success {
                results.push(result);
                self.cleanup.schedule_delete(item);
                self.run.send_modify(|run| {
                    run.processed_count += 1;
                    run.success_count += 1;
                    run.consecutive_failures = 0;
                });
                info!(title = %item.title, step, "item published");
                self.emit(
                    sink,
                    StatusEvent::new("item published")
                        .with("title", item.title.clone())
                        .with("step", step),
                );
                continue;
            }

            let reason = result.error_reason.clone().unwrap_or_default();
            results.push(result);
            self.run.send_modify(|run| {
                run.processed_count += 1;
                run.consecutive_failures += 1;
            });
            let failures = self.consecutive_failures();
            warn!(title = %item.title, reason = %reason, failures, "item failed");
            self.emit(
                sink,
                StatusEvent::new("item failed")
                    .with("title", item.title.clone())
                    .with("reason", reason)
                    .with("consecutive_failures", failures),
            );

            if failures >= self.settings.max_consecutive_failures {
                warn!(
                    failures,
                    remaining = self.queue.len(),
                    "too many consecutive failures, aborting run"
                );
                self.emit(
                    sink,
                    StatusEvent::new("circuit breaker tripped")
                        .with("consecutive_failures", failures)
                        .with("remaining", self.queue.len()),
                );
                break;
            }

            if step < total && !self.stop_requested(cancel) {
                let delay = self.settings.backoff_for(failures);
                self.emit(
                    sink,
                    StatusEvent::new("waiting before next item").with("delay_seconds", delay.as_secs()),
                );
                if !self.sleep_unless_stopped(delay, cancel).await {
                    break;
                }
            }
        }

        let summary = self.run.borrow().clone();
        let interrupted = self.stop_requested(cancel);
        info!(
            processed = summary.processed_count,
            succeeded = summary.success_count,
            interrupted,
            "publishing run finished"
        );
        let message = if interrupted { "run interrupted" } else { "run completed" };
        self.emit(
            sink,
            StatusEvent::new(message)
                .with("processed", summary.processed_count)
                .with("succeeded", summary.success_count),
        );
        Ok(())
    }

    async fn publish_item(
        &self,
        session: &mut dyn AutomationSession,
        item: &PostItem,
        step: usize,
        total: usize,
        sink: &dyn StatusSink,
        cancel: &CancellationToken,
    ) -> RunResult {
        let record = RunResult::for_item(item, step, total);
        if !item.is_publishable() {
            warn!(title = %item.title, "post has no image, skipping");
            return record.hard_failure("post has no image", 0);
        }

        let task = PublishTask::for_item(item, &self.publish_url);
        let mut retry_count = 0;
        loop {
            self.emit(
                sink,
                StatusEvent::new("publish attempt")
                    .with("title", item.title.clone())
                    .with("attempt", retry_count + 1),
            );
            let outcome = match session.attempt_publish(&task).await {
                Ok(attempt) => self
                    .classifier
                    .classify(&attempt.result_text, &attempt.full_result_text),
                Err(err) => {
                    warn!(title = %item.title, error = %err, "automation session error during publish");
                    transport_failure(&err)
                }
            };
            debug!(title = %item.title, verdict = outcome.verdict.as_str(), reason = %outcome.reason, "attempt classified");

            if outcome.verdict != Verdict::RetryableFailure {
                return record.with_outcome(&outcome, retry_count);
            }
            if self.stop_requested(cancel) {
                return record.interrupted(retry_count);
            }
            if retry_count >= self.settings.max_retries {
                warn!(title = %item.title, retries = retry_count, "retries exhausted");
                let reason = format!("retries exhausted: {}", outcome.reason);
                return record
                    .with_outcome(&outcome, retry_count)
                    .hard_failure(reason, retry_count);
            }

            retry_count += 1;
            let delay = self.settings.retry_delay();
            info!(title = %item.title, retry = retry_count, reason = %outcome.reason, "retrying publish");
            self.emit(
                sink,
                StatusEvent::new("retrying publish")
                    .with("title", item.title.clone())
                    .with("retry", retry_count)
                    .with("delay_seconds", delay.as_secs()),
            );
            if !self.sleep_unless_stopped(delay, cancel).await {
                return record.interrupted(retry_count);
            }
        }
    }

    async fn finish(&self, slot: &mut SessionSlot, sink: &dyn StatusSink) {
        self.run.send_if_modified(|run| {
            if run.status == RunStatus::StopRequested {
                run.status = RunStatus::Stopped;
                true
            } else {
                false
            }
        });
        self.release_session(slot).await;
        let last = self.run.send_replace(TaskRun::default());
        info!(
            status = last.status.as_str(),
            processed = last.processed_count,
            succeeded = last.success_count,
            "run state reset"
        );
        self.emit(
            sink,
            StatusEvent::new("run finalized").with("status", last.status.as_str()),
        );
    }

    async fn release_session(&self, slot: &mut SessionSlot) {
        if let Some(mut session) = slot.take() {
            if let Err(err) = session.close().await {
                warn!(error = %err, "failed to close automation session");
            }
        }
        self.session_open.store(false, Ordering::SeqCst);
    }

    fn stop_requested(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            self.request_stop();
            return true;
        }
        self.current_status().is_stopping()
    }

    fn interrupted_before_publishing(&self, sink: &dyn StatusSink, cancel: &CancellationToken) -> bool {
        if !self.stop_requested(cancel) {
            return false;
        }
        info!("publishing run interrupted before any item was attempted");
        self.emit(
            sink,
            StatusEvent::new("run interrupted")
                .with("processed", 0)
                .with("succeeded", 0),
        );
        true
    }

    fn current_status(&self) -> RunStatus {
        self.run.borrow().status
    }

    fn consecutive_failures(&self) -> usize {
        self.run.borrow().consecutive_failures
    }

    async fn wait_while_paused(&self, sink: &dyn StatusSink, cancel: &CancellationToken) -> bool {
        let mut announced = false;
        loop {
            if self.stop_requested(cancel) {
                return false;
            }
            if self.current_status() != RunStatus::Paused {
                if announced {
                    self.emit(sink, StatusEvent::new("run resumed"));
                }
                return true;
            }
            if !announced {
                info!("run paused, waiting for resume");
                self.emit(sink, StatusEvent::new("run paused"));
                announced = true;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.pause_poll_interval()) => {}
                _ = self.wake.notified() => {}
                _ = cancel.cancelled() => {}
            }
        }
    }

    /// False when the wait was cut short by a stop or cancellation.
    async fn sleep_unless_stopped(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.stop_requested(cancel),
            _ = cancel.cancelled() => {
                self.request_stop();
                false
            }
            _ = self.stop_signalled() => false,
        }
    }

    async fn stop_signalled(&self) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.current_status().is_stopping() {
                return;
            }
            notified.await;
        }
    }

    fn emit(&self, sink: &dyn StatusSink, event: StatusEvent) {
        debug!(message = %event.message, "status event");
        if let Err(err) = sink.notify(&event) {
            warn!(error = %err, message = %event.message, "status callback failed");
        }
    }
}

fn transport_failure(err: &SessionError) -> PublishOutcome {
    PublishOutcome {
        verdict: Verdict::RetryableFailure,
        reason: format!("automation session error: {err}"),
        raw_result: String::new(),
        analysis: MarkerAnalysis::default(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
