use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use postpilot_core::{
    AttemptResult, AutomationSession, CookieRecord, PostpilotConfig, PublishTask, RunStatus,
    SessionError, SessionFactory, SessionResult, SilentSink, StatusError, StatusEvent,
    TaskOrchestrator, Verdict,
};

const PUBLISHED: &str = "发布成功，笔记已经上线";
const REJECTED: &str = "上传图片失败，无法继续发布";
const MISSING_PAGE: &str = "你访问的页面不见了，需要重新打开";

#[derive(Clone)]
enum Reply {
    Text(&'static str),
    Error,
    Panic,
}

#[derive(Default)]
struct Script {
    replies: Mutex<VecDeque<Reply>>,
    landing: Mutex<String>,
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    started: Notify,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl Script {
    fn new(replies: &[Reply]) -> Arc<Self> {
        let script = Script::default();
        *script.replies.lock().unwrap() = replies.iter().cloned().collect();
        *script.landing.lock().unwrap() = "https://creator.xiaohongshu.com/new/home".into();
        Arc::new(script)
    }

    fn next_reply(&self) -> Reply {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Text(REJECTED))
    }
}

struct MockFactory {
    script: Arc<Script>,
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn open(&self) -> SessionResult<Box<dyn AutomationSession>> {
        self.script.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            script: Arc::clone(&self.script),
        }))
    }
}

struct MockSession {
    script: Arc<Script>,
}

#[async_trait]
impl AutomationSession for MockSession {
    async fn inject_cookies(&mut self, _cookies: &[CookieRecord]) -> SessionResult<()> {
        Ok(())
    }

    async fn navigate(&mut self, _url: &str) -> SessionResult<String> {
        Ok(self.script.landing.lock().unwrap().clone())
    }

    async fn attempt_publish(&mut self, _task: &PublishTask) -> SessionResult<AttemptResult> {
        self.script.attempts.fetch_add(1, Ordering::SeqCst);
        self.script.started.notify_one();
        let gate = self.script.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.script.next_reply() {
            Reply::Text(text) => Ok(AttemptResult::new(text, "https://creator.xiaohongshu.com/publish")),
            Reply::Error => Err(SessionError::Driver("agent crashed".into())),
            Reply::Panic => panic!("agent blew up"),
        }
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.script.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    config: PostpilotConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cookie_file = dir.path().join("cookies.json");
        std::fs::write(
            &cookie_file,
            r#"[{"name":"web_session","value":"abc","domain":".xiaohongshu.com"}]"#,
        )
        .unwrap();
        let mut config = PostpilotConfig::default();
        config.paths.content_root = dir.path().join("posts");
        config.paths.cookie_dir = dir.path().join("cookie-store");
        config.platform.cookie_file = Some(cookie_file);
        config.platform.default_cookie_paths = Vec::new();
        Self { dir, config }
    }

    fn posts(&self) -> std::path::PathBuf {
        self.dir.path().join("posts")
    }

    fn add_post(&self, name: &str, with_image: bool) {
        let post = self.posts().join(name);
        std::fs::create_dir_all(&post).unwrap();
        std::fs::write(post.join("post.txt"), format!("{name} body #tag")).unwrap();
        if with_image {
            std::fs::write(post.join("cover.jpg"), [0xFF, 0xD8, 0xFF]).unwrap();
        }
    }

    fn orchestrator(&self, script: &Arc<Script>) -> Arc<TaskOrchestrator> {
        let factory = Arc::new(MockFactory {
            script: Arc::clone(script),
        });
        Arc::new(TaskOrchestrator::new(&self.config, factory))
    }
}

fn recorder() -> (
    Arc<Mutex<Vec<String>>>,
    impl Fn(&StatusEvent) -> Result<(), StatusError> + Send + Sync,
) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let sink = move |event: &StatusEvent| -> Result<(), StatusError> {
        sink_events.lock().unwrap().push(event.message.clone());
        Ok(())
    };
    (events, sink)
}

fn count_dirs(path: &Path) -> usize {
    std::fs::read_dir(path)
        .map(|entries| entries.filter_map(Result::ok).count())
        .unwrap_or(0)
}

#[tokio::test(start_paused = true)]
async fn circuit_breaker_stops_after_three_consecutive_failures() {
    let fixture = Fixture::new();
    for name in ["a", "b", "c", "d", "e"] {
        fixture.add_post(name, true);
    }
    let script = Script::new(&[]);
    let orchestrator = fixture.orchestrator(&script);
    let (events, sink) = recorder();

    let started = Instant::now();
    let results = orchestrator
        .run_posting_task(None, &sink, CancellationToken::new())
        .await;

    // 5s + 1 * 3s after the first failure, 5s + 2 * 3s after the second,
    // and no wait once the breaker trips.
    assert_eq!(started.elapsed(), Duration::from_secs(8 + 11));
    assert_eq!(results.len(), 3);
    assert_eq!(script.attempts.load(Ordering::SeqCst), 3);
    assert!(results
        .iter()
        .all(|result| !result.success && result.verdict == Some(Verdict::HardFailure)));
    assert_eq!(orchestrator.queue().len(), 2);
    assert_eq!(count_dirs(&fixture.posts()), 5);
    assert!(events
        .lock()
        .unwrap()
        .contains(&"circuit breaker tripped".to_string()));
    assert_eq!(script.closed.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.status().run.status, RunStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn retry_then_success_deletes_the_post() {
    let fixture = Fixture::new();
    fixture.add_post("coffee", true);
    let script = Script::new(&[Reply::Text(MISSING_PAGE), Reply::Text(PUBLISHED)]);
    let orchestrator = fixture.orchestrator(&script);

    let results = orchestrator
        .run_posting_task(Some(1), &SilentSink, CancellationToken::new())
        .await;
    orchestrator.cleanup().drain().await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert!(result.success);
    assert_eq!(result.retry_count, 1);
    assert_eq!(result.verdict, Some(Verdict::Success));
    assert_eq!(result.images_count, 1);
    assert_eq!((result.step_number, result.total_steps), (1, 1));
    assert!(!fixture.posts().join("coffee").exists());
    assert!(orchestrator.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_become_hard_failure() {
    let fixture = Fixture::new();
    fixture.add_post("coffee", true);
    let script = Script::new(&[
        Reply::Text(MISSING_PAGE),
        Reply::Error,
        Reply::Text(MISSING_PAGE),
    ]);
    let orchestrator = fixture.orchestrator(&script);

    let started = Instant::now();
    let results = orchestrator
        .run_posting_task(None, &SilentSink, CancellationToken::new())
        .await;

    // Two retry waits of 5s; no backoff after the only item.
    assert_eq!(started.elapsed(), Duration::from_secs(10));
    assert_eq!(script.attempts.load(Ordering::SeqCst), 3);
    let result = &results[0];
    assert!(!result.success);
    assert_eq!(result.retry_count, 2);
    assert_eq!(result.verdict, Some(Verdict::HardFailure));
    assert!(result
        .error_reason
        .as_deref()
        .unwrap()
        .starts_with("retries exhausted"));
    assert!(fixture.posts().join("coffee").exists());
}

#[tokio::test(start_paused = true)]
async fn post_without_image_fails_without_attempt() {
    let fixture = Fixture::new();
    fixture.add_post("text-only", false);
    let script = Script::new(&[]);
    let orchestrator = fixture.orchestrator(&script);

    let results = orchestrator
        .run_posting_task(None, &SilentSink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].verdict, Some(Verdict::HardFailure));
    assert_eq!(results[0].images_count, 0);
    assert_eq!(script.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_content_root_never_opens_a_session() {
    let fixture = Fixture::new();
    let script = Script::new(&[]);
    let orchestrator = fixture.orchestrator(&script);

    let results = orchestrator
        .run_posting_task(None, &SilentSink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert!(!results[0].fatal);
    assert_eq!(script.opened.load(Ordering::SeqCst), 0);
    assert!(fixture.posts().is_dir());
}

#[tokio::test]
async fn login_redirect_aborts_before_publishing() {
    let fixture = Fixture::new();
    fixture.add_post("coffee", true);
    let script = Script::new(&[Reply::Text(PUBLISHED)]);
    *script.landing.lock().unwrap() = "https://www.xiaohongshu.com/login?redirectPath=creator".into();
    let orchestrator = fixture.orchestrator(&script);

    let results = orchestrator
        .run_posting_task(None, &SilentSink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(script.attempts.load(Ordering::SeqCst), 0);
    assert_eq!(script.closed.load(Ordering::SeqCst), 1);
    assert!(!orchestrator.status().session_open);
}

#[tokio::test(start_paused = true)]
async fn stale_stop_requests_are_discarded_by_the_next_run() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    fixture.add_post("b", true);
    let script = Script::new(&[Reply::Text(PUBLISHED), Reply::Text(PUBLISHED)]);
    let orchestrator = fixture.orchestrator(&script);

    orchestrator.request_stop();
    orchestrator.request_stop();
    assert_eq!(orchestrator.status().run.status, RunStatus::StopRequested);

    let results = orchestrator
        .run_posting_task(None, &SilentSink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.success));
    assert!(orchestrator.status().run.is_idle());
}

#[tokio::test(start_paused = true)]
async fn stop_mid_run_keeps_partial_results() {
    let fixture = Fixture::new();
    for name in ["a", "b", "c"] {
        fixture.add_post(name, true);
    }
    let script = Script::new(&[Reply::Text(PUBLISHED), Reply::Text(PUBLISHED)]);
    let orchestrator = fixture.orchestrator(&script);
    let mut transitions = orchestrator.subscribe();

    let control = Arc::clone(&orchestrator);
    let sink = move |event: &StatusEvent| -> Result<(), StatusError> {
        if event.message == "item published" {
            control.request_stop();
        }
        Ok(())
    };
    let results = orchestrator
        .run_posting_task(None, &sink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(script.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.queue().len(), 2);
    assert!(transitions.has_changed().unwrap());
    assert_eq!(transitions.borrow_and_update().status, RunStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn pause_waits_until_resumed() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    fixture.add_post("b", true);
    let script = Script::new(&[Reply::Text(PUBLISHED), Reply::Text(PUBLISHED)]);
    let orchestrator = fixture.orchestrator(&script);
    assert!(!orchestrator.pause(), "pause is ignored while idle");

    let control = Arc::clone(&orchestrator);
    let (events, recorder_sink) = recorder();
    let sink = move |event: &StatusEvent| -> Result<(), StatusError> {
        recorder_sink(event)?;
        match event.message.as_str() {
            "item published" => {
                control.pause();
            }
            "run paused" => {
                assert_eq!(control.status().run.status, RunStatus::Paused);
                control.resume();
            }
            _ => {}
        }
        Ok(())
    };
    let results = orchestrator
        .run_posting_task(None, &sink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|result| result.success));
    let events = events.lock().unwrap();
    assert!(events.contains(&"run paused".to_string()));
    assert!(events.contains(&"run resumed".to_string()));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_retry_wait_marks_item_stopped() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    fixture.add_post("b", true);
    let script = Script::new(&[Reply::Text(MISSING_PAGE)]);
    let orchestrator = fixture.orchestrator(&script);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let sink = move |event: &StatusEvent| -> Result<(), StatusError> {
        if event.message == "retrying publish" {
            trigger.cancel();
        }
        Ok(())
    };
    let results = orchestrator.run_posting_task(None, &sink, cancel).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].stopped);
    assert!(!results[0].success);
    assert_eq!(script.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.queue().len(), 2);
    assert_eq!(script.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_token_never_opens_a_session() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    let script = Script::new(&[Reply::Text(PUBLISHED)]);
    let orchestrator = fixture.orchestrator(&script);
    let (events, sink) = recorder();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let results = orchestrator.run_posting_task(None, &sink, cancel).await;

    assert!(results.is_empty());
    assert_eq!(script.opened.load(Ordering::SeqCst), 0);
    assert_eq!(script.attempts.load(Ordering::SeqCst), 0);
    assert!(fixture.posts().join("a").exists());
    assert!(events
        .lock()
        .unwrap()
        .contains(&"run interrupted".to_string()));
    assert!(orchestrator.status().run.is_idle());
}

#[tokio::test]
async fn zero_max_items_reports_nothing_selected() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    let script = Script::new(&[Reply::Text(PUBLISHED)]);
    let orchestrator = fixture.orchestrator(&script);

    let results = orchestrator
        .run_posting_task(Some(0), &SilentSink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    let reason = results[0].error_reason.as_deref().unwrap();
    assert!(reason.starts_with("nothing selected (max_items = 0"), "{reason}");
    assert_eq!(orchestrator.queue().len(), 1);
    assert_eq!(script.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn failing_status_callback_does_not_interrupt_run() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    let script = Script::new(&[Reply::Text(PUBLISHED)]);
    let orchestrator = fixture.orchestrator(&script);
    let sink = |_event: &StatusEvent| -> Result<(), StatusError> {
        Err(StatusError::Rejected("ui went away".into()))
    };

    let results = orchestrator
        .run_posting_task(None, &sink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].success);
}

#[tokio::test]
async fn second_concurrent_run_is_rejected() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    let script = Script::new(&[Reply::Text(PUBLISHED)]);
    let gate = Arc::new(Notify::new());
    *script.gate.lock().unwrap() = Some(Arc::clone(&gate));
    let orchestrator = fixture.orchestrator(&script);

    let first = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            orchestrator
                .run_posting_task(None, &SilentSink, CancellationToken::new())
                .await
        }
    });
    script.started.notified().await;

    let rejected = orchestrator
        .run_posting_task(None, &SilentSink, CancellationToken::new())
        .await;
    assert_eq!(rejected.len(), 1);
    assert!(rejected[0].fatal);
    assert!(orchestrator.status().session_open);

    gate.notify_one();
    let results = first.await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
}

#[tokio::test]
async fn panicking_session_becomes_fatal_record() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    let script = Script::new(&[Reply::Panic]);
    let orchestrator = fixture.orchestrator(&script);

    let results = orchestrator
        .run_posting_task(None, &SilentSink, CancellationToken::new())
        .await;

    assert_eq!(results.len(), 1);
    assert!(results[0].fatal);
    assert!(results[0]
        .error_reason
        .as_deref()
        .unwrap()
        .contains("agent blew up"));
    assert_eq!(script.closed.load(Ordering::SeqCst), 1);
    assert!(orchestrator.status().run.is_idle());
}

#[tokio::test]
async fn stop_releases_session_and_rescans() {
    let fixture = Fixture::new();
    fixture.add_post("a", true);
    fixture.add_post("b", false);
    let script = Script::new(&[]);
    let orchestrator = fixture.orchestrator(&script);

    let queued = orchestrator.stop().await.unwrap();

    assert_eq!(queued, 2);
    assert_eq!(orchestrator.queue().len(), 2);
    let snapshot = orchestrator.status();
    assert!(snapshot.run.is_idle());
    assert!(!snapshot.session_open);
    assert!(snapshot.cookie_login);
}
