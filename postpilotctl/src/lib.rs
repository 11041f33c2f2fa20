use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use postpilot_core::{
    load_postpilot_config, AuthVerifier, ChromiumSessionFactory, CommandPublishDriver,
    ContentScanner, CookiePolicy, CookieRecord, CookieSource, CookieStore, OutcomeClassifier,
    PostpilotConfig, PublishOutcome, RunResult, StatusEvent, TaskOrchestrator,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] postpilot_core::ConfigError),
    #[error("content error: {0}")]
    Content(#[from] postpilot_core::ContentError),
    #[error("cookie error: {0}")]
    Cookies(#[from] postpilot_core::CookieError),
    #[error("session error: {0}")]
    Session(#[from] postpilot_core::SessionError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
    #[error("publishing run aborted: {0}")]
    RunAborted(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Content publishing orchestrator", long_about = None)]
pub struct Cli {
    /// Path to postpilot.toml
    #[arg(long, default_value = "configs/postpilot.toml")]
    pub config: PathBuf,
    /// Overrides paths.content_root
    #[arg(long)]
    pub content_root: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Lists the posts found under the content root
    Scan,
    /// Cookie store maintenance
    #[command(subcommand)]
    Cookies(CookieCommands),
    /// Classifies an agent result without publishing anything
    Classify(ClassifyArgs),
    /// Publishes queued posts
    Run(RunArgs),
}

#[derive(Subcommand, Debug)]
pub enum CookieCommands {
    /// Validates an exported cookie file and saves it into the store
    Import(CookieImportArgs),
    /// Shows which cookies the next run would use
    Show,
}

#[derive(Args, Debug)]
pub struct CookieImportArgs {
    /// JSON or Netscape cookie export
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Final answer reported by the agent
    pub result: String,
    /// Full execution trace, including the final page URL
    #[arg(long, default_value = "")]
    pub full: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Overrides orchestrator.max_items
    #[arg(long)]
    pub max_items: Option<usize>,
}

/// Installs the stderr log subscriber; `RUST_LOG` overrides the default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Scan => {
            let report = context.scan()?;
            render(&report, cli.format)?;
        }
        Commands::Cookies(CookieCommands::Import(args)) => {
            let report = context.import_cookies(&args.file)?;
            render(&report, cli.format)?;
        }
        Commands::Cookies(CookieCommands::Show) => {
            let report = context.show_cookies();
            render(&report, cli.format)?;
        }
        Commands::Classify(args) => {
            let outcome = context.classify(args);
            render(&outcome, cli.format)?;
        }
        Commands::Run(args) => {
            let report = context.publish(args)?;
            render(&report, cli.format)?;
            if let Some(reason) = report.fatal {
                return Err(AppError::RunAborted(reason));
            }
        }
    }

    Ok(())
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: PostpilotConfig,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let mut config = if cli.config.exists() {
            load_postpilot_config(&cli.config)?
        } else {
            warn!(path = %cli.config.display(), "config file not found, using defaults");
            PostpilotConfig::default()
        };
        if let Some(root) = &cli.content_root {
            config.paths.content_root = root.clone();
        }
        config.validate()?;
        Ok(Self { config })
    }

    fn cookie_store(&self) -> CookieStore {
        CookieStore::new(
            &self.config.paths.cookie_dir,
            CookiePolicy::from_platform(&self.config.platform),
            self.config.platform.store_domain.clone(),
        )
    }

    fn scan(&self) -> Result<ScanReport> {
        let scanner = ContentScanner::new(&self.config.paths.content_root);
        let items = scanner
            .scan()?
            .into_iter()
            .map(|item| ScanEntry {
                publishable: item.is_publishable(),
                images: item.images.len(),
                text_chars: item.text_content.chars().count(),
                title: item.title,
                source_dir: item.source_dir,
            })
            .collect();
        Ok(ScanReport {
            root: scanner.root().to_path_buf(),
            items,
        })
    }

    fn import_cookies(&self, file: &Path) -> Result<CookieReport> {
        let store = self.cookie_store();
        let cookies = store.import(file)?;
        if cookies.is_empty() {
            return Err(AppError::MissingResource(format!(
                "no usable platform cookies in {}",
                file.display()
            )));
        }
        info!(count = cookies.len(), path = %store.store_path().display(), "cookies imported");
        Ok(CookieReport::new(
            store.store_path(),
            Some(format!("imported from {}", file.display())),
            &cookies,
        ))
    }

    fn show_cookies(&self) -> CookieReport {
        let store = self.cookie_store();
        let store_path = store.store_path();
        let verifier = AuthVerifier::new(store, self.config.platform.clone());
        match verifier.resolve_cookies() {
            Some((source, cookies)) => {
                let source = match source {
                    CookieSource::ExplicitFile(path) => format!("configured file {}", path.display()),
                    CookieSource::Persisted => "persisted store".to_string(),
                    CookieSource::DefaultCandidate(path) => format!("default location {}", path.display()),
                };
                CookieReport::new(store_path, Some(source), &cookies)
            }
            None => CookieReport::new(store_path, None, &[]),
        }
    }

    fn classify(&self, args: &ClassifyArgs) -> PublishOutcome {
        OutcomeClassifier::new(self.config.orchestrator.ambiguous_result)
            .classify(&args.result, &args.full)
    }

    fn publish(&self, args: &RunArgs) -> Result<RunReport> {
        let driver = Arc::new(CommandPublishDriver::from_config(&self.config.driver)?);
        let factory = Arc::new(ChromiumSessionFactory::new(self.config.browser.clone(), driver));
        let orchestrator = TaskOrchestrator::new(&self.config, factory);

        let runtime = tokio::runtime::Runtime::new()?;
        let results = runtime.block_on(async {
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            let signal = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, stopping after the current step");
                    interrupt.cancel();
                }
            });

            let (events, mut received) = mpsc::unbounded_channel::<StatusEvent>();
            let printer = tokio::spawn(async move {
                while let Some(event) = received.recv().await {
                    let details = serde_json::Value::Object(event.details);
                    info!(details = %details, "{}", event.message);
                }
            });

            let results = orchestrator
                .run_posting_task(args.max_items, &events, cancel)
                .await;
            orchestrator.cleanup().drain().await;
            drop(events);
            if let Err(err) = printer.await {
                warn!(error = %err, "status printer task failed");
            }
            signal.abort();
            results
        });

        Ok(RunReport::from_results(results))
    }
}

#[derive(Debug, Serialize)]
struct ScanReport {
    root: PathBuf,
    items: Vec<ScanEntry>,
}

#[derive(Debug, Serialize)]
struct ScanEntry {
    title: String,
    images: usize,
    text_chars: usize,
    publishable: bool,
    source_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct CookieReport {
    store_path: PathBuf,
    source: Option<String>,
    cookies: Vec<CookieSummary>,
}

/// Cookie without its value.
#[derive(Debug, Serialize)]
struct CookieSummary {
    name: String,
    domain: String,
    secure: bool,
    http_only: bool,
    expires_at: Option<DateTime<Utc>>,
}

impl CookieReport {
    fn new(store_path: PathBuf, source: Option<String>, cookies: &[CookieRecord]) -> Self {
        let cookies = cookies
            .iter()
            .map(|cookie| CookieSummary {
                name: cookie.name.clone(),
                domain: cookie.domain.clone(),
                secure: cookie.secure,
                http_only: cookie.http_only,
                expires_at: cookie
                    .expires_at
                    .and_then(|seconds| DateTime::from_timestamp(seconds, 0)),
            })
            .collect();
        Self {
            store_path,
            source,
            cookies,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    results: Vec<RunResult>,
    succeeded: usize,
    failed: usize,
    stopped: bool,
    fatal: Option<String>,
}

impl RunReport {
    fn from_results(results: Vec<RunResult>) -> Self {
        let succeeded = results.iter().filter(|result| result.success).count();
        let stopped = results.iter().any(|result| result.stopped);
        let fatal = results
            .iter()
            .find(|result| result.fatal)
            .and_then(|result| result.error_reason.clone());
        let failed = results
            .iter()
            .filter(|result| !result.success && !result.stopped && !result.fatal)
            .count();
        Self {
            results,
            succeeded,
            failed,
            stopped,
            fatal,
        }
    }
}

impl DisplayFallback for ScanReport {
    fn display(&self) -> String {
        if self.items.is_empty() {
            return format!("No posts found under {}", self.root.display());
        }
        let mut lines = vec![format!("{} post(s) under {}", self.items.len(), self.root.display())];
        for entry in &self.items {
            lines.push(format!(
                "{title} | images={images} | text={chars} chars{flag}",
                title = entry.title,
                images = entry.images,
                chars = entry.text_chars,
                flag = if entry.publishable { "" } else { " | no image, will fail" },
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for CookieReport {
    fn display(&self) -> String {
        let Some(source) = &self.source else {
            return format!(
                "No usable cookies found (store: {})",
                self.store_path.display()
            );
        };
        let mut lines = vec![format!("{} cookie(s) from {source}", self.cookies.len())];
        for cookie in &self.cookies {
            let expires = cookie
                .expires_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| "session".to_string());
            lines.push(format!(
                "{} | {} | secure={} | httpOnly={} | expires={}",
                cookie.name, cookie.domain, cookie.secure, cookie.http_only, expires
            ));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for PublishOutcome {
    fn display(&self) -> String {
        format!("{} ({})", self.verdict, self.reason)
    }
}

impl DisplayFallback for RunReport {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for result in &self.results {
            let line = if result.fatal {
                format!("[fatal] {}", result.error_reason.as_deref().unwrap_or("unknown"))
            } else if result.stopped {
                format!("[stopped] {}", result.post_title)
            } else if result.success {
                format!(
                    "[ok] {} (step {}/{}, retries {})",
                    result.post_title, result.step_number, result.total_steps, result.retry_count
                )
            } else {
                format!(
                    "[failed] {}: {}",
                    result.post_title,
                    result.error_reason.as_deref().unwrap_or("unknown")
                )
            };
            lines.push(line);
        }
        lines.push(format!(
            "succeeded={} failed={}{}",
            self.succeeded,
            self.failed,
            if self.stopped { " (stopped)" } else { "" }
        ));
        lines.join("\n")
    }
}
