use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::classifier::AmbiguousPolicy;
use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct PostpilotConfig {
    pub paths: PathsSection,
    pub platform: PlatformSection,
    pub orchestrator: OrchestratorSection,
    pub browser: BrowserSection,
    pub driver: DriverSection,
}

impl PostpilotConfig {
    /// Rejects values that would make the run loop spin or never trip.
    pub fn validate(&self) -> Result<()> {
        if self.orchestrator.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid {
                field: "orchestrator.max_consecutive_failures",
                reason: "must be at least 1".into(),
            });
        }
        if self.orchestrator.max_items == 0 {
            return Err(ConfigError::Invalid {
                field: "orchestrator.max_items",
                reason: "must be at least 1".into(),
            });
        }
        if self.orchestrator.pause_poll_millis == 0 {
            return Err(ConfigError::Invalid {
                field: "orchestrator.pause_poll_millis",
                reason: "must be greater than zero".into(),
            });
        }
        if self.paths.content_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "paths.content_root",
                reason: "must not be empty".into(),
            });
        }
        if self.platform.root_domain.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "platform.root_domain",
                reason: "must not be empty".into(),
            });
        }
        if let Some(program) = &self.driver.program {
            if program.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "driver.program",
                    reason: "must not be blank when set".into(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsSection {
    pub content_root: PathBuf,
    pub cookie_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("./tmp/xiaohongshu_posts"),
            cookie_dir: PathBuf::from("./tmp/cookies"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlatformSection {
    pub root_domain: String,
    pub store_domain: String,
    pub creator_url: String,
    pub authenticated_marker: String,
    pub login_markers: Vec<String>,
    pub domain_markers: Vec<String>,
    pub auth_cookie_names: Vec<String>,
    pub cookie_login: bool,
    pub cookie_file: Option<PathBuf>,
    pub default_cookie_paths: Vec<PathBuf>,
    pub publish_url: String,
}

impl Default for PlatformSection {
    fn default() -> Self {
        Self {
            root_domain: ".xiaohongshu.com".into(),
            store_domain: "xiaohongshu.com".into(),
            creator_url: "https://creator.xiaohongshu.com".into(),
            authenticated_marker: "creator.xiaohongshu.com".into(),
            login_markers: vec!["login".into(), "signin".into()],
            domain_markers: vec!["xiaohongshu".into(), "xhscdn".into()],
            auth_cookie_names: [
                "sessionid",
                "userid",
                "web_session",
                "xsec_token",
                "a1",
                "webid",
                "gid",
                "customerid",
                "customerbeaconid",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            cookie_login: true,
            cookie_file: None,
            default_cookie_paths: vec![
                PathBuf::from("./tmp/cookies/xiaohongshu_cookies.json"),
                PathBuf::from("./cookies/xiaohongshu.json"),
                PathBuf::from("./xiaohongshu_cookies.json"),
            ],
            publish_url: "https://creator.xiaohongshu.com/publish/publish".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_items: usize,
    pub max_retries: usize,
    pub retry_delay_seconds: u64,
    pub max_consecutive_failures: usize,
    pub backoff_base_seconds: u64,
    pub backoff_step_seconds: u64,
    pub pause_poll_millis: u64,
    pub ambiguous_result: AmbiguousPolicy,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_items: 5,
            max_retries: 2,
            retry_delay_seconds: 5,
            max_consecutive_failures: 3,
            backoff_base_seconds: 5,
            backoff_step_seconds: 3,
            pause_poll_millis: 1000,
            ambiguous_result: AmbiguousPolicy::AssumeSuccess,
        }
    }
}

impl OrchestratorSection {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_millis)
    }

    /// Linear backoff applied after a failed item.
    pub fn backoff_for(&self, consecutive_failures: usize) -> Duration {
        let step = self
            .backoff_step_seconds
            .saturating_mul(consecutive_failures as u64);
        Duration::from_secs(self.backoff_base_seconds.saturating_add(step))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub executable_path: Option<PathBuf>,
    pub headless: bool,
    pub sandbox: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub user_agent: Option<String>,
    pub extra_args: Vec<String>,
    pub request_timeout_seconds: Option<u64>,
    pub settle_millis: u64,
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: false,
            sandbox: false,
            window_width: 1280,
            window_height: 720,
            user_agent: Some(
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                    .into(),
            ),
            extra_args: vec![
                "--disable-dev-shm-usage".into(),
                "--disable-blink-features=AutomationControlled".into(),
                "--disable-background-timer-throttling".into(),
                "--disable-backgrounding-occluded-windows".into(),
                "--disable-renderer-backgrounding".into(),
            ],
            request_timeout_seconds: Some(30),
            settle_millis: 3000,
            user_data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverSection {
    pub program: Option<String>,
    pub args: Vec<String>,
    pub timeout_seconds: u64,
}

impl Default for DriverSection {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout_seconds: 900,
        }
    }
}

pub fn load_postpilot_config<P: AsRef<Path>>(path: P) -> Result<PostpilotConfig> {
    let config: PostpilotConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
