use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DriverSection;

use super::error::{SessionError, SessionResult};
use super::task::{AttemptResult, PublishTask};

/// Browser the driver should attach to.
#[derive(Debug, Clone, Serialize)]
pub struct DriverTarget {
    pub websocket_url: String,
    pub current_url: Option<String>,
}

/// Runs the free-text publish task against an already authenticated browser.
#[async_trait]
pub trait PublishDriver: Send + Sync {
    async fn run(&self, task: &PublishTask, target: &DriverTarget) -> SessionResult<AttemptResult>;
}

#[derive(Serialize)]
struct DriverRequest<'a> {
    task: &'a PublishTask,
    target: &'a DriverTarget,
}

/// Hands the task to an external agent process.
///
/// The request is written to stdin as one JSON document. The process must
/// print an [`AttemptResult`] as JSON on stdout, either as the whole output
/// or as its last non-empty line.
#[derive(Debug, Clone)]
pub struct CommandPublishDriver {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandPublishDriver {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    pub fn from_config(config: &DriverSection) -> SessionResult<Self> {
        let program = config
            .program
            .clone()
            .ok_or_else(|| SessionError::Configuration("driver.program is not set".into()))?;
        Ok(Self::new(
            program,
            config.args.clone(),
            Duration::from_secs(config.timeout_seconds),
        ))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl PublishDriver for CommandPublishDriver {
    async fn run(&self, task: &PublishTask, target: &DriverTarget) -> SessionResult<AttemptResult> {
        let payload = serde_json::to_vec(&DriverRequest { task, target })?;
        info!(program = %self.program, title = %task.title, "starting publish driver");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SessionError::Timeout(format!("publish driver {}", self.program)))??;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "publish driver stderr");
        }
        if !output.status.success() {
            warn!(status = ?output.status.code(), "publish driver exited with failure");
            return Err(SessionError::Driver(format!(
                "exit status {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }
        parse_driver_output(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_driver_output(stdout: &str) -> SessionResult<AttemptResult> {
    match serde_json::from_str::<AttemptResult>(stdout.trim()) {
        Ok(result) => Ok(result),
        Err(err) => {
            let last_line = stdout.lines().rev().find(|line| !line.trim().is_empty());
            match last_line {
                Some(line) => Ok(serde_json::from_str(line.trim())?),
                None => Err(SessionError::DriverOutput(err)),
            }
        }
    }
}
