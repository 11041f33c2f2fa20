use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserSection;
use crate::cookies::CookieRecord;

use super::driver::{DriverTarget, PublishDriver};
use super::error::{SessionError, SessionResult};
use super::task::{AttemptResult, PublishTask};
use super::{AutomationSession, SessionFactory};

/// Launches one Chromium instance per run.
pub struct ChromiumSessionFactory {
    config: Arc<BrowserSection>,
    driver: Arc<dyn PublishDriver>,
}

impl ChromiumSessionFactory {
    pub fn new(config: BrowserSection, driver: Arc<dyn PublishDriver>) -> Self {
        Self {
            config: Arc::new(config),
            driver,
        }
    }

    fn build_chromium_config(&self) -> SessionResult<ChromiumConfig> {
        let config = &self.config;
        let mut builder = ChromiumConfig::builder()
            .viewport(ChromiumViewport {
                width: config.window_width,
                height: config.window_height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: config.window_width >= config.window_height,
                has_touch: false,
            })
            .window_size(config.window_width, config.window_height);

        if let Some(executable) = &config.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if let Some(dir) = &config.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        if !config.headless {
            builder = builder.with_head();
        }
        if !config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = config.extra_args.clone();
        if let Some(user_agent) = &config.user_agent {
            args.push(format!("--user-agent={user_agent}"));
        }
        builder = builder.args(args);

        builder.build().map_err(SessionError::Configuration)
    }
}

#[async_trait]
impl SessionFactory for ChromiumSessionFactory {
    async fn open(&self) -> SessionResult<Box<dyn AutomationSession>> {
        let chromium_config = self.build_chromium_config()?;
        info!(
            headless = self.config.headless,
            width = self.config.window_width,
            height = self.config.window_height,
            "Launching Chromium instance"
        );
        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| SessionError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let page = browser.new_page(CreateTargetParams::new("about:blank")).await?;
        Ok(Box::new(ChromiumSession {
            browser: Some(browser),
            page,
            handler_task: Some(handler_task),
            driver: Arc::clone(&self.driver),
            settle: Duration::from_millis(self.config.settle_millis),
        }))
    }
}

pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Page,
    handler_task: Option<JoinHandle<()>>,
    driver: Arc<dyn PublishDriver>,
    settle: Duration,
}

impl ChromiumSession {
    fn browser(&self) -> SessionResult<&Browser> {
        self.browser.as_ref().ok_or(SessionError::Closed)
    }

    async fn current_url(&self) -> SessionResult<Option<String>> {
        Ok(self.page.url().await?)
    }
}

fn to_cookie_param(cookie: &CookieRecord) -> SessionResult<CookieParam> {
    let mut builder = CookieParam::builder()
        .name(cookie.name.clone())
        .value(cookie.value.clone())
        .domain(cookie.domain.clone())
        .path(cookie.path.clone())
        .secure(cookie.secure)
        .http_only(cookie.http_only);
    if let Some(expires) = cookie.expires_at {
        builder = builder.expires(TimeSinceEpoch::new(expires as f64));
    }
    builder.build().map_err(SessionError::Cookies)
}

#[async_trait]
impl AutomationSession for ChromiumSession {
    async fn inject_cookies(&mut self, cookies: &[CookieRecord]) -> SessionResult<()> {
        self.browser()?;
        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<SessionResult<Vec<_>>>()?;
        let count = params.len();
        self.page.execute(SetCookiesParams::new(params)).await?;
        info!(count, "cookies injected into browser");
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> SessionResult<String> {
        self.browser()?;
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(SessionError::Configuration)?;
        self.page
            .goto(params)
            .await
            .map_err(|err| SessionError::Navigation(format!("{url}: {err}")))?;
        self.page.wait_for_navigation().await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        let current = self.current_url().await?.unwrap_or_default();
        debug!(requested = url, current = %current, "navigation settled");
        Ok(current)
    }

    async fn attempt_publish(&mut self, task: &PublishTask) -> SessionResult<AttemptResult> {
        let target = DriverTarget {
            websocket_url: self.browser()?.websocket_address().clone(),
            current_url: self.current_url().await?,
        };
        self.driver.run(task, &target).await
    }

    async fn close(&mut self) -> SessionResult<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        info!("Shutting down Chromium instance");
        if let Err(err) = browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            warn!("ChromiumSession dropped without explicit close");
        }
        if let Some(handle) = self.handler_task.take() {
            handle.abort();
        }
    }
}
