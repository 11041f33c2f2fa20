use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::PlatformSection;
use crate::cookies::{CookieRecord, CookieStore};
use crate::session::AutomationSession;

/// Where a usable cookie set was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieSource {
    ExplicitFile(PathBuf),
    Persisted,
    DefaultCandidate(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthCheck {
    Authenticated,
    RedirectedToLogin,
    Indeterminate,
}

/// Establishes a logged-in session from stored cookies.
#[derive(Debug, Clone)]
pub struct AuthVerifier {
    store: CookieStore,
    platform: PlatformSection,
}

impl AuthVerifier {
    pub fn new(store: CookieStore, platform: PlatformSection) -> Self {
        Self { store, platform }
    }

    pub fn cookie_login_enabled(&self) -> bool {
        self.platform.cookie_login
    }

    pub fn store(&self) -> &CookieStore {
        &self.store
    }

    /// Explicit file, then the persisted store, then the default candidates.
    pub fn resolve_cookies(&self) -> Option<(CookieSource, Vec<CookieRecord>)> {
        if let Some(path) = &self.platform.cookie_file {
            if path.exists() {
                match self.store.load_file(path) {
                    Ok(cookies) if !cookies.is_empty() => {
                        return Some((CookieSource::ExplicitFile(path.clone()), cookies));
                    }
                    Ok(_) => warn!(path = %path.display(), "configured cookie file has no usable cookies"),
                    Err(err) => warn!(path = %path.display(), error = %err, "failed to load configured cookie file"),
                }
            }
        }

        match self.store.load_persisted() {
            Ok(cookies) if !cookies.is_empty() => return Some((CookieSource::Persisted, cookies)),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to load persisted cookies"),
        }

        for candidate in &self.platform.default_cookie_paths {
            if !candidate.exists() {
                continue;
            }
            match self.store.load_file(candidate) {
                Ok(cookies) if !cookies.is_empty() => {
                    info!(path = %candidate.display(), "using cookies from default location");
                    return Some((CookieSource::DefaultCandidate(candidate.clone()), cookies));
                }
                Ok(_) => {}
                Err(err) => warn!(path = %candidate.display(), error = %err, "failed to load cookie candidate"),
            }
        }
        None
    }

    pub fn inspect_url(&self, current_url: &str) -> AuthCheck {
        let lowered = current_url.to_lowercase();
        if lowered.contains(&self.platform.authenticated_marker.to_lowercase()) {
            AuthCheck::Authenticated
        } else if self
            .platform
            .login_markers
            .iter()
            .any(|marker| lowered.contains(&marker.to_lowercase()))
        {
            AuthCheck::RedirectedToLogin
        } else {
            AuthCheck::Indeterminate
        }
    }

    /// Never retries and never fails hard: every problem means "not logged in".
    pub async fn verify(&self, session: &mut dyn AutomationSession) -> bool {
        if !self.platform.cookie_login {
            warn!("cookie login is disabled; enable platform.cookie_login and provide a cookie file");
            return false;
        }

        let Some((source, cookies)) = self.resolve_cookies() else {
            warn!("no usable cookie source found");
            return false;
        };
        info!(source = ?source, count = cookies.len(), "resolved cookies");

        if let Err(err) = session.inject_cookies(&cookies).await {
            warn!(error = %err, "failed to inject cookies");
            return false;
        }

        let current_url = match session.navigate(&self.platform.creator_url).await {
            Ok(url) => url,
            Err(err) => {
                warn!(url = %self.platform.creator_url, error = %err, "auth navigation failed");
                return false;
            }
        };

        match self.inspect_url(&current_url) {
            AuthCheck::Authenticated => {
                info!(url = %current_url, "cookie login confirmed");
                true
            }
            AuthCheck::RedirectedToLogin => {
                warn!(url = %current_url, "redirected to login page, cookies rejected");
                false
            }
            AuthCheck::Indeterminate => {
                warn!(url = %current_url, marker = "indeterminate", "landed on unexpected page");
                false
            }
        }
    }
}
