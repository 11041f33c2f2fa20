use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::error::{CookieError, CookieResult};
use super::format::{parse_cookies, parse_raw, CookiePolicy, CookieRecord, RawCookie};

pub const STORE_FILE_NAME: &str = "xiaohongshu_cookies.json";

/// On-disk layout of the persisted cookie cache.
#[derive(Debug, Clone, Serialize)]
pub struct CookieEnvelope {
    pub cookies: Vec<CookieRecord>,
    #[serde(rename = "savedAt")]
    pub saved_at: DateTime<Utc>,
    pub domain: String,
}

#[derive(Debug, Deserialize)]
struct StoredEnvelope {
    #[serde(default)]
    cookies: Vec<RawCookie>,
    #[serde(default, rename = "savedAt", alias = "saved_at")]
    saved_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CookieStore {
    dir: PathBuf,
    policy: CookiePolicy,
    store_domain: String,
}

impl CookieStore {
    pub fn new<P: AsRef<Path>>(
        dir: P,
        policy: CookiePolicy,
        store_domain: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            policy,
            store_domain: store_domain.into(),
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.dir.join(STORE_FILE_NAME)
    }

    pub fn policy(&self) -> &CookiePolicy {
        &self.policy
    }

    /// Reads a user-supplied export. A missing file yields no cookies.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> CookieResult<Vec<CookieRecord>> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "cookie file does not exist");
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path).map_err(|source| CookieError::Io {
            source,
            path: path.to_path_buf(),
        })?;
        let cookies = parse_cookies(&content, &self.policy)?;
        info!(path = %path.display(), count = cookies.len(), "loaded cookies from file");
        Ok(cookies)
    }

    /// Replaces the store file; readers see either the old or the new file.
    pub fn persist(&self, records: &[CookieRecord]) -> CookieResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|source| CookieError::Io {
            source,
            path: self.dir.clone(),
        })?;
        let envelope = CookieEnvelope {
            cookies: records.to_vec(),
            saved_at: Utc::now(),
            domain: self.store_domain.clone(),
        };
        let target = self.store_path();
        let mut file = NamedTempFile::new_in(&self.dir).map_err(|source| CookieError::Io {
            source,
            path: self.dir.clone(),
        })?;
        serde_json::to_writer_pretty(&mut file, &envelope)?;
        file.flush().map_err(|source| CookieError::Io {
            source,
            path: file.path().to_path_buf(),
        })?;
        file.persist(&target).map_err(|source| CookieError::Persist {
            source,
            path: target.clone(),
        })?;
        info!(path = %target.display(), count = records.len(), "cookies persisted");
        Ok(())
    }

    pub fn load_persisted(&self) -> CookieResult<Vec<CookieRecord>> {
        let path = self.store_path();
        if !path.exists() {
            info!(path = %path.display(), "no persisted cookies");
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| CookieError::Io {
            source,
            path: path.clone(),
        })?;
        let raws = if content.trim_start().starts_with('{') {
            let envelope: StoredEnvelope = serde_json::from_str(&content)?;
            info!(
                saved_at = envelope.saved_at.as_deref().unwrap_or("unknown"),
                count = envelope.cookies.len(),
                "loading persisted cookies"
            );
            envelope.cookies
        } else {
            parse_raw(&content)?
        };
        Ok(self.policy.accept_all(raws))
    }

    /// Copies an export into the store so later runs find it without a path.
    pub fn import<P: AsRef<Path>>(&self, path: P) -> CookieResult<Vec<CookieRecord>> {
        let cookies = self.load_file(path)?;
        if !cookies.is_empty() {
            self.persist(&cookies)?;
        }
        Ok(cookies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PlatformSection;
    use tempfile::TempDir;

    fn store(dir: &Path) -> CookieStore {
        CookieStore::new(
            dir,
            CookiePolicy::from_platform(&PlatformSection::default()),
            "xiaohongshu.com",
        )
    }

    #[test]
    fn missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(dir.path()).load_persisted().unwrap().is_empty());
    }

    #[test]
    fn envelope_uses_camel_case_keys() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir.path().join("nested"));
        let record = CookieRecord {
            name: "a1".into(),
            value: "v".into(),
            domain: ".xiaohongshu.com".into(),
            path: "/".into(),
            secure: true,
            http_only: true,
            expires_at: Some(1_893_456_000),
        };
        store.persist(&[record]).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.store_path()).unwrap()).unwrap();
        assert_eq!(raw["domain"], "xiaohongshu.com");
        assert!(raw["savedAt"].is_string());
        assert_eq!(raw["cookies"][0]["httpOnly"], true);
        assert_eq!(raw["cookies"][0]["expires"], 1_893_456_000);
    }

    #[test]
    fn reads_legacy_snake_case_store() {
        let dir = TempDir::new().unwrap();
        let store = store(dir.path());
        std::fs::write(
            store.store_path(),
            r#"{"cookies":[{"name":"web_session","value":"w","domain":".xiaohongshu.com"}],"saved_at":"2024-05-01T10:00:00","domain":"xiaohongshu.com"}"#,
        )
        .unwrap();
        let cookies = store.load_persisted().unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "web_session");
    }

    #[test]
    fn import_copies_export_into_store() {
        let dir = TempDir::new().unwrap();
        let export = dir.path().join("export.txt");
        std::fs::write(
            &export,
            ".xiaohongshu.com\tTRUE\t/\tTRUE\t0\tweb_session\tabc\n",
        )
        .unwrap();
        let store = store(&dir.path().join("cookies"));
        let imported = store.import(&export).unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(store.load_persisted().unwrap(), imported);
    }
}
