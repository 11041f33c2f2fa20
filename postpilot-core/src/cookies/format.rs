use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::PlatformSection;

use super::error::CookieResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Unix seconds; `None` marks a session cookie.
    #[serde(rename = "expires", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Decides which cookies belong to the target platform and fills defaults.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    root_domain: String,
    domain_markers: Vec<String>,
    auth_cookie_names: Vec<String>,
}

impl CookiePolicy {
    pub fn new(
        root_domain: impl Into<String>,
        domain_markers: Vec<String>,
        auth_cookie_names: Vec<String>,
    ) -> Self {
        Self {
            root_domain: root_domain.into(),
            domain_markers: domain_markers
                .into_iter()
                .map(|marker| marker.to_lowercase())
                .collect(),
            auth_cookie_names: auth_cookie_names
                .into_iter()
                .map(|name| name.to_lowercase())
                .collect(),
        }
    }

    pub fn from_platform(platform: &PlatformSection) -> Self {
        Self::new(
            platform.root_domain.clone(),
            platform.domain_markers.clone(),
            platform.auth_cookie_names.clone(),
        )
    }

    pub fn root_domain(&self) -> &str {
        &self.root_domain
    }

    fn matches_domain(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        self.domain_markers
            .iter()
            .any(|marker| domain.contains(marker.as_str()))
    }

    fn matches_auth_name(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.auth_cookie_names
            .iter()
            .any(|known| name.contains(known.as_str()))
    }

    pub(crate) fn accept(&self, raw: RawCookie) -> Option<CookieRecord> {
        let name = raw.name.unwrap_or_default();
        let value = raw.value.unwrap_or_default();
        if name.is_empty() || value.is_empty() {
            warn!(name = %name, "dropping cookie without name or value");
            return None;
        }
        let domain = raw.domain.filter(|domain| !domain.trim().is_empty());
        let belongs = domain
            .as_deref()
            .map(|domain| self.matches_domain(domain))
            .unwrap_or(false)
            || self.matches_auth_name(&name);
        if !belongs {
            debug!(name = %name, domain = ?domain, "dropping cookie for another site");
            return None;
        }
        Some(CookieRecord {
            name,
            value,
            domain: domain.unwrap_or_else(|| self.root_domain.clone()),
            path: raw
                .path
                .filter(|path| !path.is_empty())
                .unwrap_or_else(|| "/".to_string()),
            secure: raw.secure.unwrap_or(true),
            http_only: raw.http_only.unwrap_or(false),
            expires_at: raw.expires.as_ref().and_then(parse_expiry),
        })
    }

    pub(crate) fn accept_all(&self, raws: Vec<RawCookie>) -> Vec<CookieRecord> {
        let total = raws.len();
        let accepted: Vec<CookieRecord> =
            raws.into_iter().filter_map(|raw| self.accept(raw)).collect();
        info!(accepted = accepted.len(), dropped = total - accepted.len(), "cookies validated");
        accepted
    }
}

/// Cookie as found in the wild; every field is optional until validated.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawCookie {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default, rename = "httpOnly", alias = "http_only")]
    pub http_only: Option<bool>,
    #[serde(default, alias = "expirationDate", alias = "expires_at")]
    pub expires: Option<Value>,
}

fn parse_expiry(value: &Value) -> Option<i64> {
    let seconds = match value {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if seconds > 0.0 {
        Some(seconds.trunc() as i64)
    } else {
        None
    }
}

/// Parses any supported export format and keeps the platform's cookies.
pub fn parse_cookies(raw: &str, policy: &CookiePolicy) -> CookieResult<Vec<CookieRecord>> {
    let raws = parse_raw(raw)?;
    Ok(policy.accept_all(raws))
}

pub(crate) fn parse_raw(raw: &str) -> CookieResult<Vec<RawCookie>> {
    let content = raw.trim();
    if content.starts_with('[') {
        Ok(serde_json::from_str(content)?)
    } else if content.starts_with('{') {
        let mut object: Value = serde_json::from_str(content)?;
        let cookies = object.get_mut("cookies").map(Value::take);
        match cookies {
            Some(cookies) => Ok(serde_json::from_value(cookies)?),
            None => Ok(vec![serde_json::from_value(object)?]),
        }
    } else {
        Ok(parse_netscape(content))
    }
}

fn parse_netscape(content: &str) -> Vec<RawCookie> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                debug!(fields = fields.len(), "skipping malformed netscape cookie line");
                return None;
            }
            let expires = match fields[4] {
                "0" => None,
                other => match other.parse::<i64>() {
                    Ok(seconds) => Some(Value::from(seconds)),
                    Err(_) => {
                        debug!(expiry = other, "treating unparsable expiry as session cookie");
                        None
                    }
                },
            };
            Some(RawCookie {
                domain: Some(fields[0].to_string()),
                http_only: Some(fields[1].eq_ignore_ascii_case("true")),
                path: Some(fields[2].to_string()),
                secure: Some(fields[3].eq_ignore_ascii_case("true")),
                expires,
                name: Some(fields[5].to_string()),
                value: Some(fields[6].to_string()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::CookieError;

    fn policy() -> CookiePolicy {
        CookiePolicy::from_platform(&PlatformSection::default())
    }

    #[test]
    fn parses_json_array_and_fills_defaults() {
        let raw = r#"[{"name":"web_session","value":"abc"},{"name":"a1","value":"x","domain":".xiaohongshu.com","path":"/api","secure":false,"httpOnly":true,"expirationDate":1893456000.5}]"#;
        let cookies = parse_cookies(raw, &policy()).unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].domain, ".xiaohongshu.com");
        assert_eq!(cookies[0].path, "/");
        assert!(cookies[0].secure);
        assert_eq!(cookies[0].expires_at, None);
        assert_eq!(cookies[1].path, "/api");
        assert!(!cookies[1].secure);
        assert!(cookies[1].http_only);
        assert_eq!(cookies[1].expires_at, Some(1_893_456_000));
    }

    #[test]
    fn parses_object_with_cookies_field() {
        let raw = r#"{"cookies":[{"name":"sessionid","value":"s1"}],"savedAt":"2024-01-01T00:00:00Z"}"#;
        let cookies = parse_cookies(raw, &policy()).unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "sessionid");
    }

    #[test]
    fn parses_single_cookie_object() {
        let raw = r#"{"name":"xsec_token","value":"t","expires":"1893456000"}"#;
        let cookies = parse_cookies(raw, &policy()).unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].expires_at, Some(1_893_456_000));
    }

    #[test]
    fn parses_netscape_export() {
        let raw = "# Netscape HTTP Cookie File\n\n.xiaohongshu.com\tTRUE\t/\tTRUE\t0\tweb_session\tabc\n.xiaohongshu.com\tFALSE\t/\tFALSE\t1893456000\tcustom\tv\nshort\tline\n";
        let cookies = parse_cookies(raw, &policy()).unwrap();
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].http_only);
        assert!(cookies[0].secure);
        assert_eq!(cookies[0].expires_at, None);
        assert_eq!(cookies[1].name, "custom");
        assert!(!cookies[1].secure);
        assert_eq!(cookies[1].expires_at, Some(1_893_456_000));
    }

    #[test]
    fn drops_foreign_and_incomplete_cookies() {
        let raw = r#"[
            {"name":"_ga","value":"1","domain":".google.com"},
            {"name":"theme","value":"dark"},
            {"name":"webId","value":"","domain":".xiaohongshu.com"},
            {"value":"orphan","domain":".xiaohongshu.com"},
            {"name":"webId","value":"w","domain":".google.com"},
            {"name":"tracker","value":"t","domain":"fe.xhscdn.com"}
        ]"#;
        let cookies = parse_cookies(raw, &policy()).unwrap();
        let names: Vec<&str> = cookies.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["webId", "tracker"]);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = parse_cookies("[{\"name\": ", &policy()).unwrap_err();
        assert!(matches!(err, CookieError::Json(_)));
    }
}
