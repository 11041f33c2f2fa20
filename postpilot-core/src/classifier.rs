//! Interprets the free-text result of a publish attempt.
//!
//! The automation agent reports back in prose, so the verdict is a keyword
//! heuristic. Rules are evaluated in the order of [`RULES`]; the first one
//! that matches decides.

use serde::{Deserialize, Serialize};

pub const SUCCESS_MARKERS: &[&str] = &[
    "发布成功",
    "已发布",
    "publish success",
    "successfully published",
    "发表成功",
    "posting completed",
    "发送成功",
    "published=true",
];

pub const FAILURE_MARKERS: &[&str] = &[
    "failed",
    "error",
    "错误",
    "失败",
    "未完成",
    "incomplete",
    "failed to complete",
    "maximum steps",
    "无法",
    "不能",
];

pub const RETRY_MARKERS: &[&str] = &[
    "你访问的页面不见了",
    "页面不见了",
    "page not found",
    "404",
    "网络错误",
    "network error",
    "连接失败",
    "connection failed",
    "页面加载失败",
    "page load failed",
    "空白页面",
    "blank page",
];

/// Query parameter the platform appends once a note is live.
pub const PUBLISHED_URL_MARKER: &str = "published=true";

const MAX_STEPS_MARKER: &str = "maximum steps";
const MIN_CONCLUSIVE_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    RetryableFailure,
    HardFailure,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::RetryableFailure => "retryable_failure",
            Verdict::HardFailure => "hard_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Verdict::Success)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to conclude when the agent's answer carries no recognizable marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguousPolicy {
    #[default]
    AssumeSuccess,
    AssumeFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MarkerAnalysis {
    pub has_success_marker: bool,
    pub has_failure_marker: bool,
    pub has_retry_marker: bool,
    pub url_success: bool,
    pub too_short: bool,
    pub max_steps_reached: bool,
}

impl MarkerAnalysis {
    fn inspect(result_text: &str, full_result_text: &str) -> Self {
        let text = result_text.to_lowercase();
        let full = full_result_text.to_lowercase();
        Self {
            has_success_marker: contains_any(&text, SUCCESS_MARKERS),
            has_failure_marker: contains_any(&text, FAILURE_MARKERS),
            has_retry_marker: contains_any(&text, RETRY_MARKERS),
            url_success: full.contains(PUBLISHED_URL_MARKER),
            too_short: text.chars().count() < MIN_CONCLUSIVE_CHARS,
            max_steps_reached: text.contains(MAX_STEPS_MARKER),
        }
    }

    fn confirmed(&self) -> bool {
        self.has_success_marker || self.url_success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub verdict: Verdict,
    pub reason: String,
    pub raw_result: String,
    pub analysis: MarkerAnalysis,
}

struct Rule {
    name: &'static str,
    applies: fn(&MarkerAnalysis) -> bool,
    verdict: Verdict,
}

fn transient_without_confirmation(a: &MarkerAnalysis) -> bool {
    a.has_retry_marker && !a.confirmed()
}

fn success_marker(a: &MarkerAnalysis) -> bool {
    a.has_success_marker
}

fn published_url(a: &MarkerAnalysis) -> bool {
    a.url_success
}

fn failure_marker(a: &MarkerAnalysis) -> bool {
    a.has_failure_marker
}

fn too_short(a: &MarkerAnalysis) -> bool {
    a.too_short
}

fn max_steps(a: &MarkerAnalysis) -> bool {
    a.max_steps_reached
}

const RULES: &[Rule] = &[
    Rule {
        name: "transient page error without confirmation",
        applies: transient_without_confirmation,
        verdict: Verdict::RetryableFailure,
    },
    Rule {
        name: "success marker present",
        applies: success_marker,
        verdict: Verdict::Success,
    },
    Rule {
        name: "published url reported",
        applies: published_url,
        verdict: Verdict::Success,
    },
    Rule {
        name: "failure marker present",
        applies: failure_marker,
        verdict: Verdict::HardFailure,
    },
    Rule {
        name: "result too short to be conclusive",
        applies: too_short,
        verdict: Verdict::HardFailure,
    },
    Rule {
        name: "agent hit its step limit",
        applies: max_steps,
        verdict: Verdict::HardFailure,
    },
];

#[derive(Debug, Clone, Copy, Default)]
pub struct OutcomeClassifier {
    ambiguous: AmbiguousPolicy,
}

impl OutcomeClassifier {
    pub fn new(ambiguous: AmbiguousPolicy) -> Self {
        Self { ambiguous }
    }

    pub fn ambiguous_policy(&self) -> AmbiguousPolicy {
        self.ambiguous
    }

    pub fn classify(&self, result_text: &str, full_result_text: &str) -> PublishOutcome {
        let analysis = MarkerAnalysis::inspect(result_text, full_result_text);
        let (verdict, reason) = RULES
            .iter()
            .find(|rule| (rule.applies)(&analysis))
            .map(|rule| (rule.verdict, rule.name))
            .unwrap_or(match self.ambiguous {
                AmbiguousPolicy::AssumeSuccess => {
                    (Verdict::Success, "no marker matched, assumed complete")
                }
                AmbiguousPolicy::AssumeFailure => {
                    (Verdict::HardFailure, "no marker matched, assumed failed")
                }
            });
        PublishOutcome {
            verdict,
            reason: reason.to_string(),
            raw_result: result_text.to_string(),
            analysis,
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}
