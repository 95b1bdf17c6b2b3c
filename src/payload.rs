//! Task payloads and typed results for every domain operation.
//!
//! `TaskPayload` is the closed set of work a pool can carry. Its serde tag is
//! the wire `type` string, its content the wire `data` object. The catalog
//! (domain, default priority, default timeout) lives on the enum so that the
//! manager and the binary route work the same way.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::manager::Domain;
use crate::pool::Priority;

/// A unit of work, tagged by operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum TaskPayload {
    Test(PatternTest),
    Analyze(PatternPerformance),
    Validate(PatternValidation),
    GenerateCode(CodeGeneration),
    ExplainRegex(RegexExplanation),
    DebugCode(CodeDebugging),
    PlanArchitecture(ArchitecturePlanning),
    RefactorCode(CodeRefactoring),
    GetRateLimitStatus,
    UpdateRateLimit(RateLimitUpdate),
    AnalyzeComplexity(ComplexityAnalysis),
    AnalyzeProgress(ProgressAnalysis),
}

impl TaskPayload {
    /// Wire `type` tag of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Test(_) => "test",
            Self::Analyze(_) => "analyze",
            Self::Validate(_) => "validate",
            Self::GenerateCode(_) => "generate-code",
            Self::ExplainRegex(_) => "explain-regex",
            Self::DebugCode(_) => "debug-code",
            Self::PlanArchitecture(_) => "plan-architecture",
            Self::RefactorCode(_) => "refactor-code",
            Self::GetRateLimitStatus => "get-rate-limit-status",
            Self::UpdateRateLimit(_) => "update-rate-limit",
            Self::AnalyzeComplexity(_) => "analyze-complexity",
            Self::AnalyzeProgress(_) => "analyze-progress",
        }
    }

    /// Domain whose pool runs this payload.
    pub fn domain(&self) -> Domain {
        match self {
            Self::Test(_) | Self::Analyze(_) | Self::Validate(_) => Domain::Regex,
            Self::AnalyzeComplexity(_) | Self::AnalyzeProgress(_) => Domain::Analysis,
            _ => Domain::Ai,
        }
    }

    /// Priority used when the caller does not override it.
    pub fn default_priority(&self) -> Priority {
        match self {
            Self::Validate(_)
            | Self::DebugCode(_)
            | Self::GetRateLimitStatus
            | Self::UpdateRateLimit(_) => Priority::High,
            Self::Analyze(_) | Self::AnalyzeProgress(_) => Priority::Low,
            _ => Priority::Medium,
        }
    }

    /// Timeout override; `None` falls back to the pool default.
    pub fn default_timeout(&self) -> Option<Duration> {
        match self {
            Self::GenerateCode(_) | Self::RefactorCode(_) => Some(Duration::from_secs(60)),
            Self::ExplainRegex(_) => Some(Duration::from_secs(30)),
            Self::DebugCode(_) => Some(Duration::from_secs(45)),
            Self::PlanArchitecture(_) => Some(Duration::from_secs(90)),
            _ => None,
        }
    }
}

// ── Pattern testing ─────────────────────────────────────────────────

/// Run a pattern against a set of inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTest {
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
    pub inputs: Vec<String>,
}

/// Time a pattern against a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternPerformance {
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
    pub sample: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
}

fn default_iterations() -> u32 {
    100
}

/// Check that a pattern compiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternValidation {
    pub pattern: String,
    #[serde(default)]
    pub flags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSpan {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub groups: Vec<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputMatches {
    pub input: String,
    pub matched: bool,
    pub matches: Vec<MatchSpan>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternTestReport {
    pub pattern: String,
    pub results: Vec<InputMatches>,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub iterations: u32,
    pub total_ms: f64,
    pub average_ms: f64,
    pub matches_per_iteration: usize,
    /// Nested quantifiers such as `(a+)+`; slow on backtracking engines.
    pub nested_quantifiers: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub error: Option<String>,
    pub group_count: usize,
}

// ── AI assistance ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeGeneration {
    pub prompt: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegexExplanation {
    pub pattern: String,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeDebugging {
    pub code: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitecturePlanning {
    pub description: String,
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRefactoring {
    pub code: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitUpdate {
    pub per_minute: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiCompletion {
    pub content: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// 0 means unlimited.
    pub limit_per_minute: u32,
    pub used: u32,
    pub remaining: u32,
    pub reset_in_ms: u64,
}

// ── Analysis ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityAnalysis {
    pub source: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressAnalysis {
    pub items: Vec<ProgressItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Todo,
    InProgress,
    Done,
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressItem {
    pub name: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub estimate_hours: f64,
    #[serde(default)]
    pub spent_hours: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityReport {
    pub lines: usize,
    pub functions: usize,
    pub cyclomatic: usize,
    pub max_nesting: usize,
    pub level: ComplexityLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub total: usize,
    pub completed: usize,
    pub blocked: usize,
    pub percent_complete: f64,
    pub remaining_hours: f64,
    /// Items whose spent time already exceeds their estimate.
    pub over_estimate: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_matches_operation_table() {
        let explain = TaskPayload::ExplainRegex(RegexExplanation {
            pattern: "a+".into(),
            context: None,
        });
        assert_eq!(explain.kind(), "explain-regex");
        assert_eq!(explain.domain(), Domain::Ai);
        assert_eq!(explain.default_priority(), Priority::Medium);
        assert_eq!(explain.default_timeout(), Some(Duration::from_secs(30)));

        let validate = TaskPayload::Validate(PatternValidation {
            pattern: "a".into(),
            flags: String::new(),
        });
        assert_eq!(validate.domain(), Domain::Regex);
        assert_eq!(validate.default_priority(), Priority::High);
        assert_eq!(validate.default_timeout(), None);

        let status = TaskPayload::GetRateLimitStatus;
        assert_eq!(status.domain(), Domain::Ai);
        assert_eq!(status.default_priority(), Priority::High);

        let progress = TaskPayload::AnalyzeProgress(ProgressAnalysis { items: vec![] });
        assert_eq!(progress.domain(), Domain::Analysis);
        assert_eq!(progress.default_priority(), Priority::Low);
    }

    #[test]
    fn wire_shape_uses_type_and_data() {
        let payload = TaskPayload::Test(PatternTest {
            pattern: "\\d+".into(),
            flags: "g".into(),
            inputs: vec!["a1".into()],
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "test");
        assert_eq!(json["data"]["pattern"], "\\d+");

        let parsed: TaskPayload =
            serde_json::from_str(r#"{"type":"get-rate-limit-status"}"#).unwrap();
        assert_eq!(parsed, TaskPayload::GetRateLimitStatus);
    }

    #[test]
    fn omitted_fields_take_defaults() {
        let parsed: TaskPayload = serde_json::from_str(
            r#"{"type":"analyze","data":{"pattern":"a","sample":"aaa"}}"#,
        )
        .unwrap();
        match parsed {
            TaskPayload::Analyze(p) => {
                assert_eq!(p.iterations, 100);
                assert!(p.flags.is_empty());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
