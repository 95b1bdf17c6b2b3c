//! Code-complexity and project-progress task bodies.

use async_trait::async_trait;
use serde_json::Value;

use super::{TaskHandler, unsupported};
use crate::channels::ProgressReporter;
use crate::error::HandlerError;
use crate::payload::{
    ComplexityLevel, ComplexityReport, ItemStatus, ProgressAnalysis, ProgressReport, TaskPayload,
};

const FUNCTION_KEYWORDS: &[&str] = &["fn", "function", "def", "func"];
const DECISION_KEYWORDS: &[&str] = &[
    "if", "elif", "for", "while", "loop", "case", "catch", "except", "match",
];
const DECISION_OPERATORS: &[&str] = &["&&", "||"];

/// Strip a trailing line comment. Good enough for a heuristic.
fn code_part(line: &str) -> &str {
    let line = line.trim();
    if line.starts_with('#') {
        return "";
    }
    match line.find("//") {
        Some(at) => &line[..at],
        None => line,
    }
}

fn complexity_level(cyclomatic: usize) -> ComplexityLevel {
    match cyclomatic {
        0..=5 => ComplexityLevel::Low,
        6..=10 => ComplexityLevel::Medium,
        11..=20 => ComplexityLevel::High,
        _ => ComplexityLevel::VeryHigh,
    }
}

/// Heuristic metrics: function count, decision points, brace nesting.
pub fn analyze_complexity(source: &str) -> ComplexityReport {
    let mut lines = 0;
    let mut functions = 0;
    let mut decisions = 0;
    let mut depth: usize = 0;
    let mut max_nesting = 0;

    for line in source.lines() {
        let code = code_part(line);
        if code.is_empty() {
            continue;
        }
        lines += 1;

        for word in code.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
            if FUNCTION_KEYWORDS.contains(&word) {
                functions += 1;
            } else if DECISION_KEYWORDS.contains(&word) {
                decisions += 1;
            }
        }
        decisions += DECISION_OPERATORS
            .iter()
            .map(|op| code.matches(op).count())
            .sum::<usize>();

        for c in code.chars() {
            match c {
                '{' => {
                    depth += 1;
                    max_nesting = max_nesting.max(depth);
                }
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }

    let cyclomatic = decisions + 1;
    ComplexityReport {
        lines,
        functions,
        cyclomatic,
        max_nesting,
        level: complexity_level(cyclomatic),
    }
}

/// Completion percentage, remaining effort and overruns.
pub fn analyze_progress(request: &ProgressAnalysis) -> ProgressReport {
    let total = request.items.len();
    let completed = request
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::Done)
        .count();
    let blocked = request
        .items
        .iter()
        .filter(|item| item.status == ItemStatus::Blocked)
        .count();
    let remaining_hours = request
        .items
        .iter()
        .filter(|item| item.status != ItemStatus::Done)
        .map(|item| (item.estimate_hours - item.spent_hours).max(0.0))
        .sum();
    let over_estimate = request
        .items
        .iter()
        .filter(|item| item.estimate_hours > 0.0 && item.spent_hours > item.estimate_hours)
        .map(|item| item.name.clone())
        .collect();

    let percent_complete = if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64 * 100.0
    };

    ProgressReport {
        total,
        completed,
        blocked,
        percent_complete,
        remaining_hours,
        over_estimate,
    }
}

/// Runs `analyze-complexity` and `analyze-progress` payloads.
#[derive(Debug, Default)]
pub struct AnalysisHandler;

impl AnalysisHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskHandler for AnalysisHandler {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn handle(
        &self,
        payload: TaskPayload,
        progress: &ProgressReporter,
    ) -> Result<Value, HandlerError> {
        let value = match payload {
            TaskPayload::AnalyzeComplexity(request) => {
                serde_json::to_value(analyze_complexity(&request.source))?
            }
            TaskPayload::AnalyzeProgress(request) => {
                serde_json::to_value(analyze_progress(&request))?
            }
            other => return Err(unsupported(self.name(), &other)),
        };
        progress.report(1.0);
        Ok(value)
    }
}
