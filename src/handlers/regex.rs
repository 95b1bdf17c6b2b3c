//! Pattern-testing task bodies.
//!
//! Flags follow the usual single-letter convention: `i` case-insensitive,
//! `m` multi-line, `s` dot matches newline, `x` verbose, `g` report every
//! match instead of the first.

use std::time::Instant;

use ::regex::{Captures, Regex, RegexBuilder};
use async_trait::async_trait;
use serde_json::Value;

use super::{TaskHandler, unsupported};
use crate::channels::ProgressReporter;
use crate::error::HandlerError;
use crate::payload::{
    InputMatches, MatchSpan, PatternPerformance, PatternTest, PatternTestReport,
    PatternValidation, PerformanceReport, TaskPayload, ValidationReport,
};

/// Compiled pattern plus whether every match is wanted.
struct Compiled {
    regex: Regex,
    global: bool,
}

fn compile(pattern: &str, flags: &str) -> Result<Compiled, String> {
    let mut builder = RegexBuilder::new(pattern);
    let mut global = false;
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'g' => global = true,
            // Unicode is always on.
            'u' => {}
            other => return Err(format!("unknown flag '{other}'")),
        }
    }
    let regex = builder.build().map_err(|e| e.to_string())?;
    Ok(Compiled { regex, global })
}

fn span(captures: &Captures<'_>) -> Option<MatchSpan> {
    let whole = captures.get(0)?;
    Some(MatchSpan {
        start: whole.start(),
        end: whole.end(),
        text: whole.as_str().to_string(),
        groups: captures
            .iter()
            .skip(1)
            .map(|group| group.map(|m| m.as_str().to_string()))
            .collect(),
    })
}

/// True when a quantified group itself contains a quantifier, e.g. `(a+)+`.
fn has_nested_quantifier(pattern: &str) -> bool {
    // One flag per open group: does it contain a quantifier?
    let mut groups: Vec<bool> = Vec::new();
    let mut chars = pattern.chars().peekable();
    let mut in_class = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            _ if in_class => {}
            '(' => groups.push(false),
            ')' => {
                let inner = groups.pop().unwrap_or(false);
                let quantified = matches!(chars.peek(), Some('+' | '*' | '{'));
                if inner && quantified {
                    return true;
                }
                if inner || quantified {
                    if let Some(outer) = groups.last_mut() {
                        *outer = true;
                    }
                }
            }
            '+' | '*' | '{' => {
                if let Some(current) = groups.last_mut() {
                    *current = true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Runs `test`, `analyze` and `validate` payloads.
#[derive(Debug, Default)]
pub struct RegexHandler;

impl RegexHandler {
    pub fn new() -> Self {
        Self
    }

    fn test(
        &self,
        request: PatternTest,
        progress: &ProgressReporter,
    ) -> Result<PatternTestReport, HandlerError> {
        let compiled = compile(&request.pattern, &request.flags).map_err(HandlerError::InvalidInput)?;
        let started = Instant::now();
        let total = request.inputs.len();

        let mut results = Vec::with_capacity(total);
        for (i, input) in request.inputs.into_iter().enumerate() {
            let matches: Vec<MatchSpan> = if compiled.global {
                compiled.regex.captures_iter(&input).filter_map(|c| span(&c)).collect()
            } else {
                compiled.regex.captures(&input).and_then(|c| span(&c)).into_iter().collect()
            };
            results.push(InputMatches {
                matched: !matches.is_empty(),
                matches,
                input,
            });
            progress.report((i + 1) as f64 / total as f64);
        }

        Ok(PatternTestReport {
            pattern: request.pattern,
            results,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn analyze(
        &self,
        request: PatternPerformance,
        progress: &ProgressReporter,
    ) -> Result<PerformanceReport, HandlerError> {
        if request.iterations == 0 {
            return Err(HandlerError::InvalidInput(
                "iterations must be greater than zero".to_string(),
            ));
        }
        let compiled = compile(&request.pattern, &request.flags).map_err(HandlerError::InvalidInput)?;
        let step = (request.iterations / 10).max(1);

        let started = Instant::now();
        let mut matches = 0;
        for i in 1..=request.iterations {
            matches = compiled.regex.find_iter(&request.sample).count();
            if i % step == 0 {
                progress.report(f64::from(i) / f64::from(request.iterations));
            }
        }
        let total_ms = started.elapsed().as_secs_f64() * 1000.0;

        Ok(PerformanceReport {
            iterations: request.iterations,
            total_ms,
            average_ms: total_ms / f64::from(request.iterations),
            matches_per_iteration: matches,
            nested_quantifiers: has_nested_quantifier(&request.pattern),
        })
    }

    fn validate(&self, request: PatternValidation) -> ValidationReport {
        match compile(&request.pattern, &request.flags) {
            Ok(compiled) => ValidationReport {
                valid: true,
                error: None,
                group_count: compiled.regex.captures_len() - 1,
            },
            Err(error) => ValidationReport {
                valid: false,
                error: Some(error),
                group_count: 0,
            },
        }
    }
}

#[async_trait]
impl TaskHandler for RegexHandler {
    fn name(&self) -> &str {
        "regex"
    }

    async fn handle(
        &self,
        payload: TaskPayload,
        progress: &ProgressReporter,
    ) -> Result<Value, HandlerError> {
        let value = match payload {
            TaskPayload::Test(request) => serde_json::to_value(self.test(request, progress)?)?,
            TaskPayload::Analyze(request) => {
                serde_json::to_value(self.analyze(request, progress)?)?
            }
            TaskPayload::Validate(request) => serde_json::to_value(self.validate(request))?,
            other => return Err(unsupported(self.name(), &other)),
        };
        Ok(value)
    }
}
