//! AI-assistance task bodies backed by a chat-completion API.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;

use super::rate_limit::RateLimiter;
use super::{TaskHandler, unsupported};
use crate::channels::ProgressReporter;
use crate::error::HandlerError;
use crate::payload::{AiCompletion, TaskPayload};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// A text completion service.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, HandlerError>;
}

/// Anthropic Messages API over HTTPS.
pub struct AnthropicBackend {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
}

impl AnthropicBackend {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl MessagesResponse {
    fn into_text(self) -> Result<String, HandlerError> {
        let text: Vec<String> = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        if text.is_empty() {
            return Err(HandlerError::Backend(
                "response contained no text content".to_string(),
            ));
        }
        Ok(text.join("\n"))
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, system: &str, prompt: &str) -> Result<String, HandlerError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": system,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| HandlerError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, model = %self.model, "Anthropic request failed");
            return Err(HandlerError::Backend(format!(
                "Anthropic API returned {status}: {detail}"
            )));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| HandlerError::Backend(format!("malformed response: {e}")))?;
        parsed.into_text()
    }
}

/// Runs AI payloads. One instance serves every worker of the AI pool, so the
/// rate limit applies to the pool as a whole.
pub struct AiHandler {
    backend: Arc<dyn CompletionBackend>,
    limiter: RateLimiter,
}

impl AiHandler {
    pub fn new(backend: Arc<dyn CompletionBackend>, rate_limit_per_minute: u32) -> Self {
        Self {
            backend,
            limiter: RateLimiter::new(rate_limit_per_minute),
        }
    }

    async fn complete(
        &self,
        system: &str,
        prompt: String,
        progress: &ProgressReporter,
    ) -> Result<Value, HandlerError> {
        self.limiter.acquire().await;
        progress.report(0.1);

        let content = self.backend.complete(system, &prompt).await?;
        progress.report(1.0);

        Ok(serde_json::to_value(AiCompletion {
            content,
            model: self.backend.model().to_string(),
        })?)
    }
}

fn language_hint(language: Option<&str>) -> String {
    language
        .map(|lang| format!(" in {lang}"))
        .unwrap_or_default()
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl TaskHandler for AiHandler {
    fn name(&self) -> &str {
        "ai"
    }

    async fn handle(
        &self,
        payload: TaskPayload,
        progress: &ProgressReporter,
    ) -> Result<Value, HandlerError> {
        match payload {
            TaskPayload::GenerateCode(request) => {
                let prompt = format!(
                    "Write code{}.\n\n{}",
                    language_hint(request.language.as_deref()),
                    request.prompt
                );
                self.complete(
                    "You are a senior software engineer. Reply with working code and a short explanation.",
                    prompt,
                    progress,
                )
                .await
            }
            TaskPayload::ExplainRegex(request) => {
                let mut prompt = format!("Explain this regular expression step by step:\n\n{}", request.pattern);
                if let Some(context) = request.context {
                    prompt.push_str(&format!("\n\nIt is used for: {context}"));
                }
                self.complete(
                    "You explain regular expressions precisely and point out edge cases.",
                    prompt,
                    progress,
                )
                .await
            }
            TaskPayload::DebugCode(request) => {
                let mut prompt = format!(
                    "Find and fix the bug in this code{}:\n\n```\n{}\n```",
                    language_hint(request.language.as_deref()),
                    request.code
                );
                if let Some(error) = request.error {
                    prompt.push_str(&format!("\n\nObserved error:\n{error}"));
                }
                self.complete(
                    "You are an expert debugger. Identify the root cause before proposing a fix.",
                    prompt,
                    progress,
                )
                .await
            }
            TaskPayload::PlanArchitecture(request) => {
                let mut prompt = format!("Plan the architecture for:\n\n{}", request.description);
                if !request.constraints.is_empty() {
                    prompt.push_str(&format!(
                        "\n\nConstraints:\n{}",
                        bullet_list(&request.constraints)
                    ));
                }
                self.complete(
                    "You are a software architect. Describe components, data flow and trade-offs.",
                    prompt,
                    progress,
                )
                .await
            }
            TaskPayload::RefactorCode(request) => {
                let mut prompt = format!(
                    "Refactor this code{}:\n\n```\n{}\n```",
                    language_hint(request.language.as_deref()),
                    request.code
                );
                if !request.goals.is_empty() {
                    prompt.push_str(&format!("\n\nGoals:\n{}", bullet_list(&request.goals)));
                }
                self.complete(
                    "You refactor code without changing its behaviour.",
                    prompt,
                    progress,
                )
                .await
            }
            TaskPayload::GetRateLimitStatus => Ok(serde_json::to_value(self.limiter.status().await)?),
            TaskPayload::UpdateRateLimit(update) => {
                self.limiter.set_limit(update.per_minute).await;
                Ok(serde_json::to_value(self.limiter.status().await)?)
            }
            other => Err(unsupported(self.name(), &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::channels::ResponseSink;
    use crate::payload::{
        CodeGeneration, CodeRefactoring, PatternValidation, RateLimitStatus, RateLimitUpdate,
    };
    use crate::pool::{TaskId, WorkerId};

    #[derive(Default)]
    struct FakeBackend {
        prompts: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl CompletionBackend for FakeBackend {
        fn model(&self) -> &str {
            "fake-model"
        }

        async fn complete(&self, system: &str, prompt: &str) -> Result<String, HandlerError> {
            self.prompts
                .lock()
                .unwrap()
                .push((system.to_string(), prompt.to_string()));
            if self.fail {
                return Err(HandlerError::Backend("503".into()));
            }
            Ok("answer".to_string())
        }
    }

    fn reporter() -> ProgressReporter {
        let (tx, _rx) = mpsc::unbounded_channel();
        ProgressReporter::new(TaskId::new(), 0, ResponseSink::new(WorkerId::new(), tx))
    }

    #[tokio::test]
    async fn generate_code_builds_prompt_and_wraps_result() {
        let backend = Arc::new(FakeBackend::default());
        let handler = AiHandler::new(backend.clone(), 10);

        let value = handler
            .handle(
                TaskPayload::GenerateCode(CodeGeneration {
                    prompt: "parse a CSV line".into(),
                    language: Some("Rust".into()),
                }),
                &reporter(),
            )
            .await
            .unwrap();

        let completion: AiCompletion = serde_json::from_value(value).unwrap();
        assert_eq!(completion.content, "answer");
        assert_eq!(completion.model, "fake-model");

        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].1.starts_with("Write code in Rust."));
        assert!(prompts[0].1.contains("parse a CSV line"));
    }

    #[tokio::test]
    async fn refactor_lists_goals() {
        let backend = Arc::new(FakeBackend::default());
        let handler = AiHandler::new(backend.clone(), 0);
        handler
            .handle(
                TaskPayload::RefactorCode(CodeRefactoring {
                    code: "fn a() {}".into(),
                    goals: vec!["readability".into(), "speed".into()],
                    language: None,
                }),
                &reporter(),
            )
            .await
            .unwrap();
        let prompts = backend.prompts.lock().unwrap();
        assert!(prompts[0].1.contains("- readability\n- speed"));
    }

    #[tokio::test]
    async fn completions_consume_rate_limit() {
        let handler = AiHandler::new(Arc::new(FakeBackend::default()), 5);
        for _ in 0..2 {
            handler
                .handle(
                    TaskPayload::GenerateCode(CodeGeneration {
                        prompt: "x".into(),
                        language: None,
                    }),
                    &reporter(),
                )
                .await
                .unwrap();
        }

        let value = handler
            .handle(TaskPayload::GetRateLimitStatus, &reporter())
            .await
            .unwrap();
        let status: RateLimitStatus = serde_json::from_value(value).unwrap();
        assert_eq!(status.used, 2);
        assert_eq!(status.remaining, 3);

        let value = handler
            .handle(
                TaskPayload::UpdateRateLimit(RateLimitUpdate { per_minute: 50 }),
                &reporter(),
            )
            .await
            .unwrap();
        let status: RateLimitStatus = serde_json::from_value(value).unwrap();
        assert_eq!(status.limit_per_minute, 50);
        assert_eq!(status.remaining, 48);
    }

    #[tokio::test]
    async fn backend_failure_is_returned() {
        let backend = Arc::new(FakeBackend {
            fail: true,
            ..Default::default()
        });
        let handler = AiHandler::new(backend, 0);
        let err = handler
            .handle(
                TaskPayload::GenerateCode(CodeGeneration {
                    prompt: "x".into(),
                    language: None,
                }),
                &reporter(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Backend(_)));
    }

    #[tokio::test]
    async fn regex_payloads_are_unsupported() {
        let handler = AiHandler::new(Arc::new(FakeBackend::default()), 0);
        let err = handler
            .handle(
                TaskPayload::Validate(PatternValidation {
                    pattern: "a".into(),
                    flags: String::new(),
                }),
                &reporter(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Unsupported { .. }));
    }

    #[test]
    fn messages_response_text_is_joined() {
        let parsed: MessagesResponse = serde_json::from_str(
            r#"{"content":[{"type":"text","text":"a"},{"type":"tool_use","id":"x"},{"type":"text","text":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.into_text().unwrap(), "a\nb");

        let empty: MessagesResponse = serde_json::from_str(r#"{"content":[]}"#).unwrap();
        assert!(empty.into_text().is_err());
    }

    #[test]
    fn anthropic_backend_reports_model() {
        let backend = AnthropicBackend::new(SecretString::from("sk-test"), "claude-test");
        assert_eq!(backend.model(), "claude-test");
    }
}
