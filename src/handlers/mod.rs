//! Task bodies run inside execution channels, one handler per domain.
//!
//! A handler only sees a payload and a progress reporter. It never touches
//! pool state; its result or error is carried back over the channel.

pub mod ai;
pub mod analysis;
pub mod rate_limit;
pub mod regex;

pub use ai::{AiHandler, AnthropicBackend, CompletionBackend};
pub use analysis::AnalysisHandler;
pub use rate_limit::RateLimiter;
pub use self::regex::RegexHandler;

use async_trait::async_trait;

use crate::channels::ProgressReporter;
use crate::error::HandlerError;
use crate::payload::TaskPayload;

/// Executes payloads of one domain.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handler name, used in logs and `Unsupported` errors.
    fn name(&self) -> &str;

    async fn handle(
        &self,
        payload: TaskPayload,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, HandlerError>;
}

pub(crate) fn unsupported(handler: &str, payload: &TaskPayload) -> HandlerError {
    HandlerError::Unsupported {
        handler: handler.to_string(),
        task_type: payload.kind().to_string(),
    }
}
