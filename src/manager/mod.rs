//! Multi-pool orchestration: one worker pool per task domain.

mod batch;
mod health;
mod manager;
mod stats;

pub use batch::BatchOutcome;
pub use health::HealthReport;
pub use manager::WorkerManager;
pub use stats::{DetailedStats, DomainDetail, DomainStats, ManagerStats};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::channels::{ChannelFactory, LocalChannelFactory};
use crate::config::ManagerConfig;
use crate::error::ConfigError;
use crate::handlers::{AiHandler, AnalysisHandler, AnthropicBackend, RegexHandler, TaskHandler};

/// A family of related operations served by its own pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    Regex,
    Ai,
    Analysis,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Regex, Domain::Ai, Domain::Analysis];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Ai => "ai",
            Self::Analysis => "analysis",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the channel factory a domain's pool runs on.
pub trait ChannelProvider: Send + Sync {
    fn factory(
        &self,
        domain: Domain,
        config: &ManagerConfig,
    ) -> Result<Arc<dyn ChannelFactory>, ConfigError>;
}

/// In-process channels running the built-in handlers.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalChannelProvider;

impl ChannelProvider for LocalChannelProvider {
    fn factory(
        &self,
        domain: Domain,
        config: &ManagerConfig,
    ) -> Result<Arc<dyn ChannelFactory>, ConfigError> {
        let handler: Arc<dyn TaskHandler> = match domain {
            Domain::Regex => Arc::new(RegexHandler::new()),
            Domain::Analysis => Arc::new(AnalysisHandler::new()),
            Domain::Ai => {
                let api_key = config.ai.api_key.clone().ok_or_else(|| ConfigError::MissingRequired {
                    key: "ANTHROPIC_API_KEY".to_string(),
                    hint: "Set ANTHROPIC_API_KEY to enable the AI domain".to_string(),
                })?;
                let backend = AnthropicBackend::new(api_key, config.ai.model.clone());
                Arc::new(AiHandler::new(
                    Arc::new(backend),
                    config.ai.rate_limit_per_minute,
                ))
            }
        };
        Ok(Arc::new(LocalChannelFactory::new(handler)))
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    #[test]
    fn domain_names() {
        assert_eq!(Domain::Ai.to_string(), "ai");
        assert_eq!(serde_json::to_value(Domain::Analysis).unwrap(), "analysis");
    }

    #[test]
    fn ai_factory_needs_a_key() {
        let mut config = ManagerConfig::default();
        let err = LocalChannelProvider.factory(Domain::Ai, &config).err();
        assert!(matches!(err, Some(ConfigError::MissingRequired { .. })));

        config.ai.api_key = Some(SecretString::from("sk-test"));
        assert!(LocalChannelProvider.factory(Domain::Ai, &config).is_ok());
        assert!(LocalChannelProvider.factory(Domain::Regex, &config).is_ok());
    }
}
