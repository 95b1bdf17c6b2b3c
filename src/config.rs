//! Configuration types.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::manager::Domain;

/// How an idle worker is chosen for the next task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingStrategy {
    /// First idle worker in registry order.
    RoundRobin,
    /// Idle worker with the fewest completed tasks.
    LeastBusy,
    /// Idle worker with the lowest error rate.
    PriorityBased,
}

/// Configuration for one worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum concurrent tasks (and workers).
    pub max_workers: usize,
    /// Timeout for tasks that do not carry their own.
    pub default_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub strategy: SchedulingStrategy,
    /// How long shutdown waits for active tasks.
    pub shutdown_grace: Duration,
    /// How often shutdown checks for active tasks.
    pub shutdown_poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            default_timeout: Duration::from_secs(30),
            max_retries: 2,
            strategy: SchedulingStrategy::LeastBusy,
            shutdown_grace: Duration::from_secs(10),
            shutdown_poll_interval: Duration::from_millis(100),
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_workers".to_string(),
                message: "a pool needs at least one worker".to_string(),
            });
        }
        if self.default_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "default_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Pattern-testing domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexConfig {
    pub enabled: bool,
    pub max_workers: usize,
}

impl Default for RegexConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 2,
        }
    }
}

/// AI-assistance domain.
#[derive(Debug, Clone)]
pub struct AiConfig {
    pub enabled: bool,
    pub max_workers: usize,
    pub api_key: Option<SecretString>,
    pub model: String,
    /// 0 disables rate limiting.
    pub rate_limit_per_minute: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_workers: 1,
            api_key: None,
            model: DEFAULT_AI_MODEL.to_string(),
            rate_limit_per_minute: 20,
        }
    }
}

/// Default model for AI requests.
pub const DEFAULT_AI_MODEL: &str = "claude-sonnet-4-20250514";

/// Analysis domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisConfig {
    pub enabled: bool,
    pub max_workers: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_workers: 2,
        }
    }
}

/// Configuration for every domain pool.
#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub regex: RegexConfig,
    pub ai: AiConfig,
    pub analysis: AnalysisConfig,
}

impl ManagerConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
                .unwrap_or(default)
        };
        let number = |key: &str, default: usize| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let api_key = lookup("ANTHROPIC_API_KEY")
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        Self {
            regex: RegexConfig {
                enabled: flag("DEVPOOL_REGEX_ENABLED", defaults.regex.enabled),
                max_workers: number("DEVPOOL_REGEX_WORKERS", defaults.regex.max_workers),
            },
            ai: AiConfig {
                // A key alone is enough to turn the AI domain on.
                enabled: flag("DEVPOOL_AI_ENABLED", api_key.is_some()),
                max_workers: number("DEVPOOL_AI_WORKERS", defaults.ai.max_workers),
                model: lookup("DEVPOOL_AI_MODEL").unwrap_or(defaults.ai.model),
                rate_limit_per_minute: lookup("DEVPOOL_AI_RATE_LIMIT")
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(defaults.ai.rate_limit_per_minute),
                api_key,
            },
            analysis: AnalysisConfig {
                enabled: flag("DEVPOOL_ANALYSIS_ENABLED", defaults.analysis.enabled),
                max_workers: number("DEVPOOL_ANALYSIS_WORKERS", defaults.analysis.max_workers),
            },
        }
    }

    /// Whether a pool should exist for `domain`.
    pub fn is_active(&self, domain: Domain) -> bool {
        match domain {
            Domain::Regex => self.regex.enabled,
            Domain::Ai => self.ai.enabled && self.ai.api_key.is_some(),
            Domain::Analysis => self.analysis.enabled,
        }
    }

    pub fn max_workers(&self, domain: Domain) -> usize {
        match domain {
            Domain::Regex => self.regex.max_workers,
            Domain::Ai => self.ai.max_workers,
            Domain::Analysis => self.analysis.max_workers,
        }
    }

    /// Pool parameters for a domain.
    pub fn pool_config(&self, domain: Domain) -> PoolConfig {
        let (default_timeout, max_retries, strategy) = match domain {
            Domain::Regex => (Duration::from_secs(10), 2, SchedulingStrategy::LeastBusy),
            Domain::Ai => (Duration::from_secs(60), 3, SchedulingStrategy::RoundRobin),
            Domain::Analysis => (Duration::from_secs(30), 2, SchedulingStrategy::PriorityBased),
        };
        PoolConfig {
            max_workers: self.max_workers(domain),
            default_timeout,
            max_retries,
            strategy,
            ..PoolConfig::default()
        }
    }

    /// Check the pool parameters of every domain, enabled or not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for domain in Domain::ALL {
            self.pool_config(domain).validate().map_err(|e| match e {
                ConfigError::InvalidValue { key, message } => ConfigError::InvalidValue {
                    key: format!("{domain}.{key}"),
                    message,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    /// Merge a partial update.
    pub fn apply(&mut self, update: ConfigUpdate) {
        if let Some(regex) = update.regex {
            if let Some(enabled) = regex.enabled {
                self.regex.enabled = enabled;
            }
            if let Some(max_workers) = regex.max_workers {
                self.regex.max_workers = max_workers;
            }
        }
        if let Some(ai) = update.ai {
            if let Some(enabled) = ai.enabled {
                self.ai.enabled = enabled;
            }
            if let Some(max_workers) = ai.max_workers {
                self.ai.max_workers = max_workers;
            }
            if let Some(api_key) = ai.api_key {
                self.ai.api_key = Some(api_key);
            }
            if let Some(model) = ai.model {
                self.ai.model = model;
            }
            if let Some(rate) = ai.rate_limit_per_minute {
                self.ai.rate_limit_per_minute = rate;
            }
        }
        if let Some(analysis) = update.analysis {
            if let Some(enabled) = analysis.enabled {
                self.analysis.enabled = enabled;
            }
            if let Some(max_workers) = analysis.max_workers {
                self.analysis.max_workers = max_workers;
            }
        }
    }
}

/// Partial update for [`ManagerConfig`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub regex: Option<DomainUpdate>,
    pub ai: Option<AiUpdate>,
    pub analysis: Option<DomainUpdate>,
}

#[derive(Debug, Clone, Default)]
pub struct DomainUpdate {
    pub enabled: Option<bool>,
    pub max_workers: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct AiUpdate {
    pub enabled: Option<bool>,
    pub max_workers: Option<usize>,
    pub api_key: Option<SecretString>,
    pub model: Option<String>,
    pub rate_limit_per_minute: Option<u32>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = ManagerConfig::from_lookup(|_| None);
        assert!(config.regex.enabled);
        assert!(config.analysis.enabled);
        assert!(!config.ai.enabled);
        assert!(!config.is_active(Domain::Ai));
        assert_eq!(config.ai.model, DEFAULT_AI_MODEL);
    }

    #[test]
    fn api_key_enables_ai() {
        let config = ManagerConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("DEVPOOL_AI_RATE_LIMIT", "5"),
            ("DEVPOOL_REGEX_WORKERS", "4"),
            ("DEVPOOL_ANALYSIS_ENABLED", "false"),
        ]));
        assert!(config.is_active(Domain::Ai));
        assert_eq!(config.ai.api_key.as_ref().unwrap().expose_secret(), "sk-test");
        assert_eq!(config.ai.rate_limit_per_minute, 5);
        assert_eq!(config.regex.max_workers, 4);
        assert!(!config.is_active(Domain::Analysis));
    }

    #[test]
    fn enabled_ai_without_key_is_inactive() {
        let config = ManagerConfig::from_lookup(lookup(&[("DEVPOOL_AI_ENABLED", "true")]));
        assert!(config.ai.enabled);
        assert!(!config.is_active(Domain::Ai));
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = ManagerConfig::from_lookup(lookup(&[("DEVPOOL_REGEX_WORKERS", "many")]));
        assert_eq!(config.regex.max_workers, 2);
    }

    #[test]
    fn apply_merges_only_given_fields() {
        let mut config = ManagerConfig::default();
        config.apply(ConfigUpdate {
            regex: Some(DomainUpdate {
                max_workers: Some(5),
                ..Default::default()
            }),
            ai: Some(AiUpdate {
                rate_limit_per_minute: Some(7),
                ..Default::default()
            }),
            analysis: None,
        });
        assert_eq!(config.regex.max_workers, 5);
        assert!(config.regex.enabled);
        assert_eq!(config.ai.rate_limit_per_minute, 7);
        assert_eq!(config.ai.max_workers, 1);
    }

    #[test]
    fn pool_config_per_domain() {
        let config = ManagerConfig::default();
        let ai = config.pool_config(Domain::Ai);
        assert_eq!(ai.max_retries, 3);
        assert_eq!(ai.strategy, SchedulingStrategy::RoundRobin);
        let analysis = config.pool_config(Domain::Analysis);
        assert_eq!(analysis.strategy, SchedulingStrategy::PriorityBased);
        assert_eq!(analysis.max_workers, 2);
    }

    #[test]
    fn validate_names_the_offending_domain() {
        let mut config = ManagerConfig::default();
        assert!(config.validate().is_ok());

        config.analysis.max_workers = 0;
        match config.validate() {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "analysis.max_workers"),
            other => panic!("expected invalid value, got {other:?}"),
        }
    }

    #[test]
    fn zero_workers_is_invalid() {
        let config = PoolConfig {
            max_workers: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
