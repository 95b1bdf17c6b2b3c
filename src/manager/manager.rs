//! WorkerManager: owns the domain pools and exposes the typed operation catalog.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::batch::{self, BatchOutcome};
use super::health::{self, HealthReport};
use super::stats::{DetailedStats, DomainDetail, DomainStats, ManagerStats};
use super::{ChannelProvider, Domain};
use crate::config::{AiUpdate, ConfigUpdate, ManagerConfig};
use crate::error::{ConfigError, ManagerError};
use crate::payload::{
    AiCompletion, ArchitecturePlanning, CodeDebugging, CodeGeneration, CodeRefactoring,
    ComplexityAnalysis, ComplexityReport, PatternPerformance, PatternTest, PatternTestReport,
    PatternValidation, PerformanceReport, ProgressAnalysis, ProgressReport, RateLimitStatus,
    RateLimitUpdate, RegexExplanation, TaskPayload, ValidationReport,
};
use crate::pool::{Priority, ProgressObserver, TaskSpec, WorkerPool};

/// Routes work to one pool per domain.
///
/// Built explicitly by the composition root and shared by reference; there is
/// no global instance.
pub struct WorkerManager {
    provider: Arc<dyn ChannelProvider>,
    config: RwLock<ManagerConfig>,
    pools: RwLock<HashMap<Domain, Arc<WorkerPool>>>,
    initialized: AtomicBool,
    /// Serializes initialize/update/shutdown.
    lifecycle: Mutex<()>,
}

impl WorkerManager {
    pub fn new(provider: Arc<dyn ChannelProvider>) -> Self {
        Self {
            provider,
            config: RwLock::new(ManagerConfig::default()),
            pools: RwLock::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    /// Start a pool for every active domain.
    pub async fn initialize(&self, config: ManagerConfig) -> Result<(), ManagerError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_initialized() {
            tracing::warn!("Worker manager already initialized");
            return Ok(());
        }

        let mut pools = HashMap::new();
        for domain in Domain::ALL {
            if !config.is_active(domain) {
                tracing::info!(domain = %domain, "Domain inactive, no pool started");
                continue;
            }
            match self.build_pool(domain, &config) {
                Ok(pool) => {
                    pools.insert(domain, pool);
                }
                Err(e) => {
                    tracing::error!(domain = %domain, error = %e, "Failed to start pool");
                    join_all(pools.values().map(|pool| pool.shutdown())).await;
                    return Err(e);
                }
            }
        }

        let domains: Vec<&str> = Domain::ALL
            .iter()
            .filter(|d| pools.contains_key(d))
            .map(|d| d.as_str())
            .collect();
        *self.pools.write().await = pools;
        *self.config.write().await = config;
        self.initialized.store(true, Ordering::SeqCst);

        tracing::info!(pools = ?domains, "Worker manager initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Current configuration.
    pub async fn config(&self) -> ManagerConfig {
        self.config.read().await.clone()
    }

    fn build_pool(
        &self,
        domain: Domain,
        config: &ManagerConfig,
    ) -> Result<Arc<WorkerPool>, ManagerError> {
        let factory = self.provider.factory(domain, config)?;
        let pool = WorkerPool::new(domain.as_str(), config.pool_config(domain), factory)?;
        Ok(Arc::new(pool))
    }

    async fn pool(&self, domain: Domain) -> Result<Arc<WorkerPool>, ManagerError> {
        self.pools
            .read()
            .await
            .get(&domain)
            .cloned()
            .ok_or(ManagerError::NotInitialized { domain })
    }

    /// Submit a raw spec to a domain's pool.
    pub async fn submit(&self, domain: Domain, spec: TaskSpec) -> Result<Value, ManagerError> {
        let pool = self.pool(domain).await?;
        Ok(pool.submit(spec).await?)
    }

    async fn run_spec<T: DeserializeOwned>(&self, spec: TaskSpec) -> Result<T, ManagerError> {
        let operation = spec.payload.kind();
        let value = self.submit(spec.payload.domain(), spec).await?;
        serde_json::from_value(value).map_err(|source| ManagerError::InvalidResult {
            operation: operation.to_string(),
            source,
        })
    }

    async fn run<T: DeserializeOwned>(&self, payload: TaskPayload) -> Result<T, ManagerError> {
        self.run_spec(TaskSpec::new(payload)).await
    }

    // ── Pattern testing ─────────────────────────────────────────────

    pub async fn test(&self, request: PatternTest) -> Result<PatternTestReport, ManagerError> {
        self.run(TaskPayload::Test(request)).await
    }

    pub async fn analyze_performance(
        &self,
        request: PatternPerformance,
    ) -> Result<PerformanceReport, ManagerError> {
        self.run(TaskPayload::Analyze(request)).await
    }

    pub async fn validate(
        &self,
        request: PatternValidation,
    ) -> Result<ValidationReport, ManagerError> {
        self.run(TaskPayload::Validate(request)).await
    }

    /// Test several patterns one after another.
    pub async fn batch_test(
        &self,
        requests: Vec<PatternTest>,
        progress: Option<ProgressObserver>,
    ) -> Result<Vec<BatchOutcome<PatternTestReport>>, ManagerError> {
        self.pool(Domain::Regex).await?;
        Ok(batch::run_sequential(requests, progress, |request| self.test(request)).await)
    }

    // ── AI assistance ───────────────────────────────────────────────

    pub async fn generate_code(
        &self,
        request: CodeGeneration,
    ) -> Result<AiCompletion, ManagerError> {
        self.run(TaskPayload::GenerateCode(request)).await
    }

    pub async fn explain(&self, request: RegexExplanation) -> Result<AiCompletion, ManagerError> {
        self.run(TaskPayload::ExplainRegex(request)).await
    }

    pub async fn debug_code(&self, request: CodeDebugging) -> Result<AiCompletion, ManagerError> {
        self.run(TaskPayload::DebugCode(request)).await
    }

    pub async fn plan_architecture(
        &self,
        request: ArchitecturePlanning,
    ) -> Result<AiCompletion, ManagerError> {
        self.run(TaskPayload::PlanArchitecture(request)).await
    }

    pub async fn refactor_code(
        &self,
        request: CodeRefactoring,
    ) -> Result<AiCompletion, ManagerError> {
        self.run(TaskPayload::RefactorCode(request)).await
    }

    pub async fn rate_limit_status(&self) -> Result<RateLimitStatus, ManagerError> {
        self.run(TaskPayload::GetRateLimitStatus).await
    }

    // ── Analysis ────────────────────────────────────────────────────

    pub async fn analyze_complexity(
        &self,
        request: ComplexityAnalysis,
    ) -> Result<ComplexityReport, ManagerError> {
        self.run(TaskPayload::AnalyzeComplexity(request)).await
    }

    pub async fn analyze_progress(
        &self,
        request: ProgressAnalysis,
    ) -> Result<ProgressReport, ManagerError> {
        self.run(TaskPayload::AnalyzeProgress(request)).await
    }

    /// Analyze several sources one after another.
    pub async fn batch_analyze(
        &self,
        requests: Vec<ComplexityAnalysis>,
        progress: Option<ProgressObserver>,
    ) -> Result<Vec<BatchOutcome<ComplexityReport>>, ManagerError> {
        self.pool(Domain::Analysis).await?;
        Ok(
            batch::run_sequential(requests, progress, |request| {
                self.analyze_complexity(request)
            })
            .await,
        )
    }

    // ── Runtime configuration ───────────────────────────────────────

    /// Merge `update` into the configuration and reconcile the running pools.
    ///
    /// A merged configuration that fails validation is rejected before
    /// anything changes.
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<(), ManagerError> {
        let _lifecycle = self.lifecycle.lock().await;

        let (old, new) = {
            let mut config = self.config.write().await;
            let mut merged = config.clone();
            merged.apply(update);
            merged.validate()?;
            let old = std::mem::replace(&mut *config, merged);
            (old, config.clone())
        };

        if !self.is_initialized() {
            tracing::debug!("Configuration updated before initialization");
            return Ok(());
        }

        for domain in Domain::ALL {
            match (old.is_active(domain), new.is_active(domain)) {
                (false, true) => {
                    let pool = self.build_pool(domain, &new)?;
                    self.pools.write().await.insert(domain, pool);
                    tracing::info!(domain = %domain, "Pool started");
                }
                (true, false) => {
                    let pool = self.pools.write().await.remove(&domain);
                    if let Some(pool) = pool {
                        pool.shutdown().await;
                    }
                    tracing::info!(domain = %domain, "Pool stopped");
                }
                (true, true) if domain == Domain::Ai && ai_backend_changed(&old, &new) => {
                    let pool = self.build_pool(domain, &new)?;
                    let previous = self.pools.write().await.insert(domain, pool);
                    if let Some(previous) = previous {
                        previous.shutdown().await;
                    }
                    tracing::info!(domain = %domain, model = %new.ai.model, "AI pool rebuilt");
                }
                (true, true) => self.reconcile_pool(domain, &old, &new).await?,
                (false, false) => {}
            }
        }
        Ok(())
    }

    async fn reconcile_pool(
        &self,
        domain: Domain,
        old: &ManagerConfig,
        new: &ManagerConfig,
    ) -> Result<(), ManagerError> {
        let pool = self.pool(domain).await?;

        let max_workers = new.max_workers(domain);
        if old.max_workers(domain) != max_workers {
            let workers = pool.adjust_pool_size(max_workers).await?;
            tracing::info!(domain = %domain, max_workers, workers, "Pool size adjusted");
        }

        if domain == Domain::Ai && old.ai.rate_limit_per_minute != new.ai.rate_limit_per_minute {
            let spec = TaskSpec::new(TaskPayload::UpdateRateLimit(RateLimitUpdate {
                per_minute: new.ai.rate_limit_per_minute,
            }))
            .with_priority(Priority::High);
            pool.submit(spec).await?;
        }
        Ok(())
    }

    /// Turn the AI domain on with the given credentials.
    pub async fn enable_ai(
        &self,
        api_key: SecretString,
        model: Option<String>,
    ) -> Result<(), ManagerError> {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "api_key".to_string(),
                hint: "An API key is required to enable AI assistance".to_string(),
            }
            .into());
        }
        self.update_config(ConfigUpdate {
            ai: Some(AiUpdate {
                enabled: Some(true),
                api_key: Some(api_key),
                model,
                ..AiUpdate::default()
            }),
            ..ConfigUpdate::default()
        })
        .await
    }

    pub async fn disable_ai(&self) -> Result<(), ManagerError> {
        self.update_config(ConfigUpdate {
            ai: Some(AiUpdate {
                enabled: Some(false),
                ..AiUpdate::default()
            }),
            ..ConfigUpdate::default()
        })
        .await
    }

    // ── Observability ───────────────────────────────────────────────

    async fn running_pools(&self) -> Vec<(Domain, Arc<WorkerPool>)> {
        let pools = self.pools.read().await;
        Domain::ALL
            .iter()
            .filter_map(|domain| pools.get(domain).map(|pool| (*domain, pool.clone())))
            .collect()
    }

    /// Probe every running pool concurrently. Never fails; problems are
    /// reported as issues.
    pub async fn health_check(&self) -> HealthReport {
        if !self.is_initialized() {
            return HealthReport::uninitialized();
        }

        let probes = self
            .running_pools()
            .await
            .into_iter()
            .map(|(domain, pool)| async move {
                let issue = health::run_probe(domain, &pool, health::PROBE_TIMEOUT).await;
                (domain, issue)
            });

        let mut issues = Vec::new();
        let mut pools = BTreeMap::new();
        for (domain, issue) in join_all(probes).await {
            pools.insert(domain, issue.is_none());
            issues.extend(issue);
        }

        if !issues.is_empty() {
            tracing::warn!(issues = ?issues, "Health check found problems");
        }
        HealthReport {
            healthy: issues.is_empty(),
            issues,
            pools,
        }
    }

    pub async fn stats(&self) -> ManagerStats {
        let running: HashMap<Domain, Arc<WorkerPool>> =
            self.running_pools().await.into_iter().collect();

        let mut pools = BTreeMap::new();
        for domain in Domain::ALL {
            let pool = match running.get(&domain) {
                Some(pool) => Some(pool.stats().await),
                None => None,
            };
            pools.insert(
                domain,
                DomainStats {
                    enabled: pool.is_some(),
                    pool,
                },
            );
        }

        ManagerStats {
            initialized: self.is_initialized(),
            pools,
        }
    }

    /// Stats plus worker snapshots and, when the AI pool runs, its rate limit.
    pub async fn detailed_stats(&self) -> DetailedStats {
        let running: HashMap<Domain, Arc<WorkerPool>> =
            self.running_pools().await.into_iter().collect();

        let mut pools = BTreeMap::new();
        for domain in Domain::ALL {
            let detail = match running.get(&domain) {
                Some(pool) => DomainDetail {
                    enabled: true,
                    pool: Some(pool.stats().await),
                    workers: pool.workers().await,
                },
                None => DomainDetail {
                    enabled: false,
                    pool: None,
                    workers: Vec::new(),
                },
            };
            pools.insert(domain, detail);
        }

        let ai_rate_limit = if running.contains_key(&Domain::Ai) {
            tokio::time::timeout(health::PROBE_TIMEOUT, self.rate_limit_status())
                .await
                .ok()
                .and_then(Result::ok)
        } else {
            None
        };

        DetailedStats {
            initialized: self.is_initialized(),
            pools,
            ai_rate_limit,
        }
    }

    /// Shut every pool down concurrently.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let pools: Vec<Arc<WorkerPool>> = self.pools.write().await.drain().map(|(_, p)| p).collect();
        join_all(pools.iter().map(|pool| pool.shutdown())).await;
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!(pools = pools.len(), "Worker manager shut down");
    }
}

fn ai_backend_changed(old: &ManagerConfig, new: &ManagerConfig) -> bool {
    let key = |config: &ManagerConfig| {
        config
            .ai
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().to_string())
    };
    old.ai.model != new.ai.model || key(old) != key(new)
}
