//! Model registry: configuration, scoring-based selection and rotation
//!
//! The registry answers two questions for every routed task: which single
//! model should serve it, and whether this task should instead fan out to
//! every candidate (evaluation mode). It owns the registry configuration and
//! the per-task rotation counters, and reads performance history from the
//! [`MetricsStore`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::config::{RegistryConfig, RegistryConfigUpdate};
use super::rotation::{RotationTracker, TaskCounter};
use super::scoring::{self, ModelAggregate};
use super::store::MetricsStore;
use super::types::{
    EvaluationRecord, ModelIdentifier, PerformanceMetrics, Provider, SelectionOptions, TaskType,
};
use crate::error::Result;

/// Last-resort default for text-like task types
pub const FALLBACK_TEXT_MODEL: &str = "gpt-4";

/// Last-resort default for every other task type
pub const FALLBACK_GENERIC_MODEL: &str = "gpt-3.5-turbo";

/// Per-model performance as shown to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    #[serde(flatten)]
    pub aggregate: ModelAggregate,
    /// Score under the current weights with no selection constraints
    pub score: f64,
    /// Whether the model is currently a configured candidate
    pub configured: bool,
}

/// Registry of candidate models and their performance
pub struct ModelRegistry {
    store: Arc<dyn MetricsStore>,
    config: RwLock<RegistryConfig>,
    rotation: RotationTracker,
}

impl ModelRegistry {
    /// Load configuration and rotation counters from the store
    ///
    /// A missing, unreadable or invalid stored configuration is replaced by
    /// the defaults. Unreadable counters start fresh.
    pub async fn load(store: Arc<dyn MetricsStore>) -> Self {
        let config = match store.get_config().await {
            Ok(Some(config)) => match config.validate() {
                Ok(()) => config,
                Err(e) => {
                    warn!(error = %e, "Stored registry configuration is invalid, using defaults");
                    RegistryConfig::default()
                }
            },
            Ok(None) => {
                debug!("No stored registry configuration, using defaults");
                RegistryConfig::default()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load registry configuration, using defaults");
                RegistryConfig::default()
            }
        };

        let rotation = match store.load_task_counters().await {
            Ok(counters) => RotationTracker::from_counters(counters),
            Err(e) => {
                warn!(error = %e, "Failed to load rotation counters, starting fresh");
                RotationTracker::new()
            }
        };

        Self {
            store,
            config: RwLock::new(config),
            rotation,
        }
    }

    /// Create a registry with an explicit configuration and fresh counters
    pub fn with_config(store: Arc<dyn MetricsStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            config: RwLock::new(config),
            rotation: RotationTracker::new(),
        }
    }

    /// The metrics store backing this registry
    pub fn store(&self) -> &Arc<dyn MetricsStore> {
        &self.store
    }

    /// Pick the best model for a task type
    ///
    /// Never fails: missing history, a store error or a fully disqualified
    /// candidate set all resolve to the default-model fallback.
    pub async fn select_best_model(
        &self,
        task_type: &TaskType,
        options: &SelectionOptions,
    ) -> ModelIdentifier {
        let config = self.config.read().await.clone();

        let records = match self.store.query(None, task_type).await {
            Ok(records) => records,
            Err(e) => {
                warn!(task_type = %task_type, error = %e, "History query failed, using default model");
                return fallback_for(&config, task_type, options.preferred_provider);
            }
        };

        let candidates = config.models_for(task_type);
        let aggregates: Vec<ModelAggregate> = scoring::aggregate(&records, &candidates)
            .into_iter()
            .filter(|agg| config.is_enabled(agg.model_id.provider))
            .collect();

        match scoring::best_candidate(&aggregates, &config.metric_weights, options) {
            Some((best, score)) => {
                debug!(
                    task_type = %task_type,
                    model = %best.model_id,
                    score = score,
                    samples = best.samples,
                    "Selected model from history"
                );
                best.model_id.clone()
            }
            None => {
                let model = fallback_for(&config, task_type, options.preferred_provider);
                debug!(
                    task_type = %task_type,
                    model = %model,
                    history = records.len(),
                    "No qualifying history, using default model"
                );
                model
            }
        }
    }

    /// The default-model fallback for a task type
    pub async fn fallback_model(
        &self,
        task_type: &TaskType,
        preferred_provider: Option<Provider>,
    ) -> ModelIdentifier {
        let config = self.config.read().await;
        fallback_for(&config, task_type, preferred_provider)
    }

    /// Advance the rotation counter for a task type
    ///
    /// Returns whether this task runs in evaluation mode. Call at most once
    /// per routed task. The new counter state is persisted; a persistence
    /// failure is logged and does not change the decision.
    pub async fn should_run_evaluation(&self, task_type: &TaskType) -> bool {
        let (standard, evaluation) = {
            let config = self.config.read().await;
            (config.standard_cycle_length, config.evaluation_cycle_length)
        };

        let (evaluate, _) = self
            .rotation
            .advance(task_type, standard, evaluation, self.store.as_ref())
            .await;
        evaluate
    }

    /// Record one performance sample for a model
    pub async fn record_performance(
        &self,
        model_id: &ModelIdentifier,
        task_type: &TaskType,
        metrics: PerformanceMetrics,
    ) {
        let record = EvaluationRecord::new(model_id.clone(), task_type.clone(), metrics);
        self.record(&record).await;
    }

    /// Append a fully built record; failures are logged and swallowed
    pub async fn record(&self, record: &EvaluationRecord) {
        if let Err(e) = self.store.append_record(record).await {
            warn!(
                model_id = %record.model_id,
                task_type = %record.task_type,
                error = %e,
                "Failed to record performance"
            );
        }
    }

    /// Every enabled candidate for a task type, in provider priority order
    pub async fn get_all_models(&self, task_type: &TaskType) -> Vec<ModelIdentifier> {
        self.config.read().await.models_for(task_type)
    }

    /// Snapshot of the current configuration
    pub async fn configuration(&self) -> RegistryConfig {
        self.config.read().await.clone()
    }

    /// Apply a configuration update
    ///
    /// The merged configuration is validated and persisted before it
    /// replaces the in-memory copy. On any error the previous configuration
    /// stays in effect.
    pub async fn update_configuration(&self, update: RegistryConfigUpdate) -> Result<RegistryConfig> {
        let mut config = self.config.write().await;

        let next = update.apply_to(&config);
        next.validate()?;
        self.store.put_config(&next).await?;
        *config = next.clone();

        info!(
            standard_cycle_length = next.standard_cycle_length,
            evaluation_cycle_length = next.evaluation_cycle_length,
            "Registry configuration updated"
        );
        Ok(next)
    }

    /// Aggregated performance of every known model for a task type
    ///
    /// Configured candidates come first (including those without history),
    /// then other models seen in history.
    pub async fn performance_summary(&self, task_type: &TaskType) -> Result<Vec<ModelPerformance>> {
        let config = self.config.read().await.clone();
        let records = self.store.query(None, task_type).await?;
        let candidates = config.models_for(task_type);
        let options = SelectionOptions::default();

        let mut aggregates = scoring::aggregate(&records, &candidates);
        for (position, candidate) in candidates.iter().enumerate() {
            if !aggregates.iter().any(|agg| &agg.model_id == candidate) {
                let insert_at = position.min(aggregates.len());
                aggregates.insert(insert_at, ModelAggregate::empty(candidate.clone()));
            }
        }

        Ok(aggregates
            .into_iter()
            .map(|aggregate| ModelPerformance {
                score: aggregate.score(&config.metric_weights, &options),
                configured: candidates.contains(&aggregate.model_id),
                aggregate,
            })
            .collect())
    }

    /// Snapshot of the rotation counter for a task type
    pub async fn rotation_status(&self, task_type: &TaskType) -> TaskCounter {
        self.rotation.snapshot(task_type).await
    }

    /// Task types that have routed traffic since the counters were loaded
    pub async fn tracked_task_types(&self) -> Vec<TaskType> {
        self.rotation.task_types().await
    }
}

/// Default-model fallback chain
///
/// 1. The preferred provider's default, if that provider is enabled
/// 2. The first enabled provider (in priority order) with a default
/// 3. `openai:gpt-4` for text-like task types
/// 4. `openai:gpt-3.5-turbo` otherwise
fn fallback_for(
    config: &RegistryConfig,
    task_type: &TaskType,
    preferred_provider: Option<Provider>,
) -> ModelIdentifier {
    preferred_provider
        .and_then(|provider| config.enabled_default(provider, task_type))
        .or_else(|| {
            Provider::PRIORITY
                .iter()
                .find_map(|provider| config.enabled_default(*provider, task_type))
        })
        .unwrap_or_else(|| {
            let name = if task_type.is_text_like() {
                FALLBACK_TEXT_MODEL
            } else {
                FALLBACK_GENERIC_MODEL
            };
            ModelIdentifier::new(Provider::OpenAi, name)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::routing::config::{MetricWeights, ProviderSettings};
    use crate::routing::rotation::RotationMode;
    use crate::routing::store::InMemoryMetricsStore;
    use crate::routing::types::ComparisonReport;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Store whose every operation fails
    struct BrokenStore;

    #[async_trait]
    impl MetricsStore for BrokenStore {
        async fn query(
            &self,
            _model_id: Option<&ModelIdentifier>,
            _task_type: &TaskType,
        ) -> Result<Vec<EvaluationRecord>> {
            Err(Error::Other("query unavailable".into()))
        }
        async fn append_record(&self, _record: &EvaluationRecord) -> Result<()> {
            Err(Error::Other("append unavailable".into()))
        }
        async fn append_report(&self, _report: &ComparisonReport) -> Result<()> {
            Err(Error::Other("append unavailable".into()))
        }
        async fn reports(&self, _task_type: &TaskType, _limit: usize) -> Result<Vec<ComparisonReport>> {
            Err(Error::Other("reports unavailable".into()))
        }
        async fn get_config(&self) -> Result<Option<RegistryConfig>> {
            Err(Error::Other("config unavailable".into()))
        }
        async fn put_config(&self, _config: &RegistryConfig) -> Result<()> {
            Err(Error::Other("config unavailable".into()))
        }
        async fn load_task_counters(&self) -> Result<HashMap<TaskType, TaskCounter>> {
            Err(Error::Other("counters unavailable".into()))
        }
        async fn save_task_counter(&self, _task_type: &TaskType, _counter: &TaskCounter) -> Result<()> {
            Err(Error::Other("counters unavailable".into()))
        }
    }

    fn memory() -> Arc<InMemoryMetricsStore> {
        Arc::new(InMemoryMetricsStore::new())
    }

    fn id(provider: Provider, name: &str) -> ModelIdentifier {
        ModelIdentifier::new(provider, name)
    }

    #[tokio::test]
    async fn test_fallback_chain() {
        let registry = ModelRegistry::with_config(memory(), RegistryConfig::default());
        let text = TaskType::text_generation();

        // (a) preferred provider default
        assert_eq!(
            registry.fallback_model(&text, Some(Provider::Anthropic)).await,
            id(Provider::Anthropic, "claude-3-opus-20240229")
        );
        // Disabled preferred provider is skipped
        assert_eq!(
            registry.fallback_model(&text, Some(Provider::Local)).await,
            id(Provider::OpenAi, "gpt-4")
        );
        // (b) first enabled provider with a default
        assert_eq!(
            registry.fallback_model(&TaskType::image_analysis(), None).await,
            id(Provider::OpenAi, "gpt-4-vision-preview")
        );

        let empty = ModelRegistry::with_config(memory(), RegistryConfig::empty(10, 3));
        // (c) text-like task names
        assert_eq!(
            empty.fallback_model(&TaskType::new("code-generation"), None).await,
            id(Provider::OpenAi, "gpt-4")
        );
        // (d) everything else
        assert_eq!(
            empty.fallback_model(&TaskType::new("audio-transcription"), None).await,
            id(Provider::OpenAi, "gpt-3.5-turbo")
        );
    }

    #[tokio::test]
    async fn test_select_without_history_uses_fallback() {
        let registry = ModelRegistry::with_config(memory(), RegistryConfig::default());
        let model = registry
            .select_best_model(&TaskType::embedding(), &SelectionOptions::new())
            .await;
        assert_eq!(model, id(Provider::OpenAi, "text-embedding-ada-002"));
    }

    #[tokio::test]
    async fn test_select_prefers_best_history() {
        let store = memory();
        let registry = ModelRegistry::with_config(store.clone(), RegistryConfig::default());
        let task = TaskType::text_generation();
        let gpt4 = id(Provider::OpenAi, "gpt-4");
        let claude = id(Provider::Anthropic, "claude-3-opus-20240229");

        for _ in 0..3 {
            registry
                .record_performance(&gpt4, &task, PerformanceMetrics::new().with_accuracy(0.7).with_latency(2.0))
                .await;
            registry
                .record_performance(&claude, &task, PerformanceMetrics::new().with_accuracy(0.9).with_latency(1.0))
                .await;
        }
        assert_eq!(store.record_count().await, 6);

        let best = registry.select_best_model(&task, &SelectionOptions::new()).await;
        assert_eq!(best, claude);
    }

    #[tokio::test]
    async fn test_history_of_disabled_provider_is_ignored() {
        let task = TaskType::text_generation();
        let local = id(Provider::Local, "llama3");
        let store = Arc::new(InMemoryMetricsStore::with_records(vec![EvaluationRecord::new(
            local,
            task.clone(),
            PerformanceMetrics::new().with_accuracy(1.0),
        )]));

        let registry = ModelRegistry::with_config(store, RegistryConfig::default());
        let best = registry.select_best_model(&task, &SelectionOptions::new()).await;
        assert_eq!(best, id(Provider::OpenAi, "gpt-4"));
    }

    #[tokio::test]
    async fn test_all_disqualified_falls_back() {
        let task = TaskType::text_generation();
        let store = Arc::new(InMemoryMetricsStore::with_records(vec![EvaluationRecord::new(
            id(Provider::HuggingFace, "mistralai/Mistral-7B-Instruct-v0.2"),
            task.clone(),
            PerformanceMetrics::new().with_latency(900.0),
        )]));
        let registry = ModelRegistry::with_config(store, RegistryConfig::default());

        let options = SelectionOptions::new()
            .with_max_latency(100.0)
            .with_preferred_provider(Provider::Anthropic);
        let best = registry.select_best_model(&task, &options).await;
        assert_eq!(best, id(Provider::Anthropic, "claude-3-opus-20240229"));
    }

    #[tokio::test]
    async fn test_broken_store_is_survivable() {
        let registry = ModelRegistry::load(Arc::new(BrokenStore)).await;
        let task = TaskType::text_generation();

        assert_eq!(registry.configuration().await, RegistryConfig::default());
        assert_eq!(
            registry.select_best_model(&task, &SelectionOptions::new()).await,
            id(Provider::OpenAi, "gpt-4")
        );
        registry
            .record_performance(&id(Provider::OpenAi, "gpt-4"), &task, PerformanceMetrics::new())
            .await;
        assert!(!registry.should_run_evaluation(&task).await);
        assert_eq!(registry.rotation_status(&task).await.count, 1);
    }

    #[tokio::test]
    async fn test_update_configuration_persists_then_commits() {
        let store = memory();
        let registry = ModelRegistry::with_config(store.clone(), RegistryConfig::default());

        let updated = registry
            .update_configuration(RegistryConfigUpdate::new().cycle_lengths(10, 3))
            .await
            .unwrap();
        assert_eq!(updated.standard_cycle_length, 10);
        assert_eq!(registry.configuration().await, updated);
        assert_eq!(store.get_config().await.unwrap(), Some(updated));

        // Invalid updates change nothing
        let err = registry
            .update_configuration(RegistryConfigUpdate::new().weights(MetricWeights::new(0.0, 0.0, 0.0)))
            .await;
        assert!(err.is_err());
        assert_eq!(registry.configuration().await.standard_cycle_length, 10);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_old_config() {
        let registry = ModelRegistry::with_config(Arc::new(BrokenStore), RegistryConfig::default());

        let result = registry
            .update_configuration(RegistryConfigUpdate::new().cycle_lengths(2, 1))
            .await;
        assert!(result.is_err());
        assert_eq!(registry.configuration().await, RegistryConfig::default());
    }

    #[tokio::test]
    async fn test_load_restores_config_and_counters() {
        let store = memory();
        let task = TaskType::embedding();
        let config = RegistryConfig::default().with_provider(
            Provider::Local,
            ProviderSettings::enabled().with_default(task.clone(), "nomic-embed-text"),
        );
        store.put_config(&config).await.unwrap();

        {
            let registry = ModelRegistry::load(store.clone()).await;
            registry
                .update_configuration(RegistryConfigUpdate::new().cycle_lengths(3, 1))
                .await
                .unwrap();
            assert!(!registry.should_run_evaluation(&task).await);
            assert!(!registry.should_run_evaluation(&task).await);
        }

        let registry = ModelRegistry::load(store).await;
        assert!(registry.configuration().await.is_enabled(Provider::Local));
        // Third call overall triggers evaluation
        assert!(registry.should_run_evaluation(&task).await);
        assert_eq!(registry.rotation_status(&task).await.mode, RotationMode::Evaluation);
        assert_eq!(registry.tracked_task_types().await, vec![task]);
    }

    #[tokio::test]
    async fn test_performance_summary_lists_candidates() {
        let store = memory();
        let registry = ModelRegistry::with_config(store, RegistryConfig::default());
        let task = TaskType::text_generation();
        let claude = id(Provider::Anthropic, "claude-3-opus-20240229");

        registry
            .record_performance(&claude, &task, PerformanceMetrics::new().with_accuracy(0.8))
            .await;

        let summary = registry.performance_summary(&task).await.unwrap();
        let names: Vec<String> = summary.iter().map(|p| p.aggregate.model_id.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "openai:gpt-4",
                "anthropic:claude-3-opus-20240229",
                "huggingface:mistralai/Mistral-7B-Instruct-v0.2",
            ]
        );
        assert_eq!(summary[0].aggregate.samples, 0);
        assert_eq!(summary[1].aggregate.samples, 1);
        assert!((summary[1].score - 0.4).abs() < 1e-9);
        assert!(summary.iter().all(|p| p.configured));
    }
}
