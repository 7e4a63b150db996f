//! Model Router - executes tasks against the selected model or all candidates
//!
//! Every routed task advances the rotation counter of its task type:
//! - **Standard mode**: the registry picks one model, one adapter call is
//!   made, its metrics are recorded and the result returned. A failure is a
//!   [`Error::ProviderExecution`]; there is no retry and no failover.
//! - **Evaluation mode**: every candidate runs concurrently under the call
//!   deadline. Failed candidates are dropped, survivors are ranked by
//!   execution time, and a [`ComparisonReport`] plus one record per survivor
//!   are persisted. Only the fastest result is returned.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::cost::CostTable;
use super::registry::ModelRegistry;
use super::types::{
    ComparisonReport, EvaluationRecord, ModelIdentifier, PerformanceMetrics, SelectionOptions,
    TaskType,
};
use crate::config::RouterSettings;
use crate::error::{Error, Result};
use crate::providers::{ProviderAdapter, ProviderSet, TaskOutput, TaskPayload, estimate_tokens};

/// Default deadline for one adapter call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Router-wide execution settings
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Deadline applied to every adapter call unless a route overrides it
    pub call_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl RouterConfig {
    /// Create config from the process configuration
    pub fn from_settings(settings: &RouterSettings) -> Self {
        Self {
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
        }
    }
}

/// Per-call routing options
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    pub selection: SelectionOptions,
    /// Run this call in evaluation mode without touching the rotation counter
    pub force_evaluation: bool,
    /// Deadline override for this call's adapter requests
    pub timeout: Option<Duration>,
}

impl RouteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selection(mut self, selection: SelectionOptions) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_force_evaluation(mut self, force: bool) -> Self {
        self.force_evaluation = force;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Output of one model for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: TaskOutput,
    pub model_id: ModelIdentifier,
    pub metrics: PerformanceMetrics,
    pub execution_time_ms: f64,
}

/// Everything produced by one evaluation-mode call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    /// Surviving results, fastest first
    pub results: Vec<ExecutionResult>,
    pub best_result: ExecutionResult,
    pub comparison_report: ComparisonReport,
}

/// Units consumed by a task: estimated prompt tokens plus the completion
/// tokens the provider reported for text, dimensions for embeddings, input
/// bytes for images
pub fn unit_count(payload: &TaskPayload, output: &TaskOutput) -> u64 {
    match (payload, output) {
        (TaskPayload::Text { prompt, .. }, TaskOutput::Text(generation)) => {
            estimate_tokens(prompt) + generation.token_count_estimate
        }
        (_, TaskOutput::Embedding(embedding)) => embedding.dimensions as u64,
        (TaskPayload::Image { data, .. }, _) => data.len() as u64,
        (payload, _) => payload.context_size(),
    }
}

/// Model Router
///
/// Combines the [`ModelRegistry`] (selection and rotation) with the
/// configured [`ProviderSet`] (execution).
pub struct ModelRouter {
    registry: Arc<ModelRegistry>,
    providers: ProviderSet,
    costs: CostTable,
    config: RouterConfig,
}

impl ModelRouter {
    /// Create a router with default cost table and configuration
    pub fn new(registry: Arc<ModelRegistry>, providers: ProviderSet) -> Self {
        ModelRouterBuilder::new(registry).providers(providers).build()
    }

    /// Create a new builder
    pub fn builder(registry: Arc<ModelRegistry>) -> ModelRouterBuilder {
        ModelRouterBuilder::new(registry)
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Get the configured adapters
    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one task
    ///
    /// Errors are either [`Error::ProviderExecution`] (standard mode) or
    /// [`Error::AllCandidatesFailed`] (evaluation mode).
    pub async fn route(
        &self,
        task_type: &TaskType,
        payload: &TaskPayload,
        options: &RouteOptions,
    ) -> Result<ExecutionResult> {
        let evaluate =
            options.force_evaluation || self.registry.should_run_evaluation(task_type).await;

        if evaluate {
            return self
                .evaluate(task_type, payload, options)
                .await
                .map(|outcome| outcome.best_result);
        }

        let model = self
            .registry
            .select_best_model(task_type, &options.selection)
            .await;
        let timeout = self.timeout_for(options);

        let result = self
            .execute_model(&model, payload, timeout)
            .await
            .map_err(|e| {
                warn!(model = %model, task_type = %task_type, error = %e, "Provider execution failed");
                Error::ProviderExecution {
                    model: model.to_string(),
                    message: e.to_string(),
                }
            })?;

        self.registry
            .record(&Self::record_for(task_type, payload, &result))
            .await;

        debug!(
            task_type = %task_type,
            model = %result.model_id,
            execution_time_ms = result.execution_time_ms,
            "Routed task in standard mode"
        );
        Ok(result)
    }

    /// Run a task against every candidate and rank the results
    ///
    /// Does not advance the rotation counter.
    pub async fn evaluate(
        &self,
        task_type: &TaskType,
        payload: &TaskPayload,
        options: &RouteOptions,
    ) -> Result<EvaluationOutcome> {
        let mut models = self.registry.get_all_models(task_type).await;
        if models.is_empty() {
            models.push(
                self.registry
                    .fallback_model(task_type, options.selection.preferred_provider)
                    .await,
            );
        }

        let timeout = self.timeout_for(options);
        debug!(
            task_type = %task_type,
            candidates = models.len(),
            "Running evaluation fan-out"
        );

        let outcomes = join_all(
            models
                .iter()
                .map(|model| self.execute_model(model, payload, timeout)),
        )
        .await;

        let mut results = Vec::with_capacity(models.len());
        let mut failures = Vec::new();
        for (model, outcome) in models.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(model = %model, task_type = %task_type, error = %e, "Candidate failed during evaluation");
                    failures.push(format!("{}: {}", model, e));
                }
            }
        }

        if results.is_empty() {
            return Err(Error::AllCandidatesFailed {
                task_type: task_type.to_string(),
                attempted: models.len(),
                failures,
            });
        }

        // Stable: equal times keep candidate order
        results.sort_by(|a, b| a.execution_time_ms.total_cmp(&b.execution_time_ms));

        let records: Vec<EvaluationRecord> = results
            .iter()
            .map(|result| Self::record_for(task_type, payload, result))
            .collect();
        let comparison_report = ComparisonReport::from_ranked(task_type.clone(), records.clone())
            .ok_or_else(|| Error::Other("evaluation produced no ranked results".to_string()))?;

        if let Err(e) = self.registry.store().append_report(&comparison_report).await {
            warn!(task_type = %task_type, error = %e, "Failed to persist comparison report");
        }
        for record in &records {
            self.registry.record(record).await;
        }

        info!(
            task_type = %task_type,
            candidates = models.len(),
            succeeded = results.len(),
            best_model = %comparison_report.best_model_id,
            "Evaluation batch completed"
        );

        let best_result = results[0].clone();
        Ok(EvaluationOutcome {
            results,
            best_result,
            comparison_report,
        })
    }

    /// Execute one model under a deadline and measure it
    async fn execute_model(
        &self,
        model: &ModelIdentifier,
        payload: &TaskPayload,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let adapter: &Arc<dyn ProviderAdapter> = self
            .providers
            .get(model.provider)
            .ok_or_else(|| Error::ProviderNotConfigured(model.provider.to_string()))?;

        let started = Instant::now();
        let output = tokio::time::timeout(timeout, adapter.execute(&model.model_name, payload))
            .await
            .map_err(|_| Error::Timeout(timeout.as_millis() as u64))??;
        let execution_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let metrics = PerformanceMetrics::new()
            .with_latency(execution_time_ms)
            .with_cost(self.costs.cost_per_unit(model), unit_count(payload, &output));

        Ok(ExecutionResult {
            output,
            model_id: model.clone(),
            metrics,
            execution_time_ms,
        })
    }

    fn timeout_for(&self, options: &RouteOptions) -> Duration {
        options.timeout.unwrap_or(self.config.call_timeout)
    }

    fn record_for(task_type: &TaskType, payload: &TaskPayload, result: &ExecutionResult) -> EvaluationRecord {
        EvaluationRecord::new(result.model_id.clone(), task_type.clone(), result.metrics.clone())
            .with_input(payload.input_hash(), payload.context_size())
    }
}

/// Builds a [`ModelRouter`] from a registry and adapters
pub struct ModelRouterBuilder {
    registry: Arc<ModelRegistry>,
    providers: ProviderSet,
    costs: CostTable,
    config: RouterConfig,
}

impl ModelRouterBuilder {
    /// Create a new builder
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            providers: ProviderSet::new(),
            costs: CostTable::with_defaults(),
            config: RouterConfig::default(),
        }
    }

    /// Set configuration
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default call deadline
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Set all adapters
    pub fn providers(mut self, providers: ProviderSet) -> Self {
        self.providers = providers;
        self
    }

    /// Add one adapter
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.providers.insert(adapter);
        self
    }

    /// Set the cost table
    pub fn cost_table(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    /// Build the router
    pub fn build(self) -> ModelRouter {
        ModelRouter {
            registry: self.registry,
            providers: self.providers,
            costs: self.costs,
            config: self.config,
        }
    }
}
