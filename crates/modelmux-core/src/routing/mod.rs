//! Adaptive model routing with explore/exploit rotation
//!
//! - **Model Registry**: Provider configuration, weighted scoring over
//!   recorded performance, the default-model fallback chain, and the
//!   per-task rotation counters.
//!
//! - **Rotation**: After `standard_cycle_length` tasks of a task type, the
//!   next `evaluation_cycle_length + 1` tasks fan out to every candidate so
//!   fresh comparative metrics keep flowing in.
//!
//! - **Model Router**: Executes tasks through provider adapters, measures
//!   them, records metrics and builds comparison reports.
//!
//! - **Metrics Store**: SQLite (or in-memory) persistence for samples,
//!   reports, registry configuration and counters.
//!
//! ## How It Works
//!
//! 1. `route` asks the registry whether this task runs in evaluation mode
//! 2. Standard mode: the best-scoring model (or the default) runs the task
//! 3. Evaluation mode: all candidates run concurrently and are ranked by time
//! 4. Every successful execution is recorded to improve future selections
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use modelmux_core::routing::{ModelRegistry, ModelRouter, RouteOptions, SqliteMetricsStore, TaskType};
//! use modelmux_core::providers::{ProviderSet, TaskPayload};
//!
//! let store = Arc::new(SqliteMetricsStore::from_database(&db));
//! let registry = Arc::new(ModelRegistry::load(store).await);
//! let router = ModelRouter::new(registry, ProviderSet::from_env(&config)?);
//!
//! let result = router
//!     .route(&TaskType::text_generation(), &TaskPayload::text("Hello"), &RouteOptions::new())
//!     .await?;
//! println!("{} answered in {:.0} ms", result.model_id, result.execution_time_ms);
//! ```

mod config;
mod cost;
mod registry;
mod rotation;
mod router;
mod scoring;
mod store;
mod types;

pub use config::{
    DEFAULT_EVALUATION_CYCLE_LENGTH, DEFAULT_STANDARD_CYCLE_LENGTH, MetricWeights, ProviderSettings,
    RegistryConfig, RegistryConfigUpdate,
};
pub use cost::{CostTable, GLOBAL_DEFAULT_COST_PER_UNIT};
pub use registry::{FALLBACK_GENERIC_MODEL, FALLBACK_TEXT_MODEL, ModelPerformance, ModelRegistry};
pub use rotation::{RotationMode, RotationTracker, TaskCounter};
pub use router::{
    DEFAULT_CALL_TIMEOUT, EvaluationOutcome, ExecutionResult, ModelRouter, ModelRouterBuilder,
    RouteOptions, RouterConfig, unit_count,
};
pub use scoring::{ModelAggregate, aggregate, best_candidate};
pub use store::{InMemoryMetricsStore, MetricsStore, SqliteMetricsStore};
pub use types::{
    ComparisonReport, EvaluationRecord, ModelIdentifier, PerformanceMetrics, Provider,
    SelectionOptions, TaskType,
};
