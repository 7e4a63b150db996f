//! Types for adaptive model routing
//!
//! This module defines the value types shared by the registry, the router and
//! the metrics store: providers, model identifiers, task types, performance
//! samples and comparison reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An external AI backend vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Anthropic,
    HuggingFace,
    Local,
}

impl Provider {
    /// Fixed priority order used by the default-model fallback
    pub const PRIORITY: [Provider; 4] = [
        Provider::OpenAi,
        Provider::Anthropic,
        Provider::HuggingFace,
        Provider::Local,
    ];

    /// Lowercase string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::HuggingFace => "huggingface",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "huggingface" | "hugging-face" | "hf" => Ok(Self::HuggingFace),
            "local" => Ok(Self::Local),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// A concrete model served by a provider
///
/// Equality, hashing and ordering are by value, so the identifier is used
/// directly as a map key. Its string form is `provider:model_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ModelIdentifier {
    pub provider: Provider,
    pub model_name: String,
}

impl ModelIdentifier {
    pub fn new(provider: Provider, model_name: impl Into<String>) -> Self {
        Self {
            provider,
            model_name: model_name.into(),
        }
    }
}

impl std::fmt::Display for ModelIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.model_name)
    }
}

impl std::str::FromStr for ModelIdentifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s
            .split_once(':')
            .ok_or_else(|| format!("Model identifier must be 'provider:model', got '{}'", s))?;
        if model.is_empty() {
            return Err(format!("Model identifier '{}' has an empty model name", s));
        }
        Ok(Self::new(provider.parse()?, model))
    }
}

impl From<ModelIdentifier> for String {
    fn from(id: ModelIdentifier) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ModelIdentifier {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Named category of work routed to a model
///
/// Task types are an open set: new names may show up at runtime without
/// code changes, so this is a string newtype rather than an enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub const TEXT_GENERATION: &'static str = "text-generation";
    pub const EMBEDDING: &'static str = "embedding";
    pub const IMAGE_ANALYSIS: &'static str = "image-analysis";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    pub fn text_generation() -> Self {
        Self::new(Self::TEXT_GENERATION)
    }

    pub fn embedding() -> Self {
        Self::new(Self::EMBEDDING)
    }

    pub fn image_analysis() -> Self {
        Self::new(Self::IMAGE_ANALYSIS)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name suggests a text workload (`text` or `generation`)
    pub fn is_text_like(&self) -> bool {
        let name = self.0.to_lowercase();
        name.contains("text") || name.contains("generation")
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for TaskType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Performance signals for one executed task
///
/// Every field is optional. `None` means the signal was never reported and
/// is kept distinct from a reported zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Task accuracy in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Wall-clock latency in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    /// Cost of one unit (token, dimension, byte) in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_unit: Option<f64>,
    /// Units consumed by the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_count: Option<u64>,
    /// Rating supplied by the end user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_rating: Option<f64>,
    /// Free-form named metrics
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_metrics: BTreeMap<String, f64>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set accuracy (clamped to `[0, 1]`)
    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy.clamp(0.0, 1.0));
        self
    }

    /// Set latency (negative values clamp to zero)
    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms.max(0.0));
        self
    }

    /// Set unit cost and unit count
    pub fn with_cost(mut self, cost_per_unit: f64, unit_count: u64) -> Self {
        self.cost_per_unit = Some(cost_per_unit.max(0.0));
        self.unit_count = Some(unit_count);
        self
    }

    pub fn with_user_rating(mut self, rating: f64) -> Self {
        self.user_rating = Some(rating);
        self
    }

    pub fn with_custom(mut self, name: impl Into<String>, value: f64) -> Self {
        self.custom_metrics.insert(name.into(), value);
        self
    }

    /// Total cost of the task, present only when both factors were reported
    pub fn total_cost(&self) -> Option<f64> {
        match (self.cost_per_unit, self.unit_count) {
            (Some(cost), Some(units)) => Some(cost * units as f64),
            _ => None,
        }
    }
}

/// One performance sample, append-only once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub id: Uuid,
    pub model_id: ModelIdentifier,
    pub task_type: TaskType,
    pub metrics: PerformanceMetrics,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the task input, hex encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
    /// Size of the task input in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_size: Option<u64>,
}

impl EvaluationRecord {
    pub fn new(model_id: ModelIdentifier, task_type: TaskType, metrics: PerformanceMetrics) -> Self {
        Self {
            id: Uuid::new_v4(),
            model_id,
            task_type,
            metrics,
            timestamp: Utc::now(),
            input_hash: None,
            context_size: None,
        }
    }

    pub fn with_input(mut self, input_hash: impl Into<String>, context_size: u64) -> Self {
        self.input_hash = Some(input_hash.into());
        self.context_size = Some(context_size);
        self
    }
}

/// Persisted outcome of one evaluation-mode batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub id: Uuid,
    pub task_type: TaskType,
    pub timestamp: DateTime<Utc>,
    /// Surviving results, best first
    pub results: Vec<EvaluationRecord>,
    /// 1-based rank of every surviving model
    pub rankings: BTreeMap<ModelIdentifier, u32>,
    pub best_model_id: ModelIdentifier,
}

impl ComparisonReport {
    /// Build a report from results already ordered best first
    ///
    /// Returns `None` when there are no results to rank.
    pub fn from_ranked(task_type: TaskType, results: Vec<EvaluationRecord>) -> Option<Self> {
        let best_model_id = results.first()?.model_id.clone();
        let rankings = results
            .iter()
            .enumerate()
            .map(|(i, r)| (r.model_id.clone(), (i + 1) as u32))
            .collect();

        Some(Self {
            id: Uuid::new_v4(),
            task_type,
            timestamp: Utc::now(),
            results,
            rankings,
            best_model_id,
        })
    }

    /// Rank of a model in this report, if it survived
    pub fn rank_of(&self, model_id: &ModelIdentifier) -> Option<u32> {
        self.rankings.get(model_id).copied()
    }
}

/// Constraints and preferences for picking a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionOptions {
    /// Soft preference for one provider
    pub preferred_provider: Option<Provider>,
    /// Disqualify candidates slower than this on average
    pub max_latency_ms: Option<f64>,
    /// Disqualify candidates less accurate than this on average
    pub min_accuracy: Option<f64>,
    /// Weigh cost more heavily
    pub cost_sensitive: bool,
}

impl SelectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferred_provider(mut self, provider: Provider) -> Self {
        self.preferred_provider = Some(provider);
        self
    }

    pub fn with_max_latency(mut self, max_latency_ms: f64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    pub fn with_min_accuracy(mut self, min_accuracy: f64) -> Self {
        self.min_accuracy = Some(min_accuracy);
        self
    }

    pub fn with_cost_sensitive(mut self, cost_sensitive: bool) -> Self {
        self.cost_sensitive = cost_sensitive;
        self
    }
}
