//! Registry configuration: provider defaults, scoring weights, cycle lengths
//!
//! The configuration lives in the metrics store and is loaded once when the
//! registry is constructed. Changes go through [`RegistryConfigUpdate`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{ModelIdentifier, Provider, TaskType};
use crate::error::{Error, Result};

/// Default number of standard-mode tasks between evaluation phases
pub const DEFAULT_STANDARD_CYCLE_LENGTH: u32 = 50;

/// Default number of tasks in an evaluation phase
pub const DEFAULT_EVALUATION_CYCLE_LENGTH: u32 = 5;

/// Weights applied to aggregated metrics when scoring a model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricWeights {
    pub accuracy: f64,
    pub latency: f64,
    pub cost: f64,
}

impl Default for MetricWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.5,
            latency: 0.3,
            cost: 0.2,
        }
    }
}

impl MetricWeights {
    pub fn new(accuracy: f64, latency: f64, cost: f64) -> Self {
        Self {
            accuracy,
            latency,
            cost,
        }
    }

    fn validate(&self) -> Result<()> {
        let all = [self.accuracy, self.latency, self.cost];
        if all.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::ConfigError(
                "metric weights must be finite and non-negative".to_string(),
            ));
        }
        if all.iter().all(|w| *w == 0.0) {
            return Err(Error::ConfigError(
                "at least one metric weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-provider settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub enabled: bool,
    /// Default model for each task type this provider serves
    #[serde(default)]
    pub default_models: BTreeMap<TaskType, String>,
    /// Extra models included in evaluation fan-out
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_models: BTreeMap<TaskType, Vec<String>>,
}

impl ProviderSettings {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_default(mut self, task_type: impl Into<TaskType>, model: impl Into<String>) -> Self {
        self.default_models.insert(task_type.into(), model.into());
        self
    }

    pub fn with_additional(mut self, task_type: impl Into<TaskType>, model: impl Into<String>) -> Self {
        self.additional_models
            .entry(task_type.into())
            .or_default()
            .push(model.into());
        self
    }

    pub fn default_model(&self, task_type: &TaskType) -> Option<&str> {
        self.default_models.get(task_type).map(String::as_str)
    }
}

/// Registry-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub standard_cycle_length: u32,
    pub evaluation_cycle_length: u32,
    pub providers: BTreeMap<Provider, ProviderSettings>,
    pub metric_weights: MetricWeights,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let mut providers = BTreeMap::new();

        providers.insert(
            Provider::OpenAi,
            ProviderSettings::enabled()
                .with_default(TaskType::TEXT_GENERATION, "gpt-4")
                .with_default(TaskType::EMBEDDING, "text-embedding-ada-002")
                .with_default(TaskType::IMAGE_ANALYSIS, "gpt-4-vision-preview"),
        );

        providers.insert(
            Provider::Anthropic,
            ProviderSettings::enabled()
                .with_default(TaskType::TEXT_GENERATION, "claude-3-opus-20240229")
                .with_default(TaskType::IMAGE_ANALYSIS, "claude-3-sonnet-20240229"),
        );

        providers.insert(
            Provider::HuggingFace,
            ProviderSettings::enabled()
                .with_default(TaskType::TEXT_GENERATION, "mistralai/Mistral-7B-Instruct-v0.2")
                .with_default(TaskType::EMBEDDING, "sentence-transformers/all-MiniLM-L6-v2")
                .with_default(TaskType::IMAGE_ANALYSIS, "google/vit-base-patch16-224"),
        );

        providers.insert(
            Provider::Local,
            ProviderSettings {
                enabled: false,
                ..Default::default()
            }
            .with_default(TaskType::TEXT_GENERATION, "llama3")
            .with_default(TaskType::EMBEDDING, "all-minilm"),
        );

        Self {
            standard_cycle_length: DEFAULT_STANDARD_CYCLE_LENGTH,
            evaluation_cycle_length: DEFAULT_EVALUATION_CYCLE_LENGTH,
            providers,
            metric_weights: MetricWeights::default(),
        }
    }
}

impl RegistryConfig {
    /// An empty configuration with the given cycle lengths and no providers
    pub fn empty(standard_cycle_length: u32, evaluation_cycle_length: u32) -> Self {
        Self {
            standard_cycle_length,
            evaluation_cycle_length,
            providers: BTreeMap::new(),
            metric_weights: MetricWeights::default(),
        }
    }

    pub fn with_provider(mut self, provider: Provider, settings: ProviderSettings) -> Self {
        self.providers.insert(provider, settings);
        self
    }

    pub fn with_weights(mut self, weights: MetricWeights) -> Self {
        self.metric_weights = weights;
        self
    }

    /// Validate cycle lengths and weights
    pub fn validate(&self) -> Result<()> {
        if self.standard_cycle_length == 0 {
            return Err(Error::ConfigError(
                "standard_cycle_length must be greater than zero".to_string(),
            ));
        }
        if self.evaluation_cycle_length == 0 {
            return Err(Error::ConfigError(
                "evaluation_cycle_length must be greater than zero".to_string(),
            ));
        }
        self.metric_weights.validate()
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.providers.get(&provider).is_some_and(|p| p.enabled)
    }

    /// The configured default model for a provider, only if the provider is enabled
    pub fn enabled_default(&self, provider: Provider, task_type: &TaskType) -> Option<ModelIdentifier> {
        self.providers
            .get(&provider)
            .filter(|p| p.enabled)
            .and_then(|p| p.default_model(task_type))
            .map(|model| ModelIdentifier::new(provider, model))
    }

    /// Every enabled model for a task type, in provider priority order
    ///
    /// Each provider contributes its default model first, then its additional
    /// models. Duplicates are dropped, keeping the first occurrence.
    pub fn models_for(&self, task_type: &TaskType) -> Vec<ModelIdentifier> {
        let mut models: Vec<ModelIdentifier> = Vec::new();

        for provider in Provider::PRIORITY {
            let Some(settings) = self.providers.get(&provider).filter(|p| p.enabled) else {
                continue;
            };

            let defaults = settings.default_model(task_type).into_iter();
            let extras = settings
                .additional_models
                .get(task_type)
                .into_iter()
                .flatten()
                .map(String::as_str);

            for name in defaults.chain(extras) {
                let id = ModelIdentifier::new(provider, name);
                if !models.contains(&id) {
                    models.push(id);
                }
            }
        }

        models
    }
}

/// Partial update applied on top of the current configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_cycle_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_cycle_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_weights: Option<MetricWeights>,
    /// Providers listed here replace their current settings wholesale
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub providers: BTreeMap<Provider, ProviderSettings>,
}

impl RegistryConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle_lengths(mut self, standard: u32, evaluation: u32) -> Self {
        self.standard_cycle_length = Some(standard);
        self.evaluation_cycle_length = Some(evaluation);
        self
    }

    pub fn weights(mut self, weights: MetricWeights) -> Self {
        self.metric_weights = Some(weights);
        self
    }

    pub fn provider(mut self, provider: Provider, settings: ProviderSettings) -> Self {
        self.providers.insert(provider, settings);
        self
    }

    /// Produce the configuration that results from applying this update
    pub fn apply_to(&self, current: &RegistryConfig) -> RegistryConfig {
        let mut next = current.clone();
        if let Some(len) = self.standard_cycle_length {
            next.standard_cycle_length = len;
        }
        if let Some(len) = self.evaluation_cycle_length {
            next.evaluation_cycle_length = len;
        }
        if let Some(weights) = self.metric_weights {
            next.metric_weights = weights;
        }
        for (provider, settings) in &self.providers {
            next.providers.insert(*provider, settings.clone());
        }
        next
    }
}
