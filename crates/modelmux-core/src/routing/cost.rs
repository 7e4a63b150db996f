//! Static cost-per-unit table used to populate performance metrics
//!
//! Costs are in USD per unit, where a unit is a token for text models, an
//! output dimension for embeddings and an input byte for image analysis.
//! Estimates never gate execution.

use std::collections::HashMap;

use super::types::{ModelIdentifier, Provider};

/// Fallback when neither the model nor its provider has an entry
pub const GLOBAL_DEFAULT_COST_PER_UNIT: f64 = 0.000_01;

/// Lookup table for unit costs
#[derive(Debug, Clone)]
pub struct CostTable {
    models: HashMap<ModelIdentifier, f64>,
    providers: HashMap<Provider, f64>,
    global_default: f64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl CostTable {
    /// Create an empty table that always answers the global default
    pub fn new() -> Self {
        Self {
            models: HashMap::new(),
            providers: HashMap::new(),
            global_default: GLOBAL_DEFAULT_COST_PER_UNIT,
        }
    }

    /// Table with list prices for the models configured out of the box
    pub fn with_defaults() -> Self {
        let mut table = Self::new();

        // OpenAI (per token)
        table.set_model(ModelIdentifier::new(Provider::OpenAi, "gpt-4"), 0.000_03);
        table.set_model(ModelIdentifier::new(Provider::OpenAi, "gpt-4o"), 0.000_005);
        table.set_model(ModelIdentifier::new(Provider::OpenAi, "gpt-4o-mini"), 0.000_000_15);
        table.set_model(ModelIdentifier::new(Provider::OpenAi, "gpt-3.5-turbo"), 0.000_002);
        table.set_model(ModelIdentifier::new(Provider::OpenAi, "gpt-4-vision-preview"), 0.000_01);
        table.set_model(
            ModelIdentifier::new(Provider::OpenAi, "text-embedding-ada-002"),
            0.000_000_1,
        );

        // Anthropic (per token)
        table.set_model(
            ModelIdentifier::new(Provider::Anthropic, "claude-3-opus-20240229"),
            0.000_015,
        );
        table.set_model(
            ModelIdentifier::new(Provider::Anthropic, "claude-3-sonnet-20240229"),
            0.000_003,
        );
        table.set_model(
            ModelIdentifier::new(Provider::Anthropic, "claude-3-haiku-20240307"),
            0.000_000_25,
        );

        table.set_provider(Provider::OpenAi, 0.000_002);
        table.set_provider(Provider::Anthropic, 0.000_003);
        table.set_provider(Provider::HuggingFace, 0.000_000_5);
        table.set_provider(Provider::Local, 0.0);

        table
    }

    pub fn set_model(&mut self, model: ModelIdentifier, cost_per_unit: f64) {
        self.models.insert(model, cost_per_unit);
    }

    pub fn set_provider(&mut self, provider: Provider, cost_per_unit: f64) {
        self.providers.insert(provider, cost_per_unit);
    }

    pub fn with_global_default(mut self, cost_per_unit: f64) -> Self {
        self.global_default = cost_per_unit;
        self
    }

    /// Cost per unit: model entry, then provider entry, then global default
    pub fn cost_per_unit(&self, model: &ModelIdentifier) -> f64 {
        self.models
            .get(model)
            .or_else(|| self.providers.get(&model.provider))
            .copied()
            .unwrap_or(self.global_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_fallback_chain() {
        let table = CostTable::with_defaults();

        let known = ModelIdentifier::new(Provider::OpenAi, "gpt-4");
        assert_eq!(table.cost_per_unit(&known), 0.000_03);

        let unknown_openai = ModelIdentifier::new(Provider::OpenAi, "gpt-5-preview");
        assert_eq!(table.cost_per_unit(&unknown_openai), 0.000_002);

        let local = ModelIdentifier::new(Provider::Local, "llama3");
        assert_eq!(table.cost_per_unit(&local), 0.0);
    }

    #[test]
    fn test_global_default() {
        let table = CostTable::new().with_global_default(0.5);
        let model = ModelIdentifier::new(Provider::HuggingFace, "gpt2");
        assert_eq!(table.cost_per_unit(&model), 0.5);

        assert_eq!(
            CostTable::new().cost_per_unit(&model),
            GLOBAL_DEFAULT_COST_PER_UNIT
        );
    }
}
