//! Weighted multi-objective scoring over aggregated performance history
//!
//! Records are grouped by [`ModelIdentifier`]. Each metric is averaged over
//! the records that actually reported it, so a model that never reported
//! accuracy has no mean accuracy rather than a mean of zero.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::config::MetricWeights;
use super::types::{EvaluationRecord, ModelIdentifier, SelectionOptions};

/// Soft penalty for candidates that are not from the preferred provider
const NON_PREFERRED_FACTOR: f64 = 0.9;

/// Extra cost multiplier when the caller is cost sensitive
const COST_SENSITIVE_MULTIPLIER: f64 = 2.0;

/// Running mean over present samples only
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Mean {
    sum: f64,
    samples: u64,
}

impl Mean {
    fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.sum += v;
            self.samples += 1;
        }
    }

    fn value(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.sum / self.samples as f64)
    }
}

/// Aggregated history of one model for one task type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAggregate {
    pub model_id: ModelIdentifier,
    pub samples: u64,
    pub avg_accuracy: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub avg_cost: Option<f64>,
    pub avg_user_rating: Option<f64>,
}

impl ModelAggregate {
    /// Aggregate for a model without history
    pub fn empty(model_id: ModelIdentifier) -> Self {
        Self {
            model_id,
            samples: 0,
            avg_accuracy: None,
            avg_latency_ms: None,
            avg_cost: None,
            avg_user_rating: None,
        }
    }

    /// Compute the score of this aggregate
    ///
    /// Disqualified candidates score `f64::NEG_INFINITY`. A non-preferred
    /// provider loses 10% of the score's magnitude rather than being scaled by
    /// a plain `× 0.9`, which would raise a negative score.
    pub fn score(&self, weights: &MetricWeights, options: &SelectionOptions) -> f64 {
        if let Some(max_latency) = options.max_latency_ms {
            match self.avg_latency_ms {
                Some(latency) if latency <= max_latency => {}
                _ => return f64::NEG_INFINITY,
            }
        }
        if let Some(min_accuracy) = options.min_accuracy {
            match self.avg_accuracy {
                Some(accuracy) if accuracy >= min_accuracy => {}
                _ => return f64::NEG_INFINITY,
            }
        }

        let accuracy = self.avg_accuracy.unwrap_or_default();
        let latency = self.avg_latency_ms.unwrap_or_default();
        let cost = self.avg_cost.unwrap_or_default();

        let mut score =
            accuracy * weights.accuracy - latency * weights.latency - cost * weights.cost;

        if let Some(preferred) = options.preferred_provider {
            if self.model_id.provider != preferred {
                // Scale the magnitude so the penalty lowers negative scores too
                score -= score.abs() * (1.0 - NON_PREFERRED_FACTOR);
            }
        }

        if options.cost_sensitive {
            score -= COST_SENSITIVE_MULTIPLIER * cost * weights.cost;
        }

        score
    }
}

/// Group records by model
///
/// Output order: models listed in `preferred_order` first (in that order,
/// only if they have history), then every other model in first-seen order.
pub fn aggregate(
    records: &[EvaluationRecord],
    preferred_order: &[ModelIdentifier],
) -> Vec<ModelAggregate> {
    struct Acc {
        samples: u64,
        accuracy: Mean,
        latency: Mean,
        cost: Mean,
        rating: Mean,
    }

    let mut first_seen: Vec<&ModelIdentifier> = Vec::new();
    let mut groups: HashMap<&ModelIdentifier, Acc> = HashMap::new();

    for record in records {
        let acc = groups.entry(&record.model_id).or_insert_with(|| {
            first_seen.push(&record.model_id);
            Acc {
                samples: 0,
                accuracy: Mean::default(),
                latency: Mean::default(),
                cost: Mean::default(),
                rating: Mean::default(),
            }
        });
        acc.samples += 1;
        acc.accuracy.push(record.metrics.accuracy);
        acc.latency.push(record.metrics.latency_ms);
        acc.cost.push(record.metrics.total_cost());
        acc.rating.push(record.metrics.user_rating);
    }

    let ordered = preferred_order
        .iter()
        .filter(|id| groups.contains_key(id))
        .chain(first_seen.into_iter().filter(|id| !preferred_order.contains(*id)));

    ordered
        .map(|id| {
            let acc = &groups[id];
            ModelAggregate {
                model_id: id.clone(),
                samples: acc.samples,
                avg_accuracy: acc.accuracy.value(),
                avg_latency_ms: acc.latency.value(),
                avg_cost: acc.cost.value(),
                avg_user_rating: acc.rating.value(),
            }
        })
        .collect()
}

/// Pick the candidate with the strictly greatest finite score
///
/// Ties keep the earliest candidate. Returns `None` when every candidate is
/// disqualified or the slice is empty.
pub fn best_candidate<'a>(
    aggregates: &'a [ModelAggregate],
    weights: &MetricWeights,
    options: &SelectionOptions,
) -> Option<(&'a ModelAggregate, f64)> {
    let mut best: Option<(&ModelAggregate, f64)> = None;

    for aggregate in aggregates {
        let score = aggregate.score(weights, options);
        if !score.is_finite() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((aggregate, score)),
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::types::{PerformanceMetrics, Provider, TaskType};

    fn id(provider: Provider, name: &str) -> ModelIdentifier {
        ModelIdentifier::new(provider, name)
    }

    fn record(model: &ModelIdentifier, metrics: PerformanceMetrics) -> EvaluationRecord {
        EvaluationRecord::new(model.clone(), TaskType::text_generation(), metrics)
    }

    #[test]
    fn test_absent_accuracy_is_not_averaged_as_zero() {
        let a = id(Provider::OpenAi, "gpt-4");
        let records = vec![
            record(&a, PerformanceMetrics::new().with_accuracy(0.8).with_latency(100.0)),
            record(&a, PerformanceMetrics::new().with_latency(300.0)),
        ];

        let aggregates = aggregate(&records, &[]);
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].samples, 2);
        assert_eq!(aggregates[0].avg_accuracy, Some(0.8));
        assert_eq!(aggregates[0].avg_latency_ms, Some(200.0));
        assert_eq!(aggregates[0].avg_cost, None);
    }

    #[test]
    fn test_aggregate_order() {
        let a = id(Provider::OpenAi, "gpt-4");
        let b = id(Provider::Anthropic, "claude-3-opus-20240229");
        let c = id(Provider::HuggingFace, "gpt2");
        let records = vec![
            record(&c, PerformanceMetrics::new()),
            record(&b, PerformanceMetrics::new()),
            record(&a, PerformanceMetrics::new()),
        ];

        // Preferred order first, then first-seen
        let order: Vec<_> = aggregate(&records, &[a.clone(), id(Provider::Local, "absent")])
            .into_iter()
            .map(|agg| agg.model_id)
            .collect();
        assert_eq!(order, vec![a, c, b]);
    }

    #[test]
    fn test_score_formula() {
        let agg = ModelAggregate {
            model_id: id(Provider::OpenAi, "gpt-4"),
            samples: 3,
            avg_accuracy: Some(0.9),
            avg_latency_ms: Some(100.0),
            avg_cost: Some(2.0),
            avg_user_rating: None,
        };
        let weights = MetricWeights::new(10.0, 0.01, 1.0);

        let base = agg.score(&weights, &SelectionOptions::new());
        assert!((base - (9.0 - 1.0 - 2.0)).abs() < 1e-9);

        let cost_sensitive = agg.score(&weights, &SelectionOptions::new().with_cost_sensitive(true));
        assert!((cost_sensitive - (base - 4.0)).abs() < 1e-9);

        let other_provider =
            agg.score(&weights, &SelectionOptions::new().with_preferred_provider(Provider::Anthropic));
        assert!((other_provider - base * 0.9).abs() < 1e-9);

        let same_provider =
            agg.score(&weights, &SelectionOptions::new().with_preferred_provider(Provider::OpenAi));
        assert!((same_provider - base).abs() < 1e-9);
    }

    #[test]
    fn test_preference_penalty_lowers_negative_scores() {
        let agg = ModelAggregate {
            model_id: id(Provider::OpenAi, "gpt-4"),
            samples: 1,
            avg_accuracy: None,
            avg_latency_ms: Some(1000.0),
            avg_cost: None,
            avg_user_rating: None,
        };
        let weights = MetricWeights::default();
        let base = agg.score(&weights, &SelectionOptions::new());
        let penalised =
            agg.score(&weights, &SelectionOptions::new().with_preferred_provider(Provider::Local));
        assert!(base < 0.0);
        assert!(penalised < base);
    }

    #[test]
    fn test_hard_filters_disqualify() {
        let slow_accurate = ModelAggregate {
            model_id: id(Provider::OpenAi, "gpt-4"),
            samples: 5,
            avg_accuracy: Some(0.9),
            avg_latency_ms: Some(500.0),
            avg_cost: None,
            avg_user_rating: None,
        };
        let fast_sloppy = ModelAggregate {
            model_id: id(Provider::HuggingFace, "distilgpt2"),
            samples: 5,
            avg_accuracy: Some(0.4),
            avg_latency_ms: Some(50.0),
            avg_cost: None,
            avg_user_rating: None,
        };
        let aggregates = vec![slow_accurate, fast_sloppy];

        // Even with an overwhelming accuracy weight the slow model is excluded
        for weights in [
            MetricWeights::new(1_000_000.0, 0.0001, 0.0),
            MetricWeights::new(1.0, 1.0, 1.0),
            MetricWeights::new(0.0, 1.0, 0.0),
        ] {
            let options = SelectionOptions::new().with_max_latency(100.0);
            let (best, _) = best_candidate(&aggregates, &weights, &options).unwrap();
            assert_eq!(best.model_id.model_name, "distilgpt2");
        }

        let options = SelectionOptions::new().with_max_latency(100.0).with_min_accuracy(0.5);
        assert!(best_candidate(&aggregates, &MetricWeights::default(), &options).is_none());
    }

    #[test]
    fn test_min_accuracy_requires_reported_accuracy() {
        let unknown = ModelAggregate {
            model_id: id(Provider::Local, "llama3"),
            samples: 2,
            avg_accuracy: None,
            avg_latency_ms: Some(10.0),
            avg_cost: None,
            avg_user_rating: None,
        };
        let score = unknown.score(
            &MetricWeights::default(),
            &SelectionOptions::new().with_min_accuracy(0.1),
        );
        assert_eq!(score, f64::NEG_INFINITY);
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        let make = |name: &str| ModelAggregate {
            model_id: id(Provider::OpenAi, name),
            samples: 1,
            avg_accuracy: Some(0.5),
            avg_latency_ms: Some(10.0),
            avg_cost: None,
            avg_user_rating: None,
        };
        let aggregates = vec![make("first"), make("second")];
        let (best, _) =
            best_candidate(&aggregates, &MetricWeights::default(), &SelectionOptions::new()).unwrap();
        assert_eq!(best.model_id.model_name, "first");
    }
}
