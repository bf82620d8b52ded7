//! Report composition and model comparison.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::model::{DifferentiableModel, LossFn};
use crate::tensor::Tensor;

use super::metrics::{
    boundary_distance, clean_accuracy, mean_corruption_error, mean_flip_rate, noise_insensitivity,
    relative_mce, CorruptionSet, NoiseKind, NoiseSequence,
};
use super::report::{
    AdversarialMetrics, CorruptionMetrics, MetricComparison, ModelComparison, ModelInfo,
    RobustnessReport, StructuralMetrics,
};

/// Metrics compared by [`compare_models`], with their lower-is-better
/// flags. Error-like metrics improve downward; accuracy-like metrics
/// improve upward.
const COMPARED_METRICS: [(&str, bool); 6] = [
    ("clean_accuracy", false),
    ("mce", true),
    ("relative_mce", true),
    ("mfr", true),
    ("boundary_distance", false),
    ("noise_insensitivity", true),
];

/// Two metric values within this absolute difference count as similar.
const SIMILARITY_THRESHOLD: f32 = 0.01;

/// A labelled input batch.
#[derive(Debug, Clone)]
pub struct LabelledSet {
    /// Input batch.
    pub inputs: Tensor,
    /// One-hot labels.
    pub labels: Tensor,
}

/// Pre-generated adversarial inputs for one attack.
#[derive(Debug, Clone)]
pub struct AdversarialSet {
    /// Adversarial input batch.
    pub inputs: Tensor,
    /// One-hot labels of the underlying clean inputs.
    pub labels: Tensor,
    /// Budget the attack was generated with (echoed into the report).
    pub epsilon: f32,
}

/// Everything a robustness evaluation may consume. Only `clean` is
/// mandatory; empty optional collections omit their report sections.
#[derive(Debug, Clone)]
pub struct EvaluationData {
    /// Clean test set.
    pub clean: LabelledSet,
    /// Adversarial sets keyed by attack name.
    pub adversarial: BTreeMap<String, AdversarialSet>,
    /// Corruption sets.
    pub corrupted: Vec<CorruptionSet>,
    /// Temporal noise sequences.
    pub sequences: Vec<NoiseSequence>,
}

impl EvaluationData {
    /// Evaluation data with only a clean set.
    #[must_use]
    pub fn clean_only(inputs: Tensor, labels: Tensor) -> Self {
        Self {
            clean: LabelledSet { inputs, labels },
            adversarial: BTreeMap::new(),
            corrupted: Vec::new(),
            sequences: Vec::new(),
        }
    }
}

/// Options controlling which report sections are computed and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOptions {
    /// Whether to compute the (expensive) structural metrics.
    pub calculate_structural: bool,
    /// Directions sampled per input for boundary distance.
    pub num_directions: usize,
    /// Ball radius for noise insensitivity.
    pub epsilon: f32,
    /// Noise kinds for the insensitivity estimator.
    pub noise_types: Vec<NoiseKind>,
    /// Per-corruption-type baseline errors; corruption metrics are
    /// omitted when absent.
    pub baseline_errors: Option<BTreeMap<String, f32>>,
    /// Per-sequence-type baseline flip rates; mFR is omitted when absent.
    pub baseline_flip_rates: Option<BTreeMap<String, f32>>,
    /// Cap on inputs used for boundary distance.
    pub boundary_sample_limit: usize,
    /// Cap on inputs used for noise insensitivity.
    pub insensitivity_sample_limit: usize,
    /// Seed for the stochastic estimators; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            calculate_structural: false,
            num_directions: 50,
            epsilon: 0.1,
            noise_types: vec![NoiseKind::Gaussian, NoiseKind::Uniform],
            baseline_errors: None,
            baseline_flip_rates: None,
            boundary_sample_limit: 100,
            insensitivity_sample_limit: 50,
            seed: None,
        }
    }
}

/// Compute a full robustness report for one model.
///
/// Composes whichever metric subsets the data and options enable; any
/// error (including cancellation) aborts the whole report rather than
/// returning a partial one.
pub fn generate_robustness_report(
    model: &dyn DifferentiableModel,
    data: &EvaluationData,
    options: &ReportOptions,
    loss_fn: &LossFn<'_>,
    token: &CancelToken,
) -> Result<RobustnessReport> {
    let clean = clean_accuracy(model, &data.clean.inputs, &data.clean.labels)?;

    let mut adversarial = BTreeMap::new();
    for (name, set) in &data.adversarial {
        token.checkpoint()?;
        let accuracy = clean_accuracy(model, &set.inputs, &set.labels)?;
        adversarial.insert(
            name.clone(),
            AdversarialMetrics {
                accuracy,
                epsilon: set.epsilon,
            },
        );
    }

    let corruption = match (&options.baseline_errors, data.corrupted.is_empty()) {
        (Some(baselines), false) => {
            let mce = mean_corruption_error(model, &data.corrupted, baselines, token)?;
            let relative = relative_mce(
                model,
                &data.clean.inputs,
                &data.clean.labels,
                &data.corrupted,
                baselines,
                token,
            )?;
            Some(CorruptionMetrics {
                mce,
                relative_mce: relative,
            })
        }
        _ => None,
    };

    let mfr = match (&options.baseline_flip_rates, data.sequences.is_empty()) {
        (Some(baselines), false) => Some(mean_flip_rate(model, &data.sequences, baselines, token)?),
        _ => None,
    };

    let structural = if options.calculate_structural {
        let boundary_inputs = data.clean.inputs.batch_prefix(options.boundary_sample_limit);
        let distance = boundary_distance(
            model,
            &boundary_inputs,
            options.num_directions,
            options.seed,
            token,
        )?;
        let insensitivity_inputs = data
            .clean
            .inputs
            .batch_prefix(options.insensitivity_sample_limit);
        let insensitivity_labels = data
            .clean
            .labels
            .batch_prefix(options.insensitivity_sample_limit);
        let insensitivity = noise_insensitivity(
            model,
            &insensitivity_inputs,
            &insensitivity_labels,
            options.epsilon,
            &options.noise_types,
            loss_fn,
            options.seed,
            token,
        )?;
        Some(StructuralMetrics {
            boundary_distance: distance,
            noise_insensitivity: insensitivity,
        })
    } else {
        None
    };

    Ok(RobustnessReport {
        clean_accuracy: clean,
        adversarial,
        corruption,
        mfr,
        structural,
        model_info: ModelInfo {
            layer_count: model.layers().len(),
            parameter_count: model.parameter_count(),
        },
    })
}

/// Classify each of the six fixed metrics as a win for one model or a
/// tie. Metrics absent from either report are skipped.
#[must_use]
pub fn compare_models(report1: &RobustnessReport, report2: &RobustnessReport) -> ModelComparison {
    let mut comparison = ModelComparison::default();
    for (metric, lower_better) in COMPARED_METRICS {
        let (Some(value1), Some(value2)) = (report1.metric(metric), report2.metric(metric)) else {
            continue;
        };
        let entry = MetricComparison {
            metric: metric.to_string(),
            value1,
            value2,
            improvement: (value1 - value2).abs(),
        };
        if (value1 - value2).abs() < SIMILARITY_THRESHOLD {
            comparison.similar.push(entry);
        } else if (value1 < value2) == lower_better {
            comparison.model1_better.push(entry);
        } else {
            comparison.model2_better.push(entry);
        }
    }
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(clean: f32, mce: Option<f32>, boundary: Option<f32>) -> RobustnessReport {
        RobustnessReport {
            clean_accuracy: clean,
            adversarial: BTreeMap::new(),
            corruption: mce.map(|m| CorruptionMetrics {
                mce: m,
                relative_mce: m - (1.0 - clean),
            }),
            mfr: None,
            structural: boundary.map(|b| StructuralMetrics {
                boundary_distance: b,
                noise_insensitivity: 0.2,
            }),
            model_info: ModelInfo {
                layer_count: 4,
                parameter_count: 100,
            },
        }
    }

    #[test]
    fn test_compare_higher_accuracy_wins() {
        let comparison = compare_models(&report(0.9, None, None), &report(0.7, None, None));
        assert_eq!(comparison.model1_better.len(), 1);
        assert_eq!(comparison.model1_better[0].metric, "clean_accuracy");
        assert!(comparison.model2_better.is_empty());
    }

    #[test]
    fn test_compare_lower_mce_wins() {
        let comparison =
            compare_models(&report(0.8, Some(0.9), None), &report(0.8, Some(0.5), None));
        assert!(comparison
            .model2_better
            .iter()
            .any(|c| c.metric == "mce"));
    }

    #[test]
    fn test_compare_similar_within_threshold() {
        let comparison = compare_models(&report(0.801, None, None), &report(0.800, None, None));
        assert_eq!(comparison.similar.len(), 1);
        assert!(comparison.model1_better.is_empty());
        assert!(comparison.model2_better.is_empty());
    }

    #[test]
    fn test_compare_skips_missing_metrics() {
        let comparison = compare_models(&report(0.8, Some(0.5), None), &report(0.8, None, None));
        let total = comparison.model1_better.len()
            + comparison.model2_better.len()
            + comparison.similar.len();
        // only clean_accuracy is present in both
        assert_eq!(total, 1);
    }

    #[test]
    fn test_compare_is_symmetric_under_swap() {
        let a = report(0.92, Some(0.6), Some(0.3));
        let b = report(0.85, Some(0.4), Some(0.31));
        let forward = compare_models(&a, &b);
        let backward = compare_models(&b, &a);
        let names = |entries: &[MetricComparison]| {
            entries.iter().map(|e| e.metric.clone()).collect::<Vec<_>>()
        };
        assert_eq!(names(&forward.model1_better), names(&backward.model2_better));
        assert_eq!(names(&forward.model2_better), names(&backward.model1_better));
        assert_eq!(names(&forward.similar), names(&backward.similar));
    }

    #[test]
    fn test_default_options() {
        let options = ReportOptions::default();
        assert!(!options.calculate_structural);
        assert_eq!(options.num_directions, 50);
        assert_eq!(options.boundary_sample_limit, 100);
        assert_eq!(options.insensitivity_sample_limit, 50);
        assert_eq!(
            options.noise_types,
            vec![NoiseKind::Gaussian, NoiseKind::Uniform]
        );
    }
}
