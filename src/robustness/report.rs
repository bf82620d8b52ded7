//! Robustness report and model-comparison value types.
//!
//! Everything here is plain data: nested maps of numbers, strings, and
//! booleans, so the consuming HTTP/persistence layer can serialize reports
//! without opaque handles leaking into stored state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Accuracy of the model under one adversarial attack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdversarialMetrics {
    /// Accuracy on the adversarial inputs.
    pub accuracy: f32,
    /// Perturbation budget the attack was generated with.
    pub epsilon: f32,
}

/// Corruption-robustness section of the report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorruptionMetrics {
    /// Mean corruption error. Lower is better.
    pub mce: f32,
    /// mCE minus clean error. Lower is better.
    pub relative_mce: f32,
}

/// Structural-robustness section of the report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StructuralMetrics {
    /// Empirical boundary distance. Higher is better.
    pub boundary_distance: f32,
    /// Epsilon-empirical noise insensitivity. Lower is better.
    pub noise_insensitivity: f32,
}

/// Shape summary of the evaluated model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Number of layers.
    pub layer_count: usize,
    /// Total learnable parameter count.
    pub parameter_count: usize,
}

/// Aggregate robustness report for one model.
///
/// Produced fresh per evaluation call and immutable once returned.
/// Sections whose inputs were not supplied are simply absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessReport {
    /// Accuracy on the clean test set.
    pub clean_accuracy: f32,
    /// Per-attack accuracy, keyed by attack name.
    pub adversarial: BTreeMap<String, AdversarialMetrics>,
    /// Corruption metrics, when corrupted data and baselines were given.
    pub corruption: Option<CorruptionMetrics>,
    /// Mean flip rate, when noise sequences and baselines were given.
    pub mfr: Option<f32>,
    /// Structural metrics, when requested.
    pub structural: Option<StructuralMetrics>,
    /// Model shape summary.
    pub model_info: ModelInfo,
}

impl RobustnessReport {
    /// Look up one of the six comparable metrics by name.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f32> {
        match name {
            "clean_accuracy" => Some(self.clean_accuracy),
            "mce" => self.corruption.map(|c| c.mce),
            "relative_mce" => self.corruption.map(|c| c.relative_mce),
            "mfr" => self.mfr,
            "boundary_distance" => self.structural.map(|s| s.boundary_distance),
            "noise_insensitivity" => self.structural.map(|s| s.noise_insensitivity),
            _ => None,
        }
    }
}

/// One metric's values in a two-model comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    /// Metric name.
    pub metric: String,
    /// Value from the first model's report.
    pub value1: f32,
    /// Value from the second model's report.
    pub value2: f32,
    /// Absolute difference between the two.
    pub improvement: f32,
}

/// Outcome of comparing two robustness reports metric by metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    /// Metrics where the first model wins.
    pub model1_better: Vec<MetricComparison>,
    /// Metrics where the second model wins.
    pub model2_better: Vec<MetricComparison>,
    /// Metrics within the similarity threshold of each other.
    pub similar: Vec<MetricComparison>,
}
