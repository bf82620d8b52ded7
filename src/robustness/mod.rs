//! Robustness metrics, report generation, and model comparison.
//!
//! Turns raw model predictions into the aggregate robustness metrics of
//! the ANP evaluation protocol and composes them into a
//! [`RobustnessReport`]. All estimators are pure with respect to the
//! model: they only forward and compare predictions.
//!
//! # References
//!
//! - Hendrycks, D., & Dietterich, T. (2019). Benchmarking neural network
//!   robustness to common corruptions and perturbations. ICLR. (mCE, mFR)

pub mod metrics;

mod evaluator;
mod report;

pub use evaluator::{
    compare_models, generate_robustness_report, AdversarialSet, EvaluationData, LabelledSet,
    ReportOptions,
};
pub use metrics::{CorruptionSet, NoiseKind, NoiseSequence};
pub use report::{
    AdversarialMetrics, CorruptionMetrics, MetricComparison, ModelComparison, ModelInfo,
    RobustnessReport, StructuralMetrics,
};
