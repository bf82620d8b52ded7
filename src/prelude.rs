//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use endurecer::prelude::*;
//! ```

pub use crate::anp::{AnpConfig, AnpTrainer, NoiseRegistry, NormKind};
pub use crate::attack::{success_rate, AttackConfig, AttackEngine, AttackMethod};
pub use crate::cancel::CancelToken;
pub use crate::error::{Result, RobustError};
pub use crate::model::{DifferentiableModel, LayerInfo, LossFn, Optimizer};
pub use crate::robustness::{
    compare_models, generate_robustness_report, EvaluationData, NoiseKind, ReportOptions,
    RobustnessReport,
};
pub use crate::tensor::Tensor;
