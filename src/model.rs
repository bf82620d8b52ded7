//! The differentiable-model boundary.
//!
//! The robustness algorithms never implement forward passes or automatic
//! differentiation themselves; they consume an opaque classifier through the
//! narrow contract defined here. The model is always borrowed, never owned,
//! and its weights are never inspected or persisted.
//!
//! # The gradient oracle
//!
//! [`DifferentiableModel::gradient`] takes a scalar-valued closure of a
//! tensor and a point, and returns the gradient of the closure at that
//! point. Backends are free to implement it with reverse-mode autodiff or
//! finite differences; the algorithms in this crate only decide *which*
//! activations to differentiate and what to do with the result.

use crate::error::Result;
use crate::tensor::Tensor;

/// Metadata for one layer of an opaque model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerInfo {
    /// Layer name, unique within the model. Used as the noise-register key.
    pub name: String,
    /// Whether the layer has learnable weights that are being trained.
    pub trainable: bool,
    /// Number of learnable parameters in this layer.
    pub weight_count: usize,
}

/// Scalar loss function `(labels, predictions) -> loss`, supplied by the
/// caller (typically cross-entropy).
pub type LossFn<'a> = dyn Fn(&Tensor, &Tensor) -> Result<f32> + Sync + 'a;

/// An ordered sequence of layers with a gradient oracle.
///
/// Implementations must apply layers in declaration order:
/// `forward(x)` is `apply_layer(n-1, ... apply_layer(0, x))`. The default
/// `forward` does exactly that fold; override it only as an optimization.
pub trait DifferentiableModel: Send + Sync {
    /// Ordered layer metadata.
    fn layers(&self) -> Vec<LayerInfo>;

    /// Apply the layer at `index` to an input tensor.
    fn apply_layer(&self, index: usize, input: &Tensor) -> Result<Tensor>;

    /// Gradient of `f` with respect to `at`, evaluated at `at`.
    fn gradient(&self, f: &dyn Fn(&Tensor) -> Result<f32>, at: &Tensor) -> Result<Tensor>;

    /// Full forward pass through all layers.
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let mut activations = input.clone();
        for index in 0..self.layers().len() {
            activations = self.apply_layer(index, &activations)?;
        }
        Ok(activations)
    }

    /// Total learnable parameter count across all layers.
    fn parameter_count(&self) -> usize {
        self.layers().iter().map(|l| l.weight_count).sum()
    }
}

/// Black-box weight updater.
///
/// Given the current model and a scalar objective, performs one weight
/// update and returns the objective value it observed before the update.
/// How gradients w.r.t. weights are obtained is entirely the optimizer's
/// business; the core never sees weight tensors.
pub trait Optimizer {
    /// Apply one update step against `objective`.
    fn apply(
        &mut self,
        model: &mut dyn DifferentiableModel,
        objective: &dyn Fn(&dyn DifferentiableModel) -> Result<f32>,
    ) -> Result<f32>;
}
