//! The ANP training loop: k-step noise refinement plus weight updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RobustError};
use crate::model::{DifferentiableModel, LossFn, Optimizer};
use crate::tensor::Tensor;

use super::registry::{NoiseRegistry, NormKind};

/// Hyperparameters for [`AnpTrainer`].
///
/// Defaults follow the ANP paper's settings: `epsilon = 0.3`,
/// `eta = 0.1`, `k = 3`, `norm = inf`, `top_layers = 4`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnpConfig {
    /// Total perturbation budget, split evenly across the `k` sub-steps.
    pub epsilon: f32,
    /// Decay applied to the previous noise contribution.
    pub eta: f32,
    /// Number of inner gradient-descent sub-steps per training batch.
    pub k: usize,
    /// Norm under which layer gradients are normalized.
    pub norm: NormKind,
    /// How many of the shallowest trainable layers to harden.
    pub top_layers: usize,
}

impl Default for AnpConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.3,
            eta: 0.1,
            k: 3,
            norm: NormKind::Inf,
            top_layers: 4,
        }
    }
}

impl AnpConfig {
    /// Validate hyperparameters. Called at trainer construction so bad
    /// values fail fast instead of mid-training.
    pub fn validate(&self) -> Result<()> {
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(RobustError::configuration(
                "epsilon",
                self.epsilon,
                "a finite value > 0",
            ));
        }
        if !self.eta.is_finite() || !(0.0..1.0).contains(&self.eta) {
            return Err(RobustError::configuration("eta", self.eta, "in [0, 1)"));
        }
        if self.k == 0 {
            return Err(RobustError::configuration("k", self.k, ">= 1"));
        }
        if self.top_layers == 0 {
            return Err(RobustError::configuration(
                "top_layers",
                self.top_layers,
                ">= 1",
            ));
        }
        Ok(())
    }
}

/// Orchestrates ANP training against a borrowed model.
///
/// The trainer owns the only persistent per-session state of the crate,
/// its [`NoiseRegistry`]; [`AnpTrainer::dispose`] is the single teardown
/// path and is an idempotent no-op after the first call.
///
/// # Example
///
/// ```ignore
/// use endurecer::anp::{AnpConfig, AnpTrainer};
///
/// let mut trainer = AnpTrainer::new(AnpConfig::default())?;
/// for (inputs, labels) in batches {
///     let loss = trainer.train_step(&mut model, &inputs, &labels, &mut optimizer, &loss_fn)?;
/// }
/// trainer.dispose();
/// ```
#[derive(Debug)]
pub struct AnpTrainer {
    config: AnpConfig,
    registry: NoiseRegistry,
}

impl AnpTrainer {
    /// Create a trainer, failing fast on invalid hyperparameters.
    pub fn new(config: AnpConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: NoiseRegistry::default(),
        })
    }

    /// The trainer's configuration.
    #[must_use]
    pub fn config(&self) -> &AnpConfig {
        &self.config
    }

    /// The current noise registry.
    #[must_use]
    pub fn registry(&self) -> &NoiseRegistry {
        &self.registry
    }

    /// (Re)build noise registers from the model's current layer list,
    /// dropping any previous registers and their tensors.
    pub fn initialize_registers(&mut self, model: &dyn DifferentiableModel) -> Result<()> {
        self.registry = NoiseRegistry::initialize(model, self.config.top_layers)?;
        Ok(())
    }

    /// Gradient of the noise-injected loss with respect to each hardened
    /// layer's noise-injected activation, keyed by layer name.
    ///
    /// The actual differentiation is delegated to the model's gradient
    /// oracle; this method only selects which activations to
    /// differentiate. Gradients are also stashed in each register's
    /// `pending_gradient` slot until the following update commits.
    pub fn compute_gradients(
        &mut self,
        model: &dyn DifferentiableModel,
        inputs: &Tensor,
        labels: &Tensor,
        loss_fn: &LossFn<'_>,
    ) -> Result<BTreeMap<String, Tensor>> {
        check_batch_agreement(inputs, labels)?;
        let mut gradients = BTreeMap::new();
        {
            let registry = &self.registry;
            for (index, layer) in model.layers().iter().enumerate() {
                if registry.register(&layer.name).is_none() {
                    continue;
                }
                let activation = registry.activation_at(model, index, inputs)?;
                let next = index + 1;
                let objective = |candidate: &Tensor| -> Result<f32> {
                    let predictions = registry.forward_from(model, next, candidate)?;
                    loss_fn(labels, &predictions)
                };
                let gradient = model.gradient(&objective, &activation)?;
                if !gradient.is_finite() {
                    return Err(RobustError::Numerical {
                        context: format!("gradient of layer '{}'", layer.name),
                    });
                }
                gradients.insert(layer.name.clone(), gradient);
            }
        }
        for (name, gradient) in &gradients {
            if let Some(register) = self.registry.register_mut(name) {
                register.pending_gradient = Some(gradient.clone());
            }
        }
        Ok(gradients)
    }

    /// Apply the noise update rule to every register named in `gradients`.
    ///
    /// Two-phase: every replacement tensor is computed and validated
    /// before any register is touched, so an error leaves all registers
    /// exactly as they were. The cold-start branch (no previous noise)
    /// writes `(epsilon / k) * g / ||g||` without the `(1 - eta)` term,
    /// since decaying an absent value is undefined.
    pub fn update_registers(&mut self, gradients: &BTreeMap<String, Tensor>) -> Result<()> {
        let step_scale = self.config.epsilon / self.config.k as f32;
        let mut staged: Vec<(String, Tensor)> = Vec::with_capacity(gradients.len());
        for (name, gradient) in gradients {
            let register = self.registry.register(name).ok_or_else(|| {
                RobustError::configuration("layer", name, "a hardened layer with a noise register")
            })?;
            if !gradient.is_finite() {
                return Err(RobustError::Numerical {
                    context: format!("gradient of layer '{name}'"),
                });
            }
            let norm = self.config.norm.norm(gradient);
            if !norm.is_finite() || norm == 0.0 {
                return Err(RobustError::Numerical {
                    context: format!("gradient norm of layer '{name}'"),
                });
            }
            let contribution = gradient.scale(step_scale / norm);
            let new_noise = match &register.noise {
                None => contribution,
                Some(previous) => previous.scale(1.0 - self.config.eta).add(&contribution)?,
            };
            staged.push((name.clone(), new_noise));
        }
        // Commit phase; every staged name was resolved above.
        for (name, noise) in staged {
            if let Some(register) = self.registry.register_mut(&name) {
                register.noise = Some(noise);
                register.pending_gradient = None;
            }
        }
        Ok(())
    }

    /// Noise-injected forward pass with the current registers.
    pub fn forward_with_noise(
        &self,
        model: &dyn DifferentiableModel,
        inputs: &Tensor,
    ) -> Result<Tensor> {
        self.registry.forward_with_noise(model, inputs)
    }

    /// One ANP training step over a batch: `k` sequential sub-steps of
    /// {compute gradients, update registers, one optimizer update of the
    /// model weights against the noise-injected loss}. Returns the mean
    /// loss across the sub-steps.
    ///
    /// Registers are initialized lazily from the model if the registry is
    /// empty (fresh trainer, or one that was disposed).
    pub fn train_step(
        &mut self,
        model: &mut dyn DifferentiableModel,
        inputs: &Tensor,
        labels: &Tensor,
        optimizer: &mut dyn Optimizer,
        loss_fn: &LossFn<'_>,
    ) -> Result<f32> {
        if self.registry.is_empty() {
            self.initialize_registers(model)?;
        }
        let mut total_loss = 0.0;
        for _ in 0..self.config.k {
            let gradients = self.compute_gradients(model, inputs, labels, loss_fn)?;
            self.update_registers(&gradients)?;

            let registry = &self.registry;
            let objective = |m: &dyn DifferentiableModel| -> Result<f32> {
                let predictions = registry.forward_with_noise(m, inputs)?;
                loss_fn(labels, &predictions)
            };
            let loss = optimizer.apply(model, &objective)?;
            if !loss.is_finite() {
                return Err(RobustError::numerical("training loss"));
            }
            total_loss += loss;
        }
        Ok(total_loss / self.config.k as f32)
    }

    /// Release all register tensors and clear the registry. Idempotent.
    pub fn dispose(&mut self) {
        self.registry.clear();
    }
}

fn check_batch_agreement(inputs: &Tensor, labels: &Tensor) -> Result<()> {
    if inputs.row_count() != labels.row_count() {
        return Err(RobustError::dimension(
            format!("batch of {}", inputs.row_count()),
            format!("batch of {}", labels.row_count()),
        ));
    }
    Ok(())
}
