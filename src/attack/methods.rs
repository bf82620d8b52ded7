//! The gradient-sign attack family.
//!
//! Every iterative method preserves one ordering invariant: take the step,
//! project the *cumulative* perturbation back into the epsilon ball around
//! the original input, then clip to the valid `[0, 1]` range. Range
//! clipping always comes last; projecting after it could push values back
//! out of range.

use crate::cancel::CancelToken;
use crate::error::{Result, RobustError};
use crate::model::{DifferentiableModel, LossFn};
use crate::tensor::Tensor;

use super::config::{AttackConfig, AttackMethod};

/// Generates adversarial examples against a fixed, borrowed model.
///
/// The engine holds no state between invocations; the MI-FGSM momentum
/// accumulator lives for a single call and is dropped at its end.
///
/// # Example
///
/// ```ignore
/// use endurecer::attack::{AttackConfig, AttackEngine};
/// use endurecer::cancel::CancelToken;
///
/// let engine = AttackEngine::new();
/// let adversarial = engine.generate(
///     &model, &inputs, &labels,
///     &AttackConfig::pgd(0.3, 0.01, 40),
///     &loss_fn,
///     &CancelToken::new(),
/// )?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AttackEngine;

impl AttackEngine {
    /// Create an attack engine.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Produce an adversarial input batch for the configured method.
    ///
    /// The output has the same shape as `inputs`, lies elementwise in
    /// `[0, 1]`, and within `config.epsilon` of `inputs` under the
    /// L-infinity norm. Fails with a configuration error before any
    /// tensor work if the config is invalid, and checks `token` between
    /// iterations.
    pub fn generate(
        &self,
        model: &dyn DifferentiableModel,
        inputs: &Tensor,
        labels: &Tensor,
        config: &AttackConfig,
        loss_fn: &LossFn<'_>,
        token: &CancelToken,
    ) -> Result<Tensor> {
        config.validate()?;
        let (labels, step_sign) = effective_labels(labels, config)?;

        match config.method {
            AttackMethod::Fgsm => fgsm(model, inputs, &labels, config, step_sign, loss_fn),
            AttackMethod::Bim => {
                let start = inputs.clone();
                iterate(model, inputs, start, &labels, config, step_sign, loss_fn, token)
            }
            AttackMethod::Pgd => {
                let noise =
                    Tensor::random_uniform(inputs.shape(), -config.epsilon, config.epsilon, config.seed);
                let start = inputs.add(&noise)?.clamp(0.0, 1.0);
                iterate(model, inputs, start, &labels, config, step_sign, loss_fn, token)
            }
            AttackMethod::MiFgsm => {
                mifgsm(model, inputs, &labels, config, step_sign, loss_fn, token)
            }
        }
    }
}

/// Fraction of inputs whose prediction both changed under the attack and
/// ended up wrong — the attack's success rate.
pub fn success_rate(
    model: &dyn DifferentiableModel,
    original: &Tensor,
    adversarial: &Tensor,
    labels: &Tensor,
) -> Result<f32> {
    let original_classes = model.forward(original)?.argmax_rows()?;
    let adversarial_classes = model.forward(adversarial)?.argmax_rows()?;
    let true_classes = labels.argmax_rows()?;
    if original_classes.len() != true_classes.len() {
        return Err(RobustError::dimension(
            true_classes.len(),
            original_classes.len(),
        ));
    }
    let successes = original_classes
        .iter()
        .zip(adversarial_classes.iter())
        .zip(true_classes.iter())
        .filter(|((orig, adv), truth)| orig != adv && adv != truth)
        .count();
    Ok(successes as f32 / true_classes.len().max(1) as f32)
}

/// Resolve the labels the loss is computed against, and the sign of the
/// gradient step: untargeted attacks ascend the true-label loss (+1),
/// targeted attacks descend the target-label loss (-1).
fn effective_labels(labels: &Tensor, config: &AttackConfig) -> Result<(Tensor, f32)> {
    if !config.targeted {
        return Ok((labels.clone(), 1.0));
    }
    let Some(class) = config.target_class else {
        return Err(RobustError::configuration(
            "target_class",
            "None",
            "a class index when targeted = true",
        ));
    };
    if labels.ndim() != 2 {
        return Err(RobustError::dimension("[batch, classes]", labels.shape()));
    }
    let classes = labels.shape()[1];
    if class >= classes {
        return Err(RobustError::configuration(
            "target_class",
            class,
            &format!("< number of classes ({classes})"),
        ));
    }
    let mut one_hot = Tensor::zeros(labels.shape());
    for row in 0..labels.shape()[0] {
        one_hot.data_mut()[row * classes + class] = 1.0;
    }
    Ok((one_hot, -1.0))
}

fn input_gradient(
    model: &dyn DifferentiableModel,
    at: &Tensor,
    labels: &Tensor,
    loss_fn: &LossFn<'_>,
) -> Result<Tensor> {
    let objective = |x: &Tensor| -> Result<f32> {
        let predictions = model.forward(x)?;
        loss_fn(labels, &predictions)
    };
    let gradient = model.gradient(&objective, at)?;
    if !gradient.is_finite() {
        return Err(RobustError::numerical("input gradient"));
    }
    Ok(gradient)
}

fn fgsm(
    model: &dyn DifferentiableModel,
    inputs: &Tensor,
    labels: &Tensor,
    config: &AttackConfig,
    step_sign: f32,
    loss_fn: &LossFn<'_>,
) -> Result<Tensor> {
    let gradient = input_gradient(model, inputs, labels, loss_fn)?;
    let perturbation = gradient.sign().scale(step_sign * config.epsilon);
    Ok(inputs.add(&perturbation)?.clamp(0.0, 1.0))
}

/// Shared BIM/PGD loop: alpha-sign step, epsilon-ball projection of the
/// cumulative diff, range clip. `start` differs between the two methods.
#[allow(clippy::too_many_arguments)]
fn iterate(
    model: &dyn DifferentiableModel,
    inputs: &Tensor,
    start: Tensor,
    labels: &Tensor,
    config: &AttackConfig,
    step_sign: f32,
    loss_fn: &LossFn<'_>,
    token: &CancelToken,
) -> Result<Tensor> {
    let mut current = start;
    for _ in 0..config.iterations {
        token.checkpoint()?;
        let gradient = input_gradient(model, &current, labels, loss_fn)?;
        let update = gradient.sign().scale(step_sign * config.alpha);
        let stepped = current.add(&update)?;
        current = project_and_clip(inputs, &stepped, config.epsilon)?;
    }
    Ok(current)
}

fn mifgsm(
    model: &dyn DifferentiableModel,
    inputs: &Tensor,
    labels: &Tensor,
    config: &AttackConfig,
    step_sign: f32,
    loss_fn: &LossFn<'_>,
    token: &CancelToken,
) -> Result<Tensor> {
    let mut current = inputs.clone();
    let mut momentum = Tensor::zeros_like(inputs);
    for _ in 0..config.iterations {
        token.checkpoint()?;
        let gradient = input_gradient(model, &current, labels, loss_fn)?;
        // Momentum accumulates L1-normalized gradients, independent of the
        // attack's own epsilon norm.
        let l1 = gradient.l1_norm();
        if !l1.is_finite() || l1 == 0.0 {
            return Err(RobustError::numerical("gradient L1 norm"));
        }
        momentum = momentum.scale(config.decay).add(&gradient.scale(1.0 / l1))?;
        let update = momentum.sign().scale(step_sign * config.alpha);
        let stepped = current.add(&update)?;
        current = project_and_clip(inputs, &stepped, config.epsilon)?;
    }
    Ok(current)
}

/// Project the cumulative perturbation to the epsilon ball, then clip to
/// the valid pixel range. The order is load-bearing: range clip is last.
fn project_and_clip(inputs: &Tensor, stepped: &Tensor, epsilon: f32) -> Result<Tensor> {
    let diff = stepped.sub(inputs)?.clamp(-epsilon, epsilon);
    Ok(inputs.add(&diff)?.clamp(0.0, 1.0))
}
