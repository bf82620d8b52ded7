//! Adversarial Noise Propagation (ANP) training.
//!
//! ANP injects gradient-derived noise into the activations of the
//! shallowest trainable layers during training, so the model learns
//! representations that are less sensitive to input perturbations.
//!
//! Per training batch, [`AnpTrainer::train_step`] runs `k` sub-steps of
//!
//! ```text
//! r(m, t+1) = (1 - eta) * r(m, t) + (epsilon / k) * g(m, t) / ||g(m, t)||_p
//! ```
//!
//! where `r(m, t)` is the accumulated noise for hardened layer `m` and
//! `g(m, t)` is the gradient of the noise-injected training loss with
//! respect to that layer's activation. Each sub-step also performs one
//! ordinary optimizer update of the model weights against the
//! noise-injected loss.
//!
//! # Reference
//!
//! - Liu, A., et al. (2019). Training Robust Deep Neural Networks via
//!   Adversarial Noise Propagation.

mod registry;
mod trainer;

pub use registry::{NoiseRegister, NoiseRegistry, NormKind};
pub use trainer::{AnpConfig, AnpTrainer};
