//! Endurecer: adversarial-robustness training and evaluation in pure Rust.
//!
//! Endurecer implements Adversarial Noise Propagation (ANP) training,
//! the gradient-sign attack family, and the statistical robustness
//! metrics needed to score a classifier, against any model exposed
//! through a narrow gradient-oracle contract.
//!
//! # Quick Start
//!
//! ```ignore
//! use endurecer::prelude::*;
//!
//! // Harden a model with ANP training
//! let mut trainer = AnpTrainer::new(AnpConfig::default())?;
//! for (inputs, labels) in batches {
//!     trainer.train_step(&mut model, &inputs, &labels, &mut optimizer, &loss_fn)?;
//! }
//!
//! // Attack it
//! let engine = AttackEngine::new();
//! let adversarial = engine.generate(
//!     &model, &inputs, &labels,
//!     &AttackConfig::pgd(0.3, 0.01, 40),
//!     &loss_fn,
//!     &CancelToken::new(),
//! )?;
//!
//! // Score it
//! let report = generate_robustness_report(
//!     &model, &data, &ReportOptions::default(), &loss_fn, &CancelToken::new(),
//! )?;
//! ```
//!
//! # Modules
//!
//! - [`tensor`]: Dense f32 tensor primitives
//! - [`model`]: The borrowed differentiable-model / gradient-oracle contract
//! - [`anp`]: ANP noise registers and the k-step training loop
//! - [`attack`]: FGSM, BIM, PGD, MI-FGSM and corruption generators
//! - [`robustness`]: mCE, relative mCE, mFR, boundary distance, noise
//!   insensitivity, report generation, and model comparison
//! - [`cancel`]: Cooperative cancellation for long evaluations
//! - [`error`]: Error taxonomy and the crate-wide `Result`
//!
//! # Reference
//!
//! - Liu, A., et al. (2019). Training Robust Deep Neural Networks via
//!   Adversarial Noise Propagation.

pub mod anp;
pub mod attack;
pub mod cancel;
pub mod error;
pub mod model;
pub mod prelude;
pub mod robustness;
pub mod tensor;

pub use error::{Result, RobustError};
pub use tensor::Tensor;
