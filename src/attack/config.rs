//! Attack method selection and per-invocation configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RobustError};

/// The four supported gradient-sign attack methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttackMethod {
    /// Fast Gradient Sign Method: a single epsilon-sized step.
    Fgsm,
    /// Basic Iterative Method: repeated alpha-sized steps with projection.
    Bim,
    /// Projected Gradient Descent: BIM from a random start in the ball.
    Pgd,
    /// Momentum Iterative FGSM: BIM steered by an L1-normalized momentum.
    MiFgsm,
}

impl AttackMethod {
    /// Stable string name, used as the key in robustness reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AttackMethod::Fgsm => "fgsm",
            AttackMethod::Bim => "bim",
            AttackMethod::Pgd => "pgd",
            AttackMethod::MiFgsm => "mifgsm",
        }
    }

    /// Whether the method runs an inner iteration loop.
    #[must_use]
    pub fn is_iterative(&self) -> bool {
        !matches!(self, AttackMethod::Fgsm)
    }
}

impl fmt::Display for AttackMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Immutable configuration for one attack invocation.
///
/// `alpha` and `iterations` are only meaningful for iterative methods;
/// `decay` only for MI-FGSM; `target_class` is required iff `targeted`.
///
/// # Example
///
/// ```
/// use endurecer::attack::AttackConfig;
///
/// let config = AttackConfig::pgd(0.3, 0.01, 40);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackConfig {
    /// Attack method.
    pub method: AttackMethod,
    /// Perturbation budget under the L-infinity norm.
    pub epsilon: f32,
    /// Per-iteration step size (iterative methods).
    pub alpha: f32,
    /// Number of iterations (iterative methods).
    pub iterations: usize,
    /// Momentum decay factor (MI-FGSM).
    pub decay: f32,
    /// Whether to steer toward a specific class instead of away from the
    /// true one.
    pub targeted: bool,
    /// Target class for targeted attacks.
    pub target_class: Option<usize>,
    /// Seed for PGD's random start; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl AttackConfig {
    /// FGSM with the given perturbation budget.
    #[must_use]
    pub fn fgsm(epsilon: f32) -> Self {
        Self {
            method: AttackMethod::Fgsm,
            epsilon,
            alpha: 0.0,
            iterations: 1,
            decay: 1.0,
            targeted: false,
            target_class: None,
            seed: None,
        }
    }

    /// BIM with the given budget, step size, and iteration count.
    #[must_use]
    pub fn bim(epsilon: f32, alpha: f32, iterations: usize) -> Self {
        Self {
            method: AttackMethod::Bim,
            ..Self::fgsm(epsilon)
        }
        .with_steps(alpha, iterations)
    }

    /// PGD with the given budget, step size, and iteration count.
    #[must_use]
    pub fn pgd(epsilon: f32, alpha: f32, iterations: usize) -> Self {
        Self {
            method: AttackMethod::Pgd,
            ..Self::fgsm(epsilon)
        }
        .with_steps(alpha, iterations)
    }

    /// MI-FGSM with the given budget, step size, iterations, and momentum
    /// decay.
    #[must_use]
    pub fn mifgsm(epsilon: f32, alpha: f32, iterations: usize, decay: f32) -> Self {
        let mut config = Self {
            method: AttackMethod::MiFgsm,
            ..Self::fgsm(epsilon)
        }
        .with_steps(alpha, iterations);
        config.decay = decay;
        config
    }

    fn with_steps(mut self, alpha: f32, iterations: usize) -> Self {
        self.alpha = alpha;
        self.iterations = iterations;
        self
    }

    /// Make the attack targeted toward `class`.
    #[must_use]
    pub fn targeted(mut self, class: usize) -> Self {
        self.targeted = true;
        self.target_class = Some(class);
        self
    }

    /// Fix the seed for PGD's random start.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate the configuration before any tensor work begins.
    pub fn validate(&self) -> Result<()> {
        if !self.epsilon.is_finite() || self.epsilon <= 0.0 {
            return Err(RobustError::configuration(
                "epsilon",
                self.epsilon,
                "a finite value > 0",
            ));
        }
        if self.method.is_iterative() {
            if !self.alpha.is_finite() || self.alpha <= 0.0 {
                return Err(RobustError::configuration(
                    "alpha",
                    self.alpha,
                    "a finite value > 0 for iterative methods",
                ));
            }
            if self.iterations == 0 {
                return Err(RobustError::configuration(
                    "iterations",
                    self.iterations,
                    ">= 1 for iterative methods",
                ));
            }
        }
        if self.method == AttackMethod::MiFgsm && (!self.decay.is_finite() || self.decay < 0.0) {
            return Err(RobustError::configuration(
                "decay",
                self.decay,
                "a finite value >= 0",
            ));
        }
        if self.targeted && self.target_class.is_none() {
            return Err(RobustError::configuration(
                "target_class",
                "None",
                "a class index when targeted = true",
            ));
        }
        Ok(())
    }
}
