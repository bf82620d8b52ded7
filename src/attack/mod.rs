//! Adversarial attack generation and input corruptions.
//!
//! Four gradient-sign attacks against a fixed model (FGSM, BIM, PGD,
//! MI-FGSM) plus corruption generators (Gaussian noise, salt-and-pepper,
//! Gaussian blur) that perturb inputs independently of model gradients.
//!
//! All attacks share one output contract: same shape as the input, every
//! element in `[0, 1]`, and within `epsilon` of the original input under
//! the L-infinity norm.
//!
//! # References
//!
//! - Goodfellow, I., et al. (2015). Explaining and harnessing adversarial
//!   examples. ICLR. (FGSM)
//! - Kurakin, A., et al. (2017). Adversarial examples in the physical
//!   world. ICLR workshop. (BIM)
//! - Madry, A., et al. (2018). Towards deep learning models resistant to
//!   adversarial attacks. ICLR. (PGD)
//! - Dong, Y., et al. (2018). Boosting adversarial attacks with momentum.
//!   CVPR. (MI-FGSM)

pub mod corruption;

mod config;
mod methods;

pub use config::{AttackConfig, AttackMethod};
pub use methods::{success_rate, AttackEngine};
