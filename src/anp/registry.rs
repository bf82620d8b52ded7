//! Per-layer noise registers and the noise-injected forward pass.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RobustError};
use crate::model::DifferentiableModel;
use crate::tensor::Tensor;

/// Norm used to normalize layer gradients in the noise update rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NormKind {
    /// L-infinity: divide by the largest absolute element.
    #[default]
    #[serde(rename = "inf")]
    Inf,
    /// L2: divide by the Euclidean norm.
    #[serde(rename = "2")]
    L2,
}

impl NormKind {
    /// Norm of a gradient tensor under this kind.
    #[must_use]
    pub fn norm(&self, tensor: &Tensor) -> f32 {
        match self {
            NormKind::Inf => tensor.abs_max(),
            NormKind::L2 => tensor.l2_norm(),
        }
    }
}

impl FromStr for NormKind {
    type Err = RobustError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "inf" => Ok(NormKind::Inf),
            "2" => Ok(NormKind::L2),
            other => Err(RobustError::configuration("norm", other, "\"inf\" or \"2\"")),
        }
    }
}

impl fmt::Display for NormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormKind::Inf => write!(f, "inf"),
            NormKind::L2 => write!(f, "2"),
        }
    }
}

/// Accumulated adversarial noise for one hardened layer.
#[derive(Debug, Clone, Default)]
pub struct NoiseRegister {
    /// Current noise tensor, shaped like the layer's output. Absent before
    /// the first update (the cold-start case of the update rule).
    pub noise: Option<Tensor>,
    /// Gradient computed for the current sub-step. Transient; cleared when
    /// the sub-step's update commits.
    pub pending_gradient: Option<Tensor>,
}

/// Noise registers keyed by layer name.
///
/// A register exists iff its layer is among the first `top_layers`
/// trainable layers of the model, in declaration order; the ANP paper's
/// premise is that shallow layers are the most security-critical ones.
#[derive(Debug, Default)]
pub struct NoiseRegistry {
    registers: BTreeMap<String, NoiseRegister>,
}

impl NoiseRegistry {
    /// Build registers for the first `top_layers` trainable layers.
    ///
    /// Layers qualify when they are trainable and carry weights. Fails
    /// with a configuration error if the model has fewer such layers
    /// than `top_layers`.
    pub fn initialize(model: &dyn DifferentiableModel, top_layers: usize) -> Result<Self> {
        let hardened = select_hardened_layers(model, top_layers)?;
        let registers = hardened
            .into_iter()
            .map(|name| (name, NoiseRegister::default()))
            .collect();
        Ok(Self { registers })
    }

    /// Number of registers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether the registry holds no registers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// The register for a layer, if that layer is hardened.
    #[must_use]
    pub fn register(&self, layer: &str) -> Option<&NoiseRegister> {
        self.registers.get(layer)
    }

    pub(crate) fn register_mut(&mut self, layer: &str) -> Option<&mut NoiseRegister> {
        self.registers.get_mut(layer)
    }

    /// Names of hardened layers (sorted).
    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.registers.keys().map(String::as_str)
    }

    /// Drop all registers and their tensors. Idempotent.
    pub fn clear(&mut self) {
        self.registers.clear();
    }

    /// Forward pass replaying the model's layer sequence, adding each
    /// hardened layer's current noise to its output. Read-only with
    /// respect to the registers; with all registers empty this equals
    /// `model.forward(inputs)`.
    pub fn forward_with_noise(
        &self,
        model: &dyn DifferentiableModel,
        inputs: &Tensor,
    ) -> Result<Tensor> {
        self.forward_from(model, 0, inputs)
    }

    /// Continue the noise-injected forward pass from layer `start`.
    pub(crate) fn forward_from(
        &self,
        model: &dyn DifferentiableModel,
        start: usize,
        activation: &Tensor,
    ) -> Result<Tensor> {
        let layers = model.layers();
        let mut current = activation.clone();
        for (index, layer) in layers.iter().enumerate().skip(start) {
            current = model.apply_layer(index, &current)?;
            if let Some(register) = self.registers.get(&layer.name) {
                if let Some(noise) = &register.noise {
                    current = current.add(noise)?;
                }
            }
        }
        Ok(current)
    }

    /// Noise-injected activation after layer `index` (inclusive of that
    /// layer's own noise).
    pub(crate) fn activation_at(
        &self,
        model: &dyn DifferentiableModel,
        index: usize,
        inputs: &Tensor,
    ) -> Result<Tensor> {
        let layers = model.layers();
        let mut current = inputs.clone();
        for (i, layer) in layers.iter().enumerate().take(index + 1) {
            current = model.apply_layer(i, &current)?;
            if let Some(register) = self.registers.get(&layer.name) {
                if let Some(noise) = &register.noise {
                    current = current.add(noise)?;
                }
            }
        }
        Ok(current)
    }
}

/// Names of the first `top_layers` trainable layers, in declaration order.
fn select_hardened_layers(
    model: &dyn DifferentiableModel,
    top_layers: usize,
) -> Result<Vec<String>> {
    let trainable: Vec<String> = model
        .layers()
        .into_iter()
        .filter(|l| l.trainable && l.weight_count > 0)
        .map(|l| l.name)
        .collect();
    if top_layers > trainable.len() {
        return Err(RobustError::configuration(
            "top_layers",
            top_layers,
            &format!("at most the trainable layer count ({})", trainable.len()),
        ));
    }
    Ok(trainable.into_iter().take(top_layers).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerInfo;

    struct Stack {
        layer_infos: Vec<LayerInfo>,
    }

    impl Stack {
        fn new(names: &[(&str, bool)]) -> Self {
            Self {
                layer_infos: names
                    .iter()
                    .map(|(name, trainable)| LayerInfo {
                        name: (*name).to_string(),
                        trainable: *trainable,
                        weight_count: usize::from(*trainable) * 8,
                    })
                    .collect(),
            }
        }
    }

    impl DifferentiableModel for Stack {
        fn layers(&self) -> Vec<LayerInfo> {
            self.layer_infos.clone()
        }

        fn apply_layer(&self, _index: usize, input: &Tensor) -> Result<Tensor> {
            Ok(input.scale(2.0))
        }

        fn gradient(&self, f: &dyn Fn(&Tensor) -> Result<f32>, at: &Tensor) -> Result<Tensor> {
            let _ = f(at)?;
            Ok(Tensor::zeros_like(at))
        }
    }

    #[test]
    fn test_norm_kind_from_str() {
        assert_eq!("inf".parse::<NormKind>().unwrap(), NormKind::Inf);
        assert_eq!("2".parse::<NormKind>().unwrap(), NormKind::L2);
        assert!("fro".parse::<NormKind>().is_err());
    }

    #[test]
    fn test_norm_values() {
        let t = Tensor::from_slice(&[3.0, -4.0]);
        assert!((NormKind::Inf.norm(&t) - 4.0).abs() < 1e-6);
        assert!((NormKind::L2.norm(&t) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_initialize_selects_shallowest_trainable() {
        let model = Stack::new(&[("conv1", true), ("pool", false), ("conv2", true), ("fc", true)]);
        let registry = NoiseRegistry::initialize(&model, 2).unwrap();
        let names: Vec<&str> = registry.layer_names().collect();
        assert_eq!(names, vec!["conv1", "conv2"]);
    }

    #[test]
    fn test_initialize_rejects_too_many_layers() {
        let model = Stack::new(&[("conv1", true), ("pool", false)]);
        let err = NoiseRegistry::initialize(&model, 2).unwrap_err();
        assert!(matches!(err, RobustError::Configuration { .. }));
    }

    #[test]
    fn test_forward_with_empty_registers_matches_forward() {
        let model = Stack::new(&[("conv1", true), ("conv2", true)]);
        let registry = NoiseRegistry::initialize(&model, 2).unwrap();
        let x = Tensor::from_slice(&[1.0, -1.0]);
        let noisy = registry.forward_with_noise(&model, &x).unwrap();
        let clean = model.forward(&x).unwrap();
        assert_eq!(noisy.data(), clean.data());
    }

    #[test]
    fn test_forward_adds_register_noise() {
        let model = Stack::new(&[("conv1", true)]);
        let mut registry = NoiseRegistry::initialize(&model, 1).unwrap();
        registry.register_mut("conv1").unwrap().noise = Some(Tensor::from_slice(&[0.5, 0.5]));
        let x = Tensor::from_slice(&[1.0, 2.0]);
        let noisy = registry.forward_with_noise(&model, &x).unwrap();
        // layer doubles, then noise is added
        assert_eq!(noisy.data(), &[2.5, 4.5]);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let model = Stack::new(&[("conv1", true)]);
        let mut registry = NoiseRegistry::initialize(&model, 1).unwrap();
        registry.clear();
        registry.clear();
        assert!(registry.is_empty());
    }
}
