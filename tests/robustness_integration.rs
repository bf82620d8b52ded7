//! End-to-end tests driving the full training → attack → evaluation
//! pipeline against a tiny linear-softmax classifier whose gradient
//! oracle uses central finite differences.

use std::collections::BTreeMap;

use endurecer::attack::corruption;
use endurecer::prelude::*;
use endurecer::robustness::{AdversarialSet, CorruptionSet, NoiseSequence};

/// Linear layer (2 inputs → 2 logits) followed by a softmax layer.
struct TinyClassifier {
    /// Row-major [2, 2] weight matrix.
    weights: [f32; 4],
}

impl TinyClassifier {
    fn new() -> Self {
        Self {
            weights: [1.2, -0.6, -0.8, 1.0],
        }
    }
}

impl DifferentiableModel for TinyClassifier {
    fn layers(&self) -> Vec<LayerInfo> {
        vec![
            LayerInfo {
                name: "dense".to_string(),
                trainable: true,
                weight_count: 4,
            },
            LayerInfo {
                name: "softmax".to_string(),
                trainable: false,
                weight_count: 0,
            },
        ]
    }

    fn apply_layer(&self, index: usize, input: &Tensor) -> Result<Tensor> {
        let rows = input.row_count();
        let cols = input.numel() / rows.max(1);
        match index {
            0 => {
                if cols != 2 {
                    return Err(RobustError::dimension("[batch, 2]", input.shape()));
                }
                let mut out = Vec::with_capacity(rows * 2);
                for r in 0..rows {
                    let x = &input.data()[r * 2..(r + 1) * 2];
                    out.push(self.weights[0] * x[0] + self.weights[1] * x[1]);
                    out.push(self.weights[2] * x[0] + self.weights[3] * x[1]);
                }
                Tensor::new(&out, &[rows, 2])
            }
            _ => {
                let mut out = Vec::with_capacity(input.numel());
                for r in 0..rows {
                    let logits = &input.data()[r * cols..(r + 1) * cols];
                    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
                    let sum: f32 = exps.iter().sum();
                    out.extend(exps.iter().map(|e| e / sum));
                }
                Tensor::new(&out, input.shape())
            }
        }
    }

    fn gradient(&self, f: &dyn Fn(&Tensor) -> Result<f32>, at: &Tensor) -> Result<Tensor> {
        let mut grad = Tensor::zeros_like(at);
        let h = 1e-3;
        for i in 0..at.numel() {
            let mut plus = at.clone();
            plus.data_mut()[i] += h;
            let mut minus = at.clone();
            minus.data_mut()[i] -= h;
            grad.data_mut()[i] = (f(&plus)? - f(&minus)?) / (2.0 * h);
        }
        Ok(grad)
    }
}

/// Optimizer that evaluates the objective but leaves weights alone, so
/// tests stay deterministic.
struct FrozenOptimizer;

impl Optimizer for FrozenOptimizer {
    fn apply(
        &mut self,
        model: &mut dyn DifferentiableModel,
        objective: &dyn Fn(&dyn DifferentiableModel) -> Result<f32>,
    ) -> Result<f32> {
        objective(model)
    }
}

fn cross_entropy(labels: &Tensor, predictions: &Tensor) -> Result<f32> {
    if labels.shape() != predictions.shape() {
        return Err(RobustError::dimension(labels.shape(), predictions.shape()));
    }
    let mut total = 0.0;
    for (&t, &p) in labels.data().iter().zip(predictions.data()) {
        total -= t * p.max(1e-7).ln();
    }
    Ok(total / labels.row_count() as f32)
}

fn dataset() -> (Tensor, Tensor) {
    let inputs = Tensor::new(
        &[0.9, 0.1, 0.8, 0.2, 0.1, 0.9, 0.2, 0.7, 0.6, 0.4, 0.3, 0.8],
        &[6, 2],
    )
    .unwrap();
    let labels = Tensor::new(
        &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0],
        &[6, 2],
    )
    .unwrap();
    (inputs, labels)
}

#[test]
fn forward_with_noise_matches_forward_before_any_update() {
    let model = TinyClassifier::new();
    let mut trainer = AnpTrainer::new(AnpConfig {
        top_layers: 1,
        ..AnpConfig::default()
    })
    .unwrap();
    trainer.initialize_registers(&model).unwrap();
    let (inputs, _) = dataset();
    let noisy = trainer.forward_with_noise(&model, &inputs).unwrap();
    let clean = model.forward(&inputs).unwrap();
    assert_eq!(noisy.data(), clean.data());
}

#[test]
fn train_step_populates_registers_and_returns_finite_loss() {
    let mut model = TinyClassifier::new();
    let mut trainer = AnpTrainer::new(AnpConfig {
        top_layers: 1,
        ..AnpConfig::default()
    })
    .unwrap();
    let (inputs, labels) = dataset();
    let loss = trainer
        .train_step(
            &mut model,
            &inputs,
            &labels,
            &mut FrozenOptimizer,
            &cross_entropy,
        )
        .unwrap();
    assert!(loss.is_finite());
    let register = trainer.registry().register("dense").unwrap();
    let noise = register.noise.as_ref().unwrap();
    // noise is shaped like the dense layer's output for this batch
    assert_eq!(noise.shape(), &[6, 2]);
    // the k-step budget bounds each element of the first update, and the
    // decayed accumulation keeps the total well under epsilon
    assert!(noise.abs_max() <= trainer.config().epsilon + 1e-5);
}

#[test]
fn all_attack_methods_satisfy_the_output_contract() {
    let model = TinyClassifier::new();
    let (inputs, labels) = dataset();
    let engine = AttackEngine::new();
    let token = CancelToken::new();
    let configs = [
        AttackConfig::fgsm(0.1),
        AttackConfig::bim(0.1, 0.02, 5),
        AttackConfig::pgd(0.1, 0.02, 5).with_seed(17),
        AttackConfig::mifgsm(0.1, 0.02, 5, 1.0),
    ];
    for config in configs {
        let adversarial = engine
            .generate(&model, &inputs, &labels, &config, &cross_entropy, &token)
            .unwrap();
        assert_eq!(adversarial.shape(), inputs.shape());
        for (&a, &o) in adversarial.data().iter().zip(inputs.data()) {
            assert!((0.0..=1.0).contains(&a), "{:?}: out of range", config.method);
            assert!(
                (a - o).abs() <= 0.1 + 1e-5,
                "{:?}: outside epsilon ball",
                config.method
            );
        }
    }
}

#[test]
fn attack_success_rate_is_a_probability() {
    let model = TinyClassifier::new();
    let (inputs, labels) = dataset();
    let adversarial = AttackEngine::new()
        .generate(
            &model,
            &inputs,
            &labels,
            &AttackConfig::fgsm(0.3),
            &cross_entropy,
            &CancelToken::new(),
        )
        .unwrap();
    let rate = success_rate(&model, &inputs, &adversarial, &labels).unwrap();
    assert!((0.0..=1.0).contains(&rate));
}

fn evaluation_data(model: &TinyClassifier) -> EvaluationData {
    let (inputs, labels) = dataset();
    let adversarial_inputs = AttackEngine::new()
        .generate(
            model,
            &inputs,
            &labels,
            &AttackConfig::fgsm(0.3),
            &cross_entropy,
            &CancelToken::new(),
        )
        .unwrap();
    let mut data = EvaluationData::clean_only(inputs.clone(), labels.clone());
    data.adversarial.insert(
        "fgsm".to_string(),
        AdversarialSet {
            inputs: adversarial_inputs,
            labels: labels.clone(),
            epsilon: 0.3,
        },
    );
    data.corrupted = vec![CorruptionSet {
        kind: "gaussian_noise".to_string(),
        inputs: corruption::gaussian_noise(&inputs, 0.2, Some(5)).unwrap(),
        labels: labels.clone(),
    }];
    data.sequences = vec![NoiseSequence {
        kind: "gaussian_noise".to_string(),
        frames: (0..4)
            .map(|i| {
                corruption::gaussian_noise(&inputs.item(0).unwrap(), 0.3, Some(100 + i)).unwrap()
            })
            .collect(),
    }];
    data
}

#[test]
fn full_report_includes_every_requested_section() {
    let model = TinyClassifier::new();
    let data = evaluation_data(&model);
    let baselines: BTreeMap<String, f32> = [("gaussian_noise".to_string(), 0.5)].into();
    let options = ReportOptions {
        calculate_structural: true,
        num_directions: 6,
        baseline_errors: Some(baselines.clone()),
        baseline_flip_rates: Some(baselines),
        seed: Some(13),
        ..ReportOptions::default()
    };
    let report = generate_robustness_report(
        &model,
        &data,
        &options,
        &cross_entropy,
        &CancelToken::new(),
    )
    .unwrap();

    assert!((0.0..=1.0).contains(&report.clean_accuracy));
    assert!(report.adversarial.contains_key("fgsm"));
    let corruption_metrics = report.corruption.unwrap();
    assert!(corruption_metrics.mce.is_finite());
    assert!(report.mfr.is_some());
    let structural = report.structural.unwrap();
    assert!((0.0..=1.0).contains(&structural.boundary_distance));
    assert!(structural.noise_insensitivity >= 0.0);
    assert_eq!(report.model_info.layer_count, 2);
    assert_eq!(report.model_info.parameter_count, 4);
}

#[test]
fn report_omits_sections_without_inputs() {
    let model = TinyClassifier::new();
    let (inputs, labels) = dataset();
    let data = EvaluationData::clean_only(inputs, labels);
    let report = generate_robustness_report(
        &model,
        &data,
        &ReportOptions::default(),
        &cross_entropy,
        &CancelToken::new(),
    )
    .unwrap();
    assert!(report.adversarial.is_empty());
    assert!(report.corruption.is_none());
    assert!(report.mfr.is_none());
    assert!(report.structural.is_none());
}

#[test]
fn report_round_trips_through_json() {
    let model = TinyClassifier::new();
    let (inputs, labels) = dataset();
    let data = EvaluationData::clean_only(inputs, labels);
    let report = generate_robustness_report(
        &model,
        &data,
        &ReportOptions::default(),
        &cross_entropy,
        &CancelToken::new(),
    )
    .unwrap();
    let json = serde_json::to_string(&report).unwrap();
    let back: RobustnessReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
}

#[test]
fn cancelled_token_aborts_report_generation() {
    let model = TinyClassifier::new();
    let data = evaluation_data(&model);
    let options = ReportOptions {
        calculate_structural: true,
        num_directions: 4,
        seed: Some(1),
        ..ReportOptions::default()
    };
    let token = CancelToken::new();
    token.cancel();
    let err = generate_robustness_report(&model, &data, &options, &cross_entropy, &token)
        .unwrap_err();
    assert!(matches!(err, RobustError::Cancelled));
}

#[test]
fn comparing_a_report_with_itself_is_all_similar() {
    let model = TinyClassifier::new();
    let (inputs, labels) = dataset();
    let data = EvaluationData::clean_only(inputs, labels);
    let report = generate_robustness_report(
        &model,
        &data,
        &ReportOptions::default(),
        &cross_entropy,
        &CancelToken::new(),
    )
    .unwrap();
    let comparison = compare_models(&report, &report);
    assert!(comparison.model1_better.is_empty());
    assert!(comparison.model2_better.is_empty());
    assert!(!comparison.similar.is_empty());
}
