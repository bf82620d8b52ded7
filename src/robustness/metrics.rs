//! Robustness metric estimators.
//!
//! Five estimators from the ANP evaluation protocol: mean corruption
//! error (mCE), relative mCE, mean flip rate (mFR), empirical boundary
//! distance, and epsilon-empirical noise insensitivity. All are pure
//! functions of model predictions and supplied baselines; none mutate
//! model or input state.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::error::{Result, RobustError};
use crate::model::{DifferentiableModel, LossFn};
use crate::tensor::Tensor;

/// Binary-search tolerance for the boundary-distance estimator.
pub const BOUNDARY_TOLERANCE: f32 = 0.001;

/// Perturbed samples drawn per input per noise kind in the
/// noise-insensitivity estimator.
pub const NOISE_SAMPLES_PER_INPUT: usize = 10;

/// One corruption type's evaluation data.
#[derive(Debug, Clone)]
pub struct CorruptionSet {
    /// Corruption type name, the key into the baseline-error mapping.
    pub kind: String,
    /// Corrupted inputs.
    pub inputs: Tensor,
    /// One-hot labels for those inputs.
    pub labels: Tensor,
}

/// A temporally ordered sequence of perturbed frames of one input.
#[derive(Debug, Clone)]
pub struct NoiseSequence {
    /// Sequence type name, the key into the baseline-flip-rate mapping.
    pub kind: String,
    /// Ordered frames; at least 2 are required.
    pub frames: Vec<Tensor>,
}

/// Noise families for the insensitivity estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseKind {
    /// N(0, epsilon) additive noise.
    Gaussian,
    /// U(-epsilon, epsilon) additive noise.
    Uniform,
    /// Reserved: gradient-based noise. Not implemented; selecting it is
    /// an explicit error rather than a silent pass-through.
    Adversarial,
}

/// Categorical accuracy of predictions against one-hot labels.
pub fn categorical_accuracy(predictions: &Tensor, labels: &Tensor) -> Result<f32> {
    let predicted = predictions.argmax_rows()?;
    let truth = labels.argmax_rows()?;
    if predicted.len() != truth.len() {
        return Err(RobustError::dimension(truth.len(), predicted.len()));
    }
    let correct = predicted
        .iter()
        .zip(truth.iter())
        .filter(|(p, t)| p == t)
        .count();
    Ok(correct as f32 / truth.len().max(1) as f32)
}

/// Accuracy of the model on a clean labelled set.
pub fn clean_accuracy(
    model: &dyn DifferentiableModel,
    inputs: &Tensor,
    labels: &Tensor,
) -> Result<f32> {
    categorical_accuracy(&model.forward(inputs)?, labels)
}

/// Mean Corruption Error: per corruption type, `(1 - accuracy)` divided
/// by that type's baseline error, averaged over all supplied types.
/// Lower is better.
pub fn mean_corruption_error(
    model: &dyn DifferentiableModel,
    corrupted: &[CorruptionSet],
    baseline_errors: &BTreeMap<String, f32>,
    token: &CancelToken,
) -> Result<f32> {
    if corrupted.is_empty() {
        return Err(RobustError::configuration(
            "corrupted",
            "empty",
            "at least one corruption set",
        ));
    }
    let mut total = 0.0;
    for set in corrupted {
        token.checkpoint()?;
        let baseline = baseline_errors.get(&set.kind).ok_or_else(|| {
            RobustError::configuration(
                "baseline_errors",
                &set.kind,
                "a baseline error for every corruption type",
            )
        })?;
        let accuracy = clean_accuracy(model, &set.inputs, &set.labels)?;
        let ce = (1.0 - accuracy) / baseline;
        if !ce.is_finite() {
            return Err(RobustError::Numerical {
                context: format!("corruption error for '{}'", set.kind),
            });
        }
        total += ce;
    }
    Ok(total / corrupted.len() as f32)
}

/// Relative mCE: mCE minus the clean error, isolating the gap introduced
/// by corruption from the model's baseline error.
pub fn relative_mce(
    model: &dyn DifferentiableModel,
    clean_inputs: &Tensor,
    clean_labels: &Tensor,
    corrupted: &[CorruptionSet],
    baseline_errors: &BTreeMap<String, f32>,
    token: &CancelToken,
) -> Result<f32> {
    let clean_error = 1.0 - clean_accuracy(model, clean_inputs, clean_labels)?;
    let mce = mean_corruption_error(model, corrupted, baseline_errors, token)?;
    Ok(mce - clean_error)
}

/// Mean Flip Rate over temporally ordered noise sequences: the rate of
/// prediction-class changes between consecutive frames, normalized by a
/// per-sequence-type baseline and averaged. Lower is better.
pub fn mean_flip_rate(
    model: &dyn DifferentiableModel,
    sequences: &[NoiseSequence],
    baseline_flip_rates: &BTreeMap<String, f32>,
    token: &CancelToken,
) -> Result<f32> {
    if sequences.is_empty() {
        return Err(RobustError::configuration(
            "sequences",
            "empty",
            "at least one noise sequence",
        ));
    }
    let mut total = 0.0;
    for sequence in sequences {
        token.checkpoint()?;
        if sequence.frames.len() < 2 {
            return Err(RobustError::configuration(
                "frames",
                sequence.frames.len(),
                ">= 2 frames per sequence",
            ));
        }
        let baseline = baseline_flip_rates.get(&sequence.kind).ok_or_else(|| {
            RobustError::configuration(
                "baseline_flip_rates",
                &sequence.kind,
                "a baseline flip rate for every sequence type",
            )
        })?;
        let mut flips = 0usize;
        let mut previous: Option<usize> = None;
        for frame in &sequence.frames {
            let class = model.forward(frame)?.argmax_rows()?[0];
            if let Some(prev) = previous {
                if class != prev {
                    flips += 1;
                }
            }
            previous = Some(class);
        }
        let probability = flips as f32 / (sequence.frames.len() - 1) as f32;
        let rate = probability / baseline;
        if !rate.is_finite() {
            return Err(RobustError::Numerical {
                context: format!("flip rate for '{}'", sequence.kind),
            });
        }
        total += rate;
    }
    Ok(total / sequences.len() as f32)
}

/// Empirical boundary distance: for each input, the minimum magnitude
/// along any of `num_directions` random unit directions at which the
/// predicted class changes, found by binary search in `[0, 1]`; averaged
/// over the batch. A lower-bound estimator of the true margin, since only
/// a finite direction sample is tested. Higher is better.
pub fn boundary_distance(
    model: &dyn DifferentiableModel,
    inputs: &Tensor,
    num_directions: usize,
    seed: Option<u64>,
    token: &CancelToken,
) -> Result<f32> {
    if num_directions == 0 {
        return Err(RobustError::configuration(
            "num_directions",
            num_directions,
            ">= 1",
        ));
    }
    let batch = inputs.row_count();
    if batch == 0 {
        return Err(RobustError::configuration(
            "inputs",
            "empty batch",
            "at least one input",
        ));
    }
    let mut total = 0.0;
    for i in 0..batch {
        token.checkpoint()?;
        let input = inputs.item(i)?;
        let original_class = model.forward(&input)?.argmax_rows()?[0];

        let directions = unit_directions(input.shape(), num_directions, seed, i)?;
        // Direction searches share no mutable state; fan them out.
        let distances: Result<Vec<f32>> = directions
            .par_iter()
            .map(|direction| bisect_boundary(model, &input, direction, original_class, token))
            .collect();
        let minimum = distances?
            .into_iter()
            .fold(f32::INFINITY, f32::min);
        total += minimum;
    }
    Ok(total / batch as f32)
}

fn unit_directions(
    shape: &[usize],
    count: usize,
    seed: Option<u64>,
    input_index: usize,
) -> Result<Vec<Tensor>> {
    let mut directions = Vec::with_capacity(count);
    for d in 0..count {
        let derived = seed.map(|s| {
            s.wrapping_add(input_index as u64)
                .wrapping_mul(31)
                .wrapping_add(d as u64)
        });
        let raw = Tensor::random_normal(shape, 0.0, 1.0, derived);
        let norm = raw.l2_norm();
        if !norm.is_finite() || norm == 0.0 {
            return Err(RobustError::numerical("direction norm"));
        }
        directions.push(raw.scale(1.0 / norm));
    }
    Ok(directions)
}

/// Binary search for the smallest magnitude at which the prediction
/// flips. Invariant: `low` keeps the original class, `high` is either a
/// flip or the current search bound; terminates when the bracket is
/// within [`BOUNDARY_TOLERANCE`].
fn bisect_boundary(
    model: &dyn DifferentiableModel,
    input: &Tensor,
    direction: &Tensor,
    original_class: usize,
    token: &CancelToken,
) -> Result<f32> {
    let mut low = 0.0_f32;
    let mut high = 1.0_f32;
    while high - low > BOUNDARY_TOLERANCE {
        token.checkpoint()?;
        let mid = (low + high) / 2.0;
        let perturbed = input.add(&direction.scale(mid))?;
        let class = model.forward(&perturbed)?.argmax_rows()?[0];
        if class == original_class {
            low = mid;
        } else {
            high = mid;
        }
    }
    Ok(high)
}

/// Epsilon-empirical noise insensitivity: mean of
/// `|loss(clean) - loss(noisy)| / ||noisy - clean||_2` over
/// [`NOISE_SAMPLES_PER_INPUT`] perturbations per input per noise kind.
/// Estimates local Lipschitz sensitivity of the loss surface; lower is
/// better.
#[allow(clippy::too_many_arguments)]
pub fn noise_insensitivity(
    model: &dyn DifferentiableModel,
    inputs: &Tensor,
    labels: &Tensor,
    epsilon: f32,
    noise_kinds: &[NoiseKind],
    loss_fn: &LossFn<'_>,
    seed: Option<u64>,
    token: &CancelToken,
) -> Result<f32> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(RobustError::configuration(
            "epsilon",
            epsilon,
            "a finite value > 0",
        ));
    }
    if noise_kinds.is_empty() {
        return Err(RobustError::configuration(
            "noise_kinds",
            "empty",
            "at least one noise kind",
        ));
    }
    let batch = inputs.row_count();
    if batch == 0 || labels.row_count() != batch {
        return Err(RobustError::dimension(
            format!("labels batch of {batch}"),
            labels.row_count(),
        ));
    }

    let mut per_kind = Vec::with_capacity(noise_kinds.len());
    let mut draw = 0u64;
    for kind in noise_kinds {
        token.checkpoint()?;
        let mut total = 0.0;
        let mut count = 0usize;
        for i in 0..batch {
            let input = inputs.item(i)?;
            let label = labels.item(i)?;
            let clean_loss = loss_fn(&label, &model.forward(&input)?)?;
            for _ in 0..NOISE_SAMPLES_PER_INPUT {
                token.checkpoint()?;
                let derived = seed.map(|s| s.wrapping_add(draw));
                draw += 1;
                let noisy = perturb(&input, epsilon, *kind, derived)?;
                let input_diff = noisy.sub(&input)?.l2_norm();
                if input_diff == 0.0 {
                    return Err(RobustError::numerical("noisy-input distance"));
                }
                let noisy_loss = loss_fn(&label, &model.forward(&noisy)?)?;
                let ratio = (clean_loss - noisy_loss).abs() / input_diff;
                if !ratio.is_finite() {
                    return Err(RobustError::numerical("loss sensitivity ratio"));
                }
                total += ratio;
                count += 1;
            }
        }
        per_kind.push(total / count as f32);
    }
    Ok(per_kind.iter().sum::<f32>() / per_kind.len() as f32)
}

/// One perturbed sample inside the epsilon ball, clipped to `[0, 1]`.
fn perturb(input: &Tensor, epsilon: f32, kind: NoiseKind, seed: Option<u64>) -> Result<Tensor> {
    let noise = match kind {
        NoiseKind::Gaussian => Tensor::random_normal(input.shape(), 0.0, epsilon, seed),
        NoiseKind::Uniform => Tensor::random_uniform(input.shape(), -epsilon, epsilon, seed),
        NoiseKind::Adversarial => {
            return Err(RobustError::NotImplemented {
                feature: "adversarial noise kind in noise insensitivity".to_string(),
            })
        }
    };
    let noisy = input.add(&noise)?;
    let diff = noisy.sub(input)?.clamp(-epsilon, epsilon);
    Ok(input.add(&diff)?.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerInfo;

    /// Classifier that thresholds the mean of each input row: class 1 when
    /// mean > 0.5, else class 0. Boundary structure is easy to reason
    /// about.
    struct ThresholdClassifier;

    impl DifferentiableModel for ThresholdClassifier {
        fn layers(&self) -> Vec<LayerInfo> {
            vec![LayerInfo {
                name: "threshold".to_string(),
                trainable: true,
                weight_count: 1,
            }]
        }

        fn apply_layer(&self, _index: usize, input: &Tensor) -> Result<Tensor> {
            let rows = input.row_count();
            let stride = input.numel() / rows.max(1);
            let mut out = Vec::with_capacity(rows * 2);
            for r in 0..rows {
                let mean: f32 = input.data()[r * stride..(r + 1) * stride]
                    .iter()
                    .sum::<f32>()
                    / stride as f32;
                out.push(1.0 - mean);
                out.push(mean);
            }
            Tensor::new(&out, &[rows, 2])
        }

        fn gradient(&self, f: &dyn Fn(&Tensor) -> Result<f32>, at: &Tensor) -> Result<Tensor> {
            let _ = f(at)?;
            Ok(Tensor::zeros_like(at))
        }
    }

    fn squared_loss(labels: &Tensor, predictions: &Tensor) -> Result<f32> {
        Ok(predictions.sub(labels)?.map(|x| x * x).mean())
    }

    #[test]
    fn test_categorical_accuracy() {
        let predictions = Tensor::new(&[0.9, 0.1, 0.2, 0.8], &[2, 2]).unwrap();
        let labels = Tensor::new(&[1.0, 0.0, 1.0, 0.0], &[2, 2]).unwrap();
        let acc = categorical_accuracy(&predictions, &labels).unwrap();
        assert!((acc - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mce_round_trip() {
        // Model achieving accuracy 0.5 on "fog" with baseline error 1.0
        // must yield mCE = 0.5.
        let inputs = Tensor::new(&[0.8, 0.8, 0.8, 0.8], &[2, 2]).unwrap(); // both class 1
        let labels = Tensor::new(&[0.0, 1.0, 1.0, 0.0], &[2, 2]).unwrap(); // one right
        let sets = vec![CorruptionSet {
            kind: "fog".to_string(),
            inputs,
            labels,
        }];
        let baselines: BTreeMap<String, f32> = [("fog".to_string(), 1.0)].into();
        let mce = mean_corruption_error(&ThresholdClassifier, &sets, &baselines, &CancelToken::new())
            .unwrap();
        assert!((mce - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_mce_missing_baseline_is_configuration_error() {
        let sets = vec![CorruptionSet {
            kind: "fog".to_string(),
            inputs: Tensor::zeros(&[1, 2]),
            labels: Tensor::new(&[1.0, 0.0], &[1, 2]).unwrap(),
        }];
        let err = mean_corruption_error(
            &ThresholdClassifier,
            &sets,
            &BTreeMap::new(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RobustError::Configuration { .. }));
    }

    #[test]
    fn test_mfr_four_frame_sequence() {
        // Frames with means [0.8, 0.8, 0.2, 0.2] predict [1, 1, 0, 0]:
        // one flip over three transitions with baseline 1.0 gives 1/3.
        let frames = vec![
            Tensor::new(&[0.8, 0.8], &[1, 2]).unwrap(),
            Tensor::new(&[0.8, 0.8], &[1, 2]).unwrap(),
            Tensor::new(&[0.2, 0.2], &[1, 2]).unwrap(),
            Tensor::new(&[0.2, 0.2], &[1, 2]).unwrap(),
        ];
        let sequences = vec![NoiseSequence {
            kind: "shot".to_string(),
            frames,
        }];
        let baselines: BTreeMap<String, f32> = [("shot".to_string(), 1.0)].into();
        let mfr =
            mean_flip_rate(&ThresholdClassifier, &sequences, &baselines, &CancelToken::new())
                .unwrap();
        assert!((mfr - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_mfr_rejects_short_sequence() {
        let sequences = vec![NoiseSequence {
            kind: "shot".to_string(),
            frames: vec![Tensor::new(&[0.8, 0.8], &[1, 2]).unwrap()],
        }];
        let baselines: BTreeMap<String, f32> = [("shot".to_string(), 1.0)].into();
        let err =
            mean_flip_rate(&ThresholdClassifier, &sequences, &baselines, &CancelToken::new())
                .unwrap_err();
        assert!(matches!(err, RobustError::Configuration { .. }));
    }

    #[test]
    fn test_boundary_distance_in_unit_interval() {
        let inputs = Tensor::new(&[0.45, 0.45, 0.6, 0.6], &[2, 2]).unwrap();
        let distance = boundary_distance(
            &ThresholdClassifier,
            &inputs,
            8,
            Some(21),
            &CancelToken::new(),
        )
        .unwrap();
        assert!((0.0..=1.0).contains(&distance));
    }

    #[test]
    fn test_boundary_distance_rejects_zero_directions() {
        let inputs = Tensor::new(&[0.5, 0.5], &[1, 2]).unwrap();
        assert!(boundary_distance(
            &ThresholdClassifier,
            &inputs,
            0,
            None,
            &CancelToken::new()
        )
        .is_err());
    }

    #[test]
    fn test_noise_insensitivity_finite_and_nonnegative() {
        let inputs = Tensor::new(&[0.4, 0.4, 0.6, 0.6], &[2, 2]).unwrap();
        let labels = Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]).unwrap();
        let value = noise_insensitivity(
            &ThresholdClassifier,
            &inputs,
            &labels,
            0.1,
            &[NoiseKind::Gaussian, NoiseKind::Uniform],
            &squared_loss,
            Some(4),
            &CancelToken::new(),
        )
        .unwrap();
        assert!(value.is_finite());
        assert!(value >= 0.0);
    }

    #[test]
    fn test_noise_insensitivity_adversarial_kind_not_implemented() {
        let inputs = Tensor::new(&[0.4, 0.4], &[1, 2]).unwrap();
        let labels = Tensor::new(&[1.0, 0.0], &[1, 2]).unwrap();
        let err = noise_insensitivity(
            &ThresholdClassifier,
            &inputs,
            &labels,
            0.1,
            &[NoiseKind::Adversarial],
            &squared_loss,
            None,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RobustError::NotImplemented { .. }));
    }

    #[test]
    fn test_cancellation_aborts_metrics() {
        let token = CancelToken::new();
        token.cancel();
        let inputs = Tensor::new(&[0.4, 0.4], &[1, 2]).unwrap();
        let err = boundary_distance(&ThresholdClassifier, &inputs, 4, None, &token).unwrap_err();
        assert!(matches!(err, RobustError::Cancelled));
    }
}
