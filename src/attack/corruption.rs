//! Corruption generators for corruption-robustness evaluation.
//!
//! Unlike the gradient-sign attacks, corruptions perturb inputs without
//! consulting model gradients. They feed the corruption metrics
//! (mCE, relative mCE), not the adversarial ones.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, RobustError};
use crate::tensor::Tensor;

/// Additive Gaussian noise, clipped back to `[0, 1]`.
pub fn gaussian_noise(inputs: &Tensor, stddev: f32, seed: Option<u64>) -> Result<Tensor> {
    if !stddev.is_finite() || stddev < 0.0 {
        return Err(RobustError::configuration(
            "stddev",
            stddev,
            "a finite value >= 0",
        ));
    }
    let noise = Tensor::random_normal(inputs.shape(), 0.0, stddev, seed);
    Ok(inputs.add(&noise)?.clamp(0.0, 1.0))
}

/// Salt-and-pepper noise: roughly `amount / 2` of the elements are forced
/// to 1 (salt) and `amount / 2` to 0 (pepper).
pub fn salt_and_pepper(inputs: &Tensor, amount: f32, seed: Option<u64>) -> Result<Tensor> {
    if !amount.is_finite() || !(0.0..=1.0).contains(&amount) {
        return Err(RobustError::configuration("amount", amount, "in [0, 1]"));
    }
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let mut corrupted = inputs.clone();
    for value in corrupted.data_mut() {
        let mask: f32 = rng.gen_range(0.0..1.0);
        if mask < amount / 2.0 {
            *value = 1.0;
        } else if mask > 1.0 - amount / 2.0 {
            *value = 0.0;
        }
    }
    Ok(corrupted)
}

/// Gaussian blur over a `[batch, height, width, channels]` tensor via a
/// normalized convolution kernel with same (zero) padding, applied
/// depthwise per channel.
pub fn gaussian_blur(inputs: &Tensor, kernel_size: usize, sigma: f32) -> Result<Tensor> {
    if inputs.ndim() != 4 {
        return Err(RobustError::dimension(
            "[batch, height, width, channels]",
            inputs.shape(),
        ));
    }
    let kernel = gaussian_kernel(kernel_size, sigma)?;
    let (batch, height, width, channels) = (
        inputs.shape()[0],
        inputs.shape()[1],
        inputs.shape()[2],
        inputs.shape()[3],
    );
    let half = kernel_size as isize / 2;
    let mut out = Tensor::zeros_like(inputs);
    let data = inputs.data();
    let index = |b: usize, y: usize, x: usize, c: usize| ((b * height + y) * width + x) * channels + c;

    for b in 0..batch {
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    let mut acc = 0.0;
                    for ky in 0..kernel_size {
                        for kx in 0..kernel_size {
                            let sy = y as isize + ky as isize - half;
                            let sx = x as isize + kx as isize - half;
                            if sy < 0 || sx < 0 || sy >= height as isize || sx >= width as isize {
                                continue; // zero padding
                            }
                            acc += kernel[ky * kernel_size + kx]
                                * data[index(b, sy as usize, sx as usize, c)];
                        }
                    }
                    out.data_mut()[index(b, y, x, c)] = acc;
                }
            }
        }
    }
    Ok(out)
}

/// A `size x size` Gaussian kernel, row-major, normalized to sum to 1.
pub fn gaussian_kernel(size: usize, sigma: f32) -> Result<Vec<f32>> {
    if size == 0 {
        return Err(RobustError::configuration("kernel_size", size, ">= 1"));
    }
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(RobustError::configuration(
            "sigma",
            sigma,
            "a finite value > 0",
        ));
    }
    let mean = size as f32 / 2.0;
    let mut kernel = Vec::with_capacity(size * size);
    let mut sum = 0.0;
    for x in 0..size {
        for y in 0..size {
            let exponent =
                -((x as f32 - mean).powi(2) + (y as f32 - mean).powi(2)) / (2.0 * sigma * sigma);
            let value = exponent.exp();
            kernel.push(value);
            sum += value;
        }
    }
    for value in &mut kernel {
        *value /= sum;
    }
    Ok(kernel)
}
