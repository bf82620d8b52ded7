//! Dense tensor type backing all numeric operations.
//!
//! A `Tensor` is a flat `f32` buffer plus a shape. It deliberately carries
//! no gradient state: automatic differentiation lives behind the
//! [`crate::model::DifferentiableModel`] gradient oracle, and this crate
//! only performs the elementwise arithmetic the robustness algorithms need.
//!
//! All shape-sensitive operations return [`Result`] and fail with
//! [`RobustError::Dimension`](crate::error::RobustError) before touching
//! any data.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, RobustError};

/// A dense f32 tensor: a shape and a contiguous row-major buffer.
///
/// # Example
///
/// ```
/// use endurecer::tensor::Tensor;
///
/// let t = Tensor::new(&[1.0, -2.0, 3.0, -4.0], &[2, 2]).unwrap();
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.numel(), 4);
/// assert_eq!(t.abs_max(), 4.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl Tensor {
    /// Create a tensor from a slice with the given shape.
    ///
    /// Fails with a dimension error if the data length doesn't match the
    /// product of the shape dimensions.
    pub fn new(data: &[f32], shape: &[usize]) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(RobustError::dimension(shape, data.len()));
        }
        Ok(Self {
            data: data.to_vec(),
            shape: shape.to_vec(),
        })
    }

    /// Create a 1-D tensor from a slice.
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self {
            data: data.to_vec(),
            shape: vec![data.len()],
        }
    }

    /// Create a tensor filled with a constant value.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        let len: usize = shape.iter().product();
        Self {
            data: vec![value; len],
            shape: shape.to_vec(),
        }
    }

    /// Create a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones.
    #[must_use]
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a zero tensor with the same shape as another.
    #[must_use]
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(&other.shape)
    }

    /// Sample a tensor elementwise from U(low, high).
    ///
    /// A degenerate range (low == high) yields a constant fill, so a zero
    /// radius produces exactly zero noise.
    #[must_use]
    pub fn random_uniform(shape: &[usize], low: f32, high: f32, seed: Option<u64>) -> Self {
        let len: usize = shape.iter().product();
        let mut rng = make_rng(seed);
        let data: Vec<f32> = if low < high {
            (0..len).map(|_| rng.gen_range(low..high)).collect()
        } else {
            vec![low; len]
        };
        Self {
            data,
            shape: shape.to_vec(),
        }
    }

    /// Sample a tensor elementwise from N(mean, std) via Box-Muller.
    #[must_use]
    pub fn random_normal(shape: &[usize], mean: f32, std: f32, seed: Option<u64>) -> Self {
        let len: usize = shape.iter().product();
        let mut rng = make_rng(seed);
        let data: Vec<f32> = (0..len)
            .map(|_| {
                let u1: f32 = rng.gen_range(0.0001_f32..1.0_f32);
                let u2: f32 = rng.gen_range(0.0_f32..1.0_f32);
                let z = (-2.0_f32 * u1.ln()).sqrt() * (2.0_f32 * std::f32::consts::PI * u2).cos();
                mean + std * z
            })
            .collect();
        Self {
            data,
            shape: shape.to_vec(),
        }
    }

    /// Shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Underlying data as a slice.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable access to the underlying data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Element at a flat index, if in bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<f32> {
        self.data.get(index).copied()
    }

    /// Size of the leading (batch) axis; 1 for a 0-dimensional tensor.
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Extract one element of the batch axis as a `[1, rest...]` tensor.
    pub fn item(&self, index: usize) -> Result<Tensor> {
        let rows = self.row_count();
        if index >= rows {
            return Err(RobustError::dimension(rows, index));
        }
        let stride = self.numel() / rows.max(1);
        let mut shape = self.shape.clone();
        if shape.is_empty() {
            shape.push(1);
        } else {
            shape[0] = 1;
        }
        Tensor::new(&self.data[index * stride..(index + 1) * stride], &shape)
    }

    /// The first `n` elements of the batch axis (or the whole tensor if it
    /// has fewer).
    #[must_use]
    pub fn batch_prefix(&self, n: usize) -> Tensor {
        let rows = self.row_count();
        let keep = n.min(rows);
        let stride = self.numel() / rows.max(1);
        let mut shape = self.shape.clone();
        if !shape.is_empty() {
            shape[0] = keep;
        }
        Tensor {
            data: self.data[..keep * stride].to_vec(),
            shape,
        }
    }

    fn check_same_shape(&self, other: &Tensor) -> Result<()> {
        if self.shape != other.shape {
            return Err(RobustError::dimension(&self.shape, &other.shape));
        }
        Ok(())
    }

    /// Elementwise addition.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        self.check_same_shape(other)?;
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a + b)
            .collect();
        Ok(Tensor {
            data,
            shape: self.shape.clone(),
        })
    }

    /// Elementwise multiplication.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        self.check_same_shape(other)?;
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a * b)
            .collect();
        Ok(Tensor {
            data,
            shape: self.shape.clone(),
        })
    }

    /// Elementwise subtraction.
    pub fn sub(&self, other: &Tensor) -> Result<Tensor> {
        self.check_same_shape(other)?;
        let data: Vec<f32> = self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a - b)
            .collect();
        Ok(Tensor {
            data,
            shape: self.shape.clone(),
        })
    }

    /// Multiply every element by a scalar.
    #[must_use]
    pub fn scale(&self, factor: f32) -> Tensor {
        self.map(|x| x * factor)
    }

    /// Apply a function to every element.
    #[must_use]
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Clamp every element into `[low, high]`.
    #[must_use]
    pub fn clamp(&self, low: f32, high: f32) -> Tensor {
        self.map(|x| x.clamp(low, high))
    }

    /// Elementwise sign (-1, 0, or 1).
    #[must_use]
    pub fn sign(&self) -> Tensor {
        self.map(|x| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        })
    }

    /// Sum of all elements.
    #[must_use]
    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    /// Mean of all elements (0 for an empty tensor).
    #[must_use]
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            0.0
        } else {
            self.sum() / self.data.len() as f32
        }
    }

    /// Largest absolute element (the L-infinity norm).
    #[must_use]
    pub fn abs_max(&self) -> f32 {
        self.data.iter().fold(0.0_f32, |acc, &x| acc.max(x.abs()))
    }

    /// L1 norm (sum of absolute values).
    #[must_use]
    pub fn l1_norm(&self) -> f32 {
        self.data.iter().map(|x| x.abs()).sum()
    }

    /// Euclidean (L2) norm.
    #[must_use]
    pub fn l2_norm(&self) -> f32 {
        self.data.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// True iff every element is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Argmax of each row of a `[batch, classes]` tensor.
    ///
    /// Used to turn prediction logits/probabilities into class indices.
    pub fn argmax_rows(&self) -> Result<Vec<usize>> {
        if self.ndim() != 2 {
            return Err(RobustError::dimension("[batch, classes]", &self.shape));
        }
        let (rows, cols) = (self.shape[0], self.shape[1]);
        if cols == 0 {
            return Err(RobustError::dimension("classes > 0", &self.shape));
        }
        let mut out = Vec::with_capacity(rows);
        for r in 0..rows {
            let row = &self.data[r * cols..(r + 1) * cols];
            let mut best = 0;
            for (c, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = c;
                }
            }
            out.push(best);
        }
        Ok(out)
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}
