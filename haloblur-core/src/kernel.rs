//! Square convolution kernels.
use crate::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum KernelError {
    #[error("invalid kernel type {0}, expected 0 (box), 1 (weighted) or 2 (gaussian)")]
    InvalidType(i64),

    #[error("kernel size must be odd and at least 1, got {0}")]
    InvalidSize(usize),

    #[error("weight factor must lie in [0, 1], got {0}")]
    InvalidFactor(f32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelKind {
    /// All weights equal.
    Box,
    /// Off-center weights `1 - factor`, the center weight `factor * (size² - 1)`.
    Weighted,
    /// `exp(-(dx² + dy²) / (2 * khalf²))`.
    Gaussian,
}

impl TryFrom<i64> for KernelKind {
    type Error = KernelError;

    fn try_from(value: i64) -> Result<Self, KernelError> {
        match value {
            0 => Ok(KernelKind::Box),
            1 => Ok(KernelKind::Weighted),
            2 => Ok(KernelKind::Gaussian),
            v => Err(KernelError::InvalidType(v)),
        }
    }
}

/// A `size x size` matrix of weights together with the normalization divisor. Immutable once
/// built; every worker constructs its own identical copy from the same parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Kernel {
    size: usize,
    weights: Vec<f32>,
    norm: f32,
}

impl Kernel {
    pub fn new(kind: KernelKind, size: usize, factor: f32) -> Result<Self, KernelError> {
        if size % 2 == 0 {
            return Err(KernelError::InvalidSize(size));
        }

        // only the weighted kernel reads the factor
        if kind == KernelKind::Weighted && !(0.0..=1.0).contains(&factor) {
            return Err(KernelError::InvalidFactor(factor));
        }

        // The general formulas degenerate for a single tap (division by zero radius for the
        // gaussian, zero norm for the weighted kernel).
        if size == 1 {
            return Ok(Self::identity());
        }

        Ok(match kind {
            KernelKind::Box => Self::uniform(size),
            KernelKind::Weighted => Self::weighted(size, factor),
            KernelKind::Gaussian => Self::gaussian(size),
        })
    }

    pub fn identity() -> Self {
        Self {
            size: 1,
            weights: vec![1.0],
            norm: 1.0,
        }
    }

    fn uniform(size: usize) -> Self {
        let weights = vec![1.0; size * size];
        let norm = weights.iter().sum();

        Self {
            size,
            weights,
            norm,
        }
    }

    fn weighted(size: usize, factor: f32) -> Self {
        let taps = (size * size - 1) as f32;
        let center = size / 2;

        let mut weights = vec![1.0 - factor; size * size];
        weights[center * size + center] = factor * taps;

        Self {
            size,
            weights,
            norm: taps,
        }
    }

    fn gaussian(size: usize) -> Self {
        let khalf = (size - 1) / 2;
        let kden = 1.0 / (2.0 * (khalf * khalf) as f32);
        let mut weights = Vec::with_capacity(size * size);

        for i in 0..size {
            let ky = i as f32 - khalf as f32;
            for j in 0..size {
                let kx = j as f32 - khalf as f32;
                weights.push((-(kx * kx + ky * ky) * kden).exp());
            }
        }

        let norm = weights.iter().sum();

        Self {
            size,
            weights,
            norm,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Kernel radius, also the halo depth in pixels.
    pub fn half(&self) -> usize {
        (self.size - 1) / 2
    }

    pub fn norm(&self) -> f32 {
        self.norm
    }

    /// Weight at offset `(kx, ky)` from the center, both in `[-half, half]`.
    #[inline(always)]
    pub fn weight(&self, kx: isize, ky: isize) -> f32 {
        let h = self.half() as isize;
        let row = (ky + h) as usize;
        let col = (kx + h) as usize;
        self.weights[row * self.size + col]
    }
}
