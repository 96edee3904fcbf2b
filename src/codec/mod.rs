//! Reading and writing of binary grayscale rasters.
mod pgm;

pub use self::pgm::{
    decode_samples, encode_samples, open, read_header, read_image, write_header, write_image,
    PgmHeader,
};

use haloblur_core::sample::SampleDepth;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("unsupported magic number {0:?}, expected \"P5\"")]
    BadMagic(String),

    #[error("header ended before the {0} field")]
    MissingField(&'static str),

    #[error("invalid {field} field {value:?} in header")]
    InvalidField { field: &'static str, value: String },

    #[error("maximum sample value {0} outside of 1..=65535")]
    MaxValueOutOfRange(u64),

    #[error("image dimensions {width}x{height} must be non-zero")]
    ZeroDimension { width: usize, height: usize },

    #[error("expected {expected} samples, found {found}")]
    SampleCountMismatch { expected: usize, found: usize },

    #[error("header requires {header:?} samples, got {samples:?}")]
    DepthMismatch {
        header: SampleDepth,
        samples: SampleDepth,
    },
}
