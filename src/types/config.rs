use std::env;
use std::path::PathBuf;

use crate::prelude::*;
use crate::types::{Kernel, KernelError, KernelKind, PartitionError};

pub const DEFAULT_KERNEL_SIZE: usize = 25;
pub const DEFAULT_WEIGHT_FACTOR: f32 = 0.2;
pub const DEFAULT_OUTPUT: &str = "mpi_output.pgm";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0}")]
    Kernel(#[from] KernelError),

    #[error("{0}")]
    Partition(#[from] PartitionError),
}

#[derive(Debug)]
pub struct Config {
    pub blur: BlurConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    pub fn new(blur: BlurConfig, runtime: RuntimeConfig) -> Self {
        Self { blur, runtime }
    }

    /// Checks every parameter that can be checked without reading the input.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.blur.kernel.build()?;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct KernelConfig {
    pub kind: KernelKind,
    pub size: usize,
    /// Only read, and only validated, by the weighted kernel.
    pub factor: f32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            kind: KernelKind::Box,
            size: DEFAULT_KERNEL_SIZE,
            factor: DEFAULT_WEIGHT_FACTOR,
        }
    }
}

impl KernelConfig {
    /// Kernel parameters as given on the command line: the kind as its integer code.
    pub fn from_code(kind: i64, size: usize, factor: f32) -> Result<Self, ConfigError> {
        let config = Self {
            kind: KernelKind::try_from(kind)?,
            size,
            factor,
        };

        config.build()?;
        Ok(config)
    }

    pub fn build(&self) -> Result<Kernel, ConfigError> {
        Ok(Kernel::new(self.kind, self.size, self.factor)?)
    }
}

#[derive(Debug, Clone)]
pub struct BlurConfig {
    pub kernel: KernelConfig,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl BlurConfig {
    pub fn new(kernel: KernelConfig, input: impl Into<PathBuf>, output: Option<PathBuf>) -> Self {
        Self {
            kernel,
            input: input.into(),
            output: output.unwrap_or_else(|| DEFAULT_OUTPUT.into()),
        }
    }
}

/// Settings of this process. The number of workers is not among them: it is the size of the
/// MPI job.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub parallel_convolution: bool,
    pub trace_file: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut out = Self::default();

        if let Some(parallel) = var("HALOBLUR_PARALLEL") {
            out.parallel_convolution = match parallel.trim() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                s => {
                    warn!("unknown value {:?} for HALOBLUR_PARALLEL, reverting to false", s);
                    false
                }
            }
        }

        if let Some(filename) = var("HALOBLUR_TRACE") {
            let filename = filename.trim();

            if !filename.is_empty() {
                out.trace_file = Some(filename.into());
            }
        }

        out
    }
}
