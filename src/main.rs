//! haloblur - blur a binary PGM image on a grid of cooperating MPI processes
//!
//! Launch one instance per worker, e.g. `mpirun -n 4 haloblur image.pgm`.

use clap::Parser;
use haloblur::types::{BlurConfig, Config, ConfigError, KernelConfig, RuntimeConfig};
use log::error;
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[command(name = "haloblur")]
#[command(author, version, about = "Distributed blur of grayscale PGM images")]
struct Cli {
    /// Kernel type: 0 = box, 1 = weighted, 2 = gaussian
    #[arg(short = 't', long = "type", default_value_t = 0, allow_negative_numbers = true)]
    kernel_type: i64,

    /// Kernel size, odd
    #[arg(short = 'k', long = "size", default_value_t = haloblur::types::DEFAULT_KERNEL_SIZE)]
    kernel_size: usize,

    /// Weight of the center pixel for the weighted kernel, in [0, 1]
    #[arg(short = 'f', long, default_value_t = haloblur::types::DEFAULT_WEIGHT_FACTOR)]
    factor: f32,

    /// Convolve the rows of each tile in parallel
    #[arg(long)]
    parallel: bool,

    /// Write a JSON-lines trace of the run to this file
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Input image (binary PGM)
    input: PathBuf,

    /// Output image
    output: Option<PathBuf>,
}

fn parse_config(cli: Cli) -> Result<Config, ConfigError> {
    let kernel = KernelConfig::from_code(cli.kernel_type, cli.kernel_size, cli.factor)?;

    let mut runtime = RuntimeConfig::from_env();
    if cli.parallel {
        runtime.parallel_convolution = true;
    }
    if let Some(trace) = cli.trace {
        runtime.trace_file = Some(trace);
    }

    let config = Config::new(BlurConfig::new(kernel, cli.input, cli.output), runtime);
    config.validate()?;
    Ok(config)
}

fn main() {
    haloblur::initialize_logger();
    let cli = Cli::parse();

    let config = match parse_config(cli) {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            eprintln!("haloblur: {}", e);
            process::exit(2);
        }
    };

    // MPI is finalized by the time this returns
    if let Err(e) = haloblur::driver::blur_distributed(&config) {
        let e = e.context(format!("failed to blur {:?}", config.blur.input));
        error!("{:#}", e);
        eprintln!("haloblur: {:#}", e);
        process::exit(haloblur::driver::exit_code(&e));
    }
}
