//! Entry point of every process of the MPI job. All processes run the same code: each opens the
//! input, runs its worker pipeline, and the coordinator writes the blurred image.
use std::io::Read;
use std::time::Instant;

use crate::codec::{self, PgmHeader};
use crate::network::{MpiEndpoint, NetworkError, Pixel, Transport};
use crate::prelude::*;
use crate::types::{check_partition, Config, ConfigError, Kernel, SampleDepth};
use crate::worker::{execute_worker, Job};

mod trace;

use self::trace::{RunTrace, TraceEntry, TRACE_WORDS};

/// Process exit status for a failed run: 2 for configuration errors, 1 for anything else.
pub fn exit_code(error: &Error) -> i32 {
    if error.chain().any(|cause| cause.is::<ConfigError>()) {
        2
    } else {
        1
    }
}

/// Blurs the image described by `config` as one process of an MPI job; every process of the
/// job must call it. The number of workers is the size of the job. Returns the header of the
/// input image.
///
/// Configuration errors are detected identically by every process and returned to the caller.
/// Any other failure aborts the whole job.
pub fn blur_distributed(config: &Config) -> Result<PgmHeader> {
    config.validate()?;

    let universe = mpi::initialize().ok_or(NetworkError::AlreadyInitialized)?;
    let mut endpoint = MpiEndpoint::connect(&universe.world())?;
    crate::set_log_rank(endpoint.my_id());

    match blur_file(&mut endpoint, config) {
        Ok(header) => Ok(header),
        Err(e) if exit_code(&e) == 2 => Err(e),
        Err(e) => {
            endpoint.abort(&format!("{:#}", e));
            Err(e)
        }
    }
}

/// Runs one worker of the blur over `transport`.
pub(crate) fn blur_file<T: Transport>(transport: &mut T, config: &Config) -> Result<PgmHeader> {
    let start = Instant::now();
    let kernel = config.blur.kernel.build()?;

    let (header, mut reader) = codec::open(&config.blur.input)
        .with_context(|| format!("failed to read {:?}", config.blur.input))?;

    let grid = transport.topology().grid();
    check_partition(header.extent(), grid, kernel.half()).map_err(ConfigError::from)?;

    if transport.my_id().is_coordinator() {
        info!(
            "{:?}: {}x{} pixels, max value {}, {} workers on a {} grid",
            config.blur.input,
            header.width,
            header.height,
            header.max_value,
            transport.num_workers(),
            grid
        );
    }

    match header.depth() {
        SampleDepth::U8 => blur_with_depth::<u8, T>(transport, config, &header, &mut reader, &kernel)?,
        SampleDepth::U16 => blur_with_depth::<u16, T>(transport, config, &header, &mut reader, &kernel)?,
    }

    if transport.my_id().is_coordinator() {
        info!("time: {:.6}", start.elapsed().as_secs_f64());
    }

    Ok(header)
}

fn blur_with_depth<S: Pixel, T: Transport>(
    transport: &mut T,
    config: &Config,
    header: &PgmHeader,
    source: &mut dyn Read,
    kernel: &Kernel,
) -> Result {
    let job = Job {
        image: header.extent(),
        kernel: kernel.clone(),
        parallel_convolution: config.runtime.parallel_convolution,
    };

    let report = execute_worker::<S, T>(transport, source, &job)?;

    let entries = if config.runtime.trace_file.is_some() {
        let words = transport
            .all_gather(&TraceEntry::words_of(&report))
            .context("failed to collect the run trace")?;

        words.chunks_exact(TRACE_WORDS).map(TraceEntry::from_words).collect_vec()
    } else {
        vec![]
    };

    let image = match report.image {
        Some(image) => image,
        None => return Ok(()),
    };

    codec::write_image(&config.blur.output, header, &image)
        .with_context(|| format!("failed to write {:?}", config.blur.output))?;
    info!("blurred image written to {:?}", config.blur.output);

    if let Some(path) = &config.runtime.trace_file {
        let mut trace = RunTrace::new(path)?;
        for entry in &entries {
            trace.add(entry);
        }
        trace.finish()?;
    }

    Ok(())
}
