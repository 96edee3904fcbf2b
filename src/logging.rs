//! Log lines of every process of a job carry the host name and the worker rank, so the merged
//! output of `mpirun` can be told apart.
use std::fmt::{self, Display};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use crate::types::WorkerId;

const UNRANKED: usize = usize::MAX;

static LOG_RANK: AtomicUsize = AtomicUsize::new(UNRANKED);

lazy_static::lazy_static! {
    static ref HOST: String = ::hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| String::from("unknown-host"));

    static ref LAUNCHED: Instant = Instant::now();
}

/// Name of the machine this process runs on.
pub fn hostname() -> &'static str {
    HOST.as_str()
}

/// Tags all further log lines of this process with the rank of `id`.
pub fn set_log_rank(id: WorkerId) {
    LOG_RANK.store(id.get(), Ordering::Relaxed);
}

struct Rank;

impl Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match LOG_RANK.load(Ordering::Relaxed) {
            UNRANKED => f.write_str("-"),
            rank => write!(f, "{}", rank),
        }
    }
}

/// Installs the logger, `info` unless `RUST_LOG` says otherwise. Lines look like
/// `[host:rank seconds] LEVEL target: message`; the rank reads `-` until the process knows it.
pub fn initialize_logger() {
    lazy_static::initialize(&LAUNCHED);

    let env = env_logger::Env::default().default_filter_or("info");
    let installed = env_logger::Builder::from_env(env)
        .format(|out, record| {
            writeln!(
                out,
                "[{}:{} {:>10.4}] {:<5} {}: {}",
                hostname(),
                Rank,
                LAUNCHED.elapsed().as_secs_f64(),
                record.level(),
                record.target(),
                record.args(),
            )
        })
        .try_init();

    if installed.is_err() {
        log::debug!("logger was already installed");
    }
}
