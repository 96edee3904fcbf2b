#![allow(clippy::many_single_char_names)]

pub mod codec;
pub mod driver;
mod logging;
mod network;
mod prelude;
pub mod types;
mod worker;

pub use logging::{hostname, initialize_logger, set_log_rank};
pub use worker::{PhaseTimings, WorkerReport};
