//! TCP connection-load generator.
//!
//! Opens a number of TCP connections against a target at a fixed rate, tunes
//! each one with the platform's socket options, writes a short probe, holds
//! the connection for a while and closes it.

use core::future;

pub mod cfg;
pub mod cmd;
pub mod engine;
pub mod logging;
pub mod rlimit;
mod shaper;
pub mod stat;
pub mod tune;

pub use self::{
    cfg::{Config, ConfigError},
    engine::Engine,
    stat::RunResult,
};
use self::tune::{LogSink, PlatformTuner};

/// Runs the load with this platform's tuner, logging tuning outcomes.
///
/// Returns only after every connection has finished.
pub async fn run(cfg: Config) -> Result<RunResult, ConfigError> {
    Engine::new(cfg, PlatformTuner::new(LogSink)).run(future::pending()).await
}
