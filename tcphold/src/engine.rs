use core::future::Future;
use std::sync::Arc;

use tokio::{
    sync::watch,
    task::{JoinError, JoinSet},
};

use self::conn::{Conn, Shared};
use crate::{
    cfg::{Config, ConfigError},
    shaper::Pacer,
    stat::{ConnOutcome, RunResult},
    tune::SocketTuner,
};

mod conn;

pub use self::conn::PROBE;

/// Connection load generator.
///
/// Opens `connections` connections against the target, launching them at
/// `rate` per second, holds each one for `hold` and closes it. Per-connection
/// failures are counted in the [`RunResult`], they never abort the run.
#[derive(Debug)]
pub struct Engine<T> {
    cfg: Config,
    tuner: T,
}

impl<T> Engine<T>
where
    T: SocketTuner + 'static,
{
    pub fn new(cfg: Config, tuner: T) -> Self {
        Self { cfg, tuner }
    }

    /// Runs the load until every launched connection has finished.
    ///
    /// Once `stop` completes no more connections are launched and the ones
    /// being held are closed right away. The run still waits for all of them
    /// before returning.
    ///
    /// Fails only if the config is invalid, in which case nothing is dialed.
    pub async fn run<F>(self, stop: F) -> Result<RunResult, ConfigError>
    where
        F: Future<Output = ()>,
    {
        let rate = self.cfg.validate()?;
        let num_conns = self.cfg.connections as u64;

        let pacer = Pacer::new(rate);
        log::info!(
            "connecting to {:?}: {} connections at {}/s (every {:?}), holding each for {:?}",
            self.cfg.target,
            num_conns,
            rate,
            pacer.interval(),
            self.cfg.hold,
        );

        let shared = Arc::new(Shared { cfg: self.cfg, tuner: self.tuner });
        let (tx, rx) = watch::channel(false);
        let mut tasks = JoinSet::new();
        let mut result = RunResult::default();
        let mut is_stopped = false;

        tokio::pin!(stop);

        for idx in 0..num_conns {
            tokio::select! {
                biased;
                () = &mut stop => {
                    is_stopped = true;
                    break;
                }
                () = pacer.wait(idx) => {}
            }

            reap(&mut tasks, &mut result);
            result.on_launch();
            tasks.spawn(Conn::new(idx, shared.clone(), rx.clone()).run());
        }

        if is_stopped {
            tx.send_replace(true);
            log::info!("stopped, {} connections not launched", num_conns - result.attempted);
        }

        loop {
            tokio::select! {
                rc = tasks.join_next() => match rc {
                    Some(rc) => on_join(&mut result, rc),
                    None => break,
                },
                () = &mut stop, if !is_stopped => {
                    is_stopped = true;
                    tx.send_replace(true);
                    log::info!("stopped, closing {} connections", tasks.len());
                }
            }
        }

        result.elapsed = pacer.start().elapsed();
        log::info!(
            "finished in {:?}: {} succeeded, {} failed",
            result.elapsed,
            result.succeeded,
            result.failed.total(),
        );

        Ok(result)
    }
}

/// Folds every connection task that has already finished into `result`,
/// without waiting for the rest.
fn reap(tasks: &mut JoinSet<ConnOutcome>, result: &mut RunResult) {
    while let Some(rc) = tasks.try_join_next() {
        on_join(result, rc);
    }
}

#[inline]
fn on_join(result: &mut RunResult, rc: Result<ConnOutcome, JoinError>) {
    match rc {
        Ok(outcome) => result.on_outcome(&outcome),
        Err(err) => {
            log::error!("connection task died: {err}");
            result.on_panic();
        }
    }
}
