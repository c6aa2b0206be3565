use core::{
    fmt::{self, Display, Formatter},
    time::Duration,
};

use serde::Serialize;

/// Connection life-cycle stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dial,
    Write,
    Close,
}

impl Display for Stage {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        let name = match self {
            Self::Dial => "dial",
            Self::Write => "write",
            Self::Close => "close",
        };

        fmt.write_str(name)
    }
}

/// Terminal state of a single connection task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// Dialed, probed, held for the full duration and closed.
    Held,
    /// Closed before its hold expired because the run was stopped.
    Cancelled,
    /// Abandoned at the given stage.
    Failed(Stage),
}

/// What a connection task reports back to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnOutcome {
    pub terminal: Terminal,
    /// Number of socket options the OS refused.
    pub tune_failed: u32,
    /// Number of socket options this platform does not have.
    pub tune_unsupported: u32,
}

impl ConnOutcome {
    #[inline]
    pub const fn new(terminal: Terminal) -> Self {
        Self { terminal, tune_failed: 0, tune_unsupported: 0 }
    }

    #[inline]
    pub const fn failed(stage: Stage) -> Self {
        Self::new(Terminal::Failed(stage))
    }
}

/// Failure counters, per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Failures {
    pub dial: u64,
    /// Connections that stayed up with at least one option not applied.
    ///
    /// These are degraded, not failed, and are not part of [`Failures::total`].
    pub tune: u64,
    pub write: u64,
    pub close: u64,
    /// Connection tasks that died before reporting an outcome.
    pub panic: u64,
}

impl Failures {
    /// Number of connections abandoned at some stage.
    #[inline]
    pub const fn total(&self) -> u64 {
        self.dial + self.write + self.close + self.panic
    }
}

/// Aggregate of a finished run.
///
/// Every launched connection lands in exactly one of `succeeded`,
/// `cancelled` or a non-tune failure counter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub attempted: u64,
    pub succeeded: u64,
    pub cancelled: u64,
    pub failed: Failures,
    /// Total number of options skipped as unsupported across all connections.
    pub unsupported: u64,
    /// Wall time from the first launch until the last connection finished.
    pub elapsed: Duration,
}

impl RunResult {
    /// Should be called once per launched connection.
    #[inline]
    pub fn on_launch(&mut self) {
        self.attempted += 1;
    }

    /// Folds a finished connection into this result.
    pub fn on_outcome(&mut self, outcome: &ConnOutcome) {
        match outcome.terminal {
            Terminal::Held => self.succeeded += 1,
            Terminal::Cancelled => self.cancelled += 1,
            Terminal::Failed(Stage::Dial) => self.failed.dial += 1,
            Terminal::Failed(Stage::Write) => self.failed.write += 1,
            Terminal::Failed(Stage::Close) => self.failed.close += 1,
        }

        if outcome.tune_failed > 0 {
            self.failed.tune += 1;
        }
        self.unsupported += outcome.tune_unsupported as u64;
    }

    /// Accounts for a connection task that died without an outcome.
    #[inline]
    pub fn on_panic(&mut self) {
        self.failed.panic += 1;
    }

    /// Number of connections that reached a terminal state.
    #[inline]
    pub const fn finished(&self) -> u64 {
        self.succeeded + self.cancelled + self.failed.total()
    }
}

impl Display for RunResult {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        let Self {
            attempted,
            succeeded,
            cancelled,
            failed,
            unsupported,
            elapsed,
        } = self;

        writeln!(fmt, "attempted:   {attempted}")?;
        writeln!(fmt, "succeeded:   {succeeded}")?;
        writeln!(fmt, "cancelled:   {cancelled}")?;
        writeln!(
            fmt,
            "failed:      {} (dial: {}, write: {}, close: {}, panic: {})",
            failed.total(),
            failed.dial,
            failed.write,
            failed.close,
            failed.panic
        )?;
        writeln!(fmt, "degraded:    {} (unsupported options: {unsupported})", failed.tune)?;
        write!(fmt, "elapsed:     {elapsed:.3?}")
    }
}
