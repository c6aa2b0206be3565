//! Socket tuning.
//!
//! A [`SocketTuner`] applies a [`SocketTuningProfile`] to a socket and reports
//! what happened to every requested option through a [`TuneReport`] and the
//! injected [`TuneSink`].
//!
//! Exactly one backend is compiled in, selected by the target platform, and
//! re-exported as [`PlatformTuner`].

use core::{
    fmt::{self, Display, Formatter},
    time::Duration,
};
use std::io::Error;

use serde::Deserialize;
use socket2::SockRef;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use self::unix::Tuner as PlatformTuner;
#[cfg(windows)]
pub use self::windows::Tuner as PlatformTuner;

/// Performance-relevant socket options that a tuner knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SockOpt {
    NoDelay,
    QuickAck,
    Linger,
    SendBuffer,
    RecvBuffer,
    ReuseAddress,
    FastOpen,
}

impl Display for SockOpt {
    fn fmt(&self, fmt: &mut Formatter) -> Result<(), fmt::Error> {
        let name = match self {
            Self::NoDelay => "TCP_NODELAY",
            Self::QuickAck => "TCP_QUICKACK",
            Self::Linger => "SO_LINGER",
            Self::SendBuffer => "SO_SNDBUF",
            Self::RecvBuffer => "SO_RCVBUF",
            Self::ReuseAddress => "SO_REUSEADDR",
            Self::FastOpen => "TCP_FASTOPEN",
        };

        fmt.write_str(name)
    }
}

/// What happened to a single requested option.
#[derive(Debug)]
pub enum OptOutcome {
    /// The option was set using its native primitive.
    Applied,
    /// The platform lacks the primitive, the nearest equivalent was set
    /// instead.
    Approximated { via: SockOpt },
    /// The platform lacks the primitive and there is no equivalent, the option
    /// was skipped.
    Unsupported,
    /// The OS refused the option.
    Failed(Error),
}

impl OptOutcome {
    /// Maps the result of an option setter into an outcome.
    #[inline]
    pub fn from_result(rc: Result<(), Error>) -> Self {
        match rc {
            Ok(()) => Self::Applied,
            Err(err) => Self::Failed(err),
        }
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(..))
    }
}

/// Linger behavior on close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LingerConfig {
    pub enabled: bool,
    /// Linger timeout in seconds.
    ///
    /// Zero means abortive close: unsent data is discarded and the peer gets
    /// a reset instead of the regular close handshake. Kept narrow so that it
    /// always fits the C `int` of `SO_LINGER`.
    pub timeout_secs: u16,
}

impl LingerConfig {
    /// Abortive close.
    pub const ABORT: Self = Self { enabled: true, timeout_secs: 0 };

    #[inline]
    pub const fn is_abortive(&self) -> bool {
        self.enabled && self.timeout_secs == 0
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.into())
    }
}

impl Default for LingerConfig {
    fn default() -> Self {
        Self::ABORT
    }
}

/// The set of options to apply to each connection.
///
/// A disabled flag, a disabled linger or a zero buffer size means "leave the
/// OS default alone", never "actively turn it off".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SocketTuningProfile {
    pub no_delay: bool,
    pub quick_ack: bool,
    pub linger: LingerConfig,
    pub send_buffer_bytes: usize,
    pub recv_buffer_bytes: usize,
    pub reuse_address: bool,
    pub fast_open: bool,
}

impl SocketTuningProfile {
    /// Profile that touches nothing.
    pub const fn untouched() -> Self {
        Self {
            no_delay: false,
            quick_ack: false,
            linger: LingerConfig { enabled: false, timeout_secs: 0 },
            send_buffer_bytes: 0,
            recv_buffer_bytes: 0,
            reuse_address: false,
            fast_open: false,
        }
    }
}

impl Default for SocketTuningProfile {
    fn default() -> Self {
        Self {
            no_delay: true,
            quick_ack: true,
            linger: LingerConfig::ABORT,
            send_buffer_bytes: 64 * 1024,
            recv_buffer_bytes: 64 * 1024,
            reuse_address: true,
            fast_open: true,
        }
    }
}

/// Per-option outcomes of a single [`SocketTuner`] call.
#[derive(Debug, Default)]
pub struct TuneReport {
    entries: Vec<(SockOpt, OptOutcome)>,
}

impl TuneReport {
    #[inline]
    pub fn push(&mut self, opt: SockOpt, outcome: OptOutcome) {
        self.entries.push((opt, outcome));
    }

    /// Merges another report into this one.
    #[inline]
    pub fn extend(&mut self, other: TuneReport) {
        self.entries.extend(other.entries);
    }

    #[inline]
    pub fn entries(&self) -> &[(SockOpt, OptOutcome)] {
        &self.entries
    }

    #[inline]
    pub fn outcome(&self, opt: SockOpt) -> Option<&OptOutcome> {
        self.entries.iter().find(|(o, ..)| *o == opt).map(|(.., v)| v)
    }

    /// Options the OS refused.
    pub fn failed(&self) -> impl Iterator<Item = (SockOpt, &Error)> {
        self.entries.iter().filter_map(|(opt, v)| match v {
            OptOutcome::Failed(err) => Some((*opt, err)),
            _ => None,
        })
    }

    /// Options skipped because this platform has no such primitive.
    pub fn unsupported(&self) -> impl Iterator<Item = SockOpt> + '_ {
        self.entries.iter().filter_map(|(opt, v)| match v {
            OptOutcome::Unsupported => Some(*opt),
            _ => None,
        })
    }

    /// Whether at least one option could not be set.
    ///
    /// Unsupported options do not count, the platform simply has nothing to
    /// set.
    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.entries.iter().any(|(.., v)| v.is_failed())
    }
}

/// Observability sink for tuning outcomes.
pub trait TuneSink: Send + Sync {
    fn on_outcome(&self, opt: SockOpt, outcome: &OptOutcome);
}

/// Sink that writes outcomes to the process logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl TuneSink for LogSink {
    fn on_outcome(&self, opt: SockOpt, outcome: &OptOutcome) {
        match outcome {
            OptOutcome::Applied => log::trace!("{opt} set"),
            OptOutcome::Approximated { via } => log::debug!("{opt} is not available, approximated with {via}"),
            OptOutcome::Unsupported => log::debug!("{opt} is not supported on this platform, skipped"),
            OptOutcome::Failed(err) => log::warn!("failed to set {opt}: {err}"),
        }
    }
}

impl<T> TuneSink for std::sync::Arc<T>
where
    T: TuneSink + ?Sized,
{
    #[inline]
    fn on_outcome(&self, opt: SockOpt, outcome: &OptOutcome) {
        (**self).on_outcome(opt, outcome)
    }
}

/// Applies socket options, hiding platform differences.
///
/// Both calls are idempotent: repeating them with the same profile leaves the
/// socket in the same state.
pub trait SocketTuner: Send + Sync {
    /// Sets the options that must be in place before the connection
    /// handshake: address reuse and fast-open.
    fn prepare(&self, sock: SockRef<'_>, profile: &SocketTuningProfile) -> TuneReport;

    /// Sets the options of an established (connected or accepted) stream.
    fn apply(&self, sock: SockRef<'_>, profile: &SocketTuningProfile) -> TuneReport;
}

impl<T> SocketTuner for std::sync::Arc<T>
where
    T: SocketTuner + ?Sized,
{
    #[inline]
    fn prepare(&self, sock: SockRef<'_>, profile: &SocketTuningProfile) -> TuneReport {
        (**self).prepare(sock, profile)
    }

    #[inline]
    fn apply(&self, sock: SockRef<'_>, profile: &SocketTuningProfile) -> TuneReport {
        (**self).apply(sock, profile)
    }
}

/// Collects outcomes into a report while forwarding each to the sink.
pub(crate) struct Recorder<'a, K> {
    sink: &'a K,
    report: TuneReport,
}

impl<'a, K> Recorder<'a, K>
where
    K: TuneSink,
{
    #[inline]
    pub fn new(sink: &'a K) -> Self {
        Self { sink, report: TuneReport::default() }
    }

    #[inline]
    pub fn record(&mut self, opt: SockOpt, outcome: OptOutcome) {
        self.sink.on_outcome(opt, &outcome);
        self.report.push(opt, outcome);
    }

    #[inline]
    pub fn finish(self) -> TuneReport {
        self.report
    }
}

/// Options shared by every backend, set through the portable socket2
/// setters.
pub(crate) fn apply_common<K>(rec: &mut Recorder<'_, K>, sock: &SockRef<'_>, profile: &SocketTuningProfile)
where
    K: TuneSink,
{
    if profile.no_delay {
        rec.record(SockOpt::NoDelay, OptOutcome::from_result(sock.set_nodelay(true)));
    }
    if profile.linger.enabled {
        let linger = Some(profile.linger.timeout());
        rec.record(SockOpt::Linger, OptOutcome::from_result(sock.set_linger(linger)));
    }
    if profile.send_buffer_bytes > 0 {
        let rc = sock.set_send_buffer_size(profile.send_buffer_bytes);
        rec.record(SockOpt::SendBuffer, OptOutcome::from_result(rc));
    }
    if profile.recv_buffer_bytes > 0 {
        let rc = sock.set_recv_buffer_size(profile.recv_buffer_bytes);
        rec.record(SockOpt::RecvBuffer, OptOutcome::from_result(rc));
    }
    if profile.reuse_address {
        rec.record(SockOpt::ReuseAddress, OptOutcome::from_result(sock.set_reuse_address(true)));
    }
}
