//! Winsock backend.
//!
//! Winsock has neither a delayed-ACK switch nor client-side fast-open on a
//! plain `connect`, so quick-ack is approximated with `TCP_NODELAY` and
//! fast-open is skipped.

use socket2::SockRef;

use super::{apply_common, OptOutcome, Recorder, SockOpt, SocketTuner, SocketTuningProfile, TuneReport, TuneSink};

/// Socket tuner for Windows targets.
#[derive(Debug, Clone, Default)]
pub struct Tuner<K> {
    sink: K,
}

impl<K> Tuner<K> {
    pub const fn new(sink: K) -> Self {
        Self { sink }
    }
}

impl<K> SocketTuner for Tuner<K>
where
    K: TuneSink,
{
    fn prepare(&self, sock: SockRef<'_>, profile: &SocketTuningProfile) -> TuneReport {
        let mut rec = Recorder::new(&self.sink);

        if profile.reuse_address {
            rec.record(SockOpt::ReuseAddress, OptOutcome::from_result(sock.set_reuse_address(true)));
        }
        if profile.fast_open {
            rec.record(SockOpt::FastOpen, OptOutcome::Unsupported);
        }

        rec.finish()
    }

    fn apply(&self, sock: SockRef<'_>, profile: &SocketTuningProfile) -> TuneReport {
        let mut rec = Recorder::new(&self.sink);

        apply_common(&mut rec, &sock, profile);
        if profile.quick_ack {
            let outcome = match sock.set_nodelay(true) {
                Ok(()) => OptOutcome::Approximated { via: SockOpt::NoDelay },
                Err(err) => OptOutcome::Failed(err),
            };
            rec.record(SockOpt::QuickAck, outcome);
        }

        rec.finish()
    }
}
