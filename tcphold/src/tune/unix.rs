//! Berkeley sockets backend.

use socket2::SockRef;

use super::{apply_common, OptOutcome, Recorder, SockOpt, SocketTuner, SocketTuningProfile, TuneReport, TuneSink};

/// Socket tuner for Unix-like targets.
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
            rec.record(SockOpt::FastOpen, fast_open(&sock));
        }

        rec.finish()
    }

    fn apply(&self, sock: SockRef<'_>, profile: &SocketTuningProfile) -> TuneReport {
        let mut rec = Recorder::new(&self.sink);

        apply_common(&mut rec, &sock, profile);
        if profile.quick_ack {
            rec.record(SockOpt::QuickAck, quick_ack(&sock));
        }

        rec.finish()
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn quick_ack(sock: &SockRef<'_>) -> OptOutcome {
    OptOutcome::from_result(sock.set_quickack(true))
}

// No delayed-ACK knob here, disabling Nagle is the closest we get.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn quick_ack(sock: &SockRef<'_>) -> OptOutcome {
    match sock.set_nodelay(true) {
        Ok(()) => OptOutcome::Approximated { via: SockOpt::NoDelay },
        Err(err) => OptOutcome::Failed(err),
    }
}

/// Enables client-side TCP Fast Open.
///
/// Must be called before connecting, the kernel rejects it afterwards.
#[cfg(target_os = "linux")]
fn fast_open(sock: &SockRef<'_>) -> OptOutcome {
    use std::{io::Error, os::fd::AsRawFd};

    let fd = sock.as_raw_fd();
    let enable: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_FASTOPEN_CONNECT,
            &enable as *const libc::c_int as *const libc::c_void,
            core::mem::size_of_val(&enable) as libc::socklen_t,
        )
    };

    if rc == 0 {
        return OptOutcome::Applied;
    }

    let err = Error::last_os_error();
    match err.raw_os_error() {
        // Either the kernel is too old or client-side TFO is disabled via
        // "net.ipv4.tcp_fastopen".
        Some(libc::ENOPROTOOPT) | Some(libc::EOPNOTSUPP) => OptOutcome::Unsupported,
        _ => OptOutcome::Failed(err),
    }
}

#[cfg(not(target_os = "linux"))]
fn fast_open(_sock: &SockRef<'_>) -> OptOutcome {
    OptOutcome::Unsupported
}
