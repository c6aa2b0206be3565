use core::{future, time::Duration};
use std::{
    io::{Error, ErrorKind},
    net::SocketAddr,
    sync::Arc,
    time::Instant,
};

use socket2::SockRef;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpSocket, TcpStream},
    sync::watch::Receiver,
};

use crate::{
    cfg::Config,
    stat::{ConnOutcome, Stage, Terminal},
    tune::{OptOutcome, SockOpt, SocketTuner, TuneReport},
};

/// Payload written right after a connection is established.
///
/// The peer's answer, if any, is never read.
pub const PROBE: &[u8] = b"Hello";

/// Read-only state shared by all connection tasks of a run.
#[derive(Debug)]
pub struct Shared<T> {
    pub cfg: Config,
    pub tuner: T,
}

/// Per-connection task.
///
/// Owns its stream exclusively from the moment it is dialed until it is
/// closed.
#[derive(Debug)]
pub struct Conn<T> {
    /// Launch index, for logging.
    idx: u64,
    shared: Arc<Shared<T>>,
    /// Flips to `true` when the run is stopped.
    stop: Receiver<bool>,
    outcome: ConnOutcome,
}

/// Established connection.
#[derive(Debug)]
struct Dialed {
    stream: TcpStream,
    /// Whether the probe already went out as part of the handshake.
    probed: bool,
}

impl<T> Conn<T>
where
    T: SocketTuner,
{
    pub fn new(idx: u64, shared: Arc<Shared<T>>, stop: Receiver<bool>) -> Self {
        Self {
            idx,
            shared,
            stop,
            outcome: ConnOutcome::new(Terminal::Held),
        }
    }

    /// Drives this connection through dial, tune, probe, hold and close.
    pub async fn run(mut self) -> ConnOutcome {
        let idx = self.idx;
        let now = Instant::now();

        let stop = self.stop.clone();
        let dial = tokio::select! {
            rc = self.dial() => Some(rc),
            () = stopped(stop) => None,
        };
        let Dialed { mut stream, probed } = match dial {
            Some(Ok(dialed)) => dialed,
            None => return self.finish(Terminal::Cancelled),
            Some(Err(err)) => {
                log::debug!("#{idx}: could not dial {:?}: {err}", self.shared.cfg.target);
                return self.finish(Terminal::Failed(Stage::Dial));
            }
        };
        log::trace!("#{idx}: established in {:?}", now.elapsed());

        let report = self.shared.tuner.apply(SockRef::from(&stream), &self.shared.cfg.profile);
        self.on_tune(&report);

        if !probed {
            if let Err(err) = stream.write_all(PROBE).await {
                log::debug!("#{idx}: could not write: {err}");
                return self.finish(Terminal::Failed(Stage::Write));
            }
        }

        let terminal = self.hold().await;

        if let Err(err) = self.close(stream).await {
            log::debug!("#{idx}: could not close: {err}");
            return self.finish(Terminal::Failed(Stage::Close));
        }
        log::trace!("#{idx}: closed after {:?}", now.elapsed());

        self.finish(terminal)
    }

    async fn dial(&mut self) -> Result<Dialed, Error> {
        let timeout = self.shared.cfg.connect_timeout;

        match tokio::time::timeout(timeout, self.do_dial()).await {
            Ok(rc) => rc,
            Err(..) => Err(Error::new(ErrorKind::TimedOut, "connect timed out")),
        }
    }

    #[inline]
    async fn do_dial(&mut self) -> Result<Dialed, Error> {
        let addrs = resolve(&self.shared.cfg.target).await?;
        self.connect_any(&addrs).await
    }

    /// Tries the addresses in order, returning the first connection that comes
    /// up or the last error.
    async fn connect_any(&mut self, addrs: &[SocketAddr]) -> Result<Dialed, Error> {
        let mut last = None;

        for &addr in addrs {
            match self.connect(addr).await {
                Ok((dialed, report)) => {
                    self.on_tune(&report);
                    return Ok(dialed);
                }
                Err(err) => {
                    log::trace!("#{}: could not connect to {addr}: {err}", self.idx);
                    last = Some(err);
                }
            }
        }

        Err(last.unwrap_or_else(|| Error::new(ErrorKind::AddrNotAvailable, "no address to connect to")))
    }

    async fn connect(&self, addr: SocketAddr) -> Result<(Dialed, TuneReport), Error> {
        let sock = match addr {
            SocketAddr::V4(..) => TcpSocket::new_v4()?,
            SocketAddr::V6(..) => TcpSocket::new_v6()?,
        };

        let report = self.shared.tuner.prepare(SockRef::from(&sock), &self.shared.cfg.profile);
        let fast_open = matches!(report.outcome(SockOpt::FastOpen), Some(OptOutcome::Applied));

        let mut stream = sock.connect(addr).await?;
        if !fast_open {
            return Ok((Dialed { stream, probed: false }, report));
        }

        // With fast-open the kernel may report success without sending a SYN
        // and carry the first write in it instead. Only the peer's answer
        // tells whether the connection exists.
        stream.write_all(PROBE).await?;
        established(&stream).await?;

        Ok((Dialed { stream, probed: true }, report))
    }

    /// Waits out the hold duration, unless the run is stopped first.
    async fn hold(&self) -> Terminal {
        tokio::select! {
            () = tokio::time::sleep(self.shared.cfg.hold) => Terminal::Held,
            () = stopped(self.stop.clone()) => Terminal::Cancelled,
        }
    }

    async fn close(&self, mut stream: TcpStream) -> Result<(), Error> {
        // A reset received while holding is only visible as a pending error.
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }

        // With zero linger dropping the socket resets the connection, there
        // is no handshake to wait for.
        if !self.shared.cfg.profile.linger.is_abortive() {
            stream.shutdown().await?;
        }

        Ok(())
    }

    #[inline]
    fn on_tune(&mut self, report: &TuneReport) {
        self.outcome.tune_failed += report.failed().count() as u32;
        self.outcome.tune_unsupported += report.unsupported().count() as u32;
    }

    #[inline]
    fn finish(self, terminal: Terminal) -> ConnOutcome {
        ConnOutcome { terminal, ..self.outcome }
    }
}

/// Resolves "host:port" into every address it maps to.
async fn resolve(target: &str) -> Result<Vec<SocketAddr>, Error> {
    let addrs: Vec<_> = tokio::net::lookup_host(target).await?.collect();
    if addrs.is_empty() {
        return Err(Error::new(ErrorKind::AddrNotAvailable, format!("{target:?} resolved to nothing")));
    }

    Ok(addrs)
}

/// Completes once the handshake of a fast-open connection is over.
///
/// Fails with the socket error if the peer refused or never answered.
async fn established(stream: &TcpStream) -> Result<(), Error> {
    loop {
        if let Some(err) = stream.take_error()? {
            return Err(err);
        }
        match stream.peer_addr() {
            Ok(..) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => {}
            Err(err) => return Err(err),
        }

        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Completes once the stop flag is raised.
///
/// Never completes if the flag's owner is gone without raising it.
async fn stopped(mut stop: Receiver<bool>) {
    if stop.wait_for(|v| *v).await.is_err() {
        future::pending::<()>().await;
    }
}
