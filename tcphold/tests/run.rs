use core::{future, time::Duration};
use std::{
    net::{Shutdown, SocketAddr},
    sync::{Arc, Mutex},
    time::Instant,
};

use socket2::SockRef;
use tcphold::{
    engine::PROBE,
    tune::{LogSink, PlatformTuner, SockOpt, SocketTuner, SocketTuningProfile, TuneReport},
    Config, ConfigError, Engine,
};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

/// Connection as seen by the listening side.
#[derive(Debug, Clone)]
struct Seen {
    accepted_at: Instant,
    closed_at: Instant,
    payload: Vec<u8>,
}

impl Seen {
    fn held(&self) -> Duration {
        self.closed_at.duration_since(self.accepted_at)
    }
}

/// Spawns a listener that records every accepted connection until the peer
/// goes away.
async fn listen() -> (SocketAddr, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((sock, ..)) = listener.accept().await else {
                return;
            };
            let accepted_at = Instant::now();
            let tx = tx.clone();

            tokio::spawn(async move {
                let payload = drain(sock).await;
                let _ = tx.send(Seen { accepted_at, closed_at: Instant::now(), payload });
            });
        }
    });

    (addr, rx)
}

/// Reads until EOF or reset.
async fn drain(mut sock: TcpStream) -> Vec<u8> {
    let mut payload = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        match sock.read(&mut buf).await {
            Ok(0) | Err(..) => return payload,
            Ok(n) => payload.extend_from_slice(&buf[..n]),
        }
    }
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<Seen>, n: usize) -> Vec<Seen> {
    let mut out = Vec::with_capacity(n);
    while out.len() < n {
        let seen = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("listener saw every connection")
            .unwrap();
        out.push(seen);
    }

    out
}

fn closed_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn closed_port_counts_dial_failures() {
    let cfg = Config::new(format!("127.0.0.1:{}", closed_port()))
        .with_connections(5)
        .with_rate(100);

    let result = tcphold::run(cfg).await.unwrap();

    assert_eq!(5, result.attempted);
    assert_eq!(0, result.succeeded);
    assert_eq!(5, result.failed.dial);
    assert_eq!(0, result.failed.write + result.failed.close);
}

#[tokio::test]
async fn invalid_config_is_the_only_error() {
    assert_eq!(
        Err(ConfigError::ZeroConnections),
        tcphold::run(Config::new("127.0.0.1:1").with_connections(0)).await
    );
    assert_eq!(Err(ConfigError::EmptyTarget), tcphold::run(Config::new("")).await);
}

#[tokio::test]
async fn live_listener_zero_hold() {
    let (addr, mut rx) = listen().await;
    let cfg = Config::new(addr.to_string())
        .with_connections(3)
        .with_rate(3)
        .with_hold(Duration::ZERO);

    let result = tcphold::run(cfg).await.unwrap();
    let seen = collect(&mut rx, 3).await;

    assert_eq!(3, result.attempted);
    assert_eq!(3, result.succeeded);
    assert_eq!(0, result.failed.total());
    for s in &seen {
        assert!(s.held() < Duration::from_millis(500), "held for {:?}", s.held());
    }
}

#[tokio::test]
async fn probe_is_delivered() {
    let (addr, mut rx) = listen().await;
    // Graceful close, so the payload can't be lost to a reset.
    let profile = SocketTuningProfile {
        no_delay: true,
        ..SocketTuningProfile::untouched()
    };
    let cfg = Config::new(addr.to_string())
        .with_connections(2)
        .with_hold(Duration::from_millis(50))
        .with_profile(profile);

    let result = tcphold::run(cfg).await.unwrap();
    let seen = collect(&mut rx, 2).await;

    assert_eq!(2, result.succeeded);
    for s in &seen {
        assert_eq!(PROBE, s.payload.as_slice());
    }
}

#[tokio::test]
async fn launches_are_paced() {
    let (addr, mut rx) = listen().await;
    let rate = 10;
    let interval = Duration::from_millis(100);
    let cfg = Config::new(addr.to_string())
        .with_connections(4)
        .with_rate(rate)
        .with_hold(Duration::ZERO);

    let start = Instant::now();
    let result = tcphold::run(cfg).await.unwrap();
    let mut seen = collect(&mut rx, 4).await;
    seen.sort_by_key(|s| s.accepted_at);

    assert_eq!(4, result.succeeded);
    for (idx, s) in seen.iter().enumerate() {
        let offset = s.accepted_at.duration_since(start);
        // Timers never fire early, so connection "idx" can't show up before
        // its launch slot.
        assert!(
            offset + Duration::from_millis(1) >= interval * idx as u32,
            "connection {idx} accepted after {offset:?}"
        );
    }
}

#[tokio::test]
async fn holds_run_concurrently() {
    let (addr, mut rx) = listen().await;
    let hold = Duration::from_millis(400);
    let cfg = Config::new(addr.to_string())
        .with_connections(5)
        .with_rate(1000)
        .with_hold(hold);

    let start = Instant::now();
    let result = tcphold::run(cfg).await.unwrap();
    let elapsed = start.elapsed();
    let seen = collect(&mut rx, 5).await;

    assert_eq!(5, result.succeeded);
    assert!(elapsed >= hold);
    // Serialized holds would take 5 * 400ms.
    assert!(elapsed < hold * 3, "took {elapsed:?}");
    for s in &seen {
        assert!(s.held() + Duration::from_millis(20) >= hold, "held for {:?}", s.held());
    }
}

#[tokio::test]
async fn stop_closes_held_connections() {
    let (addr, mut rx) = listen().await;
    let cfg = Config::new(addr.to_string())
        .with_connections(3)
        .with_rate(1000)
        .with_hold(Duration::from_secs(60));
    let engine = Engine::new(cfg, PlatformTuner::new(LogSink));

    let start = Instant::now();
    let result = engine
        .run(tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();
    let seen = collect(&mut rx, 3).await;

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(3, result.attempted);
    assert_eq!(3, result.cancelled);
    assert_eq!(0, result.succeeded);
    assert_eq!(3, seen.len());
}

#[tokio::test]
async fn stop_prevents_further_launches() {
    let (addr, _rx) = listen().await;
    let cfg = Config::new(addr.to_string())
        .with_connections(100)
        .with_rate(10)
        .with_hold(Duration::from_secs(60));
    let engine = Engine::new(cfg, PlatformTuner::new(LogSink));

    let result = engine
        .run(tokio::time::sleep(Duration::from_millis(250)))
        .await
        .unwrap();

    assert!(result.attempted < 10, "{result:?}");
    assert_eq!(result.attempted, result.finished());
}

fn state(sock: SockRef<'_>) -> (bool, Option<Duration>, usize, usize) {
    (
        sock.nodelay().unwrap(),
        sock.linger().unwrap(),
        sock.send_buffer_size().unwrap(),
        sock.recv_buffer_size().unwrap(),
    )
}

#[tokio::test]
async fn accepted_stream_tuning_is_idempotent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let (server, ..) = accepted.unwrap();
    let tuner = PlatformTuner::new(LogSink);
    let profile = SocketTuningProfile::default();

    let first = tuner.apply(SockRef::from(&server), &profile);
    let once = state(SockRef::from(&server));
    let second = tuner.apply(SockRef::from(&server), &profile);
    let twice = state(SockRef::from(&server));

    assert_eq!(once, twice);
    assert_eq!(first.is_degraded(), second.is_degraded());
    assert!(first.outcome(SockOpt::QuickAck).is_some());
    // Fast-open is a dial-time option, it has no business on an established
    // stream.
    assert!(first.outcome(SockOpt::FastOpen).is_none());
}

#[tokio::test]
async fn tuning_outcomes_reach_the_sink() {
    use tcphold::tune::{OptOutcome, TuneSink};

    #[derive(Default)]
    struct Counting {
        seen: Mutex<Vec<SockOpt>>,
    }

    impl TuneSink for Counting {
        fn on_outcome(&self, opt: SockOpt, _outcome: &OptOutcome) {
            self.seen.lock().unwrap().push(opt);
        }
    }

    let (addr, mut rx) = listen().await;
    let sink = Arc::new(Counting::default());
    let cfg = Config::new(addr.to_string())
        .with_connections(1)
        .with_hold(Duration::ZERO);

    let result = Engine::new(cfg, PlatformTuner::new(sink.clone()))
        .run(future::pending())
        .await
        .unwrap();
    collect(&mut rx, 1).await;

    let seen = sink.seen.lock().unwrap().clone();
    assert_eq!(1, result.succeeded);
    for opt in [SockOpt::ReuseAddress, SockOpt::FastOpen, SockOpt::NoDelay, SockOpt::Linger, SockOpt::QuickAck] {
        assert!(seen.contains(&opt), "{opt} missing from {seen:?}");
    }
}

/// Tuner that closes the write half of every established stream.
#[derive(Debug)]
struct WriteShutTuner;

impl SocketTuner for WriteShutTuner {
    fn prepare(&self, _sock: SockRef<'_>, _profile: &SocketTuningProfile) -> TuneReport {
        TuneReport::default()
    }

    fn apply(&self, sock: SockRef<'_>, _profile: &SocketTuningProfile) -> TuneReport {
        sock.shutdown(Shutdown::Write).unwrap();
        TuneReport::default()
    }
}

#[tokio::test]
async fn write_failures_are_counted() {
    let (addr, mut rx) = listen().await;
    let cfg = Config::new(addr.to_string())
        .with_connections(2)
        .with_rate(1000)
        .with_hold(Duration::from_secs(60));

    let result = Engine::new(cfg, WriteShutTuner).run(future::pending()).await.unwrap();
    collect(&mut rx, 2).await;

    assert_eq!(2, result.failed.write);
    assert_eq!(0, result.succeeded);
    assert_eq!(result.attempted, result.finished());
}

/// Spawns a listener that resets every accepted connection after `after`.
async fn listen_and_reset(after: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((sock, ..)) = listener.accept().await else {
                return;
            };

            tokio::spawn(async move {
                SockRef::from(&sock).set_linger(Some(Duration::ZERO)).unwrap();
                tokio::time::sleep(after).await;
            });
        }
    });

    addr
}

#[tokio::test]
async fn peer_reset_during_hold_is_close_failure() {
    let addr = listen_and_reset(Duration::from_millis(50)).await;

    for profile in [SocketTuningProfile::untouched(), SocketTuningProfile::default()] {
        let abortive = profile.linger.is_abortive();
        let cfg = Config::new(addr.to_string())
            .with_connections(2)
            .with_rate(1000)
            .with_hold(Duration::from_millis(300))
            .with_profile(profile);

        let result = tcphold::run(cfg).await.unwrap();

        assert_eq!(2, result.failed.close, "abortive: {abortive}, {result:?}");
        assert_eq!(0, result.succeeded);
    }
}
