use core::time::Duration;
use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Opens and holds TCP connections against a target, at a given rate.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
#[command(flatten_help = true)]
pub struct Cmd {
    #[clap(subcommand)]
    pub mode: ModeCmd,
    /// Be verbose in terms of logging.
    #[clap(short, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Cmd {
    /// Whether the run summary should be printed as JSON.
    #[inline]
    pub fn json(&self) -> bool {
        match &self.mode {
            ModeCmd::Connect(cmd) => cmd.json,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub enum ModeCmd {
    /// Connect to a port where a listener is waiting.
    ///
    /// Each connection writes a short probe, is held open for the given
    /// duration and then closed. The peer's response (if any) is ignored.
    Connect(ConnectCmd),
}

#[derive(Debug, Clone, Parser)]
pub struct ConnectCmd {
    /// Target endpoint, "host:port".
    #[clap(required = true)]
    pub addr: String,
    /// Number of connections to keep.
    #[clap(short, long, default_value_t = 10)]
    pub connections: u32,
    /// Connection launch rate, per second.
    #[clap(short, long, default_value_t = 100)]
    pub rate: u32,
    /// How long each connection is held open.
    #[clap(short, long, default_value = "10s", value_parser = humantime::parse_duration)]
    pub duration: Duration,
    /// Handshake timeout for a single connection.
    #[clap(long, default_value = "4s", value_parser = humantime::parse_duration)]
    pub connect_timeout: Duration,
    /// Path to the socket tuning profile in YAML format.
    ///
    /// Missing fields take their defaults: no-delay, quick-ack, abortive
    /// linger, 64K buffers, address reuse and fast-open.
    #[clap(long, value_name = "PATH")]
    pub profile: Option<PathBuf>,
    /// Set linger TCP option with specified value, in seconds.
    ///
    /// Zero means abortive close.
    #[clap(long)]
    pub tcp_linger: Option<u16>,
    /// Socket send buffer size, in bytes.
    #[clap(long, value_name = "BYTES")]
    pub tcp_sndbuf: Option<usize>,
    /// Socket receive buffer size, in bytes.
    #[clap(long, value_name = "BYTES")]
    pub tcp_rcvbuf: Option<usize>,
    /// Leave all socket options at their OS defaults.
    #[clap(long, conflicts_with_all = ["profile", "tcp_linger", "tcp_sndbuf", "tcp_rcvbuf"])]
    pub no_tune: bool,
    /// Print the run summary as JSON.
    #[clap(long)]
    pub json: bool,
}
