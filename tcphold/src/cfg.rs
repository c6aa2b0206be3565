use core::{error::Error, num::NonZero, time::Duration};
use std::{fs, path::Path};

use crate::{
    cmd::{Cmd, ConnectCmd, ModeCmd},
    tune::{LingerConfig, SocketTuningProfile},
};

/// Default time allowed for a single connection handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Run configuration.
///
/// Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Target endpoint, "host:port".
    pub target: String,
    /// Number of connections to open and hold.
    pub connections: u32,
    /// Connection launch rate, per second.
    pub rate: u32,
    /// How long each connection is held open after the probe is written.
    pub hold: Duration,
    /// Upper bound for a single handshake.
    pub connect_timeout: Duration,
    /// Socket options applied to each connection.
    pub profile: SocketTuningProfile,
}

impl Config {
    /// Creates a config with the default connection count, rate, hold and
    /// tuning profile.
    pub fn new<T>(target: T) -> Self
    where
        T: Into<String>,
    {
        Self {
            target: target.into(),
            connections: 10,
            rate: 100,
            hold: Duration::from_secs(10),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            profile: SocketTuningProfile::default(),
        }
    }

    pub fn with_connections(mut self, connections: u32) -> Self {
        self.connections = connections;
        self
    }

    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }

    pub fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_profile(mut self, profile: SocketTuningProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Checks this config, returning the validated rate on success.
    pub fn validate(&self) -> Result<NonZero<u32>, ConfigError> {
        if self.connections == 0 {
            return Err(ConfigError::ZeroConnections);
        }
        if self.target.trim().is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }

        NonZero::new(self.rate).ok_or(ConfigError::ZeroRate)
    }
}

/// Invalid run parameters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("number of connections must be positive")]
    ZeroConnections,
    #[error("connection rate must be positive")]
    ZeroRate,
    #[error("target address must not be empty")]
    EmptyTarget,
    #[error("connect timeout must be positive")]
    ZeroConnectTimeout,
}

impl TryFrom<Cmd> for Config {
    type Error = Box<dyn Error>;

    fn try_from(v: Cmd) -> Result<Self, Self::Error> {
        match v.mode {
            ModeCmd::Connect(cmd) => cmd.try_into(),
        }
    }
}

impl TryFrom<ConnectCmd> for Config {
    type Error = Box<dyn Error>;

    fn try_from(cmd: ConnectCmd) -> Result<Self, Self::Error> {
        let ConnectCmd {
            addr,
            connections,
            rate,
            duration,
            connect_timeout,
            profile,
            tcp_linger,
            tcp_sndbuf,
            tcp_rcvbuf,
            no_tune,
            json: _,
        } = cmd;

        let mut profile = match profile {
            Some(path) => load_profile(path)?,
            None => SocketTuningProfile::default(),
        };
        if let Some(secs) = tcp_linger {
            profile.linger = LingerConfig { enabled: true, timeout_secs: secs };
        }
        if let Some(v) = tcp_sndbuf {
            profile.send_buffer_bytes = v;
        }
        if let Some(v) = tcp_rcvbuf {
            profile.recv_buffer_bytes = v;
        }
        if no_tune {
            profile = SocketTuningProfile::untouched();
        }

        let m = Self {
            target: addr,
            connections,
            rate,
            hold: duration,
            connect_timeout,
            profile,
        };
        m.validate()?;

        Ok(m)
    }
}

/// Loads a tuning profile from the YAML file.
///
/// Missing fields take their default values.
pub fn load_profile<P: AsRef<Path>>(path: P) -> Result<SocketTuningProfile, Box<dyn Error>> {
    let data = fs::read(path)?;
    let profile: SocketTuningProfile = serde_yaml::from_slice(&data)?;

    Ok(profile)
}
