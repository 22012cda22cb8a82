use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ClientError;
use crate::transport::TransportKind;

/// Top-level client configuration, loaded from `gambit.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server origin, e.g. `https://chess.example.com`.
    pub endpoint: String,
    /// Socket.IO mount path.
    pub path: String,
    /// Transport preference. Each connect tries the entries in order until
    /// one opens; a polling session may later upgrade to WebSocket.
    pub transports: Vec<TransportKind>,
    /// Allow a polling session to move to WebSocket after the handshake.
    pub upgrade: bool,
    pub connect_timeout_ms: u64,
    pub reconnection: ReconnectionConfig,
    pub health: HealthConfig,
    pub requests: RequestConfig,
    pub protocol: ProtocolConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3001".to_string(),
            path: gambit_core::net::protocol::DEFAULT_PATH.to_string(),
            transports: vec![TransportKind::Polling, TransportKind::WebSocket],
            upgrade: true,
            connect_timeout_ms: 10_000,
            reconnection: ReconnectionConfig::default(),
            health: HealthConfig::default(),
            requests: RequestConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

/// Automatic reconnect policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Consecutive failed attempts before the session gives up.
    pub max_attempts: u32,
    /// Fraction of the base delay used as the +/- random spread.
    pub jitter_factor: f64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            max_attempts: 5,
            jitter_factor: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Silence longer than this marks a connected session unhealthy.
    pub stale_after_ms: u64,
    /// How long a session may stay on polling before that counts against it.
    pub upgrade_window_ms: u64,
    /// Send a `ping` after every connect and record the round trip.
    pub probe_latency: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 45_000,
            upgrade_window_ms: 10_000,
            probe_latency: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Window a correlated request waits for its reply.
    pub timeout_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

/// Wire-level naming choices the server contract leaves open.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub resign_event: ResignEvent,
}

/// Which event name resignation goes out under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResignEvent {
    #[default]
    ResignGame,
    Resign,
}

impl ResignEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResignGame => "resign_game",
            Self::Resign => "resign",
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.requests.timeout_ms)
    }

    /// Whether an upgrade to WebSocket may be attempted at all.
    pub fn upgrade_possible(&self) -> bool {
        self.upgrade
            && self.transports.first() == Some(&TransportKind::Polling)
            && self.transports.contains(&TransportKind::WebSocket)
    }

    /// Check configuration for values the manager cannot work with.
    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.endpoint.starts_with("http://")
            || self.endpoint.starts_with("https://")
            || self.endpoint.starts_with("ws://")
            || self.endpoint.starts_with("wss://"))
        {
            return Err(ClientError::Config(format!(
                "endpoint must be an http(s) or ws(s) URL, got {:?}",
                self.endpoint
            )));
        }
        if !self.path.starts_with('/') {
            return Err(ClientError::Config("path must start with '/'".into()));
        }
        if self.transports.is_empty() {
            return Err(ClientError::Config(
                "transports must list at least one transport".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ClientError::Config("connect_timeout_ms must be > 0".into()));
        }
        let r = &self.reconnection;
        if r.initial_delay_ms == 0 {
            return Err(ClientError::Config(
                "reconnection.initial_delay_ms must be > 0".into(),
            ));
        }
        if r.max_delay_ms < r.initial_delay_ms {
            return Err(ClientError::Config(
                "reconnection.max_delay_ms must be >= initial_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&r.jitter_factor) {
            return Err(ClientError::Config(
                "reconnection.jitter_factor must be within 0..=1".into(),
            ));
        }
        if self.health.stale_after_ms == 0 {
            return Err(ClientError::Config("health.stale_after_ms must be > 0".into()));
        }
        if self.requests.timeout_ms == 0 {
            return Err(ClientError::Config("requests.timeout_ms must be > 0".into()));
        }
        if self.upgrade && self.transports.len() == 1 {
            tracing::debug!("upgrade enabled but only one transport configured");
        }
        Ok(())
    }

    /// Load `gambit.toml` from the working directory if present, then apply
    /// environment overrides.
    pub fn load() -> Self {
        Self::load_from(Path::new("gambit.toml"))
    }

    pub fn load_from(path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<ClientConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!(path = %path.display(), "Loaded client configuration");
                    cfg
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to parse config: {e}, using defaults");
                    ClientConfig::default()
                },
            },
            Err(_) => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                ClientConfig::default()
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Apply `GAMBIT_*` overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("GAMBIT_BACKEND_URL")
            && !url.is_empty()
        {
            self.endpoint = url;
        }
        if let Some(val) = lookup("GAMBIT_UPGRADE")
            && let Ok(b) = val.parse::<bool>()
        {
            self.upgrade = b;
        }
        if let Some(val) = lookup("GAMBIT_CONNECT_TIMEOUT_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            self.connect_timeout_ms = n;
        }
        if let Some(val) = lookup("GAMBIT_RECONNECT_ATTEMPTS")
            && let Ok(n) = val.parse::<u32>()
        {
            self.reconnection.max_attempts = n;
        }
        if let Some(val) = lookup("GAMBIT_TRANSPORTS") {
            let parsed: Option<Vec<TransportKind>> =
                val.split(',').map(|s| TransportKind::parse(s.trim())).collect();
            match parsed {
                Some(list) if !list.is_empty() => self.transports = list,
                _ => tracing::warn!(value = %val, "Ignoring invalid GAMBIT_TRANSPORTS"),
            }
        }
    }
}
