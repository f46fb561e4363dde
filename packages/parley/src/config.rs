//! Configuration, figment-deserialized from defaults / config.toml / env vars.
//!
//! Three equivalent ways to configure:
//!
//!   config.toml:     [auth]
//!                    grace_secs = 5
//!
//!   env var:         PARLEY_AUTH__GRACE_SECS=5   (double underscore = nesting)
//!
//!   CLI flags override host/port only.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub websocket: WsFileConfig,
}

/// Server tuning knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Auth-related tunables (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// Base64 (url-safe, unpadded) Ed25519 public key of the credential
    /// issuer. Absent = dev mode (an ephemeral issuer is generated).
    #[serde(default)]
    pub issuer_key: Option<String>,
    /// How long an unauthenticated connection may linger before being dropped.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
    /// Maximum credential age in seconds; absent disables expiry checks.
    #[serde(default)]
    pub max_age_secs: Option<i64>,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            issuer_key: None,
            grace_secs: default_grace_secs(),
            max_age_secs: None,
        }
    }
}

/// WebSocket tunables (lives under `[websocket]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WsFileConfig {
    /// Per-connection bounded outbound queue; overflow disconnects the
    /// connection rather than stalling broadcasts.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl Default for WsFileConfig {
    fn default() -> Self {
        Self {
            outbound_queue: default_outbound_queue(),
        }
    }
}

fn default_grace_secs() -> u64 {
    10
}

fn default_outbound_queue() -> usize {
    256
}

/// Build a figment that layers: defaults → config.toml → PARLEY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PARLEY_AUTH__GRACE_SECS=5`  →  `auth.grace_secs = 5`
///   `PARLEY_WEBSOCKET__OUTBOUND_QUEUE=64`  →  `websocket.outbound_queue = 64`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("PARLEY_").split("__"))
}

/// Resolved runtime configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub auth_grace: Duration,
    pub outbound_queue: usize,
    pub issuer_key: Option<String>,
    pub credential_max_age_secs: Option<i64>,
}

impl ServerConfig {
    /// Resolve the runtime view; CLI host/port take priority over the file.
    pub fn from_file(fc: &FileConfig, host: Option<String>, port: Option<u16>) -> Self {
        Self {
            host: host
                .or_else(|| fc.server.host.clone())
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port: port.or(fc.server.port).unwrap_or(0),
            auth_grace: Duration::from_secs(fc.auth.grace_secs),
            outbound_queue: fc.websocket.outbound_queue,
            issuer_key: fc.auth.issuer_key.clone(),
            credential_max_age_secs: fc.auth.max_age_secs,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default(), None, None)
    }
}
