use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TICK_SECS: u64 = 60;
pub const DEFAULT_CATCH_UP_DELAY_SECS: u64 = 3;
pub const DEFAULT_MAX_CONCURRENT_DISPATCH: usize = 4;
pub const DEFAULT_POLL_RETENTION_HOURS: u64 = 24;
pub const DEFAULT_POLL_CLEANUP_SECS: u64 = 3600;
pub const DEFAULT_POLL_HISTORY: usize = 200;

/// Top-level config (herald.toml + HERALD_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub polls: PollsConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Bearer token required on the control routes. `None` leaves them open.
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which zone `daily` / `weekly` wall-clock times are interpreted in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ZoneMode {
    #[default]
    Local,
    Utc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between reconciliation passes.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Delay before the catch-up pass that follows process start.
    #[serde(default = "default_catch_up_delay_secs")]
    pub catch_up_delay_secs: u64,
    /// Upper bound on dispatch calls in flight within one pass.
    #[serde(default = "default_max_concurrent_dispatch")]
    pub max_concurrent_dispatch: usize,
    #[serde(default)]
    pub zone: ZoneMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: DEFAULT_TICK_SECS,
            catch_up_delay_secs: DEFAULT_CATCH_UP_DELAY_SECS,
            max_concurrent_dispatch: DEFAULT_MAX_CONCURRENT_DISPATCH,
            zone: ZoneMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollsConfig {
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Maximum number of tally snapshots kept for `GET /poll-history`.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

impl Default for PollsConfig {
    fn default() -> Self {
        Self {
            retention_hours: DEFAULT_POLL_RETENTION_HOURS,
            cleanup_interval_secs: DEFAULT_POLL_CLEANUP_SECS,
            max_history: DEFAULT_POLL_HISTORY,
        }
    }
}

/// HTTP sidecar that owns the live messaging session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_url")]
    pub base_url: String,
    /// Sent as `Authorization: Bearer` on every bridge call when set.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_status_poll_secs")]
    pub status_poll_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            token: None,
            status_poll_secs: default_status_poll_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Inbound event ingress (`POST /events/*`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventsConfig {
    /// HMAC-SHA256 secret for `X-Herald-Signature-256`. `None` disables verification.
    #[serde(default)]
    pub secret: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_tick_secs() -> u64 {
    DEFAULT_TICK_SECS
}
fn default_catch_up_delay_secs() -> u64 {
    DEFAULT_CATCH_UP_DELAY_SECS
}
fn default_max_concurrent_dispatch() -> usize {
    DEFAULT_MAX_CONCURRENT_DISPATCH
}
fn default_retention_hours() -> u64 {
    DEFAULT_POLL_RETENTION_HOURS
}
fn default_cleanup_interval_secs() -> u64 {
    DEFAULT_POLL_CLEANUP_SECS
}
fn default_max_history() -> usize {
    DEFAULT_POLL_HISTORY
}
fn default_bridge_url() -> String {
    "http://127.0.0.1:3100".to_string()
}
fn default_status_poll_secs() -> u64 {
    5
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.herald/herald.db", home)
}

impl HeraldConfig {
    /// Load config from a TOML file with HERALD_* env var overrides.
    ///
    /// Nested keys use a double underscore: `HERALD_SCHEDULER__TICK_SECS=30`.
    /// A missing file is not an error; every section has defaults.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Figment::from(Serialized::defaults(HeraldConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("HERALD_").split("__"))
            .extract()
            .map_err(|e| crate::error::HeraldError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.herald/herald.toml", home)
}
