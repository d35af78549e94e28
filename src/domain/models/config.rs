use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for capture-sentinel
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Attempt registry sizing
    #[serde(default)]
    pub engine: EngineConfig,

    /// Canonical stabilization retry policy
    #[serde(default)]
    pub stabilization: StabilizationConfig,

    /// Readiness gate policy
    #[serde(default)]
    pub gate: GateConfig,

    /// Cross-tab probe lease configuration
    #[serde(default)]
    pub lease: LeaseConfig,

    /// Diagnostic event rate limiting
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,

    /// Authoritative snapshot fetcher
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Database configuration (shared lease store)
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Attempt registry sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Maximum tracked attempts before oldest-first eviction
    #[serde(default = "default_attempt_capacity")]
    pub attempt_capacity: usize,

    /// Maximum alias forwarding entries
    #[serde(default = "default_alias_capacity")]
    pub alias_capacity: usize,

    /// Maximum tracked conversation capture slots
    #[serde(default = "default_conversation_capacity")]
    pub conversation_capacity: usize,
}

const fn default_attempt_capacity() -> usize {
    64
}

const fn default_alias_capacity() -> usize {
    256
}

const fn default_conversation_capacity() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attempt_capacity: default_attempt_capacity(),
            alias_capacity: default_alias_capacity(),
            conversation_capacity: default_conversation_capacity(),
        }
    }
}

/// Canonical stabilization retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StabilizationConfig {
    /// Delay before the first authoritative fetch after completion
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Fixed interval between fetch attempts
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Maximum fetch attempts per generation attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_initial_delay_ms() -> u64 {
    1_200
}

const fn default_retry_interval_ms() -> u64 {
    2_500
}

const fn default_max_retries() -> u32 {
    6
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl StabilizationConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

/// Readiness gate policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GateConfig {
    /// Upper bound on time spent awaiting a canonical snapshot
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

const fn default_max_wait_ms() -> u64 {
    30_000
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

impl GateConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

/// Lease store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseBackend {
    /// Process-local map; engines in one process share it
    Memory,
    /// SQLite database file shared across processes
    Sqlite,
}

/// Cross-tab probe lease configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LeaseConfig {
    /// Lease time-to-live
    #[serde(default = "default_lease_ttl_ms")]
    pub ttl_ms: u64,

    /// Extra wait after a contended lease's expiry before retrying
    #[serde(default = "default_retry_grace_ms")]
    pub retry_grace_ms: u64,

    /// Which shared store backs the lease
    #[serde(default = "default_lease_backend")]
    pub backend: LeaseBackend,
}

const fn default_lease_ttl_ms() -> u64 {
    5_000
}

const fn default_retry_grace_ms() -> u64 {
    250
}

const fn default_lease_backend() -> LeaseBackend {
    LeaseBackend::Memory
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_lease_ttl_ms(),
            retry_grace_ms: default_retry_grace_ms(),
            backend: default_lease_backend(),
        }
    }
}

impl LeaseConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn retry_grace(&self) -> Duration {
        Duration::from_millis(self.retry_grace_ms)
    }
}

/// Diagnostic event rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DiagnosticsConfig {
    /// At most one event per key per window; 0 disables limiting
    #[serde(default = "default_diagnostic_window_ms")]
    pub window_ms: u64,
}

const fn default_diagnostic_window_ms() -> u64 {
    15_000
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            window_ms: default_diagnostic_window_ms(),
        }
    }
}

/// Authoritative snapshot fetcher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FetcherConfig {
    /// Base URL of the conversation API; unset disables HTTP fetching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Path appended to the base URL; `{conversation_id}` is substituted
    #[serde(default = "default_path_template")]
    pub path_template: String,

    /// Request timeout
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_path_template() -> String {
    "/conversation/{conversation_id}".to_string()
}

const fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            path_template: default_path_template(),
            timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".capture/leases.db".to_string()
}

const fn default_max_connections() -> u32 {
    4
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    /// sqlx connection URL for the configured path.
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stderr only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}
