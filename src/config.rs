/*!
 * Configuration types for Shardline
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, ShardlineError};

/// Network tier the signing service routes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Internet-facing endpoints
    Public,

    /// Internal endpoints
    #[default]
    Private,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Public => "public",
            Network::Private => "private",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = ShardlineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Network::Public),
            "private" => Ok(Network::Private),
            other => Err(ShardlineError::Config(format!(
                "unknown network tier {:?} (expected public or private)",
                other
            ))),
        }
    }
}

/// When a pull job may be satisfied by a file already on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkipPolicy {
    /// Skip when the local file length equals the expected size
    #[default]
    Size,

    /// Skip whenever the local file exists
    Exists,

    /// Always transfer
    Never,
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Engine configuration, fixed for the lifetime of an [`crate::Engine`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Dataset root holding `meta/`, `data/`, `temp/` and `logs/`
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Signing service URL
    #[serde(default)]
    pub presign_endpoint: String,

    /// Network tier passed to the signing service
    #[serde(default)]
    pub network: Network,

    /// Aggregate bandwidth cap in bytes per second (0 = unlimited)
    #[serde(default = "default_bandwidth")]
    pub bandwidth_bps: u64,

    /// Number of concurrent workers
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Total attempts per job, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff after the first failed attempt, in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Backoff ceiling, in milliseconds
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Range part size for pulls, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Skip-if-present policy for pulls
    #[serde(default)]
    pub skip_policy: SkipPolicy,

    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Idle keep-alive connections kept per host
    #[serde(default = "default_pool_idle")]
    pub pool_max_idle_per_host: usize,

    /// User-Agent header for every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Runtime worker threads (None = tokio default)
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stderr)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// Show progress bar
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            presign_endpoint: String::new(),
            network: Network::default(),
            bandwidth_bps: default_bandwidth(),
            parallel: default_parallel(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            chunk_size: default_chunk_size(),
            skip_policy: SkipPolicy::default(),
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            pool_max_idle_per_host: default_pool_idle(),
            user_agent: default_user_agent(),
            worker_threads: None,
            log_level: LogLevel::Info,
            log_file: None,
            verbose: false,
            show_progress: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_bandwidth() -> u64 {
    100 * 1024 * 1024
}

fn default_parallel() -> usize {
    200
}

fn default_max_attempts() -> u32 {
    20
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_max_ms() -> u64 {
    30_000
}

fn default_chunk_size() -> u64 {
    5 * 1024 * 1024
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    300
}

fn default_pool_idle() -> usize {
    1000
}

fn default_user_agent() -> String {
    format!("shardline/{}", env!("CARGO_PKG_VERSION"))
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ShardlineError::Config(format!("TOML encode error: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.validate_limits()?;
        validate_endpoint(&self.presign_endpoint)?;
        Ok(())
    }

    /// Checks that do not involve the presign endpoint
    pub fn validate_limits(&self) -> Result<()> {
        if self.parallel == 0 {
            return Err(ShardlineError::Config("parallel must be at least 1".to_string()));
        }
        if self.chunk_size == 0 {
            return Err(ShardlineError::Config("chunk_size must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ShardlineError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.retry_max_ms < self.retry_base_ms {
            return Err(ShardlineError::Config(format!(
                "retry_max_ms ({}) is below retry_base_ms ({})",
                self.retry_max_ms, self.retry_base_ms
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Check that a presign endpoint is an absolute http(s) URL
pub fn validate_endpoint(endpoint: &str) -> Result<url::Url> {
    if endpoint.trim().is_empty() {
        return Err(ShardlineError::Config("presign endpoint is empty".to_string()));
    }
    let parsed = url::Url::parse(endpoint)
        .map_err(|e| ShardlineError::Config(format!("malformed presign endpoint {}: {}", endpoint, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ShardlineError::Config(format!(
            "presign endpoint must be http or https, got {}",
            other
        ))),
    }
}
