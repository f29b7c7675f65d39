//! Configuration types for task-relay

use crate::error::{Error, Result};
use clap::Parser;
use clap::builder::BoolishValueParser;
use serde::{Deserialize, Serialize};
use std::{ffi::OsString, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};
use utoipa::ToSchema;

/// Prefix of every environment variable read by [`Config::load`]
pub const ENV_PREFIX: &str = "TASK_RELAY_";

/// Main configuration shared by the proxy and requester processes
///
/// Each process only reads the sub-configs it needs: the proxy uses
/// `persistence`, `queue` and `api.bind_address`; the requester uses
/// everything except `api.bind_address`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct Config {
    /// Worker pool and outbound HTTP settings
    #[serde(default)]
    pub requester: RequesterConfig,

    /// Queue transport settings
    #[serde(default)]
    pub queue: QueueConfig,

    /// Task store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// HTTP surfaces of both processes
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging output
    #[serde(default)]
    pub log: LogConfig,
}

/// Worker pool and dispatch configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RequesterConfig {
    /// Number of tasks executed concurrently (default: 10)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per outbound request, floored to 1 (default: 3)
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Timeout for a single outbound attempt (default: 30 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub http_timeout: Duration,

    /// Capacity of the channel between the subscription and the pool (default: `workers`)
    #[serde(default)]
    pub handoff_capacity: Option<usize>,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            retry_count: default_retry_count(),
            http_timeout: default_http_timeout(),
            handoff_capacity: None,
        }
    }
}

impl RequesterConfig {
    /// Attempt budget actually used by the dispatcher
    pub fn attempts(&self) -> u32 {
        self.retry_count.max(1)
    }

    /// Effective handoff channel capacity
    pub fn handoff_capacity(&self) -> usize {
        self.handoff_capacity.unwrap_or(self.workers).max(1)
    }
}

/// Queue transport configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueConfig {
    /// Name of the queue task messages are published to (default: "tasks")
    #[serde(default = "default_queue_name")]
    pub name: String,

    /// SQLite database holding the queue table (default: "./task-relay.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Delay between polls when the queue is empty (default: 200 ms)
    #[serde(default = "default_poll_interval", with = "duration_millis_serde")]
    pub poll_interval: Duration,

    /// Messages claimed per poll (default: the worker count)
    #[serde(default)]
    pub prefetch: Option<usize>,

    /// Claimed messages not acknowledged within this window are redelivered (default: 60 seconds)
    #[serde(default = "default_visibility_timeout", with = "duration_serde")]
    pub visibility_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_queue_name(),
            database_path: default_database_path(),
            poll_interval: default_poll_interval(),
            prefetch: None,
            visibility_timeout: default_visibility_timeout(),
        }
    }
}

/// Task store configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PersistenceConfig {
    /// SQLite database holding task records (default: "./task-relay.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// REST API configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiConfig {
    /// Proxy API address (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Requester health/metrics address (default: 127.0.0.1:9090)
    #[serde(default = "default_metrics_bind_address")]
    pub metrics_bind_address: SocketAddr,

    /// Enable CORS for browser access (default: true)
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// Allowed CORS origins (default: ["*"])
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    /// Enable Swagger UI at /swagger-ui (default: true)
    #[serde(default = "default_true")]
    pub swagger_ui: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_bind_address: default_metrics_bind_address(),
            cors_enabled: true,
            cors_origins: default_cors_origins(),
            swagger_ui: true,
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable compact lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(Error::Config {
                message: format!("unknown log format '{other}', expected 'text' or 'json'"),
                key: Some("log.format".into()),
            }),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct LogConfig {
    /// Default filter directive when RUST_LOG is unset (default: "info")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (default: text)
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from command-line flags and `TASK_RELAY_*`
    /// environment variables on top of the defaults
    ///
    /// Prints usage and exits the process on `--help`, `--version` or
    /// malformed input, like any clap binary.
    pub fn load() -> Result<Self> {
        ConfigArgs::parse().into_config()
    }

    /// Like [`load`](Self::load) but over explicit arguments, returning
    /// parse failures instead of exiting
    ///
    /// `args` starts with the program name. Environment variables still apply.
    pub fn try_parse_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        ConfigArgs::try_parse_from(args)
            .map_err(|e| Error::Config {
                message: e.to_string(),
                key: None,
            })?
            .into_config()
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        fn invalid(message: &str, key: &str) -> Error {
            Error::Config {
                message: message.to_string(),
                key: Some(key.to_string()),
            }
        }

        if self.requester.workers == 0 {
            return Err(invalid("worker count must be at least 1", "requester.workers"));
        }
        if self.requester.http_timeout.is_zero() {
            return Err(invalid("HTTP timeout must be greater than zero", "requester.http_timeout"));
        }
        if self.requester.handoff_capacity == Some(0) {
            return Err(invalid("handoff capacity must be at least 1", "requester.handoff_capacity"));
        }
        if self.queue.name.trim().is_empty() {
            return Err(invalid("queue name must not be empty", "queue.name"));
        }
        if self.queue.poll_interval.is_zero() {
            return Err(invalid("poll interval must be greater than zero", "queue.poll_interval"));
        }
        if self.queue.visibility_timeout.is_zero() {
            return Err(invalid(
                "visibility timeout must be greater than zero",
                "queue.visibility_timeout",
            ));
        }
        if self.queue.prefetch == Some(0) {
            return Err(invalid("prefetch must be at least 1", "queue.prefetch"));
        }
        Ok(())
    }

    /// Messages the queue subscription claims per poll
    pub fn prefetch(&self) -> usize {
        self.queue.prefetch.unwrap_or(self.requester.workers).max(1)
    }
}

/// Command-line flags of both binaries, each also settable through its
/// `TASK_RELAY_*` variable
///
/// Anything left unset keeps the [`Config`] default.
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about = "Asynchronous HTTP-proxying task pipeline", long_about = None)]
pub struct ConfigArgs {
    /// Number of tasks executed concurrently
    #[arg(long, env = "TASK_RELAY_REQUESTER_WORKERS")]
    pub requester_workers: Option<usize>,

    /// Attempts per outbound request
    #[arg(long, env = "TASK_RELAY_REQUESTER_RETRY_COUNT")]
    pub requester_retry_count: Option<u32>,

    /// Timeout for a single outbound attempt, in seconds
    #[arg(long, env = "TASK_RELAY_REQUESTER_HTTP_TIMEOUT_SECS")]
    pub requester_http_timeout_secs: Option<u64>,

    /// Capacity of the channel between the subscription and the pool
    #[arg(long, env = "TASK_RELAY_REQUESTER_HANDOFF_CAPACITY")]
    pub requester_handoff_capacity: Option<usize>,

    /// Queue task messages are published to
    #[arg(long, env = "TASK_RELAY_QUEUE_NAME")]
    pub queue_name: Option<String>,

    /// SQLite file backing the queue
    #[arg(long, env = "TASK_RELAY_QUEUE_DATABASE_PATH")]
    pub queue_database_path: Option<PathBuf>,

    /// Delay between polls of an empty queue, in milliseconds
    #[arg(long, env = "TASK_RELAY_QUEUE_POLL_INTERVAL_MS")]
    pub queue_poll_interval_ms: Option<u64>,

    /// Messages claimed per poll
    #[arg(long, env = "TASK_RELAY_QUEUE_PREFETCH")]
    pub queue_prefetch: Option<usize>,

    /// Seconds before an unacknowledged claim is redelivered
    #[arg(long, env = "TASK_RELAY_QUEUE_VISIBILITY_TIMEOUT_SECS")]
    pub queue_visibility_timeout_secs: Option<u64>,

    /// SQLite file backing the task store
    #[arg(long, env = "TASK_RELAY_DATABASE_PATH")]
    pub database_path: Option<PathBuf>,

    /// Listen address of the proxy's task API
    #[arg(long, env = "TASK_RELAY_API_BIND_ADDRESS")]
    pub api_bind_address: Option<SocketAddr>,

    /// Listen address of the requester's monitoring API
    #[arg(long, env = "TASK_RELAY_API_METRICS_BIND_ADDRESS")]
    pub api_metrics_bind_address: Option<SocketAddr>,

    /// Enable CORS
    #[arg(long, env = "TASK_RELAY_API_CORS_ENABLED", value_parser = BoolishValueParser::new())]
    pub api_cors_enabled: Option<bool>,

    /// Allowed CORS origins, comma separated
    #[arg(long, env = "TASK_RELAY_API_CORS_ORIGINS", value_delimiter = ',')]
    pub api_cors_origins: Option<Vec<String>>,

    /// Serve Swagger UI
    #[arg(long, env = "TASK_RELAY_API_SWAGGER_UI", value_parser = BoolishValueParser::new())]
    pub api_swagger_ui: Option<bool>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "TASK_RELAY_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log output format: text or json
    #[arg(long, env = "TASK_RELAY_LOG_FORMAT")]
    pub log_format: Option<String>,
}

impl ConfigArgs {
    /// Overlay every value that was given on `config`
    pub fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(workers) = self.requester_workers {
            config.requester.workers = workers;
        }
        if let Some(retry_count) = self.requester_retry_count {
            config.requester.retry_count = retry_count;
        }
        if let Some(secs) = self.requester_http_timeout_secs {
            config.requester.http_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = self.requester_handoff_capacity {
            config.requester.handoff_capacity = Some(capacity);
        }

        if let Some(name) = self.queue_name {
            config.queue.name = name;
        }
        if let Some(path) = self.queue_database_path {
            config.queue.database_path = path;
        }
        if let Some(millis) = self.queue_poll_interval_ms {
            config.queue.poll_interval = Duration::from_millis(millis);
        }
        if let Some(prefetch) = self.queue_prefetch {
            config.queue.prefetch = Some(prefetch);
        }
        if let Some(secs) = self.queue_visibility_timeout_secs {
            config.queue.visibility_timeout = Duration::from_secs(secs);
        }

        if let Some(path) = self.database_path {
            config.persistence.database_path = path;
        }

        if let Some(address) = self.api_bind_address {
            config.api.bind_address = address;
        }
        if let Some(address) = self.api_metrics_bind_address {
            config.api.metrics_bind_address = address;
        }
        if let Some(enabled) = self.api_cors_enabled {
            config.api.cors_enabled = enabled;
        }
        if let Some(origins) = self.api_cors_origins {
            config.api.cors_origins = origins
                .into_iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(enabled) = self.api_swagger_ui {
            config.api.swagger_ui = enabled;
        }

        if let Some(level) = self.log_level {
            config.log.level = level;
        }
        if let Some(format) = self.log_format {
            config.log.format = format.parse()?;
        }

        Ok(())
    }

    /// Build a [`Config`] from the defaults plus these values
    pub fn into_config(self) -> Result<Config> {
        let mut config = Config::default();
        self.apply(&mut config)?;
        Ok(config)
    }
}

fn default_workers() -> usize {
    10
}

fn default_retry_count() -> u32 {
    3
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_name() -> String {
    "tasks".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./task-relay.db")
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_visibility_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_metrics_bind_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn parse(flags: &[&str]) -> Result<Config> {
        Config::try_parse_from(std::iter::once("task-relay").chain(flags.iter().copied()))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.requester.workers, 10);
        assert_eq!(config.requester.attempts(), 3);
        assert_eq!(config.requester.http_timeout, Duration::from_secs(30));
        assert_eq!(config.requester.handoff_capacity(), 10);
        assert_eq!(config.prefetch(), 10);
        assert_eq!(config.log.format, LogFormat::Text);
    }

    #[test]
    fn test_empty_json_object_deserializes_to_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.queue.name, "tasks");
        assert_eq!(config.queue.poll_interval, Duration::from_millis(200));
        assert_eq!(config.api.bind_address, default_bind_address());
    }

    #[test]
    fn test_durations_serialize_in_their_named_units() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["requester"]["http_timeout"], 30);
        assert_eq!(json["queue"]["poll_interval"], 200);
        assert_eq!(json["queue"]["visibility_timeout"], 60);
    }

    #[test]
    fn test_retry_count_zero_is_floored_to_one_attempt() {
        let config = RequesterConfig {
            retry_count: 0,
            ..Default::default()
        };
        assert_eq!(config.attempts(), 1);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = parse(&[
            "--requester-workers", "4",
            "--requester-retry-count", "5",
            "--requester-http-timeout-secs", "7",
            "--queue-poll-interval-ms", "50",
            "--queue-prefetch", "2",
            "--api-bind-address", "0.0.0.0:3000",
            "--api-cors-enabled", "no",
            "--api-cors-origins", "http://a.test, http://b.test",
            "--log-format", "JSON",
        ])
        .unwrap();

        assert_eq!(config.requester.workers, 4);
        assert_eq!(config.requester.retry_count, 5);
        assert_eq!(config.requester.http_timeout, Duration::from_secs(7));
        assert_eq!(config.queue.poll_interval, Duration::from_millis(50));
        assert_eq!(config.prefetch(), 2);
        assert_eq!(config.requester.handoff_capacity(), 4, "follows workers");
        assert_eq!(config.api.bind_address.port(), 3000);
        assert!(!config.api.cors_enabled);
        assert_eq!(config.api.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(config.log.format, LogFormat::Json);
    }

    #[test]
    fn test_every_flag_has_a_prefixed_env_variable() {
        use clap::CommandFactory;

        let command = ConfigArgs::command();
        let mut envs = Vec::new();
        for arg in command.get_arguments() {
            if matches!(arg.get_id().as_str(), "help" | "version") {
                continue;
            }
            let env = arg
                .get_env()
                .unwrap_or_else(|| panic!("--{} has no env variable", arg.get_id()))
                .to_str()
                .unwrap()
                .to_string();
            let expected = format!("{ENV_PREFIX}{}", arg.get_id().as_str().to_ascii_uppercase());
            assert_eq!(env, expected);
            envs.push(env);
        }
        assert!(envs.contains(&"TASK_RELAY_REQUESTER_WORKERS".to_string()));
        assert_eq!(envs.len(), 17);
    }

    #[test]
    fn test_unparseable_value_names_the_flag() {
        let err = parse(&["--requester-workers", "many"]).unwrap_err();
        match err {
            Error::Config { message, .. } => {
                assert!(message.contains("--requester-workers"), "{message}");
                assert!(message.contains("many"), "{message}");
            }
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_log_format_is_a_config_error() {
        let err = parse(&["--log-format", "xml"]).unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "log.format"));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = Config::default();
        config.requester.workers = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config { key: Some(ref k), .. } if k == "requester.workers"));
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        let mut config = Config::default();
        config.requester.http_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.queue.visibility_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }
}
