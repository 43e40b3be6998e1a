use clap::{Args, Parser, ValueEnum};

#[derive(Clone, Debug, Default, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub store: StoreConfig,

    #[command(flatten)]
    pub pubsub: PubSubConfig,

    #[command(flatten)]
    pub auth: AuthConfig,

    #[command(flatten)]
    pub messaging: MessagingConfig,

    #[command(flatten)]
    pub notifications: NotificationConfig,

    #[command(flatten)]
    pub health: HealthConfig,

    #[command(flatten)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    #[must_use]
    pub fn load() -> Self {
        Self::parse()
    }
}

#[derive(Clone, Debug, Args)]
pub struct ServerConfig {
    /// Host to listen on
    #[arg(long, env = "PARLEY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the public API
    #[arg(long, env = "PARLEY_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Port for the management (health) API
    #[arg(long, env = "PARLEY_MGMT_PORT", default_value_t = 9090)]
    pub mgmt_port: u16,

    /// Seconds to wait for background tasks during shutdown
    #[arg(long, env = "PARLEY_SHUTDOWN_TIMEOUT_SECS", default_value_t = 5)]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 3000, mgmt_port: 9090, shutdown_timeout_secs: 5 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Debug, Args)]
pub struct StoreConfig {
    /// Which persistent store implementation to use
    #[arg(long = "store-backend", env = "PARLEY_STORE_BACKEND", value_enum, default_value_t = StoreBackend::Postgres)]
    pub backend: StoreBackend,

    /// Database connection URL (required for the postgres backend)
    #[arg(long, env = "PARLEY_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum number of pooled connections
    #[arg(long, env = "PARLEY_DB_MAX_CONNECTIONS", default_value_t = 20)]
    pub max_connections: u32,

    /// Minimum number of idle pooled connections
    #[arg(long, env = "PARLEY_DB_MIN_CONNECTIONS", default_value_t = 2)]
    pub min_connections: u32,

    /// Seconds to wait for a pooled connection
    #[arg(long, env = "PARLEY_DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 3)]
    pub acquire_timeout_secs: u64,

    /// Seconds before an idle connection is closed
    #[arg(long, env = "PARLEY_DB_IDLE_TIMEOUT_SECS", default_value_t = 600)]
    pub idle_timeout_secs: u64,

    /// Maximum lifetime of a pooled connection in seconds
    #[arg(long, env = "PARLEY_DB_MAX_LIFETIME_SECS", default_value_t = 1800)]
    pub max_lifetime_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 3,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct PubSubConfig {
    /// Redis URL for cross-node notifications; an in-process bus is used when absent
    #[arg(long = "pubsub-url", env = "PARLEY_PUBSUB_URL")]
    pub url: Option<String>,

    /// Minimum reconnect backoff in seconds
    #[arg(long, env = "PARLEY_PUBSUB_MIN_BACKOFF_SECS", default_value_t = 1)]
    pub min_backoff_secs: u64,

    /// Maximum reconnect backoff in seconds
    #[arg(long, env = "PARLEY_PUBSUB_MAX_BACKOFF_SECS", default_value_t = 30)]
    pub max_backoff_secs: u64,

    /// Capacity of each pattern's broadcast channel
    #[arg(long = "pubsub-channel-capacity", env = "PARLEY_PUBSUB_CHANNEL_CAPACITY", default_value_t = 1024)]
    pub channel_capacity: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self { url: None, min_backoff_secs: 1, max_backoff_secs: 30, channel_capacity: 1024 }
    }
}

#[derive(Clone, Debug, Args)]
pub struct AuthConfig {
    /// Shared secret used to verify identity tokens
    #[arg(long, env = "PARLEY_JWT_SECRET")]
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { jwt_secret: "test_secret".to_string() }
    }
}

#[derive(Clone, Debug, Args)]
pub struct MessagingConfig {
    /// Page size used by message listing when the caller gives none
    #[arg(long, env = "PARLEY_DEFAULT_PAGE_SIZE", default_value_t = 50)]
    pub default_page_size: i64,

    /// Largest page a caller may request
    #[arg(long, env = "PARLEY_MAX_PAGE_SIZE", default_value_t = 200)]
    pub max_page_size: i64,

    /// Maximum message length in characters after trimming
    #[arg(long, env = "PARLEY_MAX_CONTENT_CHARS", default_value_t = 4000)]
    pub max_content_chars: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self { default_page_size: 50, max_page_size: 200, max_content_chars: 4000 }
    }
}

#[derive(Clone, Debug, Args)]
pub struct NotificationConfig {
    /// Prefix of per-conversation message channels
    #[arg(long, env = "PARLEY_MESSAGE_CHANNEL_PREFIX", default_value = "parley:conversation:")]
    pub message_channel_prefix: String,

    /// Channel carrying conversation-list change signals
    #[arg(long, env = "PARLEY_DIRECTORY_CHANNEL", default_value = "parley:directory")]
    pub directory_channel: String,

    /// Capacity of each local route's broadcast channel
    #[arg(long, env = "PARLEY_ROUTE_CAPACITY", default_value_t = 64)]
    pub route_capacity: usize,

    /// How often to reclaim routes without subscribers
    #[arg(long, env = "PARLEY_GC_INTERVAL_SECS", default_value_t = 60)]
    pub gc_interval_secs: u64,

    /// Attempts to re-establish a lost upstream subscription before live handles are failed
    #[arg(long, env = "PARLEY_RESUBSCRIBE_MAX_TIMES", default_value_t = 5)]
    pub resubscribe_max_times: usize,

    /// Initial delay between re-establishment attempts
    #[arg(long, env = "PARLEY_RESUBSCRIBE_MIN_BACKOFF_MS", default_value_t = 200)]
    pub resubscribe_min_backoff_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            message_channel_prefix: "parley:conversation:".to_string(),
            directory_channel: "parley:directory".to_string(),
            route_capacity: 64,
            gc_interval_secs: 60,
            resubscribe_max_times: 5,
            resubscribe_min_backoff_ms: 200,
        }
    }
}

#[derive(Clone, Debug, Args)]
pub struct HealthConfig {
    /// Timeout for the store readiness check
    #[arg(long, env = "PARLEY_HEALTH_STORE_TIMEOUT_MS", default_value_t = 2000)]
    pub store_timeout_ms: u64,

    /// Timeout for the pub/sub readiness check
    #[arg(long, env = "PARLEY_HEALTH_PUBSUB_TIMEOUT_MS", default_value_t = 2000)]
    pub pubsub_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { store_timeout_ms: 2000, pubsub_timeout_ms: 2000 }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Args)]
pub struct TelemetryConfig {
    /// Log output format
    #[arg(long, env = "PARLEY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "PARLEY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// OTLP collector endpoint; telemetry export is disabled when absent
    #[arg(long, env = "PARLEY_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_format: LogFormat::Text, log_level: "info".to_string(), otlp_endpoint: None }
    }
}
