use std::{net::SocketAddr, str::FromStr};

use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid bind address: {0}")]
    InvalidBindAddr(String),
    #[error("invalid tunable: {0}")]
    InvalidTunable(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub bind_addr: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// URL-safe base64 ed25519 signing key. When absent an ephemeral key is
    /// generated at startup and existing tokens stop verifying on restart.
    pub signing_key: Option<String>,
}

/// Every anti-abuse threshold as a named tunable. The defaults are a
/// starting policy, not a contract.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AbuseConfig {
    /// Token-bucket refill, tokens per second per author.
    pub rate_refill_per_sec: f64,
    /// Token-bucket burst capacity per author.
    pub rate_burst: f64,
    /// Consecutive same-author messages that trigger a sequence purge.
    pub flood_count: usize,
    /// Trailing window for the sequence rule, milliseconds.
    pub flood_window_ms: i64,
    /// Identical-fingerprint messages that trigger a duplicate purge.
    pub duplicate_count: usize,
    /// Trailing window for the duplicate rule, milliseconds.
    pub duplicate_window_ms: i64,
    /// Accepted writes per hour before the global breaker trips.
    pub hourly_limit: i64,
    /// Cap on rows fetched for one detector scan.
    pub lookback_limit: i64,
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            rate_refill_per_sec: 1.0,
            rate_burst: 5.0,
            flood_count: 10,
            flood_window_ms: 30_000,
            duplicate_count: 3,
            duplicate_window_ms: 10_000,
            hourly_limit: 1000,
            lookback_limit: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind_addr: Option<String>,
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub metrics: MetricsConfig,
    pub database_url: Option<String>,
    /// Static operator credential, compared by exact match.
    pub admin_token: Option<String>,
    /// Whether unauthenticated posts to public channels are accepted.
    pub allow_anon_public: bool,
    /// Whether `DELETE /messages/{id}?hard=true` may erase rows.
    pub hard_delete_enabled: bool,
    /// Whether the clear-channel purge endpoint is available.
    pub purge_enabled: bool,
    pub auth: AuthConfig,
    pub abuse: AbuseConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: None,
            host: "0.0.0.0".to_string(),
            port: 8080,
            log_format: LogFormat::Compact,
            metrics: MetricsConfig::default(),
            database_url: None,
            admin_token: None,
            allow_anon_public: true,
            hard_delete_enabled: false,
            purge_enabled: false,
            auth: AuthConfig::default(),
            abuse: AbuseConfig::default(),
        }
    }
}

/// Flags parsed by clap in `main.rs`; `None` keeps the configured value.
#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub bind_addr: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_format: Option<LogFormat>,
    pub metrics_enabled: Option<bool>,
    pub metrics_bind_addr: Option<String>,
    pub database_url: Option<String>,
    pub admin_token: Option<String>,
    pub allow_anon_public: Option<bool>,
    pub signing_key: Option<String>,
    pub rate_refill_per_sec: Option<f64>,
    pub rate_burst: Option<f64>,
    pub flood_count: Option<usize>,
    pub flood_window_ms: Option<i64>,
    pub duplicate_count: Option<usize>,
    pub duplicate_window_ms: Option<i64>,
    pub hourly_limit: Option<i64>,
}

impl GatewayConfig {
    const ENV_PREFIX: &'static str = "CH4TGATE";

    pub fn load() -> Result<Self, ConfigError> {
        let defaults = GatewayConfig::default();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/gateway").required(false))
            .add_source(config::File::with_name("config/gateway.local").required(false))
            .add_source(
                config::Environment::with_prefix(Self::ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("host", defaults.host.clone())?
            .set_default("port", defaults.port as i64)?
            .set_default("log_format", defaults.log_format.as_str())?
            .set_default("allow_anon_public", defaults.allow_anon_public)?
            .set_default("metrics.enabled", defaults.metrics.enabled)?;

        let settings: GatewayConfig = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) -> Result<(), ConfigError> {
        if let Some(value) = &overrides.bind_addr {
            self.bind_addr = Some(value.clone());
        }
        if let Some(value) = &overrides.host {
            self.host = value.clone();
        }
        if let Some(value) = overrides.port {
            self.port = value;
        }
        if let Some(value) = overrides.log_format {
            self.log_format = value;
        }
        if let Some(value) = overrides.metrics_enabled {
            self.metrics.enabled = value;
        }
        if let Some(value) = &overrides.metrics_bind_addr {
            self.metrics.bind_addr = Some(value.clone());
        }
        if let Some(value) = &overrides.database_url {
            self.database_url = Some(value.clone());
        }
        if let Some(value) = &overrides.admin_token {
            self.admin_token = Some(value.clone());
        }
        if let Some(value) = overrides.allow_anon_public {
            self.allow_anon_public = value;
        }
        if let Some(value) = &overrides.signing_key {
            self.auth.signing_key = Some(value.clone());
        }
        if let Some(value) = overrides.rate_refill_per_sec {
            self.abuse.rate_refill_per_sec = value;
        }
        if let Some(value) = overrides.rate_burst {
            self.abuse.rate_burst = value;
        }
        if let Some(value) = overrides.flood_count {
            self.abuse.flood_count = value;
        }
        if let Some(value) = overrides.flood_window_ms {
            self.abuse.flood_window_ms = value;
        }
        if let Some(value) = overrides.duplicate_count {
            self.abuse.duplicate_count = value;
        }
        if let Some(value) = overrides.duplicate_window_ms {
            self.abuse.duplicate_window_ms = value;
        }
        if let Some(value) = overrides.hourly_limit {
            self.abuse.hourly_limit = value;
        }
        self.validate()
    }

    /// Names of `CH4TGATE__*` environment variables currently set, for the
    /// startup log.
    pub fn environment_override_keys() -> Vec<String> {
        let prefix = format!("{}__", Self::ENV_PREFIX);
        let mut keys: Vec<String> = std::env::vars()
            .map(|(key, _)| key)
            .filter(|key| key.starts_with(&prefix))
            .collect();
        keys.sort();
        keys
    }

    pub fn listener_addr(&self) -> Result<SocketAddr, ConfigError> {
        if let Some(addr) = &self.bind_addr {
            return addr
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddr(addr.clone()));
        }

        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidBindAddr(addr))
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidBindAddr("port cannot be zero".into()));
        }
        if let Some(addr) = &self.metrics.bind_addr {
            addr.parse::<SocketAddr>()
                .map_err(|_| ConfigError::InvalidBindAddr(addr.clone()))?;
        }
        let abuse = &self.abuse;
        if abuse.rate_refill_per_sec <= 0.0 {
            return Err(ConfigError::InvalidTunable(
                "rate_refill_per_sec must be positive".into(),
            ));
        }
        if abuse.rate_burst < 1.0 {
            return Err(ConfigError::InvalidTunable(
                "rate_burst must be at least one token".into(),
            ));
        }
        if abuse.flood_count < 2 || abuse.duplicate_count < 2 {
            return Err(ConfigError::InvalidTunable(
                "purge counts below two would purge every message".into(),
            ));
        }
        if abuse.flood_window_ms <= 0 || abuse.duplicate_window_ms <= 0 {
            return Err(ConfigError::InvalidTunable(
                "detector windows must be positive".into(),
            ));
        }
        if abuse.hourly_limit <= 0 {
            return Err(ConfigError::InvalidTunable(
                "hourly_limit must be positive".into(),
            ));
        }
        if abuse.lookback_limit <= 0 {
            return Err(ConfigError::InvalidTunable(
                "lookback_limit must be positive".into(),
            ));
        }
        Ok(())
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unsupported log format '{other}'")),
        }
    }
}

impl<'de> Deserialize<'de> for LogFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        LogFormat::from_str(&value).map_err(D::Error::custom)
    }
}
