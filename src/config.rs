use {
    std::{env, fmt, net::SocketAddr, str::FromStr, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// `jobs` table, polled.
    Postgres,
    /// Redis broker shared by every worker process.
    Broker,
    /// In-process broker; jobs do not survive a restart.
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Broker => "broker",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "polling" => Ok(Self::Postgres),
            "broker" | "redis" => Ok(Self::Broker),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid {
                name: "QUEUE_BACKEND",
                reason: format!("expected postgres, broker or memory, got {other:?}"),
            }),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    /// Commerce store and, for the polling backend, the job table. Only the
    /// memory backend may run without it.
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub webhook_secret: String,
    pub shop_domain: String,
    pub access_token: Option<String>,
    pub backend: BackendKind,
    pub bind_addr: SocketAddr,
    /// Polling backend tick; the broker wakes on enqueue.
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
    pub job_retention: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<redacted>"))
            .field("webhook_secret", &"<redacted>")
            .field("shop_domain", &self.shop_domain)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("backend", &self.backend)
            .field("bind_addr", &self.bind_addr)
            .field("poll_interval", &self.poll_interval)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("job_retention", &self.job_retention)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let backend = match get("QUEUE_BACKEND") {
            Some(raw) => raw.parse()?,
            None => BackendKind::Postgres,
        };
        let database_url = get("DATABASE_URL");
        if backend != BackendKind::Memory && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        let redis_url = get("REDIS_URL");
        if backend == BackendKind::Broker && redis_url.is_none() {
            return Err(ConfigError::Missing("REDIS_URL"));
        }

        let bind_addr = match get("BIND_ADDR") {
            Some(raw) => raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                name: "BIND_ADDR",
                reason: e.to_string(),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 3000)),
        };

        let default_poll = match backend {
            BackendKind::Postgres => 5_000,
            BackendKind::Broker | BackendKind::Memory => 1_000,
        };
        let retention_hours = number(&get, "JOB_RETENTION_HOURS", 24)?;
        let retention_secs = retention_hours
            .checked_mul(3600)
            .ok_or_else(|| ConfigError::Invalid {
                name: "JOB_RETENTION_HOURS",
                reason: format!("{retention_hours} hours does not fit in seconds"),
            })?;

        Ok(Self {
            database_url,
            redis_url,
            webhook_secret: required("SHOPIFY_WEBHOOK_SECRET")?,
            shop_domain: required("SHOPIFY_SHOP_DOMAIN")?,
            access_token: get("SHOPIFY_ACCESS_TOKEN"),
            backend,
            bind_addr,
            poll_interval: Duration::from_millis(number(&get, "POLL_INTERVAL_MS", default_poll)?),
            shutdown_timeout: Duration::from_secs(number(&get, "SHUTDOWN_TIMEOUT_SECS", 30)?),
            job_retention: Duration::from_secs(retention_secs),
        })
    }
}

fn number(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}
