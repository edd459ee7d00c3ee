use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum ConfigError {
    #[error("invalid COMPANION_HTTP_MAX_CONC: {0}")]
    InvalidConcurrency(String),
    #[error("invalid COMPANION_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid COMPANION_BIND: {0}")]
    InvalidBind(String),
    #[error("invalid {key}: {value}")]
    InvalidSeconds { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpConfig {
    pub addr: SocketAddr,
    pub concurrency_limit: usize,
}

/// Filesystem roots the server reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PathsConfig {
    pub content_dir: PathBuf,
    pub resource_dir: PathBuf,
    pub license_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServerConfig {
    pub http: HttpConfig,
    pub paths: PathsConfig,
    /// Shut down after this long without in-flight requests. `None` runs forever.
    pub inactivity_timeout: Option<Duration>,
    pub source_cache_ttl: Duration,
    pub watch_interval: Duration,
}

impl ServerConfig {
    pub(crate) fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let concurrency_limit = get("COMPANION_HTTP_MAX_CONC")
            .map(|raw| raw.parse().map_err(|_| ConfigError::InvalidConcurrency(raw)))
            .transpose()?
            .unwrap_or(1024);

        let bind = get("COMPANION_BIND").unwrap_or_else(|| "127.0.0.1".into());
        let port_raw = get("COMPANION_PORT").unwrap_or_else(|| "1110".into());
        let port: u16 = port_raw
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port_raw))?;
        let addr = format!("{}:{}", bind, port)
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind.clone()))?;

        let path = |key: &str, default: &str| PathBuf::from(get(key).unwrap_or_else(|| default.into()));
        let paths = PathsConfig {
            content_dir: path("COMPANION_CONTENT_DIR", "./content"),
            resource_dir: path("COMPANION_RESOURCE_DIR", "./resources"),
            license_dir: path("COMPANION_LICENSE_DIR", "./licenses"),
        };

        let seconds = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match get(key) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidSeconds { key, value: raw }),
            }
        };
        let inactivity = seconds("COMPANION_INACTIVITY_TIMEOUT_SECS", 0)?;
        let cache_ttl = seconds("COMPANION_SOURCE_CACHE_TTL_SECS", 300)?;
        let watch = seconds("COMPANION_WATCH_INTERVAL_SECS", 3)?;

        Ok(Self {
            http: HttpConfig {
                addr,
                concurrency_limit,
            },
            paths,
            inactivity_timeout: (inactivity > 0).then(|| Duration::from_secs(inactivity)),
            source_cache_ttl: Duration::from_secs(cache_ttl),
            watch_interval: Duration::from_secs(watch.max(1)),
        })
    }
}
