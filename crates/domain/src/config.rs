//! Environment-driven configuration shared by the API binary and the store
//! adapters.

use std::{
    env,
    fmt,
    net::IpAddr,
    num::ParseIntError,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use strum_macros::{AsRefStr, EnumString};
use thiserror::Error;

use crate::credentials::{CredentialChain, LiteralSecret, SecretFile};
use crate::rate_limit::{MemoryWindowCounter, PolicyError, RateLimitPolicy};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_REDIS_HOST: &str = "counter-redis-master";
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Connect timeout applied when dialing the backing store.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Timeout applied to every individual store command.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Which implementation backs a storage concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Peers whose `X-Forwarded-For` header is believed when deriving the
/// client identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustedProxies {
    All,
    Only(Vec<IpAddr>),
}

impl TrustedProxies {
    pub fn trusts(&self, peer: &IpAddr) -> bool {
        match self {
            TrustedProxies::All => true,
            TrustedProxies::Only(peers) => peers.contains(peer),
        }
    }

    fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed == "*" {
            return Ok(TrustedProxies::All);
        }
        trimmed
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry.parse::<IpAddr>().map_err(|err| ConfigError::InvalidValue {
                    key: "FORWARDED_ALLOW_IPS",
                    value: entry.to_string(),
                    reason: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(TrustedProxies::Only)
    }
}

/// Connection settings for the backing key-value store.
#[derive(Clone, PartialEq, Eq)]
pub struct StoreConfig {
    host: String,
    port: u16,
    db: i64,
    password_file: Option<PathBuf>,
    password: Option<String>,
    connect_timeout: Duration,
    operation_timeout: Duration,
}

impl StoreConfig {
    pub fn new(host: impl Into<String>, port: u16, db: i64) -> Self {
        Self {
            host: host.into(),
            port,
            db,
            password_file: None,
            password: None,
            connect_timeout: CONNECT_TIMEOUT,
            operation_timeout: OPERATION_TIMEOUT,
        }
    }

    /// Reads `REDIS_*` variables. Does not hydrate `.env`; callers go through
    /// [`ApiConfig::load_from_env`] for that.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new(
            get_optional_var("REDIS_HOST").unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
            parse_var("REDIS_PORT", DEFAULT_REDIS_PORT)?,
            parse_var("REDIS_DB", 0_i64)?,
        );
        config.password_file = get_optional_var("REDIS_PASSWORD_FILE").map(PathBuf::from);
        config.password = get_optional_var("REDIS_PASSWORD");
        Ok(config)
    }

    pub fn with_password_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.password_file = Some(path.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, operation: Duration) -> Self {
        self.connect_timeout = connect;
        self.operation_timeout = operation;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn db(&self) -> i64 {
        self.db
    }

    pub fn password_file(&self) -> Option<&Path> {
        self.password_file.as_deref()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Credential providers in precedence order: secret file, then the
    /// literal environment value.
    pub fn credential_chain(&self) -> CredentialChain {
        let mut chain = CredentialChain::new();
        if let Some(path) = &self.password_file {
            chain = chain.with(SecretFile::new(path.clone()));
        }
        chain.with(LiteralSecret::new(self.password.clone()))
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("db", &self.db)
            .field("password_file", &self.password_file)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// HTTP surface and request-path configuration for the API binary.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    bind_host: String,
    port: u16,
    workers: usize,
    backlog: u32,
    keep_alive: Duration,
    request_timeout: Duration,
    trusted_proxies: TrustedProxies,
    store_backend: StoreBackend,
    rate_limit_policy: RateLimitPolicy,
    rate_limit_storage: StoreBackend,
    rate_limit_capacity: u64,
    store: StoreConfig,
}

impl ApiConfig {
    /// Hydrates `.env` (if present) and reads every variable the API needs.
    /// Everything has a default; only malformed values are rejected.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let rate_limit_policy = match get_optional_var("RATELIMIT_DEFAULT") {
            Some(raw) => raw.parse()?,
            None => RateLimitPolicy::default(),
        };
        let trusted_proxies = match env::var("FORWARDED_ALLOW_IPS") {
            Ok(raw) => TrustedProxies::parse(&raw)?,
            Err(_) => TrustedProxies::All,
        };

        Ok(Self {
            bind_host: get_optional_var("API_BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var("PORT", DEFAULT_PORT)?,
            workers: parse_var("API_WORKERS", default_workers())?.max(1),
            backlog: parse_var("API_BACKLOG", 2048_u32)?,
            keep_alive: Duration::from_secs(parse_var("API_KEEP_ALIVE_SECS", 2_u64)?),
            request_timeout: Duration::from_secs(parse_var("API_REQUEST_TIMEOUT_SECS", 30_u64)?),
            trusted_proxies,
            store_backend: parse_backend("COUNTER_STORE")?,
            rate_limit_policy,
            rate_limit_storage: parse_backend("RATELIMIT_STORAGE")?,
            rate_limit_capacity: parse_var(
                "RATELIMIT_MEMORY_CAPACITY",
                MemoryWindowCounter::DEFAULT_CAPACITY,
            )?
            .max(1),
            store: StoreConfig::from_env()?,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn backlog(&self) -> u32 {
        self.backlog
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn trusted_proxies(&self) -> &TrustedProxies {
        &self.trusted_proxies
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.store_backend
    }

    pub fn rate_limit_policy(&self) -> &RateLimitPolicy {
        &self.rate_limit_policy
    }

    pub fn rate_limit_storage(&self) -> StoreBackend {
        self.rate_limit_storage
    }

    /// Upper bound on in-memory limiter buckets (one per client and quota).
    pub fn rate_limit_capacity(&self) -> u64 {
        self.rate_limit_capacity
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|cpus| cpus.get() * 2 + 1)
        .unwrap_or(3)
}

fn parse_backend(key: &'static str) -> Result<StoreBackend, ConfigError> {
    match get_optional_var(key) {
        Some(raw) => StoreBackend::from_str(&raw).map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw,
            reason: "expected `redis` or `memory`".to_string(),
        }),
        None => Ok(StoreBackend::Redis),
    }
}

fn parse_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr<Err = ParseIntError>,
{
    match get_optional_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { key, source }),
        None => Ok(default),
    }
}

pub(crate) fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("COUNTER_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid value `{value}` in `{key}`: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid rate limit policy: {0}")]
    RateLimit(#[from] PolicyError),
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::Quota;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "PORT",
        "API_BIND_HOST",
        "API_WORKERS",
        "API_BACKLOG",
        "API_KEEP_ALIVE_SECS",
        "API_REQUEST_TIMEOUT_SECS",
        "FORWARDED_ALLOW_IPS",
        "COUNTER_STORE",
        "RATELIMIT_DEFAULT",
        "RATELIMIT_STORAGE",
        "RATELIMIT_MEMORY_CAPACITY",
        "REDIS_HOST",
        "REDIS_PORT",
        "REDIS_DB",
        "REDIS_PASSWORD_FILE",
        "REDIS_PASSWORD",
    ];

    fn reset_env() {
        std::env::set_var("COUNTER_SKIP_DOTENV", "1");
        for key in VARS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_match_the_deployment_contract() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();

        let config = ApiConfig::load_from_env().expect("config loads");
        assert_eq!(config.port(), 8000);
        assert_eq!(config.bind_address(), "0.0.0.0:8000");
        assert_eq!(config.backlog(), 2048);
        assert_eq!(config.keep_alive(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.workers() >= 1);
        assert_eq!(config.trusted_proxies(), &TrustedProxies::All);
        assert_eq!(config.store_backend(), StoreBackend::Redis);
        assert_eq!(config.rate_limit_storage(), StoreBackend::Redis);
        assert_eq!(config.rate_limit_capacity(), 100_000);
        assert_eq!(
            config.rate_limit_policy().quotas(),
            &[Quota::per_minute(100), Quota::per_second(10)]
        );

        let store = config.store();
        assert_eq!(store.host(), "counter-redis-master");
        assert_eq!(store.port(), 6379);
        assert_eq!(store.db(), 0);
        assert_eq!(store.connect_timeout(), Duration::from_secs(5));
        assert_eq!(store.operation_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn reads_overrides_from_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        std::env::set_var("PORT", "9000");
        std::env::set_var("API_WORKERS", "4");
        std::env::set_var("REDIS_HOST", " redis.local ");
        std::env::set_var("REDIS_PORT", "6380");
        std::env::set_var("REDIS_DB", "3");
        std::env::set_var("COUNTER_STORE", "Memory");
        std::env::set_var("RATELIMIT_DEFAULT", "5/second");
        std::env::set_var("FORWARDED_ALLOW_IPS", "10.0.0.1, 10.0.0.2");
        std::env::set_var("RATELIMIT_MEMORY_CAPACITY", "250000");

        let config = ApiConfig::load_from_env().expect("config loads");
        assert_eq!(config.port(), 9000);
        assert_eq!(config.workers(), 4);
        assert_eq!(config.store().host(), "redis.local");
        assert_eq!(config.store().port(), 6380);
        assert_eq!(config.store().db(), 3);
        assert_eq!(config.store_backend(), StoreBackend::Memory);
        assert_eq!(config.rate_limit_policy().quotas(), &[Quota::per_second(5)]);
        assert_eq!(config.rate_limit_capacity(), 250_000);
        assert!(config.trusted_proxies().trusts(&"10.0.0.2".parse().unwrap()));
        assert!(!config.trusted_proxies().trusts(&"10.0.0.3".parse().unwrap()));

        reset_env();
    }

    #[test]
    fn empty_forwarded_allow_ips_trusts_nobody() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        std::env::set_var("FORWARDED_ALLOW_IPS", "");

        let config = ApiConfig::load_from_env().expect("config loads");
        assert_eq!(config.trusted_proxies(), &TrustedProxies::Only(Vec::new()));

        reset_env();
    }

    #[test]
    fn malformed_values_are_rejected() {
        let _guard = ENV_GUARD.lock().unwrap();
        reset_env();
        std::env::set_var("REDIS_PORT", "not-a-port");
        let err = ApiConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "REDIS_PORT",
                ..
            }
        ));

        reset_env();
        std::env::set_var("COUNTER_STORE", "postgres");
        let err = ApiConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "COUNTER_STORE",
                ..
            }
        ));

        reset_env();
        std::env::set_var("RATELIMIT_MEMORY_CAPACITY", "-1");
        let err = ApiConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                key: "RATELIMIT_MEMORY_CAPACITY",
                ..
            }
        ));

        reset_env();
        std::env::set_var("RATELIMIT_DEFAULT", "lots per fortnight");
        let err = ApiConfig::load_from_env().unwrap_err();
        assert!(matches!(err, ConfigError::RateLimit(_)));

        reset_env();
    }

    #[test]
    fn timeouts_can_be_shortened() {
        let config = StoreConfig::new("localhost", 6379, 0)
            .with_timeouts(Duration::from_millis(200), Duration::from_millis(300));
        assert_eq!(config.connect_timeout(), Duration::from_millis(200));
        assert_eq!(config.operation_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn debug_output_redacts_password() {
        let config = StoreConfig::new("localhost", 6379, 0).with_password("hunter2");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
