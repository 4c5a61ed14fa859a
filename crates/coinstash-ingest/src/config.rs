//! Configuration management

use sqlx::postgres::PgConnectOptions;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::connection::{RetryPolicy, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_RETRY_DELAY_SECS};
use crate::dispatch::default_worker_count;
use crate::store::statement::{TargetTable, MAX_PAGE_SIZE};
use crate::upsert::DEFAULT_PAGE_SIZE;

// ============================================================================
// Defaults
// ============================================================================

/// Default PostgreSQL port.
pub const DEFAULT_DB_PORT: u16 = 5432;

/// Default target table.
pub const DEFAULT_TABLE: &str = "crypto_price";

/// Default rows per batch.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Default CoinGecko API base URL.
pub const DEFAULT_COINGECKO_BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// Default quote currency.
pub const DEFAULT_VS_CURRENCY: &str = "usd";

/// Default number of coins requested per call.
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Default extractor request timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

const APPLICATION_NAME: &str = "coinstash-ingest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl fmt::Display) -> Self {
        ConfigError::Invalid {
            key,
            reason: reason.to_string(),
        }
    }
}

/// Immutable settings for one process, built once at startup
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub store: StoreConfig,
    pub load: LoadConfig,
    pub source: SourceConfig,
}

#[derive(Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    /// Server-side `statement_timeout`; unset leaves statements unbounded
    pub statement_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadConfig {
    pub table: TargetTable,
    pub chunk_size: NonZeroUsize,
    pub page_size: NonZeroUsize,
    pub workers: usize,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub base_url: String,
    pub vs_currency: String,
    pub per_page: u32,
    pub page: u32,
    pub timeout: Duration,
}

impl IngestConfig {
    /// Load configuration from the process environment, honouring a `.env` file
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = StoreConfig {
            host: get("DB_HOST").ok_or(ConfigError::Missing("DB_HOST"))?,
            port: parse_or(&get, "DB_PORT", DEFAULT_DB_PORT)?,
            user: get("DB_USER").ok_or(ConfigError::Missing("DB_USER"))?,
            password: lookup("DB_PASS").filter(|p| !p.is_empty()),
            database: get("DB_NAME").ok_or(ConfigError::Missing("DB_NAME"))?,
            statement_timeout: parse_opt::<u64>(&get, "ETL_STATEMENT_TIMEOUT_SECS")?
                .map(Duration::from_secs),
        };

        let load = LoadConfig {
            table: parse_or_else(&get, "ETL_TABLE", || TargetTable::parse(DEFAULT_TABLE))?,
            chunk_size: parse_or(&get, "ETL_CHUNK_SIZE", nonzero(DEFAULT_CHUNK_SIZE))?,
            page_size: parse_or(&get, "ETL_PAGE_SIZE", nonzero(DEFAULT_PAGE_SIZE))?,
            workers: parse_or_else(&get, "ETL_WORKERS", || Ok::<_, ConfigError>(default_worker_count()))?,
            retry: RetryPolicy {
                max_attempts: parse_or(&get, "ETL_CONNECT_ATTEMPTS", DEFAULT_CONNECT_ATTEMPTS)?,
                delay: Duration::from_secs(parse_or(
                    &get,
                    "ETL_CONNECT_RETRY_DELAY_SECS",
                    DEFAULT_RETRY_DELAY_SECS,
                )?),
            },
        };

        let source = SourceConfig {
            base_url: get("COINGECKO_BASE_URL")
                .unwrap_or_else(|| DEFAULT_COINGECKO_BASE_URL.to_string()),
            vs_currency: get("COINGECKO_VS_CURRENCY").unwrap_or_else(|| DEFAULT_VS_CURRENCY.to_string()),
            per_page: parse_or(&get, "COINGECKO_PER_PAGE", DEFAULT_PER_PAGE)?,
            page: parse_or(&get, "COINGECKO_PAGE", 1)?,
            timeout: Duration::from_secs(parse_or(&get, "HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?),
        };

        let config = IngestConfig {
            store,
            load,
            source,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.host.is_empty() {
            return Err(ConfigError::Missing("DB_HOST"));
        }
        if self.store.user.is_empty() {
            return Err(ConfigError::Missing("DB_USER"));
        }
        if self.store.database.is_empty() {
            return Err(ConfigError::Missing("DB_NAME"));
        }
        if self.store.port == 0 {
            return Err(ConfigError::invalid("DB_PORT", "port must be greater than 0"));
        }
        if self.store.statement_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::invalid(
                "ETL_STATEMENT_TIMEOUT_SECS",
                "timeout must be greater than 0, leave it unset to disable",
            ));
        }

        self.load.validate()?;

        if self.source.per_page == 0 {
            return Err(ConfigError::invalid("COINGECKO_PER_PAGE", "must be greater than 0"));
        }
        if self.source.page == 0 {
            return Err(ConfigError::invalid("COINGECKO_PAGE", "pages start at 1"));
        }

        Ok(())
    }

    pub fn apply(&mut self, overrides: &LoadOverrides) -> Result<(), ConfigError> {
        overrides.apply_to(&mut self.load);
        self.load.validate()
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size.get() > MAX_PAGE_SIZE {
            return Err(ConfigError::invalid(
                "ETL_PAGE_SIZE",
                format!(
                    "{} rows exceeds the {} rows that fit in one statement",
                    self.page_size, MAX_PAGE_SIZE
                ),
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("ETL_WORKERS", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("ETL_CONNECT_ATTEMPTS", "must be at least 1"));
        }
        Ok(())
    }
}

impl StoreConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database)
            .application_name(APPLICATION_NAME);

        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(timeout) = self.statement_timeout {
            options = options.options([("statement_timeout", format!("{}ms", timeout.as_millis()))]);
        }
        options
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &redact(self.password.as_deref()))
            .field("database", &self.database)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}

fn redact(password: Option<&str>) -> String {
    match password {
        Some(p) => format!("<redacted, {} chars>", p.chars().count()),
        None => "<unset>".to_string(),
    }
}

impl fmt::Display for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let store = &self.store;
        let load = &self.load;
        let source = &self.source;

        writeln!(f, "store:")?;
        writeln!(f, "  host: {}:{}", store.host, store.port)?;
        writeln!(f, "  user: {}", store.user)?;
        writeln!(f, "  password: {}", redact(store.password.as_deref()))?;
        writeln!(f, "  database: {}", store.database)?;
        match store.statement_timeout {
            Some(timeout) => writeln!(f, "  statement_timeout: {}s", timeout.as_secs())?,
            None => writeln!(f, "  statement_timeout: none")?,
        }
        writeln!(f, "load:")?;
        writeln!(f, "  table: {}", load.table)?;
        writeln!(f, "  chunk_size: {}", load.chunk_size)?;
        writeln!(f, "  page_size: {}", load.page_size)?;
        writeln!(f, "  workers: {}", load.workers)?;
        writeln!(
            f,
            "  connect_retry: {} attempts, {}s apart",
            load.retry.max_attempts,
            load.retry.delay.as_secs()
        )?;
        writeln!(f, "source:")?;
        writeln!(f, "  url: {}", source.base_url)?;
        writeln!(f, "  vs_currency: {}", source.vs_currency)?;
        writeln!(f, "  per_page: {}, page: {}", source.per_page, source.page)?;
        write!(f, "  timeout: {}s", source.timeout.as_secs())
    }
}

/// Command-line overrides for [`LoadConfig`]
#[derive(Debug, Clone, Default)]
pub struct LoadOverrides {
    pub table: Option<TargetTable>,
    pub chunk_size: Option<NonZeroUsize>,
    pub page_size: Option<NonZeroUsize>,
    pub workers: Option<usize>,
}

impl LoadOverrides {
    pub fn apply_to(&self, load: &mut LoadConfig) {
        if let Some(table) = &self.table {
            load.table = table.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            load.chunk_size = chunk_size;
        }
        if let Some(page_size) = self.page_size {
            load.page_size = page_size;
        }
        if let Some(workers) = self.workers {
            load.workers = workers;
        }
    }
}

fn nonzero(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

fn parse_opt<T>(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    get(key)
        .map(|raw| raw.parse::<T>().map_err(|e| ConfigError::invalid(key, format!("{raw:?}: {e}"))))
        .transpose()
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    Ok(parse_opt(get, key)?.unwrap_or(default))
}

fn parse_or_else<T, E>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: impl FnOnce() -> Result<T, E>,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    E: fmt::Display,
{
    match parse_opt(get, key)? {
        Some(value) => Ok(value),
        None => default().map_err(|e| ConfigError::invalid(key, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    const MINIMAL: [(&str, &str); 3] = [("DB_HOST", "db.local"), ("DB_USER", "etl"), ("DB_NAME", "market")];

    #[test]
    fn test_defaults() {
        let config = IngestConfig::from_lookup(lookup(&MINIMAL)).unwrap();

        assert_eq!(config.store.port, 5432);
        assert_eq!(config.store.password, None);
        assert_eq!(config.load.table.to_string(), "crypto_price");
        assert_eq!(config.load.chunk_size.get(), 1000);
        assert_eq!(config.load.page_size.get(), 100);
        assert_eq!(config.load.workers, default_worker_count());
        assert_eq!(config.load.retry, RetryPolicy::default());
        assert_eq!(config.source.base_url, DEFAULT_COINGECKO_BASE_URL);
        assert_eq!(config.source.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_required() {
        let err = IngestConfig::from_lookup(lookup(&[("DB_HOST", "db"), ("DB_NAME", "m")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DB_USER"));
    }

    #[test]
    fn test_overrides_from_lookup() {
        let mut pairs = MINIMAL.to_vec();
        pairs.extend([
            ("DB_PASS", "s3cret"),
            ("ETL_TABLE", "market.prices"),
            ("ETL_CHUNK_SIZE", "250"),
            ("ETL_WORKERS", "8"),
            ("ETL_CONNECT_ATTEMPTS", "3"),
            ("ETL_STATEMENT_TIMEOUT_SECS", "15"),
        ]);

        let config = IngestConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.store.password.as_deref(), Some("s3cret"));
        assert_eq!(config.load.table.qualified(), "\"market\".\"prices\"");
        assert_eq!(config.load.chunk_size.get(), 250);
        assert_eq!(config.load.workers, 8);
        assert_eq!(config.load.retry.max_attempts, 3);
        assert_eq!(config.store.statement_timeout, Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_invalid_values() {
        for (key, value) in [
            ("ETL_CHUNK_SIZE", "0"),
            ("ETL_PAGE_SIZE", "9000"),
            ("ETL_WORKERS", "0"),
            ("ETL_WORKERS", "many"),
            ("ETL_TABLE", "prices; drop"),
            ("DB_PORT", "70000"),
            ("ETL_STATEMENT_TIMEOUT_SECS", "0"),
        ] {
            let mut pairs = MINIMAL.to_vec();
            pairs.push((key, value));
            let err = IngestConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: k, .. } if k == key),
                "{key}={value} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_password_is_redacted() {
        let mut pairs = MINIMAL.to_vec();
        pairs.push(("DB_PASS", "hunter22"));
        let config = IngestConfig::from_lookup(lookup(&pairs)).unwrap();

        let debug = format!("{:?}", config);
        let display = config.to_string();
        assert!(!debug.contains("hunter22"));
        assert!(!display.contains("hunter22"));
        assert!(display.contains("<redacted, 8 chars>"));
    }

    #[test]
    fn test_cli_overrides_are_validated() {
        let mut config = IngestConfig::from_lookup(lookup(&MINIMAL)).unwrap();

        config
            .apply(&LoadOverrides {
                chunk_size: NonZeroUsize::new(10),
                workers: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.load.chunk_size.get(), 10);
        assert_eq!(config.load.workers, 3);

        let err = config
            .apply(&LoadOverrides {
                page_size: NonZeroUsize::new(10_000),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "ETL_PAGE_SIZE", .. }));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::set_var("DB_HOST", "env-host");
        std::env::set_var("DB_USER", "env-user");
        std::env::set_var("DB_NAME", "env-db");
        std::env::set_var("ETL_PAGE_SIZE", "50");

        let config = IngestConfig::from_env();

        for key in ["DB_HOST", "DB_USER", "DB_NAME", "ETL_PAGE_SIZE"] {
            std::env::remove_var(key);
        }

        let config = config.unwrap();
        assert_eq!(config.store.host, "env-host");
        assert_eq!(config.load.page_size.get(), 50);
    }
}
