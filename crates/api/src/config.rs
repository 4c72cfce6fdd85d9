//! Application configuration loaded from environment variables.

use std::time::Duration;

use common::{Money, ProductId};
use domain::MAX_LINE_ITEMS;
use saga::RetryPolicy;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid SEED_STOCK entry '{0}': expected PRODUCT=QUANTITY")]
    InvalidSeed(String),

    #[error(
        "Reservation TTL of {ttl:?} must exceed the worst-case saga duration of {worst_case:?}"
    )]
    ReservationTtlTooShort { ttl: Duration, worst_case: Duration },

    #[error("Saga retry settings overflow the worst-case saga duration")]
    RetryPolicyOverflow,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json`
/// - `DATABASE_URL`: PostgreSQL order store; unset keeps orders in memory
/// - `SAGA_MAX_ATTEMPTS`, `SAGA_STEP_TIMEOUT_MS`, `SAGA_BACKOFF_BASE_MS`,
///   `SAGA_BACKOFF_MAX_MS`: coordinator retry policy
/// - `RESERVATION_TTL_SECS`, `SWEEP_INTERVAL_SECS`: ledger expiry
/// - `PAYMENT_MAX_AMOUNT_CENTS`: authorizer limit
/// - `SEED_STOCK`: initial stock, e.g. `SKU-1=10,SKU-2=5`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub retry: RetryPolicy,
    pub reservation_ttl: Duration,
    pub sweep_interval: Duration,
    pub payment_max_amount: Money,
    pub seed_stock: Vec<(ProductId, u32)>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let parsed = |name: &str| lookup(name).and_then(|v| v.trim().parse::<u64>().ok());
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_attempts: parsed("SAGA_MAX_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|&v| v > 0)
                .unwrap_or(defaults.retry.max_attempts),
            step_timeout: parsed("SAGA_STEP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.step_timeout),
            base_backoff: parsed("SAGA_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_backoff),
            max_backoff: parsed("SAGA_BACKOFF_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_backoff),
        };

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            retry,
            reservation_ttl: parsed("RESERVATION_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reservation_ttl),
            sweep_interval: parsed("SWEEP_INTERVAL_SECS")
                .filter(|&v| v > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            payment_max_amount: parsed("PAYMENT_MAX_AMOUNT_CENTS")
                .and_then(|v| i64::try_from(v).ok())
                .map(Money::from_cents)
                .unwrap_or(defaults.payment_max_amount),
            seed_stock: match lookup("SEED_STOCK") {
                Some(raw) => parse_seed_stock(&raw)?,
                None => Vec::new(),
            },
        })
    }

    /// Checks that held stock outlives any saga that may still commit it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let worst_case = self.worst_case_saga()?;
        if self.reservation_ttl <= worst_case {
            return Err(ConfigError::ReservationTtlTooShort {
                ttl: self.reservation_ttl,
                worst_case,
            });
        }
        Ok(())
    }

    /// Worst-case time from the first reserve to the capture: one bounded
    /// reserve call per line item, then authorize and capture, each
    /// exhausting its attempts.
    pub fn worst_case_saga(&self) -> Result<Duration, ConfigError> {
        let calls =
            u32::try_from(MAX_LINE_ITEMS + 2).map_err(|_| ConfigError::RetryPolicyOverflow)?;
        self.retry
            .worst_case_step()
            .and_then(|step| step.checked_mul(calls))
            .ok_or(ConfigError::RetryPolicyOverflow)
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            retry: RetryPolicy::default(),
            reservation_ttl: Duration::from_secs(7200),
            sweep_interval: Duration::from_secs(30),
            payment_max_amount: Money::from_cents(1_000_000),
            seed_stock: Vec::new(),
        }
    }
}

/// Parses `SKU-1=10,SKU-2=5`.
fn parse_seed_stock(raw: &str) -> Result<Vec<(ProductId, u32)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (product, quantity) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidSeed(entry.to_string()))?;
            let product = product.trim();
            let quantity = quantity
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidSeed(entry.to_string()))?;
            if product.is_empty() {
                return Err(ConfigError::InvalidSeed(entry.to_string()));
            }
            Ok((ProductId::new(product), quantity))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.database_url, None);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.reservation_ttl, Duration::from_secs(7200));
        assert!(config.seed_stock.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("LOG_FORMAT", "json"),
            ("DATABASE_URL", "postgres://localhost/orders"),
            ("SAGA_MAX_ATTEMPTS", "3"),
            ("SAGA_STEP_TIMEOUT_MS", "500"),
            ("PAYMENT_MAX_AMOUNT_CENTS", "2500"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/orders")
        );
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.step_timeout, Duration::from_millis(500));
        assert_eq!(config.payment_max_amount, Money::from_cents(2500));
    }

    #[test]
    fn test_unparsable_numbers_fall_back() {
        let config =
            Config::from_lookup(lookup(&[("PORT", "eighty"), ("SAGA_MAX_ATTEMPTS", "0")])).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_seed_stock() {
        let config = Config::from_lookup(lookup(&[("SEED_STOCK", "SKU-1=10, SKU-2=5,")])).unwrap();
        assert_eq!(
            config.seed_stock,
            vec![(ProductId::new("SKU-1"), 10), (ProductId::new("SKU-2"), 5)]
        );

        let err = Config::from_lookup(lookup(&[("SEED_STOCK", "SKU-1")])).unwrap_err();
        assert_eq!(err, ConfigError::InvalidSeed("SKU-1".to_string()));
        assert!(Config::from_lookup(lookup(&[("SEED_STOCK", "=4")])).is_err());
    }

    #[test]
    fn test_short_ttl_rejected() {
        let config = Config::from_lookup(lookup(&[("RESERVATION_TTL_SECS", "60")])).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ReservationTtlTooShort { .. })
        ));
        // default policy: 5 × (2 × 2s + 5s) per call, 100 reserves plus
        // authorize and capture
        assert_eq!(config.worst_case_saga(), Ok(Duration::from_secs(4590)));
    }

    #[test]
    fn test_ttl_covering_three_calls_is_not_enough() {
        // Long enough for reserve, authorize and capture of a one-item
        // order, but not for an order at the line item limit.
        let config = Config::from_lookup(lookup(&[("RESERVATION_TTL_SECS", "200")])).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ReservationTtlTooShort { worst_case, .. })
                if worst_case == Duration::from_secs(4590)
        ));
    }

    #[test]
    fn test_huge_retry_settings_rejected() {
        let config = Config::from_lookup(lookup(&[(
            "SAGA_STEP_TIMEOUT_MS",
            &u64::MAX.to_string(),
        )]))
        .unwrap();
        assert_eq!(config.validate(), Err(ConfigError::RetryPolicyOverflow));
        assert_eq!(config.worst_case_saga(), Err(ConfigError::RetryPolicyOverflow));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }
}
