//! Configuration loading and representation.
//!
//! Everything comes from `FANOUT_*` environment variables (plus the
//! conventional `DATABASE_URL`). Unset variables fall back to defaults;
//! set-but-malformed ones are an error.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use fanout_core::StaticTenantDirectory;

use crate::resilience::{CircuitBreakerConfig, IsolationConfig, RetryPolicy};
use crate::workers::{ProcessorConfig, WorkerPoolConfig};

pub const ENV_WORKERS: &str = "FANOUT_WORKERS";
pub const ENV_BATCH_SIZE: &str = "FANOUT_BATCH_SIZE";
pub const ENV_WAIT_TIME_MS: &str = "FANOUT_WAIT_TIME_MS";
pub const ENV_VISIBILITY_TIMEOUT_MS: &str = "FANOUT_VISIBILITY_TIMEOUT_MS";
pub const ENV_SHUTDOWN_TIMEOUT_MS: &str = "FANOUT_SHUTDOWN_TIMEOUT_MS";
pub const ENV_MAX_RECEIVE_COUNT: &str = "FANOUT_MAX_RECEIVE_COUNT";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "FANOUT_RETRY_MAX_ATTEMPTS";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "FANOUT_RETRY_BASE_DELAY_MS";
pub const ENV_RETRY_MAX_DELAY_MS: &str = "FANOUT_RETRY_MAX_DELAY_MS";
pub const ENV_BREAKER_THRESHOLD: &str = "FANOUT_BREAKER_THRESHOLD";
pub const ENV_BREAKER_COOL_DOWN_MS: &str = "FANOUT_BREAKER_COOL_DOWN_MS";
pub const ENV_MAX_CONCURRENCY: &str = "FANOUT_MAX_CONCURRENCY";
pub const ENV_TENANTS: &str = "FANOUT_TENANTS";
pub const ENV_HTTP_ADDR: &str = "FANOUT_HTTP_ADDR";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: invalid value {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FanoutConfig {
    pub pool: WorkerPoolConfig,
    pub max_receive_count: u32,
    pub isolation: IsolationConfig,
    /// Customer codes the static tenant directory accepts.
    pub tenants: Vec<String>,
    pub http_addr: String,
    /// Postgres execution store when set; in-memory otherwise.
    pub database_url: Option<String>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default(),
            max_receive_count: ProcessorConfig::default().max_receive_count,
            isolation: IsolationConfig::default(),
            tenants: Vec::new(),
            http_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
        }
    }
}

impl FanoutConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let pool = WorkerPoolConfig {
            workers: positive(ENV_WORKERS, get(ENV_WORKERS), defaults.pool.workers)?,
            batch_size: positive(ENV_BATCH_SIZE, get(ENV_BATCH_SIZE), defaults.pool.batch_size)?,
            wait_time: millis(ENV_WAIT_TIME_MS, get(ENV_WAIT_TIME_MS), defaults.pool.wait_time)?,
            visibility_timeout: millis(
                ENV_VISIBILITY_TIMEOUT_MS,
                get(ENV_VISIBILITY_TIMEOUT_MS),
                defaults.pool.visibility_timeout,
            )?,
            shutdown_timeout: millis(
                ENV_SHUTDOWN_TIMEOUT_MS,
                get(ENV_SHUTDOWN_TIMEOUT_MS),
                defaults.pool.shutdown_timeout,
            )?,
            ..defaults.pool
        };

        let max_receive_count = positive(
            ENV_MAX_RECEIVE_COUNT,
            get(ENV_MAX_RECEIVE_COUNT),
            defaults.max_receive_count,
        )?;

        let retry = RetryPolicy {
            max_attempts: positive(
                ENV_RETRY_MAX_ATTEMPTS,
                get(ENV_RETRY_MAX_ATTEMPTS),
                defaults.isolation.retry.max_attempts,
            )?,
            base_delay: millis(
                ENV_RETRY_BASE_DELAY_MS,
                get(ENV_RETRY_BASE_DELAY_MS),
                defaults.isolation.retry.base_delay,
            )?,
            max_delay: millis(
                ENV_RETRY_MAX_DELAY_MS,
                get(ENV_RETRY_MAX_DELAY_MS),
                defaults.isolation.retry.max_delay,
            )?,
            ..defaults.isolation.retry.clone()
        };
        if retry.max_delay < retry.base_delay {
            return Err(ConfigError::invalid(
                ENV_RETRY_MAX_DELAY_MS,
                &retry.max_delay.as_millis().to_string(),
                "must not be below the base delay",
            ));
        }

        let breaker = CircuitBreakerConfig {
            failure_threshold: positive(
                ENV_BREAKER_THRESHOLD,
                get(ENV_BREAKER_THRESHOLD),
                defaults.isolation.breaker.failure_threshold,
            )?,
            cool_down: millis(
                ENV_BREAKER_COOL_DOWN_MS,
                get(ENV_BREAKER_COOL_DOWN_MS),
                defaults.isolation.breaker.cool_down,
            )?,
            ..defaults.isolation.breaker.clone()
        };

        let isolation = IsolationConfig {
            retry,
            breaker,
            max_concurrency: positive(
                ENV_MAX_CONCURRENCY,
                get(ENV_MAX_CONCURRENCY),
                defaults.isolation.max_concurrency,
            )?,
        };

        let tenants = get(ENV_TENANTS)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            pool,
            max_receive_count,
            isolation,
            tenants,
            http_addr: get(ENV_HTTP_ADDR).unwrap_or(defaults.http_addr),
            database_url: get(ENV_DATABASE_URL),
        })
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            max_receive_count: self.max_receive_count,
            visibility_timeout: self.pool.visibility_timeout,
            ..ProcessorConfig::default()
        }
    }

    pub fn tenant_directory(&self) -> StaticTenantDirectory {
        StaticTenantDirectory::from_codes(&self.tenants)
    }
}

fn parse<T: FromStr>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::invalid(key, &v, e.to_string())),
    }
}

fn positive<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = parse(key, raw, default)?;
    if value <= T::default() {
        return Err(ConfigError::invalid(key, &value.to_string(), "must be greater than zero"));
    }
    Ok(value)
}

fn millis(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse(key, raw, default_ms).map(Duration::from_millis)
}
