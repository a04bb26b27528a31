//! Environment-variable configuration loading (§6).

use std::env;

use thiserror::Error;

const CLIENT_HANDLER_COUNT: &str = "CLIENT_HANDLER_COUNT";
const CACHE_EXPIRED_TIME_MS: &str = "CACHE_EXPIRED_TIME_MS";
const CACHE_CAPACITY: &str = "CACHE_CAPACITY";
const TASK_QUEUE_CAPACITY: &str = "TASK_QUEUE_CAPACITY";

const DEFAULT_WORKER_COUNT: usize = 8;
const DEFAULT_TTL_MS: u64 = 60_000;
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Errors raised while loading configuration from the environment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A recognized environment variable was present but did not parse as a
    /// positive integer.
    #[error("{name} is set to {value:?}, which is not a positive integer")]
    InvalidValue { name: &'static str, value: String },
}

/// Immutable runtime configuration, loaded once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Number of thread-pool worker threads (`CLIENT_HANDLER_COUNT`).
    pub worker_count: usize,
    /// Cache entry TTL in milliseconds (`CACHE_EXPIRED_TIME_MS`).
    pub ttl_ms: u64,
    /// Number of cache buckets (`CACHE_CAPACITY`).
    pub cache_capacity: usize,
    /// Thread-pool queue capacity (`TASK_QUEUE_CAPACITY`).
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            worker_count: DEFAULT_WORKER_COUNT,
            ttl_ms: DEFAULT_TTL_MS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

fn parse_positive<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
{
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => {
            let parsed: Option<T> = value.parse().ok();
            match parsed {
                Some(v) if v != T::default() => Ok(v),
                _ => Err(ConfigError::InvalidValue { name, value }),
            }
        }
    }
}

impl Config {
    /// Loads configuration from the process environment, falling back to
    /// the documented defaults for any variable that is absent. A variable
    /// that is present but fails to parse as a positive integer is a
    /// configuration error, never a silent fallback.
    pub fn load() -> Result<Config, ConfigError> {
        Ok(Config {
            worker_count: parse_positive(CLIENT_HANDLER_COUNT, DEFAULT_WORKER_COUNT)?,
            ttl_ms: parse_positive(CACHE_EXPIRED_TIME_MS, DEFAULT_TTL_MS)?,
            cache_capacity: parse_positive(CACHE_CAPACITY, DEFAULT_CACHE_CAPACITY)?,
            queue_capacity: parse_positive(TASK_QUEUE_CAPACITY, DEFAULT_QUEUE_CAPACITY)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_all() {
        for name in [CLIENT_HANDLER_COUNT, CACHE_EXPIRED_TIME_MS, CACHE_CAPACITY, TASK_QUEUE_CAPACITY] {
            unsafe { env::remove_var(name) };
        }
    }

    #[test]
    #[serial]
    fn defaults_when_unset() {
        clear_all();
        let cfg = Config::load().unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    #[serial]
    fn reads_valid_overrides() {
        clear_all();
        unsafe {
            env::set_var(CLIENT_HANDLER_COUNT, "4");
            env::set_var(CACHE_EXPIRED_TIME_MS, "1000");
            env::set_var(CACHE_CAPACITY, "16");
            env::set_var(TASK_QUEUE_CAPACITY, "32");
        }
        let cfg = Config::load().unwrap();
        assert_eq!(
            cfg,
            Config {
                worker_count: 4,
                ttl_ms: 1000,
                cache_capacity: 16,
                queue_capacity: 32,
            }
        );
        clear_all();
    }

    #[test]
    #[serial]
    fn rejects_zero() {
        clear_all();
        unsafe { env::set_var(CLIENT_HANDLER_COUNT, "0") };
        assert!(matches!(Config::load(), Err(ConfigError::InvalidValue { .. })));
        clear_all();
    }

    #[test]
    #[serial]
    fn rejects_non_numeric() {
        clear_all();
        unsafe { env::set_var(CACHE_CAPACITY, "not-a-number") };
        assert!(matches!(Config::load(), Err(ConfigError::InvalidValue { .. })));
        clear_all();
    }
}
