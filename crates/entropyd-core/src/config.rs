//! Environment-derived service configuration.
//!
//! Every knob has a default; the environment overrides it, and the CLI
//! overrides the environment. Integer variables that parse but violate their
//! documented lower bound are a configuration error, not a silent clamp.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default number of accumulator pools.
pub const DEFAULT_POOL_COUNT: usize = 3;
/// Default bytes into pool 0 before a reseed is considered.
pub const DEFAULT_RESEED_THRESHOLD: u64 = 64;
/// Default lower bound between consecutive reseeds.
pub const DEFAULT_MIN_RESEED_INTERVAL_MS: u64 = 100;
/// Base output chunk size in bytes; also the TRNG hash length.
pub const DEFAULT_CHUNK_SIZE: usize = 32;

/// Runtime configuration for the whole service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// HTTP listen port (`PORT`).
    pub port: u16,
    /// HTTP bind address.
    pub host: String,
    /// Storage file location (`DB_PATH`).
    pub db_path: PathBuf,
    /// Two-wire bus id for the secure element (`I2C_BUS_NUMBER`).
    pub i2c_bus_number: u8,
    /// TRNG production cadence (`HASH_INTERVAL_MS`).
    pub hash_interval: Duration,
    /// Fortuna processing cadence (`PROCESS_INTERVAL_MS`).
    pub process_interval: Duration,
    /// Capacity of the TRNG queue (`TRNG_QUEUE_SIZE`).
    pub trng_queue_size: u64,
    /// Capacity of the Fortuna queue (`FORTUNA_QUEUE_SIZE`).
    pub fortuna_queue_size: u64,
    /// Chunk multiplier for emitted Fortuna records (`AMPLIFICATION_FACTOR`).
    pub amplification_factor: u32,
    /// Fortuna records emitted per processing tick (`SEED_COUNT`).
    pub seed_count: u32,
    /// Force software TRNG mode (`FORCE_MOCK_MODE`).
    pub force_mock_mode: bool,
    /// Storage engine RAM cap in bytes (`DB_MEMORY_LIMIT`).
    pub db_memory_limit: u64,
    /// Hard TTL for stored records, unset means keep until evicted
    /// (`RETENTION_DAYS`).
    pub retention_days: Option<u32>,
    /// Number of accumulator pools.
    pub pool_count: usize,
    /// Bytes into pool 0 since the last reseed that arm the reseed trigger.
    pub reseed_threshold: u64,
    /// Lower bound between consecutive reseeds.
    pub min_reseed_interval: Duration,
    /// Base output chunk size in bytes.
    pub chunk_size: usize,
    /// TRNG records drained per Fortuna processing tick.
    pub batch_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8440,
            host: "127.0.0.1".to_string(),
            db_path: PathBuf::from("entropyd.db"),
            i2c_bus_number: 1,
            hash_interval: Duration::from_millis(1000),
            process_interval: Duration::from_millis(1000),
            trng_queue_size: 1000,
            fortuna_queue_size: 1000,
            amplification_factor: 4,
            seed_count: 1,
            force_mock_mode: false,
            db_memory_limit: 256 * 1024 * 1024,
            retention_days: None,
            pool_count: DEFAULT_POOL_COUNT,
            reseed_threshold: DEFAULT_RESEED_THRESHOLD,
            min_reseed_interval: Duration::from_millis(DEFAULT_MIN_RESEED_INTERVAL_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch_size: 100,
        }
    }
}

impl ServiceConfig {
    /// Build a configuration from the process environment on top of the
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(port) = env_u64("PORT", 1)? {
            cfg.port = u16::try_from(port)
                .map_err(|_| Error::Config(format!("PORT must fit in 16 bits, got {port}")))?;
        }
        if let Ok(path) = env::var("DB_PATH") {
            cfg.db_path = PathBuf::from(path);
        }
        if let Some(bus) = env_u64("I2C_BUS_NUMBER", 0)? {
            cfg.i2c_bus_number = u8::try_from(bus)
                .map_err(|_| Error::Config(format!("I2C_BUS_NUMBER must be 0-255, got {bus}")))?;
        }
        if let Some(ms) = env_u64("HASH_INTERVAL_MS", 1)? {
            cfg.hash_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("PROCESS_INTERVAL_MS", 1)? {
            cfg.process_interval = Duration::from_millis(ms);
        }
        if let Some(n) = env_u64("TRNG_QUEUE_SIZE", 1)? {
            cfg.trng_queue_size = n;
        }
        if let Some(n) = env_u64("FORTUNA_QUEUE_SIZE", 1)? {
            cfg.fortuna_queue_size = n;
        }
        if let Some(n) = env_u64("AMPLIFICATION_FACTOR", 1)? {
            cfg.amplification_factor = n as u32;
        }
        if let Some(n) = env_u64("SEED_COUNT", 1)? {
            cfg.seed_count = n as u32;
        }
        cfg.force_mock_mode = env_bool("FORCE_MOCK_MODE");
        if let Ok(raw) = env::var("DB_MEMORY_LIMIT") {
            cfg.db_memory_limit = parse_size(&raw).ok_or_else(|| {
                Error::Config(format!("DB_MEMORY_LIMIT must be bytes or NNN{{KB,MB,GB}}, got {raw:?}"))
            })?;
        }
        if let Some(days) = env_u64("RETENTION_DAYS", 1)? {
            cfg.retention_days = Some(days as u32);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values no deployment can run with.
    pub fn validate(&self) -> Result<()> {
        if self.pool_count < 2 {
            return Err(Error::Config(format!(
                "pool count must be at least 2, got {}",
                self.pool_count
            )));
        }
        if self.chunk_size == 0 || self.amplification_factor == 0 || self.seed_count == 0 {
            return Err(Error::Config(
                "chunk size, amplification factor and seed count must be positive".into(),
            ));
        }
        if self.trng_queue_size == 0 || self.fortuna_queue_size == 0 {
            return Err(Error::Config("queue sizes must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Read an integer environment variable. `None` when unset, `Err` on garbage
/// or a value below `min`.
fn env_u64(name: &str, min: u64) -> Result<Option<u64>> {
    match env::var(name) {
        Ok(raw) => {
            let v = raw.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("{name} must be an integer, got {raw:?}"))
            })?;
            if v < min {
                return Err(Error::Config(format!("{name} must be >= {min}, got {v}")));
            }
            Ok(Some(v))
        }
        Err(_) => Ok(None),
    }
}

/// Truthy environment flag: 1, true, yes, on (case-insensitive).
fn env_bool(name: &str) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(
            raw.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

/// Parse a size with an optional KB/MB/GB suffix into bytes.
fn parse_size(raw: &str) -> Option<u64> {
    let s = raw.trim().to_ascii_uppercase();
    let (digits, multiplier) = if let Some(p) = s.strip_suffix("GB") {
        (p, 1024 * 1024 * 1024)
    } else if let Some(p) = s.strip_suffix("MB") {
        (p, 1024 * 1024)
    } else if let Some(p) = s.strip_suffix("KB") {
        (p, 1024)
    } else {
        (s.as_str(), 1)
    };
    let n = digits.trim().parse::<u64>().ok()?;
    n.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.port, 8440);
        assert_eq!(cfg.pool_count, 3);
        assert_eq!(cfg.reseed_threshold, 64);
        assert_eq!(cfg.amplification_factor, 4);
        assert!(cfg.retention_days.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn parse_size_suffixes() {
        assert_eq!(parse_size("1024"), Some(1024));
        assert_eq!(parse_size("64KB"), Some(64 * 1024));
        assert_eq!(parse_size("256MB"), Some(256 * 1024 * 1024));
        assert_eq!(parse_size("2gb"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_size(" 8 MB "), Some(8 * 1024 * 1024));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let mut cfg = ServiceConfig::default();
        cfg.pool_count = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = ServiceConfig::default();
        cfg.amplification_factor = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ServiceConfig::default();
        cfg.trng_queue_size = 0;
        assert!(cfg.validate().is_err());
    }

    // Environment lookups share process state, so every env-touching case
    // lives in this single test.
    #[test]
    fn from_env_reads_and_rejects() {
        env::set_var("TRNG_QUEUE_SIZE", "5");
        env::set_var("AMPLIFICATION_FACTOR", "8");
        env::set_var("FORCE_MOCK_MODE", "yes");
        env::set_var("DB_MEMORY_LIMIT", "64MB");
        let cfg = ServiceConfig::from_env().unwrap();
        assert_eq!(cfg.trng_queue_size, 5);
        assert_eq!(cfg.amplification_factor, 8);
        assert!(cfg.force_mock_mode);
        assert_eq!(cfg.db_memory_limit, 64 * 1024 * 1024);

        env::set_var("HASH_INTERVAL_MS", "0");
        assert!(ServiceConfig::from_env().is_err());
        env::set_var("HASH_INTERVAL_MS", "250");
        env::set_var("PORT", "not-a-port");
        assert!(ServiceConfig::from_env().is_err());

        for name in [
            "TRNG_QUEUE_SIZE",
            "AMPLIFICATION_FACTOR",
            "FORCE_MOCK_MODE",
            "DB_MEMORY_LIMIT",
            "HASH_INTERVAL_MS",
            "PORT",
        ] {
            env::remove_var(name);
        }
    }
}
