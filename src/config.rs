//! Server configuration.
//!
//! Defaults work out of the box. A TOML file and `AZURA_*` environment
//! variables can override them, environment last:
//!
//! ```toml
//! host = "127.0.0.1"
//! cluster = true
//! workers = 4
//! request_timeout_ms = 10000
//! restart_delay_ms = 500
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Error;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Interface to bind. The port is passed to [`App::listen`](crate::App::listen).
    pub host: String,
    /// Run a supervisor that forks one worker process per CPU.
    pub cluster: bool,
    /// Worker count in cluster mode. Defaults to the number of CPUs.
    pub workers: Option<usize>,
    /// Deadline for one request, end to end. Expiry answers 504.
    pub request_timeout_ms: Option<u64>,
    /// Pause before a crashed worker is restarted.
    pub restart_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            cluster: false,
            workers: None,
            request_timeout_ms: None,
            restart_delay_ms: 1000,
        }
    }
}

impl Config {
    pub fn from_toml(source: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml(&source)
    }

    /// Defaults overlaid with `AZURA_*` environment variables.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Overlays values from `lookup` (an environment-like source).
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("AZURA_HOST") {
            self.host = host;
        }
        if let Some(cluster) = lookup("AZURA_CLUSTER") {
            self.cluster = parse_bool("AZURA_CLUSTER", &cluster)?;
        }
        if let Some(workers) = lookup("AZURA_WORKERS") {
            self.workers = Some(parse_number("AZURA_WORKERS", &workers)?);
        }
        if let Some(timeout) = lookup("AZURA_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = Some(parse_number("AZURA_REQUEST_TIMEOUT_MS", &timeout)?);
        }
        if let Some(delay) = lookup("AZURA_RESTART_DELAY_MS") {
            self.restart_delay_ms = parse_number("AZURA_RESTART_DELAY_MS", &delay)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == Some(0) {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(Error::Config("request_timeout_ms must be positive".into()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Configured worker count, else one per CPU.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, Error> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key}: expected a boolean, got `{raw}`"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, Error> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("{key}: expected a number, got `{raw}`")))
}
