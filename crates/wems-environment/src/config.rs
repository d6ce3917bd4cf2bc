// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for wems-environment.

use std::path::PathBuf;
use std::time::Duration;

/// Environment configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL for the job/process/service store, or `memory`.
    pub database_url: String,
    /// Data directory holding per-job working directories.
    pub data_dir: PathBuf,
    /// Directory of package files deployed at start-up.
    pub process_dir: Option<PathBuf>,
    /// Interval between remote status checks.
    pub poll_interval: Duration,
    /// Upper bound on total remote monitoring time.
    pub max_poll_duration: Duration,
    /// Overall job wall-clock ceiling.
    pub job_timeout: Duration,
    /// Per-call timeout for remote HTTP requests.
    pub http_timeout: Duration,
    /// Retries for idempotent remote reads.
    pub http_retries: u32,
    /// Container CLI (`docker` or `podman`).
    pub container_runtime: String,
    /// Stale-job monitor poll interval.
    pub stale_check_interval: Duration,
    /// Maximum wait for synchronous submissions.
    pub sync_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:.data/wems.db?mode=rwc".to_string(),
            data_dir: PathBuf::from(".data"),
            process_dir: None,
            poll_interval: Duration::from_millis(2000),
            max_poll_duration: Duration::from_secs(86_400),
            job_timeout: Duration::from_secs(3600),
            http_timeout: Duration::from_secs(30),
            http_retries: 3,
            container_runtime: "docker".to_string(),
            stale_check_interval: Duration::from_secs(60),
            sync_wait: Duration::from_secs(20),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let number = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| ConfigError::Invalid(var, format!("'{}': {}", raw, e))),
            }
        };

        let container_runtime = lookup("WEMS_CONTAINER_RUNTIME")
            .unwrap_or_else(|| defaults.container_runtime.clone());
        if !matches!(container_runtime.as_str(), "docker" | "podman") {
            return Err(ConfigError::Invalid(
                "WEMS_CONTAINER_RUNTIME",
                format!("'{}' is not docker or podman", container_runtime),
            ));
        }

        let poll_interval_ms = number("WEMS_POLL_INTERVAL_MS", 2000)?;
        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "WEMS_POLL_INTERVAL_MS",
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            database_url: lookup("WEMS_DATABASE_URL").unwrap_or(defaults.database_url),
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            process_dir: lookup("WEMS_PROCESS_DIR")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_poll_duration: Duration::from_secs(number("WEMS_MAX_POLL_DURATION_SECS", 86_400)?),
            job_timeout: Duration::from_secs(number("WEMS_JOB_TIMEOUT_SECS", 3600)?),
            http_timeout: Duration::from_secs(number("WEMS_HTTP_TIMEOUT_SECS", 30)?),
            http_retries: number("WEMS_HTTP_RETRIES", 3)? as u32,
            container_runtime,
            stale_check_interval: Duration::from_secs(number("WEMS_STALE_CHECK_INTERVAL_SECS", 60)?),
            sync_wait: Duration::from_secs(number("WEMS_SYNC_WAIT_SECS", 20)?),
        })
    }

    /// Whether the in-memory repository was requested.
    pub fn uses_memory_store(&self) -> bool {
        self.database_url == "memory"
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable holds a value that cannot be used.
    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, "sqlite:.data/wems.db?mode=rwc");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.job_timeout, Duration::from_secs(3600));
        assert_eq!(config.http_retries, 3);
        assert_eq!(config.container_runtime, "docker");
        assert!(config.process_dir.is_none());
        assert!(!config.uses_memory_store());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("WEMS_DATABASE_URL", "memory"),
            ("WEMS_POLL_INTERVAL_MS", "50"),
            ("WEMS_CONTAINER_RUNTIME", "podman"),
            ("WEMS_PROCESS_DIR", "/etc/wems/processes"),
        ]))
        .unwrap();
        assert!(config.uses_memory_store());
        assert_eq!(config.poll_interval, Duration::from_millis(50));
        assert_eq!(config.container_runtime, "podman");
        assert_eq!(config.process_dir, Some(PathBuf::from("/etc/wems/processes")));
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[("WEMS_JOB_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(err.to_string().contains("WEMS_JOB_TIMEOUT_SECS"));

        assert!(Config::from_lookup(lookup(&[("WEMS_POLL_INTERVAL_MS", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("WEMS_CONTAINER_RUNTIME", "lxc")])).is_err());
    }
}
