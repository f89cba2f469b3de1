//! Config loading and persistence.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::import::ImportError;
use crate::throttle::ThrottleRules;
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub limits: Limits,
    pub throttle: ThrottleRules,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            throttle: ThrottleRules::default(),
        }
    }
}

/// Pipeline tunables.
///
/// Values are intentionally explicit about their units to avoid confusion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Distinct-id cap per recursion chain.
    pub recursion_id_cap: usize,
    /// Sliding expiry of a recursion chain's seen-id set.
    pub recursion_ttl_ms: u64,

    /// Expiry of a waiter's signal list.
    pub waiter_ttl_ms: u64,
    pub waiter_poll_interval_ms: u64,

    pub queue_workers: usize,
    /// Attempt bound per queued job, first run included.
    pub max_job_attempts: u32,
    pub retry_base_delay_ms: u64,

    pub page_size: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            recursion_id_cap: 100,
            recursion_ttl_ms: 1_800_000,

            waiter_ttl_ms: 600_000,
            waiter_poll_interval_ms: 50,

            queue_workers: 4,
            max_job_attempts: 3,
            retry_base_delay_ms: 250,

            page_size: 100,
        }
    }
}

/// Base directory for configuration files.
///
/// Uses `FERRY_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/ferry-rs`
/// or `~/.config/ferry-rs`.
fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FERRY_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join("ferry-rs")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn load() -> Result<Config> {
    let path = config_path();
    let contents = fs::read_to_string(&path)
        .map_err(|e| config_error(format!("failed to read {}: {e}", path.display())))?;
    toml::from_str(&contents)
        .map_err(|e| config_error(format!("failed to parse {}: {e}", path.display())))
}

pub fn load_or_init() -> Config {
    let path = config_path();
    if path.exists() {
        match load() {
            Ok(cfg) => return cfg,
            Err(e) => {
                tracing::warn!("config load failed, using defaults: {e}");
                return Config::default();
            }
        }
    }

    let cfg = Config::default();
    if let Err(e) = write_config(&path, &cfg) {
        tracing::warn!("failed to write default config: {e}");
    }
    cfg
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .map_err(|e| config_error(format!("failed to create {}: {e}", dir.display())))?;
    }
    let contents = toml::to_string_pretty(cfg)
        .map_err(|e| config_error(format!("failed to render config: {e}")))?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| config_error("config path missing parent directory".to_string()))?;
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        config_error(format!(
            "failed to create temp file in {}: {e}",
            dir.display()
        ))
    })?;
    fs::write(temp.path(), data)
        .map_err(|e| config_error(format!("failed to write config temp file: {e}")))?;
    temp.persist(path).map_err(|e| {
        config_error(format!(
            "failed to persist config to {}: {e}",
            path.display()
        ))
    })?;
    Ok(())
}

fn config_error(reason: String) -> Error {
    Error::Import(ImportError::Validation {
        field: "config".into(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::CallerSource;

    #[test]
    fn config_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut cfg = Config::default();
        cfg.limits.queue_workers = 7;
        cfg.limits.max_job_attempts = 5;
        cfg.throttle.window_ms = 30_000;
        cfg.throttle.actions.insert("export".to_string(), 60);
        cfg.throttle
            .namespace_overrides
            .entry("acme".to_string())
            .or_default()
            .insert("export".to_string(), 10);

        write_config(&path, &cfg).expect("write config");
        let loaded = {
            let contents = fs::read_to_string(&path).expect("read config");
            toml::from_str::<Config>(&contents).expect("parse config")
        };

        assert_eq!(loaded.limits.queue_workers, 7);
        assert_eq!(loaded.limits.max_job_attempts, 5);
        assert_eq!(loaded.throttle.window_ms, 30_000);
        assert_eq!(loaded.throttle.threshold_for("acme", "export"), 10);
        assert_eq!(loaded.throttle.threshold_for("globex", "export"), 60);
    }

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.limits.recursion_id_cap, 100);
        assert_eq!(cfg.limits.recursion_ttl_ms, 1_800_000);
        assert_eq!(cfg.limits.waiter_ttl_ms, 600_000);
        assert_eq!(cfg.limits.max_job_attempts, 3);
        assert!(cfg.throttle.exempt(CallerSource::System));
        assert!(!cfg.throttle.exempt(CallerSource::Project));
    }
}
