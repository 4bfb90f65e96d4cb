//! Runtime configuration.
//!
//! Defaults match the behaviour of a capture taken from a stock
//! `uiautomator` dump. A TOML file may override any subset of fields, and
//! `SNAPGUARD_*` environment variables override the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Result, SnapguardError};

/// Bounds used by the snapshot checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    /// Content shorter than this cannot be a hierarchy.
    pub min_content_len: usize,
    pub min_size_bytes: usize,
    pub max_size_bytes: usize,
    /// How far into the future a capture timestamp may lie.
    pub max_future_skew_secs: u64,
    /// Below this share of passing checks a snapshot is at least `minor`.
    pub minor_pass_ratio: f64,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            min_content_len: 16,
            min_size_bytes: 100,
            max_size_bytes: 2 * 1024 * 1024,
            max_future_skew_secs: 24 * 60 * 60,
            minor_pass_ratio: 0.8,
        }
    }
}

impl ValidationLimits {
    /// Capped at a century so clock arithmetic cannot overflow.
    pub fn max_future_skew(&self) -> chrono::Duration {
        const CENTURY_SECS: u64 = 100 * 365 * 24 * 60 * 60;
        chrono::Duration::seconds(self.max_future_skew_secs.min(CENTURY_SECS) as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Upper bound for one snapshot-source lookup.
    pub lookup_timeout_ms: u64,
    /// Allow synthetic hierarchies to be generated from locators.
    pub allow_regeneration: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 2_000,
            allow_regeneration: true,
        }
    }
}

impl RecoveryConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries older than this are removed by a sweep.
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 7 * 24 * 60 * 60,
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapguardConfig {
    pub validation: ValidationLimits,
    pub recovery: RecoveryConfig,
    pub cache: CacheConfig,
}

impl SnapguardConfig {
    /// Defaults, then the optional file, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        let config = config.with_env_overrides()?;
        config.check()?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `SNAPGUARD_*` overrides read through `lookup`.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parsed(&lookup, "SNAPGUARD_MIN_XML_BYTES")? {
            self.validation.min_size_bytes = v;
        }
        if let Some(v) = parsed(&lookup, "SNAPGUARD_MAX_XML_BYTES")? {
            self.validation.max_size_bytes = v;
        }
        if let Some(v) = parsed(&lookup, "SNAPGUARD_CLOCK_SKEW_SECS")? {
            self.validation.max_future_skew_secs = v;
        }
        if let Some(v) = parsed(&lookup, "SNAPGUARD_LOOKUP_TIMEOUT_MS")? {
            self.recovery.lookup_timeout_ms = v;
        }
        if let Some(v) = lookup("SNAPGUARD_REGENERATION") {
            self.recovery.allow_regeneration = v.to_lowercase() == "true";
        }
        if let Some(v) = parsed(&lookup, "SNAPGUARD_CACHE_MAX_AGE_SECS")? {
            self.cache.max_age_secs = v;
        }
        Ok(self)
    }

    /// Reject limits that would make every snapshot fail.
    pub fn check(&self) -> Result<()> {
        let v = &self.validation;
        if v.min_size_bytes > v.max_size_bytes {
            return Err(SnapguardError::InvalidConfig(format!(
                "min_size_bytes ({}) exceeds max_size_bytes ({})",
                v.min_size_bytes, v.max_size_bytes
            )));
        }
        if !(0.0..=1.0).contains(&v.minor_pass_ratio) {
            return Err(SnapguardError::InvalidConfig(format!(
                "minor_pass_ratio must be within 0..=1, got {}",
                v.minor_pass_ratio
            )));
        }
        if self.recovery.lookup_timeout_ms == 0 {
            return Err(SnapguardError::InvalidConfig(
                "lookup_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SnapguardError::InvalidConfig(format!("{key}: invalid value '{raw}'"))),
    }
}
