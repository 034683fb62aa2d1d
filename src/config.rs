//! Pipeline configuration.
//!
//! Loaded from a YAML file or built from defaults; every timing knob is
//! expressed in plain integer fields so config files stay readable.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::validate::{ValidationOptions, DEFAULT_MAX_PATH_LENGTH};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on simultaneously running analyses.
    pub concurrency: usize,
    /// Per-analysis budget in milliseconds; absent means unbounded.
    pub task_timeout_ms: Option<u64>,
    /// Capacity of the analysis result cache.
    pub cache_max_entries: usize,
    /// TTL for finished analyses.
    pub cache_ttl_secs: u64,
    /// TTL callers should apply when caching search results.
    pub search_cache_ttl_secs: u64,
    /// Age after which a wedged in-flight request is swept.
    pub dedup_max_age_secs: u64,
    /// Sweep cadence.
    pub dedup_sweep_secs: u64,
    pub validation: ValidationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            task_timeout_ms: None,
            cache_max_entries: 256,
            cache_ttl_secs: 3600,
            search_cache_ttl_secs: 600,
            dedup_max_age_secs: 300,
            dedup_sweep_secs: 60,
            validation: ValidationConfig::default(),
        }
    }
}

/// Validation knobs, mirrored into [`ValidationOptions`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub check_existence: bool,
    pub check_permissions: bool,
    pub security_checks: bool,
    pub base_path: Option<PathBuf>,
    pub stat_timeout_ms: u64,
    pub allow_symlinks: bool,
    pub max_path_length: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            check_existence: true,
            check_permissions: false,
            security_checks: true,
            base_path: None,
            stat_timeout_ms: 5000,
            allow_symlinks: true,
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
        }
    }
}

impl PipelineConfig {
    /// Parse configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.cache_max_entries == 0 {
            anyhow::bail!("cache_max_entries must be at least 1");
        }
        if self.dedup_sweep_secs == 0 {
            anyhow::bail!("dedup_sweep_secs must be at least 1");
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache_max_entries,
            default_ttl: Duration::from_secs(self.cache_ttl_secs),
            refresh_on_get: true,
        }
    }

    pub fn search_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.search_cache_ttl_secs)
    }

    pub fn dedup_max_age(&self) -> Duration {
        Duration::from_secs(self.dedup_max_age_secs)
    }

    pub fn dedup_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_sweep_secs)
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions {
            check_existence: self.validation.check_existence,
            check_permissions: self.validation.check_permissions,
            security_checks: self.validation.security_checks,
            base_path: self.validation.base_path.clone(),
            timeout: Duration::from_millis(self.validation.stat_timeout_ms),
            allow_symlinks: self.validation.allow_symlinks,
            max_path_length: self.validation.max_path_length,
        }
    }
}
