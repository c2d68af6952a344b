//! Service configuration
//!
//! Loaded from an optional file (`JOBMON_CONFIG`, default `./config.json`)
//! overlaid with `JOBMON_*` environment variables; nested keys use `__`,
//! e.g. `JOBMON_RETENTION__POLICY=delete`.

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveTime;
use jobmon_lib::cache::{DEFAULT_CAPACITY_BYTES, DEFAULT_LIVE_TTL};
use jobmon_lib::cluster::ClusterConfig;
use jobmon_lib::tasks::{RetentionConfig, RetentionPolicy, Schedule};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Name of this instance in structured logs
    #[serde(default = "default_instance")]
    pub instance: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Serve finished jobs from the live backends instead of the archive
    #[serde(default)]
    pub disable_archive: bool,

    #[serde(default = "default_archive_path")]
    pub archive_path: PathBuf,

    /// Snapshot file of the job repository
    #[serde(default = "default_job_store_path")]
    pub job_store_path: PathBuf,

    #[serde(default = "default_cache_capacity")]
    pub cache_capacity_bytes: usize,

    #[serde(default = "default_live_cache_ttl")]
    pub live_cache_ttl_secs: u64,

    /// Interval of the footprint worker, e.g. "10m"
    #[serde(default = "default_footprint_interval")]
    pub footprint_interval: String,

    #[serde(default)]
    pub retention: RetentionSettings,

    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicyKind {
    #[default]
    None,
    Delete,
    Move,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionSettings {
    #[serde(default)]
    pub policy: RetentionPolicyKind,
    #[serde(default = "default_retention_age")]
    pub age_days: u32,
    #[serde(default = "default_true")]
    pub include_db: bool,
    /// Target directory of the move policy
    #[serde(default)]
    pub location: Option<PathBuf>,
    /// Local time of day, "HH:MM"
    #[serde(default = "default_retention_time")]
    pub time: String,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            policy: RetentionPolicyKind::None,
            age_days: default_retention_age(),
            include_db: true,
            location: None,
            time: default_retention_time(),
        }
    }
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "jobmon".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("./var/job-archive")
}

fn default_job_store_path() -> PathBuf {
    PathBuf::from("./var/jobs.json")
}

fn default_cache_capacity() -> usize {
    DEFAULT_CAPACITY_BYTES
}

fn default_live_cache_ttl() -> u64 {
    DEFAULT_LIVE_TTL.as_secs()
}

fn default_footprint_interval() -> String {
    "10m".to_string()
}

fn default_retention_age() -> u32 {
    30
}

fn default_retention_time() -> String {
    "04:00".to_string()
}

fn default_true() -> bool {
    true
}

impl ServiceConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("JOBMON_CONFIG").unwrap_or_else(|_| "./config.json".to_string());
        Self::from_sources(Path::new(&path), true)
    }

    /// Load configuration from `path` only
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_sources(path, false)
    }

    fn from_sources(path: &Path, with_env: bool) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from(path).required(false));
        if with_env {
            builder = builder.add_source(
                config::Environment::with_prefix("JOBMON")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let config: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.clusters.is_empty() {
            bail!("at least one cluster must be configured");
        }
        for (i, cluster) in self.clusters.iter().enumerate() {
            if self.clusters[..i].iter().any(|c| c.name == cluster.name) {
                bail!("cluster '{}' is configured twice", cluster.name);
            }
        }
        self.footprint_interval()?;
        self.retention()?;
        Ok(())
    }

    pub fn live_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.live_cache_ttl_secs)
    }

    pub fn footprint_interval(&self) -> Result<Duration> {
        parse_duration(&self.footprint_interval)
            .with_context(|| format!("Invalid footprint_interval '{}'", self.footprint_interval))
    }

    /// Retention task settings, `None` when retention is disabled
    pub fn retention(&self) -> Result<Option<(RetentionConfig, Schedule)>> {
        let settings = &self.retention;
        let policy = match settings.policy {
            RetentionPolicyKind::None => return Ok(None),
            RetentionPolicyKind::Delete => RetentionPolicy::Delete,
            RetentionPolicyKind::Move => RetentionPolicy::Move {
                location: settings
                    .location
                    .clone()
                    .ok_or_else(|| anyhow!("retention policy 'move' requires a location"))?,
            },
        };
        let at = NaiveTime::parse_from_str(&settings.time, "%H:%M")
            .with_context(|| format!("Invalid retention time '{}'", settings.time))?;

        Ok(Some((
            RetentionConfig {
                policy,
                age_days: settings.age_days,
                include_db: settings.include_db,
            },
            Schedule::DailyAt(at),
        )))
    }
}

/// Parse durations like `90s`, `10m`, `2h` or `1d`
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| anyhow!("missing unit in '{}'", raw))?;
    let (value, unit) = raw.split_at(split);
    let value: u64 = value
        .parse()
        .with_context(|| format!("invalid number in '{}'", raw))?;

    let factor: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        other => bail!("unknown duration unit '{}'", other),
    };
    let secs = value
        .checked_mul(factor)
        .ok_or_else(|| anyhow!("duration '{}' is too large", raw))?;
    if secs == 0 {
        bail!("duration must be positive");
    }
    Ok(Duration::from_secs(secs))
}
