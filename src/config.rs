use anyhow::{Context, Result};
use postcode_locator_core::geodesy::DatumPreset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::sqlite_store::MAX_BATCH_SIZE;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_source_url")]
    pub source_url: String,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Globs, relative to the extracted archive root, selecting data files.
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub datum: DatumPreset,
    /// Delete postcodes absent from the latest run.
    #[serde(default)]
    pub prune_missing: bool,
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            source_url: default_source_url(),
            work_dir: default_work_dir(),
            file_patterns: default_file_patterns(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            datum: DatumPreset::default(),
            prune_missing: false,
            lock_path: None,
        }
    }
}

fn default_source_url() -> String {
    "https://api.os.uk/downloads/v1/products/CodePointOpen/downloads?area=GB&format=CSV&redirect"
        .to_string()
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("./data/ingest")
}
fn default_file_patterns() -> Vec<String> {
    vec!["Data/CSV/*.csv".to_string(), "*.csv".to_string()]
}
fn default_batch_size() -> usize {
    1000
}
fn default_timeout_secs() -> u64 {
    600
}

/// Day of month and months of the year on which scheduled updates run.
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_months")]
    pub months: Vec<u32>,
    #[serde(default = "default_day")]
    pub day: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            months: default_months(),
            day: default_day(),
        }
    }
}

fn default_months() -> Vec<u32> {
    vec![2, 5, 8, 11]
}
fn default_day() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_entries: default_max_entries(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    1440
}
fn default_max_entries() -> usize {
    10_000
}

impl Config {
    /// Lock file guarding `pcl update`; defaults to the database path with a
    /// `.lock` extension.
    pub fn lock_path(&self) -> PathBuf {
        self.ingest
            .lock_path
            .clone()
            .unwrap_or_else(|| self.db.path.with_extension("lock"))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate ingest
    if !(1..=MAX_BATCH_SIZE).contains(&config.ingest.batch_size) {
        anyhow::bail!("ingest.batch_size must be in [1, {}]", MAX_BATCH_SIZE);
    }
    if config.ingest.timeout_secs == 0 {
        anyhow::bail!("ingest.timeout_secs must be > 0");
    }
    if config.ingest.file_patterns.is_empty() {
        anyhow::bail!("ingest.file_patterns must not be empty");
    }

    // Validate schedule
    if config.schedule.months.is_empty() {
        anyhow::bail!("schedule.months must not be empty");
    }
    if let Some(month) = config
        .schedule
        .months
        .iter()
        .find(|m| !(1..=12).contains(*m))
    {
        anyhow::bail!("schedule.months contains invalid month {}", month);
    }
    if !(1..=28).contains(&config.schedule.day) {
        anyhow::bail!("schedule.day must be in [1, 28]");
    }

    if config.cache.max_entries == 0 {
        anyhow::bail!("cache.max_entries must be > 0");
    }

    Ok(config)
}
