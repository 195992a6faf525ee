use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_path: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub api_base_url: Option<String>,

    // Feature configs
    pub ingestion: Option<IngestionConfig>,
    pub extractor: Option<ExtractorConfig>,
    pub transcoder: Option<TranscoderConfig>,
    pub quota: Option<QuotaConfig>,
    pub keys: Option<KeysConfig>,
    pub gateway: Option<GatewayConfig>,
    pub background_jobs: Option<BackgroundJobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IngestionConfig {
    pub temp_dir: Option<String>,
    pub worker_count: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub max_retries: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_substituted_fraction: Option<f64>,
    pub stale_processing_threshold_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ExtractorConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
    pub sample_rate: Option<u32>,
    pub duration_secs: Option<u32>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TranscoderConfig {
    pub ffmpeg_path: Option<String>,
    pub segment_secs: Option<u32>,
    pub variants_kbps: Option<Vec<u32>>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct QuotaConfig {
    pub anonymous_daily_minutes: Option<f64>,
    pub free_daily_minutes: Option<f64>,
    /// Absent means unlimited.
    pub premium_daily_minutes: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct KeysConfig {
    /// "public" or "no-store"
    pub cache_policy: Option<String>,
    pub public_max_age_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub blocklist_refresh_secs: Option<u64>,
    pub trust_forwarded_for: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackgroundJobsConfig {
    pub block_purge_interval_secs: Option<u64>,
    pub stale_job_check_interval_secs: Option<u64>,
    pub requeue_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
