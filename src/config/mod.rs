mod file_config;

pub use file_config::{
    BackgroundJobsConfig, ExtractorConfig, FileConfig, GatewayConfig, IngestionConfig,
    KeysConfig, QuotaConfig, TranscoderConfig,
};

use crate::analysis::ExtractorSettings;
use crate::quota::{QuotaLimit, QuotaPolicy};
use crate::server::{KeyCachePolicy, RequestsLoggingLevel};
use crate::transcoder::TranscoderSettings;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_path: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub api_base_url: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub extractor_program: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub media_path: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Prefix of key URIs written into playlists. Empty keeps them
    /// server-relative.
    pub api_base_url: String,

    // Feature configs (with defaults)
    pub ingestion: IngestionSettings,
    pub extractor: ExtractorSettings,
    pub transcoder: TranscoderSettings,
    pub quota: QuotaPolicy,
    pub keys: KeysSettings,
    pub gateway: GatewaySettings,
    pub background_jobs: BackgroundJobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_path = file
            .media_path
            .map(PathBuf::from)
            .or_else(|| cli.media_path.clone())
            .unwrap_or_else(|| db_dir.join("media"));

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let api_base_url = file
            .api_base_url
            .or_else(|| cli.api_base_url.clone())
            .unwrap_or_default()
            .trim_end_matches('/')
            .to_string();

        let ingestion_file = file.ingestion.unwrap_or_default();
        let ingestion_defaults = IngestionSettings::default();
        let ingestion = IngestionSettings {
            temp_dir: ingestion_file
                .temp_dir
                .map(PathBuf::from)
                .unwrap_or(ingestion_defaults.temp_dir),
            worker_count: ingestion_file
                .worker_count
                .unwrap_or(ingestion_defaults.worker_count),
            queue_capacity: ingestion_file
                .queue_capacity
                .unwrap_or(ingestion_defaults.queue_capacity),
            max_retries: ingestion_file
                .max_retries
                .unwrap_or(ingestion_defaults.max_retries),
            initial_backoff_secs: ingestion_file
                .initial_backoff_secs
                .unwrap_or(ingestion_defaults.initial_backoff_secs),
            max_backoff_secs: ingestion_file
                .max_backoff_secs
                .unwrap_or(ingestion_defaults.max_backoff_secs),
            backoff_multiplier: ingestion_file
                .backoff_multiplier
                .unwrap_or(ingestion_defaults.backoff_multiplier),
            max_substituted_fraction: ingestion_file
                .max_substituted_fraction
                .unwrap_or(ingestion_defaults.max_substituted_fraction),
            stale_processing_threshold_secs: ingestion_file
                .stale_processing_threshold_secs
                .unwrap_or(ingestion_defaults.stale_processing_threshold_secs),
        };
        if ingestion.worker_count == 0 {
            bail!("ingestion.worker_count must be at least 1");
        }
        if !(0.0..=1.0).contains(&ingestion.max_substituted_fraction) {
            bail!(
                "ingestion.max_substituted_fraction must be within 0..=1, got {}",
                ingestion.max_substituted_fraction
            );
        }

        let extractor_file = file.extractor.unwrap_or_default();
        let extractor_defaults = ExtractorSettings::default();
        let extractor = ExtractorSettings {
            program: extractor_file
                .program
                .or_else(|| cli.extractor_program.clone())
                .unwrap_or(extractor_defaults.program),
            args: extractor_file.args.unwrap_or(extractor_defaults.args),
            sample_rate: extractor_file
                .sample_rate
                .unwrap_or(extractor_defaults.sample_rate),
            duration_secs: extractor_file
                .duration_secs
                .unwrap_or(extractor_defaults.duration_secs),
            timeout: extractor_file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(extractor_defaults.timeout),
        };

        let transcoder_file = file.transcoder.unwrap_or_default();
        let transcoder_defaults = TranscoderSettings::default();
        let transcoder = TranscoderSettings {
            ffmpeg_path: transcoder_file
                .ffmpeg_path
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or(transcoder_defaults.ffmpeg_path),
            segment_secs: transcoder_file
                .segment_secs
                .unwrap_or(transcoder_defaults.segment_secs),
            variants_kbps: transcoder_file
                .variants_kbps
                .unwrap_or(transcoder_defaults.variants_kbps),
            timeout: transcoder_file
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(transcoder_defaults.timeout),
        };

        let quota_file = file.quota.unwrap_or_default();
        let quota_defaults = QuotaPolicy::default();
        let quota = QuotaPolicy {
            anonymous: quota_file
                .anonymous_daily_minutes
                .map(QuotaLimit::Limited)
                .unwrap_or(quota_defaults.anonymous),
            free: quota_file
                .free_daily_minutes
                .map(QuotaLimit::Limited)
                .unwrap_or(quota_defaults.free),
            premium: quota_file
                .premium_daily_minutes
                .map(QuotaLimit::Limited)
                .unwrap_or(QuotaLimit::Unlimited),
        };

        let keys_file = file.keys.unwrap_or_default();
        let keys = KeysSettings {
            cache_policy: match keys_file.cache_policy.as_deref() {
                None => KeyCachePolicy::Public,
                Some(s) => match KeyCachePolicy::parse(s) {
                    Some(policy) => policy,
                    None => bail!("keys.cache_policy must be \"public\" or \"no-store\", got {:?}", s),
                },
            },
            public_max_age_secs: keys_file
                .public_max_age_secs
                .unwrap_or(KeysSettings::default().public_max_age_secs),
        };

        let gateway_file = file.gateway.unwrap_or_default();
        let gateway = GatewaySettings {
            blocklist_refresh_secs: gateway_file
                .blocklist_refresh_secs
                .unwrap_or(GatewaySettings::default().blocklist_refresh_secs),
            trust_forwarded_for: gateway_file.trust_forwarded_for.unwrap_or(false),
        };

        let jobs_file = file.background_jobs.unwrap_or_default();
        let jobs_defaults = BackgroundJobsSettings::default();
        let background_jobs = BackgroundJobsSettings {
            block_purge_interval_secs: jobs_file
                .block_purge_interval_secs
                .unwrap_or(jobs_defaults.block_purge_interval_secs),
            stale_job_check_interval_secs: jobs_file
                .stale_job_check_interval_secs
                .unwrap_or(jobs_defaults.stale_job_check_interval_secs),
            requeue_interval_secs: jobs_file
                .requeue_interval_secs
                .unwrap_or(jobs_defaults.requeue_interval_secs),
        };

        Ok(Self {
            db_dir,
            media_path,
            port,
            metrics_port,
            logging_level,
            api_base_url,
            ingestion,
            extractor,
            transcoder,
            quota,
            keys,
            gateway,
            background_jobs,
        })
    }

    pub fn catalog_db_path(&self) -> PathBuf {
        self.db_dir.join("catalog.db")
    }

    pub fn keys_db_path(&self) -> PathBuf {
        self.db_dir.join("keys.db")
    }

    pub fn jobs_db_path(&self) -> PathBuf {
        self.db_dir.join("jobs.db")
    }

    pub fn listening_db_path(&self) -> PathBuf {
        self.db_dir.join("listening.db")
    }

    pub fn gateway_db_path(&self) -> PathBuf {
        self.db_dir.join("gateway.db")
    }
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub temp_dir: PathBuf,
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub max_retries: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    pub max_substituted_fraction: f64,
    pub stale_processing_threshold_secs: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir().join("mist-ingestion"),
            worker_count: 2,
            queue_capacity: 64,
            max_retries: 3,
            initial_backoff_secs: 60,
            max_backoff_secs: 60,
            backoff_multiplier: 1.0,
            max_substituted_fraction: 0.25,
            stale_processing_threshold_secs: 3600,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeysSettings {
    pub cache_policy: KeyCachePolicy,
    pub public_max_age_secs: u64,
}

impl Default for KeysSettings {
    fn default() -> Self {
        Self {
            cache_policy: KeyCachePolicy::Public,
            public_max_age_secs: 31_536_000, // one year
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub blocklist_refresh_secs: u64,
    /// Take the client address from `X-Forwarded-For` (behind a proxy).
    pub trust_forwarded_for: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            blocklist_refresh_secs: 30,
            trust_forwarded_for: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackgroundJobsSettings {
    pub block_purge_interval_secs: u64,
    pub stale_job_check_interval_secs: u64,
    /// How often `uploaded` jobs missing from the run queue are resubmitted.
    pub requeue_interval_secs: u64,
}

impl Default for BackgroundJobsSettings {
    fn default() -> Self {
        Self {
            block_purge_interval_secs: 3600,
            stale_job_check_interval_secs: 600,
            requeue_interval_secs: 60,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
