use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mist_server::analysis::CommandFeatureExtractor;
use mist_server::background_jobs::jobs::{
    BlockedIpCleanupJob, StaleJobReaperJob, UploadedJobRequeueJob,
};
use mist_server::background_jobs::JobScheduler;
use mist_server::catalog::{CatalogStore, SqliteCatalogStore, TrackStatus};
use mist_server::config::{self, AppConfig};
use mist_server::gateway::{GatewayStore, Role, RouteRules, SqliteGatewayStore, TokenAccessGateway};
use mist_server::ingestion::{
    JobOrchestrator, OrchestratorConfig, SqliteProcessingJobStore, WorkerPool,
};
use mist_server::keys::SqliteKeyCustodian;
use mist_server::quota::{QuotaGovernor, SqliteListeningStore};
use mist_server::server::state::ServerState;
use mist_server::server::{metrics, run_metrics_server, run_server, RequestsLoggingLevel, ServerConfig};
use mist_server::similarity::SimilarityIndex;
use mist_server::storage::LocalObjectStore;
use mist_server::transcoder::FfmpegHlsTranscoder;

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::parse(s).ok_or_else(|| format!("Unknown role '{}' (listener, premium, admin)", s))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing database files (catalog.db, keys.db, jobs.db, ...).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// Root of uploaded and published media. Defaults to `<db_dir>/media`.
    #[clap(long, value_parser = parse_path)]
    pub media_path: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Public base URL, used for absolute key URIs in playlists.
    #[clap(long)]
    pub api_base_url: Option<String>,

    /// Path of the ffmpeg binary used for transcoding.
    #[clap(long)]
    pub ffmpeg_path: Option<String>,

    /// Program computing audio descriptors.
    #[clap(long)]
    pub extractor_program: Option<String>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default).
    Serve,
    /// Mint an API token for a user and print it.
    IssueToken {
        #[clap(long)]
        user_id: i64,
        #[clap(long, value_parser = parse_role, default_value = "listener")]
        role: Role,
    },
    /// Revoke an API token.
    RevokeToken { token: String },
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            media_path: args.media_path.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            api_base_url: args.api_base_url.clone(),
            ffmpeg_path: args.ffmpeg_path.clone(),
            extractor_program: args.extractor_program.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    match &cli_args.command {
        Some(Command::IssueToken { user_id, role }) => issue_token(&app_config, *user_id, *role),
        Some(Command::RevokeToken { token }) => revoke_token(&app_config, token),
        Some(Command::Serve) | None => serve(app_config).await,
    }
}

fn issue_token(app_config: &AppConfig, user_id: i64, role: Role) -> Result<()> {
    let store = SqliteGatewayStore::open(&app_config.gateway_db_path())?;
    let token = store.create_token(user_id, role, Utc::now().timestamp_millis())?;
    info!("Issued {} token for user {}", role.as_str(), user_id);
    println!("{}", token);
    Ok(())
}

fn revoke_token(app_config: &AppConfig, token: &str) -> Result<()> {
    let store = SqliteGatewayStore::open(&app_config.gateway_db_path())?;
    if store.revoke_token(token)? {
        info!("Token revoked");
    } else {
        error!("Token not found");
    }
    Ok(())
}

async fn serve(app_config: AppConfig) -> Result<()> {
    info!("Configuration:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  media_path: {:?}", app_config.media_path);
    info!("  port: {}", app_config.port);
    info!("  key cache policy: {:?}", app_config.keys.cache_policy);

    info!("Initializing metrics...");
    metrics::init_metrics();

    let catalog = Arc::new(SqliteCatalogStore::open(&app_config.catalog_db_path())?);
    for status in [
        TrackStatus::Processing,
        TrackStatus::Completed,
        TrackStatus::Failed,
    ] {
        metrics::set_catalog_tracks(status.as_str(), catalog.count_tracks(status)?);
    }
    let keys = Arc::new(SqliteKeyCustodian::open(&app_config.keys_db_path())?);
    let jobs = Arc::new(SqliteProcessingJobStore::open(&app_config.jobs_db_path())?);
    let listening = Arc::new(SqliteListeningStore::open(&app_config.listening_db_path())?);
    let gateway_store = Arc::new(SqliteGatewayStore::open(&app_config.gateway_db_path())?);

    let objects = Arc::new(LocalObjectStore::new(
        app_config.media_path.clone(),
        app_config.api_base_url.clone(),
    ));
    objects.init().await?;
    tokio::fs::create_dir_all(&app_config.ingestion.temp_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create ingestion temp dir {:?}",
                app_config.ingestion.temp_dir
            )
        })?;

    let orchestrator = Arc::new(JobOrchestrator::new(
        jobs,
        catalog.clone(),
        keys.clone(),
        objects.clone(),
        Arc::new(CommandFeatureExtractor::new(app_config.extractor.clone())),
        Arc::new(FfmpegHlsTranscoder::new(app_config.transcoder.clone())),
        OrchestratorConfig::from_settings(&app_config.ingestion, &app_config.api_base_url),
    ));

    let gateway = Arc::new(TokenAccessGateway::new(
        gateway_store,
        Duration::from_secs(app_config.gateway.blocklist_refresh_secs),
        RouteRules::new(app_config.keys.cache_policy.is_gated()),
    ));

    let shutdown_token = CancellationToken::new();

    let (job_queue, worker_pool) = WorkerPool::start(
        orchestrator.clone(),
        app_config.ingestion.worker_count,
        app_config.ingestion.queue_capacity,
        shutdown_token.child_token(),
    );

    let mut scheduler = JobScheduler::new(shutdown_token.child_token());
    scheduler.register_job(Arc::new(BlockedIpCleanupJob::new(
        gateway.clone(),
        Duration::from_secs(app_config.background_jobs.block_purge_interval_secs),
    )));
    scheduler.register_job(Arc::new(StaleJobReaperJob::new(
        orchestrator.clone(),
        Duration::from_secs(app_config.ingestion.stale_processing_threshold_secs),
        Duration::from_secs(app_config.background_jobs.stale_job_check_interval_secs),
    )));
    scheduler.register_job(Arc::new(UploadedJobRequeueJob::new(
        orchestrator.clone(),
        job_queue.clone(),
        Duration::from_secs(app_config.background_jobs.requeue_interval_secs),
    )));
    info!(
        "Job scheduler initialized with {} job(s)",
        scheduler.job_count()
    );

    let state = ServerState {
        config: ServerConfig {
            requests_logging_level: app_config.logging_level.clone(),
            port: app_config.port,
            media_path: app_config.media_path.clone(),
            api_base_url: app_config.api_base_url.clone(),
            key_cache_policy: app_config.keys.cache_policy,
            key_max_age_secs: app_config.keys.public_max_age_secs,
            trust_forwarded_for: app_config.gateway.trust_forwarded_for,
        },
        start_time: Instant::now(),
        hash: env!("GIT_HASH").to_string(),
        catalog: catalog.clone(),
        similarity: Arc::new(SimilarityIndex::new(catalog)),
        keys,
        objects,
        orchestrator,
        job_queue,
        governor: Arc::new(QuotaGovernor::new(listening, app_config.quota.clone())),
        gateway,
    };

    let metrics_token = shutdown_token.child_token();
    let metrics_port = app_config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_port, metrics_token).await {
            error!("Metrics server failed: {:#}", e);
        }
    });

    info!("Ready to serve at port {}!", app_config.port);
    info!("Metrics available at port {}!", app_config.metrics_port);

    let result = tokio::select! {
        result = run_server(state, shutdown_token.child_token()) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = scheduler.run() => {
            info!("Scheduler stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            Ok(())
        }
    };

    shutdown_token.cancel();
    worker_pool.shutdown().await;
    result
}
