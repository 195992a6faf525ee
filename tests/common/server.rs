//! Test server lifecycle management
//!
//! Spawns the full application on a random port with in-memory stores and
//! deterministic stand-ins for the feature extractor and the transcoder, so
//! the whole ingestion pipeline runs without external programs.

use super::constants::*;
use async_trait::async_trait;
use mist_server::analysis::{ExtractedFeatures, ExtractionError, FeatureExtractor, FEATURE_NAMES};
use mist_server::catalog::SqliteCatalogStore;
use mist_server::gateway::{GatewayStore, Role, RouteRules, SqliteGatewayStore, TokenAccessGateway};
use mist_server::ingestion::{
    JobOrchestrator, OrchestratorConfig, RetryPolicy, SqliteProcessingJobStore, WorkerPool,
};
use mist_server::keys::SqliteKeyCustodian;
use mist_server::quota::{QuotaGovernor, QuotaPolicy, SqliteListeningStore};
use mist_server::server::state::ServerState;
use mist_server::server::{serve, KeyCachePolicy, ServerConfig};
use mist_server::similarity::SimilarityIndex;
use mist_server::storage::LocalObjectStore;
use mist_server::transcoder::manifest::{render_master_playlist, MediaPlaylist, Segment};
use mist_server::transcoder::{
    TranscodeError, TranscodeOutput, TranscodeRequest, Transcoder, Variant, VariantOutput,
    MASTER_PLAYLIST, VARIANT_PLAYLIST,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const SEGMENT_SECS: f64 = 10.0;
const VARIANTS: [u32; 2] = [64, 128];

/// Reads the tone frequency back from a 16-bit mono WAV by counting
/// upward zero crossings.
fn estimate_frequency(wav: &[u8]) -> Option<f64> {
    if wav.len() < 44 || &wav[0..4] != b"RIFF" || &wav[8..12] != b"WAVE" {
        return None;
    }
    let sample_rate = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]) as f64;
    let samples: Vec<i16> = wav[44..]
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    if samples.is_empty() {
        return None;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| w[0] < 0 && w[1] >= 0)
        .count();
    Some(crossings as f64 * sample_rate / samples.len() as f64)
}

fn wav_duration(wav: &[u8]) -> Option<f64> {
    if wav.len() < 44 {
        return None;
    }
    let byte_rate = u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]) as f64;
    (byte_rate > 0.0).then(|| (wav.len() - 44) as f64 / byte_rate)
}

/// Descriptors are a fixed function of the tone frequency: equal tones give
/// equal vectors, different tones point in different directions.
struct ToneExtractor;

#[async_trait]
impl FeatureExtractor for ToneExtractor {
    async fn extract(&self, source: &Path) -> Result<ExtractedFeatures, ExtractionError> {
        let bytes = tokio::fs::read(source).await?;
        let frequency = estimate_frequency(&bytes)
            .ok_or_else(|| ExtractionError::Decode("not a WAV file".to_string()))?;
        let raw: HashMap<String, Option<f64>> = FEATURE_NAMES
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = 2.0 + (frequency * (i + 1) as f64 / 97.0).sin();
                (name.to_string(), Some(value))
            })
            .collect();
        Ok(ExtractedFeatures::from_raw(&raw))
    }
}

/// Writes a real playlist tree whose segments are the source bytes XORed
/// with the track key.
struct XorTranscoder;

#[async_trait]
impl Transcoder for XorTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let source = tokio::fs::read(request.source).await?;
        let duration_sec = wav_duration(&source)
            .ok_or_else(|| TranscodeError::InvalidRequest("not a WAV file".to_string()))?;
        let key = request.key.as_bytes();
        let encrypted: Vec<u8> = source
            .iter()
            .enumerate()
            .map(|(i, b)| b ^ key[i % key.len()])
            .collect();

        let root_dir = request.work_dir.join("hls");
        let variants: Vec<Variant> = VARIANTS.iter().map(|kbps| Variant::new(*kbps)).collect();
        let segment_count = (duration_sec / SEGMENT_SECS).ceil().max(1.0) as usize;
        let chunk_len = encrypted.len().div_ceil(segment_count).max(1);

        let mut outputs = Vec::new();
        for variant in &variants {
            let dir = root_dir.join(variant.label());
            tokio::fs::create_dir_all(&dir).await?;
            let mut segments = Vec::new();
            for (index, chunk) in encrypted.chunks(chunk_len).enumerate() {
                let uri = format!("segment_{:03}.ts", index);
                tokio::fs::write(dir.join(&uri), chunk).await?;
                let remaining = duration_sec - index as f64 * SEGMENT_SECS;
                segments.push(Segment {
                    duration_sec: remaining.min(SEGMENT_SECS),
                    uri,
                });
            }
            let playlist = MediaPlaylist {
                target_duration: SEGMENT_SECS as u32,
                key_method: Some("AES-128".to_string()),
                key_uri: Some(request.key_uri.to_string()),
                segments,
                ended: true,
                ..MediaPlaylist::default()
            };
            tokio::fs::write(dir.join(VARIANT_PLAYLIST), playlist.render()).await?;
            outputs.push(VariantOutput {
                variant: *variant,
                segment_count: playlist.segments.len(),
            });
        }
        tokio::fs::write(root_dir.join(MASTER_PLAYLIST), render_master_playlist(&variants)).await?;

        Ok(TranscodeOutput {
            root_dir,
            variants: outputs,
            duration_sec,
        })
    }
}

/// Test server instance
///
/// Cancels its shutdown token on drop, stopping the HTTP server and the
/// ingestion workers.
pub struct TestServer {
    /// Base URL for HTTP requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    #[allow(dead_code)]
    pub port: u16,
    pub admin_token: String,
    pub listener_token: String,
    pub other_listener_token: String,
    pub gateway_store: Arc<SqliteGatewayStore>,
    shutdown: CancellationToken,
    _dir: TempDir,
}

impl TestServer {
    /// Spawns a server with the default quota policy and public key
    /// delivery.
    pub async fn spawn() -> Self {
        Self::spawn_with(QuotaPolicy::default(), KeyCachePolicy::Public).await
    }

    pub async fn spawn_with(quota: QuotaPolicy, key_cache_policy: KeyCachePolicy) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let media_path = dir.path().join("media");

        let catalog = Arc::new(SqliteCatalogStore::in_memory().expect("catalog store"));
        let keys = Arc::new(SqliteKeyCustodian::in_memory().expect("key store"));
        let objects = Arc::new(LocalObjectStore::new(media_path.clone(), ""));
        objects.init().await.expect("Failed to init object store");

        let orchestrator = Arc::new(JobOrchestrator::new(
            Arc::new(SqliteProcessingJobStore::in_memory().expect("job store")),
            catalog.clone(),
            keys.clone(),
            objects.clone(),
            Arc::new(ToneExtractor),
            Arc::new(XorTranscoder),
            OrchestratorConfig {
                temp_dir: dir.path().join("work"),
                retry: RetryPolicy {
                    max_retries: 1,
                    initial_backoff_secs: 0,
                    max_backoff_secs: 0,
                    backoff_multiplier: 1.0,
                },
                max_substituted_fraction: 0.25,
                api_base_url: String::new(),
            },
        ));

        let gateway_store = Arc::new(SqliteGatewayStore::in_memory().expect("gateway store"));
        let gateway = Arc::new(TokenAccessGateway::new(
            gateway_store.clone(),
            Duration::from_secs(30),
            RouteRules::new(key_cache_policy.is_gated()),
        ));
        let now = chrono::Utc::now().timestamp_millis();
        let admin_token = gateway_store
            .create_token(ADMIN_USER_ID, Role::Admin, now)
            .expect("admin token");
        let listener_token = gateway_store
            .create_token(LISTENER_USER_ID, Role::Listener, now)
            .expect("listener token");
        let other_listener_token = gateway_store
            .create_token(OTHER_LISTENER_USER_ID, Role::Listener, now)
            .expect("listener token");

        let shutdown = CancellationToken::new();
        let (job_queue, _worker_pool) =
            WorkerPool::start(orchestrator.clone(), 2, 16, shutdown.child_token());

        let state = ServerState {
            config: ServerConfig {
                media_path,
                key_cache_policy,
                trust_forwarded_for: true,
                ..ServerConfig::default()
            },
            start_time: Instant::now(),
            hash: "test".to_string(),
            catalog: catalog.clone(),
            similarity: Arc::new(SimilarityIndex::new(catalog)),
            keys,
            objects,
            orchestrator,
            job_queue,
            governor: Arc::new(QuotaGovernor::new(
                Arc::new(SqliteListeningStore::in_memory().expect("listening store")),
                quota,
            )),
            gateway,
        };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener.local_addr().expect("local addr").port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let server_token = shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = serve(listener, state, server_token).await {
                eprintln!("Test server failed: {:#}", e);
            }
        });

        let server = Self {
            base_url,
            port,
            admin_token,
            listener_token,
            other_listener_token,
            gateway_store,
            shutdown,
            _dir: dir,
        };
        server.wait_for_ready().await;
        server
    }

    /// Polls the home route until the server answers.
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");
        let start = Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
