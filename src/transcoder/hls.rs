//! ffmpeg backend producing AES-128 encrypted HLS renditions.

use super::key_file::KeyFileGuard;
use super::manifest::{parse_media_playlist, render_master_playlist, Variant, MASTER_PLAYLIST};
use super::{TranscodeError, TranscodeOutput, TranscodeRequest, Transcoder, VariantOutput};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TranscoderSettings {
    pub ffmpeg_path: String,
    /// Target segment length in seconds.
    pub segment_secs: u32,
    pub variants_kbps: Vec<u32>,
    /// Budget for each ffmpeg invocation.
    pub timeout: Duration,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            segment_secs: 10,
            variants_kbps: vec![64, 128, 192],
            timeout: Duration::from_secs(600),
        }
    }
}

/// Runs one ffmpeg per variant, all sharing the track key.
pub struct FfmpegHlsTranscoder {
    settings: TranscoderSettings,
}

impl FfmpegHlsTranscoder {
    pub fn new(settings: TranscoderSettings) -> Self {
        Self { settings }
    }

    fn variants(&self) -> Result<Vec<Variant>, TranscodeError> {
        if self.settings.variants_kbps.is_empty() {
            return Err(TranscodeError::InvalidRequest(
                "no variants configured".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        let mut variants = Vec::with_capacity(self.settings.variants_kbps.len());
        for &kbps in &self.settings.variants_kbps {
            if kbps == 0 || !seen.insert(kbps) {
                return Err(TranscodeError::InvalidRequest(format!(
                    "invalid variant bitrate list {:?}",
                    self.settings.variants_kbps
                )));
            }
            variants.push(Variant::new(kbps));
        }
        Ok(variants)
    }

    fn build_command(
        &self,
        source: &Path,
        variant: &Variant,
        variant_dir: &Path,
        key_info: &Path,
    ) -> Command {
        let mut command = Command::new(&self.settings.ffmpeg_path);
        command
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(source)
            .args(["-vn", "-map", "0:a:0", "-c:a", "aac", "-b:a"])
            .arg(variant.label())
            .args(["-f", "hls", "-start_number", "0", "-hls_time"])
            .arg(self.settings.segment_secs.to_string())
            .args([
                "-hls_playlist_type",
                "vod",
                "-hls_flags",
                "independent_segments",
                "-hls_key_info_file",
            ])
            .arg(key_info)
            .arg("-hls_segment_filename")
            .arg(variant_dir.join("segment_%03d.ts"))
            .arg(variant_dir.join(super::VARIANT_PLAYLIST))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Encodes one variant and checks what ffmpeg left behind. Returns the
    /// variant summary and its total duration.
    async fn render_variant(
        &self,
        request: &TranscodeRequest<'_>,
        variant: &Variant,
        root_dir: &Path,
        key_info: &Path,
    ) -> Result<(VariantOutput, f64), TranscodeError> {
        let variant_dir = root_dir.join(variant.label());
        fs::create_dir_all(&variant_dir).await?;

        let mut command = self.build_command(request.source, variant, &variant_dir, key_info);
        debug!(
            "Transcoding track {} variant {}",
            request.track_id,
            variant.label()
        );

        let output = tokio::time::timeout(self.settings.timeout, command.output())
            .await
            .map_err(|_| TranscodeError::Timeout(self.settings.timeout))??;

        if !output.status.success() {
            return Err(TranscodeError::Backend {
                variant: variant.label(),
                diagnostics: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let playlist_path = variant_dir.join(super::VARIANT_PLAYLIST);
        let playlist_text = fs::read_to_string(&playlist_path)
            .await
            .map_err(|e| {
                TranscodeError::InvalidOutput(format!(
                    "{} playlist unreadable: {}",
                    variant.label(),
                    e
                ))
            })?;
        let playlist = parse_media_playlist(&playlist_text).map_err(|e| {
            TranscodeError::InvalidOutput(format!("{} playlist: {}", variant.label(), e))
        })?;

        if playlist.segments.is_empty() || !playlist.ended {
            return Err(TranscodeError::InvalidOutput(format!(
                "{} playlist is empty or unterminated",
                variant.label()
            )));
        }
        if playlist.key_uri.as_deref() != Some(request.key_uri) {
            return Err(TranscodeError::InvalidOutput(format!(
                "{} playlist is not keyed with the track key URI",
                variant.label()
            )));
        }
        for segment in &playlist.segments {
            if !fs::try_exists(variant_dir.join(&segment.uri)).await? {
                return Err(TranscodeError::InvalidOutput(format!(
                    "{} segment {} missing",
                    variant.label(),
                    segment.uri
                )));
            }
        }
        fs::write(&playlist_path, playlist.render()).await?;

        Ok((
            VariantOutput {
                variant: *variant,
                segment_count: playlist.segments.len(),
            },
            playlist.total_duration(),
        ))
    }

    async fn render_all(
        &self,
        request: &TranscodeRequest<'_>,
        variants: &[Variant],
        root_dir: &Path,
        key_info: &Path,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let mut outputs = Vec::with_capacity(variants.len());
        let mut duration_sec = None;
        for variant in variants {
            let (output, duration) = self
                .render_variant(request, variant, root_dir, key_info)
                .await?;
            // Renditions of the same source agree within a frame; the first
            // one is the reference.
            duration_sec.get_or_insert(duration);
            outputs.push(output);
        }

        fs::write(root_dir.join(MASTER_PLAYLIST), render_master_playlist(variants)).await?;

        Ok(TranscodeOutput {
            root_dir: root_dir.to_path_buf(),
            variants: outputs,
            duration_sec: duration_sec.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl Transcoder for FfmpegHlsTranscoder {
    async fn transcode(
        &self,
        request: TranscodeRequest<'_>,
    ) -> Result<TranscodeOutput, TranscodeError> {
        let variants = self.variants()?;

        let root_dir = request.work_dir.join(format!("hls-{}", request.track_id));
        if fs::try_exists(&root_dir).await? {
            fs::remove_dir_all(&root_dir).await?;
        }
        fs::create_dir_all(&root_dir).await?;

        let key_guard = KeyFileGuard::create(request.work_dir, request.key, request.key_uri)?;
        let result = self
            .render_all(&request, &variants, &root_dir, &key_guard.key_info_path())
            .await;
        if let Err(e) = key_guard.close() {
            warn!(
                "Failed to remove key material of track {}: {}",
                request.track_id, e
            );
        }

        match result {
            Ok(output) => {
                info!(
                    "Transcoded track {} into {} variants ({:.1}s)",
                    request.track_id,
                    output.variants.len(),
                    output.duration_sec
                );
                Ok(output)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&root_dir).await {
                    warn!("Failed to remove partial output {:?}: {}", root_dir, cleanup);
                }
                Err(e)
            }
        }
    }
}
