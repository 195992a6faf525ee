//! Feature extractor contract and the external-command adapter.
//!
//! The descriptor math lives outside this crate. An extractor receives a
//! path to the source audio (any container/codec), decodes the first
//! `duration_secs` seconds as mono at `sample_rate`, and reports one value
//! per name in [`super::FEATURE_NAMES`].

use super::features::ExtractedFeatures;
use crate::error::ErrorKind;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Could not decode audio: {0}")]
    Decode(String),

    #[error("Feature extraction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid extractor output: {0}")]
    InvalidOutput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExtractionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractionError::Decode(_) | ExtractionError::InvalidOutput(_) => ErrorKind::Decode,
            ExtractionError::Timeout(_) => ErrorKind::Timeout,
            ExtractionError::Io(_) => ErrorKind::Storage,
        }
    }
}

#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Computes the descriptor set for the audio at `source`.
    ///
    /// Must be deterministic for a given input and configuration. Values the
    /// backend cannot compute are substituted with 0.0 and listed in
    /// [`ExtractedFeatures::substituted`].
    async fn extract(&self, source: &Path) -> Result<ExtractedFeatures, ExtractionError>;
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    /// Executable implementing the extraction.
    pub program: String,
    /// Extra arguments placed before the standard ones.
    pub args: Vec<String>,
    pub sample_rate: u32,
    pub duration_secs: u32,
    pub timeout: Duration,
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            program: "mist-features".to_string(),
            args: Vec::new(),
            sample_rate: 22050,
            duration_secs: 30,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Runs an external program that prints a JSON object mapping descriptor
/// names to numbers (or null) on stdout.
///
/// Invocation: `<program> <args...> --input <path> --sample-rate <hz> --duration <secs>`.
/// A non-zero exit status means the input could not be decoded.
pub struct CommandFeatureExtractor {
    settings: ExtractorSettings,
}

impl CommandFeatureExtractor {
    pub fn new(settings: ExtractorSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl FeatureExtractor for CommandFeatureExtractor {
    async fn extract(&self, source: &Path) -> Result<ExtractedFeatures, ExtractionError> {
        let mut command = Command::new(&self.settings.program);
        command
            .args(&self.settings.args)
            .arg("--input")
            .arg(source)
            .arg("--sample-rate")
            .arg(self.settings.sample_rate.to_string())
            .arg("--duration")
            .arg(self.settings.duration_secs.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Running feature extractor {} on {:?}",
            self.settings.program, source
        );

        let output = tokio::time::timeout(self.settings.timeout, command.output())
            .await
            .map_err(|_| ExtractionError::Timeout(self.settings.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Decode(stderr.trim().to_string()));
        }

        let raw = parse_extractor_output(&output.stdout)?;
        Ok(ExtractedFeatures::from_raw(&raw))
    }
}

/// Parses the extractor's JSON object. Non-numeric values count as missing.
fn parse_extractor_output(stdout: &[u8]) -> Result<HashMap<String, Option<f64>>, ExtractionError> {
    let value: Value = serde_json::from_slice(stdout)
        .map_err(|e| ExtractionError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| ExtractionError::InvalidOutput("expected a JSON object".to_string()))?;

    Ok(object
        .iter()
        .map(|(name, v)| (name.clone(), v.as_f64()))
        .collect())
}

/// Rejects sources whose leading bytes identify a known non-audio format.
/// Unknown signatures are let through, the extractor has the final word.
pub fn sniff_audio(header: &[u8]) -> Result<(), ExtractionError> {
    match infer::get(header) {
        Some(kind) if kind.matcher_type() != infer::MatcherType::Audio => {
            // mp4/m4a containers are reported as video by the sniffer
            if kind.mime_type() == "video/mp4" {
                return Ok(());
            }
            Err(ExtractionError::Decode(format!(
                "source is {}, not audio",
                kind.mime_type()
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FEATURE_COUNT;

    #[test]
    fn test_parse_output_handles_nulls_and_strings() {
        let raw = parse_extractor_output(br#"{"tempo": 120.5, "rms_var": null, "zcr_var": "nan"}"#)
            .unwrap();
        assert_eq!(raw.get("tempo"), Some(&Some(120.5)));
        assert_eq!(raw.get("rms_var"), Some(&None));
        assert_eq!(raw.get("zcr_var"), Some(&None));
    }

    #[test]
    fn test_parse_output_rejects_non_objects() {
        assert!(matches!(
            parse_extractor_output(b"[1, 2, 3]"),
            Err(ExtractionError::InvalidOutput(_))
        ));
        assert!(matches!(
            parse_extractor_output(b"not json"),
            Err(ExtractionError::InvalidOutput(_))
        ));
    }

    #[test]
    fn test_sniff_audio() {
        // RIFF....WAVE
        let wav = b"RIFF\x24\x00\x00\x00WAVEfmt \x10\x00\x00\x00";
        assert!(sniff_audio(wav).is_ok());

        let png = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";
        assert!(matches!(sniff_audio(png), Err(ExtractionError::Decode(_))));

        // Unknown bytes are left to the extractor
        assert!(sniff_audio(b"hello world").is_ok());
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(ExtractionError::Decode("x".into()).kind(), ErrorKind::Decode);
        assert_eq!(
            ExtractionError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_reads_stdout() {
        let settings = ExtractorSettings {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                r#"echo '{"tempo": 99.0, "spectral_centroid": 1500.0}'"#.to_string(),
            ],
            ..Default::default()
        };
        let extractor = CommandFeatureExtractor::new(settings);
        let extracted = extractor.extract(Path::new("/dev/null")).await.unwrap();

        assert_eq!(extracted.features.tempo, 99.0);
        assert_eq!(extracted.features.spectral_centroid, 1500.0);
        assert_eq!(extracted.substituted.len(), FEATURE_COUNT - 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_failure_is_decode_error() {
        let settings = ExtractorSettings {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo 'bad header' >&2; exit 1".to_string()],
            ..Default::default()
        };
        let extractor = CommandFeatureExtractor::new(settings);
        let err = extractor.extract(Path::new("/dev/null")).await.unwrap_err();

        match err {
            ExtractionError::Decode(msg) => assert_eq!(msg, "bad header"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_extractor_times_out() {
        let settings = ExtractorSettings {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 5".to_string()],
            timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let extractor = CommandFeatureExtractor::new(settings);
        let err = extractor.extract(Path::new("/dev/null")).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout(_)));
    }
}
