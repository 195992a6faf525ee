//! Embedding construction from a feature set.

use super::features::AudioFeatureSet;
use serde::{Deserialize, Serialize};

pub const EMBEDDING_DIM: usize = 40;

/// Descriptors that make up the content embedding, in vector order.
pub const EMBEDDING_FIELDS: [&str; EMBEDDING_DIM] = [
    "spectral_centroid",
    "spectral_rolloff",
    "spectral_bandwidth",
    "spectral_contrast_mean",
    "spectral_flatness",
    "spectral_rolloff_85",
    "spectral_bandwidth_var",
    "chroma_mean",
    "tonnetz_mean",
    "chroma_cens_mean",
    "tempo",
    "beat_strength",
    "rms_mean",
    "rms_std",
    "rms_var",
    "zcr_mean",
    "zcr_var",
    "harmonic_mean",
    "percussive_mean",
    "mel_spec_mean",
    "mfcc_0_mean",
    "mfcc_1_mean",
    "mfcc_2_mean",
    "mfcc_3_mean",
    "mfcc_4_mean",
    "mfcc_5_mean",
    "mfcc_6_mean",
    "mfcc_7_mean",
    "mfcc_8_mean",
    "mfcc_9_mean",
    "mfcc_10_mean",
    "mfcc_11_mean",
    "mfcc_12_mean",
    "mfcc_13_mean",
    "mfcc_14_mean",
    "mfcc_15_mean",
    "mfcc_16_mean",
    "mfcc_17_mean",
    "mfcc_18_mean",
    "mfcc_19_mean",
];

/// Norms at or below this are treated as zero energy and left unnormalized.
const NORM_EPSILON: f64 = 1e-12;

/// Discriminates embeddings computed by different methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingKind {
    #[default]
    AudioContent,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AudioContent => "audio_content",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio_content" => Some(Self::AudioContent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub kind: EmbeddingKind,
    values: Vec<f64>,
}

impl EmbeddingVector {
    pub fn new(kind: EmbeddingKind, values: Vec<f64>) -> Self {
        Self { kind, values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn norm(&self) -> f64 {
        l2_norm(&self.values)
    }

    /// Little-endian f64 bytes, as stored in SQLite.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_bytes(kind: EmbeddingKind, bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 8 != 0 {
            return None;
        }
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect();
        Some(Self { kind, values })
    }
}

fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Selects [`EMBEDDING_FIELDS`] from `features` and scales them to unit length.
///
/// Non-finite values are read as 0.0. A zero-energy selection comes back as
/// is instead of being divided by its (near zero) norm.
pub fn build_embedding(features: &AudioFeatureSet) -> EmbeddingVector {
    let mut values: Vec<f64> = EMBEDDING_FIELDS
        .iter()
        .map(|name| {
            features
                .get(name)
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
        })
        .collect();

    let norm = l2_norm(&values);
    if norm > NORM_EPSILON {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }

    EmbeddingVector::new(EmbeddingKind::AudioContent, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::FEATURE_NAMES;

    fn sample_features() -> AudioFeatureSet {
        let mut features = AudioFeatureSet::default();
        for (i, name) in FEATURE_NAMES.iter().enumerate() {
            features.set(name, (i as f64 + 1.0) * 0.37);
        }
        features
    }

    #[test]
    fn test_embedding_fields_exist_in_feature_set() {
        for name in EMBEDDING_FIELDS {
            assert!(
                FEATURE_NAMES.contains(&name),
                "{} is not a feature name",
                name
            );
        }
    }

    #[test]
    fn test_embedding_is_unit_length() {
        let embedding = build_embedding(&sample_features());
        assert_eq!(embedding.values().len(), EMBEDDING_DIM);
        assert!(embedding.values().iter().all(|v| v.is_finite()));
        assert!((embedding.norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_energy_input_stays_zero() {
        let embedding = build_embedding(&AudioFeatureSet::default());
        assert_eq!(embedding.values(), &[0.0; EMBEDDING_DIM][..]);
    }

    #[test]
    fn test_near_zero_input_is_not_normalized() {
        let mut features = AudioFeatureSet::default();
        features.tempo = 1e-13;
        let embedding = build_embedding(&features);
        assert_eq!(embedding.values()[10], 1e-13);
    }

    #[test]
    fn test_embedding_ignores_non_embedded_fields() {
        let mut a = sample_features();
        let b = a.clone();
        a.mfcc_3_std = 1000.0;
        a.chroma_std = -4.0;
        assert_eq!(build_embedding(&a), build_embedding(&b));
    }

    #[test]
    fn test_non_finite_values_read_as_zero() {
        let mut features = AudioFeatureSet::default();
        features.tempo = f64::NAN;
        features.rms_mean = 2.0;
        let embedding = build_embedding(&features);
        assert_eq!(embedding.values()[10], 0.0);
        assert_eq!(embedding.values()[12], 1.0);
    }

    #[test]
    fn test_embedding_is_deterministic() {
        let features = sample_features();
        assert_eq!(build_embedding(&features), build_embedding(&features));
    }

    #[test]
    fn test_bytes_conversion() {
        let embedding = build_embedding(&sample_features());
        let bytes = embedding.to_bytes();
        assert_eq!(bytes.len(), EMBEDDING_DIM * 8);
        let restored = EmbeddingVector::from_bytes(EmbeddingKind::AudioContent, &bytes).unwrap();
        assert_eq!(restored, embedding);

        assert!(EmbeddingVector::from_bytes(EmbeddingKind::AudioContent, &[0u8; 7]).is_none());
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(EmbeddingKind::AudioContent.as_str(), "audio_content");
        assert_eq!(
            EmbeddingKind::parse("audio_content"),
            Some(EmbeddingKind::AudioContent)
        );
        assert_eq!(EmbeddingKind::parse("lyrics"), None);
    }
}
