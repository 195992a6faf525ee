//! Scalar audio descriptors produced by the feature extractor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

macro_rules! audio_feature_set {
    ($($field:ident),+ $(,)?) => {
        /// Fixed-shape set of scalar descriptors computed over the opening
        /// seconds of a track. Every field is always finite.
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        pub struct AudioFeatureSet {
            $(pub $field: f64,)+
        }

        /// Descriptor names in storage order.
        pub const FEATURE_NAMES: &[&str] = &[$(stringify!($field)),+];

        impl AudioFeatureSet {
            pub fn get(&self, name: &str) -> Option<f64> {
                match name {
                    $(stringify!($field) => Some(self.$field),)+
                    _ => None,
                }
            }

            /// Sets a descriptor by name. Returns false for unknown names.
            pub fn set(&mut self, name: &str, value: f64) -> bool {
                match name {
                    $(stringify!($field) => { self.$field = value; true })+
                    _ => false,
                }
            }

            /// All descriptor values in [`FEATURE_NAMES`] order.
            pub fn values(&self) -> Vec<f64> {
                vec![$(self.$field),+]
            }
        }
    };
}

audio_feature_set!(
    // spectral
    spectral_centroid,
    spectral_rolloff,
    spectral_bandwidth,
    // mfcc means
    mfcc_0_mean,
    mfcc_1_mean,
    mfcc_2_mean,
    mfcc_3_mean,
    mfcc_4_mean,
    mfcc_5_mean,
    mfcc_6_mean,
    mfcc_7_mean,
    mfcc_8_mean,
    mfcc_9_mean,
    mfcc_10_mean,
    mfcc_11_mean,
    mfcc_12_mean,
    mfcc_13_mean,
    mfcc_14_mean,
    mfcc_15_mean,
    mfcc_16_mean,
    mfcc_17_mean,
    mfcc_18_mean,
    mfcc_19_mean,
    // mfcc standard deviations
    mfcc_0_std,
    mfcc_1_std,
    mfcc_2_std,
    mfcc_3_std,
    mfcc_4_std,
    mfcc_5_std,
    mfcc_6_std,
    mfcc_7_std,
    mfcc_8_std,
    mfcc_9_std,
    mfcc_10_std,
    mfcc_11_std,
    mfcc_12_std,
    mfcc_13_std,
    mfcc_14_std,
    mfcc_15_std,
    mfcc_16_std,
    mfcc_17_std,
    mfcc_18_std,
    mfcc_19_std,
    // chroma
    chroma_mean,
    chroma_std,
    // rhythm
    tempo,
    beat_strength,
    // zero crossing
    zcr_mean,
    // energy
    rms_mean,
    rms_std,
    // mel spectrogram
    mel_spec_mean,
    mel_spec_std,
    // auxiliary spectral
    spectral_contrast_mean,
    spectral_flatness,
    spectral_rolloff_85,
    spectral_bandwidth_var,
    // harmonic / tonal
    tonnetz_mean,
    chroma_cens_mean,
    // harmonic / percussive separation
    harmonic_mean,
    percussive_mean,
    // variances
    zcr_var,
    rms_var,
);

/// Number of descriptors in an [`AudioFeatureSet`].
pub const FEATURE_COUNT: usize = 62;

/// Extractor output after sanitization.
#[derive(Debug, Clone)]
pub struct ExtractedFeatures {
    pub features: AudioFeatureSet,
    /// Descriptors that were missing, null or non-finite and got replaced by 0.0.
    pub substituted: Vec<&'static str>,
}

impl ExtractedFeatures {
    /// Builds a feature set from raw named values, replacing anything missing
    /// or non-finite with 0.0 and remembering which names were replaced.
    pub fn from_raw(raw: &HashMap<String, Option<f64>>) -> Self {
        let mut features = AudioFeatureSet::default();
        let mut substituted = Vec::new();

        for name in FEATURE_NAMES {
            match raw.get(*name).copied().flatten() {
                Some(value) if value.is_finite() => {
                    features.set(name, value);
                }
                _ => substituted.push(*name),
            }
        }

        Self {
            features,
            substituted,
        }
    }

    pub fn substituted_fraction(&self) -> f64 {
        self.substituted.len() as f64 / FEATURE_COUNT as f64
    }
}

impl AudioFeatureSet {
    pub fn is_all_finite(&self) -> bool {
        self.values().iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_names_match_count() {
        assert_eq!(FEATURE_NAMES.len(), FEATURE_COUNT);
        assert_eq!(AudioFeatureSet::default().values().len(), FEATURE_COUNT);
    }

    #[test]
    fn test_feature_names_are_unique() {
        let mut names: Vec<&str> = FEATURE_NAMES.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_get_and_set_by_name() {
        let mut features = AudioFeatureSet::default();
        assert!(features.set("tempo", 128.0));
        assert!(features.set("mfcc_19_std", 0.25));
        assert!(!features.set("not_a_feature", 1.0));

        assert_eq!(features.get("tempo"), Some(128.0));
        assert_eq!(features.mfcc_19_std, 0.25);
        assert_eq!(features.get("not_a_feature"), None);
    }

    #[test]
    fn test_from_raw_substitutes_missing_and_non_finite() {
        let mut raw: HashMap<String, Option<f64>> = FEATURE_NAMES
            .iter()
            .map(|n| (n.to_string(), Some(1.0)))
            .collect();
        raw.insert("tempo".to_string(), Some(f64::NAN));
        raw.insert("rms_var".to_string(), None);
        raw.insert("zcr_var".to_string(), Some(f64::INFINITY));
        raw.remove("chroma_std");

        let extracted = ExtractedFeatures::from_raw(&raw);

        assert!(extracted.features.is_all_finite());
        assert_eq!(extracted.features.tempo, 0.0);
        assert_eq!(extracted.features.rms_var, 0.0);
        assert_eq!(extracted.features.zcr_var, 0.0);
        assert_eq!(extracted.features.chroma_std, 0.0);
        assert_eq!(extracted.features.spectral_centroid, 1.0);

        let mut substituted = extracted.substituted.clone();
        substituted.sort();
        assert_eq!(substituted, vec!["chroma_std", "rms_var", "tempo", "zcr_var"]);
        assert!((extracted.substituted_fraction() - 4.0 / FEATURE_COUNT as f64).abs() < 1e-12);
    }

    #[test]
    fn test_from_raw_ignores_unknown_names() {
        let mut raw = HashMap::new();
        raw.insert("duration".to_string(), Some(30.0));
        let extracted = ExtractedFeatures::from_raw(&raw);
        assert_eq!(extracted.substituted.len(), FEATURE_COUNT);
    }
}
