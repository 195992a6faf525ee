//! Audio analysis: descriptor extraction and content embeddings.

mod embedding;
mod extractor;
mod features;

pub use embedding::{
    build_embedding, EmbeddingKind, EmbeddingVector, EMBEDDING_DIM, EMBEDDING_FIELDS,
};
pub use extractor::{
    sniff_audio, CommandFeatureExtractor, ExtractionError, ExtractorSettings, FeatureExtractor,
};
pub use features::{AudioFeatureSet, ExtractedFeatures, FEATURE_COUNT, FEATURE_NAMES};
