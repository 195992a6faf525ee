//! Content-based "similar tracks" ranking.

use crate::analysis::EmbeddingKind;
use crate::catalog::CatalogStore;
use anyhow::Result;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;

pub const MIN_LIMIT: usize = 1;
pub const MAX_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarTrack {
    pub track_id: i64,
    /// Cosine distance, `1 - similarity`. Lower is closer.
    pub distance: f64,
    pub similarity: f64,
}

/// Compute cosine similarity between two vectors.
///
/// Mismatched lengths and zero vectors have similarity 0.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

pub struct SimilarityIndex {
    store: Arc<dyn CatalogStore>,
    kind: EmbeddingKind,
}

impl SimilarityIndex {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self {
            store,
            kind: EmbeddingKind::default(),
        }
    }

    /// Ranks every other completed track by cosine distance to `track_id`.
    ///
    /// `limit` is clamped to `MIN_LIMIT..=MAX_LIMIT`. A track without an
    /// embedding has no neighbours.
    pub fn find_similar(&self, track_id: i64, limit: usize) -> Result<Vec<SimilarTrack>> {
        let limit = limit.clamp(MIN_LIMIT, MAX_LIMIT);

        let query = match self.store.get_embedding(track_id, self.kind)? {
            Some(query) => query,
            None => return Ok(Vec::new()),
        };
        let candidates = self.store.list_embeddings(self.kind, track_id)?;

        let mut ranked: Vec<SimilarTrack> = candidates
            .par_iter()
            .filter(|(candidate_id, _)| *candidate_id != track_id)
            .map(|(candidate_id, embedding)| {
                let similarity = cosine_similarity(query.values(), embedding.values());
                SimilarTrack {
                    track_id: *candidate_id,
                    distance: 1.0 - similarity,
                    similarity,
                }
            })
            .collect();

        ranked.sort_by(|a, b| match a.distance.total_cmp(&b.distance) {
            Ordering::Equal => a.track_id.cmp(&b.track_id),
            other => other,
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AudioFeatureSet, EmbeddingVector, EMBEDDING_DIM};
    use crate::catalog::{NewTrack, SqliteCatalogStore};

    fn unit(axis: usize, tilt: f64) -> EmbeddingVector {
        let mut values = vec![0.0; EMBEDDING_DIM];
        values[axis] = 1.0;
        values[(axis + 1) % EMBEDDING_DIM] = tilt;
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        EmbeddingVector::new(
            EmbeddingKind::AudioContent,
            values.into_iter().map(|v| v / norm).collect(),
        )
    }

    fn add_track(store: &SqliteCatalogStore, embedding: EmbeddingVector, complete: bool) -> i64 {
        let track = store
            .create_track(&NewTrack {
                title: "t".to_string(),
                artist: "a".to_string(),
                ..Default::default()
            })
            .unwrap();
        store.save_embedding(track.id, &embedding).unwrap();
        if complete {
            store
                .save_features(track.id, &AudioFeatureSet::default())
                .unwrap();
            store.complete_track(track.id, "hls/x/master.m3u8", 1.0).unwrap();
        }
        track.id
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(cosine_similarity(&a, &[0.0, 1.0, 0.0]).abs() < 1e-12);
        assert!((cosine_similarity(&a, &[-1.0, 0.0, 0.0]) + 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_orders_by_distance_and_excludes_query() {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let query = add_track(&store, unit(0, 0.0), true);
        let far = add_track(&store, unit(5, 0.0), true);
        let close = add_track(&store, unit(0, 0.1), true);
        let closer = add_track(&store, unit(0, 0.01), true);

        let index = SimilarityIndex::new(store);
        let results = index.find_similar(query, 10).unwrap();

        let ids: Vec<i64> = results.iter().map(|r| r.track_id).collect();
        assert_eq!(ids, vec![closer, close, far]);
        assert!(!ids.contains(&query));
        assert!(results.windows(2).all(|w| w[0].distance <= w[1].distance));
        for r in &results {
            assert!((r.distance - (1.0 - r.similarity)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_ties_break_by_track_id() {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let query = add_track(&store, unit(0, 0.0), true);
        let a = add_track(&store, unit(3, 0.0), true);
        let b = add_track(&store, unit(3, 0.0), true);

        let results = SimilarityIndex::new(store).find_similar(query, 10).unwrap();
        assert_eq!(results[0].track_id, a);
        assert_eq!(results[1].track_id, b);
    }

    #[test]
    fn test_limit_is_clamped() {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let query = add_track(&store, unit(0, 0.0), true);
        for i in 1..5 {
            add_track(&store, unit(i, 0.0), true);
        }
        let index = SimilarityIndex::new(store);

        assert_eq!(index.find_similar(query, 2).unwrap().len(), 2);
        assert_eq!(index.find_similar(query, 0).unwrap().len(), 1);
        assert_eq!(index.find_similar(query, 1000).unwrap().len(), 4);
    }

    #[test]
    fn test_query_without_embedding_is_empty() {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        add_track(&store, unit(0, 0.0), true);
        let index = SimilarityIndex::new(store);
        assert!(index.find_similar(9999, 10).unwrap().is_empty());
    }

    #[test]
    fn test_in_flight_tracks_are_not_candidates() {
        let store = Arc::new(SqliteCatalogStore::in_memory().unwrap());
        let query = add_track(&store, unit(0, 0.0), true);
        add_track(&store, unit(0, 0.0), false);

        let index = SimilarityIndex::new(store);
        assert!(index.find_similar(query, 10).unwrap().is_empty());
    }
}
