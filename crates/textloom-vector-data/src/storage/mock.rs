//! In-memory vector storage for testing

use crate::error::{VectorDataError, VectorDataResult};
use crate::storage::traits::{
    SearchFilter, StorageStats, VectorPayload, VectorSearchResult, VectorStorage,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// Vector storage backed by a HashMap, with switchable failure injection
pub struct MockStorage {
    dimension: usize,
    points: Mutex<HashMap<Uuid, (Vec<f32>, VectorPayload)>>,
    fail_upserts: AtomicBool,
}

impl MockStorage {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            points: Mutex::new(HashMap::new()),
            fail_upserts: AtomicBool::new(false),
        }
    }

    /// Make subsequent upserts fail, to exercise the dual-write fallback
    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::Relaxed);
    }

    /// Number of stored points
    #[allow(clippy::unwrap_used)]
    pub fn point_count(&self) -> usize {
        self.points.lock().unwrap().len()
    }

    /// Dimension of a stored point, if present
    #[allow(clippy::unwrap_used)]
    pub fn point_dimension(&self, chunk_id: &Uuid) -> Option<usize> {
        self.points.lock().unwrap().get(chunk_id).map(|(v, _)| v.len())
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorStorage for MockStorage {
    async fn collection_exists(&self) -> VectorDataResult<bool> {
        Ok(true)
    }

    async fn ensure_collection(&self) -> VectorDataResult<()> {
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn upsert_vector(
        &self,
        chunk_id: Uuid,
        vector: Vec<f32>,
        payload: VectorPayload,
    ) -> VectorDataResult<()> {
        if self.fail_upserts.load(Ordering::Relaxed) {
            return Err(VectorDataError::StorageUnavailable(
                "mock upsert failure".to_string(),
            ));
        }
        if vector.len() != self.dimension {
            return Err(VectorDataError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.points
            .lock()
            .unwrap()
            .insert(chunk_id, (vector, payload));
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn delete_vectors(&self, chunk_ids: &[Uuid]) -> VectorDataResult<()> {
        let mut points = self.points.lock().unwrap();
        for id in chunk_ids {
            points.remove(id);
        }
        Ok(())
    }

    #[allow(clippy::unwrap_used)]
    async fn has_vector(&self, chunk_id: &Uuid) -> VectorDataResult<bool> {
        Ok(self.points.lock().unwrap().contains_key(chunk_id))
    }

    #[allow(clippy::unwrap_used)]
    async fn search(
        &self,
        query: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> VectorDataResult<Vec<VectorSearchResult>> {
        let points = self.points.lock().unwrap();
        let url_filter = filter.and_then(|f| f.url);

        let mut results: Vec<VectorSearchResult> = points
            .iter()
            .filter(|(_, (_, payload))| {
                url_filter.as_ref().is_none_or(|url| payload.url == *url)
            })
            .map(|(id, (vector, payload))| VectorSearchResult {
                chunk_id: *id,
                score: cosine(&query, vector),
                payload: payload.clone(),
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    async fn get_stats(&self) -> VectorDataResult<StorageStats> {
        Ok(StorageStats {
            vector_count: self.point_count(),
            collection_name: "mock".to_string(),
            storage_type: "mock".to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_enforces_dimension() {
        let storage = MockStorage::new(3);
        let err = storage
            .upsert_vector(Uuid::new_v4(), vec![0.1, 0.2], VectorPayload::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VectorDataError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_per_id() {
        let storage = MockStorage::new(2);
        let id = Uuid::new_v4();
        storage
            .upsert_vector(id, vec![1.0, 0.0], VectorPayload::default())
            .await
            .unwrap();
        storage
            .upsert_vector(id, vec![0.0, 1.0], VectorPayload::default())
            .await
            .unwrap();
        assert_eq!(storage.point_count(), 1);
    }

    #[tokio::test]
    async fn test_search_orders_by_similarity_and_filters() {
        let storage = MockStorage::new(2);
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        storage
            .upsert_vector(
                close,
                vec![1.0, 0.0],
                VectorPayload {
                    url: "http://a".to_string(),
                    ..VectorPayload::default()
                },
            )
            .await
            .unwrap();
        storage
            .upsert_vector(
                far,
                vec![0.0, 1.0],
                VectorPayload {
                    url: "http://b".to_string(),
                    ..VectorPayload::default()
                },
            )
            .await
            .unwrap();

        let results = storage.search(vec![1.0, 0.1], 10, None).await.unwrap();
        assert_eq!(results[0].chunk_id, close);

        let filtered = storage
            .search(
                vec![1.0, 0.1],
                10,
                Some(SearchFilter {
                    url: Some("http://b".to_string()),
                }),
            )
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].chunk_id, far);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let storage = MockStorage::new(2);
        storage.set_fail_upserts(true);
        assert!(storage
            .upsert_vector(Uuid::new_v4(), vec![0.1, 0.2], VectorPayload::default())
            .await
            .is_err());
    }
}
