//! Qdrant vector database storage backend
//!
//! Stores chunk embeddings as points whose ID equals the chunk ID, with
//! enough payload for search results to stand alone. Cosine distance; the
//! client never normalizes vectors - the store owns that convention.

use crate::error::{VectorDataError, VectorDataResult};
use crate::storage::traits::{
    SearchFilter, StorageStats, VectorPayload, VectorSearchResult, VectorStorage,
};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    CollectionExistsRequest, Condition, CreateCollection, DeletePoints, Distance, Filter,
    GetCollectionInfoRequest, GetPoints, PointId, PointStruct, PointsIdsList, PointsSelector,
    SearchPoints, UpsertPoints, Value, VectorParams, points_selector::PointsSelectorOneOf,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use textloom_config::VectorStorageConfig;
use tracing::info;
use uuid::Uuid;

/// Vector database client for chunk embeddings backed by Qdrant
pub struct QdrantStorage {
    client: Qdrant,
    collection_name: String,
    dimension: usize,
}

impl QdrantStorage {
    /// Create a client and ensure the collection exists
    ///
    /// # Errors
    ///
    /// Returns `VectorDataError::Storage` if the server is unreachable or
    /// collection creation fails.
    pub async fn new(config: &VectorStorageConfig) -> VectorDataResult<Self> {
        let mut builder = Qdrant::from_url(&config.url);
        if let Some(ref api_key) = config.api_key {
            builder = builder.api_key(api_key.clone());
        }

        let client = builder.build().map_err(|e| {
            VectorDataError::Storage(format!("Failed to create Qdrant client: {e}"))
        })?;

        let storage = Self {
            client,
            collection_name: config.collection.clone(),
            dimension: config.dimension,
        };

        storage.ensure_collection().await?;
        Ok(storage)
    }
}

#[async_trait]
impl VectorStorage for QdrantStorage {
    #[tracing::instrument(skip(self))]
    async fn collection_exists(&self) -> VectorDataResult<bool> {
        let request = CollectionExistsRequest {
            collection_name: self.collection_name.clone(),
        };

        self.client.collection_exists(request).await.map_err(|e| {
            VectorDataError::Storage(format!("Failed to check collection exists: {e}"))
        })
    }

    async fn ensure_collection(&self) -> VectorDataResult<()> {
        if self.collection_exists().await? {
            return Ok(());
        }

        let request = CreateCollection {
            collection_name: self.collection_name.clone(),
            vectors_config: Some(
                VectorParams {
                    size: self.dimension as u64,
                    distance: Distance::Cosine as i32,
                    ..Default::default()
                }
                .into(),
            ),
            ..Default::default()
        };

        match self.client.create_collection(request).await {
            Ok(_) => {
                info!(
                    collection = %self.collection_name,
                    dimension = self.dimension,
                    "Created vector collection"
                );
                Ok(())
            }
            Err(e) => {
                // Another process may have created it between the check and
                // the create; that outcome is fine
                if e.to_string().contains("already exists") {
                    Ok(())
                } else {
                    Err(VectorDataError::CollectionError(format!(
                        "Failed to create collection '{}': {e}",
                        self.collection_name
                    )))
                }
            }
        }
    }

    #[tracing::instrument(skip(self, vector, payload), fields(chunk_id = %chunk_id, dim = vector.len()))]
    async fn upsert_vector(
        &self,
        chunk_id: Uuid,
        vector: Vec<f32>,
        payload: VectorPayload,
    ) -> VectorDataResult<()> {
        if vector.len() != self.dimension {
            return Err(VectorDataError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let point = PointStruct::new(
            chunk_id.to_string(),
            vector,
            Payload::from(payload_map(&payload)),
        );

        let request = UpsertPoints {
            collection_name: self.collection_name.clone(),
            points: vec![point],
            ..Default::default()
        };

        self.client
            .upsert_points(request)
            .await
            .map_err(|e| VectorDataError::Storage(format!("Failed to upsert vector: {e}")))?;

        Ok(())
    }

    async fn delete_vectors(&self, chunk_ids: &[Uuid]) -> VectorDataResult<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }

        let point_ids: Vec<PointId> = chunk_ids
            .iter()
            .map(|id| PointId::from(id.to_string()))
            .collect();

        let request = DeletePoints {
            collection_name: self.collection_name.clone(),
            points: Some(PointsSelector {
                points_selector_one_of: Some(PointsSelectorOneOf::Points(PointsIdsList {
                    ids: point_ids,
                })),
            }),
            ..Default::default()
        };

        self.client
            .delete_points(request)
            .await
            .map_err(|e| VectorDataError::Storage(format!("Failed to delete vectors: {e}")))?;

        Ok(())
    }

    async fn has_vector(&self, chunk_id: &Uuid) -> VectorDataResult<bool> {
        let request = GetPoints {
            collection_name: self.collection_name.clone(),
            ids: vec![PointId::from(chunk_id.to_string())],
            with_payload: Some(false.into()),
            with_vectors: Some(false.into()),
            ..Default::default()
        };

        let response = self
            .client
            .get_points(request)
            .await
            .map_err(|e| VectorDataError::Storage(format!("Failed to get point: {e}")))?;

        Ok(!response.result.is_empty())
    }

    #[tracing::instrument(skip(self, query), fields(query_dim = query.len(), limit))]
    async fn search(
        &self,
        query: Vec<f32>,
        limit: usize,
        filter: Option<SearchFilter>,
    ) -> VectorDataResult<Vec<VectorSearchResult>> {
        let qdrant_filter = filter.and_then(|f| {
            f.url
                .map(|url| Filter::must([Condition::matches("url", url)]))
        });

        let request = SearchPoints {
            collection_name: self.collection_name.clone(),
            vector: query,
            limit: limit as u64,
            with_payload: Some(true.into()),
            filter: qdrant_filter,
            ..Default::default()
        };

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| VectorDataError::Storage(format!("Search failed: {e}")))?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            let chunk_id = match &point.id {
                Some(id) => match &id.point_id_options {
                    Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(s)) => {
                        Uuid::try_parse(s).unwrap_or_default()
                    }
                    _ => Uuid::nil(),
                },
                None => Uuid::nil(),
            };

            results.push(VectorSearchResult {
                chunk_id,
                score: point.score,
                payload: payload_from_map(&point.payload),
            });
        }

        Ok(results)
    }

    async fn get_stats(&self) -> VectorDataResult<StorageStats> {
        let request = GetCollectionInfoRequest {
            collection_name: self.collection_name.clone(),
        };

        let info = self
            .client
            .collection_info(request)
            .await
            .map_err(|e| VectorDataError::Storage(format!("Failed to get collection info: {e}")))?;

        let result = info
            .result
            .ok_or_else(|| VectorDataError::Storage("Missing collection info result".to_string()))?;

        Ok(StorageStats {
            vector_count: result.points_count.unwrap_or(0) as usize,
            collection_name: self.collection_name.clone(),
            storage_type: "qdrant".to_string(),
        })
    }
}

fn payload_map(payload: &VectorPayload) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("url".to_string(), Value::from(payload.url.clone()));
    if let Some(ref title) = payload.title {
        map.insert("title".to_string(), Value::from(title.clone()));
    }
    map.insert(
        "chunk_index".to_string(),
        Value::from(i64::from(payload.chunk_index)),
    );
    if let Some(ref category) = payload.category {
        map.insert("category".to_string(), Value::from(category.clone()));
    }
    if let Some(ref sentiment) = payload.sentiment {
        map.insert("sentiment".to_string(), Value::from(sentiment.clone()));
    }
    map.insert(
        "main_topics".to_string(),
        Value {
            kind: Some(qdrant_client::qdrant::value::Kind::ListValue(
                qdrant_client::qdrant::ListValue {
                    values: payload
                        .main_topics
                        .iter()
                        .map(|t| Value::from(t.clone()))
                        .collect(),
                },
            )),
        },
    );
    map.insert(
        "uses_contextual_embedding".to_string(),
        Value::from(payload.uses_contextual_embedding),
    );
    map
}

fn payload_from_map(map: &HashMap<String, Value>) -> VectorPayload {
    VectorPayload {
        url: map
            .get("url")
            .and_then(|v| v.as_str())
            .map(ToString::to_string)
            .unwrap_or_default(),
        title: map
            .get("title")
            .and_then(|v| v.as_str())
            .map(ToString::to_string),
        chunk_index: map
            .get("chunk_index")
            .and_then(|v| v.as_integer())
            .unwrap_or(0) as i32,
        category: map
            .get("category")
            .and_then(|v| v.as_str())
            .map(ToString::to_string),
        sentiment: map
            .get("sentiment")
            .and_then(|v| v.as_str())
            .map(ToString::to_string),
        main_topics: map
            .get("main_topics")
            .and_then(|v| match &v.kind {
                Some(qdrant_client::qdrant::value::Kind::ListValue(list)) => Some(
                    list.values
                        .iter()
                        .filter_map(|v| v.as_str().map(ToString::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default(),
        uses_contextual_embedding: map
            .get("uses_contextual_embedding")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    }
}
