use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use logosearch_embed::{BoundingBox, LogoEmbedder};
use logosearch_store::{EmbeddingStore, ListPage, LogoEmbedding, SourceMeta};

use crate::error::{IndexError, ResolveError};
use crate::manager::IndexManager;
use crate::snapshot::{IndexSnapshot, Neighbor};

/// Where the vector of a registration comes from. Flattened into
/// [AddRequest], so a request carries either `vector` or
/// `image_url` + `bounding_box`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AddSource {
    /// A caller-supplied embedding, stored as-is.
    Vector { vector: Vec<f32> },
    /// An image crop to run through the embedding model.
    Image {
        image_url: String,
        bounding_box: BoundingBox,
    },
}

/// One logo registration.
#[derive(Debug, Clone, Deserialize)]
pub struct AddRequest {
    pub logo_id: u64,
    /// Must match the resolver's model version when given.
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(flatten)]
    pub source: AddSource,
    #[serde(default)]
    pub image_id: Option<String>,
}

/// Store and snapshot record counts, reported side by side so the
/// staleness window between them is visible to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Counts {
    pub stored_count: usize,
    pub indexed_count: usize,
    pub model_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_timestamp: Option<i64>,
}

/// Resolver ties the store, the active snapshot, and the embedder into
/// the operations a client sees.
///
/// One resolver serves one model version; queries and registrations for
/// other versions go through another resolver instance.
pub struct Resolver {
    store: Arc<EmbeddingStore>,
    manager: Arc<IndexManager>,
    embedder: Option<Arc<dyn LogoEmbedder>>,
    model_version: String,
}

impl Resolver {
    pub fn new(
        store: Arc<EmbeddingStore>,
        manager: Arc<IndexManager>,
        embedder: Option<Arc<dyn LogoEmbedder>>,
        model_version: &str,
    ) -> Self {
        Self {
            store,
            manager,
            embedder,
            model_version: model_version.to_string(),
        }
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    /// Active snapshot, only when it was built for this resolver's model
    /// version. A snapshot for another version is treated as no index at
    /// all, so queries never answer from the wrong vector space.
    fn active_snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.manager
            .active()
            .filter(|s| s.meta().model_version == self.model_version)
    }

    /// Neighbors of a stored logo, by id.
    ///
    /// A miss against the snapshot is split by consulting the store:
    /// stored but not yet covered by the snapshot is [ResolveError::NotIndexed],
    /// unknown outright is [ResolveError::NotFound].
    pub fn resolve(
        &self,
        logo_id: u64,
        k: usize,
        precision: usize,
    ) -> Result<Vec<Neighbor>, ResolveError> {
        let outcome = match self.active_snapshot() {
            Some(snap) => snap.search_logo(logo_id, k, precision),
            None => Err(IndexError::NoActiveIndex),
        };
        match outcome {
            Ok(neighbors) => Ok(neighbors),
            Err(IndexError::NotIndexed(_)) | Err(IndexError::NoActiveIndex) => {
                if self.store.contains(logo_id, &self.model_version)? {
                    Err(ResolveError::NotIndexed(logo_id))
                } else {
                    Err(ResolveError::NotFound(logo_id))
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Neighbors of an arbitrary vector.
    pub fn resolve_vector(
        &self,
        query: &[f32],
        k: usize,
        precision: usize,
    ) -> Result<Vec<Neighbor>, ResolveError> {
        let snap = self.active_snapshot().ok_or(ResolveError::NoActiveIndex)?;
        Ok(snap.search_vector(query, k, precision)?)
    }

    /// Neighbors of a randomly sampled indexed logo, together with the
    /// sampled id. Useful for spot checks against a live index.
    pub fn resolve_random(
        &self,
        k: usize,
        precision: usize,
    ) -> Result<(u64, Vec<Neighbor>), ResolveError> {
        let snap = self.active_snapshot().ok_or(ResolveError::NoActiveIndex)?;
        let logo_id = snap.random_logo().ok_or(ResolveError::NoActiveIndex)?;
        let neighbors = snap.search_logo(logo_id, k, precision).map_err(ResolveError::from)?;
        Ok((logo_id, neighbors))
    }

    /// Resolve several logos in one call. Each id gets its own outcome;
    /// one failing lookup never voids the others.
    pub fn resolve_batch(
        &self,
        logo_ids: &[u64],
        k: usize,
        precision: usize,
    ) -> Vec<(u64, Result<Vec<Neighbor>, ResolveError>)> {
        logo_ids
            .iter()
            .map(|&id| (id, self.resolve(id, k, precision)))
            .collect()
    }

    /// Register a logo embedding in the store.
    ///
    /// The vector either arrives in the request or is produced by the
    /// embedder from an image crop. Validation and embedding both happen
    /// before any write, so a failed registration leaves no trace.
    pub async fn add(&self, req: AddRequest) -> Result<(), ResolveError> {
        if let Some(mv) = &req.model_version {
            if mv != &self.model_version {
                return Err(ResolveError::Validation(format!(
                    "model version {mv} is not served here (expected {})",
                    self.model_version
                )));
            }
        }

        let (vector, bounding_box) = match req.source {
            AddSource::Vector { vector } => (vector, None),
            AddSource::Image {
                image_url,
                bounding_box,
            } => {
                bounding_box.validate()?;
                let embedder = self.embedder.as_ref().ok_or_else(|| {
                    ResolveError::Validation("no embedding model configured".to_string())
                })?;
                let v = embedder.embed(&image_url, &bounding_box).await?;
                (v, Some(bounding_box))
            }
        };

        let rec = LogoEmbedding::new(
            req.logo_id,
            &self.model_version,
            vector,
            SourceMeta {
                image_id: req.image_id,
                bounding_box,
                added_at: 0,
            },
        );
        self.store.put(&rec)?;
        debug!(logo_id = req.logo_id, model_version = %self.model_version, "logo registered");
        Ok(())
    }

    /// Stored and indexed record counts for this model version.
    ///
    /// `indexed_count` reflects the active snapshot only when the
    /// snapshot was built for this model version.
    pub fn counts(&self) -> Result<Counts, ResolveError> {
        let stored_count = self.store.count(&self.model_version)?;
        let (indexed_count, build_timestamp) = match self.active_snapshot() {
            Some(snap) => (snap.meta().record_count, Some(snap.meta().build_timestamp)),
            None => (0, None),
        };
        Ok(Counts {
            stored_count,
            indexed_count,
            model_version: self.model_version.clone(),
            build_timestamp,
        })
    }

    /// Page through the stored logos of this model version.
    pub fn stored(
        &self,
        page_token: Option<u64>,
        page_size: Option<usize>,
    ) -> Result<ListPage, ResolveError> {
        Ok(self
            .store
            .list(&self.model_version, page_token, page_size.unwrap_or(0))?)
    }
}
