use serde::{Deserialize, Serialize};

use logosearch_embed::BoundingBox;

/// Origin of a stored embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Identifier of the image the logo was cropped from, if known.
    #[serde(rename = "image_id", default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,

    /// Crop box of the logo within the source image.
    #[serde(rename = "bbox", default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,

    /// Insertion time, unix nanoseconds.
    #[serde(rename = "ts")]
    pub added_at: i64,
}

/// One stored embedding record, unique per (logo_id, model_version).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogoEmbedding {
    /// Externally assigned logo identifier. Never generated here.
    #[serde(rename = "id")]
    pub logo_id: u64,

    /// Tag of the embedding model that produced the vector. All vectors
    /// under one model_version share the same dimension.
    #[serde(rename = "model")]
    pub model_version: String,

    /// The embedding vector.
    #[serde(rename = "vec")]
    pub vector: Vec<f32>,

    #[serde(rename = "meta", default)]
    pub meta: SourceMeta,
}

impl LogoEmbedding {
    /// Construct a record stamped with the current time.
    pub fn new(logo_id: u64, model_version: &str, vector: Vec<f32>, meta: SourceMeta) -> Self {
        let added_at = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default();
        Self {
            logo_id,
            model_version: model_version.to_string(),
            vector,
            meta: SourceMeta { added_at, ..meta },
        }
    }
}
