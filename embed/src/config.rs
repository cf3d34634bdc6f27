use serde::Deserialize;

/// EmbedConfig configures an [crate::HttpEmbedder].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbedConfig {
    /// Base URL of the embedding service (required).
    pub base_url: String,

    /// Bearer token sent with each request; empty means no auth header.
    #[serde(default)]
    pub api_key: String,

    /// Expected dimensionality of the returned vectors.
    pub dimension: usize,
}
