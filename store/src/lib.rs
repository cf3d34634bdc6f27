//! Durable keyed storage of logo embeddings.
//!
//! The [EmbeddingStore] is the single source of truth mapping
//! `(model_version, logo_id)` to embedding vectors and their source
//! metadata. It is read by the index regeneration job and by metadata
//! lookups; the only mutation is the overwrite-semantics [EmbeddingStore::put].

pub mod backend;
pub mod error;
pub mod keys;
pub mod store;
pub mod types;

pub use backend::{Backend, MemoryBackend, RedbBackend};
pub use error::StoreError;
pub use store::{EmbeddingStore, ListPage};
pub use types::{LogoEmbedding, SourceMeta};
