use thiserror::Error;

use logosearch_embed::EmbedError;
use logosearch_store::StoreError;
use logosearch_vecstore::VecError;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index: no active snapshot")]
    NoActiveIndex,

    #[error("index: dimension mismatch: got {got}, want {want}")]
    DimensionMismatch { got: usize, want: usize },

    #[error("index: logo {0} is not in the active snapshot")]
    NotIndexed(u64),

    #[error("index: search failed: {0}")]
    Search(String),

    #[error("index: {0}")]
    Io(String),

    #[error("index: invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl From<VecError> for IndexError {
    fn from(e: VecError) -> Self {
        match e {
            VecError::DimensionMismatch { got, want } => IndexError::DimensionMismatch { got, want },
            other => IndexError::Search(other.to_string()),
        }
    }
}

/// Failure modes of the regeneration job. None of these disturb the
/// currently active snapshot.
#[derive(Error, Debug)]
pub enum RegenError {
    #[error("regen: a build is already running")]
    Busy,

    #[error("regen: no embeddings stored for model {0}")]
    EmptyStore(String),

    #[error("regen: build cancelled")]
    Cancelled,

    #[error("regen: {0}")]
    Store(#[from] StoreError),

    #[error("regen: {0}")]
    Build(#[from] VecError),

    #[error("regen: {0}")]
    Index(#[from] IndexError),
}

/// Client-facing error taxonomy of the query resolution layer.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("resolve: {0}")]
    Validation(String),

    #[error("resolve: logo {0} is unknown")]
    NotFound(u64),

    #[error("resolve: logo {0} is stored but not yet indexed")]
    NotIndexed(u64),

    #[error("resolve: no active snapshot")]
    NoActiveIndex,

    #[error("resolve: store failure: {0}")]
    Store(String),

    #[error("resolve: search failure: {0}")]
    Index(String),

    #[error("resolve: embedder failure: {0}")]
    Model(String),
}

impl From<StoreError> for ResolveError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { logo_id, .. } => ResolveError::NotFound(logo_id),
            StoreError::DimensionMismatch { .. } | StoreError::InvalidModelVersion(_) => {
                ResolveError::Validation(e.to_string())
            }
            other => ResolveError::Store(other.to_string()),
        }
    }
}

impl From<IndexError> for ResolveError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::NoActiveIndex => ResolveError::NoActiveIndex,
            IndexError::NotIndexed(id) => ResolveError::NotIndexed(id),
            IndexError::DimensionMismatch { .. } => ResolveError::Validation(e.to_string()),
            other => ResolveError::Index(other.to_string()),
        }
    }
}

impl From<EmbedError> for ResolveError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::InvalidBoundingBox(_) => ResolveError::Validation(e.to_string()),
            other => ResolveError::Model(other.to_string()),
        }
    }
}
