use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store: dimension mismatch for model {model_version}: got {got}, want {want}")]
    DimensionMismatch {
        model_version: String,
        got: usize,
        want: usize,
    },

    #[error("store: logo {logo_id} not found for model {model_version}")]
    NotFound { logo_id: u64, model_version: String },

    #[error("store: invalid model version: {0}")]
    InvalidModelVersion(String),

    #[error("store: storage error: {0}")]
    Storage(String),

    #[error("store: serialization error: {0}")]
    Serialization(String),
}
