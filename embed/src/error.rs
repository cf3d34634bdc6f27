use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embed: invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("embed: API error: {0}")]
    Api(String),

    #[error("embed: bad response: {0}")]
    BadResponse(String),

    #[error("embed: wrong embedding dimension: got {got}, want {want}")]
    WrongDimension { got: usize, want: usize },
}
