pub mod ann;
pub mod error;
pub mod hnsw;
pub mod hnsw_io;
pub mod metric;

pub use ann::{AnnIndex, BuildParams, Match};
pub use error::VecError;
pub use hnsw::Hnsw;
pub use hnsw_io::{load as load_hnsw, save as save_hnsw};
pub use metric::Metric;
