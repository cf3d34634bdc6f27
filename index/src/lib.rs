//! Nearest-neighbor index management.
//!
//! The embedding store is the source of truth; searches run against an
//! immutable [IndexSnapshot] built from it by the [RegenerationJob] and
//! held by the [IndexManager]. A logo added to the store becomes
//! searchable only after the next successful rebuild; that staleness
//! window is part of the contract.

pub mod error;
pub mod manager;
pub mod regen;
pub mod resolver;
pub mod snapshot;

pub use error::{IndexError, RegenError, ResolveError};
pub use manager::IndexManager;
pub use regen::{JobState, RegenerationJob};
pub use resolver::{AddRequest, AddSource, Counts, Resolver};
pub use snapshot::{IndexSnapshot, Neighbor, SnapshotMeta};
