use std::io::Write;

use crate::error::VecError;
use crate::metric::Metric;

/// Match is a single result from an ANN search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Dense internal offset of the matched vector (0..N-1, assigned in
    /// input order at build time).
    pub offset: u32,

    /// Distance between the query and matched vector.
    /// Lower values indicate higher similarity.
    pub distance: f32,
}

/// BuildParams configures the construction of an ANN structure.
#[derive(Debug, Clone, Copy)]
pub struct BuildParams {
    /// Max connections per node per layer (except layer 0 which allows 2*M).
    /// Default: 16.
    pub m: usize,
    /// Size of the dynamic candidate list during construction.
    /// Default: 200.
    pub ef_construction: usize,
    /// Default size of the dynamic candidate list during search, used when a
    /// query passes precision 0. Default: 50.
    pub ef_search: usize,
    /// Seed for the level-assignment RNG. The same input vectors with the
    /// same params produce an identical structure.
    pub seed: u64,
}

impl Default for BuildParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            seed: 0,
        }
    }
}

impl BuildParams {
    /// Return a copy with zero/degenerate fields replaced by defaults.
    pub fn normalized(mut self) -> Self {
        self.set_defaults();
        self
    }

    pub(crate) fn set_defaults(&mut self) {
        if self.m < 2 {
            self.m = 16;
        }
        if self.ef_construction == 0 {
            self.ef_construction = 200;
        }
        if self.ef_search == 0 {
            self.ef_search = 50;
        }
    }

    pub(crate) fn max_conns(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }
}

/// AnnIndex is the interface for approximate nearest-neighbor search over
/// a fixed set of dense float32 vectors, addressed by internal offset.
///
/// Implementations are immutable once built: the only way to change the
/// vector set is to build a new structure. All implementations must be safe
/// for concurrent use (Send + Sync).
pub trait AnnIndex: Send + Sync {
    /// Return up to `k` nearest vectors to the query, ordered by ascending
    /// distance, ties broken by ascending offset.
    ///
    /// `ef` is the search-effort knob (candidates examined per query); 0
    /// means the build-time default. Larger values trade latency for recall.
    fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<Match>, VecError>;

    /// Return the number of vectors in the structure.
    fn len(&self) -> usize;

    /// Return true if the structure contains no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the vector dimension.
    fn dimension(&self) -> usize;

    /// Return the distance metric the structure was built with.
    fn metric(&self) -> Metric;

    /// Return the stored vector at `offset`, or None if out of range.
    fn vector(&self, offset: u32) -> Option<&[f32]>;

    /// Serialize the structure to a writer in its binary format.
    fn save(&self, w: &mut dyn Write) -> Result<(), VecError>;
}
