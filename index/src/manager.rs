use std::sync::{Arc, RwLock};

use crate::error::IndexError;
use crate::snapshot::{IndexSnapshot, Neighbor, SnapshotMeta};

/// IndexManager holds the active snapshot and swaps it atomically.
///
/// Readers clone the [Arc] under a short read lock and search without
/// holding any lock, so in-flight queries keep the snapshot they started
/// on; a replaced snapshot is freed when its last reader finishes.
pub struct IndexManager {
    active: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexManager {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    pub fn with_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            active: RwLock::new(Some(Arc::new(snapshot))),
        }
    }

    /// Current snapshot, if any. Never blocks on a build in progress.
    pub fn active(&self) -> Option<Arc<IndexSnapshot>> {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install a new snapshot, returning the one it replaced.
    pub fn swap(&self, snapshot: IndexSnapshot) -> Option<Arc<IndexSnapshot>> {
        let next = Arc::new(snapshot);
        let mut guard = match self.active.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.replace(next)
    }

    pub fn current_meta(&self) -> Option<SnapshotMeta> {
        self.active().map(|s| s.meta().clone())
    }

    pub fn query_by_vector(
        &self,
        query: &[f32],
        k: usize,
        precision: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let snap = self.active().ok_or(IndexError::NoActiveIndex)?;
        snap.search_vector(query, k, precision)
    }

    pub fn query_by_logo_id(
        &self,
        logo_id: u64,
        k: usize,
        precision: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let snap = self.active().ok_or(IndexError::NoActiveIndex)?;
        snap.search_logo(logo_id, k, precision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logosearch_vecstore::{BuildParams, Metric};

    fn snapshot_of(vectors: Vec<(u64, Vec<f32>)>) -> IndexSnapshot {
        IndexSnapshot::build(
            "m1",
            Metric::Euclidean,
            &vectors,
            vectors[0].1.len(),
            BuildParams::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_manager_rejects_queries() {
        let mgr = IndexManager::new();
        assert!(mgr.active().is_none());
        assert!(mgr.current_meta().is_none());
        assert!(matches!(
            mgr.query_by_vector(&[1.0, 0.0], 3, 0),
            Err(IndexError::NoActiveIndex)
        ));
        assert!(matches!(
            mgr.query_by_logo_id(1, 3, 0),
            Err(IndexError::NoActiveIndex)
        ));
    }

    #[test]
    fn test_swap_replaces_snapshot() {
        let mgr = IndexManager::with_snapshot(snapshot_of(vec![
            (1, vec![0.0, 0.0]),
            (2, vec![1.0, 0.0]),
        ]));
        assert_eq!(mgr.current_meta().unwrap().record_count, 2);

        let old = mgr
            .swap(snapshot_of(vec![
                (1, vec![0.0, 0.0]),
                (2, vec![1.0, 0.0]),
                (3, vec![0.0, 1.0]),
            ]))
            .unwrap();
        assert_eq!(old.len(), 2);
        assert_eq!(mgr.current_meta().unwrap().record_count, 3);
    }

    #[test]
    fn test_inflight_reader_keeps_old_snapshot() {
        let mgr = IndexManager::with_snapshot(snapshot_of(vec![
            (1, vec![0.0, 0.0]),
            (2, vec![1.0, 0.0]),
        ]));
        let held = mgr.active().unwrap();

        mgr.swap(snapshot_of(vec![(7, vec![0.5, 0.5])]));

        // The pinned snapshot still answers with its own contents.
        let neighbors = held.search_logo(1, 1, 0).unwrap();
        assert_eq!(neighbors[0].logo_id, 2);
        assert!(!mgr.active().unwrap().contains(1));
    }
}
