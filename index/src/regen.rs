use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use logosearch_store::EmbeddingStore;
use logosearch_vecstore::{BuildParams, Metric};

use crate::error::RegenError;
use crate::manager::IndexManager;
use crate::snapshot::{IndexSnapshot, SnapshotMeta};

/// Observable phase of the regeneration job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Building,
    Swapping,
    Failed,
}

/// RegenerationJob rebuilds the snapshot from the store and installs it.
///
/// At most one build runs at a time; a second request while one is in
/// flight is rejected with [RegenError::Busy] rather than queued. A
/// failed or cancelled run leaves the active snapshot untouched.
pub struct RegenerationJob {
    store: Arc<EmbeddingStore>,
    manager: Arc<IndexManager>,
    index_dir: PathBuf,
    running: Mutex<()>,
    state: RwLock<JobState>,
    cancelled: AtomicBool,
}

impl RegenerationJob {
    pub fn new(store: Arc<EmbeddingStore>, manager: Arc<IndexManager>, index_dir: PathBuf) -> Self {
        Self {
            store,
            manager,
            index_dir,
            running: Mutex::new(()),
            state: RwLock::new(JobState::Idle),
            cancelled: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> JobState {
        match self.state.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: JobState) {
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Request cancellation of the in-flight build. The flag is consumed
    /// at the next checkpoint; calling this while idle cancels the next
    /// run instead.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn consume_cancel(&self) -> Result<(), RegenError> {
        if self.cancelled.swap(false, Ordering::SeqCst) {
            return Err(RegenError::Cancelled);
        }
        Ok(())
    }

    /// Rebuild the snapshot for `model_version` and swap it in, returning
    /// the metadata of the new snapshot.
    ///
    /// The build runs entirely off to the side; queries keep hitting the
    /// previous snapshot until the swap, which is the last step.
    pub fn run(
        &self,
        model_version: &str,
        metric: Metric,
        params: BuildParams,
    ) -> Result<SnapshotMeta, RegenError> {
        let _guard = self.running.try_lock().map_err(|_| RegenError::Busy)?;

        let result = self.run_locked(model_version, metric, params);
        match &result {
            Ok(_) => self.set_state(JobState::Idle),
            Err(e) => {
                warn!(model_version, error = %e, "index rebuild failed");
                self.set_state(JobState::Failed);
            }
        }
        result
    }

    fn run_locked(
        &self,
        model_version: &str,
        metric: Metric,
        params: BuildParams,
    ) -> Result<SnapshotMeta, RegenError> {
        self.set_state(JobState::Building);
        self.consume_cancel()?;

        let started = Instant::now();
        let (vectors, dimension) = self.store.scan_version(model_version)?;
        if vectors.is_empty() {
            return Err(RegenError::EmptyStore(model_version.to_string()));
        }
        info!(
            model_version,
            count = vectors.len(),
            dimension,
            "index rebuild started"
        );

        let snapshot = IndexSnapshot::build(model_version, metric, &vectors, dimension, params)?;

        self.consume_cancel()?;
        snapshot.save_to_dir(&self.index_dir)?;

        self.set_state(JobState::Swapping);
        let meta = snapshot.meta().clone();
        self.manager.swap(snapshot);
        info!(
            model_version,
            record_count = meta.record_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index rebuild complete"
        );
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logosearch_store::{EmbeddingStore, LogoEmbedding, MemoryBackend, SourceMeta};

    fn seeded_store(ids: &[u64]) -> Arc<EmbeddingStore> {
        let store = EmbeddingStore::new(Box::new(MemoryBackend::new()));
        for &id in ids {
            let rec = LogoEmbedding::new(id, "m1", vec![id as f32, 0.0, 0.0], SourceMeta::default());
            store.put(&rec).unwrap();
        }
        Arc::new(store)
    }

    #[test]
    fn test_run_builds_and_swaps() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&[1, 2, 3]);
        let manager = Arc::new(IndexManager::new());
        let job = RegenerationJob::new(store, manager.clone(), dir.path().to_path_buf());

        job.run("m1", Metric::Euclidean, BuildParams::default())
            .unwrap();
        assert_eq!(job.state(), JobState::Idle);

        let meta = manager.current_meta().unwrap();
        assert_eq!(meta.record_count, 3);
        assert_eq!(meta.model_version, "m1");

        // The persisted copy reloads to the same contents.
        let loaded = IndexSnapshot::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.len(), 3);
    }

    #[test]
    fn test_empty_store_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&[]);
        let manager = Arc::new(IndexManager::new());
        let job = RegenerationJob::new(store, manager.clone(), dir.path().to_path_buf());

        let err = job
            .run("m1", Metric::Euclidean, BuildParams::default())
            .unwrap_err();
        assert!(matches!(err, RegenError::EmptyStore(_)));
        assert_eq!(job.state(), JobState::Failed);
        assert!(manager.active().is_none());
    }

    #[test]
    fn test_failed_run_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&[1, 2]);
        let manager = Arc::new(IndexManager::new());
        let job = RegenerationJob::new(store, manager.clone(), dir.path().to_path_buf());

        job.run("m1", Metric::Euclidean, BuildParams::default())
            .unwrap();
        let before = manager.current_meta().unwrap();

        // No records under this version, so the run fails.
        let err = job
            .run("m2", Metric::Euclidean, BuildParams::default())
            .unwrap_err();
        assert!(matches!(err, RegenError::EmptyStore(_)));
        assert_eq!(manager.current_meta().unwrap(), before);
    }

    #[test]
    fn test_cancel_consumed_by_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&[1, 2]);
        let manager = Arc::new(IndexManager::new());
        let job = RegenerationJob::new(store, manager.clone(), dir.path().to_path_buf());

        job.cancel();
        let err = job
            .run("m1", Metric::Euclidean, BuildParams::default())
            .unwrap_err();
        assert!(matches!(err, RegenError::Cancelled));
        assert!(manager.active().is_none());

        // The flag was consumed; the next run succeeds.
        job.run("m1", Metric::Euclidean, BuildParams::default())
            .unwrap();
        assert_eq!(manager.current_meta().unwrap().record_count, 2);
    }

    #[test]
    fn test_busy_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&[1]);
        let manager = Arc::new(IndexManager::new());
        let job = RegenerationJob::new(store, manager, dir.path().to_path_buf());

        let guard = job.running.lock().unwrap();
        let err = job
            .run("m1", Metric::Euclidean, BuildParams::default())
            .unwrap_err();
        assert!(matches!(err, RegenError::Busy));
        drop(guard);

        job.run("m1", Metric::Euclidean, BuildParams::default())
            .unwrap();
    }
}
