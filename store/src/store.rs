use std::sync::Mutex;

use crate::backend::Backend;
use crate::error::StoreError;
use crate::keys::{dim_key, embedding_key, embedding_prefix, parse_logo_id};
use crate::types::{LogoEmbedding, SourceMeta};

const DEFAULT_PAGE_SIZE: usize = 100;

/// One page of the stored-logo listing, ordered by ascending logo_id.
#[derive(Debug, Clone)]
pub struct ListPage {
    pub entries: Vec<(u64, SourceMeta)>,
    /// Token to pass for the next page; None when the listing is exhausted.
    pub next_page_token: Option<u64>,
}

/// EmbeddingStore is the durable collection of all [LogoEmbedding] records,
/// for all model versions seen.
///
/// Records are keyed by `(model_version, logo_id)`; re-adding an existing
/// key overwrites (last-write-wins). The first record of a model version
/// fixes its vector dimension; later writes with a different dimension are
/// rejected. Records are never deleted.
pub struct EmbeddingStore {
    backend: Box<dyn Backend>,
    // Serializes put calls so a dimension check and its write commit
    // together and same-key overwrites never interleave. Reads go straight
    // to the backend.
    write_lock: Mutex<()>,
}

impl EmbeddingStore {
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Add or overwrite an embedding record.
    ///
    /// Validates the vector dimension against the model version's fixed
    /// dimension (established by its first record) before writing anything.
    pub fn put(&self, rec: &LogoEmbedding) -> Result<(), StoreError> {
        if rec.model_version.is_empty() || rec.model_version.contains(':') {
            return Err(StoreError::InvalidModelVersion(rec.model_version.clone()));
        }
        if rec.vector.is_empty() {
            return Err(StoreError::DimensionMismatch {
                model_version: rec.model_version.clone(),
                got: 0,
                want: 1,
            });
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let dk = dim_key(&rec.model_version);
        let fixed_dim = self.read_dim(&dk)?;
        match fixed_dim {
            Some(want) if want != rec.vector.len() => {
                return Err(StoreError::DimensionMismatch {
                    model_version: rec.model_version.clone(),
                    got: rec.vector.len(),
                    want,
                });
            }
            _ => {}
        }

        let data = rmp_serde::to_vec_named(rec)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let ek = embedding_key(&rec.model_version, rec.logo_id);

        if fixed_dim.is_none() {
            // First record of this model version fixes the dimension;
            // write both keys in one atomic batch.
            let dim_str = rec.vector.len().to_string();
            self.backend
                .batch_set(&[(dk.as_str(), dim_str.as_bytes()), (ek.as_str(), &data)])?;
        } else {
            self.backend.set(&ek, &data)?;
        }
        Ok(())
    }

    /// Fetch a record.
    pub fn get(&self, logo_id: u64, model_version: &str) -> Result<LogoEmbedding, StoreError> {
        let key = embedding_key(model_version, logo_id);
        match self.backend.get(&key)? {
            Some(data) => rmp_serde::from_slice(&data)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Err(StoreError::NotFound {
                logo_id,
                model_version: model_version.to_string(),
            }),
        }
    }

    /// Return true if a record exists for the key.
    pub fn contains(&self, logo_id: u64, model_version: &str) -> Result<bool, StoreError> {
        let key = embedding_key(model_version, logo_id);
        Ok(self.backend.get(&key)?.is_some())
    }

    /// Return the fixed dimension of a model version, if any record exists.
    pub fn dimension(&self, model_version: &str) -> Result<Option<usize>, StoreError> {
        self.read_dim(&dim_key(model_version))
    }

    /// Total stored records for a model version.
    pub fn count(&self, model_version: &str) -> Result<usize, StoreError> {
        Ok(self.backend.scan(&embedding_prefix(model_version))?.len())
    }

    /// Stable paginated listing ordered by ascending logo_id.
    ///
    /// `page_token` is the last logo_id of the previous page (exclusive);
    /// None starts from the beginning. Repeated listing with no intervening
    /// writes returns the same partition.
    pub fn list(
        &self,
        model_version: &str,
        page_token: Option<u64>,
        page_size: usize,
    ) -> Result<ListPage, StoreError> {
        let page_size = if page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size
        };

        let prefix = embedding_prefix(model_version);
        let start_key = match page_token {
            // Scan from just past the token id. A token at the maximum id
            // has nothing after it, so the listing ends here.
            Some(token) => match token.checked_add(1) {
                Some(next) => embedding_key(model_version, next),
                None => {
                    return Ok(ListPage {
                        entries: Vec::new(),
                        next_page_token: None,
                    });
                }
            },
            None => prefix.clone(),
        };

        let mut entries = Vec::with_capacity(page_size);
        let mut more = false;
        for (key, data) in self.backend.scan(&prefix)? {
            if key < start_key {
                continue;
            }
            if entries.len() == page_size {
                more = true;
                break;
            }
            let logo_id = match parse_logo_id(&key, &prefix) {
                Some(id) => id,
                None => {
                    return Err(StoreError::Serialization(format!("malformed key {key}")));
                }
            };
            let rec: LogoEmbedding = rmp_serde::from_slice(&data)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            entries.push((logo_id, rec.meta));
        }

        let next_page_token = if more {
            entries.last().map(|(id, _)| *id)
        } else {
            None
        };
        Ok(ListPage {
            entries,
            next_page_token,
        })
    }

    /// Point-in-time read of all vectors for a model version, sorted by
    /// ascending logo_id, together with the version's dimension.
    ///
    /// Consumed by index regeneration: writes landing after this call do
    /// not appear in the returned set.
    pub fn scan_version(
        &self,
        model_version: &str,
    ) -> Result<(Vec<(u64, Vec<f32>)>, usize), StoreError> {
        let prefix = embedding_prefix(model_version);
        let raw = self.backend.scan(&prefix)?;

        let mut out = Vec::with_capacity(raw.len());
        for (key, data) in raw {
            let logo_id = match parse_logo_id(&key, &prefix) {
                Some(id) => id,
                None => {
                    return Err(StoreError::Serialization(format!("malformed key {key}")));
                }
            };
            let rec: LogoEmbedding = rmp_serde::from_slice(&data)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            out.push((logo_id, rec.vector));
        }

        let dim = self.dimension(model_version)?.unwrap_or(0);
        Ok((out, dim))
    }

    fn read_dim(&self, dk: &str) -> Result<Option<usize>, StoreError> {
        match self.backend.get(dk)? {
            Some(data) => {
                let s = String::from_utf8(data)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                let dim = s
                    .parse::<usize>()
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(dim))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MemoryBackend, RedbBackend};
    use tempfile::tempdir;

    const MODEL: &str = "efficientnet-b0";

    fn mem_store() -> EmbeddingStore {
        EmbeddingStore::new(Box::new(MemoryBackend::new()))
    }

    fn rec(logo_id: u64, vector: Vec<f32>) -> LogoEmbedding {
        LogoEmbedding::new(logo_id, MODEL, vector, SourceMeta::default())
    }

    #[test]
    fn test_put_get() {
        let store = mem_store();
        store.put(&rec(1, vec![1.0, 0.0, 0.0])).unwrap();

        let got = store.get(1, MODEL).unwrap();
        assert_eq!(got.logo_id, 1);
        assert_eq!(got.vector, vec![1.0, 0.0, 0.0]);
        assert!(got.meta.added_at > 0);
    }

    #[test]
    fn test_get_not_found() {
        let store = mem_store();
        let err = store.get(7, MODEL).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { logo_id: 7, .. }));
    }

    #[test]
    fn test_overwrite_last_write_wins() {
        let store = mem_store();
        store.put(&rec(1, vec![1.0, 0.0, 0.0])).unwrap();
        store.put(&rec(1, vec![0.0, 1.0, 0.0])).unwrap();

        assert_eq!(store.count(MODEL).unwrap(), 1);
        assert_eq!(store.get(1, MODEL).unwrap().vector, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_first_record_fixes_dimension() {
        let store = mem_store();
        store.put(&rec(1, vec![1.0, 0.0, 0.0])).unwrap();
        assert_eq!(store.dimension(MODEL).unwrap(), Some(3));

        let err = store.put(&rec(2, vec![1.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch { got: 2, want: 3, .. }
        ));
        // The bad write left no record behind.
        assert_eq!(store.count(MODEL).unwrap(), 1);
    }

    #[test]
    fn test_versions_are_independent() {
        let store = mem_store();
        store.put(&rec(1, vec![1.0, 0.0, 0.0])).unwrap();
        store
            .put(&LogoEmbedding::new(
                1,
                "clip-vit",
                vec![0.5, 0.5],
                SourceMeta::default(),
            ))
            .unwrap();

        assert_eq!(store.dimension(MODEL).unwrap(), Some(3));
        assert_eq!(store.dimension("clip-vit").unwrap(), Some(2));
        assert_eq!(store.count(MODEL).unwrap(), 1);
        assert_eq!(store.count("clip-vit").unwrap(), 1);
    }

    #[test]
    fn test_invalid_model_version() {
        let store = mem_store();
        let mut r = rec(1, vec![1.0]);
        r.model_version = "has:colon".into();
        assert!(matches!(
            store.put(&r),
            Err(StoreError::InvalidModelVersion(_))
        ));
        r.model_version = String::new();
        assert!(store.put(&r).is_err());
    }

    #[test]
    fn test_list_pagination() {
        let store = mem_store();
        for id in [5u64, 1, 9, 3, 7] {
            store.put(&rec(id, vec![id as f32])).unwrap();
        }

        let page1 = store.list(MODEL, None, 2).unwrap();
        let ids1: Vec<u64> = page1.entries.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids1, vec![1, 3]);
        assert_eq!(page1.next_page_token, Some(3));

        let page2 = store.list(MODEL, page1.next_page_token, 2).unwrap();
        let ids2: Vec<u64> = page2.entries.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids2, vec![5, 7]);

        let page3 = store.list(MODEL, page2.next_page_token, 2).unwrap();
        let ids3: Vec<u64> = page3.entries.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids3, vec![9]);
        assert_eq!(page3.next_page_token, None);
    }

    #[test]
    fn test_list_token_at_max_id_terminates() {
        let store = mem_store();
        store.put(&rec(1, vec![1.0])).unwrap();
        store.put(&rec(u64::MAX, vec![2.0])).unwrap();

        let page = store.list(MODEL, None, 10).unwrap();
        let ids: Vec<u64> = page.entries.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, u64::MAX]);
        assert_eq!(page.next_page_token, None);

        // A caller resuming from the maximum id gets an empty final page
        // instead of the last record again.
        let page = store.list(MODEL, Some(u64::MAX), 10).unwrap();
        assert!(page.entries.is_empty());
        assert_eq!(page.next_page_token, None);
    }

    #[test]
    fn test_list_is_stable() {
        let store = mem_store();
        for id in 0..10u64 {
            store.put(&rec(id, vec![id as f32])).unwrap();
        }
        let a = store.list(MODEL, None, 4).unwrap();
        let b = store.list(MODEL, None, 4).unwrap();
        let ids = |p: &ListPage| p.entries.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.next_page_token, b.next_page_token);
    }

    #[test]
    fn test_scan_version_sorted() {
        let store = mem_store();
        for id in [42u64, 7, 100] {
            store.put(&rec(id, vec![id as f32, 0.0])).unwrap();
        }

        let (vectors, dim) = store.scan_version(MODEL).unwrap();
        assert_eq!(dim, 2);
        let ids: Vec<u64> = vectors.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![7, 42, 100]);
    }

    #[test]
    fn test_scan_version_empty() {
        let store = mem_store();
        let (vectors, dim) = store.scan_version(MODEL).unwrap();
        assert!(vectors.is_empty());
        assert_eq!(dim, 0);
    }

    #[test]
    fn test_redb_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.redb");
        {
            let store = EmbeddingStore::new(Box::new(RedbBackend::open(&path).unwrap()));
            store.put(&rec(1, vec![1.0, 2.0])).unwrap();
            store.put(&rec(2, vec![3.0, 4.0])).unwrap();
        }

        let store = EmbeddingStore::new(Box::new(RedbBackend::open(&path).unwrap()));
        assert_eq!(store.count(MODEL).unwrap(), 2);
        assert_eq!(store.dimension(MODEL).unwrap(), Some(2));
        assert_eq!(store.get(2, MODEL).unwrap().vector, vec![3.0, 4.0]);
    }
}
