use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use logosearch_vecstore::{AnnIndex, BuildParams, Hnsw, Metric, load_hnsw};

use crate::error::IndexError;

/// On-disk file names within the index directory.
const INDEX_FILE: &str = "index.bin";
const META_FILE: &str = "meta.json";

/// Neighbor is a single ranked search result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub logo_id: u64,
    pub distance: f32,
}

/// Descriptive metadata of one built snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub model_version: String,
    pub dimension: usize,
    pub metric: Metric,
    /// Unix nanoseconds at build time.
    pub build_timestamp: i64,
    /// Search-effort default applied when a query passes precision 0.
    pub precision_default: usize,
    pub record_count: usize,
}

/// Sidecar file layout: metadata plus the offset-to-logo_id table.
#[derive(Serialize, Deserialize)]
struct Sidecar {
    #[serde(flatten)]
    meta: SnapshotMeta,
    logo_ids: Vec<u64>,
}

/// IndexSnapshot is an immutable search structure over the embeddings of
/// one model version, captured at a point in time.
///
/// Internal offsets are a dense 0..N-1 sequence assigned at build time in
/// ascending logo_id order; a mapping from a previous snapshot is never
/// reused.
pub struct IndexSnapshot {
    meta: SnapshotMeta,
    logo_ids: Vec<u64>,
    id_to_offset: HashMap<u64, u32>,
    ann: Box<dyn AnnIndex>,
}

impl IndexSnapshot {
    /// Build a snapshot over `(logo_id, vector)` pairs. Pairs are sorted by
    /// logo_id before offsets are assigned, so ascending offset order and
    /// ascending id order agree.
    pub fn build(
        model_version: &str,
        metric: Metric,
        vectors: &[(u64, Vec<f32>)],
        dimension: usize,
        params: BuildParams,
    ) -> Result<Self, IndexError> {
        let params = params.normalized();

        let mut sorted: Vec<&(u64, Vec<f32>)> = vectors.iter().collect();
        sorted.sort_by_key(|(id, _)| *id);

        let logo_ids: Vec<u64> = sorted.iter().map(|(id, _)| *id).collect();
        let rows: Vec<Vec<f32>> = sorted.iter().map(|(_, v)| v.clone()).collect();

        let ann = Hnsw::build(metric, dimension, &rows, params)?;

        let meta = SnapshotMeta {
            model_version: model_version.to_string(),
            dimension,
            metric,
            build_timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
            precision_default: params.ef_search,
            record_count: logo_ids.len(),
        };
        Ok(Self::assemble(meta, logo_ids, Box::new(ann)))
    }

    /// Assemble a snapshot from parts; the ANN structure may be any
    /// [AnnIndex] implementation.
    pub fn assemble(meta: SnapshotMeta, logo_ids: Vec<u64>, ann: Box<dyn AnnIndex>) -> Self {
        let id_to_offset = logo_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i as u32))
            .collect();
        Self {
            meta,
            logo_ids,
            id_to_offset,
            ann,
        }
    }

    pub fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    pub fn len(&self) -> usize {
        self.logo_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logo_ids.is_empty()
    }

    /// Whether a logo is covered by this snapshot.
    pub fn contains(&self, logo_id: u64) -> bool {
        self.id_to_offset.contains_key(&logo_id)
    }

    /// A uniformly sampled indexed logo id, or None for an empty snapshot.
    pub fn random_logo(&self) -> Option<u64> {
        if self.logo_ids.is_empty() {
            return None;
        }
        let i = rand::thread_rng().gen_range(0..self.logo_ids.len());
        Some(self.logo_ids[i])
    }

    /// Nearest neighbors of an arbitrary vector of the snapshot dimension.
    ///
    /// `precision` is the candidates-examined knob; 0 applies
    /// `meta.precision_default`. Results are sorted by non-decreasing
    /// distance, ties broken by ascending logo_id.
    pub fn search_vector(
        &self,
        query: &[f32],
        k: usize,
        precision: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.meta.dimension {
            return Err(IndexError::DimensionMismatch {
                got: query.len(),
                want: self.meta.dimension,
            });
        }

        let matches = self.ann.search(query, k, precision)?;
        let mut neighbors: Vec<Neighbor> = matches
            .into_iter()
            .map(|m| Neighbor {
                logo_id: self.logo_ids[m.offset as usize],
                distance: m.distance,
            })
            .collect();
        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.logo_id.cmp(&b.logo_id))
        });
        Ok(neighbors)
    }

    /// Nearest neighbors of an indexed logo, excluding the logo itself.
    ///
    /// Resolution goes through this snapshot's own mapping, never the
    /// store: a logo stored after this snapshot was built yields
    /// [IndexError::NotIndexed].
    pub fn search_logo(
        &self,
        logo_id: u64,
        k: usize,
        precision: usize,
    ) -> Result<Vec<Neighbor>, IndexError> {
        let &offset = self
            .id_to_offset
            .get(&logo_id)
            .ok_or(IndexError::NotIndexed(logo_id))?;
        let query = self
            .ann
            .vector(offset)
            .ok_or_else(|| IndexError::Search(format!("offset {offset} missing vector")))?
            .to_vec();

        // Ask for one extra so dropping the query logo still fills k.
        let mut neighbors = self.search_vector(&query, k.saturating_add(1), precision)?;
        neighbors.retain(|n| n.logo_id != logo_id);
        neighbors.truncate(k);
        Ok(neighbors)
    }

    /// Persist the snapshot as `index.bin` + `meta.json` in `dir`.
    ///
    /// Both files are written under temporary names and renamed into
    /// place, so a crash mid-write never leaves a half-readable snapshot.
    pub fn save_to_dir(&self, dir: &Path) -> Result<(), IndexError> {
        std::fs::create_dir_all(dir).map_err(|e| IndexError::Io(e.to_string()))?;

        let index_tmp = dir.join(format!("{INDEX_FILE}.tmp"));
        let meta_tmp = dir.join(format!("{META_FILE}.tmp"));

        {
            let mut w = BufWriter::new(
                File::create(&index_tmp).map_err(|e| IndexError::Io(e.to_string()))?,
            );
            self.ann.save(&mut w)?;
        }
        {
            let sidecar = Sidecar {
                meta: self.meta.clone(),
                logo_ids: self.logo_ids.clone(),
            };
            let w = BufWriter::new(
                File::create(&meta_tmp).map_err(|e| IndexError::Io(e.to_string()))?,
            );
            serde_json::to_writer(w, &sidecar).map_err(|e| IndexError::Io(e.to_string()))?;
        }

        std::fs::rename(&index_tmp, dir.join(INDEX_FILE))
            .map_err(|e| IndexError::Io(e.to_string()))?;
        std::fs::rename(&meta_tmp, dir.join(META_FILE))
            .map_err(|e| IndexError::Io(e.to_string()))?;
        Ok(())
    }

    /// Load a previously persisted snapshot from `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, IndexError> {
        let meta_path = dir.join(META_FILE);
        let r = BufReader::new(
            File::open(&meta_path).map_err(|e| IndexError::Io(e.to_string()))?,
        );
        let sidecar: Sidecar =
            serde_json::from_reader(r).map_err(|e| IndexError::InvalidSnapshot(e.to_string()))?;

        let mut ir = BufReader::new(
            File::open(dir.join(INDEX_FILE)).map_err(|e| IndexError::Io(e.to_string()))?,
        );
        let ann = load_hnsw(&mut ir)?;

        if ann.len() != sidecar.logo_ids.len() {
            return Err(IndexError::InvalidSnapshot(format!(
                "structure holds {} vectors but sidecar lists {} logo ids",
                ann.len(),
                sidecar.logo_ids.len()
            )));
        }
        if ann.dimension() != sidecar.meta.dimension {
            return Err(IndexError::InvalidSnapshot(format!(
                "structure dimension {} does not match sidecar {}",
                ann.dimension(),
                sidecar.meta.dimension
            )));
        }
        if ann.metric() != sidecar.meta.metric {
            return Err(IndexError::InvalidSnapshot(format!(
                "structure metric {} does not match sidecar {}",
                ann.metric().as_str(),
                sidecar.meta.metric.as_str()
            )));
        }

        Ok(Self::assemble(sidecar.meta, sidecar.logo_ids, Box::new(ann)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> IndexSnapshot {
        // Intentionally unsorted input.
        let vectors = vec![
            (3, vec![0.0, 0.0, 1.0]),
            (1, vec![1.0, 0.0, 0.0]),
            (2, vec![0.9, 0.1, 0.0]),
        ];
        IndexSnapshot::build(
            "efficientnet-b0",
            Metric::Euclidean,
            &vectors,
            3,
            BuildParams {
                m: 8,
                ef_construction: 64,
                ef_search: 32,
                seed: 11,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_build_sorts_by_logo_id() {
        let snap = sample_snapshot();
        assert_eq!(snap.len(), 3);
        assert!(snap.contains(1) && snap.contains(2) && snap.contains(3));
        assert!(!snap.contains(99));
        assert_eq!(snap.meta().record_count, 3);
        assert_eq!(snap.meta().dimension, 3);
        assert_eq!(snap.meta().precision_default, 32);
    }

    #[test]
    fn test_search_vector_ranked() {
        let snap = sample_snapshot();
        let neighbors = snap.search_vector(&[1.0, 0.0, 0.0], 3, 0).unwrap();
        assert_eq!(neighbors.len(), 3);
        assert_eq!(neighbors[0].logo_id, 1);
        assert!(neighbors[0].distance.abs() < 0.001);
        assert_eq!(neighbors[1].logo_id, 2);
        assert!((neighbors[1].distance - 0.1414).abs() < 0.001);
        assert_eq!(neighbors[2].logo_id, 3);
    }

    #[test]
    fn test_search_vector_dimension_mismatch() {
        let snap = sample_snapshot();
        let err = snap.search_vector(&[1.0, 0.0], 3, 0).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { got: 2, want: 3 }
        ));
    }

    #[test]
    fn test_search_logo_excludes_self() {
        let snap = sample_snapshot();
        let neighbors = snap.search_logo(1, 2, 0).unwrap();
        assert_eq!(neighbors.len(), 2);
        assert_eq!(neighbors[0].logo_id, 2);
        assert!((neighbors[0].distance - 0.1414).abs() < 0.001);
        assert_eq!(neighbors[1].logo_id, 3);
        assert!((neighbors[1].distance - 1.4142).abs() < 0.001);
    }

    #[test]
    fn test_random_logo_is_indexed() {
        let snap = sample_snapshot();
        for _ in 0..20 {
            let id = snap.random_logo().unwrap();
            assert!(snap.contains(id));
        }
    }

    #[test]
    fn test_search_logo_not_indexed() {
        let snap = sample_snapshot();
        let err = snap.search_logo(42, 2, 0).unwrap_err();
        assert!(matches!(err, IndexError::NotIndexed(42)));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let snap = sample_snapshot();
        snap.save_to_dir(dir.path()).unwrap();

        let loaded = IndexSnapshot::load_from_dir(dir.path()).unwrap();
        assert_eq!(loaded.meta(), snap.meta());
        assert_eq!(loaded.len(), 3);

        let a = snap.search_logo(1, 2, 0).unwrap();
        let b = loaded.search_logo(1, 2, 0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_load_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(IndexSnapshot::load_from_dir(&dir.path().join("absent")).is_err());
    }
}
