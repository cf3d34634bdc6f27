use std::collections::{BinaryHeap, HashSet};
use std::io::Write;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ann::{AnnIndex, BuildParams, Match};
use crate::error::VecError;
use crate::metric::Metric;

// ---------------------------------------------------------------------------
// Internal priority-queue types
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct DistItem {
    offset: u32,
    dist: f32,
}

/// Min-heap: closest first.
impl Ord for DistItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for DistItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for DistItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.offset == other.offset
    }
}
impl Eq for DistItem {}

/// Reversed for max-heap usage: farthest first.
#[derive(Clone)]
struct MaxDistItem {
    offset: u32,
    dist: f32,
}

impl Ord for MaxDistItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}
impl PartialOrd for MaxDistItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for MaxDistItem {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist && self.offset == other.offset
    }
}
impl Eq for MaxDistItem {}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct HnswNode {
    pub(crate) vector: Vec<f32>,
    pub(crate) level: usize,
    pub(crate) friends: Vec<Vec<u32>>, // friends[layer] = neighbor offsets
}

// ---------------------------------------------------------------------------
// Hnsw
// ---------------------------------------------------------------------------

/// Hnsw is a Hierarchical Navigable Small World structure implementing
/// [AnnIndex].
///
/// The structure is built once from a full vector set and never mutated
/// afterwards: offsets are dense 0..N-1 in input order, there are no free
/// slots and no tombstones. Shared references are therefore safe across
/// threads without locking.
#[derive(Debug)]
pub struct Hnsw {
    pub(crate) metric: Metric,
    pub(crate) dim: usize,
    pub(crate) params: BuildParams,
    pub(crate) nodes: Vec<HnswNode>,
    pub(crate) entry: u32,
    pub(crate) max_level: usize,
}

impl Hnsw {
    /// Build an index over `vectors` with dense offsets assigned in input
    /// order.
    ///
    /// Level assignment is drawn from a `StdRng` seeded with `params.seed`,
    /// so identical input and params produce an identical structure.
    pub fn build(
        metric: Metric,
        dim: usize,
        vectors: &[Vec<f32>],
        mut params: BuildParams,
    ) -> Result<Self, VecError> {
        if dim == 0 {
            return Err(VecError::InvalidFormat("dimension must be positive".into()));
        }
        if vectors.is_empty() {
            return Err(VecError::EmptyBuild);
        }
        params.set_defaults();

        let mut h = Self {
            metric,
            dim,
            params,
            nodes: Vec::with_capacity(vectors.len()),
            entry: 0,
            max_level: 0,
        };

        let level_mul = 1.0 / (params.m as f64).ln();
        let mut rng = StdRng::seed_from_u64(params.seed);

        for vector in vectors {
            if vector.len() != dim {
                return Err(VecError::DimensionMismatch {
                    got: vector.len(),
                    want: dim,
                });
            }
            let level = random_level(&mut rng, level_mul);
            h.insert_node(vector, level);
        }
        Ok(h)
    }

    /// Reassemble from deserialized state (used by hnsw_io::load).
    pub(crate) fn from_parts(
        metric: Metric,
        dim: usize,
        params: BuildParams,
        nodes: Vec<HnswNode>,
        entry: u32,
        max_level: usize,
    ) -> Self {
        Self {
            metric,
            dim,
            params,
            nodes,
            entry,
            max_level,
        }
    }

    fn insert_node(&mut self, vector: &[f32], level: usize) {
        let offset = self.nodes.len() as u32;
        self.nodes.push(HnswNode {
            vector: vector.to_vec(),
            level,
            friends: vec![Vec::new(); level + 1],
        });

        // First node becomes the entry point.
        if offset == 0 {
            self.max_level = level;
            self.entry = 0;
            return;
        }

        // Phase 1: Greedy descent from the top layer down to level+1.
        let cur = self.greedy_descent(vector, self.entry, self.max_level, level + 1);

        // Phase 2: Beam search + connect at each layer.
        let top_insert = level.min(self.max_level);
        let ef_construction = self.params.ef_construction;

        let mut ep = vec![cur];
        for lev in (0..=top_insert).rev() {
            let candidates = self.search_layer(vector, &ep, ef_construction, lev);
            let max_c = self.params.max_conns(lev);
            let neighbors = self.select_closest(vector, &candidates, max_c);

            self.nodes[offset as usize].friends[lev] = neighbors.clone();

            // Bidirectional connections + pruning.
            for &n_id in &neighbors {
                self.nodes[n_id as usize].friends[lev].push(offset);
                if self.nodes[n_id as usize].friends[lev].len() > max_c {
                    let nn_vec = self.nodes[n_id as usize].vector.clone();
                    let nn_friends = self.nodes[n_id as usize].friends[lev].clone();
                    let pruned = self.select_closest(&nn_vec, &nn_friends, max_c);
                    self.nodes[n_id as usize].friends[lev] = pruned;
                }
            }

            ep = candidates;
        }

        // Raise the entry point if the new node is higher.
        if level > self.max_level {
            self.entry = offset;
            self.max_level = level;
        }
    }

    /// Walk greedily towards the query from `start` through layers
    /// `top..=bottom` (bottom >= 1), returning the closest node found.
    fn greedy_descent(&self, query: &[f32], start: u32, top: usize, bottom: usize) -> u32 {
        let mut cur = start;
        let mut cur_dist = self
            .metric
            .distance(query, &self.nodes[cur as usize].vector);

        for lev in (bottom..=top).rev() {
            let mut changed = true;
            while changed {
                changed = false;
                let nd = &self.nodes[cur as usize];
                if lev < nd.friends.len() {
                    for &f_id in &nd.friends[lev] {
                        let d = self
                            .metric
                            .distance(query, &self.nodes[f_id as usize].vector);
                        if d < cur_dist {
                            cur = f_id;
                            cur_dist = d;
                            changed = true;
                        }
                    }
                }
            }
        }
        cur
    }

    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[u32],
        ef: usize,
        layer: usize,
    ) -> Vec<u32> {
        let mut visited = HashSet::with_capacity(ef * 2);
        let mut candidates: BinaryHeap<DistItem> = BinaryHeap::new();
        let mut results: BinaryHeap<MaxDistItem> = BinaryHeap::new();

        for &ep in entry_points {
            visited.insert(ep);
            let d = self
                .metric
                .distance(query, &self.nodes[ep as usize].vector);
            candidates.push(DistItem { offset: ep, dist: d });
            results.push(MaxDistItem { offset: ep, dist: d });
        }

        while let Some(closest) = candidates.pop() {
            if results.len() >= ef {
                if let Some(farthest) = results.peek() {
                    if closest.dist > farthest.dist {
                        break;
                    }
                }
            }

            let nd = &self.nodes[closest.offset as usize];
            if layer < nd.friends.len() {
                for &f_id in &nd.friends[layer] {
                    if visited.contains(&f_id) {
                        continue;
                    }
                    visited.insert(f_id);

                    let d = self
                        .metric
                        .distance(query, &self.nodes[f_id as usize].vector);
                    let should_add = results.len() < ef
                        || results.peek().map_or(true, |far| d < far.dist);
                    if should_add {
                        candidates.push(DistItem { offset: f_id, dist: d });
                        results.push(MaxDistItem { offset: f_id, dist: d });
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        results.into_iter().map(|item| item.offset).collect()
    }

    fn select_closest(&self, query: &[f32], candidates: &[u32], max_n: usize) -> Vec<u32> {
        if candidates.len() <= max_n {
            return candidates.to_vec();
        }

        let mut items: Vec<(u32, f32)> = candidates
            .iter()
            .map(|&c_id| {
                (
                    c_id,
                    self.metric
                        .distance(query, &self.nodes[c_id as usize].vector),
                )
            })
            .collect();

        items.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        items.truncate(max_n);
        items.into_iter().map(|(id, _)| id).collect()
    }
}

fn random_level(rng: &mut StdRng, level_mul: f64) -> usize {
    let r: f64 = rng.r#gen::<f64>().max(f64::MIN_POSITIVE);
    let level = (-r.ln() * level_mul) as usize;
    level.min(31)
}

impl AnnIndex for Hnsw {
    fn search(&self, query: &[f32], k: usize, ef: usize) -> Result<Vec<Match>, VecError> {
        if query.len() != self.dim {
            return Err(VecError::DimensionMismatch {
                got: query.len(),
                want: self.dim,
            });
        }
        if k == 0 {
            return Ok(vec![]);
        }

        let ef = if ef == 0 { self.params.ef_search } else { ef };
        let ef = ef.max(k);

        // Phase 1: Greedy descent from the top layer down to layer 1.
        let cur = self.greedy_descent(query, self.entry, self.max_level, 1);

        // Phase 2: Beam search at layer 0.
        let candidates = self.search_layer(query, &[cur], ef, 0);

        let mut results: Vec<(u32, f32)> = candidates
            .iter()
            .map(|&c_id| {
                (
                    c_id,
                    self.metric
                        .distance(query, &self.nodes[c_id as usize].vector),
                )
            })
            .collect();

        // Sort by distance, then offset, so equal distances rank stably.
        results.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        results.truncate(k);

        Ok(results
            .into_iter()
            .map(|(offset, distance)| Match { offset, distance })
            .collect())
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn vector(&self, offset: u32) -> Option<&[f32]> {
        self.nodes.get(offset as usize).map(|nd| nd.vector.as_slice())
    }

    fn save(&self, w: &mut dyn Write) -> Result<(), VecError> {
        crate::hnsw_io::save(self, w)
    }
}
