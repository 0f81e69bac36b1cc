//! Persistent HNSW vector index
//!
//! The point set (id, vector) is the authoritative state and is what gets
//! persisted; the HNSW graph is derived from it and rebuilt on load. The
//! underlying graph does not support deletion, so removal is implemented by
//! filtering the point set and rebuilding. Saves write to a sibling
//! directory and swap it into place so a crash never leaves a torn index.

use crate::error::{QuarryError, Result};
use hnsw_rs::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

const META_FILE: &str = "meta.json";
const POINTS_FILE: &str = "points.bin";

/// On-disk metadata; the recorded dimension is checked on load
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMeta {
    dimension: usize,
    model: String,
    count: usize,
}

struct IndexState {
    dimension: Option<usize>,
    model: Option<String>,
    points: BTreeMap<i64, Vec<f32>>,
    hnsw: Option<Hnsw<'static, f32, DistCosine>>,
}

/// Persistent vector index over (id, vector) points
///
/// Uses cosine similarity; scores are `1 - distance`, higher is more
/// similar. Ties break toward the smaller id.
pub struct VectorIndex {
    dir: PathBuf,
    hnsw_m: usize,
    ef_construction: usize,
    ef_search: usize,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Open the index at `dir`, loading persisted points if present
    pub fn open(dir: &Path, hnsw_m: usize, ef_construction: usize, ef_search: usize) -> Result<Self> {
        let index = Self {
            dir: dir.to_path_buf(),
            hnsw_m,
            ef_construction,
            ef_search,
            state: RwLock::new(IndexState {
                dimension: None,
                model: None,
                points: BTreeMap::new(),
                hnsw: None,
            }),
        };

        let meta_path = dir.join(META_FILE);
        if meta_path.exists() {
            index.load()?;
        }

        Ok(index)
    }

    fn load(&self) -> Result<()> {
        let meta_raw = std::fs::read_to_string(self.dir.join(META_FILE))
            .map_err(|e| QuarryError::io(e, format!("Failed to read index meta: {:?}", self.dir)))?;
        let meta: IndexMeta = serde_json::from_str(&meta_raw)
            .map_err(|e| QuarryError::json(e, format!("Invalid index meta: {:?}", self.dir)))?;

        let points_raw = std::fs::read(self.dir.join(POINTS_FILE)).map_err(|e| {
            QuarryError::io(e, format!("Failed to read index points: {:?}", self.dir))
        })?;
        let raw_points: Vec<(i64, Vec<f32>)> = bincode::deserialize(&points_raw)
            .map_err(|e| QuarryError::Index(format!("Corrupt point file: {}", e)))?;

        let mut points = BTreeMap::new();
        for (id, vector) in raw_points {
            if vector.len() != meta.dimension {
                return Err(QuarryError::DimensionMismatch {
                    expected: meta.dimension,
                    actual: vector.len(),
                });
            }
            points.insert(id, vector);
        }

        let hnsw = if points.is_empty() {
            None
        } else {
            Some(self.build_hnsw(&points))
        };

        let mut state = self.state.write().unwrap();
        state.dimension = Some(meta.dimension);
        state.model = Some(meta.model);
        state.points = points;
        state.hnsw = hnsw;

        tracing::debug!(
            "Loaded vector index {:?}: {} points, dimension {}",
            self.dir,
            state.points.len(),
            meta.dimension
        );

        Ok(())
    }

    fn build_hnsw(&self, points: &BTreeMap<i64, Vec<f32>>) -> Hnsw<'static, f32, DistCosine> {
        let hnsw = Hnsw::<f32, DistCosine>::new(
            self.hnsw_m,
            points.len().max(16),
            16,
            self.ef_construction,
            DistCosine,
        );
        for (id, vector) in points {
            hnsw.insert((vector, *id as usize));
        }
        hnsw
    }

    /// Adopt (or verify) the dimension and model for incoming vectors.
    ///
    /// An empty index records them; a populated index rejects a differing
    /// dimension with `DimensionMismatch`.
    pub fn ensure_compatible(&self, dimension: usize, model: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        match state.dimension {
            None => {
                state.dimension = Some(dimension);
                state.model = Some(model.to_string());
                Ok(())
            }
            Some(existing) if existing == dimension => {
                state.model = Some(model.to_string());
                Ok(())
            }
            Some(existing) => Err(QuarryError::DimensionMismatch {
                expected: existing,
                actual: dimension,
            }),
        }
    }

    /// Insert or replace a vector
    pub fn upsert(&self, id: i64, vector: Vec<f32>) -> Result<()> {
        let mut state = self.state.write().unwrap();

        let dimension = match state.dimension {
            Some(d) => d,
            None => {
                let d = vector.len();
                state.dimension = Some(d);
                d
            }
        };

        if vector.len() != dimension {
            return Err(QuarryError::DimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let replaced = state.points.insert(id, vector).is_some();
        if replaced {
            // The graph cannot replace a point in place
            let rebuilt = self.build_hnsw(&state.points);
            state.hnsw = Some(rebuilt);
        } else {
            if state.hnsw.is_none() {
                state.hnsw = Some(self.build_hnsw(&BTreeMap::new()));
            }
            let vector_ref = state.points.get(&id).expect("point just inserted");
            state
                .hnsw
                .as_ref()
                .expect("graph just ensured")
                .insert((vector_ref, id as usize));
        }

        Ok(())
    }

    /// Search for the k nearest neighbors.
    /// Results are in descending similarity order, ties by smaller id.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>> {
        let state = self.state.read().unwrap();

        if state.points.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let dimension = state.dimension.expect("populated index has a dimension");
        if query.len() != dimension {
            return Err(QuarryError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let hnsw = state.hnsw.as_ref().expect("populated index has a graph");
        let knbn = k.min(state.points.len());
        let neighbors = hnsw.search(query, knbn, self.ef_search.max(knbn));

        let mut results: Vec<(i64, f32)> = neighbors
            .into_iter()
            .map(|n| (n.d_id as i64, 1.0 - n.distance))
            .filter(|(id, _)| state.points.contains_key(id))
            .collect();

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        results.truncate(k);

        Ok(results)
    }

    /// Remove the given ids by filtering the point set and rebuilding
    pub fn rebuild_excluding(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let exclude: std::collections::HashSet<i64> = ids.iter().copied().collect();
        let mut state = self.state.write().unwrap();

        let before = state.points.len();
        state.points.retain(|id, _| !exclude.contains(id));

        if state.points.len() != before {
            let rebuilt = if state.points.is_empty() {
                None
            } else {
                Some(self.build_hnsw(&state.points))
            };
            state.hnsw = rebuilt;
            tracing::debug!(
                "Rebuilt vector index {:?} excluding {} ids ({} points remain)",
                self.dir,
                before - state.points.len(),
                state.points.len()
            );
        }

        Ok(())
    }

    /// Remove the given ids (alias for the rebuild path)
    pub fn delete(&self, ids: &[i64]) -> Result<()> {
        self.rebuild_excluding(ids)
    }

    /// Persist the point set. Writes a sibling directory and swaps it into
    /// place; an index that never recorded a dimension has nothing to save.
    pub fn save(&self) -> Result<()> {
        let state = self.state.read().unwrap();

        let (dimension, model) = match (&state.dimension, &state.model) {
            (Some(d), Some(m)) => (*d, m.clone()),
            _ => return Ok(()),
        };

        let tmp_dir = self.dir.with_extension("tmp");
        if tmp_dir.exists() {
            std::fs::remove_dir_all(&tmp_dir)
                .map_err(|e| QuarryError::io(e, format!("Failed to clear {:?}", tmp_dir)))?;
        }
        std::fs::create_dir_all(&tmp_dir)
            .map_err(|e| QuarryError::io(e, format!("Failed to create {:?}", tmp_dir)))?;

        let meta = IndexMeta {
            dimension,
            model,
            count: state.points.len(),
        };
        let meta_raw = serde_json::to_string_pretty(&meta)
            .map_err(|e| QuarryError::json(e, "Failed to serialize index meta"))?;
        std::fs::write(tmp_dir.join(META_FILE), meta_raw)
            .map_err(|e| QuarryError::io(e, "Failed to write index meta"))?;

        let raw_points: Vec<(i64, Vec<f32>)> = state
            .points
            .iter()
            .map(|(id, v)| (*id, v.clone()))
            .collect();
        let encoded = bincode::serialize(&raw_points)
            .map_err(|e| QuarryError::Index(format!("Failed to encode points: {}", e)))?;
        std::fs::write(tmp_dir.join(POINTS_FILE), encoded)
            .map_err(|e| QuarryError::io(e, "Failed to write index points"))?;

        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)
                .map_err(|e| QuarryError::io(e, format!("Failed to replace {:?}", self.dir)))?;
        }
        std::fs::rename(&tmp_dir, &self.dir)
            .map_err(|e| QuarryError::io(e, format!("Failed to swap index into {:?}", self.dir)))?;

        Ok(())
    }

    /// Drop all in-memory state (used after the on-disk index was destroyed)
    pub fn reset(&self) {
        let mut state = self.state.write().unwrap();
        state.dimension = None;
        state.model = None;
        state.points.clear();
        state.hnsw = None;
    }

    /// Remove an index directory from disk
    pub fn destroy(dir: &Path) -> Result<()> {
        for path in [dir.to_path_buf(), dir.with_extension("tmp")] {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(QuarryError::io(e, format!("Failed to remove {:?}", path)))
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: i64) -> bool {
        self.state.read().unwrap().points.contains_key(&id)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.state.read().unwrap().dimension
    }

    pub fn model(&self) -> Option<String> {
        self.state.read().unwrap().model.clone()
    }
}
