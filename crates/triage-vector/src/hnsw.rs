//! HNSW index implementation using usearch.
//!
//! The index is derived data: every vector in it also lives in a RocksDB row,
//! so a lost or stale index file is rebuilt rather than trusted.
//!
//! Default parameters favour recall:
//! - M = 16 (connections per layer)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 100 (search-time quality)

use std::path::PathBuf;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::StoreError;

const INDEX_FILE: &str = "hnsw.usearch";

/// HNSW index configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Embedding dimension (must match the store)
    pub dimension: usize,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Directory holding the index file
    pub index_path: PathBuf,
    /// Initial capacity; the index grows on demand
    pub capacity: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            connectivity: 16,
            expansion_add: 200,
            expansion_search: 100,
            index_path: PathBuf::from("./hnsw"),
            capacity: 1_024,
        }
    }
}

impl HnswConfig {
    pub fn new(dimension: usize, index_path: impl Into<PathBuf>) -> Self {
        Self {
            dimension,
            index_path: index_path.into(),
            ..Default::default()
        }
    }

    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.connectivity = m;
        self
    }

    pub fn with_expansion(mut self, ef_add: usize, ef_search: usize) -> Self {
        self.expansion_add = ef_add;
        self.expansion_search = ef_search;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    fn options(&self) -> IndexOptions {
        IndexOptions {
            dimensions: self.dimension,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false,
        }
    }
}

/// Nearest-neighbor candidate from the index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Internal vector id (maps back to a row via `vector_keys`)
    pub vector_id: u64,
    /// Approximate similarity (1 - cosine distance)
    pub score: f32,
}

/// HNSW index wrapper around usearch.
pub struct HnswIndex {
    index: RwLock<Index>,
    config: HnswConfig,
}

fn index_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Index(e.to_string())
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Constraint("vector index lock poisoned".to_string())
}

impl HnswIndex {
    /// Open the index file if present, otherwise create an empty index.
    pub fn open_or_create(config: HnswConfig) -> Result<Self, StoreError> {
        let index_file = config.index_path.join(INDEX_FILE);

        let index = if index_file.exists() {
            info!(path = ?index_file, "Opening existing vector index");
            let idx = Index::new(&config.options()).map_err(index_err)?;
            idx.load(path_str(&index_file)?)
                .map_err(|e| StoreError::Index(format!("Failed to load: {}", e)))?;
            if idx.dimensions() != config.dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: config.dimension,
                    actual: idx.dimensions(),
                });
            }
            idx
        } else {
            info!(path = ?index_file, dim = config.dimension, "Creating new vector index");
            std::fs::create_dir_all(&config.index_path)?;
            Self::empty_index(&config)?
        };

        Ok(Self {
            index: RwLock::new(index),
            config,
        })
    }

    fn empty_index(config: &HnswConfig) -> Result<Index, StoreError> {
        let idx = Index::new(&config.options()).map_err(index_err)?;
        idx.reserve(config.capacity.max(1)).map_err(index_err)?;
        Ok(idx)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Index>, StoreError> {
        self.index.read().map_err(poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Index>, StoreError> {
        self.index.write().map_err(poisoned)
    }

    /// Get the index file path
    pub fn index_file(&self) -> PathBuf {
        self.config.index_path.join(INDEX_FILE)
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.size())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Add or replace the vector stored under `id`.
    pub fn add(&self, id: u64, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.config.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }

        // usearch mutates through &self; the write guard serializes structural changes
        let index = self.write()?;
        if index.contains(id) {
            index.remove(id).map_err(index_err)?;
        }
        if index.size() >= index.capacity() {
            let grown = (index.capacity() * 2).max(64);
            index.reserve(grown).map_err(index_err)?;
            debug!(capacity = grown, "Grew vector index");
        }
        index.add(id, vector).map_err(index_err)?;

        debug!(id = id, "Added vector");
        Ok(())
    }

    /// Up to `k` nearest candidates, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, StoreError> {
        if query.len() != self.config.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.dimension,
                actual: query.len(),
            });
        }

        let index = self.read()?;
        if index.size() == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let results = index.search(query, k).map_err(index_err)?;
        let search_results: Vec<SearchResult> = results
            .keys
            .iter()
            .zip(results.distances.iter())
            .map(|(&vector_id, &dist)| SearchResult {
                vector_id,
                score: 1.0 - dist,
            })
            .collect();

        debug!(k = k, found = search_results.len(), "Search complete");
        Ok(search_results)
    }

    pub fn remove(&self, id: u64) -> Result<bool, StoreError> {
        let index = self.write()?;
        let removed = index.remove(id).map_err(index_err)?;
        Ok(removed > 0)
    }

    pub fn contains(&self, id: u64) -> Result<bool, StoreError> {
        Ok(self.read()?.contains(id))
    }

    /// Write the index file.
    pub fn save(&self) -> Result<(), StoreError> {
        let index = self.read()?;
        let path = self.index_file();
        index
            .save(path_str(&path)?)
            .map_err(|e| StoreError::Index(format!("Failed to save: {}", e)))?;

        info!(path = ?path, vectors = index.size(), "Saved vector index");
        Ok(())
    }

    /// Drop every vector (used before a rebuild).
    pub fn clear(&self) -> Result<(), StoreError> {
        let fresh = Self::empty_index(&self.config)?;
        *self.write()? = fresh;
        info!("Cleared vector index");
        Ok(())
    }
}

fn path_str(path: &std::path::Path) -> Result<&str, StoreError> {
    path.to_str()
        .ok_or_else(|| StoreError::Index("Invalid path encoding".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::normalize;
    use rand::Rng;
    use tempfile::TempDir;

    fn random_vector(dim: usize) -> Vec<f32> {
        let mut rng = rand::rng();
        let mut values: Vec<f32> = (0..dim).map(|_| rng.random()).collect();
        normalize(&mut values);
        values
    }

    #[test]
    fn test_create_index() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(384, temp.path())).unwrap();
        assert_eq!(index.dimension(), 384);
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_search_empty_index() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(16, temp.path())).unwrap();
        assert!(index.search(&random_vector(16), 5).unwrap().is_empty());
    }

    #[test]
    fn test_add_and_search() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(64, temp.path()).with_capacity(4);
        let index = HnswIndex::open_or_create(config).unwrap();

        // More vectors than the initial capacity forces growth
        for i in 0..20 {
            index.add(i, &random_vector(64)).unwrap();
        }
        assert_eq!(index.len().unwrap(), 20);

        let results = index.search(&random_vector(64), 5).unwrap();
        assert_eq!(results.len(), 5);
        for i in 1..results.len() {
            assert!(results[i - 1].score >= results[i].score);
        }
    }

    #[test]
    fn test_add_replaces_existing_id() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(8, temp.path())).unwrap();
        let first = random_vector(8);
        let second = random_vector(8);

        index.add(1, &first).unwrap();
        index.add(1, &second).unwrap();
        assert!(index.contains(1).unwrap());

        let results = index.search(&second, 1).unwrap();
        assert_eq!(results[0].vector_id, 1);
        assert!(results[0].score > 0.99);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::new(64, temp.path()).with_capacity(100);

        {
            let index = HnswIndex::open_or_create(config.clone()).unwrap();
            for i in 0..5 {
                index.add(i, &random_vector(64)).unwrap();
            }
            index.save().unwrap();
        }

        let index = HnswIndex::open_or_create(config).unwrap();
        assert_eq!(index.len().unwrap(), 5);
    }

    #[test]
    fn test_dimension_mismatch() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(64, temp.path())).unwrap();
        let result = index.add(0, &random_vector(32));
        assert!(matches!(result, Err(StoreError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_remove_and_clear() {
        let temp = TempDir::new().unwrap();
        let index = HnswIndex::open_or_create(HnswConfig::new(16, temp.path())).unwrap();

        index.add(42, &random_vector(16)).unwrap();
        assert!(index.remove(42).unwrap());
        assert!(!index.contains(42).unwrap());

        index.add(7, &random_vector(16)).unwrap();
        index.clear().unwrap();
        assert!(index.is_empty().unwrap());
    }
}
