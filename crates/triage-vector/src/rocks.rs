//! RocksDB-backed similarity store.
//!
//! Layout under the store directory:
//! - `records/`: RocksDB with column families
//!   - `issue_records`: encoded issue key -> JSON row
//!   - `vector_keys`: HNSW vector id (u64 BE) -> encoded issue key
//!   - `store_meta`: dimension, next vector id, index-clean flag
//! - `hnsw/`: usearch index file
//!
//! Rows are the source of truth. The HNSW index is rebuilt from them on open
//! whenever it was not saved after the last upsert.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use triage_types::{IssueKey, IssueRecord, Priority, SearchStrategy, Settings, SimilarityMatch, StoreSettings};

use crate::error::StoreError;
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::query::SimilarityQuery;
use crate::store::{validate_record, SimilarityStore};

/// Column family for issue rows
pub const CF_ISSUE_RECORDS: &str = "issue_records";

/// Column family mapping HNSW vector ids back to issue keys
pub const CF_VECTOR_KEYS: &str = "vector_keys";

/// Column family for store-wide metadata
pub const CF_STORE_META: &str = "store_meta";

const META_DIMENSION: &[u8] = b"dimension";
const META_NEXT_VECTOR_ID: &[u8] = b"next_vector_id";
const META_INDEX_CLEAN: &[u8] = b"index_clean";

/// Configuration for [`RocksSimilarityStore`].
#[derive(Debug, Clone)]
pub struct RocksStoreConfig {
    /// Store directory (created if missing)
    pub path: PathBuf,
    /// Embedding dimension, fixed for the lifetime of the store
    pub dimension: usize,
    pub search_strategy: SearchStrategy,
    /// Row count below which `Auto` searches exactly
    pub exact_search_limit: usize,
    /// Candidates fetched from HNSW per requested result
    pub candidate_multiplier: usize,
    pub hnsw_connectivity: usize,
    pub hnsw_expansion_add: usize,
    pub hnsw_expansion_search: usize,
}

impl RocksStoreConfig {
    pub fn new(path: impl Into<PathBuf>, dimension: usize) -> Self {
        Self::with_store_settings(path, dimension, &StoreSettings::default())
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_store_settings(
            settings.expanded_store_path(),
            settings.embedding.dimension,
            &settings.store,
        )
    }

    fn with_store_settings(path: impl Into<PathBuf>, dimension: usize, store: &StoreSettings) -> Self {
        Self {
            path: path.into(),
            dimension,
            search_strategy: store.search_strategy,
            exact_search_limit: store.exact_search_limit,
            candidate_multiplier: store.candidate_multiplier,
            hnsw_connectivity: store.hnsw_connectivity,
            hnsw_expansion_add: store.hnsw_expansion_add,
            hnsw_expansion_search: store.hnsw_expansion_search,
        }
    }

    pub fn with_search_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.search_strategy = strategy;
        self
    }

    pub fn with_exact_search_limit(mut self, limit: usize) -> Self {
        self.exact_search_limit = limit;
        self
    }

    fn records_path(&self) -> PathBuf {
        self.path.join("records")
    }

    fn hnsw_config(&self) -> HnswConfig {
        HnswConfig::new(self.dimension, self.path.join("hnsw"))
            .with_connectivity(self.hnsw_connectivity)
            .with_expansion(self.hnsw_expansion_add, self.hnsw_expansion_search)
    }
}

/// Row as persisted in `issue_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRow {
    repo_name: String,
    issue_number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    embedding: Vec<f32>,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    priority: Option<Priority>,
    created_at: DateTime<Utc>,
    /// Stable across re-triage of the same issue
    vector_id: u64,
}

impl StoredRow {
    fn new(record: IssueRecord, vector_id: u64) -> Self {
        Self {
            repo_name: record.key.repo,
            issue_number: record.key.number,
            title: record.title,
            body: record.body,
            embedding: record.embedding,
            labels: record.labels,
            priority: record.priority,
            created_at: record.created_at,
            vector_id,
        }
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn into_record(self) -> Result<IssueRecord, StoreError> {
        let key = IssueKey::new(self.repo_name, self.issue_number)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(IssueRecord {
            key,
            title: self.title,
            body: self.body,
            embedding: self.embedding,
            labels: self.labels,
            priority: self.priority,
            created_at: self.created_at,
        })
    }
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub rows: usize,
    pub indexed_vectors: usize,
    pub dimension: usize,
    pub index_size_bytes: u64,
    pub path: PathBuf,
}

/// Durable similarity store: RocksDB rows plus a usearch HNSW index.
///
/// RocksDB locks its directory, so a second process (or a second open in the
/// same process) fails with [`StoreError::Connectivity`] instead of blocking.
pub struct RocksSimilarityStore {
    db: DB,
    index: HnswIndex,
    config: RocksStoreConfig,
    /// Serializes upserts so the id counter and index stay in step
    write_lock: Mutex<()>,
    next_vector_id: AtomicU64,
    row_count: AtomicUsize,
    /// Index holds changes not yet saved
    dirty: AtomicBool,
    /// An index update failed after its row committed; never mark clean
    index_stale: AtomicBool,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Constraint("store write lock poisoned".to_string())
}

fn read_u64(bytes: &[u8]) -> Result<u64, StoreError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Serialization(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

impl RocksSimilarityStore {
    /// Open the store, creating it if necessary.
    pub fn open(config: RocksStoreConfig) -> Result<Self, StoreError> {
        if config.dimension == 0 {
            return Err(StoreError::InvalidRecord("dimension must be > 0".to_string()));
        }
        let records_path = config.records_path();
        std::fs::create_dir_all(&records_path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = [CF_ISSUE_RECORDS, CF_VECTOR_KEYS, CF_STORE_META]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, &records_path, cfs)?;
        info!(path = ?config.path, dim = config.dimension, "Opened issue store");

        let meta = db
            .cf_handle(CF_STORE_META)
            .ok_or_else(|| StoreError::Constraint(format!("missing column family {}", CF_STORE_META)))?;

        match db.get_cf(meta, META_DIMENSION)? {
            Some(bytes) => {
                let stored = read_u64(&bytes)? as usize;
                if stored != config.dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: stored,
                        actual: config.dimension,
                    });
                }
            }
            None => db.put_cf(meta, META_DIMENSION, (config.dimension as u64).to_be_bytes())?,
        }

        let next_vector_id = match db.get_cf(meta, META_NEXT_VECTOR_ID)? {
            Some(bytes) => read_u64(&bytes)?,
            None => 0,
        };
        let index_clean = matches!(db.get_cf(meta, META_INDEX_CLEAN)?.as_deref(), Some([1]));

        let records = db
            .cf_handle(CF_ISSUE_RECORDS)
            .ok_or_else(|| StoreError::Constraint(format!("missing column family {}", CF_ISSUE_RECORDS)))?;
        let mut row_count = 0usize;
        for item in db.iterator_cf(records, IteratorMode::Start) {
            item?;
            row_count += 1;
        }

        let index = Self::open_index(&config)?;

        let store = Self {
            db,
            index,
            config,
            write_lock: Mutex::new(()),
            next_vector_id: AtomicU64::new(next_vector_id),
            row_count: AtomicUsize::new(row_count),
            dirty: AtomicBool::new(false),
            index_stale: AtomicBool::new(false),
        };

        if !index_clean || store.index.len()? != row_count {
            store.rebuild_index()?;
        }

        Ok(store)
    }

    /// Open the index file, discarding it if it cannot be loaded.
    fn open_index(config: &RocksStoreConfig) -> Result<HnswIndex, StoreError> {
        let hnsw = config.hnsw_config();
        match HnswIndex::open_or_create(hnsw.clone()) {
            Ok(index) => Ok(index),
            Err(e @ (StoreError::Index(_) | StoreError::DimensionMismatch { .. })) => {
                warn!(error = %e, "Discarding unreadable vector index");
                let file = hnsw.index_path.join("hnsw.usearch");
                std::fs::remove_file(&file)?;
                HnswIndex::open_or_create(hnsw)
            }
            Err(e) => Err(e),
        }
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Constraint(format!("missing column family {}", name)))
    }

    pub fn config(&self) -> &RocksStoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Recreate the HNSW index from the stored rows.
    pub fn rebuild_index(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        self.index.clear()?;

        let mut added = 0usize;
        for item in self.db.iterator_cf(self.cf(CF_ISSUE_RECORDS)?, IteratorMode::Start) {
            let (_, value) = item?;
            let row = StoredRow::decode(&value)?;
            self.index.add(row.vector_id, &row.embedding)?;
            added += 1;
        }

        self.dirty.store(true, Ordering::SeqCst);
        self.index_stale.store(false, Ordering::SeqCst);
        info!(vectors = added, "Rebuilt vector index from stored rows");
        Ok(added)
    }

    /// The row is already committed when the index is updated, so an index
    /// failure is logged and left for the rebuild on next open.
    fn sync_index(&self, vector_id: u64, result: Result<(), StoreError>) {
        if let Err(e) = result {
            warn!(
                vector_id = vector_id,
                error = %e,
                "Row stored but vector index update failed; index will be rebuilt on next open"
            );
            self.index_stale.store(true, Ordering::SeqCst);
        }
    }

    /// Every stored row, in key order.
    fn scan(&self) -> Result<impl Iterator<Item = Result<IssueRecord, StoreError>> + '_, StoreError> {
        let iter = self.db.iterator_cf(self.cf(CF_ISSUE_RECORDS)?, IteratorMode::Start);
        Ok(iter.map(|item| {
            let (_, value) = item?;
            StoredRow::decode(&value)?.into_record()
        }))
    }

    fn get_by_vector_id(&self, vector_id: u64) -> Result<IssueRecord, StoreError> {
        let key_bytes = self
            .db
            .get_cf(self.cf(CF_VECTOR_KEYS)?, vector_id.to_be_bytes())?
            .ok_or_else(|| StoreError::Constraint(format!("vector {} has no issue key", vector_id)))?;
        let value = self
            .db
            .get_cf(self.cf(CF_ISSUE_RECORDS)?, &key_bytes)?
            .ok_or_else(|| StoreError::Constraint(format!("vector {} has no issue row", vector_id)))?;
        StoredRow::decode(&value)?.into_record()
    }

    fn use_exact(&self) -> bool {
        match self.config.search_strategy {
            SearchStrategy::Exact => true,
            SearchStrategy::Approximate => false,
            SearchStrategy::Auto => {
                self.row_count.load(Ordering::SeqCst) < self.config.exact_search_limit
            }
        }
    }

    fn find_exact(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityMatch>, StoreError> {
        query.select(self.scan()?)
    }

    /// HNSW candidates re-scored against the stored rows.
    ///
    /// Qualifying rows outside the fetched candidates are missed. Fetching
    /// `max_results * candidate_multiplier` (plus one for the excluded key)
    /// keeps that rare on corpora of this size.
    fn find_approximate(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityMatch>, StoreError> {
        let k = query
            .max_results
            .saturating_mul(self.config.candidate_multiplier)
            .saturating_add(usize::from(query.exclude.is_some()));
        let candidates = self.index.search(&query.embedding, k)?;
        debug!(k = k, candidates = candidates.len(), "Approximate search");

        query.select(
            candidates
                .into_iter()
                .map(|c| self.get_by_vector_id(c.vector_id)),
        )
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let index_size_bytes = std::fs::metadata(self.index.index_file())
            .map(|m| m.len())
            .unwrap_or(0);
        Ok(StoreStats {
            rows: self.row_count.load(Ordering::SeqCst),
            indexed_vectors: self.index.len()?,
            dimension: self.config.dimension,
            index_size_bytes,
            path: self.config.path.clone(),
        })
    }
}

impl SimilarityStore for RocksSimilarityStore {
    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn upsert(&self, record: &IssueRecord) -> Result<(), StoreError> {
        let stored = validate_record(record, self.config.dimension)?;
        let _guard = self.write_lock.lock().map_err(poisoned)?;

        let records_cf = self.cf(CF_ISSUE_RECORDS)?;
        let key_bytes = stored.key.to_bytes();

        let existing = match self.db.get_cf(records_cf, &key_bytes)? {
            Some(bytes) => Some(StoredRow::decode(&bytes)?),
            None => None,
        };
        let (vector_id, inserted) = match &existing {
            Some(row) => (row.vector_id, false),
            None => (self.next_vector_id.load(Ordering::SeqCst), true),
        };

        let embedding = stored.embedding.clone();
        let row = StoredRow::new(stored, vector_id);

        // Row, id mapping and counter commit together or not at all
        let mut batch = WriteBatch::default();
        batch.put_cf(records_cf, &key_bytes, serde_json::to_vec(&row)?);
        batch.put_cf(self.cf(CF_VECTOR_KEYS)?, vector_id.to_be_bytes(), &key_bytes);
        if inserted {
            batch.put_cf(self.cf(CF_STORE_META)?, META_NEXT_VECTOR_ID, (vector_id + 1).to_be_bytes());
        }
        batch.put_cf(self.cf(CF_STORE_META)?, META_INDEX_CLEAN, [0u8]);
        self.db.write(batch)?;

        if inserted {
            self.next_vector_id.store(vector_id + 1, Ordering::SeqCst);
            self.row_count.fetch_add(1, Ordering::SeqCst);
        }

        self.dirty.store(true, Ordering::SeqCst);
        self.sync_index(vector_id, self.index.add(vector_id, &embedding));

        debug!(
            repo = %row.repo_name,
            number = row.issue_number,
            vector_id = vector_id,
            inserted,
            "Upserted issue record"
        );
        Ok(())
    }

    fn find_similar(&self, query: &SimilarityQuery) -> Result<Vec<SimilarityMatch>, StoreError> {
        query.validate(self.config.dimension)?;

        let exact = self.use_exact();
        let matches = if exact {
            self.find_exact(query)?
        } else {
            self.find_approximate(query)?
        };

        debug!(
            exact,
            threshold = query.threshold,
            found = matches.len(),
            "Similarity search complete"
        );
        Ok(matches)
    }

    fn get(&self, key: &IssueKey) -> Result<Option<IssueRecord>, StoreError> {
        match self.db.get_cf(self.cf(CF_ISSUE_RECORDS)?, key.to_bytes())? {
            Some(bytes) => Ok(Some(StoredRow::decode(&bytes)?.into_record()?)),
            None => Ok(None),
        }
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.row_count.load(Ordering::SeqCst))
    }

    /// Save the HNSW index and mark it in sync with the rows, unless an
    /// index update was lost.
    fn flush(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(poisoned)?;
        self.index.save()?;
        if !self.index_stale.load(Ordering::SeqCst) {
            self.db.put_cf(self.cf(CF_STORE_META)?, META_INDEX_CLEAN, [1u8])?;
        }
        self.db.flush()?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for RocksSimilarityStore {
    fn drop(&mut self) {
        if !self.dirty.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = SimilarityStore::flush(self) {
            warn!(error = %e, "Failed to save vector index on close; it will be rebuilt on next open");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::normalize;
    use rand::Rng;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const DIM: usize = 16;

    fn key(number: u64) -> IssueKey {
        IssueKey::new("acme/app", number).unwrap()
    }

    fn random_vector(dim: usize) -> Vec<f32> {
        let mut rng = rand::rng();
        let mut values: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
        normalize(&mut values);
        values
    }

    fn open(temp: &TempDir) -> RocksSimilarityStore {
        RocksSimilarityStore::open(RocksStoreConfig::new(temp.path(), DIM)).unwrap()
    }

    #[test]
    fn test_open_creates_column_families() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        for name in [CF_ISSUE_RECORDS, CF_VECTOR_KEYS, CF_STORE_META] {
            assert!(store.db.cf_handle(name).is_some(), "missing {}", name);
        }
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.dimension(), DIM);
    }

    #[test]
    fn test_upsert_and_get() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let record = IssueRecord::new(key(1), "Login page crashes", random_vector(DIM))
            .with_body(Some("Stack trace attached".to_string()))
            .with_labels(["bug"])
            .with_priority(Some(Priority::P1));
        store.upsert(&record).unwrap();

        let row = store.get(&key(1)).unwrap().unwrap();
        assert_eq!(row.title, "Login page crashes");
        assert_eq!(row.body.as_deref(), Some("Stack trace attached"));
        assert_eq!(row.labels, vec!["bug".to_string()]);
        assert_eq!(row.priority, Some(Priority::P1));
        assert_eq!(row.created_at, record.created_at);
        assert!(store.get(&key(2)).unwrap().is_none());
    }

    #[test]
    fn test_reupsert_keeps_vector_id() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store
            .upsert(&IssueRecord::new(key(5), "Crash", random_vector(DIM)))
            .unwrap();
        store
            .upsert(&IssueRecord::new(key(5), "Crash again", random_vector(DIM)))
            .unwrap();
        store
            .upsert(&IssueRecord::new(key(6), "Other", random_vector(DIM)))
            .unwrap();

        assert_eq!(store.count().unwrap(), 2);
        assert_eq!(store.index.len().unwrap(), 2);
        assert_eq!(store.next_vector_id.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let result = store.upsert(&IssueRecord::new(key(1), "Crash", vec![1.0; DIM + 1]));
        assert!(matches!(result, Err(StoreError::DimensionMismatch { .. })));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_reopen_persists_rows() {
        let temp = TempDir::new().unwrap();
        let embedding = random_vector(DIM);
        {
            let store = open(&temp);
            store
                .upsert(&IssueRecord::new(key(1), "Crash", embedding.clone()))
                .unwrap();
        }

        let store = open(&temp);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.index.len().unwrap(), 1);

        let query = SimilarityQuery::new(embedding).with_threshold(0.99);
        let matches = store.find_similar(&query).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].key, key(1));
    }

    #[test]
    fn test_reopen_with_other_dimension_fails() {
        let temp = TempDir::new().unwrap();
        drop(open(&temp));
        let result = RocksSimilarityStore::open(RocksStoreConfig::new(temp.path(), DIM * 2));
        assert!(matches!(result, Err(StoreError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_second_open_is_connectivity_error() {
        let temp = TempDir::new().unwrap();
        let _store = open(&temp);
        let result = RocksSimilarityStore::open(RocksStoreConfig::new(temp.path(), DIM));
        match result {
            Err(e) => {
                assert!(matches!(e, StoreError::Connectivity(_)));
                assert!(e.is_retryable());
            }
            Ok(_) => panic!("second open of a locked store must fail"),
        }
    }

    #[test]
    fn test_missing_index_is_rebuilt() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(&temp);
            for n in 1..=3 {
                store
                    .upsert(&IssueRecord::new(key(n), "Issue", random_vector(DIM)))
                    .unwrap();
            }
        }
        std::fs::remove_file(temp.path().join("hnsw").join("hnsw.usearch")).unwrap();

        let store = open(&temp);
        assert_eq!(store.index.len().unwrap(), 3);
    }

    #[test]
    fn test_exact_and_approximate_agree() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        for n in 1..=60 {
            store
                .upsert(&IssueRecord::new(key(n), format!("Issue {}", n), random_vector(DIM)))
                .unwrap();
        }

        for _ in 0..5 {
            let query = SimilarityQuery::new(random_vector(DIM))
                .with_threshold(0.3)
                .with_max_results(3);
            let exact: BTreeSet<u64> = store
                .find_exact(&query)
                .unwrap()
                .into_iter()
                .map(|m| m.key.number)
                .collect();
            let approx: BTreeSet<u64> = store
                .find_approximate(&query)
                .unwrap()
                .into_iter()
                .map(|m| m.key.number)
                .collect();
            assert_eq!(exact, approx);
        }
    }

    #[test]
    fn test_auto_strategy_switches_on_row_count() {
        let temp = TempDir::new().unwrap();
        let config = RocksStoreConfig::new(temp.path(), DIM).with_exact_search_limit(2);
        let store = RocksSimilarityStore::open(config).unwrap();
        assert!(store.use_exact());

        for n in 1..=2 {
            store
                .upsert(&IssueRecord::new(key(n), "Issue", random_vector(DIM)))
                .unwrap();
        }
        assert!(!store.use_exact());
    }

    #[test]
    fn test_stats() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store
            .upsert(&IssueRecord::new(key(1), "Crash", random_vector(DIM)))
            .unwrap();
        store.flush().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.rows, 1);
        assert_eq!(stats.indexed_vectors, 1);
        assert_eq!(stats.dimension, DIM);
        assert!(stats.index_size_bytes > 0);
    }

    fn index_clean_flag(store: &RocksSimilarityStore) -> Option<Vec<u8>> {
        store
            .db
            .get_cf(store.cf(CF_STORE_META).unwrap(), META_INDEX_CLEAN)
            .unwrap()
    }

    #[test]
    fn test_lost_index_update_keeps_row_and_forces_rebuild() {
        let temp = TempDir::new().unwrap();
        let embedding = random_vector(DIM);
        {
            let store = open(&temp);
            store
                .upsert(&IssueRecord::new(key(1), "Crash", embedding.clone()))
                .unwrap();

            // Index out of step with a committed row
            store.index.remove(0).unwrap();
            store.sync_index(0, Err(StoreError::Index("reserve failed".to_string())));

            assert_eq!(store.count().unwrap(), 1);
            store.flush().unwrap();
            assert_eq!(index_clean_flag(&store), Some(vec![0u8]));
        }

        let store = RocksSimilarityStore::open(
            RocksStoreConfig::new(temp.path(), DIM).with_search_strategy(SearchStrategy::Approximate),
        )
        .unwrap();
        assert_eq!(store.index.len().unwrap(), 1);
        let matches = store
            .find_similar(&SimilarityQuery::new(embedding).with_threshold(0.99))
            .unwrap();
        assert_eq!(matches.len(), 1);

        store.flush().unwrap();
        assert_eq!(index_clean_flag(&store), Some(vec![1u8]));
    }

    #[test]
    fn test_concurrent_upserts_to_one_key_last_writer_wins() {
        let temp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(open(&temp));
        let priorities = [Priority::P0, Priority::P1, Priority::P2, Priority::P3];

        let records: Vec<IssueRecord> = (0..8)
            .map(|i| {
                IssueRecord::new(key(5), format!("Writer {}", i), random_vector(DIM))
                    .with_labels([format!("writer-{}", i)])
                    .with_priority(Some(priorities[i % priorities.len()]))
            })
            .collect();

        let threads: Vec<_> = records
            .iter()
            .cloned()
            .map(|record| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store.upsert(&record).unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.index.len().unwrap(), 1);
        assert_eq!(store.next_vector_id.load(Ordering::SeqCst), 1);

        // The row is exactly one writer's record, never a mix of two
        let row = store.get(&key(5)).unwrap().unwrap();
        let writer = records
            .iter()
            .find(|r| r.title == row.title)
            .expect("row title comes from a writer");
        let mut expected = writer.embedding.clone();
        normalize(&mut expected);
        assert_eq!(row.labels, writer.labels);
        assert_eq!(row.priority, writer.priority);
        assert_eq!(row.created_at, writer.created_at);
        assert_eq!(row.embedding, expected);
    }
}
