//! # triage-vector
//!
//! Persistent similarity store for triaged issues.
//!
//! Each issue is one row keyed by `(repository, number)`. Rows carry the
//! normalized embedding plus labels, priority and write time. Re-triage
//! overwrites the row in place, so the store never holds two rows for one
//! issue.
//!
//! ## Search paths
//! - Exact: brute-force cosine over every row
//! - Approximate: usearch HNSW candidates, re-scored and filtered exactly
//!
//! Both paths share one qualifying predicate and one ordering. The
//! approximate path may miss qualifying rows that the HNSW graph does not
//! surface among its candidates; that recall loss is the price of sub-linear
//! search and is bounded by over-fetching (`candidate_multiplier`).
//!
//! ## Implementations
//! - [`RocksSimilarityStore`]: RocksDB rows + persisted HNSW index
//! - [`InMemorySimilarityStore`]: same contract, nothing persisted

pub mod error;
pub mod handle;
pub mod hnsw;
pub mod memory;
pub mod query;
pub mod rocks;
pub mod similarity;
pub mod store;

pub use error::StoreError;
pub use handle::StoreHandle;
pub use hnsw::{HnswConfig, HnswIndex, SearchResult};
pub use memory::InMemorySimilarityStore;
pub use query::SimilarityQuery;
pub use rocks::{
    RocksSimilarityStore, RocksStoreConfig, StoreStats, CF_ISSUE_RECORDS, CF_STORE_META,
    CF_VECTOR_KEYS,
};
pub use similarity::{cosine_similarity, similarity_score};
pub use store::{validate_record, SimilarityStore};
