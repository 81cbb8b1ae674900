//! Async, timeout-bounded access to a similarity store.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::warn;
use triage_types::{IssueKey, IssueRecord, SimilarityMatch};

use crate::error::StoreError;
use crate::query::SimilarityQuery;
use crate::store::SimilarityStore;

/// Shared store handle passed explicitly to every component that needs it.
///
/// Each call runs on the blocking pool and fails with
/// [`StoreError::Timeout`] once the configured bound elapses. A timed-out
/// write may still complete in the background; upserts are idempotent, so a
/// retry converges on the same row.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn SimilarityStore>,
    timeout: Duration,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn SimilarityStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn dimension(&self) -> usize {
        self.store.dimension()
    }

    pub fn store(&self) -> &Arc<dyn SimilarityStore> {
        &self.store
    }

    async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn SimilarityStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || f(store.as_ref()));

        match timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(StoreError::Constraint(format!("{} task failed: {}", op, e))),
            Err(_) => {
                warn!(
                    op = op,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Store call timed out"
                );
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }

    pub async fn upsert(&self, record: IssueRecord) -> Result<(), StoreError> {
        self.run("upsert", move |store| store.upsert(&record)).await
    }

    pub async fn find_similar(
        &self,
        query: SimilarityQuery,
    ) -> Result<Vec<SimilarityMatch>, StoreError> {
        self.run("find_similar", move |store| store.find_similar(&query))
            .await
    }

    pub async fn get(&self, key: IssueKey) -> Result<Option<IssueRecord>, StoreError> {
        self.run("get", move |store| store.get(&key)).await
    }

    pub async fn count(&self) -> Result<usize, StoreError> {
        self.run("count", |store| store.count()).await
    }

    pub async fn flush(&self) -> Result<(), StoreError> {
        self.run("flush", |store| store.flush()).await
    }
}
