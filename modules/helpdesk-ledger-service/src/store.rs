//! Ledger store abstraction.
//!
//! The ledger service only talks to persisted state through [`LedgerStore`],
//! so the SQLite backend can be swapped for a remote table or a test double.

use async_trait::async_trait;
use helpdesk_ledger_types::{Observation, QueryRecord};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Storage-level failure
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Json(serde_json::Error),
    /// Update against a key that has no record
    NotFound(String),
    /// Blocking task panicked or was cancelled
    Task(String),
    LockPoisoned,
    /// Write abandoned because its deadline passed before it could run
    DeadlineExceeded,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "sqlite: {}", e),
            StoreError::Json(e) => write!(f, "json: {}", e),
            StoreError::NotFound(key) => write!(f, "no ledger record for '{}'", key),
            StoreError::Task(msg) => write!(f, "store task failed: {}", msg),
            StoreError::LockPoisoned => write!(f, "connection lock poisoned"),
            StoreError::DeadlineExceeded => write!(f, "deadline passed before the write ran"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Task(e.to_string())
    }
}

/// Durable table of query records keyed by normalized query text.
///
/// Keys passed in are already normalized. Writes carry the deadline of the
/// caller's timeout; a write that has not started by then must not run.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Point lookup. At most one record is returned.
    async fn exists(&self, key: &str) -> Result<Option<QueryRecord>, StoreError>;

    /// Blind write of a fresh record with `search_count = 1`. Overwrites any
    /// record already stored under `key`.
    async fn create(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Instant,
    ) -> Result<(), StoreError>;

    /// Write a fresh record only if `key` is absent. Returns `false` when a
    /// record already existed and nothing was written.
    async fn create_if_absent(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Instant,
    ) -> Result<bool, StoreError>;

    /// Atomically bump the count, stamp `last_searched`, and append whichever
    /// observation fields are present.
    async fn update(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Instant,
    ) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn LedgerStore>;
