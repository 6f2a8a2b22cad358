//! SQLite database operations for the query ledger.
//!
//! `user_ids` and `utterances` are stored as JSON arrays and appended with
//! `json_insert` inside the same UPDATE that bumps the counter, so each
//! observation lands as one atomic statement.

use crate::store::{LedgerStore, StoreError};
use async_trait::async_trait;
use helpdesk_ledger_types::{LedgerStats, Observation, QueryRecord};
use rusqlite::{Connection, params};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

pub struct Db {
    conn: Mutex<Connection>,
    table: String,
}

impl Db {
    /// `table` must already be a valid SQL identifier (checked by config).
    pub fn open(path: &str, table: &str) -> Result<Self, StoreError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let db = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Lock for a write. A write that only wins the lock after its deadline
    /// returns without touching the connection.
    fn conn_for_write(
        &self,
        deadline: Option<Instant>,
    ) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let conn = self.conn()?;
        match deadline {
            Some(d) if Instant::now() >= d => Err(StoreError::DeadlineExceeded),
            _ => Ok(conn),
        }
    }

    fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    search_query TEXT PRIMARY KEY NOT NULL,
                    search_count INTEGER NOT NULL DEFAULT 1,
                    created_on TEXT NOT NULL,
                    last_searched TEXT,
                    user_ids TEXT NOT NULL DEFAULT '[]',
                    utterances TEXT NOT NULL DEFAULT '[]'
                )",
                self.table
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_count ON {0}(search_count DESC)",
                self.table
            ),
            [],
        )?;
        Ok(())
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn get_record(&self, key: &str) -> Result<Option<QueryRecord>, StoreError> {
        let conn = self.conn()?;
        let result = conn.query_row(
            &format!(
                "SELECT search_query, search_count, created_on, last_searched, user_ids, utterances
                 FROM {}
                 WHERE search_query = ?1
                 LIMIT 1",
                self.table
            ),
            params![key],
            row_to_raw,
        );
        match result {
            Ok(raw) => Ok(Some(raw.into_record()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Blind create; replaces whatever is stored under `key`.
    pub fn insert_record(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Option<Instant>,
    ) -> Result<(), StoreError> {
        let (user_ids, utterances) = initial_lists(observation)?;
        let conn = self.conn_for_write(deadline)?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {}
                    (search_query, search_count, created_on, last_searched, user_ids, utterances)
                 VALUES (?1, 1, ?2, NULL, ?3, ?4)",
                self.table
            ),
            params![key, now(), user_ids, utterances],
        )?;
        Ok(())
    }

    pub fn insert_record_if_absent(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Option<Instant>,
    ) -> Result<bool, StoreError> {
        let (user_ids, utterances) = initial_lists(observation)?;
        let conn = self.conn_for_write(deadline)?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO {}
                    (search_query, search_count, created_on, last_searched, user_ids, utterances)
                 VALUES (?1, 1, ?2, NULL, ?3, ?4)
                 ON CONFLICT(search_query) DO NOTHING",
                self.table
            ),
            params![key, now(), user_ids, utterances],
        )?;
        Ok(inserted == 1)
    }

    pub fn append_observation(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Option<Instant>,
    ) -> Result<(), StoreError> {
        let conn = self.conn_for_write(deadline)?;
        let changed = conn.execute(
            &format!(
                "UPDATE {}
                 SET search_count = search_count + 1,
                     last_searched = ?2,
                     user_ids = CASE WHEN ?3 IS NULL THEN user_ids
                                     ELSE json_insert(user_ids, '$[#]', ?3) END,
                     utterances = CASE WHEN ?4 IS NULL THEN utterances
                                       ELSE json_insert(utterances, '$[#]', ?4) END
                 WHERE search_query = ?1",
                self.table
            ),
            params![key, now(), observation.user_id(), observation.utterance()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(())
    }

    /// Most-asked queries first
    pub fn list_records(&self, limit: usize) -> Result<Vec<QueryRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT search_query, search_count, created_on, last_searched, user_ids, utterances
             FROM {}
             ORDER BY search_count DESC, search_query ASC
             LIMIT ?1",
            self.table
        ))?;
        let raws = stmt
            .query_map(params![limit as i64], row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    pub fn get_stats(&self) -> Result<LedgerStats, StoreError> {
        let conn = self.conn()?;
        let (distinct_queries, total_searches): (i64, i64) = conn.query_row(
            &format!(
                "SELECT COUNT(*), COALESCE(SUM(search_count), 0) FROM {}",
                self.table
            ),
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let distinct_users: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(DISTINCT j.value) FROM {0}, json_each({0}.user_ids) AS j",
                self.table
            ),
            [],
            |r| r.get(0),
        )?;
        Ok(LedgerStats {
            distinct_queries,
            total_searches,
            distinct_users,
        })
    }
}

struct RawRecord {
    search_query: String,
    search_count: i64,
    created_on: String,
    last_searched: Option<String>,
    user_ids: String,
    utterances: String,
}

impl RawRecord {
    fn into_record(self) -> Result<QueryRecord, StoreError> {
        Ok(QueryRecord {
            search_query: self.search_query,
            search_count: self.search_count,
            created_on: self.created_on,
            last_searched: self.last_searched,
            user_ids: serde_json::from_str(&self.user_ids)?,
            utterances: serde_json::from_str(&self.utterances)?,
        })
    }
}

fn row_to_raw(row: &rusqlite::Row) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        search_query: row.get(0)?,
        search_count: row.get(1)?,
        created_on: row.get(2)?,
        last_searched: row.get(3)?,
        user_ids: row.get(4)?,
        utterances: row.get(5)?,
    })
}

fn initial_lists(observation: &Observation) -> Result<(String, String), StoreError> {
    let user_ids: Vec<&str> = observation.user_id().into_iter().collect();
    let utterances: Vec<&str> = observation.utterance().into_iter().collect();
    Ok((
        serde_json::to_string(&user_ids)?,
        serde_json::to_string(&utterances)?,
    ))
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Run a [`Db`] call on the blocking pool so the connection mutex is never
/// waited on from an async worker.
pub async fn blocking<T, F>(db: &Arc<Db>, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Db) -> Result<T, StoreError> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db)).await?
}

/// [`LedgerStore`] over [`Db`], running each statement on the blocking pool
#[derive(Clone)]
pub struct SqliteLedger {
    db: Arc<Db>,
}

impl SqliteLedger {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn exists(&self, key: &str) -> Result<Option<QueryRecord>, StoreError> {
        let key = key.to_string();
        blocking(&self.db, move |db| db.get_record(&key)).await
    }

    async fn create(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Instant,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        let observation = observation.clone();
        blocking(&self.db, move |db| {
            db.insert_record(&key, &observation, Some(deadline))
        })
        .await
    }

    async fn create_if_absent(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Instant,
    ) -> Result<bool, StoreError> {
        let key = key.to_string();
        let observation = observation.clone();
        blocking(&self.db, move |db| {
            db.insert_record_if_absent(&key, &observation, Some(deadline))
        })
        .await
    }

    async fn update(
        &self,
        key: &str,
        observation: &Observation,
        deadline: Instant,
    ) -> Result<(), StoreError> {
        let key = key.to_string();
        let observation = observation.clone();
        blocking(&self.db, move |db| {
            db.append_observation(&key, &observation, Some(deadline))
        })
        .await
    }
}
