//! Query ledger service.
//!
//! Records each observation with one `exists` round trip followed by exactly
//! one create or update. The ledger is side-channel telemetry: failures are
//! typed internally and logged at [`QueryLedger::record_observation`], never
//! surfaced to the conversation that triggered them.

use crate::config::{Config, CreateStrategy};
use crate::normalize::normalize;
use crate::store::{SharedStore, StoreError};
use helpdesk_ledger_types::{LedgerWrite, Observation, QueryRecord};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Why an observation did not make it into the ledger
#[derive(Debug)]
pub enum LedgerError {
    /// Existence check failed or timed out
    Lookup { key: String, cause: StoreCause },
    /// Create or update failed or timed out
    Write { key: String, cause: StoreCause },
}

#[derive(Debug)]
pub enum StoreCause {
    Store(StoreError),
    Timeout(Duration),
}

impl fmt::Display for StoreCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreCause::Store(e) => write!(f, "{}", e),
            StoreCause::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::Lookup { key, cause } => {
                write!(f, "lookup of '{}' failed: {}", key, cause)
            }
            LedgerError::Write { key, cause } => {
                write!(f, "write of '{}' failed: {}", key, cause)
            }
        }
    }
}

impl std::error::Error for LedgerError {}

pub struct QueryLedger {
    store: SharedStore,
    enabled: bool,
    store_timeout: Duration,
    strategy: CreateStrategy,
}

impl QueryLedger {
    pub fn new(store: SharedStore, config: &Config) -> Self {
        Self {
            store,
            enabled: config.update_ledger,
            store_timeout: config.store_timeout,
            strategy: config.create_strategy,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Best-effort entry point. Never fails; errors are logged and the
    /// observation is dropped.
    pub async fn record_observation(
        &self,
        raw_query: &str,
        user_id: Option<&str>,
        utterance: Option<&str>,
    ) {
        match self.try_record_observation(raw_query, user_id, utterance).await {
            Ok(write) => log::debug!("[LEDGER] {:?} '{}'", write, raw_query.trim()),
            Err(e) => log::error!("[LEDGER] Observation lost: {}", e),
        }
    }

    pub async fn try_record_observation(
        &self,
        raw_query: &str,
        user_id: Option<&str>,
        utterance: Option<&str>,
    ) -> Result<LedgerWrite, LedgerError> {
        if !self.enabled {
            return Ok(LedgerWrite::Skipped);
        }

        let key = normalize(raw_query);
        let observation = Observation::new(user_id, utterance);

        match self.guarded(self.store.exists(&key)).await {
            Ok(Some(_)) => self.update(&key, &observation).await,
            Ok(None) => match self.strategy {
                CreateStrategy::AcceptRace => self.create(&key, &observation).await,
                CreateStrategy::ConditionalCreate => {
                    self.create_or_update(&key, &observation).await
                }
            },
            Err(cause) => self.create_after_failed_lookup(key, &observation, cause).await,
        }
    }

    /// Existence unknown: the only permitted write is a conditional create,
    /// which cannot touch a record that is already there.
    async fn create_after_failed_lookup(
        &self,
        key: String,
        observation: &Observation,
        cause: StoreCause,
    ) -> Result<LedgerWrite, LedgerError> {
        log::warn!(
            "[LEDGER] lookup of '{}' failed: {}; attempting conditional create",
            key,
            cause
        );
        let created = self
            .guarded(self.store.create_if_absent(&key, observation, self.deadline()))
            .await
            .map_err(|cause| write_error(&key, cause))?;
        if created {
            Ok(LedgerWrite::Created)
        } else {
            Err(LedgerError::Lookup { key, cause })
        }
    }

    /// Current record for a raw query, if any
    pub async fn lookup(&self, raw_query: &str) -> Result<Option<QueryRecord>, LedgerError> {
        let key = normalize(raw_query);
        let found = self.guarded(self.store.exists(&key)).await;
        found.map_err(|cause| LedgerError::Lookup { key, cause })
    }

    async fn create(&self, key: &str, observation: &Observation) -> Result<LedgerWrite, LedgerError> {
        self.guarded(self.store.create(key, observation, self.deadline()))
            .await
            .map_err(|cause| write_error(key, cause))?;
        Ok(LedgerWrite::Created)
    }

    async fn update(&self, key: &str, observation: &Observation) -> Result<LedgerWrite, LedgerError> {
        self.guarded(self.store.update(key, observation, self.deadline()))
            .await
            .map_err(|cause| write_error(key, cause))?;
        Ok(LedgerWrite::Updated)
    }

    async fn create_or_update(
        &self,
        key: &str,
        observation: &Observation,
    ) -> Result<LedgerWrite, LedgerError> {
        let created = self
            .guarded(self.store.create_if_absent(key, observation, self.deadline()))
            .await
            .map_err(|cause| write_error(key, cause))?;
        if created {
            Ok(LedgerWrite::Created)
        } else {
            self.update(key, observation).await
        }
    }

    /// Deadline handed to a write. It is taken before the write future is
    /// built, so it never falls after the timeout that guards it.
    fn deadline(&self) -> Instant {
        Instant::now() + self.store_timeout
    }

    async fn guarded<T, F>(&self, op: F) -> Result<T, StoreCause>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.store_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(StoreError::DeadlineExceeded)) | Err(_) => {
                Err(StoreCause::Timeout(self.store_timeout))
            }
            Ok(Err(e)) => Err(StoreCause::Store(e)),
        }
    }
}

fn write_error(key: &str, cause: StoreCause) -> LedgerError {
    LedgerError::Write {
        key: key.to_string(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Db, SqliteLedger};
    use crate::store::LedgerStore;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    fn sqlite_store() -> Arc<SqliteLedger> {
        Arc::new(SqliteLedger::new(Arc::new(
            Db::open(":memory:", "helpdesk_queries").unwrap(),
        )))
    }

    fn config(strategy: CreateStrategy) -> Config {
        Config {
            create_strategy: strategy,
            store_timeout: Duration::from_millis(500),
            ..Config::default()
        }
    }

    fn ledger_over(store: SharedStore) -> QueryLedger {
        QueryLedger::new(store, &config(CreateStrategy::AcceptRace))
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    /// Delegates to an inner store but can fail or stall individual operations
    struct FaultyStore {
        inner: Arc<SqliteLedger>,
        fail_exists: bool,
        fail_writes: bool,
        stall: Option<Duration>,
        writes: AtomicUsize,
    }

    impl FaultyStore {
        fn new(inner: Arc<SqliteLedger>) -> Self {
            Self {
                inner,
                fail_exists: false,
                fail_writes: false,
                stall: None,
                writes: AtomicUsize::new(0),
            }
        }

        async fn maybe_stall(&self) {
            if let Some(d) = self.stall {
                tokio::time::sleep(d).await;
            }
        }

        fn write_attempt(&self) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                Err(StoreError::Task("store unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl LedgerStore for FaultyStore {
        async fn exists(&self, key: &str) -> Result<Option<QueryRecord>, StoreError> {
            self.maybe_stall().await;
            if self.fail_exists {
                return Err(StoreError::Task("store unavailable".to_string()));
            }
            self.inner.exists(key).await
        }

        async fn create(
            &self,
            key: &str,
            observation: &Observation,
            deadline: Instant,
        ) -> Result<(), StoreError> {
            self.write_attempt()?;
            self.inner.create(key, observation, deadline).await
        }

        async fn create_if_absent(
            &self,
            key: &str,
            observation: &Observation,
            deadline: Instant,
        ) -> Result<bool, StoreError> {
            self.write_attempt()?;
            self.inner.create_if_absent(key, observation, deadline).await
        }

        async fn update(
            &self,
            key: &str,
            observation: &Observation,
            deadline: Instant,
        ) -> Result<(), StoreError> {
            self.write_attempt()?;
            self.inner.update(key, observation, deadline).await
        }
    }

    /// Holds every `exists` call until `parties` callers have seen the store,
    /// so concurrent first sightings all observe an absent key.
    struct RacingStore {
        inner: Arc<SqliteLedger>,
        barrier: Barrier,
    }

    #[async_trait]
    impl LedgerStore for RacingStore {
        async fn exists(&self, key: &str) -> Result<Option<QueryRecord>, StoreError> {
            let found = self.inner.exists(key).await;
            self.barrier.wait().await;
            found
        }

        async fn create(
            &self,
            key: &str,
            observation: &Observation,
            deadline: Instant,
        ) -> Result<(), StoreError> {
            self.inner.create(key, observation, deadline).await
        }

        async fn create_if_absent(
            &self,
            key: &str,
            observation: &Observation,
            deadline: Instant,
        ) -> Result<bool, StoreError> {
            self.inner.create_if_absent(key, observation, deadline).await
        }

        async fn update(
            &self,
            key: &str,
            observation: &Observation,
            deadline: Instant,
        ) -> Result<(), StoreError> {
            self.inner.update(key, observation, deadline).await
        }
    }

    #[tokio::test]
    async fn test_first_observation_creates() {
        let store = sqlite_store();
        let ledger = ledger_over(store.clone());

        let write = ledger
            .try_record_observation(
                "How do I reset my password?",
                Some("U1"),
                Some("how do i reset my password"),
            )
            .await
            .unwrap();
        assert_eq!(write, LedgerWrite::Created);

        let rec = store.exists("how do i reset my password?").await.unwrap().unwrap();
        assert_eq!(rec.search_query, "how do i reset my password?");
        assert_eq!(rec.search_count, 1);
        assert_eq!(rec.user_ids, vec!["U1"]);
        assert_eq!(rec.utterances, vec!["how do i reset my password"]);
    }

    #[tokio::test]
    async fn test_differently_cased_query_updates_same_record() {
        let store = sqlite_store();
        let ledger = ledger_over(store.clone());

        ledger
            .record_observation(
                "How do I reset my password?",
                Some("U1"),
                Some("how do i reset my password"),
            )
            .await;
        let write = ledger
            .try_record_observation("HOW DO I RESET MY PASSWORD?", Some("U2"), None)
            .await
            .unwrap();
        assert_eq!(write, LedgerWrite::Updated);

        let rec = ledger.lookup("  how do I reset my password? ").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 2);
        assert_eq!(rec.user_ids, vec!["U1", "U2"]);
        assert_eq!(rec.utterances, vec!["how do i reset my password"]);
    }

    #[tokio::test]
    async fn test_sequential_observations_accumulate() {
        let store = sqlite_store();
        let ledger = ledger_over(store.clone());

        ledger.record_observation("vpn", None, Some("vpn please")).await;
        let followups = [
            (Some("U1"), None),
            (None, Some("vpn broken")),
            (Some("U2"), Some("vpn again")),
            (None, None),
        ];
        for (user_id, utterance) in followups {
            ledger.record_observation("VPN", user_id, utterance).await;
        }

        let rec = store.exists("vpn").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 5);
        assert_eq!(rec.user_ids, vec!["U1", "U2"]);
        assert_eq!(rec.utterances, vec!["vpn please", "vpn broken", "vpn again"]);
    }

    #[tokio::test]
    async fn test_empty_query_uses_sentinel() {
        let store = sqlite_store();
        let ledger = ledger_over(store.clone());

        ledger.record_observation("", Some("U1"), None).await;
        ledger.record_observation("   ", None, None).await;

        let rec = store.exists("auto").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 2);
    }

    #[tokio::test]
    async fn test_disabled_ledger_skips_store() {
        let store = sqlite_store();
        let ledger = QueryLedger::new(
            store.clone(),
            &Config {
                update_ledger: false,
                ..Config::default()
            },
        );

        let write = ledger.try_record_observation("vpn", Some("U1"), None).await.unwrap();
        assert_eq!(write, LedgerWrite::Skipped);
        assert!(store.exists("vpn").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_on_unavailable_store_leaves_ledger_untouched() {
        let inner = sqlite_store();
        inner.create("vpn", &Observation::new(Some("U1"), None), soon()).await.unwrap();
        let faulty = Arc::new(FaultyStore {
            fail_exists: true,
            fail_writes: true,
            ..FaultyStore::new(inner.clone())
        });
        let ledger = ledger_over(faulty.clone());

        let err = ledger
            .try_record_observation("vpn", Some("U2"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Write { .. }));

        // The boundary swallows the same failure
        ledger.record_observation("new question", Some("U2"), None).await;

        let rec = inner.exists("vpn").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 1);
        assert_eq!(rec.user_ids, vec!["U1"]);
        assert!(inner.exists("new question").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_failure_leaves_existing_record_unchanged() {
        let inner = sqlite_store();
        inner.create("vpn", &Observation::new(Some("U1"), None), soon()).await.unwrap();
        inner
            .update("vpn", &Observation::new(Some("U2"), None), soon())
            .await
            .unwrap();
        let faulty = Arc::new(FaultyStore {
            fail_exists: true,
            ..FaultyStore::new(inner.clone())
        });
        let ledger = ledger_over(faulty.clone());

        let err = ledger
            .try_record_observation("vpn", Some("U3"), Some("vpn down"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Lookup { ref key, .. } if key == "vpn"));
        // Only the conditional create was attempted
        assert_eq!(faulty.writes.load(Ordering::SeqCst), 1);

        ledger.record_observation("VPN", Some("U4"), None).await;

        let rec = inner.exists("vpn").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 2);
        assert_eq!(rec.user_ids, vec!["U1", "U2"]);
        assert!(rec.utterances.is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_still_creates_new_record() {
        let inner = sqlite_store();
        let faulty = Arc::new(FaultyStore {
            fail_exists: true,
            ..FaultyStore::new(inner.clone())
        });
        let ledger = ledger_over(faulty);

        let write = ledger.try_record_observation("Printer jam", Some("U1"), None).await.unwrap();
        assert_eq!(write, LedgerWrite::Created);

        let rec = inner.exists("printer jam").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 1);
        assert_eq!(rec.user_ids, vec!["U1"]);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let inner = sqlite_store();
        let faulty = Arc::new(FaultyStore {
            fail_writes: true,
            ..FaultyStore::new(inner.clone())
        });
        let ledger = ledger_over(faulty.clone());

        let err = ledger.try_record_observation("vpn", None, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Write { ref key, .. } if key == "vpn"));
        assert_eq!(faulty.writes.load(Ordering::SeqCst), 1);
        assert!(inner.exists("vpn").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let inner = sqlite_store();
        let faulty = Arc::new(FaultyStore {
            stall: Some(Duration::from_secs(5)),
            fail_writes: true,
            ..FaultyStore::new(inner.clone())
        });
        let ledger = QueryLedger::new(
            faulty.clone(),
            &Config {
                store_timeout: Duration::from_millis(20),
                ..Config::default()
            },
        );

        let err = ledger.lookup("vpn").await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Lookup { cause: StoreCause::Timeout(_), .. }
        ));

        ledger.record_observation("vpn", Some("U1"), None).await;
        assert!(inner.exists("vpn").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_first_sightings_last_writer_wins() {
        let inner = sqlite_store();
        let racing = Arc::new(RacingStore {
            inner: inner.clone(),
            barrier: Barrier::new(2),
        });
        let ledger = Arc::new(QueryLedger::new(
            racing,
            &config(CreateStrategy::AcceptRace),
        ));

        let a = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger.try_record_observation("vpn", Some("U1"), Some("vpn one")).await
            })
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger.try_record_observation("VPN", Some("U2"), Some("vpn two")).await
            })
        };
        assert_eq!(a.await.unwrap().unwrap(), LedgerWrite::Created);
        assert_eq!(b.await.unwrap().unwrap(), LedgerWrite::Created);

        let rec = inner.exists("vpn").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 1);
        let winner_one = rec.user_ids == vec!["U1"] && rec.utterances == vec!["vpn one"];
        let winner_two = rec.user_ids == vec!["U2"] && rec.utterances == vec!["vpn two"];
        assert!(winner_one || winner_two, "merged record: {:?}", rec);
    }

    #[tokio::test]
    async fn test_concurrent_first_sightings_conditional_create_keeps_both() {
        let inner = sqlite_store();
        let racing = Arc::new(RacingStore {
            inner: inner.clone(),
            barrier: Barrier::new(2),
        });
        let ledger = Arc::new(QueryLedger::new(
            racing,
            &config(CreateStrategy::ConditionalCreate),
        ));

        let a = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.try_record_observation("vpn", Some("U1"), None).await })
        };
        let b = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.try_record_observation("vpn", Some("U2"), None).await })
        };
        let mut writes = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        writes.sort_by_key(|w| *w == LedgerWrite::Updated);
        assert_eq!(writes, vec![LedgerWrite::Created, LedgerWrite::Updated]);

        let mut rec = inner.exists("vpn").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 2);
        rec.user_ids.sort();
        assert_eq!(rec.user_ids, vec!["U1", "U2"]);
    }

    #[tokio::test]
    async fn test_concurrent_updates_never_lose_appends() {
        let store = sqlite_store();
        let ledger = Arc::new(ledger_over(store.clone()));
        ledger.record_observation("vpn", None, None).await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let user = format!("U{}", i);
                ledger.try_record_observation("vpn", Some(user.as_str()), None).await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), LedgerWrite::Updated);
        }

        let rec = store.exists("vpn").await.unwrap().unwrap();
        assert_eq!(rec.search_count, 21);
        assert_eq!(rec.user_ids.len(), 20);
    }
}
