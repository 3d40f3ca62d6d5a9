/// Scriptable in-process database client shared by unit tests

use crate::core::DatabaseClient;
use crate::error::DatabaseError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour and call counters for one connection target
#[derive(Debug, Default)]
pub struct MockTarget {
    pub name: String,
    probe_fails: AtomicBool,
    query_fails: AtomicBool,
    lag_unsupported: AtomicBool,
    lag_ms: Mutex<Option<u64>>,
    probe_delay_ms: AtomicU64,
    query_delay_ms: AtomicU64,
    pub probes: AtomicU64,
    pub queries: AtomicU64,
    pub closed: AtomicBool,
}

impl MockTarget {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn set_probe_fails(&self, fails: bool) {
        self.probe_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_query_fails(&self, fails: bool) {
        self.query_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_lag(&self, lag_ms: Option<u64>) {
        *self.lag_ms.lock().unwrap() = lag_ms;
    }

    pub fn set_lag_unsupported(&self, unsupported: bool) {
        self.lag_unsupported.store(unsupported, Ordering::SeqCst);
    }

    pub fn set_probe_delay(&self, delay: Duration) {
        self.probe_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_query_delay(&self, delay: Duration) {
        self.query_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Run a query; yields the name of the target that served it
    pub async fn query(&self) -> Result<String, DatabaseError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = self.query_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.query_fails.load(Ordering::SeqCst) {
            return Err(DatabaseError::query(format!("{} rejected query", self.name)));
        }
        Ok(self.name.clone())
    }
}

/// Database client whose targets are created on first connect
#[derive(Default)]
pub struct MockDatabase {
    targets: DashMap<String, Arc<MockTarget>>,
    refuse_connect: DashMap<String, ()>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target(&self, name: &str) -> Arc<MockTarget> {
        Arc::clone(
            self.targets
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MockTarget::new(name)))
                .value(),
        )
    }

    pub fn refuse_connections_to(&self, name: &str) {
        self.refuse_connect.insert(name.to_string(), ());
    }
}

#[async_trait]
impl DatabaseClient for MockDatabase {
    type Connection = Arc<MockTarget>;

    async fn connect(&self, target: &str) -> Result<Self::Connection, DatabaseError> {
        if self.refuse_connect.contains_key(target) {
            return Err(DatabaseError::connection(format!("{target} refused")));
        }
        Ok(self.target(target))
    }

    async fn probe(&self, connection: &Self::Connection) -> Result<(), DatabaseError> {
        connection.probes.fetch_add(1, Ordering::SeqCst);
        let delay = connection.probe_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if connection.probe_fails.load(Ordering::SeqCst) {
            return Err(DatabaseError::connection(format!(
                "{} did not answer probe",
                connection.name
            )));
        }
        Ok(())
    }

    async fn replication_lag(
        &self,
        connection: &Self::Connection,
    ) -> Result<Option<u64>, DatabaseError> {
        if connection.lag_unsupported.load(Ordering::SeqCst) {
            return Err(DatabaseError::unsupported("replication lag"));
        }
        Ok(*connection.lag_ms.lock().unwrap())
    }

    async fn close(&self, connection: &Self::Connection) {
        connection.closed.store(true, Ordering::SeqCst);
    }
}
