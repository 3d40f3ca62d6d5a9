/// Replica-aware query routing
///
/// Writes always go to the primary. Reads go to a healthy replica picked by
/// the selector and fall back to the primary when no replica qualifies or
/// the replica fails; the primary path itself is never retried.
pub mod balancer;
pub mod stats;

pub use balancer::{ReplicaSelector, SelectionStrategy};
pub use stats::{ReplicaReport, RouterReport, RouterStats};

use crate::core::{DatabaseClient, QueryKind, ReplicaConfig, ReplicaHealth, ReplicaRegistry};
use crate::error::{ConfigError, DatabaseError, StewardError, StewardResult};
use crate::health::{HealthMonitor, HealthSettings, HealthStatus};
use stats::RouterCounters;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::time::timeout;

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub primary_target: String,
    /// Upper bound for a single operation against the primary or a replica
    pub query_timeout: Duration,
    pub selection: SelectionStrategy,
    pub health: HealthSettings,
}

impl RouterConfig {
    pub fn new<S: Into<String>>(primary_target: S) -> Self {
        Self {
            primary_target: primary_target.into(),
            query_timeout: Duration::from_secs(5),
            selection: SelectionStrategy::default(),
            health: HealthSettings::default(),
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn with_selection(mut self, selection: SelectionStrategy) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_health(mut self, health: HealthSettings) -> Self {
        self.health = health;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_target.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "primary target cannot be empty".to_string(),
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "query timeout must be greater than 0".to_string(),
            ));
        }
        if self.health.check_interval.is_zero() || self.health.check_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "health check interval and timeout must be greater than 0".to_string(),
            ));
        }
        if self.health.max_consecutive_errors == 0 {
            return Err(ConfigError::ValidationError(
                "max_consecutive_errors must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// The read/write entry point for application code
pub struct QueryRouter<C: DatabaseClient> {
    client: Arc<C>,
    config: RouterConfig,
    primary: Arc<C::Connection>,
    registry: Arc<ReplicaRegistry<C::Connection>>,
    selector: ReplicaSelector,
    monitor: HealthMonitor<C>,
    counters: RouterCounters,
    started_at: Instant,
    closed: AtomicBool,
}

impl<C: DatabaseClient> QueryRouter<C> {
    /// Open the primary connection and build an empty replica set
    pub async fn connect(client: Arc<C>, config: RouterConfig) -> StewardResult<Self> {
        config.validate()?;

        let primary = timeout(config.query_timeout, client.connect(&config.primary_target))
            .await
            .map_err(|_| DatabaseError::Timeout {
                millis: config.query_timeout.as_millis() as u64,
            })??;

        let registry = Arc::new(ReplicaRegistry::new());
        let monitor = HealthMonitor::new(
            Arc::clone(&client),
            Arc::clone(&registry),
            config.health.clone(),
        );
        let selector = ReplicaSelector::new(config.selection, config.health.max_consecutive_errors);

        tracing::info!(
            primary = %config.primary_target,
            selection = selector.algorithm_name(),
            "Query router connected to primary"
        );

        Ok(Self {
            client,
            config,
            primary: Arc::new(primary),
            registry,
            selector,
            monitor,
            counters: RouterCounters::new(),
            started_at: Instant::now(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn monitor(&self) -> &HealthMonitor<C> {
        &self.monitor
    }

    /// Register a replica and open its connection
    pub async fn add_replica(&self, replica: ReplicaConfig) -> StewardResult<()> {
        self.ensure_open()?;
        if replica.id.trim().is_empty() {
            return Err(ConfigError::ValidationError("replica id cannot be empty".to_string()).into());
        }
        if replica.weight == 0 {
            return Err(ConfigError::ValidationError(format!(
                "replica {} weight must be greater than 0",
                replica.id
            ))
            .into());
        }
        if self.registry.contains(&replica.id) {
            return Err(StewardError::DuplicateReplica {
                replica_id: replica.id,
            });
        }

        let connection = match timeout(
            self.config.query_timeout,
            self.client.connect(&replica.connection_target),
        )
        .await
        {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(StewardError::replica(replica.id, e.to_string())),
            Err(_) => return Err(StewardError::replica(replica.id, "connect timed out")),
        };

        let replica_id = replica.id.clone();
        let weight = replica.weight;
        // A concurrent add of the same id may still win the insert
        self.registry.insert(replica, connection)?;
        self.counters.register_replica(&replica_id);

        tracing::info!(replica_id = %replica_id, weight, "Replica registered");
        Ok(())
    }

    /// Unregister a replica, releasing its connection and stats slot
    pub async fn remove_replica(&self, replica_id: &str) -> StewardResult<()> {
        let (_, connection) = self
            .registry
            .remove(replica_id)
            .ok_or_else(|| StewardError::unknown_replica(replica_id))?;
        self.counters.remove_replica(replica_id);
        self.client.close(&connection).await;

        tracing::info!(replica_id, "Replica removed");
        Ok(())
    }

    pub fn replica_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Run a read on a replica, falling back to the primary
    pub async fn execute_read<T, F, Fut>(&self, op: F) -> StewardResult<T>
    where
        F: Fn(Arc<C::Connection>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DatabaseError>> + Send,
        T: Send,
    {
        self.ensure_open()?;
        self.counters.record_read();

        let Some(replica) = self.selector.select(&self.registry) else {
            self.counters.record_failover();
            tracing::debug!("No healthy replica available, reading from primary");
            return self.run_on_primary(&op).await;
        };

        let started = Instant::now();
        match self.run_on(&op, replica.connection).await {
            Ok(value) => {
                self.counters.record_replica_read(&replica.id, started.elapsed());
                self.registry
                    .update_health(&replica.id, |health, _| health.record_query_success());
                Ok(value)
            }
            Err(e) => {
                self.record_replica_failure(&replica.id);
                self.counters.record_failover();
                self.counters.record_error();
                tracing::warn!(
                    replica_id = %replica.id,
                    error = %e,
                    "Replica read failed, retrying on primary"
                );
                self.run_on_primary(&op).await
            }
        }
    }

    /// Run a write on the primary; never retried here
    pub async fn execute_write<T, F, Fut>(&self, op: F) -> StewardResult<T>
    where
        F: Fn(Arc<C::Connection>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DatabaseError>> + Send,
        T: Send,
    {
        self.ensure_open()?;
        self.counters.record_write();
        self.run_on_primary(&op).await
    }

    /// Dispatch on the caller-declared kind; the operation is never inspected
    pub async fn execute_auto<T, F, Fut>(&self, op: F, kind: QueryKind) -> StewardResult<T>
    where
        F: Fn(Arc<C::Connection>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DatabaseError>> + Send,
        T: Send,
    {
        match kind {
            QueryKind::Read => self.execute_read(op).await,
            QueryKind::Write => self.execute_write(op).await,
        }
    }

    pub fn get_health(&self, replica_id: &str) -> StewardResult<ReplicaHealth> {
        self.registry
            .health(replica_id)
            .ok_or_else(|| StewardError::unknown_replica(replica_id))
    }

    pub fn get_all_health(&self) -> Vec<ReplicaHealth> {
        self.registry.health_snapshot()
    }

    pub async fn check_health(&self, replica_id: &str) -> StewardResult<HealthStatus> {
        self.monitor.check_health(replica_id).await
    }

    pub fn start_monitoring(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.monitor.start_monitoring();
    }

    pub fn stop_monitoring(&self) {
        self.monitor.stop_monitoring();
    }

    pub fn get_stats(&self) -> RouterStats {
        self.counters.snapshot()
    }

    /// Operator reset of all router counters
    pub fn reset_stats(&self) {
        self.counters.reset();
        tracing::info!("Router statistics reset");
    }

    pub fn get_detailed_report(&self) -> RouterReport {
        let stats = self.counters.snapshot();
        let replicas: Vec<ReplicaReport> = self
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| {
                let config = self.registry.config(&id)?;
                let health = self.registry.health(&id)?;
                let reads = self.counters.replica_reads(&id);
                Some(ReplicaReport {
                    config,
                    health,
                    reads,
                })
            })
            .collect();
        let threshold = self.config.health.max_consecutive_errors;
        let healthy_replicas = replicas
            .iter()
            .filter(|r| r.health.is_selectable(threshold))
            .count();

        RouterReport {
            generated_at: SystemTime::now(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            primary_target: self.config.primary_target.clone(),
            selection: self.selector.algorithm_name().to_string(),
            monitoring: self.monitor.is_monitoring(),
            total_replicas: replicas.len(),
            healthy_replicas,
            stats,
            replicas,
        }
    }

    pub fn is_disconnected(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop health checks and release every connection. Idempotent.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.monitor.stop_monitoring();

        for (replica_id, connection) in self.registry.drain() {
            self.counters.remove_replica(&replica_id);
            self.client.close(&connection).await;
        }
        self.client.close(&self.primary).await;

        tracing::info!("Query router disconnected");
    }

    fn ensure_open(&self) -> StewardResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StewardError::Disconnected);
        }
        Ok(())
    }

    fn record_replica_failure(&self, replica_id: &str) {
        let threshold = self.config.health.max_consecutive_errors;
        let flipped = self.registry.update_health(replica_id, |health, _| {
            let was_healthy = health.is_healthy;
            health.record_failure(threshold);
            was_healthy && !health.is_healthy
        });
        if flipped == Some(true) {
            tracing::warn!(replica_id, "Replica marked unhealthy after consecutive read failures");
        }
    }

    async fn run_on<T, F, Fut>(&self, op: &F, connection: Arc<C::Connection>) -> Result<T, DatabaseError>
    where
        F: Fn(Arc<C::Connection>) -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        match timeout(self.config.query_timeout, op(connection)).await {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout {
                millis: self.config.query_timeout.as_millis() as u64,
            }),
        }
    }

    async fn run_on_primary<T, F, Fut>(&self, op: &F) -> StewardResult<T>
    where
        F: Fn(Arc<C::Connection>) -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        self.run_on(op, Arc::clone(&self.primary)).await.map_err(|e| {
            self.counters.record_error();
            tracing::error!(error = %e, "Primary operation failed");
            StewardError::Database(e)
        })
    }
}
