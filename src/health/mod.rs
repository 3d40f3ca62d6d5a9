/// Health checking for read replicas

use crate::core::{DatabaseClient, ReplicaRegistry, DEFAULT_MAX_CONSECUTIVE_ERRORS};
use crate::error::{StewardError, StewardResult};
use futures::future::join_all;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};

/// Outcome of a single replica health check
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Lagging { lag_ms: u64, max_lag_ms: u64 },
    Unhealthy { reason: String },
    Timeout,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Lagging { lag_ms, max_lag_ms } => {
                write!(f, "Lagging: {}ms behind (max {}ms)", lag_ms, max_lag_ms)
            }
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Timeout => write!(f, "Timeout"),
        }
    }
}

impl HealthStatus {
    /// Check if the probe itself succeeded and the replica is within lag bounds
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health monitor settings
#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub max_consecutive_errors: u32,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            check_timeout: Duration::from_secs(5),
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

struct MonitorShared<C: DatabaseClient> {
    client: Arc<C>,
    registry: Arc<ReplicaRegistry<C::Connection>>,
    settings: HealthSettings,
}

impl<C: DatabaseClient> MonitorShared<C> {
    async fn check_health(&self, replica_id: &str) -> StewardResult<HealthStatus> {
        let connection = self
            .registry
            .connection(replica_id)
            .ok_or_else(|| StewardError::unknown_replica(replica_id))?;
        let check_timeout = self.settings.check_timeout;
        let threshold = self.settings.max_consecutive_errors;

        let started = Instant::now();
        let probe = timeout(check_timeout, self.client.probe(&connection)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let failure = match probe {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(HealthStatus::Unhealthy {
                reason: e.to_string(),
            }),
            Err(_) => Some(HealthStatus::Timeout),
        };

        if let Some(status) = failure {
            let transition = self.registry.update_health(replica_id, |health, _| {
                let was_healthy = health.is_healthy;
                health.record_failure(threshold);
                health.last_checked_at = Some(SystemTime::now());
                (was_healthy && !health.is_healthy, health.consecutive_error_count)
            });
            match transition {
                Some((true, errors)) => tracing::warn!(
                    replica_id,
                    consecutive_errors = errors,
                    "Replica marked unhealthy after failed health check: {}",
                    status
                ),
                Some((false, errors)) => tracing::debug!(
                    replica_id,
                    consecutive_errors = errors,
                    "Replica health check failed: {}",
                    status
                ),
                None => return Err(StewardError::unknown_replica(replica_id)),
            }
            return Ok(status);
        }

        let lag_ms = match timeout(check_timeout, self.client.replication_lag(&connection)).await {
            Ok(Ok(lag)) => lag,
            Ok(Err(e)) => {
                tracing::debug!(replica_id, "Replication lag unavailable: {}", e);
                None
            }
            Err(_) => {
                tracing::debug!(replica_id, "Replication lag measurement timed out");
                None
            }
        };

        let outcome = self.registry.update_health(replica_id, |health, config| {
            let was_healthy = health.is_healthy;
            let lagging =
                health.record_probe_success(latency_ms, lag_ms, config.max_acceptable_lag_ms);
            (was_healthy, lagging, config.max_acceptable_lag_ms)
        });

        match outcome {
            None => Err(StewardError::unknown_replica(replica_id)),
            Some((_, true, max_lag_ms)) => {
                let lag_ms = lag_ms.unwrap_or_default();
                tracing::warn!(
                    replica_id,
                    lag_ms,
                    max_lag_ms,
                    "Replica replication lag exceeds limit, removing from rotation"
                );
                Ok(HealthStatus::Lagging { lag_ms, max_lag_ms })
            }
            Some((was_healthy, false, _)) => {
                if !was_healthy {
                    tracing::info!(replica_id, latency_ms, "Replica recovered");
                } else {
                    tracing::debug!(replica_id, latency_ms, "Replica is healthy");
                }
                Ok(HealthStatus::Healthy)
            }
        }
    }

    async fn run_all_checks(&self) -> Vec<(String, HealthStatus)> {
        let ids = self.registry.ids();
        let checks = ids.iter().map(|id| self.check_health(id));
        let results = join_all(checks).await;

        ids.into_iter()
            .zip(results)
            // A replica removed mid-cycle has nothing left to report
            .filter_map(|(id, result)| result.ok().map(|status| (id, status)))
            .collect()
    }
}

/// Periodic replica health monitor
///
/// Publishes its findings into the shared `ReplicaRegistry`; the selector
/// reads them from there.
pub struct HealthMonitor<C: DatabaseClient> {
    shared: Arc<MonitorShared<C>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: DatabaseClient> HealthMonitor<C> {
    pub fn new(
        client: Arc<C>,
        registry: Arc<ReplicaRegistry<C::Connection>>,
        settings: HealthSettings,
    ) -> Self {
        Self {
            shared: Arc::new(MonitorShared {
                client,
                registry,
                settings,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.shared.settings
    }

    /// Probe one replica and fold the result into its health record.
    /// Probe failures are reported as a status, not an error.
    pub async fn check_health(&self, replica_id: &str) -> StewardResult<HealthStatus> {
        self.shared.check_health(replica_id).await
    }

    /// Probe every registered replica concurrently
    pub async fn run_all_checks(&self) -> Vec<(String, HealthStatus)> {
        self.shared.run_all_checks().await
    }

    /// Start the periodic check loop; the first round runs immediately
    pub fn start_monitoring(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let interval = shared.settings.check_interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let results = shared.run_all_checks().await;
                let healthy = results.iter().filter(|(_, s)| s.is_healthy()).count();
                tracing::debug!(
                    checked = results.len(),
                    healthy,
                    "Replica health check round complete"
                );
            }
        }));

        tracing::info!(
            interval_sec = interval.as_secs(),
            "Replica health monitoring started"
        );
    }

    /// Stop the periodic check loop; safe to call repeatedly
    pub fn stop_monitoring(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = task.take() {
            handle.abort();
            tracing::info!("Replica health monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        task.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl<C: DatabaseClient> Drop for HealthMonitor<C> {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}
