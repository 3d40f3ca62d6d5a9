/// Core abstractions shared by the health monitor, router and cache
pub mod replica;

pub use replica::{ReplicaCandidate, ReplicaRegistry};

use crate::error::DatabaseError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Default weight for a replica registered without one
pub const DEFAULT_REPLICA_WEIGHT: usize = 1;

/// Default replication lag tolerated before a replica is taken out of rotation
pub const DEFAULT_MAX_ACCEPTABLE_LAG_MS: u64 = 5000;

/// Default number of consecutive errors that marks a replica unhealthy
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// Static registration data for one read replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub id: String,
    /// Opaque connection descriptor handed to the database client
    pub connection_target: String,
    pub weight: usize,
    pub max_acceptable_lag_ms: u64,
}

impl ReplicaConfig {
    pub fn new<I: Into<String>, T: Into<String>>(id: I, connection_target: T) -> Self {
        Self {
            id: id.into(),
            connection_target: connection_target.into(),
            weight: DEFAULT_REPLICA_WEIGHT,
            max_acceptable_lag_ms: DEFAULT_MAX_ACCEPTABLE_LAG_MS,
        }
    }

    pub fn with_weight(mut self, weight: usize) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_lag_ms(mut self, max_acceptable_lag_ms: u64) -> Self {
        self.max_acceptable_lag_ms = max_acceptable_lag_ms;
        self
    }
}

/// Health record for one replica
///
/// `is_healthy` is forced false once `consecutive_error_count` reaches the
/// configured threshold or a lag measurement exceeds the replica's maximum,
/// and only a successful health check restores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaHealth {
    pub id: String,
    pub is_healthy: bool,
    pub last_checked_at: Option<SystemTime>,
    pub latency_ms: u64,
    /// `None` when the engine could not report lag
    pub replication_lag_ms: Option<u64>,
    pub total_error_count: u64,
    pub consecutive_error_count: u32,
}

impl ReplicaHealth {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            is_healthy: true,
            last_checked_at: None,
            latency_ms: 0,
            replication_lag_ms: None,
            total_error_count: 0,
            consecutive_error_count: 0,
        }
    }

    /// Record a failed probe or query
    pub fn record_failure(&mut self, max_consecutive_errors: u32) {
        self.total_error_count += 1;
        self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
        if self.consecutive_error_count >= max_consecutive_errors {
            self.is_healthy = false;
        }
    }

    /// Record a successful probe. Returns true when the measured lag breached
    /// `max_acceptable_lag_ms`.
    pub fn record_probe_success(
        &mut self,
        latency_ms: u64,
        replication_lag_ms: Option<u64>,
        max_acceptable_lag_ms: u64,
    ) -> bool {
        self.last_checked_at = Some(SystemTime::now());
        self.latency_ms = latency_ms;
        self.replication_lag_ms = replication_lag_ms;
        self.consecutive_error_count = 0;

        let lagging = matches!(replication_lag_ms, Some(lag) if lag > max_acceptable_lag_ms);
        self.is_healthy = !lagging;
        lagging
    }

    /// A successful query clears the error streak but does not restore health;
    /// only a health check does that.
    pub fn record_query_success(&mut self) {
        self.consecutive_error_count = 0;
    }

    /// Whether the selector may route reads to this replica
    pub fn is_selectable(&self, max_consecutive_errors: u32) -> bool {
        self.is_healthy && self.consecutive_error_count < max_consecutive_errors
    }
}

/// Caller-declared intent of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Read,
    Write,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryKind::Read => write!(f, "read"),
            QueryKind::Write => write!(f, "write"),
        }
    }
}

/// Database client collaborator
///
/// Implementations own the driver and hand out one connection handle per
/// target. Operations passed to the router receive that handle.
#[async_trait]
pub trait DatabaseClient: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    /// Open the connection handle for a primary or replica target
    async fn connect(&self, target: &str) -> Result<Self::Connection, DatabaseError>;

    /// Trivial round trip used by health checks
    async fn probe(&self, connection: &Self::Connection) -> Result<(), DatabaseError>;

    /// Engine-specific replication lag; `Ok(None)` when not determinable
    async fn replication_lag(
        &self,
        _connection: &Self::Connection,
    ) -> Result<Option<u64>, DatabaseError> {
        Ok(None)
    }

    /// Release the connection handle
    async fn close(&self, _connection: &Self::Connection) {}
}
