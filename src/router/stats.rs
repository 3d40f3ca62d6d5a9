/// Router statistics and reporting
use crate::core::{ReplicaConfig, ReplicaHealth};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

/// Point-in-time view of the router counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    pub total_reads: u64,
    pub total_writes: u64,
    pub reads_per_replica: BTreeMap<String, u64>,
    pub failover_count: u64,
    pub total_errors: u64,
    /// Running average over reads served by replicas
    pub average_latency_ms: f64,
}

/// Lock-free counters updated on every routed operation
#[derive(Debug, Default)]
pub struct RouterCounters {
    total_reads: AtomicU64,
    total_writes: AtomicU64,
    failover_count: AtomicU64,
    total_errors: AtomicU64,
    latency_total_us: AtomicU64,
    latency_samples: AtomicU64,
    reads_per_replica: DashMap<String, AtomicU64>,
}

impl RouterCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.total_reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.total_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failover(&self) {
        self.failover_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Account a successful replica read. Ignored for replicas without a
    /// stats slot, which happens when a replica is removed mid-read.
    pub fn record_replica_read(&self, replica_id: &str, latency: Duration) {
        let Some(reads) = self.reads_per_replica.get(replica_id) else {
            return;
        };
        reads.fetch_add(1, Ordering::Relaxed);
        self.latency_total_us
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Open the per-replica stats slot
    pub fn register_replica(&self, replica_id: &str) {
        self.reads_per_replica
            .entry(replica_id.to_string())
            .or_insert_with(|| AtomicU64::new(0));
    }

    /// Release the per-replica stats slot
    pub fn remove_replica(&self, replica_id: &str) {
        self.reads_per_replica.remove(replica_id);
    }

    pub fn replica_reads(&self, replica_id: &str) -> u64 {
        self.reads_per_replica
            .get(replica_id)
            .map(|reads| reads.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> RouterStats {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        let average_latency_ms = if samples == 0 {
            0.0
        } else {
            self.latency_total_us.load(Ordering::Relaxed) as f64 / samples as f64 / 1000.0
        };

        RouterStats {
            total_reads: self.total_reads.load(Ordering::Relaxed),
            total_writes: self.total_writes.load(Ordering::Relaxed),
            reads_per_replica: self
                .reads_per_replica
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
                .collect(),
            failover_count: self.failover_count.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            average_latency_ms,
        }
    }

    /// Zero every counter; replica slots stay registered
    pub fn reset(&self) {
        self.total_reads.store(0, Ordering::Relaxed);
        self.total_writes.store(0, Ordering::Relaxed);
        self.failover_count.store(0, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
        self.latency_total_us.store(0, Ordering::Relaxed);
        self.latency_samples.store(0, Ordering::Relaxed);
        for entry in self.reads_per_replica.iter() {
            entry.value().store(0, Ordering::Relaxed);
        }
    }
}

/// Per-replica section of the detailed report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaReport {
    pub config: ReplicaConfig,
    pub health: ReplicaHealth,
    pub reads: u64,
}

/// Operator-facing report combining stats and replica health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterReport {
    pub generated_at: SystemTime,
    pub uptime_secs: u64,
    pub primary_target: String,
    pub selection: String,
    pub monitoring: bool,
    pub total_replicas: usize,
    pub healthy_replicas: usize,
    pub stats: RouterStats,
    pub replicas: Vec<ReplicaReport>,
}
