/// Registered replica management
use crate::core::{ReplicaConfig, ReplicaHealth};
use crate::error::{StewardError, StewardResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// One registered replica: its static config, health record and connection
struct ReplicaSlot<C> {
    config: ReplicaConfig,
    health: ReplicaHealth,
    connection: Arc<C>,
    registered_seq: u64,
}

/// Selector input for one replica that passed the health filter
#[derive(Debug)]
pub struct ReplicaCandidate<C> {
    pub id: String,
    pub weight: usize,
    pub connection: Arc<C>,
}

impl<C> Clone for ReplicaCandidate<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            weight: self.weight,
            connection: Arc::clone(&self.connection),
        }
    }
}

/// Registry of replicas keyed by id
///
/// Every replica lives in its own map entry, so a health check on one replica
/// never serializes reads or checks against another.
pub struct ReplicaRegistry<C> {
    slots: DashMap<String, ReplicaSlot<C>>,
    next_seq: AtomicU64,
}

impl<C> ReplicaRegistry<C> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a replica together with its already-open connection
    pub fn insert(&self, config: ReplicaConfig, connection: C) -> StewardResult<()> {
        match self.slots.entry(config.id.clone()) {
            Entry::Occupied(_) => Err(StewardError::DuplicateReplica {
                replica_id: config.id,
            }),
            Entry::Vacant(vacant) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                vacant.insert(ReplicaSlot {
                    health: ReplicaHealth::new(config.id.clone()),
                    config,
                    connection: Arc::new(connection),
                    registered_seq: seq,
                });
                Ok(())
            }
        }
    }

    /// Remove a replica, handing back its connection for release
    pub fn remove(&self, replica_id: &str) -> Option<(ReplicaConfig, Arc<C>)> {
        self.slots
            .remove(replica_id)
            .map(|(_, slot)| (slot.config, slot.connection))
    }

    pub fn contains(&self, replica_id: &str) -> bool {
        self.slots.contains_key(replica_id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Replica ids in registration order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<(u64, String)> = self
            .slots
            .iter()
            .map(|slot| (slot.registered_seq, slot.key().clone()))
            .collect();
        ids.sort_unstable();
        ids.into_iter().map(|(_, id)| id).collect()
    }

    pub fn config(&self, replica_id: &str) -> Option<ReplicaConfig> {
        self.slots.get(replica_id).map(|slot| slot.config.clone())
    }

    pub fn connection(&self, replica_id: &str) -> Option<Arc<C>> {
        self.slots
            .get(replica_id)
            .map(|slot| Arc::clone(&slot.connection))
    }

    pub fn health(&self, replica_id: &str) -> Option<ReplicaHealth> {
        self.slots.get(replica_id).map(|slot| slot.health.clone())
    }

    /// Health of every replica in registration order
    pub fn health_snapshot(&self) -> Vec<ReplicaHealth> {
        let mut entries: Vec<(u64, ReplicaHealth)> = self
            .slots
            .iter()
            .map(|slot| (slot.registered_seq, slot.health.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, health)| health).collect()
    }

    /// Replicas eligible for reads, in registration order
    pub fn candidates(&self, max_consecutive_errors: u32) -> Vec<ReplicaCandidate<C>> {
        let mut eligible: Vec<(u64, ReplicaCandidate<C>)> = self
            .slots
            .iter()
            .filter(|slot| slot.health.is_selectable(max_consecutive_errors))
            .map(|slot| {
                (
                    slot.registered_seq,
                    ReplicaCandidate {
                        id: slot.key().clone(),
                        weight: slot.config.weight,
                        connection: Arc::clone(&slot.connection),
                    },
                )
            })
            .collect();
        eligible.sort_by_key(|(seq, _)| *seq);
        eligible.into_iter().map(|(_, candidate)| candidate).collect()
    }

    /// Apply a mutation to one replica's health record
    pub fn update_health<F, R>(&self, replica_id: &str, update: F) -> Option<R>
    where
        F: FnOnce(&mut ReplicaHealth, &ReplicaConfig) -> R,
    {
        self.slots.get_mut(replica_id).map(|mut slot| {
            let slot = &mut *slot;
            update(&mut slot.health, &slot.config)
        })
    }

    /// Remove every replica, handing back their connections
    pub fn drain(&self) -> Vec<(String, Arc<C>)> {
        let ids: Vec<String> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        ids.into_iter()
            .filter_map(|id| self.slots.remove(&id))
            .map(|(id, slot)| (id, slot.connection))
            .collect()
    }
}

impl<C> Default for ReplicaRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
