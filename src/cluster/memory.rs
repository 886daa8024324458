//! In-memory [`ClusterApi`] implementation.
//!
//! Backs the test suite and local experiments. Mimics the orchestrator's
//! optimistic-concurrency semantics: every stored object carries a
//! resource version, and an update presenting a stale version fails with
//! [`ClusterError::Conflict`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::api::{
    selector_matches, DefensePolicy, NetworkIsolation, ResourceKey, SecurityEvent, Workload,
};
use crate::cluster::{ClusterApi, ClusterError, ResourceKind};

#[derive(Default)]
struct Stores {
    workloads: HashMap<ResourceKey, Workload>,
    policies: HashMap<ResourceKey, DefensePolicy>,
    events: HashMap<ResourceKey, SecurityEvent>,
    isolations: HashMap<ResourceKey, NetworkIsolation>,
    next_version: u64,
}

impl Stores {
    fn bump(&mut self) -> u64 {
        self.next_version = self.next_version.saturating_add(1);
        self.next_version
    }
}

/// In-memory cluster store with per-kind maps and version bumping.
#[derive(Default)]
pub struct InMemoryCluster {
    stores: RwLock<Stores>,
}

impl InMemoryCluster {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a workload, assigning it a fresh resource version.
    pub async fn insert_workload(&self, mut workload: Workload) {
        let mut stores = self.stores.write().await;
        workload.meta.resource_version = stores.bump();
        stores.workloads.insert(workload.meta.key(), workload);
    }

    /// Seed a defense policy.
    pub async fn insert_policy(&self, mut policy: DefensePolicy) {
        let mut stores = self.stores.write().await;
        policy.meta.resource_version = stores.bump();
        stores.policies.insert(policy.meta.key(), policy);
    }

    /// Remove a defense policy (simulates deletion by the operator owner).
    pub async fn remove_policy(&self, key: &ResourceKey) {
        self.stores.write().await.policies.remove(key);
    }

    /// Snapshot of all stored security events, sorted by name.
    pub async fn events(&self) -> Vec<SecurityEvent> {
        let stores = self.stores.read().await;
        let mut events: Vec<SecurityEvent> = stores.events.values().cloned().collect();
        events.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        events
    }

    /// Snapshot of all stored isolation objects, sorted by name.
    pub async fn isolations(&self) -> Vec<NetworkIsolation> {
        let stores = self.stores.read().await;
        let mut items: Vec<NetworkIsolation> = stores.isolations.values().cloned().collect();
        items.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        items
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn get_workload(&self, key: &ResourceKey) -> Result<Workload, ClusterError> {
        let stores = self.stores.read().await;
        stores
            .workloads
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: ResourceKind::Workload,
                key: key.clone(),
            })
    }

    async fn list_workloads(
        &self,
        namespace: &str,
        selector: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Workload>, ClusterError> {
        let stores = self.stores.read().await;
        let mut items: Vec<Workload> = stores
            .workloads
            .values()
            .filter(|w| namespace.is_empty() || w.meta.namespace == namespace)
            .filter(|w| selector.is_none_or(|s| selector_matches(s, &w.meta.labels)))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.meta.key().cmp(&b.meta.key()));
        Ok(items)
    }

    async fn update_workload(&self, workload: &Workload) -> Result<Workload, ClusterError> {
        let key = workload.meta.key();
        let mut stores = self.stores.write().await;
        let current_version = match stores.workloads.get(&key) {
            Some(stored) => stored.meta.resource_version,
            None => {
                return Err(ClusterError::NotFound {
                    kind: ResourceKind::Workload,
                    key,
                })
            }
        };
        if workload.meta.resource_version != current_version {
            return Err(ClusterError::Conflict {
                kind: ResourceKind::Workload,
                key,
            });
        }
        let mut updated = workload.clone();
        updated.meta.resource_version = stores.bump();
        stores.workloads.insert(key, updated.clone());
        Ok(updated)
    }

    async fn delete_workload(&self, key: &ResourceKey) -> Result<(), ClusterError> {
        let mut stores = self.stores.write().await;
        stores
            .workloads
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound {
                kind: ResourceKind::Workload,
                key: key.clone(),
            })
    }

    async fn get_policy(&self, key: &ResourceKey) -> Result<DefensePolicy, ClusterError> {
        let stores = self.stores.read().await;
        stores
            .policies
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: ResourceKind::DefensePolicy,
                key: key.clone(),
            })
    }

    async fn get_event(&self, key: &ResourceKey) -> Result<SecurityEvent, ClusterError> {
        let stores = self.stores.read().await;
        stores
            .events
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: ResourceKind::SecurityEvent,
                key: key.clone(),
            })
    }

    async fn create_event(&self, event: &SecurityEvent) -> Result<(), ClusterError> {
        let key = event.meta.key();
        let mut stores = self.stores.write().await;
        if stores.events.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: ResourceKind::SecurityEvent,
                key,
            });
        }
        let mut stored = event.clone();
        stored.meta.resource_version = stores.bump();
        stores.events.insert(key, stored);
        Ok(())
    }

    async fn get_isolation(&self, key: &ResourceKey) -> Result<NetworkIsolation, ClusterError> {
        let stores = self.stores.read().await;
        stores
            .isolations
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound {
                kind: ResourceKind::NetworkIsolation,
                key: key.clone(),
            })
    }

    async fn create_isolation(&self, isolation: &NetworkIsolation) -> Result<(), ClusterError> {
        let key = isolation.meta.key();
        let mut stores = self.stores.write().await;
        if stores.isolations.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: ResourceKind::NetworkIsolation,
                key,
            });
        }
        let mut stored = isolation.clone();
        stored.meta.resource_version = stores.bump();
        stores.isolations.insert(key, stored);
        Ok(())
    }
}
