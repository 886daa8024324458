//! The cluster API boundary.
//!
//! Everything the engine needs from the orchestrator is expressed by the
//! [`ClusterApi`] trait: get/list/create/update/delete on the three
//! resource kinds plus creation of network-isolation objects. "Not
//! found" and "write conflict" are distinguished error classes; every
//! other failure is an opaque transient error left to the caller's
//! retry machinery.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::api::{
    DefensePolicy, NetworkIsolation, ResourceKey, SecurityEvent, Workload,
};

/// Resource kinds crossing the cluster boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// A workload under management.
    Workload,
    /// A defense policy.
    DefensePolicy,
    /// A security event.
    SecurityEvent,
    /// A synthesized network-isolation object.
    NetworkIsolation,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Workload => "workload",
            Self::DefensePolicy => "defense policy",
            Self::SecurityEvent => "security event",
            Self::NetworkIsolation => "network isolation",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the cluster API.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The target resource does not exist.
    #[error("{kind} {key} not found")]
    NotFound {
        /// Kind of the missing resource.
        kind: ResourceKind,
        /// Identity of the missing resource.
        key: ResourceKey,
    },

    /// A write lost a race: the object changed since it was fetched.
    #[error("write conflict on {kind} {key}: object changed since fetch")]
    Conflict {
        /// Kind of the contested resource.
        kind: ResourceKind,
        /// Identity of the contested resource.
        key: ResourceKey,
    },

    /// Creation failed because the name is already taken.
    #[error("{kind} {key} already exists")]
    AlreadyExists {
        /// Kind of the existing resource.
        kind: ResourceKind,
        /// Identity of the existing resource.
        key: ResourceKey,
    },

    /// Any other cluster-API failure, opaque to the engine.
    #[error("cluster API error: {0}")]
    Transient(String),
}

impl ClusterError {
    /// Whether this error is the distinguished "not found" class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this error is a lost optimistic-concurrency race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Async interface to the cluster orchestrator.
///
/// Updates carry the resource version of the fetched object; a stale
/// version yields [`ClusterError::Conflict`]. No implementation may
/// block while a caller holds an in-process lock — the engine never
/// holds one across these calls.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch a workload by key.
    async fn get_workload(&self, key: &ResourceKey) -> Result<Workload, ClusterError>;

    /// List workloads, optionally restricted to a namespace (empty string
    /// means all namespaces) and filtered by a label selector.
    async fn list_workloads(
        &self,
        namespace: &str,
        selector: Option<&BTreeMap<String, String>>,
    ) -> Result<Vec<Workload>, ClusterError>;

    /// Persist workload metadata changes; returns the stored object with
    /// its bumped resource version.
    async fn update_workload(&self, workload: &Workload) -> Result<Workload, ClusterError>;

    /// Delete a workload.
    async fn delete_workload(&self, key: &ResourceKey) -> Result<(), ClusterError>;

    /// Fetch a defense policy by key.
    async fn get_policy(&self, key: &ResourceKey) -> Result<DefensePolicy, ClusterError>;

    /// Fetch a security event by key.
    async fn get_event(&self, key: &ResourceKey) -> Result<SecurityEvent, ClusterError>;

    /// Create a security event.
    async fn create_event(&self, event: &SecurityEvent) -> Result<(), ClusterError>;

    /// Fetch a network-isolation object by key.
    async fn get_isolation(&self, key: &ResourceKey) -> Result<NetworkIsolation, ClusterError>;

    /// Create a network-isolation object.
    async fn create_isolation(&self, isolation: &NetworkIsolation) -> Result<(), ClusterError>;
}
