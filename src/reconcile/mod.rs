//! Level-triggered reconcilers.
//!
//! The external orchestrator invokes [`policy::PolicyReconciler`] and
//! [`event::EventReconciler`] whenever the corresponding resource
//! changes. Invocations are re-entrant and may run concurrently for
//! different resources; every write is based on the object fetched
//! immediately before it, and lost races surface as
//! [`ClusterError::Conflict`](crate::cluster::ClusterError::Conflict)
//! for the orchestrator's own backoff to retry.

pub mod event;
pub mod policy;

use std::time::Duration;

use crate::api::{KeyParseError, ResourceKey};
use crate::cluster::ClusterError;

/// Result of a completed reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// When set, the orchestrator should re-deliver the same resource
    /// after the delay even if nothing changed.
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    /// Pass finished; wait for the next change notification.
    pub fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Pass finished; re-deliver after `delay`.
    pub fn after(delay: Duration) -> Self {
        Self {
            requeue_after: Some(delay),
        }
    }
}

/// Errors aborting a reconciliation pass.
///
/// These propagate to the external scheduler, which retries with its own
/// backoff; nothing here is terminal for the resource.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    /// A cluster-API call failed (including lost write races).
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// An event target is not in `"namespace/name"` form.
    #[error("event {event}: {source}")]
    MalformedTarget {
        /// Name of the offending event.
        event: String,
        /// Underlying parse failure.
        #[source]
        source: KeyParseError,
    },

    /// An event targeted a workload that carries no membership ledger.
    #[error("event {event}: workload {workload} is not under defense management")]
    UnmanagedTarget {
        /// Name of the offending event.
        event: String,
        /// The unmanaged workload.
        workload: ResourceKey,
    },
}
