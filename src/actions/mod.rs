//! Action execution state machine.
//!
//! Turns a resolved `(action, policy)` pair into cluster mutations.
//! Only `delete` and `quarantine` execute; the remaining variants are
//! accepted as configuration but logged as no-ops. Every path is
//! idempotent under retry: redelivered events re-enter here safely.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::annotations;
use crate::api::{
    Action, DefensePolicy, IsolationPolicyType, NetworkIsolation, NetworkIsolationSpec,
    ObjectMeta, OwnerReference, ResourceKey, Workload, POLICY_KIND,
};
use crate::cluster::{ClusterApi, ClusterError};
use crate::config::WardenConfig;

/// Result of an action execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action reached its desired state (or was a logged no-op).
    Completed,
    /// A transient condition blocks progress; retry after the delay.
    Requeue(Duration),
}

/// Executes resolved actions against the cluster.
#[derive(Debug, Clone)]
pub struct ActionExecutor {
    ownership_retry: Duration,
}

impl ActionExecutor {
    /// Build an executor from the engine configuration.
    pub fn new(config: &WardenConfig) -> Self {
        Self {
            ownership_retry: config.ownership_retry,
        }
    }

    /// Execute the resolved action for `workload`.
    ///
    /// `resolved` is `None` when no governing policy matched the event
    /// rule; that is logged, not an error. Cluster failures other than
    /// the tolerated not-found cases propagate so the event is retried
    /// on redelivery.
    pub async fn execute(
        &self,
        cluster: &dyn ClusterApi,
        workload: &Workload,
        resolved: Option<(&Action, &DefensePolicy)>,
    ) -> Result<ActionOutcome, ClusterError> {
        let key = workload.meta.key();
        match resolved {
            None => {
                info!(workload = %key, "no strategy matched the event rule, nothing to execute");
                Ok(ActionOutcome::Completed)
            }
            Some((Action::Delete, _)) => self.delete(cluster, &key).await,
            Some((Action::Quarantine, policy)) => self.quarantine(cluster, workload, policy).await,
            Some((other, _)) => {
                info!(
                    workload = %key,
                    action = other.name(),
                    "action accepted but not implemented, skipping"
                );
                Ok(ActionOutcome::Completed)
            }
        }
    }

    /// Delete the workload; an already-absent target is success.
    async fn delete(
        &self,
        cluster: &dyn ClusterApi,
        key: &ResourceKey,
    ) -> Result<ActionOutcome, ClusterError> {
        match cluster.delete_workload(key).await {
            Ok(()) => info!(workload = %key, action = "delete", "workload deleted"),
            Err(e) if e.is_not_found() => {
                debug!(workload = %key, action = "delete", "workload already absent");
            }
            Err(e) => return Err(e),
        }
        Ok(ActionOutcome::Completed)
    }

    /// Quarantine the workload under the governing policy.
    ///
    /// Three steps: synthesize the default-deny isolation object (skipped
    /// when it already exists — the flow is re-entrant), relabel the
    /// workload so the isolation selector matches, then transfer the
    /// workload's controller ownership to the policy. The last step can
    /// race the previous controller and resolves by bounded retry rather
    /// than failure.
    async fn quarantine(
        &self,
        cluster: &dyn ClusterApi,
        workload: &Workload,
        policy: &DefensePolicy,
    ) -> Result<ActionOutcome, ClusterError> {
        let key = workload.meta.key();
        let isolation_name = format!("{}-{}-policy", key.namespace, key.name);
        let isolation_key = ResourceKey::new(key.namespace.clone(), isolation_name.clone());
        let mut workload = workload.clone();

        match cluster.get_isolation(&isolation_key).await {
            Ok(_) => {
                debug!(
                    workload = %key,
                    isolation = %isolation_key,
                    "isolation object already present, skipping recreation"
                );
            }
            Err(e) if e.is_not_found() => {
                let isolation = NetworkIsolation {
                    meta: ObjectMeta {
                        owner_references: vec![OwnerReference {
                            kind: POLICY_KIND.to_owned(),
                            name: policy.meta.name.clone(),
                            controller: true,
                        }],
                        ..ObjectMeta::named(key.namespace.clone(), isolation_name.clone())
                    },
                    spec: NetworkIsolationSpec {
                        selector: BTreeMap::from([(
                            annotations::ISOLATION_LABEL.to_owned(),
                            isolation_name.clone(),
                        )]),
                        // Empty rule lists with both types present: deny
                        // all ingress and egress.
                        ingress: Vec::new(),
                        egress: Vec::new(),
                        policy_types: vec![
                            IsolationPolicyType::Ingress,
                            IsolationPolicyType::Egress,
                        ],
                    },
                };
                cluster.create_isolation(&isolation).await?;

                // Move every label outside the policy selector into an
                // annotation so the original identity is preserved, then
                // attach the isolation label.
                let labels = std::mem::take(&mut workload.meta.labels);
                for (label, value) in labels {
                    if policy.spec.selector.get(&label) == Some(&value) {
                        workload.meta.labels.insert(label, value);
                    } else {
                        workload.meta.annotations.insert(label, value);
                    }
                }
                workload
                    .meta
                    .labels
                    .insert(annotations::ISOLATION_LABEL.to_owned(), isolation_name);
                workload = cluster.update_workload(&workload).await?;

                info!(workload = %key, policy = %policy.meta.key(), "workload placed in quarantine");
            }
            Err(e) => return Err(e),
        }

        // Ownership transfer is a separate update: until the relabel has
        // propagated, the previous controller may still claim the
        // workload, in which case the transfer is retried shortly.
        if let Some(owner) = workload.meta.controller_owner() {
            if owner.kind == POLICY_KIND && owner.name == policy.meta.name {
                return Ok(ActionOutcome::Completed);
            }
            warn!(
                workload = %key,
                owner_kind = %owner.kind,
                owner = %owner.name,
                retry_in = ?self.ownership_retry,
                "workload still claimed by its previous controller, rescheduling ownership transfer"
            );
            return Ok(ActionOutcome::Requeue(self.ownership_retry));
        }

        workload.meta.owner_references.push(OwnerReference {
            kind: POLICY_KIND.to_owned(),
            name: policy.meta.name.clone(),
            controller: true,
        });
        cluster.update_workload(&workload).await?;
        info!(workload = %key, policy = %policy.meta.key(), "workload ownership transferred to policy");

        Ok(ActionOutcome::Completed)
    }
}
