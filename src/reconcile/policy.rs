//! Defense-policy reconciliation.
//!
//! Drives the membership ledger: adds the policy to newly selected
//! workloads, strips it from every workload when the policy is deleted,
//! and refuses to join a workload whose existing members define a
//! colliding rule. Selector membership can drift through label edits the
//! policy resource never observes, so a successful pass requeues itself
//! on a fixed delay instead of relying on change notifications alone.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::ResourceKey;
use crate::cluster::{ClusterApi, ClusterError};
use crate::config::WardenConfig;
use crate::ledger;
use crate::reconcile::{ReconcileError, ReconcileOutcome};

/// Reconciles one defense policy against the workloads it selects.
#[derive(Debug, Clone)]
pub struct PolicyReconciler {
    requeue: Duration,
}

impl PolicyReconciler {
    /// Build a reconciler from the engine configuration.
    pub fn new(config: &WardenConfig) -> Self {
        Self {
            requeue: config.policy_requeue,
        }
    }

    /// Reconcile the policy identified by `key`.
    ///
    /// A missing policy means it was deleted: its membership records are
    /// stripped from every workload in the namespace. A present policy
    /// joins every selected workload that passes the collision check.
    pub async fn reconcile(
        &self,
        cluster: &dyn ClusterApi,
        key: &ResourceKey,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let policy = match cluster.get_policy(key).await {
            Ok(policy) => policy,
            Err(e) if e.is_not_found() => {
                info!(policy = %key, "policy removed, detaching from workloads");
                self.detach_all(cluster, key).await?;
                return Ok(ReconcileOutcome::done());
            }
            Err(e) => return Err(e.into()),
        };

        let selected = cluster
            .list_workloads(&key.namespace, Some(&policy.spec.selector))
            .await?;

        for workload in selected {
            let workload_key = workload.meta.key();
            let members = ledger::decode(&workload);

            // Collision check against every *other* policy already on the
            // ledger. A conflicted workload is skipped, not rolled back.
            let mut collided = false;
            for record in members.iter().filter(|r| r.policy_key() != *key) {
                let other_key = record.policy_key();
                let other = match cluster.get_policy(&other_key).await {
                    Ok(other) => other,
                    Err(e) if e.is_not_found() => {
                        debug!(
                            policy = %key,
                            stale = %other_key,
                            workload = %workload_key,
                            "ledger references a deleted policy, ignoring"
                        );
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                if let Some(rule) = ledger::find_collision(&policy, &other) {
                    warn!(
                        policy = %key,
                        other = %other_key,
                        workload = %workload_key,
                        rule = ?rule,
                        "rule collision, refusing to join workload"
                    );
                    collided = true;
                    break;
                }
            }
            if collided {
                continue;
            }

            // Idempotent join: an existing record keeps its original
            // join time and needs no write.
            let already_member = members.iter().any(|r| r.policy_key() == *key);
            if already_member {
                continue;
            }

            let mut workload = workload;
            ledger::add(&mut workload, key, Utc::now());
            cluster.update_workload(&workload).await?;
            info!(policy = %key, workload = %workload_key, "workload joined policy membership");
        }

        Ok(ReconcileOutcome::after(self.requeue))
    }

    /// Remove this policy's membership record from every workload in the
    /// namespace. No matching workload is not an error.
    async fn detach_all(
        &self,
        cluster: &dyn ClusterApi,
        key: &ResourceKey,
    ) -> Result<(), ClusterError> {
        // The selector is gone with the policy; scan the namespace, the
        // ledger itself says who is a member.
        let workloads = cluster.list_workloads(&key.namespace, None).await?;
        for workload in workloads {
            if !ledger::is_managed(&workload) {
                continue;
            }
            let members = ledger::decode(&workload);
            if !members.iter().any(|r| r.policy_key() == *key) {
                continue;
            }
            let workload_key = workload.meta.key();
            let mut workload = workload;
            ledger::remove(&mut workload, key);
            cluster.update_workload(&workload).await?;
            info!(policy = %key, workload = %workload_key, "membership record removed");
        }
        Ok(())
    }
}
