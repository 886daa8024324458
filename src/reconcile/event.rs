//! Security-event reconciliation.
//!
//! For each target of an incoming event: resolve the governing policies
//! from the workload's membership ledger, find the first matching
//! strategy (first-match-wins across ledger order and strategy order),
//! record the event in the applied-events annotation, then dispatch the
//! resolved action to the executor.

use tracing::{debug, info};

use crate::actions::{ActionExecutor, ActionOutcome};
use crate::api::{Action, DefensePolicy, ResourceKey};
use crate::cluster::ClusterApi;
use crate::config::WardenConfig;
use crate::ledger;
use crate::matcher;
use crate::reconcile::{ReconcileError, ReconcileOutcome};

/// Reconciles one security event against its target workloads.
#[derive(Debug, Clone)]
pub struct EventReconciler {
    executor: ActionExecutor,
}

impl EventReconciler {
    /// Build a reconciler from the engine configuration.
    pub fn new(config: &WardenConfig) -> Self {
        Self {
            executor: ActionExecutor::new(config),
        }
    }

    /// Reconcile the event identified by `key`.
    ///
    /// A removed event needs no action. Absent target workloads are
    /// treated as already satisfied. Any cluster failure for one target
    /// aborts the whole pass — the orchestrator redelivers the event,
    /// and every step here is idempotent under that redelivery.
    pub async fn reconcile(
        &self,
        cluster: &dyn ClusterApi,
        key: &ResourceKey,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let event = match cluster.get_event(key).await {
            Ok(event) => event,
            Err(e) if e.is_not_found() => {
                debug!(event = %key, "event removed, no action needed");
                return Ok(ReconcileOutcome::done());
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            event = %event.meta.name,
            targets = ?event.spec.targets,
            "processing security event"
        );

        for target in &event.spec.targets {
            let workload_key: ResourceKey =
                target
                    .parse()
                    .map_err(|source| ReconcileError::MalformedTarget {
                        event: event.meta.name.clone(),
                        source,
                    })?;

            let workload = match cluster.get_workload(&workload_key).await {
                Ok(workload) => workload,
                Err(e) if e.is_not_found() => {
                    info!(event = %event.meta.name, workload = %workload_key, "target already absent");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // An event must only target ledger-managed workloads.
            if !ledger::is_managed(&workload) {
                return Err(ReconcileError::UnmanagedTarget {
                    event: event.meta.name.clone(),
                    workload: workload_key,
                });
            }

            // First matching policy in ledger order wins; a missing
            // referenced policy is skipped, not fatal.
            let mut resolved: Option<(Action, DefensePolicy)> = None;
            for record in ledger::decode(&workload) {
                let policy_key = record.policy_key();
                let policy = match cluster.get_policy(&policy_key).await {
                    Ok(policy) => policy,
                    Err(e) if e.is_not_found() => {
                        info!(
                            event = %event.meta.name,
                            policy = %policy_key,
                            "ledger references a deleted policy, skipping"
                        );
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                if let Some(action) =
                    matcher::resolve_action(&event.spec.rule, &policy.spec.strategies)
                {
                    resolved = Some((action.clone(), policy));
                    break;
                }
            }

            // Bookkeeping happens before execution and does not gate it:
            // a recorded event whose action failed last time must still
            // be re-attempted.
            let mut workload = workload;
            if ledger::record_applied_event(&mut workload, &event) {
                workload = cluster.update_workload(&workload).await?;
                debug!(event = %event.meta.name, workload = %workload_key, "event recorded on workload");
            }

            let outcome = self
                .executor
                .execute(
                    cluster,
                    &workload,
                    resolved.as_ref().map(|(a, p)| (a, p)),
                )
                .await?;
            if let ActionOutcome::Requeue(delay) = outcome {
                return Ok(ReconcileOutcome::after(delay));
            }
        }

        Ok(ReconcileOutcome::done())
    }
}
