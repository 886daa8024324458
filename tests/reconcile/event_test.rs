//! Tests for `src/reconcile/event.rs` — event-to-action flow end to end.

use std::collections::BTreeMap;

use warden::annotations;
use warden::api::{
    Action, DefensePolicy, DefensePolicySpec, ObjectMeta, ResourceKey, Rule, SecurityEvent,
    SecurityEventSpec, Strategy, Workload, POLICY_KIND,
};
use warden::cluster::memory::InMemoryCluster;
use warden::cluster::ClusterApi;
use warden::config::WardenConfig;
use warden::ledger;
use warden::reconcile::event::EventReconciler;
use warden::reconcile::policy::PolicyReconciler;
use warden::reconcile::ReconcileError;

fn scan_rule() -> Rule {
    Rule {
        kind: "scan".to_owned(),
        threat_level: "high".to_owned(),
        source: "scanner".to_owned(),
    }
}

fn policy(name: &str, action: Action) -> DefensePolicy {
    DefensePolicy {
        meta: ObjectMeta::named("prod", name),
        spec: DefensePolicySpec {
            selector: BTreeMap::from([("app".to_owned(), "web".to_owned())]),
            strategies: vec![Strategy {
                rule: scan_rule(),
                action,
            }],
        },
    }
}

fn web_workload(name: &str) -> Workload {
    let mut meta = ObjectMeta::named("prod", name);
    meta.labels.insert("app".to_owned(), "web".to_owned());
    meta.labels.insert("tier".to_owned(), "front".to_owned());
    Workload { meta }
}

fn event(name: &str, targets: &[&str], rule: Rule) -> SecurityEvent {
    SecurityEvent {
        meta: ObjectMeta::named("prod", name),
        spec: SecurityEventSpec {
            targets: targets.iter().map(|t| (*t).to_owned()).collect(),
            rule,
            description: "threat detected".to_owned(),
        },
    }
}

/// Seed a cluster where `guard` already governs `web-1`.
async fn governed_cluster(action: Action) -> InMemoryCluster {
    let cluster = InMemoryCluster::new();
    cluster.insert_workload(web_workload("web-1")).await;
    cluster.insert_policy(policy("guard", action)).await;

    let reconciler = PolicyReconciler::new(&WardenConfig::default());
    reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "guard"))
        .await
        .expect("policy attaches");
    cluster
}

#[tokio::test]
async fn matching_event_quarantines_the_target() {
    let cluster = governed_cluster(Action::Quarantine).await;
    cluster
        .create_event(&event("ev-1", &["prod/web-1"], scan_rule()))
        .await
        .expect("seed event");

    let reconciler = EventReconciler::new(&WardenConfig::default());
    let outcome = reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "ev-1"))
        .await
        .expect("reconcile");
    assert_eq!(outcome.requeue_after, None);

    // Exactly one default-deny isolation object, owned by the policy.
    let isolations = cluster.isolations().await;
    assert_eq!(isolations.len(), 1);
    let isolation = &isolations[0];
    assert_eq!(isolation.meta.name, "prod-web-1-policy");
    assert!(isolation.spec.ingress.is_empty());
    assert!(isolation.spec.egress.is_empty());

    let workload = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("present");
    // Selector label survives, the rest is demoted to annotations.
    assert_eq!(workload.meta.labels.get("app").map(String::as_str), Some("web"));
    assert_eq!(
        workload.meta.annotations.get("tier").map(String::as_str),
        Some("front")
    );
    assert_eq!(
        workload
            .meta
            .labels
            .get(annotations::ISOLATION_LABEL)
            .map(String::as_str),
        Some("prod-web-1-policy")
    );
    let owner = workload.meta.controller_owner().expect("owned");
    assert_eq!(owner.kind, POLICY_KIND);
    assert_eq!(owner.name, "guard");

    // The event is recorded on the workload, once.
    let applied = ledger::applied_events(&workload);
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].meta.name, "ev-1");
}

#[tokio::test]
async fn matching_event_deletes_the_target() {
    let cluster = governed_cluster(Action::Delete).await;
    cluster
        .create_event(&event("ev-1", &["prod/web-1"], scan_rule()))
        .await
        .expect("seed event");

    let reconciler = EventReconciler::new(&WardenConfig::default());
    reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "ev-1"))
        .await
        .expect("reconcile");

    let err = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect_err("deleted");
    assert!(err.is_not_found());
}

#[tokio::test]
async fn redelivered_event_records_once_and_stays_idempotent() {
    let cluster = governed_cluster(Action::Quarantine).await;
    cluster
        .create_event(&event("ev-1", &["prod/web-1"], scan_rule()))
        .await
        .expect("seed event");

    let reconciler = EventReconciler::new(&WardenConfig::default());
    let key = ResourceKey::new("prod", "ev-1");
    reconciler.reconcile(&cluster, &key).await.expect("first delivery");
    reconciler.reconcile(&cluster, &key).await.expect("redelivery");

    assert_eq!(cluster.isolations().await.len(), 1);
    let workload = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("present");
    assert_eq!(ledger::applied_events(&workload).len(), 1);
}

#[tokio::test]
async fn unmatched_rule_executes_nothing() {
    let cluster = governed_cluster(Action::Quarantine).await;
    let other_rule = Rule {
        kind: "exec".to_owned(),
        ..scan_rule()
    };
    cluster
        .create_event(&event("ev-1", &["prod/web-1"], other_rule))
        .await
        .expect("seed event");

    let reconciler = EventReconciler::new(&WardenConfig::default());
    reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "ev-1"))
        .await
        .expect("reconcile");

    assert!(cluster.isolations().await.is_empty());
    let workload = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("untouched");
    // Bookkeeping still happened: the event is on the record even though
    // no strategy matched.
    assert_eq!(ledger::applied_events(&workload).len(), 1);
}

#[tokio::test]
async fn unmanaged_target_is_an_error() {
    let cluster = InMemoryCluster::new();
    cluster.insert_workload(web_workload("web-1")).await;
    cluster
        .create_event(&event("ev-1", &["prod/web-1"], scan_rule()))
        .await
        .expect("seed event");

    let reconciler = EventReconciler::new(&WardenConfig::default());
    let err = reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "ev-1"))
        .await
        .expect_err("no ledger on the target");
    assert!(matches!(err, ReconcileError::UnmanagedTarget { .. }));
}

#[tokio::test]
async fn malformed_target_is_an_error() {
    let cluster = InMemoryCluster::new();
    cluster
        .create_event(&event("ev-1", &["not-a-key"], scan_rule()))
        .await
        .expect("seed event");

    let reconciler = EventReconciler::new(&WardenConfig::default());
    let err = reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "ev-1"))
        .await
        .expect_err("target must be namespace/name");
    assert!(matches!(err, ReconcileError::MalformedTarget { .. }));
}

#[tokio::test]
async fn absent_target_and_absent_event_are_satisfied() {
    let cluster = InMemoryCluster::new();

    let reconciler = EventReconciler::new(&WardenConfig::default());
    let outcome = reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "gone"))
        .await
        .expect("removed event needs no action");
    assert_eq!(outcome.requeue_after, None);

    cluster
        .create_event(&event("ev-1", &["prod/ghost"], scan_rule()))
        .await
        .expect("seed event");
    let outcome = reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "ev-1"))
        .await
        .expect("absent target is satisfied");
    assert_eq!(outcome.requeue_after, None);
}

#[tokio::test]
async fn ownership_race_surfaces_as_requeue() {
    let cluster = InMemoryCluster::new();
    let mut workload = web_workload("web-1");
    workload.meta.owner_references.push(warden::api::OwnerReference {
        kind: "ReplicaSet".to_owned(),
        name: "web".to_owned(),
        controller: true,
    });
    cluster.insert_workload(workload).await;
    cluster.insert_policy(policy("guard", Action::Quarantine)).await;

    let config = WardenConfig::default();
    PolicyReconciler::new(&config)
        .reconcile(&cluster, &ResourceKey::new("prod", "guard"))
        .await
        .expect("policy attaches");

    cluster
        .create_event(&event("ev-1", &["prod/web-1"], scan_rule()))
        .await
        .expect("seed event");

    let reconciler = EventReconciler::new(&config);
    let outcome = reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "ev-1"))
        .await
        .expect("race is retryable");
    assert_eq!(outcome.requeue_after, Some(config.ownership_retry));
}
