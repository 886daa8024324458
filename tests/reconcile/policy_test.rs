//! Tests for `src/reconcile/policy.rs` — ledger membership lifecycle.

use std::collections::BTreeMap;

use warden::api::{
    Action, DefensePolicy, DefensePolicySpec, ObjectMeta, ResourceKey, Rule, Strategy, Workload,
};
use warden::cluster::memory::InMemoryCluster;
use warden::cluster::ClusterApi;
use warden::config::WardenConfig;
use warden::ledger;
use warden::reconcile::policy::PolicyReconciler;

fn web_selector() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_owned(), "web".to_owned())])
}

fn policy(name: &str, selector: BTreeMap<String, String>, rule_kind: &str) -> DefensePolicy {
    DefensePolicy {
        meta: ObjectMeta::named("prod", name),
        spec: DefensePolicySpec {
            selector,
            strategies: vec![Strategy {
                rule: Rule {
                    kind: rule_kind.to_owned(),
                    threat_level: "high".to_owned(),
                    source: "scanner".to_owned(),
                },
                action: Action::Delete,
            }],
        },
    }
}

fn labeled_workload(name: &str, labels: &[(&str, &str)]) -> Workload {
    let mut meta = ObjectMeta::named("prod", name);
    for (k, v) in labels {
        meta.labels.insert((*k).to_owned(), (*v).to_owned());
    }
    Workload { meta }
}

#[tokio::test]
async fn selected_workloads_join_the_ledger() {
    let cluster = InMemoryCluster::new();
    cluster
        .insert_workload(labeled_workload("web-1", &[("app", "web")]))
        .await;
    cluster
        .insert_workload(labeled_workload("db-1", &[("app", "db")]))
        .await;
    cluster.insert_policy(policy("guard", web_selector(), "scan")).await;

    let config = WardenConfig::default();
    let reconciler = PolicyReconciler::new(&config);
    let key = ResourceKey::new("prod", "guard");
    let outcome = reconciler.reconcile(&cluster, &key).await.expect("reconcile");

    // Membership can drift through label edits, so a successful pass
    // always schedules a re-check.
    assert_eq!(outcome.requeue_after, Some(config.policy_requeue));

    let web = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("present");
    let records = ledger::decode(&web);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].policy_key(), key);

    let db = cluster
        .get_workload(&ResourceKey::new("prod", "db-1"))
        .await
        .expect("present");
    assert!(!ledger::is_managed(&db));
}

#[tokio::test]
async fn repeated_passes_do_not_rewrite_the_workload() {
    let cluster = InMemoryCluster::new();
    cluster
        .insert_workload(labeled_workload("web-1", &[("app", "web")]))
        .await;
    cluster.insert_policy(policy("guard", web_selector(), "scan")).await;

    let reconciler = PolicyReconciler::new(&WardenConfig::default());
    let key = ResourceKey::new("prod", "guard");
    reconciler.reconcile(&cluster, &key).await.expect("first pass");

    let after_first = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("present");

    reconciler.reconcile(&cluster, &key).await.expect("second pass");
    let after_second = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("present");

    // Idempotent join: same record, same resource version, no write.
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn deleted_policy_is_detached_from_all_members() {
    let cluster = InMemoryCluster::new();
    cluster
        .insert_workload(labeled_workload("web-1", &[("app", "web")]))
        .await;
    cluster
        .insert_workload(labeled_workload("web-2", &[("app", "web")]))
        .await;
    cluster.insert_policy(policy("guard", web_selector(), "scan")).await;
    cluster
        .insert_policy(policy("other", web_selector(), "exec"))
        .await;

    let reconciler = PolicyReconciler::new(&WardenConfig::default());
    let guard = ResourceKey::new("prod", "guard");
    let other = ResourceKey::new("prod", "other");
    reconciler.reconcile(&cluster, &guard).await.expect("join guard");
    reconciler.reconcile(&cluster, &other).await.expect("join other");

    cluster.remove_policy(&guard).await;
    reconciler.reconcile(&cluster, &guard).await.expect("detach");

    for name in ["web-1", "web-2"] {
        let workload = cluster
            .get_workload(&ResourceKey::new("prod", name))
            .await
            .expect("present");
        let records = ledger::decode(&workload);
        // Only the surviving policy remains on the ledger.
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].policy_key(), other);
    }
}

#[tokio::test]
async fn colliding_policy_is_refused_membership() {
    let cluster = InMemoryCluster::new();
    cluster
        .insert_workload(labeled_workload("web-1", &[("app", "web")]))
        .await;
    cluster.insert_policy(policy("first", web_selector(), "scan")).await;
    // Identical rule triple: joining would make action resolution
    // ambiguous on the shared workload.
    cluster
        .insert_policy(policy("second", web_selector(), "scan"))
        .await;

    let reconciler = PolicyReconciler::new(&WardenConfig::default());
    let first = ResourceKey::new("prod", "first");
    let second = ResourceKey::new("prod", "second");
    reconciler.reconcile(&cluster, &first).await.expect("join first");
    reconciler.reconcile(&cluster, &second).await.expect("pass succeeds");

    let workload = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("present");
    let records = ledger::decode(&workload);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].policy_key(), first);
}

#[tokio::test]
async fn distinct_rules_share_a_workload() {
    let cluster = InMemoryCluster::new();
    cluster
        .insert_workload(labeled_workload("web-1", &[("app", "web")]))
        .await;
    cluster.insert_policy(policy("first", web_selector(), "scan")).await;
    cluster
        .insert_policy(policy("second", web_selector(), "exec"))
        .await;

    let reconciler = PolicyReconciler::new(&WardenConfig::default());
    reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "first"))
        .await
        .expect("join first");
    reconciler
        .reconcile(&cluster, &ResourceKey::new("prod", "second"))
        .await
        .expect("join second");

    let workload = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("present");
    assert_eq!(ledger::decode(&workload).len(), 2);
}

#[tokio::test]
async fn stale_ledger_reference_does_not_block_joining() {
    let cluster = InMemoryCluster::new();
    // The workload remembers a policy that no longer exists.
    let mut workload = labeled_workload("web-1", &[("app", "web")]);
    ledger::add(
        &mut workload,
        &ResourceKey::new("prod", "ghost"),
        chrono::Utc::now(),
    );
    cluster.insert_workload(workload).await;
    cluster.insert_policy(policy("guard", web_selector(), "scan")).await;

    let reconciler = PolicyReconciler::new(&WardenConfig::default());
    let guard = ResourceKey::new("prod", "guard");
    reconciler.reconcile(&cluster, &guard).await.expect("join");

    let workload = cluster
        .get_workload(&ResourceKey::new("prod", "web-1"))
        .await
        .expect("present");
    let records = ledger::decode(&workload);
    assert!(records.iter().any(|r| r.policy_key() == guard));
}
