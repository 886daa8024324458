//! Integration tests for `src/reconcile/`.

#[path = "reconcile/event_test.rs"]
mod event_test;
#[path = "reconcile/policy_test.rs"]
mod policy_test;
