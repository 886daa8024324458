//! Warden — security-response orchestration for cluster workloads.
//!
//! Policies select workloads by label and map threat rules to containment
//! actions. Reconcilers keep a per-workload membership ledger current,
//! match incoming security events against it, and execute the resolved
//! action. An interval scheduler synthesizes events on a jittered cadence
//! for workloads that opt in via annotations.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod annotations;
pub mod api;
pub mod cluster;

pub mod ledger;
pub mod matcher;

pub mod actions;
pub mod reconcile;
pub mod timer;
