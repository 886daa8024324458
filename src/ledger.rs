//! Membership ledger and applied-event bookkeeping.
//!
//! Each workload carries, inside a single annotation, the JSON list of
//! defense policies currently governing it. A second annotation records
//! the security events already applied to the workload. Both decode
//! totally: malformed JSON degrades to an empty set (logged), never an
//! error for the caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::annotations;
use crate::api::{DefensePolicy, ResourceKey, Rule, SecurityEvent, Workload};

/// One policy's membership on a workload.
///
/// `time` is the join timestamp in stringified unix seconds; it is
/// preserved verbatim when the same policy is re-added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipRecord {
    /// Join time, unix seconds as a string.
    pub time: String,
    /// Namespace of the governing policy.
    pub namespace: String,
    /// Name of the governing policy.
    pub name: String,
}

impl MembershipRecord {
    /// Identity of the governing policy.
    pub fn policy_key(&self) -> ResourceKey {
        ResourceKey::new(self.namespace.clone(), self.name.clone())
    }
}

/// Decode the ledger annotation into membership records.
///
/// A missing annotation decodes to an empty set; so does malformed JSON,
/// with a warning tied to the workload identity.
pub fn decode(workload: &Workload) -> Vec<MembershipRecord> {
    let Some(raw) = workload.meta.annotations.get(annotations::MEMBERSHIP_LEDGER) else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(records) => records,
        Err(e) => {
            warn!(
                workload = %workload.meta.key(),
                error = %e,
                "malformed membership ledger, treating as empty"
            );
            Vec::new()
        }
    }
}

/// Whether the workload carries any membership ledger at all.
///
/// Presence of the annotation key is the cheap "is this managed" check,
/// which is why removing the last record deletes the key outright.
pub fn is_managed(workload: &Workload) -> bool {
    workload
        .meta
        .annotations
        .contains_key(annotations::MEMBERSHIP_LEDGER)
}

fn write(workload: &mut Workload, records: &[MembershipRecord]) {
    if records.is_empty() {
        workload
            .meta
            .annotations
            .remove(annotations::MEMBERSHIP_LEDGER);
        return;
    }
    match serde_json::to_string(records) {
        Ok(encoded) => {
            workload
                .meta
                .annotations
                .insert(annotations::MEMBERSHIP_LEDGER.to_owned(), encoded);
        }
        Err(e) => {
            // Plain strings only; encoding cannot fail in practice.
            warn!(workload = %workload.meta.key(), error = %e, "failed to encode membership ledger");
        }
    }
}

/// Add a membership record for `policy`, stamped at `now`.
///
/// Idempotent: if a record for the same policy identity already exists
/// it is returned unchanged, original join time intact.
pub fn add(workload: &mut Workload, policy: &ResourceKey, now: DateTime<Utc>) -> MembershipRecord {
    let mut records = decode(workload);
    if let Some(existing) = records.iter().find(|r| r.policy_key() == *policy) {
        return existing.clone();
    }
    let record = MembershipRecord {
        time: now.timestamp().to_string(),
        namespace: policy.namespace.clone(),
        name: policy.name.clone(),
    };
    records.push(record.clone());
    write(workload, &records);
    record
}

/// Remove the membership record for `policy`, if present.
///
/// Removing the last record deletes the annotation key entirely rather
/// than leaving an empty list behind.
pub fn remove(workload: &mut Workload, policy: &ResourceKey) {
    let mut records = decode(workload);
    records.retain(|r| r.policy_key() != *policy);
    write(workload, &records);
}

/// Find a rule defined identically by both policies.
///
/// Any exact rule match between the two strategy lists is a collision;
/// the caller must exclude the candidate's own identity before calling.
pub fn find_collision<'a>(
    candidate: &'a DefensePolicy,
    other: &DefensePolicy,
) -> Option<&'a Rule> {
    candidate
        .spec
        .strategies
        .iter()
        .map(|s| &s.rule)
        .find(|rule| other.spec.strategies.iter().any(|o| o.rule == **rule))
}

/// Decode the applied-events annotation.
///
/// Same totality contract as [`decode`]: missing or malformed input
/// yields an empty list.
pub fn applied_events(workload: &Workload) -> Vec<SecurityEvent> {
    let Some(raw) = workload.meta.annotations.get(annotations::APPLIED_EVENTS) else {
        return Vec::new();
    };
    match serde_json::from_str(raw) {
        Ok(events) => events,
        Err(e) => {
            warn!(
                workload = %workload.meta.key(),
                error = %e,
                "malformed applied-events record, treating as empty"
            );
            Vec::new()
        }
    }
}

/// Record `event` in the applied-events annotation, deduplicated by
/// event name. Returns `false` when the event was already recorded.
///
/// Recording is audit bookkeeping, not a gate: callers re-attempt the
/// action even when this returns `false`, because the previous attempt
/// may have failed after the record was written.
pub fn record_applied_event(workload: &mut Workload, event: &SecurityEvent) -> bool {
    let mut events = applied_events(workload);
    if events.iter().any(|e| e.meta.name == event.meta.name) {
        return false;
    }
    events.push(event.clone());
    match serde_json::to_string(&events) {
        Ok(encoded) => {
            workload
                .meta
                .annotations
                .insert(annotations::APPLIED_EVENTS.to_owned(), encoded);
            true
        }
        Err(e) => {
            warn!(workload = %workload.meta.key(), error = %e, "failed to encode applied-events record");
            false
        }
    }
}
