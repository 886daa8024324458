//! Annotation and label keys the engine reads and writes on resources.
//!
//! Everything the engine persists on a workload travels through string
//! annotations: the membership ledger, the applied-event history and the
//! interval-timer configuration.

/// Workload annotation holding the JSON membership ledger.
pub const MEMBERSHIP_LEDGER: &str = "defense.warden.dev/managed-by";

/// Workload annotation holding the JSON list of applied security events.
pub const APPLIED_EVENTS: &str = "defense.warden.dev/applied-events";

/// Label key the quarantine isolation object selects on.
pub const ISOLATION_LABEL: &str = "defense.warden.dev/network-isolation";

/// Workload annotation enabling the interval timer (`"true"` / `"false"`).
pub const TIMER_ENABLED: &str = "interval-timer.warden.dev/enabled";

/// Workload annotation carrying the `"min-max"` interval range.
pub const TIMER_CONFIG: &str = "interval-timer.warden.dev/config";

/// Label on synthetic events: target workload name.
pub const TIMER_EVENT_WORKLOAD: &str = "interval-timer.warden.dev/workload-name";

/// Label on synthetic events: target workload namespace.
pub const TIMER_EVENT_NAMESPACE: &str = "interval-timer.warden.dev/workload-namespace";

/// Label on synthetic events: trigger type marker.
pub const TIMER_EVENT_TRIGGER: &str = "interval-timer.warden.dev/trigger-type";
