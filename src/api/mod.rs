//! Typed resource model for the defense orchestration engine.
//!
//! Three resource kinds cross the cluster boundary: [`DefensePolicy`],
//! [`SecurityEvent`] and [`Workload`], plus the synthesized
//! [`NetworkIsolation`] object used by the quarantine action. All are
//! keyed by `(namespace, name)`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// `(namespace, name)` identity of a cluster resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Namespace the resource lives in.
    pub namespace: String,
    /// Resource name, unique within the namespace.
    pub name: String,
}

impl ResourceKey {
    /// Build a key from namespace and name.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Error parsing a `"namespace/name"` target reference.
#[derive(Debug, thiserror::Error)]
#[error("invalid target reference {0:?}, expected \"namespace/name\"")]
pub struct KeyParseError(pub String);

impl FromStr for ResourceKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(namespace, name))
            }
            _ => Err(KeyParseError(s.to_owned())),
        }
    }
}

/// Reference from a dependent object to the resource that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// Kind of the owning resource.
    pub kind: String,
    /// Name of the owning resource (owners are same-namespace).
    pub name: String,
    /// Whether the owner is the managing controller of the dependent.
    pub controller: bool,
}

/// Common metadata carried by every resource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectMeta {
    /// Resource name.
    pub name: String,
    /// Resource namespace.
    pub namespace: String,
    /// Identifying labels, matched by policy selectors.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Free-form string annotations; the engine stores its ledger here.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owners of this resource, at most one of which is the controller.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Optimistic-concurrency token, bumped by the store on every write.
    #[serde(skip_serializing_if = "is_zero")]
    pub resource_version: u64,
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

impl ObjectMeta {
    /// Metadata for a fresh namespaced object.
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// The `(namespace, name)` key of this object.
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.namespace.clone(), self.name.clone())
    }

    /// The owner reference marked as controller, if any.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }
}

/// Classification triple compared by exact field match.
///
/// Empty string is a valid, distinct value — there are no wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Rule {
    /// Event type (e.g. `"interval-timer"`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Severity classification (e.g. `"info"`, `"critical"`).
    pub threat_level: String,
    /// Detector that raised the event.
    pub source: String,
}

/// Debug-session injection parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebuggerAction {
    /// Debug container name.
    pub name: String,
    /// Debug container image.
    pub image: String,
    /// Whether to allocate an interactive terminal.
    pub terminal: bool,
}

/// User-supplied container injected as a custom response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CustomContainerAction {
    /// Container name.
    pub name: String,
    /// Container image.
    pub image: String,
    /// Entrypoint override.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Entrypoint arguments.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// Containment action a strategy maps a rule to.
///
/// The choice is closed and mutually exclusive. Only `delete` and
/// `quarantine` are executable; the remaining variants are accepted as
/// configuration but are logged no-ops in this version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    /// Delete the workload.
    Delete,
    /// Network-isolate the workload and transfer its ownership.
    Quarantine,
    /// Disable the workload (not yet executable).
    Disable,
    /// Inject a debug session (not yet executable).
    Debugger(DebuggerAction),
    /// Run a custom container (not yet executable).
    CustomAction(CustomContainerAction),
}

impl Action {
    /// Stable lowercase name of the action variant, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Quarantine => "quarantine",
            Self::Disable => "disable",
            Self::Debugger(_) => "debugger",
            Self::CustomAction(_) => "customAction",
        }
    }
}

/// Kind string recorded in owner references pointing at a policy.
pub const POLICY_KIND: &str = "DefensePolicy";

/// One `(rule, action)` pair inside a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// Rule an incoming event must match field-wise.
    pub rule: Rule,
    /// Action taken when the rule matches.
    pub action: Action,
}

/// Desired state of a defense policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DefensePolicySpec {
    /// Label predicate selecting governed workloads (ANDed key=value set).
    pub selector: BTreeMap<String, String>,
    /// Ordered strategy list; first matching rule wins.
    pub strategies: Vec<Strategy>,
}

/// Declarative resource selecting workloads and mapping rules to actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefensePolicy {
    /// Resource metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: DefensePolicySpec,
}

/// Desired state of a security event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityEventSpec {
    /// Affected workloads, each in `"namespace/name"` form.
    pub targets: Vec<String>,
    /// Classification the event asserts.
    pub rule: Rule,
    /// Human-readable description of the threat.
    pub description: String,
}

/// Resource asserting that a rule fired against a set of workloads.
///
/// Created by external detectors or by the interval timer scheduler;
/// never mutated after creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    /// Resource metadata.
    pub meta: ObjectMeta,
    /// Event payload.
    pub spec: SecurityEventSpec,
}

/// A workload under (potential) defense management.
///
/// The engine only touches metadata: labels drive selection, annotations
/// carry the membership ledger and applied-event history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Resource metadata.
    pub meta: ObjectMeta,
}

/// Direction of traffic an isolation object applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationPolicyType {
    /// Inbound traffic.
    Ingress,
    /// Outbound traffic.
    Egress,
}

/// A single allow rule inside an isolation object.
///
/// The engine only ever synthesizes empty rule lists (default-deny), so
/// no fields are modeled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolationRule {}

/// Desired state of a network-isolation object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkIsolationSpec {
    /// Label predicate selecting the workloads the isolation applies to.
    pub selector: BTreeMap<String, String>,
    /// Inbound allow rules; empty means deny all ingress.
    pub ingress: Vec<IsolationRule>,
    /// Outbound allow rules; empty means deny all egress.
    pub egress: Vec<IsolationRule>,
    /// Traffic directions this isolation constrains.
    pub policy_types: Vec<IsolationPolicyType>,
}

/// Synthesized network-isolation object backing the quarantine action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkIsolation {
    /// Resource metadata.
    pub meta: ObjectMeta,
    /// Desired state.
    pub spec: NetworkIsolationSpec,
}

/// Whether `labels` satisfies the ANDed `selector` predicate.
///
/// Every selector pair must be present with an equal value. An empty
/// selector matches nothing.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    if selector.is_empty() {
        return false;
    }
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
}
