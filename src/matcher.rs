//! First-match rule resolution.

use crate::api::{Action, Rule, Strategy};

/// Resolve an event rule against a policy's strategy list.
///
/// Iterates strategies in declaration order and returns the action of
/// the first strategy whose rule equals `rule` field-wise (`type`,
/// `threatLevel` and `source` must all match; empty string is a distinct
/// value, not a wildcard). Returns `None` when nothing matches.
pub fn resolve_action<'a>(rule: &Rule, strategies: &'a [Strategy]) -> Option<&'a Action> {
    strategies
        .iter()
        .find(|s| s.rule == *rule)
        .map(|s| &s.action)
}
