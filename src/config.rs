//! Engine tuning constants.
//!
//! These are policy choices, not invariants: the cooldown divisor and
//! the in-progress timeout interact (a small minimum interval can make
//! the cooldown shorter than a typical action duration), so both are
//! kept configurable instead of hard-coded.

use std::time::Duration;

/// Tunable timing constants shared by the reconcilers and the scheduler.
#[derive(Debug, Clone)]
pub struct WardenConfig {
    /// Drift-correction requeue after a successful policy reconciliation.
    pub policy_requeue: Duration,
    /// Cadence of the timer-discovery sweep over all workloads.
    pub sweep_interval: Duration,
    /// Retry delay while the quarantine ownership transfer races an
    /// existing controller owner.
    pub ownership_retry: Duration,
    /// Age after which an in-progress action is treated as abandoned and
    /// force-cleared. Advisory only: the underlying action is not killed,
    /// the scheduling lock on it is released.
    pub action_timeout: Duration,
    /// Delay before re-checking a trigger deferred by an in-progress
    /// action or an active cooldown.
    pub defer_delay: Duration,
    /// Cooldown after a completed action, expressed as a divisor of the
    /// configured minimum interval (4 means 25% of the minimum).
    pub cooldown_divisor: u32,
    /// Placeholder duration of the simulated action-completion signal.
    pub simulated_action_duration: Duration,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            policy_requeue: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(30),
            ownership_retry: Duration::from_secs(2),
            action_timeout: Duration::from_secs(5 * 60),
            defer_delay: Duration::from_secs(60),
            cooldown_divisor: 4,
            simulated_action_duration: Duration::from_secs(10),
        }
    }
}

impl WardenConfig {
    /// Cooldown required after a completed action for the given minimum
    /// interval. A zero divisor disables the cooldown.
    pub fn cooldown_for(&self, min_interval: Duration) -> Duration {
        min_interval
            .checked_div(self.cooldown_divisor)
            .unwrap_or(Duration::ZERO)
    }
}
