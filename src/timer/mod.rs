//! Interval timer scheduler.
//!
//! Per-workload background tasks that synthesize security events on a
//! jittered cadence. A discovery sweep lists workloads every
//! `sweep_interval`, starts a task for every workload carrying a valid
//! timer-enable annotation, restarts it when the configuration changes,
//! and tears it down when the flag is cleared or the workload is gone.
//! Overlap prevention goes through the shared [`ActionTracker`]; a stuck
//! action is force-released after a configurable timeout.

pub mod tracker;

pub use tracker::ActionTracker;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::annotations;
use crate::api::{ObjectMeta, ResourceKey, Rule, SecurityEvent, SecurityEventSpec, Workload};
use crate::cluster::{ClusterApi, ClusterError};
use crate::config::WardenConfig;

/// Shortest minimum interval a timer configuration may declare.
pub const MIN_INTERVAL_FLOOR: Duration = Duration::from_secs(60);

/// Rule carried by synthetic interval-timer events.
pub fn interval_rule() -> Rule {
    Rule {
        kind: "interval-timer".to_owned(),
        threat_level: "info".to_owned(),
        source: "IntervalTimerTrigger".to_owned(),
    }
}

/// Validated `(min, max)` interval bounds for one workload's timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalConfig {
    /// Lower bound of the jitter window (inclusive).
    pub min: Duration,
    /// Upper bound of the jitter window (exclusive).
    pub max: Duration,
}

/// Errors rejecting a `"min-max"` interval annotation.
#[derive(Debug, thiserror::Error)]
pub enum IntervalParseError {
    /// Not exactly two dash-separated parts.
    #[error("invalid interval {0:?}, expected \"min-max\" (e.g. \"30m-45m\")")]
    Format(String),

    /// One of the bounds is not a parseable duration.
    #[error("invalid {bound} duration: {source}")]
    InvalidBound {
        /// Which bound failed, `"minimum"` or `"maximum"`.
        bound: &'static str,
        /// Underlying parse failure.
        #[source]
        source: humantime::DurationError,
    },

    /// The minimum bound is not strictly below the maximum.
    #[error("minimum interval must be less than maximum")]
    MinNotBelowMax,

    /// The minimum bound is below [`MIN_INTERVAL_FLOOR`].
    #[error("minimum interval must be at least 1 minute")]
    MinTooShort,
}

/// Parse a `"min-max"` interval annotation, e.g. `"30m-45m"`,
/// `"1800s-2700s"` or `"30m-1h30m"`.
pub fn parse_interval(raw: &str) -> Result<IntervalConfig, IntervalParseError> {
    let raw = raw.trim();
    let mut parts = raw.split('-');
    let (Some(min_raw), Some(max_raw), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(IntervalParseError::Format(raw.to_owned()));
    };

    let min = humantime::parse_duration(min_raw.trim()).map_err(|source| {
        IntervalParseError::InvalidBound {
            bound: "minimum",
            source,
        }
    })?;
    let max = humantime::parse_duration(max_raw.trim()).map_err(|source| {
        IntervalParseError::InvalidBound {
            bound: "maximum",
            source,
        }
    })?;

    if min >= max {
        return Err(IntervalParseError::MinNotBelowMax);
    }
    if min < MIN_INTERVAL_FLOOR {
        return Err(IntervalParseError::MinTooShort);
    }

    Ok(IntervalConfig { min, max })
}

/// Draw the next trigger time uniformly at random from
/// `[now + min, now + max)`.
pub fn draw_next_trigger(interval: &IntervalConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    let jitter = rand::thread_rng().gen_range(interval.min..interval.max);
    let delta = chrono::Duration::from_std(jitter).unwrap_or_else(|_| chrono::Duration::zero());
    now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// In-memory timer state for one workload. Never persisted: rebuilt from
/// annotations after a restart, at worst delaying the next trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerState {
    /// Configured jitter window.
    pub interval: IntervalConfig,
    /// When the timer fires next.
    pub next_trigger: DateTime<Utc>,
    /// Whether this timer believes an action is executing.
    pub action_in_progress: bool,
    /// Start of the most recent action, if any.
    pub last_action_start: Option<DateTime<Utc>>,
    /// Completion of the most recent action, if any.
    pub last_action_end: Option<DateTime<Utc>>,
}

/// Decide whether a due timer may fire at `now`.
///
/// An in-progress action blocks the trigger unless it is older than the
/// configured timeout, in which case it is treated as abandoned and the
/// mark is force-cleared. After that, a cooldown of
/// `min_interval / cooldown_divisor` since the last completed action
/// must also have elapsed.
pub fn should_trigger(
    tracker: &ActionTracker,
    key: &ResourceKey,
    state: &TimerState,
    config: &WardenConfig,
    now: DateTime<Utc>,
) -> bool {
    if let Some(started) = tracker.started_at(key) {
        let age = now.signed_duration_since(started).to_std().unwrap_or(Duration::ZERO);
        if age > config.action_timeout {
            warn!(
                workload = %key,
                age = %humantime::format_duration(age),
                "in-progress action timed out, releasing the scheduling lock"
            );
            tracker.finish(key);
            return true;
        }
        debug!(
            workload = %key,
            age = %humantime::format_duration(age),
            "action still in progress, deferring trigger"
        );
        return false;
    }

    if let Some(ended) = state.last_action_end {
        let since = now.signed_duration_since(ended).to_std().unwrap_or(Duration::ZERO);
        let cooldown = config.cooldown_for(state.interval.min);
        if since < cooldown {
            debug!(
                workload = %key,
                since = %humantime::format_duration(since),
                cooldown = %humantime::format_duration(cooldown),
                "within post-action cooldown, deferring trigger"
            );
            return false;
        }
    }

    true
}

/// Build the synthetic security event a firing timer creates.
pub fn synthetic_event(
    key: &ResourceKey,
    interval: &IntervalConfig,
    now: DateTime<Utc>,
) -> SecurityEvent {
    let name = format!(
        "interval-timer-{}-{}-{}",
        key.namespace,
        key.name,
        now.timestamp()
    );
    let mut meta = ObjectMeta::named(key.namespace.clone(), name);
    meta.labels.insert(
        annotations::TIMER_EVENT_WORKLOAD.to_owned(),
        key.name.clone(),
    );
    meta.labels.insert(
        annotations::TIMER_EVENT_NAMESPACE.to_owned(),
        key.namespace.clone(),
    );
    meta.labels.insert(
        annotations::TIMER_EVENT_TRIGGER.to_owned(),
        "interval-timer".to_owned(),
    );

    SecurityEvent {
        meta,
        spec: SecurityEventSpec {
            targets: vec![key.to_string()],
            rule: interval_rule(),
            description: format!(
                "Interval-based timer trigger (interval: {}-{}) for workload {}",
                humantime::format_duration(interval.min),
                humantime::format_duration(interval.max),
                key
            ),
        },
    }
}

struct TimerEntry {
    state: TimerState,
    stop: watch::Sender<bool>,
}

/// Discovers timer-enabled workloads and runs one background task each.
pub struct IntervalScheduler {
    cluster: Arc<dyn ClusterApi>,
    tracker: Arc<ActionTracker>,
    config: WardenConfig,
    timers: RwLock<HashMap<ResourceKey, TimerEntry>>,
}

impl IntervalScheduler {
    /// Build a scheduler over the given cluster and shared tracker.
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        tracker: Arc<ActionTracker>,
        config: WardenConfig,
    ) -> Self {
        Self {
            cluster,
            tracker,
            config,
            timers: RwLock::new(HashMap::new()),
        }
    }

    /// Run the discovery sweep until `shutdown` fires.
    ///
    /// Each sweep lists all workloads, reconciles their timer
    /// annotations, and stops timers whose workload has disappeared.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(interval = ?self.config.sweep_interval, "timer discovery sweep started");
        let mut tick = tokio::time::interval(self.config.sweep_interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.sweep(&shutdown).await {
                        warn!(error = %e, "timer discovery sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("timer discovery sweep stopped");
    }

    /// One discovery pass over all workloads.
    pub async fn sweep(
        self: &Arc<Self>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<(), ClusterError> {
        let workloads = self.cluster.list_workloads("", None).await?;

        let mut seen = HashSet::with_capacity(workloads.len());
        for workload in &workloads {
            seen.insert(workload.meta.key());
            self.reconcile_workload(workload, shutdown.clone());
        }

        // A deleted workload takes its annotations with it.
        let stale: Vec<ResourceKey> = self
            .timers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|key| !seen.contains(key))
            .cloned()
            .collect();
        for key in stale {
            self.stop_timer(&key);
        }

        Ok(())
    }

    /// Reconcile one workload's timer annotations against the running
    /// task table.
    ///
    /// A cleared or absent enable flag tears the timer down. An
    /// unparseable interval config is rejected with a warning and leaves
    /// any previous timer state untouched.
    pub fn reconcile_workload(
        self: &Arc<Self>,
        workload: &Workload,
        shutdown: watch::Receiver<bool>,
    ) {
        let key = workload.meta.key();

        let enabled = workload
            .meta
            .annotations
            .get(annotations::TIMER_ENABLED)
            .is_some_and(|v| v == "true");
        if !enabled {
            self.stop_timer(&key);
            return;
        }

        let Some(raw) = workload.meta.annotations.get(annotations::TIMER_CONFIG) else {
            debug!(workload = %key, "interval timer enabled but no config annotation");
            return;
        };

        match parse_interval(raw) {
            Ok(interval) => self.ensure_timer(key, interval, shutdown),
            Err(e) => {
                warn!(
                    workload = %key,
                    config = %raw,
                    error = %e,
                    "rejecting interval config, keeping previous timer state"
                );
            }
        }
    }

    /// Start a timer task for `key`, or restart it when the configured
    /// interval changed. A matching running timer is left alone.
    fn ensure_timer(
        self: &Arc<Self>,
        key: ResourceKey,
        interval: IntervalConfig,
        shutdown: watch::Receiver<bool>,
    ) {
        let (stop_tx, stop_rx) = watch::channel(false);
        {
            let mut timers = self.timers.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = timers.get(&key) {
                if entry.state.interval == interval {
                    return;
                }
                // Config changed: tear down under the same lock, the
                // replacement gets a freshly drawn trigger time.
                if let Some(old) = timers.remove(&key) {
                    let _ = old.stop.send(true);
                }
            }

            let state = TimerState {
                interval,
                next_trigger: draw_next_trigger(&interval, Utc::now()),
                action_in_progress: false,
                last_action_start: None,
                last_action_end: None,
            };
            info!(
                workload = %key,
                min = %humantime::format_duration(interval.min),
                max = %humantime::format_duration(interval.max),
                next_trigger = %state.next_trigger,
                "interval timer started"
            );
            timers.insert(key.clone(), TimerEntry {
                state,
                stop: stop_tx,
            });
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(scheduler.run_workload_timer(key, stop_rx, shutdown));
    }

    /// Stop and remove the timer for `key`, if one is running.
    ///
    /// Removal and the stop signal happen under one lock acquisition, so
    /// the signal fires exactly once; the in-progress mark is released
    /// with the timer.
    pub fn stop_timer(&self, key: &ResourceKey) {
        let removed = self
            .timers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        if let Some(entry) = removed {
            let _ = entry.stop.send(true);
            self.tracker.finish(key);
            info!(workload = %key, "interval timer stopped");
        }
    }

    /// Snapshot of the timer state for `key`, if a timer is running.
    pub fn timer_state(&self, key: &ResourceKey) -> Option<TimerState> {
        self.timers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|e| e.state.clone())
    }

    /// Number of running timer tasks.
    pub fn active_timers(&self) -> usize {
        self.timers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Per-workload timer loop.
    ///
    /// Waits until the next trigger time, racing the per-workload stop
    /// signal and the process-wide shutdown; whichever fires first wins
    /// and the task exits promptly.
    async fn run_workload_timer(
        self: Arc<Self>,
        key: ResourceKey,
        mut stop_rx: watch::Receiver<bool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let now = Utc::now();
            let Some(state) = self.timer_state(&key) else {
                // Entry removed while we were waiting.
                return;
            };

            if now >= state.next_trigger {
                if should_trigger(&self.tracker, &key, &state, &self.config, now) {
                    self.fire(&key, &state, now).await;
                    let next = draw_next_trigger(&state.interval, Utc::now());
                    self.set_next_trigger(&key, next);
                    info!(workload = %key, next_trigger = %next, "interval event fired");
                } else {
                    let defer = chrono::Duration::from_std(self.config.defer_delay)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                    let next = now
                        .checked_add_signed(defer)
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    self.set_next_trigger(&key, next);
                }
                continue;
            }

            let wait = state
                .next_trigger
                .signed_duration_since(now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        debug!(workload = %key, "interval timer task exiting on stop signal");
                        return;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(workload = %key, "interval timer task exiting on shutdown");
                        return;
                    }
                }
            }
        }
    }

    /// Mark the action in progress and create the synthetic event.
    ///
    /// A failed event creation clears the mark so the next cycle can
    /// retry; it does not stop the task. Success schedules the
    /// placeholder completion signal that later stamps `last_action_end`.
    pub(crate) async fn fire(self: &Arc<Self>, key: &ResourceKey, state: &TimerState, now: DateTime<Utc>) {
        self.tracker.begin(key, now);
        {
            let mut timers = self.timers.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = timers.get_mut(key) {
                entry.state.action_in_progress = true;
                entry.state.last_action_start = Some(now);
            }
        }

        let event = synthetic_event(key, &state.interval, now);
        if let Err(e) = self.cluster.create_event(&event).await {
            error!(workload = %key, error = %e, "failed to create interval event");
            self.clear_in_progress(key);
            return;
        }
        info!(workload = %key, event = %event.meta.name, "interval event created");

        // Placeholder completion: a full implementation would watch the
        // action itself rather than assume a fixed duration.
        let scheduler = Arc::clone(self);
        let key = key.clone();
        let delay = self.config.simulated_action_duration;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.complete_action(&key, Utc::now());
        });
    }

    /// Clear the in-progress mark without stamping a completion time.
    fn clear_in_progress(&self, key: &ResourceKey) {
        self.tracker.finish(key);
        let mut timers = self.timers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = timers.get_mut(key) {
            entry.state.action_in_progress = false;
        }
    }

    /// Record action completion for `key` at `now`.
    pub(crate) fn complete_action(&self, key: &ResourceKey, now: DateTime<Utc>) {
        self.tracker.finish(key);
        let mut timers = self.timers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = timers.get_mut(key) {
            entry.state.action_in_progress = false;
            entry.state.last_action_end = Some(now);
        }
        debug!(workload = %key, "action completed");
    }

    fn set_next_trigger(&self, key: &ResourceKey, next: DateTime<Utc>) {
        let mut timers = self.timers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = timers.get_mut(key) {
            entry.state.next_trigger = next;
        }
    }
}
