use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use focuspact_common::{
    AppLimit, AppSet, Clock, DailyRecord, Error, GraceSession, IntegrityEventType, Result,
    TimeWindow,
};
use focuspact_proto::{MonitorSchedule, MonitorSignal, ShieldResponse, ThresholdSpec, UsageMonitoring};
use focuspact_store::{load_or_default, save_state, StateStore};

use crate::grace::GraceManager;
use crate::integrity_log::{IntegrityLog, ShieldActionKind};
use crate::notifier::AccountabilityNotifier;
use crate::progress::ProgressTracker;
use crate::shield_controller::ShieldController;

const RULES_STORE_KEY: &str = "rules";

/// The active rule set, persisted as one unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleBook {
    pub limits: Vec<AppLimit>,
    pub windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleRef {
    Limit(Uuid),
    Window(Uuid),
}

/// What a shield response resolved to. Each is terminal for that shield
/// instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShieldOutcome {
    Closed,
    GraceStarted(GraceSession),
    /// The pool was empty. The shield stays up; callers must surface this
    /// rather than treating it as a silent no-op.
    GraceExhausted,
    ExtensionPending {
        accepted: bool,
    },
    EmergencyGranted,
}

struct MonitorState {
    rules: RuleBook,
    /// schedule id -> rule, for interval signals.
    schedules: HashMap<Uuid, RuleRef>,
    /// threshold event id -> limit id, for threshold signals.
    thresholds: HashMap<Uuid, Uuid>,
    registered: HashSet<Uuid>,
    /// Active shield bypasses: graces and approved extension lifts. Expiry
    /// is recomputed from the clock; the sweep reapplies the shield.
    bypass_sessions: Vec<GraceSession>,
}

/// The orchestrator. Holds the rule set, derives monitoring schedules for
/// the external usage capability, and reacts to its signals by driving the
/// shield controller and funneling events into the integrity log and on to
/// the notifier and progress tracker.
pub struct LimitMonitor {
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    usage: Arc<dyn UsageMonitoring>,
    shields: Arc<ShieldController>,
    log: Arc<IntegrityLog>,
    notifier: Arc<AccountabilityNotifier>,
    grace: Arc<GraceManager>,
    progress: Arc<ProgressTracker>,
    state: Mutex<MonitorState>,
}

impl LimitMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clock: Arc<dyn Clock>,
        store: Arc<dyn StateStore>,
        usage: Arc<dyn UsageMonitoring>,
        shields: Arc<ShieldController>,
        log: Arc<IntegrityLog>,
        notifier: Arc<AccountabilityNotifier>,
        grace: Arc<GraceManager>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        let rules = load_or_default(store.as_ref(), RULES_STORE_KEY);
        Self {
            clock,
            store,
            usage,
            shields,
            log,
            notifier,
            grace,
            progress,
            state: Mutex::new(MonitorState {
                rules,
                schedules: HashMap::new(),
                thresholds: HashMap::new(),
                registered: HashSet::new(),
                bypass_sessions: Vec::new(),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Rule management

    pub fn limits(&self) -> Vec<AppLimit> {
        self.state.lock().expect("monitor lock poisoned").rules.limits.clone()
    }

    pub fn windows(&self) -> Vec<TimeWindow> {
        self.state.lock().expect("monitor lock poisoned").rules.windows.clone()
    }

    pub async fn add_limit(&self, limit: AppLimit) {
        {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            state.rules.limits.push(limit);
            save_state(self.store.as_ref(), RULES_STORE_KEY, &state.rules);
        }
        let event = self.log.append(IntegrityEventType::LimitsEdited, None, None, None);
        self.notifier.notify(&event).await;
    }

    /// Replace a limit wholesale. The new configuration takes effect at the
    /// next scheduling pass; an already-applied shield is not lifted
    /// retroactively, including when `is_active` was turned off.
    pub async fn update_limit(&self, limit: AppLimit) -> Result<()> {
        {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            let slot = state
                .rules
                .limits
                .iter_mut()
                .find(|l| l.id == limit.id)
                .ok_or_else(|| Error::NotFound(format!("limit {}", limit.id)))?;
            *slot = limit;
            save_state(self.store.as_ref(), RULES_STORE_KEY, &state.rules);
        }
        let event = self.log.append(IntegrityEventType::LimitsEdited, None, None, None);
        self.notifier.notify(&event).await;
        Ok(())
    }

    pub async fn remove_limit(&self, limit_id: Uuid) -> Result<()> {
        {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            let before = state.rules.limits.len();
            state.rules.limits.retain(|l| l.id != limit_id);
            if state.rules.limits.len() == before {
                return Err(Error::NotFound(format!("limit {limit_id}")));
            }
            state.bypass_sessions.retain(|s| s.limit_id != limit_id);
            save_state(self.store.as_ref(), RULES_STORE_KEY, &state.rules);
        }
        self.shields.remove(limit_id).await;
        let event = self.log.append(IntegrityEventType::LimitsEdited, None, None, Some(limit_id));
        self.notifier.notify(&event).await;
        Ok(())
    }

    pub fn add_window(&self, window: TimeWindow) {
        let mut state = self.state.lock().expect("monitor lock poisoned");
        state.rules.windows.push(window);
        save_state(self.store.as_ref(), RULES_STORE_KEY, &state.rules);
    }

    pub async fn remove_window(&self, window_id: Uuid) -> Result<()> {
        {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            let before = state.rules.windows.len();
            state.rules.windows.retain(|w| w.id != window_id);
            if state.rules.windows.len() == before {
                return Err(Error::NotFound(format!("window {window_id}")));
            }
            save_state(self.store.as_ref(), RULES_STORE_KEY, &state.rules);
        }
        self.shields.remove(window_id).await;
        Ok(())
    }

    /// Advance a limit's accumulated usage. Driven by the external usage
    /// signals; this core is the sole mutator of `used_minutes_today`.
    pub fn record_usage(&self, limit_id: Uuid, used_minutes: u32) -> Result<()> {
        let mut state = self.state.lock().expect("monitor lock poisoned");
        let limit = state
            .rules
            .limits
            .iter_mut()
            .find(|l| l.id == limit_id)
            .ok_or_else(|| Error::NotFound(format!("limit {limit_id}")))?;
        limit.used_minutes_today = used_minutes;
        save_state(self.store.as_ref(), RULES_STORE_KEY, &state.rules);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduling

    /// Derive the monitoring schedule for the current rule set and
    /// (re-)register it with the usage capability.
    ///
    /// Each active limit gets a full-day window with one threshold at its
    /// effective daily budget; each enabled time window gets its own
    /// interval with no thresholds. A limit whose token payload fails to
    /// decode is omitted from this pass without blocking the others.
    pub async fn reschedule(&self) {
        let weekday = self.clock.weekday();
        let (schedules, stale) = {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            state.schedules.clear();
            state.thresholds.clear();

            let mut derived: Vec<MonitorSchedule> = Vec::new();

            let limits = state.rules.limits.clone();
            for limit in limits.iter().filter(|l| l.is_active) {
                let governed = match limit.governed_set() {
                    Ok(set) if !set.is_empty() => set,
                    Ok(_) => {
                        debug!("Limit '{}' governs nothing, skipping", limit.name);
                        continue;
                    }
                    Err(e) => {
                        warn!("Skipping limit '{}' this pass: {}", limit.name, e);
                        continue;
                    }
                };
                state.schedules.insert(limit.id, RuleRef::Limit(limit.id));
                state.thresholds.insert(limit.id, limit.id);
                derived.push(MonitorSchedule {
                    schedule_id: limit.id,
                    window_start: NaiveTime::MIN,
                    window_end: NaiveTime::from_hms_opt(23, 59, 0).expect("valid time"),
                    governed,
                    thresholds: vec![ThresholdSpec {
                        event_id: limit.id,
                        minutes: limit.effective_daily_limit(weekday),
                    }],
                });
            }

            let windows = state.rules.windows.clone();
            for window in windows.iter().filter(|w| w.enabled) {
                let governed = match window.governed_set() {
                    Ok(set) if !set.is_empty() => set,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Skipping window '{}' this pass: {}", window.name, e);
                        continue;
                    }
                };
                state.schedules.insert(window.id, RuleRef::Window(window.id));
                derived.push(MonitorSchedule {
                    schedule_id: window.id,
                    window_start: window.start,
                    window_end: window.end,
                    governed,
                    thresholds: Vec::new(),
                });
            }

            let current: HashSet<Uuid> = derived.iter().map(|s| s.schedule_id).collect();
            let stale: Vec<Uuid> = state.registered.difference(&current).copied().collect();
            state.registered = current;
            (derived, stale)
        };

        for schedule_id in stale {
            self.usage.stop_monitoring(schedule_id).await;
        }
        info!("Registering {} monitoring schedules", schedules.len());
        for schedule in schedules {
            self.usage.start_monitoring(schedule).await;
        }
    }

    // ------------------------------------------------------------------
    // Signal dispatch

    /// Single entry point for signals from the usage capability.
    pub async fn handle_signal(&self, signal: MonitorSignal) {
        match signal {
            MonitorSignal::IntervalStarted { schedule_id } => {
                self.on_interval_started(schedule_id).await;
            }
            MonitorSignal::IntervalEnded { schedule_id } => {
                self.on_interval_ended(schedule_id).await;
            }
            MonitorSignal::ThresholdReached { event_id } => {
                self.on_threshold_reached(event_id).await;
            }
        }
    }

    async fn on_interval_started(&self, schedule_id: Uuid) {
        let rule = {
            let state = self.state.lock().expect("monitor lock poisoned");
            state.schedules.get(&schedule_id).copied()
        };
        match rule {
            Some(RuleRef::Window(window_id)) => {
                // A time window blocks its fixed set for the whole
                // interval, independent of usage.
                let governed = self.window_set(window_id);
                if let Some(set) = governed {
                    self.shields.apply(window_id, set.clone()).await;
                    self.log.record_shield_action(window_id, ShieldActionKind::Applied, set.len());
                }
            }
            Some(RuleRef::Limit(_)) => {
                debug!("Monitoring interval started for schedule {}", schedule_id);
            }
            None => debug!("Interval started for unknown schedule {}", schedule_id),
        }
    }

    async fn on_interval_ended(&self, schedule_id: Uuid) {
        let rule = {
            let state = self.state.lock().expect("monitor lock poisoned");
            state.schedules.get(&schedule_id).copied()
        };
        match rule {
            Some(RuleRef::Window(window_id)) => {
                let removed = self.shields.remove(window_id).await;
                if !removed.is_empty() {
                    self.log.record_shield_action(
                        window_id,
                        ShieldActionKind::Removed,
                        removed.len(),
                    );
                }
            }
            Some(RuleRef::Limit(limit_id)) => {
                // A limit's interval ends at the midnight rollover; the
                // shield does not carry into the new day.
                if self.shields.is_shielded(limit_id) {
                    let removed = self.shields.remove(limit_id).await;
                    self.log.record_shield_action(
                        limit_id,
                        ShieldActionKind::Removed,
                        removed.len(),
                    );
                }
                self.close_day_if_needed().await;
                self.reschedule().await;
            }
            None => debug!("Interval ended for unknown schedule {}", schedule_id),
        }
    }

    async fn on_threshold_reached(&self, event_id: Uuid) {
        let limit = {
            let state = self.state.lock().expect("monitor lock poisoned");
            state
                .thresholds
                .get(&event_id)
                .and_then(|limit_id| state.rules.limits.iter().find(|l| l.id == *limit_id))
                .cloned()
        };
        let Some(limit) = limit else {
            debug!("Threshold reached for unknown event {}", event_id);
            return;
        };
        if self.shields.is_shielded(limit.id) {
            debug!("Limit '{}' already shielded, ignoring duplicate threshold", limit.name);
            return;
        }
        let governed = match limit.governed_set() {
            Ok(set) => set,
            Err(e) => {
                warn!("Cannot shield limit '{}': {}", limit.name, e);
                return;
            }
        };

        info!("Threshold reached for limit '{}', applying shield", limit.name);
        self.shields.apply(limit.id, governed.clone()).await;
        self.log.record_shield_action(limit.id, ShieldActionKind::Applied, governed.len());

        let event = self.log.append(
            IntegrityEventType::LimitExceeded,
            Some(limit.name.clone()),
            None,
            Some(limit.id),
        );
        self.notifier.notify(&event).await;
    }

    // ------------------------------------------------------------------
    // Shield responses

    /// Apply the user's choice on an active shield.
    pub async fn respond(&self, limit_id: Uuid, response: ShieldResponse) -> Result<ShieldOutcome> {
        let limit = self
            .limits()
            .into_iter()
            .find(|l| l.id == limit_id)
            .ok_or_else(|| Error::NotFound(format!("limit {limit_id}")))?;

        // A response only makes sense against an active shield. Without
        // this check a stray Done or Emergency would log a choice the
        // user never faced.
        if !self.shields.is_shielded(limit_id) {
            return Err(Error::InvalidData(format!("no active shield for limit {limit_id}")));
        }

        match response {
            ShieldResponse::Done => {
                let removed = self.shields.remove(limit_id).await;
                self.log.record_shield_action(limit_id, ShieldActionKind::Removed, removed.len());
                let event = self.log.append(
                    IntegrityEventType::DoneChosen,
                    Some(limit.name.clone()),
                    None,
                    Some(limit_id),
                );
                self.notifier.notify(&event).await;
                Ok(ShieldOutcome::Closed)
            }
            ShieldResponse::UseGrace => {
                if !self.grace.use_grace() {
                    // Pool exhausted: the shield stays and the caller must
                    // hear about it.
                    return Ok(ShieldOutcome::GraceExhausted);
                }
                let removed = self.shields.remove(limit_id).await;
                self.log.record_shield_action(limit_id, ShieldActionKind::Removed, removed.len());

                let session = GraceSession::new(
                    self.clock.now(),
                    self.grace.grace_minutes(),
                    limit_id,
                    limit.name.clone(),
                );
                {
                    let mut state = self.state.lock().expect("monitor lock poisoned");
                    state.bypass_sessions.push(session.clone());
                }
                let event = self.log.append(
                    IntegrityEventType::GraceUsed,
                    Some(limit.name.clone()),
                    None,
                    Some(limit_id),
                );
                self.notifier.notify(&event).await;
                Ok(ShieldOutcome::GraceStarted(session))
            }
            ShieldResponse::RequestExtension { minutes, reason } => {
                // The shield stays up until the partner approves.
                let accepted = self.notifier.request_extension(limit_id, minutes, reason).await;
                Ok(ShieldOutcome::ExtensionPending { accepted })
            }
            ShieldResponse::Emergency => {
                let removed = self.shields.remove(limit_id).await;
                self.log.record_shield_action(limit_id, ShieldActionKind::Removed, removed.len());
                let event = self.log.append(
                    IntegrityEventType::EmergencyAccess,
                    Some(limit.name.clone()),
                    None,
                    Some(limit_id),
                );
                self.notifier.notify(&event).await;
                Ok(ShieldOutcome::EmergencyGranted)
            }
        }
    }

    /// Partner-side resolution of a pending extension request. Approval
    /// lifts the shield for the requested minutes; expiry reapplies it via
    /// the same sweep as grace sessions.
    pub async fn resolve_extension(&self, request_id: Uuid, approved: bool) -> Result<()> {
        let request = self.notifier.resolve_extension(request_id, approved)?;
        if !approved {
            return Ok(());
        }

        let limit = self
            .limits()
            .into_iter()
            .find(|l| l.id == request.limit_id)
            .ok_or_else(|| Error::NotFound(format!("limit {}", request.limit_id)))?;

        let removed = self.shields.remove(limit.id).await;
        self.log.record_shield_action(limit.id, ShieldActionKind::Removed, removed.len());
        let session = GraceSession::new(
            self.clock.now(),
            request.requested_minutes,
            limit.id,
            limit.name.clone(),
        );
        let mut state = self.state.lock().expect("monitor lock poisoned");
        state.bypass_sessions.push(session);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Maintenance

    /// Reapply shields whose grace or extension bypass has expired.
    /// Expiry is pure clock math, so this can run from a timer or on
    /// demand with the same result.
    pub async fn sweep_expired_bypasses(&self) -> Vec<Uuid> {
        let now = self.clock.now();
        let expired: Vec<GraceSession> = {
            let mut state = self.state.lock().expect("monitor lock poisoned");
            let (expired, live): (Vec<_>, Vec<_>) =
                state.bypass_sessions.drain(..).partition(|s| s.is_expired(now));
            state.bypass_sessions = live;
            expired
        };

        let mut reapplied = Vec::new();
        for session in expired {
            let Some(limit) = self.limits().into_iter().find(|l| l.id == session.limit_id) else {
                continue;
            };
            match limit.governed_set() {
                Ok(set) => {
                    info!("Bypass expired for '{}', reapplying shield", limit.name);
                    self.shields.apply(limit.id, set.clone()).await;
                    self.log.record_shield_action(
                        limit.id,
                        ShieldActionKind::GraceReapplied,
                        set.len(),
                    );
                    reapplied.push(limit.id);
                }
                Err(e) => warn!("Cannot reapply shield for '{}': {}", limit.name, e),
            }
        }
        reapplied
    }

    pub fn active_bypasses(&self) -> Vec<GraceSession> {
        self.state.lock().expect("monitor lock poisoned").bypass_sessions.clone()
    }

    /// Close the previous calendar day if it has not been recorded yet.
    /// Safe to call from any path: the progress tracker ignores
    /// duplicates, so rollover stays at-most-once per day even when the
    /// process slept through midnight and several paths race to catch up.
    pub async fn close_day_if_needed(&self) {
        let Some(yesterday) = self.clock.today().pred_opt() else {
            return;
        };
        if self.progress.last_recorded_date().is_some_and(|last| last >= yesterday) {
            return;
        }

        let counts = self.log.day_counts(yesterday);
        let total_screen_minutes = self
            .limits()
            .iter()
            .map(|l| l.used_minutes_today)
            .sum();
        let record = DailyRecord {
            date: yesterday,
            within_all_limits: counts.limit_exceeded == 0,
            total_screen_minutes,
            limit_exceeded_count: counts.limit_exceeded,
            grace_used_count: counts.grace_used,
            emergency_access_count: counts.emergency_access,
            done_chosen_count: counts.done_chosen,
            extension_requested_count: counts.extension_requested,
        };

        info!("Closing day {} (within limits: {})", record.date, record.within_all_limits);
        let unlocked = self.progress.record_day(record.clone());
        if !unlocked.is_empty() {
            debug!("{} achievements unlocked at day close", unlocked.len());
        }
        self.notifier.notify_daily_success(&record).await;
    }

    fn window_set(&self, window_id: Uuid) -> Option<AppSet> {
        let state = self.state.lock().expect("monitor lock poisoned");
        let window = state.rules.windows.iter().find(|w| w.id == window_id)?;
        match window.governed_set() {
            Ok(set) => Some(set),
            Err(e) => {
                warn!("Window '{}' payload undecodable: {}", window.name, e);
                None
            }
        }
    }
}
