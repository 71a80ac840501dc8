use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use focuspact_common::{Clock, IntegrityEvent, IntegrityEventType};
use focuspact_store::{load_or_default, save_state, StateStore};

use crate::config::IntegrityConfig;

const STORE_KEY: &str = "integrity-log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShieldActionKind {
    Applied,
    Removed,
    GraceReapplied,
}

/// Low-level record of shield churn, kept separately from integrity events
/// and bounded at its own (larger) cap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldActionEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub rule_id: Uuid,
    pub kind: ShieldActionKind,
    pub app_count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IntegrityLogState {
    events: Vec<IntegrityEvent>,
    shield_actions: Vec<ShieldActionEntry>,
}

/// Per-day event tallies used to build the daily record at day close.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DayCounts {
    pub limit_exceeded: u32,
    pub grace_used: u32,
    pub emergency_access: u32,
    pub done_chosen: u32,
    pub extension_requested: u32,
}

/// Append-only, size-bounded event log. Appends never fail; the bound is a
/// ring-buffer truncation, not an error condition. The `was_notified` flag
/// here is the single source of truth for duplicate-notification
/// suppression.
pub struct IntegrityLog {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<IntegrityLogState>,
    event_cap: usize,
    shield_action_cap: usize,
}

impl IntegrityLog {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, config: &IntegrityConfig) -> Self {
        let state = load_or_default(store.as_ref(), STORE_KEY);
        Self {
            store,
            clock,
            state: Mutex::new(state),
            event_cap: config.event_log_cap,
            shield_action_cap: config.shield_action_log_cap,
        }
    }

    /// Append an event and return a copy of it. Truncates the log to the
    /// cap afterward, oldest entries dropped first.
    pub fn append(
        &self,
        event_type: IntegrityEventType,
        app_name: Option<String>,
        context: Option<String>,
        limit_id: Option<Uuid>,
    ) -> IntegrityEvent {
        let event =
            IntegrityEvent::new(event_type, self.clock.now(), app_name, context, limit_id);
        info!("Integrity event: {:?} (severity {:?})", event.event_type, event.severity());

        let mut state = self.state.lock().expect("integrity log lock poisoned");
        state.events.push(event.clone());
        let len = state.events.len();
        if len > self.event_cap {
            state.events.drain(..len - self.event_cap);
        }
        save_state(self.store.as_ref(), STORE_KEY, &*state);
        event
    }

    /// Flip `was_notified` on the given event. Idempotent; a missing event
    /// (already truncated away) is a no-op.
    pub fn mark_notified(&self, event_id: Uuid) {
        let mut state = self.state.lock().expect("integrity log lock poisoned");
        if let Some(event) = state.events.iter_mut().find(|e| e.id == event_id) {
            if !event.was_notified {
                event.was_notified = true;
                debug!("Event {} marked notified", event_id);
                save_state(self.store.as_ref(), STORE_KEY, &*state);
            }
        }
    }

    pub fn record_shield_action(&self, rule_id: Uuid, kind: ShieldActionKind, app_count: usize) {
        let mut state = self.state.lock().expect("integrity log lock poisoned");
        state.shield_actions.push(ShieldActionEntry {
            timestamp: self.clock.now(),
            rule_id,
            kind,
            app_count,
        });
        let len = state.shield_actions.len();
        if len > self.shield_action_cap {
            state.shield_actions.drain(..len - self.shield_action_cap);
        }
        save_state(self.store.as_ref(), STORE_KEY, &*state);
    }

    pub fn events(&self) -> Vec<IntegrityEvent> {
        self.state.lock().expect("integrity log lock poisoned").events.clone()
    }

    pub fn shield_actions(&self) -> Vec<ShieldActionEntry> {
        self.state.lock().expect("integrity log lock poisoned").shield_actions.clone()
    }

    pub fn get(&self, event_id: Uuid) -> Option<IntegrityEvent> {
        self.state
            .lock()
            .expect("integrity log lock poisoned")
            .events
            .iter()
            .find(|e| e.id == event_id)
            .cloned()
    }

    /// Tally the events stamped on the given device-calendar date. The
    /// clock maps each UTC timestamp back onto the local calendar, so an
    /// evening event counts toward the day the user experienced it.
    pub fn day_counts(&self, date: NaiveDate) -> DayCounts {
        let state = self.state.lock().expect("integrity log lock poisoned");
        let mut counts = DayCounts::default();
        for event in state.events.iter().filter(|e| self.clock.date_of(e.timestamp) == date) {
            match event.event_type {
                IntegrityEventType::LimitExceeded => counts.limit_exceeded += 1,
                IntegrityEventType::GraceUsed => counts.grace_used += 1,
                IntegrityEventType::EmergencyAccess => counts.emergency_access += 1,
                IntegrityEventType::DoneChosen => counts.done_chosen += 1,
                IntegrityEventType::ExtensionRequested => counts.extension_requested += 1,
                _ => {}
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use focuspact_common::ManualClock;
    use focuspact_store::MemoryStore;

    fn log_with_cap(cap: usize) -> (IntegrityLog, Arc<ManualClock>) {
        let clock =
            Arc::new(ManualClock::at(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(), 10, 0));
        let config = IntegrityConfig { event_log_cap: cap, shield_action_log_cap: cap * 2 };
        let log = IntegrityLog::new(Arc::new(MemoryStore::new()), clock.clone(), &config);
        (log, clock)
    }

    #[test]
    fn test_append_always_succeeds_and_truncates() {
        let (log, _clock) = log_with_cap(5);

        let mut ids = Vec::new();
        for i in 0..6 {
            let event = log.append(
                IntegrityEventType::GraceUsed,
                Some(format!("app-{i}")),
                None,
                None,
            );
            ids.push(event.id);
        }

        let events = log.events();
        assert_eq!(events.len(), 5);
        // Oldest dropped, order preserved for the rest.
        assert_eq!(events.iter().map(|e| e.id).collect::<Vec<_>>(), ids[1..].to_vec());
    }

    #[test]
    fn test_mark_notified_is_idempotent() {
        let (log, _clock) = log_with_cap(10);
        let event = log.append(IntegrityEventType::LimitExceeded, None, None, None);

        log.mark_notified(event.id);
        log.mark_notified(event.id);
        log.mark_notified(Uuid::new_v4()); // unknown id is a no-op

        let stored = log.get(event.id).unwrap();
        assert!(stored.was_notified);
    }

    #[test]
    fn test_day_counts() {
        let (log, clock) = log_with_cap(50);

        log.append(IntegrityEventType::LimitExceeded, None, None, None);
        log.append(IntegrityEventType::GraceUsed, None, None, None);
        log.append(IntegrityEventType::DoneChosen, None, None, None);
        log.append(IntegrityEventType::LimitsEdited, None, None, None);

        clock.advance(chrono::Duration::days(1));
        log.append(IntegrityEventType::EmergencyAccess, None, None, None);

        let first = log.day_counts(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
        assert_eq!(first.limit_exceeded, 1);
        assert_eq!(first.grace_used, 1);
        assert_eq!(first.done_chosen, 1);
        assert_eq!(first.emergency_access, 0);

        let second = log.day_counts(NaiveDate::from_ymd_opt(2026, 4, 2).unwrap());
        assert_eq!(second.emergency_access, 1);
        assert_eq!(second.limit_exceeded, 0);
    }

    #[test]
    fn test_day_counts_follow_device_calendar() {
        use chrono::{DateTime, Utc};
        use focuspact_common::Clock;
        use std::sync::Mutex;

        // A device five hours west of UTC: the instant and the local
        // calendar disagree around midnight.
        struct WestClock {
            now_utc: Mutex<DateTime<Utc>>,
        }

        impl WestClock {
            const OFFSET_HOURS: i64 = 5;

            fn local(&self, instant: DateTime<Utc>) -> chrono::NaiveDateTime {
                (instant - chrono::Duration::hours(Self::OFFSET_HOURS)).naive_utc()
            }
        }

        impl Clock for WestClock {
            fn now(&self) -> DateTime<Utc> {
                *self.now_utc.lock().unwrap()
            }

            fn today(&self) -> NaiveDate {
                self.local(self.now()).date()
            }

            fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
                self.local(instant).date()
            }

            fn hour(&self) -> u32 {
                use chrono::Timelike;
                self.local(self.now()).hour()
            }
        }

        // 01:00 UTC on April 2nd is 20:00 on April 1st for this device.
        let now_utc = NaiveDate::from_ymd_opt(2026, 4, 2)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap()
            .and_utc();
        let clock = Arc::new(WestClock { now_utc: Mutex::new(now_utc) });
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());

        let log = IntegrityLog::new(
            Arc::new(MemoryStore::new()),
            clock.clone(),
            &IntegrityConfig::default(),
        );
        log.append(IntegrityEventType::LimitExceeded, None, None, None);

        // The evening event belongs to the local April 1st, not the UTC
        // April 2nd its timestamp falls on.
        let local_day = log.day_counts(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
        assert_eq!(local_day.limit_exceeded, 1);
        let utc_day = log.day_counts(NaiveDate::from_ymd_opt(2026, 4, 2).unwrap());
        assert_eq!(utc_day.limit_exceeded, 0);
    }

    #[test]
    fn test_shield_action_sub_log_bounded() {
        let (log, _clock) = log_with_cap(5); // shield cap = 10
        let rule = Uuid::new_v4();
        for _ in 0..12 {
            log.record_shield_action(rule, ShieldActionKind::Applied, 2);
        }
        assert_eq!(log.shield_actions().len(), 10);
    }

    #[test]
    fn test_log_survives_restart() {
        let clock =
            Arc::new(ManualClock::at(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(), 10, 0));
        let store = Arc::new(MemoryStore::new());
        let config = IntegrityConfig::default();

        let id = {
            let log = IntegrityLog::new(store.clone(), clock.clone(), &config);
            log.append(IntegrityEventType::EmergencyAccess, None, None, None).id
        };

        let log = IntegrityLog::new(store, clock, &config);
        assert!(log.get(id).is_some());
    }
}
