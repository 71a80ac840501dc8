use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use focuspact_common::{AchievementDefinition, Clock, DailyRecord, UserProgress};
use focuspact_store::{load_or_default, save_state, StateStore};

const STORE_KEY: &str = "user-progress";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProgressState {
    progress: UserProgress,
    last_recorded_date: Option<NaiveDate>,
}

/// Owner of the streak/achievement state. `record_day` is expected once
/// per calendar day at day close; repeated calls for an already-recorded
/// date are ignored, so a rollover that fires from more than one code path
/// stays at-most-once.
pub struct ProgressTracker {
    store: Arc<dyn StateStore>,
    state: Mutex<ProgressState>,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        let state = load_or_default(store.as_ref(), STORE_KEY);
        Self { store, state: Mutex::new(state), clock }
    }

    /// Fold one closed day into the streak state. Returns achievements
    /// newly unlocked by this record.
    pub fn record_day(&self, record: DailyRecord) -> Vec<&'static AchievementDefinition> {
        let mut state = self.state.lock().expect("progress lock poisoned");
        if let Some(last) = state.last_recorded_date {
            if record.date <= last {
                warn!("Day {} already recorded, ignoring duplicate rollover", record.date);
                return Vec::new();
            }
        }

        let unlocked = state.progress.record_day(record.clone(), self.clock.now());
        state.last_recorded_date = Some(record.date);
        info!(
            "Day {} recorded (within limits: {}, streak: {})",
            record.date, record.within_all_limits, state.progress.current_streak
        );
        for definition in &unlocked {
            info!("Achievement unlocked: {}", definition.title);
        }
        save_state(self.store.as_ref(), STORE_KEY, &*state);
        unlocked
    }

    pub fn last_recorded_date(&self) -> Option<NaiveDate> {
        self.state.lock().expect("progress lock poisoned").last_recorded_date
    }

    pub fn snapshot(&self) -> UserProgress {
        self.state.lock().expect("progress lock poisoned").progress.clone()
    }
}
