use std::sync::{Arc, Mutex};

use tracing::info;

use focuspact_common::{Clock, GracePool};
use focuspact_store::{load_or_default, save_state, StateStore};

use crate::config::GraceConfig;

const STORE_KEY: &str = "grace-pool";

/// Owner of the persisted grace pool. All reads apply the lazy day
/// rollover, so a stale "0 remaining" is never observed after midnight.
pub struct GraceManager {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    pool: Mutex<GracePool>,
}

impl GraceManager {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, config: &GraceConfig) -> Self {
        let mut pool: GracePool = load_or_default(store.as_ref(), STORE_KEY);
        // A default-constructed pool means nothing was persisted yet; size
        // it from config.
        if pool == GracePool::default() {
            pool = GracePool::with_allowance(
                clock.today(),
                config.daily_allowance,
                config.minutes_per_grace,
            );
        }
        Self { store, clock, pool: Mutex::new(pool) }
    }

    /// Consume one grace if any is available today. Persists on success
    /// and on the day-rollover reset. `false` means the pool is exhausted;
    /// that is the complete signal, not an error.
    pub fn use_grace(&self) -> bool {
        let today = self.clock.today();
        let mut pool = self.pool.lock().expect("grace pool lock poisoned");
        let granted = pool.use_grace(today);
        if granted {
            info!(
                "Grace used ({} remaining today)",
                pool.daily_graces_remaining
            );
            save_state(self.store.as_ref(), STORE_KEY, &*pool);
        }
        granted
    }

    /// Non-mutating projection of the remaining allowance as of today.
    pub fn effective_remaining(&self) -> u32 {
        let pool = self.pool.lock().expect("grace pool lock poisoned");
        pool.effective_remaining(self.clock.today())
    }

    pub fn has_remaining(&self) -> bool {
        self.effective_remaining() > 0
    }

    pub fn grace_minutes(&self) -> u32 {
        self.pool.lock().expect("grace pool lock poisoned").grace_minutes
    }

    pub fn used_today(&self) -> u32 {
        let pool = self.pool.lock().expect("grace pool lock poisoned");
        if pool.last_reset_date != self.clock.today() {
            0
        } else {
            pool.total_graces_used_today
        }
    }
}
