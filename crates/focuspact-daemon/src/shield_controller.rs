use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use focuspact_common::AppSet;
use focuspact_proto::ShieldCapability;

/// Thin command layer over the external blocking capability.
///
/// Shields are tracked per rule so overlapping rules compose additively:
/// removing one rule's shield unblocks only the apps no other active rule
/// still claims. This is the one piece of truly global mutable state in the
/// core; all mutations go through the LimitMonitor.
pub struct ShieldController {
    capability: Arc<dyn ShieldCapability>,
    shielded: Mutex<HashMap<Uuid, AppSet>>,
}

impl ShieldController {
    pub fn new(capability: Arc<dyn ShieldCapability>) -> Self {
        Self { capability, shielded: Mutex::new(HashMap::new()) }
    }

    /// Apply a shield on behalf of a rule. Re-applying for the same rule
    /// replaces its claimed set.
    pub async fn apply(&self, rule_id: Uuid, set: AppSet) {
        if set.is_empty() {
            debug!("Rule {} has an empty governed set, nothing to shield", rule_id);
            return;
        }
        {
            let mut shielded = self.shielded.lock().expect("shield state lock poisoned");
            shielded.insert(rule_id, set.clone());
        }
        info!("Applying shield for rule {} ({} targets)", rule_id, set.len());
        self.capability.apply_shield(&set).await;
    }

    /// Remove a rule's shield, unblocking only what no other rule claims.
    /// Returns the set actually unblocked.
    pub async fn remove(&self, rule_id: Uuid) -> AppSet {
        let to_unblock = {
            let mut shielded = self.shielded.lock().expect("shield state lock poisoned");
            let Some(own) = shielded.remove(&rule_id) else {
                return AppSet::default();
            };
            let mut still_claimed = AppSet::default();
            for other in shielded.values() {
                still_claimed.merge(other);
            }
            own.minus(&still_claimed)
        };

        if to_unblock.is_empty() {
            debug!("Rule {} removed, all targets still claimed by other rules", rule_id);
        } else {
            info!("Removing shield for rule {} ({} targets)", rule_id, to_unblock.len());
            self.capability.remove_shield(&to_unblock).await;
        }
        to_unblock
    }

    pub fn is_shielded(&self, rule_id: Uuid) -> bool {
        self.shielded.lock().expect("shield state lock poisoned").contains_key(&rule_id)
    }

    pub fn shielded_rules(&self) -> Vec<Uuid> {
        self.shielded.lock().expect("shield state lock poisoned").keys().copied().collect()
    }

    /// Union of everything currently shielded, across all rules.
    pub fn currently_shielded(&self) -> AppSet {
        let shielded = self.shielded.lock().expect("shield state lock poisoned");
        let mut union = AppSet::default();
        for set in shielded.values() {
            union.merge(set);
        }
        union
    }
}
