use std::sync::{Arc, Mutex};

use tracing::info;

use focuspact_common::{
    AccountabilityPartner, Clock, ContactMethod, Error, PartnerStatus, QuietHours, Result,
    SharingPreferences,
};
use focuspact_store::{load_or_default, save_state, StateStore};

const STORE_KEY: &str = "partner";

/// Owner of the single partner record. The free tier supports exactly one
/// partner at a time; inviting while one exists is rejected.
pub struct PartnerRegistry {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    partner: Mutex<Option<AccountabilityPartner>>,
}

impl PartnerRegistry {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        let partner = load_or_default(store.as_ref(), STORE_KEY);
        Self { store, clock, partner: Mutex::new(partner) }
    }

    pub fn invite(
        &self,
        name: impl Into<String>,
        contact: ContactMethod,
    ) -> Result<AccountabilityPartner> {
        let mut slot = self.partner.lock().expect("partner lock poisoned");
        if slot.is_some() {
            return Err(Error::InvalidData("a partner is already configured".to_string()));
        }
        let partner = AccountabilityPartner::invite(name, contact, self.clock.now());
        info!("Partner invited: {} ({})", partner.name, partner.contact.masked());
        *slot = Some(partner.clone());
        save_state(self.store.as_ref(), STORE_KEY, &*slot);
        Ok(partner)
    }

    pub fn accept(&self) -> Result<()> {
        let now = self.clock.now();
        self.update(|partner| {
            if partner.status != PartnerStatus::Pending {
                return Err(Error::InvalidData(format!(
                    "cannot accept an invite in state {:?}",
                    partner.status
                )));
            }
            partner.accept(now);
            Ok(())
        })
    }

    pub fn decline(&self) -> Result<()> {
        self.update(|partner| {
            partner.decline();
            Ok(())
        })
    }

    /// Clear the partner record, returning what was removed. The caller is
    /// expected to have routed the PartnerRemoved integrity event through
    /// the notifier first, while the record could still deliver.
    pub fn remove(&self) -> Option<AccountabilityPartner> {
        let mut slot = self.partner.lock().expect("partner lock poisoned");
        let removed = slot.take().map(|mut partner| {
            partner.status = PartnerStatus::Removed;
            partner
        });
        if let Some(ref partner) = removed {
            info!("Partner removed: {}", partner.name);
        }
        save_state(self.store.as_ref(), STORE_KEY, &*slot);
        removed
    }

    pub fn set_preferences(&self, preferences: SharingPreferences) -> Result<()> {
        self.update(|partner| {
            partner.preferences = preferences.clone();
            Ok(())
        })
    }

    pub fn set_quiet_hours(&self, quiet_hours: Option<QuietHours>) -> Result<()> {
        self.update(|partner| {
            partner.quiet_hours = quiet_hours.clone();
            Ok(())
        })
    }

    pub fn snapshot(&self) -> Option<AccountabilityPartner> {
        self.partner.lock().expect("partner lock poisoned").clone()
    }

    pub fn active(&self) -> Option<AccountabilityPartner> {
        self.snapshot().filter(|p| p.is_active())
    }

    fn update<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut AccountabilityPartner) -> Result<()>,
    {
        let mut slot = self.partner.lock().expect("partner lock poisoned");
        let partner = slot
            .as_mut()
            .ok_or_else(|| Error::NotFound("no partner configured".to_string()))?;
        apply(partner)?;
        save_state(self.store.as_ref(), STORE_KEY, &*slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use focuspact_common::ManualClock;
    use focuspact_store::MemoryStore;

    fn registry() -> PartnerRegistry {
        let clock =
            Arc::new(ManualClock::at(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(), 10, 0));
        PartnerRegistry::new(Arc::new(MemoryStore::new()), clock)
    }

    #[test]
    fn test_single_partner_enforced() {
        let registry = registry();
        registry
            .invite("Sam", ContactMethod::Email { address: "sam@example.com".into() })
            .unwrap();

        let second = registry.invite("Alex", ContactMethod::Push { token: "t".into() });
        assert!(second.is_err());
    }

    #[test]
    fn test_invite_accept_remove_flow() {
        let registry = registry();
        registry
            .invite("Sam", ContactMethod::Sms { phone: "+15558675309".into() })
            .unwrap();
        assert!(registry.active().is_none());

        registry.accept().unwrap();
        assert!(registry.active().is_some());

        let removed = registry.remove().unwrap();
        assert_eq!(removed.status, PartnerStatus::Removed);
        assert!(registry.snapshot().is_none());

        // Slot is free again.
        registry.invite("Alex", ContactMethod::Push { token: "t".into() }).unwrap();
    }

    #[test]
    fn test_accept_requires_pending() {
        let registry = registry();
        registry
            .invite("Sam", ContactMethod::Email { address: "sam@example.com".into() })
            .unwrap();
        registry.decline().unwrap();
        assert!(registry.accept().is_err());
    }

    #[test]
    fn test_preferences_update() {
        let registry = registry();
        registry
            .invite("Sam", ContactMethod::Email { address: "sam@example.com".into() })
            .unwrap();
        registry.accept().unwrap();

        let mut preferences = SharingPreferences::default();
        preferences.include_app_names = true;
        registry.set_preferences(preferences).unwrap();

        assert!(registry.active().unwrap().preferences.include_app_names);
    }
}
