use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use focuspact_common::{
    AccountabilityPartner, Clock, ContactMethod, DailyRecord, Error, ExtensionRequest,
    ExtensionStatus, IntegrityEvent, IntegrityEventType, Result, Severity,
};
use focuspact_proto::NotificationTransport;
use focuspact_store::{load_or_default, save_state, StateStore};

use crate::config::NotifierConfig;
use crate::integrity_log::IntegrityLog;
use crate::partner::PartnerRegistry;

const EXTENSIONS_STORE_KEY: &str = "extension-requests";

/// Decides, per integrity event, whether the partner should hear about it,
/// and dispatches through the external transport.
///
/// The pipeline short-circuits in a fixed order: partner presence, quiet
/// hours, the global debounce, then the partner's sharing preferences. A
/// skipped event is not an error and is never queued for retry. All skip
/// decisions are made synchronously before the transport is awaited.
pub struct AccountabilityNotifier {
    registry: Arc<PartnerRegistry>,
    log: Arc<IntegrityLog>,
    transport: Arc<dyn NotificationTransport>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn StateStore>,
    min_interval: chrono::Duration,
    transport_timeout: Duration,
    last_sent: Mutex<Option<DateTime<Utc>>>,
    extensions: Mutex<Vec<ExtensionRequest>>,
}

impl AccountabilityNotifier {
    pub fn new(
        registry: Arc<PartnerRegistry>,
        log: Arc<IntegrityLog>,
        transport: Arc<dyn NotificationTransport>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn StateStore>,
        config: &NotifierConfig,
    ) -> Self {
        let extensions = load_or_default(store.as_ref(), EXTENSIONS_STORE_KEY);
        Self {
            registry,
            log,
            transport,
            clock,
            store,
            min_interval: chrono::Duration::minutes(config.min_interval_minutes),
            transport_timeout: Duration::from_secs(config.transport_timeout_secs),
            last_sent: Mutex::new(None),
            extensions: Mutex::new(extensions),
        }
    }

    /// Run the decision pipeline for one event. Returns whether a message
    /// was actually delivered; a skip at any stage is `false` without being
    /// an error.
    pub async fn notify(&self, event: &IntegrityEvent) -> bool {
        // The log is the source of truth for duplicate suppression.
        if self.log.get(event.id).map(|e| e.was_notified).unwrap_or(event.was_notified) {
            debug!("Event {} already notified, skipping", event.id);
            return false;
        }

        let Some(partner) = self.registry.active() else {
            debug!("No active partner, skipping notification for {:?}", event.event_type);
            return false;
        };

        if self.is_quiet(&partner) {
            debug!("Quiet hours active, skipping notification for {:?}", event.event_type);
            return false;
        }

        if self.debounced(event.severity()) {
            debug!(
                "Within rate-limit window, dropping notification for {:?}",
                event.event_type
            );
            return false;
        }

        if !preference_allows(event.event_type, &partner) {
            debug!(
                "Partner preferences exclude {:?}, skipping notification",
                event.event_type
            );
            return false;
        }

        let message = compose_message(event, &partner);
        if !self.dispatch(&partner.contact, &message).await {
            return false;
        }

        *self.last_sent.lock().expect("rate limit lock poisoned") = Some(self.clock.now());
        self.log.mark_notified(event.id);
        info!("Partner notified about {:?}", event.event_type);
        true
    }

    /// Daily summary sent at day close when the user stayed within all
    /// limits and the partner opted in. Subject to the same quiet-hours and
    /// debounce rules as event notifications.
    pub async fn notify_daily_success(&self, record: &DailyRecord) -> bool {
        let Some(partner) = self.registry.active() else {
            return false;
        };
        if !partner.preferences.notify_on_daily_success || !record.within_all_limits {
            return false;
        }
        if self.is_quiet(&partner) || self.debounced(Severity::Low) {
            return false;
        }

        let mut message = format!("All app limits were kept on {}", record.date);
        if partner.preferences.include_time_spent {
            message.push_str(&format!(" ({} minutes of screen time)", record.total_screen_minutes));
        }

        if !self.dispatch(&partner.contact, &message).await {
            return false;
        }
        *self.last_sent.lock().expect("rate limit lock poisoned") = Some(self.clock.now());
        info!("Partner notified of daily success for {}", record.date);
        true
    }

    /// Register an extension request and route the ExtensionRequested event
    /// through the pipeline. Returns whether the request was accepted as
    /// pending; a second pending request for the same limit is rejected.
    pub async fn request_extension(
        &self,
        limit_id: Uuid,
        minutes: u32,
        reason: Option<String>,
    ) -> bool {
        {
            let mut extensions = self.extensions.lock().expect("extensions lock poisoned");
            let already_pending = extensions
                .iter()
                .any(|r| r.limit_id == limit_id && r.status == ExtensionStatus::Pending);
            if already_pending {
                debug!("Extension already pending for limit {}", limit_id);
                return false;
            }
            extensions.push(ExtensionRequest::new(
                limit_id,
                minutes,
                reason.clone(),
                self.clock.now(),
            ));
            save_state(self.store.as_ref(), EXTENSIONS_STORE_KEY, &*extensions);
        }

        let event = self.log.append(
            IntegrityEventType::ExtensionRequested,
            None,
            reason.or_else(|| Some(format!("{minutes} extra minutes requested"))),
            Some(limit_id),
        );
        // Delivery is best effort; the request stays pending either way.
        self.notify(&event).await;
        true
    }

    /// Partner-side approval or denial, arriving out of band. Appends the
    /// corresponding integrity event without re-entering the rate limiter:
    /// the outcome is informational to the requesting user, not
    /// partner-bound.
    pub fn resolve_extension(&self, request_id: Uuid, approved: bool) -> Result<ExtensionRequest> {
        let resolved = {
            let mut extensions = self.extensions.lock().expect("extensions lock poisoned");
            let request = extensions
                .iter_mut()
                .find(|r| r.id == request_id && r.status == ExtensionStatus::Pending)
                .ok_or_else(|| {
                    Error::NotFound(format!("no pending extension request {request_id}"))
                })?;
            request.resolve(approved, self.clock.now());
            let resolved = request.clone();
            save_state(self.store.as_ref(), EXTENSIONS_STORE_KEY, &*extensions);
            resolved
        };

        let event_type = if approved {
            IntegrityEventType::ExtensionApproved
        } else {
            IntegrityEventType::ExtensionDenied
        };
        self.log.append(event_type, None, None, Some(resolved.limit_id));
        Ok(resolved)
    }

    pub fn pending_extensions(&self) -> Vec<ExtensionRequest> {
        self.extensions
            .lock()
            .expect("extensions lock poisoned")
            .iter()
            .filter(|r| r.status == ExtensionStatus::Pending)
            .cloned()
            .collect()
    }

    /// Remove the partner, notifying them first while the record can still
    /// deliver. The PartnerRemoved event is appended regardless of
    /// delivery.
    pub async fn remove_partner(&self) -> Option<AccountabilityPartner> {
        let event = self.log.append(IntegrityEventType::PartnerRemoved, None, None, None);
        self.notify(&event).await;
        self.registry.remove()
    }

    /// Record that the user switched accountability off. Critical severity,
    /// so it preempts the debounce window; the partner relationship itself
    /// is left intact.
    pub async fn report_accountability_disabled(&self, context: Option<String>) -> bool {
        let event =
            self.log.append(IntegrityEventType::AccountabilityDisabled, None, context, None);
        self.notify(&event).await
    }

    /// Record that the platform revoked the permissions enforcement relies
    /// on (reported by the usage backend, not detected here).
    pub async fn report_permissions_revoked(&self, context: Option<String>) -> bool {
        let event = self.log.append(IntegrityEventType::PermissionsRevoked, None, context, None);
        self.notify(&event).await
    }

    fn is_quiet(&self, partner: &AccountabilityPartner) -> bool {
        partner
            .quiet_hours
            .as_ref()
            .map(|q| q.is_quiet_at(self.clock.hour()))
            .unwrap_or(false)
    }

    /// Global debounce: one message per interval, dropped not queued.
    /// High and Critical events preempt the window so an emergency is
    /// never silenced by a routine message sent moments earlier.
    fn debounced(&self, severity: Severity) -> bool {
        if severity >= Severity::High {
            return false;
        }
        let last_sent = self.last_sent.lock().expect("rate limit lock poisoned");
        match *last_sent {
            Some(at) => self.clock.now() - at < self.min_interval,
            None => false,
        }
    }

    /// Drive the transport for the partner's contact method. Failure and
    /// timeout are logged and reported as non-delivery; there is no retry.
    async fn dispatch(&self, contact: &ContactMethod, message: &str) -> bool {
        let send = async {
            match contact {
                ContactMethod::Email { address } => {
                    self.transport.send_email(address, message).await
                }
                ContactMethod::Sms { phone } => self.transport.send_sms(phone, message).await,
                ContactMethod::Push { token } => self.transport.send_push(token, message).await,
            }
        };

        match tokio::time::timeout(self.transport_timeout, send).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!("Notification dispatch failed: {}", e);
                false
            }
            Err(_) => {
                warn!("Notification dispatch timed out");
                false
            }
        }
    }
}

/// Map an event type to the sharing-preference flag that gates it. Types
/// with no mapped flag are not delivered.
fn preference_allows(event_type: IntegrityEventType, partner: &AccountabilityPartner) -> bool {
    let preferences = &partner.preferences;
    match event_type {
        IntegrityEventType::LimitExceeded | IntegrityEventType::EmergencyAccess => {
            preferences.notify_on_limit_exceeded
        }
        IntegrityEventType::AccountabilityDisabled
        | IntegrityEventType::PartnerRemoved
        | IntegrityEventType::PermissionsRevoked
        | IntegrityEventType::ExtensionRequested => preferences.notify_on_integrity_events,
        _ => false,
    }
}

fn compose_message(event: &IntegrityEvent, partner: &AccountabilityPartner) -> String {
    let base = event.event_type.message_text();
    match (&event.app_name, partner.preferences.include_app_names) {
        (Some(app), true) => format!("{base} ({app})"),
        _ => base.to_string(),
    }
}
