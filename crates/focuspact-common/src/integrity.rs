use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordering matters: severities compare Low < Medium < High < Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Everything the accountability layer considers worth recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityEventType {
    LimitExceeded,
    GraceUsed,
    ExtensionRequested,
    ExtensionApproved,
    ExtensionDenied,
    EmergencyAccess,
    AccountabilityDisabled,
    PartnerRemoved,
    PermissionsRevoked,
    LimitsEdited,
    DoneChosen,
}

impl IntegrityEventType {
    pub fn severity(&self) -> Severity {
        match self {
            Self::GraceUsed
            | Self::ExtensionRequested
            | Self::ExtensionApproved
            | Self::ExtensionDenied
            | Self::DoneChosen => Severity::Low,
            Self::LimitExceeded | Self::LimitsEdited => Severity::Medium,
            Self::EmergencyAccess => Severity::High,
            Self::AccountabilityDisabled | Self::PartnerRemoved | Self::PermissionsRevoked => {
                Severity::Critical
            }
        }
    }

    /// Whether this event type defaults to informing the partner. The
    /// notifier still applies quiet hours, rate limiting, and the partner's
    /// sharing preferences on top of this.
    pub fn should_notify_partner(&self) -> bool {
        match self {
            Self::LimitExceeded
            | Self::ExtensionRequested
            | Self::EmergencyAccess
            | Self::AccountabilityDisabled
            | Self::PartnerRemoved
            | Self::PermissionsRevoked => true,
            Self::GraceUsed
            | Self::ExtensionApproved
            | Self::ExtensionDenied
            | Self::LimitsEdited
            | Self::DoneChosen => false,
        }
    }

    /// Fixed human-readable text used as the body of partner messages.
    pub fn message_text(&self) -> &'static str {
        match self {
            Self::LimitExceeded => "A daily app limit was reached",
            Self::GraceUsed => "A 2-minute grace was used",
            Self::ExtensionRequested => "More time was requested on a limit",
            Self::ExtensionApproved => "An extension request was approved",
            Self::ExtensionDenied => "An extension request was denied",
            Self::EmergencyAccess => "Emergency access was used to bypass a limit",
            Self::AccountabilityDisabled => "Accountability was turned off",
            Self::PartnerRemoved => "The accountability partner was removed",
            Self::PermissionsRevoked => "Screen time permissions were revoked",
            Self::LimitsEdited => "App limits were edited",
            Self::DoneChosen => "The shield was acknowledged",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityEvent {
    pub id: Uuid,
    pub event_type: IntegrityEventType,
    pub timestamp: DateTime<Utc>,
    pub app_name: Option<String>,
    pub context: Option<String>,
    pub was_notified: bool,
    pub limit_id: Option<Uuid>,
}

impl IntegrityEvent {
    pub fn new(
        event_type: IntegrityEventType,
        timestamp: DateTime<Utc>,
        app_name: Option<String>,
        context: Option<String>,
        limit_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            timestamp,
            app_name,
            context,
            was_notified: false,
            limit_id,
        }
    }

    pub fn severity(&self) -> Severity {
        self.event_type.severity()
    }
}
