use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the partner is reached. Each variant keeps the raw contact value;
/// `masked()` is what the UI shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContactMethod {
    Sms { phone: String },
    Email { address: String },
    Push { token: String },
}

impl ContactMethod {
    /// Masked display form: enough to recognize the contact, not enough to
    /// leak it.
    pub fn masked(&self) -> String {
        match self {
            Self::Sms { phone } => {
                let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
                if digits.len() >= 4 {
                    format!("***-{}", &digits[digits.len() - 4..])
                } else {
                    "***".to_string()
                }
            }
            Self::Email { address } => match address.split_once('@') {
                Some((local, domain)) if !local.is_empty() => {
                    let first = local.chars().next().unwrap_or('*');
                    format!("{}***@{}", first, domain)
                }
                _ => "***".to_string(),
            },
            Self::Push { .. } => "this device".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    Pending,
    Active,
    Declined,
    Removed,
}

/// What the partner is allowed to see, as independent opt-ins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingPreferences {
    pub notify_on_limit_exceeded: bool,
    pub notify_on_integrity_events: bool,
    pub include_app_names: bool,
    pub include_time_spent: bool,
    pub notify_on_daily_success: bool,
}

impl Default for SharingPreferences {
    fn default() -> Self {
        Self {
            notify_on_limit_exceeded: true,
            notify_on_integrity_events: true,
            include_app_names: false,
            include_time_spent: false,
            notify_on_daily_success: false,
        }
    }
}

/// A do-not-disturb range in whole hours of the partner's day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start_hour: u32,
    pub end_hour: u32,
    pub enabled: bool,
}

impl QuietHours {
    pub fn new(start_hour: u32, end_hour: u32) -> Self {
        Self { start_hour, end_hour, enabled: true }
    }

    /// Hour-of-day test. A range whose start is after its end spans
    /// midnight: 22-8 is quiet for hours 22..24 and 0..8.
    pub fn is_quiet_at(&self, hour: u32) -> bool {
        if !self.enabled {
            return false;
        }
        if self.start_hour > self.end_hour {
            hour >= self.start_hour || hour < self.end_hour
        } else {
            hour >= self.start_hour && hour < self.end_hour
        }
    }
}

/// The single accountability partner. One partner at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountabilityPartner {
    pub id: Uuid,
    pub name: String,
    pub contact: ContactMethod,
    pub status: PartnerStatus,
    pub preferences: SharingPreferences,
    pub quiet_hours: Option<QuietHours>,
    pub invited_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl AccountabilityPartner {
    pub fn invite(name: impl Into<String>, contact: ContactMethod, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            contact,
            status: PartnerStatus::Pending,
            preferences: SharingPreferences::default(),
            quiet_hours: None,
            invited_at: now,
            accepted_at: None,
        }
    }

    pub fn accept(&mut self, now: DateTime<Utc>) {
        self.status = PartnerStatus::Active;
        self.accepted_at = Some(now);
    }

    pub fn decline(&mut self) {
        self.status = PartnerStatus::Declined;
    }

    pub fn is_active(&self) -> bool {
        self.status == PartnerStatus::Active
    }
}
