use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// The set of apps, categories, and web domains governed by a rule.
///
/// Limits and time windows carry this only in opaque serialized form
/// (`token_payload`); decoding is explicit so a malformed payload can be
/// reported to the caller instead of silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSet {
    #[serde(default)]
    pub apps: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub domains: Vec<String>,
}

impl AppSet {
    pub fn decode(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|e| Error::TokenPayload(e.to_string()))
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.categories.is_empty() && self.domains.is_empty()
    }

    pub fn len(&self) -> usize {
        self.apps.len() + self.categories.len() + self.domains.len()
    }

    /// Union, deduplicated, preserving first-seen order.
    pub fn merge(&mut self, other: &AppSet) {
        fn extend_unique(target: &mut Vec<String>, source: &[String]) {
            for item in source {
                if !target.contains(item) {
                    target.push(item.clone());
                }
            }
        }
        extend_unique(&mut self.apps, &other.apps);
        extend_unique(&mut self.categories, &other.categories);
        extend_unique(&mut self.domains, &other.domains);
    }

    /// Elements of `self` not claimed by `other`.
    pub fn minus(&self, other: &AppSet) -> AppSet {
        fn difference(left: &[String], right: &[String]) -> Vec<String> {
            left.iter().filter(|item| !right.contains(item)).cloned().collect()
        }
        AppSet {
            apps: difference(&self.apps, &other.apps),
            categories: difference(&self.categories, &other.categories),
            domains: difference(&self.domains, &other.domains),
        }
    }
}

/// A per-app daily usage budget.
///
/// Edits replace the value wholesale; `used_minutes_today` is advanced by
/// the external usage-monitoring capability and reset at the day boundary
/// by the same capability, never by this core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLimit {
    pub id: Uuid,
    pub name: String,
    /// Opaque serialized selection of the apps/categories/domains governed
    /// by this limit. Decoded with `AppSet::decode` at scheduling time.
    pub token_payload: String,
    pub daily_minutes: u32,
    pub weekend_minutes: Option<u32>,
    pub is_active: bool,
    pub used_minutes_today: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppLimit {
    pub fn new(name: impl Into<String>, governed: &AppSet, daily_minutes: u32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            token_payload: governed.encode(),
            daily_minutes,
            weekend_minutes: None,
            is_active: true,
            used_minutes_today: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The budget that applies on the given weekday: the weekend budget on
    /// Saturday/Sunday when one is configured, the daily budget otherwise.
    pub fn effective_daily_limit(&self, weekday: Weekday) -> u32 {
        match (weekday, self.weekend_minutes) {
            (Weekday::Sat | Weekday::Sun, Some(weekend)) => weekend,
            _ => self.daily_minutes,
        }
    }

    pub fn governed_set(&self) -> Result<AppSet> {
        AppSet::decode(&self.token_payload)
    }
}

/// A recurring time-of-day block: the governed apps are shielded during the
/// window on its active weekdays, regardless of accumulated usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub id: Uuid,
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// ISO weekday numbers, Monday = 1 through Sunday = 7.
    pub days: Vec<u8>,
    pub enabled: bool,
    pub token_payload: String,
}

impl TimeWindow {
    pub fn new(
        name: impl Into<String>,
        start: NaiveTime,
        end: NaiveTime,
        days: Vec<u8>,
        governed: &AppSet,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            start,
            end,
            days,
            enabled: true,
            token_payload: governed.encode(),
        }
    }

    /// Whether the window is active at the given local time.
    ///
    /// A window whose start is after its end wraps midnight: 22:00-06:00 is
    /// active from 22:00 through 05:59 the next morning.
    pub fn is_active_at(&self, weekday: Weekday, time: NaiveTime) -> bool {
        if !self.enabled || !self.days.contains(&(weekday.number_from_monday() as u8)) {
            return false;
        }
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    pub fn governed_set(&self) -> Result<AppSet> {
        AppSet::decode(&self.token_payload)
    }
}

/// Daily allowance of short shield bypasses.
///
/// The pool is persisted across sessions and reset lazily: any read or
/// consumption first checks whether `last_reset_date` is still today, so a
/// stale "0 remaining" is never observed after midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePool {
    pub daily_graces_remaining: u32,
    pub grace_minutes: u32,
    pub last_reset_date: NaiveDate,
    pub total_graces_used_today: u32,
    #[serde(default = "GracePool::default_allowance")]
    pub daily_allowance: u32,
}

impl GracePool {
    pub const DAILY_ALLOWANCE: u32 = 3;
    pub const GRACE_MINUTES: u32 = 2;

    pub fn new(today: NaiveDate) -> Self {
        Self::with_allowance(today, Self::DAILY_ALLOWANCE, Self::GRACE_MINUTES)
    }

    pub fn with_allowance(today: NaiveDate, daily_allowance: u32, grace_minutes: u32) -> Self {
        Self {
            daily_graces_remaining: daily_allowance,
            grace_minutes,
            last_reset_date: today,
            total_graces_used_today: 0,
            daily_allowance,
        }
    }

    fn default_allowance() -> u32 {
        Self::DAILY_ALLOWANCE
    }

    /// Remaining graces as of `today`, applying the day rollover without
    /// mutating state.
    pub fn effective_remaining(&self, today: NaiveDate) -> u32 {
        if self.last_reset_date != today {
            self.daily_allowance
        } else {
            self.daily_graces_remaining
        }
    }

    pub fn has_remaining(&self, today: NaiveDate) -> bool {
        self.effective_remaining(today) > 0
    }

    /// Consume one grace. Resets the pool first when the day has changed,
    /// so the first call of a new day evaluates against a full allowance.
    /// Exhaustion is the `false` return, not an error.
    pub fn use_grace(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date != today {
            *self = Self::with_allowance(today, self.daily_allowance, self.grace_minutes);
        }
        if self.daily_graces_remaining == 0 {
            return false;
        }
        self.daily_graces_remaining -= 1;
        self.total_graces_used_today += 1;
        true
    }
}

impl Default for GracePool {
    fn default() -> Self {
        Self::new(NaiveDate::default())
    }
}

/// A single active grace bypass. Expiry is recomputed from the clock on
/// every query; nothing about it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraceSession {
    pub started_at: DateTime<Utc>,
    pub duration_minutes: u32,
    pub limit_id: Uuid,
    pub app_name: String,
}

impl GraceSession {
    pub fn new(started_at: DateTime<Utc>, duration_minutes: u32, limit_id: Uuid, app_name: impl Into<String>) -> Self {
        Self { started_at, duration_minutes, limit_id, app_name: app_name.into() }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.started_at + chrono::Duration::minutes(self.duration_minutes as i64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at() - now).num_seconds().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionStatus {
    Pending,
    Approved,
    Denied,
    Expired,
}

/// A request for extra minutes on a shielded limit, left pending until the
/// partner responds out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRequest {
    pub id: Uuid,
    pub limit_id: Uuid,
    pub requested_minutes: u32,
    pub reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub status: ExtensionStatus,
    pub responded_at: Option<DateTime<Utc>>,
}

impl ExtensionRequest {
    pub fn new(
        limit_id: Uuid,
        requested_minutes: u32,
        reason: Option<String>,
        requested_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            limit_id,
            requested_minutes,
            reason,
            requested_at,
            status: ExtensionStatus::Pending,
            responded_at: None,
        }
    }

    pub fn resolve(&mut self, approved: bool, now: DateTime<Utc>) {
        self.status = if approved { ExtensionStatus::Approved } else { ExtensionStatus::Denied };
        self.responded_at = Some(now);
    }
}
