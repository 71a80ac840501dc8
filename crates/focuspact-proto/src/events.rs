use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use focuspact_common::AppSet;

/// Signals delivered asynchronously by the usage-monitoring capability for
/// schedules the monitor registered earlier. One tagged sum consumed
/// through a single dispatch function, not per-callback overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorSignal {
    IntervalStarted { schedule_id: Uuid },
    IntervalEnded { schedule_id: Uuid },
    ThresholdReached { event_id: Uuid },
}

/// A threshold registered within a schedule: fires once the governed set
/// accumulates `minutes` of use inside the active window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSpec {
    pub event_id: Uuid,
    pub minutes: u32,
}

/// A monitoring registration handed to the usage capability: one active
/// window per day plus the usage thresholds to watch inside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSchedule {
    pub schedule_id: Uuid,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
    pub governed: AppSet,
    pub thresholds: Vec<ThresholdSpec>,
}

/// What the user chose on an active shield. Each choice is terminal for
/// that shield instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShieldResponse {
    /// Acknowledge and stop using the app.
    Done,
    /// Spend one grace from the daily pool for a short bypass.
    UseGrace,
    /// Ask the partner for extra minutes; the shield stays up meanwhile.
    RequestExtension { minutes: u32, reason: Option<String> },
    /// Unconditional bypass, always surfaced to the partner.
    Emergency,
}
