// Capability seams
//
// The core drives platform code it does not own: the OS usage monitor, the
// app-blocking mechanism, and the message transports. Each is a trait here;
// implementations live out of tree. Failures from any of them are
// non-fatal to enforcement.

use async_trait::async_trait;
use uuid::Uuid;

use focuspact_common::AppSet;

use crate::events::MonitorSchedule;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    #[error("Dispatch failed: {0}")]
    Dispatch(String),
    #[error("Dispatch timed out")]
    Timeout,
}

/// The OS usage-measurement capability. Registered schedules later produce
/// `MonitorSignal`s on the daemon's signal channel.
#[async_trait]
pub trait UsageMonitoring: Send + Sync {
    async fn start_monitoring(&self, schedule: MonitorSchedule);
    async fn stop_monitoring(&self, schedule_id: Uuid);
}

/// The OS app-blocking capability. Stateless from the core's point of view;
/// the core tracks what is shielded and keeps these calls consistent.
#[async_trait]
pub trait ShieldCapability: Send + Sync {
    async fn apply_shield(&self, set: &AppSet);
    async fn remove_shield(&self, set: &AppSet);
}

/// Outbound partner messaging. Each method may fail; the caller logs and
/// moves on without retrying.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send_email(&self, address: &str, message: &str) -> Result<(), TransportError>;
    async fn send_sms(&self, phone: &str, message: &str) -> Result<(), TransportError>;
    async fn send_push(&self, token: &str, message: &str) -> Result<(), TransportError>;
}
