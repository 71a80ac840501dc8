pub mod capabilities;
pub mod events;

pub use capabilities::{NotificationTransport, ShieldCapability, TransportError, UsageMonitoring};
pub use events::*;
