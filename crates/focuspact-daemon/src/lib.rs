pub mod config;
pub mod daemon;
pub mod grace;
pub mod integrity_log;
pub mod limit_monitor;
pub mod notifier;
pub mod partner;
pub mod progress;
pub mod shield_controller;
