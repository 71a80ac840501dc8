use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{info, warn};
use uuid::Uuid;

use focuspact_common::{AppSet, Clock, SystemClock};
use focuspact_proto::{
    MonitorSchedule, MonitorSignal, NotificationTransport, ShieldCapability, TransportError,
    UsageMonitoring,
};
use focuspact_store::JsonFileStore;

use crate::config::DaemonConfig;
use crate::grace::GraceManager;
use crate::integrity_log::IntegrityLog;
use crate::limit_monitor::LimitMonitor;
use crate::notifier::AccountabilityNotifier;
use crate::partner::PartnerRegistry;
use crate::progress::ProgressTracker;
use crate::shield_controller::ShieldController;

const SIGNAL_CHANNEL_CAPACITY: usize = 64;
const MAINTENANCE_INTERVAL_SECS: u64 = 30;

/// Platform backends the daemon drives. Real implementations come from
/// platform integration crates; the stand-ins below keep the daemon
/// runnable in degraded mode without them.
pub struct Backends {
    pub usage: Arc<dyn UsageMonitoring>,
    pub shields: Arc<dyn ShieldCapability>,
    pub transport: Arc<dyn NotificationTransport>,
}

impl Backends {
    pub fn degraded() -> Self {
        Self {
            usage: Arc::new(IdleUsageMonitor),
            shields: Arc::new(LoggingShield),
            transport: Arc::new(UnavailableTransport),
        }
    }
}

/// Usage backend that accepts registrations but never produces signals.
struct IdleUsageMonitor;

#[async_trait]
impl UsageMonitoring for IdleUsageMonitor {
    async fn start_monitoring(&self, schedule: MonitorSchedule) {
        warn!(
            "No usage backend available, schedule {} will not produce signals",
            schedule.schedule_id
        );
    }

    async fn stop_monitoring(&self, _schedule_id: Uuid) {}
}

/// Shield backend that only logs. Enforcement is absent in degraded mode;
/// bookkeeping still runs so state is correct once a real backend attaches.
struct LoggingShield;

#[async_trait]
impl ShieldCapability for LoggingShield {
    async fn apply_shield(&self, set: &AppSet) {
        warn!("No shield backend available, {} targets left unblocked", set.len());
    }

    async fn remove_shield(&self, _set: &AppSet) {}
}

struct UnavailableTransport;

#[async_trait]
impl NotificationTransport for UnavailableTransport {
    async fn send_email(&self, _address: &str, _message: &str) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("no transport backend".to_string()))
    }

    async fn send_sms(&self, _phone: &str, _message: &str) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("no transport backend".to_string()))
    }

    async fn send_push(&self, _token: &str, _message: &str) -> Result<(), TransportError> {
        Err(TransportError::Unavailable("no transport backend".to_string()))
    }
}

/// The assembled service graph. Everything hangs off the monitor; the other
/// handles are exposed for frontends (CLI, IPC surface) that talk to one
/// component directly.
pub struct Daemon {
    pub monitor: Arc<LimitMonitor>,
    pub notifier: Arc<AccountabilityNotifier>,
    pub registry: Arc<PartnerRegistry>,
    pub log: Arc<IntegrityLog>,
    pub grace: Arc<GraceManager>,
    pub progress: Arc<ProgressTracker>,
    pub shields: Arc<ShieldController>,
    signal_tx: mpsc::Sender<MonitorSignal>,
    signal_rx: mpsc::Receiver<MonitorSignal>,
}

impl Daemon {
    pub fn new(config: &DaemonConfig, backends: Backends, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = Arc::new(
            JsonFileStore::new(&config.storage.data_dir)
                .with_context(|| format!("Failed to open data dir {}", config.storage.data_dir))?,
        );

        let registry = Arc::new(PartnerRegistry::new(store.clone(), clock.clone()));
        let log = Arc::new(IntegrityLog::new(store.clone(), clock.clone(), &config.integrity));
        let notifier = Arc::new(AccountabilityNotifier::new(
            registry.clone(),
            log.clone(),
            backends.transport,
            clock.clone(),
            store.clone(),
            &config.notifier,
        ));
        let grace = Arc::new(GraceManager::new(store.clone(), clock.clone(), &config.grace));
        let progress = Arc::new(ProgressTracker::new(store.clone(), clock.clone()));
        let shields = Arc::new(ShieldController::new(backends.shields));
        let monitor = Arc::new(LimitMonitor::new(
            clock,
            store,
            backends.usage,
            shields.clone(),
            log.clone(),
            notifier.clone(),
            grace.clone(),
            progress.clone(),
        ));

        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

        Ok(Self { monitor, notifier, registry, log, grace, progress, shields, signal_tx, signal_rx })
    }

    /// Sender half for the usage backend to push its signals into the
    /// daemon loop.
    pub fn signal_sender(&self) -> mpsc::Sender<MonitorSignal> {
        self.signal_tx.clone()
    }

    /// Drive the signal and maintenance loops until shutdown is requested.
    pub async fn run_until_shutdown(mut self) -> Result<()> {
        self.monitor.reschedule().await;

        let monitor = self.monitor.clone();
        let maintenance = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(MAINTENANCE_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                let reapplied = monitor.sweep_expired_bypasses().await;
                if !reapplied.is_empty() {
                    info!("Reapplied {} shields after bypass expiry", reapplied.len());
                }
                monitor.close_day_if_needed().await;
            }
        });

        info!("Daemon running, waiting for signals or shutdown");
        loop {
            tokio::select! {
                signal = self.signal_rx.recv() => {
                    match signal {
                        Some(signal) => self.monitor.handle_signal(signal).await,
                        None => {
                            warn!("Signal channel closed, shutting down");
                            break;
                        }
                    }
                }
                shutdown = shutdown_requested() => {
                    shutdown?;
                    break;
                }
            }
        }

        maintenance.abort();
        info!("Daemon shutdown complete");
        Ok(())
    }
}

async fn shutdown_requested() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
            _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down gracefully..."),
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down gracefully...");
        Ok(())
    }
}

pub async fn run() -> Result<()> {
    let config = DaemonConfig::load()?;
    let daemon = Daemon::new(&config, Backends::degraded(), Arc::new(SystemClock))?;
    daemon.run_until_shutdown().await
}
