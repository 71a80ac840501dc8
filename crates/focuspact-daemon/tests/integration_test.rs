use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use focuspact_common::{AppLimit, AppSet, ContactMethod, IntegrityEventType, ManualClock};
use focuspact_daemon::config::DaemonConfig;
use focuspact_daemon::daemon::{Backends, Daemon};
use focuspact_daemon::limit_monitor::ShieldOutcome;
use focuspact_proto::{
    MonitorSchedule, MonitorSignal, NotificationTransport, ShieldCapability, ShieldResponse,
    TransportError, UsageMonitoring,
};

#[derive(Default)]
struct RecordingUsage {
    started: Mutex<Vec<MonitorSchedule>>,
}

#[async_trait]
impl UsageMonitoring for RecordingUsage {
    async fn start_monitoring(&self, schedule: MonitorSchedule) {
        self.started.lock().unwrap().push(schedule);
    }

    async fn stop_monitoring(&self, _schedule_id: Uuid) {}
}

#[derive(Default)]
struct RecordingShield {
    applied: Mutex<Vec<AppSet>>,
    removed: Mutex<Vec<AppSet>>,
}

#[async_trait]
impl ShieldCapability for RecordingShield {
    async fn apply_shield(&self, set: &AppSet) {
        self.applied.lock().unwrap().push(set.clone());
    }

    async fn remove_shield(&self, set: &AppSet) {
        self.removed.lock().unwrap().push(set.clone());
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_email(&self, _address: &str, message: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn send_sms(&self, _phone: &str, message: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn send_push(&self, _token: &str, message: &str) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

struct Harness {
    daemon: Daemon,
    usage: Arc<RecordingUsage>,
    shield: Arc<RecordingShield>,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
}

fn harness_at(data_dir: &Path, clock: Arc<ManualClock>) -> Harness {
    let usage = Arc::new(RecordingUsage::default());
    let shield = Arc::new(RecordingShield::default());
    let transport = Arc::new(RecordingTransport::default());
    let backends = Backends {
        usage: usage.clone(),
        shields: shield.clone(),
        transport: transport.clone(),
    };

    let mut config = DaemonConfig::default();
    config.storage.data_dir = data_dir.to_string_lossy().to_string();

    let daemon = Daemon::new(&config, backends, clock.clone()).expect("daemon assembly");
    Harness { daemon, usage, shield, transport, clock }
}

fn wednesday_clock() -> Arc<ManualClock> {
    // 2026-04-01 is a Wednesday.
    Arc::new(ManualClock::at(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap(), 9, 0))
}

fn social_set() -> AppSet {
    AppSet {
        apps: vec!["instagram".to_string(), "tiktok".to_string()],
        categories: vec!["social".to_string()],
        domains: vec![],
    }
}

fn with_active_partner(h: &Harness) {
    h.daemon
        .registry
        .invite("Sam", ContactMethod::Email { address: "sam@example.com".into() })
        .unwrap();
    h.daemon.registry.accept().unwrap();
}

#[tokio::test]
async fn test_limit_exceeded_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_at(dir.path(), wednesday_clock());
    with_active_partner(&h);

    let limit = AppLimit::new("Social", &social_set(), 30);
    h.daemon.monitor.add_limit(limit.clone()).await;
    h.daemon.monitor.reschedule().await;

    {
        let started = h.usage.started.lock().unwrap();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].thresholds[0].minutes, 30);
        assert_eq!(started[0].governed, social_set());
    }

    // The capability reports 30 minutes of use.
    h.daemon
        .monitor
        .handle_signal(MonitorSignal::ThresholdReached { event_id: limit.id })
        .await;

    // Shield up, event logged, partner notified, event marked as such.
    assert!(h.daemon.shields.is_shielded(limit.id));
    assert_eq!(h.shield.applied.lock().unwrap().len(), 1);

    let exceeded = h
        .daemon
        .log
        .events()
        .into_iter()
        .find(|e| e.event_type == IntegrityEventType::LimitExceeded)
        .expect("limit exceeded event");
    assert!(exceeded.was_notified);
    assert_eq!(h.transport.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_grace_then_emergency_day() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_at(dir.path(), wednesday_clock());

    let limit = AppLimit::new("Social", &social_set(), 30);
    h.daemon.monitor.add_limit(limit.clone()).await;
    h.daemon.monitor.reschedule().await;

    h.daemon
        .monitor
        .handle_signal(MonitorSignal::ThresholdReached { event_id: limit.id })
        .await;

    // One grace lifts the shield for its configured two minutes.
    let outcome =
        h.daemon.monitor.respond(limit.id, ShieldResponse::UseGrace).await.unwrap();
    assert!(matches!(outcome, ShieldOutcome::GraceStarted(_)));
    assert!(!h.daemon.shields.is_shielded(limit.id));
    assert_eq!(h.daemon.grace.used_today(), 1);

    // Expiry brings the shield back.
    h.clock.advance(chrono::Duration::minutes(3));
    let reapplied = h.daemon.monitor.sweep_expired_bypasses().await;
    assert_eq!(reapplied, vec![limit.id]);
    assert!(h.daemon.shields.is_shielded(limit.id));

    // Emergency access always lifts, and always leaves a trace.
    let outcome =
        h.daemon.monitor.respond(limit.id, ShieldResponse::Emergency).await.unwrap();
    assert_eq!(outcome, ShieldOutcome::EmergencyGranted);
    assert!(!h.daemon.shields.is_shielded(limit.id));

    // Midnight rollover folds the day into progress as non-compliant.
    h.clock
        .set(NaiveDate::from_ymd_opt(2026, 4, 2).unwrap().and_hms_opt(0, 0, 0).unwrap());
    h.daemon
        .monitor
        .handle_signal(MonitorSignal::IntervalEnded { schedule_id: limit.id })
        .await;

    let progress = h.daemon.progress.snapshot();
    assert_eq!(progress.total_days_tracked, 1);
    assert_eq!(progress.current_streak, 0);
    let day = progress.weekly_history.last().unwrap();
    assert!(!day.within_all_limits);
    assert_eq!(day.limit_exceeded_count, 1);
    assert_eq!(day.grace_used_count, 1);
    assert_eq!(day.emergency_access_count, 1);
}

#[tokio::test]
async fn test_extension_flow_across_components() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness_at(dir.path(), wednesday_clock());
    with_active_partner(&h);

    let limit = AppLimit::new("Social", &social_set(), 30);
    h.daemon.monitor.add_limit(limit.clone()).await;
    h.daemon.monitor.reschedule().await;
    h.daemon
        .monitor
        .handle_signal(MonitorSignal::ThresholdReached { event_id: limit.id })
        .await;
    let sent_before = h.transport.sent.lock().unwrap().len();

    // Step past the notification debounce window so the request dispatches.
    h.clock.advance(chrono::Duration::minutes(6));

    let outcome = h
        .daemon
        .monitor
        .respond(
            limit.id,
            ShieldResponse::RequestExtension { minutes: 15, reason: Some("homework".into()) },
        )
        .await
        .unwrap();
    assert_eq!(outcome, ShieldOutcome::ExtensionPending { accepted: true });
    // Shield holds while the request is pending; the partner heard about it.
    assert!(h.daemon.shields.is_shielded(limit.id));
    assert!(h.transport.sent.lock().unwrap().len() > sent_before);

    let request_id = h.daemon.notifier.pending_extensions()[0].id;
    h.daemon.monitor.resolve_extension(request_id, true).await.unwrap();
    assert!(!h.daemon.shields.is_shielded(limit.id));

    // The approved lift runs out and the shield returns on its own.
    h.clock.advance(chrono::Duration::minutes(16));
    h.daemon.monitor.sweep_expired_bypasses().await;
    assert!(h.daemon.shields.is_shielded(limit.id));
}

#[tokio::test]
async fn test_state_survives_daemon_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = wednesday_clock();
    let limit = AppLimit::new("Social", &social_set(), 30);

    let exceeded_id = {
        let h = harness_at(dir.path(), clock.clone());
        with_active_partner(&h);
        h.daemon.monitor.add_limit(limit.clone()).await;
        h.daemon.monitor.reschedule().await;
        h.daemon
            .monitor
            .handle_signal(MonitorSignal::ThresholdReached { event_id: limit.id })
            .await;
        assert!(h.daemon.grace.use_grace());
        h.daemon
            .log
            .events()
            .into_iter()
            .find(|e| e.event_type == IntegrityEventType::LimitExceeded)
            .unwrap()
            .id
    };

    let h = harness_at(dir.path(), clock);

    let limits = h.daemon.monitor.limits();
    assert_eq!(limits.len(), 1);
    assert_eq!(limits[0].id, limit.id);

    let event = h.daemon.log.get(exceeded_id).expect("event persisted");
    assert!(event.was_notified);

    assert_eq!(h.daemon.grace.used_today(), 1);
    assert_eq!(h.daemon.grace.effective_remaining(), 2);

    let partner = h.daemon.registry.snapshot().expect("partner persisted");
    assert_eq!(partner.name, "Sam");

    // Rules re-register against the fresh usage backend on restart.
    h.daemon.monitor.reschedule().await;
    assert_eq!(h.usage.started.lock().unwrap().len(), 1);
}
