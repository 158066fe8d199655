/**
 * MONITOR - Protocole de détection de pannes
 *
 * RÔLE :
 * Machine à états par client qui relie le registre, le watchdog et le sink
 * de notification. Point d'entrée unique des événements (enregistrement,
 * heartbeat, expiration).
 *
 * TRANSITIONS :
 * - enregistrement           → registre.register + watchdog.arm     → WATCHING
 * - heartbeat OK (WATCHING)  → registre.apply + watchdog.refresh    → WATCHING
 * - heartbeat OK (STOPPED/FAILED) → registre.apply + watchdog.arm   → WATCHING
 * - heartbeat non-OK         → registre.apply + watchdog.disarm     → STOPPED
 * - expiration               → notification                         → FAILED
 *
 * ATOMICITÉ : l'action watchdog est exécutée pendant que l'entrée du
 * registre est tenue, donc un heartbeat et une expiration pour le même
 * client ne sont jamais « en vigueur » simultanément. Ordre des verrous :
 * entrée registre puis entrée table des timers, partout.
 */

use crate::models::{ClientId, ClientRecord, Heartbeat, Interval, WatchState};
use crate::notify::{Notification, NotificationSink};
use crate::registry::{NetworkRegistry, RegistryError};
use crate::watchdog::{Expiry, Watchdog};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Rejets possibles, tous récupérables côté appelant
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MonitorError {
    #[error("client already registered: {0}")]
    AlreadyRegistered(ClientId),
    #[error("unknown client: {0}")]
    UnknownClient(ClientId),
    #[error("invalid interval: {0}s (must be > 0)")]
    InvalidInterval(i64),
}

impl From<RegistryError> for MonitorError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => MonitorError::UnknownClient(id),
        }
    }
}

pub struct Monitor {
    registry: NetworkRegistry,
    watchdog: Watchdog,
    sink: Arc<dyn NotificationSink>,
    notifications_sent: AtomicU64,
}

impl Monitor {
    /// Construit le moniteur et démarre sa boucle d'expiration.
    /// La boucle ne garde qu'une référence faible et s'arrête avec le moniteur.
    pub fn start(network_name: &str, grace: Duration, sink: Arc<dyn NotificationSink>) -> Arc<Self> {
        let (watchdog, expiries) = Watchdog::new(grace);
        let monitor = Arc::new(Self {
            registry: NetworkRegistry::new(network_name),
            watchdog,
            sink,
            notifications_sent: AtomicU64::new(0),
        });

        info!(
            network = network_name,
            network_id = %monitor.registry.id(),
            grace_secs = monitor.watchdog.grace().as_secs(),
            "monitor started"
        );
        tokio::spawn(run_expiry_loop(Arc::downgrade(&monitor), expiries));
        monitor
    }

    pub fn register(&self, client_name: &str, interval_secs: i64) -> Result<ClientId, MonitorError> {
        let interval = Interval::from_secs(interval_secs).ok_or(MonitorError::InvalidInterval(interval_secs))?;

        let registration = self.registry.register_with(client_name, interval, |record| {
            self.watchdog.arm(record.id, interval.as_duration());
        });

        if !registration.created {
            info!(client = client_name, client_id = %registration.client_id, "registration rejected: already registered");
            return Err(MonitorError::AlreadyRegistered(registration.client_id));
        }

        info!(client = client_name, client_id = %registration.client_id, interval_secs, "client registered");
        Ok(registration.client_id)
    }

    pub fn heartbeat(&self, heartbeat: Heartbeat) -> Result<ClientRecord, MonitorError> {
        let status = heartbeat.status;
        let result = self.registry.apply_heartbeat_with(&heartbeat, |record| {
            let interval = record.interval.as_duration();
            if status.is_ok() {
                match record.watch {
                    WatchState::Watching => {
                        self.watchdog.refresh(record.id, interval);
                    }
                    WatchState::Stopped | WatchState::Failed => {
                        info!(client_id = %record.id, previous = ?record.watch, "monitoring resumed");
                        self.watchdog.arm(record.id, interval);
                    }
                }
                record.watch = WatchState::Watching;
            } else {
                self.watchdog.disarm(&record.id);
                if record.watch != WatchState::Stopped {
                    info!(client_id = %record.id, ?status, "monitoring stopped by client status");
                }
                record.watch = WatchState::Stopped;
            }
        });

        match result {
            Ok(record) => {
                debug!(client_id = %record.id, ?status, "heartbeat accepted");
                Ok(record)
            }
            Err(err) => {
                warn!(client_id = %heartbeat.client_id, "heartbeat from unregistered client");
                Err(err.into())
            }
        }
    }

    fn handle_expiry(&self, expiry: Expiry) {
        // Un heartbeat linéarisé après le tir a pu ré-armer (WATCHING) ou
        // arrêter la surveillance (STOPPED) entre-temps : l'état est conservé,
        // mais la notification part quand même.
        let record = self.registry.update(&expiry.client_id, |record| {
            if record.watch == WatchState::Watching && !self.watchdog.is_armed(&record.id) {
                record.watch = WatchState::Failed;
            }
            record.clone()
        });

        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(error = %err, "expiry for a client missing from the registry");
                return;
            }
        };

        if record.watch != WatchState::Failed {
            debug!(
                client_id = %record.id,
                generation = expiry.generation,
                armed_for_ms = expiry.armed_at.elapsed().as_millis() as u64,
                watch = ?record.watch,
                "client state changed after deadline, still notifying"
            );
        }

        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
        self.sink.notify(&Notification::missed(&record, OffsetDateTime::now_utc()));
    }

    pub fn client(&self, client_id: &ClientId) -> Option<ClientRecord> {
        self.registry.get(client_id)
    }

    pub fn clients(&self) -> Vec<ClientRecord> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn armed_timers(&self) -> usize {
        self.watchdog.armed_count()
    }

    pub fn notifications_sent(&self) -> u64 {
        self.notifications_sent.load(Ordering::Relaxed)
    }
}

async fn run_expiry_loop(monitor: Weak<Monitor>, mut expiries: mpsc::UnboundedReceiver<Expiry>) {
    while let Some(expiry) = expiries.recv().await {
        let Some(monitor) = monitor.upgrade() else {
            break;
        };
        monitor.handle_expiry(expiry);
    }
    debug!("expiry loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;
    use crate::notify::RecordingSink;
    use tokio::time::sleep;
    use uuid::Uuid;

    fn monitor_with(grace_secs: u64) -> (Arc<Monitor>, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let monitor = Monitor::start("healthnet", Duration::from_secs(grace_secs), sink.clone());
        (monitor, sink)
    }

    fn ok(id: ClientId) -> Heartbeat {
        Heartbeat::now(id, Status::Ok)
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_deadline_notifies_exactly_once() {
        let (monitor, sink) = monitor_with(1);
        let id = monitor.register("alice", 1).unwrap();

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(sink.count_for(&id), 1);
        assert_eq!(monitor.client(&id).unwrap().watch, WatchState::Failed);

        sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.count(), 1);
        assert_eq!(monitor.notifications_sent(), 1);
        assert_eq!(monitor.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_heartbeats_suppress_notification() {
        let (monitor, sink) = monitor_with(1);
        let id = monitor.register("alice", 5).unwrap();

        for _ in 0..10 {
            sleep(Duration::from_secs(2)).await;
            let record = monitor.heartbeat(ok(id)).unwrap();
            assert_eq!(record.watch, WatchState::Watching);
            assert_eq!(record.last_status, Status::Ok);
        }

        assert_eq!(sink.count(), 0);
        assert_eq!(monitor.armed_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_racing_expiry_never_double_fires() {
        let (monitor, sink) = monitor_with(0);
        let id = monitor.register("alice", 1).unwrap();

        sleep(Duration::from_millis(990)).await;
        let racer = Arc::clone(&monitor);
        tokio::spawn(async move { racer.heartbeat(ok(id)) });

        // le nouveau timer tire à ~1.99s ; on s'arrête avant
        sleep(Duration::from_millis(900)).await;
        assert!(sink.count_for(&id) <= 1);
        assert_eq!(monitor.armed_timers(), 1);

        // seule l'échéance ré-armée expire : une notification au total
        sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.count_for(&id), 1);
        assert_eq!(monitor.client(&id).unwrap().watch, WatchState::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_heartbeat_racing_expiry_multi_thread() {
        let (monitor, sink) = monitor_with(0);
        let id = monitor.register("alice", 1).unwrap();

        sleep(Duration::from_millis(990)).await;
        let a = Arc::clone(&monitor);
        let b = Arc::clone(&monitor);
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { a.heartbeat(ok(id)) }),
            tokio::spawn(async move { b.heartbeat(ok(id)) }),
        );
        assert!(r1.unwrap().is_ok());
        assert!(r2.unwrap().is_ok());

        sleep(Duration::from_millis(500)).await;
        assert!(sink.count_for(&id) <= 1);
        assert_eq!(monitor.armed_timers(), 1);
        assert_eq!(monitor.client(&id).unwrap().watch, WatchState::Watching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_twice_is_rejected_without_change() {
        let (monitor, _sink) = monitor_with(1);
        let id = monitor.register("alice", 30).unwrap();
        let before = monitor.client(&id).unwrap();

        let err = monitor.register("alice", 5).unwrap_err();
        assert_eq!(err, MonitorError::AlreadyRegistered(id));

        let after = monitor.client(&id).unwrap();
        assert_eq!(after.interval, before.interval);
        assert_eq!(after.last_checkin, before.last_checkin);
        assert_eq!(monitor.registry().len(), 1);
        assert_eq!(monitor.armed_timers(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_interval_is_rejected() {
        let (monitor, _sink) = monitor_with(1);
        assert_eq!(monitor.register("alice", 0), Err(MonitorError::InvalidInterval(0)));
        assert_eq!(monitor.register("alice", -3), Err(MonitorError::InvalidInterval(-3)));
        assert!(monitor.registry().is_empty());
        assert_eq!(monitor.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_status_halts_monitoring() {
        let (monitor, sink) = monitor_with(1);
        let id = monitor.register("alice", 1).unwrap();

        let record = monitor.heartbeat(Heartbeat::now(id, Status::Shutdown)).unwrap();
        assert_eq!(record.watch, WatchState::Stopped);
        assert_eq!(record.last_status, Status::Shutdown);

        sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.count(), 0);
        assert_eq!(monitor.armed_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_non_ok_status_stops_monitoring() {
        let (monitor, sink) = monitor_with(0);
        for (i, status) in [Status::Error, Status::Restart, Status::Other, Status::Shutdown].into_iter().enumerate() {
            let id = monitor.register(&format!("client-{i}"), 1).unwrap();
            monitor.heartbeat(Heartbeat::now(id, status)).unwrap();
        }

        sleep(Duration::from_secs(3)).await;
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_client_is_rejected_without_mutation() {
        let (monitor, _sink) = monitor_with(1);
        monitor.register("alice", 10).unwrap();

        let ghost = ClientId::from(Uuid::new_v4());
        let err = monitor.heartbeat(ok(ghost)).unwrap_err();
        assert_eq!(err, MonitorError::UnknownClient(ghost));
        assert_eq!(monitor.registry().len(), 1);
        assert_eq!(monitor.armed_timers(), 1);
        assert!(monitor.client(&ghost).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_failure_gives_independent_notification() {
        let (monitor, sink) = monitor_with(1);
        let id = monitor.register("alice", 1).unwrap();

        sleep(Duration::from_millis(2500)).await;
        assert_eq!(sink.count_for(&id), 1);
        assert_eq!(monitor.client(&id).unwrap().watch, WatchState::Failed);

        let record = monitor.heartbeat(ok(id)).unwrap();
        assert_eq!(record.watch, WatchState::Watching);
        assert_eq!(monitor.armed_timers(), 1);

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(sink.count_for(&id), 1);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(sink.count_for(&id), 2);
        assert_eq!(monitor.notifications_sent(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ok_after_shutdown_resumes_monitoring() {
        let (monitor, sink) = monitor_with(0);
        let id = monitor.register("alice", 2).unwrap();
        monitor.heartbeat(Heartbeat::now(id, Status::Restart)).unwrap();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.count(), 0);

        monitor.heartbeat(ok(id)).unwrap();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(sink.count_for(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrelated_clients_do_not_interfere() {
        let (monitor, sink) = monitor_with(0);
        let quiet = monitor.register("quiet", 1).unwrap();
        let chatty = monitor.register("chatty", 1).unwrap();

        for _ in 0..4 {
            sleep(Duration::from_millis(500)).await;
            monitor.heartbeat(ok(chatty)).unwrap();
        }

        assert_eq!(sink.count_for(&quiet), 1);
        assert_eq!(sink.count_for(&chatty), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_after_stop_keeps_stopped_state() {
        let (monitor, sink) = monitor_with(1);
        let id = monitor.register("alice", 60).unwrap();

        // le timer a déjà réclamé son entrée quand le SHUTDOWN arrive
        monitor.heartbeat(Heartbeat::now(id, Status::Shutdown)).unwrap();
        monitor.handle_expiry(Expiry {
            client_id: id,
            generation: 1,
            armed_at: tokio::time::Instant::now(),
        });

        assert_eq!(monitor.client(&id).unwrap().watch, WatchState::Stopped);
        assert_eq!(sink.count_for(&id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_loop_stops_with_monitor() {
        let (monitor, sink) = monitor_with(0);
        monitor.register("alice", 1).unwrap();
        drop(monitor);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(sink.count(), 0);
    }
}
