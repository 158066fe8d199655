/**
 * NOTIFICATIONS - Signal émis quand un client manque son échéance
 *
 * RÔLE : Point de sortie du détecteur de pannes. Le kernel appelle
 * `notify` une seule fois par échéance manquée, sans attendre ni réessayer :
 * livraison « au plus une fois ». Une erreur côté sink n'est jamais visible
 * du cœur.
 *
 * IMPLÉMENTATIONS :
 * - LogSink  : événement tracing niveau WARN
 * - MqttSink : publication JSON QoS 0 sur le bus (try_publish, non bloquant)
 */

use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::models::{ClientId, ClientRecord, NetworkId};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{error, info, warn};

/// Contexte d'une échéance manquée
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub client_id: ClientId,
    pub name: String,
    pub network: NetworkId,
    pub interval_secs: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_checkin: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub missed_at: OffsetDateTime,
}

impl Notification {
    pub fn missed(record: &ClientRecord, missed_at: OffsetDateTime) -> Self {
        Self {
            client_id: record.id,
            name: record.name.clone(),
            network: record.network,
            interval_secs: record.interval.secs(),
            last_checkin: record.last_checkin,
            missed_at,
        }
    }
}

/// Collaborateur externe invoqué sur détection de panne.
/// Ne doit pas bloquer : appelé depuis la boucle d'expiration du moniteur.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: &Notification);
}

pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, n: &Notification) {
        warn!(
            client_id = %n.client_id,
            client = %n.name,
            interval_secs = n.interval_secs,
            last_checkin = %n.last_checkin,
            "client missed its heartbeat deadline"
        );
    }
}

pub struct MqttSink {
    client: AsyncClient,
    topic: String,
}

impl MqttSink {
    /// Crée le client MQTT et démarre la boucle d'événements en tâche de fond
    pub fn connect(conf: &MqttConf, health_tracker: HealthTracker) -> Self {
        let mut opts = MqttOptions::new("healthnet-kernel-notify", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));

        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        health_tracker.mark_mqtt_connecting();
        info!(host = %conf.host, port = conf.port, topic = %conf.topic, "mqtt notification sink enabled");

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                        health_tracker.mark_mqtt_connected();
                        info!("mqtt connected");
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        health_tracker.mark_mqtt_disconnected();
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt connection error");
                        health_tracker.increment_reconnects();
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self {
            client,
            topic: conf.topic.clone(),
        }
    }
}

impl NotificationSink for MqttSink {
    fn notify(&self, n: &Notification) {
        LogSink.notify(n);

        let payload = match serde_json::to_vec(n) {
            Ok(p) => p,
            Err(e) => {
                error!(client_id = %n.client_id, error = %e, "failed to encode notification");
                return;
            }
        };
        if let Err(e) = self.client.try_publish(self.topic.as_str(), QoS::AtMostOnce, false, payload) {
            warn!(client_id = %n.client_id, error = %e, "failed to queue mqtt notification");
        }
    }
}

/// Sink de test : mémorise chaque notification reçue
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    seen: parking_lot::Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn count_for(&self, client_id: &ClientId) -> usize {
        self.seen.lock().iter().filter(|n| &n.client_id == client_id).count()
    }
}

#[cfg(test)]
impl NotificationSink for RecordingSink {
    fn notify(&self, notification: &Notification) {
        self.seen.lock().push(notification.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Interval;

    #[test]
    fn test_notification_payload() {
        let network = NetworkId::from_name("healthnet");
        let record = ClientRecord::new(network, "alice", Interval::from_secs(30).unwrap());
        let n = Notification::missed(&record, OffsetDateTime::now_utc());

        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["client_id"], record.id.to_string());
        assert_eq!(json["name"], "alice");
        assert_eq!(json["interval_secs"], 30);
        assert!(json["missed_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_recording_sink_counts_per_client() {
        let network = NetworkId::from_name("healthnet");
        let interval = Interval::from_secs(1).unwrap();
        let a = ClientRecord::new(network, "alice", interval);
        let b = ClientRecord::new(network, "bob", interval);

        let sink = RecordingSink::default();
        sink.notify(&Notification::missed(&a, OffsetDateTime::now_utc()));
        sink.notify(&Notification::missed(&a, OffsetDateTime::now_utc()));
        sink.notify(&Notification::missed(&b, OffsetDateTime::now_utc()));
        assert_eq!(sink.count(), 3);
        assert_eq!(sink.count_for(&a.id), 2);
    }
}
