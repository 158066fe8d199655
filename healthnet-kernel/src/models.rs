/**
 * MODELS - Types de données du kernel HealthNet
 *
 * RÔLE : Identifiants déterministes (réseau, client), intervalle validé,
 * statuts de heartbeat et fiche client détenue par le registre.
 *
 * Les horodatages sont toujours calculés au site d'appel (jamais une valeur
 * par défaut partagée entre instances).
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifiant d'un réseau logique : UUIDv5(NAMESPACE_DNS, nom du réseau)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkId(Uuid);

impl NetworkId {
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifiant stable d'un client : UUIDv5(id réseau, nom du client).
/// Le même nom dans le même réseau donne toujours le même id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn derive(network: &NetworkId, name: &str) -> Self {
        Self(Uuid::new_v5(network.as_uuid(), name.as_bytes()))
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Période de heartbeat en secondes, strictement positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Interval(NonZeroU64);

impl Interval {
    /// Valide une valeur brute venant du transport. `None` si <= 0.
    pub fn from_secs(secs: i64) -> Option<Self> {
        u64::try_from(secs).ok().and_then(NonZeroU64::new).map(Self)
    }

    pub fn secs(&self) -> u64 {
        self.0.get()
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.0.get())
    }
}

/// Intervalle par défaut quand la requête d'enregistrement n'en fournit pas (5 minutes)
pub const DEFAULT_INTERVAL_SECS: i64 = 60 * 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    Ok,
    Error,
    Shutdown,
    Restart,
    Registered,
    Other,
}

impl Status {
    /// Code numérique historique du protocole
    pub fn code(&self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::Error => 1,
            Status::Shutdown => 2,
            Status::Restart => 3,
            Status::Registered => 250,
            Status::Other => 254,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

/// État du protocole de détection pour un client enregistré
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    /// Un timer watchdog est armé, on attend le prochain heartbeat
    Watching,
    /// Le client a annoncé un statut non-OK, plus de surveillance
    Stopped,
    /// Échéance manquée, notification émise
    Failed,
}

/// Événement heartbeat entrant, consommé une seule fois
#[derive(Debug, Clone)]
pub struct Heartbeat {
    pub client_id: ClientId,
    pub timestamp: OffsetDateTime,
    pub status: Status,
}

impl Heartbeat {
    pub fn now(client_id: ClientId, status: Status) -> Self {
        Self {
            client_id,
            timestamp: OffsetDateTime::now_utc(),
            status,
        }
    }
}

/// Fiche d'un client surveillé, détenue exclusivement par le registre
#[derive(Debug, Clone, Serialize)]
pub struct ClientRecord {
    pub id: ClientId,
    pub name: String,
    pub network: NetworkId,
    pub interval: Interval,
    #[serde(with = "time::serde::rfc3339")]
    pub last_checkin: OffsetDateTime,
    pub last_status: Status,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
    pub watch: WatchState,
}

impl ClientRecord {
    pub fn new(network: NetworkId, name: &str, interval: Interval) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: ClientId::derive(&network, name),
            name: name.to_string(),
            network,
            interval,
            last_checkin: now,
            last_status: Status::Registered,
            registered_at: now,
            watch: WatchState::Watching,
        }
    }
}

// Messages HTTP (client → kernel)
#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    pub client_name: String,
    #[serde(default = "default_interval")]
    pub interval: i64,
}

fn default_interval() -> i64 {
    DEFAULT_INTERVAL_SECS
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegistrationResponse {
    pub machine_id: ClientId,
}

/// Statuts qu'un client peut annoncer ; `REGISTERED` est réservé au kernel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeartbeatStatus {
    #[default]
    Ok,
    Error,
    Shutdown,
    Restart,
    Other,
}

impl From<HeartbeatStatus> for Status {
    fn from(status: HeartbeatStatus) -> Self {
        match status {
            HeartbeatStatus::Ok => Status::Ok,
            HeartbeatStatus::Error => Status::Error,
            HeartbeatStatus::Shutdown => Status::Shutdown,
            HeartbeatStatus::Restart => Status::Restart,
            HeartbeatStatus::Other => Status::Other,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub machine_id: ClientId,
    #[serde(default)]
    pub status: HeartbeatStatus,
}
