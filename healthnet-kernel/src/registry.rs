/**
 * REGISTRY - Ensemble canonique des clients connus d'un réseau
 *
 * RÔLE : Structure de données pure, sans logique de timing.
 * Création idempotente (jamais d'écrasement), application des heartbeats,
 * lecture.
 *
 * CONCURRENCE : DashMap shardée, chaque mise à jour d'une fiche est atomique
 * et n'est jamais entrelacée avec une autre mise à jour de la même fiche.
 * Les variantes `*_with` exécutent une closure pendant que l'entrée est
 * encore tenue : c'est ce qui permet au protocole d'appliquer
 * « mise à jour registre + action watchdog » comme une seule unité par client.
 */

use crate::models::{ClientId, ClientRecord, Heartbeat, Interval, NetworkId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("client not found: {0}")]
    NotFound(ClientId),
}

/// Résultat d'un enregistrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub client_id: ClientId,
    /// false si l'id existait déjà (la fiche existante n'est pas modifiée)
    pub created: bool,
}

pub struct NetworkRegistry {
    name: String,
    id: NetworkId,
    clients: DashMap<ClientId, ClientRecord>,
}

impl NetworkRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id: NetworkId::from_name(name),
            clients: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> NetworkId {
        self.id
    }

    pub fn client_id(&self, client_name: &str) -> ClientId {
        ClientId::derive(&self.id, client_name)
    }

    pub fn register(&self, client_name: &str, interval: Interval) -> Registration {
        self.register_with(client_name, interval, |_| ())
    }

    /// Enregistre un client ; `on_created` tourne sur la nouvelle fiche
    /// avant que l'entrée ne soit relâchée. Jamais appelée si l'id existe déjà.
    pub fn register_with<F>(&self, client_name: &str, interval: Interval, on_created: F) -> Registration
    where
        F: FnOnce(&mut ClientRecord),
    {
        let client_id = self.client_id(client_name);
        match self.clients.entry(client_id) {
            Entry::Occupied(_) => Registration { client_id, created: false },
            Entry::Vacant(slot) => {
                let mut record = ClientRecord::new(self.id, client_name, interval);
                on_created(&mut record);
                slot.insert(record);
                Registration { client_id, created: true }
            }
        }
    }

    pub fn apply_heartbeat(&self, heartbeat: &Heartbeat) -> Result<ClientRecord, RegistryError> {
        self.apply_heartbeat_with(heartbeat, |_| ())
    }

    /// Applique le heartbeat puis `then` sur la fiche mise à jour, sous le même verrou
    pub fn apply_heartbeat_with<F>(&self, heartbeat: &Heartbeat, then: F) -> Result<ClientRecord, RegistryError>
    where
        F: FnOnce(&mut ClientRecord),
    {
        self.update(&heartbeat.client_id, |record| {
            record.last_checkin = heartbeat.timestamp;
            record.last_status = heartbeat.status;
            then(record);
            record.clone()
        })
    }

    /// Section critique générique sur une fiche
    pub fn update<R, F>(&self, client_id: &ClientId, f: F) -> Result<R, RegistryError>
    where
        F: FnOnce(&mut ClientRecord) -> R,
    {
        let mut record = self
            .clients
            .get_mut(client_id)
            .ok_or(RegistryError::NotFound(*client_id))?;
        Ok(f(record.value_mut()))
    }

    pub fn get(&self, client_id: &ClientId) -> Option<ClientRecord> {
        self.clients.get(client_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Copie de toutes les fiches, triée par nom
    pub fn snapshot(&self) -> Vec<ClientRecord> {
        let mut list: Vec<ClientRecord> = self.clients.iter().map(|r| r.value().clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}
