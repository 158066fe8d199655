/**
 * WATCHDOG - Planificateur des échéances de vivacité, un timer par client
 *
 * RÔLE :
 * Pour chaque client surveillé, maintient UNE SEULE échéance en attente
 * (intervalle + période de grâce). À l'expiration sans annulation, émet
 * exactement un événement `Expiry` vers le protocole de détection.
 *
 * FONCTIONNEMENT :
 * - Table `client_id -> TimerEntry { generation, token }` (DashMap shardée)
 * - Chaque armement spawn une tâche tokio légère qui dort en deux phases
 *   (intervalle puis grâce), le token d'annulation étant vérifié avant
 *   chaque attente et pendant l'attente
 * - Juste avant de tirer, la tâche « réclame » son entrée : retrait atomique
 *   de la table seulement si la génération est toujours la sienne
 * - `disarm` retire l'entrée puis annule le token
 *
 * GARANTIE : la réclamation et l'annulation sont deux opérations sur la même
 * entrée de la table, une seule des deux peut gagner. Un timer remplacé ou
 * désarmé ne peut donc jamais tirer, et un timer qui a réclamé son entrée
 * tire toujours jusqu'au bout.
 */

use crate::models::ClientId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Phase d'attente d'un timer, utile pour les logs uniquement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerPhase {
    Interval,
    Grace,
}

/// Événement émis quand une échéance expire sans annulation
#[derive(Debug, Clone)]
pub struct Expiry {
    pub client_id: ClientId,
    pub generation: u64,
    pub armed_at: Instant,
}

struct TimerEntry {
    generation: u64,
    token: CancellationToken,
}

type TimerTable = Arc<DashMap<ClientId, TimerEntry>>;

pub struct Watchdog {
    timers: TimerTable,
    grace: Duration,
    next_generation: AtomicU64,
    expiries: mpsc::UnboundedSender<Expiry>,
}

impl Watchdog {
    /// Crée un planificateur et le récepteur de ses expirations
    pub fn new(grace: Duration) -> (Self, mpsc::UnboundedReceiver<Expiry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watchdog = Self {
            timers: Arc::new(DashMap::new()),
            grace,
            next_generation: AtomicU64::new(0),
            expiries: tx,
        };
        (watchdog, rx)
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// (Ré)arme l'échéance de `client_id` : `interval + grace` à partir de maintenant.
    /// Un timer existant est remplacé et ne pourra plus tirer.
    /// Retourne la génération du nouveau timer.
    pub fn arm(&self, client_id: ClientId, interval: Duration) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let entry = TimerEntry {
            generation,
            token: token.clone(),
        };

        match self.timers.entry(client_id) {
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(entry);
                previous.token.cancel();
                debug!(%client_id, superseded = previous.generation, generation, "watchdog re-armed");
            }
            Entry::Vacant(slot) => {
                slot.insert(entry);
                debug!(%client_id, generation, "watchdog armed");
            }
        }

        let timer = WatchdogTimer {
            client_id,
            generation,
            token,
            interval,
            grace: self.grace,
            armed_at: Instant::now(),
            timers: Arc::clone(&self.timers),
            expiries: self.expiries.clone(),
        };
        tokio::spawn(timer.run());
        generation
    }

    /// Annule le timer en attente ; no-op s'il n'y en a pas.
    /// Retourne true si un timer a effectivement été retiré.
    pub fn disarm(&self, client_id: &ClientId) -> bool {
        match self.timers.remove(client_id) {
            Some((_, entry)) => {
                entry.token.cancel();
                debug!(%client_id, generation = entry.generation, "watchdog disarmed");
                true
            }
            None => false,
        }
    }

    /// Équivalent de `disarm` suivi de `arm`, appelé à chaque heartbeat OK
    pub fn refresh(&self, client_id: ClientId, interval: Duration) -> u64 {
        self.disarm(&client_id);
        self.arm(client_id, interval)
    }

    pub fn is_armed(&self, client_id: &ClientId) -> bool {
        self.timers.contains_key(client_id)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }

    /// Annule tous les timers en attente
    pub fn shutdown(&self) {
        self.timers.retain(|_, entry| {
            entry.token.cancel();
            false
        });
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Unité de travail planifiée pour un client
struct WatchdogTimer {
    client_id: ClientId,
    generation: u64,
    token: CancellationToken,
    interval: Duration,
    grace: Duration,
    armed_at: Instant,
    timers: TimerTable,
    expiries: mpsc::UnboundedSender<Expiry>,
}

impl WatchdogTimer {
    async fn run(self) {
        if !self.wait(TimerPhase::Interval, self.interval).await {
            return;
        }
        if !self.wait(TimerPhase::Grace, self.grace).await {
            return;
        }
        self.fire();
    }

    /// Attend `duration` ; false si le timer a été annulé avant ou pendant l'attente
    async fn wait(&self, phase: TimerPhase, duration: Duration) -> bool {
        if self.token.is_cancelled() {
            debug!(client_id = %self.client_id, generation = self.generation, ?phase, "watchdog cancelled before wait");
            return false;
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(client_id = %self.client_id, generation = self.generation, ?phase, "watchdog cancelled");
                false
            }
            _ = sleep(duration) => {
                debug!(client_id = %self.client_id, generation = self.generation, ?phase, "watchdog phase elapsed");
                true
            }
        }
    }

    fn fire(self) {
        let generation = self.generation;
        let claimed = self
            .timers
            .remove_if(&self.client_id, |_, entry| {
                entry.generation == generation && !entry.token.is_cancelled()
            })
            .is_some();

        if !claimed {
            debug!(client_id = %self.client_id, generation, "watchdog superseded at firing instant");
            return;
        }

        info!(
            client_id = %self.client_id,
            generation,
            waited_ms = self.armed_at.elapsed().as_millis() as u64,
            "watchdog deadline missed"
        );
        let expiry = Expiry {
            client_id: self.client_id,
            generation,
            armed_at: self.armed_at,
        };
        if self.expiries.send(expiry).is_err() {
            debug!(client_id = %self.client_id, "expiry receiver gone, dropping event");
        }
    }
}
