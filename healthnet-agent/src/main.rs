//! HealthNet Agent - liveness reporter for the HealthNet kernel
//!
//! This agent keeps one machine visible to the kernel's failure detector:
//! - Registration under a client name, with the machine id kept on disk
//! - Periodic `OK` heartbeats at the configured interval
//! - Re-registration when the kernel no longer knows the machine id
//! - A final `SHUTDOWN` heartbeat on Ctrl-C so the kernel stops watching

mod client;
mod config;
mod storage;

use anyhow::{bail, Context, Result};
use client::{HeartbeatOutcome, KernelClient, RegisterOutcome, RegistrationRequest, Status};
use config::AgentConfig;
use std::time::Duration;
use storage::MachineIdStore;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Main agent state
struct Agent {
    config: AgentConfig,
    client: KernelClient,
    store: MachineIdStore,
    machine_id: Option<Uuid>,
}

impl Agent {
    async fn new() -> Result<Self> {
        let config = AgentConfig::load().await.context("Failed to load agent configuration")?;
        let base_url = config.server.base_url()?;
        let client = KernelClient::new(&base_url)?;
        let store = MachineIdStore::default_for(&config.client.name)?;

        info!(
            client = %config.client.name,
            kernel = %base_url,
            interval_secs = config.client.interval_secs,
            "agent initialized"
        );

        Ok(Agent {
            config,
            client,
            store,
            machine_id: None,
        })
    }

    /// Register with the kernel and settle on a machine id
    async fn register(&mut self) -> Result<Uuid> {
        let request = RegistrationRequest::new(&self.config.client.name, self.config.client.interval_secs);
        let outcome = self.client.register(&request).await?;
        let stored = self.store.load().await?;

        let id = resolve_machine_id(outcome, stored)?;
        if let RegisterOutcome::Registered(_) = outcome {
            self.store.save(id).await?;
            info!(machine_id = %id, "registered with kernel");
        } else {
            info!(machine_id = %id, "already registered, reusing stored machine id");
        }

        self.machine_id = Some(id);
        Ok(id)
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let id = match self.machine_id {
            Some(id) => id,
            None => self.register().await?,
        };

        match self.client.heartbeat(id, Status::Ok).await? {
            HeartbeatOutcome::Accepted => debug!(machine_id = %id, "heartbeat sent"),
            HeartbeatOutcome::UnknownClient => {
                warn!(machine_id = %id, "kernel does not know this machine, registering again");
                self.machine_id = None;
                self.register().await?;
            }
        }
        Ok(())
    }

    async fn announce_shutdown(&self) {
        let Some(id) = self.machine_id else {
            return;
        };
        match self.client.heartbeat(id, Status::Shutdown).await {
            Ok(HeartbeatOutcome::Accepted) => info!(machine_id = %id, "shutdown reported to kernel"),
            Ok(HeartbeatOutcome::UnknownClient) => warn!(machine_id = %id, "kernel did not know this machine"),
            Err(e) => error!("Failed to report shutdown: {e:#}"),
        }
    }

    async fn run(&mut self) -> Result<()> {
        self.register().await?;

        let mut heartbeat_timer = interval(Duration::from_secs(self.config.client.interval_secs));
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat_timer.tick() => {
                    if let Err(e) = self.send_heartbeat().await {
                        error!("Failed to send heartbeat: {e:#}");
                    }
                }

                res = tokio::signal::ctrl_c() => {
                    if let Err(e) = res {
                        error!("Failed to listen for ctrl-c: {e}");
                    }
                    info!("shutdown requested");
                    self.announce_shutdown().await;
                    return Ok(());
                }
            }
        }
    }
}

/// A conflict means the kernel already holds our id; only the stored copy can recover it
fn resolve_machine_id(outcome: RegisterOutcome, stored: Option<Uuid>) -> Result<Uuid> {
    match (outcome, stored) {
        (RegisterOutcome::Registered(id), _) => Ok(id),
        (RegisterOutcome::AlreadyRegistered, Some(id)) => Ok(id),
        (RegisterOutcome::AlreadyRegistered, None) => {
            bail!("Client name already registered and no machine id stored locally")
        }
    }
}

fn init_logging() {
    let debug = std::env::var("HEALTHNET_DEBUG_LOGS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let fallback = if debug { "healthnet_agent=debug,info" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    info!("HealthNet agent starting");

    let mut agent = Agent::new().await.context("Failed to create agent")?;
    agent.run().await.context("Agent execution failed")?;

    Ok(())
}
