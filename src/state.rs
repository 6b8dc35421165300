use std::sync::{Arc, atomic::AtomicBool};

use thiserror::Error;
use tokio::sync::{Notify, broadcast};
use tracing::info;

use crate::{
    config::SolarLinkConfig,
    credentials::{CredentialStore, CredentialsError},
    datalog::LogStore,
    powerwall::{Powerwall, PowerwallError},
};

const CLIENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Error, Debug)]
pub enum InitError {
    #[error("credentials: {0}")]
    Credentials(#[from] CredentialsError),
    #[error("powerwall client: {0}")]
    Powerwall(#[from] PowerwallError),
}

pub struct SolarLinkState {
    pub cfg: SolarLinkConfig,
    pub logs: LogStore,
    pub credentials: CredentialStore,
    pub powerwall: Powerwall,
    /// `prefix:json` messages for every connected websocket
    pub clients: broadcast::Sender<String>,
    /// log the next poll regardless of the log window
    pub log_next: AtomicBool,
    /// wakes the poll loop for an immediate poll
    pub restart: Notify,
}

impl SolarLinkState {
    pub async fn init(cfg: SolarLinkConfig) -> Result<Arc<Self>, InitError> {
        info!("initializing state in {}", cfg.data_dir.display());

        let (clients, _) = broadcast::channel(CLIENT_CHANNEL_CAPACITY);

        Ok(Arc::new(Self {
            logs: LogStore::new(&cfg.data_dir),
            credentials: CredentialStore::load(&cfg.data_dir).await?,
            powerwall: Powerwall::new(&cfg.powerwall_url, cfg.accept_invalid_certs)?,
            clients,
            log_next: AtomicBool::new(false),
            restart: Notify::new(),
            cfg,
        }))
    }

    /// Sends `prefix:data` to every websocket client.
    pub fn broadcast(&self, prefix: &str, data: &str) {
        // no subscribers is not an error
        let _ = self.clients.send(format!("{prefix}:{data}"));
    }
}
