use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

use crate::powerwall::Token;

#[derive(Error, Debug)]
pub enum CredentialsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Credentials {
    pub email: Option<String>,
    pub password: Option<String>,
    pub token: Option<Token>,
}

/// Gateway login and session, persisted to `credentials.json`.
pub struct CredentialStore {
    path: PathBuf,
    current: Mutex<Credentials>,
}

impl CredentialStore {
    /// Loads `credentials.json` from `data_dir`, creating an empty one if missing.
    pub async fn load(data_dir: &Path) -> Result<Self, CredentialsError> {
        let path = data_dir.join("credentials.json");

        let current = match fs::read_to_string(&path).await {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("no credentials at {}, starting empty", path.display());
                let empty = Credentials::default();
                fs::create_dir_all(data_dir).await?;
                fs::write(&path, serde_json::to_string(&empty)?).await?;
                empty
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            current: Mutex::new(current),
        })
    }

    pub async fn get(&self) -> Credentials {
        self.current.lock().await.clone()
    }

    /// Applies `f`, writing the file only if something changed.
    pub async fn update<F>(&self, f: F) -> Result<Credentials, CredentialsError>
    where
        F: FnOnce(&mut Credentials),
    {
        let mut current = self.current.lock().await;
        let mut next = current.clone();
        f(&mut next);

        if next != *current {
            fs::write(&self.path, serde_json::to_string(&next)?).await?;
            debug!("wrote {}", self.path.display());
            *current = next;
        }
        Ok(current.clone())
    }
}
