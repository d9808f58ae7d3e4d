use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::error::NetResult;
use crate::network::service::CredentialStore;

/// Secrets keyed by ssid. Open networks are stored with an empty secret so
/// they still count as known.
type Secrets = BTreeMap<String, String>;

fn lock(secrets: &Mutex<Secrets>) -> MutexGuard<'_, Secrets> {
    // A poisoned map is still a valid map
    secrets.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-memory store, for tests and sessions that must not touch disk
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<Secrets>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let secrets = entries
            .into_iter()
            .map(|(ssid, secret)| (ssid.into(), secret.into()))
            .collect();
        Self {
            secrets: Mutex::new(secrets),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn known_networks(&self) -> HashSet<String> {
        lock(&self.secrets).keys().cloned().collect()
    }

    fn credential(&self, ssid: &str) -> Option<String> {
        lock(&self.secrets)
            .get(ssid)
            .filter(|s| !s.is_empty())
            .cloned()
    }

    fn save_credential(&self, ssid: &str, secret: &str) -> NetResult<()> {
        lock(&self.secrets).insert(ssid.to_string(), secret.to_string());
        Ok(())
    }

    fn clear_credential(&self, ssid: &str) -> NetResult<()> {
        lock(&self.secrets).remove(ssid);
        Ok(())
    }
}

/// JSON file store, rewritten in full on every mutation
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    secrets: Mutex<Secrets>,
}

impl FileCredentialStore {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unreadable one is an error.
    pub fn open(path: impl Into<PathBuf>) -> NetResult<Self> {
        let path = path.into();
        let secrets = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Secrets::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            Secrets::new()
        };
        info!(
            "Loaded {} saved network(s) from {}",
            secrets.len(),
            path.display()
        );
        Ok(Self {
            path,
            secrets: Mutex::new(secrets),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, secrets: &Secrets) -> NetResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(secrets)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!("Credential store written to {}", self.path.display());
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn known_networks(&self) -> HashSet<String> {
        lock(&self.secrets).keys().cloned().collect()
    }

    fn credential(&self, ssid: &str) -> Option<String> {
        lock(&self.secrets)
            .get(ssid)
            .filter(|s| !s.is_empty())
            .cloned()
    }

    fn save_credential(&self, ssid: &str, secret: &str) -> NetResult<()> {
        let mut secrets = lock(&self.secrets);
        secrets.insert(ssid.to_string(), secret.to_string());
        self.persist(&secrets)
    }

    fn clear_credential(&self, ssid: &str) -> NetResult<()> {
        let mut secrets = lock(&self.secrets);
        if secrets.remove(ssid).is_none() {
            return Ok(());
        }
        if let Err(e) = self.persist(&secrets) {
            warn!("Failed to persist removal of '{}': {}", ssid, e);
            return Err(e);
        }
        Ok(())
    }
}
