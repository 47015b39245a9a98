use crate::models::Credential;
use anyhow::{Context, Result};
use keyring::Entry;
use std::sync::Mutex;

const APP_NAME: &str = "gmail-uploader";
const TOKEN_KEY: &str = "gmail_uploader_token";

/// Durable storage for the raw bearer token. One key, one value.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, token: &str) -> Result<()>;
    fn remove(&self) -> Result<()>;
}

/// Token kept in the OS keyring so a session survives restarts.
pub struct RingStore;

impl RingStore {
    fn entry(&self) -> Result<Entry> {
        Entry::new(APP_NAME, TOKEN_KEY).map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
    }
}

impl CredentialStore for RingStore {
    fn load(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }

    fn save(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .map_err(|e| anyhow::anyhow!("Keyring error: {}", e))
    }

    fn remove(&self) -> Result<()> {
        match self.entry()?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(anyhow::anyhow!("Keyring error: {}", e)),
        }
    }
}

/// Session-only storage; nothing outlives the process.
#[derive(Default)]
pub struct MemoryStore {
    token: Mutex<Option<String>>,
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self.token.lock().map(|t| t.clone()).unwrap_or_default())
    }

    fn save(&self, token: &str) -> Result<()> {
        if let Ok(mut slot) = self.token.lock() {
            *slot = Some(token.to_string());
        }
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if let Ok(mut slot) = self.token.lock() {
            *slot = None;
        }
        Ok(())
    }
}

/// Owner of the active credential.
///
/// Readers get a clone at call time; a concurrent `clear` does not affect
/// requests that already picked up the old value.
pub struct Session {
    current: Mutex<Option<Credential>>,
    store: Box<dyn CredentialStore>,
}

impl Session {
    /// Creates a session and restores any previously persisted token.
    pub fn restore(store: Box<dyn CredentialStore>) -> Self {
        let current = match store.load() {
            Ok(token) => token.and_then(Credential::new),
            Err(e) => {
                tracing::warn!("Could not restore saved session: {:#}", e);
                None
            }
        };

        if current.is_some() {
            tracing::debug!("Restored saved session");
        }

        Self {
            current: Mutex::new(current),
            store,
        }
    }

    pub fn get(&self) -> Option<Credential> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.get().is_some()
    }

    /// Replaces the active credential. The in-memory value is updated even
    /// when persisting it fails.
    pub fn set(&self, credential: Credential) -> Result<()> {
        let token = credential.as_str().to_string();
        if let Ok(mut current) = self.current.lock() {
            *current = Some(credential);
        }
        self.store
            .save(&token)
            .context("Failed to persist access token")
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.lock() {
            *current = None;
        }
        if let Err(e) = self.store.remove() {
            tracing::warn!("Failed to remove persisted token: {:#}", e);
        }
        tracing::info!("Session cleared");
    }
}
