use std::collections::HashMap;
use std::sync::RwLock;

use log::debug;

use crate::core::errors::CoreError;

/// Resolves a profile's `credential_ref` to a password.
pub trait CredentialVault: Send + Sync {
    /// `Ok(None)` when nothing is stored under `credential_ref`.
    fn password(&self, credential_ref: &str) -> Result<Option<String>, CoreError>;
    fn store(&self, credential_ref: &str, password: &str) -> Result<(), CoreError>;
    fn forget(&self, credential_ref: &str) -> Result<(), CoreError>;
}

/// Keeps passwords in the OS keychain under the `kvdesk` service.
#[derive(Debug, Clone)]
pub struct KeyringVault {
    service: String,
}

impl Default for KeyringVault {
    fn default() -> Self {
        Self::new("kvdesk")
    }
}

impl KeyringVault {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, credential_ref: &str) -> Result<keyring::Entry, CoreError> {
        keyring::Entry::new(&self.service, credential_ref)
            .map_err(|e| CoreError::Storage(format!("keyring: {e}")))
    }
}

impl CredentialVault for KeyringVault {
    fn password(&self, credential_ref: &str) -> Result<Option<String>, CoreError> {
        match self.entry(credential_ref)?.get_password() {
            Ok(pw) => Ok(Some(pw)),
            Err(keyring::Error::NoEntry) => {
                debug!("No keyring entry for '{}'", credential_ref);
                Ok(None)
            }
            Err(e) => Err(CoreError::Storage(format!("keyring: {e}"))),
        }
    }

    fn store(&self, credential_ref: &str, password: &str) -> Result<(), CoreError> {
        self.entry(credential_ref)?
            .set_password(password)
            .map_err(|e| CoreError::Storage(format!("keyring: {e}")))
    }

    fn forget(&self, credential_ref: &str) -> Result<(), CoreError> {
        match self.entry(credential_ref)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(CoreError::Storage(format!("keyring: {e}"))),
        }
    }
}

/// Process-local vault, used by tests and by callers without a keychain.
#[derive(Debug, Default)]
pub struct MemoryVault {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialVault for MemoryVault {
    fn password(&self, credential_ref: &str) -> Result<Option<String>, CoreError> {
        let secrets = self.secrets.read().unwrap_or_else(|e| e.into_inner());
        Ok(secrets.get(credential_ref).cloned())
    }

    fn store(&self, credential_ref: &str, password: &str) -> Result<(), CoreError> {
        let mut secrets = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        secrets.insert(credential_ref.to_string(), password.to_string());
        Ok(())
    }

    fn forget(&self, credential_ref: &str) -> Result<(), CoreError> {
        let mut secrets = self.secrets.write().unwrap_or_else(|e| e.into_inner());
        secrets.remove(credential_ref);
        Ok(())
    }
}
