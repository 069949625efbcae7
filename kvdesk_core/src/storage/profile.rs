use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::errors::CoreError;

/// A named connection preset.
///
/// JSON looks like:
/// `{ "id":"prod", "name":"Production", "host":"10.0.0.5", "port":6379,
///    "credentialRef":"prod-redis", "createdAt":"2024-05-01T10:00:00Z" }`
///
/// The password itself never appears here; `credential_ref` names an entry
/// in a [`CredentialVault`](super::credentials::CredentialVault).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_port() -> u16 {
    6379
}

impl ConnectionProfile {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            host: host.into(),
            port,
            credential_ref: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_credential_ref(mut self, credential_ref: impl Into<String>) -> Self {
        self.credential_ref = Some(credential_ref.into());
        self
    }

    /// `id`, `name` and `host` must be non-blank and `port` non-zero.
    pub fn validate(&self) -> Result<(), CoreError> {
        for (field, value) in [("id", &self.id), ("name", &self.name), ("host", &self.host)] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidInput(format!(
                    "profile '{}' is missing `{}`",
                    self.id, field
                )));
            }
        }
        if self.port == 0 {
            return Err(CoreError::InvalidInput(format!(
                "profile '{}' has port 0",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_deserialize_as_invalid_profile() {
        let p: ConnectionProfile =
            serde_json::from_str(r#"{"id":"a","name":"A"}"#).expect("lenient decode");
        assert_eq!(p.port, 6379);
        assert!(matches!(p.validate(), Err(CoreError::InvalidInput(msg)) if msg.contains("host")));
    }

    #[test]
    fn camel_case_round_trip_keeps_credential_ref() {
        let p = ConnectionProfile::new("a", "A", "localhost", 6380).with_credential_ref("vault-a");
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("\"credentialRef\":\"vault-a\""));
        assert!(json.contains("\"createdAt\""));
        let back: ConnectionProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
