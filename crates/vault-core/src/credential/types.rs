//! Server record and credential field definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Server identifier (creation time in milliseconds)
pub type ServerId = u64;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// Which secret of a server record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialKind {
    /// SSH password
    Password,
    /// SSH private key (PEM/OpenSSH text)
    PrivateKey,
}

impl CredentialKind {
    /// Both credential fields of a record
    pub const ALL: [CredentialKind; 2] = [CredentialKind::Password, CredentialKind::PrivateKey];

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            CredentialKind::Password => "password",
            CredentialKind::PrivateKey => "private key",
        }
    }
}

/// Stored server record
///
/// Keys this crate does not model (ping state) are kept in `extra` so they
/// survive a load/save cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    pub id: ServerId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,

    /// Plaintext or envelope, depending on `password_encrypted`
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "passwordEncrypted")]
    pub password_encrypted: bool,

    /// Plaintext or envelope, depending on `private_key_encrypted`
    #[serde(default, rename = "privateKey")]
    pub private_key: Option<String>,
    #[serde(default, rename = "privateKeyEncrypted")]
    pub private_key_encrypted: bool,

    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_connected_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerRecord {
    /// Stored value of a credential field
    pub fn credential(&self, kind: CredentialKind) -> Option<&str> {
        match kind {
            CredentialKind::Password => self.password.as_deref(),
            CredentialKind::PrivateKey => self.private_key.as_deref(),
        }
    }

    /// Whether a credential field holds an envelope
    pub fn is_encrypted(&self, kind: CredentialKind) -> bool {
        match kind {
            CredentialKind::Password => self.password_encrypted,
            CredentialKind::PrivateKey => self.private_key_encrypted,
        }
    }

    /// Replace a credential field together with its flag
    pub(crate) fn set_credential(&mut self, kind: CredentialKind, value: Option<String>, encrypted: bool) {
        match kind {
            CredentialKind::Password => {
                self.password = value;
                self.password_encrypted = encrypted;
            }
            CredentialKind::PrivateKey => {
                self.private_key = value;
                self.private_key_encrypted = encrypted;
            }
        }
    }

    /// Reference to one of this record's fields, for reports
    pub fn field_ref(&self, kind: CredentialKind) -> FieldRef {
        FieldRef {
            server_id: self.id,
            server_name: self.name.clone(),
            kind,
        }
    }
}

/// Identifies one credential field of one server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    pub server_id: ServerId,
    pub server_name: String,
    pub kind: CredentialKind,
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (#{}) {}", self.server_name, self.server_id, self.kind.label())
    }
}

/// An envelope removed from the document because no known key opens it.
/// Kept so the value is not lost with the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearedField {
    pub field: FieldRef,
    pub envelope: String,
}

/// Caller-supplied server fields for create/update. Secrets are plaintext.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInput {
    pub name: Option<String>,
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub color: Option<String>,
}

impl ServerInput {
    /// Display name, defaulting to `user@host`
    pub fn display_name(&self) -> String {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("{}@{}", self.username, self.host),
        }
    }

    /// Plaintext secret for a field; empty strings count as absent
    pub fn secret(&self, kind: CredentialKind) -> Option<&str> {
        let value = match kind {
            CredentialKind::Password => self.password.as_deref(),
            CredentialKind::PrivateKey => self.private_key.as_deref(),
        };
        value.filter(|v| !v.is_empty())
    }
}

impl std::fmt::Debug for ServerInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInput")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("private_key", &self.private_key.as_ref().map(|_| "[REDACTED]"))
            .field("color", &self.color)
            .finish()
    }
}
