//! Server credentials: record types, the credential store, and the batch
//! re-encryption used by vault transitions

pub(crate) mod rekey;
mod store;
mod types;

pub use store::CredentialStore;
pub use types::{ClearedField, CredentialKind, FieldRef, ServerId, ServerInput, ServerRecord, DEFAULT_PORT};
