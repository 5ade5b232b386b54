//! Batch transforms over every credential field
//!
//! Each `plan_*` function reads the records and computes the new field values
//! without touching them. `apply` then writes the whole batch in one pass, so
//! the document is never left half-migrated by a failure in the middle.

use tracing::{debug, warn};
use zeroize::Zeroizing;

use super::types::{ClearedField, CredentialKind, FieldRef, ServerId, ServerRecord};
use crate::crypto::{decrypt_string, encrypt_string, MasterKey};
use crate::error::Result;

/// New value for one field
#[derive(Debug)]
pub(crate) struct FieldUpdate {
    pub server_id: ServerId,
    pub kind: CredentialKind,
    pub value: Option<String>,
    pub encrypted: bool,
}

/// Outcome of planning a batch
#[derive(Debug, Default)]
pub(crate) struct RekeyPlan {
    pub updates: Vec<FieldUpdate>,
    /// Fields whose envelope could not be opened with the supplied key
    pub unrecoverable: Vec<FieldRef>,
    /// Fields the plan deliberately leaves as they are
    pub untouched: usize,
    /// Envelopes successfully opened back to plaintext
    pub opened: usize,
    /// Unrecoverable envelopes the plan removes from the document
    pub cleared: Vec<ClearedField>,
}

impl RekeyPlan {
    fn push(&mut self, server: &ServerRecord, kind: CredentialKind, value: Option<String>, encrypted: bool) {
        self.updates.push(FieldUpdate {
            server_id: server.id,
            kind,
            value,
            encrypted,
        });
    }

    fn unrecoverable(&mut self, server: &ServerRecord, kind: CredentialKind) {
        let field = server.field_ref(kind);
        warn!("Could not decrypt {}", field);
        self.unrecoverable.push(field);
    }
}

fn stored_value(server: &ServerRecord, kind: CredentialKind) -> Option<&str> {
    server.credential(kind).filter(|v| !v.is_empty())
}

/// Encrypt every plaintext secret. Fields already marked encrypted are left
/// alone, so a partially sealed document is never double-encrypted.
pub(crate) fn plan_seal(servers: &[ServerRecord], key: &MasterKey) -> Result<RekeyPlan> {
    let mut plan = RekeyPlan::default();

    for server in servers {
        for kind in CredentialKind::ALL {
            if server.is_encrypted(kind) {
                plan.untouched += 1;
                continue;
            }
            if let Some(plaintext) = stored_value(server, kind) {
                let envelope = encrypt_string(plaintext, key)?;
                plan.push(server, kind, Some(envelope), true);
            }
        }
    }

    debug!("Seal plan: {} fields to encrypt", plan.updates.len());
    Ok(plan)
}

/// Re-encrypt every sealed field from `current` to `next`. Fields that do not
/// open with `current` keep their old envelope and are reported.
pub(crate) fn plan_rotation(
    servers: &[ServerRecord],
    current: &MasterKey,
    next: &MasterKey,
) -> Result<RekeyPlan> {
    let mut plan = RekeyPlan::default();

    for server in servers {
        for kind in CredentialKind::ALL {
            if !server.is_encrypted(kind) {
                continue;
            }
            let Some(envelope) = stored_value(server, kind) else {
                continue;
            };
            match decrypt_string(envelope, current) {
                Ok(plaintext) => {
                    let plaintext = Zeroizing::new(plaintext);
                    let resealed = encrypt_string(&plaintext, next)?;
                    plan.push(server, kind, Some(resealed), true);
                }
                Err(_) => plan.unrecoverable(server, kind),
            }
        }
    }

    debug!("Rotation plan: {} fields to re-encrypt", plan.updates.len());
    Ok(plan)
}

/// Decrypt every sealed field back to plaintext. With `discard_unrecoverable`
/// a field that cannot be opened is cleared instead of kept.
pub(crate) fn plan_unseal(
    servers: &[ServerRecord],
    key: &MasterKey,
    discard_unrecoverable: bool,
) -> RekeyPlan {
    let mut plan = RekeyPlan::default();

    for server in servers {
        for kind in CredentialKind::ALL {
            if !server.is_encrypted(kind) {
                continue;
            }
            let Some(envelope) = stored_value(server, kind) else {
                // Flag without a value: just clear the flag
                plan.push(server, kind, None, false);
                continue;
            };
            match decrypt_string(envelope, key) {
                Ok(plaintext) => {
                    plan.opened += 1;
                    plan.push(server, kind, Some(plaintext), false);
                }
                Err(_) => {
                    plan.unrecoverable(server, kind);
                    if discard_unrecoverable {
                        plan.cleared.push(ClearedField {
                            field: server.field_ref(kind),
                            envelope: envelope.to_string(),
                        });
                        plan.push(server, kind, None, false);
                    }
                }
            }
        }
    }

    debug!("Unseal plan: {} fields to decrypt", plan.updates.len());
    plan
}

/// Write a planned batch into the records
pub(crate) fn apply(servers: &mut [ServerRecord], updates: Vec<FieldUpdate>) {
    for update in updates {
        if let Some(server) = servers.iter_mut().find(|s| s.id == update.server_id) {
            server.set_credential(update.kind, update.value, update.encrypted);
        }
    }
}
