//! Password-based key derivation using PBKDF2-HMAC-SHA512

use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use tracing::warn;
use zeroize::Zeroizing;

use super::MasterKey;
use crate::error::{Result, VaultError};

/// Salt length in bytes
pub const SALT_LEN: usize = 32;

/// Encryption key length in bytes
pub const KEY_LEN: usize = 32;

/// Verification hash length in bytes
pub const HASH_LEN: usize = 64;

/// Default and minimum PBKDF2 iteration count for new vault keys
pub const DEFAULT_ITERATIONS: u32 = 100_000;

/// Appended to the salt for `VerifierFormat::Separated` hashes. Keeps the
/// stored hash independent of the encryption key derived from the bare salt.
const VERIFIER_CONTEXT: &[u8] = b"polarops-vault:verifier";

/// How a stored verification hash was derived
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifierFormat {
    /// PBKDF2 over the bare salt. The first 32 bytes of such a hash equal the
    /// encryption key, so it is only read, never written. Vaults carrying it
    /// move to `Separated` on the next password change.
    #[default]
    Legacy,
    /// PBKDF2 over the salt followed by a verifier context label
    Separated,
}

impl VerifierFormat {
    /// Format written by setup and password changes
    pub const CURRENT: Self = Self::Separated;

    /// Whether this is the bare-salt format
    pub fn is_legacy(&self) -> bool {
        *self == Self::Legacy
    }
}

/// Parameters for PBKDF2 key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDerivationParams {
    iterations: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

impl KeyDerivationParams {
    /// Parameters with a specific iteration count. Counts below
    /// `DEFAULT_ITERATIONS` are rejected.
    pub fn with_iterations(iterations: u32) -> Result<Self> {
        if iterations < DEFAULT_ITERATIONS {
            return Err(VaultError::KeyDerivationError(format!(
                "iteration count {} is below the minimum of {}",
                iterations, DEFAULT_ITERATIONS
            )));
        }
        Ok(Self { iterations })
    }

    /// Parameters recorded in existing vault metadata. The count is honoured
    /// as stored so the vault stays openable; it is raised on the next
    /// password change.
    pub(crate) fn from_stored(iterations: u32) -> Self {
        Self { iterations }
    }

    /// Iteration count
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(VaultError::KeyDerivationError(
                "iteration count must be non-zero".to_string(),
            ));
        }
        if self.iterations < DEFAULT_ITERATIONS {
            warn!(
                iterations = self.iterations,
                minimum = DEFAULT_ITERATIONS,
                "PBKDF2 iterations below minimum"
            );
        }
        Ok(())
    }
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit encryption key from a password
///
/// Deterministic: the same password, salt and parameters always produce the
/// same key.
pub fn derive_key(password: &str, salt: &[u8], params: &KeyDerivationParams) -> Result<MasterKey> {
    params.validate()?;

    let mut key_bytes = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha512>(password.as_bytes(), salt, params.iterations, &mut key_bytes);

    Ok(MasterKey::new(key_bytes))
}

fn verifier_bytes(
    password: &str,
    salt: &[u8],
    params: &KeyDerivationParams,
    format: VerifierFormat,
) -> Result<Zeroizing<[u8; HASH_LEN]>> {
    params.validate()?;

    let mut verifier_salt = salt.to_vec();
    if format == VerifierFormat::Separated {
        verifier_salt.extend_from_slice(VERIFIER_CONTEXT);
    }

    let mut hash = Zeroizing::new([0u8; HASH_LEN]);
    pbkdf2_hmac::<Sha512>(password.as_bytes(), &verifier_salt, params.iterations, &mut hash[..]);
    Ok(hash)
}

/// Compute the hex verification hash of a master password.
///
/// Only ever compared against a stored hash; never used as key material.
pub fn hash_password(
    password: &str,
    salt: &[u8],
    params: &KeyDerivationParams,
    format: VerifierFormat,
) -> Result<String> {
    let hash = verifier_bytes(password, salt, params, format)?;
    Ok(hex::encode(&hash[..]))
}

/// Check a password against a stored hex verification hash in constant time
pub fn verify_password(
    password: &str,
    salt: &[u8],
    expected_hex: &str,
    params: &KeyDerivationParams,
    format: VerifierFormat,
) -> Result<bool> {
    let expected = match hex::decode(expected_hex) {
        Ok(bytes) if bytes.len() == HASH_LEN => bytes,
        _ => {
            warn!("Stored password hash is malformed");
            return Ok(false);
        }
    };

    let computed = verifier_bytes(password, salt, params, format)?;
    Ok(computed[..].ct_eq(expected.as_slice()).into())
}
