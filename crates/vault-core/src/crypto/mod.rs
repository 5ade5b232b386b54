//! Cryptographic primitives for credential protection at rest
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption with a textual envelope format
//! - PBKDF2-HMAC-SHA512 key derivation and password verification hashes
//! - Secure memory handling with zeroize

mod encryption;
mod key_derivation;
mod secure_memory;

pub use encryption::{
    decrypt, decrypt_string, encrypt, encrypt_optional, encrypt_string, is_envelope, open_envelope,
    EncryptedData, NONCE_LEN, TAG_LEN,
};
pub use key_derivation::{
    derive_key, generate_salt, hash_password, verify_password, KeyDerivationParams,
    VerifierFormat, DEFAULT_ITERATIONS, HASH_LEN, KEY_LEN, SALT_LEN,
};
pub use secure_memory::{MasterKey, SecretString};
