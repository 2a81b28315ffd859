//! Response protection strategy.
//!
//! Chosen once at startup from [`EncryptionMode`]: [`Protection::Plain`]
//! passes bodies through untouched, [`Protection::Sealed`] wraps them in an
//! [`EncryptedEnvelope`] under the deployment public key. Handlers always
//! call [`Protection::protect`] and never branch on the mode themselves.

use std::sync::Arc;

use marnotes_core::cipher::{self, EncryptedEnvelope};
use marnotes_core::error::CipherError;
use marnotes_core::keystore::KeyPair;

use crate::config::{ConfigError, EncryptionMode};

/// How outbound bodies are protected and inbound envelopes are opened.
#[derive(Debug, Clone, Default)]
pub enum Protection {
    /// No encryption; bodies are sent and accepted as-is.
    #[default]
    Plain,
    /// RSA-OAEP envelopes under the given key pair.
    Sealed(Arc<KeyPair>),
}

impl Protection {
    /// Select the strategy for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EncryptionWithoutKeys`] when encryption is
    /// enabled but no key pair was loaded.
    pub fn select(mode: EncryptionMode, keys: Option<&Arc<KeyPair>>) -> Result<Self, ConfigError> {
        match (mode, keys) {
            (EncryptionMode::Disabled, _) => Ok(Self::Plain),
            (EncryptionMode::Enabled, Some(keys)) => Ok(Self::Sealed(Arc::clone(keys))),
            (EncryptionMode::Enabled, None) => Err(ConfigError::EncryptionWithoutKeys),
        }
    }

    /// Whether responses are being encrypted.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }

    /// Prepare a response body for the wire.
    ///
    /// # Errors
    ///
    /// Propagates [`CipherError`] from envelope encryption, notably
    /// [`CipherError::PayloadTooLarge`] for bodies above the OAEP limit.
    pub fn protect(&self, body: Vec<u8>) -> Result<Vec<u8>, CipherError> {
        match self {
            Self::Plain => Ok(body),
            Self::Sealed(keys) => cipher::encrypt(keys.public_key(), &body)?.to_json(),
        }
    }

    /// Open an inbound body that may be an encrypted envelope.
    ///
    /// Reserved for inbound payloads: the current routes are read-only and
    /// accept no request body.
    ///
    /// # Errors
    ///
    /// [`CipherError::Decode`] for a malformed envelope,
    /// [`CipherError::Decryption`] for a ciphertext that does not open.
    pub fn unprotect(&self, body: &[u8]) -> Result<Vec<u8>, CipherError> {
        match self {
            Self::Plain => Ok(body.to_vec()),
            Self::Sealed(keys) => {
                let envelope = EncryptedEnvelope::from_json(body)?;
                cipher::decrypt(keys.private_key(), &envelope)
            }
        }
    }
}
