//! RSA-OAEP envelope encryption.
//!
//! Payloads are encrypted directly under the deployment public key with
//! OAEP (SHA-256 for both the label hash and MGF1, empty label). There is no
//! symmetric session key, so every payload must fit in one OAEP block:
//! `modulus_bytes - 2 * 32 - 2`, i.e. 190 bytes for a 2048-bit key.
//!
//! Wire format:
//!
//! ```json
//! { "encrypted": "<standard base64 of the raw RSA ciphertext>" }
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::CipherError;

/// Output length of SHA-256 in bytes.
const HASH_LEN: usize = 32;

/// Wire container for one ciphertext block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Base64 (standard alphabet, padded) of the raw RSA ciphertext.
    pub encrypted: String,
}

impl EncryptedEnvelope {
    /// Serialize as the JSON wire body.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Encryption`] if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>, CipherError> {
        serde_json::to_vec(self).map_err(|e| CipherError::Encryption {
            reason: format!("failed to serialize envelope: {e}"),
        })
    }

    /// Parse a JSON wire body.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Decode`] if the body is not an envelope.
    pub fn from_json(body: &[u8]) -> Result<Self, CipherError> {
        serde_json::from_slice(body).map_err(|e| CipherError::Decode {
            reason: format!("invalid envelope JSON: {e}"),
        })
    }
}

/// Largest plaintext, in bytes, that [`encrypt`] accepts for `key`.
#[must_use]
pub fn max_plaintext_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(2 * HASH_LEN + 2)
}

/// Encrypt `plaintext` for the holder of the matching private key.
///
/// # Errors
///
/// - [`CipherError::PayloadTooLarge`] if `plaintext` exceeds
///   [`max_plaintext_len`]; nothing is encrypted.
/// - [`CipherError::Encryption`] if the RSA operation fails.
pub fn encrypt(key: &RsaPublicKey, plaintext: &[u8]) -> Result<EncryptedEnvelope, CipherError> {
    let max = max_plaintext_len(key);
    if plaintext.len() > max {
        return Err(CipherError::PayloadTooLarge {
            len: plaintext.len(),
            max,
        });
    }

    let ciphertext = key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CipherError::Encryption {
            reason: e.to_string(),
        })?;

    Ok(EncryptedEnvelope {
        encrypted: BASE64.encode(ciphertext),
    })
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// # Errors
///
/// - [`CipherError::Decode`] if `encrypted` is not valid base64.
/// - [`CipherError::Decryption`] if OAEP unpadding fails (wrong key or
///   tampered ciphertext).
pub fn decrypt(key: &RsaPrivateKey, envelope: &EncryptedEnvelope) -> Result<Vec<u8>, CipherError> {
    let ciphertext = BASE64
        .decode(envelope.encrypted.as_bytes())
        .map_err(|e| CipherError::Decode {
            reason: format!("base64 decode failed: {e}"),
        })?;

    key.decrypt(Oaep::new::<Sha256>(), &ciphertext)
        .map_err(|e| CipherError::Decryption {
            reason: e.to_string(),
        })
}
