//! Error types for `marnotes-core`.
//!
//! Each error variant carries enough context (operation and path) to diagnose
//! the problem from operator logs. Errors never include key material.

use std::path::PathBuf;

/// Errors from loading, generating, or persisting the RSA key pair.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    /// The requested modulus size is below the accepted minimum.
    #[error("refusing to use {bits}-bit RSA keys: at least {minimum} bits are required")]
    InsecureKeySize { bits: usize, minimum: usize },

    /// The key directory could not be created.
    #[error("failed to create key directory '{}': {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An existing private key file could not be read (not a parse failure).
    #[error("failed to read key file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A key file could not be written or moved into place.
    #[error("failed to write key file '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generating a fresh key pair failed.
    #[error("key generation failed: {reason}")]
    Generation { reason: String },

    /// Encoding a key as PEM (or deriving the public key PEM) failed.
    #[error("failed to encode {kind} key as PEM: {reason}")]
    Encoding { kind: &'static str, reason: String },
}

/// Errors from OAEP envelope encryption and decryption.
///
/// `Decode` and `Decryption` are distinct so callers can log
/// them separately. Neither is echoed verbatim to a client.
#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    /// The plaintext does not fit in a single OAEP block for this key.
    #[error("payload of {len} bytes exceeds the OAEP limit of {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    /// RSA-OAEP encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// The envelope was not valid JSON or its ciphertext was not valid base64.
    #[error("malformed envelope: {reason}")]
    Decode { reason: String },

    /// OAEP padding or integrity check failed (wrong key or tampered data).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },
}
