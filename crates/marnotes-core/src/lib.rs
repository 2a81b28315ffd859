//! Core library for `marnotes`.
//!
//! Owns the deployment RSA key pair (generation, PEM persistence, reuse
//! across restarts) and the OAEP envelope codec used to protect document
//! responses. Knows nothing about HTTP.

pub mod cipher;
pub mod error;
pub mod keystore;

pub use cipher::EncryptedEnvelope;
pub use error::{CipherError, KeyStoreError};
pub use keystore::{KeyPair, KeyStore};
