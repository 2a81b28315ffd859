//! Durable RSA key pair storage.
//!
//! A deployment owns exactly one key pair, persisted as two PEM files in a
//! key directory:
//!
//! - `private.pem`: PKCS#1 `RSA PRIVATE KEY`, mode `0600`
//! - `public.pem`: SPKI `PUBLIC KEY`, mode `0644`
//!
//! [`KeyStore::load_or_generate`] prefers the persisted private key. The file
//! is the only source of truth: while it exists and parses it is never
//! regenerated, and the public key is always derived from it. An unparseable
//! private key is treated as absent and replaced by a freshly generated pair.
//!
//! # Concurrency
//!
//! Files are written at most once per process. Two processes starting against
//! the same empty directory race on generation; the last rename wins. Run a
//! single instance per key directory.

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::EncodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::KeyStoreError;

/// File name of the PEM-encoded private key inside the key directory.
pub const PRIVATE_KEY_FILE: &str = "private.pem";

/// File name of the PEM-encoded public key inside the key directory.
pub const PUBLIC_KEY_FILE: &str = "public.pem";

/// Modulus size used when the deployment does not ask for another one.
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Smallest modulus size accepted for generation or loading.
pub const MIN_KEY_BITS: usize = 2048;

#[cfg(unix)]
const KEY_DIR_MODE: u32 = 0o700;
#[cfg(unix)]
const PRIVATE_KEY_MODE: u32 = 0o600;
#[cfg(unix)]
const PUBLIC_KEY_MODE: u32 = 0o644;

/// An RSA private key together with the public key derived from it.
///
/// Immutable after construction. Share it across tasks behind an `Arc`.
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generate a fresh random key pair with a modulus of `bits` bits.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::InsecureKeySize`] if `bits` is below [`MIN_KEY_BITS`].
    /// - [`KeyStoreError::Generation`] if the RNG or prime search fails.
    pub fn generate(bits: usize) -> Result<Self, KeyStoreError> {
        validate_key_bits(bits)?;
        let private =
            RsaPrivateKey::new(&mut OsRng, bits).map_err(|e| KeyStoreError::Generation {
                reason: e.to_string(),
            })?;
        Ok(Self::from_private(private))
    }

    /// Build a pair from a private key, deriving the public half.
    #[must_use]
    pub fn from_private(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { private, public }
    }

    /// Borrow the private key.
    #[must_use]
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private
    }

    /// Borrow the public key.
    #[must_use]
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Modulus size in bits.
    #[must_use]
    pub fn bits(&self) -> usize {
        self.public.size().saturating_mul(8)
    }

    /// Encode the public key as an SPKI (`PUBLIC KEY`) PEM document.
    ///
    /// # Errors
    ///
    /// Returns [`KeyStoreError::Encoding`] if DER/PEM encoding fails.
    pub fn public_key_pem(&self) -> Result<String, KeyStoreError> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyStoreError::Encoding {
                kind: "public",
                reason: e.to_string(),
            })
    }

    fn private_key_pem(&self) -> Result<Zeroizing<String>, KeyStoreError> {
        self.private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| KeyStoreError::Encoding {
                kind: "private",
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("bits", &self.bits())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Loads or creates the deployment key pair inside a directory.
#[derive(Debug, Clone)]
pub struct KeyStore {
    dir: PathBuf,
}

impl KeyStore {
    /// Create a key store rooted at `dir`. Nothing touches the disk yet.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// The key directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the PEM private key.
    #[must_use]
    pub fn private_key_path(&self) -> PathBuf {
        self.dir.join(PRIVATE_KEY_FILE)
    }

    /// Path of the PEM public key.
    #[must_use]
    pub fn public_key_path(&self) -> PathBuf {
        self.dir.join(PUBLIC_KEY_FILE)
    }

    /// Return the persisted key pair, or generate and persist a new one.
    ///
    /// Repeated calls against an intact directory return cryptographically
    /// identical pairs. If `public.pem` has gone missing it is rewritten from
    /// the private key; an existing `public.pem` is left untouched, with a
    /// warning if it does not match the private key.
    ///
    /// # Errors
    ///
    /// - [`KeyStoreError::InsecureKeySize`] if `bits` (or the persisted key)
    ///   is below [`MIN_KEY_BITS`].
    /// - [`KeyStoreError::Read`] if `private.pem` exists but cannot be read.
    /// - [`KeyStoreError::CreateDir`], [`KeyStoreError::Write`],
    ///   [`KeyStoreError::Encoding`], [`KeyStoreError::Generation`] when a
    ///   new pair cannot be produced and persisted. Failures while encoding
    ///   or staging leave the existing key files untouched.
    pub fn load_or_generate(&self, bits: usize) -> Result<KeyPair, KeyStoreError> {
        validate_key_bits(bits)?;

        if let Some(pair) = self.load_existing()? {
            validate_key_bits(pair.bits())?;
            if pair.bits() != bits {
                debug!(
                    persisted_bits = pair.bits(),
                    requested_bits = bits,
                    "using persisted key pair with a different modulus size"
                );
            }
            self.restore_public_key(&pair)?;
            info!(dir = %self.dir.display(), bits = pair.bits(), "loaded persisted key pair");
            return Ok(pair);
        }

        let pair = KeyPair::generate(bits)?;
        self.persist(&pair)?;
        info!(dir = %self.dir.display(), bits, "generated and persisted new key pair");
        Ok(pair)
    }

    /// Read and parse `private.pem`. `Ok(None)` means "generate a new pair".
    fn load_existing(&self) -> Result<Option<KeyPair>, KeyStoreError> {
        let path = self.private_key_path();
        let pem = match fs::read_to_string(&path) {
            Ok(pem) => Zeroizing::new(pem),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                warn!(path = %path.display(), error = %e, "private key is not valid PEM text, regenerating");
                return Ok(None);
            }
            Err(source) => return Err(KeyStoreError::Read { path, source }),
        };

        match RsaPrivateKey::from_pkcs1_pem(&pem) {
            Ok(private) => {
                warn_if_exposed(&path);
                Ok(Some(KeyPair::from_private(private)))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse private key, regenerating");
                Ok(None)
            }
        }
    }

    fn restore_public_key(&self, pair: &KeyPair) -> Result<(), KeyStoreError> {
        let path = self.public_key_path();
        let pem = pair.public_key_pem()?;
        if path.exists() {
            match fs::read_to_string(&path) {
                Ok(on_disk) if on_disk.trim() == pem.trim() => {}
                Ok(_) => warn!(
                    path = %path.display(),
                    "public key file does not match the private key; serving the derived key"
                ),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to read public key file"),
            }
            return Ok(());
        }
        let tmp = staging_path(&path);
        write_key_file(&tmp, pem.as_bytes(), FileKind::Public)
            .and_then(|()| commit(&tmp, &path))
            .inspect_err(|_| discard(&tmp))?;
        info!(path = %path.display(), "restored missing public key file");
        Ok(())
    }

    /// Persist both halves. Both PEMs are encoded and staged before either
    /// final file is replaced.
    fn persist(&self, pair: &KeyPair) -> Result<(), KeyStoreError> {
        let private_pem = pair.private_key_pem()?;
        let public_pem = pair.public_key_pem()?;

        create_key_dir(&self.dir)?;

        let private_path = self.private_key_path();
        let public_path = self.public_key_path();
        let private_tmp = staging_path(&private_path);
        let public_tmp = staging_path(&public_path);

        let staged = write_key_file(&private_tmp, private_pem.as_bytes(), FileKind::Private)
            .and_then(|()| write_key_file(&public_tmp, public_pem.as_bytes(), FileKind::Public));
        if let Err(e) = staged {
            discard(&private_tmp);
            discard(&public_tmp);
            return Err(e);
        }

        commit(&private_tmp, &private_path).inspect_err(|_| {
            discard(&private_tmp);
            discard(&public_tmp);
        })?;
        commit(&public_tmp, &public_path).inspect_err(|_| discard(&public_tmp))?;
        Ok(())
    }
}

fn validate_key_bits(bits: usize) -> Result<(), KeyStoreError> {
    if bits < MIN_KEY_BITS {
        return Err(KeyStoreError::InsecureKeySize {
            bits,
            minimum: MIN_KEY_BITS,
        });
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum FileKind {
    Private,
    Public,
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn create_key_dir(dir: &Path) -> Result<(), KeyStoreError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(KEY_DIR_MODE);
    }
    builder.create(dir).map_err(|source| KeyStoreError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })
}

fn write_key_file(path: &Path, contents: &[u8], kind: FileKind) -> Result<(), KeyStoreError> {
    let to_err = |source| KeyStoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(file_mode(kind));
    }
    #[cfg(not(unix))]
    let _ = kind;

    let mut file = options.open(path).map_err(to_err)?;

    // `mode` only applies on creation; a leftover staging file keeps its bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(file_mode(kind)))
            .map_err(to_err)?;
    }

    file.write_all(contents).map_err(to_err)?;
    file.sync_all().map_err(to_err)
}

#[cfg(unix)]
fn file_mode(kind: FileKind) -> u32 {
    match kind {
        FileKind::Private => PRIVATE_KEY_MODE,
        FileKind::Public => PUBLIC_KEY_MODE,
    }
}

fn commit(staged: &Path, target: &Path) -> Result<(), KeyStoreError> {
    fs::rename(staged, target).map_err(|source| KeyStoreError::Write {
        path: target.to_path_buf(),
        source,
    })
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove staged key file");
        }
    }
}

#[cfg(unix)]
fn warn_if_exposed(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = fs::metadata(path) {
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = %format!("{mode:o}"),
                "private key is readable by group or others; expected 600"
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_exposed(_path: &Path) {}
