//! Server configuration for `marnotes`.
//!
//! Command-line flags (with `MARNOTES_*` environment fallbacks) are parsed
//! into [`Args`] and then validated into a [`ServerConfig`] before any
//! component is constructed. Every configuration error is fatal at startup.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use clap::Parser;
use marnotes_core::keystore::{DEFAULT_KEY_BITS, MIN_KEY_BITS};

use crate::ports::DEFAULT_PORT_SCAN_WINDOW;

/// Raw command-line arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "marnotes",
    version,
    about = "Serve a directory of JSON documents and the marnotes web UI"
)]
pub struct Args {
    /// Directory containing JSON documents.
    #[arg(long = "dir", env = "MARNOTES_DOCS_DIR", default_value = "./documents")]
    pub docs_dir: PathBuf,

    /// Address for the JSON document server (`:8080` or `host:8080`).
    #[arg(long, env = "MARNOTES_DOCUMENT_PORT", default_value = ":8080")]
    pub document_port: String,

    /// Address for the web app server (`:3000` or `host:3000`).
    #[arg(long, env = "MARNOTES_WEB_PORT", default_value = ":3000")]
    pub web_port: String,

    /// Directory containing the web application (`package.json`, `public/`).
    #[arg(long, env = "MARNOTES_WEB_DIR", default_value = "./server/web")]
    pub web_dir: PathBuf,

    /// Directory holding `private.pem` / `public.pem`. Enables `/publickey`.
    #[arg(long, env = "MARNOTES_KEY_DIR")]
    pub key_dir: Option<PathBuf>,

    /// RSA modulus size used when a new key pair has to be generated.
    #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
    pub key_bits: usize,

    /// Wrap document responses in RSA-OAEP envelopes (requires --key-dir).
    #[arg(long, requires = "key_dir")]
    pub encrypt_responses: bool,

    /// Start only the JSON server.
    #[arg(long, conflicts_with = "web_only")]
    pub json_only: bool,

    /// Start only the web app server.
    #[arg(long)]
    pub web_only: bool,

    /// How many ports above a busy one to probe before giving up.
    #[arg(long, default_value_t = DEFAULT_PORT_SCAN_WINDOW)]
    pub port_scan_window: u16,

    /// `npm run` script that compiles the web bundle.
    #[arg(long, env = "MARNOTES_WEB_BUILD_SCRIPT", default_value = "build:dev")]
    pub web_build_script: String,

    /// Log filter used when `RUST_LOG` is unset (e.g. `info`, `debug`).
    #[arg(long, env = "MARNOTES_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Which listeners to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceMode {
    /// Document API and web UI on separate listeners.
    Both,
    /// Document API only.
    DocumentsOnly,
    /// Web UI only; documents are served by another process.
    WebOnly,
}

impl ServiceMode {
    /// Whether the document API listener runs in this mode.
    #[must_use]
    pub fn serves_documents(self) -> bool {
        matches!(self, Self::Both | Self::DocumentsOnly)
    }

    /// Whether the web UI listener runs in this mode.
    #[must_use]
    pub fn serves_web(self) -> bool {
        matches!(self, Self::Both | Self::WebOnly)
    }
}

/// Whether document responses are wrapped in encrypted envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Responses are sent in clear (the default).
    #[default]
    Disabled,
    /// Responses are sealed with the deployment public key.
    Enabled,
}

/// Key pair location and generation parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConfig {
    /// Directory holding the PEM files.
    pub dir: PathBuf,
    /// Modulus size for freshly generated keys.
    pub bits: usize,
}

/// Validated server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Which listeners to start.
    pub mode: ServiceMode,
    /// Directory containing JSON documents.
    pub docs_dir: PathBuf,
    /// Web application directory.
    pub web_dir: PathBuf,
    /// Requested document API address.
    pub document_addr: SocketAddr,
    /// Requested web UI address.
    pub web_addr: SocketAddr,
    /// Key pair settings (None disables `/publickey` and encryption).
    pub keys: Option<KeyConfig>,
    /// Response encryption strategy.
    pub encryption: EncryptionMode,
    /// Port scan window for conflict resolution.
    pub port_scan_window: u16,
    /// `npm run` script for the web bundle.
    pub web_build_script: String,
    /// Fallback log filter.
    pub log_level: String,
}

/// Invalid configuration; the process exits before binding anything.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `--json-only` and `--web-only` were both given.
    #[error("cannot specify both --json-only and --web-only")]
    ConflictingModes,

    /// Response encryption needs a key directory.
    #[error("--encrypt-responses requires --key-dir")]
    EncryptionWithoutKeys,

    /// The requested RSA modulus is too small.
    #[error("--key-bits must be at least {minimum}, got {bits}")]
    InsecureKeySize { bits: usize, minimum: usize },

    /// A listen address could not be parsed or resolved.
    #[error("invalid address for --{flag} '{value}': {reason}")]
    InvalidAddress {
        flag: &'static str,
        value: String,
        reason: String,
    },
}

impl Args {
    /// Validate the raw arguments.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first invalid setting.
    pub fn into_config(self) -> Result<ServerConfig, ConfigError> {
        let mode = match (self.json_only, self.web_only) {
            (true, true) => return Err(ConfigError::ConflictingModes),
            (true, false) => ServiceMode::DocumentsOnly,
            (false, true) => ServiceMode::WebOnly,
            (false, false) => ServiceMode::Both,
        };

        if self.key_bits < MIN_KEY_BITS {
            return Err(ConfigError::InsecureKeySize {
                bits: self.key_bits,
                minimum: MIN_KEY_BITS,
            });
        }

        let encryption = if self.encrypt_responses {
            if self.key_dir.is_none() {
                return Err(ConfigError::EncryptionWithoutKeys);
            }
            EncryptionMode::Enabled
        } else {
            EncryptionMode::Disabled
        };

        let document_addr = parse_listen_addr("document-port", &self.document_port)?;
        let web_addr = parse_listen_addr("web-port", &self.web_port)?;

        Ok(ServerConfig {
            mode,
            docs_dir: self.docs_dir,
            web_dir: self.web_dir,
            document_addr,
            web_addr,
            keys: self.key_dir.map(|dir| KeyConfig {
                dir,
                bits: self.key_bits,
            }),
            encryption,
            port_scan_window: self.port_scan_window,
            web_build_script: self.web_build_script,
            log_level: self.log_level,
        })
    }
}

/// Parse a listen address.
///
/// Accepts `:PORT` and bare `PORT` (all interfaces), `IP:PORT`, and
/// `HOST:PORT` (resolved once, first result wins).
///
/// # Errors
///
/// Returns [`ConfigError::InvalidAddress`] if the value cannot be resolved.
pub fn parse_listen_addr(flag: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidAddress {
        flag,
        value: value.to_owned(),
        reason,
    };

    let trimmed = value.trim();
    let port_only = trimmed.strip_prefix(':').unwrap_or(trimmed);
    if !port_only.is_empty() && port_only.bytes().all(|b| b.is_ascii_digit()) {
        let port: u16 = port_only
            .parse()
            .map_err(|e| invalid(format!("bad port: {e}")))?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }

    if let Ok(addr) = trimmed.parse::<SocketAddr>() {
        return Ok(addr);
    }

    trimmed
        .to_socket_addrs()
        .map_err(|e| invalid(e.to_string()))?
        .next()
        .ok_or_else(|| invalid("address resolved to nothing".to_owned()))
}
