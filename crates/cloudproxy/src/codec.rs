//! # At-Rest Codec
//!
//! Turns a cache entry into the file that is actually transmitted.
//!
//! Two independent envelopes are supported:
//!
//! - **Suffix-encrypted**: the object key ends with the reserved suffix
//!   (`.gpg`). The entry stays encrypted; the plaintext is written once to a
//!   sibling `{entry}.tmp` that later requests reuse.
//! - **Header-encrypted**: the upstream response named a symmetric cipher in
//!   a metadata header. The entry is decrypted in place right after the
//!   fetch, so every later hit reads plaintext directly.
//!
//! Decrypted output always goes through a staging file and a rename, and a
//! failing tool is reported as [`ProxyError::Decode`].

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::cache::ContentStore;
use crate::config::{CodecConfig, PASSPHRASE_ENV};
use crate::error::ProxyError;
use crate::object::ObjectId;

/// Suffix the ciphertext of a header-encrypted entry is moved to while it is decrypted.
pub const ENCRYPTED_SIBLING_SUFFIX: &str = ".enc";

/// How a cache entry's bytes are wrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    Plain,
    SuffixEncrypted,
    HeaderEncrypted { cipher: String },
}

/// Decryption back ends. The process-backed one is [`ExternalDecryptor`].
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypt with the general-purpose tool, writing plaintext to `output`.
    async fn decrypt_file(&self, input: &Path, output: &Path) -> Result<(), ProxyError>;

    /// Decrypt with symmetric `cipher` and the process-wide passphrase.
    async fn decrypt_symmetric(
        &self,
        cipher: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), ProxyError>;
}

/// Runs `gpg` and `openssl` as child processes.
#[derive(Clone)]
pub struct ExternalDecryptor {
    gpg_program: String,
    openssl_program: String,
    passphrase: Option<String>,
}

impl ExternalDecryptor {
    pub fn new(config: &CodecConfig) -> Self {
        Self {
            gpg_program: config.gpg_program.clone(),
            openssl_program: config.openssl_program.clone(),
            passphrase: config.passphrase.clone(),
        }
    }

    async fn run(mut command: Command, program: &str) -> Result<(), ProxyError> {
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ProxyError::Decode(format!("failed to run {program}: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ProxyError::Decode(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

#[async_trait]
impl Decryptor for ExternalDecryptor {
    async fn decrypt_file(&self, input: &Path, output: &Path) -> Result<(), ProxyError> {
        let mut command = Command::new(&self.gpg_program);
        command
            .args(["--batch", "--yes", "--output"])
            .arg(output)
            .arg("--decrypt")
            .arg(input);
        Self::run(command, &self.gpg_program).await
    }

    async fn decrypt_symmetric(
        &self,
        cipher: &str,
        input: &Path,
        output: &Path,
    ) -> Result<(), ProxyError> {
        let passphrase = self.passphrase.as_deref().ok_or_else(|| {
            ProxyError::Decode("no passphrase configured for header-encrypted objects".into())
        })?;

        let mut command = Command::new(&self.openssl_program);
        command
            .args(["enc", "-d", &format!("-{cipher}")])
            .arg("-in")
            .arg(input)
            .arg("-out")
            .arg(output)
            .args(["-pass", &format!("env:{PASSPHRASE_ENV}")])
            .env(PASSPHRASE_ENV, passphrase);
        Self::run(command, &self.openssl_program).await
    }
}

pub struct AtRestCodec {
    config: CodecConfig,
    decryptor: Arc<dyn Decryptor>,
}

impl AtRestCodec {
    pub fn new(config: CodecConfig, decryptor: Arc<dyn Decryptor>) -> Self {
        Self { config, decryptor }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// `path` with `suffix` appended to its file name.
    pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
        name.push(suffix);
        path.with_file_name(name)
    }

    /// Decide the envelope from the key and, right after a fetch, the upstream headers.
    pub fn classify(&self, object: &ObjectId, upstream_headers: Option<&HeaderMap>) -> Envelope {
        if !self.config.encrypted_suffix.is_empty()
            && object.key.ends_with(&self.config.encrypted_suffix)
        {
            return Envelope::SuffixEncrypted;
        }

        upstream_headers
            .and_then(|headers| headers.get(self.config.cipher_header.as_str()))
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|cipher| !cipher.is_empty())
            .map(|cipher| Envelope::HeaderEncrypted {
                cipher: cipher.to_ascii_lowercase(),
            })
            .unwrap_or(Envelope::Plain)
    }

    /// File that is transmitted for `entry` once decoded.
    pub fn transmit_path(&self, entry: &Path, envelope: &Envelope) -> PathBuf {
        match envelope {
            Envelope::SuffixEncrypted => Self::sibling(entry, &self.config.transmit_suffix),
            Envelope::Plain | Envelope::HeaderEncrypted { .. } => entry.to_path_buf(),
        }
    }

    /// Decode `entry` and return the path to transmit.
    ///
    /// Callers must hold the entry's key lock.
    pub async fn decode(&self, entry: &Path, envelope: &Envelope) -> Result<PathBuf, ProxyError> {
        match envelope {
            Envelope::Plain => Ok(entry.to_path_buf()),
            Envelope::SuffixEncrypted => self.decode_to_sibling(entry).await,
            Envelope::HeaderEncrypted { cipher } => self.decode_in_place(entry, cipher).await,
        }
    }

    async fn decode_to_sibling(&self, entry: &Path) -> Result<PathBuf, ProxyError> {
        let transmit = self.transmit_path(entry, &Envelope::SuffixEncrypted);
        if fs::try_exists(&transmit).await? {
            debug!(path = ?transmit, "Reusing decrypted transmit file");
            return Ok(transmit);
        }

        let staging = ContentStore::staging_path_for(&transmit);
        debug!(entry = ?entry, output = ?staging, "Decrypting suffix-encrypted entry");

        let result = match self.decryptor.decrypt_file(entry, &staging).await {
            Ok(()) => Self::promote(&staging, &transmit).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            Self::discard(&staging).await;
            warn!(entry = ?entry, error = %e, "Decrypting cache entry failed");
            return Err(e);
        }

        info!(path = ?transmit, "Decrypted cache entry");
        Ok(transmit)
    }

    async fn decode_in_place(&self, entry: &Path, cipher: &str) -> Result<PathBuf, ProxyError> {
        if cipher.is_empty()
            || !cipher.starts_with(|c: char| c.is_ascii_alphanumeric())
            || !cipher.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ProxyError::Decode(format!("unsupported cipher name {cipher:?}")));
        }

        let ciphertext = Self::sibling(entry, ENCRYPTED_SIBLING_SUFFIX);
        if fs::try_exists(entry).await? {
            fs::rename(entry, &ciphertext).await?;
        } else if !fs::try_exists(&ciphertext).await? {
            return Err(ProxyError::NotFound(format!(
                "nothing to decrypt at {}",
                entry.display()
            )));
        }

        let staging = ContentStore::staging_path_for(entry);
        debug!(entry = ?entry, cipher, "Decrypting header-encrypted entry in place");

        let result = match self
            .decryptor
            .decrypt_symmetric(cipher, &ciphertext, &staging)
            .await
        {
            Ok(()) => Self::promote(&staging, entry).await,
            Err(e) => Err(e),
        };

        // The ciphertext is never kept: on success the entry holds the plaintext,
        // on failure the next request fetches again.
        Self::discard(&ciphertext).await;
        if let Err(e) = result {
            Self::discard(&staging).await;
            warn!(entry = ?entry, cipher, error = %e, "Decrypting cache entry failed");
            return Err(e);
        }

        info!(path = ?entry, cipher, "Decrypted cache entry in place");
        Ok(entry.to_path_buf())
    }

    async fn promote(staging: &Path, target: &Path) -> Result<(), ProxyError> {
        if !fs::try_exists(staging).await? {
            return Err(ProxyError::Decode(format!(
                "decryption produced no output for {}",
                target.display()
            )));
        }
        fs::rename(staging, target).await?;
        Ok(())
    }

    async fn discard(path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = ?path, error = %e, "Failed to remove decode artifact");
            }
        }
    }
}
