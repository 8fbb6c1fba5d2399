use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::DEFAULT_SHARD_DEPTH;
use crate::error::ProxyError;
use crate::mime::MimeTypes;

const DEFAULT_USER_AGENT: &str = concat!("cloudproxy/", env!("CARGO_PKG_VERSION"));

/// Lifetime of a signed upstream URL.
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(3600);

/// Environment variable the symmetric passphrase is handed to `openssl` through.
pub const PASSPHRASE_ENV: &str = "CLOUD_PROXY_PASSPHRASE";

/// Immutable configuration shared by every component of the pipeline
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Root directory of the on-disk cache
    pub cache_root: PathBuf,

    /// Number of two-character shard directories per entry
    pub shard_depth: usize,

    /// Shared-secret cookie authentication
    pub auth: AuthConfig,

    /// Upstream endpoints and signing credentials
    pub upstream: UpstreamConfig,

    /// At-rest decryption settings
    pub codec: CodecConfig,

    /// Extension to MIME type table
    pub mime_types: MimeTypes,

    /// Command spawned after each committed fetch; the entry path is appended
    pub post_fetch_hook: Option<Vec<String>>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cache_root: std::env::temp_dir().join("cloudproxy-cache"),
            shard_depth: DEFAULT_SHARD_DEPTH,
            auth: AuthConfig::default(),
            upstream: UpstreamConfig::default(),
            codec: CodecConfig::default(),
            mime_types: MimeTypes::default(),
            post_fetch_hook: None,
        }
    }
}

impl ProxyConfig {
    pub fn builder() -> crate::builder::ProxyConfigBuilder {
        crate::builder::ProxyConfigBuilder::new()
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.auth.secret.is_empty() {
            return Err(ProxyError::Config("auth cookie secret is empty".to_string()));
        }
        if self.upstream.access_key_id.is_empty() || self.upstream.secret_access_key.is_empty() {
            return Err(ProxyError::Config(
                "upstream access key id and secret are required".to_string(),
            ));
        }
        if self.shard_depth > 32 {
            return Err(ProxyError::Config(format!(
                "shard depth {} exceeds the 32 levels a SHA-256 digest can provide",
                self.shard_depth
            )));
        }
        if self.codec.transmit_suffix.is_empty() {
            return Err(ProxyError::Config("transmit suffix is empty".to_string()));
        }
        Ok(())
    }
}

/// Cookie comparison settings
#[derive(Clone)]
pub struct AuthConfig {
    /// Name of the cookie carrying the secret
    pub cookie_name: String,
    /// Expected cookie value
    pub secret: String,
    /// Request path served without a cookie
    pub exempt_path: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "auth".to_string(),
            secret: String::new(),
            exempt_path: None,
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("cookie_name", &self.cookie_name)
            .field("secret", &"[REDACTED]")
            .field("exempt_path", &self.exempt_path)
            .finish()
    }
}

/// Where objects are fetched from and how requests are signed
#[derive(Clone)]
pub struct UpstreamConfig {
    pub access_key_id: String,
    pub secret_access_key: String,

    /// Lifetime of a signed URL
    pub expiry: Duration,

    /// URL scheme used for the object store
    pub scheme: String,

    /// Object-store host, `{region}` is substituted
    pub host_template: String,

    /// Base URL of the video host; the namespace is disabled when unset
    pub video_base_url: Option<String>,

    /// Overall timeout for one upstream fetch, zero disables it
    pub timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    pub user_agent: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            access_key_id: String::new(),
            secret_access_key: String::new(),
            expiry: DEFAULT_EXPIRATION,
            scheme: "https".to_string(),
            host_template: "s3-{region}.amazonaws.com".to_string(),
            video_base_url: None,
            timeout: Duration::ZERO,
            connect_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("expiry", &self.expiry)
            .field("scheme", &self.scheme)
            .field("host_template", &self.host_template)
            .field("video_base_url", &self.video_base_url)
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// At-rest decryption settings
#[derive(Clone)]
pub struct CodecConfig {
    /// Key suffix marking objects encrypted with the general-purpose tool
    pub encrypted_suffix: String,

    /// Suffix of the decrypted sibling of a suffix-encrypted entry
    pub transmit_suffix: String,

    /// Upstream metadata header naming the symmetric cipher
    pub cipher_header: String,

    pub gpg_program: String,
    pub openssl_program: String,

    /// Passphrase for header-encrypted objects
    pub passphrase: Option<String>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            encrypted_suffix: ".gpg".to_string(),
            transmit_suffix: ".tmp".to_string(),
            cipher_header: "x-amz-meta-cipher".to_string(),
            gpg_program: "gpg".to_string(),
            openssl_program: "openssl".to_string(),
            passphrase: None,
        }
    }
}

impl fmt::Debug for CodecConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecConfig")
            .field("encrypted_suffix", &self.encrypted_suffix)
            .field("transmit_suffix", &self.transmit_suffix)
            .field("cipher_header", &self.cipher_header)
            .field("gpg_program", &self.gpg_program)
            .field("openssl_program", &self.openssl_program)
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
