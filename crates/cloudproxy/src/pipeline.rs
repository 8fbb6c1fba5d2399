//! # Fetch Pipeline
//!
//! Drives one request from authorization to delivery:
//!
//! ```text
//! Received -> Authorized | Rejected
//! Authorized -> CacheHit | CacheMiss
//! CacheMiss -> Fetching -> FetchOk | FetchFailed
//! FetchOk | CacheHit -> Decoding -> Delivering -> Done
//! any -> Error
//! ```
//!
//! Everything up to and including decoding runs under the cache key's lock,
//! so concurrent misses on one object produce a single upstream fetch.
//! Streaming the response happens after the lock is released.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheKey, ContentStore};
use crate::codec::{AtRestCodec, Decryptor, Envelope, ExternalDecryptor};
use crate::config::ProxyConfig;
use crate::delivery::DeliveryWriter;
use crate::error::{ProxyError, empty_response};
use crate::flight::KeyedLocks;
use crate::invalidate::Invalidator;
use crate::object::{Credential, ProxyRequest, Verb};
use crate::signer::UpstreamSigner;
use crate::upstream::UpstreamFetcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Authorized,
    Rejected,
    CacheHit,
    CacheMiss,
    Fetching,
    FetchOk,
    FetchFailed,
    Decoding,
    Delivering,
    Done,
    Error,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Authorized => "authorized",
            Stage::Rejected => "rejected",
            Stage::CacheHit => "cache_hit",
            Stage::CacheMiss => "cache_miss",
            Stage::Fetching => "fetching",
            Stage::FetchOk => "fetch_ok",
            Stage::FetchFailed => "fetch_failed",
            Stage::Decoding => "decoding",
            Stage::Delivering => "delivering",
            Stage::Done => "done",
            Stage::Error => "error",
        };
        f.write_str(name)
    }
}

/// Per-request state. Never shared between requests.
struct Job<'a> {
    request: &'a ProxyRequest,
    key: CacheKey,
    stage: Stage,
    fetched: bool,
}

impl<'a> Job<'a> {
    fn new(request: &'a ProxyRequest) -> Self {
        let key = ContentStore::derive_key(&request.object.canonical_path());
        debug!(key = %key, object = %request.object, verb = %request.verb, "Request received");
        Self {
            request,
            key,
            stage: Stage::Received,
            fetched: false,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!(key = %self.key, from = %self.stage, to = %next, "Stage transition");
        self.stage = next;
    }
}

pub struct FetchPipeline {
    config: Arc<ProxyConfig>,
    store: ContentStore,
    signer: UpstreamSigner,
    fetcher: UpstreamFetcher,
    codec: AtRestCodec,
    delivery: DeliveryWriter,
    invalidator: Invalidator,
    locks: KeyedLocks,
}

impl FetchPipeline {
    /// Pipeline with a TLS upstream client and the external decryption tools.
    pub fn new(config: Arc<ProxyConfig>) -> Result<Self, ProxyError> {
        let fetcher = UpstreamFetcher::from_config(&config.upstream)?;
        let decryptor = Arc::new(ExternalDecryptor::new(&config.codec));
        Ok(Self::with_parts(config, fetcher, decryptor))
    }

    pub fn with_parts(
        config: Arc<ProxyConfig>,
        fetcher: UpstreamFetcher,
        decryptor: Arc<dyn Decryptor>,
    ) -> Self {
        let store = ContentStore::new(&config.cache_root, config.shard_depth);
        Self {
            signer: UpstreamSigner::new(&config.upstream),
            codec: AtRestCodec::new(config.codec.clone(), decryptor),
            delivery: DeliveryWriter::new(),
            invalidator: Invalidator::new(store.clone(), &config.codec),
            locks: KeyedLocks::new(),
            fetcher,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Create the cache directories.
    pub async fn initialize(&self) -> Result<(), ProxyError> {
        self.store.ensure_initialized().await?;
        info!(root = ?self.store.root(), "Cache initialized");
        Ok(())
    }

    /// Constant-time check of the presented credential.
    pub fn authorize(&self, credential: &Credential) -> bool {
        let provided = match credential {
            Credential::Exempt => return true,
            Credential::Missing => return false,
            Credential::Cookie(value) => value.as_bytes(),
        };

        let expected = self.config.auth.secret.as_bytes();
        if expected.is_empty() {
            return false;
        }
        if provided.len() != expected.len() {
            let _ = expected.ct_eq(expected);
            return false;
        }
        provided.ct_eq(expected).into()
    }

    /// Serve one request. Errors become empty responses with the mapped status.
    pub async fn handle(&self, request: ProxyRequest) -> Response {
        match self.process(&request).await {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    ProxyError::Unauthorized => {
                        debug!(object = %request.object, "Rejected request")
                    }
                    ProxyError::NotFound(_) | ProxyError::UpstreamStatus(_) => {
                        info!(object = %request.object, error = %e, "Request failed")
                    }
                    e if e.is_upstream() => {
                        warn!(object = %request.object, error = %e, "Upstream fetch failed")
                    }
                    _ => error!(object = %request.object, error = %e, "Request failed"),
                }
                e.into_response()
            }
        }
    }

    async fn process(&self, request: &ProxyRequest) -> Result<Response, ProxyError> {
        let mut job = Job::new(request);

        if !self.authorize(&request.credential) {
            job.advance(Stage::Rejected);
            return Err(ProxyError::Unauthorized);
        }
        job.advance(Stage::Authorized);

        if request.verb == Verb::Delete {
            let _guard = self.locks.lock(&job.key).await;
            self.invalidator.invalidate(&request.object).await;
            job.advance(Stage::Done);
            return Ok(empty_response(StatusCode::OK));
        }

        let resolved = {
            let _guard = self.locks.lock(&job.key).await;
            self.resolve(&mut job).await
        };
        let transmit = match resolved {
            Ok(transmit) => transmit,
            Err(e) => {
                job.advance(Stage::Error);
                return Err(e);
            }
        };

        job.advance(Stage::Delivering);
        let content_type = self
            .config
            .mime_types
            .lookup(&request.object.key, &self.config.codec.encrypted_suffix);
        match self
            .delivery
            .deliver(&transmit, request.verb, content_type, request.range.as_deref())
            .await
        {
            Ok(response) => {
                job.advance(Stage::Done);
                Ok(response)
            }
            Err(e) => {
                job.advance(Stage::Error);
                Err(e)
            }
        }
    }

    /// Make sure a decoded transmit file exists and return its path.
    ///
    /// Callers must hold the key's lock.
    async fn resolve(&self, job: &mut Job<'_>) -> Result<PathBuf, ProxyError> {
        let request: &ProxyRequest = job.request;
        let object = &request.object;
        let entry = self
            .store
            .sharded_path_for(object.namespace, &job.key)
            .await?;

        let envelope = if self.store.exists(&entry).await {
            job.advance(Stage::CacheHit);
            self.codec.classify(object, None)
        } else {
            job.advance(Stage::CacheMiss);
            let url = self.signer.upstream_url(object)?;
            let staged = self.store.stage(&entry).await?;

            job.advance(Stage::Fetching);
            match self.fetcher.fetch_into(url, staged).await {
                Ok(fetched) => {
                    job.advance(Stage::FetchOk);
                    job.fetched = true;
                    self.codec.classify(object, Some(&fetched.headers))
                }
                Err(e) => {
                    job.advance(Stage::FetchFailed);
                    return Err(e);
                }
            }
        };

        // A transmit file left over from an earlier entry must not be reused
        // for freshly fetched ciphertext.
        if job.fetched && envelope == Envelope::SuffixEncrypted {
            let stale = self.codec.transmit_path(&entry, &envelope);
            self.store.delete(&stale).await?;
        }

        job.advance(Stage::Decoding);
        let transmit = self.codec.decode(&entry, &envelope).await?;

        if job.fetched {
            self.spawn_post_fetch_hook(&entry);
        }
        Ok(transmit)
    }

    /// Run the configured hook on a freshly fetched entry without waiting for it.
    fn spawn_post_fetch_hook(&self, entry: &Path) {
        let Some((program, args)) = self
            .config
            .post_fetch_hook
            .as_ref()
            .and_then(|hook| hook.split_first())
        else {
            return;
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(entry)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let program = program.clone();
        let entry = entry.to_path_buf();
        tokio::spawn(async move {
            match command.status().await {
                Ok(status) if status.success() => {
                    debug!(program = %program, path = ?entry, "Post-fetch hook finished")
                }
                Ok(status) => {
                    warn!(program = %program, path = ?entry, status = %status, "Post-fetch hook failed")
                }
                Err(e) => warn!(program = %program, path = ?entry, error = %e, "Failed to run post-fetch hook"),
            }
        });
    }
}
