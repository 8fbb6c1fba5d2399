//! # Upstream Fetcher
//!
//! Streams an upstream object into a [`StagedEntry`]. The entry is committed
//! only after the body ended cleanly with a 200; every other outcome discards
//! what was written.

use std::sync::Arc;

use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use reqwest::{Client, StatusCode};
use rustls::{ClientConfig, crypto::ring};
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::StagedEntry;
use crate::config::UpstreamConfig;
use crate::error::ProxyError;

/// Create a reqwest Client for upstream fetches
pub fn create_client(config: &UpstreamConfig) -> Result<Client, ProxyError> {
    let provider = Arc::new(ring::default_provider());

    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Config(format!("TLS protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| ProxyError::Config(format!("TLS platform verifier: {e}")))?
        .with_no_client_auth();

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(5)
        .user_agent(&config.user_agent)
        .use_preconfigured_tls(tls_config)
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy();

    if !config.timeout.is_zero() {
        client_builder = client_builder.timeout(config.timeout);
    }

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    client_builder.build().map_err(ProxyError::from)
}

/// Result of a committed fetch.
#[derive(Debug)]
pub struct Fetched {
    /// Upstream response headers, used to classify the envelope
    pub headers: HeaderMap,
    pub bytes: u64,
}

#[derive(Debug, Clone)]
pub struct UpstreamFetcher {
    client: Client,
}

impl UpstreamFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &UpstreamConfig) -> Result<Self, ProxyError> {
        Ok(Self::new(create_client(config)?))
    }

    /// GET `url` and stream the body into `staged`, committing on a clean 200.
    pub async fn fetch_into(&self, url: Url, staged: StagedEntry) -> Result<Fetched, ProxyError> {
        // The query carries the signature; keep it out of the logs.
        let target = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
        debug!(upstream = %target, "Requesting upstream object");

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(upstream = %target, error = %e, "Upstream request failed");
                staged.abort().await;
                return Err(e.into());
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!(upstream = %target, status = %status, "Upstream returned non-success status");
            staged.abort().await;
            return Err(ProxyError::UpstreamStatus(status));
        }

        let headers = response.headers().clone();
        let expected = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let mut staged = staged;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let written = match chunk {
                Ok(chunk) => staged.write(&chunk).await,
                Err(e) => {
                    warn!(
                        upstream = %target,
                        written = staged.written(),
                        error = %e,
                        "Upstream body failed mid-stream"
                    );
                    staged.abort().await;
                    return Err(e.into());
                }
            };
            if let Err(e) = written {
                staged.abort().await;
                return Err(e.into());
            }
        }

        if let Some(expected) = expected {
            if staged.written() != expected {
                warn!(
                    upstream = %target,
                    expected,
                    written = staged.written(),
                    "Upstream closed before the advertised length"
                );
                staged.abort().await;
                return Err(ProxyError::UpstreamClosed);
            }
        }

        let bytes = staged.commit().await?;
        info!(upstream = %target, bytes, "Fetched upstream object");
        Ok(Fetched { headers, bytes })
    }
}
