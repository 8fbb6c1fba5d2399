//! # Cloudproxy
//!
//! A fetch-through caching engine that sits in front of an object-storage
//! service. Objects are served from a sharded, content-addressed disk cache
//! and fetched from upstream on a miss.
//!
//! ## Features
//!
//! - SHA-256 cache keys with a two-level shard layout
//! - Time-bounded HMAC-SHA1 signed upstream URLs
//! - Streaming fetch into a staging file, committed by rename
//! - At-rest decryption (suffix-marked and header-marked envelopes)
//! - Range-aware delivery with cache metadata headers
//! - Per-key single flight for concurrent misses

pub mod builder;
pub mod cache;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod error;
pub mod flight;
pub mod invalidate;
pub mod mime;
pub mod object;
pub mod pipeline;
pub mod signer;
#[cfg(test)]
mod test_utils;
pub mod upstream;

pub use builder::ProxyConfigBuilder;
pub use cache::{CacheKey, ContentStore, StagedEntry};
pub use codec::{AtRestCodec, Decryptor, Envelope, ExternalDecryptor};
pub use config::{AuthConfig, CodecConfig, ProxyConfig, UpstreamConfig};
pub use delivery::{ByteRange, DeliveryWriter};
pub use error::ProxyError;
pub use flight::KeyedLocks;
pub use invalidate::Invalidator;
pub use mime::MimeTypes;
pub use object::{Credential, Namespace, ObjectId, ProxyRequest, Verb};
pub use pipeline::{FetchPipeline, Stage};
pub use signer::{SignedRequest, UpstreamSigner};
pub use upstream::{Fetched, UpstreamFetcher, create_client};
