//! # Request Descriptors
//!
//! Types handed from the router to the pipeline. The pipeline never looks
//! at raw request paths; everything it needs is in a [`ProxyRequest`].

use std::fmt;
use std::str::FromStr;

/// Upstream service an object belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Signed object-storage upstream
    ObjectStore,
    /// Unsigned video-hosting upstream
    VideoHost,
}

impl Namespace {
    /// Directory name under the cache root and first path segment of the route.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::ObjectStore => "s3",
            Namespace::VideoHost => "video",
        }
    }
}

impl FromStr for Namespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s3" => Ok(Namespace::ObjectStore),
            "video" => Ok(Namespace::VideoHost),
            other => Err(format!("Unknown namespace: {other}")),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one upstream resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub namespace: Namespace,
    pub region: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectId {
    pub fn new(
        namespace: Namespace,
        region: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            region: region.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Canonical string the cache key is derived from.
    pub fn canonical_path(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.namespace, self.bucket, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Head,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verb::Get => "GET",
            Verb::Head => "HEAD",
            Verb::Delete => "DELETE",
        })
    }
}

/// Credential presented with a request.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Value of the auth cookie
    Cookie(String),
    /// No auth cookie was sent
    Missing,
    /// Request path is the configured public path, no cookie required
    Exempt,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Cookie(_) => f.write_str("Cookie([REDACTED])"),
            Credential::Missing => f.write_str("Missing"),
            Credential::Exempt => f.write_str("Exempt"),
        }
    }
}

/// Everything the pipeline needs to serve one request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub verb: Verb,
    pub object: ObjectId,
    pub credential: Credential,
    /// Raw `Range` header value, if any
    pub range: Option<String>,
}

impl ProxyRequest {
    pub fn new(verb: Verb, object: ObjectId, credential: Credential) -> Self {
        Self {
            verb,
            object,
            credential,
            range: None,
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    pub fn with_range_option(mut self, range: Option<String>) -> Self {
        self.range = range;
        self
    }
}
