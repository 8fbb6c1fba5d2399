//! # Delivery
//!
//! Writes a transmit file back to the client, whole or as a single byte
//! range, together with the cache metadata headers.

use std::io::SeekFrom;
use std::path::Path;
use std::time::SystemTime;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::ProxyError;
use crate::object::Verb;

pub const X_CACHE_FILE: &str = "x-cache-file";
pub const X_CACHE_FILE_DATE: &str = "x-cache-file-date";
pub const X_CACHE_FILE_STARDATE: &str = "x-cache-file-stardate";
pub const X_CACHE_FILE_SIZE: &str = "x-cache-file-size";

/// Inclusive byte span of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Parse a single `bytes=start-end` range against a file of `size` bytes.
    ///
    /// Either bound may be omitted: the start defaults to 0 and the end to the
    /// last byte. The end is clamped to the file. Anything that cannot be
    /// served as one span yields `None` and the whole file is sent instead.
    pub fn parse(header: &str, size: u64) -> Option<Self> {
        if size == 0 {
            return None;
        }

        let ranges = header.trim().strip_prefix("bytes=")?;
        if ranges.contains(',') {
            return None;
        }

        let (start, end) = ranges.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());
        let last = size - 1;

        let start = if start.is_empty() {
            0
        } else {
            start.parse::<u64>().ok()?
        };
        let end = if end.is_empty() {
            last
        } else {
            end.parse::<u64>().ok()?.min(last)
        };

        if start > end || start >= size {
            return None;
        }
        Some(Self { start, end })
    }

    /// Number of bytes in the span.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Year plus the elapsed fraction of that UTC year, to 15 decimals.
///
/// Sent for the transmit file's modification time.
pub fn stardate(at: DateTime<Utc>) -> String {
    let year = at.year();
    let start_of = |y: i32| {
        NaiveDate::from_ymd_opt(y, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc())
    };

    let fraction = match (start_of(year), start_of(year + 1)) {
        (Some(begin), Some(end)) => {
            let elapsed = (at - begin).num_milliseconds() as f64;
            let total = (end - begin).num_milliseconds() as f64;
            elapsed / total
        }
        _ => 0.0,
    };

    format!("{:.15}", year as f64 + fraction)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryWriter;

impl DeliveryWriter {
    pub fn new() -> Self {
        Self
    }

    /// Build the response for `transmit`.
    ///
    /// `range` is the raw `Range` header; it is ignored for HEAD.
    pub async fn deliver(
        &self,
        transmit: &Path,
        verb: Verb,
        content_type: &str,
        range: Option<&str>,
    ) -> Result<Response, ProxyError> {
        let metadata = match fs::metadata(transmit).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProxyError::NotFound(format!(
                    "transmit file {} is missing",
                    transmit.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let size = metadata.len();
        let modified: DateTime<Utc> = metadata
            .modified()
            .unwrap_or_else(|_| SystemTime::now())
            .into();

        let mut builder = Response::builder()
            .header(header::CONTENT_TYPE, content_type)
            .header(X_CACHE_FILE, header_value(&transmit.to_string_lossy())?)
            .header(X_CACHE_FILE_DATE, modified.to_rfc2822())
            .header(X_CACHE_FILE_STARDATE, stardate(modified));

        if verb == Verb::Head {
            debug!(path = ?transmit, size, "Delivering headers only");
            return builder
                .status(StatusCode::OK)
                .header(header::CONTENT_LENGTH, size)
                .header(X_CACHE_FILE_SIZE, size)
                .body(Body::empty())
                .map_err(build_error);
        }

        let mut file = fs::File::open(transmit).await?;

        let span = range.and_then(|raw| ByteRange::parse(raw, size));
        let (status, length) = match span {
            Some(span) => {
                file.seek(SeekFrom::Start(span.start)).await?;
                builder = builder
                    .header(header::ACCEPT_RANGES, "bytes")
                    .header(header::CONTENT_RANGE, span.content_range(size));
                (StatusCode::PARTIAL_CONTENT, span.length())
            }
            None => (StatusCode::OK, size),
        };

        debug!(path = ?transmit, size, status = %status, length, "Delivering file");
        let body = Body::from_stream(ReaderStream::new(file.take(length)));
        builder
            .status(status)
            .header(header::CONTENT_LENGTH, length)
            .body(body)
            .map_err(build_error)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ProxyError> {
    HeaderValue::from_str(value)
        .map_err(|e| ProxyError::Io(std::io::Error::other(format!("bad header value: {e}"))))
}

fn build_error(e: axum::http::Error) -> ProxyError {
    ProxyError::Io(std::io::Error::other(format!("failed to build response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use tempfile::tempdir;

    #[test]
    fn test_parse_range() {
        assert_eq!(
            ByteRange::parse("bytes=0-99", 1000),
            Some(ByteRange { start: 0, end: 99 })
        );
        assert_eq!(
            ByteRange::parse("bytes=900-", 1000),
            Some(ByteRange { start: 900, end: 999 })
        );
        assert_eq!(
            ByteRange::parse("bytes=-50", 1000),
            Some(ByteRange { start: 0, end: 50 })
        );
        // End is clamped to the file.
        assert_eq!(
            ByteRange::parse("bytes=10-5000", 1000),
            Some(ByteRange { start: 10, end: 999 })
        );
    }

    #[test]
    fn test_unsatisfiable_ranges_fall_back() {
        for header in [
            "bytes=500-100",
            "bytes=1000-",
            "bytes=0-1,5-9",
            "bytes=abc-10",
            "items=0-10",
            "bytes=10",
        ] {
            assert_eq!(ByteRange::parse(header, 1000), None, "{header}");
        }
        assert_eq!(ByteRange::parse("bytes=0-0", 0), None);
    }

    #[test]
    fn test_stardate() {
        let new_year = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(stardate(new_year), "2024.000000000000000");

        let midyear = Utc.with_ymd_and_hms(2023, 7, 2, 12, 0, 0).unwrap();
        assert_eq!(stardate(midyear), "2023.500000000000000");
    }

    async fn fixture(len: usize) -> (tempfile::TempDir, std::path::PathBuf, Vec<u8>) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transmit");
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).await.unwrap();
        (dir, path, data)
    }

    #[tokio::test]
    async fn test_full_delivery() {
        let (_dir, path, data) = fixture(1000).await;
        let response = DeliveryWriter::new()
            .deliver(&path, Verb::Get, "video/mp4", None)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
        assert_eq!(headers[header::CONTENT_LENGTH], "1000");
        assert_eq!(headers[X_CACHE_FILE], path.to_string_lossy().as_ref());
        assert!(headers.contains_key(X_CACHE_FILE_DATE));
        assert!(headers.contains_key(X_CACHE_FILE_STARDATE));
        assert!(!headers.contains_key(header::CONTENT_RANGE));

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), data.as_slice());
    }

    #[tokio::test]
    async fn test_range_delivery() {
        let (_dir, path, data) = fixture(1000).await;
        let response = DeliveryWriter::new()
            .deliver(&path, Verb::Get, "video/mp4", Some("bytes=0-99"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        let headers = response.headers();
        assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
        assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-99/1000");
        assert_eq!(headers[header::CONTENT_LENGTH], "100");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), &data[..100]);
    }

    #[tokio::test]
    async fn test_range_in_the_middle() {
        let (_dir, path, data) = fixture(1000).await;
        let response = DeliveryWriter::new()
            .deliver(&path, Verb::Get, "video/mp4", Some("bytes=250-"))
            .await
            .unwrap();

        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 250-999/1000");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), &data[250..]);
    }

    #[tokio::test]
    async fn test_bad_range_sends_whole_file() {
        let (_dir, path, _data) = fixture(1000).await;
        let response = DeliveryWriter::new()
            .deliver(&path, Verb::Get, "video/mp4", Some("bytes=2000-3000"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
    }

    #[tokio::test]
    async fn test_head_delivery() {
        let (_dir, path, _data) = fixture(1000).await;
        let response = DeliveryWriter::new()
            .deliver(&path, Verb::Head, "video/mp4", Some("bytes=0-99"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "1000");
        assert_eq!(response.headers()[X_CACHE_FILE_SIZE], "1000");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_missing_transmit_file() {
        let dir = tempdir().unwrap();
        let result = DeliveryWriter::new()
            .deliver(&dir.path().join("gone"), Verb::Get, "text/html", None)
            .await;
        assert!(matches!(result, Err(ProxyError::NotFound(_))));
    }
}
