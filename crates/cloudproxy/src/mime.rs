//! # MIME Types
//!
//! Content-Type lookup keyed by the object key's extension. The table is
//! loaded once at startup from a JSON object of `{"ext": "type/subtype"}`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ProxyError;

pub const DEFAULT_MIME_TYPE: &str = "text/html";

static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(\w+)$").expect("extension pattern is valid"));

const BUILTIN: &[(&str, &str)] = &[
    ("html", "text/html"),
    ("txt", "text/plain"),
    ("json", "application/json"),
    ("pdf", "application/pdf"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("mp3", "audio/mpeg"),
    ("mp4", "video/mp4"),
    ("webm", "video/webm"),
];

#[derive(Debug, Clone)]
pub struct MimeTypes {
    types: HashMap<String, String>,
    default_type: String,
}

impl Default for MimeTypes {
    fn default() -> Self {
        Self {
            types: BUILTIN
                .iter()
                .map(|(ext, ty)| (ext.to_string(), ty.to_string()))
                .collect(),
            default_type: DEFAULT_MIME_TYPE.to_string(),
        }
    }
}

impl MimeTypes {
    /// Built-in table overlaid with `types`.
    pub fn from_map(types: HashMap<String, String>) -> Self {
        let mut mime = Self::default();
        mime.types.extend(types);
        mime
    }

    /// Load a JSON object mapping extensions to MIME types.
    pub fn from_json_file(path: &Path) -> Result<Self, ProxyError> {
        let raw = std::fs::read(path)?;
        let types: HashMap<String, String> = serde_json::from_slice(&raw).map_err(|e| {
            ProxyError::Config(format!("Invalid MIME types file {}: {e}", path.display()))
        })?;
        Ok(Self::from_map(types))
    }

    pub fn with_default_type(mut self, default_type: impl Into<String>) -> Self {
        self.default_type = default_type.into();
        self
    }

    pub fn default_type(&self) -> &str {
        &self.default_type
    }

    /// MIME type for `key`, looking through an `encrypted_suffix` such as `.gpg`
    /// when an extension remains underneath it.
    pub fn lookup(&self, key: &str, encrypted_suffix: &str) -> &str {
        let plain = Some(encrypted_suffix)
            .filter(|suffix| !suffix.is_empty())
            .and_then(|suffix| key.strip_suffix(suffix))
            .and_then(extension);

        plain
            .or_else(|| extension(key))
            .and_then(|ext| self.types.get(ext))
            .map(String::as_str)
            .unwrap_or(&self.default_type)
    }
}

fn extension(name: &str) -> Option<&str> {
    EXTENSION
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|ext| ext.as_str())
}
