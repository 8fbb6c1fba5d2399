//! # Invalidator
//!
//! Drops an object from the cache. The upstream is never contacted; the
//! next GET for the object is a miss.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::cache::ContentStore;
use crate::codec::{AtRestCodec, ENCRYPTED_SIBLING_SUFFIX};
use crate::config::CodecConfig;
use crate::object::ObjectId;

#[derive(Debug, Clone)]
pub struct Invalidator {
    store: ContentStore,
    transmit_suffix: String,
}

impl Invalidator {
    pub fn new(store: ContentStore, codec: &CodecConfig) -> Self {
        Self {
            store,
            transmit_suffix: codec.transmit_suffix.clone(),
        }
    }

    /// Every file that may exist for `object`.
    pub fn artifacts(&self, object: &ObjectId) -> Vec<PathBuf> {
        let key = ContentStore::derive_key(&object.canonical_path());
        let entry = self.store.entry_path(object.namespace, &key);
        vec![
            AtRestCodec::sibling(&entry, &self.transmit_suffix),
            AtRestCodec::sibling(&entry, ENCRYPTED_SIBLING_SUFFIX),
            entry,
        ]
    }

    /// Remove the entry and its siblings. Failures are logged, never returned.
    pub async fn invalidate(&self, object: &ObjectId) {
        let mut removed = 0;
        for path in self.artifacts(object) {
            let existed = self.store.exists(&path).await;
            match self.store.delete(&path).await {
                Ok(()) if existed => removed += 1,
                Ok(()) => {}
                Err(e) => warn!(object = %object, path = ?path, error = %e, "Failed to invalidate"),
            }
        }
        info!(object = %object, removed, "Invalidated cache entry");
    }
}
