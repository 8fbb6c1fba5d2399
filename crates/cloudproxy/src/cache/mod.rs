//! # Cache System
//!
//! Content-addressed, write-once disk cache. Entries live at
//! `{root}/{namespace}/{ab}/{cd}/{digest}` and are created by renaming a
//! fully written staging file into place, so a reader never observes a
//! partially fetched object.

mod store;
mod types;

pub use store::{ContentStore, StagedEntry};
pub use types::{CacheKey, DEFAULT_SHARD_DEPTH};
