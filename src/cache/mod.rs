//! Cache module for storing HTTP responses to disk
//!
//! This module provides the path-keyed response cache at the center of the
//! tool. Request paths map to sanitized file names, hits are served from
//! disk without a network round trip, and resources the server refused with
//! HTTP 403 persist as a sentinel so they are skipped on later runs.

mod key;
mod store;

pub use key::{cache_key, file_component};
pub use store::{
    to_tab_json, CacheHit, CacheKind, CacheStore, CachedBody, FORBIDDEN_SENTINEL,
};
