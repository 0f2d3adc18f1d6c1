//! Cache store for persisting HTTP responses to disk
//!
//! Provides a `CacheStore` that maps request paths to files in a cache
//! directory. Entries never expire; a hit is served from disk without
//! touching the network, and invalidating a resource means deleting its
//! file. Resources the server refused with HTTP 403 persist as a sentinel
//! so they are not re-requested either.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cache::key::cache_key;

/// File content marking a resource the server refused with HTTP 403
pub const FORBIDDEN_SENTINEL: &str = "403";

/// How a cached response body is encoded on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    /// JSON API response, stored pretty-printed with tab indentation
    Json,
    /// HTML page, stored verbatim
    Html,
    /// Raw bytes (attachments, images)
    File,
}

impl CacheKind {
    /// Returns the file extension for entries of this kind
    pub fn extension(self) -> &'static str {
        match self {
            CacheKind::Json => "json",
            CacheKind::Html => "html",
            CacheKind::File => "file",
        }
    }
}

/// A response body loaded from, or destined for, the cache
#[derive(Debug, Clone, PartialEq)]
pub enum CachedBody {
    Json(Value),
    Html(String),
    File(Vec<u8>),
}

impl CachedBody {
    /// Returns the kind this body is stored as
    pub fn kind(&self) -> CacheKind {
        match self {
            CachedBody::Json(_) => CacheKind::Json,
            CachedBody::Html(_) => CacheKind::Html,
            CachedBody::File(_) => CacheKind::File,
        }
    }

    /// Extracts the JSON value, if this is a JSON body
    pub fn into_json(self) -> Option<Value> {
        match self {
            CachedBody::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Extracts the page text, if this is an HTML body
    pub fn into_html(self) -> Option<String> {
        match self {
            CachedBody::Html(text) => Some(text),
            _ => None,
        }
    }
}

/// Result of reading a cache entry
#[derive(Debug)]
pub enum CacheHit {
    /// The entry exists and decoded as content
    Body(CachedBody),
    /// The entry is the known-forbidden sentinel
    Forbidden,
}

/// Maps request paths to files under a cache root directory
///
/// File names come from [`cache_key`], so the mapping is deterministic and
/// collision-free: the same path always reads and writes the same file.
/// There is no eviction and no TTL; the cache is the archive.
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// Directory where cache files are stored
    root: PathBuf,
}

impl CacheStore {
    /// Creates a store rooted at the conventional `./cache` directory
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("cache"),
        }
    }

    /// Creates a store rooted at a custom directory
    ///
    /// Useful for testing or when a specific cache location is needed.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    /// Returns the file that backs `path` for the given kind
    ///
    /// A leading slash on the path is ignored, so `/v1/users/me` and
    /// `v1/users/me` share one entry.
    pub fn entry_path(&self, path: &str, kind: CacheKind) -> PathBuf {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        self.root
            .join(format!("{}.{}", cache_key(trimmed), kind.extension()))
    }

    /// Returns true if `path` already has an entry of the given kind
    pub fn contains(&self, path: &str, kind: CacheKind) -> bool {
        self.entry_path(path, kind).exists()
    }

    /// Ensures the directory holding `file` exists
    fn ensure_parent(file: &Path) -> io::Result<()> {
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Reads the entry for `path`
    ///
    /// Returns `None` if the entry does not exist or cannot be decoded
    /// (an unreadable entry is treated as a miss and will be re-fetched).
    /// The forbidden sentinel is reported separately so callers can decide
    /// whether to surface it as an error or as ordinary content.
    pub fn read(&self, path: &str, kind: CacheKind) -> Option<CacheHit> {
        let file = self.entry_path(path, kind);
        if kind == CacheKind::File {
            let bytes = fs::read(&file).ok()?;
            if bytes == FORBIDDEN_SENTINEL.as_bytes() {
                return Some(CacheHit::Forbidden);
            }
            return Some(CacheHit::Body(CachedBody::File(bytes)));
        }

        let text = fs::read_to_string(&file).ok()?;
        if text == FORBIDDEN_SENTINEL {
            return Some(CacheHit::Forbidden);
        }
        let body = if kind == CacheKind::Json {
            CachedBody::Json(serde_json::from_str(&text).ok()?)
        } else {
            CachedBody::Html(text)
        };
        Some(CacheHit::Body(body))
    }

    /// Writes a response body to the entry for `path`
    pub fn write(&self, path: &str, body: &CachedBody) -> io::Result<()> {
        let file = self.entry_path(path, body.kind());
        debug!("saving {} to cache", path);
        self.write_at(&file, body)
    }

    /// Writes a response body to an explicit destination file
    ///
    /// Used when the caller controls the output location, e.g. attachment
    /// downloads that keep their original file names.
    pub fn write_at(&self, file: &Path, body: &CachedBody) -> io::Result<()> {
        Self::ensure_parent(file)?;
        match body {
            CachedBody::Json(value) => fs::write(file, to_tab_json(value)?),
            CachedBody::Html(text) => fs::write(file, text),
            CachedBody::File(bytes) => fs::write(file, bytes),
        }
    }

    /// Marks `path` as known-forbidden so it is never re-fetched
    pub fn write_forbidden(&self, path: &str, kind: CacheKind) -> io::Result<()> {
        let file = self.entry_path(path, kind);
        debug!("saving {} to cache as forbidden", path);
        self.write_forbidden_at(&file)
    }

    /// Writes the forbidden sentinel to an explicit destination file
    pub fn write_forbidden_at(&self, file: &Path) -> io::Result<()> {
        Self::ensure_parent(file)?;
        fs::write(file, FORBIDDEN_SENTINEL)
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes JSON with tab indentation, matching the on-disk format the
/// archive has always used (diffs against old entries stay meaningful)
pub fn to_tab_json(value: &Value) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(buf)
}
