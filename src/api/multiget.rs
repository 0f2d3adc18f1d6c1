//! Bulk resource fetching through the vendor's multiget endpoint
//!
//! The vendor API host (not the school host) accepts a POST of up to 50
//! resource paths and answers them all in one round trip. Items come back
//! in request order, each with its own status code, so one batch can mix
//! successes with forbidden resources.

use std::collections::BTreeMap;
use std::io;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::api::oauth::Signer;
use crate::cache::{CacheHit, CacheKind, CacheStore, CachedBody};

/// Maximum resource paths per multiget call (vendor cap)
pub const MULTIGET_MAX_PATHS: usize = 50;

/// Errors from a bulk fetch
#[derive(Debug, Error)]
pub enum MultiGetError {
    /// A requested path was empty
    #[error("empty request path")]
    EmptyPath,

    /// The bulk call itself failed with a non-2xx status
    #[error("HTTP {status} for {url}: {body}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: String,
    },

    /// One resource in the batch came back non-2xx
    #[error("HTTP {status} for {location}: {body}")]
    ItemStatus {
        status: u16,
        location: String,
        body: String,
    },

    /// The bulk response held fewer items than the request had paths
    #[error("multiget answered {got} of {requested} paths")]
    ShortResponse { requested: usize, got: usize },

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Cache file I/O failure
    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Options for a bulk fetch
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiGetOptions {
    /// Persist per-item 403s as cache sentinels and report those paths as
    /// `None` instead of failing the whole batch
    pub allow_forbidden: bool,
}

/// Per-resource entry in the bulk response
#[derive(Debug, Deserialize)]
struct MultiGetItem {
    /// Full URL the item answers, used only for error reporting; items
    /// correlate with request paths by index
    location: String,
    response_code: u16,
    #[serde(default)]
    body: Option<Value>,
}

/// Envelope of the bulk response
#[derive(Debug, Deserialize)]
struct MultiGetResponse {
    response: Vec<MultiGetItem>,
}

/// Client for the signed bulk endpoint
#[derive(Debug, Clone)]
pub struct MultiGetClient {
    client: Client,
    endpoint: String,
    signer: Signer,
    store: CacheStore,
}

impl MultiGetClient {
    /// Creates a client for the `multiget` endpoint under `api_base`
    pub fn new(api_base: &str, signer: Signer, store: CacheStore) -> Self {
        Self {
            client: Client::new(),
            endpoint: format!("{}/multiget", api_base.trim_end_matches('/')),
            signer,
            store,
        }
    }

    /// Replaces the HTTP client, e.g. to set timeouts or a proxy
    #[allow(dead_code)]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Resolves many resource paths at once
    ///
    /// Cached paths are read from disk; the rest go through the bulk
    /// endpoint, at most [`MULTIGET_MAX_PATHS`] per call, and every fetched
    /// body is written back to the cache. Forbidden resources appear as
    /// `None` entries when [`MultiGetOptions::allow_forbidden`] is set.
    ///
    /// # Arguments
    /// * `paths` - Resource paths; duplicates resolve to one entry
    ///
    /// # Returns
    /// A map from each path to its JSON body (`None` = known-forbidden)
    pub async fn fetch_many(
        &self,
        paths: &[String],
        options: MultiGetOptions,
    ) -> Result<BTreeMap<String, Option<Value>>, MultiGetError> {
        if paths.iter().any(|path| path.is_empty()) {
            return Err(MultiGetError::EmptyPath);
        }

        let mut resolved = BTreeMap::new();
        let misses = self.partition_cached(paths, options, &mut resolved);

        for chunk in misses.chunks(MULTIGET_MAX_PATHS) {
            self.fetch_chunk(chunk, options, &mut resolved).await?;
        }
        Ok(resolved)
    }

    /// Fills `resolved` from the cache and returns the paths still needed,
    /// deduplicated and in first-seen order
    fn partition_cached(
        &self,
        paths: &[String],
        options: MultiGetOptions,
        resolved: &mut BTreeMap<String, Option<Value>>,
    ) -> Vec<String> {
        let mut misses: Vec<String> = Vec::new();
        for path in paths {
            if resolved.contains_key(path) || misses.contains(path) {
                continue;
            }
            match self.store.read(path, CacheKind::Json) {
                Some(CacheHit::Body(body)) => {
                    debug!("loading {} from cache", path);
                    resolved.insert(path.clone(), body.into_json());
                }
                Some(CacheHit::Forbidden) => {
                    debug!("loading {} from cache", path);
                    let entry = if options.allow_forbidden {
                        None
                    } else {
                        // Without the flag the sentinel decodes as content,
                        // same as a single fetch
                        Some(Value::from(403))
                    };
                    resolved.insert(path.clone(), entry);
                }
                None => misses.push(path.clone()),
            }
        }
        misses
    }

    /// Issues one signed bulk call and folds its items into `resolved`
    async fn fetch_chunk(
        &self,
        chunk: &[String],
        options: MultiGetOptions,
        resolved: &mut BTreeMap<String, Option<Value>>,
    ) -> Result<(), MultiGetError> {
        debug!("multiget of {} paths", chunk.len());
        let body = json!({ "request": chunk }).to_string();
        let authorization = self.signer.authorization("POST", &self.endpoint, Some(&body));

        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MultiGetError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.endpoint.clone(),
                body,
            });
        }

        let envelope: MultiGetResponse = response.json().await?;
        self.fold_items(chunk, envelope, options, resolved)
    }

    /// Correlates response items with request paths by index, persisting
    /// each resolved body to the cache
    ///
    /// A per-item 403 becomes a sentinel (with `allow_forbidden`) or fails
    /// the batch; any other non-2xx item fails the batch.
    fn fold_items(
        &self,
        chunk: &[String],
        envelope: MultiGetResponse,
        options: MultiGetOptions,
        resolved: &mut BTreeMap<String, Option<Value>>,
    ) -> Result<(), MultiGetError> {
        if envelope.response.len() < chunk.len() {
            return Err(MultiGetError::ShortResponse {
                requested: chunk.len(),
                got: envelope.response.len(),
            });
        }

        for (path, item) in chunk.iter().zip(envelope.response) {
            if item.response_code / 100 == 2 {
                let value = item.body.unwrap_or(Value::Null);
                self.store.write(path, &CachedBody::Json(value.clone()))?;
                resolved.insert(path.clone(), Some(value));
            } else if item.response_code == 403 && options.allow_forbidden {
                self.store.write_forbidden(path, CacheKind::Json)?;
                resolved.insert(path.clone(), None);
            } else {
                return Err(MultiGetError::ItemStatus {
                    status: item.response_code,
                    location: item.location,
                    body: item.body.map(|b| b.to_string()).unwrap_or_default(),
                });
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::oauth::Credentials;
    use tempfile::TempDir;

    /// A bulk response answering two paths: one body, one forbidden
    const MIXED_RESPONSE: &str = r#"{
        "response": [
            {
                "location": "https://api.school.invalid/v1/sections/1",
                "response_code": 200,
                "body": {"id": "1", "course_title": "Biology"}
            },
            {
                "location": "https://api.school.invalid/v1/sections/2",
                "response_code": 403
            }
        ]
    }"#;

    fn create_test_client() -> (MultiGetClient, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = CacheStore::with_root(temp_dir.path().to_path_buf());
        let signer = Signer::new(Credentials {
            key: "ck".to_string(),
            secret: "cs".to_string(),
        });
        // An invalid TLD guarantees the tests fail loudly if they ever
        // reach the network
        let client = MultiGetClient::new("https://api.school.invalid/v1", signer, store);
        (client, temp_dir)
    }

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_endpoint_joins_api_base() {
        let (client, _temp_dir) = create_test_client();
        assert_eq!(client.endpoint, "https://api.school.invalid/v1/multiget");

        let (client2, _temp_dir2) = {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let store = CacheStore::with_root(temp_dir.path().to_path_buf());
            let signer = Signer::new(Credentials {
                key: "ck".to_string(),
                secret: "cs".to_string(),
            });
            (
                MultiGetClient::new("https://api.school.invalid/v1/", signer, store),
                temp_dir,
            )
        };
        assert_eq!(
            client2.endpoint, "https://api.school.invalid/v1/multiget",
            "A trailing slash should not double up"
        );
    }

    #[test]
    fn test_bulk_response_parses() {
        let envelope: MultiGetResponse =
            serde_json::from_str(MIXED_RESPONSE).expect("Fixture should parse");

        assert_eq!(envelope.response.len(), 2);
        assert_eq!(envelope.response[0].response_code, 200);
        assert!(envelope.response[0].body.is_some());
        assert_eq!(envelope.response[1].response_code, 403);
        assert!(envelope.response[1].body.is_none());
    }

    #[tokio::test]
    async fn test_fetch_many_serves_cached_paths_offline() {
        let (client, _temp_dir) = create_test_client();
        client
            .store
            .write("/v1/sections/1", &CachedBody::Json(json!({"id": "1"})))
            .expect("Write should succeed");
        client
            .store
            .write("/v1/sections/2", &CachedBody::Json(json!({"id": "2"})))
            .expect("Write should succeed");

        let resolved = client
            .fetch_many(
                &paths(&["/v1/sections/1", "/v1/sections/2"]),
                MultiGetOptions::default(),
            )
            .await
            .expect("All-cached batch should succeed offline");

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved["/v1/sections/1"], Some(json!({"id": "1"})));
        assert_eq!(resolved["/v1/sections/2"], Some(json!({"id": "2"})));
    }

    #[tokio::test]
    async fn test_fetch_many_rejects_empty_path() {
        let (client, _temp_dir) = create_test_client();

        let result = client
            .fetch_many(&paths(&["/v1/users/1", ""]), MultiGetOptions::default())
            .await;

        assert!(matches!(result, Err(MultiGetError::EmptyPath)));
    }

    #[tokio::test]
    async fn test_fetch_many_deduplicates_paths() {
        let (client, _temp_dir) = create_test_client();
        client
            .store
            .write("/v1/users/1", &CachedBody::Json(json!({"id": 1})))
            .expect("Write should succeed");

        let resolved = client
            .fetch_many(
                &paths(&["/v1/users/1", "/v1/users/1"]),
                MultiGetOptions::default(),
            )
            .await
            .expect("Batch should succeed");

        assert_eq!(resolved.len(), 1);
    }

    #[tokio::test]
    async fn test_cached_sentinel_reports_none_with_allow_forbidden() {
        let (client, _temp_dir) = create_test_client();
        client
            .store
            .write_forbidden("/v1/sections/9", CacheKind::Json)
            .expect("Write should succeed");

        let resolved = client
            .fetch_many(
                &paths(&["/v1/sections/9"]),
                MultiGetOptions { allow_forbidden: true },
            )
            .await
            .expect("Batch should succeed");

        assert_eq!(resolved["/v1/sections/9"], None);
    }

    #[tokio::test]
    async fn test_cached_sentinel_decodes_as_content_without_flag() {
        let (client, _temp_dir) = create_test_client();
        client
            .store
            .write_forbidden("/v1/sections/9", CacheKind::Json)
            .expect("Write should succeed");

        let resolved = client
            .fetch_many(&paths(&["/v1/sections/9"]), MultiGetOptions::default())
            .await
            .expect("Batch should succeed");

        assert_eq!(resolved["/v1/sections/9"], Some(json!(403)));
    }

    #[test]
    fn test_fold_items_caches_bodies_and_fills_map() {
        let (client, _temp_dir) = create_test_client();
        let chunk = paths(&["/v1/sections/1", "/v1/sections/2"]);
        let envelope: MultiGetResponse =
            serde_json::from_str(MIXED_RESPONSE).expect("Fixture should parse");
        let mut resolved = BTreeMap::new();

        client
            .fold_items(
                &chunk,
                envelope,
                MultiGetOptions { allow_forbidden: true },
                &mut resolved,
            )
            .expect("Fold should succeed");

        assert_eq!(
            resolved["/v1/sections/1"],
            Some(json!({"id": "1", "course_title": "Biology"}))
        );
        assert_eq!(resolved["/v1/sections/2"], None);
        assert!(client.store.contains("/v1/sections/1", CacheKind::Json));
        assert!(
            matches!(
                client.store.read("/v1/sections/2", CacheKind::Json),
                Some(CacheHit::Forbidden)
            ),
            "The forbidden item should persist as a sentinel"
        );
    }

    #[test]
    fn test_fold_items_fails_on_forbidden_without_flag() {
        let (client, _temp_dir) = create_test_client();
        let chunk = paths(&["/v1/sections/1", "/v1/sections/2"]);
        let envelope: MultiGetResponse =
            serde_json::from_str(MIXED_RESPONSE).expect("Fixture should parse");
        let mut resolved = BTreeMap::new();

        let result = client.fold_items(&chunk, envelope, MultiGetOptions::default(), &mut resolved);

        match result {
            Err(MultiGetError::ItemStatus { status, location, .. }) => {
                assert_eq!(status, 403);
                assert_eq!(location, "https://api.school.invalid/v1/sections/2");
            }
            other => panic!("Expected ItemStatus, got {:?}", other),
        }
    }

    #[test]
    fn test_fold_items_fails_on_server_error_item() {
        let (client, _temp_dir) = create_test_client();
        let chunk = paths(&["/v1/sections/1"]);
        let envelope: MultiGetResponse = serde_json::from_str(
            r#"{"response": [{"location": "L", "response_code": 500, "body": "broken"}]}"#,
        )
        .expect("Fixture should parse");
        let mut resolved = BTreeMap::new();

        let result = client.fold_items(
            &chunk,
            envelope,
            MultiGetOptions { allow_forbidden: true },
            &mut resolved,
        );

        match result {
            Err(MultiGetError::ItemStatus { status, body, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "\"broken\"");
            }
            other => panic!("Expected ItemStatus, got {:?}", other),
        }
    }

    #[test]
    fn test_fold_items_rejects_short_response() {
        let (client, _temp_dir) = create_test_client();
        let chunk = paths(&["/v1/a", "/v1/b"]);
        let envelope: MultiGetResponse = serde_json::from_str(
            r#"{"response": [{"location": "L", "response_code": 200, "body": {}}]}"#,
        )
        .expect("Fixture should parse");
        let mut resolved = BTreeMap::new();

        let result = client.fold_items(&chunk, envelope, MultiGetOptions::default(), &mut resolved);

        assert!(matches!(
            result,
            Err(MultiGetError::ShortResponse { requested: 2, got: 1 })
        ));
    }

    #[test]
    fn test_chunk_cap_matches_vendor_limit() {
        assert_eq!(MULTIGET_MAX_PATHS, 50);
    }
}
