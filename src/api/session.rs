//! Session-cookie client for the school host
//!
//! Fetches REST and HTML resources as the logged-in user, reading through
//! the disk cache. Recovers from the three failure modes the school host
//! actually produces: rate limiting (one retry after a fixed delay),
//! forbidden resources (persisted as a cache sentinel), and expired
//! sessions (detected as a redirect off the school origin).

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use md5::{Digest, Md5};
use reqwest::header::COOKIE;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{CacheHit, CacheKind, CacheStore, CachedBody, FORBIDDEN_SENTINEL};

/// Delay before the single retry after an HTTP 429 response
const RATE_LIMIT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Errors from fetching a resource on the school host
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request path was empty
    #[error("empty request path")]
    EmptyPath,

    /// The resource is forbidden for this session (HTTP 403)
    #[error("HTTP 403 for {0}")]
    Forbidden(String),

    /// The response left the school origin, which is how an expired
    /// session presents (a redirect to the vendor login page)
    #[error("request to {path} redirected to {location}, outside {host} (is the session expired?)")]
    OffsiteRedirect {
        path: String,
        location: String,
        host: String,
    },

    /// Any other non-2xx response
    #[error("HTTP {status} for {url}: {body}")]
    UnexpectedStatus {
        status: u16,
        url: String,
        body: String,
    },

    /// The cached entry decoded as a different kind than requested
    #[error("cached entry for {path} is not {expected:?}")]
    WrongKind { path: String, expected: CacheKind },

    /// The configured host or request path does not form a valid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP transport failure
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Cache file I/O failure
    #[error("cache I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Options for a single fetch
#[derive(Debug, Clone, Copy, Default)]
pub struct FetchOptions<'a> {
    /// Persist an HTTP 403 as the cache sentinel instead of failing the run
    pub allow_forbidden: bool,
    /// Disable the single retry after HTTP 429
    pub no_retry: bool,
    /// Extra headers for this request only
    pub headers: &'a [(&'a str, &'a str)],
}

/// What came back from the network before cache persistence
enum Fetched {
    Body(CachedBody),
    Forbidden,
}

/// What one network response calls for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// 2xx on the school origin: decode and cache the body
    Accept,
    /// 429 with the single retry still available: wait out the delay
    Retry,
    /// 403 under `allow_forbidden`: persist the sentinel
    Forbidden,
    /// The final URL left the school origin (expired session)
    Offsite,
    /// Any other status is fatal
    Fail,
}

/// Decides how to treat a response from its status and where it landed
///
/// The origin check comes first: an expired session redirects to the
/// vendor login page, which answers 200, so the status of an offsite
/// response proves nothing.
fn dispose(
    status: StatusCode,
    same_origin: bool,
    allow_forbidden: bool,
    retry: bool,
) -> Disposition {
    if !same_origin {
        return Disposition::Offsite;
    }
    if status == StatusCode::FORBIDDEN && allow_forbidden {
        return Disposition::Forbidden;
    }
    if status == StatusCode::TOO_MANY_REQUESTS && retry {
        return Disposition::Retry;
    }
    if status.is_success() {
        Disposition::Accept
    } else {
        Disposition::Fail
    }
}

/// Read-through client for session-authenticated school pages and APIs
///
/// Every hit is served from the [`CacheStore`] without touching the
/// network, so repeated runs only fetch what is new.
#[derive(Debug, Clone)]
pub struct SessionClient {
    client: Client,
    root: Url,
    cookie: String,
    csrf: Option<(String, String)>,
    store: CacheStore,
}

impl SessionClient {
    /// Creates a client for `host` authenticated by a session id
    ///
    /// The cookie name embeds the hex MD5 of the host name, which is how
    /// the vendor's stack names its session cookie (`SESS{md5(host)}`).
    pub fn new(host: &str, session_id: &str, store: CacheStore) -> Result<Self, FetchError> {
        let root = Url::parse(&format!("https://{}", host))?;
        Ok(Self {
            client: Client::new(),
            root,
            cookie: format!("{}={}", session_cookie_name(host), session_id),
            csrf: None,
            store,
        })
    }

    /// Adds the CSRF key/token pair sent with every request
    pub fn with_csrf(mut self, key: impl Into<String>, token: impl Into<String>) -> Self {
        self.csrf = Some((key.into(), token.into()));
        self
    }

    /// Replaces the HTTP client, e.g. to set timeouts or a proxy
    #[allow(dead_code)]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Fetches a JSON API resource through the cache
    pub async fn get_json(&self, path: &str, options: FetchOptions<'_>) -> Result<Value, FetchError> {
        match self.fetch(path, CacheKind::Json, options).await? {
            CachedBody::Json(value) => Ok(value),
            _ => Err(FetchError::WrongKind {
                path: path.to_string(),
                expected: CacheKind::Json,
            }),
        }
    }

    /// Fetches an HTML page through the cache
    pub async fn get_html(&self, path: &str, options: FetchOptions<'_>) -> Result<String, FetchError> {
        match self.fetch(path, CacheKind::Html, options).await? {
            CachedBody::Html(text) => Ok(text),
            _ => Err(FetchError::WrongKind {
                path: path.to_string(),
                expected: CacheKind::Html,
            }),
        }
    }

    /// Fetches a resource through the cache
    ///
    /// On a miss the resource is fetched from the school host and written
    /// to the cache before returning. A cached forbidden sentinel is an
    /// error only when `allow_forbidden` is set; otherwise it decodes as
    /// ordinary content (the JSON number 403), which is what the archive
    /// always stored for such resources.
    pub async fn fetch(
        &self,
        path: &str,
        kind: CacheKind,
        options: FetchOptions<'_>,
    ) -> Result<CachedBody, FetchError> {
        if path.is_empty() {
            return Err(FetchError::EmptyPath);
        }

        match self.store.read(path, kind) {
            Some(CacheHit::Body(body)) => {
                debug!("loading {} from cache", path);
                return Ok(body);
            }
            Some(CacheHit::Forbidden) => {
                debug!("loading {} from cache", path);
                return if options.allow_forbidden {
                    Err(FetchError::Forbidden(path.to_string()))
                } else {
                    Ok(sentinel_body(kind))
                };
            }
            None => {}
        }

        let fetched = self.fetch_network(path, kind, options).await?;
        self.persist(path, kind, fetched)
    }

    /// Records the network outcome in the cache and converts it to the
    /// caller-facing result
    fn persist(
        &self,
        path: &str,
        kind: CacheKind,
        fetched: Fetched,
    ) -> Result<CachedBody, FetchError> {
        match fetched {
            Fetched::Body(body) => {
                self.store.write(path, &body)?;
                Ok(body)
            }
            Fetched::Forbidden => {
                self.store.write_forbidden(path, kind)?;
                Err(FetchError::Forbidden(path.to_string()))
            }
        }
    }

    /// Downloads a resource to an explicit destination file, bypassing the
    /// path-derived cache location
    ///
    /// An existing destination counts as a hit, so re-runs skip completed
    /// downloads. A destination holding the forbidden sentinel behaves
    /// like a cached 403.
    pub async fn download(
        &self,
        path: &str,
        dest: &Path,
        options: FetchOptions<'_>,
    ) -> Result<(), FetchError> {
        if path.is_empty() {
            return Err(FetchError::EmptyPath);
        }

        if let Ok(existing) = fs::read(dest) {
            debug!("loading {} from {}", path, dest.display());
            if options.allow_forbidden && existing == FORBIDDEN_SENTINEL.as_bytes() {
                return Err(FetchError::Forbidden(path.to_string()));
            }
            return Ok(());
        }

        match self.fetch_network(path, CacheKind::File, options).await? {
            Fetched::Body(body) => {
                self.store.write_at(dest, &body)?;
                debug!("saved {} to {}", path, dest.display());
                Ok(())
            }
            Fetched::Forbidden => {
                self.store.write_forbidden_at(dest)?;
                Err(FetchError::Forbidden(path.to_string()))
            }
        }
    }

    /// Performs the network fetch, retrying once on HTTP 429
    async fn fetch_network(
        &self,
        path: &str,
        kind: CacheKind,
        options: FetchOptions<'_>,
    ) -> Result<Fetched, FetchError> {
        let url = self.root.join(path)?;
        let mut retry = !options.no_retry;

        loop {
            let mut request = self.client.get(url.clone()).header(COOKIE, &self.cookie);
            if let Some((key, token)) = &self.csrf {
                request = request.header("X-Csrf-Key", key).header("X-Csrf-Token", token);
            }
            for (name, value) in options.headers {
                request = request.header(*name, *value);
            }

            let response = request.send().await?;
            let status = response.status();
            let same_origin = response.url().origin() == self.root.origin();
            // The URL the response actually came from, after any redirects
            let final_url = response.url().to_string();

            match dispose(status, same_origin, options.allow_forbidden, retry) {
                Disposition::Accept => {
                    let body = match kind {
                        CacheKind::Json => CachedBody::Json(response.json().await?),
                        CacheKind::Html => CachedBody::Html(response.text().await?),
                        CacheKind::File => CachedBody::File(response.bytes().await?.to_vec()),
                    };
                    return Ok(Fetched::Body(body));
                }
                Disposition::Retry => {
                    retry = false;
                    warn!(
                        "rate limited on {}; retrying in {}s",
                        path,
                        RATE_LIMIT_RETRY_DELAY.as_secs()
                    );
                    tokio::time::sleep(RATE_LIMIT_RETRY_DELAY).await;
                }
                Disposition::Forbidden => return Ok(Fetched::Forbidden),
                Disposition::Offsite => {
                    return Err(FetchError::OffsiteRedirect {
                        path: path.to_string(),
                        location: final_url,
                        host: self.root.host_str().unwrap_or_default().to_string(),
                    });
                }
                Disposition::Fail => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(FetchError::UnexpectedStatus {
                        status: status.as_u16(),
                        url: final_url,
                        body,
                    });
                }
            }
        }
    }
}

/// Builds the session cookie name for a host: `SESS` + hex MD5 of the host
pub fn session_cookie_name(host: &str) -> String {
    format!("SESS{:x}", Md5::digest(host.as_bytes()))
}

/// Decodes the sentinel file as ordinary content, which is what a fetch
/// without `allow_forbidden` has always observed (the text `403` parses as
/// the JSON number 403)
fn sentinel_body(kind: CacheKind) -> CachedBody {
    match kind {
        CacheKind::Json => CachedBody::Json(Value::from(403)),
        CacheKind::Html => CachedBody::Html(FORBIDDEN_SENTINEL.to_string()),
        CacheKind::File => CachedBody::File(FORBIDDEN_SENTINEL.as_bytes().to_vec()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_client() -> (SessionClient, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = CacheStore::with_root(temp_dir.path().to_path_buf());
        // An invalid TLD guarantees the tests fail loudly if they ever
        // reach the network
        let client = SessionClient::new("school.invalid", "sess123", store)
            .expect("Client should build");
        (client, temp_dir)
    }

    #[test]
    fn test_session_cookie_name_hashes_host() {
        // MD5("abc") = 900150983cd24fb0d6963f7d28e17f72 (RFC 1321 vector)
        assert_eq!(
            session_cookie_name("abc"),
            "SESS900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_cookie_header_joins_name_and_session_id() {
        let (client, _temp_dir) = create_test_client();
        assert!(client.cookie.starts_with("SESS"));
        assert!(client.cookie.ends_with("=sess123"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_empty_path() {
        let (client, _temp_dir) = create_test_client();

        let result = client.fetch("", CacheKind::Json, FetchOptions::default()).await;

        assert!(matches!(result, Err(FetchError::EmptyPath)));
    }

    #[test]
    fn test_dispose_accepts_success_on_the_school_origin() {
        assert_eq!(dispose(StatusCode::OK, true, false, true), Disposition::Accept);
        assert_eq!(
            dispose(StatusCode::CREATED, true, true, false),
            Disposition::Accept
        );
    }

    #[test]
    fn test_dispose_treats_any_offsite_landing_as_expired_session() {
        // The vendor login page answers 200, so the status proves nothing
        assert_eq!(dispose(StatusCode::OK, false, false, true), Disposition::Offsite);
        assert_eq!(
            dispose(StatusCode::FORBIDDEN, false, true, true),
            Disposition::Offsite
        );
    }

    #[test]
    fn test_dispose_forbidden_needs_the_allow_flag() {
        assert_eq!(
            dispose(StatusCode::FORBIDDEN, true, true, true),
            Disposition::Forbidden
        );
        assert_eq!(
            dispose(StatusCode::FORBIDDEN, true, false, true),
            Disposition::Fail
        );
    }

    #[test]
    fn test_dispose_retries_a_rate_limit_only_while_available() {
        assert_eq!(
            dispose(StatusCode::TOO_MANY_REQUESTS, true, false, true),
            Disposition::Retry
        );
        assert_eq!(
            dispose(StatusCode::TOO_MANY_REQUESTS, true, false, false),
            Disposition::Fail,
            "The second rate limit should be fatal"
        );
    }

    #[test]
    fn test_dispose_fails_other_statuses() {
        assert_eq!(
            dispose(StatusCode::NOT_FOUND, true, true, true),
            Disposition::Fail
        );
        assert_eq!(
            dispose(StatusCode::INTERNAL_SERVER_ERROR, true, false, true),
            Disposition::Fail
        );
    }

    #[test]
    fn test_network_forbidden_persists_the_sentinel() {
        let (client, _temp_dir) = create_test_client();

        let result = client.persist("/v1/sections/3", CacheKind::Json, Fetched::Forbidden);

        assert!(matches!(result, Err(FetchError::Forbidden(_))));
        assert!(
            matches!(
                client.store.read("/v1/sections/3", CacheKind::Json),
                Some(CacheHit::Forbidden)
            ),
            "A forbidden response should land in the cache as the sentinel"
        );
    }

    #[test]
    fn test_network_body_persists_to_the_cache() {
        let (client, _temp_dir) = create_test_client();
        let body = CachedBody::Json(json!({"id": 3}));

        let returned = client
            .persist("/v1/sections/3", CacheKind::Json, Fetched::Body(body.clone()))
            .expect("Persist should succeed");

        assert_eq!(returned, body);
        assert!(client.store.contains("/v1/sections/3", CacheKind::Json));
    }

    #[tokio::test]
    async fn test_fetch_serves_cache_hit_without_network() {
        let (client, _temp_dir) = create_test_client();
        let cached = CachedBody::Json(json!({"id": 7}));
        client.store.write("/v1/users/7", &cached).expect("Write should succeed");

        let value = client
            .get_json("/v1/users/7", FetchOptions::default())
            .await
            .expect("Cache hit should succeed offline");

        assert_eq!(value, json!({"id": 7}));
    }

    #[tokio::test]
    async fn test_cached_sentinel_with_allow_forbidden_is_an_error() {
        let (client, _temp_dir) = create_test_client();
        client
            .store
            .write_forbidden("/v1/sections/9", CacheKind::Json)
            .expect("Write should succeed");

        let options = FetchOptions {
            allow_forbidden: true,
            ..Default::default()
        };
        let result = client.get_json("/v1/sections/9", options).await;

        match result {
            Err(FetchError::Forbidden(path)) => assert_eq!(path, "/v1/sections/9"),
            other => panic!("Expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cached_sentinel_without_flag_decodes_as_content() {
        let (client, _temp_dir) = create_test_client();
        client
            .store
            .write_forbidden("/v1/sections/9", CacheKind::Json)
            .expect("Write should succeed");

        let value = client
            .get_json("/v1/sections/9", FetchOptions::default())
            .await
            .expect("Sentinel should decode as content");

        assert_eq!(value, json!(403));
    }

    #[tokio::test]
    async fn test_html_sentinel_decodes_as_text() {
        let (client, _temp_dir) = create_test_client();
        client
            .store
            .write_forbidden("/home", CacheKind::Html)
            .expect("Write should succeed");

        let text = client
            .get_html("/home", FetchOptions::default())
            .await
            .expect("Sentinel should decode as content");

        assert_eq!(text, "403");
    }

    #[tokio::test]
    async fn test_download_skips_existing_destination() {
        let (client, temp_dir) = create_test_client();
        let dest = temp_dir.path().join("report.pdf");
        fs::write(&dest, b"already here").expect("Should write file");

        client
            .download("/attachment/1", &dest, FetchOptions::default())
            .await
            .expect("Existing destination should count as a hit");

        assert_eq!(fs::read(&dest).expect("Should read file"), b"already here");
    }

    #[tokio::test]
    async fn test_download_sentinel_destination_reports_forbidden() {
        let (client, temp_dir) = create_test_client();
        let dest = temp_dir.path().join("secret.pdf");
        fs::write(&dest, FORBIDDEN_SENTINEL).expect("Should write file");

        let options = FetchOptions {
            allow_forbidden: true,
            ..Default::default()
        };
        let result = client.download("/attachment/2", &dest, options).await;

        assert!(matches!(result, Err(FetchError::Forbidden(_))));
    }

    #[test]
    fn test_error_messages_name_the_resource() {
        let err = FetchError::UnexpectedStatus {
            status: 500,
            url: "https://school.invalid/v1/x".to_string(),
            body: "oops".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 500 for https://school.invalid/v1/x: oops");

        let err = FetchError::Forbidden("/v1/x".to_string());
        assert_eq!(err.to_string(), "HTTP 403 for /v1/x");
    }
}
