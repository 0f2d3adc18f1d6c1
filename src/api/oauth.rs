//! OAuth 1.0a request signing for the vendor API
//!
//! The bulk API host only accepts two-legged OAuth 1.0a: each request
//! carries an `Authorization: OAuth ...` header signed with the consumer
//! key and secret via HMAC-SHA1, plus an `oauth_body_hash` digest when the
//! request has a body. There is no token exchange; the signature stands in
//! for the session cookie the school host uses.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha1::{Digest, Sha1};

type HmacSha1 = Hmac<Sha1>;

/// Consumer key and secret for the vendor API's two-legged OAuth
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

/// Signs requests bound for the vendor API host
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
}

impl Signer {
    /// Creates a signer from consumer credentials
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    /// Builds the `Authorization` header value for one request
    ///
    /// # Arguments
    /// * `method` - HTTP method (case-insensitive)
    /// * `url` - Full request URL; any query parameters join the signature
    /// * `body` - Raw request body, hashed into `oauth_body_hash` when present
    ///
    /// # Returns
    /// An `OAuth k="v", ...` header value with a fresh nonce and timestamp
    pub fn authorization(&self, method: &str, url: &str, body: Option<&str>) -> String {
        let nonce = format!("{:032x}", rand::random::<u128>());
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.authorization_at(method, url, body, &nonce, timestamp)
    }

    /// Deterministic form of [`Signer::authorization`] with the nonce and
    /// timestamp supplied by the caller
    fn authorization_at(
        &self,
        method: &str,
        url: &str,
        body: Option<&str>,
        nonce: &str,
        timestamp: u64,
    ) -> String {
        let mut params: Vec<(String, String)> = vec![
            ("oauth_consumer_key".to_string(), self.credentials.key.clone()),
            ("oauth_nonce".to_string(), nonce.to_string()),
            ("oauth_signature_method".to_string(), "HMAC-SHA1".to_string()),
            ("oauth_timestamp".to_string(), timestamp.to_string()),
            ("oauth_version".to_string(), "1.0".to_string()),
        ];
        if let Some(body) = body {
            params.push(("oauth_body_hash".to_string(), body_hash(body)));
        }

        let signature = self.signature(method, url, &params);
        params.push(("oauth_signature".to_string(), signature));
        params.sort();

        let fields = params
            .iter()
            .map(|(name, value)| format!("{}=\"{}\"", name, percent_encode(value)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("OAuth {}", fields)
    }

    /// HMAC-SHA1 over the signature base string, base64-encoded
    fn signature(&self, method: &str, url: &str, params: &[(String, String)]) -> String {
        let base = signature_base_string(method, url, params);
        // Two-legged: no token secret, so the key ends with a bare '&'
        let key = format!("{}&", percent_encode(&self.credentials.secret));
        BASE64.encode(hmac_sha1(key.as_bytes(), base.as_bytes()))
    }
}

fn hmac_sha1(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Base64 SHA-1 digest of a request body, per the `oauth_body_hash`
/// extension the vendor requires for POSTs
fn body_hash(body: &str) -> String {
    BASE64.encode(Sha1::digest(body.as_bytes()))
}

/// Percent-encodes with the RFC 5849 unreserved set (`A-Z a-z 0-9 - . _ ~`)
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Reverses percent-encoding; malformed escapes pass through untouched
fn percent_decode(input: &str) -> String {
    fn hex_value(byte: u8) -> Option<u8> {
        (byte as char).to_digit(16).map(|digit| digit as u8)
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi * 16 + lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Splits a URL into its base form and decoded query pairs
fn split_query(url: &str) -> (&str, Vec<(String, String)>) {
    match url.split_once('?') {
        Some((base, query)) => {
            let pairs = query
                .split('&')
                .filter(|pair| !pair.is_empty())
                .map(|pair| match pair.split_once('=') {
                    Some((name, value)) => (percent_decode(name), percent_decode(value)),
                    None => (percent_decode(pair), String::new()),
                })
                .collect();
            (base, pairs)
        }
        None => (url, Vec::new()),
    }
}

/// Percent-encodes each pair, sorts by name then value, joins with `&`
fn normalize_params(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(name, value)| (percent_encode(name), percent_encode(value)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// `METHOD&enc(url)&enc(normalized params)` per RFC 5849 section 3.4.1
fn signature_base_string(method: &str, url: &str, params: &[(String, String)]) -> String {
    let (base_url, query) = split_query(url);
    let mut all = params.to_vec();
    all.extend(query);
    format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(base_url),
        percent_encode(&normalize_params(&all))
    )
}

// ============================================================================
// Tests
// ============================================================================
