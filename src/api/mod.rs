//! Clients for the school host and the vendor API
//!
//! Two authentication worlds share one cache: the school host trusts the
//! browser session cookie, while the vendor's bulk API wants OAuth-signed
//! requests. Fetched either way, a resource lands in the same cache entry.

pub mod multiget;
pub mod oauth;
pub mod session;

pub use multiget::{MultiGetClient, MultiGetError, MultiGetOptions, MULTIGET_MAX_PATHS};
pub use oauth::{Credentials, Signer};
pub use session::{session_cookie_name, FetchError, FetchOptions, SessionClient};
