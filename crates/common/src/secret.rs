//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for every
//! value that may carry a credential: store connection URLs, store passwords,
//! bearer tokens handed over by the auth layer.
//!
//! `SecretString` implements `Debug` with redaction, so a struct deriving
//! `Debug` that holds one can be logged with `{:?}` without leaking the value.
//! Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     host: String,
//!     password: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     host: "redis.internal".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! // Password is redacted in Debug output
//! assert!(!format!("{settings:?}").contains("hunter2"));
//!
//! // Access requires an explicit call
//! assert_eq!(settings.password.expose_secret(), "hunter2");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

/// Render a connection URL with any userinfo (`user:password@`) replaced by `***`.
///
/// Used when an endpoint has to appear in logs. URLs without userinfo are
/// returned unchanged.
///
/// ```rust
/// use common::secret::redact_url_credentials;
///
/// assert_eq!(
///     redact_url_credentials("redis://:hunter2@cache:6379/0"),
///     "redis://***@cache:6379/0"
/// );
/// assert_eq!(redact_url_credentials("redis://cache:6379"), "redis://cache:6379");
/// ```
#[must_use]
pub fn redact_url_credentials(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };

    let authority_end = rest.find('/').unwrap_or(rest.len());
    let (authority, path) = rest.split_at(authority_end);

    match authority.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}{path}"),
        None => url.to_string(),
    }
}
