//! URIs identify realms, topics, procedures and error reasons.
//!
//! Validation follows the WAMP rules: a URI is a dot-separated list of
//! non-empty components. Loose checking only forbids whitespace and `#`;
//! strict checking restricts components to lowercase ASCII letters, digits
//! and underscores.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Maximum URI length accepted by the router.
pub const MAX_URI_LENGTH: usize = 512;

/// Requested realm does not exist on this router.
pub const NO_SUCH_REALM: &str = "wamp.error.no_such_realm";
/// Client announced no roles, or a role the router does not know.
pub const NO_SUCH_ROLE: &str = "wamp.error.no_such_role";
/// The realm rejected the client's credentials.
pub const AUTHENTICATION_FAILED: &str = "wamp.error.authentication_failed";
/// The router or realm is shutting down.
pub const SYSTEM_SHUTDOWN: &str = "wamp.close.system_shutdown";
/// The peer broke the handshake protocol.
pub const PROTOCOL_VIOLATION: &str = "wamp.exception.protocol_violation";
/// Reply to a client-initiated GOODBYE.
pub const GOODBYE_AND_OUT: &str = "wamp.close.goodbye_and_out";
/// The realm closed the session.
pub const CLOSE_REALM: &str = "wamp.close.close_realm";

/// A WAMP URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uri(String);

impl Uri {
    /// Create a URI without validating it.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    /// Get the URI as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the URI is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check the URI against the loose or strict rules.
    #[must_use]
    pub fn is_valid(&self, strict: bool) -> bool {
        validate_uri(&self.0, strict).is_ok()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Uri {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Uri {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for Uri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Uri {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Uri {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Uri {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Validate a URI.
///
/// # Errors
///
/// Returns an error message describing the first rule the URI breaks.
pub fn validate_uri(uri: &str, strict: bool) -> Result<(), &'static str> {
    if uri.is_empty() {
        return Err("URI cannot be empty");
    }
    if uri.len() > MAX_URI_LENGTH {
        return Err("URI too long");
    }
    for component in uri.split('.') {
        if component.is_empty() {
            return Err("URI contains an empty component");
        }
        if strict {
            if !component
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            {
                return Err("URI component must match [0-9a-z_]+");
            }
        } else if component.chars().any(|c| c.is_whitespace() || c == '#') {
            return Err("URI component contains whitespace or '#'");
        }
    }
    Ok(())
}
