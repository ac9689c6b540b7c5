//! Authentication methods.
//!
//! A realm walks the client's `authmethods` in order and uses the first
//! [`Authenticator`] it has for one of them. Methods that need a
//! challenge/response exchange talk to the client through the peer they are
//! given; nothing else is read from the peer until authentication finishes.

use async_trait::async_trait;
use junction_protocol::{next_global_id, Dict, MessageType};
use junction_transport::{Peer, TransportError};
use thiserror::Error;

/// Method name for anonymous authentication.
pub const ANONYMOUS: &str = "anonymous";

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// None of the client's methods is supported by the realm.
    #[error("No supported authentication method offered")]
    NoSupportedMethod,

    /// The method rejected the client.
    #[error("Authentication rejected: {0}")]
    Rejected(String),

    /// The client answered a challenge with the wrong message.
    #[error("Unexpected {0} message during authentication")]
    UnexpectedMessage(MessageType),

    /// Transport error during a challenge exchange.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Authenticated identity.
    pub authid: String,
    /// Role the identity is granted in the realm.
    pub authrole: String,
    /// Who vouched for the identity.
    pub authprovider: String,
}

/// An authentication method.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Method name as it appears in `authmethods`.
    fn method(&self) -> &str;

    /// Authenticate a client from its HELLO details.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is rejected or the exchange fails.
    async fn authenticate(&self, peer: &dyn Peer, details: &Dict) -> Result<Identity, AuthError>;
}

/// Anonymous authentication.
///
/// Accepts everyone. The identity is the client's requested `authid`, or a
/// generated one.
#[derive(Debug, Clone)]
pub struct AnonymousAuth {
    role: String,
}

impl AnonymousAuth {
    /// Create an anonymous authenticator granting `role`.
    #[must_use]
    pub fn new(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }
}

#[async_trait]
impl Authenticator for AnonymousAuth {
    fn method(&self) -> &str {
        ANONYMOUS
    }

    async fn authenticate(&self, _peer: &dyn Peer, details: &Dict) -> Result<Identity, AuthError> {
        let authid = details
            .get("authid")
            .and_then(|v| v.as_str())
            .filter(|authid| !authid.is_empty())
            .map_or_else(|| next_global_id().to_string(), str::to_string);

        Ok(Identity {
            authid,
            authrole: self.role.clone(),
            authprovider: "static".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_transport::linked_peers;
    use serde_json::json;

    #[tokio::test]
    async fn test_anonymous_uses_requested_authid() {
        let (peer, _client) = linked_peers(1);
        let details = json!({"authid": "alice"});
        let identity = AnonymousAuth::new("anonymous")
            .authenticate(&peer, details.as_object().unwrap())
            .await
            .unwrap();

        assert_eq!(identity.authid, "alice");
        assert_eq!(identity.authrole, "anonymous");
        assert_eq!(identity.authprovider, "static");
    }

    #[tokio::test]
    async fn test_anonymous_generates_authid() {
        let (peer, _client) = linked_peers(1);
        let auth = AnonymousAuth::new("guest");
        let first = auth.authenticate(&peer, &Dict::new()).await.unwrap();
        let second = auth.authenticate(&peer, &Dict::new()).await.unwrap();

        assert_eq!(first.authrole, "guest");
        assert!(!first.authid.is_empty());
        assert_ne!(first.authid, second.authid);
    }
}
