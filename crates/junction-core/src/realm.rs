//! The realm interface the router drives.
//!
//! The router only registers realms, hands them authenticated sessions, and
//! shuts them down. What a realm does with its sessions is up to the
//! implementation; [`BasicRealm`](crate::basic::BasicRealm) is the one
//! shipped with the crate.

use async_trait::async_trait;
use junction_protocol::{Dict, Uri};
use junction_transport::Peer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::auth::AuthError;
use crate::session::Session;

/// Realm errors.
#[derive(Debug, Error)]
pub enum RealmError {
    /// The realm is shutting down.
    #[error("Realm is closed")]
    Closed,

    /// Admission refused for another reason.
    #[error("{0}")]
    Refused(String),
}

/// Realm configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealmConfig {
    /// Realm URI.
    pub uri: Uri,
    /// Apply strict URI rules inside the realm.
    pub strict_uri: bool,
    /// Allow anonymous authentication.
    pub anonymous_auth: bool,
    /// Role granted to anonymous clients.
    pub anonymous_role: String,
}

impl Default for RealmConfig {
    fn default() -> Self {
        Self {
            uri: Uri::default(),
            strict_uri: false,
            anonymous_auth: true,
            anonymous_role: "anonymous".to_string(),
        }
    }
}

impl RealmConfig {
    /// Create a configuration for `uri` with default settings.
    #[must_use]
    pub fn new(uri: impl Into<Uri>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }
}

/// A routing namespace that sessions attach to.
///
/// Implementations must make [`run`](Realm::run) return once
/// [`close`](Realm::close) has been called; router shutdown waits for it.
#[async_trait]
pub trait Realm: Send + Sync + 'static {
    /// Realm URI.
    fn uri(&self) -> &Uri;

    /// Authenticate a client, returning the details for its WELCOME.
    ///
    /// `details` are the HELLO details with `authmethods` filled in.
    async fn authenticate(&self, peer: &dyn Peer, details: &Dict) -> Result<Dict, AuthError>;

    /// Take ownership of an authenticated session.
    ///
    /// # Errors
    ///
    /// Returns [`RealmError::Closed`] once the realm is shutting down.
    async fn admit(&self, session: Arc<Session>) -> Result<(), RealmError>;

    /// Begin serving an admitted session.
    ///
    /// Called once the router has attempted to send WELCOME, including when
    /// that send failed and the session has already been ended. Nothing may
    /// be read from or written to the peer on the session's behalf before
    /// this call.
    fn start(&self, session: Arc<Session>);

    /// Serve the realm until it is closed.
    async fn run(&self);

    /// Stop accepting sessions and end the live ones. Idempotent.
    fn close(&self);

    /// Number of live sessions.
    fn session_count(&self) -> usize {
        0
    }
}

impl std::fmt::Debug for dyn Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm").field("uri", self.uri()).finish()
    }
}

/// Builds realms from configuration.
///
/// The router uses the same factory for explicitly added realms and for
/// realms created on demand from its template.
pub trait RealmFactory: Send + Sync {
    /// Build a realm. The realm is not started.
    fn build(&self, config: RealmConfig) -> Arc<dyn Realm>;
}
