//! Realm registry and session admission.
//!
//! The registry is owned by a single worker task. Every read or write of it
//! is submitted to that task as an action over a bounded queue, so registry
//! mutations and the closed-flag check are totally ordered without a lock.
//! Actions must never wait on another action.

use junction_protocol::{
    next_global_id, uri, validate_uri, Abort, Dict, Hello, Id, Message, MessageType, Uri, Welcome,
};
use junction_transport::{Peer, TransportError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::auth::{AuthError, ANONYMOUS};
use crate::basic::BasicRealmFactory;
use crate::realm::{Realm, RealmConfig, RealmError, RealmFactory};
use crate::roles::{validate_client_roles, RoleError};
use crate::session::Session;

/// Default time a new connection has to send HELLO.
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Realm URI rejected by the router's URI rules.
    #[error("Invalid realm URI {uri} (strict: {strict}): {reason}")]
    InvalidUri {
        uri: Uri,
        strict: bool,
        reason: &'static str,
    },

    /// The router is shutting down.
    #[error("Router is closed")]
    Closed,

    /// A realm with this URI is already registered.
    #[error("Realm already exists: {0}")]
    AlreadyExists(Uri),
}

/// Why a connection was not admitted.
#[derive(Debug, Error)]
pub enum AttachError {
    /// No message arrived before the HELLO deadline.
    #[error("Did not receive HELLO within {0:?}")]
    HelloTimeout(Duration),

    /// The connection failed or closed before HELLO.
    #[error("Did not receive HELLO: {0}")]
    NoHello(TransportError),

    /// The first message was not HELLO.
    #[error("Protocol error: expected HELLO, received {0}")]
    UnexpectedMessage(MessageType),

    /// HELLO named no realm.
    #[error("No realm requested")]
    NoRealmRequested,

    /// The realm does not exist and none may be created.
    #[error("No realm \"{0}\" exists on this router")]
    NoSuchRealm(Uri),

    /// The realm does not exist and its URI is not valid for creation.
    #[error("Invalid realm URI {uri}: {reason}")]
    InvalidRealmUri { uri: Uri, reason: &'static str },

    /// The router is shutting down.
    #[error("Router is closing, not accepting new clients")]
    Shutdown,

    /// Role negotiation failed.
    #[error(transparent)]
    Roles(#[from] RoleError),

    /// The realm refused to authenticate the client.
    #[error("Authentication error: {0}")]
    AuthenticationFailed(#[from] AuthError),

    /// The realm refused the authenticated session.
    #[error("Session refused: {0}")]
    AdmissionRefused(#[from] RealmError),

    /// WELCOME could not be delivered.
    #[error("Failed to send WELCOME: {0}")]
    Transport(TransportError),
}

impl AttachError {
    /// The ABORT reason sent to the client for this failure.
    #[must_use]
    pub fn abort_reason(&self) -> &'static str {
        match self {
            AttachError::HelloTimeout(_)
            | AttachError::NoHello(_)
            | AttachError::UnexpectedMessage(_) => uri::PROTOCOL_VIOLATION,
            AttachError::NoRealmRequested
            | AttachError::NoSuchRealm(_)
            | AttachError::InvalidRealmUri { .. } => uri::NO_SUCH_REALM,
            AttachError::Roles(_) => uri::NO_SUCH_ROLE,
            AttachError::AuthenticationFailed(_) => uri::AUTHENTICATION_FAILED,
            AttachError::Shutdown
            | AttachError::AdmissionRefused(_)
            | AttachError::Transport(_) => uri::SYSTEM_SHUTDOWN,
        }
    }

    /// Build the ABORT message for this failure.
    ///
    /// Lookup and shutdown failures carry no details.
    #[must_use]
    pub fn to_abort(&self) -> Abort {
        let abort = Abort::new(self.abort_reason());
        match self {
            AttachError::NoSuchRealm(_)
            | AttachError::Shutdown
            | AttachError::AdmissionRefused(_) => abort,
            _ => abort.with_error(self.to_string()),
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Apply strict URI rules to realm URIs.
    pub strict_uri: bool,
    /// Template for realms created on demand when a client asks for an
    /// unknown realm. `None` disables automatic creation.
    pub auto_realm: Option<RealmConfig>,
    /// Time a new connection has to send HELLO.
    pub hello_timeout: Duration,
    /// Capacity of the registry action queue.
    pub action_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            strict_uri: false,
            auto_realm: None,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            action_capacity: 256,
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    /// Whether the router has been closed.
    pub closed: bool,
    /// Registered realms.
    pub realms: Vec<RealmStats>,
}

/// Per-realm statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RealmStats {
    pub uri: Uri,
    pub sessions: usize,
}

type Action = Box<dyn FnOnce(&mut Registry) + Send>;

/// State owned by the worker task.
struct Registry {
    realms: HashMap<Uri, Arc<dyn Realm>>,
    tasks: JoinSet<()>,
    closed: bool,
    auto_realm: Option<RealmConfig>,
    strict_uri: bool,
    factory: Arc<dyn RealmFactory>,
}

impl Registry {
    fn register(&mut self, realm: Arc<dyn Realm>) -> Result<Arc<dyn Realm>, RouterError> {
        if self.closed {
            return Err(RouterError::Closed);
        }
        let uri = realm.uri().clone();
        if self.realms.contains_key(&uri) {
            return Err(RouterError::AlreadyExists(uri));
        }

        self.realms.insert(uri.clone(), realm.clone());
        let runner = realm.clone();
        self.tasks.spawn(async move {
            runner.run().await;
            debug!(realm = %uri, "Realm task finished");
        });
        Ok(realm)
    }

    fn resolve(&mut self, uri: &Uri) -> Result<Arc<dyn Realm>, AttachError> {
        if self.closed {
            return Err(AttachError::Shutdown);
        }
        if let Some(realm) = self.realms.get(uri) {
            return Ok(realm.clone());
        }

        let Some(template) = &self.auto_realm else {
            return Err(AttachError::NoSuchRealm(uri.clone()));
        };
        validate_uri(uri.as_str(), self.strict_uri).map_err(|reason| {
            AttachError::InvalidRealmUri {
                uri: uri.clone(),
                reason,
            }
        })?;

        let config = RealmConfig {
            uri: uri.clone(),
            strict_uri: self.strict_uri,
            ..template.clone()
        };
        let realm = self.factory.build(config);
        // Within one action nothing else can have registered the URI.
        let realm = self.register(realm).map_err(|_| AttachError::Shutdown)?;
        info!(realm = %uri, "Auto-added realm");
        Ok(realm)
    }

    fn shutdown(&mut self) -> JoinSet<()> {
        self.closed = true;
        for (uri, realm) in self.realms.drain() {
            debug!(realm = %uri, "Closing realm");
            realm.close();
        }
        mem::take(&mut self.tasks)
    }

    fn stats(&self) -> RouterStats {
        let mut realms: Vec<_> = self
            .realms
            .iter()
            .map(|(uri, realm)| RealmStats {
                uri: uri.clone(),
                sessions: realm.session_count(),
            })
            .collect();
        realms.sort_by(|a, b| a.uri.cmp(&b.uri));

        RouterStats {
            closed: self.closed,
            realms,
        }
    }
}

/// The session router.
///
/// Cheap to clone; all clones share one registry. The worker task stops once
/// every clone has been dropped.
#[derive(Clone)]
pub struct Router {
    actions: mpsc::Sender<Action>,
    strict_uri: bool,
    hello_timeout: Duration,
}

impl Router {
    /// Create a router building [`BasicRealm`](crate::basic::BasicRealm)s.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        Self::with_factory(config, Arc::new(BasicRealmFactory::new()))
    }

    /// Create a router building realms with `factory`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn with_factory(config: RouterConfig, factory: Arc<dyn RealmFactory>) -> Self {
        info!(
            strict_uri = config.strict_uri,
            auto_realm = config.auto_realm.is_some(),
            hello_timeout = ?config.hello_timeout,
            "Creating router"
        );

        let (actions, mut queue) = mpsc::channel::<Action>(config.action_capacity.max(1));
        let mut registry = Registry {
            realms: HashMap::new(),
            tasks: JoinSet::new(),
            closed: false,
            auto_realm: config.auto_realm,
            strict_uri: config.strict_uri,
            factory,
        };

        tokio::spawn(async move {
            while let Some(action) = queue.recv().await {
                action(&mut registry);
            }
            debug!("Router worker stopped");
        });

        Self {
            actions,
            strict_uri: config.strict_uri,
            hello_timeout: config.hello_timeout,
        }
    }

    /// Run `f` on the worker and wait for its result.
    async fn submit<T, F>(&self, f: F) -> Result<T, RouterError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Registry) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let action: Action = Box::new(move |registry: &mut Registry| {
            let _ = tx.send(f(registry));
        });
        self.actions
            .send(action)
            .await
            .map_err(|_| RouterError::Closed)?;
        rx.await.map_err(|_| RouterError::Closed)
    }

    /// Register a realm built from `config` and start it.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI is invalid, the router is closed, or the
    /// realm already exists.
    pub async fn add_realm(&self, config: RealmConfig) -> Result<Arc<dyn Realm>, RouterError> {
        let strict = self.strict_uri;
        validate_uri(config.uri.as_str(), strict).map_err(|reason| RouterError::InvalidUri {
            uri: config.uri.clone(),
            strict,
            reason,
        })?;

        let uri = config.uri.clone();
        let realm = self
            .submit(move |registry| {
                let realm = registry.factory.build(config);
                registry.register(realm)
            })
            .await??;

        info!(realm = %uri, "Added realm");
        Ok(realm)
    }

    /// Look up a registered realm.
    pub async fn realm(&self, uri: &str) -> Option<Arc<dyn Realm>> {
        let uri = Uri::new(uri);
        self.submit(move |registry| registry.realms.get(&uri).cloned())
            .await
            .ok()
            .flatten()
    }

    /// Snapshot of the registry.
    pub async fn stats(&self) -> RouterStats {
        self.submit(|registry| registry.stats())
            .await
            .unwrap_or_else(|_| RouterStats {
                closed: true,
                realms: Vec::new(),
            })
    }

    /// Run the session handshake on a new connection.
    ///
    /// On success the session has been welcomed and belongs to its realm. On
    /// failure the client has been sent ABORT and the connection closed.
    ///
    /// # Errors
    ///
    /// Returns why the connection was not admitted.
    pub async fn attach(&self, peer: Box<dyn Peer>) -> Result<Id, AttachError> {
        let peer: Arc<dyn Peer> = Arc::from(peer);

        match self.handshake(&peer).await {
            Ok(id) => Ok(id),
            Err(AttachError::Transport(e)) => {
                let _ = peer.close().await;
                Err(AttachError::Transport(e))
            }
            Err(err) => {
                warn!(peer = %peer.id(), reason = err.abort_reason(), "Aborting client connection: {}", err);
                if let Err(e) = peer.send(err.to_abort().into()).await {
                    debug!(peer = %peer.id(), "Failed to send ABORT: {}", e);
                }
                let _ = peer.close().await;
                Err(err)
            }
        }
    }

    async fn handshake(&self, peer: &Arc<dyn Peer>) -> Result<Id, AttachError> {
        let hello = self.receive_hello(peer.as_ref()).await?;
        if hello.realm.is_empty() {
            return Err(AttachError::NoRealmRequested);
        }

        let realm_uri = hello.realm.clone();
        let realm = self
            .submit(move |registry| registry.resolve(&realm_uri))
            .await
            .map_err(|_| AttachError::Shutdown)??;

        let mut details = hello.details;
        validate_client_roles(&details)?;
        if !details.contains_key("authmethods") {
            details.insert(
                "authmethods".to_string(),
                Value::Array(vec![Value::String(ANONYMOUS.to_string())]),
            );
        }

        let welcome_details = realm.authenticate(peer.as_ref(), &details).await?;

        let id = next_global_id();
        let session_details = session_details(&hello.realm, &details, &welcome_details);
        let session = Arc::new(Session::new(peer.clone(), id, session_details, &details));
        realm.admit(session.clone()).await?;

        let welcome = Welcome {
            id,
            details: welcome_details,
        };
        let sent = peer.send(Message::Welcome(welcome)).await;
        if sent.is_err() {
            session.end(None);
        }
        realm.start(session);
        sent.map_err(AttachError::Transport)?;

        info!(
            realm = %hello.realm,
            session = id,
            peer = %peer.id(),
            "Created session"
        );
        Ok(id)
    }

    async fn receive_hello(&self, peer: &dyn Peer) -> Result<Hello, AttachError> {
        match peer.recv_timeout(self.hello_timeout).await {
            Ok(Message::Hello(hello)) => {
                debug!(peer = %peer.id(), realm = %hello.realm, "Received HELLO");
                Ok(hello)
            }
            Ok(other) => Err(AttachError::UnexpectedMessage(other.message_type())),
            Err(TransportError::Timeout) => Err(AttachError::HelloTimeout(self.hello_timeout)),
            Err(e) => Err(AttachError::NoHello(e)),
        }
    }

    /// Close every realm and wait for all realm tasks to finish.
    ///
    /// Later calls to [`add_realm`](Self::add_realm) fail and later attaches
    /// are aborted with `system_shutdown`. A call made while another is still
    /// waiting returns without waiting.
    pub async fn close(&self) {
        let Ok(mut tasks) = self.submit(|registry| registry.shutdown()).await else {
            return;
        };

        info!(realms = tasks.len(), "Router closing, waiting for realms");
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                warn!("Realm task failed: {}", e);
            }
        }
        info!("Router closed");
    }
}

/// Details recorded on the session.
fn session_details(realm: &Uri, hello_details: &Dict, welcome_details: &Dict) -> Dict {
    let mut details = Dict::new();
    details.insert("realm".to_string(), Value::String(realm.to_string()));
    if let Some(roles) = hello_details.get("roles") {
        details.insert("roles".to_string(), roles.clone());
    }
    for key in ["authid", "authrole", "authmethod", "authprovider"] {
        if let Some(value) = welcome_details.get(key) {
            details.insert(key.to_string(), value.clone());
        }
    }
    details
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_reasons() {
        assert_eq!(
            AttachError::HelloTimeout(DEFAULT_HELLO_TIMEOUT).abort_reason(),
            uri::PROTOCOL_VIOLATION
        );
        assert_eq!(
            AttachError::UnexpectedMessage(MessageType::Goodbye).abort_reason(),
            uri::PROTOCOL_VIOLATION
        );
        assert_eq!(AttachError::NoRealmRequested.abort_reason(), uri::NO_SUCH_REALM);
        assert_eq!(
            AttachError::NoSuchRealm(Uri::new("x")).abort_reason(),
            uri::NO_SUCH_REALM
        );
        assert_eq!(
            AttachError::Roles(RoleError::NoRoles).abort_reason(),
            uri::NO_SUCH_ROLE
        );
        assert_eq!(
            AttachError::AuthenticationFailed(AuthError::NoSupportedMethod).abort_reason(),
            uri::AUTHENTICATION_FAILED
        );
        assert_eq!(AttachError::Shutdown.abort_reason(), uri::SYSTEM_SHUTDOWN);
        assert_eq!(
            AttachError::AdmissionRefused(RealmError::Closed).abort_reason(),
            uri::SYSTEM_SHUTDOWN
        );
    }

    #[test]
    fn test_abort_details() {
        let abort = AttachError::Roles(RoleError::InvalidRole("bogus".into())).to_abort();
        assert_eq!(abort.reason.as_str(), uri::NO_SUCH_ROLE);
        assert_eq!(abort.details["error"], "Invalid client role: bogus");

        let abort = AttachError::Shutdown.to_abort();
        assert!(abort.details.is_empty());
    }

    #[test]
    fn test_session_details() {
        let hello: Dict = serde_json::from_str(r#"{"roles": {"caller": {}}, "authid": "x"}"#).unwrap();
        let welcome: Dict = serde_json::from_str(
            r#"{"roles": {"dealer": {}}, "authid": "alice", "authrole": "user",
                "authmethod": "ticket", "authprovider": "static"}"#,
        )
        .unwrap();

        let details = session_details(&Uri::new("realm1"), &hello, &welcome);
        assert_eq!(details["realm"], "realm1");
        assert!(details["roles"]["caller"].is_object());
        assert_eq!(details["authid"], "alice");
        assert_eq!(details["authrole"], "user");
        assert_eq!(details["authmethod"], "ticket");
        assert_eq!(details["authprovider"], "static");
    }

    #[tokio::test]
    async fn test_default_config() {
        let config = RouterConfig::default();
        assert_eq!(config.hello_timeout, Duration::from_secs(5));
        assert!(config.auto_realm.is_none());

        let router = Router::new(config);
        let stats = router.stats().await;
        assert!(!stats.closed);
        assert!(stats.realms.is_empty());
    }
}
