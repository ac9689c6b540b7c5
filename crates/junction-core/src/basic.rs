//! The built-in realm.
//!
//! `BasicRealm` authenticates clients, keeps track of their sessions and
//! manages their lifetime. Each started session gets a task that watches
//! the connection for GOODBYE or disconnect, and for the session being ended
//! from the router side.

use async_trait::async_trait;
use dashmap::DashMap;
use junction_protocol::{uri, Dict, Goodbye, Id, Message, Uri};
use junction_transport::Peer;
use serde_json::{json, Value};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::auth::{AnonymousAuth, AuthError, Authenticator, Identity};
use crate::realm::{Realm, RealmConfig, RealmError, RealmFactory};
use crate::session::{EndReason, Session};

/// How long a session task may spend saying goodbye and closing its peer.
pub const CLOSE_GRACE: Duration = Duration::from_secs(2);

type Sessions = Arc<DashMap<Id, Arc<Session>>>;

#[derive(Default)]
struct Tasks {
    set: JoinSet<()>,
    /// Set once `run` has joined every task it will wait for.
    drained: bool,
}

/// A realm that admits sessions and manages their lifetime.
pub struct BasicRealm {
    config: RealmConfig,
    authenticators: Vec<Arc<dyn Authenticator>>,
    sessions: Sessions,
    tasks: Mutex<Tasks>,
    closed: watch::Sender<bool>,
}

impl BasicRealm {
    /// Create a realm with only the built-in authentication.
    #[must_use]
    pub fn new(config: RealmConfig) -> Self {
        Self::with_authenticators(config, Vec::new())
    }

    /// Create a realm with extra authentication methods.
    ///
    /// Anonymous authentication is added when the configuration allows it.
    #[must_use]
    pub fn with_authenticators(
        config: RealmConfig,
        mut authenticators: Vec<Arc<dyn Authenticator>>,
    ) -> Self {
        if config.anonymous_auth {
            authenticators.push(Arc::new(AnonymousAuth::new(config.anonymous_role.clone())));
        }
        let (closed, _) = watch::channel(false);

        Self {
            config,
            authenticators,
            sessions: Arc::new(DashMap::new()),
            tasks: Mutex::new(Tasks::default()),
            closed,
        }
    }

    /// Realm configuration.
    #[must_use]
    pub fn config(&self) -> &RealmConfig {
        &self.config
    }

    /// Look up a live session.
    #[must_use]
    pub fn session(&self, id: Id) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Check whether the realm has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn authenticator(&self, method: &str) -> Option<&Arc<dyn Authenticator>> {
        self.authenticators.iter().find(|auth| auth.method() == method)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn welcome_details(method: &str, identity: Identity) -> Dict {
    let mut details = Dict::new();
    details.insert(
        "roles".to_string(),
        json!({"broker": {"features": {}}, "dealer": {"features": {}}}),
    );
    details.insert("authid".to_string(), Value::String(identity.authid));
    details.insert("authrole".to_string(), Value::String(identity.authrole));
    details.insert("authmethod".to_string(), Value::String(method.to_string()));
    details.insert("authprovider".to_string(), Value::String(identity.authprovider));
    details
}

#[async_trait]
impl Realm for BasicRealm {
    fn uri(&self) -> &Uri {
        &self.config.uri
    }

    async fn authenticate(&self, peer: &dyn Peer, details: &Dict) -> Result<Dict, AuthError> {
        let methods = details
            .get("authmethods")
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str());

        for method in methods {
            if let Some(auth) = self.authenticator(method) {
                let identity = auth.authenticate(peer, details).await?;
                debug!(
                    realm = %self.config.uri,
                    authid = %identity.authid,
                    authmethod = method,
                    "Authenticated"
                );
                return Ok(welcome_details(method, identity));
            }
        }

        Err(AuthError::NoSupportedMethod)
    }

    async fn admit(&self, session: Arc<Session>) -> Result<(), RealmError> {
        let id = session.id();

        // Insert before checking the flag so `close` cannot miss the session.
        self.sessions.insert(id, session.clone());
        if self.is_closed() {
            self.sessions.remove(&id);
            return Err(RealmError::Closed);
        }

        info!(
            realm = %self.config.uri,
            session = id,
            authid = session.authid().unwrap_or_default(),
            "Session joined"
        );
        Ok(())
    }

    fn start(&self, session: Arc<Session>) {
        let task = serve_session(session, self.sessions.clone());
        let mut tasks = self.lock_tasks();
        if tasks.drained {
            // Already ended by `close`; the task only says goodbye.
            tokio::spawn(task);
            return;
        }
        tasks.set.spawn(task);
        while tasks.set.try_join_next().is_some() {}
    }

    async fn run(&self) {
        let mut closed = self.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;

        loop {
            let mut set = {
                let mut tasks = self.lock_tasks();
                if tasks.set.is_empty() {
                    tasks.drained = true;
                    break;
                }
                mem::take(&mut tasks.set)
            };
            while set.join_next().await.is_some() {}
        }

        debug!(realm = %self.config.uri, "Realm stopped");
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        let sessions: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        info!(realm = %self.config.uri, sessions = sessions.len(), "Closing realm");

        for session in sessions {
            session.end(Some(Goodbye::new(uri::SYSTEM_SHUTDOWN)));
        }
    }

    fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Watch one session until it ends, then release its connection.
///
/// Every write to the peer is bounded by [`CLOSE_GRACE`] so that a client
/// that stopped reading cannot hold up realm shutdown.
async fn serve_session(session: Arc<Session>, sessions: Sessions) {
    let peer = session.peer().clone();
    let mut done = session.done();

    let ended_by_router = loop {
        tokio::select! {
            biased;
            _ = done.wait() => break true,
            received = peer.recv() => match received {
                Ok(Some(Message::Goodbye(goodbye))) => {
                    debug!(session = session.id(), reason = %goodbye.reason, "Client said goodbye");
                    if !session.end(Some(goodbye)) {
                        break true;
                    }
                    say_goodbye(&session, Goodbye::new(uri::GOODBYE_AND_OUT)).await;
                    break false;
                }
                Ok(Some(message)) => {
                    debug!(
                        session = session.id(),
                        message_type = %message.message_type(),
                        "Dropping unexpected message"
                    );
                }
                Ok(None) => break !session.end(None),
                Err(e) => {
                    warn!(session = session.id(), "Receive failed: {}", e);
                    break !session.end(None);
                }
            }
        }
    };

    if ended_by_router {
        if let Some(EndReason::Goodbye(goodbye)) = session.termination_reason() {
            say_goodbye(&session, goodbye).await;
        }
    }
    match timeout(CLOSE_GRACE, peer.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(session = session.id(), "Failed to close peer: {}", e),
        Err(_) => warn!(session = session.id(), "Timed out closing peer"),
    }

    sessions.remove(&session.id());
    info!(session = session.id(), "Session left");
}

async fn say_goodbye(session: &Session, goodbye: Goodbye) {
    match timeout(CLOSE_GRACE, session.peer().send(goodbye.into())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(session = session.id(), "Failed to send goodbye: {}", e),
        Err(_) => warn!(session = session.id(), "Timed out sending goodbye"),
    }
}

/// Factory for [`BasicRealm`].
#[derive(Clone, Default)]
pub struct BasicRealmFactory {
    authenticators: Vec<Arc<dyn Authenticator>>,
}

impl BasicRealmFactory {
    /// Create a factory producing realms with only the built-in authentication.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an authentication method to every realm built.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticators.push(authenticator);
        self
    }
}

impl RealmFactory for BasicRealmFactory {
    fn build(&self, config: RealmConfig) -> Arc<dyn Realm> {
        Arc::new(BasicRealm::with_authenticators(
            config,
            self.authenticators.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use junction_protocol::next_global_id;
    use junction_transport::{linked_peers, LocalPeer};
    use std::time::Duration;

    fn hello_details(methods: &[&str]) -> Dict {
        json!({"roles": {"caller": {}}, "authmethods": methods})
            .as_object()
            .cloned()
            .unwrap()
    }

    fn session_over_link() -> (Arc<Session>, LocalPeer) {
        session_with_capacity(8)
    }

    fn session_with_capacity(capacity: usize) -> (Arc<Session>, LocalPeer) {
        let (server, client) = linked_peers(capacity);
        let session = Session::new(Arc::new(server), next_global_id(), Dict::new(), &Dict::new());
        (Arc::new(session), client)
    }

    #[tokio::test]
    async fn test_authenticate_anonymous() {
        let realm = BasicRealm::new(RealmConfig::new("realm1"));
        let (peer, _client) = linked_peers(1);

        let details = realm
            .authenticate(&peer, &hello_details(&["ticket", "anonymous"]))
            .await
            .unwrap();
        assert_eq!(details["authmethod"], "anonymous");
        assert_eq!(details["authrole"], "anonymous");
        assert_eq!(details["authprovider"], "static");
        assert!(details["roles"]["broker"].is_object());
        assert!(details["roles"]["dealer"].is_object());
    }

    #[tokio::test]
    async fn test_authenticate_without_supported_method() {
        let config = RealmConfig {
            anonymous_auth: false,
            ..RealmConfig::new("realm1")
        };
        let realm = BasicRealm::new(config);
        let (peer, _client) = linked_peers(1);

        let err = realm
            .authenticate(&peer, &hello_details(&["anonymous"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NoSupportedMethod));
    }

    #[tokio::test]
    async fn test_client_goodbye() {
        let realm = BasicRealm::new(RealmConfig::new("realm1"));
        let (session, client) = session_over_link();
        realm.admit(session.clone()).await.unwrap();
        assert_eq!(realm.session_count(), 1);
        realm.start(session.clone());

        client
            .send(Goodbye::new(uri::CLOSE_REALM).into())
            .await
            .unwrap();
        assert_eq!(
            client.recv().await.unwrap(),
            Some(Goodbye::new(uri::GOODBYE_AND_OUT).into())
        );
        assert_eq!(client.recv().await.unwrap(), None);
        assert_eq!(
            session.termination_reason(),
            Some(EndReason::Goodbye(Goodbye::new(uri::CLOSE_REALM)))
        );
    }

    #[tokio::test]
    async fn test_client_disconnect() {
        let realm = BasicRealm::new(RealmConfig::new("realm1"));
        let (session, client) = session_over_link();
        realm.admit(session.clone()).await.unwrap();
        realm.start(session.clone());

        client.close().await.unwrap();
        let mut done = session.done();
        tokio::time::timeout(Duration::from_secs(1), done.wait())
            .await
            .unwrap();
        assert_eq!(session.termination_reason(), Some(EndReason::NoGoodbye));
    }

    #[tokio::test]
    async fn test_close_ends_sessions_and_stops_run() {
        let realm = Arc::new(BasicRealm::new(RealmConfig::new("realm1")));
        let run = tokio::spawn({
            let realm = realm.clone();
            async move { realm.run().await }
        });

        let (session, client) = session_over_link();
        realm.admit(session.clone()).await.unwrap();
        realm.start(session.clone());

        realm.close();
        realm.close();

        assert_eq!(
            client.recv().await.unwrap(),
            Some(Goodbye::new(uri::SYSTEM_SHUTDOWN).into())
        );
        assert_eq!(client.recv().await.unwrap(), None);
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(realm.session_count(), 0);
    }

    #[tokio::test]
    async fn test_admitted_session_is_idle_until_started() {
        let realm = BasicRealm::new(RealmConfig::new("realm1"));
        let (session, client) = session_over_link();
        realm.admit(session.clone()).await.unwrap();

        client
            .send(Goodbye::new(uri::CLOSE_REALM).into())
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(Duration::from_millis(50), client.recv())
                .await
                .is_err()
        );
        assert!(!session.is_ended());

        realm.start(session.clone());
        assert_eq!(
            client.recv().await.unwrap(),
            Some(Goodbye::new(uri::GOODBYE_AND_OUT).into())
        );
        assert_eq!(client.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_before_start_defers_goodbye() {
        let realm = Arc::new(BasicRealm::new(RealmConfig::new("realm1")));
        let run = tokio::spawn({
            let realm = realm.clone();
            async move { realm.run().await }
        });

        let (session, client) = session_over_link();
        realm.admit(session.clone()).await.unwrap();
        realm.close();
        assert!(session.is_ended());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), client.recv())
                .await
                .is_err()
        );

        realm.start(session);
        assert_eq!(
            client.recv().await.unwrap(),
            Some(Goodbye::new(uri::SYSTEM_SHUTDOWN).into())
        );
        assert_eq!(client.recv().await.unwrap(), None);
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_does_not_wait_on_stalled_client() {
        let realm = Arc::new(BasicRealm::new(RealmConfig::new("realm1")));
        let run = tokio::spawn({
            let realm = realm.clone();
            async move { realm.run().await }
        });

        // The client never reads; one queued message fills its link.
        let (session, _client) = session_with_capacity(1);
        realm.admit(session.clone()).await.unwrap();
        realm.start(session.clone());
        session
            .peer()
            .send(Goodbye::new(uri::CLOSE_REALM).into())
            .await
            .unwrap();

        realm.close();
        tokio::time::timeout(CLOSE_GRACE * 3, run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(realm.session_count(), 0);
    }

    #[tokio::test]
    async fn test_admit_after_close() {
        let realm = BasicRealm::new(RealmConfig::new("realm1"));
        realm.close();

        let (session, _client) = session_over_link();
        let err = realm.admit(session).await.unwrap_err();
        assert!(matches!(err, RealmError::Closed));
        assert_eq!(realm.session_count(), 0);
    }
}
