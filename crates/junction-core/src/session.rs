//! Admitted client sessions.
//!
//! A [`Session`] is created by the router once a client has been
//! authenticated, and handed to its realm. It ends exactly once, either from
//! the client side (GOODBYE or a dropped connection) or from the router side
//! (realm shutdown). Interested tasks wait on [`Session::done`].

use junction_protocol::{Dict, Goodbye, Id};
use junction_transport::Peer;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::debug;

use crate::roles::RoleMap;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum EndReason {
    /// Ended with a GOODBYE carrying this reason.
    Goodbye(Goodbye),
    /// Ended without a GOODBYE, e.g. the connection dropped.
    NoGoodbye,
}

struct State {
    reason: Option<EndReason>,
    done: watch::Sender<bool>,
}

/// A client session admitted to a realm.
pub struct Session {
    id: Id,
    peer: Arc<dyn Peer>,
    details: Dict,
    roles: RoleMap,
    state: Mutex<State>,
}

impl Session {
    /// Create a session.
    ///
    /// `details` are the negotiated session details (realm, roles, auth
    /// result); the role map is built from the client's HELLO details.
    #[must_use]
    pub fn new(peer: Arc<dyn Peer>, id: Id, details: Dict, hello_details: &Dict) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            id,
            peer,
            details,
            roles: RoleMap::from_details(hello_details),
            state: Mutex::new(State { reason: None, done }),
        }
    }

    /// Session ID.
    #[must_use]
    pub fn id(&self) -> Id {
        self.id
    }

    /// Negotiated session details.
    #[must_use]
    pub fn details(&self) -> &Dict {
        &self.details
    }

    /// The connection this session runs over.
    #[must_use]
    pub fn peer(&self) -> &Arc<dyn Peer> {
        &self.peer
    }

    /// Authenticated identity, if the realm assigned one.
    #[must_use]
    pub fn authid(&self) -> Option<&str> {
        self.details.get("authid").and_then(|v| v.as_str())
    }

    /// Authenticated role, if the realm assigned one.
    #[must_use]
    pub fn authrole(&self) -> Option<&str> {
        self.details.get("authrole").and_then(|v| v.as_str())
    }

    /// Check whether the client announced a role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.has_role(role)
    }

    /// Check whether the client announced a feature for a role.
    #[must_use]
    pub fn has_feature(&self, role: &str, feature: &str) -> bool {
        self.roles.has_feature(role, feature)
    }

    /// End the session.
    ///
    /// The first call records the reason (`None` becomes
    /// [`EndReason::NoGoodbye`]) and fires the done signal. Returns whether
    /// this call performed the transition; later calls change nothing.
    pub fn end(&self, reason: Option<Goodbye>) -> bool {
        let mut state = self.lock_state();
        if state.reason.is_some() {
            return false;
        }

        let reason = reason.map_or(EndReason::NoGoodbye, EndReason::Goodbye);
        debug!(session = self.id, reason = ?reason, "Session ended");
        state.reason = Some(reason);
        state.done.send_replace(true);
        true
    }

    /// Signal that fires once the session has ended.
    ///
    /// May be requested before or after [`end`](Self::end).
    #[must_use]
    pub fn done(&self) -> Done {
        Done(self.lock_state().done.subscribe())
    }

    /// The recorded end reason, or `None` while the session is live.
    #[must_use]
    pub fn termination_reason(&self) -> Option<EndReason> {
        self.lock_state().reason.clone()
    }

    /// Check whether the session has ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.lock_state().reason.is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", self.peer.id())
            .field("details", &self.details)
            .finish_non_exhaustive()
    }
}

/// Handle on a session's done signal.
#[derive(Debug, Clone)]
pub struct Done(watch::Receiver<bool>);

impl Done {
    /// Wait until the session has ended.
    ///
    /// A session dropped without being ended never fires; the returned
    /// future stays pending.
    pub async fn wait(&mut self) {
        if self.0.wait_for(|done| *done).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// Check whether the signal has fired.
    #[must_use]
    pub fn is_done(&self) -> bool {
        *self.0.borrow()
    }
}
