//! # junction-core
//!
//! Session admission and realm registry for the Junction WAMP router.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Router** - Realm registry and the HELLO/WELCOME handshake
//! - **Realm** - Namespace that owns admitted sessions
//! - **Session** - An admitted client and its single-shot termination
//! - **Auth** - Pluggable authentication methods
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐ attach ┌─────────────┐ admit  ┌─────────────┐
//! │    Peer     │───────▶│   Router    │───────▶│    Realm    │
//! └─────────────┘        └─────────────┘        └─────────────┘
//!                               │                      │
//!                               ▼                      ▼
//!                        ┌─────────────┐        ┌─────────────┐
//!                        │  Registry   │        │   Session   │
//!                        │  (worker)   │        └─────────────┘
//!                        └─────────────┘
//! ```

pub mod auth;
pub mod basic;
pub mod realm;
pub mod roles;
pub mod router;
pub mod session;

pub use auth::{AnonymousAuth, AuthError, Authenticator, Identity};
pub use basic::{BasicRealm, BasicRealmFactory, CLOSE_GRACE};
pub use realm::{Realm, RealmConfig, RealmError, RealmFactory};
pub use roles::{validate_client_roles, RoleError, RoleMap};
pub use router::{AttachError, RealmStats, Router, RouterConfig, RouterError, RouterStats};
pub use session::{Done, EndReason, Session};
