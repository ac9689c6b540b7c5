//! Session and request identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

/// A WAMP identifier.
pub type Id = u64;

/// Largest identifier allowed on the wire (2^53, exactly representable as an
/// IEEE-754 double).
pub const MAX_ID: Id = 1 << 53;

/// Process-wide counter for global-scope IDs.
static GLOBAL_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a global-scope ID.
///
/// IDs are handed out sequentially starting at 1, so no value is returned
/// twice while the process is alive.
#[must_use]
pub fn next_global_id() -> Id {
    let id = GLOBAL_ID.fetch_add(1, Ordering::Relaxed);
    debug_assert!(id <= MAX_ID, "global ID space exhausted");
    id
}
