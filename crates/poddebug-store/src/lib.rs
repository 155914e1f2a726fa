//! Debug session registry
//!
//! Persists one record per component identity as a JSON file under the
//! poddebug home directory, so independent CLI invocations agree on session
//! state. Mutual exclusion across processes uses advisory file locks.

pub mod session;
pub mod store;

pub use session::{DebugSession, SessionKey};
pub use store::{SessionStore, StoreError, StoreLock};
