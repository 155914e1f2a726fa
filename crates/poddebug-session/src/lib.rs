//! Debug session lifecycle
//!
//! Composes the session store, the tunnel engine, and the liveness probe
//! into the start/stop/info operations the CLI calls. This is the only
//! crate the CLI layer talks to for session semantics.

pub mod manager;
pub mod probe;
mod process;

pub use manager::{DebugStatus, SessionError, SessionManager};
pub use probe::{LivenessProbe, ProbeReport};
