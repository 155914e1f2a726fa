//! Liveness probing and stale-record reconciliation
//!
//! A record in the store never guarantees a live tunnel. The probe answers
//! "is this session actually forwarding" with a bounded-timeout connect to
//! the recorded local port, and checks whether the owning process still
//! exists so the two signals together distinguish "process crashed" from
//! "tunnel healthy" without false positives from pid reuse.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use poddebug_store::{DebugSession, SessionKey, SessionStore, StoreError};

use crate::process::process_exists;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of probing one recorded session
#[derive(Debug, Clone, Copy)]
pub struct ProbeReport {
    /// The recorded local port accepted a connection
    pub alive: bool,
    /// The recorded owning process still exists
    pub process_alive: bool,
}

/// Bounded-time tunnel reachability check
pub struct LivenessProbe {
    timeout: Duration,
}

impl LivenessProbe {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Probe a recorded session
    ///
    /// Probe failures are information, not errors: refused or timed-out
    /// connects simply report the tunnel dead.
    pub async fn check(&self, session: &DebugSession) -> ProbeReport {
        let alive = self.socket_reachable(session.local_port).await;
        let process_alive = process_exists(session.process_id);
        debug!(
            local_port = session.local_port,
            pid = session.process_id,
            alive,
            process_alive,
            "probed session"
        );
        ProbeReport {
            alive,
            process_alive,
        }
    }

    /// Probe and reconcile drift between the store and reality
    ///
    /// When the tunnel is unreachable and the owning process is gone, the
    /// stale record is deleted so later queries do not keep reporting a dead
    /// session as present. A dead socket with a live owner is left alone.
    pub async fn reconcile(
        &self,
        store: &SessionStore,
        key: &SessionKey,
        session: &DebugSession,
    ) -> Result<ProbeReport, StoreError> {
        let report = self.check(session).await;
        if !report.alive && !report.process_alive {
            info!(
                key = %key,
                pid = session.process_id,
                "owning process is gone, removing stale session record"
            );
            store.delete(key)?;
        }
        Ok(report)
    }

    async fn socket_reachable(&self, port: u16) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(("127.0.0.1", port))).await {
            // Writability rules out a half-open socket without sending bytes
            // into the debugger's own protocol
            Ok(Ok(stream)) => stream.writable().await.is_ok(),
            _ => false,
        }
    }
}

impl Default for LivenessProbe {
    fn default() -> Self {
        Self::new()
    }
}
