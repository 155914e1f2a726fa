//! Session manager: start, stop, info
//!
//! Orchestrates the store, the tunnel engine, and the probe. Operations on
//! one identity serialize through the store's advisory lock, so concurrent
//! CLI invocations from unrelated processes agree on session state;
//! different identities proceed fully in parallel.
//!
//! Per identity the lifecycle is `NoSession → Starting → Forwarding →
//! Stopping → NoSession`; any tunnel failure during `Starting` leaves no
//! record behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::info;

use poddebug_store::{DebugSession, SessionKey, SessionStore, StoreError};
use poddebug_tunnel::{ClusterClient, ComponentSelector, TunnelEngine, TunnelError, TunnelHandle};

use crate::probe::LivenessProbe;
use crate::process::{process_exists, request_teardown};

/// Session lifecycle errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("debug is already running for the component {component} on the local port {local_port}")]
    AlreadyDebugging { component: String, local_port: u16 },

    #[error("debug is not running for the component {component}")]
    NotDebugging { component: String },

    #[error("could not signal the process {pid} holding the debug session for the component {component}")]
    SignalFailed { component: String, pid: u32 },

    #[error("the process {pid} holding the debug session for the component {component} did not release the tunnel")]
    OwnerUnresponsive { component: String, pid: u32 },

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of an info query
#[derive(Debug)]
pub enum DebugStatus {
    /// No record exists for the identity
    NotDebugging,

    /// A record exists but the tunnel is not reachable
    NotAlive { session: DebugSession },

    /// The tunnel is forwarding
    Running { session: DebugSession },
}

/// Orchestrates the debug-session lifecycle
///
/// Receives its collaborators explicitly: the store, a cluster client
/// handle, and the probe. It reads no process-wide globals.
pub struct SessionManager {
    store: SessionStore,
    cluster: Arc<dyn ClusterClient>,
    probe: LivenessProbe,
    /// How long a stop waits for a signaled owner to release its tunnel
    stop_wait: Duration,
    /// Tunnels owned by this process, so in-process teardown can close them
    active: Mutex<HashMap<SessionKey, TunnelHandle>>,
}

/// Interval between re-probes while waiting on a signaled owner
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl SessionManager {
    pub fn new(store: SessionStore, cluster: Arc<dyn ClusterClient>) -> Self {
        Self {
            store,
            cluster,
            probe: LivenessProbe::new(),
            stop_wait: Duration::from_secs(5),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_probe(mut self, probe: LivenessProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_stop_wait(mut self, stop_wait: Duration) -> Self {
        self.stop_wait = stop_wait;
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Start a debug session for an identity
    ///
    /// Fails with [`SessionError::AlreadyDebugging`] when a live session
    /// exists. The record is persisted only after the tunnel is confirmed
    /// open, so a failed start leaves no state behind.
    pub async fn start(
        &self,
        key: &SessionKey,
        remote_port: u16,
        requested_local_port: Option<u16>,
    ) -> Result<DebugSession, SessionError> {
        let _lock = self.store.lock(key)?;

        if let Some(existing) = self.store.get(key)? {
            let report = self.probe.check(&existing).await;
            if report.alive {
                return Err(SessionError::AlreadyDebugging {
                    component: key.component.clone(),
                    local_port: existing.local_port,
                });
            }
            info!(key = %key, "replacing stale session record");
            self.store.delete(key)?;
        }

        let selector = ComponentSelector {
            component: key.component.clone(),
            application: key.application.clone(),
            namespace: key.namespace.clone(),
        };
        let pod = self
            .cluster
            .resolve_pod(&selector)
            .await
            .map_err(TunnelError::from)?;

        let mut handle = TunnelEngine::open(
            self.cluster.clone(),
            &pod.name,
            remote_port,
            requested_local_port,
        )
        .await?;

        let session = DebugSession {
            component_name: key.component.clone(),
            application_name: key.application.clone(),
            namespace: key.namespace.clone(),
            local_port: handle.local_port(),
            remote_port,
            pod_name: pod.name,
            process_id: std::process::id(),
            started_at: Utc::now(),
        };

        if let Err(e) = self.store.put(key, &session) {
            handle.close().await;
            return Err(e.into());
        }

        self.active.lock().await.insert(key.clone(), handle);
        info!(
            key = %key,
            local_port = session.local_port,
            remote_port,
            "debug session started"
        );
        Ok(session)
    }

    /// Stop the debug session for an identity
    ///
    /// Closes the tunnel before deleting the record, so an info racing a
    /// stop either sees the live tunnel or sees no record. When another
    /// process owns the tunnel, that owner is signaled to run its own
    /// teardown and the record is only deleted once its listener is
    /// confirmed gone; an owner that cannot be signaled or never releases
    /// the tunnel is an error, and the record stays.
    pub async fn stop(&self, key: &SessionKey) -> Result<(), SessionError> {
        // Close our own tunnel before taking the lock: a signaled owner
        // must be able to tear down while the signaling process holds the
        // lock waiting for this listener to disappear.
        let owned = self.active.lock().await.remove(key);
        let was_owner = owned.is_some();
        if let Some(mut handle) = owned {
            handle.close().await;
        }

        let _lock = self.store.lock(key)?;

        let Some(session) = self.store.get(key)? else {
            return Err(SessionError::NotDebugging {
                component: key.component.clone(),
            });
        };

        if !was_owner && session.process_id != std::process::id() && process_exists(session.process_id)
        {
            info!(
                key = %key,
                pid = session.process_id,
                "signaling owning process to tear down"
            );
            // A failed signal is only fatal while the owner is still there;
            // the owner racing to exit on its own is fine.
            if !request_teardown(session.process_id) && process_exists(session.process_id) {
                return Err(SessionError::SignalFailed {
                    component: key.component.clone(),
                    pid: session.process_id,
                });
            }
            self.wait_for_owner_teardown(key, &session).await?;
        }

        self.store.delete(key)?;
        info!(key = %key, "debug session stopped");
        Ok(())
    }

    /// Re-probe the session's local port until the signaled owner's
    /// listener is gone, bounded by `stop_wait`
    async fn wait_for_owner_teardown(
        &self,
        key: &SessionKey,
        session: &DebugSession,
    ) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.stop_wait;
        loop {
            let report = self.probe.check(session).await;
            if !report.alive {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::OwnerUnresponsive {
                    component: key.component.clone(),
                    pid: session.process_id,
                });
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }

    /// Query the session state for an identity
    ///
    /// Absence is not an error at this layer; the CLI decides how to render
    /// it. Presence is never trusted on its own: the probe runs every time,
    /// and a record whose owner is gone is removed as a side effect.
    pub async fn info(&self, key: &SessionKey) -> Result<DebugStatus, SessionError> {
        let _lock = self.store.lock(key)?;

        let Some(session) = self.store.get(key)? else {
            return Ok(DebugStatus::NotDebugging);
        };

        let report = self.probe.reconcile(&self.store, key, &session).await?;
        if report.alive {
            Ok(DebugStatus::Running { session })
        } else {
            Ok(DebugStatus::NotAlive { session })
        }
    }
}
