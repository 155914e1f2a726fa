//! Tunnel engine: local listener and relay loops
//!
//! `open` binds the local port and verifies the remote end with one
//! handshaked stream before any session state is recorded. The accept loop
//! then gives every local debugger connection its own remote stream and a
//! pair of copy loops; closing either direction tears down that pair, and
//! closing the handle tears down everything.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{tcp, TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use poddebug_proto::{read_frame, write_frame, Channel, Frame};

use crate::cluster::{ClusterClient, ClusterError, PortStream};

const RELAY_BUFFER_SIZE: usize = 16384;

/// Tunnel errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("No pod found for component {0}")]
    PodNotFound(String),

    #[error("Pod {0} is not ready")]
    PodNotReady(String),

    #[error("Local port {0} is already in use")]
    PortInUse(u16),

    #[error("Remote connection refused: {0}")]
    ConnectionRefused(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<ClusterError> for TunnelError {
    fn from(e: ClusterError) -> Self {
        match e {
            ClusterError::PodNotFound(component) => TunnelError::PodNotFound(component),
            ClusterError::PodNotReady(pod) => TunnelError::PodNotReady(pod),
            ClusterError::Refused(reason) => TunnelError::ConnectionRefused(reason),
            ClusterError::Protocol(e) => TunnelError::ConnectionRefused(e.to_string()),
            ClusterError::Timeout => {
                TunnelError::ConnectionRefused("timed out talking to the cluster".to_string())
            }
            ClusterError::Io(e) => TunnelError::Io(e),
        }
    }
}

/// Establishes and runs local↔remote relays
pub struct TunnelEngine;

impl TunnelEngine {
    /// Bind a local port and start relaying to a debug port on a pod
    ///
    /// Binds the requested local port (or an ephemeral one when `None`),
    /// opens one handshaked stream up front so a refused remote end fails
    /// here rather than on first use, then starts the accept loop.
    pub async fn open(
        client: Arc<dyn ClusterClient>,
        pod_name: &str,
        remote_port: u16,
        requested_local_port: Option<u16>,
    ) -> Result<TunnelHandle, TunnelError> {
        let bind_addr = format!("127.0.0.1:{}", requested_local_port.unwrap_or(0));
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                TunnelError::PortInUse(requested_local_port.unwrap_or(0))
            } else {
                TunnelError::Io(e)
            }
        })?;
        let local_port = listener.local_addr()?.port();

        // Preflight: a refused or dead debug port must surface before any
        // record of this session exists.
        let preflight = client.open_port_stream(pod_name, remote_port).await?;
        drop(preflight);

        info!(
            local_port,
            remote_port,
            pod = %pod_name,
            "tunnel open, forwarding 127.0.0.1:{} -> {}:{}",
            local_port,
            pod_name,
            remote_port
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pod = pod_name.to_string();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            client,
            pod,
            remote_port,
            shutdown_rx,
        ));

        Ok(TunnelHandle {
            local_port,
            shutdown: shutdown_tx,
            accept_task: Some(accept_task),
        })
    }
}

/// Handle to a running tunnel
///
/// The handle anchors the tunnel's lifetime: closing it (or dropping it, or
/// the owning process exiting) stops the listener and cancels all in-flight
/// relays, releasing the local port.
pub struct TunnelHandle {
    local_port: u16,
    shutdown: watch::Sender<bool>,
    accept_task: Option<JoinHandle<()>>,
}

impl TunnelHandle {
    /// The bound local port
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Stop accepting, cancel in-flight relays, release the port
    ///
    /// Idempotent.
    pub async fn close(&mut self) {
        let Some(task) = self.accept_task.take() else {
            return;
        };
        let _ = self.shutdown.send(true);
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                warn!("accept loop ended abnormally: {}", e);
            }
        }
        debug!(local_port = self.local_port, "tunnel closed");
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    client: Arc<dyn ClusterClient>,
    pod_name: String,
    remote_port: u16,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("tunnel listener shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer_addr)) => {
                    debug!(%peer_addr, "accepted local debugger connection");
                    let client = client.clone();
                    let pod = pod_name.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            relay_connection(socket, client, &pod, remote_port, shutdown).await
                        {
                            warn!(%peer_addr, "relay ended with error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Relay one local connection over its own remote stream
async fn relay_connection(
    local: TcpStream,
    client: Arc<dyn ClusterClient>,
    pod_name: &str,
    remote_port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TunnelError> {
    let remote = client.open_port_stream(pod_name, remote_port).await?;

    let (local_read, local_write) = local.into_split();
    let (remote_read, remote_write) = tokio::io::split(remote);

    let mut local_to_remote = tokio::spawn(copy_local_to_remote(local_read, remote_write));
    let mut remote_to_local = tokio::spawn(copy_remote_to_local(remote_read, local_write));

    // Either copy loop finishing closes both ends of this pair; a tunnel
    // close cancels both.
    tokio::select! {
        _ = &mut local_to_remote => remote_to_local.abort(),
        _ = &mut remote_to_local => local_to_remote.abort(),
        _ = shutdown.changed() => {
            local_to_remote.abort();
            remote_to_local.abort();
        }
    }

    debug!("relay pair closed");
    Ok(())
}

async fn copy_local_to_remote(
    mut local_read: tcp::OwnedReadHalf,
    mut remote_write: tokio::io::WriteHalf<Box<dyn PortStream>>,
) {
    let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        match local_read.read(&mut buffer).await {
            Ok(0) => break,
            Ok(n) => {
                let frame = Frame::data(Bytes::copy_from_slice(&buffer[..n]));
                if write_frame(&mut remote_write, &frame).await.is_err() {
                    return;
                }
            }
            Err(_) => break,
        }
    }
    let _ = write_frame(&mut remote_write, &Frame::fin()).await;
}

async fn copy_remote_to_local(
    mut remote_read: tokio::io::ReadHalf<Box<dyn PortStream>>,
    mut local_write: tcp::OwnedWriteHalf,
) {
    loop {
        match read_frame(&mut remote_read).await {
            Ok(Some(frame)) => match frame.channel {
                Channel::Data => {
                    if frame.flags.has_fin() {
                        break;
                    }
                    if local_write.write_all(&frame.payload).await.is_err() {
                        break;
                    }
                }
                Channel::Error => {
                    warn!(
                        "remote error channel: {}",
                        String::from_utf8_lossy(&frame.payload)
                    );
                    break;
                }
                Channel::Stdout | Channel::Stderr => {
                    debug!(
                        channel = ?frame.channel,
                        "{}",
                        String::from_utf8_lossy(&frame.payload)
                    );
                }
            },
            Ok(None) | Err(_) => break,
        }
    }
    let _ = local_write.shutdown().await;
}
