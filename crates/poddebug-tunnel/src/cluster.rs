//! Cluster API seam
//!
//! The tunnel engine talks to the cluster through [`ClusterClient`]: resolve
//! the pod backing a component, then open streaming connections to a port on
//! it. The production implementation dials the cluster's debug proxy over
//! TCP and runs the `poddebug-proto` handshake; tests substitute in-process
//! fakes.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use poddebug_proto::{
    read_message, write_message, Channel, ProtoError, Reply, Request, PROTOCOL_VERSION,
};

/// Cluster access errors
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("No pod found for component {0}")]
    PodNotFound(String),

    #[error("Pod {0} is not ready")]
    PodNotReady(String),

    #[error("Port-forward refused: {0}")]
    Refused(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("Timed out talking to the cluster")]
    Timeout,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of the component whose pod carries the debug port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSelector {
    pub component: String,
    pub application: String,
    pub namespace: String,
}

/// A resolved pod target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
}

/// Byte stream to a port inside a pod, post-handshake
pub trait PortStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> PortStream for T {}

/// Cluster API client handle
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Resolve the pod currently backing a component
    async fn resolve_pod(&self, selector: &ComponentSelector) -> Result<PodInfo, ClusterError>;

    /// Open a streaming connection to a port on a pod
    ///
    /// The returned stream has completed channel negotiation: data and error
    /// channels are granted, and frames flow from the first byte.
    async fn open_port_stream(
        &self,
        pod_name: &str,
        port: u16,
    ) -> Result<Box<dyn PortStream>, ClusterError>;
}

/// Client for the cluster's debug proxy endpoint
///
/// Each call dials a fresh TCP connection, mirroring how per-request API
/// clients behave; the proxy address comes from CLI configuration.
pub struct ApiServerClient {
    proxy_addr: String,
    connect_timeout: Duration,
}

impl ApiServerClient {
    pub fn new(proxy_addr: impl Into<String>) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn dial(&self) -> Result<TcpStream, ClusterError> {
        let stream = tokio::time::timeout(
            self.connect_timeout,
            TcpStream::connect(&self.proxy_addr),
        )
        .await
        .map_err(|_| ClusterError::Timeout)??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[async_trait]
impl ClusterClient for ApiServerClient {
    async fn resolve_pod(&self, selector: &ComponentSelector) -> Result<PodInfo, ClusterError> {
        let mut stream = self.dial().await?;

        let request = Request::PodLookup {
            component: selector.component.clone(),
            application: selector.application.clone(),
            namespace: selector.namespace.clone(),
        };
        write_message(&mut stream, &request).await?;

        match read_message(&mut stream).await? {
            Some(Reply::PodFound { pod_name, ready }) => {
                if !ready {
                    return Err(ClusterError::PodNotReady(pod_name));
                }
                debug!(pod = %pod_name, component = %selector.component, "resolved pod");
                Ok(PodInfo { name: pod_name })
            }
            Some(Reply::PodNotFound) | None => {
                Err(ClusterError::PodNotFound(selector.component.clone()))
            }
            Some(other) => Err(ClusterError::Refused(format!(
                "unexpected reply to pod lookup: {:?}",
                other
            ))),
        }
    }

    async fn open_port_stream(
        &self,
        pod_name: &str,
        port: u16,
    ) -> Result<Box<dyn PortStream>, ClusterError> {
        let mut stream = self.dial().await?;

        let request = Request::PortForward {
            version: PROTOCOL_VERSION,
            pod_name: pod_name.to_string(),
            port,
            channels: vec![Channel::Data, Channel::Error],
        };
        write_message(&mut stream, &request).await?;

        match read_message(&mut stream).await? {
            Some(Reply::PortForwardAccepted { channels }) => {
                if !channels.contains(&Channel::Data) || !channels.contains(&Channel::Error) {
                    return Err(ClusterError::Refused(format!(
                        "required channels not granted: {:?}",
                        channels
                    )));
                }
                debug!(pod = %pod_name, port, "port-forward stream open");
                Ok(Box::new(stream))
            }
            Some(Reply::PortForwardRefused { reason }) => Err(ClusterError::Refused(reason)),
            Some(other) => Err(ClusterError::Refused(format!(
                "unexpected reply to port-forward: {:?}",
                other
            ))),
            None => Err(ClusterError::Refused(
                "connection closed during handshake".to_string(),
            )),
        }
    }
}
