//! Control handshake messages
//!
//! Before any data frames flow, the client performs a control exchange on the
//! connection: a pod lookup to resolve the target, then a port-forward
//! request carrying the channel kinds it wants negotiated. Messages are
//! bincode-encoded with a u32 length prefix.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Channel, ProtoError};

/// Requests from the local tunnel to the cluster's debug proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Request {
    /// Resolve the pod currently backing a component
    PodLookup {
        component: String,
        application: String,
        namespace: String,
    },

    /// Open a port-forward to a debug port, negotiating channels
    ///
    /// Carries the speaker's protocol version; the proxy refuses versions
    /// it does not speak.
    PortForward {
        version: u32,
        pod_name: String,
        port: u16,
        channels: Vec<Channel>,
    },
}

/// Replies from the debug proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Reply {
    /// Pod lookup succeeded
    PodFound { pod_name: String, ready: bool },

    /// No pod backs the requested component
    PodNotFound,

    /// Port-forward accepted with the granted channel subset
    PortForwardAccepted { channels: Vec<Channel> },

    /// Port-forward refused; the connection is about to close
    PortForwardRefused { reason: String },
}

/// Write one length-prefixed handshake message
pub async fn write_message<W, M>(writer: &mut W, message: &M) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    M: Serialize,
{
    let encoded = bincode::serialize(message)?;
    if encoded.len() > crate::MAX_MESSAGE_SIZE as usize {
        return Err(ProtoError::MessageTooLarge(encoded.len()));
    }

    writer.write_u32(encoded.len() as u32).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed handshake message
///
/// Returns `Ok(None)` on a clean end-of-stream before the length prefix.
pub async fn read_message<R, M>(reader: &mut R) -> Result<Option<M>, ProtoError>
where
    R: AsyncRead + Unpin,
    M: for<'de> Deserialize<'de>,
{
    let length = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if length > crate::MAX_MESSAGE_SIZE {
        return Err(ProtoError::MessageTooLarge(length as usize));
    }

    let mut buf = vec![0u8; length as usize];
    reader.read_exact(&mut buf).await?;

    Ok(Some(bincode::deserialize(&buf)?))
}
