//! Framed data channels for the port-forward connection
//!
//! After the handshake accepts a port-forward, all traffic is carried in
//! frames: a fixed header naming the negotiated channel, a flag byte, and a
//! length-prefixed payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtoError;

/// Negotiated channel kinds on a port-forward connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Channel {
    /// Relayed traffic in both directions
    Data = 0,
    /// Out-of-band error reports from the remote end
    Error = 1,
    /// Container stdout, when the remote end chooses to attach it
    Stdout = 2,
    /// Container stderr
    Stderr = 3,
}

impl TryFrom<u8> for Channel {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, ProtoError> {
        match value {
            0 => Ok(Channel::Data),
            1 => Ok(Channel::Error),
            2 => Ok(Channel::Stdout),
            3 => Ok(Channel::Stderr),
            _ => Err(ProtoError::InvalidChannel(value)),
        }
    }
}

/// Frame flags
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    pub const FIN: u8 = 0b0000_0001;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with_fin(mut self) -> Self {
        self.0 |= Self::FIN;
        self
    }

    pub fn has_fin(&self) -> bool {
        self.0 & Self::FIN != 0
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// A single frame on the port-forward connection
#[derive(Debug, Clone)]
pub struct Frame {
    pub channel: Channel,
    pub flags: FrameFlags,
    pub payload: Bytes,
}

impl Frame {
    /// Frame header size: channel (1) + flags (1) + length (4) = 6 bytes
    pub const HEADER_SIZE: usize = 6;

    pub fn new(channel: Channel, payload: Bytes) -> Self {
        Self {
            channel,
            flags: FrameFlags::new(),
            payload,
        }
    }

    pub fn data(payload: Bytes) -> Self {
        Self::new(Channel::Data, payload)
    }

    /// Half-close marker for the data channel
    pub fn fin() -> Self {
        Self::new(Channel::Data, Bytes::new()).with_flags(FrameFlags::new().with_fin())
    }

    pub fn with_flags(mut self, flags: FrameFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Encode frame to bytes
    pub fn encode(&self) -> Result<Bytes, ProtoError> {
        let payload_len = self.payload.len();
        if payload_len > crate::MAX_FRAME_SIZE as usize {
            return Err(ProtoError::FrameTooLarge(payload_len));
        }

        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + payload_len);

        buf.put_u8(self.channel as u8);
        buf.put_u8(self.flags.as_u8());
        buf.put_u32(payload_len as u32);
        buf.put(self.payload.clone());

        Ok(buf.freeze())
    }

    /// Decode frame from bytes
    pub fn decode(mut buf: Bytes) -> Result<Self, ProtoError> {
        if buf.len() < Self::HEADER_SIZE {
            return Err(ProtoError::IncompleteFrame);
        }

        let channel = Channel::try_from(buf.get_u8())?;
        let flags = FrameFlags::from_u8(buf.get_u8());
        let length = buf.get_u32();

        if length > crate::MAX_FRAME_SIZE {
            return Err(ProtoError::FrameTooLarge(length as usize));
        }

        if buf.remaining() < length as usize {
            return Err(ProtoError::IncompleteFrame);
        }

        let payload = buf.split_to(length as usize);

        Ok(Self {
            channel,
            flags,
            payload,
        })
    }
}

/// Write one frame to the connection
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
{
    let encoded = frame.encode()?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame from the connection
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, ProtoError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; Frame::HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let channel = Channel::try_from(header[0])?;
    let flags = FrameFlags::from_u8(header[1]);
    let length = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);

    if length > crate::MAX_FRAME_SIZE {
        return Err(ProtoError::FrameTooLarge(length as usize));
    }

    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;

    Ok(Some(Frame {
        channel,
        flags,
        payload: Bytes::from(payload),
    }))
}
