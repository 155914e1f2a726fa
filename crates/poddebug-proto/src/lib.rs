//! Debug Port-Forward Protocol Definitions
//!
//! This crate defines the wire protocol spoken on the streaming connection
//! between the local tunnel and the cluster's debug proxy: the control
//! handshake (pod lookup, port-forward channel negotiation) and the framed
//! data channels that carry relayed traffic afterwards.

pub mod frame;
pub mod handshake;

pub use frame::{read_frame, write_frame, Channel, Frame, FrameFlags};
pub use handshake::{read_message, write_message, Reply, Request};

use thiserror::Error;

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum data frame payload size (1MB)
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

/// Maximum handshake message size (64KB)
pub const MAX_MESSAGE_SIZE: u32 = 64 * 1024;

/// Protocol errors
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Invalid channel id: {0}")]
    InvalidChannel(u8),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("Incomplete frame")]
    IncompleteFrame,

    #[error("Malformed message: {0}")]
    MalformedMessage(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
