//! Error types for the CairnFS transport layer.

use thiserror::Error;

/// Errors raised while framing, encoding or exchanging control messages.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connecting to the peer did not complete in time.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Address that was dialed.
        addr: String,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The peer closed the connection mid-exchange.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// A frame failed structural validation.
    #[error("invalid frame: {reason}")]
    InvalidFrame {
        /// Description of what was wrong.
        reason: String,
    },

    /// The frame did not start with the protocol magic.
    #[error("invalid magic number: expected 0x{expected:08X}, got 0x{got:08X}")]
    InvalidMagic {
        /// Expected magic.
        expected: u32,
        /// Magic read from the wire.
        got: u32,
    },

    /// The peer speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Our version.
        expected: u8,
        /// Peer version.
        got: u8,
    },

    /// Payload checksum did not match the header.
    #[error("checksum mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received payload.
        computed: u32,
    },

    /// Payload exceeds [`crate::protocol::MAX_PAYLOAD_SIZE`].
    #[error("payload too large: {size} bytes (max {max_size})")]
    PayloadTooLarge {
        /// Declared payload size.
        size: u32,
        /// Maximum accepted size.
        max_size: u32,
    },

    /// A request did not receive its response in time.
    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Request identifier.
        request_id: u64,
        /// Timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// Opcode not known to this protocol version.
    #[error("unknown opcode: 0x{0:04X}")]
    UnknownOpcode(u16),

    /// The response opcode does not answer the request that was sent.
    #[error("unexpected response opcode: 0x{0:04X}")]
    UnexpectedResponse(u16),

    /// Payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Underlying socket error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl From<bincode::Error> for TransportError {
    fn from(e: bincode::Error) -> Self {
        TransportError::SerializationError(e.to_string())
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
