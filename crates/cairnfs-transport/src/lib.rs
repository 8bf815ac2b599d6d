#![warn(missing_docs)]

//! CairnFS transport subsystem: control-plane framing, typed control messages, TCP connections

pub mod error;
pub mod message;
pub mod protocol;
pub mod tcp;

pub use error::{Result, TransportError};
pub use message::{
    ControlMessage, ErrorReply, Heartbeat, ReceiveFileCommand, RegisterNode,
    ReplicateFileCommand, TransferComplete,
};
pub use protocol::{Frame, FrameFlags, FrameHeader, Opcode};
pub use tcp::{TcpConnection, TcpTransport, TcpTransportConfig};
