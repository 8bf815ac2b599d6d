//! Control message types exchanged between storage nodes and the metadata server.
//!
//! Payloads are serialized with bincode; the opcode in the frame header
//! identifies which message the payload holds.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::protocol::{Frame, FrameFlags, Opcode, MAX_PAYLOAD_SIZE};

/// Serialize any serde-compatible message to bytes using bincode.
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| TransportError::SerializationError(e.to_string()))
}

/// Deserialize bytes to a message using bincode.
pub fn deserialize_message<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| TransportError::SerializationError(e.to_string()))
}

// ============================================================================
// Node lifecycle (0x02xx)
// ============================================================================

/// A storage node announces (or re-announces) itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterNode {
    /// Stable node identifier.
    pub node_id: String,
    /// Host name or IP address the node serves data on.
    pub address: String,
    /// Data-plane port.
    pub port: u16,
}

/// Periodic liveness ping from a registered node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Identifier of the sending node.
    pub node_id: String,
}

// ============================================================================
// Replica repair (0x03xx)
// ============================================================================

/// Sent to a surviving replica holder: push `filename` to `target_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicateFileCommand {
    /// File to copy.
    pub filename: String,
    /// `host:port` of the node receiving the copy.
    pub target_address: String,
    /// Identifier of the node the command is addressed to.
    pub source_node_id: String,
}

/// Sent to the newly chosen target: expect `filename` from `source_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveFileCommand {
    /// File that will arrive.
    pub filename: String,
    /// `host:port` of the node sending the copy.
    pub source_address: String,
    /// Identifier of the node the command is addressed to.
    pub target_node_id: String,
}

/// Outcome of a replica transfer, reported by the source once it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferComplete {
    /// File that was copied.
    pub filename: String,
    /// Whether the target holds a complete copy.
    pub success: bool,
    /// Failure detail, empty on success.
    pub message: String,
}

/// Negative reply carrying a POSIX errno.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// POSIX error number.
    pub errno: i32,
    /// Human readable detail.
    pub message: String,
}

/// Every message the control protocol carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Positive acknowledgement with no body.
    Ack,
    /// Request failed.
    Error(ErrorReply),
    /// See [`RegisterNode`].
    RegisterNode(RegisterNode),
    /// See [`Heartbeat`].
    Heartbeat(Heartbeat),
    /// See [`ReplicateFileCommand`].
    ReplicateFile(ReplicateFileCommand),
    /// See [`ReceiveFileCommand`].
    ReceiveFile(ReceiveFileCommand),
    /// See [`TransferComplete`].
    TransferComplete(TransferComplete),
}

impl ControlMessage {
    /// Opcode used on the wire for this message.
    pub fn opcode(&self) -> Opcode {
        match self {
            ControlMessage::Ack => Opcode::Ack,
            ControlMessage::Error(_) => Opcode::Error,
            ControlMessage::RegisterNode(_) => Opcode::RegisterNode,
            ControlMessage::Heartbeat(_) => Opcode::Heartbeat,
            ControlMessage::ReplicateFile(_) => Opcode::ReplicateFile,
            ControlMessage::ReceiveFile(_) => Opcode::ReceiveFile,
            ControlMessage::TransferComplete(_) => Opcode::TransferComplete,
        }
    }

    /// Encodes the message body.
    ///
    /// Bodies larger than [`MAX_PAYLOAD_SIZE`] are rejected here rather than
    /// by the receiving peer.
    pub fn encode_payload(&self) -> Result<Vec<u8>> {
        let payload = match self {
            ControlMessage::Ack => Ok(Vec::new()),
            ControlMessage::Error(m) => serialize_message(m),
            ControlMessage::RegisterNode(m) => serialize_message(m),
            ControlMessage::Heartbeat(m) => serialize_message(m),
            ControlMessage::ReplicateFile(m) => serialize_message(m),
            ControlMessage::ReceiveFile(m) => serialize_message(m),
            ControlMessage::TransferComplete(m) => serialize_message(m),
        }?;
        if payload.len() > MAX_PAYLOAD_SIZE as usize {
            return Err(TransportError::PayloadTooLarge {
                size: u32::try_from(payload.len()).unwrap_or(u32::MAX),
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(payload)
    }

    /// Wraps the message in a request frame.
    pub fn to_frame(&self, request_id: u64) -> Result<Frame> {
        Ok(Frame::new(self.opcode(), request_id, self.encode_payload()?))
    }

    /// Wraps the message in a frame that must not be answered.
    pub fn to_one_way_frame(&self, request_id: u64) -> Result<Frame> {
        let flags = FrameFlags {
            response: false,
            one_way: true,
        };
        Ok(Frame::with_flags(
            self.opcode(),
            request_id,
            self.encode_payload()?,
            flags,
        ))
    }

    /// Wraps the message in a frame answering `request`.
    pub fn to_response(&self, request: &Frame) -> Result<Frame> {
        Ok(request.make_response(self.opcode(), self.encode_payload()?))
    }

    /// Decodes the message carried by `frame`.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let payload = &frame.payload;
        Ok(match frame.opcode() {
            Opcode::Ack => ControlMessage::Ack,
            Opcode::Error => ControlMessage::Error(deserialize_message(payload)?),
            Opcode::RegisterNode => ControlMessage::RegisterNode(deserialize_message(payload)?),
            Opcode::Heartbeat => ControlMessage::Heartbeat(deserialize_message(payload)?),
            Opcode::ReplicateFile => ControlMessage::ReplicateFile(deserialize_message(payload)?),
            Opcode::ReceiveFile => ControlMessage::ReceiveFile(deserialize_message(payload)?),
            Opcode::TransferComplete => {
                ControlMessage::TransferComplete(deserialize_message(payload)?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_node_through_frame() {
        let msg = ControlMessage::RegisterNode(RegisterNode {
            node_id: "N1".to_string(),
            address: "10.0.0.1".to_string(),
            port: 7000,
        });
        let frame = msg.to_frame(3).unwrap();
        assert_eq!(frame.opcode(), Opcode::RegisterNode);
        let decoded = ControlMessage::from_frame(&Frame::decode(&frame.encode()).unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_oversized_payload_rejected_before_sending() {
        let msg = ControlMessage::ReplicateFile(ReplicateFileCommand {
            filename: "x".repeat(MAX_PAYLOAD_SIZE as usize),
            target_address: "10.0.0.2:7000".to_string(),
            source_node_id: "N1".to_string(),
        });
        match msg.to_frame(1) {
            Err(TransportError::PayloadTooLarge { size, max_size }) => {
                assert!(size > max_size);
                assert_eq!(max_size, MAX_PAYLOAD_SIZE);
            }
            other => panic!("expected PayloadTooLarge, got {:?}", other),
        }
        assert!(matches!(
            msg.to_one_way_frame(1),
            Err(TransportError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_ack_has_empty_payload() {
        let frame = ControlMessage::Ack.to_frame(1).unwrap();
        assert!(frame.payload.is_empty());
        assert_eq!(ControlMessage::from_frame(&frame).unwrap(), ControlMessage::Ack);
    }

    #[test]
    fn test_response_frame_pairs_with_request() {
        let request = ControlMessage::Heartbeat(Heartbeat {
            node_id: "N2".to_string(),
        })
        .to_frame(77)
        .unwrap();
        let reply = ControlMessage::Ack.to_response(&request).unwrap();
        assert!(reply.is_response());
        assert_eq!(reply.request_id(), 77);
    }

    #[test]
    fn test_one_way_frame_flags() {
        let frame = ControlMessage::Heartbeat(Heartbeat {
            node_id: "N3".to_string(),
        })
        .to_one_way_frame(9)
        .unwrap();
        assert!(frame.is_one_way());
        assert!(!frame.is_response());
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert!(decoded.is_one_way());
    }

    #[test]
    fn test_garbage_payload_is_serialization_error() {
        let frame = Frame::new(Opcode::ReplicateFile, 1, vec![0xFF]);
        assert!(matches!(
            ControlMessage::from_frame(&frame),
            Err(TransportError::SerializationError(_))
        ));
    }

    #[test]
    fn test_transfer_complete_failure_detail() {
        let msg = ControlMessage::TransferComplete(TransferComplete {
            filename: "f.txt".to_string(),
            success: false,
            message: "disk full".to_string(),
        });
        let frame = msg.to_frame(5).unwrap();
        match ControlMessage::from_frame(&frame).unwrap() {
            ControlMessage::TransferComplete(t) => {
                assert!(!t.success);
                assert_eq!(t.message, "disk full");
            }
            other => panic!("unexpected message {:?}", other),
        }
    }
}
