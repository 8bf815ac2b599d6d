//! Frame format for CairnFS control traffic.
//!
//! Every message travels in a frame with a fixed 24-byte big-endian header
//! followed by the payload:
//!
//! ```text
//! magic:4 | version:1 | flags:1 | opcode:2 | request_id:8 | payload_length:4 | checksum:4
//! ```
//!
//! The checksum is CRC32C over the payload bytes.

use crate::error::{Result, TransportError};

/// Frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 24;

/// Protocol magic number for frame validation.
pub const MAGIC: u32 = 0xCA1F_0001;

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest payload a peer may send (control messages are small).
pub const MAX_PAYLOAD_SIZE: u32 = 1024 * 1024;

/// Operations carried by the control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Generic positive acknowledgement.
    Ack = 0x0001,
    /// Request failed; payload carries an errno and message.
    Error = 0x0002,
    /// Storage node announces itself.
    RegisterNode = 0x0201,
    /// Storage node liveness ping.
    Heartbeat = 0x0202,
    /// Instructs a replica holder to push a file to a target.
    ReplicateFile = 0x0301,
    /// Instructs a target to expect an incoming file.
    ReceiveFile = 0x0302,
    /// Source reports the outcome of a replica transfer.
    TransferComplete = 0x0303,
}

impl Opcode {
    /// Returns the raw wire value.
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Opcode {
    type Error = TransportError;

    fn try_from(raw: u16) -> Result<Self> {
        match raw {
            0x0001 => Ok(Opcode::Ack),
            0x0002 => Ok(Opcode::Error),
            0x0201 => Ok(Opcode::RegisterNode),
            0x0202 => Ok(Opcode::Heartbeat),
            0x0301 => Ok(Opcode::ReplicateFile),
            0x0302 => Ok(Opcode::ReceiveFile),
            0x0303 => Ok(Opcode::TransferComplete),
            other => Err(TransportError::UnknownOpcode(other)),
        }
    }
}

/// Frame flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags {
    /// Frame answers an earlier request with the same id.
    pub response: bool,
    /// One-way message (no response expected).
    pub one_way: bool,
}

impl FrameFlags {
    /// Create empty flags
    pub fn empty() -> Self {
        Self::default()
    }

    /// Convert to raw byte representation
    pub fn as_u8(&self) -> u8 {
        let mut b = 0u8;
        if self.response {
            b |= 0x01;
        }
        if self.one_way {
            b |= 0x02;
        }
        b
    }

    /// Create from raw byte representation
    pub fn from_u8(b: u8) -> Self {
        Self {
            response: (b & 0x01) != 0,
            one_way: (b & 0x02) != 0,
        }
    }
}

/// Frame header containing metadata about the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol magic number
    pub magic: u32,
    /// Protocol version
    pub version: u8,
    /// Control flags
    pub flags: FrameFlags,
    /// Operation code
    pub opcode: Opcode,
    /// Request ID used to pair responses with requests
    pub request_id: u64,
    /// Payload length in bytes
    pub payload_length: u32,
    /// CRC32C checksum of payload
    pub checksum: u32,
}

impl FrameHeader {
    /// Encodes the header into its 24-byte wire form.
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4] = self.version;
        buf[5] = self.flags.as_u8();
        buf[6..8].copy_from_slice(&self.opcode.as_u16().to_be_bytes());
        buf[8..16].copy_from_slice(&self.request_id.to_be_bytes());
        buf[16..20].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[20..24].copy_from_slice(&self.checksum.to_be_bytes());
        buf
    }

    /// Decodes a header, checking magic, version and opcode.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(TransportError::InvalidFrame {
                reason: format!("header too short: {} bytes", buf.len()),
            });
        }
        let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != MAGIC {
            return Err(TransportError::InvalidMagic {
                expected: MAGIC,
                got: magic,
            });
        }
        let version = buf[4];
        if version != PROTOCOL_VERSION {
            return Err(TransportError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }
        let flags = FrameFlags::from_u8(buf[5]);
        let opcode = Opcode::try_from(u16::from_be_bytes([buf[6], buf[7]]))?;
        let mut id = [0u8; 8];
        id.copy_from_slice(&buf[8..16]);
        let payload_length = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let checksum = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
        Ok(Self {
            magic,
            version,
            flags,
            opcode,
            request_id: u64::from_be_bytes(id),
            payload_length,
            checksum,
        })
    }
}

/// A single frame in the control protocol
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frame header
    pub header: FrameHeader,
    /// Payload data
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a request frame, computing length and checksum.
    pub fn new(opcode: Opcode, request_id: u64, payload: Vec<u8>) -> Self {
        Self::with_flags(opcode, request_id, payload, FrameFlags::empty())
    }

    /// Creates a frame with explicit flags.
    pub fn with_flags(opcode: Opcode, request_id: u64, payload: Vec<u8>, flags: FrameFlags) -> Self {
        let header = FrameHeader {
            magic: MAGIC,
            version: PROTOCOL_VERSION,
            flags,
            opcode,
            request_id,
            payload_length: payload.len() as u32,
            checksum: crc32c(&payload),
        };
        Self { header, payload }
    }

    /// Builds the response frame answering this one.
    pub fn make_response(&self, opcode: Opcode, payload: Vec<u8>) -> Self {
        let flags = FrameFlags {
            response: true,
            one_way: false,
        };
        Self::with_flags(opcode, self.header.request_id, payload, flags)
    }

    /// Returns the frame opcode.
    pub fn opcode(&self) -> Opcode {
        self.header.opcode
    }

    /// Returns the request id.
    pub fn request_id(&self) -> u64 {
        self.header.request_id
    }

    /// Returns true if this frame is a response.
    pub fn is_response(&self) -> bool {
        self.header.flags.response
    }

    /// Returns true if the sender expects no response.
    pub fn is_one_way(&self) -> bool {
        self.header.flags.one_way
    }

    /// Serializes header and payload into one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parses a complete frame from a buffer.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = FrameHeader::decode(buf)?;
        if header.payload_length > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: header.payload_length,
                max_size: MAX_PAYLOAD_SIZE,
            });
        }
        let end = FRAME_HEADER_SIZE + header.payload_length as usize;
        if buf.len() < end {
            return Err(TransportError::InvalidFrame {
                reason: format!("payload truncated: have {} of {} bytes", buf.len(), end),
            });
        }
        let frame = Frame {
            header,
            payload: buf[FRAME_HEADER_SIZE..end].to_vec(),
        };
        frame.validate()?;
        Ok(frame)
    }

    /// Verifies the length and checksum recorded in the header.
    pub fn validate(&self) -> Result<()> {
        if self.payload.len() != self.header.payload_length as usize {
            return Err(TransportError::InvalidFrame {
                reason: format!(
                    "length mismatch: header says {}, payload is {}",
                    self.header.payload_length,
                    self.payload.len()
                ),
            });
        }
        let computed = crc32c(&self.payload);
        if computed != self.header.checksum {
            return Err(TransportError::ChecksumMismatch {
                expected: self.header.checksum,
                computed,
            });
        }
        Ok(())
    }
}

const fn make_crc32c_table() -> [u32; 256] {
    const POLY: u32 = 0x82F63B78;
    let mut table = [0u32; 256];
    let mut i = 0u32;
    while i < 256 {
        let mut crc = i;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ POLY;
            } else {
                crc >>= 1;
            }
            j += 1;
        }
        table[i as usize] = crc;
        i += 1;
    }
    table
}

const CRC32C_TABLE: [u32; 256] = make_crc32c_table();

/// CRC32C (Castagnoli) over `data`.
pub fn crc32c(data: &[u8]) -> u32 {
    let mut crc: u32 = !0;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32C_TABLE[idx];
    }
    !crc
}
