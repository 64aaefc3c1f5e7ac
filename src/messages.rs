//! Message/protocol headers and interaction model status codes

use anyhow::Result;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use core::fmt;
use std::io::{Read, Write};

#[derive(Debug, Clone)]
pub struct MessageHeader {
    pub flags: u8,
    pub security_flags: u8,
    pub session_id: u16,
    pub message_counter: u32,
    pub source_node_id: Option<Vec<u8>>,
    pub destination_node_id: Option<Vec<u8>>,
}

impl MessageHeader {
    const FLAG_SRC_PRESENT: u8 = 4;
    const DSIZ_64: u8 = 1;
    const DSIZ_16: u8 = 2;
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut flags: u8 = 0;
        if self.source_node_id.as_ref().is_some_and(|x| x.len() == 8) {
            flags |= Self::FLAG_SRC_PRESENT;
        }
        if let Some(destination_node_id) = &self.destination_node_id {
            if destination_node_id.len() == 2 {
                flags |= Self::DSIZ_16
            } else if destination_node_id.len() == 8 {
                flags |= Self::DSIZ_64
            }
        }
        let mut out = Vec::with_capacity(1024);
        out.write_u8(flags)?;
        out.write_u16::<LittleEndian>(self.session_id)?;
        out.write_u8(self.security_flags)?;
        out.write_u32::<LittleEndian>(self.message_counter)?;
        if let Some(sn) = &self.source_node_id {
            if sn.len() == 8 {
                out.write_all(sn)?;
            }
        }
        if let Some(destination_node_id) = &self.destination_node_id {
            out.write_all(destination_node_id)?;
        }
        Ok(out)
    }
    pub fn decode(data: &[u8]) -> Result<(Self, Vec<u8>)> {
        let mut cursor = std::io::Cursor::new(data);
        let flags = cursor.read_u8()?;
        let session_id = cursor.read_u16::<LittleEndian>()?;
        let security_flags = cursor.read_u8()?;
        let message_counter = cursor.read_u32::<LittleEndian>()?;
        let source_node_id = if (flags & Self::FLAG_SRC_PRESENT) != 0 {
            let mut sn = vec![0; 8];
            cursor.read_exact(sn.as_mut())?;
            Some(sn)
        } else {
            None
        };
        let dst_size = match flags & 3 {
            Self::DSIZ_64 => 8,
            Self::DSIZ_16 => 2,
            _ => 0,
        };
        let destination_node_id = if dst_size > 0 {
            let mut dn = vec![0; dst_size];
            cursor.read_exact(dn.as_mut())?;
            Some(dn)
        } else {
            None
        };
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest)?;
        Ok((
            Self {
                flags,
                security_flags,
                session_id,
                message_counter,
                source_node_id,
                destination_node_id,
            },
            rest,
        ))
    }

    /// Source node id as number (node ids are little endian on the wire)
    pub fn source_node(&self) -> Option<u64> {
        let sn = self.source_node_id.as_ref()?;
        let bytes: [u8; 8] = sn.as_slice().try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolMessageHeader {
    pub exchange_flags: u8,
    pub opcode: u8,
    pub exchange_id: u16,
    pub vendor_id: Option<u16>,
    pub protocol_id: u16,
    pub ack_counter: u32,
}

impl ProtocolMessageHeader {
    pub const FLAG_INITIATOR: u8 = 1;
    pub const FLAG_ACK: u8 = 2;
    pub const FLAG_RELIABILITY: u8 = 4;
    pub const FLAG_VENDOR: u8 = 0x10;

    pub const INTERACTION_OPCODE_STATUS_RESP: u8 = 0x1;
    pub const INTERACTION_OPCODE_READ_REQ: u8 = 0x2;
    pub const INTERACTION_OPCODE_REPORT_DATA: u8 = 0x5;
    pub const INTERACTION_OPCODE_WRITE_REQ: u8 = 0x6;
    pub const INTERACTION_OPCODE_WRITE_RESP: u8 = 0x7;
    pub const INTERACTION_OPCODE_INVOKE_REQ: u8 = 0x8;
    pub const INTERACTION_OPCODE_INVOKE_RESP: u8 = 0x9;

    pub const PROTOCOL_ID_SECURE_CHANNEL: u16 = 0;
    pub const PROTOCOL_ID_INTERACTION: u16 = 1;

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1024);
        let mut flags = self.exchange_flags & !Self::FLAG_VENDOR;
        if self.vendor_id.is_some() {
            flags |= Self::FLAG_VENDOR;
        }
        out.write_u8(flags)?;
        out.write_u8(self.opcode)?;
        out.write_u16::<LittleEndian>(self.exchange_id)?;
        if let Some(vendor_id) = self.vendor_id {
            out.write_u16::<LittleEndian>(vendor_id)?;
        }
        out.write_u16::<LittleEndian>(self.protocol_id)?;
        if (flags & Self::FLAG_ACK) != 0 {
            out.write_u32::<LittleEndian>(self.ack_counter)?;
        }
        Ok(out)
    }
    pub fn decode(data: &[u8]) -> Result<(Self, Vec<u8>)> {
        let mut cursor = std::io::Cursor::new(data);
        let exchange_flags = cursor.read_u8()?;
        let opcode = cursor.read_u8()?;
        let exchange_id = cursor.read_u16::<LittleEndian>()?;
        let vendor_id = if (exchange_flags & Self::FLAG_VENDOR) != 0 {
            Some(cursor.read_u16::<LittleEndian>()?)
        } else {
            None
        };
        let protocol_id = cursor.read_u16::<LittleEndian>()?;
        let mut ack_counter = 0;
        if (exchange_flags & Self::FLAG_ACK) != 0 {
            ack_counter = cursor.read_u32::<LittleEndian>()?;
        }
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest)?;
        Ok((
            Self {
                exchange_flags,
                opcode,
                exchange_id,
                vendor_id,
                protocol_id,
                ack_counter,
            },
            rest,
        ))
    }

    pub fn is_initiator(&self) -> bool {
        (self.exchange_flags & Self::FLAG_INITIATOR) != 0
    }

    /// Header for response sent on same exchange; piggybacks ack of received message counter.
    pub fn response(&self, opcode: u8, ack_counter: u32) -> Self {
        Self {
            exchange_flags: Self::FLAG_ACK | Self::FLAG_RELIABILITY,
            opcode,
            exchange_id: self.exchange_id,
            vendor_id: self.vendor_id,
            protocol_id: self.protocol_id,
            ack_counter,
        }
    }
}

/// Decoded message as delivered by transport (already decrypted)
pub struct Message {
    pub message_header: MessageHeader,
    pub protocol_header: ProtocolMessageHeader,
    pub payload: Vec<u8>,
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("message_header", &self.message_header)
            .field("protocol_header", &self.protocol_header)
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

impl Message {
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (message_header, rest) = MessageHeader::decode(data)?;
        let (protocol_header, payload) = ProtocolMessageHeader::decode(&rest)?;
        Ok(Self {
            message_header,
            protocol_header,
            payload,
        })
    }
}

/// Interaction model status codes. Numeric values are part of wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Success = 0x00,
    Failure = 0x01,
    InvalidSubscription = 0x7d,
    UnsupportedAccess = 0x7e,
    UnsupportedEndpoint = 0x7f,
    InvalidAction = 0x80,
    UnsupportedCommand = 0x81,
    InvalidCommand = 0x85,
    UnsupportedAttribute = 0x86,
    ConstraintError = 0x87,
    UnsupportedWrite = 0x88,
    ResourceExhausted = 0x89,
    NotFound = 0x8b,
    UnreportableAttribute = 0x8c,
    InvalidDataType = 0x8d,
    UnsupportedRead = 0x8f,
    DataVersionMismatch = 0x92,
    Timeout = 0x94,
    Busy = 0x9c,
    UnsupportedCluster = 0xc3,
    NeedsTimedInteraction = 0xc6,
    Unknown = 0xff,
}

impl StatusCode {
    pub fn code(self) -> u8 {
        self as u8
    }
    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        match value {
            0x00 => StatusCode::Success,
            0x01 => StatusCode::Failure,
            0x7d => StatusCode::InvalidSubscription,
            0x7e => StatusCode::UnsupportedAccess,
            0x7f => StatusCode::UnsupportedEndpoint,
            0x80 => StatusCode::InvalidAction,
            0x81 => StatusCode::UnsupportedCommand,
            0x85 => StatusCode::InvalidCommand,
            0x86 => StatusCode::UnsupportedAttribute,
            0x87 => StatusCode::ConstraintError,
            0x88 => StatusCode::UnsupportedWrite,
            0x89 => StatusCode::ResourceExhausted,
            0x8b => StatusCode::NotFound,
            0x8c => StatusCode::UnreportableAttribute,
            0x8d => StatusCode::InvalidDataType,
            0x8f => StatusCode::UnsupportedRead,
            0x92 => StatusCode::DataVersionMismatch,
            0x94 => StatusCode::Timeout,
            0x9c => StatusCode::Busy,
            0xc3 => StatusCode::UnsupportedCluster,
            0xc6 => StatusCode::NeedsTimedInteraction,
            _ => StatusCode::Unknown,
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusCode::Success => write!(f, "SUCCESS"),
            StatusCode::Failure => write!(f, "FAILURE"),
            StatusCode::InvalidSubscription => write!(f, "INVALID_SUBSCRIPTION"),
            StatusCode::UnsupportedAccess => write!(f, "UNSUPPORTED_ACCESS"),
            StatusCode::UnsupportedEndpoint => write!(f, "UNSUPPORTED_ENDPOINT"),
            StatusCode::InvalidAction => write!(f, "INVALID_ACTION"),
            StatusCode::UnsupportedCommand => write!(f, "UNSUPPORTED_COMMAND"),
            StatusCode::InvalidCommand => write!(f, "INVALID_COMMAND"),
            StatusCode::UnsupportedAttribute => write!(f, "UNSUPPORTED_ATTRIBUTE"),
            StatusCode::ConstraintError => write!(f, "CONSTRAINT_ERROR"),
            StatusCode::UnsupportedWrite => write!(f, "UNSUPPORTED_WRITE"),
            StatusCode::ResourceExhausted => write!(f, "RESOURCE_EXHAUSTED"),
            StatusCode::NotFound => write!(f, "NOT_FOUND"),
            StatusCode::UnreportableAttribute => write!(f, "UNREPORTABLE_ATTRIBUTE"),
            StatusCode::InvalidDataType => write!(f, "INVALID_DATA_TYPE"),
            StatusCode::UnsupportedRead => write!(f, "UNSUPPORTED_READ"),
            StatusCode::DataVersionMismatch => write!(f, "DATA_VERSION_MISMATCH"),
            StatusCode::Timeout => write!(f, "TIMEOUT"),
            StatusCode::Busy => write!(f, "BUSY"),
            StatusCode::UnsupportedCluster => write!(f, "UNSUPPORTED_CLUSTER"),
            StatusCode::NeedsTimedInteraction => write!(f, "NEEDS_TIMED_INTERACTION"),
            StatusCode::Unknown => write!(f, "UNKNOWN {}", *self as u8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, ProtocolMessageHeader, StatusCode};

    #[test]
    pub fn test_decode_invoke() {
        // unsecured message from node 0x0102030405060708, invoke request on exchange 0x1234
        let msg = concat!(
            "040000000a0000000807060504030201",
            "050834120100",
            "1528002801360215370024000024013e240206181818290424ff0b18"
        );
        let msg = hex::decode(msg).unwrap();
        let m = Message::decode(&msg).unwrap();
        println!("{:?}", m);
        assert_eq!(m.message_header.message_counter, 10);
        assert_eq!(m.message_header.source_node(), Some(0x0102030405060708));
        assert_eq!(m.protocol_header.exchange_id, 0x1234);
        assert_eq!(
            m.protocol_header.opcode,
            ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_REQ
        );
        assert!(m.protocol_header.is_initiator());
        assert_eq!(m.payload[0], 0x15);

        let resp = m
            .protocol_header
            .response(ProtocolMessageHeader::INTERACTION_OPCODE_INVOKE_RESP, 10)
            .encode()
            .unwrap();
        assert_eq!(hex::encode(resp), "0609341201000a000000");
    }

    #[test]
    pub fn test_status_code_stable() {
        assert_eq!(StatusCode::InvalidCommand.code(), 0x85);
        assert_eq!(StatusCode::UnsupportedWrite.code(), 0x88);
        assert_eq!(StatusCode::from(0x87), StatusCode::ConstraintError);
        assert_eq!(StatusCode::from(0x42), StatusCode::Unknown);
        assert_eq!(StatusCode::Timeout.to_string(), "TIMEOUT");
    }
}
