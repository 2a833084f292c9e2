//! Outer dongle envelope.
//!
//! Every command to the Contour Next Link rides in a fixed 33-byte envelope:
//! 32 little-endian header bytes and a sum-mod-256 checksum over the header
//! and payload. The pump-serial field is the literal text `000000` — modern
//! pumps ignore it.

use bytes::Bytes;
use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::error;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::constants::ENVELOPE_SIZE;
use crate::error::CnlError;
use crate::session::PumpSession;

/// Dongle command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CommandType {
    NoType = 0x00,
    OpenConnection = 0x10,
    CloseConnection = 0x11,
    SendMessage = 0x12,
    ReadInfo = 0x14,
    RequestLinkKey = 0x16,
    SendLinkKey = 0x17,
    ReceiveMessage = 0x80,
    SendMessageResponse = 0x81,
    RequestLinkKeyResponse = 0x86,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// The 32 header bytes preceding the checksum. All multi-byte fields are
/// little-endian; the encrypted payload inside SEND_MESSAGE frames is
/// big-endian — the two layers do not share a byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct EnvelopeHeader {
    pub frame_type: u8,
    pub frame_subtype: u8,
    /// `000000` placeholder; 600-series pumps ignore it.
    pub pump_serial: [u8; 6],
    pub reserved_a: [u8; 10],
    pub command: u8,
    pub sequence: U32,
    pub reserved_b: [u8; 5],
    pub payload_len: U32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CnlEnvelope {
    pub header: EnvelopeHeader,
    pub payload: Bytes,
}

fn checksum(header: &[u8], payload: &[u8]) -> u8 {
    header
        .iter()
        .chain(payload.iter())
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

impl CnlEnvelope {
    /// Build an outgoing frame, consuming one dongle sequence number.
    pub fn encode(session: &mut PumpSession, command: CommandType, payload: &[u8]) -> Vec<u8> {
        let header = EnvelopeHeader {
            frame_type: 0x51,
            frame_subtype: 0x03,
            pump_serial: *b"000000",
            reserved_a: [0; 10],
            command: command.into(),
            sequence: U32::new(session.next_cnl_sequence() as u32),
            reserved_b: [0; 5],
            payload_len: U32::new(payload.len() as u32),
        };
        let mut out = Vec::with_capacity(ENVELOPE_SIZE + payload.len());
        out.extend_from_slice(header.as_bytes());
        out.push(checksum(header.as_bytes(), payload));
        out.extend_from_slice(payload);
        out
    }

    /// Decode a received frame, verifying the checksum. Outer checksum
    /// failures are surfaced as [`CnlError::ChecksumMismatch`]; read loops
    /// may drop such frames as radio noise instead of failing the operation.
    pub fn decode(frame: &[u8]) -> Result<Self, CnlError> {
        if frame.len() < ENVELOPE_SIZE {
            return Err(CnlError::InsufficientData {
                expected: ENVELOPE_SIZE,
                actual: frame.len(),
            });
        }
        let header = EnvelopeHeader::read_from_bytes(&frame[..32])
            .map_err(|_| CnlError::InvalidFrame("unreadable envelope header".into()))?;
        let payload = &frame[ENVELOPE_SIZE..];
        let expected = frame[32];
        let actual = checksum(&frame[..32], payload);
        if expected != actual {
            error!(expected, actual, "outer envelope checksum mismatch");
            return Err(CnlError::ChecksumMismatch {
                context: "outer envelope",
                expected: expected as u16,
                actual: actual as u16,
            });
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    pub fn command(&self) -> CommandType {
        CommandType::from_primitive(self.header.command)
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence.get()
    }
}
