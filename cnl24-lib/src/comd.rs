//! Inner encrypted message layer (ComD).
//!
//! Requests to the pump ride inside a small radio-link envelope (command
//! action byte + length + CRC-16 trailer, little-endian). The encrypted body
//! is big-endian: one ComD sequence byte, a 16-bit message type, the payload,
//! and a CRC-16 trailer that is part of the plaintext. A CRC failure after
//! decryption means a wrong key, a wrong channel-derived IV, or corruption,
//! and is fatal to the operation; the link-layer CRC on the outside is only
//! logged, since the radio leg is lossy by design.

use bytes::Bytes;
use crc::{CRC_16_IBM_3740, Crc};
use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::debug;

use crate::error::CnlError;
use crate::session::PumpSession;

/// CCITT polynomial 0x1021 seeded with 0xFFFF, as both CRC layers use it.
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Radio-link command actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum CommandAction {
    NoType = 0x00,
    Initialize = 0x01,
    ScanNetwork = 0x02,
    JoinNetwork = 0x03,
    LeaveNetwork = 0x04,
    TransmitPacket = 0x05,
    ReadData = 0x06,
    ReadStatus = 0x07,
    ReadNetworkStatus = 0x08,
    SetSecurityMode = 0x0C,
    ReadStatistics = 0x0D,
    SetRfMode = 0x0E,
    ClearStatus = 0x10,
    SetLinkKey = 0x14,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// ComD message types carried inside the encrypted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum ComdCommand {
    HighSpeedMode = 0x0412,
    TimeRequest = 0x0403,
    TimeResponse = 0x0407,
    ReadPumpStatusRequest = 0x0112,
    ReadPumpStatusResponse = 0x013C,
    ReadBasalPatternRequest = 0x0116,
    ReadBasalPatternResponse = 0x0123,
    ReadCarbRatiosRequest = 0x012B,
    ReadCarbRatiosResponse = 0x012C,
    ReadSensitivityFactorsRequest = 0x012E,
    ReadSensitivityFactorsResponse = 0x012F,
    ReadBgTargetsRequest = 0x0131,
    ReadBgTargetsResponse = 0x0132,
    DeviceStringRequest = 0x013A,
    DeviceStringResponse = 0x013B,
    DeviceCharacteristicsRequest = 0x0200,
    DeviceCharacteristicsResponse = 0x0201,
    ReadHistoryRequest = 0x0304,
    ReadHistoryResponse = 0x0305,
    EndHistoryTransmission = 0x030A,
    ReadHistoryInfoRequest = 0x030C,
    ReadHistoryInfoResponse = 0x030D,
    UnmergedHistoryResponse = 0x030E,
    InitiateMultipacketTransfer = 0xFF00,
    MultipacketSegmentTransmission = 0xFF01,
    MultipacketResendPackets = 0xFF02,
    AckMultipacket = 0x00FE,
    Nak = 0x00FF,
    #[num_enum(catch_all)]
    Unknown(u16),
}

/// Wrap a payload in the radio-link envelope: action byte, length byte
/// (payload plus the two envelope bytes), payload, CRC-16 little-endian.
pub fn encode_link_frame(action: CommandAction, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(payload.len() + 4);
    message.push(action.into());
    message.push((payload.len() + 2) as u8);
    message.extend_from_slice(payload);
    let crc = CRC16.checksum(&message);
    message.extend_from_slice(&crc.to_le_bytes());
    message
}

/// Build an encrypted ComD request (TRANSMIT_PACKET action).
///
/// Plaintext layout: sequence byte, big-endian message type, payload,
/// big-endian CRC-16. The high-speed-mode control message always uses the
/// reserved sequence 0x80 and clears the high-speed mode flag; everything
/// else consumes a ComD sequence number.
pub fn encode_comd_request(
    session: &mut PumpSession,
    command: ComdCommand,
    payload: &[u8],
) -> Result<Vec<u8>, CnlError> {
    let mut mode_flags = 0x10u8; // encrypted mode, always required
    let sequence = if command == ComdCommand::HighSpeedMode {
        0x80
    } else {
        mode_flags |= 0x01; // high-speed mode
        session.next_comd_sequence()
    };

    let mut clear = Vec::with_capacity(payload.len() + 5);
    clear.push(sequence);
    clear.extend_from_slice(&u16::from(command).to_be_bytes());
    clear.extend_from_slice(payload);
    let crc = CRC16.checksum(&clear);
    clear.extend_from_slice(&crc.to_be_bytes());
    debug!(payload = %hex::encode(&clear), "comd plaintext");

    let mut inner = Vec::with_capacity(clear.len() + 11);
    inner.extend_from_slice(&session.pump_mac.to_le_bytes());
    inner.push(session.next_med_sequence());
    inner.push(mode_flags);
    inner.push(clear.len() as u8);
    inner.extend_from_slice(&session.encrypt(&clear)?);

    Ok(encode_link_frame(CommandAction::TransmitPacket, &inner))
}

/// Build the JOIN_NETWORK probe for the session's current channel. The wire
/// sequence slot is pinned to 1 for this one message (protocol quirk); the
/// session counter still advances as usual.
pub fn encode_join_network(session: &mut PumpSession) -> Vec<u8> {
    let _ = session.next_med_sequence();
    let mut payload = Vec::with_capacity(26);
    payload.push(1);
    payload.push(session.radio_channel);
    payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x07, 0x07, 0x00, 0x00, 0x02]);
    payload.extend_from_slice(&session.link_mac.to_le_bytes());
    payload.extend_from_slice(&session.pump_mac.to_le_bytes());
    encode_link_frame(CommandAction::JoinNetwork, &payload)
}

/// A decrypted ComD response: the 22-byte radio response envelope and the
/// decrypted payload with its verified CRC stripped. Typed views in
/// [`crate::responses`] index into `payload` at fixed offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct ComdResponse {
    pub envelope: Bytes,
    pub payload: Bytes,
}

impl ComdResponse {
    pub fn decode(session: &PumpSession, message: &[u8]) -> Result<Self, CnlError> {
        if message.len() < 4 {
            return Err(CnlError::InsufficientData {
                expected: 4,
                actual: message.len(),
            });
        }
        let (body, crc_bytes) = message.split_at(message.len() - 2);
        let declared = u16::from_le_bytes(crc_bytes.try_into().unwrap());
        let actual = CRC16.checksum(body);
        if declared != actual {
            // the radio leg is lossy; this CRC is advisory only
            debug!(declared, actual, "radio-link CRC mismatch, continuing");
        }

        let inner = &body[2..];
        if inner.len() < 22 {
            return Err(CnlError::InsufficientData {
                expected: 22,
                actual: inner.len(),
            });
        }
        let (envelope, encrypted) = inner.split_at(22);
        let decrypted = session.decrypt(encrypted)?;
        if decrypted.len() < 2 {
            return Err(CnlError::InsufficientData {
                expected: 2,
                actual: decrypted.len(),
            });
        }
        let (payload, crc_bytes) = decrypted.split_at(decrypted.len() - 2);
        if payload.len() > 2 {
            let declared = u16::from_be_bytes(crc_bytes.try_into().unwrap());
            let actual = CRC16.checksum(payload);
            if declared != actual {
                return Err(CnlError::ChecksumMismatch {
                    context: "decrypted payload",
                    expected: declared,
                    actual,
                });
            }
        }
        debug!(payload = %hex::encode(payload), "decrypted comd payload");
        Ok(Self {
            envelope: Bytes::copy_from_slice(envelope),
            payload: Bytes::copy_from_slice(payload),
        })
    }

    pub fn comd_sequence(&self) -> u8 {
        self.payload.first().copied().unwrap_or(0)
    }

    pub fn command(&self) -> ComdCommand {
        if self.payload.len() < 3 {
            return ComdCommand::Unknown(0);
        }
        ComdCommand::from_primitive(u16::from_be_bytes([self.payload[1], self.payload[2]]))
    }
}
