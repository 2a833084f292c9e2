//! History blob decoding.
//!
//! A reassembled history segment is an UNMERGED_HISTORY_RESPONSE blob: a
//! 12-byte header (message type, data type, compressed and uncompressed
//! lengths, compression flag) followed by the history data, LZO-compressed
//! when the flag is set. The data is a whole number of 2048-byte blocks, each
//! carrying its own length and CRC-16 in the trailing four bytes. Any header
//! or block-level failure aborts the whole decode; there is no partial-block
//! tolerance.

use bytes::Bytes;
use num_enum::{FromPrimitive, IntoPrimitive};
use tracing::{debug, error};

use crate::comd::{CRC16, ComdCommand};
use crate::constants::{HISTORY_BLOCK_SIZE, HISTORY_HEADER_SIZE};
use crate::cursor::BinaryCursor;
use crate::error::CnlError;
use crate::lzo;

/// Which history stream to pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HistoryDataType {
    #[num_enum(default)]
    PumpData = 0x02,
    SensorData = 0x03,
}

/// Range selector in history requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum HistoryRangeType {
    FullHistory = 0x03,
    #[num_enum(default)]
    PartialHistory = 0x04,
}

fn blob_err(message: impl Into<String>) -> CnlError {
    CnlError::InvalidHistoryBlob(message.into())
}

/// Decode one reassembled history segment into its CRC-verified blocks, each
/// truncated to its actual data length.
pub fn decode_history_segment(
    blob: &[u8],
    expected_type: HistoryDataType,
) -> Result<Vec<Bytes>, CnlError> {
    let cursor = BinaryCursor::new(blob);
    let message_type = ComdCommand::from_primitive(cursor.u16_be_at(0x00)?);
    if message_type != ComdCommand::UnmergedHistoryResponse {
        return Err(blob_err(format!(
            "unexpected blob message type {:#06x}",
            u16::from(message_type)
        )));
    }

    let data_type = HistoryDataType::from_primitive(cursor.u8_at(0x02)?);
    if data_type != expected_type {
        return Err(blob_err(format!(
            "history data type mismatch: requested {expected_type:?}, got {data_type:?}"
        )));
    }

    let compressed_len = cursor.u32_be_at(0x03)? as usize;
    let uncompressed_len = cursor.u32_be_at(0x07)? as usize;
    let compressed = cursor.u8_at(0x0B)? != 0;
    debug!(compressed_len, uncompressed_len, compressed, "history blob header");

    if blob.len() - HISTORY_HEADER_SIZE != compressed_len {
        return Err(blob_err(format!(
            "blob length {} does not match declared compressed length {compressed_len}",
            blob.len() - HISTORY_HEADER_SIZE
        )));
    }

    let body = &blob[HISTORY_HEADER_SIZE..];
    let block_payload = if compressed {
        Bytes::from(lzo::decompress(body, uncompressed_len)?)
    } else {
        Bytes::copy_from_slice(body)
    };

    if block_payload.len() % HISTORY_BLOCK_SIZE != 0 {
        return Err(blob_err(format!(
            "history payload of {} bytes is not a multiple of {HISTORY_BLOCK_SIZE}",
            block_payload.len()
        )));
    }

    let mut blocks = Vec::with_capacity(block_payload.len() / HISTORY_BLOCK_SIZE);
    for index in 0..block_payload.len() / HISTORY_BLOCK_SIZE {
        let block = &block_payload[index * HISTORY_BLOCK_SIZE..(index + 1) * HISTORY_BLOCK_SIZE];
        let data_len = u16::from_be_bytes(block[HISTORY_BLOCK_SIZE - 4..HISTORY_BLOCK_SIZE - 2].try_into().unwrap())
            as usize;
        let declared_crc =
            u16::from_be_bytes(block[HISTORY_BLOCK_SIZE - 2..].try_into().unwrap());
        if data_len > HISTORY_BLOCK_SIZE - 4 {
            return Err(blob_err(format!(
                "block {index} declares {data_len} data bytes"
            )));
        }
        let data = &block[..data_len];
        let actual_crc = CRC16.checksum(data);
        if declared_crc != actual_crc {
            error!(index, declared_crc, actual_crc, "history block CRC mismatch");
            return Err(CnlError::ChecksumMismatch {
                context: "history block",
                expected: declared_crc,
                actual: actual_crc,
            });
        }
        blocks.push(block_payload.slice(index * HISTORY_BLOCK_SIZE..index * HISTORY_BLOCK_SIZE + data_len));
    }
    Ok(blocks)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Pad `data` to a 2048-byte block with the length/CRC trailer filled in.
    pub(crate) fn make_block(data: &[u8]) -> Vec<u8> {
        assert!(data.len() <= HISTORY_BLOCK_SIZE - 4);
        let mut block = vec![0u8; HISTORY_BLOCK_SIZE];
        block[..data.len()].copy_from_slice(data);
        let crc = CRC16.checksum(data);
        block[HISTORY_BLOCK_SIZE - 4..HISTORY_BLOCK_SIZE - 2]
            .copy_from_slice(&(data.len() as u16).to_be_bytes());
        block[HISTORY_BLOCK_SIZE - 2..].copy_from_slice(&crc.to_be_bytes());
        block
    }

    /// Wrap uncompressed block bytes in the UNMERGED_HISTORY_RESPONSE header.
    pub(crate) fn make_blob(blocks: &[u8], data_type: HistoryDataType) -> Vec<u8> {
        let mut blob = Vec::with_capacity(blocks.len() + HISTORY_HEADER_SIZE);
        blob.extend_from_slice(&u16::from(ComdCommand::UnmergedHistoryResponse).to_be_bytes());
        blob.push(data_type.into());
        blob.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
        blob.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
        blob.push(0);
        blob.extend_from_slice(blocks);
        blob
    }

    #[test]
    fn uncompressed_blob_splits_into_verified_blocks() {
        let mut blocks = make_block(b"first block");
        blocks.extend_from_slice(&make_block(b"second block"));
        let blob = make_blob(&blocks, HistoryDataType::PumpData);

        let decoded = decode_history_segment(&blob, HistoryDataType::PumpData).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].as_ref(), b"first block");
        assert_eq!(decoded[1].as_ref(), b"second block");
    }

    #[test]
    fn data_type_mismatch_fails() {
        let blob = make_blob(&make_block(b"x"), HistoryDataType::SensorData);
        assert!(matches!(
            decode_history_segment(&blob, HistoryDataType::PumpData),
            Err(CnlError::InvalidHistoryBlob(_))
        ));
    }

    #[test]
    fn length_mismatch_fails() {
        let mut blob = make_blob(&make_block(b"x"), HistoryDataType::PumpData);
        blob.push(0);
        assert!(matches!(
            decode_history_segment(&blob, HistoryDataType::PumpData),
            Err(CnlError::InvalidHistoryBlob(_))
        ));
    }

    #[test]
    fn corrupt_block_crc_fails_the_whole_decode() {
        let mut blocks = make_block(b"good");
        blocks[2] ^= 0xFF;
        let blob = make_blob(&blocks, HistoryDataType::PumpData);
        assert!(matches!(
            decode_history_segment(&blob, HistoryDataType::PumpData),
            Err(CnlError::ChecksumMismatch {
                context: "history block",
                ..
            })
        ));
    }

    #[test]
    fn wrong_message_type_fails() {
        let mut blob = make_blob(&make_block(b"x"), HistoryDataType::PumpData);
        blob[0] = 0x01;
        blob[1] = 0x02;
        assert!(matches!(
            decode_history_segment(&blob, HistoryDataType::PumpData),
            Err(CnlError::InvalidHistoryBlob(_))
        ));
    }

    #[test]
    fn compressed_blob_round_trips_through_lzo() {
        // a literal-only LZO stream wrapping one block
        let block = make_block(b"compressed history");
        let mut stream = Vec::new();
        // emit as a long literal run: first instruction 0, 15-extension bytes
        let len = block.len() - 3;
        let full = (len - 15) / 255;
        let rest = (len - 15) % 255;
        stream.push(0x00);
        stream.extend(std::iter::repeat_n(0x00, full));
        stream.push(rest as u8);
        stream.extend_from_slice(&block);
        stream.extend_from_slice(&[0x11, 0x00, 0x00]);

        let mut blob = Vec::new();
        blob.extend_from_slice(&u16::from(ComdCommand::UnmergedHistoryResponse).to_be_bytes());
        blob.push(HistoryDataType::PumpData.into());
        blob.extend_from_slice(&(stream.len() as u32).to_be_bytes());
        blob.extend_from_slice(&(block.len() as u32).to_be_bytes());
        blob.push(1);
        blob.extend_from_slice(&stream);

        let decoded = decode_history_segment(&blob, HistoryDataType::PumpData).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].as_ref(), b"compressed history");
    }
}
