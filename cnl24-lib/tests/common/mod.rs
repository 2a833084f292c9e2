//! Shared fixture builders for the integration tests.

use cnl24_lib::comd::{CRC16, ComdCommand};
use cnl24_lib::constants::HISTORY_BLOCK_SIZE;
use cnl24_lib::events::HistoryRecord;
use cnl24_lib::history::HistoryDataType;
use bytes::Bytes;

/// Pack an RTC and signed offset into the pump's 64-bit timestamp encoding.
pub fn encode_timestamp(rtc: u32, offset: i64) -> u64 {
    ((rtc as u64) << 32) | ((offset + 0x1_0000_0000) as u64 & 0xffff_ffff)
}

/// Assemble one history record from header fields and a type-specific body.
pub fn make_record(event_type: u8, encoded_timestamp: u64, body: &[u8]) -> HistoryRecord {
    let mut data = vec![event_type, 0x01, (0x0B + body.len()) as u8];
    data.extend_from_slice(&encoded_timestamp.to_be_bytes());
    data.extend_from_slice(body);
    HistoryRecord::new(Bytes::from(data))
}

/// Pad record bytes out to a 2048-byte history block with the trailing
/// length/CRC filled in.
pub fn make_block(data: &[u8]) -> Vec<u8> {
    assert!(data.len() <= HISTORY_BLOCK_SIZE - 4);
    let mut block = vec![0u8; HISTORY_BLOCK_SIZE];
    block[..data.len()].copy_from_slice(data);
    let crc = CRC16.checksum(data);
    block[HISTORY_BLOCK_SIZE - 4..HISTORY_BLOCK_SIZE - 2]
        .copy_from_slice(&(data.len() as u16).to_be_bytes());
    block[HISTORY_BLOCK_SIZE - 2..].copy_from_slice(&crc.to_be_bytes());
    block
}

/// Emit `data` as a single LZO literal run plus the end-of-stream marker.
pub fn lzo_literal_stream(data: &[u8]) -> Vec<u8> {
    let len = data.len() - 3;
    assert!(len > 15 && (len - 15) % 255 != 0);
    let mut stream = vec![0x00];
    stream.extend(std::iter::repeat_n(0x00, (len - 15) / 255));
    stream.push(((len - 15) % 255) as u8);
    stream.extend_from_slice(data);
    stream.extend_from_slice(&[0x11, 0x00, 0x00]);
    stream
}

/// Wrap block bytes in the UNMERGED_HISTORY_RESPONSE blob header, optionally
/// LZO-compressing them first.
pub fn make_blob(blocks: &[u8], data_type: HistoryDataType, compress: bool) -> Vec<u8> {
    let body = if compress {
        lzo_literal_stream(blocks)
    } else {
        blocks.to_vec()
    };
    let mut blob = Vec::with_capacity(body.len() + 12);
    blob.extend_from_slice(&u16::from(ComdCommand::UnmergedHistoryResponse).to_be_bytes());
    blob.push(data_type.into());
    blob.extend_from_slice(&(body.len() as u32).to_be_bytes());
    blob.extend_from_slice(&(blocks.len() as u32).to_be_bytes());
    blob.push(compress as u8);
    blob.extend_from_slice(&body);
    blob
}
