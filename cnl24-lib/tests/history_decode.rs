//! End-to-end history decoding: blob to typed, cross-referenced events.

mod common;

use common::*;

use cnl24_lib::error::CnlError;
use cnl24_lib::events::{self, BolusRecord, HistoryEvent};
use cnl24_lib::history::{HistoryDataType, decode_history_segment};

fn programmed_body(number: u8, amount_raw: u32) -> Vec<u8> {
    let mut body = vec![0x01, number, 0x00];
    body.extend_from_slice(&amount_raw.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes());
    body
}

fn delivered_body(number: u8, amount_raw: u32) -> Vec<u8> {
    let mut body = vec![0x01, number, 0x00];
    body.extend_from_slice(&amount_raw.to_be_bytes());
    body.extend_from_slice(&amount_raw.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes());
    body
}

#[test]
fn compressed_blob_decodes_to_linked_bolus_events() {
    // two blocks: a programmed bolus, then its delivery two minutes later
    let programmed = make_record(
        0x15,
        encode_timestamp(0x2000_0000, -7200),
        &programmed_body(3, 25_000),
    );
    let delivered = make_record(
        0xDC,
        encode_timestamp(0x2000_0078, -7200),
        &delivered_body(3, 25_000),
    );
    let mut blocks = make_block(programmed.raw());
    blocks.extend_from_slice(&make_block(delivered.raw()));
    let blob = make_blob(&blocks, HistoryDataType::PumpData, true);

    let decoded_blocks = decode_history_segment(&blob, HistoryDataType::PumpData).unwrap();
    assert_eq!(decoded_blocks.len(), 2);

    let events = events::decode_blocks(&decoded_blocks);
    assert_eq!(events.len(), 2);

    let HistoryEvent::NormalBolusProgrammed(programmed_view) = &events[0] else {
        panic!("expected a programmed bolus first");
    };
    assert_eq!(programmed_view.bolus_number().unwrap(), 3);
    assert_eq!(programmed_view.programmed_amount().unwrap(), 2.5);

    let HistoryEvent::NormalBolusDelivered(delivered_view) = &events[1] else {
        panic!("expected a delivered bolus second");
    };
    assert_eq!(delivered_view.delivered_amount().unwrap(), 2.5);

    let links = events::correlate_boluses(&events);
    assert_eq!(links[1].programmed, Some(0));
    assert!(!links[1].was_canceled());

    // the linked index resolves back to the same programmed event
    let Some(HistoryEvent::NormalBolusProgrammed(linked)) =
        links[1].programmed.map(|i| &events[i])
    else {
        panic!("link does not resolve to the programmed event");
    };
    assert_eq!(
        linked.programmed_amount().unwrap(),
        delivered_view.programmed_amount().unwrap()
    );
}

#[test]
fn uncompressed_blob_takes_the_passthrough_path() {
    let record = make_record(0x36, encode_timestamp(0x2000_0000, 0), &[]);
    let blob = make_blob(&make_block(record.raw()), HistoryDataType::PumpData, false);
    let decoded = decode_history_segment(&blob, HistoryDataType::PumpData).unwrap();
    let events = events::decode_blocks(&decoded);
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], HistoryEvent::Rewind(_)));
}

#[test]
fn sensor_blob_requested_as_pump_data_fails() {
    let record = make_record(0x36, encode_timestamp(0, 0), &[]);
    let blob = make_blob(&make_block(record.raw()), HistoryDataType::SensorData, false);
    assert!(matches!(
        decode_history_segment(&blob, HistoryDataType::PumpData),
        Err(CnlError::InvalidHistoryBlob(_))
    ));
}

#[test]
fn extended_sensor_records_expand_inline_with_the_stream() {
    // one rewind, then a packed record of three readings at 5-minute cadence
    let rewind = make_record(0x36, encode_timestamp(0x2000_0000, 0), &[]);
    let mut body = vec![5u8, 3, 0x00, 0x00, 0x00, 0x00];
    for sg in [100u16, 110, 120] {
        let mut group = [0u8; 9];
        group[..2].copy_from_slice(&sg.to_be_bytes());
        body.extend_from_slice(&group);
    }
    let packed = make_record(0xD6, encode_timestamp(0x2000_0E10, 0), &body);

    let mut block_data = rewind.raw().to_vec();
    block_data.extend_from_slice(packed.raw());
    let blob = make_blob(&make_block(&block_data), HistoryDataType::SensorData, true);

    let decoded = decode_history_segment(&blob, HistoryDataType::SensorData).unwrap();
    let events = events::decode_blocks(&decoded);
    // the packed record itself is not yielded, only its readings
    assert_eq!(events.len(), 4);
    let readings: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            HistoryEvent::SensorGlucoseReading(reading) => Some(reading),
            _ => None,
        })
        .collect();
    assert_eq!(readings.len(), 3);
    assert_eq!(readings[0].sg, 100);
    assert_eq!(readings[2].sg, 120);
    assert!(readings[0].timestamp < readings[2].timestamp);
    assert_eq!(events[3].raw_event_type(), 0xD601);
}
