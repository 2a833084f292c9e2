//! USB HID framing and the ASCII device-info frame.
//!
//! The stick talks in 64-byte HID reports: a 3-byte `ABC` magic, one length
//! byte, then up to 60 payload bytes. Logical messages span reports; 0x80 and
//! 0x81 responses carry their total size inside the envelope, so the reader
//! keeps pulling reports until the announced size (or a short report) ends
//! the message. Writes are split into 60-byte chunks the same way.

use std::time::Duration;

use tracing::{debug, error};

use crate::constants::{CHUNK_PAYLOAD_SIZE, MAGIC_HEADER, USB_BLOCKSIZE};
use crate::error::CnlError;

/// ASTM-style control bytes used by the ASCII handshake.
pub mod ascii {
    pub const STX: u8 = 0x02;
    pub const ETX: u8 = 0x03;
    pub const EOT: u8 = 0x04;
    pub const ENQ: u8 = 0x05;
    pub const ACK: u8 = 0x06;
    pub const LF: u8 = 0x0A;
    pub const CR: u8 = 0x0D;
    pub const NAK: u8 = 0x15;
    pub const ETB: u8 = 0x17;
}

/// The byte-oriented report transport the driver runs over. Implementations
/// return one HID report per read (up to 64 bytes) and must surface expiry as
/// [`CnlError::TransportTimeout`].
pub trait UsbHidDevice {
    fn read_report(&mut self, timeout: Duration) -> Result<Vec<u8>, CnlError>;
    fn write_report(&mut self, report: &[u8]) -> Result<(), CnlError>;
}

/// Offset of the command byte inside a logical message (outer envelope).
const COMMAND_OFFSET: usize = 0x12;
/// Offsets of the little-endian payload length inside the outer envelope.
const LENGTH_OFFSET: usize = 0x1C;
/// A bare envelope: 33 header bytes.
const ENVELOPE_LEN: usize = 0x21;

/// Read one logical message, reassembling it from chunked reports. The first
/// report honors the caller's timeout; continuation reports get a short fixed
/// allowance.
pub fn read_message<D: UsbHidDevice>(
    device: &mut D,
    timeout: Duration,
) -> Result<Vec<u8>, CnlError> {
    let mut payload: Vec<u8> = Vec::new();
    let mut expected_size = 0usize;
    let mut first = true;

    loop {
        let report_timeout = if first {
            timeout
        } else {
            Duration::from_millis(1_500)
        };
        let report = device.read_report(report_timeout)?;
        first = false;

        if report.len() < 4 || &report[0..3] != MAGIC_HEADER {
            error!(len = report.len(), "received invalid USB report");
            break;
        }
        let chunk_len = report[3] as usize;
        let end = (4 + chunk_len).min(report.len());
        payload.extend_from_slice(&report[4..end]);

        // 0x80/0x81 messages announce their size and may end exactly on a
        // report boundary
        if expected_size == 0
            && chunk_len >= ENVELOPE_LEN
            && report.len() >= 4 + ENVELOPE_LEN
            && (report[COMMAND_OFFSET + 4] == 0x80 || report[COMMAND_OFFSET + 4] == 0x81)
        {
            expected_size = ENVELOPE_LEN
                + (report[LENGTH_OFFSET + 4] as usize
                    | (report[LENGTH_OFFSET + 5] as usize) << 8);
        }

        let report_full = chunk_len == USB_BLOCKSIZE - 4;
        if !(report_full && payload.len() != expected_size) {
            break;
        }
    }

    debug!(message = %hex::encode(&payload), "read");
    Ok(payload)
}

/// Write one logical message as a sequence of chunked reports.
pub fn send_message<D: UsbHidDevice>(device: &mut D, payload: &[u8]) -> Result<(), CnlError> {
    for chunk in payload.chunks(CHUNK_PAYLOAD_SIZE) {
        let mut report = Vec::with_capacity(chunk.len() + 4);
        report.extend_from_slice(MAGIC_HEADER);
        report.push(chunk.len() as u8);
        report.extend_from_slice(chunk);
        debug!(report = %hex::encode(&report), "send");
        device.write_report(&report)?;
    }
    Ok(())
}

/// `55 0B 00 00 00 02 00 00 03 00 00` inside a 0x2E-byte message: the pump
/// did not answer. The stream is clear after it.
pub fn is_no_pump_response(message: &[u8]) -> bool {
    message.len() == 0x2E
        && message[0x21] == 0x55
        && message[0x23] == 0x00
        && message[0x24] == 0x00
        && message[0x26] == 0x02
        && message[0x29] == 0x03
}

/// `55 0D 00 00 00 02 00 00 02 00 01 ..` inside a 0x30-byte message: the
/// radio link to the pump dropped. Unrecoverable within the session.
pub fn is_lost_connection(message: &[u8]) -> bool {
    message.len() == 0x30
        && message[0x21] == 0x55
        && message[0x24] == 0x00
        && message[0x25] == 0x00
        && message[0x26] == 0x02
        && message[0x29] == 0x02
        && message[0x2B] == 0x01
}

/// The 0x4F-byte network-connect shape with the 0x83/0x43 markers instead of
/// the standard 0x82/0x42: also a dropped connection.
pub fn is_nonstandard_network_connect(message: &[u8]) -> bool {
    message.len() == 0x4F
        && message[0x21] == 0x55
        && message[0x23] == 0x00
        && message[0x24] == 0x00
        && message[0x33] == 0x83
        && message[0x44] == 0x43
}

/// `55 0B 00 06 88 00 65 ..`: the stick's receive buffer filled mid
/// transfer; the message is noise and the read should continue.
pub fn is_receive_buffer_full(message: &[u8]) -> bool {
    message.len() == 0x2E
        && message[0x24] == 0x06
        && message[0x25] == 0x88
        && message[0x26] == 0x00
        && message[0x27] == 0x65
}

/// True for the chunked ASCII frame carrying the device-info record (as
/// opposed to a bare control byte).
pub fn is_astm_frame(message: &[u8]) -> bool {
    message.first() == Some(&ascii::STX)
}

/// The decoded device-info frame: records of `|`-separated fields, each field
/// a list of `\`-separated repeats, each repeat `^`-separated components.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfoFrame {
    records: Vec<Vec<Vec<Vec<String>>>>,
}

impl DeviceInfoFrame {
    /// Decode the ASCII frame: strip the STX, frame number and trailing
    /// terminator/checksum, then split records, fields, repeats, components.
    pub fn decode(frame: &[u8]) -> Result<Self, CnlError> {
        if !is_astm_frame(frame) {
            return Err(CnlError::InvalidFrame("device info frame missing STX".into()));
        }
        let body_start = if frame.len() > 1 && frame[1].is_ascii_digit() {
            2
        } else {
            1
        };
        let body_end = frame
            .iter()
            .position(|&b| b == ascii::ETB || b == ascii::ETX)
            .unwrap_or(frame.len());
        let body = &frame[body_start..body_end];

        let text: String = body.iter().map(|&b| b as char).collect();
        let records = text
            .split(ascii::CR as char)
            .filter(|record| !record.is_empty())
            .map(|record| {
                record
                    .split('|')
                    .map(|field| {
                        field
                            .split('\\')
                            .map(|repeat| repeat.split('^').map(str::to_string).collect())
                            .collect()
                    })
                    .collect()
            })
            .collect();
        Ok(Self { records })
    }

    fn component(&self, record: usize, field: usize, repeat: usize, comp: usize) -> Option<&str> {
        self.records
            .get(record)?
            .get(field)?
            .get(repeat)?
            .get(comp)
            .map(String::as_str)
    }

    /// The stick serial used to key pairing data.
    pub fn stick_serial(&self) -> Result<&str, CnlError> {
        self.component(0, 4, 3, 1)
            .filter(|serial| !serial.is_empty())
            .ok_or_else(|| CnlError::InvalidFrame("device info frame has no serial".into()))
    }

    pub fn model(&self) -> Option<&str> {
        self.component(0, 4, 0, 0)
    }

    pub fn serial_full(&self) -> Option<&str> {
        self.component(0, 4, 3, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted transport: pops canned reports, records writes.
    pub(crate) struct ScriptedDevice {
        pub reads: VecDeque<Vec<u8>>,
        pub writes: Vec<Vec<u8>>,
    }

    impl ScriptedDevice {
        pub fn new(reads: Vec<Vec<u8>>) -> Self {
            Self {
                reads: reads.into(),
                writes: Vec::new(),
            }
        }
    }

    impl UsbHidDevice for ScriptedDevice {
        fn read_report(&mut self, _timeout: Duration) -> Result<Vec<u8>, CnlError> {
            self.reads
                .pop_front()
                .ok_or(CnlError::TransportTimeout("usb report"))
        }

        fn write_report(&mut self, report: &[u8]) -> Result<(), CnlError> {
            self.writes.push(report.to_vec());
            Ok(())
        }
    }

    fn report(payload: &[u8]) -> Vec<u8> {
        let mut r = Vec::with_capacity(64);
        r.extend_from_slice(MAGIC_HEADER);
        r.push(payload.len() as u8);
        r.extend_from_slice(payload);
        r.resize(64, 0);
        r
    }

    #[test]
    fn single_report_message() {
        let mut device = ScriptedDevice::new(vec![report(&[0x05])]);
        let message = read_message(&mut device, Duration::from_millis(100)).unwrap();
        assert_eq!(message, vec![0x05]);
    }

    #[test]
    fn multi_report_message_reassembles_to_announced_size() {
        // a 0x81 envelope announcing 0x27 payload bytes: total 0x48 = 72,
        // split 60 + 12
        let mut message = vec![0u8; 0x48];
        message[0] = 0x51;
        message[0x12] = 0x81;
        message[0x1C] = 0x27;
        let mut device = ScriptedDevice::new(vec![report(&message[..60]), report(&message[60..])]);
        let out = read_message(&mut device, Duration::from_millis(100)).unwrap();
        assert_eq!(out, message);
    }

    #[test]
    fn send_chunks_large_payloads() {
        let mut device = ScriptedDevice::new(vec![]);
        let payload = vec![0xAB; 75];
        send_message(&mut device, &payload).unwrap();
        assert_eq!(device.writes.len(), 2);
        assert_eq!(&device.writes[0][..3], MAGIC_HEADER);
        assert_eq!(device.writes[0][3], 60);
        assert_eq!(device.writes[1][3], 15);
        assert_eq!(device.writes[1].len(), 4 + 15);
    }

    #[test]
    fn bad_magic_ends_the_read() {
        let mut bad = report(&[0x05]);
        bad[0] = b'X';
        let mut device = ScriptedDevice::new(vec![bad]);
        let message = read_message(&mut device, Duration::from_millis(100)).unwrap();
        assert!(message.is_empty());
    }

    #[test]
    fn terminal_frame_shapes() {
        let mut no_response = vec![0u8; 0x2E];
        no_response[0x21] = 0x55;
        no_response[0x26] = 0x02;
        no_response[0x29] = 0x03;
        assert!(is_no_pump_response(&no_response));
        assert!(!is_lost_connection(&no_response));

        let mut lost = vec![0u8; 0x30];
        lost[0x21] = 0x55;
        lost[0x26] = 0x02;
        lost[0x29] = 0x02;
        lost[0x2B] = 0x01;
        assert!(is_lost_connection(&lost));

        let mut buffer_full = vec![0u8; 0x2E];
        buffer_full[0x24] = 0x06;
        buffer_full[0x25] = 0x88;
        buffer_full[0x27] = 0x65;
        assert!(is_receive_buffer_full(&buffer_full));
        assert!(!is_no_pump_response(&buffer_full));
    }

    #[test]
    fn device_info_frame_extracts_the_serial() {
        let mut frame = vec![ascii::STX, b'1'];
        frame.extend_from_slice(
            b"M|1|ID|^^^|BAYER7350^1.0\\A^B\\C^D\\E^6229-1234567^19^7350-2345678|A|\r",
        );
        frame.push(ascii::ETB);
        frame.extend_from_slice(b"09\r\n");
        let info = DeviceInfoFrame::decode(&frame).unwrap();
        assert_eq!(info.stick_serial().unwrap(), "6229-1234567");
        assert_eq!(info.model(), Some("BAYER7350"));
        assert_eq!(info.serial_full(), Some("7350-2345678"));
    }

    #[test]
    fn control_byte_is_not_an_astm_frame() {
        assert!(!is_astm_frame(&[ascii::ENQ]));
        assert!(is_astm_frame(&[ascii::STX, b'1', b'M']));
    }
}
