// Protocol constants for the Contour Next Link 2.4 dongle and 600-series pumps.

/// USB HID report size on the wire.
pub const USB_BLOCKSIZE: usize = 64;

/// Every report starts with this magic followed by a one-byte chunk length.
pub const MAGIC_HEADER: &[u8; 3] = b"ABC";

/// Maximum payload bytes carried by one outgoing report.
pub const CHUNK_PAYLOAD_SIZE: usize = 60;

pub const USB_VID: u16 = 0x1a79;
pub const USB_PID: u16 = 0x6210;

/// Outer envelope: 32 header bytes plus one checksum byte.
pub const ENVELOPE_SIZE: usize = 33;

pub const READ_TIMEOUT_MS: u64 = 25_000;
pub const CNL_READ_TIMEOUT_MS: u64 = 2_000;
pub const ERROR_CLEAR_TIMEOUT_MS: u64 = 25_000;
pub const PRESEND_CLEAR_TIMEOUT_MS: u64 = 50;

/// Time allowance per outstanding multipacket segment.
pub const MULTIPACKET_SEGMENT_MS: u64 = 50;

/// Floor for the multipacket read timeout.
pub const MULTIPACKET_TIMEOUT_MS: u64 = 1_500;

/// Stalled multipacket transfers retry this many times before aborting.
pub const MULTIPACKET_SEGMENT_RETRY: u32 = 10;

/// Radio channels in the order the CareLink applet probes them.
pub const CHANNELS: [u8; 5] = [0x14, 0x11, 0x0e, 0x17, 0x1a];

/// History data arrives in fixed blocks with a 4-byte length/CRC trailer.
pub const HISTORY_BLOCK_SIZE: usize = 2048;

/// Compressed history header: message type, data type, lengths, flag.
pub const HISTORY_HEADER_SIZE: usize = 12;
