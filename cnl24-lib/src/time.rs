//! Pump timestamp codec.
//!
//! The pump encodes times as a 32-bit relative clock (RTC) plus a signed UTC
//! offset, both against a fixed epoch of 2000-01-01T00:00:00Z. The pump has no
//! concept of timezones: `base + rtc + offset` is the wall-clock time the user
//! sees on the device, so it is reinterpreted as local time here.

use chrono::{DateTime, Local, TimeZone};

/// Seconds from the Unix epoch to the pump epoch (2000-01-01T00:00:00Z).
pub const PUMP_BASE_TIME: i64 = 946_684_800;

/// Extract the signed offset half of a packed 64-bit pump timestamp.
pub fn decode_date_time_offset(raw: u64) -> i64 {
    (raw & 0xffff_ffff) as i64 - 0x1_0000_0000
}

/// Extract the RTC half of a packed 64-bit pump timestamp.
pub fn decode_rtc(raw: u64) -> u32 {
    ((raw >> 32) & 0xffff_ffff) as u32
}

/// Decode a packed 64-bit pump timestamp (RTC in the high word, offset in the
/// low word) to local calendar time.
pub fn decode_date_time(raw: u64) -> DateTime<Local> {
    from_rtc_and_offset(decode_rtc(raw), decode_date_time_offset(raw))
}

/// Decode an RTC value with an explicit offset. Status responses carry a bare
/// 32-bit RTC and use offset zero.
pub fn from_rtc_and_offset(rtc: u32, offset: i64) -> DateTime<Local> {
    let secs = (PUMP_BASE_TIME + rtc as i64 + offset).max(0);
    let naive = DateTime::from_timestamp(secs, 0)
        .unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
        .naive_utc();
    // The arithmetic above yields wall-clock time; pin it to the local zone.
    match Local.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => Local.timestamp_opt(secs, 0).earliest().unwrap_or_else(|| {
            Local.timestamp_opt(0, 0).unwrap()
        }),
    }
}

/// Encode a local calendar time back to the pump's RTC, given the offset the
/// pump reported for the session. Saturates at the RTC range.
pub fn rtc_from_date(date: DateTime<Local>, offset: i64) -> u32 {
    let secs = date.naive_local().and_utc().timestamp();
    let rtc = secs - offset - PUMP_BASE_TIME;
    rtc.clamp(0, u32::MAX as i64) as u32
}
