//! The raw history record and its event-type discriminant.
//!
//! Every record shares an 11-byte header: event type, a source byte whose
//! meaning is unknown, the record size, and the packed 64-bit timestamp.
//! Type-specific fields follow at offsets fixed per event type.

use bytes::Bytes;
use chrono::{DateTime, Local};
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::cursor::BinaryCursor;
use crate::error::CnlError;
use crate::time;

/// Size of the common record header; type-specific fields start at 0x0B.
pub const RECORD_HEADER_SIZE: usize = 0x0B;

/// History record discriminants. Firmware revisions add types freely, so
/// anything unlisted decodes through the catch-all instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum EventType {
    TimeReset = 0x02,
    UserTimeDateChange = 0x03,
    SourceIdConfiguration = 0x04,
    NetworkDeviceConnection = 0x05,
    AirplaneMode = 0x06,
    StartOfDayMarker = 0x07,
    EndOfDayMarker = 0x08,
    PlgmControllerState = 0x0B,
    ClosedLoopStatusData = 0x0C,
    ClosedLoopPeriodicData = 0x0D,
    ClosedLoopDailyData = 0x0E,
    NormalBolusProgrammed = 0x15,
    SquareBolusProgrammed = 0x16,
    DualBolusProgrammed = 0x17,
    CannulaFillDelivered = 0x1A,
    TempBasalProgrammed = 0x1B,
    BasalPatternSelected = 0x1C,
    BasalSegmentStart = 0x1D,
    InsulinDeliveryStopped = 0x1E,
    InsulinDeliveryRestarted = 0x1F,
    SelfTestRequested = 0x20,
    SelfTestResults = 0x21,
    TempBasalComplete = 0x22,
    BolusSuspended = 0x24,
    SuspendedBolusResumed = 0x25,
    SuspendedBolusCanceled = 0x26,
    BolusCanceled = 0x27,
    AlarmNotification = 0x28,
    AlarmCleared = 0x2A,
    LowReservoir = 0x2B,
    BatteryInserted = 0x2C,
    FoodEventMarker = 0x2E,
    ExerciseEventMarker = 0x2F,
    InjectionEventMarker = 0x30,
    OtherEventMarker = 0x31,
    BgReading = 0x32,
    CodeUpdate = 0x33,
    MissedMealBolusReminderExpired = 0x34,
    Rewind = 0x36,
    BatteryRemoved = 0x37,
    CalibrationComplete = 0x38,
    ActiveInsulinCleared = 0x39,
    DailyTotals = 0x3C,
    BolusWizardEstimate = 0x3D,
    MealWizardEstimate = 0x3E,
    ClosedLoopDailyTotals = 0x3F,
    UserSettingsSave = 0x50,
    UserSettingsResetToDefaults = 0x51,
    OldBasalPattern = 0x52,
    NewBasalPattern = 0x53,
    OldPresetTempBasal = 0x54,
    NewPresetTempBasal = 0x55,
    OldPresetBolus = 0x56,
    NewPresetBolus = 0x57,
    MaxBasalRateChange = 0x58,
    MaxBolusChange = 0x59,
    PersonalReminderChange = 0x5A,
    MissedMealBolusReminderChange = 0x5B,
    BolusIncrementChange = 0x5C,
    BolusWizardSettingsChange = 0x5D,
    OldBolusWizardInsulinSensitivity = 0x5E,
    NewBolusWizardInsulinSensitivity = 0x5F,
    OldBolusWizardInsulinToCarbRatios = 0x60,
    NewBolusWizardInsulinToCarbRatios = 0x61,
    OldBolusWizardBgTargets = 0x62,
    NewBolusWizardBgTargets = 0x63,
    DualBolusOptionChange = 0x64,
    SquareBolusOptionChange = 0x65,
    EasyBolusOptionChange = 0x66,
    BgReminderOptionChange = 0x68,
    BgReminderTime = 0x69,
    AudioVibrateModeChange = 0x6A,
    TimeFormatChange = 0x6B,
    LowReservoirReminderChange = 0x6C,
    LanguageChange = 0x6D,
    StartupWizardStartEnd = 0x6E,
    RemoteBolusOptionChange = 0x6F,
    AutoSuspendChange = 0x72,
    BolusDeliveryRateChange = 0x73,
    DisplayOptionChange = 0x77,
    SetChangeReminderChange = 0x78,
    BlockModeChange = 0x79,
    BolusWizardSettingsSummary = 0x7B,
    ClosedLoopBgReading = 0x82,
    ClosedLoopOptionChange = 0x86,
    ClosedLoopSettingsChanged = 0x87,
    ClosedLoopTempTargetStarted = 0x88,
    ClosedLoopTempTargetEnded = 0x89,
    ClosedLoopAlarmAutoCleared = 0x8A,
    SensorSettingsChange = 0xC8,
    OldSensorWarningLevels = 0xC9,
    NewSensorWarningLevels = 0xCA,
    CalibrationReminderChange = 0xCB,
    SensorGlucoseReadings = 0xCC,
    SensorGlucoseGap = 0xCD,
    GlucoseSensorChange = 0xCE,
    SensorCalibrationRejected = 0xCF,
    SensorAlertSilenceStarted = 0xD0,
    SensorAlertSilenceEnded = 0xD1,
    OldLowSensorWarningLevels = 0xD2,
    NewLowSensorWarningLevels = 0xD3,
    OldHighSensorWarningLevels = 0xD4,
    NewHighSensorWarningLevels = 0xD5,
    SensorGlucoseReadingsExtended = 0xD6,
    NormalBolusDelivered = 0xDC,
    SquareBolusDelivered = 0xDD,
    DualBolusPartDelivered = 0xDE,
    ClosedLoopTransition = 0xDF,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Pseudo event type reported by the per-reading items expanded out of an
/// extended sensor glucose record. Not a wire discriminant.
pub const GENERATED_SENSOR_READING_TYPE: u16 = 0xD601;

/// One raw history record: immutable bytes plus header accessors. Typed views
/// wrap this and read their fields at event-specific offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    data: Bytes,
}

impl HistoryRecord {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    pub fn raw(&self) -> &Bytes {
        &self.data
    }

    pub(crate) fn cursor(&self) -> BinaryCursor<'_> {
        BinaryCursor::new(&self.data)
    }

    pub fn event_type(&self) -> EventType {
        EventType::from_primitive(self.data.first().copied().unwrap_or(0))
    }

    /// Labelled "dynamic action requestor" by the vendor software; semantics
    /// unknown, exposed raw.
    pub fn source(&self) -> u8 {
        self.data.get(1).copied().unwrap_or(0)
    }

    pub fn size(&self) -> u8 {
        self.data.get(2).copied().unwrap_or(0)
    }

    pub fn encoded_timestamp(&self) -> Result<u64, CnlError> {
        self.cursor().u64_be_at(0x03)
    }

    pub fn timestamp(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.encoded_timestamp()?))
    }

    pub fn timestamp_offset(&self) -> Result<i64, CnlError> {
        Ok(time::decode_date_time_offset(self.encoded_timestamp()?))
    }

    /// Reversed-ASCII string fields (meter serials, device names).
    pub(crate) fn reversed_string(&self, range: std::ops::Range<usize>) -> String {
        let end = range.end.min(self.data.len());
        let start = range.start.min(end);
        self.data[start..end]
            .iter()
            .rev()
            .map(|&b| b as char)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Assemble a record from header fields and a type-specific body.
    pub(crate) fn make_record(event_type: u8, encoded_timestamp: u64, body: &[u8]) -> HistoryRecord {
        let mut data = Vec::with_capacity(RECORD_HEADER_SIZE + body.len());
        data.push(event_type);
        data.push(0x01);
        data.push((RECORD_HEADER_SIZE + body.len()) as u8);
        data.extend_from_slice(&encoded_timestamp.to_be_bytes());
        data.extend_from_slice(body);
        HistoryRecord::new(Bytes::from(data))
    }

    /// Pack an RTC and offset into the wire timestamp encoding.
    pub(crate) fn encode_timestamp(rtc: u32, offset: i64) -> u64 {
        ((rtc as u64) << 32) | ((offset + 0x1_0000_0000) as u64 & 0xffff_ffff)
    }

    #[test]
    fn header_fields() {
        let record = make_record(0x15, encode_timestamp(0x2000_0000, -7200), &[0, 3, 0]);
        assert_eq!(record.event_type(), EventType::NormalBolusProgrammed);
        assert_eq!(record.source(), 0x01);
        assert_eq!(record.size() as usize, record.raw().len());
        assert_eq!(record.timestamp_offset().unwrap(), -7200);
    }

    #[test]
    fn unknown_event_type_is_preserved() {
        let record = make_record(0xF3, encode_timestamp(0, 0), &[]);
        assert_eq!(record.event_type(), EventType::Unknown(0xF3));
    }

    #[test]
    fn reversed_strings_read_backwards() {
        let record = make_record(0x32, encode_timestamp(0, 0), b"654321");
        assert_eq!(record.reversed_string(0x0B..0x11), "123456");
    }
}
