//! The pump history event stream.
//!
//! CRC-verified history blocks are walked record by record; the byte at
//! offset 0 selects the typed view, the byte at offset 2 the record length.
//! Unknown discriminants decode as [`HistoryEvent::Generic`] so one
//! undocumented firmware quirk cannot lose a whole history pull. The packed
//! extended sensor record is the one generator: it expands into per-reading
//! events instead of appearing itself. Bolus programmed/delivered/canceled
//! triples are correlated afterwards by [`correlate_boluses`], which leaves
//! the decoded events untouched and returns a side table of links.

pub mod alarm;
pub mod basal;
pub mod bolus;
pub mod constants;
pub mod daily;
pub mod record;
pub mod sensor;
pub mod settings;

use bytes::Bytes;
use chrono::{DateTime, Duration, Local};
use tracing::{debug, warn};

pub use alarm::{
    AlarmCleared, AlarmData, AlarmDetail, AlarmNotification, AlarmPriority, AlarmTemplate,
    AlarmType, DEFAULT_ALARM_TABLE,
};
pub use basal::{
    BasalPatternChange, BasalPatternSelected, BasalSegmentStart, CannulaFillDelivered,
    InsulinDeliveryRestarted, InsulinDeliveryStopped, LowReservoir, PresetTempBasalChange,
    TempBasalComplete, TempBasalProgrammed,
};
pub use bolus::{
    BolusCanceled, BolusRecord, BolusWizardEstimate, DualBolusPartDelivered, DualBolusProgrammed,
    NormalBolusDelivered, NormalBolusProgrammed, SquareBolusDelivered, SquareBolusProgrammed,
};
pub use daily::DailyTotals;
pub use record::{EventType, GENERATED_SENSOR_READING_TYPE, HistoryRecord, RECORD_HEADER_SIZE};
pub use sensor::{
    BloodGlucoseReading, CalibrationComplete, CalibrationReminderChange, SensorGlucoseReading,
    SensorGlucoseReadingsExtended,
};
pub use settings::{
    AirplaneMode, AudioVibrateModeChange, AutoSuspendChange, BgReminderChange, BgTargetsChange,
    BolusDeliveryRateChange, BolusIncrementChange, BolusOptionChange, CarbRatiosChange,
    ClockChange, DisplayOptionChange, EasyBolusOptionChange, ExerciseEventMarker, FoodEventMarker,
    InjectionEventMarker, InsulinSensitivityChange, LanguageChange, LowReservoirReminderChange,
    MaxBasalRateChange, MaxBolusChange, MissedMealBolusReminderChange, NetworkDeviceConnection,
    PersonalReminderChange, PresetBolusChange, SelfTestResults, SetChangeReminderChange,
    SourceIdConfiguration, StartupWizardStartEnd, TimeFormatChange,
};

use crate::error::CnlError;

/// One decoded history event. Most variants are typed views over the raw
/// record; [`SensorGlucoseReading`] is synthetic (expanded out of the packed
/// extended record) and carries its fields directly.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    TimeReset(ClockChange),
    UserTimeDateChange(ClockChange),
    SourceIdConfiguration(SourceIdConfiguration),
    NetworkDeviceConnection(NetworkDeviceConnection),
    AirplaneMode(AirplaneMode),
    StartOfDayMarker(HistoryRecord),
    EndOfDayMarker(HistoryRecord),
    /// Controller-state payload with undocumented bitfields, kept opaque.
    PlgmControllerState(HistoryRecord),
    NormalBolusProgrammed(NormalBolusProgrammed),
    SquareBolusProgrammed(SquareBolusProgrammed),
    DualBolusProgrammed(DualBolusProgrammed),
    CannulaFillDelivered(CannulaFillDelivered),
    TempBasalProgrammed(TempBasalProgrammed),
    BasalPatternSelected(BasalPatternSelected),
    BasalSegmentStart(BasalSegmentStart),
    InsulinDeliveryStopped(InsulinDeliveryStopped),
    InsulinDeliveryRestarted(InsulinDeliveryRestarted),
    SelfTestRequested(HistoryRecord),
    SelfTestResults(SelfTestResults),
    TempBasalComplete(TempBasalComplete),
    BolusCanceled(BolusCanceled),
    AlarmNotification(AlarmNotification),
    AlarmCleared(AlarmCleared),
    LowReservoir(LowReservoir),
    BatteryInserted(HistoryRecord),
    BatteryRemoved(HistoryRecord),
    FoodEventMarker(FoodEventMarker),
    ExerciseEventMarker(ExerciseEventMarker),
    InjectionEventMarker(InjectionEventMarker),
    OtherEventMarker(HistoryRecord),
    BgReading(BloodGlucoseReading),
    MissedMealBolusReminderExpired(HistoryRecord),
    Rewind(HistoryRecord),
    CalibrationComplete(CalibrationComplete),
    DailyTotals(DailyTotals),
    BolusWizardEstimate(BolusWizardEstimate),
    UserSettingsResetToDefaults(HistoryRecord),
    OldBasalPattern(BasalPatternChange),
    NewBasalPattern(BasalPatternChange),
    OldPresetTempBasal(PresetTempBasalChange),
    NewPresetTempBasal(PresetTempBasalChange),
    OldPresetBolus(PresetBolusChange),
    NewPresetBolus(PresetBolusChange),
    MaxBasalRateChange(MaxBasalRateChange),
    MaxBolusChange(MaxBolusChange),
    PersonalReminderChange(PersonalReminderChange),
    MissedMealBolusReminderChange(MissedMealBolusReminderChange),
    BolusIncrementChange(BolusIncrementChange),
    OldInsulinSensitivity(InsulinSensitivityChange),
    NewInsulinSensitivity(InsulinSensitivityChange),
    OldCarbRatios(CarbRatiosChange),
    NewCarbRatios(CarbRatiosChange),
    OldBgTargets(BgTargetsChange),
    NewBgTargets(BgTargetsChange),
    DualBolusOptionChange(BolusOptionChange),
    SquareBolusOptionChange(BolusOptionChange),
    EasyBolusOptionChange(EasyBolusOptionChange),
    BgReminderChange(BgReminderChange),
    AudioVibrateModeChange(AudioVibrateModeChange),
    TimeFormatChange(TimeFormatChange),
    LowReservoirReminderChange(LowReservoirReminderChange),
    LanguageChange(LanguageChange),
    StartupWizardStartEnd(StartupWizardStartEnd),
    AutoSuspendChange(AutoSuspendChange),
    BolusDeliveryRateChange(BolusDeliveryRateChange),
    DisplayOptionChange(DisplayOptionChange),
    SetChangeReminderChange(SetChangeReminderChange),
    CalibrationReminderChange(CalibrationReminderChange),
    SensorGlucoseReadingsExtended(SensorGlucoseReadingsExtended),
    GlucoseSensorChange(HistoryRecord),
    SensorCalibrationRejected(HistoryRecord),
    SensorAlertSilenceStarted(HistoryRecord),
    SensorAlertSilenceEnded(HistoryRecord),
    NormalBolusDelivered(NormalBolusDelivered),
    SquareBolusDelivered(SquareBolusDelivered),
    DualBolusPartDelivered(DualBolusPartDelivered),
    /// Expanded per-reading sensor glucose item.
    SensorGlucoseReading(SensorGlucoseReading),
    /// Anything without a typed decoder; header fields only.
    Generic(HistoryRecord),
}

impl HistoryEvent {
    /// Dispatch a raw record to its typed view. Unknown or undecoded types
    /// fall back to [`HistoryEvent::Generic`], never an error.
    pub fn decode(record: HistoryRecord) -> Self {
        use HistoryEvent as E;
        match record.event_type() {
            EventType::TimeReset => E::TimeReset(ClockChange(record)),
            EventType::UserTimeDateChange => E::UserTimeDateChange(ClockChange(record)),
            EventType::SourceIdConfiguration => {
                E::SourceIdConfiguration(SourceIdConfiguration(record))
            }
            EventType::NetworkDeviceConnection => {
                E::NetworkDeviceConnection(NetworkDeviceConnection(record))
            }
            EventType::AirplaneMode => E::AirplaneMode(AirplaneMode(record)),
            EventType::StartOfDayMarker => E::StartOfDayMarker(record),
            EventType::EndOfDayMarker => E::EndOfDayMarker(record),
            EventType::PlgmControllerState => E::PlgmControllerState(record),
            EventType::NormalBolusProgrammed => {
                E::NormalBolusProgrammed(NormalBolusProgrammed(record))
            }
            EventType::SquareBolusProgrammed => {
                E::SquareBolusProgrammed(SquareBolusProgrammed(record))
            }
            EventType::DualBolusProgrammed => E::DualBolusProgrammed(DualBolusProgrammed(record)),
            EventType::CannulaFillDelivered => {
                E::CannulaFillDelivered(CannulaFillDelivered(record))
            }
            EventType::TempBasalProgrammed => E::TempBasalProgrammed(TempBasalProgrammed(record)),
            EventType::BasalPatternSelected => {
                E::BasalPatternSelected(BasalPatternSelected(record))
            }
            EventType::BasalSegmentStart => E::BasalSegmentStart(BasalSegmentStart(record)),
            EventType::InsulinDeliveryStopped => {
                E::InsulinDeliveryStopped(InsulinDeliveryStopped(record))
            }
            EventType::InsulinDeliveryRestarted => {
                E::InsulinDeliveryRestarted(InsulinDeliveryRestarted(record))
            }
            EventType::SelfTestRequested => E::SelfTestRequested(record),
            EventType::SelfTestResults => E::SelfTestResults(SelfTestResults(record)),
            EventType::TempBasalComplete => E::TempBasalComplete(TempBasalComplete(record)),
            EventType::BolusCanceled => E::BolusCanceled(BolusCanceled(record)),
            EventType::AlarmNotification => E::AlarmNotification(AlarmNotification(record)),
            EventType::AlarmCleared => E::AlarmCleared(AlarmCleared(record)),
            EventType::LowReservoir => E::LowReservoir(LowReservoir(record)),
            EventType::BatteryInserted => E::BatteryInserted(record),
            EventType::BatteryRemoved => E::BatteryRemoved(record),
            EventType::FoodEventMarker => E::FoodEventMarker(FoodEventMarker(record)),
            EventType::ExerciseEventMarker => E::ExerciseEventMarker(ExerciseEventMarker(record)),
            EventType::InjectionEventMarker => {
                E::InjectionEventMarker(InjectionEventMarker(record))
            }
            EventType::OtherEventMarker => E::OtherEventMarker(record),
            EventType::BgReading => E::BgReading(BloodGlucoseReading(record)),
            EventType::MissedMealBolusReminderExpired => {
                E::MissedMealBolusReminderExpired(record)
            }
            EventType::Rewind => E::Rewind(record),
            EventType::CalibrationComplete => E::CalibrationComplete(CalibrationComplete(record)),
            EventType::DailyTotals => E::DailyTotals(DailyTotals(record)),
            EventType::BolusWizardEstimate => E::BolusWizardEstimate(BolusWizardEstimate(record)),
            EventType::UserSettingsResetToDefaults => E::UserSettingsResetToDefaults(record),
            EventType::OldBasalPattern => E::OldBasalPattern(BasalPatternChange(record)),
            EventType::NewBasalPattern => E::NewBasalPattern(BasalPatternChange(record)),
            EventType::OldPresetTempBasal => E::OldPresetTempBasal(PresetTempBasalChange(record)),
            EventType::NewPresetTempBasal => E::NewPresetTempBasal(PresetTempBasalChange(record)),
            EventType::OldPresetBolus => E::OldPresetBolus(PresetBolusChange(record)),
            EventType::NewPresetBolus => E::NewPresetBolus(PresetBolusChange(record)),
            EventType::MaxBasalRateChange => E::MaxBasalRateChange(MaxBasalRateChange(record)),
            EventType::MaxBolusChange => E::MaxBolusChange(MaxBolusChange(record)),
            EventType::PersonalReminderChange => {
                E::PersonalReminderChange(PersonalReminderChange(record))
            }
            EventType::MissedMealBolusReminderChange => {
                E::MissedMealBolusReminderChange(MissedMealBolusReminderChange(record))
            }
            EventType::BolusIncrementChange => {
                E::BolusIncrementChange(BolusIncrementChange(record))
            }
            EventType::OldBolusWizardInsulinSensitivity => {
                E::OldInsulinSensitivity(InsulinSensitivityChange(record))
            }
            EventType::NewBolusWizardInsulinSensitivity => {
                E::NewInsulinSensitivity(InsulinSensitivityChange(record))
            }
            EventType::OldBolusWizardInsulinToCarbRatios => {
                E::OldCarbRatios(CarbRatiosChange(record))
            }
            EventType::NewBolusWizardInsulinToCarbRatios => {
                E::NewCarbRatios(CarbRatiosChange(record))
            }
            EventType::OldBolusWizardBgTargets => E::OldBgTargets(BgTargetsChange(record)),
            EventType::NewBolusWizardBgTargets => E::NewBgTargets(BgTargetsChange(record)),
            EventType::DualBolusOptionChange => {
                E::DualBolusOptionChange(BolusOptionChange(record))
            }
            EventType::SquareBolusOptionChange => {
                E::SquareBolusOptionChange(BolusOptionChange(record))
            }
            EventType::EasyBolusOptionChange => {
                E::EasyBolusOptionChange(EasyBolusOptionChange(record))
            }
            EventType::BgReminderOptionChange => E::BgReminderChange(BgReminderChange(record)),
            EventType::AudioVibrateModeChange => {
                E::AudioVibrateModeChange(AudioVibrateModeChange(record))
            }
            EventType::TimeFormatChange => E::TimeFormatChange(TimeFormatChange(record)),
            EventType::LowReservoirReminderChange => {
                E::LowReservoirReminderChange(LowReservoirReminderChange(record))
            }
            EventType::LanguageChange => E::LanguageChange(LanguageChange(record)),
            EventType::StartupWizardStartEnd => {
                E::StartupWizardStartEnd(StartupWizardStartEnd(record))
            }
            EventType::AutoSuspendChange => E::AutoSuspendChange(AutoSuspendChange(record)),
            EventType::BolusDeliveryRateChange => {
                E::BolusDeliveryRateChange(BolusDeliveryRateChange(record))
            }
            EventType::DisplayOptionChange => E::DisplayOptionChange(DisplayOptionChange(record)),
            EventType::SetChangeReminderChange => {
                E::SetChangeReminderChange(SetChangeReminderChange(record))
            }
            EventType::CalibrationReminderChange => {
                E::CalibrationReminderChange(CalibrationReminderChange(record))
            }
            EventType::SensorGlucoseReadingsExtended => {
                E::SensorGlucoseReadingsExtended(SensorGlucoseReadingsExtended(record))
            }
            EventType::GlucoseSensorChange => E::GlucoseSensorChange(record),
            EventType::SensorCalibrationRejected => E::SensorCalibrationRejected(record),
            EventType::SensorAlertSilenceStarted => E::SensorAlertSilenceStarted(record),
            EventType::SensorAlertSilenceEnded => E::SensorAlertSilenceEnded(record),
            EventType::NormalBolusDelivered => {
                E::NormalBolusDelivered(NormalBolusDelivered(record))
            }
            EventType::SquareBolusDelivered => {
                E::SquareBolusDelivered(SquareBolusDelivered(record))
            }
            EventType::DualBolusPartDelivered => {
                E::DualBolusPartDelivered(DualBolusPartDelivered(record))
            }
            _ => E::Generic(record),
        }
    }

    /// The backing record; `None` for the synthetic expanded sensor readings.
    pub fn record(&self) -> Option<&HistoryRecord> {
        use HistoryEvent as E;
        match self {
            E::TimeReset(v) | E::UserTimeDateChange(v) => Some(v.record()),
            E::SourceIdConfiguration(v) => Some(v.record()),
            E::NetworkDeviceConnection(v) => Some(v.record()),
            E::AirplaneMode(v) => Some(v.record()),
            E::NormalBolusProgrammed(v) => Some(v.record()),
            E::SquareBolusProgrammed(v) => Some(v.record()),
            E::DualBolusProgrammed(v) => Some(v.record()),
            E::CannulaFillDelivered(v) => Some(v.record()),
            E::TempBasalProgrammed(v) => Some(v.record()),
            E::BasalPatternSelected(v) => Some(v.record()),
            E::BasalSegmentStart(v) => Some(v.record()),
            E::InsulinDeliveryStopped(v) => Some(v.record()),
            E::InsulinDeliveryRestarted(v) => Some(v.record()),
            E::SelfTestResults(v) => Some(v.record()),
            E::TempBasalComplete(v) => Some(v.record()),
            E::BolusCanceled(v) => Some(v.record()),
            E::AlarmNotification(v) => Some(v.record()),
            E::AlarmCleared(v) => Some(v.record()),
            E::LowReservoir(v) => Some(v.record()),
            E::FoodEventMarker(v) => Some(v.record()),
            E::ExerciseEventMarker(v) => Some(v.record()),
            E::InjectionEventMarker(v) => Some(v.record()),
            E::BgReading(v) => Some(v.record()),
            E::CalibrationComplete(v) => Some(v.record()),
            E::DailyTotals(v) => Some(v.record()),
            E::BolusWizardEstimate(v) => Some(v.record()),
            E::OldBasalPattern(v) | E::NewBasalPattern(v) => Some(v.record()),
            E::OldPresetTempBasal(v) | E::NewPresetTempBasal(v) => Some(v.record()),
            E::OldPresetBolus(v) | E::NewPresetBolus(v) => Some(v.record()),
            E::MaxBasalRateChange(v) => Some(v.record()),
            E::MaxBolusChange(v) => Some(v.record()),
            E::PersonalReminderChange(v) => Some(v.record()),
            E::MissedMealBolusReminderChange(v) => Some(v.record()),
            E::BolusIncrementChange(v) => Some(v.record()),
            E::OldInsulinSensitivity(v) | E::NewInsulinSensitivity(v) => Some(v.record()),
            E::OldCarbRatios(v) | E::NewCarbRatios(v) => Some(v.record()),
            E::OldBgTargets(v) | E::NewBgTargets(v) => Some(v.record()),
            E::DualBolusOptionChange(v) | E::SquareBolusOptionChange(v) => Some(v.record()),
            E::EasyBolusOptionChange(v) => Some(v.record()),
            E::BgReminderChange(v) => Some(v.record()),
            E::AudioVibrateModeChange(v) => Some(v.record()),
            E::TimeFormatChange(v) => Some(v.record()),
            E::LowReservoirReminderChange(v) => Some(v.record()),
            E::LanguageChange(v) => Some(v.record()),
            E::StartupWizardStartEnd(v) => Some(v.record()),
            E::AutoSuspendChange(v) => Some(v.record()),
            E::BolusDeliveryRateChange(v) => Some(v.record()),
            E::DisplayOptionChange(v) => Some(v.record()),
            E::SetChangeReminderChange(v) => Some(v.record()),
            E::CalibrationReminderChange(v) => Some(v.record()),
            E::SensorGlucoseReadingsExtended(v) => Some(v.record()),
            E::NormalBolusDelivered(v) => Some(v.record()),
            E::SquareBolusDelivered(v) => Some(v.record()),
            E::DualBolusPartDelivered(v) => Some(v.record()),
            E::StartOfDayMarker(r)
            | E::EndOfDayMarker(r)
            | E::PlgmControllerState(r)
            | E::SelfTestRequested(r)
            | E::BatteryInserted(r)
            | E::BatteryRemoved(r)
            | E::OtherEventMarker(r)
            | E::MissedMealBolusReminderExpired(r)
            | E::Rewind(r)
            | E::UserSettingsResetToDefaults(r)
            | E::GlucoseSensorChange(r)
            | E::SensorCalibrationRejected(r)
            | E::SensorAlertSilenceStarted(r)
            | E::SensorAlertSilenceEnded(r)
            | E::Generic(r) => Some(r),
            E::SensorGlucoseReading(_) => None,
        }
    }

    pub fn timestamp(&self) -> Result<DateTime<Local>, CnlError> {
        match self {
            HistoryEvent::SensorGlucoseReading(reading) => Ok(reading.timestamp),
            other => other
                .record()
                .expect("record-backed event")
                .timestamp(),
        }
    }

    /// The wire discriminant, widened so the expanded sensor readings can
    /// report their pseudo type.
    pub fn raw_event_type(&self) -> u16 {
        match self {
            HistoryEvent::SensorGlucoseReading(_) => GENERATED_SENSOR_READING_TYPE,
            other => u8::from(other.record().expect("record-backed event").event_type()) as u16,
        }
    }
}

/// Walk decoded history blocks into a flat, arrival-ordered event list,
/// expanding generator records along the way.
pub fn decode_blocks(blocks: &[Bytes]) -> Vec<HistoryEvent> {
    let mut events = Vec::new();
    for (block_index, block) in blocks.iter().enumerate() {
        let mut pos = 0usize;
        while pos + RECORD_HEADER_SIZE <= block.len() {
            let size = block[pos + 2] as usize;
            if size < RECORD_HEADER_SIZE || pos + size > block.len() {
                warn!(
                    block_index,
                    pos, size, "malformed history record size, stopping block walk"
                );
                break;
            }
            let record = HistoryRecord::new(block.slice(pos..pos + size));
            pos += size;

            if record.event_type() == EventType::SensorGlucoseReadingsExtended {
                match SensorGlucoseReadingsExtended(record).readings() {
                    Ok(readings) => {
                        events.extend(readings.into_iter().map(HistoryEvent::SensorGlucoseReading))
                    }
                    Err(err) => warn!(%err, "skipping truncated sensor glucose record"),
                }
            } else {
                events.push(HistoryEvent::decode(record));
            }
        }
    }
    debug!(count = events.len(), "decoded history events");
    events
}

/// Cross-references attached to one event by [`correlate_boluses`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BolusLinks {
    /// Index of the matching programmed event, for delivered events.
    pub programmed: Option<usize>,
    /// Index of the matching canceled event, for delivered events.
    pub canceled: Option<usize>,
    /// Index of the wizard estimate that produced a programmed event.
    pub wizard: Option<usize>,
}

impl BolusLinks {
    pub fn was_canceled(&self) -> bool {
        self.canceled.is_some()
    }
}

/// Find the unique candidate satisfying `pred` strictly before `times[i]`
/// within the window. Zero or multiple candidates both yield `None`:
/// ambiguous correlation is dropped, not guessed.
fn unique_match(
    events: &[HistoryEvent],
    times: &[Option<DateTime<Local>>],
    i: usize,
    window_minutes: i64,
    pred: impl Fn(&HistoryEvent) -> bool,
) -> Option<usize> {
    let own_time = times[i]?;
    let window = Duration::minutes(window_minutes);
    let mut found = None;
    for (j, candidate) in events.iter().enumerate() {
        if j == i || !pred(candidate) {
            continue;
        }
        let Some(candidate_time) = times[j] else {
            continue;
        };
        if candidate_time < own_time && own_time - candidate_time < window {
            if found.is_some() {
                return None;
            }
            found = Some(j);
        }
    }
    found
}

fn amounts_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Correlate bolus triples over the full decoded list.
///
/// Delivered events link to the programmed and canceled events carrying the
/// same bolus number strictly before them, within five minutes for normal
/// boluses and within the programmed duration for square/dual ones.
/// Programmed events link to the wizard estimate whose final figure they
/// took. Events stay immutable; the result is an index-aligned side table.
pub fn correlate_boluses(events: &[HistoryEvent]) -> Vec<BolusLinks> {
    let times: Vec<Option<DateTime<Local>>> =
        events.iter().map(|event| event.timestamp().ok()).collect();
    let mut links = vec![BolusLinks::default(); events.len()];

    for (i, event) in events.iter().enumerate() {
        match event {
            HistoryEvent::NormalBolusDelivered(delivered) => {
                let Ok(number) = delivered.bolus_number() else {
                    continue;
                };
                links[i].programmed = unique_match(events, &times, i, 5, |candidate| {
                    matches!(candidate, HistoryEvent::NormalBolusProgrammed(p)
                        if p.bolus_number().is_ok_and(|n| n == number))
                });
                links[i].canceled = unique_match(events, &times, i, 5, |candidate| {
                    matches!(candidate, HistoryEvent::BolusCanceled(c)
                        if c.bolus_number().is_ok_and(|n| n == number))
                });
            }
            HistoryEvent::SquareBolusDelivered(delivered) => {
                let (Ok(number), Ok(duration)) = (
                    delivered.bolus_number(),
                    delivered.programmed_duration_minutes(),
                ) else {
                    continue;
                };
                links[i].programmed = unique_match(events, &times, i, duration as i64, |candidate| {
                    matches!(candidate, HistoryEvent::SquareBolusProgrammed(p)
                        if p.bolus_number().is_ok_and(|n| n == number))
                });
                links[i].canceled = unique_match(events, &times, i, duration as i64, |candidate| {
                    matches!(candidate, HistoryEvent::BolusCanceled(c)
                        if c.bolus_number().is_ok_and(|n| n == number))
                });
            }
            HistoryEvent::DualBolusPartDelivered(delivered) => {
                let (Ok(number), Ok(duration)) = (
                    delivered.bolus_number(),
                    delivered.programmed_duration_minutes(),
                ) else {
                    continue;
                };
                links[i].programmed = unique_match(events, &times, i, duration as i64, |candidate| {
                    matches!(candidate, HistoryEvent::DualBolusProgrammed(p)
                        if p.bolus_number().is_ok_and(|n| n == number))
                });
                links[i].canceled = unique_match(events, &times, i, duration as i64, |candidate| {
                    matches!(candidate, HistoryEvent::BolusCanceled(c)
                        if c.bolus_number().is_ok_and(|n| n == number))
                });
            }
            HistoryEvent::NormalBolusProgrammed(programmed) => {
                let Ok(amount) = programmed.programmed_amount() else {
                    continue;
                };
                links[i].wizard = wizard_match(events, &times, i, amount);
            }
            HistoryEvent::SquareBolusProgrammed(programmed) => {
                let Ok(amount) = programmed.programmed_amount() else {
                    continue;
                };
                links[i].wizard = wizard_match(events, &times, i, amount);
            }
            HistoryEvent::DualBolusProgrammed(programmed) => {
                let Ok(amount) = programmed.programmed_amount() else {
                    continue;
                };
                links[i].wizard = wizard_match(events, &times, i, amount);
            }
            _ => {}
        }
    }
    links
}

fn wizard_match(
    events: &[HistoryEvent],
    times: &[Option<DateTime<Local>>],
    i: usize,
    amount: f64,
) -> Option<usize> {
    unique_match(events, times, i, 5, |candidate| {
        matches!(candidate, HistoryEvent::BolusWizardEstimate(w)
            if w.final_estimate().is_ok_and(|estimate| amounts_equal(estimate, amount)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::record::tests::{encode_timestamp, make_record};
    use bytes::Bytes;

    const OFFSET: i64 = -7200;

    fn delivered_record(rtc: u32, number: u8) -> HistoryRecord {
        let mut body = vec![0x00, number, 0x00];
        body.extend_from_slice(&25_000u32.to_be_bytes());
        body.extend_from_slice(&25_000u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        make_record(0xDC, encode_timestamp(rtc, OFFSET), &body)
    }

    fn programmed_record(rtc: u32, number: u8) -> HistoryRecord {
        let mut body = vec![0x00, number, 0x00];
        body.extend_from_slice(&25_000u32.to_be_bytes());
        body.extend_from_slice(&0u32.to_be_bytes());
        make_record(0x15, encode_timestamp(rtc, OFFSET), &body)
    }

    #[test]
    fn unknown_types_decode_as_generic() {
        let record = make_record(0xF0, encode_timestamp(0x2000_0000, OFFSET), &[1, 2, 3]);
        let event = HistoryEvent::decode(record);
        assert!(matches!(event, HistoryEvent::Generic(_)));
        assert_eq!(event.raw_event_type(), 0xF0);
        assert!(event.timestamp().is_ok());
    }

    #[test]
    fn block_walk_slices_records_by_their_size_byte() {
        let a = programmed_record(0x2000_0000, 1);
        let b = delivered_record(0x2000_0080, 1);
        let mut block = a.raw().to_vec();
        block.extend_from_slice(b.raw());
        let events = decode_blocks(&[Bytes::from(block)]);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], HistoryEvent::NormalBolusProgrammed(_)));
        assert!(matches!(events[1], HistoryEvent::NormalBolusDelivered(_)));
    }

    #[test]
    fn zero_size_record_stops_the_block_not_the_decode() {
        let good = programmed_record(0x2000_0000, 1);
        let mut block = good.raw().to_vec();
        block.extend_from_slice(&[0x15, 0x00, 0x00]); // size byte zero
        block.extend_from_slice(&[0u8; 16]);
        let events = decode_blocks(&[Bytes::from(block)]);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn delivered_links_to_unique_programmed() {
        let events = vec![
            HistoryEvent::decode(programmed_record(0x2000_0000, 3)),
            HistoryEvent::decode(delivered_record(0x2000_0078, 3)), // 2 min later
        ];
        let links = correlate_boluses(&events);
        assert_eq!(links[1].programmed, Some(0));
        assert!(!links[1].was_canceled());
    }

    #[test]
    fn ambiguous_candidates_leave_the_event_unlinked() {
        let events = vec![
            HistoryEvent::decode(programmed_record(0x2000_0000, 3)),
            HistoryEvent::decode(programmed_record(0x2000_0040, 3)),
            HistoryEvent::decode(delivered_record(0x2000_0078, 3)),
        ];
        let links = correlate_boluses(&events);
        assert_eq!(links[2].programmed, None);
    }

    #[test]
    fn window_excludes_old_and_later_events() {
        let events = vec![
            HistoryEvent::decode(programmed_record(0x2000_0000, 3)),
            // delivered 6 minutes later, outside the 5-minute window
            HistoryEvent::decode(delivered_record(0x2000_0168, 3)),
            // a programmed event after the delivery never matches
            HistoryEvent::decode(programmed_record(0x2000_0200, 3)),
        ];
        let links = correlate_boluses(&events);
        assert_eq!(links[1].programmed, None);
    }

    #[test]
    fn bolus_number_must_match() {
        let events = vec![
            HistoryEvent::decode(programmed_record(0x2000_0000, 4)),
            HistoryEvent::decode(delivered_record(0x2000_0078, 3)),
        ];
        let links = correlate_boluses(&events);
        assert_eq!(links[1].programmed, None);
    }

    #[test]
    fn cancel_links_mark_the_delivery_canceled() {
        let cancel = make_record(0x27, encode_timestamp(0x2000_0040, OFFSET), &[0x01, 3, 0x00]);
        let events = vec![
            HistoryEvent::decode(programmed_record(0x2000_0000, 3)),
            HistoryEvent::decode(cancel),
            HistoryEvent::decode(delivered_record(0x2000_0078, 3)),
        ];
        let links = correlate_boluses(&events);
        assert_eq!(links[2].programmed, Some(0));
        assert_eq!(links[2].canceled, Some(1));
        assert!(links[2].was_canceled());
    }
}
