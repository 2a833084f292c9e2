//! Settings-change, reminder and user-marker records.

use chrono::{DateTime, Local};

use crate::error::CnlError;
use crate::events::constants::{
    AudioMode, BgUnits, BolusStepSize, CarbUnits, DualBolusPart, MISSED_MEAL_BOLUS_REMINDER_NAMES,
    PERSONAL_REMINDER_NAMES, bolus_preset_name, pump_language_name,
};
use crate::events::record::HistoryRecord;
use crate::time;

fn reminder_name(table: &'static [&'static str; 8], index: u8) -> &'static str {
    match index {
        1..=8 => table[index as usize - 1],
        _ => "~",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkDeviceConnection(pub(crate) HistoryRecord);

impl NetworkDeviceConnection {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_status(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? & 0x01 == 1)
    }

    pub fn value(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0C)
    }

    pub fn new_status(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0D)? & 0x01 == 1)
    }

    pub fn serial(&self) -> String {
        self.0.reversed_string(0x0E..self.0.raw().len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AirplaneMode(pub(crate) HistoryRecord);

impl AirplaneMode {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? == 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelfTestResults(pub(crate) HistoryRecord);

impl SelfTestResults {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn passed(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? == 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartupWizardStartEnd(pub(crate) HistoryRecord);

impl StartupWizardStartEnd {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    /// False at wizard start, true at completion.
    pub fn completed(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? == 1)
    }
}

/// The pump clock being reprogrammed (after power loss or by the user); both
/// record kinds carry the new packed timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockChange(pub(crate) HistoryRecord);

impl ClockChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn encoded_new_datetime(&self) -> Result<u64, CnlError> {
        self.0.cursor().u64_be_at(0x0B)
    }

    pub fn new_datetime(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.encoded_new_datetime()?))
    }

    pub fn new_offset(&self) -> Result<i64, CnlError> {
        Ok(time::decode_date_time_offset(self.encoded_new_datetime()?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageChange(pub(crate) HistoryRecord);

impl LanguageChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_language(&self) -> Result<&'static str, CnlError> {
        Ok(pump_language_name(self.0.cursor().u8_at(0x0B)?))
    }

    pub fn new_language(&self) -> Result<&'static str, CnlError> {
        Ok(pump_language_name(self.0.cursor().u8_at(0x0C)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeFormatChange(pub(crate) HistoryRecord);

impl TimeFormatChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_24h(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? != 0)
    }

    pub fn new_24h(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0C)? != 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayOptionChange(pub(crate) HistoryRecord);

impl DisplayOptionChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    /// Zero means automatic brightness.
    pub fn old_brightness_level(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn old_backlight_seconds(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0D)
    }

    pub fn new_brightness_level(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0F)
    }

    pub fn new_backlight_seconds(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x11)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioVibrateModeChange(pub(crate) HistoryRecord);

impl AudioVibrateModeChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_mode(&self) -> Result<AudioMode, CnlError> {
        Ok(AudioMode::from(self.0.cursor().u8_at(0x0B)?))
    }

    pub fn old_volume_level(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0C)
    }

    pub fn new_mode(&self) -> Result<AudioMode, CnlError> {
        Ok(AudioMode::from(self.0.cursor().u8_at(0x0D)?))
    }

    pub fn new_volume_level(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0E)
    }
}

/// User-logged exercise marker.
#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseEventMarker(pub(crate) HistoryRecord);

impl ExerciseEventMarker {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    /// Markers carry their own user-chosen time, distinct from the record's.
    pub fn marker_time(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.0.cursor().u64_be_at(0x0B)?))
    }

    pub fn duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x13)
    }
}

/// User-logged injection of insulin outside the pump.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionEventMarker(pub(crate) HistoryRecord);

impl InjectionEventMarker {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn marker_time(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.0.cursor().u64_be_at(0x0B)?))
    }

    pub fn injection_units(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x13)? as f64 / 10_000.0)
    }
}

/// User-logged meal marker.
#[derive(Debug, Clone, PartialEq)]
pub struct FoodEventMarker(pub(crate) HistoryRecord);

impl FoodEventMarker {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn marker_time(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.0.cursor().u64_be_at(0x0B)?))
    }

    pub fn carb_units(&self) -> Result<CarbUnits, CnlError> {
        Ok(CarbUnits::from(self.0.cursor().u8_at(0x13)?))
    }

    pub fn carb_input(&self) -> Result<f64, CnlError> {
        let raw = self.0.cursor().u16_be_at(0x14)? as f64;
        Ok(match self.carb_units()? {
            CarbUnits::Grams => raw,
            CarbUnits::Exchanges => raw / 10.0,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetChangeReminderChange(pub(crate) HistoryRecord);

impl SetChangeReminderChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? == 1)
    }

    pub fn old_days(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0C)
    }

    pub fn new_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0D)? == 1)
    }

    pub fn new_days(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0E)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgReminderChange(pub(crate) HistoryRecord);

impl BgReminderChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? == 1)
    }

    pub fn new_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0C)? == 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LowReservoirReminderChange(pub(crate) HistoryRecord);

impl LowReservoirReminderChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    /// 1 = warn by time remaining, otherwise by units.
    pub fn old_warn_by_time(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? == 1)
    }

    pub fn old_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0C)
    }

    pub fn old_units(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0E)? as f64 / 10_000.0)
    }

    pub fn new_warn_by_time(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x12)? == 1)
    }

    pub fn new_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x13)
    }

    pub fn new_units(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x15)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersonalReminderChange(pub(crate) HistoryRecord);

impl PersonalReminderChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn reminder(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn reminder_name(&self) -> Result<&'static str, CnlError> {
        Ok(reminder_name(&PERSONAL_REMINDER_NAMES, self.reminder()?))
    }

    pub fn old_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0D)
    }

    pub fn old_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0F)? == 1)
    }

    pub fn new_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x11)
    }

    pub fn new_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x13)? == 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissedMealBolusReminderChange(pub(crate) HistoryRecord);

impl MissedMealBolusReminderChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn reminder(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn reminder_name(&self) -> Result<&'static str, CnlError> {
        Ok(reminder_name(&MISSED_MEAL_BOLUS_REMINDER_NAMES, self.reminder()?))
    }

    pub fn old_start_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0D)
    }

    pub fn old_end_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0F)
    }

    pub fn old_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x11)? == 1)
    }

    pub fn new_start_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x13)
    }

    pub fn new_end_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x15)
    }

    pub fn new_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x17)? == 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CarbRatioTimeSlot {
    pub start_minutes: u16,
    pub amount: f64,
}

/// Old/new snapshot of the wizard's carb-ratio schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct CarbRatiosChange(pub(crate) HistoryRecord);

impl CarbRatiosChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn carb_units(&self) -> Result<CarbUnits, CnlError> {
        Ok(CarbUnits::from(self.0.cursor().u8_at(0x0B)?))
    }

    pub fn segments(&self) -> Result<Vec<CarbRatioTimeSlot>, CnlError> {
        let cursor = self.0.cursor();
        let units = self.carb_units()?;
        let count = cursor.u8_at(0x0C)? as usize;
        let mut segments = Vec::with_capacity(count);
        let mut pos = 0x0D;
        for _ in 0..count {
            let raw = cursor.u32_be_at(pos + 1)? as f64;
            segments.push(CarbRatioTimeSlot {
                start_minutes: cursor.u8_at(pos)? as u16 * 30,
                amount: match units {
                    CarbUnits::Grams => raw / 10.0,
                    CarbUnits::Exchanges => raw / 1000.0,
                },
            });
            pos += 5;
        }
        Ok(segments)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensitivityTimeSlot {
    pub start_minutes: u16,
    pub amount: f64,
}

/// Old/new snapshot of the wizard's insulin-sensitivity schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct InsulinSensitivityChange(pub(crate) HistoryRecord);

impl InsulinSensitivityChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn bg_units(&self) -> Result<BgUnits, CnlError> {
        Ok(BgUnits::from(self.0.cursor().u8_at(0x0B)?))
    }

    pub fn segments(&self) -> Result<Vec<SensitivityTimeSlot>, CnlError> {
        let cursor = self.0.cursor();
        let units = self.bg_units()?;
        let count = cursor.u8_at(0x0C)? as usize;
        let mut segments = Vec::with_capacity(count);
        let mut pos = 0x0D;
        for _ in 0..count {
            let raw = cursor.u16_be_at(pos + 1)? as f64;
            segments.push(SensitivityTimeSlot {
                start_minutes: cursor.u8_at(pos)? as u16 * 30,
                amount: match units {
                    BgUnits::MgDl => raw,
                    BgUnits::MmolL => raw / 10.0,
                },
            });
            pos += 3;
        }
        Ok(segments)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgTargetTimeSlot {
    pub start_minutes: u16,
    pub high: f64,
    pub low: f64,
}

/// Old/new snapshot of the wizard's BG-target schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct BgTargetsChange(pub(crate) HistoryRecord);

impl BgTargetsChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn bg_units(&self) -> Result<BgUnits, CnlError> {
        Ok(BgUnits::from(self.0.cursor().u8_at(0x0B)?))
    }

    pub fn segments(&self) -> Result<Vec<BgTargetTimeSlot>, CnlError> {
        let cursor = self.0.cursor();
        let units = self.bg_units()?;
        let count = cursor.u8_at(0x0C)? as usize;
        let scale = |raw: u16| match units {
            BgUnits::MgDl => raw as f64,
            BgUnits::MmolL => raw as f64 / 10.0,
        };
        let mut segments = Vec::with_capacity(count);
        let mut pos = 0x0D;
        for _ in 0..count {
            segments.push(BgTargetTimeSlot {
                start_minutes: cursor.u8_at(pos)? as u16 * 30,
                high: scale(cursor.u16_be_at(pos + 1)?),
                low: scale(cursor.u16_be_at(pos + 3)?),
            });
            pos += 5;
        }
        Ok(segments)
    }
}

/// On/off toggle shared by the square and dual wave options.
#[derive(Debug, Clone, PartialEq)]
pub struct BolusOptionChange(pub(crate) HistoryRecord);

impl BolusOptionChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? != 0)
    }

    pub fn new_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0C)? != 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BolusIncrementChange(pub(crate) HistoryRecord);

impl BolusIncrementChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_step(&self) -> Result<BolusStepSize, CnlError> {
        Ok(BolusStepSize::from(self.0.cursor().u8_at(0x0B)?))
    }

    pub fn new_step(&self) -> Result<BolusStepSize, CnlError> {
        Ok(BolusStepSize::from(self.0.cursor().u8_at(0x0C)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaxBasalRateChange(pub(crate) HistoryRecord);

impl MaxBasalRateChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_max_basal_rate(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0B)? as f64 / 10_000.0)
    }

    pub fn new_max_basal_rate(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0F)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaxBolusChange(pub(crate) HistoryRecord);

impl MaxBolusChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_max_bolus(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0B)? as f64 / 10_000.0)
    }

    pub fn new_max_bolus(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0F)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EasyBolusOptionChange(pub(crate) HistoryRecord);

impl EasyBolusOptionChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? != 0)
    }

    pub fn new_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0C)? != 0)
    }

    pub fn old_step(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0D)? as f64 / 10_000.0)
    }

    pub fn new_step(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x11)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoSuspendChange(pub(crate) HistoryRecord);

impl AutoSuspendChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? != 0)
    }

    pub fn old_minutes(&self) -> Result<u16, CnlError> {
        Ok(self.0.cursor().u8_at(0x0C)? as u16 * 60)
    }

    pub fn new_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0D)? != 0)
    }

    pub fn new_minutes(&self) -> Result<u16, CnlError> {
        Ok(self.0.cursor().u8_at(0x0E)? as u16 * 60)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BolusDeliveryRateChange(pub(crate) HistoryRecord);

impl BolusDeliveryRateChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    /// False = standard speed, true = fast.
    pub fn old_fast(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? != 0)
    }

    pub fn new_fast(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0C)? != 0)
    }
}

/// Old/new snapshot of a bolus preset's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetBolusChange(pub(crate) HistoryRecord);

impl PresetBolusChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn preset(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn preset_name(&self) -> Result<&'static str, CnlError> {
        Ok(bolus_preset_name(self.preset()?))
    }

    pub fn wave_type(&self) -> Result<DualBolusPart, CnlError> {
        Ok(DualBolusPart::from(self.0.cursor().u8_at(0x0C)?))
    }

    pub fn now_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0D)? as f64 / 10_000.0)
    }

    pub fn square_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x11)? as f64 / 10_000.0)
    }

    pub fn duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x15)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceIdDevice {
    pub list_number: u8,
    pub serial: String,
    pub device: String,
    pub version: String,
}

/// The pump's table of paired devices (meters, sensors, sticks).
#[derive(Debug, Clone, PartialEq)]
pub struct SourceIdConfiguration(pub(crate) HistoryRecord);

impl SourceIdConfiguration {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn device_count(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn devices(&self) -> Result<Vec<SourceIdDevice>, CnlError> {
        let cursor = self.0.cursor();
        let count = self.device_count()? as usize;
        let mut devices = Vec::with_capacity(count);
        let mut pos = 0x0C;
        for _ in 0..count {
            let list_number = cursor.u8_at(pos)?;
            let serial = self.0.reversed_string(pos + 0x01..pos + 0x0B);
            let device_raw = cursor.bytes_at(pos + 0x13, 8)?;
            let device = if device_raw[0] == 0 {
                String::new()
            } else {
                self.0.reversed_string(pos + 0x13..pos + 0x1B)
            };
            let major = cursor.u8_at(pos + 0x1B)?;
            let minor = cursor.u8_at(pos + 0x1C)?;
            let revision = cursor.u8_at(pos + 0x1D)?;
            let version = if revision == 0 {
                format!("{major}.{minor}")
            } else {
                format!("{major}.{minor}{}", revision as char)
            };
            devices.push(SourceIdDevice {
                list_number,
                serial,
                device,
                version,
            });
            pos += 0x1E;
        }
        Ok(devices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::record::tests::{encode_timestamp, make_record};

    #[test]
    fn food_marker_scales_exchanges() {
        let mut body = Vec::new();
        body.extend_from_slice(&encode_timestamp(0x2000_0000, -7200).to_be_bytes());
        body.push(1); // exchanges
        body.extend_from_slice(&35u16.to_be_bytes());
        let view = FoodEventMarker(make_record(0x2E, encode_timestamp(0x2000_0100, -7200), &body));
        assert_eq!(view.carb_units().unwrap(), CarbUnits::Exchanges);
        assert_eq!(view.carb_input().unwrap(), 3.5);
        assert!(view.marker_time().unwrap() < view.record().timestamp().unwrap());
    }

    #[test]
    fn carb_ratio_change_scales_per_units() {
        let mut body = vec![0, 2]; // grams, two segments
        body.push(0);
        body.extend_from_slice(&150u32.to_be_bytes());
        body.push(16);
        body.extend_from_slice(&80u32.to_be_bytes());
        let view = CarbRatiosChange(make_record(0x61, encode_timestamp(0, 0), &body));
        let segments = view.segments().unwrap();
        assert_eq!(segments[0].amount, 15.0);
        assert_eq!(segments[1].start_minutes, 480);
        assert_eq!(segments[1].amount, 8.0);
    }

    #[test]
    fn bg_targets_change_reads_both_bounds() {
        let mut body = vec![0, 1];
        body.push(0);
        body.extend_from_slice(&140u16.to_be_bytes());
        body.extend_from_slice(&90u16.to_be_bytes());
        let view = BgTargetsChange(make_record(0x63, encode_timestamp(0, 0), &body));
        let segments = view.segments().unwrap();
        assert_eq!(segments[0].high, 140.0);
        assert_eq!(segments[0].low, 90.0);
    }

    #[test]
    fn personal_reminder_names_resolve() {
        let body = vec![7, 1, 0x00, 30, 1, 0x00, 0x00, 45, 1];
        let view = PersonalReminderChange(make_record(0x5A, encode_timestamp(0, 0), &body));
        assert_eq!(view.reminder_name().unwrap(), "BG Check");
        let body = vec![0, 1];
        let view = PersonalReminderChange(make_record(0x5A, encode_timestamp(0, 0), &body));
        assert_eq!(view.reminder_name().unwrap(), "~");
    }

    #[test]
    fn auto_suspend_hours_convert_to_minutes() {
        let view = AutoSuspendChange(make_record(0x72, encode_timestamp(0, 0), &[1, 8, 0, 10]));
        assert!(view.old_enabled().unwrap());
        assert_eq!(view.old_minutes().unwrap(), 480);
        assert!(!view.new_enabled().unwrap());
        assert_eq!(view.new_minutes().unwrap(), 600);
    }
}
