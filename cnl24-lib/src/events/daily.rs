//! The end-of-day summary record.

use chrono::{DateTime, Local};

use crate::error::CnlError;
use crate::events::constants::CarbUnits;
use crate::events::record::HistoryRecord;
use crate::time;

/// One day's totals: insulin split, meter and sensor statistics, wizard usage
/// and alert counts, all at fixed offsets after the summary date.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyTotals(pub(crate) HistoryRecord);

impl DailyTotals {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn date(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.0.cursor().u64_be_at(0x0B)?))
    }

    pub fn duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x13)
    }

    pub fn meter_bg_count(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x15)
    }

    pub fn meter_bg_average(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x16)
    }

    pub fn low_meter_bg(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x18)
    }

    pub fn high_meter_bg(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x1A)
    }

    pub fn manually_entered_bg_count(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x1C)
    }

    pub fn manually_entered_bg_average(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x1D)
    }

    pub fn low_manually_entered_bg(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x1F)
    }

    pub fn high_manually_entered_bg(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x21)
    }

    pub fn bg_average(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x23)
    }

    pub fn total_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x25)? as f64 / 10_000.0)
    }

    pub fn basal_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x29)? as f64 / 10_000.0)
    }

    pub fn basal_percent(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x2D)
    }

    pub fn bolus_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x2E)? as f64 / 10_000.0)
    }

    pub fn bolus_percent(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x32)
    }

    pub fn carb_units(&self) -> Result<CarbUnits, CnlError> {
        Ok(CarbUnits::from(self.0.cursor().u8_at(0x33)?))
    }

    pub fn total_food_input(&self) -> Result<f64, CnlError> {
        let raw = self.0.cursor().u16_be_at(0x34)? as f64;
        Ok(match self.carb_units()? {
            CarbUnits::Grams => raw,
            CarbUnits::Exchanges => raw / 10.0,
        })
    }

    pub fn bolus_wizard_usage_count(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x36)
    }

    pub fn wizard_food_only_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x37)? as f64 / 10_000.0)
    }

    pub fn wizard_correction_only_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x3B)? as f64 / 10_000.0)
    }

    pub fn wizard_food_and_correction_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x3F)? as f64 / 10_000.0)
    }

    pub fn manual_bolus_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x43)? as f64 / 10_000.0)
    }

    pub fn wizard_food_only_count(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x47)
    }

    pub fn wizard_correction_only_count(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x48)
    }

    pub fn wizard_food_and_correction_count(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x49)
    }

    pub fn manual_bolus_count(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x4A)
    }

    pub fn sg_count(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x4B)
    }

    pub fn sg_average(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x4D)
    }

    pub fn sg_stddev(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x4F)
    }

    pub fn sg_duration_above_high(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x51)
    }

    pub fn percent_above_high(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x53)
    }

    pub fn sg_duration_within_limit(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x54)
    }

    pub fn percent_within_limit(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x56)
    }

    pub fn sg_duration_below_low(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x57)
    }

    pub fn percent_below_low(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x59)
    }

    pub fn lgs_suspension_duration(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x5A)
    }

    pub fn high_predictive_alerts(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x5C)
    }

    pub fn low_predictive_alerts(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x5E)
    }

    pub fn low_bg_alerts(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x60)
    }

    pub fn high_bg_alerts(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x62)
    }

    pub fn rising_rate_alerts(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x64)
    }

    pub fn falling_rate_alerts(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x66)
    }

    pub fn low_glucose_suspend_alerts(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x68)
    }

    pub fn predictive_low_glucose_suspend_alerts(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x6A)
    }
}
