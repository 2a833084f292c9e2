//! Bolus programming, delivery and wizard records.
//!
//! Programmed and delivered records share their first fields (source, bolus
//! number, preset); the delivered/canceled/programmed triple for one bolus is
//! correlated after decoding in [`crate::events::correlate_boluses`].

use crate::error::CnlError;
use crate::events::constants::{
    BgUnits, BolusSource, BolusStepSize, CarbUnits, DualBolusPart, bolus_preset_name,
};
use crate::events::record::HistoryRecord;

/// Fields shared by every bolus programmed/delivered record.
pub trait BolusRecord {
    fn record(&self) -> &HistoryRecord;

    fn bolus_source(&self) -> Result<BolusSource, CnlError> {
        Ok(BolusSource::from(self.record().cursor().u8_at(0x0B)?))
    }

    fn bolus_number(&self) -> Result<u8, CnlError> {
        self.record().cursor().u8_at(0x0C)
    }

    fn preset_bolus_number(&self) -> Result<u8, CnlError> {
        self.record().cursor().u8_at(0x0D)
    }

    fn preset_bolus_name(&self) -> Result<&'static str, CnlError> {
        Ok(bolus_preset_name(self.preset_bolus_number()?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalBolusProgrammed(pub(crate) HistoryRecord);

impl BolusRecord for NormalBolusProgrammed {
    fn record(&self) -> &HistoryRecord {
        &self.0
    }
}

impl NormalBolusProgrammed {
    pub fn programmed_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0E)? as f64 / 10_000.0)
    }

    pub fn active_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x12)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SquareBolusProgrammed(pub(crate) HistoryRecord);

impl BolusRecord for SquareBolusProgrammed {
    fn record(&self) -> &HistoryRecord {
        &self.0
    }
}

impl SquareBolusProgrammed {
    pub fn programmed_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0E)? as f64 / 10_000.0)
    }

    pub fn programmed_duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x12)
    }

    pub fn active_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x14)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DualBolusProgrammed(pub(crate) HistoryRecord);

impl BolusRecord for DualBolusProgrammed {
    fn record(&self) -> &HistoryRecord {
        &self.0
    }
}

impl DualBolusProgrammed {
    pub fn normal_programmed_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0E)? as f64 / 10_000.0)
    }

    pub fn square_programmed_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x12)? as f64 / 10_000.0)
    }

    pub fn programmed_duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x16)
    }

    pub fn active_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x18)? as f64 / 10_000.0)
    }

    /// Total of both parts, rounded the way the pump displays it.
    pub fn programmed_amount(&self) -> Result<f64, CnlError> {
        let total = self.normal_programmed_amount()? + self.square_programmed_amount()?;
        Ok((total * 10.0).round() / 10.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalBolusDelivered(pub(crate) HistoryRecord);

impl BolusRecord for NormalBolusDelivered {
    fn record(&self) -> &HistoryRecord {
        &self.0
    }
}

impl NormalBolusDelivered {
    pub fn programmed_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0E)? as f64 / 10_000.0)
    }

    pub fn delivered_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x12)? as f64 / 10_000.0)
    }

    pub fn active_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x16)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SquareBolusDelivered(pub(crate) HistoryRecord);

impl BolusRecord for SquareBolusDelivered {
    fn record(&self) -> &HistoryRecord {
        &self.0
    }
}

impl SquareBolusDelivered {
    pub fn programmed_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0E)? as f64 / 10_000.0)
    }

    pub fn delivered_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x12)? as f64 / 10_000.0)
    }

    pub fn programmed_duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x16)
    }

    pub fn delivered_duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x18)
    }

    pub fn active_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x1A)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DualBolusPartDelivered(pub(crate) HistoryRecord);

impl BolusRecord for DualBolusPartDelivered {
    fn record(&self) -> &HistoryRecord {
        &self.0
    }
}

impl DualBolusPartDelivered {
    pub fn normal_programmed_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0E)? as f64 / 10_000.0)
    }

    pub fn square_programmed_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x12)? as f64 / 10_000.0)
    }

    pub fn delivered_amount(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x16)? as f64 / 10_000.0)
    }

    /// Which wave of the dual bolus this delivery closes out.
    pub fn bolus_part(&self) -> Result<DualBolusPart, CnlError> {
        Ok(DualBolusPart::from(self.0.cursor().u8_at(0x1A)?))
    }

    pub fn programmed_duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x1B)
    }

    pub fn delivered_duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x1D)
    }

    pub fn active_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x1F)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BolusCanceled(pub(crate) HistoryRecord);

impl BolusCanceled {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    /// 0 = auto, otherwise user-initiated.
    pub fn canceled_manually(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? != 0)
    }

    pub fn bolus_number(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0C)
    }
}

/// The bolus wizard's full worksheet: inputs, targets and the estimate chain.
#[derive(Debug, Clone, PartialEq)]
pub struct BolusWizardEstimate(pub(crate) HistoryRecord);

impl BolusWizardEstimate {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn bg_units(&self) -> Result<BgUnits, CnlError> {
        Ok(BgUnits::from(self.0.cursor().u8_at(0x0B)?))
    }

    pub fn carb_units(&self) -> Result<CarbUnits, CnlError> {
        Ok(CarbUnits::from(self.0.cursor().u8_at(0x0C)?))
    }

    fn bg_scaled(&self, offset: usize) -> Result<f64, CnlError> {
        let raw = self.0.cursor().u16_be_at(offset)? as f64;
        Ok(match self.bg_units()? {
            BgUnits::MgDl => raw,
            BgUnits::MmolL => raw / 10.0,
        })
    }

    pub fn bg_input(&self) -> Result<f64, CnlError> {
        self.bg_scaled(0x0D)
    }

    pub fn carb_input(&self) -> Result<f64, CnlError> {
        let raw = self.0.cursor().u16_be_at(0x0F)? as f64;
        Ok(match self.carb_units()? {
            CarbUnits::Grams => raw,
            CarbUnits::Exchanges => raw / 10.0,
        })
    }

    pub fn isf(&self) -> Result<f64, CnlError> {
        self.bg_scaled(0x11)
    }

    pub fn carb_ratio(&self) -> Result<f64, CnlError> {
        let raw = self.0.cursor().u32_be_at(0x13)? as f64;
        Ok(match self.carb_units()? {
            CarbUnits::Grams => raw / 10.0,
            CarbUnits::Exchanges => raw / 1000.0,
        })
    }

    pub fn low_bg_target(&self) -> Result<f64, CnlError> {
        self.bg_scaled(0x17)
    }

    pub fn high_bg_target(&self) -> Result<f64, CnlError> {
        self.bg_scaled(0x19)
    }

    pub fn correction_estimate(&self) -> Result<f64, CnlError> {
        let cursor = self.0.cursor();
        let raw = ((cursor.u8_at(0x1B)? as u32) << 8
            | (cursor.u8_at(0x1C)? as u32) << 8
            | (cursor.u8_at(0x1D)? as u32) << 8
            | cursor.u8_at(0x1E)? as u32) as f64;
        Ok(raw / 10_000.0)
    }

    pub fn food_estimate(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x1F)? as f64 / 10_000.0)
    }

    pub fn active_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x23)? as f64 / 10_000.0)
    }

    pub fn active_insulin_correction(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x27)? as f64 / 10_000.0)
    }

    pub fn bolus_wizard_estimate(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x2B)? as f64 / 10_000.0)
    }

    pub fn bolus_step_size(&self) -> Result<BolusStepSize, CnlError> {
        Ok(BolusStepSize::from(self.0.cursor().u8_at(0x2F)?))
    }

    pub fn estimate_modified_by_user(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x30)? & 0x01 == 0x01)
    }

    pub fn final_estimate(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x31)? as f64 / 10_000.0)
    }
}
