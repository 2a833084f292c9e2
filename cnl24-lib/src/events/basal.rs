//! Basal delivery, temp basal, suspend/resume and reservoir records.

use crate::error::CnlError;
use crate::events::constants::{
    CannulaFillType, ResumeReason, SuspendReason, TempBasalType, basal_pattern_name,
    temp_basal_preset_name,
};
use crate::events::record::HistoryRecord;

/// A scheduled basal segment beginning delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalSegmentStart(pub(crate) HistoryRecord);

impl BasalSegmentStart {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn pattern_number(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn pattern_name(&self) -> Result<&'static str, CnlError> {
        Ok(basal_pattern_name(self.pattern_number()?))
    }

    pub fn segment_number(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0C)
    }

    pub fn rate(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0D)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasalPatternSelected(pub(crate) HistoryRecord);

impl BasalPatternSelected {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_pattern_number(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn new_pattern_number(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0C)
    }

    pub fn old_pattern_name(&self) -> Result<&'static str, CnlError> {
        Ok(basal_pattern_name(self.old_pattern_number()?))
    }

    pub fn new_pattern_name(&self) -> Result<&'static str, CnlError> {
        Ok(basal_pattern_name(self.new_pattern_number()?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasalPatternTimeSlot {
    pub rate: f64,
    pub start_minutes: u16,
}

/// Old/new snapshot of one basal pattern's segment list. The event type byte
/// distinguishes the before and after records.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalPatternChange(pub(crate) HistoryRecord);

impl BasalPatternChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn pattern_number(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn pattern_name(&self) -> Result<&'static str, CnlError> {
        Ok(basal_pattern_name(self.pattern_number()?))
    }

    pub fn segments(&self) -> Result<Vec<BasalPatternTimeSlot>, CnlError> {
        let cursor = self.0.cursor();
        let count = cursor.u8_at(0x0C)? as usize;
        let mut segments = Vec::with_capacity(count);
        let mut pos = 0x0D;
        for _ in 0..count {
            segments.push(BasalPatternTimeSlot {
                rate: cursor.u32_be_at(pos)? as f64 / 10_000.0,
                start_minutes: cursor.u8_at(pos + 4)? as u16 * 30,
            });
            pos += 5;
        }
        Ok(segments)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempBasalProgrammed(pub(crate) HistoryRecord);

impl TempBasalProgrammed {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn preset(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn preset_name(&self) -> Result<&'static str, CnlError> {
        Ok(temp_basal_preset_name(self.preset()?))
    }

    pub fn basal_type(&self) -> Result<TempBasalType, CnlError> {
        Ok(TempBasalType::from(self.0.cursor().u8_at(0x0C)?))
    }

    pub fn rate(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0D)? as f64 / 10_000.0)
    }

    pub fn percentage_of_rate(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x11)
    }

    pub fn duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x12)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempBasalComplete(pub(crate) HistoryRecord);

impl TempBasalComplete {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn preset(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn preset_name(&self) -> Result<&'static str, CnlError> {
        Ok(temp_basal_preset_name(self.preset()?))
    }

    pub fn basal_type(&self) -> Result<TempBasalType, CnlError> {
        Ok(TempBasalType::from(self.0.cursor().u8_at(0x0C)?))
    }

    pub fn rate(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0D)? as f64 / 10_000.0)
    }

    pub fn percentage_of_rate(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x11)
    }

    pub fn duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x12)
    }

    pub fn canceled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x14)? & 0x01 == 1)
    }

    pub fn duration_left_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x15)
    }
}

/// Old/new snapshot of a temp basal preset's settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetTempBasalChange(pub(crate) HistoryRecord);

impl PresetTempBasalChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn preset(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn preset_name(&self) -> Result<&'static str, CnlError> {
        Ok(temp_basal_preset_name(self.preset()?))
    }

    pub fn enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0C)? != 0)
    }

    pub fn basal_type(&self) -> Result<TempBasalType, CnlError> {
        Ok(TempBasalType::from(self.0.cursor().u8_at(0x0D)?))
    }

    pub fn rate_raw(&self) -> Result<u32, CnlError> {
        self.0.cursor().u32_be_at(0x0E)
    }

    pub fn percentage(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x12)
    }

    pub fn duration_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x13)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsulinDeliveryStopped(pub(crate) HistoryRecord);

impl InsulinDeliveryStopped {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn suspend_reason(&self) -> Result<SuspendReason, CnlError> {
        Ok(SuspendReason::from(self.0.cursor().u8_at(0x0B)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsulinDeliveryRestarted(pub(crate) HistoryRecord);

impl InsulinDeliveryRestarted {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn resume_reason(&self) -> Result<ResumeReason, CnlError> {
        Ok(ResumeReason::from(self.0.cursor().u8_at(0x0B)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CannulaFillDelivered(pub(crate) HistoryRecord);

impl CannulaFillDelivered {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn fill_type(&self) -> Result<CannulaFillType, CnlError> {
        Ok(CannulaFillType::from(self.0.cursor().u8_at(0x0B)?))
    }

    pub fn delivered(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0C)? as f64 / 10_000.0)
    }

    pub fn remaining(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x10)? as f64 / 10_000.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LowReservoir(pub(crate) HistoryRecord);

impl LowReservoir {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn warning_type(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn hours_remaining(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0C)
    }

    pub fn minutes_remaining(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0D)
    }

    pub fn units_remaining(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u32_be_at(0x0E)? as f64 / 10_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::record::tests::{encode_timestamp, make_record};

    #[test]
    fn basal_segment_start_rate_scales() {
        let mut body = vec![6, 2];
        body.extend_from_slice(&15_000u32.to_be_bytes());
        let view = BasalSegmentStart(make_record(0x1D, encode_timestamp(0, 0), &body));
        assert_eq!(view.pattern_name().unwrap(), "Workday");
        assert_eq!(view.segment_number().unwrap(), 2);
        assert_eq!(view.rate().unwrap(), 1.5);
    }

    #[test]
    fn pattern_change_segments_walk_the_slot_list() {
        let mut body = vec![1, 2];
        body.extend_from_slice(&10_000u32.to_be_bytes());
        body.push(0);
        body.extend_from_slice(&22_500u32.to_be_bytes());
        body.push(16);
        let view = BasalPatternChange(make_record(0x53, encode_timestamp(0, 0), &body));
        let segments = view.segments().unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].rate, 1.0);
        assert_eq!(segments[1].start_minutes, 480);
        assert_eq!(segments[1].rate, 2.25);
    }

    #[test]
    fn temp_basal_complete_cancel_flag() {
        let mut body = vec![0, 1];
        body.extend_from_slice(&0u32.to_be_bytes());
        body.push(150); // percent
        body.extend_from_slice(&120u16.to_be_bytes());
        body.push(0x01); // canceled
        body.extend_from_slice(&45u16.to_be_bytes());
        let view = TempBasalComplete(make_record(0x22, encode_timestamp(0, 0), &body));
        assert_eq!(view.basal_type().unwrap(), TempBasalType::Percent);
        assert_eq!(view.percentage_of_rate().unwrap(), 150);
        assert_eq!(view.duration_minutes().unwrap(), 120);
        assert!(view.canceled().unwrap());
        assert_eq!(view.duration_left_minutes().unwrap(), 45);
    }

    #[test]
    fn suspend_and_resume_reasons() {
        let stopped = InsulinDeliveryStopped(make_record(0x1E, encode_timestamp(0, 0), &[10]));
        assert_eq!(
            stopped.suspend_reason().unwrap(),
            SuspendReason::PlgmPredictedLowSg
        );
        let restarted = InsulinDeliveryRestarted(make_record(0x1F, encode_timestamp(0, 0), &[5]));
        assert_eq!(
            restarted.resume_reason().unwrap(),
            ResumeReason::LgmAutoResumePresetGlucose
        );
    }
}
