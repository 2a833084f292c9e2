//! Sensor glucose and calibration records.

use chrono::{DateTime, Duration, Local};

use crate::error::CnlError;
use crate::events::constants::{BgSource, BgUnits, MMOL_FACTOR, SensorException};
use crate::events::record::HistoryRecord;

/// A fingerstick (or calibration) reading relayed by the meter.
#[derive(Debug, Clone, PartialEq)]
pub struct BloodGlucoseReading(pub(crate) HistoryRecord);

impl BloodGlucoseReading {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    /// Always mg/dL regardless of the display units.
    pub fn bg_value(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0C)
    }

    pub fn bg_value_mmol(&self) -> Result<f64, CnlError> {
        Ok((self.bg_value()? as f64 / MMOL_FACTOR * 10.0).round() / 10.0)
    }

    pub fn bg_source(&self) -> Result<BgSource, CnlError> {
        Ok(BgSource::from(self.0.cursor().u8_at(0x0E)?))
    }

    /// Display units chosen on the pump.
    pub fn bg_units(&self) -> Result<BgUnits, CnlError> {
        Ok(BgUnits::from(self.0.cursor().u8_at(0x0B)? & 1))
    }

    pub fn calibration_flag(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0B)? & 2 == 2)
    }

    pub fn meter_serial_number(&self) -> String {
        self.0.reversed_string(0x0F..self.0.raw().len())
    }

    pub fn is_calibration(&self) -> Result<bool, CnlError> {
        Ok(self.bg_source()? == BgSource::SensorCal || self.calibration_flag()?)
    }
}

/// The packed extended sensor record: a header plus `number_of_readings`
/// 9-byte reading groups, oldest first. It is never surfaced directly;
/// decoding expands it into one [`SensorGlucoseReading`] per group with
/// back-computed timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorGlucoseReadingsExtended(pub(crate) HistoryRecord);

impl SensorGlucoseReadingsExtended {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn minutes_between_readings(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0B)
    }

    pub fn number_of_readings(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x0C)
    }

    pub fn predicted_sg(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0D)
    }

    /// Expand into per-reading events. The record timestamp belongs to the
    /// most recent reading; each earlier group steps back by the cadence.
    pub fn readings(&self) -> Result<Vec<SensorGlucoseReading>, CnlError> {
        let cursor = self.0.cursor();
        let cadence = self.minutes_between_readings()? as i64;
        let count = self.number_of_readings()? as usize;
        let predicted_sg = self.predicted_sg()?;
        let newest = self.0.timestamp()?;

        let mut readings = Vec::with_capacity(count);
        let mut pos = 0x0F;
        for age in (0..count).rev() {
            let first = cursor.u8_at(pos)?;
            let sg_raw = cursor.u16_be_at(pos)? & 0x03FF;
            let isig = cursor.u16_be_at(pos + 0x02)? as f64 / 100.0;

            // 10-bit two's complement split between the first byte's high
            // bits and the byte at +4
            let mut vctr_raw = (((first as u32 >> 2) & 0x03) << 8) | cursor.u8_at(pos + 0x04)? as u32;
            if vctr_raw & 0x0200 != 0 {
                vctr_raw |= 0xFFFF_FE00;
            }
            let vctr = vctr_raw as i32 as f64 / 100.0;

            let rate_of_change = cursor.i16_be_at(pos + 0x05)? as f64 / 100.0;
            let sensor_status = cursor.u8_at(pos + 0x07)?;
            let reading_status = cursor.u8_at(pos + 0x08)?;

            let (sg, exception) = if sg_raw >= 0x0300 {
                (0, Some(SensorException::from(sg_raw)))
            } else {
                (sg_raw, None)
            };

            readings.push(SensorGlucoseReading {
                timestamp: newest - Duration::minutes(age as i64 * cadence),
                source: self.0.source(),
                sg,
                predicted_sg,
                isig,
                vctr,
                rate_of_change,
                backfilled: reading_status & 1 == 1,
                settings_changed: reading_status & 2 == 2,
                noisy_data: sensor_status == 1,
                discard_data: sensor_status == 2,
                sensor_error: sensor_status == 3,
                exception,
            });
            pos += 9;
        }
        Ok(readings)
    }
}

/// One expanded sensor glucose reading. Synthetic: carries its computed
/// fields instead of a record view.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorGlucoseReading {
    pub timestamp: DateTime<Local>,
    pub source: u8,
    /// mg/dL; zero when `exception` is set.
    pub sg: u16,
    pub predicted_sg: u16,
    pub isig: f64,
    /// Signed vector counter, raw 10-bit two's complement over 100.
    pub vctr: f64,
    pub rate_of_change: f64,
    pub backfilled: bool,
    pub settings_changed: bool,
    pub noisy_data: bool,
    pub discard_data: bool,
    pub sensor_error: bool,
    pub exception: Option<SensorException>,
}

impl SensorGlucoseReading {
    pub fn sg_mmol(&self) -> f64 {
        (self.sg as f64 / MMOL_FACTOR * 10.0).round() / 10.0
    }

    pub fn exception_text(&self) -> Option<&'static str> {
        self.exception.map(|e| e.text())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationComplete(pub(crate) HistoryRecord);

impl CalibrationComplete {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn cal_factor(&self) -> Result<f64, CnlError> {
        Ok(self.0.cursor().u16_be_at(0x0B)? as f64 / 100.0)
    }

    pub fn bg_target(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0D)
    }

    pub fn bg_target_mmol(&self) -> Result<f64, CnlError> {
        Ok((self.bg_target()? as f64 / MMOL_FACTOR * 10.0).round() / 10.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReminderChange(pub(crate) HistoryRecord);

impl CalibrationReminderChange {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn old_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x0C)? == 1)
    }

    pub fn new_enabled(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x12)? == 1)
    }

    pub fn old_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0D)
    }

    pub fn new_minutes(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x13)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::record::tests::{encode_timestamp, make_record};

    /// A 9-byte reading group with the given raw glucose and vctr bits.
    pub(crate) fn reading_group(sg_raw: u16, vctr_low: u8, rate_raw: i16) -> [u8; 9] {
        let vctr_high = 0u8; // bits 8..9 live in the first byte, tested separately
        let sg = sg_raw.to_be_bytes();
        let rate = rate_raw.to_be_bytes();
        [
            sg[0] | (vctr_high << 2),
            sg[1],
            0x03,
            0xE8, // isig 10.00
            vctr_low,
            rate[0],
            rate[1],
            0x00,
            0x00,
        ]
    }

    fn extended_record(groups: &[[u8; 9]], cadence: u8, rtc: u32) -> SensorGlucoseReadingsExtended {
        let mut body = vec![cadence, groups.len() as u8, 0x00, 0x78, 0x00, 0x00];
        // body starts at 0x0B; reading groups start at 0x0F
        for group in groups {
            body.extend_from_slice(group);
        }
        SensorGlucoseReadingsExtended(make_record(0xD6, encode_timestamp(rtc, -7200), &body))
    }

    #[test]
    fn expansion_steps_timestamps_back_by_cadence() {
        let record = extended_record(
            &[reading_group(120, 0, 25), reading_group(130, 0, -50)],
            5,
            0x2000_0000,
        );
        let readings = record.readings().unwrap();
        assert_eq!(readings.len(), 2);
        // first group in the record is the oldest
        assert_eq!(readings[0].sg, 120);
        assert_eq!(readings[1].sg, 130);
        assert_eq!(
            readings[1].timestamp - readings[0].timestamp,
            Duration::minutes(5)
        );
        assert_eq!(readings[1].timestamp, record.record().timestamp().unwrap());
        assert_eq!(readings[0].rate_of_change, 0.25);
        assert_eq!(readings[1].rate_of_change, -0.5);
    }

    #[test]
    fn exception_codes_zero_the_glucose() {
        let record = extended_record(&[reading_group(0x0301, 0, 0)], 5, 0x2000_0000);
        let reading = &record.readings().unwrap()[0];
        assert_eq!(reading.sg, 0);
        assert_eq!(reading.exception, Some(SensorException::WarmingUp));
        assert_eq!(reading.exception_text(), Some("Sensor warming up"));
    }

    #[test]
    fn boundary_between_reading_and_exception() {
        let record = extended_record(
            &[reading_group(0x02FF, 0, 0), reading_group(0x0300, 0, 0)],
            5,
            0x2000_0000,
        );
        let readings = record.readings().unwrap();
        assert_eq!(readings[0].sg, 767);
        assert_eq!(readings[0].exception, None);
        assert_eq!(readings[1].sg, 0);
        assert_eq!(readings[1].exception, Some(SensorException::SensorOk));
        assert_eq!(readings[1].exception_text(), Some("Sensor OK"));
    }

    #[test]
    fn vctr_sign_extends_from_ten_bits() {
        // top bit of the 10-bit value lives in bit 3 of the group's first byte
        let mut group = reading_group(100, 0x9C, 0);
        group[0] |= 0b0000_1000; // vctr bit 9
        let record = extended_record(&[group], 5, 0x2000_0000);
        let reading = &record.readings().unwrap()[0];
        // raw 0x29C -> sign-extended -356 -> -3.56
        assert_eq!(reading.vctr, -3.56);

        let record = extended_record(&[reading_group(100, 0x9C, 0)], 5, 0x2000_0000);
        assert_eq!(record.readings().unwrap()[0].vctr, 1.56);
    }

    #[test]
    fn bg_reading_units_and_serial() {
        let mut body = vec![0x03, 0x00, 0x78, 0x01]; // mmol display + calibration flag
        body.extend_from_slice(b"321BA");
        let view = BloodGlucoseReading(make_record(0x32, encode_timestamp(0x2000_0000, -7200), &body));
        assert_eq!(view.bg_value().unwrap(), 120);
        assert_eq!(view.bg_value_mmol().unwrap(), 6.7);
        assert_eq!(view.bg_units().unwrap(), BgUnits::MmolL);
        assert!(view.calibration_flag().unwrap());
        assert!(view.is_calibration().unwrap());
        assert_eq!(view.meter_serial_number(), "AB123");
    }
}
