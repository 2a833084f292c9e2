//! Typed views over decrypted ComD response payloads.
//!
//! A [`ComdResponse`] payload starts with the sequence byte and the 16-bit
//! message type; everything after is message-specific and read at fixed
//! offsets. Each view checks the message type once on construction and then
//! exposes computed accessors, never copying the payload.

use bytes::Bytes;
use chrono::{DateTime, Local};

use crate::comd::{ComdCommand, ComdResponse};
use crate::cursor::BinaryCursor;
use crate::error::CnlError;
use crate::time;

fn expect_command(response: &ComdResponse, expected: ComdCommand) -> Result<(), CnlError> {
    let actual = response.command();
    if actual != expected {
        return Err(CnlError::UnexpectedMessageType {
            expected: vec![u16::from(expected)],
            actual: u16::from(actual),
        });
    }
    Ok(())
}

/// READ_INFO response rides in the outer envelope unencrypted: two big-endian
/// radio MACs that seed the session.
#[derive(Debug, Clone)]
pub struct ReadInfoResponse {
    payload: Bytes,
}

impl ReadInfoResponse {
    pub fn new(payload: Bytes) -> Result<Self, CnlError> {
        if payload.len() < 16 {
            return Err(CnlError::InsufficientData {
                expected: 16,
                actual: payload.len(),
            });
        }
        Ok(Self { payload })
    }

    pub fn link_mac(&self) -> u64 {
        u64::from_be_bytes(self.payload[0..8].try_into().unwrap())
    }

    pub fn pump_mac(&self) -> u64 {
        u64::from_be_bytes(self.payload[8..16].try_into().unwrap())
    }
}

/// TIME_RESPONSE: whether the pump clock is set, and the packed timestamp.
#[derive(Debug, Clone)]
pub struct PumpTimeResponse {
    payload: Bytes,
}

impl PumpTimeResponse {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::TimeResponse)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    fn cursor(&self) -> BinaryCursor<'_> {
        BinaryCursor::new(&self.payload)
    }

    pub fn time_set(&self) -> Result<bool, CnlError> {
        Ok(self.cursor().u8_at(0x03)? != 0)
    }

    pub fn encoded_datetime(&self) -> Result<u64, CnlError> {
        self.cursor().u64_be_at(0x04)
    }

    pub fn datetime(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.encoded_datetime()?))
    }

    pub fn offset(&self) -> Result<i64, CnlError> {
        Ok(time::decode_date_time_offset(self.encoded_datetime()?))
    }
}

/// Sensor trend, from the status response's packed arrow nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendArrow {
    ThreeUp,
    TwoUp,
    OneUp,
    Flat,
    OneDown,
    TwoDown,
    ThreeDown,
    Unknown(u8),
}

impl TrendArrow {
    fn from_status(status: u8) -> Self {
        match status & 0xF0 {
            0xC0 => TrendArrow::ThreeUp,
            0xA0 => TrendArrow::TwoUp,
            0x80 => TrendArrow::OneUp,
            0x60 => TrendArrow::Flat,
            0x40 => TrendArrow::OneDown,
            0x20 => TrendArrow::TwoDown,
            0x00 => TrendArrow::ThreeDown,
            other => TrendArrow::Unknown(other),
        }
    }
}

/// READ_PUMP_STATUS_RESPONSE: the pump's live telemetry block.
///
/// Offsets follow the CareLink applet's status layout; several bitfields are
/// still only partially understood and are exposed bit by bit as observed.
#[derive(Debug, Clone)]
pub struct PumpStatusResponse {
    payload: Bytes,
}

impl PumpStatusResponse {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::ReadPumpStatusResponse)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    fn cursor(&self) -> BinaryCursor<'_> {
        BinaryCursor::new(&self.payload)
    }

    fn status_bit(&self, mask: u8) -> Result<bool, CnlError> {
        Ok(self.cursor().u8_at(0x03)? & mask != 0)
    }

    pub fn suspended(&self) -> Result<bool, CnlError> {
        self.status_bit(0x01)
    }

    pub fn bolusing_normal(&self) -> Result<bool, CnlError> {
        self.status_bit(0x02)
    }

    pub fn bolusing_square(&self) -> Result<bool, CnlError> {
        self.status_bit(0x04)
    }

    pub fn bolusing_dual(&self) -> Result<bool, CnlError> {
        self.status_bit(0x08)
    }

    pub fn delivering_insulin(&self) -> Result<bool, CnlError> {
        self.status_bit(0x10)
    }

    pub fn temp_basal_active(&self) -> Result<bool, CnlError> {
        self.status_bit(0x20)
    }

    pub fn cgm_active(&self) -> Result<bool, CnlError> {
        self.status_bit(0x40)
    }

    pub fn bolusing_delivered(&self) -> Result<f64, CnlError> {
        Ok(self.cursor().u32_be_at(0x04)? as f64 / 10_000.0)
    }

    pub fn bolusing_minutes_remaining(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x0C)
    }

    pub fn bolusing_reference(&self) -> Result<u8, CnlError> {
        self.cursor().u8_at(0x0E)
    }

    pub fn last_bolus_amount(&self) -> Result<f64, CnlError> {
        Ok(self.cursor().u32_be_at(0x10)? as f64 / 10_000.0)
    }

    /// Bare RTC with no offset half; decoded against offset zero.
    pub fn last_bolus_time(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::from_rtc_and_offset(self.cursor().u32_be_at(0x14)?, 0))
    }

    pub fn last_bolus_reference(&self) -> Result<u8, CnlError> {
        self.cursor().u8_at(0x18)
    }

    pub fn active_basal_pattern(&self) -> Result<u8, CnlError> {
        Ok(self.cursor().u8_at(0x1A)? & 0x0F)
    }

    pub fn active_temp_basal_pattern(&self) -> Result<u8, CnlError> {
        Ok((self.cursor().u8_at(0x1A)? >> 4) & 0x0F)
    }

    pub fn current_basal_rate(&self) -> Result<f64, CnlError> {
        Ok(self.cursor().u32_be_at(0x1B)? as f64 / 10_000.0)
    }

    pub fn temp_basal_rate(&self) -> Result<f64, CnlError> {
        Ok(self.cursor().u32_be_at(0x1F)? as f64 / 10_000.0)
    }

    pub fn temp_basal_percentage(&self) -> Result<u8, CnlError> {
        self.cursor().u8_at(0x23)
    }

    pub fn temp_basal_minutes_remaining(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x24)
    }

    pub fn basal_units_delivered_today(&self) -> Result<f64, CnlError> {
        Ok(self.cursor().u32_be_at(0x26)? as f64 / 10_000.0)
    }

    pub fn battery_level_percentage(&self) -> Result<u8, CnlError> {
        self.cursor().u8_at(0x2A)
    }

    pub fn insulin_units_remaining(&self) -> Result<f64, CnlError> {
        Ok(self.cursor().u32_be_at(0x2B)? as f64 / 10_000.0)
    }

    pub fn minutes_of_insulin_remaining(&self) -> Result<u16, CnlError> {
        let cursor = self.cursor();
        let hours = cursor.u8_at(0x2F)? as u16;
        let minutes = cursor.u8_at(0x30)? as u16;
        Ok(hours * 60 + minutes)
    }

    pub fn active_insulin(&self) -> Result<f64, CnlError> {
        Ok(self.cursor().u32_be_at(0x31)? as f64 / 10_000.0)
    }

    /// In mg/dL. 0x0000 means no CGM reading; 0x03NN is a sensor exception.
    pub fn sensor_bgl(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x35)
    }

    pub fn sensor_bgl_timestamp(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.cursor().u64_be_at(0x37)?))
    }

    fn plgm_bit(&self, mask: u8) -> Result<bool, CnlError> {
        Ok(self.cursor().u8_at(0x3F)? & mask != 0)
    }

    pub fn plgm_alert_on_high(&self) -> Result<bool, CnlError> {
        self.plgm_bit(0x01)
    }

    pub fn plgm_alert_on_low(&self) -> Result<bool, CnlError> {
        self.plgm_bit(0x02)
    }

    pub fn plgm_alert_before_high(&self) -> Result<bool, CnlError> {
        self.plgm_bit(0x04)
    }

    pub fn plgm_alert_before_low(&self) -> Result<bool, CnlError> {
        self.plgm_bit(0x08)
    }

    pub fn plgm_alert_suspend(&self) -> Result<bool, CnlError> {
        self.plgm_bit(0x80)
    }

    pub fn plgm_alert_suspend_low(&self) -> Result<bool, CnlError> {
        self.plgm_bit(0x10)
    }

    pub fn trend_arrow(&self) -> Result<TrendArrow, CnlError> {
        Ok(TrendArrow::from_status(self.cursor().u8_at(0x40)?))
    }

    fn sensor_status_bit(&self, mask: u8) -> Result<bool, CnlError> {
        Ok(self.cursor().u8_at(0x41)? & mask != 0)
    }

    pub fn sensor_calibrating(&self) -> Result<bool, CnlError> {
        self.sensor_status_bit(0x01)
    }

    pub fn sensor_calibration_complete(&self) -> Result<bool, CnlError> {
        self.sensor_status_bit(0x02)
    }

    pub fn sensor_exception(&self) -> Result<bool, CnlError> {
        self.sensor_status_bit(0x04)
    }

    pub fn sensor_cal_minutes_remaining(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x43)
    }

    pub fn sensor_battery_level_percentage(&self) -> Result<u8, CnlError> {
        let raw = self.cursor().u8_at(0x45)? & 0x0F;
        Ok(((raw as f64 * 100.0) / 15.0).round() as u8)
    }

    pub fn sensor_rate_of_change(&self) -> Result<f64, CnlError> {
        Ok(self.cursor().i16_be_at(0x46)? as f64 / 100.0)
    }

    /// Whether the bolus wizard ran in the last 15 minutes.
    pub fn recent_bolus_wizard(&self) -> Result<bool, CnlError> {
        Ok(self.cursor().u8_at(0x48)? != 0)
    }

    /// BG entered into the bolus wizard, mg/dL.
    pub fn recent_bgl(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x49)
    }

    pub fn alert(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x4B)
    }

    pub fn alert_date(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.cursor().u64_be_at(0x4D)?))
    }

    fn alert_silence_bit(&self, mask: u8) -> Result<bool, CnlError> {
        Ok(self.cursor().u8_at(0x55)? & mask != 0)
    }

    pub fn alert_silence_high(&self) -> Result<bool, CnlError> {
        self.alert_silence_bit(0x01)
    }

    pub fn alert_silence_high_low(&self) -> Result<bool, CnlError> {
        self.alert_silence_bit(0x02)
    }

    pub fn alert_silence_all(&self) -> Result<bool, CnlError> {
        self.alert_silence_bit(0x04)
    }

    pub fn alert_silence_minutes_remaining(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x56)
    }
}

/// READ_HISTORY_INFO_RESPONSE: the size and date range of a planned pull.
#[derive(Debug, Clone)]
pub struct HistoryInfoResponse {
    payload: Bytes,
}

impl HistoryInfoResponse {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::ReadHistoryInfoResponse)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    fn cursor(&self) -> BinaryCursor<'_> {
        BinaryCursor::new(&self.payload)
    }

    pub fn data_size(&self) -> Result<u32, CnlError> {
        self.cursor().u32_be_at(0x04)
    }

    pub fn block_count(&self) -> Result<u32, CnlError> {
        Ok(self.data_size()? / crate::constants::HISTORY_BLOCK_SIZE as u32)
    }

    pub fn from_date(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.cursor().u64_be_at(0x08)?))
    }

    pub fn to_date(&self) -> Result<DateTime<Local>, CnlError> {
        Ok(time::decode_date_time(self.cursor().u64_be_at(0x10)?))
    }
}

/// INITIATE_MULTIPACKET_TRANSFER: geometry of an incoming segmented payload.
#[derive(Debug, Clone)]
pub struct InitiateMultipacket {
    payload: Bytes,
}

impl InitiateMultipacket {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::InitiateMultipacketTransfer)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    fn cursor(&self) -> BinaryCursor<'_> {
        BinaryCursor::new(&self.payload)
    }

    pub fn segment_size(&self) -> Result<u32, CnlError> {
        self.cursor().u32_be_at(0x03)
    }

    pub fn packet_size(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x07)
    }

    pub fn last_packet_size(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x09)
    }

    pub fn packets_to_fetch(&self) -> Result<u16, CnlError> {
        self.cursor().u16_be_at(0x0B)
    }
}

/// MULTIPACKET_SEGMENT_TRANSMISSION: one numbered slice of the transfer.
#[derive(Debug, Clone)]
pub struct MultipacketSegment {
    payload: Bytes,
}

impl MultipacketSegment {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::MultipacketSegmentTransmission)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    pub fn packet_number(&self) -> Result<u16, CnlError> {
        BinaryCursor::new(&self.payload).u16_be_at(0x03)
    }

    pub fn segment_payload(&self) -> Bytes {
        self.payload.slice(0x05.min(self.payload.len())..)
    }
}

/// HIGH_SPEED_MODE status echoed back during bulk transfers.
#[derive(Debug, Clone)]
pub struct EhsmStatus {
    payload: Bytes,
}

impl EhsmStatus {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::HighSpeedMode)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    pub fn mode(&self) -> Result<u8, CnlError> {
        Ok(BinaryCursor::new(&self.payload).u8_at(0x03)? & 1)
    }
}

/// NAK_COMMAND: the pump refusing the named request.
#[derive(Debug, Clone)]
pub struct NakResponse {
    payload: Bytes,
}

impl NakResponse {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::Nak)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    pub fn nak_command(&self) -> Result<u16, CnlError> {
        BinaryCursor::new(&self.payload).u16_be_at(0x03)
    }

    pub fn nak_code(&self) -> Result<u8, CnlError> {
        BinaryCursor::new(&self.payload).u8_at(0x05)
    }
}

/// One half-hour-aligned settings slot.
#[derive(Debug, Clone, PartialEq)]
pub struct CarbRatioSlot {
    /// Grams of carbohydrate covered by one unit of insulin.
    pub grams_per_unit: f64,
    /// Units of insulin per one exchange.
    pub units_per_exchange: f64,
    pub start_minutes: u16,
}

/// READ_BOLUS_WIZARD_CARB_RATIOS_RESPONSE.
#[derive(Debug, Clone)]
pub struct CarbRatiosResponse {
    payload: Bytes,
}

impl CarbRatiosResponse {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::ReadCarbRatiosResponse)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    pub fn slots(&self) -> Result<Vec<CarbRatioSlot>, CnlError> {
        let cursor = BinaryCursor::new(&self.payload);
        let count = cursor.u8_at(0x05)? as usize;
        let mut slots = Vec::with_capacity(count);
        let mut index = 0x06;
        for _ in 0..count {
            slots.push(CarbRatioSlot {
                grams_per_unit: cursor.u32_be_at(index)? as f64 / 10.0,
                units_per_exchange: cursor.u32_be_at(index + 4)? as f64 / 1000.0,
                start_minutes: cursor.u8_at(index + 8)? as u16 * 30,
            });
            index += 9;
        }
        Ok(slots)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BgTargetSlot {
    pub high_mgdl: u16,
    pub high_mmol: f64,
    pub low_mgdl: u16,
    pub low_mmol: f64,
    pub start_minutes: u16,
}

/// READ_BOLUS_WIZARD_BG_TARGETS_RESPONSE.
#[derive(Debug, Clone)]
pub struct BgTargetsResponse {
    payload: Bytes,
}

impl BgTargetsResponse {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::ReadBgTargetsResponse)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    pub fn slots(&self) -> Result<Vec<BgTargetSlot>, CnlError> {
        let cursor = BinaryCursor::new(&self.payload);
        let count = cursor.u8_at(0x05)? as usize;
        let mut slots = Vec::with_capacity(count);
        let mut index = 0x06;
        for _ in 0..count {
            slots.push(BgTargetSlot {
                high_mgdl: cursor.u16_be_at(index)?,
                high_mmol: cursor.u16_be_at(index + 2)? as f64 / 10.0,
                low_mgdl: cursor.u16_be_at(index + 4)?,
                low_mmol: cursor.u16_be_at(index + 6)? as f64 / 10.0,
                start_minutes: cursor.u8_at(index + 8)? as u16 * 30,
            });
            index += 9;
        }
        Ok(slots)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensitivitySlot {
    pub isf_mgdl: u16,
    pub isf_mmol: f64,
    pub start_minutes: u16,
}

/// READ_BOLUS_WIZARD_SENSITIVITY_FACTORS_RESPONSE.
#[derive(Debug, Clone)]
pub struct SensitivityFactorsResponse {
    payload: Bytes,
}

impl SensitivityFactorsResponse {
    pub fn from_response(response: &ComdResponse) -> Result<Self, CnlError> {
        expect_command(response, ComdCommand::ReadSensitivityFactorsResponse)?;
        Ok(Self {
            payload: response.payload.clone(),
        })
    }

    pub fn slots(&self) -> Result<Vec<SensitivitySlot>, CnlError> {
        let cursor = BinaryCursor::new(&self.payload);
        let count = cursor.u8_at(0x05)? as usize;
        let mut slots = Vec::with_capacity(count);
        let mut index = 0x06;
        for _ in 0..count {
            slots.push(SensitivitySlot {
                isf_mgdl: cursor.u16_be_at(index)?,
                isf_mmol: cursor.u16_be_at(index + 2)? as f64 / 10.0,
                start_minutes: cursor.u8_at(index + 4)? as u16 * 30,
            });
            index += 5;
        }
        Ok(slots)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BasalPatternSlot {
    pub rate: f64,
    pub start_minutes: u16,
}

/// A basal pattern payload: pattern number, then rate/start slots. Arrives
/// either as a plain READ_BASAL_PATTERN_RESPONSE or assembled from a
/// multipacket transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalPattern {
    pub pattern_number: u8,
    pub slots: Vec<BasalPatternSlot>,
}

impl BasalPattern {
    /// Parse from the response body with the sequence/message-type prefix
    /// already stripped (two prefix bytes, then number, count, slots).
    pub fn parse(data: &[u8]) -> Result<Self, CnlError> {
        let cursor = BinaryCursor::new(data);
        let pattern_number = cursor.u8_at(0x02)?;
        let count = cursor.u8_at(0x03)? as usize;
        let mut slots = Vec::with_capacity(count);
        let mut index = 0x04;
        for _ in 0..count {
            slots.push(BasalPatternSlot {
                rate: cursor.u32_be_at(index)? as f64 / 10_000.0,
                start_minutes: cursor.u8_at(index + 4)? as u16 * 30,
            });
            index += 5;
        }
        Ok(Self {
            pattern_number,
            slots,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an INITIATE_MULTIPACKET_TRANSFER view straight from geometry.
    pub(crate) fn init_multipacket(
        segment_size: u32,
        packet_size: u16,
        last_packet_size: u16,
        packets_to_fetch: u16,
    ) -> InitiateMultipacket {
        let mut payload = vec![0x01, 0xFF, 0x00];
        payload.extend_from_slice(&segment_size.to_be_bytes());
        payload.extend_from_slice(&packet_size.to_be_bytes());
        payload.extend_from_slice(&last_packet_size.to_be_bytes());
        payload.extend_from_slice(&packets_to_fetch.to_be_bytes());
        InitiateMultipacket {
            payload: Bytes::from(payload),
        }
    }

    /// Build a MULTIPACKET_SEGMENT_TRANSMISSION view for one numbered slot.
    pub(crate) fn segment(packet_number: u16, data: &[u8]) -> MultipacketSegment {
        let mut payload = vec![0x01, 0xFF, 0x01];
        payload.extend_from_slice(&packet_number.to_be_bytes());
        payload.extend_from_slice(data);
        MultipacketSegment {
            payload: Bytes::from(payload),
        }
    }

    #[test]
    fn read_info_splits_the_mac_pair() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0023F7_45AABBCCDDu64.to_be_bytes());
        payload.extend_from_slice(&0x0023F7_1122334455u64.to_be_bytes());
        let info = ReadInfoResponse::new(Bytes::from(payload)).unwrap();
        assert_eq!(info.link_mac(), 0x0023F7_45AABBCCDD);
        assert_eq!(info.pump_mac(), 0x0023F7_1122334455);
    }

    #[test]
    fn initiate_multipacket_geometry() {
        let init = init_multipacket(70_000, 1_466, 1_090, 48);
        assert_eq!(init.segment_size().unwrap(), 70_000);
        assert_eq!(init.packet_size().unwrap(), 1_466);
        assert_eq!(init.last_packet_size().unwrap(), 1_090);
        assert_eq!(init.packets_to_fetch().unwrap(), 48);
    }

    #[test]
    fn segment_number_and_payload() {
        let seg = segment(7, b"abcdef");
        assert_eq!(seg.packet_number().unwrap(), 7);
        assert_eq!(seg.segment_payload().as_ref(), b"abcdef");
    }

    #[test]
    fn carb_ratio_slots_decode() {
        // count 2: (150 -> 15.0 g/U, 1500 -> 1.5 U/ex, slot 0) and
        //          (120 -> 12.0 g/U, 2000 -> 2.0 U/ex, slot 16 -> 08:00)
        let mut payload = vec![0x01, 0x01, 0x2C, 0x00, 0x00, 0x02];
        payload.extend_from_slice(&150u32.to_be_bytes());
        payload.extend_from_slice(&1500u32.to_be_bytes());
        payload.push(0);
        payload.extend_from_slice(&120u32.to_be_bytes());
        payload.extend_from_slice(&2000u32.to_be_bytes());
        payload.push(16);
        let view = CarbRatiosResponse {
            payload: Bytes::from(payload),
        };
        let slots = view.slots().unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].grams_per_unit, 15.0);
        assert_eq!(slots[0].units_per_exchange, 1.5);
        assert_eq!(slots[1].start_minutes, 480);
    }

    #[test]
    fn basal_pattern_parses_rate_slots() {
        let mut data = vec![0x01, 0x23, 0x03, 0x02];
        data.extend_from_slice(&12_500u32.to_be_bytes());
        data.push(0);
        data.extend_from_slice(&8_000u32.to_be_bytes());
        data.push(13);
        let pattern = BasalPattern::parse(&data).unwrap();
        assert_eq!(pattern.pattern_number, 3);
        assert_eq!(
            pattern.slots,
            vec![
                BasalPatternSlot {
                    rate: 1.25,
                    start_minutes: 0
                },
                BasalPatternSlot {
                    rate: 0.8,
                    start_minutes: 390
                },
            ]
        );
    }
}
