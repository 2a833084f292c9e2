//! Alarm notification records and the fault-code message table.
//!
//! The pump reports alarms as a fault number plus ten opaque data bytes whose
//! layout depends on the code (insulin amounts, clock values, snoozed
//! glucose, reminder indexes). The message templates are a static lookup
//! table; callers may supply their own translated table, the English one
//! ships as [`DEFAULT_ALARM_TABLE`].

use bytes::Bytes;
use strum_macros::Display;

use crate::cursor::BinaryCursor;
use crate::error::CnlError;
use crate::events::constants::{MMOL_FACTOR, PERSONAL_REMINDER_NAMES};
use crate::events::record::HistoryRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AlarmType {
    #[strum(serialize = "Pump Alert")]
    Pump,
    #[strum(serialize = "Sensor Alert")]
    Sensor,
    #[strum(serialize = "Reminder")]
    Reminder,
    #[strum(serialize = "SmartGuard")]
    SmartGuard,
    #[strum(serialize = "Auto mode alert")]
    AutoMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum AlarmPriority {
    Redundant,
    Lowest,
    Low,
    Normal,
    High,
    Emergency,
}

/// How a fault code's data bytes are decoded into the message template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmData {
    /// No substitutions.
    None,
    /// Insulin amount at offset 0.
    Insulin,
    /// Clock (hour, minute) at the given offset.
    Clock(usize),
    /// Clock at 0 plus a reminder-list index at offset 2.
    ClockAndReminder,
    /// List index at offset 0 into a fixed day-count list.
    DayList,
    /// Snoozed glucose at offset 1; 0x300 and above means bad data.
    Glucose,
}

#[derive(Debug, Clone, Copy)]
pub struct AlarmTemplate {
    pub code: u16,
    pub alarm_type: AlarmType,
    pub priority: AlarmPriority,
    /// `title|body` with `{0}`/`{1}` placeholders for decoded data.
    pub message: &'static str,
    pub data: AlarmData,
}

const fn entry(
    code: u16,
    alarm_type: AlarmType,
    priority: AlarmPriority,
    message: &'static str,
    data: AlarmData,
) -> AlarmTemplate {
    AlarmTemplate {
        code,
        alarm_type,
        priority,
        message,
        data,
    }
}

/// The English template table, codes as reported by 600-series firmware.
#[rustfmt::skip]
pub const DEFAULT_ALARM_TABLE: &[AlarmTemplate] = &[
    entry(3, AlarmType::Pump, AlarmPriority::Emergency, "Pump error 3|Delivery stopped. Settings unchanged. Select OK to continue. See User Guide.", AlarmData::None),
    entry(4, AlarmType::Pump, AlarmPriority::Emergency, "Pump error 4|Delivery stopped. Settings unchanged. Select OK to continue. See User Guide.", AlarmData::None),
    entry(6, AlarmType::Pump, AlarmPriority::Emergency, "Power loss|AA battery was removed for more than 10 min or power was lost. Select OK to re-enter time and date.", AlarmData::None),
    entry(7, AlarmType::Pump, AlarmPriority::Emergency, "Insulin flow blocked|Check BG. Consider injection and testing ketones. Change reservoir and infusion set.", AlarmData::None),
    entry(8, AlarmType::Pump, AlarmPriority::Emergency, "Insulin flow blocked|Estimated 0U insulin in reservoir. Change reservoir and infusion set.", AlarmData::None),
    entry(11, AlarmType::Pump, AlarmPriority::Emergency, "Replace battery now|Delivery stopped. Battery must be replaced to resume delivery.", AlarmData::None),
    entry(15, AlarmType::Pump, AlarmPriority::Emergency, "Pump error 15|Delivery stopped. Settings unchanged. Select OK to continue. See User Guide.", AlarmData::None),
    entry(23, AlarmType::Pump, AlarmPriority::Emergency, "Pump error 23|Delivery stopped. Settings unchanged. Select OK to continue. See User Guide.", AlarmData::None),
    entry(53, AlarmType::Pump, AlarmPriority::Emergency, "Pump error 53|Delivery stopped. Settings unchanged. Select OK to continue. See User Guide.", AlarmData::None),
    entry(54, AlarmType::Pump, AlarmPriority::Emergency, "Pump error 54|Delivery stopped. Settings unchanged. Select OK to continue. See User Guide.", AlarmData::None),
    entry(58, AlarmType::Pump, AlarmPriority::Normal, "Battery Failed|Insert a new AA battery.", AlarmData::None),
    entry(61, AlarmType::Pump, AlarmPriority::Lowest, "Stuck button|Button pressed for more than 3 minutes", AlarmData::None),
    entry(66, AlarmType::Pump, AlarmPriority::Lowest, "No reservoir detected|Rewind before loading reservoir.", AlarmData::None),
    entry(70, AlarmType::Pump, AlarmPriority::Low, "Fill Cannula?|Select Fill to fill cannula or select Done if not needed.", AlarmData::None),
    entry(71, AlarmType::Pump, AlarmPriority::Low, "Max Fill reached|{0}. Did you see drops at the end of tubing?", AlarmData::Insulin),
    entry(72, AlarmType::Pump, AlarmPriority::Low, "Max Fill reached|{0}. Remove reservoir and select Rewind to restart New Reservoir procedure.", AlarmData::Insulin),
    entry(73, AlarmType::Pump, AlarmPriority::High, "Replace battery|Battery life less than 30 minutes. To ensure insulin delivery, replace battery now.", AlarmData::None),
    entry(84, AlarmType::Pump, AlarmPriority::Low, "Insert Battery|Delivery stopped. Insert a new battery now.", AlarmData::None),
    entry(100, AlarmType::Pump, AlarmPriority::High, "Bolus Not Delivered|Bolus entry timed out before delivery. If bolus intended, enter values again.", AlarmData::None),
    entry(104, AlarmType::Pump, AlarmPriority::Normal, "Low battery Pump|Replace battery soon.", AlarmData::None),
    entry(105, AlarmType::Pump, AlarmPriority::Normal, "Low Reservoir {0} remain|Change reservoir soon.", AlarmData::Insulin),
    entry(107, AlarmType::Reminder, AlarmPriority::Normal, "Missed Meal Bolus|No bolus delivered during the time set in the reminder.", AlarmData::None),
    entry(108, AlarmType::Reminder, AlarmPriority::Normal, "Reminder|{0} at {1}", AlarmData::ClockAndReminder),
    entry(109, AlarmType::Reminder, AlarmPriority::Normal, "Set Change Reminder: {0} since the last set change|Time to change reservoir and infusion set.", AlarmData::DayList),
    entry(110, AlarmType::Sensor, AlarmPriority::Lowest, "Sensor alert occurred|Check Alarm History for silenced alerts.", AlarmData::None),
    entry(113, AlarmType::Pump, AlarmPriority::High, "Reservoir estimate at 0U|To ensure insulin delivery change reservoir.", AlarmData::None),
    entry(117, AlarmType::Pump, AlarmPriority::Low, "Active Insulin cleared|Any Active Insulin amount has been cleared.", AlarmData::None),
    entry(775, AlarmType::Sensor, AlarmPriority::High, "Calibrate Now|Check BG and calibrate sensor.", AlarmData::None),
    entry(776, AlarmType::Sensor, AlarmPriority::High, "Calibration not accepted|Recheck BG and calibrate sensor.", AlarmData::None),
    entry(777, AlarmType::Sensor, AlarmPriority::High, "Change Sensor|Sensor not working properly. Insert new sensor.", AlarmData::None),
    entry(778, AlarmType::Sensor, AlarmPriority::High, "Change Sensor|Second calibration not accepted. Insert new sensor.", AlarmData::None),
    entry(780, AlarmType::Sensor, AlarmPriority::Low, "Lost sensor signal|Move pump closer to transmitter. May take 15 minutes to find signal.", AlarmData::None),
    entry(781, AlarmType::Sensor, AlarmPriority::Low, "Possible signal interference|Move away from electronic devices. May take 15 minutes to find signal.", AlarmData::None),
    entry(784, AlarmType::Sensor, AlarmPriority::High, "Rise Alert|Sensor glucose rising rapidly.", AlarmData::None),
    entry(788, AlarmType::Sensor, AlarmPriority::High, "BG not received|Place pump close to transmitter. Select OK to resend BG to transmitter.", AlarmData::None),
    entry(790, AlarmType::Sensor, AlarmPriority::Low, "Cannot find sensor signal|Disconnect and reconnect transmitter. Notice if transmitter light blinks.", AlarmData::None),
    entry(791, AlarmType::Sensor, AlarmPriority::Low, "Sensor signal not found|Did transmitter light blink when connected to sensor?", AlarmData::None),
    entry(794, AlarmType::Sensor, AlarmPriority::High, "Sensor expired|Insert new sensor.", AlarmData::None),
    entry(795, AlarmType::Sensor, AlarmPriority::Low, "Check connection|Ensure transmitter and sensor connection is secure.", AlarmData::None),
    entry(796, AlarmType::Sensor, AlarmPriority::Low, "Sensor signal not found|See User Guide.", AlarmData::None),
    entry(797, AlarmType::Sensor, AlarmPriority::Lowest, "Sensor connected|Start new sensor.", AlarmData::None),
    entry(798, AlarmType::Sensor, AlarmPriority::Lowest, "Sensor connected|If new sensor, select Start New. If not, select Reconnect.", AlarmData::None),
    entry(799, AlarmType::Sensor, AlarmPriority::Lowest, "Sensor warm-up started|Warm-up takes up to 2 hours. you will be notified when calibration is needed.", AlarmData::None),
    entry(801, AlarmType::Sensor, AlarmPriority::Low, "SG value not available|If problem continues, see User Guide.", AlarmData::None),
    entry(802, AlarmType::Sensor, AlarmPriority::Emergency, "Alert On Low {0} ({1})|Low sensor glucose. Check BG.", AlarmData::Glucose),
    entry(803, AlarmType::Sensor, AlarmPriority::Emergency, "Alert On Low while suspended|Low sensor glucose. Insulin delivery suspended. Check BG.", AlarmData::None),
    entry(805, AlarmType::Sensor, AlarmPriority::High, "Alert Before Low {0} ({1})|Sensor glucose approaching Low Limit. Check BG.", AlarmData::Glucose),
    entry(806, AlarmType::SmartGuard, AlarmPriority::Low, "Basal Delivery Resumed|(quiet)", AlarmData::None),
    entry(807, AlarmType::SmartGuard, AlarmPriority::Low, "Basal Delivery Resumed|Basal delivery resumed at {0} after suspend by sensor. Check BG.", AlarmData::Clock(4)),
    entry(808, AlarmType::SmartGuard, AlarmPriority::Low, "Basal Delivery Resumed|Maximum 2 hour suspend time reached. Check BG.", AlarmData::None),
    entry(809, AlarmType::SmartGuard, AlarmPriority::Low, "Suspend On Low|Delivery stopped. Sensor glucose {0} ({1}). Check BG.", AlarmData::Glucose),
    entry(810, AlarmType::SmartGuard, AlarmPriority::Low, "Suspend Before Low|(quiet)", AlarmData::None),
    entry(811, AlarmType::Pump, AlarmPriority::Normal, "Suspend Before Low|Delivery stopped. Sensor glucose approaching Low Limit.", AlarmData::None),
    entry(812, AlarmType::Pump, AlarmPriority::Emergency, "Suspend Before Low|Patient unresponsive, medical device emergency.", AlarmData::None),
    entry(814, AlarmType::Pump, AlarmPriority::Normal, "Basal Delivery Resumed|Maximum 2 hour suspend time reached. SG is still under Low limit. Check BG.", AlarmData::None),
    entry(815, AlarmType::Pump, AlarmPriority::Normal, "Basal Delivery Resumed|Low settings change caused basal to be resumed. Check BG.", AlarmData::None),
    entry(816, AlarmType::Sensor, AlarmPriority::Emergency, "Alert On High {0} ({1})|High sensor glucose. Check BG.", AlarmData::Glucose),
    entry(817, AlarmType::Sensor, AlarmPriority::High, "Alert Before High {0} ({1})|Sensor glucose approaching High Limit. Check BG.", AlarmData::Glucose),
    entry(869, AlarmType::Reminder, AlarmPriority::Normal, "Calibrate by {0}|Check BG and calibrate sensor to continue receiving sensor information.", AlarmData::Clock(0)),
    entry(870, AlarmType::Sensor, AlarmPriority::Normal, "Low Transmitter Battery|Recharge transmitter within 24 hours.", AlarmData::None),
];

/// A resolved alarm: template metadata plus the values decoded from the
/// alarm's data bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmDetail {
    pub code: u16,
    pub alarm_type: Option<AlarmType>,
    pub priority: Option<AlarmPriority>,
    /// `Type, Priority: title|body` with placeholders substituted, or a raw
    /// hex rendering for unlisted codes.
    pub text: String,
    pub insulin: Option<f64>,
    pub clock_minutes: Option<u16>,
    /// Snoozed sensor glucose in mg/dL, when the code carries one.
    pub glucose: Option<u16>,
    pub list_item: Option<&'static str>,
}

fn clock_minutes(data: &BinaryCursor<'_>, offset: usize) -> Option<u16> {
    let hours = data.u8_at(offset).ok()? as u16;
    let minutes = data.u8_at(offset + 1).ok()? as u16;
    Some(hours * 60 + minutes)
}

fn format_clock(minutes: u16) -> String {
    format!("{}:{:02}", minutes / 60, minutes % 60)
}

fn substitute(template: &str, values: &[String]) -> String {
    let mut out = template.to_string();
    for (i, value) in values.iter().enumerate() {
        out = out.replace(&format!("{{{i}}}"), value);
    }
    out
}

/// Resolve a fault code against the template table and its data bytes.
pub fn resolve_alarm(table: &[AlarmTemplate], code: u16, data: &[u8]) -> AlarmDetail {
    let Some(template) = table.iter().find(|t| t.code == code) else {
        return AlarmDetail {
            code,
            alarm_type: None,
            priority: None,
            text: format!("[Unlisted alarm {code}]: {}", hex::encode(data)),
            insulin: None,
            clock_minutes: None,
            glucose: None,
            list_item: None,
        };
    };

    let cursor = BinaryCursor::new(data);
    let mut insulin = None;
    let mut clock = None;
    let mut glucose = None;
    let mut list_item = None;

    let message = match template.data {
        AlarmData::None => template.message.to_string(),
        AlarmData::Insulin => {
            let amount = cursor.u32_be_at(0).map(|u| u as f64 / 10_000.0).unwrap_or(0.0);
            insulin = Some(amount);
            substitute(template.message, &[format!("{amount}U")])
        }
        AlarmData::Clock(offset) => match clock_minutes(&cursor, offset) {
            Some(minutes) => {
                clock = Some(minutes);
                substitute(template.message, &[format_clock(minutes)])
            }
            None => template.message.to_string(),
        },
        AlarmData::ClockAndReminder => {
            let minutes = clock_minutes(&cursor, 0).unwrap_or(0);
            clock = Some(minutes);
            let index = cursor.u8_at(2).unwrap_or(0);
            let name = match index.checked_sub(1) {
                Some(i) if (i as usize) < PERSONAL_REMINDER_NAMES.len() => {
                    PERSONAL_REMINDER_NAMES[i as usize]
                }
                _ => "~",
            };
            list_item = Some(name);
            substitute(template.message, &[name.to_string(), format_clock(minutes)])
        }
        AlarmData::DayList => {
            const DAYS: [&str; 3] = ["One day", "Two days", "Three days"];
            let index = cursor.u8_at(0).unwrap_or(0);
            let name = match index.checked_sub(1) {
                Some(i) if (i as usize) < DAYS.len() => DAYS[i as usize],
                _ => "~",
            };
            list_item = Some(name);
            substitute(template.message, &[name.to_string()])
        }
        AlarmData::Glucose => {
            let bg = cursor.u16_be_at(0x01).unwrap_or(0x0300);
            if bg < 0x0300 {
                glucose = Some(bg);
                let mmol = (bg as f64 / MMOL_FACTOR * 10.0).round() / 10.0;
                substitute(template.message, &[bg.to_string(), mmol.to_string()])
            } else {
                return AlarmDetail {
                    code,
                    alarm_type: Some(template.alarm_type),
                    priority: Some(template.priority),
                    text: "[Error data]".to_string(),
                    insulin: None,
                    clock_minutes: None,
                    glucose: None,
                    list_item: None,
                };
            }
        }
    };

    AlarmDetail {
        code,
        alarm_type: Some(template.alarm_type),
        priority: Some(template.priority),
        text: format!("{}, {}: {}", template.alarm_type, template.priority, message),
        insulin,
        clock_minutes: clock,
        glucose,
        list_item,
    }
}

/// An alarm firing on the pump.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmNotification(pub(crate) HistoryRecord);

impl AlarmNotification {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn fault_number(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0B)
    }

    pub fn notification_mode(&self) -> Result<u8, CnlError> {
        self.0.cursor().u8_at(0x11)
    }

    pub fn extra_data(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x12)? & 2 == 2)
    }

    pub fn alarm_history(&self) -> Result<bool, CnlError> {
        Ok(self.0.cursor().u8_at(0x12)? & 4 == 4)
    }

    pub fn alarm_data(&self) -> Result<Bytes, CnlError> {
        Ok(Bytes::copy_from_slice(self.0.cursor().bytes_at(0x13, 10)?))
    }

    pub fn details(&self, table: &[AlarmTemplate]) -> Result<AlarmDetail, CnlError> {
        Ok(resolve_alarm(table, self.fault_number()?, &self.alarm_data()?))
    }
}

/// The user acknowledging an alarm.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmCleared(pub(crate) HistoryRecord);

impl AlarmCleared {
    pub fn record(&self) -> &HistoryRecord {
        &self.0
    }

    pub fn fault_number(&self) -> Result<u16, CnlError> {
        self.0.cursor().u16_be_at(0x0B)
    }
}
