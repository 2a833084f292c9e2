//! Shared name tables and unit enums for history events.

use num_enum::{FromPrimitive, IntoPrimitive};
use strum_macros::Display;

/// mg/dL to mmol/L conversion factor.
pub const MMOL_FACTOR: f64 = 18.016;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum BgUnits {
    #[strum(serialize = "mg/dL")]
    MgDl = 0,
    #[strum(serialize = "mmol/L")]
    #[num_enum(default)]
    MmolL = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum CarbUnits {
    Grams = 0,
    #[num_enum(default)]
    Exchanges = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum BgSource {
    #[strum(serialize = "External meter")]
    ExternalMeter = 1,
    #[strum(serialize = "Bolus wizard")]
    BolusWizard = 2,
    #[strum(serialize = "BG event marker")]
    BgEventMarker = 3,
    #[strum(serialize = "Sensor calibration")]
    SensorCal = 4,
    #[num_enum(catch_all)]
    #[strum(serialize = "NA")]
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum BolusSource {
    Manual = 0,
    #[strum(serialize = "Bolus wizard")]
    BolusWizard = 1,
    #[strum(serialize = "Easy bolus")]
    EasyBolus = 2,
    #[strum(serialize = "Preset bolus")]
    PresetBolus = 4,
    #[strum(serialize = "Closed loop micro bolus")]
    ClosedLoopMicroBolus = 5,
    #[strum(serialize = "Closed loop BG correction")]
    ClosedLoopBgCorrection = 6,
    #[strum(serialize = "Closed loop food bolus")]
    ClosedLoopFoodBolus = 7,
    #[strum(serialize = "Closed loop BG correction and food bolus")]
    ClosedLoopBgCorrectionAndFoodBolus = 8,
    #[num_enum(catch_all)]
    #[strum(serialize = "NA")]
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum TempBasalType {
    #[strum(serialize = "Insulin units")]
    Absolute = 0,
    #[num_enum(default)]
    #[strum(serialize = "Percentage")]
    Percent = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum DualBolusPart {
    Off = 0,
    #[strum(serialize = "Normal bolus")]
    NormalBolus = 1,
    #[strum(serialize = "Square wave")]
    SquareWave = 2,
    #[strum(serialize = "Dual wave")]
    DualWave = 5,
    #[num_enum(catch_all)]
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum BolusStepSize {
    #[strum(serialize = "Step 0.025")]
    Step0_025 = 0,
    #[strum(serialize = "Step 0.05")]
    Step0_05 = 1,
    #[strum(serialize = "Step 0.1")]
    Step0_1 = 2,
    #[num_enum(catch_all)]
    #[strum(serialize = "NA")]
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum SuspendReason {
    #[strum(serialize = "Alarm suspend")]
    AlarmSuspend = 1,
    #[strum(serialize = "User suspend")]
    UserSuspend = 2,
    #[strum(serialize = "Auto suspend")]
    AutoSuspend = 3,
    #[strum(serialize = "Low glucose suspend")]
    LowSgSuspend = 4,
    #[strum(serialize = "Set change suspend")]
    SetChangeSuspend = 5,
    #[strum(serialize = "Predicted low glucose suspend")]
    PlgmPredictedLowSg = 10,
    #[num_enum(catch_all)]
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum ResumeReason {
    #[strum(serialize = "User resumed")]
    UserSelectsResume = 1,
    #[strum(serialize = "User cleared alarm")]
    UserClearsAlarm = 2,
    #[strum(serialize = "Low glucose manual resume")]
    LgmManualResume = 3,
    #[strum(serialize = "Low glucose auto resume - max suspend period")]
    LgmAutoResumeMaxSuspend = 4,
    #[strum(serialize = "Low glucose auto resume - preset glucose reached")]
    LgmAutoResumePresetGlucose = 5,
    #[strum(serialize = "Low glucose manual resume via disable")]
    LgmManualResumeViaDisable = 6,
    #[num_enum(catch_all)]
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum AudioMode {
    Sound = 0,
    Vibration = 1,
    #[strum(serialize = "Sound+Vibration")]
    SoundVibration = 2,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Cannula fill operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive, Display)]
#[repr(u8)]
pub enum CannulaFillType {
    #[strum(serialize = "Tubing fill")]
    TubingFill = 0,
    #[num_enum(default)]
    #[strum(serialize = "Cannula fill")]
    CannulaFill = 1,
}

/// The pump's eight named basal patterns.
pub fn basal_pattern_name(number: u8) -> &'static str {
    match number {
        1 => "Pattern 1",
        2 => "Pattern 2",
        3 => "Pattern 3",
        4 => "Pattern 4",
        5 => "Pattern 5",
        6 => "Workday",
        7 => "Day Off",
        8 => "Sick Day",
        _ => "Unknown",
    }
}

pub fn temp_basal_preset_name(number: u8) -> &'static str {
    match number {
        0 => "Manual",
        1 => "Temp 1",
        2 => "Temp 2",
        3 => "Temp 3",
        4 => "Temp 4",
        5 => "High Activity",
        6 => "Moderate Activity",
        7 => "Low Activity",
        8 => "Sick",
        _ => "Unknown",
    }
}

pub fn bolus_preset_name(number: u8) -> &'static str {
    match number {
        0 => "Manual",
        1 => "Bolus 1",
        2 => "Bolus 2",
        3 => "Bolus 3",
        4 => "Bolus 4",
        5 => "Breakfast",
        6 => "Lunch",
        7 => "Dinner",
        8 => "Snack",
        _ => "NA",
    }
}

pub fn pump_language_name(number: u8) -> &'static str {
    match number {
        0 => "English",
        1 => "Arabic",
        2 => "Chinese",
        3 => "Czech",
        4 => "Danish",
        5 => "Dutch",
        6 => "Finnish",
        7 => "French",
        8 => "German",
        9 => "Greek",
        10 => "Hebrew",
        11 => "Hungarian",
        12 => "Italian",
        13 => "Japanese",
        14 => "Korean",
        15 => "Norwegian",
        16 => "Polish",
        17 => "Portuguese",
        18 => "Russian",
        19 => "Slovak",
        20 => "Slovenian",
        21 => "Spanish",
        22 => "Swedish",
        23 => "Turkish",
        _ => "Unknown",
    }
}

pub const PERSONAL_REMINDER_NAMES: [&str; 8] = [
    "Personal 1",
    "Personal 2",
    "Personal 3",
    "Personal 4",
    "Personal 5",
    "Personal 6",
    "BG Check",
    "Medication",
];

pub const MISSED_MEAL_BOLUS_REMINDER_NAMES: [&str; 8] = [
    "Meal 1", "Meal 2", "Meal 3", "Meal 4", "Meal 5", "Meal 6", "Meal 7", "Meal 8",
];

/// Sensor exception codes carried in the glucose field when it is >= 0x300
/// (0x0000 doubles as "lost connection").
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u16)]
pub enum SensorException {
    LostConnection = 0x0000,
    SensorOk = 0x0300,
    WarmingUp = 0x0301,
    CalibrateNow = 0x0302,
    Updating = 0x0303,
    CalibrationError = 0x0304,
    ChangeSensor = 0x0305,
    Expired = 0x0306,
    NotReady = 0x0307,
    ReadingTooHigh = 0x0308,
    ReadingTooLow = 0x0309,
    Calibrating = 0x030A,
    CalibratingErrorChangeSensor = 0x030B,
    TimeUnknown = 0x030C,
    #[num_enum(catch_all)]
    Unknown(u16),
}

impl SensorException {
    pub fn text(&self) -> &'static str {
        match self {
            SensorException::LostConnection => "Lost connection to sensor",
            SensorException::SensorOk => "Sensor OK",
            SensorException::WarmingUp => "Sensor warming up",
            SensorException::CalibrateNow => "Calibrate sensor now",
            SensorException::Updating => "Updating sensor",
            SensorException::CalibrationError => "Calibration error",
            SensorException::ChangeSensor => "Change sensor",
            SensorException::Expired => "Sensor expired",
            SensorException::NotReady => "Sensor not ready",
            SensorException::ReadingTooHigh => "Sensor reading too high",
            SensorException::ReadingTooLow => "Sensor reading too low",
            SensorException::Calibrating => "Calibrating sensor",
            SensorException::CalibratingErrorChangeSensor => "Calibrating error - Change sensor",
            SensorException::TimeUnknown => "Time unknown",
            SensorException::Unknown(_) => "Unknown sensor exception",
        }
    }
}
