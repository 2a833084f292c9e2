mod store;
mod usb;

use std::path::PathBuf;

use chrono::{Duration, Local};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cnl24_lib::PumpDevice;
use cnl24_lib::events::{self, DEFAULT_ALARM_TABLE, HistoryEvent};
use cnl24_lib::history::HistoryDataType;

use store::JsonPairingStore;
use usb::CnlUsbTransport;

#[derive(Parser)]
#[command(name = "cnl24", about = "Read a 600-series pump through a Contour Next Link 2.4")]
struct Cli {
    /// Pairing store file (radio channel cache)
    #[arg(long, default_value = "cnl24-pairing.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Live pump status: delivery, reservoir, battery, sensor
    Status,
    /// Pump clock and drift against this machine
    Time,
    /// Pull and decode the history event log
    History {
        /// Days to look back
        #[arg(long, default_value_t = 1)]
        days: i64,
        /// Pull the sensor stream instead of the pump stream
        #[arg(long)]
        sensor: bool,
    },
    /// Bolus wizard settings: carb ratios, BG targets, sensitivity
    Settings,
    /// All eight stored basal patterns
    BasalPatterns,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut store = JsonPairingStore::open(cli.store)?;
    let transport = CnlUsbTransport::open()?;
    let mut device = PumpDevice::new(transport);

    device.connect(&mut store)?;
    println!(
        "Connected: stick {}, pump serial {}, channel {:#04x} ({}% RSSI)",
        device.session.stick_serial(),
        device.session.pump_serial(),
        device.session.radio_channel,
        device.session.radio_rssi_percent,
    );

    let result = run(&mut device, cli.command);
    device.disconnect();
    result
}

fn run(device: &mut PumpDevice<CnlUsbTransport>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => status(device),
        Command::Time => time(device),
        Command::History { days, sensor } => history(device, days, sensor),
        Command::Settings => settings(device),
        Command::BasalPatterns => basal_patterns(device),
    }
}

fn status(device: &mut PumpDevice<CnlUsbTransport>) -> anyhow::Result<()> {
    let status = device.get_pump_status()?;
    println!("Pump status:");
    println!("  Suspended: {}", status.suspended()?);
    println!("  Delivering insulin: {}", status.delivering_insulin()?);
    println!("  Temp basal active: {}", status.temp_basal_active()?);
    println!("  Current basal rate: {:.3} U/h", status.current_basal_rate()?);
    println!(
        "  Basal delivered today: {:.1} U",
        status.basal_units_delivered_today()?
    );
    println!("  Active insulin: {:.2} U", status.active_insulin()?);
    println!(
        "  Last bolus: {:.2} U at {}",
        status.last_bolus_amount()?,
        status.last_bolus_time()?
    );
    println!("  Reservoir: {:.1} U", status.insulin_units_remaining()?);
    println!("  Battery: {}%", status.battery_level_percentage()?);
    if status.cgm_active()? {
        println!("Sensor:");
        println!("  SGV: {} mg/dL at {}", status.sensor_bgl()?, status.sensor_bgl_timestamp()?);
        println!("  Trend: {:?}", status.trend_arrow()?);
        println!("  Sensor battery: {}%", status.sensor_battery_level_percentage()?);
        println!(
            "  Calibration due in: {} min",
            status.sensor_cal_minutes_remaining()?
        );
    }
    Ok(())
}

fn time(device: &mut PumpDevice<CnlUsbTransport>) -> anyhow::Result<()> {
    let response = device.get_pump_time()?;
    let pump_time = response.datetime()?;
    let drift = Local::now().signed_duration_since(pump_time);
    println!("Pump time: {pump_time}");
    println!("Time set: {}", response.time_set()?);
    println!("Drift: {} seconds", drift.num_seconds());
    Ok(())
}

fn history(
    device: &mut PumpDevice<CnlUsbTransport>,
    days: i64,
    sensor: bool,
) -> anyhow::Result<()> {
    let data_type = if sensor {
        HistoryDataType::SensorData
    } else {
        HistoryDataType::PumpData
    };
    // the pump needs its own clock offset before dates can be encoded
    device.get_pump_time()?;

    let start = Local::now() - Duration::days(days);
    let end = Local::now() + Duration::days(365);

    let info = device.get_history_info(start, end, data_type)?;
    println!(
        "History: {} bytes, {} blocks, {} .. {}",
        info.data_size()?,
        info.block_count()?,
        info.from_date()?,
        info.to_date()?,
    );

    let events = device.read_history_events(start, end, data_type)?;
    let links = events::correlate_boluses(&events);
    println!("{} events:", events.len());
    for (index, event) in events.iter().enumerate() {
        let timestamp = event
            .timestamp()
            .map(|t| t.to_string())
            .unwrap_or_else(|_| "<no timestamp>".into());
        match event {
            HistoryEvent::AlarmNotification(alarm) => {
                let detail = alarm.details(DEFAULT_ALARM_TABLE)?;
                println!("{timestamp} Alarm: {}", detail.text);
            }
            HistoryEvent::SensorGlucoseReading(reading) => {
                match reading.exception_text() {
                    Some(text) => println!("{timestamp} SGV: {text}"),
                    None => println!("{timestamp} SGV: {} mg/dL", reading.sg),
                }
            }
            other => {
                let link = &links[index];
                if link.programmed.is_some() || link.canceled.is_some() {
                    println!(
                        "{timestamp} {other:?} (programmed: {:?}, canceled: {})",
                        link.programmed,
                        link.was_canceled()
                    );
                } else {
                    println!("{timestamp} {other:?}");
                }
            }
        }
    }
    Ok(())
}

fn settings(device: &mut PumpDevice<CnlUsbTransport>) -> anyhow::Result<()> {
    let ratios = device.get_carb_ratios()?;
    println!("Carb ratios:");
    for slot in ratios.slots()? {
        println!(
            "  {:02}:{:02}  {} g/U ({} U/exchange)",
            slot.start_minutes / 60,
            slot.start_minutes % 60,
            slot.grams_per_unit,
            slot.units_per_exchange
        );
    }

    let targets = device.get_bg_targets()?;
    println!("BG targets:");
    for slot in targets.slots()? {
        println!(
            "  {:02}:{:02}  {}-{} mg/dL ({}-{} mmol/L)",
            slot.start_minutes / 60,
            slot.start_minutes % 60,
            slot.low_mgdl,
            slot.high_mgdl,
            slot.low_mmol,
            slot.high_mmol
        );
    }

    let sensitivity = device.get_sensitivity_factors()?;
    println!("Sensitivity factors:");
    for slot in sensitivity.slots()? {
        println!(
            "  {:02}:{:02}  {} mg/dL/U ({} mmol/L/U)",
            slot.start_minutes / 60,
            slot.start_minutes % 60,
            slot.isf_mgdl,
            slot.isf_mmol
        );
    }
    Ok(())
}

fn basal_patterns(device: &mut PumpDevice<CnlUsbTransport>) -> anyhow::Result<()> {
    for pattern in device.get_all_basal_patterns()? {
        println!(
            "{} ({} segments):",
            events::constants::basal_pattern_name(pattern.pattern_number),
            pattern.slots.len()
        );
        for slot in &pattern.slots {
            println!(
                "  {:02}:{:02}  {:.3} U/h",
                slot.start_minutes / 60,
                slot.start_minutes % 60,
                slot.rate
            );
        }
    }
    Ok(())
}
