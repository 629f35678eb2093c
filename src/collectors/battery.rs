use async_trait::async_trait;
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use super::command;
use super::{CollectContext, Collector};
use crate::error::CollectorError;
use crate::metrics::{BatteryHealth, BatteryReading, CollectorKind, Reading};

lazy_static! {
    static ref PMSET_BATTERY: Regex =
        Regex::new(r"(?m)^\s*-?InternalBattery.*?(\d{1,3})%;\s*([^;]+);\s*(?:(\d+):(\d{2})\s+remaining)?")
            .expect("pmset pattern");
    static ref CYCLE_COUNT: Regex = Regex::new(r"(?m)^\s*Cycle Count:\s*(\d+)").expect("cycle pattern");
    static ref CONDITION: Regex = Regex::new(r"(?m)^\s*Condition:\s*(.+?)\s*$").expect("condition pattern");
}

/// Charge state from `pmset`, wear details from `system_profiler`.
pub struct BatteryCollector;

impl BatteryCollector {
    pub fn new() -> Self {
        BatteryCollector
    }
}

impl Default for BatteryCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for BatteryCollector {
    fn kind(&self) -> CollectorKind {
        CollectorKind::Battery
    }

    fn source(&self) -> &'static str {
        "pmset"
    }

    async fn produce(&mut self, _ctx: &CollectContext) -> Result<Reading, CollectorError> {
        let output = match command::run("pmset", &["-g", "batt"]).await {
            Ok(output) => output,
            Err(err) if !cfg!(target_os = "macos") => {
                debug!("no battery source on this platform: {}", err);
                return Ok(Reading::Battery(None));
            }
            Err(err) => return Err(err),
        };

        let Some(mut reading) = parse_pmset(&output)? else {
            return Ok(Reading::Battery(None));
        };

        match command::run("system_profiler", &["SPPowerDataType"]).await {
            Ok(profile) => {
                let (cycles, health) = parse_power_profile(&profile);
                reading.cycle_count = cycles;
                reading.health = health;
            }
            Err(err) => debug!("battery health unavailable: {}", err),
        }
        Ok(Reading::Battery(Some(reading)))
    }
}

/// Parse `pmset -g batt`. `Ok(None)` means the machine has no internal
/// battery.
pub fn parse_pmset(output: &str) -> Result<Option<BatteryReading>, CollectorError> {
    if !output.contains("InternalBattery") {
        return Ok(None);
    }
    let caps = PMSET_BATTERY
        .captures(output)
        .ok_or_else(|| CollectorError::parse("unrecognised pmset battery line"))?;

    let percentage: f64 = caps[1]
        .parse()
        .map_err(|_| CollectorError::parse(format!("bad battery percentage {}", &caps[1])))?;
    let state = caps[2].trim().to_ascii_lowercase();
    let is_charging = state == "charging" || state == "finishing charge";

    let time_remaining_seconds = match (caps.get(3), caps.get(4)) {
        (Some(h), Some(m)) => {
            let hours: u64 = h.as_str().parse().unwrap_or(0);
            let minutes: u64 = m.as_str().parse().unwrap_or(0);
            let secs = hours * 3600 + minutes * 60;
            (secs > 0).then_some(secs)
        }
        _ => None,
    };

    Ok(Some(BatteryReading {
        percentage: percentage.min(100.0),
        is_charging,
        time_remaining_seconds,
        health: BatteryHealth::Unknown,
        cycle_count: 0,
    }))
}

/// Cycle count and condition from `system_profiler SPPowerDataType`.
pub fn parse_power_profile(output: &str) -> (u32, BatteryHealth) {
    let cycles = CYCLE_COUNT
        .captures(output)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);
    let health = match CONDITION.captures(output).map(|c| c[1].to_ascii_lowercase()) {
        Some(cond) if cond == "normal" => BatteryHealth::Good,
        Some(cond) if cond.contains("replace now") || cond.contains("service battery") => BatteryHealth::Poor,
        Some(cond) if cond.contains("service") || cond.contains("replace soon") => BatteryHealth::Fair,
        _ => BatteryHealth::Unknown,
    };
    (cycles, health)
}
