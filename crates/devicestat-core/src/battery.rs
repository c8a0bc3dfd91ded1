//! Battery state merged from `dumpsys battery` and `power_supply` sysfs.
//!
//! The dump is the baseline. Direct properties from sysfs override `current`,
//! `capacity` and `chargeCounter` only where the dump left them absent or zero.
//! When the dump is unavailable altogether, the baseline fields are read from
//! `/sys/class/power_supply/battery` instead.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::metric::{Metric, round_to, unix_ms_now};
use crate::reader::{CommandRunner, SourceReader, parse_first_i64};

const SUPPLY_DIR: &str = "class/power_supply";

const CURRENT_CANDIDATES: &[&str] = &["battery/current_now", "bms/current_now", "usb/current_now"];
const CAPACITY_CANDIDATES: &[&str] = &[
    "battery/charge_full",
    "bms/charge_full",
    "battery/charge_full_design",
];
const CHARGE_COUNTER_CANDIDATES: &[&str] = &["battery/charge_counter", "bms/charge_counter"];

// BatteryManager constants.
pub const STATUS_UNKNOWN: i64 = 1;
pub const STATUS_CHARGING: i64 = 2;
pub const STATUS_DISCHARGING: i64 = 3;
pub const STATUS_NOT_CHARGING: i64 = 4;
pub const STATUS_FULL: i64 = 5;

pub const PLUGGED_AC: i64 = 1;
pub const PLUGGED_USB: i64 = 2;
pub const PLUGGED_WIRELESS: i64 = 4;
pub const PLUGGED_DOCK: i64 = 8;

pub fn status_text(code: i64) -> &'static str {
    match code {
        STATUS_CHARGING => "Charging",
        STATUS_DISCHARGING => "Discharging",
        STATUS_NOT_CHARGING => "Not charging",
        STATUS_FULL => "Full",
        _ => "Unknown",
    }
}

pub fn health_text(code: i64) -> &'static str {
    match code {
        2 => "Good",
        3 => "Overheat",
        4 => "Dead",
        5 => "Over voltage",
        6 => "Unspecified failure",
        7 => "Cold",
        _ => "Unknown",
    }
}

pub fn plugged_text(code: i64) -> &'static str {
    match code {
        0 => "Unplugged",
        PLUGGED_AC => "AC",
        PLUGGED_USB => "USB",
        PLUGGED_WIRELESS => "Wireless",
        PLUGGED_DOCK => "Dock",
        _ => "Unknown",
    }
}

/// Map a sysfs `status` string to its BatteryManager code.
fn status_code(text: &str) -> i64 {
    match text.trim().to_ascii_lowercase().as_str() {
        "charging" => STATUS_CHARGING,
        "discharging" => STATUS_DISCHARGING,
        "not charging" => STATUS_NOT_CHARGING,
        "full" => STATUS_FULL,
        _ => STATUS_UNKNOWN,
    }
}

/// Map a sysfs `health` string to its BatteryManager code.
fn health_code(text: &str) -> i64 {
    match text.trim().to_ascii_lowercase().as_str() {
        "good" => 2,
        "overheat" | "hot" => 3,
        "dead" => 4,
        "over voltage" | "overvoltage" => 5,
        "unspecified failure" => 6,
        "cold" => 7,
        _ => 1,
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Raw fields from one source, in source units.
#[derive(Debug, Clone, Default, PartialEq)]
struct BatteryFields {
    level: Option<i64>,
    scale: Option<i64>,
    /// mV.
    voltage: Option<i64>,
    /// Tenths of a degree Celsius.
    temperature: Option<i64>,
    technology: Option<String>,
    health: Option<i64>,
    status: Option<i64>,
    plugged: Option<i64>,
    present: Option<bool>,
    /// µA.
    current: Option<i64>,
    /// µAh.
    capacity: Option<i64>,
    /// µAh.
    charge_counter: Option<i64>,
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parse `dumpsys battery` output.
fn parse_dump(text: &str) -> BatteryFields {
    let map: HashMap<&str, &str> = text
        .lines()
        .filter_map(|line| {
            let (k, v) = line.split_once(':')?;
            Some((k.trim(), v.trim()))
        })
        .collect();
    let int = |key: &str| map.get(key).and_then(|v| parse_first_i64(v));
    let flag = |key: &str| map.get(key).and_then(|v| parse_bool(v));

    let plugged = int("plugged").or_else(|| {
        let sources = [
            ("AC powered", PLUGGED_AC),
            ("USB powered", PLUGGED_USB),
            ("Wireless powered", PLUGGED_WIRELESS),
            ("Dock powered", PLUGGED_DOCK),
        ];
        let seen = sources.iter().any(|(key, _)| map.contains_key(key));
        seen.then(|| {
            sources
                .iter()
                .find(|(key, _)| flag(key) == Some(true))
                .map_or(0, |(_, code)| *code)
        })
    });

    BatteryFields {
        level: int("level"),
        scale: int("scale"),
        voltage: int("voltage"),
        temperature: int("temperature"),
        technology: map
            .get("technology")
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty()),
        health: int("health"),
        status: int("status"),
        plugged,
        present: flag("present"),
        current: int("current now"),
        capacity: None,
        charge_counter: int("Charge counter"),
    }
}

/// Fill `slot` from `fallback` when it is absent or zero.
fn override_if_empty(slot: &mut Option<i64>, fallback: Option<i64>) {
    if matches!(slot, None | Some(0)) && fallback.is_some() {
        *slot = fallback;
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryInfo {
    /// Percent.
    pub level: Metric<i64>,
    pub scale: Metric<i64>,
    /// Full charge capacity, µAh.
    pub capacity: Metric<i64>,
    /// mV.
    pub voltage: Metric<i64>,
    /// Instantaneous current, µA (negative while discharging on most devices).
    pub current: Metric<i64>,
    /// Degrees Celsius.
    pub temperature: Metric<f64>,
    pub technology: Metric<String>,
    /// µAh.
    pub charge_counter: Metric<i64>,
    pub health: Metric<i64>,
    pub health_text: String,
    pub status: Metric<i64>,
    pub status_text: String,
    pub plugged: Metric<i64>,
    pub plugged_text: String,
    pub present: Metric<bool>,
    /// Watts; 0 when voltage or current is missing.
    pub power: f64,
    /// Which baseline source was used: `dumpsys` or `sysfs`.
    pub source: String,
    pub timestamp: u64,
}

/// `|V × A|` from mV and µA. Zero when either input is missing.
pub fn battery_power(voltage_mv: Option<i64>, current_ua: Option<i64>) -> f64 {
    match (voltage_mv, current_ua) {
        (Some(mv), Some(ua)) => {
            let watts = (mv as f64 / 1000.0 * ua as f64 / 1_000_000.0).abs();
            if watts.is_finite() { round_to(watts, 3) } else { 0.0 }
        }
        _ => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Stateless battery sampler.
pub struct BatterySampler {
    reader: SourceReader,
    commands: Arc<dyn CommandRunner>,
}

impl BatterySampler {
    pub fn new(reader: SourceReader, commands: Arc<dyn CommandRunner>) -> Self {
        Self { reader, commands }
    }

    fn supply(&self, rel: &str) -> Option<String> {
        self.reader.read_sys(&format!("{SUPPLY_DIR}/{rel}"))
    }

    /// First candidate with a non-zero integer.
    fn first_nonzero(&self, candidates: &[&str]) -> Option<i64> {
        candidates
            .iter()
            .filter_map(|rel| self.supply(rel).and_then(|t| parse_first_i64(&t)))
            .find(|v| *v != 0)
    }

    /// Baseline from `power_supply/battery` when no dump is available.
    fn sysfs_baseline(&self) -> BatteryFields {
        let int = |rel: &str| self.supply(rel).and_then(|t| parse_first_i64(&t));
        BatteryFields {
            level: int("battery/capacity"),
            voltage: int("battery/voltage_now").map(|uv| uv / 1000),
            temperature: int("battery/temp"),
            technology: self.supply("battery/technology"),
            health: self.supply("battery/health").map(|t| health_code(&t)),
            status: self.supply("battery/status").map(|t| status_code(&t)),
            present: self.supply("battery/present").and_then(|t| parse_bool(&t)),
            ..BatteryFields::default()
        }
    }

    pub fn sample(&self) -> BatteryInfo {
        let (mut fields, source) = match self.commands.run("dumpsys", &["battery"]) {
            Some(text) => (parse_dump(&text), "dumpsys"),
            None => {
                log::debug!("dumpsys battery unavailable, using sysfs baseline");
                (self.sysfs_baseline(), "sysfs")
            }
        };

        override_if_empty(&mut fields.current, self.first_nonzero(CURRENT_CANDIDATES));
        override_if_empty(&mut fields.capacity, self.first_nonzero(CAPACITY_CANDIDATES));
        override_if_empty(
            &mut fields.charge_counter,
            self.first_nonzero(CHARGE_COUNTER_CANDIDATES),
        );

        let power = battery_power(fields.voltage, fields.current);
        BatteryInfo {
            level: fields.level.into(),
            scale: fields.scale.into(),
            capacity: fields.capacity.into(),
            voltage: fields.voltage.into(),
            current: fields.current.into(),
            temperature: fields.temperature.map(|t| t as f64 / 10.0).into(),
            technology: fields.technology.into(),
            charge_counter: fields.charge_counter.into(),
            health_text: health_text(fields.health.unwrap_or(0)).to_string(),
            health: fields.health.into(),
            status_text: status_text(fields.status.unwrap_or(0)).to_string(),
            status: fields.status.into(),
            plugged_text: fields
                .plugged
                .map_or("Unknown", plugged_text)
                .to_string(),
            plugged: fields.plugged.into(),
            present: fields.present.into(),
            power,
            source: source.to_string(),
            timestamp: unix_ms_now(),
        }
    }
}
