use std::time::Duration;

use crate::DeviceArgs;

/// Sections whose CPU usage needs a previous sample to diff against.
const NEEDS_PRIMING: &[&str] = &["cpu", "summary", "all"];

pub fn run(section: &str, interval_ms: u64, compact: bool, device: &DeviceArgs) {
    let monitor = super::make_monitor(device);

    if NEEDS_PRIMING.contains(&section) {
        let _ = monitor.cpu();
        std::thread::sleep(Duration::from_millis(interval_ms));
    }

    let value = match monitor.section(section) {
        Ok(value) => value,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let text = if compact {
        serde_json::to_string(&value)
    } else {
        serde_json::to_string_pretty(&value)
    };
    match text {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
