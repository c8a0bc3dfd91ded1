//! Print every telemetry section once.
//!
//! Takes two CPU samples half a second apart so the usage delta is populated,
//! then prints the merged view as pretty JSON.
//!
//! Run: `cargo run --example snapshot`

use std::time::Duration;

use devicestat_core::{MonitorConfig, SystemMonitor};

fn main() {
    let monitor = SystemMonitor::new(MonitorConfig::default());

    // Prime the CPU delta sampler
    let _ = monitor.cpu();
    std::thread::sleep(Duration::from_millis(500));

    let all = monitor.all();
    match serde_json::to_string_pretty(&all) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("encode failed: {e}"),
    }

    let summary = monitor.summary();
    println!(
        "\ncpu {:?}%  mem ratio {:?}  battery {:?}%  foreground {:?}",
        summary.cpu_usage.known(),
        summary.memory_usage_ratio.known(),
        summary.battery_level.known(),
        summary.foreground_package.known(),
    );
}
