pub mod routes;
pub mod serve;
pub mod snapshot;

use devicestat_core::{MonitorConfig, SystemMonitor};

use crate::DeviceArgs;

/// Install the `env_logger` sink. `RUST_LOG` sets the filter; `--verbose`
/// raises it to debug.
pub fn init_logger(verbose: bool) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp_millis().init();
}

/// Build a monitor over the device roots given on the command line.
pub fn make_monitor(device: &DeviceArgs) -> SystemMonitor {
    let mut builder = MonitorConfig::builder()
        .proc_root(&device.proc_root)
        .sys_root(&device.sys_root);
    if let Some(path) = &device.storage_path {
        builder = builder.storage_path(path);
    }
    SystemMonitor::new(builder.build())
}
