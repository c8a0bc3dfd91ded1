//! # devicestat-core
//!
//! **Point-in-time device telemetry from procfs, sysfs and diagnostic dumps.**
//!
//! `devicestat-core` samples CPU, GPU, memory, battery, display and system
//! state on Android-style Linux devices and resolves the application in the
//! foreground. It performs no I/O beyond reading files and running short
//! diagnostic commands; serving the results is left to `devicestat-server`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use devicestat_core::{MonitorConfig, SystemMonitor};
//!
//! let monitor = SystemMonitor::new(MonitorConfig::default());
//!
//! // The first CPU sample has no previous snapshot to diff against.
//! let _ = monitor.cpu();
//! std::thread::sleep(std::time::Duration::from_millis(500));
//! let cpu = monitor.cpu();
//! println!("{}", serde_json::to_string_pretty(&cpu).unwrap());
//! ```
//!
//! ## Architecture
//!
//! Source reader → samplers (probe chains, delta state) → aggregator → JSON
//!
//! - [`SourceReader`] and [`CommandRunner`] are the only ways samplers touch
//!   the device. Both are injectable, so tests run against a temp directory
//!   and canned command output.
//! - [`ProbeChain`] walks an ordered list of vendor backends and keeps the
//!   first one that yields any field.
//! - [`CpuSampler`] holds the single piece of shared mutable state: the
//!   previous `/proc/stat` snapshot, replaced atomically on every sample.
//! - [`ForegroundResolver`] chains a dump-parsing strategy and a registry
//!   query, then augments the result through an [`ApplicationDirectory`].
//! - [`SystemMonitor`] composes everything and contains per-section failures.
//!
//! Values that could not be observed are [`Metric::Unknown`], never zero.

pub mod battery;
pub mod config;
pub mod cpu;
pub mod display;
pub mod error;
pub mod foreground;
pub mod gpu;
pub mod icon;
pub mod memory;
pub mod metric;
pub mod monitor;
pub mod platform;
pub mod probe;
pub mod reader;
pub mod system;

pub use battery::{BatteryInfo, BatterySampler, battery_power};
pub use config::{DEFAULT_COMMAND_TIMEOUT, MonitorConfig, MonitorConfigBuilder};
pub use cpu::{CoreInfo, CounterSnapshot, CpuInfo, CpuSampler, CpuTimes, CpuUsage, usage_between};
pub use display::{DisplayInfo, DisplaySampler, FrameTimings};
pub use error::{LookupError, SampleError};
pub use foreground::{
    ActivityDumpStrategy, ForegroundIdentity, ForegroundResolver, ForegroundStrategy,
    RegistryStrategy, parse_activity_dump,
};
pub use gpu::{GPU_BACKENDS, GPU_CHAIN, GpuInfo, GpuSampler};
pub use icon::{Bitmap, Canvas, DEFAULT_ICON_SIZE, Drawable, Icon, icon_to_base64};
pub use memory::{MemoryInfo, MemorySampler};
pub use metric::{Metric, UNKNOWN};
pub use monitor::{SECTION_NAMES, SERVICE_NAME, StatusInfo, Summary, SystemMonitor};
pub use platform::{
    AppIdentity, ApplicationDirectory, ComponentName, ProcessEntry, RegistryService,
    ShellDirectory, ShellRegistry,
};
pub use probe::{ProbeChain, ProbeOutcome, VendorSource};
pub use reader::{CommandRunner, SourceReader, StaticCommands, SystemCommandRunner};
pub use system::{SystemInfo, SystemSampler};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
