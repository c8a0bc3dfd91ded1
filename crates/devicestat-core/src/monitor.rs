//! Snapshot aggregator.
//!
//! [`SystemMonitor`] owns one instance of every sampler and composes their
//! output into named sections. The only state it carries is the CPU sampler's
//! previous snapshot; everything else is sampled fresh on each call.
//!
//! Each section is computed inside a containment boundary: an error or a panic
//! in one sampler becomes an `{"error": ..., "timestamp": ...}` object for that
//! section only and never aborts its siblings.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::battery::{BatteryInfo, BatterySampler};
use crate::config::MonitorConfig;
use crate::cpu::{CpuInfo, CpuSampler};
use crate::display::{DisplayInfo, DisplaySampler};
use crate::error::SampleError;
use crate::foreground::{ForegroundIdentity, ForegroundResolver};
use crate::gpu::{GpuInfo, GpuSampler};
use crate::memory::{MemoryInfo, MemorySampler};
use crate::metric::{Metric, unix_ms_now};
use crate::system::{SystemInfo, SystemSampler};

/// Service name reported by the liveness section.
pub const SERVICE_NAME: &str = "devicestat";

/// Every section name [`SystemMonitor::section`] accepts.
pub const SECTION_NAMES: &[&str] = &[
    "status",
    "cpu",
    "gpu",
    "memory",
    "battery",
    "display",
    "system",
    "current-app",
    "summary",
    "all",
];

/// Liveness payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: u64,
}

/// Headline numbers from every section.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub cpu_usage: Metric<f64>,
    pub cpu_temperature: Metric<f64>,
    pub gpu_usage: Metric<f64>,
    pub memory_usage_ratio: Metric<f64>,
    pub battery_level: Metric<i64>,
    /// Watts.
    pub battery_power: Metric<f64>,
    pub foreground_package: Metric<String>,
    /// Milliseconds since boot.
    pub uptime: Metric<u64>,
    pub timestamp: u64,
}

pub struct SystemMonitor {
    cpu: CpuSampler,
    gpu: GpuSampler,
    memory: MemorySampler,
    battery: BatterySampler,
    system: SystemSampler,
    display: DisplaySampler,
    foreground: Arc<ForegroundResolver>,
}

impl SystemMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let reader = config.reader();
        let foreground = Arc::new(ForegroundResolver::new(&config));
        log::debug!("monitor configured: {config:?}");
        Self {
            cpu: CpuSampler::new(reader.clone()),
            gpu: GpuSampler::new(reader.clone()),
            memory: MemorySampler::new(reader.clone(), config.storage_path.clone()),
            battery: BatterySampler::new(reader.clone(), config.commands.clone()),
            system: SystemSampler::new(reader, config.commands.clone()),
            display: DisplaySampler::new(config.commands.clone(), foreground.clone()),
            foreground,
        }
    }

    // -----------------------------------------------------------------------
    // Typed sections
    // -----------------------------------------------------------------------

    pub fn cpu(&self) -> CpuInfo {
        self.cpu.sample()
    }

    pub fn gpu(&self) -> GpuInfo {
        self.gpu.sample()
    }

    pub fn memory(&self) -> MemoryInfo {
        self.memory.sample()
    }

    pub fn battery(&self) -> BatteryInfo {
        self.battery.sample()
    }

    pub fn display(&self) -> DisplayInfo {
        self.display.sample()
    }

    pub fn system(&self) -> SystemInfo {
        self.system.sample()
    }

    /// Foreground application with icon.
    pub fn current_app(&self) -> ForegroundIdentity {
        self.foreground.resolve()
    }

    pub fn status(&self) -> StatusInfo {
        StatusInfo {
            status: "running",
            service: SERVICE_NAME,
            version: crate::VERSION,
            timestamp: unix_ms_now(),
        }
    }

    /// The CPU sampler, shared by every request.
    pub fn cpu_sampler(&self) -> &CpuSampler {
        &self.cpu
    }

    // -----------------------------------------------------------------------
    // Composite views
    // -----------------------------------------------------------------------

    /// Every sampled section under its own key.
    pub fn all(&self) -> Value {
        let mut map = Map::new();
        map.insert("cpu".into(), contained(guarded("cpu", || self.cpu())));
        map.insert("gpu".into(), contained(guarded("gpu", || self.gpu())));
        map.insert("memory".into(), contained(guarded("memory", || self.memory())));
        map.insert("battery".into(), contained(guarded("battery", || self.battery())));
        map.insert("display".into(), contained(guarded("display", || self.display())));
        map.insert("system".into(), contained(guarded("system", || self.system())));
        map.insert("timestamp".into(), json!(unix_ms_now()));
        Value::Object(map)
    }

    pub fn summary(&self) -> Summary {
        let cpu = guarded("cpu", || self.cpu()).ok();
        let gpu = guarded("gpu", || self.gpu()).ok();
        let memory = guarded("memory", || self.memory()).ok();
        let battery = guarded("battery", || self.battery()).ok();
        let foreground = guarded("current-app", || self.foreground.resolve_component())
            .ok()
            .flatten();
        let uptime = guarded("system", || self.system.uptime_ms()).unwrap_or_default();

        Summary {
            cpu_usage: cpu.as_ref().map_or(Metric::Unknown, |c| c.current_usage),
            cpu_temperature: cpu.as_ref().map_or(Metric::Unknown, |c| c.temperature),
            gpu_usage: gpu.as_ref().map_or(Metric::Unknown, |g| g.usage),
            memory_usage_ratio: memory.as_ref().map_or(Metric::Unknown, |m| m.memory_usage_ratio),
            battery_level: battery.as_ref().map_or(Metric::Unknown, |b| b.level),
            battery_power: battery.as_ref().map_or(Metric::Unknown, |b| Metric::Known(b.power)),
            foreground_package: foreground.map(|(component, _)| component.package).into(),
            uptime,
            timestamp: unix_ms_now(),
        }
    }

    /// One section by name, as JSON.
    ///
    /// A panic inside the sampler is returned as [`SampleError::Panicked`];
    /// an unknown name as [`SampleError::Unavailable`].
    pub fn section(&self, name: &str) -> Result<Value, SampleError> {
        let value = match name {
            "status" => serde_json::to_value(self.status())?,
            "cpu" => serde_json::to_value(guarded(name, || self.cpu())?)?,
            "gpu" => serde_json::to_value(guarded(name, || self.gpu())?)?,
            "memory" => serde_json::to_value(guarded(name, || self.memory())?)?,
            "battery" => serde_json::to_value(guarded(name, || self.battery())?)?,
            "display" => serde_json::to_value(guarded(name, || self.display())?)?,
            "system" => serde_json::to_value(guarded(name, || self.system())?)?,
            "current-app" | "current" => serde_json::to_value(guarded(name, || self.current_app())?)?,
            "summary" => serde_json::to_value(guarded(name, || self.summary())?)?,
            "all" => self.all(),
            other => return Err(SampleError::Unavailable(format!("unknown section: {other}"))),
        };
        Ok(value)
    }
}

// ---------------------------------------------------------------------------
// Containment
// ---------------------------------------------------------------------------

/// Run `f`, turning a panic into [`SampleError::Panicked`].
fn guarded<T>(section: &str, f: impl FnOnce() -> T) -> Result<T, SampleError> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload.as_ref());
        log::error!("{section} sampler panicked: {message}");
        SampleError::Panicked(message)
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Section value, or a section-scoped error object.
fn contained<T: Serialize>(result: Result<T, SampleError>) -> Value {
    let error = match result.and_then(|v| serde_json::to_value(v).map_err(SampleError::from)) {
        Ok(value) => return value,
        Err(e) => e,
    };
    json!({ "error": error.to_string(), "timestamp": unix_ms_now() })
}
