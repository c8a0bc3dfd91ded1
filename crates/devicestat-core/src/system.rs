//! Platform identity and uptime.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::metric::{Metric, unix_ms_now};
use crate::reader::{CommandRunner, SourceReader, parse_first_f64};

/// Parse `getprop` output (`[key]: [value]` per line).
pub fn parse_getprop(text: &str) -> HashMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once("]:")?;
            let key = key.trim().strip_prefix('[')?;
            let value = value.trim().strip_prefix('[')?.strip_suffix(']')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub android_version: Metric<String>,
    pub api_level: Metric<i64>,
    pub device_model: Metric<String>,
    pub device_manufacturer: Metric<String>,
    pub device_brand: Metric<String>,
    pub device_product: Metric<String>,
    pub kernel_version: Metric<String>,
    /// Milliseconds since boot.
    pub uptime: Metric<u64>,
    pub timestamp: u64,
}

pub struct SystemSampler {
    reader: SourceReader,
    commands: Arc<dyn CommandRunner>,
}

impl SystemSampler {
    pub fn new(reader: SourceReader, commands: Arc<dyn CommandRunner>) -> Self {
        Self { reader, commands }
    }

    pub fn uptime_ms(&self) -> Metric<u64> {
        self.reader
            .read_proc("uptime")
            .and_then(|t| parse_first_f64(&t))
            .filter(|secs| *secs >= 0.0)
            .map(|secs| (secs * 1000.0) as u64)
            .into()
    }

    pub fn sample(&self) -> SystemInfo {
        let props = self
            .commands
            .run("getprop", &[])
            .map(|t| parse_getprop(&t))
            .unwrap_or_default();
        let prop = |key: &str| -> Metric<String> {
            props.get(key).filter(|v| !v.is_empty()).cloned().into()
        };

        SystemInfo {
            android_version: prop("ro.build.version.release"),
            api_level: props
                .get("ro.build.version.sdk")
                .and_then(|v| v.parse().ok())
                .into(),
            device_model: prop("ro.product.model"),
            device_manufacturer: prop("ro.product.manufacturer"),
            device_brand: prop("ro.product.brand"),
            device_product: prop("ro.product.name"),
            kernel_version: self.reader.read_proc("version").into(),
            uptime: self.uptime_ms(),
            timestamp: unix_ms_now(),
        }
    }
}
