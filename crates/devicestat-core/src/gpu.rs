//! GPU metrics through the vendor probe chain.

use serde::Serialize;

use crate::metric::{Metric, unix_ms_now};
use crate::probe::{FieldKind, FieldSource, FreqUnit, ProbeChain, VendorSource};
use crate::reader::SourceReader;

const ADRENO_FIELDS: &[FieldSource] = &[
    FieldSource {
        field: "currentFrequency",
        path: "class/kgsl/kgsl-3d0/gpuclk",
        kind: FieldKind::Frequency(FreqUnit::Hz),
    },
    FieldSource {
        field: "usage",
        path: "class/kgsl/kgsl-3d0/gpu_busy_percentage",
        kind: FieldKind::Percent,
    },
    FieldSource {
        field: "temperature",
        path: "class/kgsl/kgsl-3d0/temp",
        kind: FieldKind::Temperature,
    },
    FieldSource {
        field: "maxFrequency",
        path: "class/kgsl/kgsl-3d0/max_gpuclk",
        kind: FieldKind::Frequency(FreqUnit::Hz),
    },
    FieldSource {
        field: "minFrequency",
        path: "class/kgsl/kgsl-3d0/min_gpuclk",
        kind: FieldKind::Frequency(FreqUnit::Hz),
    },
    FieldSource {
        field: "model",
        path: "class/kgsl/kgsl-3d0/gpu_model",
        kind: FieldKind::Text,
    },
];

const MALI_FIELDS: &[FieldSource] = &[
    FieldSource {
        field: "currentFrequency",
        path: "devices/platform/mali/clock",
        kind: FieldKind::Frequency(FreqUnit::Hz),
    },
    FieldSource {
        field: "usage",
        path: "devices/platform/mali/utilization",
        kind: FieldKind::Percent,
    },
];

const KERNEL_GPU_FIELDS: &[FieldSource] = &[
    FieldSource {
        field: "currentFrequency",
        path: "kernel/gpu/gpu_clock",
        kind: FieldKind::Frequency(FreqUnit::MHz),
    },
    FieldSource {
        field: "usage",
        path: "kernel/gpu/gpu_busy",
        kind: FieldKind::Percent,
    },
    FieldSource {
        field: "maxFrequency",
        path: "kernel/gpu/gpu_max_clock",
        kind: FieldKind::Frequency(FreqUnit::MHz),
    },
    FieldSource {
        field: "minFrequency",
        path: "kernel/gpu/gpu_min_clock",
        kind: FieldKind::Frequency(FreqUnit::MHz),
    },
    FieldSource {
        field: "model",
        path: "kernel/gpu/gpu_model",
        kind: FieldKind::Text,
    },
];

/// Known GPU backends, highest priority first.
pub const GPU_BACKENDS: &[VendorSource] = &[
    VendorSource {
        id: "adreno",
        vendor: "Qualcomm",
        name: "Adreno GPU",
        fields: ADRENO_FIELDS,
    },
    VendorSource {
        id: "mali",
        vendor: "ARM",
        name: "Mali GPU",
        fields: MALI_FIELDS,
    },
    VendorSource {
        id: "kernel-gpu",
        vendor: "ARM",
        name: "Mali GPU",
        fields: KERNEL_GPU_FIELDS,
    },
];

pub static GPU_CHAIN: ProbeChain = ProbeChain::new("gpu", GPU_BACKENDS);

const GENERIC_VENDOR: &str = "Unknown";
const GENERIC_NAME: &str = "Generic GPU";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuInfo {
    pub name: String,
    pub vendor: String,
    /// Identifier of the backend that resolved.
    pub backend: Metric<String>,
    pub renderer: Metric<String>,
    pub version: Metric<String>,
    /// MHz.
    pub current_frequency: Metric<i64>,
    pub max_frequency: Metric<i64>,
    pub min_frequency: Metric<i64>,
    /// Percent busy.
    pub usage: Metric<f64>,
    /// Degrees Celsius.
    pub temperature: Metric<f64>,
    pub timestamp: u64,
}

/// Stateless GPU sampler.
#[derive(Debug, Clone)]
pub struct GpuSampler {
    reader: SourceReader,
    chain: &'static ProbeChain,
}

impl GpuSampler {
    pub fn new(reader: SourceReader) -> Self {
        Self::with_chain(reader, &GPU_CHAIN)
    }

    pub fn with_chain(reader: SourceReader, chain: &'static ProbeChain) -> Self {
        Self { reader, chain }
    }

    pub fn sample(&self) -> GpuInfo {
        let outcome = self.chain.resolve(&self.reader);
        let model = outcome.text("model");
        let (name, vendor, backend) = match outcome.backend() {
            Some(source) => (
                model.clone().unwrap_or(source.name.to_string()),
                source.vendor.to_string(),
                Metric::Known(source.id.to_string()),
            ),
            None => (
                GENERIC_NAME.to_string(),
                GENERIC_VENDOR.to_string(),
                Metric::Unknown,
            ),
        };

        GpuInfo {
            name,
            vendor,
            backend,
            renderer: model.clone(),
            version: model,
            current_frequency: outcome.integer("currentFrequency"),
            max_frequency: outcome.integer("maxFrequency"),
            min_frequency: outcome.integer("minFrequency"),
            usage: outcome.decimal("usage"),
            temperature: outcome.decimal("temperature"),
            timestamp: unix_ms_now(),
        }
    }
}
