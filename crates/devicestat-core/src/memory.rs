//! Memory pressure from `/proc/meminfo`, plus storage capacity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::metric::{Metric, round_to, unix_ms_now};
use crate::reader::SourceReader;

/// Page size assumed by the low-memory-killer `minfree` levels.
const LMK_PAGE_BYTES: u64 = 4096;

/// Parse a `Key:   value [unit]` block into kB values keyed by name.
pub fn parse_meminfo(text: &str) -> HashMap<String, u64> {
    text.lines()
        .filter_map(|line| {
            let (key, rest) = line.split_once(':')?;
            let value = rest.split_whitespace().next()?.parse().ok()?;
            Some((key.trim().to_string(), value))
        })
        .collect()
}

/// Capacity of the filesystem holding a path, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageStats {
    pub total: u64,
    pub available: u64,
}

#[cfg(unix)]
pub fn storage_stats(path: &Path) -> Option<StorageStats> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    // SAFETY: `statvfs` is plain old data; all-zero is a valid bit pattern.
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: `c_path` is NUL-terminated and `st` is a valid out-pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        log::debug!(
            "statvfs({}) failed: {}",
            path.display(),
            std::io::Error::last_os_error()
        );
        return None;
    }
    let fragment = if st.f_frsize > 0 {
        st.f_frsize as u64
    } else {
        st.f_bsize as u64
    };
    Some(StorageStats {
        total: (st.f_blocks as u64).saturating_mul(fragment),
        available: (st.f_bavail as u64).saturating_mul(fragment),
    })
}

#[cfg(not(unix))]
pub fn storage_stats(_path: &Path) -> Option<StorageStats> {
    None
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    /// Bytes.
    pub total_memory: Metric<u64>,
    pub available_memory: Metric<u64>,
    pub used_memory: Metric<u64>,
    pub free_memory: Metric<u64>,
    pub buffers: Metric<u64>,
    pub cached: Metric<u64>,
    pub swap_total: Metric<u64>,
    pub swap_free: Metric<u64>,
    pub swap_cached: Metric<u64>,
    /// `used / total`, 0 when total is 0.
    pub memory_usage_ratio: Metric<f64>,
    /// Ratio as a percentage, two decimals.
    pub usage_percent: Metric<f64>,
    /// Low-memory-killer threshold in bytes.
    pub threshold: Metric<u64>,
    pub low_memory: Metric<bool>,
    pub total_storage: Metric<u64>,
    pub available_storage: Metric<u64>,
    pub used_storage: Metric<u64>,
    pub timestamp: u64,
}

/// Stateless memory sampler.
#[derive(Debug, Clone)]
pub struct MemorySampler {
    reader: SourceReader,
    storage_path: PathBuf,
}

impl MemorySampler {
    pub fn new(reader: SourceReader, storage_path: impl Into<PathBuf>) -> Self {
        Self {
            reader,
            storage_path: storage_path.into(),
        }
    }

    /// Last (highest) `minfree` level, converted from pages to bytes.
    fn lmk_threshold(&self) -> Metric<u64> {
        self.reader
            .read_sys("module/lowmemorykiller/parameters/minfree")
            .and_then(|text| {
                text.split(',')
                    .filter_map(|v| v.trim().parse::<u64>().ok())
                    .last()
            })
            .map(|pages| pages.saturating_mul(LMK_PAGE_BYTES))
            .into()
    }

    pub fn sample(&self) -> MemoryInfo {
        let kb = self
            .reader
            .read_proc("meminfo")
            .map(|t| parse_meminfo(&t))
            .unwrap_or_default();
        let bytes = |key: &str| -> Metric<u64> {
            kb.get(key).map(|v| v.saturating_mul(1024)).into()
        };

        let total = bytes("MemTotal");
        let free = bytes("MemFree");
        let buffers = bytes("Buffers");
        let cached = bytes("Cached");
        // Pre-3.14 kernels have no MemAvailable.
        let available = bytes("MemAvailable")
            .or_else(|| free.map(|f| f + buffers.unwrap_or(0) + cached.unwrap_or(0)));

        let used = match (total, available) {
            (Metric::Known(t), Metric::Known(a)) => Metric::Known(t.saturating_sub(a)),
            _ => Metric::Unknown,
        };
        let ratio = match (total, used) {
            (Metric::Known(0), _) => Metric::Known(0.0),
            (Metric::Known(t), Metric::Known(u)) => Metric::Known(u as f64 / t as f64),
            _ => Metric::Unknown,
        };

        let threshold = self.lmk_threshold();
        let low_memory = match (available, threshold) {
            (Metric::Known(a), Metric::Known(t)) => Metric::Known(a <= t),
            _ => Metric::Unknown,
        };

        let storage = storage_stats(&self.storage_path);

        MemoryInfo {
            total_memory: total,
            available_memory: available,
            used_memory: used,
            free_memory: free,
            buffers,
            cached,
            swap_total: bytes("SwapTotal"),
            swap_free: bytes("SwapFree"),
            swap_cached: bytes("SwapCached"),
            memory_usage_ratio: ratio,
            usage_percent: ratio.map(|r| round_to(r * 100.0, 2)),
            threshold,
            low_memory,
            total_storage: storage.map(|s| s.total).into(),
            available_storage: storage.map(|s| s.available).into(),
            used_storage: storage.map(|s| s.total.saturating_sub(s.available)).into(),
            timestamp: unix_ms_now(),
        }
    }
}
