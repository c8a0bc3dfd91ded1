//! CPU identity, utilization, frequency and temperature.
//!
//! Utilization is derived from two successive `/proc/stat` snapshots. The
//! sampler keeps exactly one previous [`CounterSnapshot`] behind a mutex; each
//! call reads the current counters, computes the delta and stores the new
//! snapshot under one lock acquisition. Two concurrent callers therefore
//! never compute against the same previous snapshot, never see one that is
//! half replaced, and never store a reading older than the one held.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use serde::Serialize;

use crate::metric::{Metric, round_to, unix_ms_now};
use crate::reader::{SourceReader, parse_first_i64, parse_temperature};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Cumulative jiffies per time bucket for one `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTimes {
    /// Parse the numeric columns after the `cpu`/`cpuN` label. Kernels older
    /// than 2.6.11 omit `steal`, and very old ones stop after `idle`.
    fn parse_columns<'a>(mut cols: impl Iterator<Item = &'a str>) -> Option<Self> {
        let mut next = |required: bool| -> Option<u64> {
            match cols.next() {
                Some(c) => c.parse().ok(),
                None if required => None,
                None => Some(0),
            }
        };
        Some(Self {
            user: next(true)?,
            nice: next(true)?,
            system: next(true)?,
            idle: next(true)?,
            iowait: next(false)?,
            irq: next(false)?,
            softirq: next(false)?,
            steal: next(false)?,
        })
    }

    fn buckets(&self) -> [u64; 8] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
    }

    pub fn total(&self) -> u64 {
        self.buckets().iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Everything except `idle`.
    pub fn active(&self) -> u64 {
        self.total().saturating_sub(self.idle)
    }

    /// True when any bucket went backwards relative to `previous`.
    pub fn is_reset_from(&self, previous: &CpuTimes) -> bool {
        self.buckets()
            .iter()
            .zip(previous.buckets().iter())
            .any(|(cur, prev)| cur < prev)
    }
}

/// Aggregate and per-core counters captured at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub aggregate: CpuTimes,
    pub cores: BTreeMap<usize, CpuTimes>,
    pub captured_at_ms: u64,
}

impl CounterSnapshot {
    /// Parse `/proc/stat` text. `None` when the aggregate `cpu` line is missing
    /// or malformed; malformed per-core lines are skipped.
    pub fn parse(text: &str) -> Option<Self> {
        let mut aggregate = None;
        let mut cores = BTreeMap::new();
        for line in text.lines() {
            let mut cols = line.split_whitespace();
            let Some(label) = cols.next() else {
                continue;
            };
            if label == "cpu" {
                aggregate = CpuTimes::parse_columns(cols);
            } else if let Some(index) = label.strip_prefix("cpu") {
                let Ok(index) = index.parse::<usize>() else {
                    continue;
                };
                match CpuTimes::parse_columns(cols) {
                    Some(times) => {
                        cores.insert(index, times);
                    }
                    None => log::debug!("skipping malformed /proc/stat line: {line}"),
                }
            }
        }
        Some(Self {
            aggregate: aggregate?,
            cores,
            captured_at_ms: unix_ms_now(),
        })
    }
}

/// Busy percentage between two readings of the same counters.
///
/// Unknown when any bucket decreased (counter reset) or no time elapsed.
pub fn usage_between(previous: &CpuTimes, current: &CpuTimes) -> Metric<f64> {
    if current.is_reset_from(previous) {
        return Metric::Unknown;
    }
    let total_delta = current.total() - previous.total();
    if total_delta == 0 {
        return Metric::Unknown;
    }
    let active_delta = current.active().saturating_sub(previous.active());
    let pct = active_delta as f64 / total_delta as f64 * 100.0;
    Metric::finite(round_to(pct.clamp(0.0, 100.0), 2))
}

/// Utilization derived from one pair of snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuUsage {
    pub aggregate: Metric<f64>,
    /// Only cores present in both snapshots.
    pub cores: BTreeMap<usize, Metric<f64>>,
}

impl CpuUsage {
    fn between(previous: &CounterSnapshot, current: &CounterSnapshot) -> Self {
        let cores = current
            .cores
            .iter()
            .filter_map(|(index, cur)| {
                let prev = previous.cores.get(index)?;
                Some((*index, usage_between(prev, cur)))
            })
            .collect();
        Self {
            aggregate: usage_between(&previous.aggregate, &current.aggregate),
            cores,
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreInfo {
    pub core_id: usize,
    pub usage: Metric<f64>,
    /// MHz.
    pub frequency: Metric<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuInfo {
    pub model: Metric<String>,
    pub architecture: Metric<String>,
    pub core_count: usize,
    pub current_usage: Metric<f64>,
    pub cores: Vec<CoreInfo>,
    /// Degrees Celsius.
    pub temperature: Metric<f64>,
    pub max_frequency: Metric<i64>,
    pub min_frequency: Metric<i64>,
    pub timestamp: u64,
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct CpuIdentity {
    model: Option<String>,
    architecture: Option<String>,
    processors: usize,
}

fn parse_cpuinfo(text: &str) -> CpuIdentity {
    let mut model_name = None;
    let mut hardware = None;
    let mut processor_model = None;
    let mut architecture = None;
    let mut processors = BTreeSet::new();

    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "processor" => {
                processors.insert(value.to_string());
            }
            "model name" if model_name.is_none() && !value.is_empty() => {
                model_name = Some(value.to_string());
            }
            "Hardware" if !value.is_empty() => hardware = Some(value.to_string()),
            // Older ARM kernels print the core model under a capitalised key.
            "Processor" if !value.is_empty() => processor_model = Some(value.to_string()),
            "CPU architecture" if architecture.is_none() && !value.is_empty() => {
                architecture = Some(value.to_string());
            }
            _ => {}
        }
    }

    CpuIdentity {
        model: model_name.or(hardware).or(processor_model),
        architecture,
        processors: processors.len(),
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Stateful CPU sampler. Share one instance across all callers.
#[derive(Debug)]
pub struct CpuSampler {
    reader: SourceReader,
    previous: Mutex<Option<CounterSnapshot>>,
}

impl CpuSampler {
    pub fn new(reader: SourceReader) -> Self {
        Self {
            reader,
            previous: Mutex::new(None),
        }
    }

    /// Read the current counters, if `/proc/stat` is readable.
    pub fn read_counters(&self) -> Option<CounterSnapshot> {
        let text = self.reader.read_proc("stat")?;
        let snapshot = CounterSnapshot::parse(&text);
        if snapshot.is_none() {
            log::warn!("/proc/stat has no aggregate cpu line");
        }
        snapshot
    }

    /// Read `/proc/stat`, compute usage against the stored snapshot and store
    /// the new reading, all under the lock. The first call yields unknown
    /// usage; an unreadable `/proc/stat` leaves the stored snapshot alone.
    pub fn sample_usage(&self) -> CpuUsage {
        // The guarded value is replaced wholesale, so a poisoned lock still
        // holds a complete snapshot.
        let mut previous = self.previous.lock().unwrap_or_else(|e| e.into_inner());
        match self.read_counters() {
            Some(current) => Self::replace(&mut previous, current),
            None => CpuUsage::default(),
        }
    }

    /// Like [`sample_usage`](Self::sample_usage), with counters the caller
    /// already captured.
    pub fn advance(&self, current: CounterSnapshot) -> CpuUsage {
        let mut previous = self.previous.lock().unwrap_or_else(|e| e.into_inner());
        Self::replace(&mut previous, current)
    }

    fn replace(previous: &mut Option<CounterSnapshot>, current: CounterSnapshot) -> CpuUsage {
        let usage = match previous.as_ref() {
            Some(prev) => CpuUsage::between(prev, &current),
            None => CpuUsage::default(),
        };
        *previous = Some(current);
        usage
    }

    /// Forget the stored snapshot.
    pub fn reset(&self) {
        let mut previous = self.previous.lock().unwrap_or_else(|e| e.into_inner());
        *previous = None;
    }

    pub fn sample(&self) -> CpuInfo {
        let identity = self
            .reader
            .read_proc("cpuinfo")
            .map(|t| parse_cpuinfo(&t))
            .unwrap_or_default();
        let core_count = if identity.processors > 0 {
            identity.processors
        } else {
            self.core_count_from_sys()
        };

        let usage = self.sample_usage();

        let cores = (0..core_count)
            .map(|core_id| CoreInfo {
                core_id,
                usage: usage.cores.get(&core_id).copied().unwrap_or_default(),
                frequency: self.core_frequency(core_id, "scaling_cur_freq"),
            })
            .collect();

        CpuInfo {
            model: identity.model.into(),
            architecture: Metric::Known(
                identity
                    .architecture
                    .unwrap_or_else(|| std::env::consts::ARCH.to_string()),
            ),
            core_count,
            current_usage: usage.aggregate,
            cores,
            temperature: self.temperature(),
            max_frequency: self.core_frequency(0, "cpuinfo_max_freq"),
            min_frequency: self.core_frequency(0, "cpuinfo_min_freq"),
            timestamp: unix_ms_now(),
        }
    }

    /// Count `cpuN` directories, at least one.
    fn core_count_from_sys(&self) -> usize {
        let dir = self.reader.sys_path("devices/system/cpu");
        let count = self
            .reader
            .list_dir(&dir)
            .iter()
            .filter(|name| {
                name.strip_prefix("cpu")
                    .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            })
            .count();
        count.max(1)
    }

    /// `cpufreq/<file>` for one core, kHz converted to MHz.
    fn core_frequency(&self, core: usize, file: &str) -> Metric<i64> {
        self.reader
            .read_sys(&format!("devices/system/cpu/cpu{core}/cpufreq/{file}"))
            .and_then(|t| parse_first_i64(&t))
            .filter(|khz| *khz >= 0)
            .map(|khz| khz / 1000)
            .into()
    }

    /// First thermal zone typed `*cpu*`, else the first typed `*tsens*`.
    fn temperature(&self) -> Metric<f64> {
        let dir = self.reader.sys_path("class/thermal");
        let zones: Vec<(String, String)> = self
            .reader
            .list_dir(&dir)
            .into_iter()
            .filter(|name| name.starts_with("thermal_zone"))
            .filter_map(|name| {
                let kind = self.reader.read(&dir.join(&name).join("type"))?;
                Some((name, kind.to_ascii_lowercase()))
            })
            .collect();

        let pick = |needle: &str| {
            zones.iter().filter(|(_, kind)| kind.contains(needle)).find_map(|(name, _)| {
                let text = self.reader.read(&dir.join(name).join("temp"))?;
                parse_temperature(&text)
            })
        };
        pick("cpu")
            .or_else(|| pick("tsens"))
            .map(|t| round_to(t, 1))
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Arc, Barrier};

    const STAT_A: &str = "\
cpu  100 0 100 800 0 0 0 0 0 0
cpu0 50 0 50 400 0 0 0 0 0 0
cpu1 50 0 50 400 0 0 0 0 0 0
intr 12345
ctxt 999
";

    const STAT_B: &str = "\
cpu  150 0 150 900 0 0 0 0 0 0
cpu0 100 0 100 400 0 0 0 0 0 0
cpu1 50 0 50 500 0 0 0 0 0 0
intr 12400
";

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    fn snapshot(text: &str) -> CounterSnapshot {
        CounterSnapshot::parse(text).unwrap()
    }

    // -----------------------------------------------------------------------
    // Counter parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parses_aggregate_and_cores() {
        let s = snapshot(STAT_A);
        assert_eq!(s.aggregate.total(), 1000);
        assert_eq!(s.aggregate.active(), 200);
        assert_eq!(s.cores.len(), 2);
        assert_eq!(s.cores[&1].idle, 400);
    }

    #[test]
    fn short_lines_default_missing_buckets() {
        let s = snapshot("cpu 1 2 3 4\n");
        assert_eq!(s.aggregate.total(), 10);
        assert_eq!(s.aggregate.steal, 0);
    }

    #[test]
    fn missing_aggregate_is_none() {
        assert!(CounterSnapshot::parse("cpu0 1 2 3 4\n").is_none());
        assert!(CounterSnapshot::parse("cpu x y z w\n").is_none());
    }

    // -----------------------------------------------------------------------
    // Delta math
    // -----------------------------------------------------------------------

    #[test]
    fn usage_is_active_over_total() {
        let a = snapshot(STAT_A);
        let b = snapshot(STAT_B);
        // total +200, idle +100
        assert_eq!(usage_between(&a.aggregate, &b.aggregate), Metric::Known(50.0));
        assert_eq!(usage_between(&a.cores[&0], &b.cores[&0]), Metric::Known(100.0));
        assert_eq!(usage_between(&a.cores[&1], &b.cores[&1]), Metric::Known(0.0));
    }

    #[test]
    fn zero_delta_is_unknown() {
        let a = snapshot(STAT_A);
        assert_eq!(usage_between(&a.aggregate, &a.aggregate), Metric::Unknown);
    }

    #[test]
    fn counter_reset_is_unknown() {
        let a = snapshot(STAT_B);
        let b = snapshot(STAT_A);
        assert_eq!(usage_between(&a.aggregate, &b.aggregate), Metric::Unknown);
    }

    // -----------------------------------------------------------------------
    // Sampler state
    // -----------------------------------------------------------------------

    #[test]
    fn first_advance_has_no_data() {
        let sampler = CpuSampler::new(SourceReader::default());
        let usage = sampler.advance(snapshot(STAT_A));
        assert_eq!(usage.aggregate, Metric::Unknown);
        assert!(usage.cores.is_empty());

        let usage = sampler.advance(snapshot(STAT_B));
        assert_eq!(usage.aggregate, Metric::Known(50.0));
        assert_eq!(usage.cores[&0], Metric::Known(100.0));
    }

    #[test]
    fn reset_round_still_replaces_snapshot() {
        let sampler = CpuSampler::new(SourceReader::default());
        sampler.advance(snapshot(STAT_B));
        assert_eq!(sampler.advance(snapshot(STAT_A)).aggregate, Metric::Unknown);
        // Stored snapshot is now STAT_A, so STAT_B yields a valid delta again.
        assert_eq!(sampler.advance(snapshot(STAT_B)).aggregate, Metric::Known(50.0));
    }

    #[test]
    fn hotplugged_cores_are_dropped() {
        let sampler = CpuSampler::new(SourceReader::default());
        sampler.advance(snapshot("cpu 1 0 1 8\ncpu0 1 0 1 8\n"));
        let usage = sampler.advance(snapshot("cpu 2 0 2 16\ncpu0 2 0 2 16\ncpu1 1 0 1 8\n"));
        assert_eq!(usage.cores.len(), 1);
        assert!(usage.cores.contains_key(&0));
    }

    #[test]
    fn concurrent_advances_each_see_a_distinct_previous() {
        const THREADS: usize = 8;
        let sampler = Arc::new(CpuSampler::new(SourceReader::default()));
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let sampler = Arc::clone(&sampler);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    sampler.advance(snapshot(STAT_A)).aggregate
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        // Counters held constant: the first caller has no previous, all others
        // see a zero delta. Nobody may report a number.
        assert!(results.iter().all(|r| *r == Metric::Unknown));
        assert_eq!(
            sampler.advance(snapshot(STAT_B)).aggregate,
            Metric::Known(50.0)
        );
    }

    #[test]
    fn concurrent_advances_compute_each_delta_once() {
        const THREADS: usize = 8;
        let sampler = Arc::new(CpuSampler::new(SourceReader::default()));
        sampler.advance(snapshot(STAT_A));
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let sampler = Arc::clone(&sampler);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    sampler.advance(snapshot(STAT_B)).aggregate
                })
            })
            .collect();
        let known = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Metric::is_known)
            .count();
        assert_eq!(known, 1);
    }

    #[test]
    fn counters_are_read_under_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let sampler = Arc::new(CpuSampler::new(SourceReader::new(&proc_root, dir.path().join("sys"))));

        write(&proc_root, "stat", "cpu 100 0 100 800\n");
        assert_eq!(sampler.sample_usage().aggregate, Metric::Unknown);

        // Hold the lock while a sampler is waiting on it, and move the
        // counters forward twice. The waiting call must see only the latest.
        write(&proc_root, "stat", "cpu 150 0 100 800\n");
        let guard = sampler.previous.lock().unwrap();
        let waiting = {
            let sampler = Arc::clone(&sampler);
            std::thread::spawn(move || sampler.sample_usage().aggregate)
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        write(&proc_root, "stat", "cpu 400 0 100 900\n");
        drop(guard);

        // total +400, active +300
        assert_eq!(waiting.join().unwrap(), Metric::Known(75.0));
        let stored = sampler.previous.lock().unwrap().clone().unwrap();
        assert_eq!(stored.aggregate.total(), 1400);
        assert_eq!(sampler.sample_usage().aggregate, Metric::Unknown);
    }

    #[test]
    fn unreadable_stat_keeps_the_stored_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let sampler = CpuSampler::new(SourceReader::new(&proc_root, dir.path().join("sys")));

        write(&proc_root, "stat", STAT_A);
        sampler.sample_usage();
        std::fs::remove_file(proc_root.join("stat")).unwrap();
        assert_eq!(sampler.sample_usage().aggregate, Metric::Unknown);
        write(&proc_root, "stat", STAT_B);
        assert_eq!(sampler.sample_usage().aggregate, Metric::Known(50.0));
    }

    // -----------------------------------------------------------------------
    // Full sample
    // -----------------------------------------------------------------------

    #[test]
    fn sample_reads_identity_frequency_and_temperature() {
        let dir = tempfile::tempdir().unwrap();
        let proc_root = dir.path().join("proc");
        let sys_root = dir.path().join("sys");
        write(
            &proc_root,
            "cpuinfo",
            "processor\t: 0\nBogoMIPS\t: 38.40\nCPU architecture: 8\n\nprocessor\t: 1\nHardware\t: Qualcomm Technologies, Inc SM8250\n",
        );
        write(&proc_root, "stat", STAT_A);
        write(&sys_root, "devices/system/cpu/cpu0/cpufreq/scaling_cur_freq", "1804800\n");
        write(&sys_root, "devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq", "2419200\n");
        write(&sys_root, "devices/system/cpu/cpu0/cpufreq/cpuinfo_min_freq", "300000\n");
        write(&sys_root, "class/thermal/thermal_zone0/type", "battery\n");
        write(&sys_root, "class/thermal/thermal_zone0/temp", "30000\n");
        write(&sys_root, "class/thermal/thermal_zone1/type", "tsens_tz_sensor1\n");
        write(&sys_root, "class/thermal/thermal_zone1/temp", "39000\n");
        write(&sys_root, "class/thermal/thermal_zone10/type", "cpu-1-0-usr\n");
        write(&sys_root, "class/thermal/thermal_zone10/temp", "45500\n");

        let sampler = CpuSampler::new(SourceReader::new(&proc_root, &sys_root));
        let info = sampler.sample();
        assert_eq!(
            info.model,
            Metric::Known("Qualcomm Technologies, Inc SM8250".to_string())
        );
        assert_eq!(info.architecture, Metric::Known("8".to_string()));
        assert_eq!(info.core_count, 2);
        assert_eq!(info.current_usage, Metric::Unknown);
        assert_eq!(info.cores[0].frequency, Metric::Known(1804));
        assert_eq!(info.cores[1].frequency, Metric::Unknown);
        assert_eq!(info.max_frequency, Metric::Known(2419));
        assert_eq!(info.min_frequency, Metric::Known(300));
        assert_eq!(info.temperature, Metric::Known(45.5));

        write(&proc_root, "stat", STAT_B);
        let info = sampler.sample();
        assert_eq!(info.current_usage, Metric::Known(50.0));
        assert_eq!(info.cores[0].usage, Metric::Known(100.0));
    }

    #[test]
    fn tsens_zone_is_the_fallback() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "class/thermal/thermal_zone3/type", "tsens_tz_sensor3");
        write(dir.path(), "class/thermal/thermal_zone3/temp", "41");
        let sampler = CpuSampler::new(SourceReader::new(dir.path(), dir.path()));
        assert_eq!(sampler.temperature(), Metric::Known(41.0));
    }

    #[test]
    fn core_count_falls_back_to_sys() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["cpu0", "cpu1", "cpu2", "cpufreq", "cpuidle"] {
            std::fs::create_dir_all(dir.path().join("devices/system/cpu").join(name)).unwrap();
        }
        let sampler = CpuSampler::new(SourceReader::new(dir.path(), dir.path()));
        let info = sampler.sample();
        assert_eq!(info.core_count, 3);
        assert_eq!(info.model, Metric::Unknown);
        assert_eq!(info.current_usage, Metric::Unknown);

        let empty = tempfile::tempdir().unwrap();
        let sampler = CpuSampler::new(SourceReader::new(empty.path(), empty.path()));
        assert_eq!(sampler.sample().core_count, 1);
    }

    #[test]
    fn serializes_unknowns_as_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let sampler = CpuSampler::new(SourceReader::new(dir.path(), dir.path()));
        let json = serde_json::to_value(sampler.sample()).unwrap();
        assert_eq!(json["currentUsage"], -1);
        assert_eq!(json["model"], "Unknown");
        assert_eq!(json["temperature"], -1);
        assert_eq!(json["cores"][0]["coreId"], 0);
    }
}
