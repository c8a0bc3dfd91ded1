//! Integration tests for devicestat-core.
//!
//! Each test builds a fake device: a temp directory standing in for `/proc`
//! and `/sys`, plus canned diagnostic command output. The full monitor then
//! runs against it exactly as it would on hardware.

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use devicestat_core::{Metric, MonitorConfig, StaticCommands, SystemMonitor};

const ACTIVITY_DUMP: &str = "\
ACTIVITY MANAGER ACTIVITIES (dumpsys activity activities)
Display #0 (activities from top to bottom):
  * Task{5f2d3a1 #85 type=standard A=10234:com.example.app U=0 visible=true}
    topResumedActivity=ActivityRecord{b945e78 u0 com.example.app/.MainActivity t85}
";

const PACKAGE_DUMP: &str = "\
Packages:
  Package [com.example.app] (4a1b2c3):
    userId=10234
    versionCode=4021 minSdk=24 targetSdk=34
    versionName=4.2.1
    pkgFlags=[ HAS_CODE ALLOW_CLEAR_USER_DATA ]
    firstInstallTime=2023-05-10 12:34:56
    lastUpdateTime=2024-01-02 03:04:05
";

const BATTERY_DUMP: &str = "\
Current Battery Service state:
  AC powered: false
  USB powered: true
  Wireless powered: false
  status: 2
  health: 2
  present: true
  level: 76
  scale: 100
  voltage: 4012
  temperature: 312
  technology: Li-ion
";

const LATENCY: &str = "\
16666666
1000000000	1000000000	1000000000
1016666666	1016666666	1016666666
1033333332	1033333332	1033333332
";

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

/// A device with every source present.
fn fake_device(root: &Path) -> Arc<StaticCommands> {
    write(
        root,
        "proc/stat",
        "cpu  100 0 100 800 0 0 0 0 0 0\ncpu0 100 0 100 800 0 0 0 0 0 0\n",
    );
    write(
        root,
        "proc/cpuinfo",
        "processor\t: 0\nHardware\t: Qualcomm Technologies, Inc SM8250\nCPU architecture: 8\n",
    );
    write(
        root,
        "proc/meminfo",
        "MemTotal: 8000000 kB\nMemFree: 1000000 kB\nMemAvailable: 2000000 kB\n",
    );
    write(root, "proc/uptime", "3600.25 100.00\n");
    write(root, "proc/version", "Linux version 4.19.157\n");
    write(root, "proc/4321/smaps_rollup", "Rss: 300000 kB\nPss: 204800 kB\n");

    write(root, "sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq", "1804800\n");
    write(root, "sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq", "2841600\n");
    write(root, "sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_min_freq", "300000\n");
    write(root, "sys/class/thermal/thermal_zone0/type", "cpu-0-0-usr\n");
    write(root, "sys/class/thermal/thermal_zone0/temp", "41500\n");
    write(root, "sys/class/kgsl/kgsl-3d0/gpuclk", "587000000\n");
    write(root, "sys/class/kgsl/kgsl-3d0/gpu_busy_percentage", "12 %\n");
    write(root, "sys/class/power_supply/battery/current_now", "-350000\n");
    write(root, "sys/class/power_supply/battery/charge_full", "4100000\n");

    Arc::new(
        StaticCommands::new()
            .with("dumpsys activity activities", ACTIVITY_DUMP)
            .with("dumpsys package com.example.app", PACKAGE_DUMP)
            .with("pidof com.example.app", "4321\n")
            .with("dumpsys battery", BATTERY_DUMP)
            .with("dumpsys SurfaceFlinger --list", "com.example.app/com.example.app.MainActivity#0\n")
            .with(
                "dumpsys SurfaceFlinger --latency com.example.app/com.example.app.MainActivity#0",
                LATENCY,
            )
            .with(
                "getprop",
                "[ro.build.version.release]: [11]\n[ro.build.version.sdk]: [30]\n[ro.product.model]: [M2011K2C]\n",
            ),
    )
}

fn monitor(root: &Path, commands: Arc<StaticCommands>) -> SystemMonitor {
    SystemMonitor::new(
        MonitorConfig::builder()
            .proc_root(root.join("proc"))
            .sys_root(root.join("sys"))
            .storage_path(root)
            .commands(commands)
            .build(),
    )
}

#[test]
fn every_section_reads_the_fake_device() {
    let dir = tempfile::tempdir().unwrap();
    let commands = fake_device(dir.path());
    let m = monitor(dir.path(), commands);

    let cpu = serde_json::to_value(m.cpu()).unwrap();
    assert_eq!(cpu["model"], "Qualcomm Technologies, Inc SM8250");
    assert_eq!(cpu["coreCount"], 1);
    assert_eq!(cpu["currentUsage"], -1);
    assert_eq!(cpu["cores"][0]["frequency"], 1804);
    assert_eq!(cpu["maxFrequency"], 2841);
    assert_eq!(cpu["temperature"], 41.5);

    let gpu = m.gpu();
    assert_eq!(gpu.backend, Metric::Known("adreno".to_string()));
    assert_eq!(gpu.current_frequency, Metric::Known(587));
    assert_eq!(gpu.usage, Metric::Known(12.0));

    let memory = m.memory();
    assert_eq!(memory.used_memory, Metric::Known(6_000_000 * 1024));
    assert_eq!(memory.memory_usage_ratio, Metric::Known(0.75));
    assert!(memory.total_storage.is_known());

    let battery = m.battery();
    assert_eq!(battery.level, Metric::Known(76));
    assert_eq!(battery.plugged_text, "USB");
    assert_eq!(battery.current, Metric::Known(-350_000));
    assert_eq!(battery.capacity, Metric::Known(4_100_000));
    assert_eq!(battery.temperature, Metric::Known(31.2));
    // 4.012 V × 0.35 A
    assert_eq!(battery.power, 1.404);

    let system = m.system();
    assert_eq!(system.api_level, Metric::Known(30));
    assert_eq!(system.uptime, Metric::Known(3_600_250));
}

#[test]
fn foreground_identity_is_augmented() {
    let dir = tempfile::tempdir().unwrap();
    let m = monitor(dir.path(), fake_device(dir.path()));

    let app = m.current_app();
    assert_eq!(app.package_name, Metric::Known("com.example.app".to_string()));
    assert_eq!(app.activity_name, "com.example.app.MainActivity");
    // The shell directory has no labels.
    assert_eq!(app.app_name, "com.example.app");
    assert_eq!(app.version, "4.2.1");
    assert_eq!(app.version_code, 4021);
    assert_eq!(app.uid, 10234);
    assert!(!app.is_system_app);
    assert_eq!(app.pid, Metric::Known(4321));
    assert_eq!(app.memory_usage_mb, Metric::Known(200));
    assert_eq!(app.user_id, Metric::Known(0));
    assert!(app.install_time > 0);
    assert_eq!(app.icon_base64, "");

    let display = m.display();
    assert_eq!(display.current_fps, Metric::Known(60.0));
    assert_eq!(display.refresh_rate, Metric::Known(60.0));
    assert_eq!(display.current_app.memory_usage, Metric::Known(200));
}

#[test]
fn bare_device_reports_sentinels_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let m = monitor(dir.path(), Arc::new(StaticCommands::new()));

    let all = m.all();
    assert_eq!(all["cpu"]["currentUsage"], -1);
    assert_eq!(all["cpu"]["model"], "Unknown");
    assert_eq!(all["gpu"]["vendor"], "Unknown");
    assert_eq!(all["memory"]["totalMemory"], -1);
    assert_eq!(all["battery"]["level"], -1);
    assert_eq!(all["battery"]["power"], 0.0);
    assert_eq!(all["display"]["currentFps"], -1);
    assert_eq!(all["system"]["deviceModel"], "Unknown");

    let app = serde_json::to_value(m.current_app()).unwrap();
    assert_eq!(app["packageName"], "Unknown");
    assert_eq!(app["appName"], "Unknown");
    assert_eq!(app["versionCode"], 0);
}

#[test]
fn concurrent_first_samples_never_see_a_delta() {
    let dir = tempfile::tempdir().unwrap();
    let m = Arc::new(monitor(dir.path(), fake_device(dir.path())));
    let threads = 16;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let m = Arc::clone(&m);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                m.cpu().current_usage
            })
        })
        .collect();

    // Counters are constant: the first caller has no previous snapshot and
    // every later one sees a zero delta.
    for h in handles {
        assert_eq!(h.join().unwrap(), Metric::Unknown);
    }

    write(
        dir.path(),
        "proc/stat",
        "cpu  200 0 100 900 0 0 0 0 0 0\ncpu0 200 0 100 900 0 0 0 0 0 0\n",
    );
    assert_eq!(m.cpu().current_usage, Metric::Known(50.0));
    assert_eq!(m.cpu().current_usage, Metric::Unknown);
}

#[test]
fn summary_pulls_headlines_from_each_section() {
    let dir = tempfile::tempdir().unwrap();
    let m = monitor(dir.path(), fake_device(dir.path()));
    let summary = serde_json::to_value(m.summary()).unwrap();
    assert_eq!(summary["gpuUsage"], 12.0);
    assert_eq!(summary["batteryLevel"], 76);
    assert_eq!(summary["memoryUsageRatio"], 0.75);
    assert_eq!(summary["foregroundPackage"], "com.example.app");
    assert_eq!(summary["uptime"], 3_600_250);
}
