//! Frame-rate estimate from SurfaceFlinger latency data, plus a short summary
//! of the foreground application.

use std::sync::Arc;

use serde::Serialize;

use crate::foreground::ForegroundResolver;
use crate::metric::{Metric, unix_ms_now};
use crate::reader::CommandRunner;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Pending fences are reported as `INT64_MAX`.
const PENDING_FENCE: i64 = i64::MAX;

/// Parsed `dumpsys SurfaceFlinger --latency` output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameTimings {
    /// Display refresh period, ns.
    pub refresh_period_ns: Option<i64>,
    /// Actual present times of completed frames, ns, in order.
    pub present_times_ns: Vec<i64>,
}

impl FrameTimings {
    pub fn parse(text: &str) -> Self {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
        let refresh_period_ns = lines
            .next()
            .and_then(|l| l.parse::<i64>().ok())
            .filter(|p| *p > 0);
        let present_times_ns = lines
            .filter_map(|line| {
                let mut cols = line.split_whitespace().map(|c| c.parse::<i64>().ok());
                let _desired = cols.next()??;
                let actual = cols.next()??;
                (actual != 0 && actual != PENDING_FENCE).then_some(actual)
            })
            .collect();
        Self {
            refresh_period_ns,
            present_times_ns,
        }
    }

    /// Average frames per second across the window.
    pub fn fps(&self) -> Metric<f64> {
        let frames = &self.present_times_ns;
        let (Some(first), Some(last)) = (frames.first(), frames.last()) else {
            return Metric::Unknown;
        };
        let span = last.checked_sub(*first).unwrap_or(0);
        if frames.len() < 2 || span <= 0 {
            return Metric::Unknown;
        }
        Metric::finite((frames.len() - 1) as f64 * NANOS_PER_SEC / span as f64).rounded(1)
    }

    /// FPS implied by the 99th-percentile frame interval.
    pub fn one_percent_low(&self) -> Metric<f64> {
        let mut intervals: Vec<i64> = self
            .present_times_ns
            .windows(2)
            .filter_map(|w| w[1].checked_sub(w[0]))
            .filter(|d| *d > 0)
            .collect();
        if intervals.is_empty() {
            return Metric::Unknown;
        }
        intervals.sort_unstable();
        let rank = ((intervals.len() as f64 * 0.99).ceil() as usize).clamp(1, intervals.len());
        let p99 = intervals[rank - 1];
        Metric::finite(NANOS_PER_SEC / p99 as f64).rounded(1)
    }

    pub fn refresh_rate(&self) -> Metric<f64> {
        self.refresh_period_ns
            .map_or(Metric::Unknown, |p| Metric::finite(NANOS_PER_SEC / p as f64).rounded(1))
    }
}

/// Pick the layer to measure for `package`: its SurfaceView if it has one,
/// otherwise its first layer.
pub fn pick_layer(layers: &str, package: &str) -> Option<String> {
    let candidates: Vec<&str> = layers
        .lines()
        .map(str::trim)
        .filter(|l| l.contains(package))
        .collect();
    candidates
        .iter()
        .find(|l| l.starts_with("SurfaceView"))
        .or_else(|| candidates.first())
        .map(|l| l.to_string())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayApp {
    pub package_name: Metric<String>,
    pub app_name: String,
    /// PSS in MB.
    pub memory_usage: Metric<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayInfo {
    pub current_fps: Metric<f64>,
    pub one_percent_low: Metric<f64>,
    pub refresh_rate: Metric<f64>,
    /// SurfaceFlinger layer the frame data came from.
    pub layer: Metric<String>,
    pub current_app: DisplayApp,
    pub timestamp: u64,
}

pub struct DisplaySampler {
    commands: Arc<dyn CommandRunner>,
    foreground: Arc<ForegroundResolver>,
}

impl DisplaySampler {
    pub fn new(commands: Arc<dyn CommandRunner>, foreground: Arc<ForegroundResolver>) -> Self {
        Self {
            commands,
            foreground,
        }
    }

    fn latency(&self, layer: Option<&str>) -> FrameTimings {
        let mut args = vec!["SurfaceFlinger", "--latency"];
        args.extend(layer);
        self.commands
            .run("dumpsys", &args)
            .map(|t| FrameTimings::parse(&t))
            .unwrap_or_default()
    }

    pub fn sample(&self) -> DisplayInfo {
        let app = self.foreground.resolve_brief();

        let layer = app.package_name.as_ref().known().and_then(|package| {
            let layers = self.commands.run("dumpsys", &["SurfaceFlinger", "--list"])?;
            pick_layer(&layers, package)
        });
        let mut timings = self.latency(layer.as_deref());
        if timings.refresh_period_ns.is_none() {
            timings.refresh_period_ns = self.latency(None).refresh_period_ns;
        }
        if layer.is_some() && timings.present_times_ns.len() < 2 {
            log::debug!("layer {layer:?} has no recent frames");
        }

        DisplayInfo {
            current_fps: timings.fps(),
            one_percent_low: timings.one_percent_low(),
            refresh_rate: timings.refresh_rate(),
            layer: layer.into(),
            current_app: DisplayApp {
                package_name: app.package_name,
                app_name: app.app_name,
                memory_usage: app.memory_usage_mb,
            },
            timestamp: unix_ms_now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::reader::StaticCommands;

    // 60 Hz panel, frames every 16.67 ms with one 50 ms hitch.
    const LATENCY: &str = "\
16666666
1000000000	1000000000	1000000000
1016666666	1016666666	1016666666
1033333332	1033333332	1033333332
1083333332	1083333332	1083333332
1100000000	1100000000	1100000000
0	0	0
1116666666	9223372036854775807	1116666666
";

    #[test]
    fn parses_period_and_skips_pending_frames() {
        let t = FrameTimings::parse(LATENCY);
        assert_eq!(t.refresh_period_ns, Some(16_666_666));
        assert_eq!(t.present_times_ns.len(), 5);
    }

    #[test]
    fn fps_and_lows() {
        let t = FrameTimings::parse(LATENCY);
        // 4 intervals over 100 ms
        assert_eq!(t.fps(), Metric::Known(40.0));
        // worst interval is 50 ms
        assert_eq!(t.one_percent_low(), Metric::Known(20.0));
        assert_eq!(t.refresh_rate(), Metric::Known(60.0));
    }

    #[test]
    fn too_few_frames_is_unknown() {
        let t = FrameTimings::parse("16666666\n1000 1000 1000\n");
        assert_eq!(t.fps(), Metric::Unknown);
        assert_eq!(t.one_percent_low(), Metric::Unknown);
        assert_eq!(t.refresh_rate(), Metric::Known(60.0));
        assert_eq!(FrameTimings::parse("").fps(), Metric::Unknown);
    }

    #[test]
    fn overflowing_timestamps_are_unknown() {
        let t = FrameTimings::parse(
            "16666666\n1 -9000000000000000000 1\n2 9000000000000000000 2\n",
        );
        assert_eq!(t.present_times_ns.len(), 2);
        assert_eq!(t.fps(), Metric::Unknown);
        assert_eq!(t.one_percent_low(), Metric::Unknown);
        assert_eq!(t.refresh_rate(), Metric::Known(60.0));
    }

    #[test]
    fn layer_prefers_surface_view() {
        let layers = "\
com.android.systemui.ImageWallpaper#0
com.foo/com.foo.Main#0
SurfaceView[com.foo/com.foo.Main](BLAST)#0
";
        assert_eq!(
            pick_layer(layers, "com.foo").as_deref(),
            Some("SurfaceView[com.foo/com.foo.Main](BLAST)#0")
        );
        assert_eq!(
            pick_layer("com.bar/com.bar.A#0\n", "com.bar").as_deref(),
            Some("com.bar/com.bar.A#0")
        );
        assert!(pick_layer(layers, "com.missing").is_none());
    }

    #[test]
    fn sample_measures_foreground_layer() {
        let commands = Arc::new(
            StaticCommands::new()
                .with(
                    "dumpsys activity activities",
                    "  mResumedActivity: ActivityRecord{1 u0 com.foo/.Main t1}\n",
                )
                .with("dumpsys SurfaceFlinger --list", "com.foo/com.foo.Main#0\n")
                .with("dumpsys SurfaceFlinger --latency com.foo/com.foo.Main#0", LATENCY),
        );
        let config = MonitorConfig::builder().commands(commands.clone()).build();
        let sampler = DisplaySampler::new(commands, Arc::new(ForegroundResolver::new(&config)));

        let info = sampler.sample();
        assert_eq!(info.current_fps, Metric::Known(40.0));
        assert_eq!(info.layer, Metric::Known("com.foo/com.foo.Main#0".to_string()));
        assert_eq!(
            info.current_app.package_name,
            Metric::Known("com.foo".to_string())
        );
    }

    #[test]
    fn sample_without_foreground_still_reports_refresh_rate() {
        let commands = Arc::new(StaticCommands::new().with("dumpsys SurfaceFlinger --latency", "16666666\n"));
        let config = MonitorConfig::builder().commands(commands.clone()).build();
        let sampler = DisplaySampler::new(commands, Arc::new(ForegroundResolver::new(&config)));

        let info = sampler.sample();
        assert_eq!(info.refresh_rate, Metric::Known(60.0));
        assert_eq!(info.current_fps, Metric::Unknown);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["currentApp"]["packageName"], "Unknown");
        assert_eq!(json["currentFps"], -1);
    }
}
