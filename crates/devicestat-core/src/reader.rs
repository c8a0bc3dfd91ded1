//! Raw source access: short virtual files and diagnostic commands.
//!
//! Nothing in here interprets values. Reads are trimmed and an empty result is
//! reported the same way as a missing file, so callers only ever deal with
//! `Option<String>`.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Mutex, mpsc};
use std::time::{Duration, Instant};

/// Upper bound on bytes read from a single virtual file.
const MAX_READ_BYTES: u64 = 64 * 1024;

/// How often a running command is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Minimum wait for buffered output once a command has exited.
const DRAIN_GRACE: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// File reader
// ---------------------------------------------------------------------------

/// Reads procfs/sysfs style files under configurable roots.
#[derive(Debug, Clone)]
pub struct SourceReader {
    proc_root: PathBuf,
    sys_root: PathBuf,
}

impl Default for SourceReader {
    fn default() -> Self {
        Self::new("/proc", "/sys")
    }
}

impl SourceReader {
    pub fn new(proc_root: impl Into<PathBuf>, sys_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
        }
    }

    /// Path of `rel` under the proc root.
    pub fn proc_path(&self, rel: &str) -> PathBuf {
        self.proc_root.join(rel)
    }

    /// Path of `rel` under the sys root.
    pub fn sys_path(&self, rel: &str) -> PathBuf {
        self.sys_root.join(rel)
    }

    /// Read a regular file and trim it. `None` when missing, unreadable or empty.
    pub fn read(&self, path: &Path) -> Option<String> {
        let meta = std::fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        let file = match std::fs::File::open(path) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("cannot open {}: {e}", path.display());
                return None;
            }
        };
        let mut buf = Vec::new();
        if let Err(e) = file.take(MAX_READ_BYTES).read_to_end(&mut buf) {
            log::debug!("cannot read {}: {e}", path.display());
            return None;
        }
        let text = String::from_utf8_lossy(&buf);
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    pub fn read_proc(&self, rel: &str) -> Option<String> {
        self.read(&self.proc_path(rel))
    }

    pub fn read_sys(&self, rel: &str) -> Option<String> {
        self.read(&self.sys_path(rel))
    }

    /// Entry names of `dir`, sorted. Empty when the directory is absent.
    pub fn list_dir(&self, dir: &Path) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort_by(|a, b| natural_key(a).cmp(&natural_key(b)));
        names
    }

    /// First line of `<dir>/<entry>/<file>` for the first entry starting with
    /// `entry_prefix` that has a readable, non-empty `file`.
    pub fn first_line(&self, dir: &Path, entry_prefix: &str, file: &str) -> Option<String> {
        self.list_dir(dir)
            .into_iter()
            .filter(|name| name.starts_with(entry_prefix))
            .find_map(|name| {
                let text = self.read(&dir.join(&name).join(file))?;
                text.lines().next().map(|l| l.trim().to_string())
            })
    }
}

/// Sort key that orders `cpu2` before `cpu10`.
fn natural_key(name: &str) -> (String, u64) {
    let digits_at = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);
    match digits_at {
        Some(i) => (
            name[..i].to_string(),
            name[i..].parse::<u64>().unwrap_or(u64::MAX),
        ),
        None => (name.to_string(), 0),
    }
}

// ---------------------------------------------------------------------------
// Value parsing
// ---------------------------------------------------------------------------

/// First whitespace-separated token parsed as an integer.
pub fn parse_first_i64(text: &str) -> Option<i64> {
    text.split_whitespace().next()?.parse().ok()
}

/// First whitespace-separated token parsed as a float.
pub fn parse_first_f64(text: &str) -> Option<f64> {
    let v: f64 = text.split_whitespace().next()?.parse().ok()?;
    v.is_finite().then_some(v)
}

/// A percentage written as `42`, `42.5`, `42%` or `42 %`.
pub fn parse_percent(text: &str) -> Option<f64> {
    let cleaned = text.trim().trim_end_matches('%').trim();
    let v: f64 = cleaned.parse().ok()?;
    v.is_finite().then_some(v)
}

/// Temperature in degrees Celsius, accepting millidegree sources.
pub fn parse_temperature(text: &str) -> Option<f64> {
    let raw = parse_first_f64(text)?;
    if raw.abs() > 1000.0 {
        Some(raw / 1000.0)
    } else {
        Some(raw)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Runs diagnostic commands. Implementations never fail loudly.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and return trimmed stdout, or `None` when the
    /// command is missing, fails, times out or prints nothing.
    fn run(&self, program: &str, args: &[&str]) -> Option<String>;
}

/// Spawns real processes with a completion deadline.
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                log::debug!("cannot spawn {program}: {e}");
                return None;
            }
        };

        // Drain stdout on a side thread so large dumps cannot fill the pipe
        // and stall the child past the deadline. The thread is abandoned if a
        // descendant keeps the pipe open after the child is gone.
        let mut stdout = child.stdout.take()?;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let mut out = Vec::new();
            let _ = stdout.read_to_end(&mut out);
            let _ = tx.send(out);
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if Instant::now() < deadline => std::thread::sleep(POLL_INTERVAL),
                Ok(None) => {
                    log::warn!("{program} exceeded {:?}, killing", self.timeout);
                    break None;
                }
                Err(e) => {
                    log::debug!("waiting on {program} failed: {e}");
                    break None;
                }
            }
        };
        let Some(status) = status else {
            let _ = child.kill();
            let _ = child.wait();
            return None;
        };
        if !status.success() {
            return None;
        }

        let remaining = deadline.saturating_duration_since(Instant::now()).max(DRAIN_GRACE);
        let out = match rx.recv_timeout(remaining) {
            Ok(out) => out,
            Err(_) => {
                log::warn!("{program} output still open after {:?}, giving up", self.timeout);
                return None;
            }
        };
        let text = String::from_utf8_lossy(&out).trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }
}

/// Answers commands from a fixed table.
///
/// Used to replay captured diagnostic output, and by tests. Keys are the
/// program followed by its arguments, joined by single spaces.
#[derive(Debug, Default)]
pub struct StaticCommands {
    outputs: Mutex<HashMap<String, String>>,
}

impl StaticCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `output` for the command line `key` (e.g. `"dumpsys battery"`).
    pub fn with(self, key: &str, output: &str) -> Self {
        self.set(key, output);
        self
    }

    /// Replace the output for `key`.
    pub fn set(&self, key: &str, output: &str) {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.insert(key.to_string(), output.to_string());
    }

    pub fn remove(&self, key: &str) {
        let mut outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs.remove(key);
    }
}

impl CommandRunner for StaticCommands {
    fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let mut key = program.to_string();
        for arg in args {
            key.push(' ');
            key.push_str(arg);
        }
        let outputs = self.outputs.lock().unwrap_or_else(|e| e.into_inner());
        outputs
            .get(&key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}
