//! Platform collaborators: the activity/process registry and the application
//! directory.
//!
//! Both are narrow traits so the foreground resolver can be driven by native
//! bindings, by shell tools, or by fakes. The shell-backed implementations in
//! this module talk to the stock `am`, `dumpsys` and `pidof` binaries and the
//! per-process procfs entries.

use std::sync::Arc;

use chrono::{Local, NaiveDateTime, TimeZone};

use crate::error::LookupError;
use crate::icon::Icon;
use crate::reader::{CommandRunner, SourceReader};

/// `ApplicationInfo.FLAG_SYSTEM`.
pub const FLAG_SYSTEM: u32 = 1 << 0;
/// `ApplicationInfo.FLAG_DEBUGGABLE`.
pub const FLAG_DEBUGGABLE: u32 = 1 << 1;
/// `ApplicationInfo.FLAG_HAS_CODE`.
pub const FLAG_HAS_CODE: u32 = 1 << 2;
/// `ApplicationInfo.FLAG_PERSISTENT`.
pub const FLAG_PERSISTENT: u32 = 1 << 3;
/// `ApplicationInfo.FLAG_UPDATED_SYSTEM_APP`.
pub const FLAG_UPDATED_SYSTEM_APP: u32 = 1 << 7;

/// A `package/component` pair as printed by the activity manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentName {
    /// Container identifier, e.g. `tv.danmaku.bilibilihd`.
    pub package: String,
    /// Fully qualified component class (a leading `.` is expanded).
    pub class: String,
    /// The token exactly as printed, e.g. `pkg/.MainActivity`.
    pub flattened: String,
    /// Owning user when the source printed a `u<N>` marker.
    pub user_id: Option<u32>,
}

impl ComponentName {
    /// Split a `package/component` token on its first `/`.
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let (package, rest) = token.split_once('/')?;
        if package.is_empty() || rest.is_empty() {
            return None;
        }
        let class = if rest.starts_with('.') {
            format!("{package}{rest}")
        } else {
            rest.to_string()
        };
        Some(Self {
            package: package.to_string(),
            class,
            flattened: token.to_string(),
            user_id: None,
        })
    }

    pub fn with_user(mut self, user_id: Option<u32>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Metadata about an installed application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppIdentity {
    pub label: Option<String>,
    pub version_name: Option<String>,
    pub version_code: i64,
    pub uid: u32,
    pub flags: u32,
    /// Epoch milliseconds.
    pub first_install_time: i64,
    /// Epoch milliseconds.
    pub last_update_time: i64,
}

impl AppIdentity {
    pub fn is_system(&self) -> bool {
        self.flags & FLAG_SYSTEM != 0
    }
}

/// A running process hosting a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Proportional set size in kB, when readable.
    pub pss_kb: Option<u64>,
}

/// Privileged process/activity registry.
pub trait RegistryService: Send + Sync {
    /// Top activity of the front task in the running task list.
    fn resolve_foreground_component(&self) -> Option<ComponentName>;

    /// Main process hosting `package`.
    fn process_for(&self, package: &str) -> Option<ProcessEntry>;
}

/// Application identity and icon lookups by package id.
pub trait ApplicationDirectory: Send + Sync {
    fn lookup_application_identity(&self, package: &str) -> Result<AppIdentity, LookupError>;

    fn load_icon(&self, package: &str) -> Option<Icon>;
}

// ---------------------------------------------------------------------------
// Shell registry
// ---------------------------------------------------------------------------

/// Registry backed by `am stack list`, `pidof` and procfs.
pub struct ShellRegistry {
    commands: Arc<dyn CommandRunner>,
    reader: SourceReader,
}

impl ShellRegistry {
    pub fn new(commands: Arc<dyn CommandRunner>, reader: SourceReader) -> Self {
        Self { commands, reader }
    }
}

/// Pull the `topActivity=ComponentInfo{...}` of the first visible task,
/// falling back to the first task listed.
pub fn parse_stack_list(output: &str) -> Option<ComponentName> {
    let top_of = |line: &str| -> Option<ComponentName> {
        let (_, rest) = line.split_once("topActivity=ComponentInfo{")?;
        let (token, _) = rest.split_once('}')?;
        ComponentName::parse(token)
    };
    let user_of = |line: &str| -> Option<u32> {
        let (_, rest) = line.split_once("userId=")?;
        rest.split_whitespace().next()?.parse().ok()
    };

    let task_lines = || output.lines().filter(|l| l.contains("topActivity="));
    task_lines()
        .filter(|l| l.contains("visible=true"))
        .find_map(|l| top_of(l).map(|c| c.with_user(user_of(l))))
        .or_else(|| task_lines().find_map(|l| top_of(l).map(|c| c.with_user(user_of(l)))))
}

/// PSS in kB from `smaps_rollup` (or `status` `VmRSS` as a coarser fallback).
fn parse_pss_kb(text: &str, key: &str) -> Option<u64> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

impl RegistryService for ShellRegistry {
    fn resolve_foreground_component(&self) -> Option<ComponentName> {
        let output = self.commands.run("am", &["stack", "list"])?;
        let component = parse_stack_list(&output);
        if component.is_none() {
            log::debug!("am stack list produced no top activity");
        }
        component
    }

    fn process_for(&self, package: &str) -> Option<ProcessEntry> {
        let pids = self.commands.run("pidof", &[package])?;
        let pid: u32 = pids.split_whitespace().next()?.parse().ok()?;
        let pss_kb = self
            .reader
            .read_proc(&format!("{pid}/smaps_rollup"))
            .and_then(|t| parse_pss_kb(&t, "Pss"))
            .or_else(|| {
                self.reader
                    .read_proc(&format!("{pid}/status"))
                    .and_then(|t| parse_pss_kb(&t, "VmRSS"))
            });
        Some(ProcessEntry { pid, pss_kb })
    }
}

// ---------------------------------------------------------------------------
// Shell application directory
// ---------------------------------------------------------------------------

/// Directory backed by `dumpsys package <id>`. Has no access to labels or
/// icons; callers fall back to the package id and an empty icon.
pub struct ShellDirectory {
    commands: Arc<dyn CommandRunner>,
}

impl ShellDirectory {
    pub fn new(commands: Arc<dyn CommandRunner>) -> Self {
        Self { commands }
    }
}

fn parse_flag_names(list: &str) -> u32 {
    list.trim_matches(|c| c == '[' || c == ']')
        .split_whitespace()
        .map(|name| match name {
            "SYSTEM" => FLAG_SYSTEM,
            "DEBUGGABLE" => FLAG_DEBUGGABLE,
            "HAS_CODE" => FLAG_HAS_CODE,
            "PERSISTENT" => FLAG_PERSISTENT,
            "UPDATED_SYSTEM_APP" => FLAG_UPDATED_SYSTEM_APP,
            _ => 0,
        })
        .fold(0, |acc, bit| acc | bit)
}

/// `YYYY-MM-DD HH:MM:SS` in device local time to epoch milliseconds.
pub fn parse_package_time(text: &str) -> Option<i64> {
    let naive = NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}

/// Value following `key=` on `line`, up to the next space.
fn field_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    Some(rest.split_whitespace().next().unwrap_or(""))
}

/// Parse the first `Package [id]` block of `dumpsys package` output.
pub fn parse_package_dump(package: &str, output: &str) -> Result<AppIdentity, LookupError> {
    let header = format!("Package [{package}]");
    let mut lines = output.lines().skip_while(|l| !l.trim_start().starts_with(&header));
    if lines.next().is_none() {
        return Err(LookupError::NotFound(package.to_string()));
    }

    let mut identity = AppIdentity::default();
    for line in lines {
        let trimmed = line.trim();
        // Next package block ends this one.
        if trimmed.starts_with("Package [") {
            break;
        }
        if let Some(v) = field_after(trimmed, "versionCode=") {
            identity.version_code = v.parse().unwrap_or(identity.version_code);
        }
        if let Some(rest) = trimmed.strip_prefix("versionName=") {
            identity.version_name = Some(rest.trim().to_string()).filter(|s| !s.is_empty());
        }
        if let Some(v) = trimmed
            .strip_prefix("userId=")
            .or_else(|| trimmed.strip_prefix("appId="))
        {
            if let Some(uid) = v.split_whitespace().next().and_then(|s| s.parse().ok()) {
                identity.uid = uid;
            }
        }
        if let Some(rest) = trimmed.strip_prefix("pkgFlags=") {
            identity.flags |= parse_flag_names(rest);
        } else if let Some(rest) = trimmed.strip_prefix("flags=") {
            identity.flags |= parse_flag_names(rest);
        }
        if let Some(rest) = trimmed.strip_prefix("firstInstallTime=") {
            identity.first_install_time = parse_package_time(rest).unwrap_or(0);
        }
        if let Some(rest) = trimmed.strip_prefix("lastUpdateTime=") {
            identity.last_update_time = parse_package_time(rest).unwrap_or(0);
        }
    }
    Ok(identity)
}

impl ApplicationDirectory for ShellDirectory {
    fn lookup_application_identity(&self, package: &str) -> Result<AppIdentity, LookupError> {
        let output = self
            .commands
            .run("dumpsys", &["package", package])
            .ok_or(LookupError::Unavailable)?;
        parse_package_dump(package, &output)
    }

    fn load_icon(&self, _package: &str) -> Option<Icon> {
        None
    }
}
