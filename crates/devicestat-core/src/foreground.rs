//! Foreground application resolution.
//!
//! A [`ForegroundResolver`] runs an ordered list of [`ForegroundStrategy`]
//! implementations and takes the first component any of them reports. The
//! package id of that component is then augmented with identity metadata,
//! process metrics and an icon. Augmentation failures only leave the affected
//! fields at their defaults; the resolved package id is always kept.

use std::sync::Arc;

use serde::Serialize;

use crate::config::MonitorConfig;
use crate::icon::icon_to_base64;
use crate::metric::{Metric, UNKNOWN, unix_ms_now};
use crate::platform::{ApplicationDirectory, ComponentName, RegistryService};
use crate::reader::CommandRunner;

/// Lines of `dumpsys activity activities` that name the top activity, in
/// order of preference.
const ACTIVITY_MARKERS: &[&str] = &[
    "topResumedActivity=",
    "mResumedActivity:",
    "ResumedActivity:",
    "mFocusedActivity:",
    "mCurrentFocus=",
];

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// One way of finding the foreground component.
pub trait ForegroundStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve(&self) -> Option<ComponentName>;
}

/// Extract the `pkg/component` token that follows a `u<N>` user marker.
fn component_after_user_marker(text: &str) -> Option<ComponentName> {
    let mut tokens = text.split_whitespace();
    while let Some(token) = tokens.next() {
        let Some(user) = token
            .strip_prefix('u')
            .filter(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
        else {
            continue;
        };
        let next = tokens.next()?.trim_end_matches('}');
        if let Some(component) = ComponentName::parse(next) {
            return Some(component.with_user(user.parse().ok()));
        }
    }
    None
}

/// Find the top resumed/focused activity in an activity-stack dump.
pub fn parse_activity_dump(dump: &str) -> Option<ComponentName> {
    ACTIVITY_MARKERS.iter().find_map(|marker| {
        dump.lines().find_map(|line| {
            let (_, rest) = line.split_once(marker)?;
            component_after_user_marker(rest)
        })
    })
}

/// Parses `dumpsys activity activities`.
pub struct ActivityDumpStrategy {
    commands: Arc<dyn CommandRunner>,
}

impl ActivityDumpStrategy {
    pub fn new(commands: Arc<dyn CommandRunner>) -> Self {
        Self { commands }
    }
}

impl ForegroundStrategy for ActivityDumpStrategy {
    fn name(&self) -> &'static str {
        "activity-dump"
    }

    fn resolve(&self) -> Option<ComponentName> {
        let dump = self.commands.run("dumpsys", &["activity", "activities"])?;
        parse_activity_dump(&dump)
    }
}

/// Asks the registry service for the top task.
pub struct RegistryStrategy {
    registry: Arc<dyn RegistryService>,
}

impl RegistryStrategy {
    pub fn new(registry: Arc<dyn RegistryService>) -> Self {
        Self { registry }
    }
}

impl ForegroundStrategy for RegistryStrategy {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn resolve(&self) -> Option<ComponentName> {
        self.registry.resolve_foreground_component()
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Everything known about the foreground application. Built fresh per call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundIdentity {
    pub package_name: Metric<String>,
    pub app_name: String,
    /// Fully qualified component class.
    pub activity_name: String,
    pub version: String,
    pub version_code: i64,
    pub user_id: Metric<u32>,
    pub memory_usage_mb: Metric<u64>,
    pub pid: Metric<u32>,
    pub uid: u32,
    pub is_system_app: bool,
    /// Base64 PNG, empty when no icon could be produced.
    pub icon_base64: String,
    /// Epoch milliseconds.
    pub install_time: i64,
    pub last_update_time: i64,
    /// Which strategy found the component.
    pub strategy: Metric<String>,
    pub timestamp: u64,
}

impl Default for ForegroundIdentity {
    fn default() -> Self {
        Self {
            package_name: Metric::Unknown,
            app_name: UNKNOWN.to_string(),
            activity_name: UNKNOWN.to_string(),
            version: UNKNOWN.to_string(),
            version_code: 0,
            user_id: Metric::Unknown,
            memory_usage_mb: Metric::Unknown,
            pid: Metric::Unknown,
            uid: 0,
            is_system_app: false,
            icon_base64: String::new(),
            install_time: 0,
            last_update_time: 0,
            strategy: Metric::Unknown,
            timestamp: unix_ms_now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct ForegroundResolver {
    strategies: Vec<Box<dyn ForegroundStrategy>>,
    registry: Arc<dyn RegistryService>,
    directory: Arc<dyn ApplicationDirectory>,
    icon_size: u32,
}

impl ForegroundResolver {
    /// Dump parsing first, registry query as the fallback.
    pub fn new(config: &MonitorConfig) -> Self {
        let strategies: Vec<Box<dyn ForegroundStrategy>> = vec![
            Box::new(ActivityDumpStrategy::new(config.commands.clone())),
            Box::new(RegistryStrategy::new(config.registry.clone())),
        ];
        Self::with_strategies(
            strategies,
            config.registry.clone(),
            config.directory.clone(),
            config.icon_size,
        )
    }

    pub fn with_strategies(
        strategies: Vec<Box<dyn ForegroundStrategy>>,
        registry: Arc<dyn RegistryService>,
        directory: Arc<dyn ApplicationDirectory>,
        icon_size: u32,
    ) -> Self {
        Self {
            strategies,
            registry,
            directory,
            icon_size,
        }
    }

    /// First component any strategy reports, with the strategy's name.
    pub fn resolve_component(&self) -> Option<(ComponentName, &'static str)> {
        self.strategies.iter().find_map(|strategy| {
            let component = strategy.resolve()?;
            log::debug!(
                "foreground component {} via {}",
                component.flattened,
                strategy.name()
            );
            Some((component, strategy.name()))
        })
    }

    /// Full resolution including the icon.
    pub fn resolve(&self) -> ForegroundIdentity {
        self.resolve_inner(true)
    }

    /// Resolution without icon rendering.
    pub fn resolve_brief(&self) -> ForegroundIdentity {
        self.resolve_inner(false)
    }

    fn resolve_inner(&self, with_icon: bool) -> ForegroundIdentity {
        let mut identity = ForegroundIdentity::default();
        let Some((component, strategy)) = self.resolve_component() else {
            log::debug!("no strategy resolved a foreground component");
            return identity;
        };
        let package = component.package.clone();

        identity.activity_name = component.class;
        identity.user_id = component.user_id.into();
        identity.strategy = Metric::Known(strategy.to_string());

        match self.directory.lookup_application_identity(&package) {
            Ok(app) => {
                identity.app_name = app
                    .label
                    .clone()
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| package.clone());
                if let Some(version) = app.version_name.clone() {
                    identity.version = version;
                }
                identity.version_code = app.version_code;
                identity.uid = app.uid;
                identity.is_system_app = app.is_system();
                identity.install_time = app.first_install_time;
                identity.last_update_time = app.last_update_time;
            }
            Err(e) => log::debug!("identity lookup for {package} failed: {e}"),
        }

        if let Some(process) = self.registry.process_for(&package) {
            identity.pid = Metric::Known(process.pid);
            identity.memory_usage_mb = process.pss_kb.map(|kb| kb / 1024).into();
        }

        if with_icon {
            identity.icon_base64 = self
                .directory
                .load_icon(&package)
                .and_then(|icon| icon_to_base64(&icon, self.icon_size))
                .unwrap_or_default();
        }

        identity.package_name = Metric::Known(package);
        identity
    }
}
