//! Monitor configuration, assembled once at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::icon::DEFAULT_ICON_SIZE;
use crate::platform::{ApplicationDirectory, RegistryService, ShellDirectory, ShellRegistry};
use crate::reader::{CommandRunner, SourceReader, SystemCommandRunner};

/// Default deadline for diagnostic commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything the samplers need: filesystem roots and platform collaborators.
///
/// Build with [`MonitorConfig::builder`]. Collaborators not supplied explicitly
/// are backed by shell tools through the configured [`CommandRunner`].
#[derive(Clone)]
pub struct MonitorConfig {
    pub proc_root: PathBuf,
    pub sys_root: PathBuf,
    /// Filesystem whose capacity is reported in the memory section.
    pub storage_path: PathBuf,
    pub command_timeout: Duration,
    /// Raster edge for icons without an intrinsic size.
    pub icon_size: u32,
    pub commands: Arc<dyn CommandRunner>,
    pub registry: Arc<dyn RegistryService>,
    pub directory: Arc<dyn ApplicationDirectory>,
}

impl std::fmt::Debug for MonitorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfig")
            .field("proc_root", &self.proc_root)
            .field("sys_root", &self.sys_root)
            .field("storage_path", &self.storage_path)
            .field("command_timeout", &self.command_timeout)
            .field("icon_size", &self.icon_size)
            .finish_non_exhaustive()
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MonitorConfig {
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    /// A reader over the configured roots.
    pub fn reader(&self) -> SourceReader {
        SourceReader::new(&self.proc_root, &self.sys_root)
    }
}

/// `/data` when it exists, otherwise `/`.
pub fn default_storage_path() -> PathBuf {
    let data = Path::new("/data");
    if data.is_dir() {
        data.to_path_buf()
    } else {
        PathBuf::from("/")
    }
}

/// Builder for [`MonitorConfig`].
#[derive(Default)]
pub struct MonitorConfigBuilder {
    proc_root: Option<PathBuf>,
    sys_root: Option<PathBuf>,
    storage_path: Option<PathBuf>,
    command_timeout: Option<Duration>,
    icon_size: Option<u32>,
    commands: Option<Arc<dyn CommandRunner>>,
    registry: Option<Arc<dyn RegistryService>>,
    directory: Option<Arc<dyn ApplicationDirectory>>,
}

impl MonitorConfigBuilder {
    pub fn proc_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_root = Some(path.into());
        self
    }

    pub fn sys_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.sys_root = Some(path.into());
        self
    }

    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Only used when no explicit command runner is supplied.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn icon_size(mut self, size: u32) -> Self {
        self.icon_size = Some(size);
        self
    }

    pub fn commands(mut self, commands: Arc<dyn CommandRunner>) -> Self {
        self.commands = Some(commands);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn RegistryService>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn ApplicationDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn build(self) -> MonitorConfig {
        let proc_root = self.proc_root.unwrap_or_else(|| PathBuf::from("/proc"));
        let sys_root = self.sys_root.unwrap_or_else(|| PathBuf::from("/sys"));
        let command_timeout = self.command_timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        let commands = self
            .commands
            .unwrap_or_else(|| Arc::new(SystemCommandRunner::new(command_timeout)));
        let reader = SourceReader::new(&proc_root, &sys_root);
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(ShellRegistry::new(commands.clone(), reader)));
        let directory = self
            .directory
            .unwrap_or_else(|| Arc::new(ShellDirectory::new(commands.clone())));

        MonitorConfig {
            proc_root,
            sys_root,
            storage_path: self.storage_path.unwrap_or_else(default_storage_path),
            command_timeout,
            icon_size: self.icon_size.filter(|s| *s > 0).unwrap_or(DEFAULT_ICON_SIZE),
            commands,
            registry,
            directory,
        }
    }
}
