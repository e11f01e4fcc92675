//! Module for application configuration settings.
//!
//! User configurations may be specified in a configuration file. Every key is optional; a missing
//! file yields the defaults.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use countfs::fs::session::DEFAULT_COUNTER_NAME;
use countfs::fs::tree::{Owner, validate_name};
use countfs::fs::{InodePerms, MountOptions, RootPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

fn countfs_runtime_dir() -> Option<PathBuf> {
    if let Some(path) = dirs::runtime_dir() {
        return Some(path.join("countfs"));
    }

    dirs::home_dir().map(|path| path.join(".local").join("share").join("countfs"))
}

fn default_mount_point() -> PathBuf {
    countfs_runtime_dir().map_or_else(|| PathBuf::from("/tmp/countfs/mnt"), |rd| rd.join("mnt"))
}

fn current_uid() -> u32 {
    nix::unistd::Uid::current().as_raw()
}

fn current_gid() -> u32 {
    nix::unistd::Gid::current().as_raw()
}

fn default_counter_name() -> String {
    DEFAULT_COUNTER_NAME.to_owned()
}

const fn default_file_mode() -> u32 {
    0o644
}

const fn default_dir_mode() -> u32 {
    0o755
}

/// Which root policy a mount starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsMode {
    /// A single counter file under the root; the structure is fixed.
    #[default]
    Prepopulated,
    /// An empty root that hosts populate themselves.
    Dynamic,
}

/// The `[filesystem]` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FilesystemConfig {
    /// Root policy.
    #[serde(default)]
    pub mode: FsMode,

    /// Name of the counter file in `prepopulated` mode.
    #[serde(default = "default_counter_name")]
    pub counter_name: String,

    /// Upper bound on linked nodes, root included. Unlimited if not specified.
    #[serde(default)]
    pub max_nodes: Option<u64>,

    /// Permission bits of the pre-populated counter file.
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Permission bits of the root directory.
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            mode: FsMode::default(),
            counter_name: default_counter_name(),
            max_nodes: None,
            file_mode: default_file_mode(),
            dir_mode: default_dir_mode(),
        }
    }
}

/// The `[mount]` block: options passed to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MountConfig {
    /// Let users other than the mounting one access the filesystem.
    #[serde(default)]
    pub allow_other: bool,

    /// Ask the kernel to unmount when the daemon exits, even abnormally.
    #[serde(default)]
    pub auto_unmount: bool,
}

/// Application configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// The mount point for the filesystem.
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,

    /// The user owning every node. If not specified, the current user.
    #[serde(default = "current_uid")]
    pub uid: u32,

    /// The group owning every node. If not specified, the current group.
    #[serde(default = "current_gid")]
    pub gid: u32,

    #[serde(default)]
    pub filesystem: FilesystemConfig,

    #[serde(default)]
    pub mount: MountConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mount_point: default_mount_point(),
            uid: current_uid(),
            gid: current_gid(),
            filesystem: FilesystemConfig::default(),
            mount: MountConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation errors: {0:?}")]
    ValidationErrors(Vec<String>),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Config {
    /// Validate the correctness of the configuration.
    ///
    /// Returns:
    /// - `Ok(())` if the configuration is valid.
    /// - `Err(Vec<String>)` containing every validation error message otherwise.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !self.mount_point.is_absolute() {
            errors.push(format!(
                "Mount point '{}' is not an absolute path.",
                self.mount_point.display()
            ));
        }

        if let Err(e) = validate_name(OsStr::new(&self.filesystem.counter_name)) {
            errors.push(format!(
                "Counter name '{}' is not usable: {e}.",
                self.filesystem.counter_name
            ));
        }

        match (self.filesystem.max_nodes, self.filesystem.mode) {
            (Some(0), _) => errors.push("max-nodes must be at least 1.".to_owned()),
            (Some(1), FsMode::Prepopulated) => errors.push(
                "max-nodes must be at least 2 in prepopulated mode (root and counter).".to_owned(),
            ),
            _ => {}
        }

        for (key, mode) in [
            ("file-mode", self.filesystem.file_mode),
            ("dir-mode", self.filesystem.dir_mode),
        ] {
            if mode > 0o7777 {
                errors.push(format!("{key} {mode:#o} has bits outside 0o7777."));
            }
        }

        if self.mount.auto_unmount && !self.mount.allow_other {
            errors.push("auto-unmount requires allow-other.".to_owned());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// The root policy described by the `[filesystem]` block.
    pub fn root_policy(&self) -> RootPolicy {
        match self.filesystem.mode {
            FsMode::Prepopulated => RootPolicy::Prepopulated {
                name: self.filesystem.counter_name.clone().into(),
            },
            FsMode::Dynamic => RootPolicy::Dynamic,
        }
    }

    /// Session options derived from this configuration.
    pub fn mount_options(&self) -> MountOptions {
        MountOptions {
            owner: Owner {
                uid: self.uid,
                gid: self.gid,
            },
            file_perms: InodePerms::from_mode(self.filesystem.file_mode),
            dir_perms: InodePerms::from_mode(self.filesystem.dir_mode),
            max_nodes: self.filesystem.max_nodes,
        }
    }

    /// Returns config file paths in descending priority order.
    /// On macOS, skips `dirs::config_dir()` (resolves to ~/Library/Application Support/).
    fn config_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        #[cfg(not(target_os = "macos"))]
        if let Some(xdg) = dirs::config_dir() {
            paths.push(xdg.join("countfs").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".config").join("countfs").join("config.toml"));
        }

        paths.push(PathBuf::from("/etc/countfs/config.toml"));

        paths
    }

    /// Finds the first existing config file from search paths.
    fn find_config_file() -> Option<PathBuf> {
        Self::config_search_paths().into_iter().find(|p| p.exists())
    }

    /// Loads config from a single TOML file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = ?path, "Loading configuration file.");
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads configuration from the external path if given, otherwise from the first config file
    /// found. Falls back to the defaults when there is none.
    ///
    /// Errors if a config file exists but is malformed or invalid.
    pub fn load(external_config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = external_config_path
            .map(Path::to_path_buf)
            .or_else(Self::find_config_file);

        let config = match path {
            Some(path) => Self::load_from_file(&path)?,
            None => {
                debug!("No configuration file found, using defaults.");
                Self::default()
            }
        };

        config.validate().map_err(ConfigError::ValidationErrors)?;
        Ok(config)
    }
}
