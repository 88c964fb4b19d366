use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// FUSE filesystem name reported in `/proc/mounts`.
pub const DEFAULT_FSNAME: &str = "nomad-pack-fs";
/// FUSE subtype, shown by `mount` as `fuse.packfs`.
pub const DEFAULT_SUBTYPE: &str = "packfs";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mount: MountConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(default = "default_fsname")]
    pub fsname: String,
    #[serde(default = "default_subtype")]
    pub subtype: String,
    /// How long the kernel may cache attributes and lookups.  The tree never
    /// changes while mounted, so anything from 0 upward is safe.
    #[serde(default = "default_attr_ttl_secs")]
    pub attr_ttl_secs: u64,
}

impl MountConfig {
    pub fn attr_ttl(&self) -> Duration {
        Duration::from_secs(self.attr_ttl_secs)
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fsname: default_fsname(),
            subtype: default_subtype(),
            attr_ttl_secs: default_attr_ttl_secs(),
        }
    }
}

fn default_fsname() -> String {
    DEFAULT_FSNAME.to_string()
}

fn default_subtype() -> String {
    DEFAULT_SUBTYPE.to_string()
}

fn default_attr_ttl_secs() -> u64 {
    1
}

/// `$XDG_CONFIG_HOME/packfs/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
        .unwrap_or_else(|| {
            tracing::warn!(
                "neither XDG_CONFIG_HOME nor HOME are set; using current directory for config"
            );
            PathBuf::from(".")
        });
    base.join("packfs").join("config.toml")
}

impl Config {
    /// Load settings from `path`.
    ///
    /// When `required` is false a missing file means defaults; an explicitly
    /// requested file must exist.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        if !required && !path.exists() {
            tracing::warn!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
