//! Error types shared by the packfs crates.

use std::path::PathBuf;

/// Problems with the input document, the settings file, or the tree built
/// from them.  Always raised before anything is mounted.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid entry `{key}`: {reason}")]
    InvalidEntry { key: String, reason: String },

    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("duplicate name {0:?}")]
    Duplicate(String),
}

/// Per-request failures answered by a single node operation.
///
/// None of these affect the mount session; the FUSE layer turns each into an
/// errno for the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("no such entry: {0}")]
    NotFound(String),

    #[error("permission denied: filesystem is read-only")]
    PermissionDenied,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("not a directory")]
    NotADirectory,

    #[error("is a directory")]
    IsADirectory,
}

/// Session-level failures.  These end the invocation with a non-zero exit.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to mount {}: {source:#}", mountpoint.display())]
    Mount {
        mountpoint: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("serving {} failed: {source:#}", mountpoint.display())]
    Serve {
        mountpoint: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to unmount {}: {source:#}", mountpoint.display())]
    Unmount {
        mountpoint: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}
