//! FUSE backend for packfs.
//!
//! Serves a [`packfs_core::ContentTree`] read-only:
//!
//! ```text
//! <mountpoint>/
//! ├── <group>/
//! │   └── <file>
//! └── <group>/
//!     └── <file>
//! ```
//!
//! The filesystem is entirely in-memory.  Pass [`FuseBackend`] to
//! [`packfs_core::MountSession::mount`]; the session owns the resulting
//! [`FuseMount`] and unmounts it when serving stops or the session is dropped.

pub mod fs;
pub mod mount;

pub use fs::RenderFs;
pub use mount::{FuseBackend, FuseMount};
