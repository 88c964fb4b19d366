//! Core of packfs: rendered pack output as a read-only directory tree.
//!
//! ```text
//! <mountpoint>/
//! ├── <group>/
//! │   ├── <file>
//! │   └── <file>
//! └── <group>/
//!     └── <file>
//! ```
//!
//! A [`ContentTree`] is built once from the input document
//! ([`source::load_document`]), wrapped in an `Arc`, and handed to a
//! [`MountSession`] which keeps it mounted until cancelled.  Filesystem
//! requests are answered by borrowing [`Node`]s from the tree; nothing is
//! mutated after the build, so no locking is needed anywhere on the read path.

pub mod config;
pub mod error;
pub mod node;
pub mod session;
pub mod source;
pub mod tree;

pub use config::{Config, MountConfig};
pub use error::{ConfigError, NodeError, SessionError};
pub use node::{AccessMode, DirEntry, Node, NodeAttr, NodeKind, NodePath};
pub use session::{MountBackend, MountHandle, MountSession, ServeExit, SessionState};
pub use tree::{ContentTree, FileContent, Group, TreeBuilder};
