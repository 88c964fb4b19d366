//! Read-only filesystem nodes over a [`ContentTree`].
//!
//! Nodes are cheap borrowed views created on demand while answering a
//! request; they hold no state of their own, so any number of threads can
//! walk the same tree at once.

use crate::error::NodeError;
use crate::tree::{ContentTree, FileContent, Group};

/// Size reported for directories, as most local filesystems do.
pub const DIR_SIZE: u64 = 4096;

/// `r-xr-xr-x`: listable and traversable, never writable.
pub const DIR_PERM: u16 = 0o555;

/// `r--r--r--`.
pub const FILE_PERM: u16 = 0o444;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
}

/// Attributes reported for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAttr {
    pub kind: NodeKind,
    pub perm: u16,
    pub size: u64,
    pub nlink: u32,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry<'t> {
    pub name: &'t str,
    pub kind: NodeKind,
}

/// How a caller wants to open a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

/// Owned address of a node, usable as a map key outside the tree's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodePath {
    Root,
    Group(String),
    File(String, String),
}

/// Any node in the tree.
#[derive(Debug, Clone, Copy)]
pub enum Node<'t> {
    Root(RootNode<'t>),
    Group(GroupNode<'t>),
    File(FileNode<'t>),
}

impl<'t> Node<'t> {
    pub fn attr(&self) -> NodeAttr {
        match self {
            Node::Root(n) => n.attr(),
            Node::Group(n) => n.attr(),
            Node::File(n) => n.attr(),
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Node<'t>, NodeError> {
        match self {
            Node::Root(n) => n.lookup(name).map(Node::Group),
            Node::Group(n) => n.lookup(name).map(Node::File),
            Node::File(_) => Err(NodeError::NotADirectory),
        }
    }

    pub fn read_dir_all(&self) -> Result<Vec<DirEntry<'t>>, NodeError> {
        match self {
            Node::Root(n) => Ok(n.read_dir_all()),
            Node::Group(n) => Ok(n.read_dir_all()),
            Node::File(_) => Err(NodeError::NotADirectory),
        }
    }

    pub fn read(&self, offset: i64, size: u32) -> Result<&'t [u8], NodeError> {
        match self {
            Node::File(n) => n.read(offset, size),
            Node::Root(_) | Node::Group(_) => Err(NodeError::IsADirectory),
        }
    }

    /// Check that the node may be opened with `mode`.  Every write access is
    /// refused, directories included.
    pub fn open(&self, mode: AccessMode) -> Result<(), NodeError> {
        match mode {
            AccessMode::Read => Ok(()),
            AccessMode::Write | AccessMode::ReadWrite => Err(NodeError::PermissionDenied),
        }
    }

    pub fn is_dir(&self) -> bool {
        !matches!(self, Node::File(_))
    }

    pub fn path(&self) -> NodePath {
        match self {
            Node::Root(_) => NodePath::Root,
            Node::Group(n) => NodePath::Group(n.name.to_string()),
            Node::File(n) => NodePath::File(n.group.to_string(), n.name.to_string()),
        }
    }
}

impl ContentTree {
    /// Walk `path` from the root with chained lookups.
    pub fn resolve(&self, path: &NodePath) -> Result<Node<'_>, NodeError> {
        let root = Node::Root(self.root());
        match path {
            NodePath::Root => Ok(root),
            NodePath::Group(group) => root.lookup(group),
            NodePath::File(group, file) => root.lookup(group)?.lookup(file),
        }
    }
}

/// The top-level directory: one subdirectory per group.
#[derive(Debug, Clone, Copy)]
pub struct RootNode<'t> {
    tree: &'t ContentTree,
}

impl<'t> RootNode<'t> {
    pub(crate) fn new(tree: &'t ContentTree) -> Self {
        Self { tree }
    }

    pub fn attr(&self) -> NodeAttr {
        dir_attr(self.tree.group_count())
    }

    pub fn lookup(&self, name: &str) -> Result<GroupNode<'t>, NodeError> {
        self.tree
            .group_entry(name)
            .map(|(name, group)| GroupNode { name, group })
            .ok_or_else(|| NodeError::NotFound(name.to_string()))
    }

    pub fn read_dir_all(&self) -> Vec<DirEntry<'t>> {
        self.tree
            .groups()
            .map(|(name, _)| DirEntry {
                name,
                kind: NodeKind::Directory,
            })
            .collect()
    }
}

/// One group, presented as a directory of files.
#[derive(Debug, Clone, Copy)]
pub struct GroupNode<'t> {
    name: &'t str,
    group: &'t Group,
}

impl<'t> GroupNode<'t> {
    pub fn name(&self) -> &'t str {
        self.name
    }

    pub fn attr(&self) -> NodeAttr {
        dir_attr(0)
    }

    pub fn lookup(&self, name: &str) -> Result<FileNode<'t>, NodeError> {
        self.group
            .file_entry(name)
            .map(|(file, content)| FileNode {
                group: self.name,
                name: file,
                content,
            })
            .ok_or_else(|| NodeError::NotFound(format!("{}/{name}", self.name)))
    }

    pub fn read_dir_all(&self) -> Vec<DirEntry<'t>> {
        self.group
            .files()
            .map(|(name, _)| DirEntry {
                name,
                kind: NodeKind::File,
            })
            .collect()
    }
}

/// A regular file backed by one content blob.
#[derive(Debug, Clone, Copy)]
pub struct FileNode<'t> {
    group: &'t str,
    name: &'t str,
    content: &'t FileContent,
}

impl<'t> FileNode<'t> {
    pub fn name(&self) -> &'t str {
        self.name
    }

    pub fn group(&self) -> &'t str {
        self.group
    }

    pub fn attr(&self) -> NodeAttr {
        NodeAttr {
            kind: NodeKind::File,
            perm: FILE_PERM,
            size: self.content.len() as u64,
            nlink: 1,
        }
    }

    /// Return at most `size` bytes starting at `offset`.
    ///
    /// Reading at or past the end yields an empty slice, not an error.
    pub fn read(&self, offset: i64, size: u32) -> Result<&'t [u8], NodeError> {
        let offset =
            u64::try_from(offset).map_err(|_| NodeError::InvalidArgument("negative read offset"))?;
        let bytes = self.content.as_bytes();
        let len = bytes.len() as u64;
        if offset >= len {
            return Ok(&[]);
        }
        // offset < len, so it fits in usize.
        let start = offset as usize;
        let end = start.saturating_add(size as usize).min(bytes.len());
        Ok(&bytes[start..end])
    }
}

fn dir_attr(subdirs: usize) -> NodeAttr {
    NodeAttr {
        kind: NodeKind::Directory,
        perm: DIR_PERM,
        size: DIR_SIZE,
        nlink: 2 + u32::try_from(subdirs).unwrap_or(u32::MAX - 2),
    }
}
