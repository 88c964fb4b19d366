//! FUSE filesystem implementation.
//!
//! Presents the content tree read-only:
//!
//! ```text
//! /                  ino 1  (root)
//! ├── <group>/       ino 2..
//! │   └── <file>     ino group + 1..
//! └── <group>/
//!     └── <file>
//! ```
//!
//! Inode numbers are assigned once, in tree order, when the filesystem is
//! built.  The tree and the inode table are both immutable afterwards, so
//! every handler works through `&self` without locks.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    AccessFlags, Errno, FileAttr, FileHandle, FileType, Filesystem, FopenFlags, Generation,
    INodeNo, LockOwner, OpenFlags, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, Request,
};
use packfs_core::{AccessMode, ContentTree, Node, NodeAttr, NodeError, NodeKind, NodePath};
use tokio::sync::oneshot;
use tracing::debug;

const INO_ROOT: u64 = 1;

/// Bidirectional inode ↔ path map.
#[derive(Debug)]
struct InodeTable {
    /// `paths[ino - 1]`.
    paths: Vec<NodePath>,
    by_path: HashMap<NodePath, u64>,
}

impl InodeTable {
    fn build(tree: &ContentTree) -> Self {
        let mut table = Self {
            paths: Vec::with_capacity(1 + tree.group_count() + tree.file_count()),
            by_path: HashMap::new(),
        };
        table.push(NodePath::Root);
        for (group, files) in tree.groups() {
            table.push(NodePath::Group(group.to_string()));
            for (file, _) in files.files() {
                table.push(NodePath::File(group.to_string(), file.to_string()));
            }
        }
        table
    }

    fn push(&mut self, path: NodePath) {
        let ino = self.paths.len() as u64 + 1;
        self.by_path.insert(path.clone(), ino);
        self.paths.push(path);
    }

    fn path(&self, ino: u64) -> Option<&NodePath> {
        let idx = usize::try_from(ino.checked_sub(1)?).ok()?;
        self.paths.get(idx)
    }

    fn ino(&self, path: &NodePath) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    fn parent(&self, ino: u64) -> u64 {
        match self.path(ino) {
            Some(NodePath::File(group, _)) => self
                .ino(&NodePath::Group(group.clone()))
                .unwrap_or(INO_ROOT),
            _ => INO_ROOT,
        }
    }

    fn len(&self) -> usize {
        self.paths.len()
    }
}

/// The FUSE filesystem object.
pub struct RenderFs {
    tree: Arc<ContentTree>,
    inodes: InodeTable,
    ttl: Duration,
    /// Mount time, reported as atime/mtime/ctime for every entry.
    mtime: SystemTime,
    uid: u32,
    gid: u32,
    /// Dropped together with the filesystem when the FUSE session ends,
    /// which wakes whoever holds the receiver.
    _closed: Option<oneshot::Sender<()>>,
}

impl std::fmt::Debug for RenderFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderFs")
            .field("inodes", &self.inodes.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl RenderFs {
    pub fn new(tree: Arc<ContentTree>, ttl: Duration) -> Self {
        let inodes = InodeTable::build(&tree);
        Self {
            tree,
            inodes,
            ttl,
            mtime: SystemTime::now(),
            uid: unsafe { libc::getuid() },
            gid: unsafe { libc::getgid() },
            _closed: None,
        }
    }

    /// Attach a sender that is dropped when the FUSE session drops the
    /// filesystem.
    pub(crate) fn notify_on_close(mut self, tx: oneshot::Sender<()>) -> Self {
        self._closed = Some(tx);
        self
    }

    fn node(&self, ino: u64) -> Result<Node<'_>, NodeError> {
        let path = self
            .inodes
            .path(ino)
            .ok_or_else(|| NodeError::NotFound(format!("inode {ino}")))?;
        self.tree.resolve(path)
    }

    fn file_attr(&self, ino: u64, attr: NodeAttr) -> FileAttr {
        let kind = match attr.kind {
            NodeKind::Directory => FileType::Directory,
            NodeKind::File => FileType::RegularFile,
        };
        FileAttr {
            ino: INodeNo(ino),
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: self.mtime,
            mtime: self.mtime,
            ctime: self.mtime,
            crtime: UNIX_EPOCH,
            kind,
            perm: attr.perm,
            nlink: attr.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: 4096,
            flags: 0,
        }
    }

    fn getattr_ino(&self, ino: u64) -> Result<FileAttr, NodeError> {
        let node = self.node(ino)?;
        Ok(self.file_attr(ino, node.attr()))
    }

    fn lookup_entry(&self, parent: u64, name: &str) -> Result<FileAttr, NodeError> {
        let child = self.node(parent)?.lookup(name)?;
        let ino = self
            .inodes
            .ino(&child.path())
            .ok_or_else(|| NodeError::NotFound(name.to_string()))?;
        Ok(self.file_attr(ino, child.attr()))
    }

    /// Full listing of a directory including `.` and `..`.
    fn dir_entries(&self, ino: u64) -> Result<Vec<(u64, FileType, String)>, NodeError> {
        let node = self.node(ino)?;
        let children = node.read_dir_all()?;
        let mut entries = Vec::with_capacity(children.len() + 2);
        entries.push((ino, FileType::Directory, ".".to_string()));
        entries.push((self.inodes.parent(ino), FileType::Directory, "..".to_string()));
        for child in children {
            let path = match &node {
                Node::Root(_) => NodePath::Group(child.name.to_string()),
                Node::Group(g) => NodePath::File(g.name().to_string(), child.name.to_string()),
                Node::File(_) => return Err(NodeError::NotADirectory),
            };
            let Some(child_ino) = self.inodes.ino(&path) else {
                continue;
            };
            let kind = match child.kind {
                NodeKind::Directory => FileType::Directory,
                NodeKind::File => FileType::RegularFile,
            };
            entries.push((child_ino, kind, child.name.to_string()));
        }
        Ok(entries)
    }

    fn read_bytes(&self, ino: u64, offset: u64, size: u32) -> Result<&[u8], NodeError> {
        let offset =
            i64::try_from(offset).map_err(|_| NodeError::InvalidArgument("read offset too large"))?;
        self.node(ino)?.read(offset, size)
    }

    fn open_node(&self, ino: u64, flags: OpenFlags, want_dir: bool) -> Result<(), NodeError> {
        let node = self.node(ino)?;
        if want_dir && !node.is_dir() {
            return Err(NodeError::NotADirectory);
        }
        node.open(access_mode(flags))
    }
}

fn access_mode(flags: OpenFlags) -> AccessMode {
    match flags.0 & libc::O_ACCMODE {
        libc::O_WRONLY => AccessMode::Write,
        libc::O_RDWR => AccessMode::ReadWrite,
        _ => AccessMode::Read,
    }
}

fn errno(err: &NodeError) -> Errno {
    match err {
        NodeError::NotFound(_) => Errno::ENOENT,
        NodeError::PermissionDenied => Errno::EACCES,
        NodeError::InvalidArgument(_) => Errno::EINVAL,
        NodeError::NotADirectory => Errno::ENOTDIR,
        NodeError::IsADirectory => Errno::EISDIR,
    }
}

impl Filesystem for RenderFs {
    fn lookup(&self, _req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        let name_str = match name.to_str() {
            Some(s) => s,
            None => {
                reply.error(Errno::ENOENT);
                return;
            }
        };
        match self.lookup_entry(parent.0, name_str) {
            Ok(attr) => {
                debug!(parent = parent.0, name = name_str, ino = attr.ino.0, "fuse lookup");
                reply.entry(&self.ttl, &attr, Generation(0));
            }
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn getattr(&self, _req: &Request, ino: INodeNo, _fh: Option<FileHandle>, reply: ReplyAttr) {
        match self.getattr_ino(ino.0) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn access(&self, _req: &Request, ino: INodeNo, _mask: AccessFlags, reply: ReplyEmpty) {
        // Mode bits already carry the read-only policy and the mount is RO;
        // only existence is checked here.
        match self.node(ino.0) {
            Ok(_) => reply.ok(),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn open(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        match self.open_node(ino.0, flags, false) {
            Ok(()) => reply.opened(FileHandle(0), FopenFlags::empty()),
            Err(e) => {
                debug!(ino = ino.0, "fuse open refused: {e}");
                reply.error(errno(&e));
            }
        }
    }

    fn opendir(&self, _req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        match self.open_node(ino.0, flags, true) {
            Ok(()) => reply.opened(FileHandle(0), FopenFlags::empty()),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn read(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        size: u32,
        _flags: OpenFlags,
        _lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        match self.read_bytes(ino.0, offset, size) {
            Ok(data) => reply.data(data),
            Err(e) => reply.error(errno(&e)),
        }
    }

    fn readdir(
        &self,
        _req: &Request,
        ino: INodeNo,
        _fh: FileHandle,
        offset: u64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.dir_entries(ino.0) {
            Ok(entries) => entries,
            Err(e) => {
                reply.error(errno(&e));
                return;
            }
        };
        for (i, (child_ino, kind, name)) in entries.iter().enumerate() {
            if (i as u64) < offset {
                continue;
            }
            if reply.add(INodeNo(*child_ino), (i + 1) as u64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&self, _req: &Request, _ino: INodeNo, reply: ReplyStatfs) {
        let files = self.inodes.len() as u64;
        // blocks=0 (virtual); bfree/bavail=0 (read-only); ffree=0
        reply.statfs(0, 0, 0, files, 0, 4096, 255, 4096);
    }
}
