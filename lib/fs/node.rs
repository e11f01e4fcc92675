use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use crate::fs::counter::{self, CounterCell};
use crate::fs::{FsError, INode, INodeType, InodeAddr, InodePerms};
use crate::sync::{self, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Child map of a directory, kept in name order so readdir offsets are stable.
pub type Children = BTreeMap<OsString, Arc<Node>>;

/// Mutable metadata shared by both node variants.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    /// Name within the owning directory. Empty for the root.
    pub name: OsString,
    /// Owning directory, `None` for the root and for detached nodes.
    pub parent: Option<InodeAddr>,
    /// Advisory permission bits.
    pub permissions: InodePerms,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Creation time.
    pub create_time: SystemTime,
    /// Last structural or counter modification.
    pub last_modified_at: SystemTime,
}

/// What a node is.
#[derive(Debug)]
pub enum NodeKind {
    /// A directory and its children.
    Directory(RwLock<Children>),
    /// A counter file. The node is the only strong owner of its cell.
    CounterFile(Arc<CounterCell>),
}

/// A named entry in the tree.
#[derive(Debug)]
pub struct Node {
    addr: InodeAddr,
    meta: RwLock<NodeMeta>,
    kind: NodeKind,
}

impl Node {
    pub(crate) fn directory(addr: InodeAddr, meta: NodeMeta) -> Self {
        Self {
            addr,
            meta: RwLock::new(meta),
            kind: NodeKind::Directory(RwLock::new(BTreeMap::new())),
        }
    }

    pub(crate) fn counter_file(addr: InodeAddr, meta: NodeMeta) -> Self {
        Self {
            addr,
            meta: RwLock::new(meta),
            kind: NodeKind::CounterFile(Arc::new(CounterCell::default())),
        }
    }

    /// The inode address of this node.
    #[must_use]
    pub fn addr(&self) -> InodeAddr {
        self.addr
    }

    /// The variant-specific payload.
    #[must_use]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Returns `true` for directories.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    /// A copy of the current metadata.
    #[must_use]
    pub fn meta(&self) -> NodeMeta {
        sync::read(&self.meta).clone()
    }

    /// The node's name within its owning directory.
    #[must_use]
    pub fn name(&self) -> OsString {
        sync::read(&self.meta).name.clone()
    }

    /// The owning directory, if linked.
    #[must_use]
    pub fn parent(&self) -> Option<InodeAddr> {
        sync::read(&self.meta).parent
    }

    pub(crate) fn meta_mut(&self) -> RwLockWriteGuard<'_, NodeMeta> {
        sync::write(&self.meta)
    }

    /// Bumps the modification time to now.
    pub(crate) fn touch(&self) {
        self.meta_mut().last_modified_at = SystemTime::now();
    }

    /// The counter cell, for counter files.
    pub fn cell(&self) -> Result<&Arc<CounterCell>, FsError> {
        match &self.kind {
            NodeKind::CounterFile(cell) => Ok(cell),
            NodeKind::Directory(_) => Err(FsError::IsADirectory),
        }
    }

    /// A weak reference to the counter cell, as held by open handles.
    pub fn weak_cell(&self) -> Result<Weak<CounterCell>, FsError> {
        self.cell().map(Arc::downgrade)
    }

    /// Shared access to a directory's children.
    pub fn children(&self) -> Result<RwLockReadGuard<'_, Children>, FsError> {
        match &self.kind {
            NodeKind::Directory(children) => Ok(sync::read(children)),
            NodeKind::CounterFile(_) => Err(FsError::NotADirectory),
        }
    }

    pub(crate) fn children_mut(&self) -> Result<RwLockWriteGuard<'_, Children>, FsError> {
        match &self.kind {
            NodeKind::Directory(children) => Ok(sync::write(children)),
            NodeKind::CounterFile(_) => Err(FsError::NotADirectory),
        }
    }

    /// Looks up a direct child by exact name.
    pub fn child(&self, name: &OsStr) -> Result<Arc<Node>, FsError> {
        self.children()?.get(name).cloned().ok_or(FsError::NotFound)
    }

    /// Returns `true` if this is a directory with no children.
    #[must_use]
    pub fn is_empty_dir(&self) -> bool {
        self.children().is_ok_and(|c| c.is_empty())
    }

    /// Builds the attribute snapshot reported to hosts.
    #[must_use]
    pub fn inode(&self) -> INode {
        let meta = sync::read(&self.meta);
        let (itype, size) = match &self.kind {
            NodeKind::Directory(_) => (INodeType::Directory, 0),
            NodeKind::CounterFile(cell) => {
                (INodeType::File, counter::render(cell.get()).len() as u64)
            }
        };
        INode {
            addr: self.addr,
            permissions: meta.permissions,
            uid: meta.uid,
            gid: meta.gid,
            create_time: meta.create_time,
            last_modified_at: meta.last_modified_at,
            parent: meta.parent,
            size,
            itype,
        }
    }
}
