//! The in-memory directory tree.
//!
//! A [`Tree`] owns the root directory; every other node is owned by exactly one parent
//! directory's child map. An address table mirrors the linked nodes so hosts that speak in inode
//! numbers (FUSE) can reach them without walking paths.
//!
//! # Locking
//!
//! Structural mutations (`create_*`, `unlink`, `rmdir`, `rename`, `link`) are serialized by a
//! single tree-wide mutex. They validate everything first and only then touch child maps, so a
//! failed mutation changes nothing. Each directory's child map sits behind its own `RwLock`;
//! lookups and readdir only ever take those read locks, and never while holding a node's
//! metadata lock.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt as _;
use std::path::{Component, Path};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, trace};

use crate::fs::node::{Node, NodeMeta};
use crate::fs::{
    BLOCK_SIZE, COUNTFS_MAGIC, DirEntry, FsError, FsStats, INode, InodeAddr, InodePerms,
    MAX_NAME_LEN, ROOT_ADDR, RenameFlags,
};
use crate::sync::atomic::{AtomicU64, Ordering};
use crate::sync::{self, Mutex};

/// Owner recorded on every node the tree creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    /// User ID.
    pub uid: u32,
    /// Group ID.
    pub gid: u32,
}

/// Checks that `name` can be linked into a directory.
pub fn validate_name(name: &OsStr) -> Result<(), FsError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes == b"." || bytes == b".." || bytes.contains(&b'/') {
        return Err(FsError::InvalidName(name.to_os_string()));
    }
    if bytes.contains(&0) {
        return Err(FsError::InvalidName(name.to_os_string()));
    }
    if bytes.len() > MAX_NAME_LEN {
        return Err(FsError::NameTooLong { max: MAX_NAME_LEN });
    }
    Ok(())
}

/// An in-memory tree of directories and counter files.
pub struct Tree {
    root: Arc<Node>,
    /// addr -> linked node. The root is always present.
    inodes: scc::HashMap<InodeAddr, Arc<Node>>,
    next_addr: AtomicU64,
    /// Serializes structural mutations.
    structure: Mutex<()>,
    max_nodes: Option<u64>,
    owner: Owner,
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.inodes.len())
            .field("max_nodes", &self.max_nodes)
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Tree {
    /// Creates a tree holding only an empty root directory.
    ///
    /// `max_nodes` bounds the number of linked nodes, root included.
    #[must_use]
    pub fn new(owner: Owner, root_perms: InodePerms, max_nodes: Option<u64>) -> Self {
        let now = SystemTime::now();
        let root = Arc::new(Node::directory(
            ROOT_ADDR,
            NodeMeta {
                name: std::ffi::OsString::new(),
                parent: None,
                permissions: root_perms,
                uid: owner.uid,
                gid: owner.gid,
                create_time: now,
                last_modified_at: now,
            },
        ));
        let inodes = scc::HashMap::new();
        drop(inodes.insert_sync(ROOT_ADDR, Arc::clone(&root)));

        Self {
            root,
            inodes,
            next_addr: AtomicU64::new(ROOT_ADDR + 1),
            structure: Mutex::new(()),
            max_nodes,
            owner,
        }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> Arc<Node> {
        Arc::clone(&self.root)
    }

    /// Number of linked nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.inodes.len()
    }

    /// Resolves a linked node by address.
    pub fn node(&self, addr: InodeAddr) -> Result<Arc<Node>, FsError> {
        self.inodes
            .read_sync(&addr, |_, node| Arc::clone(node))
            .ok_or(FsError::NotFound)
    }

    /// Resolves a linked directory by address.
    fn dir(&self, addr: InodeAddr) -> Result<Arc<Node>, FsError> {
        let node = self.node(addr)?;
        if node.is_dir() {
            Ok(node)
        } else {
            Err(FsError::NotADirectory)
        }
    }

    /// Attribute snapshot of the node at `addr`.
    pub fn getattr(&self, addr: InodeAddr) -> Result<INode, FsError> {
        Ok(self.node(addr)?.inode())
    }

    /// Exact, case-sensitive, single-segment lookup of `name` inside `dir`.
    pub fn lookup(&self, dir: InodeAddr, name: &OsStr) -> Result<Arc<Node>, FsError> {
        self.dir(dir)?.child(name)
    }

    /// Resolves a mount-relative path one segment at a time, starting at the root.
    ///
    /// `.` segments and leading or repeated separators are ignored; `..` is rejected rather than
    /// followed.
    pub fn resolve(&self, path: &Path) -> Result<Arc<Node>, FsError> {
        let mut node = self.root();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(name) => node = node.child(name)?,
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(FsError::InvalidName(component.as_os_str().to_os_string()));
                }
            }
        }
        Ok(node)
    }

    /// Creates a counter file initialized to zero.
    pub fn create_file(
        &self,
        dir: InodeAddr,
        name: &OsStr,
        perms: InodePerms,
    ) -> Result<Arc<Node>, FsError> {
        self.create_with(dir, name, perms, Node::counter_file)
    }

    /// Creates an empty directory.
    pub fn create_directory(
        &self,
        dir: InodeAddr,
        name: &OsStr,
        perms: InodePerms,
    ) -> Result<Arc<Node>, FsError> {
        self.create_with(dir, name, perms, Node::directory)
    }

    fn create_with(
        &self,
        dir: InodeAddr,
        name: &OsStr,
        perms: InodePerms,
        build: impl FnOnce(InodeAddr, NodeMeta) -> Node,
    ) -> Result<Arc<Node>, FsError> {
        validate_name(name)?;
        let _guard = sync::lock(&self.structure);
        let parent = self.dir(dir)?;

        let node = {
            let mut children = parent.children_mut()?;
            if children.contains_key(name) {
                return Err(FsError::AlreadyExists);
            }
            if let Some(max) = self.max_nodes
                && self.inodes.len() as u64 >= max
            {
                debug!(max, "node limit reached");
                return Err(FsError::NoSpace);
            }
            let now = SystemTime::now();
            let addr = self.next_addr.fetch_add(1, Ordering::Relaxed);
            let node = Arc::new(build(
                addr,
                NodeMeta {
                    name: name.to_os_string(),
                    parent: Some(dir),
                    permissions: perms,
                    uid: self.owner.uid,
                    gid: self.owner.gid,
                    create_time: now,
                    last_modified_at: now,
                },
            ));
            children.insert(name.to_os_string(), Arc::clone(&node));
            node
        };
        drop(self.inodes.insert_sync(node.addr(), Arc::clone(&node)));
        parent.touch();

        debug!(parent = dir, ?name, addr = node.addr(), is_dir = node.is_dir(), "created node");
        Ok(node)
    }

    /// Removes the counter file `name` from `dir`, destroying its cell.
    pub fn unlink(&self, dir: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        self.remove_with(dir, name, |node| {
            if node.is_dir() {
                Err(FsError::IsADirectory)
            } else {
                Ok(())
            }
        })
    }

    /// Removes the empty directory `name` from `dir`.
    pub fn rmdir(&self, dir: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        self.remove_with(dir, name, |node| {
            if !node.is_dir() {
                Err(FsError::NotADirectory)
            } else if !node.is_empty_dir() {
                Err(FsError::NotEmpty)
            } else {
                Ok(())
            }
        })
    }

    fn remove_with(
        &self,
        dir: InodeAddr,
        name: &OsStr,
        check: impl FnOnce(&Node) -> Result<(), FsError>,
    ) -> Result<(), FsError> {
        let _guard = sync::lock(&self.structure);
        let parent = self.dir(dir)?;

        let removed = {
            let mut children = parent.children_mut()?;
            let node = children.get(name).ok_or(FsError::NotFound)?;
            check(node)?;
            children.remove(name).ok_or(FsError::NotFound)?
        };
        self.detach(&removed);
        parent.touch();

        debug!(parent = dir, ?name, addr = removed.addr(), "removed node");
        Ok(())
    }

    /// Drops a node that was just taken out of its parent's child map.
    fn detach(&self, node: &Node) {
        self.inodes.remove_sync(&node.addr());
        node.meta_mut().parent = None;
    }

    /// Returns `true` if `addr` is `ancestor` or lies somewhere beneath it.
    fn is_within(&self, addr: InodeAddr, ancestor: InodeAddr) -> bool {
        let mut cursor = Some(addr);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.node(current).ok().and_then(|n| n.parent());
        }
        false
    }

    /// Moves `dir/name` to `new_dir/new_name`.
    ///
    /// An existing target of the same kind is replaced (directories only when empty) unless
    /// `flags` contains [`RenameFlags::NOREPLACE`]. The node is detached from its old parent
    /// before it is attached to the new one, so it never has two owners.
    pub fn rename(
        &self,
        dir: InodeAddr,
        name: &OsStr,
        new_dir: InodeAddr,
        new_name: &OsStr,
        flags: RenameFlags,
    ) -> Result<(), FsError> {
        validate_name(new_name)?;
        let _guard = sync::lock(&self.structure);
        let src_parent = self.dir(dir)?;
        let dst_parent = self.dir(new_dir)?;
        let node = src_parent.child(name)?;

        if node.is_dir() && self.is_within(new_dir, node.addr()) {
            return Err(FsError::InvalidMove);
        }

        match dst_parent.child(new_name) {
            Ok(existing) if Arc::ptr_eq(&existing, &node) => return Ok(()),
            Ok(_) if flags.contains(RenameFlags::NOREPLACE) => return Err(FsError::AlreadyExists),
            Ok(existing) => match (node.is_dir(), existing.is_dir()) {
                (true, false) => return Err(FsError::NotADirectory),
                (false, true) => return Err(FsError::IsADirectory),
                (true, true) if !existing.is_empty_dir() => return Err(FsError::NotEmpty),
                _ => {}
            },
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }

        src_parent.children_mut()?.remove(name);
        let replaced = dst_parent
            .children_mut()?
            .insert(new_name.to_os_string(), Arc::clone(&node));
        if let Some(replaced) = replaced {
            trace!(addr = replaced.addr(), "rename replaced existing target");
            self.detach(&replaced);
        }

        {
            let mut meta = node.meta_mut();
            meta.name = new_name.to_os_string();
            meta.parent = Some(new_dir);
        }
        src_parent.touch();
        if dir != new_dir {
            dst_parent.touch();
        }

        debug!(from = dir, ?name, to = new_dir, ?new_name, addr = node.addr(), "renamed node");
        Ok(())
    }

    /// Re-links `addr` as `new_dir/new_name`.
    ///
    /// Every counter file owns a unique cell and every node has a single owner, so this only
    /// succeeds when `new_dir/new_name` already names `addr`. Any other request would create a
    /// second name for the node and fails with [`FsError::TooManyLinks`].
    pub fn link(
        &self,
        addr: InodeAddr,
        new_dir: InodeAddr,
        new_name: &OsStr,
    ) -> Result<Arc<Node>, FsError> {
        validate_name(new_name)?;
        let _guard = sync::lock(&self.structure);
        let node = self.node(addr)?;
        let dst_parent = self.dir(new_dir)?;

        match dst_parent.child(new_name) {
            Ok(existing) if Arc::ptr_eq(&existing, &node) => Ok(node),
            Ok(_) => Err(FsError::AlreadyExists),
            Err(FsError::NotFound) => Err(FsError::TooManyLinks),
            Err(e) => Err(e),
        }
    }

    /// Updates the advisory permission bits of `addr`.
    pub fn setattr(&self, addr: InodeAddr, perms: Option<InodePerms>) -> Result<INode, FsError> {
        let node = self.node(addr)?;
        if let Some(perms) = perms {
            let mut meta = node.meta_mut();
            meta.permissions = perms;
            meta.last_modified_at = SystemTime::now();
        }
        Ok(node.inode())
    }

    /// Iterates the children of `dir` in name order, starting at `offset`.
    ///
    /// `filler` receives each entry and the offset of the entry after it; returning `true` stops
    /// the iteration.
    pub fn readdir(
        &self,
        dir: InodeAddr,
        offset: u64,
        mut filler: impl FnMut(DirEntry<'_>, u64) -> bool,
    ) -> Result<(), FsError> {
        let parent = self.dir(dir)?;
        let children = parent.children()?;

        for (idx, (name, node)) in children.iter().enumerate().skip(
            usize::try_from(offset).unwrap_or(usize::MAX),
        ) {
            let next_offset = idx as u64 + 1;
            if filler(
                DirEntry {
                    name,
                    inode: node.inode(),
                },
                next_offset,
            ) {
                break;
            }
        }
        Ok(())
    }

    /// Fixed filesystem identity; there is no space accounting.
    #[must_use]
    pub fn statfs(&self) -> FsStats {
        let total = self.inodes.len() as u64;
        FsStats {
            magic: COUNTFS_MAGIC,
            block_size: BLOCK_SIZE,
            total_inodes: total,
            free_inodes: self
                .max_nodes
                .map_or(u64::MAX - total, |max| max.saturating_sub(total)),
            max_filename_length: u32::try_from(MAX_NAME_LEN).unwrap_or(u32::MAX),
        }
    }
}
