//! Mount lifecycle.
//!
//! A [`MountSession`] owns the [`Tree`] of one mount and the table of handles opened against it.
//! Unmounting drops the tree, which drops every node and counter cell with it; handles that
//! outlive the tree are stale from then on.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::fs::handle::OpenCounter;
use crate::fs::tree::{Owner, Tree};
use crate::fs::{FileHandle, FsError, InodeAddr, InodePerms, ROOT_ADDR};
use crate::sync::atomic::{AtomicU64, Ordering};
use crate::sync::{self, RwLock};

/// Name of the counter file created by [`RootPolicy::prepopulated`].
pub const DEFAULT_COUNTER_NAME: &str = "counter";

/// How the root directory is populated at mount time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootPolicy {
    /// A single counter file named `name` under the root; the structure is fixed.
    Prepopulated {
        /// Name of the counter file.
        name: OsString,
    },
    /// An empty root. Hosts create, rename and remove counter files and directories freely.
    Dynamic,
}

impl RootPolicy {
    /// The pre-populated policy with the default counter name.
    #[must_use]
    pub fn prepopulated() -> Self {
        Self::Prepopulated {
            name: OsString::from(DEFAULT_COUNTER_NAME),
        }
    }

    /// Returns `true` if hosts may change the tree structure.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic)
    }
}

/// Per-mount settings that do not depend on the root policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOptions {
    /// Owner recorded on every node.
    pub owner: Owner,
    /// Permission bits for the pre-populated counter file.
    pub file_perms: InodePerms,
    /// Permission bits for the root directory.
    pub dir_perms: InodePerms,
    /// Upper bound on linked nodes, root included.
    pub max_nodes: Option<u64>,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            owner: Owner { uid: 0, gid: 0 },
            file_perms: InodePerms::FILE_DEFAULT,
            dir_perms: InodePerms::DIR_DEFAULT,
            max_nodes: None,
        }
    }
}

/// One active mount.
#[derive(Debug)]
pub struct MountSession {
    mount_point: PathBuf,
    policy: RootPolicy,
    options: MountOptions,
    /// `None` once unmounted.
    tree: RwLock<Option<Arc<Tree>>>,
    open_files: scc::HashMap<FileHandle, Arc<OpenCounter>>,
    /// Monotonically increasing file handle counter. Starts at 1 (0 is reserved).
    next_fh: AtomicU64,
}

impl MountSession {
    /// Builds a fresh tree for `mount_point` according to `policy`.
    pub fn mount(
        mount_point: impl Into<PathBuf>,
        policy: RootPolicy,
        options: MountOptions,
    ) -> Result<Self, FsError> {
        let mount_point = mount_point.into();
        let tree = Tree::new(options.owner, options.dir_perms, options.max_nodes);
        if let RootPolicy::Prepopulated { name } = &policy {
            tree.create_file(ROOT_ADDR, name, options.file_perms)?;
        }

        info!(mount_point = %mount_point.display(), ?policy, "mounted counter filesystem");
        Ok(Self {
            mount_point,
            policy,
            options,
            tree: RwLock::new(Some(Arc::new(tree))),
            open_files: scc::HashMap::new(),
            next_fh: AtomicU64::new(1),
        })
    }

    /// Where this session is mounted.
    #[must_use]
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// The root policy this session was mounted with.
    #[must_use]
    pub fn policy(&self) -> &RootPolicy {
        &self.policy
    }

    /// The options this session was mounted with.
    #[must_use]
    pub fn options(&self) -> &MountOptions {
        &self.options
    }

    /// Returns `true` until [`unmount`](Self::unmount) is called.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        sync::read(&self.tree).is_some()
    }

    /// The mounted tree, or [`FsError::StaleHandle`] after unmount.
    pub fn tree(&self) -> Result<Arc<Tree>, FsError> {
        sync::read(&self.tree)
            .as_ref()
            .map(Arc::clone)
            .ok_or(FsError::StaleHandle)
    }

    /// Opens the counter file at `addr` and returns its new handle number.
    pub fn open(&self, addr: InodeAddr) -> Result<FileHandle, FsError> {
        // Held across the insert; `unmount` clears the table only after taking the tree.
        let tree = sync::read(&self.tree);
        let node = tree.as_ref().ok_or(FsError::StaleHandle)?.node(addr)?;
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let handle = OpenCounter::new(fh, &node)?;
        drop(self.open_files.insert_sync(fh, Arc::new(handle)));
        drop(tree);
        debug!(fh, addr, "opened counter");
        Ok(fh)
    }

    /// The open handle `fh`.
    pub fn handle(&self, fh: FileHandle) -> Result<Arc<OpenCounter>, FsError> {
        if !self.is_mounted() {
            return Err(FsError::StaleHandle);
        }
        self.open_files
            .read_sync(&fh, |_, handle| Arc::clone(handle))
            .ok_or(FsError::BadHandle(fh))
    }

    /// Releases `fh`. The counter cell stays with its file.
    pub fn close(&self, fh: FileHandle) -> Result<(), FsError> {
        if !self.is_mounted() {
            return Err(FsError::StaleHandle);
        }
        self.open_files
            .remove_sync(&fh)
            .map(|_| debug!(fh, "closed counter"))
            .ok_or(FsError::BadHandle(fh))
    }

    /// Number of handles currently open.
    #[must_use]
    pub fn open_handles(&self) -> usize {
        self.open_files.len()
    }

    /// Destroys the tree and forgets every open handle.
    ///
    /// Returns `false` if the session was already unmounted.
    pub fn unmount(&self) -> bool {
        let Some(tree) = sync::write(&self.tree).take() else {
            return false;
        };
        let open = self.open_files.len();
        self.open_files.retain_sync(|_, _| false);
        if open > 0 {
            warn!(open, "unmounting with open handles; they are now stale");
        }
        info!(
            mount_point = %self.mount_point.display(),
            nodes = tree.node_count(),
            "unmounted counter filesystem"
        );
        true
    }
}
