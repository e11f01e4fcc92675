//! The host-independent callback set.
//!
//! [`VfsProtocol`] is what a host binding (FUSE, or a test harness) drives. [`CounterFs`] is the
//! only implementation: it resolves names and addresses through the session's [`Tree`] and routes
//! data operations to the session's open handles.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::fs::session::MountSession;
use crate::fs::{
    DirEntry, FileHandle, FsError, FsStats, INode, InodeAddr, InodePerms, OpenFlags, RenameFlags,
    Tree,
};

/// Filesystem operations as seen by a host.
///
/// Every method is synchronous and may be called from any thread.
pub trait VfsProtocol: Send + Sync + 'static {
    /// Looks up `name` in the directory `parent`.
    fn lookup(&self, parent: InodeAddr, name: &OsStr) -> Result<INode, FsError>;

    /// Attribute snapshot of `addr`.
    fn getattr(&self, addr: InodeAddr) -> Result<INode, FsError>;

    /// Changes advisory permission bits. `size` may only be `Some(0)`, which is accepted and
    /// ignored so `O_TRUNC` opens keep working.
    fn setattr(
        &self,
        addr: InodeAddr,
        perms: Option<InodePerms>,
        size: Option<u64>,
    ) -> Result<INode, FsError>;

    /// Lists `dir` starting at `offset`. See [`Tree::readdir`].
    fn readdir(
        &self,
        dir: InodeAddr,
        offset: u64,
        filler: impl FnMut(DirEntry<'_>, u64) -> bool,
    ) -> Result<(), FsError>;

    /// Opens the counter file `addr`.
    fn open(&self, addr: InodeAddr, flags: OpenFlags) -> Result<FileHandle, FsError>;

    /// Reads from an open handle. See [`OpenCounter::read`](crate::fs::handle::OpenCounter::read).
    fn read(&self, fh: FileHandle, offset: u64, size: u32) -> Result<Bytes, FsError>;

    /// Writes to an open handle. See
    /// [`OpenCounter::write`](crate::fs::handle::OpenCounter::write).
    fn write(&self, fh: FileHandle, offset: u64, data: &[u8]) -> Result<usize, FsError>;

    /// Creates and opens a counter file.
    ///
    /// When `exclusive` is `false` and `parent/name` is already a counter file, that file is
    /// opened instead.
    fn create(
        &self,
        parent: InodeAddr,
        name: &OsStr,
        perms: InodePerms,
        exclusive: bool,
    ) -> Result<(INode, FileHandle), FsError>;

    /// Closes an open handle.
    fn release(&self, fh: FileHandle) -> Result<(), FsError>;

    /// Creates a directory.
    fn mkdir(&self, parent: InodeAddr, name: &OsStr, perms: InodePerms) -> Result<INode, FsError>;

    /// Removes a counter file.
    fn unlink(&self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError>;

    /// Removes an empty directory.
    fn rmdir(&self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError>;

    /// Moves `parent/name` to `new_parent/new_name`.
    fn rename(
        &self,
        parent: InodeAddr,
        name: &OsStr,
        new_parent: InodeAddr,
        new_name: &OsStr,
        flags: RenameFlags,
    ) -> Result<(), FsError>;

    /// Links `addr` as `new_parent/new_name`.
    fn link(
        &self,
        addr: InodeAddr,
        new_parent: InodeAddr,
        new_name: &OsStr,
    ) -> Result<INode, FsError>;

    /// Filesystem statistics.
    fn statfs(&self) -> Result<FsStats, FsError>;

    /// Called once when the host tears the mount down.
    fn destroy(&self);
}

/// [`VfsProtocol`] over a [`MountSession`].
#[derive(Debug, Clone)]
pub struct CounterFs {
    session: Arc<MountSession>,
}

impl CounterFs {
    /// Serves `session`.
    #[must_use]
    pub fn new(session: Arc<MountSession>) -> Self {
        Self { session }
    }

    /// The session being served.
    #[must_use]
    pub fn session(&self) -> &Arc<MountSession> {
        &self.session
    }

    /// The tree, if this mount allows structural changes.
    fn structural(&self) -> Result<Arc<Tree>, FsError> {
        let tree = self.session.tree()?;
        if self.session.policy().is_dynamic() {
            Ok(tree)
        } else {
            debug!("structural operation refused on pre-populated mount");
            Err(FsError::Unsupported)
        }
    }

    /// Opens a counter file by mount-relative path, e.g. `"counter"` or `"/a/b"`.
    pub fn open_path(&self, path: impl AsRef<Path>) -> Result<FileHandle, FsError> {
        let node = self.session.tree()?.resolve(path.as_ref())?;
        self.open(node.addr(), OpenFlags::RDWR)
    }
}

impl VfsProtocol for CounterFs {
    fn lookup(&self, parent: InodeAddr, name: &OsStr) -> Result<INode, FsError> {
        Ok(self.session.tree()?.lookup(parent, name)?.inode())
    }

    fn getattr(&self, addr: InodeAddr) -> Result<INode, FsError> {
        self.session.tree()?.getattr(addr)
    }

    fn setattr(
        &self,
        addr: InodeAddr,
        perms: Option<InodePerms>,
        size: Option<u64>,
    ) -> Result<INode, FsError> {
        let tree = self.session.tree()?;
        match size {
            None | Some(0) => {}
            Some(size) => {
                debug!(addr, size, "refusing to resize counter file");
                return Err(FsError::Unsupported);
            }
        }
        tree.setattr(addr, perms)
    }

    fn readdir(
        &self,
        dir: InodeAddr,
        offset: u64,
        filler: impl FnMut(DirEntry<'_>, u64) -> bool,
    ) -> Result<(), FsError> {
        self.session.tree()?.readdir(dir, offset, filler)
    }

    fn open(&self, addr: InodeAddr, flags: OpenFlags) -> Result<FileHandle, FsError> {
        trace!(addr, ?flags, "open");
        self.session.open(addr)
    }

    fn read(&self, fh: FileHandle, offset: u64, size: u32) -> Result<Bytes, FsError> {
        self.session.handle(fh)?.read(offset, size)
    }

    fn write(&self, fh: FileHandle, offset: u64, data: &[u8]) -> Result<usize, FsError> {
        self.session.handle(fh)?.write(offset, data)
    }

    fn create(
        &self,
        parent: InodeAddr,
        name: &OsStr,
        perms: InodePerms,
        exclusive: bool,
    ) -> Result<(INode, FileHandle), FsError> {
        let tree = self.structural()?;
        let node = match tree.create_file(parent, name, perms) {
            Ok(node) => node,
            Err(FsError::AlreadyExists) if !exclusive => {
                let existing = tree.lookup(parent, name)?;
                if existing.is_dir() {
                    return Err(FsError::IsADirectory);
                }
                existing
            }
            Err(e) => return Err(e),
        };
        let fh = self.session.open(node.addr())?;
        Ok((node.inode(), fh))
    }

    fn release(&self, fh: FileHandle) -> Result<(), FsError> {
        self.session.close(fh)
    }

    fn mkdir(&self, parent: InodeAddr, name: &OsStr, perms: InodePerms) -> Result<INode, FsError> {
        Ok(self
            .structural()?
            .create_directory(parent, name, perms)?
            .inode())
    }

    fn unlink(&self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        self.structural()?.unlink(parent, name)
    }

    fn rmdir(&self, parent: InodeAddr, name: &OsStr) -> Result<(), FsError> {
        self.structural()?.rmdir(parent, name)
    }

    fn rename(
        &self,
        parent: InodeAddr,
        name: &OsStr,
        new_parent: InodeAddr,
        new_name: &OsStr,
        flags: RenameFlags,
    ) -> Result<(), FsError> {
        self.structural()?
            .rename(parent, name, new_parent, new_name, flags)
    }

    fn link(
        &self,
        addr: InodeAddr,
        new_parent: InodeAddr,
        new_name: &OsStr,
    ) -> Result<INode, FsError> {
        Ok(self.structural()?.link(addr, new_parent, new_name)?.inode())
    }

    fn statfs(&self) -> Result<FsStats, FsError> {
        Ok(self.session.tree()?.statfs())
    }

    fn destroy(&self) {
        self.session.unmount();
    }
}
