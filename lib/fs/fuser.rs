//! FUSE adapter: maps [`fuser::Filesystem`] callbacks to a [`VfsProtocol`].

use std::ffi::OsStr;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};

use super::protocol::VfsProtocol;
use super::{BLOCK_SIZE, FsError, INode, INodeType, InodePerms, OpenFlags, RenameFlags};

/// Trait abstracting the `.error(errno)` method common to all fuser reply types.
trait FuseReply {
    fn error(self, errno: i32);
}

macro_rules! impl_fuse_reply {
    ($($ty:ty),* $(,)?) => {
        $(impl FuseReply for $ty {
            fn error(self, errno: i32) {
                // Calls the inherent fuser method (not this trait method).
                self.error(errno);
            }
        })*
    };
}

impl_fuse_reply!(
    fuser::ReplyEntry,
    fuser::ReplyAttr,
    fuser::ReplyDirectory,
    fuser::ReplyOpen,
    fuser::ReplyData,
    fuser::ReplyWrite,
    fuser::ReplyCreate,
    fuser::ReplyEmpty,
    fuser::ReplyStatfs,
);

/// Extension trait on `Result<T, FsError>` for FUSE reply handling.
///
/// Centralizes the error-logging + errno-reply path so each FUSE callback
/// only has to express its success path.
trait FuseResultExt<T> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R));
}

impl<T> FuseResultExt<T> for Result<T, FsError> {
    fn fuse_reply<R: FuseReply>(self, reply: R, on_ok: impl FnOnce(T, R)) {
        match self {
            Ok(val) => on_ok(val, reply),
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(i32::from(&e));
            }
        }
    }
}

/// Convert an `INode` to the fuser-specific `FileAttr`.
fn inode_to_fuser_attr(inode: &INode) -> fuser::FileAttr {
    fuser::FileAttr {
        ino: inode.addr,
        size: inode.size,
        blocks: inode.size.div_ceil(512),
        atime: inode.last_modified_at,
        mtime: inode.last_modified_at,
        ctime: inode.last_modified_at,
        crtime: inode.create_time,
        kind: inode_type_to_fuser(inode.itype),
        perm: inode.permissions.bits(),
        nlink: match inode.itype {
            INodeType::Directory => 2,
            INodeType::File => 1,
        },
        uid: inode.uid,
        gid: inode.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

fn inode_type_to_fuser(itype: INodeType) -> fuser::FileType {
    match itype {
        INodeType::Directory => fuser::FileType::Directory,
        INodeType::File => fuser::FileType::RegularFile,
    }
}

/// Applies the umask the kernel hands us on create/mkdir.
fn masked_perms(mode: u32, umask: u32) -> InodePerms {
    InodePerms::from_mode(mode & !umask)
}

/// Bridges a [`VfsProtocol`] to the [`fuser::Filesystem`] trait.
pub struct FuserAdapter<P: VfsProtocol> {
    fs: P,
}

impl<P: VfsProtocol> FuserAdapter<P> {
    // Every read changes the rendered size of a counter, so the kernel must not cache attributes
    // or entries.
    const TTL: Duration = Duration::ZERO;

    /// Wraps `fs` for mounting.
    pub fn new(fs: P) -> Self {
        Self { fs }
    }

    /// The wrapped protocol implementation.
    pub fn protocol(&self) -> &P {
        &self.fs
    }
}

impl<P: VfsProtocol> fuser::Filesystem for FuserAdapter<P> {
    #[instrument(name = "FuserAdapter::init", skip(self, _req, _config))]
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        info!("FUSE session initialized");
        Ok(())
    }

    #[instrument(name = "FuserAdapter::destroy", skip(self))]
    fn destroy(&mut self) {
        info!("FUSE session destroyed");
        self.fs.destroy();
    }

    #[instrument(name = "FuserAdapter::lookup", skip(self, _req, reply))]
    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        self.fs.lookup(parent, name).fuse_reply(reply, |inode, reply| {
            let f_attr = inode_to_fuser_attr(&inode);
            debug!(?f_attr, "replying...");
            reply.entry(&Self::TTL, &f_attr, 0);
        });
    }

    #[instrument(name = "FuserAdapter::forget", skip(self, _req))]
    fn forget(&mut self, _req: &fuser::Request<'_>, _ino: u64, _nlookup: u64) {
        // Nodes are owned by the tree, not by kernel lookups.
    }

    #[instrument(name = "FuserAdapter::getattr", skip(self, _req, _fh, reply))]
    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        self.fs.getattr(ino).fuse_reply(reply, |inode, reply| {
            let attr = inode_to_fuser_attr(&inode);
            debug!(?attr, "replying...");
            reply.attr(&Self::TTL, &attr);
        });
    }

    #[instrument(
        name = "FuserAdapter::setattr",
        skip(
            self, _req, _uid, _gid, _atime, _mtime, _ctime, _fh, _crtime, _chgtime, _bkuptime,
            _flags, reply
        )
    )]
    fn setattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: fuser::ReplyAttr,
    ) {
        self.fs
            .setattr(ino, mode.map(InodePerms::from_mode), size)
            .fuse_reply(reply, |inode, reply| {
                reply.attr(&Self::TTL, &inode_to_fuser_attr(&inode));
            });
    }

    #[instrument(name = "FuserAdapter::readdir", skip(self, _req, _fh, reply))]
    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        let mut overflow = false;
        let result = self
            .fs
            .readdir(ino, offset.cast_unsigned(), |de, next_offset| {
                let Ok(next) = i64::try_from(next_offset) else {
                    error!(next_offset, "directory offset too large for fuser");
                    overflow = true;
                    return true;
                };
                debug!(name = ?de.name, ino = de.inode.addr, "adding entry to reply...");
                reply.add(de.inode.addr, next, inode_type_to_fuser(de.inode.itype), de.name)
            });

        match result {
            Ok(()) if overflow => reply.error(libc::EIO),
            Ok(()) => {
                debug!("finalizing reply...");
                reply.ok();
            }
            Err(e) => {
                debug!(error = %e, "replying error");
                reply.error(i32::from(&e));
            }
        }
    }

    #[instrument(name = "FuserAdapter::open", skip(self, _req, flags, reply))]
    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        let flags = OpenFlags::from_bits_truncate(flags);
        self.fs.open(ino, flags).fuse_reply(reply, |fh, reply| {
            debug!(handle = fh, "replying...");
            reply.opened(fh, fuser::consts::FOPEN_DIRECT_IO);
        });
    }

    #[instrument(
        name = "FuserAdapter::read",
        skip(self, _req, _ino, _flags, _lock_owner, reply)
    )]
    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        self.fs
            .read(fh, offset.cast_unsigned(), size)
            .fuse_reply(reply, |data, reply| {
                debug!(read_bytes = data.len(), "replying...");
                reply.data(&data);
            });
    }

    #[instrument(
        name = "FuserAdapter::write",
        skip(self, _req, _ino, data, _write_flags, _flags, _lock_owner, reply),
        fields(len = data.len())
    )]
    fn write(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        let result = match self.fs.write(fh, offset.cast_unsigned(), data) {
            // Hosts expect the whole payload to be taken even when it is ignored.
            Err(FsError::Parse { consumed, source }) => {
                warn!(error = %source, consumed, "write not applied, reporting as written");
                Ok(consumed)
            }
            other => other,
        };
        result.fuse_reply(reply, |written, reply| {
            reply.written(u32::try_from(written).unwrap_or(u32::MAX));
        });
    }

    #[instrument(name = "FuserAdapter::create", skip(self, _req, reply))]
    fn create(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let exclusive = OpenFlags::from_bits_truncate(flags).contains(OpenFlags::EXCL);
        self.fs
            .create(parent, name, masked_perms(mode, umask), exclusive)
            .fuse_reply(reply, |(inode, fh), reply| {
                debug!(handle = fh, ino = inode.addr, "replying...");
                reply.created(
                    &Self::TTL,
                    &inode_to_fuser_attr(&inode),
                    0,
                    fh,
                    fuser::consts::FOPEN_DIRECT_IO,
                );
            });
    }

    #[instrument(
        name = "FuserAdapter::release",
        skip(self, _req, _ino, _flags, _lock_owner, _flush, reply)
    )]
    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs.release(fh).fuse_reply(reply, |(), reply| {
            debug!("replying ok");
            reply.ok();
        });
    }

    #[instrument(name = "FuserAdapter::mkdir", skip(self, _req, reply))]
    fn mkdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: fuser::ReplyEntry,
    ) {
        self.fs
            .mkdir(parent, name, masked_perms(mode, umask))
            .fuse_reply(reply, |inode, reply| {
                reply.entry(&Self::TTL, &inode_to_fuser_attr(&inode), 0);
            });
    }

    #[instrument(name = "FuserAdapter::unlink", skip(self, _req, reply))]
    fn unlink(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs
            .unlink(parent, name)
            .fuse_reply(reply, |(), reply| reply.ok());
    }

    #[instrument(name = "FuserAdapter::rmdir", skip(self, _req, reply))]
    fn rmdir(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEmpty,
    ) {
        self.fs
            .rmdir(parent, name)
            .fuse_reply(reply, |(), reply| reply.ok());
    }

    #[instrument(name = "FuserAdapter::rename", skip(self, _req, reply))]
    fn rename(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        // RENAME_EXCHANGE and RENAME_WHITEOUT have no meaning here.
        let Some(flags) = RenameFlags::from_bits(flags) else {
            debug!(flags, "unsupported rename flags");
            reply.error(libc::EINVAL);
            return;
        };
        self.fs
            .rename(parent, name, newparent, newname, flags)
            .fuse_reply(reply, |(), reply| reply.ok());
    }

    #[instrument(name = "FuserAdapter::link", skip(self, _req, reply))]
    fn link(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        self.fs
            .link(ino, newparent, newname)
            .fuse_reply(reply, |inode, reply| {
                reply.entry(&Self::TTL, &inode_to_fuser_attr(&inode), 0);
            });
    }

    #[instrument(name = "FuserAdapter::statfs", skip(self, _req, _ino, reply))]
    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        self.fs.statfs().fuse_reply(reply, |stats, reply| {
            debug!(?stats, "replying...");
            reply.statfs(
                0,
                0,
                0,
                stats.total_inodes,
                stats.free_inodes,
                stats.block_size,
                stats.max_filename_length,
                stats.block_size,
            );
        });
    }
}
