//! The counter filesystem and its host bindings.
/// Atomic integer cells backing counter files.
pub mod counter;
/// Error kinds returned by every filesystem operation.
pub mod error;
/// FUSE adapter: maps [`fuser::Filesystem`] callbacks to a [`protocol::VfsProtocol`].
pub mod fuser;
/// Open instances of counter files.
pub mod handle;
/// Directory and counter-file nodes.
pub mod node;
/// The host-independent callback set and its implementation.
pub mod protocol;
/// Mount lifecycle and the open-handle table.
pub mod session;
/// Name resolution and structural mutation.
pub mod tree;

pub use counter::CounterCell;
pub use error::{FsError, ParseFailure};
pub use protocol::{CounterFs, VfsProtocol};
pub use session::{MountOptions, MountSession, RootPolicy};
pub use tree::Tree;

use std::ffi::OsStr;
use std::time::SystemTime;

use bitflags::bitflags;

/// Type representing an inode identifier.
pub type InodeAddr = u64;

/// Type representing a file handle.
pub type FileHandle = u64;

/// Address of the root directory. Matches the FUSE root inode number.
pub const ROOT_ADDR: InodeAddr = 1;

/// Magic number reported by [`Tree::statfs`].
pub const COUNTFS_MAGIC: u32 = 0x2016_0408;

/// Block size reported to hosts.
pub const BLOCK_SIZE: u32 = 4096;

/// Longest accepted entry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

bitflags! {
    /// Permission bits for an inode, similar to Unix file permissions.
    ///
    /// These are advisory: countfs records and reports them but never enforces them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InodePerms: u16 {
        /// Other: execute permission.
        const OTHER_EXECUTE = 1 << 0;
        /// Other: write permission.
        const OTHER_WRITE   = 1 << 1;
        /// Other: read permission.
        const OTHER_READ    = 1 << 2;

        /// Group: execute permission.
        const GROUP_EXECUTE = 1 << 3;
        /// Group: write permission.
        const GROUP_WRITE   = 1 << 4;
        /// Group: read permission.
        const GROUP_READ    = 1 << 5;

        /// Owner: execute permission.
        const OWNER_EXECUTE = 1 << 6;
        /// Owner: write permission.
        const OWNER_WRITE   = 1 << 7;
        /// Owner: read permission.
        const OWNER_READ    = 1 << 8;

        /// Sticky bit.
        const STICKY        = 1 << 9;
        /// Set-group-ID bit.
        const SETGID        = 1 << 10;
        /// Set-user-ID bit.
        const SETUID        = 1 << 11;

        /// Other: read, write, and execute.
        const OTHER_RWX = Self::OTHER_READ.bits()
            | Self::OTHER_WRITE.bits()
            | Self::OTHER_EXECUTE.bits();
        /// Group: read, write, and execute.
        const GROUP_RWX = Self::GROUP_READ.bits()
            | Self::GROUP_WRITE.bits()
            | Self::GROUP_EXECUTE.bits();
        /// Owner: read, write, and execute.
        const OWNER_RWX = Self::OWNER_READ.bits()
            | Self::OWNER_WRITE.bits()
            | Self::OWNER_EXECUTE.bits();
    }
}

impl InodePerms {
    /// Default bits for counter files (`0644`).
    pub const FILE_DEFAULT: Self = Self::OWNER_READ
        .union(Self::OWNER_WRITE)
        .union(Self::GROUP_READ)
        .union(Self::OTHER_READ);

    /// Default bits for directories (`0755`).
    pub const DIR_DEFAULT: Self = Self::OWNER_RWX
        .union(Self::GROUP_READ)
        .union(Self::GROUP_EXECUTE)
        .union(Self::OTHER_READ)
        .union(Self::OTHER_EXECUTE);

    /// Extracts the permission bits from a raw `mode_t`, discarding the file type bits.
    #[must_use]
    #[expect(
        clippy::cast_possible_truncation,
        reason = "mode is masked to 12 bits before narrowing"
    )]
    pub fn from_mode(mode: u32) -> Self {
        Self::from_bits_truncate((mode & 0o7777) as u16)
    }
}

bitflags! {
    /// Flags for opening a file, similar to Unix open(2) flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: i32 {
        /// Open for reading only.
        const RDONLY = libc::O_RDONLY;
        /// Open for writing only.
        const WRONLY = libc::O_WRONLY;
        /// Open for reading and writing.
        const RDWR = libc::O_RDWR;

        /// Append on each write.
        const APPEND = libc::O_APPEND;
        /// Truncate to zero length.
        const TRUNC = libc::O_TRUNC;
        /// Create file if it does not exist.
        const CREAT = libc::O_CREAT;
        /// Error if file already exists (with `CREAT`).
        const EXCL = libc::O_EXCL;
    }
}

bitflags! {
    /// Flags accepted by [`Tree::rename`], mirroring renameat2(2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenameFlags: u32 {
        /// Fail with `EEXIST` instead of replacing an existing target.
        const NOREPLACE = 1 << 0;
    }
}

/// The type of an inode entry in the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum INodeType {
    /// A counter file.
    File,
    /// A directory.
    Directory,
}

/// Attribute snapshot of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct INode {
    /// The address of this inode, which serves as its unique identifier.
    pub addr: InodeAddr,
    /// The permissions associated with this inode, represented as a bitfield.
    pub permissions: InodePerms,
    /// The user ID of the owner of this inode.
    pub uid: u32,
    /// The group ID of the owner of this inode.
    pub gid: u32,
    /// The time this inode was created at.
    pub create_time: SystemTime,
    /// The time this inode was last modified at.
    pub last_modified_at: SystemTime,
    /// The parent inode address, if any. This is `None` for the root inode.
    pub parent: Option<InodeAddr>,
    /// For counter files, the length of the current rendered value. Zero for directories.
    pub size: u64,
    /// Whether this is a counter file or a directory.
    pub itype: INodeType,
}

impl INode {
    /// Check if this inode is the root inode (i.e., has no parent).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// A directory entry yielded by [`Tree::readdir`].
#[derive(Debug, Clone, Copy)]
pub struct DirEntry<'a> {
    /// The name of this entry within its parent directory.
    pub name: &'a OsStr,
    /// The full inode data for this entry.
    pub inode: INode,
}

/// Filesystem statistics returned by [`Tree::statfs`].
///
/// There is no space accounting: block counts are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FsStats {
    /// Filesystem magic number, always [`COUNTFS_MAGIC`].
    pub magic: u32,
    /// Filesystem block size (bytes).
    pub block_size: u32,
    /// Number of nodes currently linked, including the root.
    pub total_inodes: u64,
    /// Nodes that can still be created before hitting the node limit.
    pub free_inodes: u64,
    /// Maximum filename length (bytes).
    pub max_filename_length: u32,
}
