#![allow(dead_code, missing_docs, clippy::unwrap_used)]

use std::ffi::OsStr;
use std::sync::Arc;

use countfs::fs::tree::Owner;
use countfs::fs::{
    CounterFs, FileHandle, InodePerms, MountOptions, MountSession, RootPolicy, Tree, VfsProtocol,
};

pub const OWNER: Owner = Owner {
    uid: 1000,
    gid: 1000,
};

pub fn options(max_nodes: Option<u64>) -> MountOptions {
    MountOptions {
        owner: OWNER,
        max_nodes,
        ..MountOptions::default()
    }
}

/// A mount with an empty, host-populated root.
pub fn dynamic_fs() -> CounterFs {
    mount(RootPolicy::Dynamic, None)
}

/// A mount with the single default `counter` file.
pub fn prepopulated_fs() -> CounterFs {
    mount(RootPolicy::prepopulated(), None)
}

pub fn mount(policy: RootPolicy, max_nodes: Option<u64>) -> CounterFs {
    let session = MountSession::mount("/mnt/countfs-test", policy, options(max_nodes)).unwrap();
    CounterFs::new(Arc::new(session))
}

pub fn empty_tree(max_nodes: Option<u64>) -> Tree {
    Tree::new(OWNER, InodePerms::DIR_DEFAULT, max_nodes)
}

pub fn name(s: &str) -> &OsStr {
    OsStr::new(s)
}

/// One logical read: the whole rendered value from offset 0.
pub fn read_text(fs: &CounterFs, fh: FileHandle) -> String {
    let bytes = fs.read(fh, 0, 4096).unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Parses the value out of a [`read_text`] result.
pub fn read_value(fs: &CounterFs, fh: FileHandle) -> i64 {
    read_text(fs, fh).trim_end().parse().unwrap()
}

/// Names in `dir`, in readdir order.
pub fn list(tree: &Tree, dir: u64) -> Vec<String> {
    let mut names = Vec::new();
    tree.readdir(dir, 0, |entry, _| {
        names.push(entry.name.to_string_lossy().into_owned());
        false
    })
    .unwrap();
    names
}
