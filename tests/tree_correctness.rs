#![cfg(not(loom))]
#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use std::path::Path;

use common::{OWNER, empty_tree, list, name};
use countfs::fs::{COUNTFS_MAGIC, FsError, INodeType, InodePerms, MAX_NAME_LEN, ROOT_ADDR};

#[test]
fn new_tree_has_only_root() {
    let tree = empty_tree(None);
    assert_eq!(tree.node_count(), 1);

    let root = tree.getattr(ROOT_ADDR).unwrap();
    assert!(root.is_root());
    assert_eq!(root.itype, INodeType::Directory);
    assert_eq!(root.uid, OWNER.uid);
    assert!(list(&tree, ROOT_ADDR).is_empty());
}

#[test]
fn created_file_is_found_by_lookup() {
    let tree = empty_tree(None);
    let file = tree
        .create_file(ROOT_ADDR, name("counter"), InodePerms::FILE_DEFAULT)
        .unwrap();

    let found = tree.lookup(ROOT_ADDR, name("counter")).unwrap();
    assert_eq!(found.addr(), file.addr());

    let attr = tree.getattr(file.addr()).unwrap();
    assert_eq!(attr.itype, INodeType::File);
    assert_eq!(attr.parent, Some(ROOT_ADDR));
    assert_eq!(attr.size, 2, "a fresh counter renders as \"0\\n\"");
    assert_eq!(attr.permissions, InodePerms::FILE_DEFAULT);
    assert_eq!(file.cell().unwrap().get(), 0);
}

#[test]
fn duplicate_names_are_rejected_regardless_of_kind() {
    let tree = empty_tree(None);
    let first = tree
        .create_file(ROOT_ADDR, name("x"), InodePerms::FILE_DEFAULT)
        .unwrap();
    first.cell().unwrap().set(17);

    assert!(matches!(
        tree.create_file(ROOT_ADDR, name("x"), InodePerms::FILE_DEFAULT),
        Err(FsError::AlreadyExists)
    ));
    assert!(matches!(
        tree.create_directory(ROOT_ADDR, name("x"), InodePerms::DIR_DEFAULT),
        Err(FsError::AlreadyExists)
    ));
    assert_eq!(tree.node_count(), 2);

    let still_there = tree.lookup(ROOT_ADDR, name("x")).unwrap();
    assert_eq!(still_there.addr(), first.addr());
    assert_eq!(still_there.cell().unwrap().get(), 17);
}

#[test]
fn names_are_case_sensitive() {
    let tree = empty_tree(None);
    let lower = tree
        .create_file(ROOT_ADDR, name("counter"), InodePerms::FILE_DEFAULT)
        .unwrap();
    let upper = tree
        .create_file(ROOT_ADDR, name("Counter"), InodePerms::FILE_DEFAULT)
        .unwrap();

    assert_ne!(lower.addr(), upper.addr());
    assert!(matches!(
        tree.lookup(ROOT_ADDR, name("COUNTER")),
        Err(FsError::NotFound)
    ));
}

#[test]
fn invalid_names_are_rejected() {
    let tree = empty_tree(None);
    for bad in ["", ".", "..", "a/b"] {
        assert!(
            matches!(
                tree.create_file(ROOT_ADDR, name(bad), InodePerms::FILE_DEFAULT),
                Err(FsError::InvalidName(_))
            ),
            "{bad:?} should be rejected"
        );
    }

    let long = "n".repeat(MAX_NAME_LEN + 1);
    assert!(matches!(
        tree.create_directory(ROOT_ADDR, name(&long), InodePerms::DIR_DEFAULT),
        Err(FsError::NameTooLong { max: MAX_NAME_LEN })
    ));
    assert_eq!(tree.node_count(), 1);
}

#[test]
fn lookup_through_a_file_is_not_a_directory() {
    let tree = empty_tree(None);
    let file = tree
        .create_file(ROOT_ADDR, name("f"), InodePerms::FILE_DEFAULT)
        .unwrap();

    assert!(matches!(
        tree.lookup(file.addr(), name("anything")),
        Err(FsError::NotADirectory)
    ));
    assert!(matches!(
        tree.create_file(file.addr(), name("child"), InodePerms::FILE_DEFAULT),
        Err(FsError::NotADirectory)
    ));
}

#[test]
fn resolve_walks_nested_paths() {
    let tree = empty_tree(None);
    let a = tree
        .create_directory(ROOT_ADDR, name("a"), InodePerms::DIR_DEFAULT)
        .unwrap();
    let b = tree
        .create_directory(a.addr(), name("b"), InodePerms::DIR_DEFAULT)
        .unwrap();
    let file = tree
        .create_file(b.addr(), name("hits"), InodePerms::FILE_DEFAULT)
        .unwrap();

    assert_eq!(tree.resolve(Path::new("/a/b/hits")).unwrap().addr(), file.addr());
    assert_eq!(tree.resolve(Path::new("a//./b/hits")).unwrap().addr(), file.addr());
    assert_eq!(tree.resolve(Path::new("/")).unwrap().addr(), ROOT_ADDR);
    assert!(matches!(
        tree.resolve(Path::new("/a/missing")),
        Err(FsError::NotFound)
    ));
    assert!(matches!(
        tree.resolve(Path::new("/a/b/../b/hits")),
        Err(FsError::InvalidName(_))
    ));
}

#[test]
fn unlink_removes_counter_and_forgets_address() {
    let tree = empty_tree(None);
    let file = tree
        .create_file(ROOT_ADDR, name("gone"), InodePerms::FILE_DEFAULT)
        .unwrap();
    let addr = file.addr();

    tree.unlink(ROOT_ADDR, name("gone")).unwrap();

    assert!(matches!(tree.node(addr), Err(FsError::NotFound)));
    assert!(matches!(
        tree.lookup(ROOT_ADDR, name("gone")),
        Err(FsError::NotFound)
    ));
    assert!(file.parent().is_none(), "removed node must be detached");
    assert!(matches!(
        tree.unlink(ROOT_ADDR, name("gone")),
        Err(FsError::NotFound)
    ));
}

#[test]
fn unlink_and_rmdir_check_node_kind() {
    let tree = empty_tree(None);
    tree.create_directory(ROOT_ADDR, name("dir"), InodePerms::DIR_DEFAULT)
        .unwrap();
    tree.create_file(ROOT_ADDR, name("file"), InodePerms::FILE_DEFAULT)
        .unwrap();

    assert!(matches!(
        tree.unlink(ROOT_ADDR, name("dir")),
        Err(FsError::IsADirectory)
    ));
    assert!(matches!(
        tree.rmdir(ROOT_ADDR, name("file")),
        Err(FsError::NotADirectory)
    ));
    assert_eq!(list(&tree, ROOT_ADDR), ["dir", "file"]);
}

#[test]
fn rmdir_refuses_non_empty_directory() {
    let tree = empty_tree(None);
    let dir = tree
        .create_directory(ROOT_ADDR, name("dir"), InodePerms::DIR_DEFAULT)
        .unwrap();
    tree.create_file(dir.addr(), name("inner"), InodePerms::FILE_DEFAULT)
        .unwrap();

    assert!(matches!(
        tree.rmdir(ROOT_ADDR, name("dir")),
        Err(FsError::NotEmpty)
    ));

    tree.unlink(dir.addr(), name("inner")).unwrap();
    tree.rmdir(ROOT_ADDR, name("dir")).unwrap();
    assert_eq!(tree.node_count(), 1);
}

#[test]
fn readdir_is_sorted_and_resumable() {
    let tree = empty_tree(None);
    for n in ["b", "c", "a"] {
        tree.create_file(ROOT_ADDR, name(n), InodePerms::FILE_DEFAULT)
            .unwrap();
    }

    let mut seen = Vec::new();
    tree.readdir(ROOT_ADDR, 0, |entry, next| {
        seen.push((entry.name.to_string_lossy().into_owned(), next));
        false
    })
    .unwrap();
    assert_eq!(
        seen,
        [("a".to_owned(), 1), ("b".to_owned(), 2), ("c".to_owned(), 3)]
    );

    // Stop after the first entry, then resume from the offset it handed out.
    let mut resume_at = 0;
    tree.readdir(ROOT_ADDR, 0, |_, next| {
        resume_at = next;
        true
    })
    .unwrap();
    let mut rest = Vec::new();
    tree.readdir(ROOT_ADDR, resume_at, |entry, _| {
        rest.push(entry.name.to_string_lossy().into_owned());
        false
    })
    .unwrap();
    assert_eq!(rest, ["b", "c"]);

    let mut past_end = 0;
    tree.readdir(ROOT_ADDR, 10, |_, _| {
        past_end += 1;
        false
    })
    .unwrap();
    assert_eq!(past_end, 0);
}

#[test]
fn node_limit_reports_no_space_and_leaves_no_trace() {
    let tree = empty_tree(Some(3));
    tree.create_file(ROOT_ADDR, name("one"), InodePerms::FILE_DEFAULT)
        .unwrap();
    tree.create_directory(ROOT_ADDR, name("two"), InodePerms::DIR_DEFAULT)
        .unwrap();

    assert!(matches!(
        tree.create_file(ROOT_ADDR, name("three"), InodePerms::FILE_DEFAULT),
        Err(FsError::NoSpace)
    ));
    assert_eq!(tree.node_count(), 3);
    assert!(matches!(
        tree.lookup(ROOT_ADDR, name("three")),
        Err(FsError::NotFound)
    ));
    assert_eq!(tree.statfs().free_inodes, 0);

    // An existing name still reports the name clash, not the limit.
    assert!(matches!(
        tree.create_file(ROOT_ADDR, name("one"), InodePerms::FILE_DEFAULT),
        Err(FsError::AlreadyExists)
    ));

    tree.unlink(ROOT_ADDR, name("one")).unwrap();
    tree.create_file(ROOT_ADDR, name("three"), InodePerms::FILE_DEFAULT)
        .unwrap();
}

#[test]
fn setattr_updates_advisory_mode() {
    let tree = empty_tree(None);
    let file = tree
        .create_file(ROOT_ADDR, name("f"), InodePerms::FILE_DEFAULT)
        .unwrap();
    let before = tree.getattr(file.addr()).unwrap();

    let after = tree
        .setattr(file.addr(), Some(InodePerms::from_mode(0o600)))
        .unwrap();
    assert_eq!(after.permissions.bits(), 0o600);
    assert!(after.last_modified_at >= before.last_modified_at);

    let unchanged = tree.setattr(file.addr(), None).unwrap();
    assert_eq!(unchanged.permissions.bits(), 0o600);
}

#[test]
fn statfs_reports_fixed_identity() {
    let tree = empty_tree(Some(10));
    tree.create_file(ROOT_ADDR, name("f"), InodePerms::FILE_DEFAULT)
        .unwrap();

    let stats = tree.statfs();
    assert_eq!(stats.magic, COUNTFS_MAGIC);
    assert_eq!(stats.magic, 0x2016_0408);
    assert_eq!(stats.block_size, 4096);
    assert_eq!(stats.max_filename_length, 255);
    assert_eq!(stats.total_inodes, 2);
    assert_eq!(stats.free_inodes, 8);
}

#[test]
fn each_counter_file_has_its_own_cell() {
    let tree = empty_tree(None);
    let a = tree
        .create_file(ROOT_ADDR, name("a"), InodePerms::FILE_DEFAULT)
        .unwrap();
    let b = tree
        .create_file(ROOT_ADDR, name("b"), InodePerms::FILE_DEFAULT)
        .unwrap();

    a.cell().unwrap().set(41);
    assert_eq!(a.cell().unwrap().read_and_increment(), 41);
    assert_eq!(b.cell().unwrap().get(), 0);
    assert!(matches!(
        tree.root().cell(),
        Err(FsError::IsADirectory)
    ));
}
