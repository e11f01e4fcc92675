#![cfg(not(loom))]
#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod common;

use common::{dynamic_fs, name, prepopulated_fs, read_text, read_value};
use countfs::fs::{FsError, InodePerms, OpenFlags, ParseFailure, ROOT_ADDR, VfsProtocol};

#[test]
fn every_logical_read_increments_once() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();

    assert_eq!(read_text(&fs, fh), "0\n");
    assert_eq!(read_text(&fs, fh), "1\n");
    assert_eq!(read_text(&fs, fh), "2\n");
}

#[test]
fn write_sets_value_for_following_reads() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("/counter").unwrap();

    assert_eq!(fs.write(fh, 0, b"42").unwrap(), 2);
    assert_eq!(read_text(&fs, fh), "42\n");
    assert_eq!(read_text(&fs, fh), "43\n");
}

#[test]
fn negative_and_padded_payloads_are_accepted() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();

    fs.write(fh, 0, b"-5\n").unwrap();
    assert_eq!(read_text(&fs, fh), "-5\n");
    assert_eq!(read_text(&fs, fh), "-4\n");

    fs.write(fh, 0, b"  7 \n").unwrap();
    assert_eq!(read_value(&fs, fh), 7);
}

#[test]
fn malformed_write_is_consumed_but_ignored() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();
    fs.write(fh, 0, b"10").unwrap();

    let err = fs.write(fh, 0, b"abc").unwrap_err();
    let FsError::Parse { consumed, source } = err else {
        panic!("expected a parse error, got {err:?}");
    };
    assert_eq!(consumed, 3);
    assert!(matches!(source, ParseFailure::Invalid(_)));

    assert!(matches!(
        fs.write(fh, 0, b"\n"),
        Err(FsError::Parse {
            consumed: 1,
            source: ParseFailure::Empty
        })
    ));
    assert_eq!(read_text(&fs, fh), "10\n");
}

#[test]
fn oversized_payload_is_truncated_to_twelve_bytes() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();

    assert_eq!(fs.write(fh, 0, b"12345678901234").unwrap(), 14);
    assert_eq!(read_text(&fs, fh), "123456789012\n");
}

#[test]
fn truncation_can_leave_an_unparsable_prefix() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();

    // i64::MAX has 19 digits; its first 12 still parse.
    fs.write(fh, 0, b"9223372036854775807").unwrap();
    assert_eq!(read_value(&fs, fh), 922_337_203_685);

    // Leading padding eats into the 12 bytes and leaves only whitespace.
    assert!(matches!(
        fs.write(fh, 0, b"            5"),
        Err(FsError::Parse {
            consumed: 13,
            source: ParseFailure::Empty
        })
    ));
}

#[test]
fn chunked_write_accumulates_in_scratch() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();

    fs.write(fh, 0, b"12").unwrap();
    fs.write(fh, 2, b"34").unwrap();
    assert_eq!(read_value(&fs, fh), 1234);

    // A new write at offset zero starts over.
    fs.write(fh, 0, b"8").unwrap();
    assert_eq!(read_value(&fs, fh), 8);
}

#[test]
fn nonzero_offset_windows_the_last_snapshot() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();
    fs.write(fh, 0, b"123").unwrap();

    assert_eq!(&fs.read(fh, 0, 2).unwrap()[..], b"12");
    assert_eq!(&fs.read(fh, 2, 10).unwrap()[..], b"3\n");
    assert!(fs.read(fh, 4, 10).unwrap().is_empty());
    assert!(fs.read(fh, 1 << 40, 10).unwrap().is_empty());

    // Only the offset-zero read counted.
    assert_eq!(read_text(&fs, fh), "124\n");
}

#[test]
fn short_buffer_still_increments_once() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();
    fs.write(fh, 0, b"99").unwrap();

    assert_eq!(&fs.read(fh, 0, 1).unwrap()[..], b"9");
    assert_eq!(&fs.read(fh, 1, 1).unwrap()[..], b"9");
    assert_eq!(&fs.read(fh, 2, 1).unwrap()[..], b"\n");
    assert_eq!(read_text(&fs, fh), "100\n");
}

#[test]
fn nonzero_offset_without_snapshot_does_not_increment() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();

    assert_eq!(&fs.read(fh, 1, 16).unwrap()[..], b"\n");
    assert_eq!(read_text(&fs, fh), "0\n");
}

#[test]
fn handles_on_one_file_share_the_counter() {
    let fs = prepopulated_fs();
    let first = fs.open_path("counter").unwrap();
    let second = fs.open_path("counter").unwrap();
    assert_ne!(first, second);

    assert_eq!(read_value(&fs, first), 0);
    assert_eq!(read_value(&fs, second), 1);

    fs.write(first, 0, b"10").unwrap();
    assert_eq!(read_value(&fs, second), 10);
    assert_eq!(read_value(&fs, first), 11);
}

#[test]
fn attribute_size_tracks_rendered_value() {
    let fs = prepopulated_fs();
    let addr = fs.lookup(ROOT_ADDR, name("counter")).unwrap().addr;
    let fh = fs.open(addr, OpenFlags::RDWR).unwrap();

    assert_eq!(fs.getattr(addr).unwrap().size, 2);
    fs.write(fh, 0, b"-1000").unwrap();
    assert_eq!(fs.getattr(addr).unwrap().size, 6);

    // getattr must not count as a read.
    assert_eq!(read_value(&fs, fh), -1000);
}

#[test]
fn separate_files_count_independently() {
    let fs = dynamic_fs();
    let (_, a) = fs
        .create(ROOT_ADDR, name("a"), InodePerms::FILE_DEFAULT, true)
        .unwrap();
    let (_, b) = fs
        .create(ROOT_ADDR, name("b"), InodePerms::FILE_DEFAULT, true)
        .unwrap();

    for _ in 0..5 {
        read_text(&fs, a);
    }
    assert_eq!(read_value(&fs, a), 5);
    assert_eq!(read_value(&fs, b), 0);
}

#[test]
fn handle_errors() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();

    assert!(matches!(fs.read(fh + 100, 0, 10), Err(FsError::BadHandle(_))));
    assert!(matches!(
        fs.write(fh + 100, 0, b"1"),
        Err(FsError::BadHandle(_))
    ));

    fs.release(fh).unwrap();
    assert!(matches!(fs.read(fh, 0, 10), Err(FsError::BadHandle(_))));
    assert!(matches!(fs.release(fh), Err(FsError::BadHandle(_))));
}

#[test]
fn directories_cannot_be_opened() {
    let fs = dynamic_fs();
    assert!(matches!(
        fs.open(ROOT_ADDR, OpenFlags::RDONLY),
        Err(FsError::IsADirectory)
    ));
    assert!(matches!(fs.open_path("/"), Err(FsError::IsADirectory)));
    assert!(matches!(fs.open_path("missing"), Err(FsError::NotFound)));
}

#[test]
fn write_entirely_past_capacity_leaves_counter_alone() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();
    fs.write(fh, 0, b"100000000000").unwrap();
    for expected in 100_000_000_000..100_000_000_003 {
        assert_eq!(read_value(&fs, fh), expected);
    }

    assert_eq!(fs.write(fh, 12, b"7").unwrap(), 1);
    assert_eq!(fs.write(fh, 64, b"42\n").unwrap(), 3);

    assert_eq!(read_value(&fs, fh), 100_000_000_003);
}

#[test]
fn append_style_write_on_fresh_handle_is_applied() {
    let fs = prepopulated_fs();
    let fh = fs.open_path("counter").unwrap();

    // O_APPEND writes arrive at the current file size ("0\n").
    assert_eq!(fs.write(fh, 2, b"7\n").unwrap(), 2);
    assert_eq!(read_value(&fs, fh), 7);
}
