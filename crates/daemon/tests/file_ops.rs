//! Integration tests for file and handle operations

mod common;

use fuser::TimeOrNow;

use caskfs_daemon::fs::{FsError, SetattrRequest, ROOT_INODE};
use caskfs_store::BackingStore;

#[test]
fn test_write_then_read_on_open_handle() {
    let t = common::setup();

    let (_, fh) = t.fs.create(ROOT_INODE, "f.txt", 0o644).unwrap();
    assert_eq!(t.fs.write(fh, 0, b"hello").unwrap(), 5);
    assert_eq!(t.fs.read_all(fh).unwrap(), b"hello");

    let attr = t.fs.lookup(ROOT_INODE, "f.txt").unwrap();
    assert_eq!(attr.size, 5);
}

#[test]
fn test_flush_then_reopen_roundtrip() {
    let t = common::setup();

    let (attr, fh) = t.fs.create(ROOT_INODE, "f.txt", 0o644).unwrap();
    t.fs.write(fh, 0, b"hello").unwrap();
    t.fs.flush(fh).unwrap();
    t.fs.release(fh).unwrap();

    let fh = t.fs.open(attr.ino).unwrap();
    assert_eq!(t.fs.read_all(fh).unwrap(), b"hello");
    assert_eq!(t.fs.getattr(attr.ino).unwrap().size, 5);
    t.fs.release(fh).unwrap();
}

#[test]
fn test_write_gap_zero_fills() {
    let t = common::setup();

    let (_, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 3, b"xy").unwrap();
    assert_eq!(t.fs.read_all(fh).unwrap(), b"\0\0\0xy");
}

#[test]
fn test_overlapping_writes_ordered() {
    let t = common::setup();

    let (_, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 0, b"aaaa").unwrap();
    t.fs.write(fh, 1, b"bb").unwrap();
    assert_eq!(t.fs.read_all(fh).unwrap(), b"abba");
}

#[test]
fn test_ranged_read() {
    let t = common::setup();

    let (_, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 0, b"0123456789").unwrap();

    assert_eq!(t.fs.read(fh, 2, 3).unwrap(), b"234");
    // Truncated at the end of the buffer.
    assert_eq!(t.fs.read(fh, 8, 10).unwrap(), b"89");
    // Past the end reads empty.
    assert!(t.fs.read(fh, 100, 4).unwrap().is_empty());
}

#[test]
fn test_flush_uploads_once_dirty() {
    let t = common::setup();

    let (_, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 0, b"data").unwrap();
    t.fs.flush(fh).unwrap();
    assert_eq!(t.rt.block_on(t.store.read("f", 0)).unwrap(), b"data");

    // Clean buffer: flushing again is a no-op even if the store would
    // reject a write.
    t.store.set_fail_writes(true);
    t.fs.flush(fh).unwrap();
    t.store.set_fail_writes(false);
    t.fs.release(fh).unwrap();
}

#[test]
fn test_flush_failure_surfaces_and_retries() {
    let t = common::setup();

    let (_, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 0, b"data").unwrap();

    t.store.set_fail_writes(true);
    assert!(matches!(t.fs.flush(fh), Err(FsError::NoData)));

    // The buffer stays dirty, so a later flush lands the data.
    t.store.set_fail_writes(false);
    t.fs.flush(fh).unwrap();
    assert_eq!(t.rt.block_on(t.store.read("f", 0)).unwrap(), b"data");
    t.fs.release(fh).unwrap();
}

#[test]
fn test_release_of_last_handle_flushes() {
    let t = common::setup();

    let (_, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 0, b"dangling").unwrap();
    t.fs.release(fh).unwrap();

    assert_eq!(t.rt.block_on(t.store.read("f", 0)).unwrap(), b"dangling");
}

#[test]
fn test_open_refreshes_from_store() {
    let t = common::setup();

    let (attr, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 0, b"old").unwrap();
    t.fs.flush(fh).unwrap();
    t.fs.release(fh).unwrap();

    // The object changes underneath the cache.
    t.seed("f", b"fresh content", false);

    let fh = t.fs.open(attr.ino).unwrap();
    assert_eq!(t.fs.read_all(fh).unwrap(), b"fresh content");
    assert_eq!(t.fs.getattr(attr.ino).unwrap().size, 13);
    assert_eq!(t.fs.logical_size(), 13);
    t.fs.release(fh).unwrap();
}

#[test]
fn test_open_missing_object() {
    let t = common::setup();
    t.seed("ghost", b"x", false);
    let attr = {
        t.fs.readdir(ROOT_INODE).unwrap();
        t.fs.lookup(ROOT_INODE, "ghost").unwrap()
    };
    t.rt.block_on(t.store.remove("ghost")).unwrap();

    assert!(matches!(t.fs.open(attr.ino), Err(FsError::NotFound)));
}

#[test]
fn test_truncate_and_extend() {
    let t = common::setup();

    let (attr, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 0, b"hello").unwrap();

    let truncated = t
        .fs
        .setattr(
            attr.ino,
            SetattrRequest {
                size: Some(2),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(truncated.size, 2);
    assert_eq!(t.fs.read_all(fh).unwrap(), b"he");
    assert_eq!(t.fs.logical_size(), 2);

    let extended = t
        .fs
        .setattr(
            attr.ino,
            SetattrRequest {
                size: Some(4),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(extended.size, 4);
    assert_eq!(t.fs.read_all(fh).unwrap(), b"he\0\0");
    assert_eq!(t.fs.logical_size(), 4);
    t.fs.release(fh).unwrap();
}

#[test]
fn test_setattr_mode_owner_times() {
    let t = common::setup();

    let (attr, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.release(fh).unwrap();

    let stamp = std::time::UNIX_EPOCH + std::time::Duration::from_secs(1_000_000);
    let updated = t
        .fs
        .setattr(
            attr.ino,
            SetattrRequest {
                mode: Some(0o600),
                uid: Some(1234),
                gid: Some(5678),
                mtime: Some(TimeOrNow::SpecificTime(stamp)),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(updated.perm, 0o600);
    assert_eq!(updated.uid, 1234);
    assert_eq!(updated.gid, 5678);
    assert_eq!(updated.mtime, stamp);
}

#[test]
fn test_stale_handle_rejected() {
    let t = common::setup();

    let (_, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.release(fh).unwrap();
    assert!(matches!(t.fs.write(fh, 0, b"x"), Err(FsError::NotFound)));
    assert!(matches!(t.fs.release(fh), Err(FsError::NotFound)));
}

#[test]
fn test_two_handles_share_the_buffer() {
    let t = common::setup();

    let (attr, fh1) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh1, 0, b"shared").unwrap();
    t.fs.flush(fh1).unwrap();

    let fh2 = t.fs.open(attr.ino).unwrap();
    assert_eq!(t.fs.read_all(fh2).unwrap(), b"shared");

    t.fs.write(fh2, 0, b"SH").unwrap();
    assert_eq!(t.fs.read_all(fh1).unwrap(), b"SHared");

    t.fs.release(fh1).unwrap();
    t.fs.release(fh2).unwrap();
    assert_eq!(t.rt.block_on(t.store.read("f", 0)).unwrap(), b"SHared");
}
