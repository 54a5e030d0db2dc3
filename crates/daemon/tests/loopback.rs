//! Integration tests for the loopback-backed filesystem
//!
//! The same node/handle protocol runs over a local directory; the
//! directory tree is the persisted state, bit for bit.

mod common;

use fuser::FileType;

use caskfs_daemon::fs::{FsError, ROOT_INODE};

#[test]
fn test_create_write_lands_on_disk() {
    let t = common::setup_loopback();

    let dir = t.fs.mkdir(ROOT_INODE, "notes", 0o755).unwrap();
    assert!(t.dir.path().join("notes").is_dir());

    let (_, fh) = t.fs.create(dir.ino, "today.txt", 0o644).unwrap();
    t.fs.write(fh, 0, b"dear diary").unwrap();
    t.fs.flush(fh).unwrap();
    t.fs.release(fh).unwrap();

    let on_disk = std::fs::read(t.dir.path().join("notes/today.txt")).unwrap();
    assert_eq!(on_disk, b"dear diary");
}

#[test]
fn test_preexisting_tree_is_listed() {
    let t = common::setup_loopback();

    std::fs::create_dir(t.dir.path().join("seeded")).unwrap();
    std::fs::write(t.dir.path().join("seeded/a.txt"), b"aaa").unwrap();
    std::fs::write(t.dir.path().join("top.bin"), b"bb").unwrap();

    let root = t.fs.readdir(ROOT_INODE).unwrap();
    let names: Vec<&str> = root.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["seeded", "top.bin"]);
    assert_eq!(root[0].kind, FileType::Directory);
    assert_eq!(root[1].kind, FileType::RegularFile);

    let seeded = t.fs.lookup(ROOT_INODE, "seeded").unwrap();
    let sub = t.fs.readdir(seeded.ino).unwrap();
    assert_eq!(sub.len(), 1);

    let file = t.fs.lookup(seeded.ino, "a.txt").unwrap();
    let fh = t.fs.open(file.ino).unwrap();
    assert_eq!(t.fs.read_all(fh).unwrap(), b"aaa");
    t.fs.release(fh).unwrap();
}

#[test]
fn test_remove_unlinks_on_disk() {
    let t = common::setup_loopback();

    let (_, fh) = t.fs.create(ROOT_INODE, "gone.txt", 0o644).unwrap();
    t.fs.release(fh).unwrap();
    assert!(t.dir.path().join("gone.txt").exists());

    t.fs.remove(ROOT_INODE, "gone.txt", false).unwrap();
    assert!(!t.dir.path().join("gone.txt").exists());
}

#[test]
fn test_rename_moves_the_file() {
    let t = common::setup_loopback();

    let (_, fh) = t.fs.create(ROOT_INODE, "old.txt", 0o644).unwrap();
    t.fs.write(fh, 0, b"contents").unwrap();
    t.fs.flush(fh).unwrap();
    t.fs.release(fh).unwrap();

    t.fs.rename(ROOT_INODE, "old.txt", ROOT_INODE, "new.txt").unwrap();

    assert!(!t.dir.path().join("old.txt").exists());
    let on_disk = std::fs::read(t.dir.path().join("new.txt")).unwrap();
    assert_eq!(on_disk, b"contents");
}

#[test]
fn test_mkdir_collision_with_disk_state() {
    let t = common::setup_loopback();

    std::fs::create_dir(t.dir.path().join("dup")).unwrap();
    t.fs.readdir(ROOT_INODE).unwrap();

    assert!(matches!(
        t.fs.mkdir(ROOT_INODE, "dup", 0o755),
        Err(FsError::AlreadyExists)
    ));
}

#[test]
fn test_statfs_passes_through() {
    let t = common::setup_loopback();
    let s = t.fs.statfs();
    // Values come from the host filesystem, not the logical counters.
    assert!(s.bsize > 0);
    assert!(s.blocks > 0);
}

#[test]
fn test_fsync_persists_buffer() {
    let t = common::setup_loopback();

    let (_, fh) = t.fs.create(ROOT_INODE, "f", 0o644).unwrap();
    t.fs.write(fh, 0, b"synced").unwrap();
    t.fs.fsync(fh).unwrap();

    let on_disk = std::fs::read(t.dir.path().join("f")).unwrap();
    assert_eq!(on_disk, b"synced");
    t.fs.release(fh).unwrap();
}
