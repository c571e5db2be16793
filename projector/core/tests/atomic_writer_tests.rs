// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the atomic writer.
//!
//! Every test projects payloads into a fresh temporary directory and then
//! compares what is on disk against the last payload written:
//! - first writes, updates, deletions and nested paths
//! - idempotence and minimal writes (no rewrite of unchanged files)
//! - rejection of unsafe payloads before any filesystem mutation
//! - entries the writer must leave alone (`..`-prefixed names)

use projector_core::infrastructure::AtomicWriter;
use projector_core::{FileProjection, Payload, PermissionPolicy, ProjectionError};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use tempfile::TempDir;
use walkdir::WalkDir;

fn payload(entries: &[(&str, &str, u32)]) -> Payload {
    entries
        .iter()
        .map(|(path, data, mode)| (path.to_string(), FileProjection::new(*data, *mode)))
        .collect()
}

/// Regular files under `dir` (outside `..`-prefixed names) must match
/// `expected` exactly, content and mode.
fn check_volume_contents(dir: &Path, expected: &Payload) {
    let mut observed = Payload::new();
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry.unwrap();
        let relative = entry.path().strip_prefix(dir).unwrap().to_string_lossy().into_owned();
        if relative.starts_with("..") || !entry.file_type().is_file() {
            continue;
        }
        let metadata = entry.metadata().unwrap();
        observed.insert(
            relative,
            FileProjection::new(std::fs::read(entry.path()).unwrap(), metadata.permissions().mode() & 0o7777),
        );
    }

    let expected: Payload = expected
        .iter()
        .map(|(path, projection)| {
            let path = projection_path(path);
            (path, FileProjection::new(projection.data.clone(), projection.effective_mode()))
        })
        .collect();

    assert_eq!(observed, expected, "directory contents differ from payload");
}

fn projection_path(path: &str) -> String {
    projector_core::PathSanitizer::clean(path)
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap().path().strip_prefix(dir).unwrap().display().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_write_once() {
    let max_path = "a".repeat(4097);
    let cases: Vec<(&str, Payload, bool)> = vec![
        ("invalid payload 1", payload(&[("foo", "foo", 0o644), ("..bar", "bar", 0o644)]), false),
        ("invalid payload 2", payload(&[("foo/../../../../../../../../etc/passwd", "root:x:0:0", 0o644)]), false),
        ("absolute path", payload(&[("/etc/passwd", "root:x:0:0", 0o644)]), false),
        ("path too long", payload(&[(max_path.as_str(), "x", 0o644)]), false),
        ("reserved after cleaning", payload(&[("foo", "foo", 0o644), ("./..sneaky.txt", "x", 0o644)]), false),
        ("basic 1", payload(&[("foo", "foo", 0o644), ("bar", "bar", 0o644)]), true),
        ("basic 2", payload(&[("binary.bin", "bin", 0o644), (".binary.bin", "bin", 0o644)]), true),
        ("basic mode 1", payload(&[("foo", "foo", 0o777), ("bar", "bar", 0o400)]), true),
        ("dotfiles", payload(&[("foo", "foo", 0o644), ("bar", "bar", 0o644), (".dotfile", "dotfile", 0o644), (".dotfile.file", "dotfile.file", 0o644)]), true),
        ("subdirectories 1", payload(&[("foo/bar.txt", "foo/bar", 0o644), ("bar/zab.txt", "bar/zab.txt", 0o644)]), true),
        ("subdirectories 2", payload(&[("foo//bar.txt", "foo//bar", 0o644), ("bar///bar/zab.txt", "bar/../bar/zab.txt", 0o644)]), true),
        ("subdirectories 3", payload(&[("foo/bar", "foo/bar", 0o644), ("bar/zab/", "bar/zab", 0o644), ("foo/zab/", "foo/zab", 0o644), ("bar/bar.txt", "bar/bar", 0o644)]), true),
        ("unset mode", payload(&[("foo", "foo", 0)]), true),
    ];

    for (name, case, success) in cases {
        let dir = TempDir::new().unwrap();
        let mut writer = AtomicWriter::new(dir.path()).unwrap();

        let result = writer.write(&case);
        if !success {
            assert!(result.is_err(), "{}: expected error", name);
            assert!(entries(dir.path()).is_empty(), "{}: rejected payload touched the directory", name);
            continue;
        }

        assert!(result.unwrap(), "{}: first write should report a change", name);
        check_volume_contents(dir.path(), &case);
    }
}

#[test]
fn test_update() {
    let cases: Vec<(&str, Payload, Payload)> = vec![
        (
            "update",
            payload(&[("foo", "foo", 0o644), ("bar", "bar", 0o644)]),
            payload(&[("foo", "foo2", 0o644), ("bar", "bar2", 0o640)]),
        ),
        (
            "no update",
            payload(&[("foo", "foo", 0o644), ("bar", "bar", 0o644)]),
            payload(&[("foo", "foo", 0o644), ("bar", "bar", 0o644)]),
        ),
        (
            "no update 2",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644)]),
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644)]),
        ),
        (
            "add 1",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644)]),
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644), ("blu/zip.txt", "zip", 0o644)]),
        ),
        (
            "add 2",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644)]),
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644), ("blu/two/2/3/4/5/zip.txt", "zip", 0o644)]),
        ),
        (
            "add 3",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644)]),
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644), ("bar/zib/zab.txt", "zab", 0o644)]),
        ),
        (
            "delete 1",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644)]),
            payload(&[("foo/bar.txt", "foo", 0o644)]),
        ),
        (
            "delete 2",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/1/2/3/zab.txt", "bar", 0o644)]),
            payload(&[("foo/bar.txt", "foo", 0o644)]),
        ),
        (
            "delete 3",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/1/2/sip.txt", "sip", 0o644), ("bar/1/2/3/zab.txt", "bar", 0o644)]),
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/1/2/sip.txt", "sip", 0o644)]),
        ),
        (
            "delete 4",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/1/2/sip.txt", "sip", 0o644), ("bar/1/2/3/4/5/6zab.txt", "bar", 0o644)]),
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/1/2/sip.txt", "sip", 0o644)]),
        ),
        (
            "delete all",
            payload(&[("foo/bar.txt", "foo", 0o644), ("bar/1/2/sip.txt", "sip", 0o644), ("bar/1/2/3/4/5/6zab.txt", "bar", 0o644)]),
            Payload::new(),
        ),
        (
            "add and delete 1",
            payload(&[("foo/bar.txt", "foo", 0o644)]),
            payload(&[("bar/baz.txt", "baz", 0o644)]),
        ),
    ];

    for (name, first, next) in cases {
        let dir = TempDir::new().unwrap();
        let mut writer = AtomicWriter::new(dir.path()).unwrap();

        assert!(writer.write(&first).unwrap(), "{}: first write", name);
        check_volume_contents(dir.path(), &first);

        let changed = writer.write(&next).unwrap();
        assert_eq!(changed, first != next, "{}: change flag", name);
        check_volume_contents(dir.path(), &next);
    }
}

#[test]
fn test_multiple_updates_converge() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    let sequence = vec![
        payload(&[("foo/bar.txt", "foo", 0o644), ("bar/zab.txt", "bar", 0o644)]),
        payload(&[("foo/bar.txt", "foo2", 0o400), ("bar/zab.txt", "bar2", 0o400), ("zip/zap/zup/fop.txt", "fop", 0o644)]),
        payload(&[("foo/bar.txt", "foo3", 0o600)]),
        payload(&[("bar/zab.txt", "bar3", 0o644), ("zip/zap/zup/fop.txt", "fop2", 0o640)]),
        Payload::new(),
        payload(&[("a/b/c/d.txt", "d", 0o644)]),
    ];

    for next in &sequence {
        writer.write(next).unwrap();
        check_volume_contents(dir.path(), next);
    }
}

#[test]
fn test_idempotent_write_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();
    let data = payload(&[("foo/bar.txt", "foo", 0o644), ("zab.txt", "zab", 0o600)]);

    assert!(writer.write(&data).unwrap());
    let inode_before = std::fs::metadata(dir.path().join("foo/bar.txt")).unwrap().ino();
    let listing_before = entries(dir.path());

    assert!(!writer.write(&data).unwrap());
    assert!(!writer.write(&data).unwrap());

    assert_eq!(std::fs::metadata(dir.path().join("foo/bar.txt")).unwrap().ino(), inode_before);
    assert_eq!(entries(dir.path()), listing_before);
}

#[test]
fn test_update_rewrites_only_changed_files() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    writer.write(&payload(&[("same.txt", "same", 0o644), ("edit.txt", "v1", 0o644)])).unwrap();
    let same_inode = std::fs::metadata(dir.path().join("same.txt")).unwrap().ino();

    let next = payload(&[("same.txt", "same", 0o644), ("edit.txt", "v2", 0o644)]);
    assert!(writer.write(&next).unwrap());
    check_volume_contents(dir.path(), &next);
    assert_eq!(std::fs::metadata(dir.path().join("same.txt")).unwrap().ino(), same_inode);
}

#[test]
fn test_equivalent_keys_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    assert!(writer.write(&payload(&[("foo//bar.txt", "x", 0o644)])).unwrap());
    assert!(!writer.write(&payload(&[("./foo/bar.txt", "x", 0o644)])).unwrap());
}

#[test]
fn test_rejected_payload_leaves_directory_untouched() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();
    let good = payload(&[("keep/me.txt", "keep", 0o644)]);
    writer.write(&good).unwrap();

    let bad = payload(&[("new.txt", "new", 0o644), ("../escape.txt", "bad", 0o644)]);
    let err = writer.write(&bad).unwrap_err();
    assert!(err.is_validation());

    check_volume_contents(dir.path(), &good);
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
}

#[test]
fn test_colliding_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    let err = writer
        .write(&payload(&[("foo/bar", "one", 0o644), ("foo//bar", "two", 0o644)]))
        .unwrap_err();
    assert!(matches!(err, ProjectionError::Validation(_)));
    assert!(entries(dir.path()).is_empty());
}

#[test]
fn test_mode_only_change_triggers_write() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    writer.write(&payload(&[("secret", "s3cr3t", 0o644)])).unwrap();
    let next = payload(&[("secret", "s3cr3t", 0o600)]);
    assert!(writer.write(&next).unwrap());
    check_volume_contents(dir.path(), &next);
}

#[test]
fn test_read_only_file_is_replaced() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    writer.write(&payload(&[("locked", "v1", 0o400)])).unwrap();
    let next = payload(&[("locked", "v2", 0o400)]);
    assert!(writer.write(&next).unwrap());
    check_volume_contents(dir.path(), &next);
}

#[test]
fn test_reserved_entries_are_never_pruned() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("..data")).unwrap();
    std::fs::write(dir.path().join("..data/token"), b"keep").unwrap();
    std::fs::write(dir.path().join("..2026_10_15"), b"keep").unwrap();
    std::fs::write(dir.path().join("stray.txt"), b"remove").unwrap();

    let mut writer = AtomicWriter::new(dir.path()).unwrap();
    let data = payload(&[("foo", "foo", 0o644)]);
    assert!(writer.write(&data).unwrap());

    check_volume_contents(dir.path(), &data);
    assert!(!dir.path().join("stray.txt").exists());
    assert_eq!(std::fs::read(dir.path().join("..data/token")).unwrap(), b"keep");
    assert!(dir.path().join("..2026_10_15").exists());

    writer.write(&Payload::new()).unwrap();
    assert!(dir.path().join("..data/token").exists());
}

#[test]
fn test_full_clear_then_stable() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    writer.write(&payload(&[("a/b/c.txt", "c", 0o644), ("d.txt", "d", 0o644)])).unwrap();
    assert!(writer.write(&Payload::new()).unwrap());
    assert!(entries(dir.path()).is_empty());
    assert!(!writer.write(&Payload::new()).unwrap());
}

#[test]
fn test_dot_prefixed_reserved_key_never_reaches_disk() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    let result = writer.write(&payload(&[("./..sneaky.txt", "x", 0o644)]));
    assert!(matches!(result, Err(ProjectionError::Validation(_))));
    assert!(entries(dir.path()).is_empty());

    writer.write(&payload(&[("ok.txt", "ok", 0o644)])).unwrap();
    assert!(writer.write(&Payload::new()).unwrap());
    assert!(entries(dir.path()).is_empty(), "full clear left files behind");
}

#[test]
fn test_empty_payload_on_empty_directory() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();
    assert!(!writer.write(&Payload::new()).unwrap());
}

#[test]
fn test_directory_replaced_by_file_and_back() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();

    writer.write(&payload(&[("conf/app.ini", "ini", 0o644)])).unwrap();

    let as_file = payload(&[("conf", "flat", 0o644)]);
    assert!(writer.write(&as_file).unwrap());
    check_volume_contents(dir.path(), &as_file);

    let as_dir = payload(&[("conf/app.ini", "ini2", 0o644)]);
    assert!(writer.write(&as_dir).unwrap());
    check_volume_contents(dir.path(), &as_dir);
}

#[test]
fn test_symlinks_are_replaced_not_followed() {
    let dir = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    std::fs::write(outside.path().join("victim"), b"untouched").unwrap();

    std::os::unix::fs::symlink(outside.path().join("victim"), dir.path().join("file")).unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("linkdir")).unwrap();
    std::os::unix::fs::symlink(outside.path(), dir.path().join("stale-link")).unwrap();

    let mut writer = AtomicWriter::new(dir.path()).unwrap();
    let data = payload(&[("file", "mine", 0o644), ("linkdir/inner", "mine", 0o644)]);
    assert!(writer.write(&data).unwrap());

    check_volume_contents(dir.path(), &data);
    assert!(!dir.path().join("stale-link").exists());
    assert!(std::fs::symlink_metadata(dir.path().join("linkdir")).unwrap().is_dir());
    assert_eq!(std::fs::read(outside.path().join("victim")).unwrap(), b"untouched");
    assert!(!outside.path().join("inner").exists());
}

#[test]
fn test_lenient_policy_writes_normally() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path())
        .unwrap()
        .with_permission_policy(PermissionPolicy::Lenient);

    let data = payload(&[("foo", "foo", 0o640)]);
    assert!(writer.write(&data).unwrap());
    check_volume_contents(dir.path(), &data);
}

#[test]
fn test_observe_matches_last_write() {
    let dir = TempDir::new().unwrap();
    let mut writer = AtomicWriter::new(dir.path()).unwrap();
    let data = payload(&[("a/b.txt", "b", 0o644), ("c.txt", "c", 0o600)]);
    writer.write(&data).unwrap();

    assert_eq!(writer.observe().unwrap(), data);
}

#[test]
fn test_nonexistent_target_is_error() {
    let dir = TempDir::new().unwrap();
    let err = AtomicWriter::new(dir.path().join("missing")).unwrap_err();
    assert!(matches!(err, ProjectionError::TargetMissing(_)));
}
