mod common;

use repohub::{
    archive::{extract_zip, zip_dir},
    error::ArchiveError,
};
use std::fs;

#[test]
fn extract_writes_nested_entries() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("mod.zip");
    common::write_zip(
        &archive,
        &[
            ("config/", b""),
            ("config/settings.cfg", b"volume=3"),
            ("Lanterns.dll", b"\x4d\x5a\x90\x00"),
        ],
    );

    let dest = dir.path().join("out");
    let files = extract_zip(&archive, &dest).unwrap();
    assert_eq!(files, 2);
    assert_eq!(fs::read(dest.join("config/settings.cfg")).unwrap(), b"volume=3");
    assert_eq!(fs::read(dest.join("Lanterns.dll")).unwrap(), b"\x4d\x5a\x90\x00");
}

#[test]
fn entries_escaping_the_destination_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("evil.zip");
    common::write_zip(&archive, &[("../escape.txt", b"nope"), ("ok.txt", b"fine")]);

    let dest = dir.path().join("nested").join("out");
    extract_zip(&archive, &dest).unwrap();
    assert!(dest.join("ok.txt").is_file());
    assert!(!dir.path().join("nested").join("escape.txt").exists());
}

#[test]
fn truncated_archive_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("broken.zip");
    let bytes = common::zip_bytes(&[("a.txt", b"hello world")]);
    fs::write(&archive, &bytes[..bytes.len() / 2]).unwrap();

    let result = extract_zip(&archive, &dir.path().join("out"));
    assert!(matches!(result, Err(ArchiveError::Corrupt { .. })));
}

#[test]
fn missing_archive_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = extract_zip(&dir.path().join("absent.zip"), &dir.path().join("out"));
    assert!(matches!(result, Err(ArchiveError::Io { .. })));
}

#[test]
fn zip_dir_round_trips_contents() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Lanterns");
    fs::create_dir_all(source.join("assets/empty")).unwrap();
    fs::write(source.join("Lanterns.dll"), vec![0u8, 1, 2, 3, 255]).unwrap();
    fs::write(source.join("assets/light.bundle"), b"bundle").unwrap();

    let archive = dir.path().join("disabled").join("Lanterns.zip");
    assert_eq!(zip_dir(&source, &archive).unwrap(), 2);
    assert!(!archive.with_extension("zip.tmp").exists());

    let restored = dir.path().join("restored");
    extract_zip(&archive, &restored).unwrap();
    assert_eq!(common::read_tree(&source), common::read_tree(&restored));
    assert!(restored.join("assets/empty").is_dir());
}

#[cfg(unix)]
#[test]
fn zip_dir_refuses_symlinks_and_leaves_no_archive() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Lanterns");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("Lanterns.dll"), b"dll").unwrap();
    std::os::unix::fs::symlink("Lanterns.dll", source.join("alias.dll")).unwrap();

    let archive = dir.path().join("Lanterns.zip");
    let result = zip_dir(&source, &archive);
    assert!(matches!(result, Err(ArchiveError::Unsupported { .. })));
    assert!(!archive.exists());
    assert!(!archive.with_extension("zip.tmp").exists());
}
