use crate::error::ExpandError;
use crate::extraction::*;
use std::path::Path;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create a valid ZIP archive containing the given members
fn create_zip_archive(archive_path: &Path, files: &[(&str, &[u8])]) {
    let file = std::fs::File::create(archive_path).unwrap();
    let mut writer = ::zip::ZipWriter::new(file);
    let options =
        ::zip::write::FileOptions::default().compression_method(::zip::CompressionMethod::Deflated);
    for (name, content) in files {
        writer.start_file(*name, options).unwrap();
        std::io::Write::write_all(&mut writer, content).unwrap();
    }
    writer.finish().unwrap();
}

// ---------------------------------------------------------------------------
// ZipExpander
// ---------------------------------------------------------------------------

#[test]
fn expand_writes_every_member() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("nvdcve-1.1-2019.json.zip");
    create_zip_archive(
        &archive,
        &[
            ("nvdcve-1.1-2019.json", b"{\"CVE_Items\": []}"),
            ("notes/readme.txt", b"feed notes"),
        ],
    );

    let summary = ZipExpander::expand(&archive, dir.path()).unwrap();

    assert_eq!(summary, ExpandSummary { extracted: 2, failed: 0 });
    assert_eq!(
        std::fs::read(dir.path().join("nvdcve-1.1-2019.json")).unwrap(),
        b"{\"CVE_Items\": []}"
    );
    assert_eq!(
        std::fs::read(dir.path().join("notes/readme.txt")).unwrap(),
        b"feed notes"
    );
}

#[test]
fn expand_creates_missing_destination() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    create_zip_archive(&archive, &[("a.json", b"[]")]);
    let dest = dir.path().join("extracted/nested");

    let summary = ZipExpander::expand(&archive, &dest).unwrap();

    assert_eq!(summary.extracted, 1);
    assert!(dest.join("a.json").is_file());
}

#[test]
fn expand_overwrites_previous_member() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    create_zip_archive(&archive, &[("a.json", b"new")]);
    std::fs::write(dir.path().join("a.json"), b"old contents").unwrap();

    ZipExpander::expand(&archive, dir.path()).unwrap();

    assert_eq!(std::fs::read(dir.path().join("a.json")).unwrap(), b"new");
}

#[test]
fn directory_members_are_not_counted() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("dirs.zip");
    {
        let file = std::fs::File::create(&archive).unwrap();
        let mut writer = ::zip::ZipWriter::new(file);
        let options = ::zip::write::FileOptions::default();
        writer.add_directory("feeds/", options).unwrap();
        writer.start_file("feeds/a.json", options).unwrap();
        std::io::Write::write_all(&mut writer, b"{}").unwrap();
        writer.finish().unwrap();
    }

    let summary = ZipExpander::expand(&archive, dir.path()).unwrap();

    assert_eq!(summary, ExpandSummary { extracted: 1, failed: 0 });
    assert!(dir.path().join("feeds").is_dir());
}

#[test]
fn corrupt_container_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("broken.zip");
    std::fs::write(&archive, b"this is not a zip file at all").unwrap();

    let err = ZipExpander::expand(&archive, dir.path()).unwrap_err();
    match err {
        ExpandError::Open { archive: path, .. } => assert_eq!(path, archive),
        other => panic!("expected Open error, got {other:?}"),
    }
}

#[test]
fn missing_container_fails_to_open() {
    let dir = TempDir::new().unwrap();
    let err = ZipExpander::expand(&dir.path().join("absent.zip"), dir.path()).unwrap_err();
    assert!(matches!(err, ExpandError::Open { .. }));
}

#[test]
fn member_that_cannot_be_created_is_skipped() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("c.zip");
    create_zip_archive(
        &archive,
        &[("good.json", b"good"), ("blocked/bad.json", b"bad")],
    );
    // A regular file where the member's parent directory should go
    std::fs::write(dir.path().join("blocked"), b"in the way").unwrap();

    let summary = ZipExpander::expand(&archive, dir.path()).unwrap();

    assert_eq!(summary, ExpandSummary { extracted: 1, failed: 1 });
    assert_eq!(std::fs::read(dir.path().join("good.json")).unwrap(), b"good");
    assert!(!dir.path().join("blocked/bad.json").exists());
}

#[test]
fn unsafe_member_names_are_rejected() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("store");
    let archive = dir.path().join("evil.zip");
    create_zip_archive(&archive, &[("../escaped.txt", b"x"), ("ok.txt", b"y")]);

    let summary = ZipExpander::expand(&archive, &store).unwrap();

    assert_eq!(summary, ExpandSummary { extracted: 1, failed: 1 });
    assert!(!dir.path().join("escaped.txt").exists());
    assert!(store.join("ok.txt").is_file());
}

#[test]
fn empty_container_expands_to_nothing() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("empty.zip");
    create_zip_archive(&archive, &[]);

    let summary = ZipExpander::expand(&archive, dir.path()).unwrap();
    assert_eq!(summary, ExpandSummary::default());
}

// ---------------------------------------------------------------------------
// expand_archive
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expand_archive_runs_off_the_async_runtime() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("a.zip");
    create_zip_archive(&archive, &[("one.json", b"1"), ("two.json", b"2")]);

    let summary = expand_archive(&archive, &dir.path().join("out")).await.unwrap();

    assert_eq!(summary.extracted, 2);
    assert!(dir.path().join("out/two.json").is_file());
}

#[tokio::test]
async fn expand_archive_reports_corruption() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("broken.zip");
    std::fs::write(&archive, [0u8; 64]).unwrap();

    assert!(matches!(
        expand_archive(&archive, dir.path()).await,
        Err(ExpandError::Open { .. })
    ));
}
