//! Integration tests for archive handles, records and the export pipeline.

use std::path::{Path, PathBuf};

use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;

use mailvault::decoder::index::{index_path_for, HEADER_SIZE};
use mailvault::decoder::{ItemKind, MboxDecoder};
use mailvault::{destroy_list, Archive, ArchiveError, ErrorCode, ExportConf, Exporter, Record};

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Copy a fixture into a fresh temp dir so sidecar indexes stay private.
fn staged(name: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    tmp.copy_from(fixtures_dir(), &[name]).unwrap();
    let path = tmp.child(name).path().to_path_buf();
    (tmp, path)
}

fn exporter(conf: ExportConf) -> Exporter {
    Exporter::new(&conf).expect("valid export configuration")
}

// ─── Handle lifecycle ───────────────────────────────────────────────

#[test]
fn test_init() {
    let mut exp = exporter(ExportConf::default());
    assert!(exp.destroy().is_ok());

    let (_tmp, path) = staged("simple.mbox");
    let mut archive = Archive::open(&path);
    assert_eq!(archive.error_code(), ErrorCode::NoError, "{:?}", archive.last_error());
    assert!(archive.destroy().is_ok());

    let mut missing = Archive::open("./im/not/existing.mbox");
    assert_eq!(missing.error_code(), ErrorCode::Open);
    assert!(missing.destroy().is_ok());
}

#[test]
fn test_open_non_archive() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.child("notes.txt");
    file.write_str("hello, not a mailbox\n").unwrap();

    let archive = Archive::open(file.path());
    assert_eq!(archive.error_code(), ErrorCode::Open);
    assert!(archive.last_error().unwrap().contains("notes.txt"));

    let dir = Archive::open(tmp.path());
    assert_eq!(dir.error_code(), ErrorCode::Open);
}

#[test]
fn test_index_load_failure() {
    let (_tmp, path) = staged("simple.mbox");
    let mut archive = Archive::open(&path);
    assert_eq!(archive.error_code(), ErrorCode::NoError);
    archive.destroy().unwrap();

    let sidecar = index_path_for(&path);
    let mut data = std::fs::read(&sidecar).expect("sidecar index written");
    data.truncate(HEADER_SIZE + 3);
    std::fs::write(&sidecar, data).unwrap();

    let mut broken = Archive::open(&path);
    assert_eq!(broken.error_code(), ErrorCode::IndexLoad);
    assert!(broken.last_error().is_some());
    assert!(broken.list().unwrap().is_empty());
    assert!(broken.destroy().is_ok());
    assert!(broken.destroy().is_err());
}

#[test]
fn test_sidecar_reuse() {
    let (_tmp, path) = staged("complex.mbox");
    let first: Vec<String> = Archive::open(&path)
        .list()
        .unwrap()
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert!(index_path_for(&path).exists());

    let second: Vec<String> = Archive::open(&path)
        .list()
        .unwrap()
        .iter()
        .map(|r| r.name().to_string())
        .collect();
    assert_eq!(first, second);

    let without_index = MboxDecoder::new().persist_index(false);
    let third = Archive::open_with(&without_index, &path).list().unwrap();
    assert_eq!(third.len(), first.len());
}

// ─── Listing ────────────────────────────────────────────────────────

#[test]
fn test_list_simple() {
    let (_tmp, path) = staged("simple.mbox");
    let mut archive = Archive::open(&path);
    let mut records = archive.list().unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records.iter().filter(|r| r.depth() == 0).count(), 2);
    assert!(!records[0].is_container());
    assert!(records[1].is_container());
    assert_eq!(records[1].name(), "Archive");
    assert_eq!(records[2].parent(), Some(records[1].id()));

    archive.destroy().unwrap();
    destroy_list(&mut records).unwrap();
}

#[test]
fn test_list_complex_pre_order() {
    let (_tmp, path) = staged("complex.mbox");
    let archive = Archive::open(&path);
    let records = archive.list().unwrap();

    let listing: Vec<(ItemKind, &str, usize)> = records
        .iter()
        .map(|r| (r.kind(), r.name(), r.depth()))
        .collect();
    assert_eq!(
        listing,
        vec![
            (ItemKind::Folder, "Inbox", 0),
            (ItemKind::Message, "00001_Quarterly report", 1),
            (ItemKind::Attachment, "report.pdf", 2),
            (ItemKind::Message, "00004_Old news", 1),
            (ItemKind::Folder, "Work", 0),
            (ItemKind::Folder, "Projects", 1),
            (ItemKind::Message, "00002_Planning", 2),
            (ItemKind::Folder, "Contacts", 0),
            (ItemKind::Contact, "00003_Carol", 1),
            (ItemKind::Unknown, "00005_unknown", 0),
        ]
    );

    assert!(records[3].is_deleted());
    assert_eq!(records[9].error_code(), ErrorCode::UnknownRecord);
    assert!(records[..9].iter().all(|r| r.error_code().is_ok()));
    assert!(records.iter().enumerate().all(|(i, r)| r.index() == i));
}

#[test]
fn test_renaming() {
    let (tmp, path) = staged("simple.mbox");
    let archive = Archive::open(&path);
    let mut records = archive.list().unwrap();

    for (i, record) in records.iter_mut().enumerate() {
        record.set_renaming(tmp.child(format!("out/output_{i}.eml")).path());
    }
    for (i, record) in records.iter().enumerate() {
        let expected = tmp.child(format!("out/output_{i}.eml")).path().to_path_buf();
        assert_eq!(record.renaming(), Some(expected.as_path()));
    }
}

// ─── Export ─────────────────────────────────────────────────────────

#[test]
fn test_extraction() {
    let (tmp, path) = staged("simple.mbox");
    let out = tmp.child("out");
    out.create_dir_all().unwrap();

    let mut archive = Archive::open(&path);
    let mut exp = exporter(ExportConf {
        acceptable_extensions: vec!["eml".into()],
        ..ExportConf::default()
    });

    let mut records = archive.list().unwrap();
    for (i, record) in records.iter_mut().enumerate().filter(|(_, r)| r.depth() == 0) {
        record.set_renaming(out.child(format!("output_{i}.eml")).path());
        let written = record.export(&exp).unwrap();
        assert!(written > 0);
    }

    assert!(records.iter().all(|r| r.error_code() == ErrorCode::NoError));
    out.child("output_0.eml").assert(predicate::path::is_file());
    out.child("output_1.eml").assert(predicate::path::is_dir());
    out.child("output_1.eml/00002_Re__Hello_World.eml")
        .assert(predicate::str::contains("All good here."));
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 2);

    assert!(archive.destroy().is_ok());
    assert!(archive.destroy().is_err());
    assert!(destroy_list(&mut records).is_ok());
    assert!(destroy_list(&mut records).is_err());
    assert!(exp.destroy().is_ok());
    assert!(exp.destroy().is_err());

    let mut blank = Record::default();
    assert!(blank.destroy().is_err());
}

#[test]
fn test_invalid_export_confs() {
    let cases = [
        ExportConf {
            mode: "5".into(),
            ..ExportConf::default()
        },
        ExportConf {
            output_mode: "5".into(),
            ..ExportConf::default()
        },
        ExportConf {
            contact_mode: "5".into(),
            ..ExportConf::default()
        },
        ExportConf {
            deleted_mode: "5".into(),
            ..ExportConf::default()
        },
        ExportConf {
            file_name_len: -2,
            ..ExportConf::default()
        },
        ExportConf {
            collision: "sometimes".into(),
            ..ExportConf::default()
        },
    ];
    for conf in cases {
        assert!(Exporter::new(&conf).is_err(), "accepted {conf:?}");
    }
}

#[test]
fn test_filter_isolation() {
    let (tmp, path) = staged("complex.mbox");
    let out = tmp.child("out");
    out.create_dir_all().unwrap();

    let archive = Archive::open(&path);
    let exp = exporter(ExportConf {
        acceptable_extensions: vec!["pdf".into()],
        output_dir: Some(out.path().to_path_buf()),
        ..ExportConf::default()
    });

    let mut records = archive.list().unwrap();
    for record in records.iter_mut().filter(|r| !r.is_container()) {
        record.export(&exp).unwrap();
    }

    assert_eq!(records[1].error_code(), ErrorCode::UnsupportedParam);
    assert_eq!(records[2].error_code(), ErrorCode::NoError);
    assert_eq!(records[8].error_code(), ErrorCode::UnsupportedParam);
    assert_eq!(records[9].error_code(), ErrorCode::UnknownRecord);

    assert_eq!(
        std::fs::read(out.child("report.pdf").path()).unwrap(),
        b"%PDF-1.4\n"
    );
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 1);
}

#[test]
fn test_full_export_entry_count() {
    let (tmp, path) = staged("complex.mbox");
    let out = tmp.child("out");
    out.create_dir_all().unwrap();

    let archive = Archive::open(&path);
    let exp = exporter(ExportConf {
        output_dir: Some(out.path().to_path_buf()),
        ..ExportConf::default()
    });

    let mut records = archive.list().unwrap();
    let mut exported = 0;
    for record in records.iter_mut().filter(|r| r.depth() == 0) {
        record.export(&exp).unwrap();
        if record.error_code().is_ok() {
            exported += 1;
        }
    }

    // Inbox, Work and Contacts; the unknown item produces nothing
    assert_eq!(exported, 3);
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), exported);
    out.child("Inbox/00001_Quarterly_report.eml")
        .assert(predicate::str::contains("JVBERi0xLjQK"));
    out.child("Inbox/00004_Old_news.eml")
        .assert(predicate::path::is_file());
    out.child("Work/Projects/00002_Planning.eml")
        .assert(predicate::str::contains("Milestones"));
    out.child("Contacts/00003_Carol.eml")
        .assert(predicate::str::contains("BEGIN:VCARD"));
}

#[test]
fn test_mbox_mode_excludes_deleted() {
    let (tmp, path) = staged("complex.mbox");
    let out = tmp.child("out");
    out.create_dir_all().unwrap();

    let archive = Archive::open(&path);
    let exp = exporter(ExportConf {
        mode: "mbox".into(),
        deleted_mode: "exclude".into(),
        output_dir: Some(out.path().to_path_buf()),
        ..ExportConf::default()
    });

    let mut records = archive.list().unwrap();
    records[0].export(&exp).unwrap();
    records[4].export(&exp).unwrap();
    assert!(records[0].error_code().is_ok());

    let inbox = std::fs::read_to_string(out.child("Inbox/mbox").path()).unwrap();
    assert!(inbox.starts_with("From alice@example.com Mon Feb 12 10:00:00 2024\n"));
    assert!(inbox.contains("Subject: Quarterly report"));
    assert!(!inbox.contains("Old news"));

    out.child("Work/Projects/mbox")
        .assert(predicate::str::contains(">>From the start"));

    // The reopened mailbox lists the one surviving message
    let reopened = Archive::open(out.child("Inbox/mbox").path());
    let listed = reopened.list().unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[1].name(), "00001_Quarterly report");
}

#[test]
fn test_vcard_contacts() {
    let (tmp, path) = staged("complex.mbox");
    let out = tmp.child("out");
    out.create_dir_all().unwrap();

    let archive = Archive::open(&path);
    let exp = exporter(ExportConf {
        contact_mode: "vcard".into(),
        output_mode: "unix".into(),
        output_dir: Some(out.path().to_path_buf()),
        ..ExportConf::default()
    });

    let mut records = archive.list().unwrap();
    records[7].export(&exp).unwrap();
    out.child("Contacts/00003_Carol.vcf")
        .assert(predicate::str::starts_with("BEGIN:VCARD\nVERSION:3.0\n"));

    let skip = exporter(ExportConf {
        contact_mode: "skip".into(),
        output_dir: Some(out.path().join("skipped")),
        ..ExportConf::default()
    });
    assert_eq!(records[8].export(&skip).unwrap(), 0);
    assert!(records[8].error_code().is_ok());
    out.child("skipped").assert(predicate::path::missing());
}

#[test]
fn test_collision_rename_never_overwrites() {
    let (tmp, path) = staged("simple.mbox");
    let archive = Archive::open(&path);
    let exp = exporter(ExportConf {
        collision: "rename".into(),
        ..ExportConf::default()
    });

    let mut records = archive.list().unwrap();
    let target = tmp.child("output_0.eml");
    records[0].set_renaming(target.path());
    records[0].export(&exp).unwrap();
    records[0].export(&exp).unwrap();

    target.assert(predicate::path::is_file());
    tmp.child("output_0_1.eml").assert(predicate::path::is_file());
}

#[test]
fn test_dos_line_endings() {
    let (tmp, path) = staged("simple.mbox");
    let archive = Archive::open(&path);
    let exp = exporter(ExportConf {
        output_mode: "dos".into(),
        ..ExportConf::default()
    });

    let mut records = archive.list().unwrap();
    let target = tmp.child("dos.eml");
    records[0].set_renaming(target.path());
    records[0].export(&exp).unwrap();

    let data = std::fs::read(target.path()).unwrap();
    let lf = data.iter().filter(|&&b| b == b'\n').count();
    let crlf = data.windows(2).filter(|w| *w == b"\r\n").count();
    assert!(lf > 0);
    assert_eq!(lf, crlf);
}

#[test]
fn test_released_handle_rejects_export() {
    let (tmp, path) = staged("simple.mbox");
    let mut archive = Archive::open(&path);
    let exp = exporter(ExportConf::default());
    let mut records = archive.list().unwrap();
    archive.destroy().unwrap();

    records[0].set_renaming(tmp.child("late.eml").path());
    assert!(matches!(
        records[0].export(&exp),
        Err(ArchiveError::HandleReleased)
    ));
    tmp.child("late.eml").assert(predicate::path::missing());
}
