/// End-to-end tests driving the `cairn` binary as a subprocess.
/// Covers: create, DFXML import, stats, scan, JSON export/import, merge,
/// and failure exit codes.
use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::tempdir;

/// Runs `cairn` with the given arguments and captures the output.
fn run_cairn(args: &[&str]) -> Output {
    Command::new("cargo")
        .args(["run", "-p", "cli", "--quiet", "--"])
        .args(args)
        .output()
        .expect("failed to spawn cairn")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// A small DFXML list: one source file of `count` 4096-byte blocks.
fn dfxml_doc(count: u64) -> String {
    let mut runs = String::new();
    for i in 0..count {
        runs.push_str(&format!(
            "<byte_run file_offset='{}' len='4096'>\
             <hashdigest type='md5'>{:032x}</hashdigest></byte_run>\n",
            i * 4096,
            i + 1
        ));
    }
    format!(
        "<?xml version='1.0' encoding='UTF-8'?>\n\
         <dfxml xmloutputversion='1.0'>\n\
         <fileobject>\n\
         <repository_name>testrepo</repository_name>\n\
         <filename>image.dat</filename>\n\
         <filesize>{}</filesize>\n\
         <byte_runs>\n{}</byte_runs>\n\
         <hashdigest type='md5'>{:032x}</hashdigest>\n\
         </fileobject>\n\
         </dfxml>\n",
        count * 4096,
        runs,
        0xf00du64
    )
}

fn write_list(dir: &Path, doc: &str) -> String {
    let path = dir.join("list.xml");
    fs::write(&path, doc).unwrap();
    path.to_str().unwrap().to_string()
}

#[test]
fn test_create_import_stats() {
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("db");
    let db = db.to_str().unwrap();
    let list = write_list(tmp.path(), &dfxml_doc(3));

    let out = run_cairn(&["create", db]);
    assert!(out.status.success(), "{:?}", out);
    assert!(stdout_of(&out).contains("created md5 database"));

    let out = run_cairn(&["import", db, &list]);
    assert!(out.status.success(), "{:?}", out);
    let text = stdout_of(&out);
    assert!(text.contains("hashes_inserted: 3"), "{}", text);
    assert!(text.contains("sources_inserted: 1"), "{}", text);

    let out = run_cairn(&["stats", db]);
    assert!(out.status.success());
    let text = stdout_of(&out);
    assert!(text.contains("algorithm: md5"), "{}", text);
    assert!(text.contains("block_size: 4096"), "{}", text);
    assert!(text.contains("total_entries: 3"), "{}", text);
    assert!(text.contains("source_count: 1"), "{}", text);
}

#[test]
fn test_reimport_reports_already_present() {
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("db");
    let db = db.to_str().unwrap();
    let list = write_list(tmp.path(), &dfxml_doc(2));

    assert!(run_cairn(&["create", db]).status.success());
    assert!(run_cairn(&["import", db, &list]).status.success());

    let out = run_cairn(&["import", db, &list]);
    assert!(out.status.success());
    let text = stdout_of(&out);
    assert!(text.contains("hashes_inserted: 0"), "{}", text);
    assert!(text.contains("hashes_already_present: 2"), "{}", text);
}

#[test]
fn test_scan_finds_imported_hash() {
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("db");
    let db = db.to_str().unwrap();
    let list = write_list(tmp.path(), &dfxml_doc(2));

    assert!(run_cairn(&["create", db]).status.success());
    assert!(run_cairn(&["import", db, &list]).status.success());

    let hash = format!("{:032x}", 1u64);
    let out = run_cairn(&["scan", db, &hash]);
    assert!(out.status.success());
    let text = stdout_of(&out);
    assert!(text.contains("offset=0"), "{}", text);
    assert!(text.contains("testrepo/image.dat"), "{}", text);
    assert!(text.contains("(1 occurrences)"), "{}", text);

    let out = run_cairn(&["scan", db, &format!("{:032x}", 999u64)]);
    assert!(out.status.success());
    assert!(stdout_of(&out).contains("not found"));
}

#[test]
fn test_export_then_import_json() {
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("db");
    let db = db.to_str().unwrap();
    let copy = tmp.path().join("copy");
    let copy = copy.to_str().unwrap();
    let export = tmp.path().join("export.json");
    let export = export.to_str().unwrap();
    let list = write_list(tmp.path(), &dfxml_doc(4));

    assert!(run_cairn(&["create", db]).status.success());
    assert!(run_cairn(&["import", db, &list]).status.success());
    assert!(run_cairn(&["export-json", db, export]).status.success());

    assert!(run_cairn(&["create", copy]).status.success());
    let out = run_cairn(&["import-json", copy, export]);
    assert!(out.status.success(), "{:?}", out);
    assert!(stdout_of(&out).contains("hashes_inserted: 4"));

    let out = run_cairn(&["stats", copy]);
    assert!(stdout_of(&out).contains("total_entries: 4"));
}

#[test]
fn test_merge_databases() {
    let tmp = tempdir().unwrap();
    let a = tmp.path().join("a");
    let a = a.to_str().unwrap();
    let b = tmp.path().join("b");
    let b = b.to_str().unwrap();
    let list = write_list(tmp.path(), &dfxml_doc(3));

    assert!(run_cairn(&["create", a]).status.success());
    assert!(run_cairn(&["create", b]).status.success());
    assert!(run_cairn(&["import", b, &list]).status.success());

    let out = run_cairn(&["merge", a, b]);
    assert!(out.status.success(), "{:?}", out);
    assert!(stdout_of(&out).contains("hashes_inserted: 3"));

    let out = run_cairn(&["stats", a]);
    assert!(stdout_of(&out).contains("total_entries: 3"));
}

#[test]
fn test_errors_set_exit_status() {
    let tmp = tempdir().unwrap();
    let db = tmp.path().join("db");
    let db = db.to_str().unwrap();

    // Opening a directory that is not a database.
    let out = run_cairn(&["stats", db]);
    assert!(!out.status.success());
    assert!(!out.stderr.is_empty());

    // Unknown algorithm on create.
    let out = run_cairn(&["create", db, "--algorithm", "crc32"]);
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("unknown hash algorithm"));

    // Bad hex to scan.
    assert!(run_cairn(&["create", db]).status.success());
    let out = run_cairn(&["scan", db, "not-hex"]);
    assert!(!out.status.success());
}
