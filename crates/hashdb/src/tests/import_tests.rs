use super::*;
use crate::{DbError, HashDb, ImportOptions};
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn import_then_reimport_is_idempotent() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");
    let list = write_list(
        tmp.path(),
        "list.xml",
        &dfxml_doc(&[TestFile::sequential(1, 74, 0)]),
    );

    let mut db = create_db(&db_dir);
    let first = db.import_dfxml(&list)?;
    assert_eq!(first.hashes_inserted, 74);
    assert_eq!(first.hashes_already_present, 0);
    assert_eq!(first.sources_inserted, 1);
    assert_eq!(first.sources_already_present, 0);

    let stats = db.stats();
    assert_eq!(stats.distinct_hashes, 74);
    assert_eq!(stats.total_entries, 74);
    assert_eq!(stats.source_count, 1);
    assert_eq!(stats.block_size, 4096);

    let second = db.import_dfxml(&list)?;
    assert_eq!(second.hashes_inserted, 0);
    assert_eq!(second.hashes_already_present, 74);
    assert_eq!(second.sources_inserted, 0);
    assert_eq!(second.sources_already_present, 1);
    assert_eq!(db.stats(), stats);
    Ok(())
}

#[test]
fn first_import_establishes_block_size() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");
    let list = write_list(
        tmp.path(),
        "list.xml",
        &dfxml_doc(&[TestFile::sequential(1, 2, 0)]),
    );

    let mut db = create_db(&db_dir);
    assert_eq!(db.stats().block_size, 0);
    db.import_dfxml(&list)?;
    assert_eq!(db.stats().block_size, 4096);

    // A reopen sees the established size.
    drop(db);
    let db = HashDb::open(&db_dir)?;
    assert_eq!(db.stats().block_size, 4096);
    Ok(())
}

#[test]
fn mismatched_block_size_is_rejected() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");
    let list = write_list(
        tmp.path(),
        "list.xml",
        &dfxml_doc(&[TestFile::sequential(1, 2, 0)]),
    );
    let wrong = write_list(
        tmp.path(),
        "wrong.xml",
        &dfxml_doc(&[TestFile::sequential(2, 1, 100)]).replace("len='4096'", "len='512'"),
    );

    let mut db = create_db(&db_dir);
    db.import_dfxml(&list)?;
    let before = db.stats();

    let err = db.import_dfxml(&wrong).unwrap_err();
    assert!(matches!(err, DbError::Parse(_)), "got {:?}", err);
    assert_eq!(db.stats(), before);
    Ok(())
}

#[test]
fn first_import_size_drift_is_a_parse_error() -> Result<()> {
    let tmp = tempdir()?;

    // Second fileobject's run disagrees with the size the first run of
    // the list fixed, on a database with no established block size yet.
    let doc = dfxml_doc(&[
        TestFile::sequential(1, 2, 0),
        TestFile::sequential(2, 1, 100),
    ])
    .replace(
        &format!("len='4096'><hashdigest type='md5'>{}", block_hex(100)),
        &format!("len='512'><hashdigest type='md5'>{}", block_hex(100)),
    );
    let list = write_list(tmp.path(), "drift.xml", &doc);

    // Abort policy: positioned parse error, nothing committed.
    let mut db = create_db(&tmp.path().join("db"));
    let err = db.import_dfxml(&list).unwrap_err();
    assert!(matches!(err, DbError::Parse(_)), "got {:?}", err);
    assert_eq!(db.stats().total_entries, 0);
    assert_eq!(db.stats().block_size, 0);

    // Skip policy: the drifting record drops like any other malformed one
    // and the first run still establishes the size.
    let mut db = create_db(&tmp.path().join("db2"));
    let change = db.import_dfxml_with(
        &list,
        ImportOptions {
            skip_malformed: true,
        },
    )?;
    assert_eq!(change.hashes_inserted, 2);
    assert_eq!(change.sources_inserted, 1);
    assert_eq!(db.stats().block_size, 4096);
    Ok(())
}

#[test]
fn parse_error_mid_list_rolls_back_everything() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");

    // Second fileobject carries an undecodable block hash.
    let doc = dfxml_doc(&[
        TestFile::sequential(1, 3, 0),
        TestFile::sequential(2, 2, 100),
    ])
    .replace(&block_hex(101), "zz-not-hex");
    let list = write_list(tmp.path(), "bad.xml", &doc);

    let mut db = create_db(&db_dir);
    let err = db.import_dfxml(&list).unwrap_err();
    assert!(matches!(err, DbError::Parse(_)), "got {:?}", err);

    // Nothing from the first fileobject leaked through.
    let stats = db.stats();
    assert_eq!(stats.total_entries, 0);
    assert_eq!(stats.source_count, 0);
    assert!(db.lookup(&hex::decode(block_hex(0)).unwrap())?.is_empty());

    // Same after a reopen.
    drop(db);
    let db = HashDb::open(&db_dir)?;
    assert_eq!(db.stats().total_entries, 0);
    Ok(())
}

#[test]
fn skip_malformed_keeps_good_records() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");

    let doc = dfxml_doc(&[
        TestFile::sequential(1, 2, 0),
        TestFile::sequential(2, 2, 100),
    ])
    .replace(&block_hex(100), "zz-not-hex");
    let list = write_list(tmp.path(), "bad.xml", &doc);

    let mut db = create_db(&db_dir);
    let change = db.import_dfxml_with(
        &list,
        ImportOptions {
            skip_malformed: true,
        },
    )?;

    // The clean first fileobject imported; the damaged one was dropped.
    assert_eq!(change.hashes_inserted, 2);
    assert_eq!(db.stats().total_entries, 2);
    Ok(())
}

#[test]
fn shared_block_across_sources_counts_per_tuple() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");

    // Both files contain the same single block content.
    let list = write_list(
        tmp.path(),
        "list.xml",
        &dfxml_doc(&[
            TestFile::sequential(1, 1, 7),
            TestFile::sequential(2, 1, 7),
        ]),
    );

    let mut db = create_db(&db_dir);
    let change = db.import_dfxml(&list)?;
    assert_eq!(change.hashes_inserted, 2);
    assert_eq!(change.sources_inserted, 2);

    let stats = db.stats();
    assert_eq!(stats.distinct_hashes, 1);
    assert_eq!(stats.total_entries, 2);

    let occs = db.lookup(&hex::decode(block_hex(7)).unwrap())?;
    assert_eq!(occs.len(), 2);
    Ok(())
}

#[test]
fn source_filesize_conflict_aborts() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");

    let list = write_list(
        tmp.path(),
        "a.xml",
        &dfxml_doc(&[TestFile::sequential(1, 2, 0)]),
    );
    // Same identifying hash, different claimed filesize.
    let conflicting = write_list(
        tmp.path(),
        "b.xml",
        &dfxml_doc(&[TestFile::sequential(1, 2, 0)]).replace("<filesize>8192<", "<filesize>4096<"),
    );

    let mut db = create_db(&db_dir);
    db.import_dfxml(&list)?;
    let before = db.stats();

    let err = db.import_dfxml(&conflicting).unwrap_err();
    assert!(matches!(err, DbError::SourceConflict(_)), "got {:?}", err);
    assert_eq!(db.stats(), before);
    Ok(())
}

#[test]
fn export_import_round_trips_through_json() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");
    let list = write_list(
        tmp.path(),
        "list.xml",
        &dfxml_doc(&[
            TestFile::sequential(1, 5, 0),
            TestFile::sequential(2, 3, 3), // overlaps hashes 3 and 4
        ]),
    );

    let mut db = create_db(&db_dir);
    db.import_dfxml(&list)?;

    let export_path = tmp.path().join("export.json");
    db.export_json_to_path(&export_path)?;

    let mut copy = create_db(&tmp.path().join("copy"));
    let change = copy.import_json(&export_path)?;
    assert_eq!(change.hashes_inserted, 8);
    assert_eq!(change.sources_inserted, 2);

    let a = db.stats();
    let b = copy.stats();
    assert_eq!(a.distinct_hashes, b.distinct_hashes);
    assert_eq!(a.total_entries, b.total_entries);
    assert_eq!(a.source_count, b.source_count);

    assert_eq!(export_sorted(&db), export_sorted(&copy));
    Ok(())
}

#[test]
fn json_import_skips_comments_and_counts_lines() -> Result<()> {
    let tmp = tempdir()?;
    let db_dir = tmp.path().join("db");

    let json = format!(
        "# header comment\n\
         {{\"file_hash\": \"{f}\", \"filesize\": 8192}}\n\
         {{\"file_hash\": \"{f}\", \"repository_name\": \"r\", \"filename\": \"x.dat\"}}\n\
         {{\"block_hash\": \"{b}\", \"file_hash\": \"{f}\", \"file_offset\": 0}}\n",
        f = file_hex(1),
        b = block_hex(1),
    );
    let path = tmp.path().join("list.json");
    std::fs::write(&path, json)?;

    let mut db = create_db(&db_dir);
    let change = db.import_json(&path)?;
    assert_eq!(change.sources_inserted, 1);
    assert_eq!(change.sources_already_present, 1); // the name line hit it
    assert_eq!(change.hashes_inserted, 1);

    let hits = db.lookup_sources(&hex::decode(block_hex(1)).unwrap())?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].filesize, 8192);
    assert_eq!(hits[0].names.len(), 1);
    Ok(())
}
