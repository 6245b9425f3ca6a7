use super::hash;
use crate::{MergeIterator, SegmentReader, SegmentWriter};
use anyhow::Result;
use stage::{Occurrence, Stage};
use tempfile::tempdir;

fn write_segment(dir: &std::path::Path, name: &str, entries: &[(u64, u64, u64)]) -> SegmentReader {
    // entries: (hash_counter, source_id, offset)
    let mut s = Stage::new();
    for &(h, src, off) in entries {
        s.insert(hash(h), Occurrence::new(src, off));
    }
    let path = dir.join(name);
    SegmentWriter::write_from_stage(&path, &s).unwrap();
    SegmentReader::open(&path).unwrap()
}

#[test]
fn merge_two_disjoint_segments() -> Result<()> {
    let dir = tempdir()?;
    let r1 = write_segment(dir.path(), "a.seg", &[(1, 1, 0), (3, 1, 4096)]);
    let r2 = write_segment(dir.path(), "b.seg", &[(2, 2, 0), (4, 2, 4096)]);

    let readers = vec![r1, r2];
    let mut merge = MergeIterator::new(&readers);
    let all = merge.collect_all()?;

    let keys: Vec<Vec<u8>> = all.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys, vec![hash(1), hash(2), hash(3), hash(4)]);
    Ok(())
}

#[test]
fn shared_hash_unions_occurrences() -> Result<()> {
    let dir = tempdir()?;
    let r1 = write_segment(dir.path(), "a.seg", &[(1, 1, 0), (1, 1, 4096)]);
    let r2 = write_segment(dir.path(), "b.seg", &[(1, 2, 0)]);

    let readers = vec![r1, r2];
    let mut merge = MergeIterator::new(&readers);
    let all = merge.collect_all()?;

    assert_eq!(all.len(), 1);
    let (k, occs) = &all[0];
    assert_eq!(k, &hash(1));
    assert_eq!(
        occs,
        &vec![
            Occurrence::new(1, 0),
            Occurrence::new(1, 4096),
            Occurrence::new(2, 0)
        ]
    );
    Ok(())
}

#[test]
fn duplicate_tuples_across_segments_collapse() -> Result<()> {
    // The same (hash, source, offset) tuple in two segments must appear
    // once in the merged stream, or re-imports would inflate the database
    // during compaction.
    let dir = tempdir()?;
    let r1 = write_segment(dir.path(), "a.seg", &[(7, 3, 8192)]);
    let r2 = write_segment(dir.path(), "b.seg", &[(7, 3, 8192)]);

    let readers = vec![r1, r2];
    let mut merge = MergeIterator::new(&readers);
    let all = merge.collect_all()?;

    assert_eq!(all.len(), 1);
    assert_eq!(all[0].1, vec![Occurrence::new(3, 8192)]);
    Ok(())
}

#[test]
fn merge_single_segment_passes_through() -> Result<()> {
    let dir = tempdir()?;
    let r1 = write_segment(dir.path(), "a.seg", &[(1, 1, 0), (2, 1, 4096), (3, 1, 8192)]);

    let readers = vec![r1];
    let mut merge = MergeIterator::new(&readers);
    let all = merge.collect_all()?;

    assert_eq!(all.len(), 3);
    Ok(())
}

#[test]
fn merge_three_segments_key_order() -> Result<()> {
    let dir = tempdir()?;
    let r1 = write_segment(dir.path(), "a.seg", &[(5, 1, 0), (1, 1, 0)]);
    let r2 = write_segment(dir.path(), "b.seg", &[(3, 2, 0), (1, 2, 0)]);
    let r3 = write_segment(dir.path(), "c.seg", &[(4, 3, 0), (2, 3, 0)]);

    let readers = vec![r1, r2, r3];
    let mut merge = MergeIterator::new(&readers);
    let all = merge.collect_all()?;

    let keys: Vec<Vec<u8>> = all.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys, vec![hash(1), hash(2), hash(3), hash(4), hash(5)]);
    // hash(1) appears in two segments with different sources
    assert_eq!(all[0].1.len(), 2);
    Ok(())
}

#[test]
fn merge_empty_reader_list() -> Result<()> {
    let readers: Vec<SegmentReader> = Vec::new();
    let mut merge = MergeIterator::new(&readers);
    assert!(merge.next_entry()?.is_none());
    Ok(())
}
