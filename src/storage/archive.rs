//! Zip archive ingestion for batched test-case import (spec §4.1/§6).
//!
//! Grounded on `original_source/backend/app/services/testcase_storage.py`'s
//! `import_zip_cases` for the pairing/skip/overwrite semantics, translated
//! onto the `zip` crate.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use crate::error::{JudgeError, JudgeResult};

use super::{CaseMeta, TestCaseStorage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStrategy {
    Skip,
    Overwrite,
}

#[derive(Debug, Clone)]
pub struct ImportFailure {
    pub case_no: Option<u32>,
    pub entry: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub imported: Vec<CaseMeta>,
    pub failed: Vec<ImportFailure>,
}

#[derive(Default)]
struct PairSlot {
    in_entry: Option<String>,
    out_entry: Option<String>,
}

/// Classify an entry's basename as `(case_no, is_input)`, or `None` if it
/// doesn't match `<int>.in`/`<int>.out` (case-insensitive suffix).
fn classify_entry(name: &str) -> Option<(u32, bool)> {
    let basename = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let lower = basename.to_ascii_lowercase();
    let (stem, is_input) = if let Some(stem) = lower.strip_suffix(".in") {
        (stem, true)
    } else if let Some(stem) = lower.strip_suffix(".out") {
        (stem, false)
    } else {
        return None;
    };
    stem.parse::<u32>().ok().map(|case_no| (case_no, is_input))
}

/// Reject path-traversal / absolute-looking entry names outright (the
/// whole archive is rejected, not just the entry — spec §8 boundary case).
fn has_unsafe_path(name: &str) -> bool {
    if name.starts_with('/') || name.starts_with('\\') {
        return true;
    }
    name.split(['/', '\\']).any(|part| part == "..")
}

pub fn import_archive(
    storage: &TestCaseStorage,
    key: &str,
    archive_bytes: &[u8],
    strategy: ImportStrategy,
) -> JudgeResult<ImportReport> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| JudgeError::MalformedArchive(e.to_string()))?;

    // Preflight: reject unsafe names and zip bombs before extracting anything.
    let mut cumulative: u64 = 0;
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| JudgeError::MalformedArchive(e.to_string()))?;
        let name = entry.name().to_string();
        if has_unsafe_path(&name) {
            return Err(JudgeError::InvalidPath(name.into()));
        }
        if !entry.is_dir() {
            cumulative += entry.size();
            if cumulative > storage.max_zip_extract_bytes {
                return Err(JudgeError::ArchiveTooLarge {
                    limit: storage.max_zip_extract_bytes,
                });
            }
        }
    }

    // Group matching entries by case_no.
    let mut slots: BTreeMap<u32, PairSlot> = BTreeMap::new();
    let mut report = ImportReport::default();

    for i in 0..archive.len() {
        let name = archive
            .by_index_raw(i)
            .map_err(|e| JudgeError::MalformedArchive(e.to_string()))?
            .name()
            .to_string();
        let Some((case_no, is_input)) = classify_entry(&name) else {
            continue; // non-matching entries are ignored per spec §6
        };
        let slot = slots.entry(case_no).or_default();
        let existing = if is_input { &mut slot.in_entry } else { &mut slot.out_entry };
        match existing {
            Some(_) => report.failed.push(ImportFailure {
                case_no: Some(case_no),
                entry: name,
                reason: "duplicate".to_string(),
            }),
            None => *existing = Some(name),
        }
    }

    for (case_no, slot) in slots {
        let (in_name, out_name) = match (slot.in_entry, slot.out_entry) {
            (Some(i), Some(o)) => (i, o),
            (Some(i), None) => {
                report.failed.push(ImportFailure {
                    case_no: Some(case_no),
                    entry: i,
                    reason: "missing pair".to_string(),
                });
                continue;
            }
            (None, Some(o)) => {
                report.failed.push(ImportFailure {
                    case_no: Some(case_no),
                    entry: o,
                    reason: "missing pair".to_string(),
                });
                continue;
            }
            (None, None) => continue,
        };

        if strategy == ImportStrategy::Skip && storage.case_exists(key, case_no) {
            continue;
        }

        let in_bytes = match read_entry(&mut archive, &in_name) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.failed.push(ImportFailure {
                    case_no: Some(case_no),
                    entry: in_name,
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let out_bytes = match read_entry(&mut archive, &out_name) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.failed.push(ImportFailure {
                    case_no: Some(case_no),
                    entry: out_name,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        match storage.write_case(key, case_no, &in_bytes, &out_bytes) {
            Ok(meta) => report.imported.push(meta),
            Err(e) => report.failed.push(ImportFailure {
                case_no: Some(case_no),
                entry: format!("{in_name}/{out_name}"),
                reason: e.to_string(),
            }),
        }
    }

    Ok(report)
}

fn read_entry(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> JudgeResult<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .map_err(|e| JudgeError::MalformedArchive(e.to_string()))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .map_err(|e| JudgeError::io(name, e))?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    fn storage() -> (TestCaseStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path(), 1024 * 1024).unwrap();
        (storage, dir)
    }

    #[test]
    fn imports_paired_entries() {
        let (storage, _dir) = storage();
        let zip_bytes = build_zip(&[("1.in", b"4\n"), ("1.out", b"0 1\n"), ("2.in", b"3\n"), ("2.out", b"1 2\n")]);
        let report = storage.import_archive("p", &zip_bytes, ImportStrategy::Overwrite).unwrap();
        assert_eq!(report.imported.len(), 2);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn unpaired_entry_is_recorded_as_failed() {
        let (storage, _dir) = storage();
        let zip_bytes = build_zip(&[("1.in", b"4\n")]);
        let report = storage.import_archive("p", &zip_bytes, ImportStrategy::Overwrite).unwrap();
        assert!(report.imported.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].reason, "missing pair");
    }

    #[test]
    fn traversal_entry_rejects_whole_archive() {
        let (storage, _dir) = storage();
        let zip_bytes = build_zip(&[("../evil.in", b"x")]);
        let err = storage.import_archive("p", &zip_bytes, ImportStrategy::Overwrite).unwrap_err();
        assert!(matches!(err, JudgeError::InvalidPath(_)));
    }

    #[test]
    fn oversized_archive_is_rejected() {
        let (storage, _dir) = storage();
        let zip_bytes = build_zip(&[("1.in", &[0u8; 2000]), ("1.out", b"ok")]);
        let err = storage.import_archive("p", &zip_bytes, ImportStrategy::Overwrite).unwrap_err();
        assert!(matches!(err, JudgeError::ArchiveTooLarge { .. }));
    }

    #[test]
    fn skip_strategy_ignores_existing_cases() {
        let (storage, _dir) = storage();
        storage
            .save_single("p", 1, Cursor::new(b"old-in".to_vec()), Cursor::new(b"old-out".to_vec()))
            .unwrap();
        let zip_bytes = build_zip(&[("1.in", b"new-in"), ("1.out", b"new-out")]);
        let report = storage.import_archive("p", &zip_bytes, ImportStrategy::Skip).unwrap();
        assert!(report.imported.is_empty());
        let in_path = storage.resolve("p/1.in").unwrap();
        assert_eq!(std::fs::read(in_path).unwrap(), b"old-in");
    }

    #[test]
    fn overwrite_strategy_replaces_existing_cases() {
        let (storage, _dir) = storage();
        storage
            .save_single("p", 1, Cursor::new(b"old-in".to_vec()), Cursor::new(b"old-out".to_vec()))
            .unwrap();
        let zip_bytes = build_zip(&[("1.in", b"new-in"), ("1.out", b"new-out")]);
        let report = storage.import_archive("p", &zip_bytes, ImportStrategy::Overwrite).unwrap();
        assert_eq!(report.imported.len(), 1);
        let in_path = storage.resolve("p/1.in").unwrap();
        assert_eq!(std::fs::read(in_path).unwrap(), b"new-in");
    }
}
