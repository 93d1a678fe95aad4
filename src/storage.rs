//! Test-case storage: on-disk layout under `<storage_root>/<key>/<case_no>.in|out`,
//! content-addressed via streamed SHA-256, with archive ingestion (see
//! `storage::archive`). Grounded on
//! `original_source/backend/app/services/testcase_storage.py`.

pub mod archive;

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{JudgeError, JudgeResult};

pub use archive::{ImportFailure, ImportReport, ImportStrategy};

const HASH_CHUNK_BYTES: usize = 64 * 1024;

/// Metadata returned after a successful write of one side of a test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub size_bytes: u64,
    pub sha256: String,
}

/// Metadata for both sides of a test case after `save_single`/`replace`.
#[derive(Debug, Clone)]
pub struct CaseMeta {
    pub case_no: u32,
    pub in_meta: FileMeta,
    pub out_meta: FileMeta,
}

pub struct TestCaseStorage {
    root: PathBuf,
    pub max_zip_extract_bytes: u64,
}

impl TestCaseStorage {
    pub fn new(root: impl Into<PathBuf>, max_zip_extract_bytes: u64) -> JudgeResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| JudgeError::io(&root, e))?;
        Ok(Self {
            root,
            max_zip_extract_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitize a problem slug/id into a filesystem-safe directory name
    /// (spec §4.1: `[A-Za-z0-9._-]`, other bytes become `_`, empty → "unknown").
    pub fn sanitize_key(key: &str) -> String {
        let sanitized: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if sanitized.is_empty() {
            "unknown".to_string()
        } else {
            sanitized
        }
    }

    fn problem_dir(&self, key: &str) -> PathBuf {
        self.root.join(Self::sanitize_key(key))
    }

    fn case_paths(&self, key: &str, case_no: u32) -> (PathBuf, PathBuf) {
        let dir = self.problem_dir(key);
        (dir.join(format!("{case_no}.in")), dir.join(format!("{case_no}.out")))
    }

    /// Resolve a path relative to the storage root, rejecting any result
    /// that escapes the root after symlink-free normalization.
    pub fn resolve(&self, relative: &str) -> JudgeResult<PathBuf> {
        let joined = self.root.join(relative);
        let normalized = normalize_lexically(&joined);
        let root_normalized = normalize_lexically(&self.root);
        if !normalized.starts_with(&root_normalized) {
            return Err(JudgeError::InvalidPath(joined));
        }
        Ok(normalized)
    }

    /// Write both sides of one test case, streaming each through SHA-256 in
    /// 64 KiB chunks. On any write failure, both partial files are removed
    /// before the error is surfaced.
    pub fn save_single(
        &self,
        key: &str,
        case_no: u32,
        mut in_stream: impl Read,
        mut out_stream: impl Read,
    ) -> JudgeResult<CaseMeta> {
        let dir = self.problem_dir(key);
        fs::create_dir_all(&dir).map_err(|e| JudgeError::io(&dir, e))?;
        let (in_path, out_path) = self.case_paths(key, case_no);

        let in_meta = match write_stream(&in_path, &mut in_stream) {
            Ok(meta) => meta,
            Err(e) => {
                let _ = fs::remove_file(&in_path);
                let _ = fs::remove_file(&out_path);
                return Err(e);
            }
        };
        let out_meta = match write_stream(&out_path, &mut out_stream) {
            Ok(meta) => meta,
            Err(e) => {
                let _ = fs::remove_file(&in_path);
                let _ = fs::remove_file(&out_path);
                return Err(e);
            }
        };

        Ok(CaseMeta {
            case_no,
            in_meta,
            out_meta,
        })
    }

    /// Rename-only when both `new_in`/`new_out` are absent (changes
    /// `case_no`); otherwise replaces whichever side is given, leaving the
    /// other untouched.
    pub fn replace(
        &self,
        key: &str,
        case_no: u32,
        new_case_no: Option<u32>,
        new_in: Option<impl Read>,
        new_out: Option<impl Read>,
    ) -> JudgeResult<CaseMeta> {
        let (in_path, out_path) = self.case_paths(key, case_no);
        let target_no = new_case_no.unwrap_or(case_no);
        let (target_in, target_out) = self.case_paths(key, target_no);

        if target_no != case_no {
            if in_path.exists() {
                fs::rename(&in_path, &target_in).map_err(|e| JudgeError::io(&target_in, e))?;
            }
            if out_path.exists() {
                fs::rename(&out_path, &target_out).map_err(|e| JudgeError::io(&target_out, e))?;
            }
        }

        let in_meta = match new_in {
            Some(mut reader) => write_stream(&target_in, &mut reader)?,
            None => meta_of_existing(&target_in)?,
        };
        let out_meta = match new_out {
            Some(mut reader) => write_stream(&target_out, &mut reader)?,
            None => meta_of_existing(&target_out)?,
        };

        Ok(CaseMeta {
            case_no: target_no,
            in_meta,
            out_meta,
        })
    }

    /// Import a zip archive of `<case_no>.in`/`.out` entries; see
    /// `storage::archive::import_archive` for the full algorithm.
    pub fn import_archive(
        &self,
        key: &str,
        archive_bytes: &[u8],
        strategy: ImportStrategy,
    ) -> JudgeResult<ImportReport> {
        archive::import_archive(self, key, archive_bytes, strategy)
    }

    /// Best-effort removal of the given storage-relative paths.
    pub fn delete(&self, paths: &[&str]) {
        for relative in paths {
            if let Ok(absolute) = self.resolve(relative) {
                let _ = fs::remove_file(absolute);
            }
        }
    }

    pub(crate) fn case_exists(&self, key: &str, case_no: u32) -> bool {
        let (in_path, out_path) = self.case_paths(key, case_no);
        in_path.exists() && out_path.exists()
    }

    pub(crate) fn write_case(
        &self,
        key: &str,
        case_no: u32,
        in_bytes: &[u8],
        out_bytes: &[u8],
    ) -> JudgeResult<CaseMeta> {
        self.save_single(key, case_no, in_bytes, out_bytes)
    }
}

fn meta_of_existing(path: &Path) -> JudgeResult<FileMeta> {
    let bytes = fs::read(path).map_err(|e| JudgeError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(FileMeta {
        size_bytes: bytes.len() as u64,
        sha256: hex_digest(hasher),
    })
}

fn write_stream(path: &Path, reader: &mut impl Read) -> JudgeResult<FileMeta> {
    let mut file = fs::File::create(path).map_err(|e| JudgeError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_BYTES];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).map_err(|e| JudgeError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n]).map_err(|e| JudgeError::io(path, e))?;
        total += n as u64;
    }
    file.sync_all().map_err(|e| JudgeError::io(path, e))?;
    Ok(FileMeta {
        size_bytes: total,
        sha256: hex_digest(hasher),
    })
}

fn hex_digest(hasher: Sha256) -> String {
    let bytes = hasher.finalize();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Lexical `..`/`.` normalization without touching the filesystem (no
/// `canonicalize`, since the target file may not exist yet).
fn normalize_lexically(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn storage() -> (TestCaseStorage, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = TestCaseStorage::new(dir.path(), 200 * 1024 * 1024).unwrap();
        (storage, dir)
    }

    #[test]
    fn sanitize_key_replaces_unsafe_bytes() {
        assert_eq!(TestCaseStorage::sanitize_key("two-sum_1.0"), "two-sum_1.0");
        assert_eq!(TestCaseStorage::sanitize_key("../../etc"), "______etc");
        assert_eq!(TestCaseStorage::sanitize_key(""), "unknown");
        assert_eq!(TestCaseStorage::sanitize_key("!!!"), "___");
    }

    #[test]
    fn save_single_records_accurate_size_and_hash() {
        let (storage, _dir) = storage();
        let meta = storage
            .save_single(
                "two-sum",
                1,
                Cursor::new(b"4\n2 7 11 15\n9\n".to_vec()),
                Cursor::new(b"0 1\n".to_vec()),
            )
            .unwrap();
        assert_eq!(meta.in_meta.size_bytes, 14);
        assert_eq!(meta.out_meta.size_bytes, 4);

        let in_path = storage.resolve("two-sum/1.in").unwrap();
        let on_disk_size = fs::metadata(&in_path).unwrap().len();
        assert_eq!(on_disk_size, meta.in_meta.size_bytes);

        let mut hasher = Sha256::new();
        hasher.update(fs::read(&in_path).unwrap());
        assert_eq!(hex_digest(hasher), meta.in_meta.sha256);
    }

    #[test]
    fn resolve_rejects_root_escape() {
        let (storage, _dir) = storage();
        assert!(storage.resolve("../evil").is_err());
        assert!(storage.resolve("two-sum/../../evil").is_err());
        assert!(storage.resolve("two-sum/1.in").is_ok());
    }

    #[test]
    fn replace_with_no_new_files_is_noop_on_contents() {
        let (storage, _dir) = storage();
        let before = storage
            .save_single(
                "p",
                1,
                Cursor::new(b"in".to_vec()),
                Cursor::new(b"out".to_vec()),
            )
            .unwrap();
        let after = storage
            .replace(
                "p",
                1,
                None,
                None::<Cursor<Vec<u8>>>,
                None::<Cursor<Vec<u8>>>,
            )
            .unwrap();
        assert_eq!(before.in_meta, after.in_meta);
        assert_eq!(before.out_meta, after.out_meta);
    }

    #[test]
    fn replace_renames_case_no() {
        let (storage, _dir) = storage();
        storage
            .save_single("p", 1, Cursor::new(b"in".to_vec()), Cursor::new(b"out".to_vec()))
            .unwrap();
        let after = storage
            .replace(
                "p",
                1,
                Some(2),
                None::<Cursor<Vec<u8>>>,
                None::<Cursor<Vec<u8>>>,
            )
            .unwrap();
        assert_eq!(after.case_no, 2);
        assert!(storage.resolve("p/2.in").unwrap().exists());
        assert!(!storage.resolve("p/1.in").unwrap().exists());
    }
}
