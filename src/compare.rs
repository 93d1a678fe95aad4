//! Output Comparator (spec §4.4): streaming byte-exact equality of two
//! files, never loading either fully. Deliberately NOT the normalizing
//! comparison the lineage's `compare_output_standard`/`_strict` and
//! `original_source/backend/app/runner/compare.py` both perform — see
//! DESIGN.md.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{JudgeError, JudgeResult};
use crate::model::{bounded_preview, PREVIEW_BYTES};

const CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct CompareDiagnostic {
    pub expected_preview: String,
    pub actual_preview: String,
    pub mismatch_pos: Option<u64>,
}

/// Byte-exact comparison of two files, read in lockstep 64 KiB chunks.
/// Returns `(equal, diagnostic)`; `mismatch_pos` is the byte offset of the
/// first differing chunk's start (including a length mismatch), or `None`
/// when the files are identical.
pub fn compare(expected_path: &Path, actual_path: &Path) -> JudgeResult<(bool, CompareDiagnostic)> {
    let mut expected = File::open(expected_path).map_err(|e| JudgeError::io(expected_path, e))?;
    let mut actual = File::open(actual_path).map_err(|e| JudgeError::io(actual_path, e))?;

    let expected_preview = read_preview(&mut File::open(expected_path).map_err(|e| JudgeError::io(expected_path, e))?);
    let actual_preview = read_preview(&mut File::open(actual_path).map_err(|e| JudgeError::io(actual_path, e))?);

    let mut expected_buf = [0u8; CHUNK_BYTES];
    let mut actual_buf = [0u8; CHUNK_BYTES];
    let mut offset: u64 = 0;

    loop {
        let e_n = expected.read(&mut expected_buf).map_err(|e| JudgeError::io(expected_path, e))?;
        let a_n = actual.read(&mut actual_buf).map_err(|e| JudgeError::io(actual_path, e))?;

        if e_n == 0 && a_n == 0 {
            return Ok((
                true,
                CompareDiagnostic {
                    expected_preview,
                    actual_preview,
                    mismatch_pos: None,
                },
            ));
        }

        if e_n != a_n || expected_buf[..e_n] != actual_buf[..a_n] {
            return Ok((
                false,
                CompareDiagnostic {
                    expected_preview,
                    actual_preview,
                    mismatch_pos: Some(offset),
                },
            ));
        }

        offset += e_n as u64;
    }
}

fn read_preview(file: &mut File) -> String {
    let mut buf = vec![0u8; PREVIEW_BYTES];
    let n = file.read(&mut buf).unwrap_or(0);
    bounded_preview(&buf[..n], PREVIEW_BYTES)
}
