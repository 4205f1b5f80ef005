//! Archive diff engine: decompress two archives on parallel threads, then
//! build the per-entry decision table in the chosen memory regime.

use std::path::Path;
use std::thread;

use log::debug;

use crate::archive::{ArchiveEntryData, EntryContent, read_archive};
use crate::cancel::CancelToken;
use crate::source::identity_check;
use crate::types::{CompareError, CompareOptions, DiffReason, DirResult, Result};

/// Compare two archives entry-by-entry.
///
/// Buffered mode keeps every member's bytes (memory O(total decompressed),
/// bounded by the bomb limits); hash mode keeps `(size, fingerprint)` per
/// member (memory O(entry count)). Fingerprint collisions are outside the
/// threat model.
pub(crate) fn compare_archive_impl(
    path_a: &Path,
    path_b: &Path,
    opts: &CompareOptions,
) -> Result<DirResult> {
    if identity_check(path_a, path_b) {
        debug!(
            "identity: {} and {} are the same archive",
            path_a.display(),
            path_b.display()
        );
        return Ok(DirResult::default());
    }

    let token = CancelToken::for_options(opts);
    let hashed = opts.hash_compare;

    let (left, right) = thread::scope(|s| {
        let ha = s.spawn(|| read_archive(path_a, opts, hashed, &token));
        let hb = s.spawn(|| read_archive(path_b, opts, hashed, &token));
        let left = join_reader(ha, path_a);
        if left.is_err() {
            // Stop the sibling at its next chunk; no point finishing.
            token.cancel();
        }
        let right = join_reader(hb, path_b);
        (left, right)
    });
    // Cancel leakage: a reader failing fatally while the other was cancelled
    // must surface the real failure.
    let (left, right) = match (left, right) {
        (Err(CompareError::Cancelled), Err(e)) | (Err(e), Err(CompareError::Cancelled)) => {
            return Err(e);
        }
        (Err(e), _) | (_, Err(e)) => return Err(e),
        (Ok(a), Ok(b)) => (a, b),
    };

    let mut result = DirResult::default();
    for (path, entry_a) in &left {
        match right.get(path) {
            None => {
                result.only_left.insert(path.clone());
            }
            Some(entry_b) => {
                if let Some(reason) = entry_diff(entry_a, entry_b) {
                    result.diff.insert(path.clone(), reason);
                }
            }
        }
    }
    for path in right.keys() {
        if !left.contains_key(path) {
            result.only_right.insert(path.clone());
        }
    }
    Ok(result.finish())
}

fn join_reader(
    handle: thread::ScopedJoinHandle<'_, Result<std::collections::BTreeMap<String, ArchiveEntryData>>>,
    path: &Path,
) -> Result<std::collections::BTreeMap<String, ArchiveEntryData>> {
    handle.join().unwrap_or_else(|_| {
        Err(CompareError::Archive {
            archive: path.display().to_string(),
            detail: "archive reader thread panicked".to_string(),
        })
    })
}

/// Decision for one common entry. Size first, then content; an unreadable
/// member on either side is a localized read error.
fn entry_diff(a: &ArchiveEntryData, b: &ArchiveEntryData) -> Option<DiffReason> {
    if matches!(a.content, EntryContent::Unreadable) || matches!(b.content, EntryContent::Unreadable)
    {
        return Some(DiffReason::ReadError);
    }
    if a.size != b.size {
        return Some(DiffReason::SizeMismatch);
    }
    let same = match (&a.content, &b.content) {
        (EntryContent::Bytes(ba), EntryContent::Bytes(bb)) => ba == bb,
        (EntryContent::Fingerprint(fa), EntryContent::Fingerprint(fb)) => fa == fb,
        // Both sides of one comparison always use the same regime.
        _ => false,
    };
    if same {
        None
    } else {
        Some(DiffReason::ContentMismatch)
    }
}
