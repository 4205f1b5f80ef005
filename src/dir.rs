//! Directory walker and merger: lockstep two-tree traversal, per-file
//! comparison tasks through the worker pool, and glob-based result
//! filtering. Also hosts the directory-vs-URL-map comparison.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::cmp::compare_sources;
use crate::pool;
use crate::source::identity_check;
use crate::types::{
    CompareError, CompareOptions, DiffReason, DirResult, RemoteSpec, Result, SourceSpec,
};

/// Entry kind at one side of the merge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryKind {
    Dir,
    File,
    Symlink,
    Other,
}

fn entry_kind(path: &Path, follow_symlinks: bool) -> std::io::Result<EntryKind> {
    let meta = if follow_symlinks {
        fs::metadata(path)?
    } else {
        fs::symlink_metadata(path)?
    };
    let ft = meta.file_type();
    Ok(if ft.is_dir() {
        EntryKind::Dir
    } else if ft.is_file() {
        EntryKind::File
    } else if ft.is_symlink() {
        EntryKind::Symlink
    } else {
        EntryKind::Other
    })
}

/// A pending file-content comparison produced by the merge.
struct FileTask {
    rel: String,
    left: PathBuf,
    right: PathBuf,
}

/// What one file task concluded. Fatal conditions (cancel, timeout)
/// propagate as errors instead.
enum FileOutcome {
    Equal,
    Diff(DiffReason),
    ReadFailed,
}

/// Walk state threaded through the lockstep merge: options, cancellation,
/// the result under construction, the pending file tasks, and the left-side
/// directory identities on the recursion stack (symlink-cycle guard).
struct DirWalk<'a> {
    opts: &'a CompareOptions,
    token: &'a CancelToken,
    result: DirResult,
    tasks: Vec<FileTask>,
    ancestors: Vec<(u64, u64)>,
}

/// Compare two directory trees. Same canonical root short-circuits to equal;
/// otherwise both trees are merged in lockstep and file pairs are dispatched
/// to the worker pool.
pub(crate) fn compare_dir_impl(
    dir_a: &Path,
    dir_b: &Path,
    opts: &CompareOptions,
) -> Result<DirResult> {
    ensure_dir(dir_a)?;
    ensure_dir(dir_b)?;

    if identity_check(dir_a, dir_b) {
        debug!("identity: {} and {} are the same directory", dir_a.display(), dir_b.display());
        return Ok(DirResult::default());
    }

    let token = CancelToken::for_options(opts);
    let mut walk = DirWalk {
        opts,
        token: &token,
        result: DirResult::default(),
        tasks: Vec::new(),
        ancestors: Vec::new(),
    };
    walk.merge_trees(dir_a, dir_b, "")?;
    let DirWalk {
        mut result, tasks, ..
    } = walk;

    debug!(
        "merged trees: {} file pairs to compare, {} one-sided",
        tasks.len(),
        result.only_left.len() + result.only_right.len()
    );

    let outcomes = pool::collect_all(tasks, opts.max_workers, &token, |task| {
        let outcome = compare_file_pair(&task.left, &task.right, opts, &token)?;
        Ok((task.rel, outcome))
    })?;
    for (rel, outcome) in outcomes {
        match outcome {
            FileOutcome::Equal => {}
            FileOutcome::Diff(reason) => {
                result.diff.insert(rel, reason);
            }
            FileOutcome::ReadFailed => {
                result.errors.insert(rel);
            }
        }
    }

    apply_ignore(&mut result, &opts.ignore);
    Ok(result.finish())
}

fn ensure_dir(path: &Path) -> Result<()> {
    let name = path.display().to_string();
    let meta = fs::metadata(path).map_err(|e| CompareError::from_io(&name, e))?;
    if !meta.is_dir() {
        return Err(CompareError::read(&name, "not a directory"));
    }
    Ok(())
}

/// List one directory level, sorted byte-wise by entry name.
fn list_sorted(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((name, entry.path()));
    }
    entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    Ok(entries)
}

fn join_rel(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Stable identity of a directory, for the symlink-cycle guard.
#[cfg(unix)]
fn dir_id(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    fs::metadata(path).ok().map(|m| (m.dev(), m.ino()))
}

#[cfg(not(unix))]
fn dir_id(_path: &Path) -> Option<(u64, u64)> {
    None
}

impl DirWalk<'_> {
    /// Lockstep merge of one directory level, recursing into directories
    /// present on both sides. Listing failures localize into `errors` and
    /// prune that subtree on both sides.
    fn merge_trees(&mut self, dir_a: &Path, dir_b: &Path, prefix: &str) -> Result<()> {
        self.token.check()?;

        let left = match list_sorted(dir_a) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot list {}: {}", dir_a.display(), e);
                self.result.errors.insert(prefix.to_string());
                return Ok(());
            }
        };
        let right = match list_sorted(dir_b) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot list {}: {}", dir_b.display(), e);
                self.result.errors.insert(prefix.to_string());
                return Ok(());
            }
        };

        let (mut i, mut j) = (0, 0);
        while i < left.len() || j < right.len() {
            let order = match (left.get(i), right.get(j)) {
                (Some(a), Some(b)) => a.0.as_bytes().cmp(b.0.as_bytes()),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => break,
            };
            match order {
                std::cmp::Ordering::Less => {
                    let (name, abs) = &left[i];
                    self.one_sided(abs, &join_rel(prefix, name), true);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    let (name, abs) = &right[j];
                    self.one_sided(abs, &join_rel(prefix, name), false);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    let (name, abs_a) = &left[i];
                    let (_, abs_b) = &right[j];
                    let rel = join_rel(prefix, name);
                    self.merge_pair(abs_a, abs_b, &rel)?;
                    i += 1;
                    j += 1;
                }
            }
        }
        Ok(())
    }

    /// Decide what to do with an entry present on both sides.
    fn merge_pair(&mut self, abs_a: &Path, abs_b: &Path, rel: &str) -> Result<()> {
        let kind_a = entry_kind(abs_a, self.opts.follow_symlinks);
        let kind_b = entry_kind(abs_b, self.opts.follow_symlinks);
        let (kind_a, kind_b) = match (kind_a, kind_b) {
            (Ok(a), Ok(b)) => (a, b),
            _ => {
                // Broken symlink or stat failure on either side.
                self.result.errors.insert(rel.to_string());
                return Ok(());
            }
        };

        if kind_a != kind_b {
            self.result.diff.insert(rel.to_string(), DiffReason::TypeMismatch);
            return Ok(());
        }
        match kind_a {
            EntryKind::Dir => self.recurse(abs_a, abs_b, rel),
            EntryKind::File => {
                self.tasks.push(FileTask {
                    rel: rel.to_string(),
                    left: abs_a.to_path_buf(),
                    right: abs_b.to_path_buf(),
                });
                Ok(())
            }
            EntryKind::Symlink => {
                // follow_symlinks is off: links compare by target.
                match (fs::read_link(abs_a), fs::read_link(abs_b)) {
                    (Ok(ta), Ok(tb)) if ta == tb => {}
                    (Ok(_), Ok(_)) => {
                        self.result.diff.insert(rel.to_string(), DiffReason::ContentMismatch);
                    }
                    _ => {
                        self.result.errors.insert(rel.to_string());
                    }
                }
                Ok(())
            }
            EntryKind::Other => {
                // FIFOs, sockets, devices: non-regular targets read-error out.
                self.result.errors.insert(rel.to_string());
                Ok(())
            }
        }
    }

    /// Recurse into a directory pair, skipping left-side identities already
    /// on the stack (a followed symlink pointing back up the tree).
    fn recurse(&mut self, abs_a: &Path, abs_b: &Path, rel: &str) -> Result<()> {
        let id = if self.opts.follow_symlinks {
            dir_id(abs_a)
        } else {
            None
        };
        if let Some(id) = id
            && self.ancestors.contains(&id)
        {
            debug!("symlink cycle at {}, skipping", rel);
            return Ok(());
        }
        if let Some(id) = id {
            self.ancestors.push(id);
        }
        let outcome = self.merge_trees(abs_a, abs_b, rel);
        if id.is_some() {
            self.ancestors.pop();
        }
        outcome
    }

    /// Record a subtree that exists on one side only: files under it land in
    /// `only_left`/`only_right`; an empty directory is recorded by its own
    /// path so the asymmetry stays visible.
    fn one_sided(&mut self, abs: &Path, rel: &str, left: bool) {
        let kind = match entry_kind(abs, self.opts.follow_symlinks) {
            Ok(k) => k,
            Err(_) => {
                self.result.errors.insert(rel.to_string());
                return;
            }
        };
        let (set, errors) = if left {
            (&mut self.result.only_left, &mut self.result.errors)
        } else {
            (&mut self.result.only_right, &mut self.result.errors)
        };
        if kind != EntryKind::Dir {
            set.insert(rel.to_string());
            return;
        }
        let mut inserted = 0usize;
        for entry in WalkDir::new(abs)
            .min_depth(1)
            .follow_links(self.opts.follow_symlinks)
            .into_iter()
        {
            match entry {
                Ok(entry) if !entry.file_type().is_dir() => {
                    if let Ok(sub) = entry.path().strip_prefix(abs) {
                        let sub = sub.to_string_lossy().replace('\\', "/");
                        set.insert(join_rel(rel, &sub));
                        inserted += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("cannot enumerate under {}: {}", abs.display(), e);
                    let err_rel = e
                        .path()
                        .and_then(|p| p.strip_prefix(abs).ok())
                        .map(|p| join_rel(rel, &p.to_string_lossy().replace('\\', "/")))
                        .unwrap_or_else(|| rel.to_string());
                    errors.insert(err_rel);
                }
            }
        }
        if inserted == 0 {
            set.insert(rel.to_string());
        }
    }
}

/// Content comparison for one file pair. Size difference classifies as
/// `SizeMismatch` before any content read; local read failures localize.
fn compare_file_pair(
    left: &Path,
    right: &Path,
    opts: &CompareOptions,
    token: &CancelToken,
) -> Result<FileOutcome> {
    if identity_check(left, right) {
        return Ok(FileOutcome::Equal);
    }
    let sizes = (fs::metadata(left), fs::metadata(right));
    match sizes {
        (Ok(ma), Ok(mb)) => {
            if ma.len() != mb.len() {
                return Ok(FileOutcome::Diff(DiffReason::SizeMismatch));
            }
        }
        _ => return Ok(FileOutcome::ReadFailed),
    }
    let spec_a = SourceSpec::Local(left.to_path_buf());
    let spec_b = SourceSpec::Local(right.to_path_buf());
    match compare_sources(&spec_a, &spec_b, opts, token) {
        Ok(true) => Ok(FileOutcome::Equal),
        Ok(false) => Ok(FileOutcome::Diff(DiffReason::ContentMismatch)),
        Err(e @ (CompareError::Cancelled | CompareError::Timeout(_))) => Err(e),
        Err(_) => Ok(FileOutcome::ReadFailed),
    }
}

// ---- Ignore patterns ----

/// Shell-style glob over one path component: `*` and `?` only.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn rec(p: &[u8], t: &[u8]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some(b'*') => {
                if p.len() == 1 {
                    return true;
                }
                (0..=t.len()).any(|skip| rec(&p[1..], &t[skip..]))
            }
            Some(b'?') => !t.is_empty() && rec(&p[1..], &t[1..]),
            Some(&c) => t.first() == Some(&c) && rec(&p[1..], &t[1..]),
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}

fn is_ignored(rel: &str, patterns: &[String]) -> bool {
    !patterns.is_empty()
        && rel
            .split('/')
            .any(|component| patterns.iter().any(|p| glob_match(p, component)))
}

/// Filter every result set through the ignore globs. Runs after comparison,
/// so ignoring all remaining discrepancies flips `equal` back to true via
/// `finish`.
fn apply_ignore(result: &mut DirResult, patterns: &[String]) {
    if patterns.is_empty() {
        return;
    }
    result.diff.retain(|rel, _| !is_ignored(rel, patterns));
    result.only_left.retain(|rel| !is_ignored(rel, patterns));
    result.only_right.retain(|rel| !is_ignored(rel, patterns));
    result.errors.retain(|rel| !is_ignored(rel, patterns));
}

// ---- Directory vs URL map ----

/// Compare local files under `dir` against a `relpath → url` mapping.
///
/// Local files not in the map land in `only_left`, mapped URLs with no local
/// file in `only_right`. A mapped path that exists locally as a directory is
/// a mixed-cardinality `Missing`. HTTP or local read failures localize into
/// `errors`.
pub(crate) fn compare_dir_urls_impl(
    dir: &Path,
    url_map: &BTreeMap<String, String>,
    opts: &CompareOptions,
) -> Result<DirResult> {
    ensure_dir(dir)?;
    let token = CancelToken::for_options(opts);

    let mut result = DirResult::default();
    let mut local = BTreeMap::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .follow_links(opts.follow_symlinks)
        .into_iter()
    {
        match entry {
            Ok(entry) if entry.file_type().is_file() => {
                if let Ok(rel) = entry.path().strip_prefix(dir) {
                    let rel = rel.to_string_lossy().replace('\\', "/");
                    local.insert(rel, entry.path().to_path_buf());
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("cannot enumerate under {}: {}", dir.display(), e);
                let rel = e
                    .path()
                    .and_then(|p| p.strip_prefix(dir).ok())
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                result.errors.insert(rel);
            }
        }
    }

    let mut tasks = Vec::new();
    for (rel, url) in url_map {
        match local.remove(rel) {
            Some(path) => tasks.push((rel.clone(), path, url.clone())),
            None => {
                if dir.join(rel).is_dir() {
                    result.diff.insert(rel.clone(), DiffReason::Missing);
                } else {
                    result.only_right.insert(rel.clone());
                }
            }
        }
    }
    for rel in local.into_keys() {
        result.only_left.insert(rel);
    }

    let outcomes = pool::collect_all(tasks, opts.max_workers, &token, |(rel, path, url)| {
        let spec_a = SourceSpec::Local(path);
        let spec_b = SourceSpec::Remote(RemoteSpec::new(url));
        let outcome = match compare_sources(&spec_a, &spec_b, opts, &token) {
            Ok(true) => FileOutcome::Equal,
            Ok(false) => FileOutcome::Diff(DiffReason::ContentMismatch),
            Err(e @ (CompareError::Cancelled | CompareError::Timeout(_))) => return Err(e),
            Err(_) => FileOutcome::ReadFailed,
        };
        Ok((rel, outcome))
    })?;
    for (rel, outcome) in outcomes {
        match outcome {
            FileOutcome::Equal => {}
            FileOutcome::Diff(reason) => {
                result.diff.insert(rel, reason);
            }
            FileOutcome::ReadFailed => {
                result.errors.insert(rel);
            }
        }
    }
    Ok(result.finish())
}
