//! Bytecmp: high-throughput byte-equality checks for files, directories,
//! archives, and URLs.
//!
//! One question, answered as fast as the kernel permits: are these two
//! sources identical? Single files ride a memory-mapped fast path with size
//! prechecks and probe sampling; directories merge in lockstep and fan file
//! pairs out to a worker pool; archives stream through bomb-limited decoders;
//! HTTP sources are read in byte ranges. Directory and archive comparisons
//! return a structured [`DirResult`] instead of a bare boolean.
//!
//! ```ignore
//! let opts = bytecmp::CompareOptions::default();
//! let same = bytecmp::compare("/data/a.bin", "https://mirror.example/a.bin", &opts)?;
//! let report = bytecmp::compare_dir("/srv/v1", "/srv/v2", &opts)?;
//! if !report.equal {
//!     for (path, reason) in &report.diff {
//!         println!("{path}: {reason}");
//!     }
//! }
//! ```

pub mod archive;
pub mod bridge;
pub mod cancel;
pub mod cli;
pub mod cmp;
pub mod dir;
pub mod http;
pub mod multi;
pub mod pool;
pub mod source;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use bridge::AsyncTask;
pub use types::*;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use cancel::CancelToken;
use utils::validate::{validate_options, validate_source};

fn local_spec(path: &Path, name: &str) -> Result<SourceSpec> {
    let spec = SourceSpec::Local(path.to_path_buf());
    validate_source(&spec, name)?;
    Ok(spec)
}

/// Compare two sources byte-by-byte. Sources are local paths, `http(s)://`
/// URLs, or [`SourceSpec`]s with per-source overrides.
pub fn compare(
    source_a: impl Into<SourceSpec>,
    source_b: impl Into<SourceSpec>,
    opts: &CompareOptions,
) -> Result<bool> {
    let a = source_a.into();
    let b = source_b.into();
    validate_source(&a, "source_a")?;
    validate_source(&b, "source_b")?;
    validate_options(opts)?;
    let token = CancelToken::for_options(opts);
    cmp::compare_sources(&a, &b, opts, &token)
}

/// Compare two directory trees recursively. See [`DirResult`] for the
/// result-set semantics.
pub fn compare_dir(
    dir_a: impl AsRef<Path>,
    dir_b: impl AsRef<Path>,
    opts: &CompareOptions,
) -> Result<DirResult> {
    local_spec(dir_a.as_ref(), "dir_a")?;
    local_spec(dir_b.as_ref(), "dir_b")?;
    validate_options(opts)?;
    dir::compare_dir_impl(dir_a.as_ref(), dir_b.as_ref(), opts)
}

/// Compare two archives entry-by-entry. Formats (tar, tar.gz, tar.bz2,
/// tar.xz, zip) are detected by content magic, so mixed-format comparisons
/// work. `opts.hash_compare` selects the O(entries)-memory regime.
pub fn compare_archive(
    path_a: impl AsRef<Path>,
    path_b: impl AsRef<Path>,
    opts: &CompareOptions,
) -> Result<DirResult> {
    local_spec(path_a.as_ref(), "path_a")?;
    local_spec(path_b.as_ref(), "path_b")?;
    validate_options(opts)?;
    archive::diff::compare_archive_impl(path_a.as_ref(), path_b.as_ref(), opts)
}

fn collect_specs<I, S>(sources: I) -> Result<Vec<SourceSpec>>
where
    I: IntoIterator<Item = S>,
    S: Into<SourceSpec>,
{
    let specs: Vec<SourceSpec> = sources.into_iter().map(Into::into).collect();
    for (i, spec) in specs.iter().enumerate() {
        validate_source(spec, &format!("sources[{i}]"))?;
    }
    Ok(specs)
}

/// True iff every source is byte-identical to the first. The first observed
/// inequality cancels the remaining comparisons.
pub fn compare_all<I, S>(sources: I, opts: &CompareOptions) -> Result<bool>
where
    I: IntoIterator<Item = S>,
    S: Into<SourceSpec>,
{
    let specs = collect_specs(sources)?;
    validate_options(opts)?;
    multi::compare_all_impl(&specs, opts)
}

/// Pairwise comparison of every source against every other, with
/// equivalence-class grouping.
pub fn compare_many<I, S>(sources: I, opts: &CompareOptions) -> Result<CompareResult>
where
    I: IntoIterator<Item = S>,
    S: Into<SourceSpec>,
{
    let specs = collect_specs(sources)?;
    validate_options(opts)?;
    multi::compare_many_impl(&specs, opts)
}

/// Compare files under `dir` against a `relative path → URL` mapping.
pub fn compare_dir_urls(
    dir: impl AsRef<Path>,
    url_map: &BTreeMap<String, String>,
    opts: &CompareOptions,
) -> Result<DirResult> {
    local_spec(dir.as_ref(), "dir_path")?;
    validate_options(opts)?;
    dir::compare_dir_urls_impl(dir.as_ref(), url_map, opts)
}

// ---- Async variants ----
//
// Each `*_start` validates synchronously, then runs the comparison on a
// worker thread; register [`AsyncTask::notify_fd`] with your event loop and
// collect via [`AsyncTask::result`]. Exactly one readability wakeup per task.

pub fn compare_start(
    source_a: impl Into<SourceSpec>,
    source_b: impl Into<SourceSpec>,
    opts: &CompareOptions,
) -> Result<AsyncTask<bool>> {
    let a = source_a.into();
    let b = source_b.into();
    validate_source(&a, "source_a")?;
    validate_source(&b, "source_b")?;
    validate_options(opts)?;
    let opts = opts.clone();
    let token = CancelToken::for_options(&opts);
    AsyncTask::spawn(move || cmp::compare_sources(&a, &b, &opts, &token))
}

pub fn compare_dir_start(
    dir_a: impl Into<PathBuf>,
    dir_b: impl Into<PathBuf>,
    opts: &CompareOptions,
) -> Result<AsyncTask<DirResult>> {
    let a = dir_a.into();
    let b = dir_b.into();
    local_spec(&a, "dir_a")?;
    local_spec(&b, "dir_b")?;
    validate_options(opts)?;
    let opts = opts.clone();
    AsyncTask::spawn(move || dir::compare_dir_impl(&a, &b, &opts))
}

pub fn compare_archive_start(
    path_a: impl Into<PathBuf>,
    path_b: impl Into<PathBuf>,
    opts: &CompareOptions,
) -> Result<AsyncTask<DirResult>> {
    let a = path_a.into();
    let b = path_b.into();
    local_spec(&a, "path_a")?;
    local_spec(&b, "path_b")?;
    validate_options(opts)?;
    let opts = opts.clone();
    AsyncTask::spawn(move || archive::diff::compare_archive_impl(&a, &b, &opts))
}

pub fn compare_all_start<I, S>(sources: I, opts: &CompareOptions) -> Result<AsyncTask<bool>>
where
    I: IntoIterator<Item = S>,
    S: Into<SourceSpec>,
{
    let specs = collect_specs(sources)?;
    validate_options(opts)?;
    let opts = opts.clone();
    AsyncTask::spawn(move || multi::compare_all_impl(&specs, &opts))
}

pub fn compare_many_start<I, S>(sources: I, opts: &CompareOptions) -> Result<AsyncTask<CompareResult>>
where
    I: IntoIterator<Item = S>,
    S: Into<SourceSpec>,
{
    let specs = collect_specs(sources)?;
    validate_options(opts)?;
    let opts = opts.clone();
    AsyncTask::spawn(move || multi::compare_many_impl(&specs, &opts))
}

pub fn compare_dir_urls_start(
    dir: impl Into<PathBuf>,
    url_map: BTreeMap<String, String>,
    opts: &CompareOptions,
) -> Result<AsyncTask<DirResult>> {
    let dir = dir.into();
    local_spec(&dir, "dir_path")?;
    validate_options(opts)?;
    let opts = opts.clone();
    AsyncTask::spawn(move || dir::compare_dir_urls_impl(&dir, &url_map, &opts))
}
