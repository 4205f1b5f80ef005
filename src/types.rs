//! Public types for the bytecmp API: source descriptors, options, results, errors.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by every comparison entry point.
///
/// Display output always names the offending side (path, URL, or archive
/// entry) plus the underlying cause, so callers never have to guess which
/// source failed.
#[derive(Debug, Error)]
pub enum CompareError {
    /// Local path stats as ENOENT, or HTTP 404 at open.
    #[error("source not found: {0}")]
    SourceNotFound(String),
    /// I/O failure mid-stream, TLS failure, SSRF rejection, bad range reply.
    #[error("read error on {source_name}: {detail}")]
    SourceRead { source_name: String, detail: String },
    /// Malformed archive headers or an unreadable member.
    #[error("archive error in {archive}: {detail}")]
    Archive { archive: String, detail: String },
    /// Archive exceeded a decompression safety limit.
    #[error("archive bomb in {archive}: {detail}")]
    ArchiveBomb { archive: String, detail: String },
    /// Out-of-range option value, rejected before any I/O.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Wall-clock comparison timeout exceeded.
    #[error("comparison timed out after {0:?}")]
    Timeout(Duration),
    /// Comparison aborted via the external cancellation flag.
    #[error("comparison cancelled")]
    Cancelled,
}

impl CompareError {
    /// True for both archive variants ([`Archive`](Self::Archive) and its
    /// bomb subtype [`ArchiveBomb`](Self::ArchiveBomb)).
    pub fn is_archive_error(&self) -> bool {
        matches!(
            self,
            CompareError::Archive { .. } | CompareError::ArchiveBomb { .. }
        )
    }

    /// Build a read error for `source` from any displayable cause.
    pub(crate) fn read(source: impl Into<String>, detail: impl fmt::Display) -> Self {
        CompareError::SourceRead {
            source_name: source.into(),
            detail: detail.to_string(),
        }
    }

    /// Map an io::Error for `source`: ENOENT becomes `SourceNotFound`.
    pub(crate) fn from_io(source: impl Into<String>, err: std::io::Error) -> Self {
        let source = source.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            CompareError::SourceNotFound(source)
        } else {
            CompareError::read(source, err)
        }
    }
}

pub type Result<T> = std::result::Result<T, CompareError>;

/// Per-source HTTP overrides. Unset fields fall back to [`CompareOptions`].
#[derive(Clone, Debug, Default)]
pub struct RemoteSpec {
    pub url: String,
    /// Extra headers for this source; shadow global headers on key collision.
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    pub follow_redirects: Option<bool>,
    pub verify_tls: Option<bool>,
    pub proxy: Option<String>,
    pub allow_private: Option<bool>,
}

impl RemoteSpec {
    pub fn new(url: impl Into<String>) -> Self {
        RemoteSpec {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// A comparison input: a local file, a remote HTTP(S) resource, or an
/// in-memory buffer (archive members use the latter).
///
/// Each spec is consumed by exactly one comparison task; the handle opened
/// from it is closed on every exit path.
#[derive(Clone, Debug)]
pub enum SourceSpec {
    Local(PathBuf),
    Remote(RemoteSpec),
    Memory(Vec<u8>),
}

impl SourceSpec {
    /// Route a string source: `http://`/`https://` becomes Remote, anything
    /// else a local path.
    pub fn parse(s: &str) -> SourceSpec {
        if s.starts_with("http://") || s.starts_with("https://") {
            SourceSpec::Remote(RemoteSpec::new(s))
        } else {
            SourceSpec::Local(PathBuf::from(s))
        }
    }

    /// Display name used in results and error messages.
    pub fn name(&self) -> String {
        match self {
            SourceSpec::Local(p) => p.display().to_string(),
            SourceSpec::Remote(r) => r.url.clone(),
            SourceSpec::Memory(_) => "<memory>".to_string(),
        }
    }
}

impl From<&str> for SourceSpec {
    fn from(s: &str) -> Self {
        SourceSpec::parse(s)
    }
}

impl From<PathBuf> for SourceSpec {
    fn from(p: PathBuf) -> Self {
        SourceSpec::Local(p)
    }
}

impl From<RemoteSpec> for SourceSpec {
    fn from(r: RemoteSpec) -> Self {
        SourceSpec::Remote(r)
    }
}

/// Immutable per-call configuration. `Default` carries the safe defaults;
/// validation happens in [`crate::utils::validate`] before any I/O.
#[derive(Clone, Debug)]
pub struct CompareOptions {
    /// Sequential-scan window size in bytes. Positive, at most 1 GiB.
    pub chunk_size: usize,
    /// Compare sizes before any content read.
    pub size_precheck: bool,
    /// Sample head/middle/tail windows before the full scan.
    pub quick_check: bool,
    /// Follow symbolic links during directory traversal.
    pub follow_symlinks: bool,
    /// Worker pool size. 0 = auto (min(8, tasks)), 1 = inline, at most 256.
    pub max_workers: usize,
    /// Shell-style globs matched against each path component; matching
    /// entries are filtered from directory results after comparison.
    pub ignore: Vec<String>,

    /// Global HTTP headers, sent verbatim.
    pub headers: Vec<(String, String)>,
    /// Per-HTTP-request timeout.
    pub timeout: Duration,
    pub follow_redirects: bool,
    pub verify_tls: bool,
    /// Proxy URL (`http://`, `https://`, or `socks5://` host:port).
    pub proxy: Option<String>,
    /// Permit targets resolving to private/loopback address space.
    pub allow_private: bool,
    /// HTTP retry count for transport failures and 5xx replies.
    pub retries: u32,
    /// Base backoff between retries; doubles per attempt, plus jitter.
    pub retry_backoff: Duration,

    /// Archives: compare streaming fingerprints instead of buffered bytes
    /// (O(entries) memory instead of O(total decompressed)).
    pub hash_compare: bool,
    /// Bomb limit: cumulative decompressed bytes. None disables.
    pub max_decompressed_size: Option<u64>,
    /// Bomb limit: decompressed/compressed ratio. None disables.
    pub max_compression_ratio: Option<u64>,
    /// Bomb limit: archive entry count. None disables.
    pub max_entries: Option<u64>,
    /// Entry names longer than this are skipped during normalization.
    pub max_entry_name_length: Option<usize>,

    /// Wall-clock budget for the whole operation. None disables.
    pub comparison_timeout: Option<Duration>,
    /// External cancellation hook (e.g. a SIGINT handler); checked at chunk
    /// boundaries and queue dequeues.
    pub cancel_flag: Option<Arc<AtomicBool>>,
}

impl CompareOptions {
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
    pub const MAX_CHUNK_SIZE: usize = 1024 * 1024 * 1024;
    pub const MAX_WORKERS: usize = 256;
    pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_COMPARISON_TIMEOUT: Duration = Duration::from_secs(300);
    pub const DEFAULT_MAX_DECOMPRESSED: u64 = 1024 * 1024 * 1024;
    pub const DEFAULT_MAX_RATIO: u64 = 200;
    pub const DEFAULT_MAX_ENTRIES: u64 = 100_000;
    pub const DEFAULT_MAX_NAME_LENGTH: usize = 4096;
}

impl Default for CompareOptions {
    fn default() -> Self {
        CompareOptions {
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            size_precheck: true,
            quick_check: true,
            follow_symlinks: true,
            max_workers: 0,
            ignore: Vec::new(),
            headers: Vec::new(),
            timeout: Self::DEFAULT_HTTP_TIMEOUT,
            follow_redirects: true,
            verify_tls: true,
            proxy: None,
            allow_private: false,
            retries: 0,
            retry_backoff: Duration::from_secs(1),
            hash_compare: false,
            max_decompressed_size: Some(Self::DEFAULT_MAX_DECOMPRESSED),
            max_compression_ratio: Some(Self::DEFAULT_MAX_RATIO),
            max_entries: Some(Self::DEFAULT_MAX_ENTRIES),
            max_entry_name_length: Some(Self::DEFAULT_MAX_NAME_LENGTH),
            comparison_timeout: Some(Self::DEFAULT_COMPARISON_TIMEOUT),
            cancel_flag: None,
        }
    }
}

/// Why two entries with the same relative path differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffReason {
    ContentMismatch,
    SizeMismatch,
    /// Mixed-cardinality: the mapped path exists with the wrong kind
    /// (directory where a file is expected). Used by `compare_dir_urls`.
    Missing,
    TypeMismatch,
    ReadError,
}

impl fmt::Display for DiffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiffReason::ContentMismatch => "content_mismatch",
            DiffReason::SizeMismatch => "size_mismatch",
            DiffReason::Missing => "missing",
            DiffReason::TypeMismatch => "type_mismatch",
            DiffReason::ReadError => "read_error",
        };
        f.write_str(s)
    }
}

/// Result of a directory or archive comparison.
///
/// Relative paths use forward slashes on every platform. Each path appears
/// in at most one of the four collections; `equal` is true iff all four are
/// empty.
#[derive(Clone, Debug, Serialize)]
pub struct DirResult {
    pub equal: bool,
    /// Entries present on both sides but different, keyed by relative path.
    pub diff: BTreeMap<String, DiffReason>,
    /// Files present only under the first root.
    pub only_left: BTreeSet<String>,
    /// Files present only under the second root.
    pub only_right: BTreeSet<String>,
    /// Entries that could not be read or listed on either side.
    pub errors: BTreeSet<String>,
}

impl Default for DirResult {
    fn default() -> Self {
        DirResult {
            equal: true,
            diff: BTreeMap::new(),
            only_left: BTreeSet::new(),
            only_right: BTreeSet::new(),
            errors: BTreeSet::new(),
        }
    }
}

impl DirResult {
    /// Recompute `equal` from the four collections. Call after every merge
    /// or filter step so the flag never drifts from its definition.
    pub(crate) fn finish(mut self) -> Self {
        self.equal = self.diff.is_empty()
            && self.only_left.is_empty()
            && self.only_right.is_empty()
            && self.errors.is_empty();
        self
    }
}

/// Result of a multi-source comparison: every unordered pair, plus the
/// equivalence classes observed equality induces.
#[derive(Clone, Debug)]
pub struct CompareResult {
    /// True iff every pair compared equal.
    pub all_equal: bool,
    /// Partition of the source names under observed equality.
    pub groups: Vec<BTreeSet<String>>,
    /// Outcome for every unordered `(name_a, name_b)` pair.
    pub diff: BTreeMap<(String, String), bool>,
}
