//! Source handles: one readable abstraction over mapped local files, HTTP
//! range-addressable resources, and in-memory buffers.

use std::borrow::Cow;
use std::fs::File;
use std::path::Path;

use log::debug;
use memmap2::Mmap;

use crate::http::HttpSource;
use crate::types::{CompareError, CompareOptions, Result, SourceSpec};

/// A readable source bound to one comparison task.
///
/// Hides whether `read_range` blocks on a page fault, a socket read, or a
/// memory copy. Dropped handles release their file, mapping, or HTTP session
/// on every exit path.
pub enum SourceHandle {
    Local(LocalSource),
    Remote(HttpSource),
    Memory(MemorySource),
}

impl SourceHandle {
    /// Open a handle for `spec`. Local files are mapped read-only; remote
    /// URLs are probed with HEAD (see [`HttpSource::open`]).
    pub fn open(spec: &SourceSpec, opts: &CompareOptions) -> Result<SourceHandle> {
        match spec {
            SourceSpec::Local(path) => Ok(SourceHandle::Local(LocalSource::open(path)?)),
            SourceSpec::Remote(remote) => Ok(SourceHandle::Remote(HttpSource::open(remote, opts)?)),
            SourceSpec::Memory(bytes) => Ok(SourceHandle::Memory(MemorySource::new(bytes.clone()))),
        }
    }

    /// Size captured at open time.
    pub fn size(&self) -> u64 {
        match self {
            SourceHandle::Local(s) => s.size,
            SourceHandle::Remote(s) => s.size(),
            SourceHandle::Memory(s) => s.data.len() as u64,
        }
    }

    /// Display name for errors and logs.
    pub fn name(&self) -> &str {
        match self {
            SourceHandle::Local(s) => &s.name,
            SourceHandle::Remote(s) => s.name(),
            SourceHandle::Memory(_) => "<memory>",
        }
    }

    /// Read `len` bytes at `offset`, clamped to end-of-source. Never mixes
    /// bytes from different sources into one buffer.
    pub fn read_range(&mut self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        match self {
            SourceHandle::Local(s) => s.read_range(offset, len).map(Cow::Borrowed),
            SourceHandle::Remote(s) => s.read_range(offset, len).map(Cow::Owned),
            SourceHandle::Memory(s) => s.read_range(offset, len).map(Cow::Borrowed),
        }
    }

    /// Total bytes served by this handle so far.
    pub fn bytes_read(&self) -> u64 {
        match self {
            SourceHandle::Local(s) => s.bytes_read,
            SourceHandle::Remote(s) => s.bytes_read(),
            SourceHandle::Memory(s) => s.bytes_read,
        }
    }

    /// Same `(device, inode)` on unix; false whenever either side is not a
    /// local file.
    pub fn same_inode(&self, other: &SourceHandle) -> bool {
        match (self, other) {
            (SourceHandle::Local(a), SourceHandle::Local(b)) => a.dev_ino == b.dev_ino,
            _ => false,
        }
    }
}

/// A memory-mapped local file. Non-regular targets (directories, FIFOs,
/// devices, sockets) are rejected at open: comparing them byte-wise is
/// undefined, so they surface as read errors rather than hanging on open.
#[derive(Debug)]
pub struct LocalSource {
    name: String,
    // Held for the mapping's lifetime.
    _file: File,
    map: Option<Mmap>,
    size: u64,
    dev_ino: (u64, u64),
    bytes_read: u64,
}

impl LocalSource {
    pub fn open(path: &Path) -> Result<LocalSource> {
        let name = path.display().to_string();
        // Stat before open so FIFOs never block us on O_RDONLY.
        let meta = std::fs::metadata(path).map_err(|e| CompareError::from_io(&name, e))?;
        if !meta.is_file() {
            return Err(CompareError::read(
                &name,
                "not a regular file (directory, device, socket, or FIFO)",
            ));
        }
        let file = File::open(path).map_err(|e| CompareError::from_io(&name, e))?;
        let size = meta.len();
        // Mapping a zero-length file is rejected by some kernels; an absent
        // map still satisfies read_range(0, 0).
        let map = if size > 0 {
            Some(unsafe { Mmap::map(&file) }.map_err(|e| CompareError::read(&name, e))?)
        } else {
            None
        };
        debug!("opened local source {} ({} bytes)", name, size);
        Ok(LocalSource {
            name,
            dev_ino: dev_ino(&meta),
            _file: file,
            map,
            size,
            bytes_read: 0,
        })
    }

    fn read_range(&mut self, offset: u64, len: usize) -> Result<&[u8]> {
        if offset > self.size {
            return Err(CompareError::read(
                &self.name,
                format!("read at {} past end of {}-byte source", offset, self.size),
            ));
        }
        let len = len.min((self.size - offset) as usize);
        if len == 0 {
            return Ok(&[]);
        }
        let start = offset as usize;
        self.bytes_read += len as u64;
        Ok(&self.map.as_ref().expect("non-empty source has a mapping")[start..start + len])
    }
}

/// A wrapped byte slice; archive members in buffered mode read through this.
pub struct MemorySource {
    data: Vec<u8>,
    bytes_read: u64,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> MemorySource {
        MemorySource {
            data,
            bytes_read: 0,
        }
    }

    fn read_range(&mut self, offset: u64, len: usize) -> Result<&[u8]> {
        let size = self.data.len() as u64;
        if offset > size {
            return Err(CompareError::read(
                "<memory>",
                format!("read at {} past end of {}-byte source", offset, size),
            ));
        }
        let len = len.min((size - offset) as usize);
        let start = offset as usize;
        self.bytes_read += len as u64;
        Ok(&self.data[start..start + len])
    }
}

#[cfg(unix)]
fn dev_ino(meta: &std::fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn dev_ino(_meta: &std::fs::Metadata) -> (u64, u64) {
    (0, u64::MAX) // no inode identity off unix; same_inode never fires
}

/// Same-inode or same-canonical-path shortcut: equality with zero byte reads.
/// Shared by the file comparator, the directory same-root check, and the
/// archive engine.
pub fn identity_check(a: &Path, b: &Path) -> bool {
    #[cfg(unix)]
    if let (Ok(ma), Ok(mb)) = (std::fs::metadata(a), std::fs::metadata(b))
        && dev_ino(&ma) == dev_ino(&mb)
    {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_memory_read_range_clamps() {
        let mut s = MemorySource::new(b"hello world".to_vec());
        assert_eq!(s.read_range(0, 5).unwrap(), b"hello");
        assert_eq!(s.read_range(6, 100).unwrap(), b"world");
        assert_eq!(s.read_range(11, 4).unwrap(), b"");
        assert!(s.read_range(12, 1).is_err());
        assert_eq!(s.bytes_read, 10);
    }

    #[test]
    fn test_empty_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();

        let mut src = LocalSource::open(&path).unwrap();
        assert_eq!(src.size, 0);
        assert_eq!(src.read_range(0, 0).unwrap(), b"");
        assert_eq!(src.read_range(0, 16).unwrap(), b"");
    }

    #[test]
    fn test_local_mapped_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"0123456789").unwrap();
        drop(f);

        let mut src = LocalSource::open(&path).unwrap();
        assert_eq!(src.size, 10);
        assert_eq!(src.read_range(3, 4).unwrap(), b"3456");
        assert_eq!(src.read_range(8, 64).unwrap(), b"89");
        assert_eq!(src.bytes_read, 6);
    }

    #[test]
    fn test_directory_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalSource::open(dir.path()).unwrap_err();
        assert!(matches!(err, CompareError::SourceRead { .. }));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalSource::open(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, CompareError::SourceNotFound(_)));
    }

    #[test]
    fn test_identity_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        File::create(&path).unwrap();
        assert!(identity_check(&path, &path));
        assert!(!identity_check(&path, dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn test_identity_through_hardlink() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        File::create(&a).unwrap();
        std::fs::hard_link(&a, &b).unwrap();
        assert!(identity_check(&a, &b));
    }
}
