//! Streaming archive reader: format detection by magic bytes, entry-path
//! normalization, and decompression-bomb accounting for the tar family and
//! zip.

pub mod diff;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use log::debug;
use xz2::read::XzDecoder;

use crate::cancel::CancelToken;
use crate::types::{CompareError, CompareOptions, Result};

/// Container format, decided by content magic, never by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Zip,
}

/// Sniff the leading bytes (and the ustar magic at offset 257) of `path`.
pub fn detect_format(path: &Path, name: &str) -> Result<ArchiveFormat> {
    let mut file = File::open(path).map_err(|e| CompareError::from_io(name, e))?;
    let mut head = [0u8; 512];
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(CompareError::read(name, e)),
        }
    }
    let head = &head[..filled];

    if head.starts_with(&[0x1f, 0x8b]) {
        return Ok(ArchiveFormat::TarGz);
    }
    if head.starts_with(b"BZh") {
        return Ok(ArchiveFormat::TarBz2);
    }
    if head.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
        return Ok(ArchiveFormat::TarXz);
    }
    if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") || head.starts_with(b"PK\x07\x08")
    {
        return Ok(ArchiveFormat::Zip);
    }
    if head.len() >= 262 && &head[257..262] == b"ustar" {
        return Ok(ArchiveFormat::Tar);
    }
    Err(CompareError::Archive {
        archive: name.to_string(),
        detail: "unrecognized archive format".to_string(),
    })
}

/// Running bomb accounting for one archive: entry count, cumulative
/// decompressed bytes, and decompressed/compressed ratio. Checked
/// incrementally so a lying size header cannot slip past the limits.
struct BombGuard<'a> {
    archive: &'a str,
    compressed_len: u64,
    max_decompressed: Option<u64>,
    max_ratio: Option<u64>,
    max_entries: Option<u64>,
    entries: u64,
    total_out: u64,
}

impl<'a> BombGuard<'a> {
    fn new(archive: &'a str, compressed_len: u64, opts: &CompareOptions) -> Self {
        BombGuard {
            archive,
            compressed_len,
            max_decompressed: opts.max_decompressed_size,
            max_ratio: opts.max_compression_ratio,
            max_entries: opts.max_entries,
            entries: 0,
            total_out: 0,
        }
    }

    fn bomb(&self, detail: String) -> CompareError {
        CompareError::ArchiveBomb {
            archive: self.archive.to_string(),
            detail,
        }
    }

    fn on_entry(&mut self) -> Result<()> {
        self.entries += 1;
        if let Some(max) = self.max_entries
            && self.entries > max
        {
            return Err(self.bomb(format!("more than {max} entries")));
        }
        Ok(())
    }

    fn on_bytes(&mut self, n: u64) -> Result<()> {
        self.total_out += n;
        if let Some(max) = self.max_decompressed
            && self.total_out > max
        {
            return Err(self.bomb(format!("decompressed size exceeds {max} bytes")));
        }
        if let Some(max) = self.max_ratio
            && self.compressed_len > 0
            && self.total_out > max.saturating_mul(self.compressed_len)
        {
            return Err(self.bomb(format!("compression ratio exceeds {max}:1")));
        }
        Ok(())
    }
}

/// Entry payload in the chosen memory regime, or a marker for a member the
/// container could not decompress.
pub enum EntryContent {
    Bytes(Vec<u8>),
    Fingerprint([u8; 32]),
    Unreadable,
}

/// One normalized archive member.
pub struct ArchiveEntryData {
    pub size: u64,
    pub content: EntryContent,
}

/// Sanitize a raw entry name. Returns `None` (skip silently) for absolute
/// paths, `..` components, over-long names, and names that normalize to
/// nothing. `./` prefixes are stripped and duplicate slashes collapsed.
pub fn normalize_entry_path(raw: &str, max_len: Option<usize>) -> Option<String> {
    if let Some(max) = max_len
        && raw.len() > max
    {
        return None;
    }
    if raw.starts_with('/') {
        return None;
    }
    let mut components = Vec::new();
    for comp in raw.split('/') {
        match comp {
            "" | "." => continue,
            ".." => return None,
            c => components.push(c),
        }
    }
    if components.is_empty() {
        return None;
    }
    Some(components.join("/"))
}

/// Read every comparable member of the archive at `path` into a map keyed by
/// normalized path. `hashed` selects the streaming-fingerprint regime;
/// otherwise members are buffered. Duplicate names keep the last occurrence
/// (tar overwrite semantics).
pub(crate) fn read_archive(
    path: &Path,
    opts: &CompareOptions,
    hashed: bool,
    token: &CancelToken,
) -> Result<BTreeMap<String, ArchiveEntryData>> {
    let name = path.display().to_string();
    let meta = std::fs::metadata(path).map_err(|e| CompareError::from_io(&name, e))?;
    let format = detect_format(path, &name)?;
    debug!("{}: detected {:?}", name, format);
    let mut guard = BombGuard::new(&name, meta.len(), opts);

    match format {
        ArchiveFormat::Zip => read_zip(path, &name, opts, hashed, &mut guard, token),
        _ => read_tar(path, format, &name, opts, hashed, &mut guard, token),
    }
}

fn archive_err(name: &str, detail: impl std::fmt::Display) -> CompareError {
    CompareError::Archive {
        archive: name.to_string(),
        detail: detail.to_string(),
    }
}

/// Pull a member's content through the bomb guard in chunk-size steps,
/// feeding `sink` with each window. Returns the decompressed size.
fn consume<R: Read>(
    reader: &mut R,
    name: &str,
    chunk_size: usize,
    guard: &mut BombGuard<'_>,
    token: &CancelToken,
    mut sink: impl FnMut(&[u8]),
) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    loop {
        token.check()?;
        let n = reader.read(&mut buf).map_err(|e| archive_err(name, e))?;
        if n == 0 {
            break;
        }
        guard.on_bytes(n as u64)?;
        sink(&buf[..n]);
        total += n as u64;
    }
    Ok(total)
}

fn entry_from_bytes(bytes: Vec<u8>, hashed: bool) -> ArchiveEntryData {
    let size = bytes.len() as u64;
    let content = if hashed {
        EntryContent::Fingerprint(*blake3::hash(&bytes).as_bytes())
    } else {
        EntryContent::Bytes(bytes)
    };
    ArchiveEntryData { size, content }
}

fn read_tar(
    path: &Path,
    format: ArchiveFormat,
    name: &str,
    opts: &CompareOptions,
    hashed: bool,
    guard: &mut BombGuard<'_>,
    token: &CancelToken,
) -> Result<BTreeMap<String, ArchiveEntryData>> {
    let file = File::open(path).map_err(|e| CompareError::from_io(name, e))?;
    let buffered = BufReader::new(file);
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(buffered),
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(buffered)),
        ArchiveFormat::TarBz2 => Box::new(BzDecoder::new(buffered)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(buffered)),
        ArchiveFormat::Zip => unreachable!("zip takes the zip path"),
    };
    let mut archive = tar::Archive::new(reader);

    let mut out = BTreeMap::new();
    for entry in archive.entries().map_err(|e| archive_err(name, e))? {
        token.check()?;
        let mut entry = entry.map_err(|e| archive_err(name, e))?;
        guard.on_entry()?;

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            continue;
        }
        let raw = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let Some(norm) = normalize_entry_path(&raw, opts.max_entry_name_length) else {
            debug!("{}: skipping unnormalizable entry {:?}", name, raw);
            continue;
        };

        if kind.is_symlink() || kind.is_hard_link() {
            // Link target is the content: keeps link-only archives comparable.
            let Some(target) = entry.link_name_bytes().map(|t| t.into_owned()) else {
                continue;
            };
            guard.on_bytes(target.len() as u64)?;
            out.insert(norm, entry_from_bytes(target, hashed));
            continue;
        }
        if !kind.is_file() {
            continue;
        }

        if hashed {
            let mut hasher = blake3::Hasher::new();
            let size = consume(&mut entry, name, opts.chunk_size, guard, token, |w| {
                hasher.update(w);
            })?;
            out.insert(
                norm,
                ArchiveEntryData {
                    size,
                    content: EntryContent::Fingerprint(*hasher.finalize().as_bytes()),
                },
            );
        } else {
            let mut bytes = Vec::new();
            let size = consume(&mut entry, name, opts.chunk_size, guard, token, |w| {
                bytes.extend_from_slice(w);
            })?;
            out.insert(
                norm,
                ArchiveEntryData {
                    size,
                    content: EntryContent::Bytes(bytes),
                },
            );
        }
    }
    Ok(out)
}

fn read_zip(
    path: &Path,
    name: &str,
    opts: &CompareOptions,
    hashed: bool,
    guard: &mut BombGuard<'_>,
    token: &CancelToken,
) -> Result<BTreeMap<String, ArchiveEntryData>> {
    let file = File::open(path).map_err(|e| CompareError::from_io(name, e))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| archive_err(name, e))?;

    let mut out = BTreeMap::new();
    for index in 0..zip.len() {
        token.check()?;
        let mut entry = zip.by_index(index).map_err(|e| archive_err(name, e))?;
        guard.on_entry()?;
        if entry.is_dir() {
            continue;
        }
        let raw = entry.name().to_string();
        let Some(norm) = normalize_entry_path(&raw, opts.max_entry_name_length) else {
            debug!("{}: skipping unnormalizable entry {:?}", name, raw);
            continue;
        };

        // A zip member that fails to decompress localizes; the central
        // directory stays seekable, unlike a shot tar stream.
        let mut bytes = Vec::new();
        let mut hasher = blake3::Hasher::new();
        let consumed = consume(&mut entry, name, opts.chunk_size, guard, token, |w| {
            if hashed {
                hasher.update(w);
            } else {
                bytes.extend_from_slice(w);
            }
        });
        match consumed {
            Ok(size) => {
                let content = if hashed {
                    EntryContent::Fingerprint(*hasher.finalize().as_bytes())
                } else {
                    EntryContent::Bytes(bytes)
                };
                out.insert(norm, ArchiveEntryData { size, content });
            }
            Err(
                e @ (CompareError::ArchiveBomb { .. }
                | CompareError::Cancelled
                | CompareError::Timeout(_)),
            ) => return Err(e),
            Err(e) => {
                debug!("{}: member {} unreadable: {}", name, norm, e);
                out.insert(
                    norm,
                    ArchiveEntryData {
                        size: 0,
                        content: EntryContent::Unreadable,
                    },
                );
            }
        }
    }
    Ok(out)
}
