//! Deterministic archive export.
//!
//! Identical trees produce byte-identical archives: plain USTAR headers with
//! zeroed ownership and timestamps, normalized modes, and entries sorted by
//! their NFC archive path. A `.zst` output is compressed at a fixed level
//! with the content size and checksum recorded in the frame.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tar::{Builder, EntryType, Header};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use unicode_normalization::UnicodeNormalization;
use walkdir::WalkDir;

use crate::config::{BundleConfig, DEFAULT_ZSTD_LEVEL};
use crate::error::{BundleError, BundleResult};
use crate::path_safety::RESERVED_PREFIX;
use crate::pointer::POINTER_DIR;

const USTAR_NAME_LEN: usize = 100;
const USTAR_PREFIX_LEN: usize = 155;

const DIR_MODE: u32 = 0o755;
const EXEC_MODE: u32 = 0o755;
const FILE_MODE: u32 = 0o644;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zstd,
}

impl Compression {
    /// `.zst` (including `.tar.zst`) means zstd.
    pub fn from_path(path: &Path) -> Self {
        match path.extension() {
            Some(ext) if ext == "zst" => Self::Zstd,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Keep data files that pointers refer to.
    pub include_external: bool,
    pub compression_level: i32,
    /// Overrides the choice made from the output extension.
    pub compression: Option<Compression>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_external: false,
            compression_level: DEFAULT_ZSTD_LEVEL,
            compression: None,
        }
    }
}

impl ExportOptions {
    pub fn from_config(config: &BundleConfig) -> Self {
        Self {
            compression_level: config.zstd_level,
            ..Self::default()
        }
    }

    pub fn include_external(mut self, include: bool) -> Self {
        self.include_external = include;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = Some(compression);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub entries: usize,
    /// Data files left out because a pointer stands in for them.
    pub skipped_external: usize,
    pub compressed: bool,
}

enum Kind {
    Dir,
    File { executable: bool, size: u64 },
}

struct ArchiveEntry {
    /// NFC, forward slashes, no trailing slash.
    name: String,
    path: PathBuf,
    kind: Kind,
}

/// Reject archive names that could escape or truncate on extraction.
/// Unlike [`crate::path_safety::validate`], `.mops` is allowed.
fn validate_archive_path(name: &str) -> BundleResult<()> {
    let unsafe_name = |reason: &str| {
        BundleError::validation(format!("unsafe archive path '{}': {}", name.escape_debug(), reason))
    };
    if name.is_empty() || name == "." {
        return Err(unsafe_name("empty"));
    }
    if name.contains('\0') {
        return Err(unsafe_name("contains NUL byte"));
    }
    if name.contains('\\') {
        return Err(unsafe_name("contains backslash"));
    }
    if name.starts_with('/') {
        return Err(unsafe_name("absolute"));
    }
    if name.split('/').any(|segment| segment == "..") {
        return Err(unsafe_name("parent directory reference"));
    }
    Ok(())
}

fn normalize_name(name: &str) -> String {
    let name: String = name.replace('\\', "/").nfc().collect();
    match name.strip_prefix("./") {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o100 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &std::fs::Metadata) -> bool {
    false
}

fn collect(src_dir: &Path, skip: &Path) -> BundleResult<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(src_dir).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src_dir).to_path_buf();
            match e.into_io_error() {
                Some(io) => BundleError::io(path, io),
                None => BundleError::validation(format!("filesystem loop at {}", path.display())),
            }
        })?;
        if entry.path() == skip {
            continue;
        }

        let rel = entry.path().strip_prefix(src_dir).map_err(|_| {
            BundleError::validation(format!("{} is outside {}", entry.path().display(), src_dir.display()))
        })?;
        let raw = rel.to_str().ok_or_else(|| {
            BundleError::validation(format!("non UTF-8 path {}", rel.display()))
        })?;
        let name = normalize_name(raw);
        validate_archive_path(&name)?;

        let file_type = entry.file_type();
        let kind = if file_type.is_symlink() {
            return Err(BundleError::validation(format!(
                "cannot export symlink '{}'",
                name
            )));
        } else if file_type.is_dir() {
            Kind::Dir
        } else if file_type.is_file() {
            let meta = entry.metadata().map_err(|e| {
                BundleError::validation(format!("cannot stat '{}': {}", name, e))
            })?;
            Kind::File {
                executable: is_executable(&meta),
                size: meta.len(),
            }
        } else {
            return Err(BundleError::validation(format!(
                "cannot export special file '{}'",
                name
            )));
        };

        entries.push(ArchiveEntry {
            name,
            path: entry.into_path(),
            kind,
        });
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// `original_path` of every readable pointer under `<src>/.mops/ptr`.
/// Malformed pointers are archived but exclude nothing.
fn pointer_targets(src_dir: &Path) -> BTreeSet<String> {
    let ptr_root = src_dir.join(RESERVED_PREFIX).join(POINTER_DIR);
    if !ptr_root.is_dir() {
        return BTreeSet::new();
    }

    WalkDir::new(&ptr_root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|ext| ext == "json"))
        .filter_map(|e| {
            let parsed = std::fs::read(e.path())
                .ok()
                .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).ok());
            let original = parsed
                .as_ref()
                .and_then(|v| v.get("original_path"))
                .and_then(|v| v.as_str())
                .map(normalize_name);
            if original.is_none() {
                debug!(pointer = %e.path().display(), "pointer without original_path");
            }
            original
        })
        .collect()
}

/// Write `name` into the USTAR name/prefix fields, splitting at a `/`.
fn set_ustar_path(header: &mut Header, name: &str) -> BundleResult<()> {
    let bytes = name.as_bytes();
    let too_long = || BundleError::validation(format!("path too long for a USTAR header: '{}'", name));

    let (prefix, rest) = if bytes.len() <= USTAR_NAME_LEN {
        (&bytes[..0], bytes)
    } else {
        // A directory's trailing `/` stays with the name part.
        let searchable = bytes.strip_suffix(b"/").unwrap_or(bytes);
        let limit = searchable.len().min(USTAR_PREFIX_LEN + 1);
        let split = searchable[..limit]
            .iter()
            .rposition(|&b| b == b'/')
            .filter(|&i| i > 0 && i + 1 < searchable.len() && bytes.len() - i - 1 <= USTAR_NAME_LEN)
            .ok_or_else(too_long)?;
        (&bytes[..split], &bytes[split + 1..])
    };

    let ustar = header
        .as_ustar_mut()
        .ok_or_else(|| BundleError::validation("header is not USTAR"))?;
    ustar.name = [0; USTAR_NAME_LEN];
    ustar.name[..rest.len()].copy_from_slice(rest);
    ustar.prefix = [0; USTAR_PREFIX_LEN];
    ustar.prefix[..prefix.len()].copy_from_slice(prefix);
    Ok(())
}

fn canonical_header(name: &str, kind: EntryType, mode: u32, size: u64) -> BundleResult<Header> {
    let mut header = Header::new_ustar();
    set_ustar_path(&mut header, name)?;
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(size);
    let owner_err = |e: io::Error| BundleError::validation(format!("cannot set owner on '{}': {}", name, e));
    header.set_username("").map_err(owner_err)?;
    header.set_groupname("").map_err(owner_err)?;
    header.set_cksum();
    Ok(header)
}

fn write_tar<W: Write>(writer: W, entries: &[ArchiveEntry]) -> BundleResult<W> {
    let mut builder = Builder::new(writer);
    for entry in entries {
        let io_err = |e: io::Error| BundleError::io(&entry.path, e);
        match entry.kind {
            Kind::Dir => {
                let header = canonical_header(&format!("{}/", entry.name), EntryType::Directory, DIR_MODE, 0)?;
                builder.append(&header, io::empty()).map_err(io_err)?;
            }
            Kind::File { executable, size } => {
                let mode = if executable { EXEC_MODE } else { FILE_MODE };
                let header = canonical_header(&entry.name, EntryType::Regular, mode, size)?;
                let file = File::open(&entry.path).map_err(io_err)?;
                builder.append(&header, file).map_err(io_err)?;
            }
        }
    }
    builder
        .into_inner()
        .map_err(|e| BundleError::io(PathBuf::from("<archive>"), e))
}

/// Export `src_dir` to `out_path`, replacing it atomically.
pub fn export(src_dir: &Path, out_path: &Path, options: &ExportOptions) -> BundleResult<ExportSummary> {
    if !src_dir.is_dir() {
        return Err(BundleError::validation(format!(
            "source directory does not exist: {}",
            src_dir.display()
        )));
    }
    let compression = options
        .compression
        .unwrap_or_else(|| Compression::from_path(out_path));
    if compression == Compression::Zstd && !(1..=22).contains(&options.compression_level) {
        return Err(BundleError::validation(format!(
            "zstd level must be within 1..=22, got {}",
            options.compression_level
        )));
    }

    let mut entries = collect(src_dir, out_path)?;
    let mut skipped_external = 0;
    if !options.include_external {
        let targets = pointer_targets(src_dir);
        entries.retain(|e| {
            let skip = matches!(e.kind, Kind::File { .. }) && targets.contains(&e.name);
            if skip {
                skipped_external += 1;
            }
            !skip
        });
    }

    let parent = match out_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let out_err = |e: io::Error| BundleError::io(out_path, e);
    let out = NamedTempFile::new_in(parent).map_err(out_err)?;

    match compression {
        Compression::None => {
            let writer = write_tar(BufWriter::new(out.as_file()), &entries)?;
            writer.into_inner().map_err(|e| out_err(e.into_error()))?;
        }
        Compression::Zstd => {
            // Tar first so the frame header can carry the content size.
            let mut tar_file = NamedTempFile::new_in(parent).map_err(out_err)?;
            write_tar(BufWriter::new(tar_file.as_file()), &entries)?
                .into_inner()
                .map_err(|e| out_err(e.into_error()))?;
            let tar_len = tar_file.as_file().metadata().map_err(out_err)?.len();
            tar_file.rewind().map_err(out_err)?;

            let mut encoder =
                zstd::Encoder::new(BufWriter::new(out.as_file()), options.compression_level)
                    .map_err(out_err)?;
            encoder.include_checksum(true).map_err(out_err)?;
            encoder.include_contentsize(true).map_err(out_err)?;
            encoder.set_pledged_src_size(Some(tar_len)).map_err(out_err)?;
            io::copy(&mut tar_file, &mut encoder).map_err(out_err)?;
            encoder
                .finish()
                .map_err(out_err)?
                .into_inner()
                .map_err(|e| out_err(e.into_error()))?;
        }
    }

    out.as_file().sync_all().map_err(out_err)?;
    out.persist(out_path).map_err(|e| out_err(e.error))?;

    let summary = ExportSummary {
        entries: entries.len(),
        skipped_external,
        compressed: compression == Compression::Zstd,
    };
    info!(
        src = %src_dir.display(),
        out = %out_path.display(),
        entries = summary.entries,
        skipped_external = summary.skipped_external,
        compressed = summary.compressed,
        "exported archive"
    );
    Ok(summary)
}
