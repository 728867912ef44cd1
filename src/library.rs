//! Persisted form of an origin [`crate::snapshot::Snapshot`], used to skip
//! redundant copies across a restart.
//!
//! The format is deliberately *not* a structured serialization format (no
//! `serde`, no CBOR): one `path||mtime_ms||size` line per node, pre-order.
//! Writes go through the same temp-file-then-rename idiom as
//! [`crate::file_util::safe_copy_to_file`], so a crash mid-write never
//! leaves a partial library on disk.

use std::fs;
use std::io::{ErrorKind, Write};

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use rustc_hash::FxHashMap;

use crate::snapshot::Snapshot;

const DELIMITER: &str = "||";

/// Path -> (modified_time_ms, size), as last persisted.
pub type LibraryMap = FxHashMap<Utf8PathBuf, (i64, u64)>;

/// Parse a persisted library file's contents.
pub fn parse(contents: &str) -> Result<LibraryMap> {
    let mut map = LibraryMap::default();
    for (lineno, line) in contents.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, DELIMITER);
        let path = parts
            .next()
            .with_context(|| format!("Malformed library line {}", lineno + 1))?;
        let mtime = parts
            .next()
            .with_context(|| format!("Malformed library line {}: missing mtime", lineno + 1))?;
        let size = parts
            .next()
            .with_context(|| format!("Malformed library line {}: missing size", lineno + 1))?;

        let mtime: i64 = mtime
            .parse()
            .with_context(|| format!("Bad mtime on library line {}", lineno + 1))?;
        let size: u64 = size
            .parse()
            .with_context(|| format!("Bad size on library line {}", lineno + 1))?;
        map.insert(Utf8PathBuf::from(path), (mtime, size));
    }
    Ok(map)
}

/// Load a persisted library, if one exists yet for this mirror.
pub fn load(path: &Utf8Path) -> Result<Option<LibraryMap>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(parse(&contents)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Couldn't read library {path}")),
    }
}

/// Serialize `snapshot` and atomically replace the library file at `path`.
pub fn store(snapshot: &Snapshot, path: &Utf8Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;
    }

    let mut buf = Vec::new();
    snapshot.store(&mut buf)?;

    let tmp_path = path.with_extension("tmp");
    {
        let mut tmp =
            fs::File::create(&tmp_path).with_context(|| format!("Couldn't open {tmp_path}"))?;
        tmp.write_all(&buf)
            .with_context(|| format!("Couldn't write {tmp_path}"))?;
        tmp.sync_all()
            .with_context(|| format!("Couldn't sync {tmp_path}"))?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Couldn't rename {tmp_path} to {path}"))?;
    Ok(())
}
