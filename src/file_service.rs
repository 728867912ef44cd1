//! Filesystem primitives consumed by [`crate::mirror::Mirror`].
//!
//! [`OsFileService`] is the real, destructive implementation; [`MemoryFileService`]
//! is a recording fake used in tests that want to assert on *what would have
//! happened* without touching disk.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read, Write};
use std::sync::Mutex;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

pub trait FileService: Send + Sync {
    /// Copy file bytes from `source` to `target`, creating target's missing
    /// parent directories. Overwrites `target` if it already exists.
    fn copy(&self, source: &Utf8Path, target: &Utf8Path, buffer_kib: usize) -> Result<()>;

    /// Recursively remove the file or directory tree rooted at `path`.
    /// Succeeds silently if `path` doesn't exist.
    fn delete(&self, path: &Utf8Path) -> Result<()>;

    /// Create `path` and any missing parents. Idempotent.
    fn create_directory(&self, path: &Utf8Path) -> Result<()>;

    /// Create an empty file at `path`, creating missing parents.
    /// Idempotent if the file already exists.
    fn create_file(&self, path: &Utf8Path) -> Result<()>;
}

/// The real thing: a thin adapter over the OS filesystem.
#[derive(Debug, Default)]
pub struct OsFileService;

impl FileService for OsFileService {
    fn copy(&self, source: &Utf8Path, target: &Utf8Path, buffer_kib: usize) -> Result<()> {
        let buffer_kib = buffer_kib.max(1);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;
        }

        let mut from = fs::File::open(source).with_context(|| format!("Couldn't open {source}"))?;
        let mut to =
            fs::File::create(target).with_context(|| format!("Couldn't create {target}"))?;

        let mut buf = vec![0u8; buffer_kib * 1024];
        loop {
            let n = from
                .read(&mut buf)
                .with_context(|| format!("Couldn't read {source}"))?;
            if n == 0 {
                break;
            }
            to.write_all(&buf[..n])
                .with_context(|| format!("Couldn't write {target}"))?;
        }
        to.sync_all().with_context(|| format!("Couldn't sync {target}"))?;
        Ok(())
    }

    fn delete(&self, path: &Utf8Path) -> Result<()> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => {
                fs::remove_dir_all(path).with_context(|| format!("Couldn't remove {path}"))
            }
            Ok(_) => fs::remove_file(path).with_context(|| format!("Couldn't remove {path}")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Couldn't stat {path}")),
        }
    }

    fn create_directory(&self, path: &Utf8Path) -> Result<()> {
        fs::create_dir_all(path).with_context(|| format!("Couldn't create {path}"))
    }

    fn create_file(&self, path: &Utf8Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("Couldn't create {parent}"))?;
        }
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(path)
            .with_context(|| format!("Couldn't create {path}"))?;
        Ok(())
    }
}

/// One call recorded by a [`MemoryFileService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Copy {
        source: Utf8PathBuf,
        target: Utf8PathBuf,
        buffer_kib: usize,
    },
    Delete {
        path: Utf8PathBuf,
    },
    CreateDirectory {
        path: Utf8PathBuf,
    },
    CreateFile {
        path: Utf8PathBuf,
    },
}

/// A fake [`FileService`] that performs real byte copies into an in-memory
/// map and records every call it receives, for tests that want to assert on
/// what would have happened without touching disk - in particular, the
/// security gate's "no delete calls reach here" guarantee.
#[derive(Default)]
pub struct MemoryFileService {
    files: Mutex<BTreeMap<Utf8PathBuf, Vec<u8>>>,
    calls: Mutex<Vec<Call>>,
}

impl MemoryFileService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }
}

impl FileService for MemoryFileService {
    fn copy(&self, source: &Utf8Path, target: &Utf8Path, buffer_kib: usize) -> Result<()> {
        let bytes = fs::read(source).with_context(|| format!("Couldn't read {source}"))?;
        self.files.lock().unwrap().insert(target.to_owned(), bytes);
        self.calls.lock().unwrap().push(Call::Copy {
            source: source.to_owned(),
            target: target.to_owned(),
            buffer_kib,
        });
        Ok(())
    }

    fn delete(&self, path: &Utf8Path) -> Result<()> {
        self.files.lock().unwrap().retain(|p, _| !p.starts_with(path));
        self.calls
            .lock()
            .unwrap()
            .push(Call::Delete { path: path.to_owned() });
        Ok(())
    }

    fn create_directory(&self, path: &Utf8Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::CreateDirectory { path: path.to_owned() });
        Ok(())
    }

    fn create_file(&self, path: &Utf8Path) -> Result<()> {
        self.files.lock().unwrap().insert(path.to_owned(), Vec::new());
        self.calls
            .lock()
            .unwrap()
            .push(Call::CreateFile { path: path.to_owned() });
        Ok(())
    }
}
