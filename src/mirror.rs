//! Owns one origin/target pair and runs one reconciliation tick per call to
//! [`Mirror::check`].

use std::sync::Mutex;

use anyhow::{Context, Result};
use byte_unit::{Byte, UnitType};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

use crate::counters::{self, Op};
use crate::error::{MirrorError, RootSide};
use crate::file_service::FileService;
use crate::hashing;
use crate::library::{self, LibraryMap};
use crate::snapshot::{Entry, NodeKind, Snapshot};

struct State {
    origin: Snapshot,
    target: Snapshot,
}

/// Keeps one target directory in sync with one origin directory.
///
/// `state`'s mutex is doing double duty: a successful `try_lock()` *is* the
/// "not currently ticking" signal, so there's no separate busy flag to keep
/// in sync with it.
pub struct Mirror {
    origin_root: Utf8PathBuf,
    target_root: Utf8PathBuf,
    service: Box<dyn FileService>,
    buffer_kib: usize,
    max_file_size: u64,
    mirror_name: String,
    library_path: Utf8PathBuf,
    state: Mutex<State>,
}

impl Mirror {
    /// Build a mirror from an origin and target directory, optionally
    /// bootstrapping from a persisted library under `library_dir`.
    pub fn new(
        origin_root: Utf8PathBuf,
        target_root: Utf8PathBuf,
        service: Box<dyn FileService>,
        buffer_kib: usize,
        max_file_size: u64,
        library_dir: &Utf8Path,
    ) -> Result<Mirror, MirrorError> {
        let origin_root = canonical_directory(&origin_root, RootSide::Origin)?;
        let target_root = canonical_directory(&target_root, RootSide::Target)?;

        let origin = Snapshot::new_root(origin_root.clone())
            .map_err(|e| MirrorError::Configuration(format!("Couldn't read {origin_root}: {e:#}")))?;
        let mut target = Snapshot::new_root(target_root.clone())
            .map_err(|e| MirrorError::Configuration(format!("Couldn't read {target_root}: {e:#}")))?;

        // Always eagerly index what's already at the destination.
        target.update().map_err(|e| {
            MirrorError::Configuration(format!("Couldn't index {target_root}: {e:#}"))
        })?;

        let mirror_name = hashing::mirror_name(&origin_root, &target_root);
        let library_path = library_dir.join(format!("{mirror_name}.lib"));

        let mirror = Mirror {
            origin_root,
            target_root,
            service,
            buffer_kib: buffer_kib.max(1),
            max_file_size,
            mirror_name,
            library_path,
            state: Mutex::new(State { origin, target }),
        };

        if mirror.library_path.is_file() {
            mirror.bootstrap_from_library().map_err(|e| {
                MirrorError::Configuration(format!(
                    "Couldn't bootstrap from {}: {e:#}",
                    mirror.library_path
                ))
            })?;
        }

        Ok(mirror)
    }

    pub fn mirror_name(&self) -> &str {
        &self.mirror_name
    }

    /// Refresh the origin snapshot, reconcile it against a persisted
    /// library, copy or delete whatever's needed to match, then persist.
    fn bootstrap_from_library(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .origin
            .update()
            .context("Couldn't refresh the origin snapshot")?;

        let library = library::load(&self.library_path)?.unwrap_or_default();
        let (to_copy, stale) = self.plan_from_library(&state.origin, &library);

        for entry in &to_copy {
            if let Err(e) = self.copy_to_mirror(&state.origin, entry) {
                warn!("Couldn't copy {} while bootstrapping: {:#}", entry.path, e);
            }
        }
        for target_path in &stale {
            warn!(
                "{target_path} was mirrored on a previous run but its origin no longer exists; removing it"
            );
            if let Err(e) = self.delete_target_path(target_path) {
                warn!("Couldn't remove stale {target_path}: {:#}", e);
            }
        }

        library::store(&state.origin, &self.library_path)
    }

    /// Diff the origin tree against a loaded library: entries that diverge
    /// (or are unknown to the library) need copying; library entries left
    /// unclaimed at the end point at paths that no longer exist on origin.
    fn plan_from_library(
        &self,
        origin: &Snapshot,
        library: &LibraryMap,
    ) -> (Vec<Entry>, Vec<Utf8PathBuf>) {
        let mut remaining = library.clone();
        let mut to_copy = Vec::new();
        walk_for_library(origin, &mut remaining, &mut to_copy, library);

        let stale = remaining
            .keys()
            .filter_map(|path| {
                path.strip_prefix(&self.origin_root)
                    .ok()
                    .map(|rel| self.target_root.join(rel))
            })
            .collect();
        (to_copy, stale)
    }

    /// Run one reconciliation tick. Ticks that arrive while a previous tick
    /// still holds the lock are dropped, not queued.
    pub fn check(&self) -> Result<(), MirrorError> {
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("A tick is already running; skipping this one");
                return Ok(());
            }
        };
        counters::bump(Op::TicksRun);

        let diff = match state.origin.update() {
            Ok(d) => d,
            Err(e) => {
                warn!("Couldn't refresh the origin snapshot; skipping this tick: {e:#}");
                return Ok(());
            }
        };

        for entry in diff.added.iter().chain(diff.updated.iter()) {
            self.handle_item(self.copy_to_mirror(&state.origin, entry))?;
        }
        for entry in &diff.deleted {
            self.handle_item(self.delete_from_mirror(entry))?;
        }

        if let Err(e) = state.target.update() {
            warn!("Couldn't refresh the target snapshot; skipping this tick: {e:#}");
            return Ok(());
        }
        let compare = state.target.compare_to(&state.origin);

        for entry in &compare.missing {
            self.handle_item(self.copy_to_mirror(&state.origin, entry))?;
        }
        for entry in &compare.extra {
            self.handle_item(self.delete_extra_from_mirror(entry))?;
        }

        if !diff.is_empty() {
            if let Err(e) = library::store(&state.origin, &self.library_path) {
                warn!("Couldn't persist the origin library: {e:#}");
                counters::bump(Op::PersistenceFailures);
            }
        }

        Ok(())
    }

    /// Turn a per-item `Result` into either "logged and continue" or, for a
    /// root-unreachable failure, an error that unwinds out of `check()`.
    fn handle_item(&self, result: Result<()>) -> Result<(), MirrorError> {
        if let Err(e) = result {
            if let Some(root_err) = e.downcast_ref::<MirrorError>() {
                return Err(root_err.clone());
            }
            warn!("{e:#}");
            counters::bump(Op::ItemErrors);
        }
        Ok(())
    }

    fn copy_to_mirror(&self, origin: &Snapshot, entry: &Entry) -> Result<()> {
        if entry.is_symlink() {
            debug!("Skipping symlink {} (symlinks aren't mirrored)", entry.path);
            return Ok(());
        }
        if std::fs::symlink_metadata(&entry.path).is_err() {
            // Vanished since we computed this diff entry; the next tick will reconcile.
            return Ok(());
        }
        if entry.kind == NodeKind::File && entry.size > self.max_file_size {
            counters::bump(Op::FilesSkippedTooLarge);
            info!(
                "Skipping {} ({} over the {} limit)",
                entry.path,
                Byte::from_u64(entry.size).get_appropriate_unit(UnitType::Binary),
                Byte::from_u64(self.max_file_size).get_appropriate_unit(UnitType::Binary),
            );
            return Ok(());
        }

        self.security_gate()?;

        let target_path = self.to_target_path(&entry.path)?;
        if target_path.exists() {
            if let Err(e) = self.service.delete(&target_path) {
                warn!("Couldn't clear {target_path} before repairing it: {e:#}");
            }
        }

        match entry.kind {
            NodeKind::Directory => {
                self.service.create_directory(&target_path)?;
                let relative = relative_to(&entry.path, &self.origin_root)?;
                if let Some(node) = origin.get(&relative) {
                    for child in node.children() {
                        self.copy_to_mirror(origin, &child.to_entry())?;
                    }
                }
            }
            NodeKind::File => {
                self.service.copy(&entry.path, &target_path, self.buffer_kib)?;
                counters::bump(Op::FilesCopied);
                counters::add(Op::BytesCopied, entry.size as usize);
            }
            NodeKind::Symlink => unreachable!("filtered out above"),
        }
        Ok(())
    }

    fn delete_from_mirror(&self, entry: &Entry) -> Result<()> {
        let target_path = self.to_target_path(&entry.path)?;
        self.delete_target_path(&target_path)
    }

    /// Like `delete_from_mirror`, but for `compare_to`'s `extra` entries,
    /// whose paths already live under `target_root` and need no translation.
    fn delete_extra_from_mirror(&self, entry: &Entry) -> Result<()> {
        self.delete_target_path(&entry.path)
    }

    fn delete_target_path(&self, target_path: &Utf8Path) -> Result<()> {
        self.security_gate()?;
        self.service.delete(target_path)?;
        counters::bump(Op::FilesDeleted);
        Ok(())
    }

    fn to_target_path(&self, origin_absolute: &Utf8Path) -> Result<Utf8PathBuf> {
        let relative = relative_to(origin_absolute, &self.origin_root)?;
        Ok(self.target_root.join(relative))
    }

    /// Before any destructive operation: if either root has become
    /// unreachable, abort instead of risking a disappearing origin wiping
    /// the mirror, or a disappearing target eating repeated failed writes.
    fn security_gate(&self) -> Result<()> {
        if !self.origin_root.is_dir() {
            return Err(MirrorError::RootUnreachable {
                path: self.origin_root.clone(),
                side: RootSide::Origin,
            }
            .into());
        }
        if !self.target_root.is_dir() {
            return Err(MirrorError::RootUnreachable {
                path: self.target_root.clone(),
                side: RootSide::Target,
            }
            .into());
        }
        Ok(())
    }
}

fn relative_to(path: &Utf8Path, root: &Utf8Path) -> Result<Utf8PathBuf> {
    path.strip_prefix(root)
        .map(|p| p.to_path_buf())
        .with_context(|| format!("{path} is not under {root}"))
}

fn canonical_directory(path: &Utf8Path, side: RootSide) -> Result<Utf8PathBuf, MirrorError> {
    if !path.is_dir() {
        return Err(MirrorError::Configuration(format!(
            "{side} path {path} doesn't exist or isn't a directory"
        )));
    }
    let canonical = path
        .canonicalize_utf8()
        .map_err(|e| MirrorError::Configuration(format!("Couldn't canonicalize {path}: {e}")))?;
    Ok(canonical)
}

fn walk_for_library(
    node: &Snapshot,
    remaining: &mut LibraryMap,
    to_copy: &mut Vec<Entry>,
    library: &LibraryMap,
) {
    match library.get(node.path()) {
        Some((mtime, size)) if *mtime == node.modified_time() && *size == node.size() => {
            remaining.remove(node.path());
        }
        _ => to_copy.push(node.to_entry()),
    }
    for child in node.children() {
        walk_for_library(child, remaining, to_copy, library);
    }
}
