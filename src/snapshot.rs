//! In-memory tree mirroring one directory, with incremental self-refresh
//! against disk and cross-tree comparison against another [`Snapshot`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use tracing::*;

/// The last-observed kind of a filesystem entry.
///
/// Symlinks are their own kind (stat'd via `symlink_metadata`, never
/// followed) rather than being folded into `File`, so callers can skip them
/// without guessing from size-zero-ness.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
}

/// A lightweight, detached description of a [`Snapshot`] at one instant.
///
/// This is what actually flows through the `added`/`updated`/`deleted`/
/// `missing`/`extra` sequences: cheap to clone, and independent of the live
/// tree's lifetime. Callers that need to recurse into a node's subtree (a
/// freshly-added directory, say) look the live node back up by path via
/// [`Snapshot::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: Utf8PathBuf,
    pub kind: NodeKind,
    pub size: u64,
    pub modified_time: i64,
}

impl Entry {
    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == NodeKind::Symlink
    }
}

/// What changed when a [`Snapshot`] refreshed itself from disk.
#[derive(Debug, Default)]
pub struct UpdateDiff {
    pub added: Vec<Entry>,
    pub updated: Vec<Entry>,
    pub deleted: Vec<Entry>,
}

impl UpdateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// What differs between two [`Snapshot`]s as of `compare_to`.
#[derive(Debug, Default)]
pub struct CompareDiff {
    /// Present (or diverged) on the authoritative side, absent or wrong here.
    pub missing: Vec<Entry>,
    /// Present here, absent on the authoritative side.
    pub extra: Vec<Entry>,
}

impl CompareDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

/// One file or directory, as last observed on disk, and (if a directory)
/// everything currently tracked beneath it.
///
/// Children are owned by value - dropping a `Snapshot` drops its whole
/// subtree - in a `BTreeMap` so traversal order, and thus persisted library
/// order, is deterministic, the same reasoning this codebase applies to
/// `Tree`.
#[derive(Debug, Clone)]
pub struct Snapshot {
    path: Utf8PathBuf,
    kind: NodeKind,
    size: u64,
    modified_time: i64,
    children: BTreeMap<String, Snapshot>,
}

impl Snapshot {
    /// Construct a root (or freestanding) snapshot, reading its current
    /// attributes eagerly. Because of this, the first `update()` call
    /// against a freshly-loaded persisted library may legitimately report no
    /// change for this node, even though its children haven't been read yet.
    pub fn new_root(path: Utf8PathBuf) -> Result<Snapshot> {
        let (kind, size, modified_time) = read_attributes(&path)?;
        Ok(Snapshot {
            path,
            kind,
            size,
            modified_time,
            children: BTreeMap::new(),
        })
    }

    fn child(path: Utf8PathBuf) -> Result<Snapshot> {
        let (kind, size, modified_time) = read_attributes(&path)?;
        Ok(Snapshot {
            path,
            kind,
            size,
            modified_time,
            children: BTreeMap::new(),
        })
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        self.kind == NodeKind::Directory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn modified_time(&self) -> i64 {
        self.modified_time
    }

    pub fn children(&self) -> impl Iterator<Item = &Snapshot> {
        self.children.values()
    }

    pub fn to_entry(&self) -> Entry {
        Entry {
            path: self.path.clone(),
            kind: self.kind,
            size: self.size,
            modified_time: self.modified_time,
        }
    }

    /// Look up a tracked descendant by the path relative to this node.
    pub fn get(&self, relative: &Utf8Path) -> Option<&Snapshot> {
        let mut node = self;
        for component in relative.components() {
            let name = component.as_str();
            node = node.children.get(name)?;
        }
        Some(node)
    }

    /// Refresh this node - and, if it's a directory, its whole subtree -
    /// from disk, returning everything that changed.
    ///
    /// A vanished node reports only itself in `deleted` (subtree deletion is
    /// inferred by the caller); a brand-new subtree reports every node
    /// within it as it's discovered, parent before children, in the same
    /// call that discovers it.
    pub fn update(&mut self) -> Result<UpdateDiff> {
        let mut diff = UpdateDiff::default();
        self.update_into(&mut diff)?;
        Ok(diff)
    }

    fn update_into(&mut self, diff: &mut UpdateDiff) -> Result<()> {
        let attrs = match read_attributes(&self.path) {
            Ok(a) => a,
            Err(e) => {
                trace!("{} is gone or inaccessible: {:#}", self.path, e);
                diff.deleted.push(self.to_entry());
                self.children.clear();
                return Ok(());
            }
        };
        let (kind, size, modified_time) = attrs;

        // A directory's own mtime changes whenever a child is added or
        // removed, on every mainstream filesystem - that's not a change to
        // the directory itself, and per-child content changes are already
        // caught by `update_children`'s enumeration. Only a kind flip (e.g.
        // file -> directory) counts as a directory's own change.
        let self_changed = if kind == NodeKind::Directory && self.kind == NodeKind::Directory {
            false
        } else {
            kind != self.kind || size != self.size || modified_time != self.modified_time
        };

        self.kind = kind;
        self.size = size;
        self.modified_time = modified_time;
        if self_changed {
            diff.updated.push(self.to_entry());
        }

        if self.kind == NodeKind::Directory {
            self.update_children(diff)?;
        } else if !self.children.is_empty() {
            // Directory -> file/symlink transition: the whole former subtree
            // is gone, but unlike a vanished root we already know exactly
            // what it contained, so report each immediate child rather than
            // just this node's own `updated` entry above.
            for child in self.children.values() {
                diff.deleted.push(child.to_entry());
            }
            self.children.clear();
        }

        Ok(())
    }

    fn update_children(&mut self, diff: &mut UpdateDiff) -> Result<()> {
        let mut remaining: BTreeSet<String> = self.children.keys().cloned().collect();

        let mut names = Vec::new();
        for entry in
            fs::read_dir(&self.path).with_context(|| format!("Couldn't enumerate {}", self.path))?
        {
            let entry =
                entry.with_context(|| format!("Couldn't read an entry under {}", self.path))?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }

        for name in names {
            remaining.remove(&name);
            if let Some(existing) = self.children.get_mut(&name) {
                existing.update_into(diff)?;
            } else {
                let child_path = self.path.join(&name);
                let mut child = Snapshot::child(child_path)?;
                // Recorded before recursing: a parent's entry never comes
                // later than its children's in the same call.
                diff.added.push(child.to_entry());
                child.update_into(diff)?;
                self.children.insert(name, child);
            }
        }

        for name in remaining {
            if let Some(child) = self.children.remove(&name) {
                diff.deleted.push(child.to_entry());
            }
        }

        Ok(())
    }

    /// Compare `self` (the "target side") to `other` (the "authoritative
    /// side"), without mutating either. Divergence is always reported as
    /// `missing` - the authoritative version - since the caller repairs by
    /// copying from the authoritative side.
    pub fn compare_to(&self, other: &Snapshot) -> CompareDiff {
        let mut diff = CompareDiff::default();
        self.compare_into(other, &mut diff);
        diff
    }

    fn compare_into(&self, other: &Snapshot, diff: &mut CompareDiff) {
        let mut names: BTreeSet<&str> = BTreeSet::new();
        names.extend(self.children.keys().map(String::as_str));
        names.extend(other.children.keys().map(String::as_str));

        for name in names {
            match (self.children.get(name), other.children.get(name)) {
                (Some(mine), Some(theirs)) => {
                    if mine.kind != theirs.kind || mine.size != theirs.size {
                        diff.missing.push(theirs.to_entry());
                    }
                    mine.compare_into(theirs, diff);
                }
                (None, Some(theirs)) => diff.missing.push(theirs.to_entry()),
                (Some(mine), None) => diff.extra.push(mine.to_entry()),
                (None, None) => unreachable!("name came from one of the two maps"),
            }
        }
    }

    /// Pre-order traversal, one line per node, for persistence.
    pub fn store<W: Write>(&self, w: &mut W) -> Result<()> {
        ensure!(
            !self.path.as_str().contains("||"),
            "Refusing to persist {}: it contains the library format's reserved delimiter '||'",
            self.path
        );
        writeln!(w, "{}||{}||{}", self.path, self.modified_time, self.size)?;
        for child in self.children.values() {
            child.store(w)?;
        }
        Ok(())
    }
}

fn read_attributes(path: &Utf8Path) -> Result<(NodeKind, u64, i64)> {
    let meta = fs::symlink_metadata(path).with_context(|| format!("Couldn't stat {path}"))?;
    let modified_time = millis_since_epoch(meta.modified()?)?;

    if meta.file_type().is_symlink() {
        Ok((NodeKind::Symlink, 0, modified_time))
    } else if meta.is_dir() {
        Ok((NodeKind::Directory, 0, modified_time))
    } else {
        Ok((NodeKind::File, meta.len(), modified_time))
    }
}

fn millis_since_epoch(t: SystemTime) -> Result<i64> {
    let since_epoch = t
        .duration_since(UNIX_EPOCH)
        .context("Modification time is before the Unix epoch")?;
    Ok(since_epoch.as_millis() as i64)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn init() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn utf8(p: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(p).unwrap()
    }

    #[test]
    fn first_update_reports_whole_tree_as_added() -> Result<()> {
        init();
        let dir = tempdir()?;
        let root = utf8(dir.path().to_owned());
        fs::write(root.join("a.txt"), b"0123456789")?;
        fs::create_dir(root.join("d1"))?;
        fs::write(root.join("d1/b.txt"), b"")?;
        fs::create_dir_all(root.join("d1/d2/d3"))?;

        let mut snap = Snapshot::new_root(root.clone())?;
        let diff = snap.update()?;

        assert!(diff.deleted.is_empty());
        assert_eq!(diff.added.len(), 5);
        let added_paths: BTreeSet<_> = diff.added.iter().map(|e| e.path.clone()).collect();
        assert!(added_paths.contains(&root.join("a.txt")));
        assert!(added_paths.contains(&root.join("d1")));
        assert!(added_paths.contains(&root.join("d1/b.txt")));
        assert!(added_paths.contains(&root.join("d1/d2")));
        assert!(added_paths.contains(&root.join("d1/d2/d3")));
        Ok(())
    }

    #[test]
    fn stable_tree_has_empty_second_update() -> Result<()> {
        init();
        let dir = tempdir()?;
        let root = utf8(dir.path().to_owned());
        fs::write(root.join("a.txt"), b"hello")?;

        let mut snap = Snapshot::new_root(root.clone())?;
        snap.update()?;
        let diff = snap.update()?;
        assert!(diff.is_empty(), "{diff:?}");
        Ok(())
    }

    #[test]
    fn file_added() -> Result<()> {
        init();
        let dir = tempdir()?;
        let root = utf8(dir.path().to_owned());
        fs::write(root.join("a.txt"), b"hello")?;

        let mut snap = Snapshot::new_root(root.clone())?;
        snap.update()?;

        fs::write(root.join("c.txt"), b"12345")?;
        let diff = snap.update()?;
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].path, root.join("c.txt"));
        assert_eq!(diff.added[0].size, 5);
        assert!(diff.updated.is_empty());
        assert!(diff.deleted.is_empty());
        Ok(())
    }

    #[test]
    fn adding_a_child_does_not_mark_its_directory_as_updated() -> Result<()> {
        init();
        let dir = tempdir()?;
        let root = utf8(dir.path().to_owned());
        fs::create_dir(root.join("d1"))?;
        fs::write(root.join("d1/a.txt"), b"hello")?;

        let mut snap = Snapshot::new_root(root.clone())?;
        snap.update()?;

        // A directory's mtime advances whenever a child is added, with no
        // sleep required; that must not surface `d1` itself in `updated`.
        fs::write(root.join("d1/b.txt"), b"12345")?;
        let diff = snap.update()?;
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.added[0].path, root.join("d1/b.txt"));
        assert!(diff.updated.is_empty(), "{diff:?}");

        fs::remove_file(root.join("d1/a.txt"))?;
        let diff = snap.update()?;
        assert_eq!(diff.deleted.len(), 1);
        assert!(diff.updated.is_empty(), "{diff:?}");
        Ok(())
    }

    #[test]
    fn file_deleted() -> Result<()> {
        init();
        let dir = tempdir()?;
        let root = utf8(dir.path().to_owned());
        fs::write(root.join("a.txt"), b"hello")?;

        let mut snap = Snapshot::new_root(root.clone())?;
        snap.update()?;

        fs::remove_file(root.join("a.txt"))?;
        let diff = snap.update()?;
        assert_eq!(diff.deleted.len(), 1);
        assert_eq!(diff.deleted[0].path, root.join("a.txt"));
        Ok(())
    }

    #[test]
    fn file_modified() -> Result<()> {
        init();
        let dir = tempdir()?;
        let root = utf8(dir.path().to_owned());
        fs::create_dir(root.join("d1"))?;
        fs::write(root.join("d1/b.txt"), b"")?;

        let mut snap = Snapshot::new_root(root.clone())?;
        snap.update()?;

        // Make sure the mtime actually ticks forward on coarse filesystems.
        std::thread::sleep(std::time::Duration::from_millis(10));
        fs::write(root.join("d1/b.txt"), vec![b'x'; 31])?;
        let diff = snap.update()?;

        assert_eq!(diff.updated.len(), 1);
        assert_eq!(diff.updated[0].path, root.join("d1/b.txt"));
        assert_eq!(diff.updated[0].size, 31);
        Ok(())
    }

    #[test]
    fn file_to_directory_transition() -> Result<()> {
        init();
        let dir = tempdir()?;
        let root = utf8(dir.path().to_owned());
        fs::create_dir(root.join("d1"))?;
        fs::write(root.join("d1/b.txt"), b"")?;

        let mut snap = Snapshot::new_root(root.clone())?;
        snap.update()?;

        fs::remove_file(root.join("d1/b.txt"))?;
        fs::create_dir(root.join("d1/b.txt"))?;
        let diff = snap.update()?;

        let flipped = diff
            .updated
            .iter()
            .find(|e| e.path == root.join("d1/b.txt"))
            .expect("the flipped node should be reported as updated");
        assert!(flipped.is_directory());
        Ok(())
    }

    #[test]
    fn compare_to_finds_divergence_and_extras() -> Result<()> {
        init();
        let origin_dir = tempdir()?;
        let target_dir = tempdir()?;
        let origin_root = utf8(origin_dir.path().to_owned());
        let target_root = utf8(target_dir.path().to_owned());

        fs::write(origin_root.join("a.txt"), b"hello")?;
        fs::write(target_root.join("a.txt"), b"hi")?; // diverged size
        fs::write(target_root.join("stray.bin"), b"x")?; // target-only

        let mut origin = Snapshot::new_root(origin_root.clone())?;
        origin.update()?;
        let mut target = Snapshot::new_root(target_root.clone())?;
        target.update()?;

        let diff = target.compare_to(&origin);
        assert_eq!(diff.missing.len(), 1);
        assert_eq!(diff.missing[0].path, origin_root.join("a.txt"));
        assert_eq!(diff.extra.len(), 1);
        assert_eq!(diff.extra[0].path, target_root.join("stray.bin"));
        Ok(())
    }

    #[test]
    fn store_rejects_delimiter_in_path() {
        let snap = Snapshot {
            path: Utf8PathBuf::from("/tmp/has||delimiter"),
            kind: NodeKind::File,
            size: 0,
            modified_time: 0,
            children: BTreeMap::new(),
        };
        let mut buf = Vec::new();
        assert!(snap.store(&mut buf).is_err());
    }
}
