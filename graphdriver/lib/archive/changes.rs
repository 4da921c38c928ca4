use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt, fs,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::DriverResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a path differs between a layer and its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeKind {
    /// The path exists in both but its content or attributes differ.
    Modify,

    /// The path exists only in the layer.
    Add,

    /// The path exists only in the parent.
    Delete,
}

/// A single entry of a change set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Change {
    /// The path, rooted at `/` of the layer.
    pub path: PathBuf,

    /// What happened to the path.
    pub kind: ChangeKind,
}

/// The attributes of a path that take part in change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileInfo {
    mode: u32,
    uid: u32,
    gid: u32,
    rdev: u64,
    size: u64,
    mtime: (i64, i64),
    link: Option<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Change {
    /// The path relative to the layer root, without the leading `/`.
    pub fn relative_path(&self) -> &Path {
        self.path.strip_prefix("/").unwrap_or(&self.path)
    }
}

impl FileInfo {
    fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    /// Size and mtime are ignored for directories; they do not reflect content changes.
    fn differs_from(&self, old: &FileInfo) -> bool {
        self.mode != old.mode
            || self.uid != old.uid
            || self.gid != old.gid
            || self.rdev != old.rdev
            || (!self.is_dir() && (self.mtime != old.mtime || self.size != old.size))
            || self.link != old.link
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the change set that turns `old` into `new`.
///
/// With `old` set to `None` every path under `new` is reported as added. Directories that
/// contain changes, directly or deeper down, are reported as modified so their attributes are
/// carried along. Deleted directories are reported once, without their contents. The result is
/// sorted by path.
pub fn changes_dirs(new: &Path, old: Option<&Path>) -> DriverResult<Vec<Change>> {
    let new_tree = collect_tree(new)?;
    let old_tree = match old {
        Some(old) => collect_tree(old)?,
        None => BTreeMap::new(),
    };

    let mut changes: BTreeMap<PathBuf, ChangeKind> = BTreeMap::new();

    for (path, info) in &new_tree {
        match old_tree.get(path) {
            None => {
                changes.insert(path.clone(), ChangeKind::Add);
            }
            Some(old_info) if info.differs_from(old_info) => {
                changes.insert(path.clone(), ChangeKind::Modify);
            }
            Some(_) => {}
        }
    }

    for path in old_tree.keys() {
        if new_tree.contains_key(path) {
            continue;
        }

        // Children of a directory that was removed or replaced by a non-directory go with it.
        let parent_gone = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .is_some_and(|p| !matches!(new_tree.get(p), Some(info) if info.is_dir()));
        if !parent_gone {
            changes.insert(path.clone(), ChangeKind::Delete);
        }
    }

    // Directories present in both trees that hold a change, at any depth, are modified too.
    let touched_parents: BTreeSet<PathBuf> = changes
        .keys()
        .flat_map(|p| p.ancestors().skip(1))
        .filter(|p| !p.as_os_str().is_empty())
        .filter(|p| new_tree.contains_key(*p) && old_tree.contains_key(*p))
        .map(Path::to_path_buf)
        .collect();
    for parent in touched_parents {
        changes.entry(parent).or_insert(ChangeKind::Modify);
    }

    Ok(changes
        .into_iter()
        .map(|(path, kind)| Change {
            path: Path::new("/").join(path),
            kind,
        })
        .collect())
}

/// Sums the sizes of the added and modified non-directory entries of `changes` under `root`.
///
/// Hard-linked files are counted once.
pub fn changes_size(root: &Path, changes: &[Change]) -> DriverResult<u64> {
    let mut size = 0;
    let mut seen_inodes: HashSet<(u64, u64)> = HashSet::new();

    for change in changes {
        if change.kind == ChangeKind::Delete {
            continue;
        }

        let metadata = fs::symlink_metadata(root.join(change.relative_path()))?;
        if metadata.is_dir() {
            continue;
        }

        if metadata.nlink() > 1 && !seen_inodes.insert((metadata.dev(), metadata.ino())) {
            continue;
        }

        size += metadata.size();
    }

    Ok(size)
}

/// Walks `root` without following symlinks, keyed by path relative to `root`.
fn collect_tree(root: &Path) -> DriverResult<BTreeMap<PathBuf, FileInfo>> {
    let mut tree = BTreeMap::new();

    for entry in WalkDir::new(root).follow_links(false).min_depth(1) {
        let entry = entry?;
        let metadata = entry.metadata()?;
        let link = if entry.file_type().is_symlink() {
            Some(fs::read_link(entry.path())?)
        } else {
            None
        };

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(crate::DriverError::custom)?
            .to_path_buf();

        tree.insert(
            relative,
            FileInfo {
                mode: metadata.mode(),
                uid: metadata.uid(),
                gid: metadata.gid(),
                rdev: metadata.rdev(),
                size: metadata.size(),
                mtime: (metadata.mtime(), metadata.mtime_nsec()),
                link,
            },
        );
    }

    Ok(tree)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Modify => write!(f, "C"),
            ChangeKind::Add => write!(f, "A"),
            ChangeKind::Delete => write!(f, "D"),
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.path.display())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
