use std::{
    collections::HashMap,
    fs,
    os::unix::fs::{lchown, FileTypeExt, MetadataExt, PermissionsExt},
    path::{Path, PathBuf},
};

use nix::{
    sys::{
        stat::{mknod, Mode, SFlag},
        time::TimeSpec,
    },
    unistd,
};
use walkdir::WalkDir;

use crate::{utils, DriverError, DriverResult};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Copies the contents of `source_dir` into the existing directory `dest_dir`.
///
/// Preserves file types (directories, regular files, symlinks, FIFOs, device nodes), hard links
/// within the tree, permission bits, ownership where the caller may set it, and access and
/// modification times. The attributes of `source_dir` itself are applied to `dest_dir`, so a
/// copied layer compares as unchanged against its source.
pub fn copy_tree(source_dir: &Path, dest_dir: &Path) -> DriverResult<()> {
    // (target, source metadata) in walk order; attributes are applied in reverse afterwards.
    let mut copied: Vec<(PathBuf, fs::Metadata)> = Vec::new();
    let mut links: HashMap<(u64, u64), PathBuf> = HashMap::new();

    for entry in WalkDir::new(source_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry?;
        let source_path = entry.path();
        let relative = source_path
            .strip_prefix(source_dir)
            .map_err(DriverError::custom)?;
        let target_path = dest_dir.join(relative);
        let metadata = entry.metadata()?;
        let file_type = metadata.file_type();

        if entry.depth() == 0 {
            copied.push((target_path, metadata));
            continue;
        }

        if file_type.is_dir() {
            tracing::debug!("creating directory: {}", target_path.display());
            fs::create_dir(&target_path)?;
        } else if file_type.is_file() {
            if metadata.nlink() > 1 {
                if let Some(first) = links.get(&(metadata.dev(), metadata.ino())) {
                    tracing::debug!(
                        "linking file: {} -> {}",
                        target_path.display(),
                        first.display()
                    );
                    fs::hard_link(first, &target_path)?;
                    continue;
                }
                links.insert((metadata.dev(), metadata.ino()), target_path.clone());
            }

            tracing::debug!(
                "copying file: {} -> {}",
                source_path.display(),
                target_path.display()
            );
            fs::copy(source_path, &target_path)?;
        } else if file_type.is_symlink() {
            let link_target = fs::read_link(source_path)?;
            tracing::debug!(
                "creating symlink: {} -> {}",
                target_path.display(),
                link_target.display()
            );
            std::os::unix::fs::symlink(&link_target, &target_path)?;
        } else if file_type.is_fifo() {
            tracing::debug!("creating fifo: {}", target_path.display());
            unistd::mkfifo(
                &target_path,
                Mode::from_bits_truncate(metadata.mode() & 0o7777),
            )?;
        } else if file_type.is_char_device() || file_type.is_block_device() {
            tracing::debug!("creating device node: {}", target_path.display());
            let kind = if file_type.is_char_device() {
                SFlag::S_IFCHR
            } else {
                SFlag::S_IFBLK
            };
            mknod(
                &target_path,
                kind,
                Mode::from_bits_truncate(metadata.mode() & 0o7777),
                metadata.rdev(),
            )?;
        } else {
            tracing::warn!("skipping socket: {}", source_path.display());
            continue;
        }

        copied.push((target_path, metadata));
    }

    // Children come after their parent in walk order, so reversing applies directory modes and
    // times only once nothing more is written inside them.
    for (target_path, metadata) in copied.iter().rev() {
        apply_attributes(target_path, metadata)?;
    }

    Ok(())
}

fn apply_attributes(target_path: &Path, metadata: &fs::Metadata) -> DriverResult<()> {
    let current = fs::symlink_metadata(target_path)?;
    if current.uid() != metadata.uid() || current.gid() != metadata.gid() {
        lchown(target_path, Some(metadata.uid()), Some(metadata.gid()))?;
    }

    if !metadata.file_type().is_symlink() {
        let mode = metadata.permissions().mode() & 0o7777;
        fs::set_permissions(target_path, fs::Permissions::from_mode(mode))?;
        tracing::trace!(
            "applied mode to {}: {} ({:#o})",
            target_path.display(),
            utils::format_mode(mode),
            mode
        );
    }

    utils::set_times_nofollow(
        target_path,
        TimeSpec::new(metadata.atime(), metadata.atime_nsec()),
        TimeSpec::new(metadata.mtime(), metadata.mtime_nsec()),
    )
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
