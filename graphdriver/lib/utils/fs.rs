use std::{fs, io, os::unix::fs::PermissionsExt, path::Path};

use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;

use crate::DriverResult;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// `FUSE_SUPER_MAGIC` from `linux/magic.h`.
pub const FUSE_MAGIC: u64 = 0x6573_5546;

const BACKING_FS_NAMES: &[(u64, &str)] = &[
    (0x9123_683e, "btrfs"),
    (0x0000_ef53, "extfs"),
    (0x5846_5342, "xfs"),
    (0x0102_1994, "tmpfs"),
    (0x794c_7630, "overlayfs"),
    (0x2fc1_2fc1, "zfs"),
    (0x0000_6969, "nfs"),
    (0x6573_5546, "fuse"),
    (0xf2f5_2010, "f2fs"),
    (0x5265_4973, "reiserfs"),
];

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the filesystem magic number of the filesystem holding `path`.
#[cfg(target_os = "linux")]
pub fn filesystem_magic(path: &Path) -> DriverResult<u64> {
    let stat = nix::sys::statfs::statfs(path)?;
    Ok(stat.filesystem_type().0 as u64)
}

/// Returns the filesystem magic number of the filesystem holding `path`.
#[cfg(not(target_os = "linux"))]
pub fn filesystem_magic(_path: &Path) -> DriverResult<u64> {
    Err(io::Error::from(io::ErrorKind::Unsupported).into())
}

/// Returns a short name for the filesystem holding `path`, or `None` if it is not recognized.
pub fn backing_fs_name(path: &Path) -> Option<&'static str> {
    let magic = filesystem_magic(path).ok()?;
    BACKING_FS_NAMES
        .iter()
        .find(|(m, _)| *m == magic)
        .map(|(_, name)| *name)
}

/// Sets the access and modification times of `path` without following symlinks.
pub fn set_times_nofollow(path: &Path, atime: TimeSpec, mtime: TimeSpec) -> DriverResult<()> {
    utimensat(None, path, &atime, &mtime, UtimensatFlags::NoFollowSymlink)?;
    Ok(())
}

/// Removes a directory tree, first making every directory in it readable and writable so
/// restrictive modes left by layer content cannot block the removal.
pub fn remove_tree(path: &Path) -> DriverResult<()> {
    let mut dir_stack = vec![path.to_path_buf()];

    while let Some(dir) = dir_stack.pop() {
        let metadata = match fs::symlink_metadata(&dir) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        if !metadata.is_dir() {
            continue;
        }

        let mode = metadata.permissions().mode();
        if mode & 0o700 != 0o700 {
            fs::set_permissions(&dir, fs::Permissions::from_mode(mode | 0o700))?;
        }

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dir_stack.push(entry.path());
            }
        }
    }

    match fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::debug!("removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            tracing::error!("failed to remove {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
