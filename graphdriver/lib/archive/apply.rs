use std::{
    collections::HashSet,
    ffi::OsStr,
    fs,
    io::{self, Read},
    path::{Component, Path, PathBuf},
};

use nix::sys::time::TimeSpec;
use tar::Archive;

use crate::{
    utils::{self, WHITEOUT_META_PREFIX, WHITEOUT_OPAQUE, WHITEOUT_PREFIX},
    DriverError, DriverResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Unpacks a diff stream onto `dest` and returns the number of content bytes applied.
///
/// Whiteout handling follows the OCI layer format:
/// - `.wh.<name>` removes `<name>` from the same directory
/// - `.wh..wh..opq` removes every entry of its directory that this stream did not write
///
/// An entry whose type differs from what is already on disk replaces it. Directory modification
/// times from the stream are restored once unpacking is done.
///
/// Parent directories are resolved through symlinks before anything is removed. An entry whose
/// parent resolves outside `dest` fails with [`DriverError::PathEscapesRoot`] and leaves the
/// outside tree untouched.
pub fn apply_layer<R: Read>(dest: &Path, diff: R) -> DriverResult<u64> {
    let root = fs::canonicalize(dest)?;
    let mut archive = Archive::new(diff);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);
    archive.set_unpack_xattrs(false);

    let mut size = 0;
    let mut unpacked: HashSet<PathBuf> = HashSet::new();
    let mut dir_times: Vec<(PathBuf, u64)> = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let relative = sanitize(&entry.path()?)?;
        let Some(file_name) = relative.file_name().map(OsStr::to_os_string) else {
            continue;
        };

        let name = file_name.to_string_lossy().into_owned();
        let parent = relative.parent().unwrap_or_else(|| Path::new(""));

        if name.starts_with(WHITEOUT_META_PREFIX) {
            if name == WHITEOUT_OPAQUE {
                clear_opaque_dir(&root, parent, &unpacked)?;
            } else {
                tracing::debug!("ignoring whiteout metadata entry: {}", relative.display());
            }
            continue;
        }

        if let Some(original) = name.strip_prefix(WHITEOUT_PREFIX) {
            if matches!(original, "" | "." | "..") {
                return Err(DriverError::PathEscapesRoot(relative));
            }

            if let Some(dir) = resolve_dir(&root, parent)? {
                let target = dir.join(original);
                tracing::debug!("applying whiteout: {}", target.display());
                remove_path(&target)?;
            }
            continue;
        }

        let entry_type = entry.header().entry_type();
        if let Some(dir) = resolve_dir(&root, parent)? {
            let target = dir.join(&file_name);
            if let Ok(existing) = fs::symlink_metadata(&target) {
                if !(existing.is_dir() && entry_type.is_dir()) {
                    remove_path(&target)?;
                }
            }
        }

        if entry_type.is_file() {
            size += entry.header().size()?;
        }

        if entry_type.is_dir() {
            dir_times.push((dest.join(&relative), entry.header().mtime()?));
        }

        if !entry.unpack_in(dest)? {
            return Err(DriverError::PathEscapesRoot(relative));
        }

        unpacked.insert(relative);
    }

    for (dir, mtime) in dir_times.iter().rev() {
        let time = TimeSpec::new(*mtime as i64, 0);
        utils::set_times_nofollow(dir, time, time)?;
    }

    Ok(size)
}

/// Normalizes an archive path to a path relative to the layer root.
fn sanitize(path: &Path) -> DriverResult<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => clean.push(c),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(DriverError::PathEscapesRoot(path.to_path_buf()));
            }
        }
    }

    Ok(clean)
}

/// Resolves `dir` under the canonical `root` through any symlinks.
///
/// Returns `None` when `dir` does not exist or is not a directory. Fails when the resolved
/// directory lies outside `root`.
fn resolve_dir(root: &Path, dir: &Path) -> DriverResult<Option<PathBuf>> {
    match fs::canonicalize(root.join(dir)) {
        Ok(real) if real.starts_with(root) => Ok(real.is_dir().then_some(real)),
        Ok(real) => {
            tracing::warn!(
                "refusing to modify {}: resolves outside the layer to {}",
                dir.display(),
                real.display()
            );
            Err(DriverError::PathEscapesRoot(dir.to_path_buf()))
        }
        Err(e) if is_absent(&e) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn clear_opaque_dir(root: &Path, dir: &Path, unpacked: &HashSet<PathBuf>) -> DriverResult<()> {
    let Some(target) = resolve_dir(root, dir)? else {
        return Ok(());
    };

    for entry in fs::read_dir(&target)? {
        let entry = entry?;
        if !unpacked.contains(&dir.join(entry.file_name())) {
            remove_path(&entry.path())?;
        }
    }

    tracing::debug!("made directory opaque: {}", target.display());
    Ok(())
}

fn remove_path(path: &Path) -> DriverResult<()> {
    match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => utils::remove_tree(path),
        Ok(_) => Ok(fs::remove_file(path)?),
        Err(e) if is_absent(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// A missing path, or one below a component that is not a directory.
fn is_absent(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::ENOTDIR)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::os::unix::fs::{symlink, MetadataExt};

    use tar::{Builder, EntryType, Header};
    use tempfile::tempdir;

    use super::*;

    fn file_header(size: u64, mtime: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_mtime(mtime);
        header
    }

    fn dir_header(mtime: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_mtime(mtime);
        header
    }

    #[test_log::test]
    /// Tests applying a diff over existing content.
    ///
    /// ```text
    /// before                 diff                         after
    /// ├── keep.txt           ├── app/ (mtime 1000)        ├── keep.txt
    /// ├── old.txt            ├── app/main.txt             ├── app/
    /// ├── cache/             ├── .wh.old.txt              │   └── main.txt
    /// │   ├── a              ├── cache/.wh..wh..opq       └── cache/
    /// │   └── b              └── cache/fresh                  └── fresh
    /// └── app (file)
    /// ```
    fn test_apply_layer_whiteouts_and_replacements() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dest = temp.path();
        fs::write(dest.join("keep.txt"), "keep")?;
        fs::write(dest.join("old.txt"), "old")?;
        fs::create_dir(dest.join("cache"))?;
        fs::write(dest.join("cache").join("a"), "a")?;
        fs::write(dest.join("cache").join("b"), "b")?;
        fs::write(dest.join("app"), "was a file")?;

        let mut builder = Builder::new(Vec::new());
        builder.append_data(&mut dir_header(1000), "app", io::empty())?;
        builder.append_data(&mut file_header(5, 1000), "app/main.txt", &b"hello"[..])?;
        builder.append_data(&mut file_header(0, 1000), ".wh.old.txt", io::empty())?;
        builder.append_data(&mut file_header(0, 1000), "cache/.wh..wh..opq", io::empty())?;
        builder.append_data(&mut file_header(3, 1000), "cache/fresh", &b"new"[..])?;
        let bytes = builder.into_inner()?;

        let applied = apply_layer(dest, bytes.as_slice())?;
        assert_eq!(applied, 8);

        assert_eq!(fs::read_to_string(dest.join("keep.txt"))?, "keep");
        assert!(!dest.join("old.txt").exists());
        assert!(dest.join("app").is_dir());
        assert_eq!(fs::read_to_string(dest.join("app").join("main.txt"))?, "hello");
        assert!(!dest.join("cache").join("a").exists());
        assert!(!dest.join("cache").join("b").exists());
        assert_eq!(fs::read_to_string(dest.join("cache").join("fresh"))?, "new");

        assert_eq!(fs::metadata(dest.join("app"))?.mtime(), 1000);
        Ok(())
    }

    #[test_log::test]
    /// Tests that a whiteout below a symlink leading out of the layer removes nothing.
    ///
    /// ```text
    /// outside/               dest/                    diff
    /// └── victim             └── link -> outside/     └── link/.wh.victim
    /// ```
    fn test_apply_layer_whiteout_through_symlink_stays_inside() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let outside = temp.path().join("outside");
        let dest = temp.path().join("dest");
        fs::create_dir(&outside)?;
        fs::create_dir(&dest)?;
        fs::write(outside.join("victim"), "precious")?;
        symlink(&outside, dest.join("link"))?;

        let mut builder = Builder::new(Vec::new());
        builder.append_data(&mut file_header(0, 1000), "link/.wh.victim", io::empty())?;
        let bytes = builder.into_inner()?;

        let err = apply_layer(&dest, bytes.as_slice()).unwrap_err();
        assert!(matches!(err, DriverError::PathEscapesRoot(_)));
        assert_eq!(fs::read_to_string(outside.join("victim"))?, "precious");

        // An opaque marker below the same link is refused too.
        let mut builder = Builder::new(Vec::new());
        builder.append_data(&mut file_header(0, 1000), "link/.wh..wh..opq", io::empty())?;
        let bytes = builder.into_inner()?;

        let err = apply_layer(&dest, bytes.as_slice()).unwrap_err();
        assert!(matches!(err, DriverError::PathEscapesRoot(_)));
        assert!(outside.join("victim").exists());
        Ok(())
    }

    #[test_log::test]
    fn test_apply_layer_rejects_dot_whiteouts() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dest = temp.path().join("dest");
        fs::create_dir_all(dest.join("sub"))?;
        fs::write(dest.join("sub").join("sibling"), "kept")?;
        fs::write(temp.path().join("neighbor"), "kept")?;

        for name in ["sub/.wh..", "sub/.wh...", "sub/.wh."] {
            let mut builder = Builder::new(Vec::new());
            builder.append_data(&mut file_header(0, 1000), name, io::empty())?;
            let bytes = builder.into_inner()?;

            let err = apply_layer(&dest, bytes.as_slice()).unwrap_err();
            assert!(matches!(err, DriverError::PathEscapesRoot(_)), "{name}");
        }

        assert_eq!(fs::read_to_string(dest.join("sub").join("sibling"))?, "kept");
        assert_eq!(fs::read_to_string(temp.path().join("neighbor"))?, "kept");
        Ok(())
    }

    #[test_log::test]
    /// Tests that replacing an entry below a symlink leading out of the layer removes nothing.
    ///
    /// ```text
    /// outside/               dest/                    diff
    /// └── data/              └── link -> outside/     └── link/data (file)
    ///     └── keep
    /// ```
    fn test_apply_layer_replacement_through_symlink_stays_inside() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let outside = temp.path().join("outside");
        let dest = temp.path().join("dest");
        fs::create_dir_all(outside.join("data"))?;
        fs::create_dir(&dest)?;
        fs::write(outside.join("data").join("keep"), "precious")?;
        symlink(&outside, dest.join("link"))?;

        let mut builder = Builder::new(Vec::new());
        builder.append_data(&mut file_header(3, 1000), "link/data", &b"new"[..])?;
        let bytes = builder.into_inner()?;

        let err = apply_layer(&dest, bytes.as_slice()).unwrap_err();
        assert!(matches!(err, DriverError::PathEscapesRoot(_)));
        assert!(outside.join("data").is_dir());
        assert_eq!(fs::read_to_string(outside.join("data").join("keep"))?, "precious");
        Ok(())
    }

    #[test_log::test]
    /// Tests whiteouts through in-layer symlinks and below paths that are no longer directories.
    ///
    /// ```text
    /// dest/                      diff
    /// ├── usr/lib/old            ├── lib/.wh.old
    /// ├── lib -> usr/lib         └── x/.wh.y
    /// └── x (file)
    /// ```
    fn test_apply_layer_whiteouts_resolve_inside_layer() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let dest = temp.path();
        fs::create_dir_all(dest.join("usr").join("lib"))?;
        fs::write(dest.join("usr").join("lib").join("old"), "old")?;
        symlink("usr/lib", dest.join("lib"))?;
        fs::write(dest.join("x"), "now a file")?;

        let mut builder = Builder::new(Vec::new());
        builder.append_data(&mut file_header(0, 1000), "lib/.wh.old", io::empty())?;
        builder.append_data(&mut file_header(0, 1000), "x/.wh.y", io::empty())?;
        let bytes = builder.into_inner()?;

        assert_eq!(apply_layer(dest, bytes.as_slice())?, 0);
        assert!(!dest.join("usr").join("lib").join("old").exists());
        assert!(fs::symlink_metadata(dest.join("lib"))?.file_type().is_symlink());
        assert_eq!(fs::read_to_string(dest.join("x"))?, "now a file");
        Ok(())
    }

    #[test]
    fn test_sanitize_rejects_escapes() -> anyhow::Result<()> {
        assert_eq!(sanitize(Path::new("/etc/./passwd"))?, PathBuf::from("etc/passwd"));
        assert_eq!(sanitize(Path::new("./"))?, PathBuf::new());
        assert!(matches!(
            sanitize(Path::new("../outside")),
            Err(DriverError::PathEscapesRoot(_))
        ));
        assert!(matches!(
            sanitize(Path::new("a/../../b")),
            Err(DriverError::PathEscapesRoot(_))
        ));
        Ok(())
    }
}
