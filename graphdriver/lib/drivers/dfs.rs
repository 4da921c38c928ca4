//! A driver for a distributed layered filesystem mounted through FUSE.
//!
//! The filesystem manages layers itself and exposes a control channel through extended
//! attributes on its root directory:
//!
//! - setting attribute `<id>` with value `<parent>` creates layer `<id>`; the `setxattr(2)`
//!   flags argument carries `0` for a read-only layer and `1` for a read-write one
//! - removing attribute `<id>` removes the layer
//! - the layer's content appears at `<home>/<id>`
//!
//! `user.dfs.build_version` and `user.dfs.library_version` on the root report the versions of
//! the filesystem and its library.

use std::{
    collections::HashMap,
    ffi::CString,
    fs, io,
    os::unix::ffi::OsStrExt,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    idtools, normalize_parent, options, utils, validate_id, CreateOpts, Driver, DriverError,
    DriverResult, IdMap, MountLabeler, Mutability, NaiveDiffDriver, ProtoDriver, SelinuxLabeler,
    Status,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name the dfs driver registers under.
pub const DFS_DRIVER_NAME: &str = "dfs";

/// Attribute on the filesystem root carrying the build version.
pub const BUILD_VERSION_XATTR: &str = "user.dfs.build_version";

/// Attribute on the filesystem root carrying the library version.
pub const LIBRARY_VERSION_XATTR: &str = "user.dfs.library_version";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Driver for layers managed by the dfs filesystem.
#[derive(Debug)]
pub struct DfsDriver {
    home: PathBuf,
    labeler: Arc<dyn MountLabeler>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DfsDriver {
    /// Creates a dfs driver for the filesystem mounted at `home`.
    ///
    /// Fails with [`DriverError::DriverNotSupported`] unless `home` is a FUSE mount.
    pub fn new(
        home: &Path,
        options: &[String],
        uid_maps: &[IdMap],
        gid_maps: &[IdMap],
    ) -> DriverResult<Self> {
        options::reject_driver_options(DFS_DRIVER_NAME, options)?;
        let (uid, gid) = idtools::root_pair(uid_maps, gid_maps)?;

        let not_supported = |reason: String| DriverError::DriverNotSupported {
            driver: DFS_DRIVER_NAME.to_string(),
            reason,
        };

        let magic = utils::filesystem_magic(home)
            .map_err(|e| not_supported(format!("cannot stat {}: {}", home.display(), e)))?;
        if magic != utils::FUSE_MAGIC {
            return Err(not_supported(format!(
                "{} is not a FUSE mount (magic {:#x})",
                home.display(),
                magic
            )));
        }

        idtools::mkdir_all_as(home, 0o700, uid, gid)?;

        tracing::info!("dfs driver using filesystem at {}", home.display());
        Ok(Self {
            home: home.to_path_buf(),
            labeler: Arc::new(SelinuxLabeler),
        })
    }

    /// Replaces the labeler used when creating layers.
    pub fn with_labeler(mut self, labeler: Arc<dyn MountLabeler>) -> Self {
        self.labeler = labeler;
        self
    }

    fn layer_dir(&self, id: &str) -> PathBuf {
        self.home.join(id)
    }

    fn create_layer(
        &self,
        id: &str,
        parent: Option<&str>,
        opts: &CreateOpts,
        mutability: Mutability,
    ) -> DriverResult<()> {
        validate_id(id)?;
        options::validate_without_quota(DFS_DRIVER_NAME, opts.get_storage_opt())?;

        let parent = normalize_parent(parent);
        let flags = match mutability {
            Mutability::ReadOnly => 0,
            Mutability::ReadWrite => 1,
        };

        set_control_xattr(&self.home, id, parent.unwrap_or_default(), flags).map_err(|e| {
            match e.raw_os_error() {
                Some(libc::EEXIST) => DriverError::LayerExists(id.to_string()),
                Some(libc::ENOENT) if parent.is_some() => {
                    DriverError::ParentNotFound(parent.unwrap_or_default().to_string())
                }
                _ => e.into(),
            }
        })?;

        let dir = self.layer_dir(id);
        if let Err(e) = self.labeler.relabel(&dir, opts.get_mount_label(), false) {
            if let Err(cleanup) = xattr::remove(&self.home, id) {
                tracing::warn!("failed to remove layer {} after relabel error: {}", id, cleanup);
            }
            return Err(e);
        }

        tracing::info!("created {} layer {} (parent {:?})", mutability, id, parent);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ProtoDriver for DfsDriver {
    fn name(&self) -> &str {
        DFS_DRIVER_NAME
    }

    fn create(&self, id: &str, parent: Option<&str>, opts: &CreateOpts) -> DriverResult<()> {
        self.create_layer(id, parent, opts, Mutability::ReadOnly)
    }

    fn create_read_write(
        &self,
        id: &str,
        parent: Option<&str>,
        opts: &CreateOpts,
    ) -> DriverResult<()> {
        self.create_layer(id, parent, opts, Mutability::ReadWrite)
    }

    fn remove(&self, id: &str) -> DriverResult<()> {
        validate_id(id)?;
        xattr::remove(&self.home, id).map_err(|e| match e.raw_os_error() {
            Some(libc::ENOENT) | Some(libc::ENODATA) => DriverError::LayerNotFound(id.to_string()),
            _ => e.into(),
        })?;

        tracing::info!("removed layer {}", id);
        Ok(())
    }

    fn get(&self, id: &str, _mount_label: &str) -> DriverResult<PathBuf> {
        validate_id(id)?;
        let dir = self.layer_dir(id);
        match fs::metadata(&dir) {
            Ok(m) if m.is_dir() => Ok(dir),
            Ok(_) => Err(DriverError::NotADirectory(dir)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DriverError::LayerNotFound(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, id: &str) -> DriverResult<()> {
        if let Err(e) = xattr::get(&self.home, id) {
            tracing::warn!("probe of layer {} on put failed: {}", id, e);
        }
        Ok(())
    }

    fn exists(&self, id: &str) -> bool {
        validate_id(id).is_ok() && fs::metadata(self.layer_dir(id)).is_ok()
    }

    fn status(&self) -> Status {
        let mut status = Vec::new();
        if let Some(version) = read_version(&self.home, BUILD_VERSION_XATTR) {
            status.push(("Build Version".to_string(), version));
        }
        if let Some(version) = read_version(&self.home, LIBRARY_VERSION_XATTR) {
            status.push(("Library Version".to_string(), version));
        }
        status
    }

    fn metadata(&self, id: &str) -> DriverResult<HashMap<String, String>> {
        validate_id(id)?;
        Ok(HashMap::new())
    }

    fn cleanup(&self) -> DriverResult<()> {
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes a dfs driver wrapped with naive diff support.
pub fn init(
    home: &Path,
    options: &[String],
    uid_maps: &[IdMap],
    gid_maps: &[IdMap],
) -> DriverResult<Box<dyn Driver>> {
    let driver = DfsDriver::new(home, options, uid_maps, gid_maps)?;
    Ok(Box::new(NaiveDiffDriver::new(driver)))
}

/// Sets a control attribute with an explicit `setxattr(2)` flags value.
fn set_control_xattr(home: &Path, name: &str, value: &str, flags: libc::c_int) -> io::Result<()> {
    let path = CString::new(home.as_os_str().as_bytes())?;
    let name = CString::new(name)?;

    // SAFETY: both strings are NUL terminated and outlive the call, and `value` is passed with
    // its exact length.
    let ret = unsafe {
        libc::setxattr(
            path.as_ptr(),
            name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            flags,
        )
    };

    if ret != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

/// Reads a version attribute. Missing, empty or unreadable values are `None`.
fn read_version(home: &Path, attr: &str) -> Option<String> {
    let value = match xattr::get(home, attr) {
        Ok(value) => value?,
        Err(e) => {
            tracing::debug!("cannot read {} on {}: {}", attr, home.display(), e);
            return None;
        }
    };

    let version = String::from_utf8_lossy(&value)
        .trim_end_matches('\0')
        .trim()
        .to_string();
    (!version.is_empty()).then_some(version)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
