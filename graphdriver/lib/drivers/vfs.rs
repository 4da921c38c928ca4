//! A driver that stores every layer as a full copy of its parent.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    archive, idtools, normalize_parent, options, utils, validate_id, CreateOpts, Driver,
    DriverError, DriverResult, IdMap, Layer, LayerStore, MountLabeler, Mutability,
    NaiveDiffDriver, ProtoDriver, RefCounter, SelinuxLabeler, Status,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The name the vfs driver registers under.
pub const VFS_DRIVER_NAME: &str = "vfs";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A plain directory driver.
///
/// Creating a layer copies the parent's content into a fresh directory of the [`LayerStore`],
/// so `get` always returns a complete tree and `put` has nothing to unmount. The driver accepts
/// no driver options and cannot enforce size quotas.
#[derive(Debug)]
pub struct VfsDriver {
    store: LayerStore,
    refs: RefCounter,
    labeler: Arc<dyn MountLabeler>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VfsDriver {
    /// Creates a vfs driver rooted at `home`, creating `home` owned by the remapped root if
    /// it does not exist.
    pub fn new(
        home: &Path,
        options: &[String],
        uid_maps: &[IdMap],
        gid_maps: &[IdMap],
    ) -> DriverResult<Self> {
        options::reject_driver_options(VFS_DRIVER_NAME, options)?;

        let (uid, gid) = idtools::root_pair(uid_maps, gid_maps)?;
        idtools::mkdir_all_as(home, 0o700, uid, gid)?;

        tracing::info!("vfs driver rooted at {}", home.display());
        Ok(Self {
            store: LayerStore::open(home, (uid, gid))?,
            refs: RefCounter::new(),
            labeler: Arc::new(SelinuxLabeler),
        })
    }

    /// Replaces the labeler used when creating layers.
    pub fn with_labeler(mut self, labeler: Arc<dyn MountLabeler>) -> Self {
        self.labeler = labeler;
        self
    }

    /// The store holding this driver's layers.
    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    fn create_layer(
        &self,
        id: &str,
        parent: Option<&str>,
        opts: &CreateOpts,
        mutability: Mutability,
    ) -> DriverResult<()> {
        validate_id(id)?;
        options::validate_without_quota(VFS_DRIVER_NAME, opts.get_storage_opt())?;

        let parent = normalize_parent(parent);
        let parent_dir = match parent {
            Some(p) => Some(self.store.resolve(p).map_err(|e| match e {
                DriverError::LayerNotFound(_) => DriverError::ParentNotFound(p.to_string()),
                e => e,
            })?),
            None => None,
        };

        let layer = Layer::new(id, parent, mutability, opts);
        let diff_dir = self.store.allocate(&layer)?;

        if let Err(e) = self.populate(&diff_dir, parent_dir.as_deref(), opts) {
            self.store.discard(id);
            return Err(e);
        }

        tracing::info!("created {} layer {} (parent {:?})", mutability, id, parent);
        Ok(())
    }

    fn populate(
        &self,
        diff_dir: &Path,
        parent_dir: Option<&Path>,
        opts: &CreateOpts,
    ) -> DriverResult<()> {
        if let Some(parent_dir) = parent_dir {
            archive::copy_tree(parent_dir, diff_dir)?;
        }

        self.labeler.relabel(diff_dir, opts.get_mount_label(), false)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ProtoDriver for VfsDriver {
    fn name(&self) -> &str {
        VFS_DRIVER_NAME
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
        self.store.release(id)?;
        self.refs.clear(id);
        tracing::info!("removed layer {}", id);
        Ok(())
    }

    fn get(&self, id: &str, _mount_label: &str) -> DriverResult<PathBuf> {
        let dir = self.store.resolve(id)?;
        let count = self.refs.increment(id);
        tracing::debug!("get {} -> {} (refs {})", id, dir.display(), count);
        Ok(dir)
    }

    fn put(&self, id: &str) -> DriverResult<()> {
        let count = self.refs.decrement(id);
        tracing::debug!("put {} (refs {})", id, count);
        Ok(())
    }

    fn exists(&self, id: &str) -> bool {
        self.store.exists(id)
    }

    fn status(&self) -> Status {
        let mut status = Vec::new();
        if let Some(fs_name) = utils::backing_fs_name(self.store.root()) {
            status.push(("Backing Filesystem".to_string(), fs_name.to_string()));
        }

        match self.store.ids() {
            Ok(ids) => status.push(("Layers".to_string(), ids.len().to_string())),
            Err(e) => tracing::warn!("failed to count layers: {}", e),
        }

        status
    }

    fn metadata(&self, id: &str) -> DriverResult<HashMap<String, String>> {
        let layer = self.store.layer(id)?;
        let dir = self.store.resolve(id)?;

        let mut metadata = HashMap::new();
        metadata.insert("Dir".to_string(), dir.display().to_string());
        if let Some(parent) = layer.get_parent() {
            metadata.insert("Parent".to_string(), parent.clone());
        }

        Ok(metadata)
    }

    fn cleanup(&self) -> DriverResult<()> {
        tracing::debug!("vfs driver at {} has nothing to clean up", self.store.root().display());
        Ok(())
    }

    fn mount_label(&self, id: &str) -> String {
        match self.store.layer(id) {
            Ok(layer) => layer.get_mount_label().clone(),
            Err(e) => {
                tracing::debug!("no mount label for {}: {}", id, e);
                String::new()
            }
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Initializes a vfs driver wrapped with naive diff support.
pub fn init(
    home: &Path,
    options: &[String],
    uid_maps: &[IdMap],
    gid_maps: &[IdMap],
) -> DriverResult<Box<dyn Driver>> {
    let driver = VfsDriver::new(home, options, uid_maps, gid_maps)?;
    Ok(Box::new(NaiveDiffDriver::new(driver)))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt, sync::Mutex};

    use tempfile::tempdir;

    use super::*;
    use crate::StorageOptions;

    /// Records relabel calls instead of touching security attributes.
    #[derive(Debug, Default)]
    struct RecordingLabeler {
        calls: Mutex<Vec<(PathBuf, String)>>,
    }

    impl MountLabeler for RecordingLabeler {
        fn relabel(&self, path: &Path, label: &str, _shared: bool) -> DriverResult<()> {
            self.calls
                .lock()
                .map_err(|e| DriverError::custom(anyhow::anyhow!("{e}")))?
                .push((path.to_path_buf(), label.to_string()));
            Ok(())
        }
    }

    /// Fails every relabel.
    #[derive(Debug)]
    struct FailingLabeler;

    impl MountLabeler for FailingLabeler {
        fn relabel(&self, path: &Path, label: &str, _shared: bool) -> DriverResult<()> {
            Err(DriverError::Relabel {
                path: path.to_path_buf(),
                label: label.to_string(),
                source: std::io::Error::other("labeling denied"),
            })
        }
    }

    #[test_log::test]
    /// Tests that a child layer starts as a copy of its parent.
    ///
    /// ```text
    /// base/                      child/
    /// ├── bin/sh  (rwxr-xr-x)    ├── bin/sh  (rwxr-xr-x)
    /// └── etc/os-release   ────→ └── etc/os-release
    /// ```
    fn test_vfs_child_copies_parent() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let labeler = Arc::new(RecordingLabeler::default());
        let driver = VfsDriver::new(temp.path(), &[], &[], &[])?.with_labeler(labeler.clone());

        driver.create("base", None, &CreateOpts::with_label("l0"))?;
        let base = driver.get("base", "")?;
        fs::create_dir(base.join("bin"))?;
        fs::write(base.join("bin").join("sh"), "#!")?;
        fs::set_permissions(base.join("bin").join("sh"), fs::Permissions::from_mode(0o755))?;
        fs::create_dir(base.join("etc"))?;
        fs::write(base.join("etc").join("os-release"), "ID=test")?;
        driver.put("base")?;

        driver.create_read_write("child", Some("base"), &CreateOpts::with_label("l1"))?;
        let child = driver.get("child", "l1")?;
        assert_eq!(fs::read_to_string(child.join("etc").join("os-release"))?, "ID=test");
        assert_eq!(
            fs::metadata(child.join("bin").join("sh"))?.permissions().mode() & 0o777,
            0o755
        );

        let layer = driver.store().layer("child")?;
        assert!(layer.is_read_write());
        assert_eq!(layer.get_parent().as_deref(), Some("base"));
        assert!(!driver.store().layer("base")?.is_read_write());

        let calls = labeler.calls.lock().map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], (child.clone(), "l1".to_string()));

        assert_eq!(driver.mount_label("base"), "l0");
        assert_eq!(driver.mount_label("child"), "l1");
        assert_eq!(driver.mount_label("missing"), "");
        Ok(())
    }

    #[test_log::test]
    fn test_vfs_missing_parent_leaves_nothing() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let driver = VfsDriver::new(temp.path(), &[], &[], &[])?;

        let err = driver
            .create("orphan", Some("ghost"), &CreateOpts::default())
            .unwrap_err();
        assert!(matches!(err, DriverError::ParentNotFound(_)));
        assert!(!driver.exists("orphan"));
        Ok(())
    }

    #[test_log::test]
    fn test_vfs_relabel_failure_discards_layer() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let driver =
            VfsDriver::new(temp.path(), &[], &[], &[])?.with_labeler(Arc::new(FailingLabeler));

        let err = driver
            .create("labeled", None, &CreateOpts::with_label("l"))
            .unwrap_err();
        assert!(matches!(err, DriverError::Relabel { .. }));
        assert!(!driver.exists("labeled"));
        assert!(!temp.path().join("labeled").exists());
        Ok(())
    }

    #[test_log::test]
    fn test_vfs_rejects_storage_options_before_allocating() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let driver = VfsDriver::new(temp.path(), &[], &[], &[])?;

        let opts = CreateOpts::builder()
            .storage_opt(StorageOptions::from([("size".to_string(), "1x".to_string())]))
            .build();
        let err = driver.create("bad-size", None, &opts).unwrap_err();
        assert!(matches!(err, DriverError::InvalidOption { .. }));
        assert!(!driver.exists("bad-size"));
        Ok(())
    }

    #[test]
    fn test_vfs_rejects_driver_options() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let err = VfsDriver::new(temp.path(), &["vfs.quota=on".to_string()], &[], &[])
            .unwrap_err();
        assert!(err.is_unsupported());
        Ok(())
    }

    #[test_log::test]
    fn test_vfs_status_and_metadata() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let home = temp.path().join("graph").join("vfs");
        let driver = VfsDriver::new(&home, &[], &[], &[])?;
        assert!(home.is_dir());

        driver.create("base", None, &CreateOpts::default())?;
        driver.create("top", Some("base"), &CreateOpts::default())?;

        let status = driver.status();
        assert!(status.contains(&("Layers".to_string(), "2".to_string())));
        assert!(status.iter().all(|(_, v)| !v.is_empty()));

        let metadata = driver.metadata("top")?;
        assert_eq!(metadata.get("Parent").map(String::as_str), Some("base"));
        assert_eq!(
            metadata.get("Dir").map(PathBuf::from),
            Some(driver.store().diff_dir("top"))
        );
        assert!(!driver.metadata("base")?.contains_key("Parent"));
        assert!(driver.metadata("ghost").unwrap_err().is_not_found());

        driver.cleanup()?;
        driver.cleanup()?;
        Ok(())
    }
}
