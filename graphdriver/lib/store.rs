//! Durable mapping from layer id to storage location and parent linkage.

use std::{
    fs, io,
    os::unix::fs::{DirBuilderExt, MetadataExt},
    path::{Path, PathBuf},
};

use nix::unistd::{chown, Gid, Uid};

use crate::{
    utils::{self, LAYER_DIFF_SUBDIR, LAYER_METADATA_FILENAME},
    validate_id, DriverError, DriverResult, Layer,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A directory-backed layer store.
///
/// Each layer owns exactly one entry directly under the root:
///
/// ```text
/// <root>/
///   <id>/
///     diff/         layer content
///     layer.json    the persisted `Layer` record
/// ```
///
/// The `<id>` entry is created with a single `mkdir(2)`, so concurrent allocations of the same
/// id are resolved by the kernel: one succeeds, every other one sees `EEXIST`.
#[derive(Debug, Clone)]
pub struct LayerStore {
    root: PathBuf,
    owner: (u32, u32),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerStore {
    /// Opens a store rooted at `root`. New layer directories are owned by `owner` (uid, gid).
    ///
    /// The root must already exist.
    pub fn open(root: impl Into<PathBuf>, owner: (u32, u32)) -> DriverResult<Self> {
        let root = root.into();
        let metadata = fs::metadata(&root)?;
        if !metadata.is_dir() {
            return Err(DriverError::NotADirectory(root));
        }

        Ok(Self { root, owner })
    }

    /// The root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The entry directory of a layer.
    pub fn layer_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// The content directory of a layer.
    pub fn diff_dir(&self, id: &str) -> PathBuf {
        self.layer_dir(id).join(LAYER_DIFF_SUBDIR)
    }

    /// Allocates storage for `layer` and persists its record.
    ///
    /// Fails with [`DriverError::LayerExists`] if the id is taken. If anything fails after the
    /// entry was claimed, the entry is removed again before the error is returned.
    pub fn allocate(&self, layer: &Layer) -> DriverResult<PathBuf> {
        validate_id(&layer.id)?;

        let layer_dir = self.layer_dir(&layer.id);
        match fs::DirBuilder::new().mode(0o700).create(&layer_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(DriverError::LayerExists(layer.id.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        match self.populate(layer, &layer_dir) {
            Ok(diff_dir) => Ok(diff_dir),
            Err(e) => {
                self.discard(&layer.id);
                Err(e)
            }
        }
    }

    /// Removes a layer's storage. Children are not touched.
    pub fn release(&self, id: &str) -> DriverResult<()> {
        validate_id(id)?;

        let layer_dir = self.layer_dir(id);
        match fs::symlink_metadata(&layer_dir) {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return Err(DriverError::NotADirectory(layer_dir)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DriverError::LayerNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        utils::remove_tree(&layer_dir)
    }

    /// Reads the persisted record of a layer.
    pub fn layer(&self, id: &str) -> DriverResult<Layer> {
        validate_id(id)?;

        let path = self.layer_dir(id).join(LAYER_METADATA_FILENAME);
        let contents = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DriverError::LayerNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&contents).map_err(|source| DriverError::CorruptMetadata {
            id: id.to_string(),
            source,
        })
    }

    /// Returns `true` only when the layer's entry is confirmed present.
    pub fn exists(&self, id: &str) -> bool {
        validate_id(id).is_ok()
            && fs::symlink_metadata(self.layer_dir(id))
                .map(|m| m.is_dir())
                .unwrap_or(false)
    }

    /// Resolves the content directory of an existing layer.
    pub fn resolve(&self, id: &str) -> DriverResult<PathBuf> {
        if !self.exists(id) {
            return Err(DriverError::LayerNotFound(id.to_string()));
        }

        let diff_dir = self.diff_dir(id);
        match fs::metadata(&diff_dir) {
            Ok(m) if m.is_dir() => Ok(diff_dir),
            Ok(_) => Err(DriverError::NotADirectory(diff_dir)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DriverError::NotADirectory(diff_dir))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the ids of all layers in the store, sorted.
    pub fn ids(&self) -> DriverResult<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str() {
                if validate_id(id).is_ok() {
                    ids.push(id.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }

    fn populate(&self, layer: &Layer, layer_dir: &Path) -> DriverResult<PathBuf> {
        let diff_dir = layer_dir.join(LAYER_DIFF_SUBDIR);
        fs::DirBuilder::new().mode(0o755).create(&diff_dir)?;
        self.chown_to_owner(layer_dir)?;
        self.chown_to_owner(&diff_dir)?;

        let record = serde_json::to_vec_pretty(layer)?;
        fs::write(layer_dir.join(LAYER_METADATA_FILENAME), record)?;

        Ok(diff_dir)
    }

    fn chown_to_owner(&self, path: &Path) -> DriverResult<()> {
        let (uid, gid) = self.owner;
        let metadata = fs::symlink_metadata(path)?;
        if metadata.uid() != uid || metadata.gid() != gid {
            chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
        }

        Ok(())
    }

    /// Best-effort removal of a half-created layer.
    pub(crate) fn discard(&self, id: &str) {
        if let Err(e) = utils::remove_tree(&self.layer_dir(id)) {
            tracing::warn!("failed to clean up partial layer {}: {}", id, e);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
