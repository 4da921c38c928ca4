//! Diff support for drivers that only implement the layer lifecycle.

use std::{
    collections::HashMap,
    io::{Read, Seek, SeekFrom},
    path::PathBuf,
};

use scopeguard::ScopeGuard;

use crate::{
    archive::{self, Change},
    normalize_parent, CreateOpts, DiffDriver, DriverResult, ProtoDriver, Status,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Adds diff and apply operations to a [`ProtoDriver`] by mounting layers through `get` and
/// walking their directories.
///
/// Every layer mounted by a diff operation is released with `put` before the operation returns,
/// whether it succeeded or not.
#[derive(Debug)]
pub struct NaiveDiffDriver<D> {
    driver: D,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<D: ProtoDriver> NaiveDiffDriver<D> {
    /// Wraps `driver`.
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    /// The wrapped driver.
    pub fn inner(&self) -> &D {
        &self.driver
    }

    /// Mounts `id` with its own mount label and returns its path guarded by a matching `put`.
    fn mount<'a>(
        &'a self,
        id: &'a str,
    ) -> DriverResult<ScopeGuard<PathBuf, impl FnOnce(PathBuf) + 'a>> {
        let path = self.driver.get(id, &self.driver.mount_label(id))?;
        Ok(scopeguard::guard(path, move |_| {
            if let Err(e) = self.driver.put(id) {
                tracing::warn!("failed to release layer {}: {}", id, e);
            }
        }))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<D: ProtoDriver> ProtoDriver for NaiveDiffDriver<D> {
    fn name(&self) -> &str {
        self.driver.name()
    }

    fn create(&self, id: &str, parent: Option<&str>, opts: &CreateOpts) -> DriverResult<()> {
        self.driver.create(id, parent, opts)
    }

    fn create_read_write(
        &self,
        id: &str,
        parent: Option<&str>,
        opts: &CreateOpts,
    ) -> DriverResult<()> {
        self.driver.create_read_write(id, parent, opts)
    }

    fn remove(&self, id: &str) -> DriverResult<()> {
        self.driver.remove(id)
    }

    fn get(&self, id: &str, mount_label: &str) -> DriverResult<PathBuf> {
        self.driver.get(id, mount_label)
    }

    fn put(&self, id: &str) -> DriverResult<()> {
        self.driver.put(id)
    }

    fn exists(&self, id: &str) -> bool {
        self.driver.exists(id)
    }

    fn status(&self) -> Status {
        self.driver.status()
    }

    fn metadata(&self, id: &str) -> DriverResult<HashMap<String, String>> {
        self.driver.metadata(id)
    }

    fn cleanup(&self) -> DriverResult<()> {
        self.driver.cleanup()
    }

    fn mount_label(&self, id: &str) -> String {
        self.driver.mount_label(id)
    }
}

impl<D: ProtoDriver> DiffDriver for NaiveDiffDriver<D> {
    fn diff(&self, id: &str, parent: Option<&str>) -> DriverResult<Box<dyn Read + Send>> {
        let parent = normalize_parent(parent);
        let layer_dir = self.mount(id)?;
        let parent_dir = parent.map(|p| self.mount(p)).transpose()?;

        let changes =
            archive::changes_dirs(&layer_dir, parent_dir.as_ref().map(|d| d.as_path()))?;

        // Spool to an unnamed file so both layers can be released before the caller reads.
        let mut spool = archive::export_changes(&layer_dir, &changes, tempfile::tempfile()?)?;
        spool.seek(SeekFrom::Start(0))?;

        tracing::debug!(
            "exported diff of {} against {:?}: {} changes",
            id,
            parent,
            changes.len()
        );
        Ok(Box::new(spool))
    }

    fn changes(&self, id: &str, parent: Option<&str>) -> DriverResult<Vec<Change>> {
        let layer_dir = self.mount(id)?;
        let parent_dir = normalize_parent(parent)
            .map(|p| self.mount(p))
            .transpose()?;

        archive::changes_dirs(&layer_dir, parent_dir.as_ref().map(|d| d.as_path()))
    }

    fn apply_diff(
        &self,
        id: &str,
        parent: Option<&str>,
        diff: &mut dyn Read,
    ) -> DriverResult<u64> {
        let layer_dir = self.mount(id)?;
        let size = archive::apply_layer(&layer_dir, diff)?;

        tracing::info!(
            "applied diff to {} (parent {:?}): {} bytes",
            id,
            normalize_parent(parent),
            size
        );
        Ok(size)
    }

    fn diff_size(&self, id: &str, parent: Option<&str>) -> DriverResult<u64> {
        let changes = self.changes(id, parent)?;
        let layer_dir = self.mount(id)?;
        archive::changes_size(&layer_dir, &changes)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
