use std::{collections::HashMap, fmt, io::Read, path::PathBuf};

use crate::{archive::Change, CreateOpts, DriverResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Human readable diagnostic pairs, in display order.
pub type Status = Vec<(String, String)>;

/// Driver specific metadata about a layer.
pub type LayerMetadata = HashMap<String, String>;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The minimal layer lifecycle every storage technology implements.
///
/// Each layer id moves through `NonExistent → Created → {Mounted ⇄ Unmounted} → Removed`.
/// Operations on a removed id fail with a not-found error. Every method blocks until the
/// backing storage has finished; callers that need a timeout enforce it themselves.
///
/// Two concurrent creates of the same id must end with exactly one success and a conflict
/// error for the others. Creates of distinct ids must not interfere.
pub trait ProtoDriver: fmt::Debug + Send + Sync {
    /// The name the driver is registered under.
    fn name(&self) -> &str;

    /// Creates a read-only layer `id` on top of `parent`.
    ///
    /// ## Errors
    ///
    /// - a conflict if `id` already exists
    /// - not found if `parent` does not exist
    /// - unsupported if `opts` requests something the backing storage cannot do; in that case
    ///   nothing is allocated for `id`
    fn create(&self, id: &str, parent: Option<&str>, opts: &CreateOpts) -> DriverResult<()>;

    /// Creates a read-write layer `id` on top of `parent`. Same errors as [`Self::create`].
    fn create_read_write(
        &self,
        id: &str,
        parent: Option<&str>,
        opts: &CreateOpts,
    ) -> DriverResult<()>;

    /// Releases all storage of `id`. Does not cascade to children. Removing an id twice fails
    /// the second time with a not-found error.
    fn remove(&self, id: &str) -> DriverResult<()>;

    /// Returns the path at which the content of `id` is accessible.
    ///
    /// ## Errors
    ///
    /// - not found if `id` was never created or was removed
    /// - invalid state if the resolved path exists but is not a directory
    fn get(&self, id: &str, mount_label: &str) -> DriverResult<PathBuf>;

    /// Signals that the caller is done with the path from the last [`Self::get`].
    ///
    /// Safe to call when nothing was mounted.
    fn put(&self, id: &str) -> DriverResult<()>;

    /// Returns `true` only on confirmed presence of `id`. Never fails.
    fn exists(&self, id: &str) -> bool;

    /// Diagnostic pairs. Pairs whose value is unknown are omitted.
    fn status(&self) -> Status;

    /// Driver specific metadata for `id`. An empty map is a valid answer.
    fn metadata(&self, id: &str) -> DriverResult<LayerMetadata>;

    /// Releases process-wide resources at shutdown. Succeeds when there is nothing to release.
    fn cleanup(&self) -> DriverResult<()>;

    /// The mount label `id` was created with, used when a layer is mounted on the caller's
    /// behalf. Drivers that do not record labels return an empty label.
    fn mount_label(&self, _id: &str) -> String {
        String::new()
    }
}

/// Diff and apply operations on top of the layer lifecycle.
pub trait DiffDriver {
    /// Produces a tar stream of the changes between `id` and `parent`. With no parent the
    /// whole layer is archived.
    fn diff(&self, id: &str, parent: Option<&str>) -> DriverResult<Box<dyn Read + Send>>;

    /// Lists the changes between `id` and `parent`.
    fn changes(&self, id: &str, parent: Option<&str>) -> DriverResult<Vec<Change>>;

    /// Applies a diff stream to `id` and returns the number of content bytes applied.
    fn apply_diff(&self, id: &str, parent: Option<&str>, diff: &mut dyn Read)
        -> DriverResult<u64>;

    /// Measures how many bytes of content `id` adds on top of `parent`.
    fn diff_size(&self, id: &str, parent: Option<&str>) -> DriverResult<u64>;
}

/// A fully capable layered-storage backend.
pub trait Driver: ProtoDriver + DiffDriver {}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T> Driver for T where T: ProtoDriver + DiffDriver {}
