//! Layer identity and the options a layer is created with.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{DriverError, DriverResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Whether a layer may be written to after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mutability {
    /// A committed image layer.
    #[serde(rename = "ro")]
    ReadOnly,

    /// A container's live filesystem.
    #[serde(rename = "rw")]
    ReadWrite,
}

/// Storage options passed at creation time. Keys and effects are driver specific.
pub type StorageOptions = BTreeMap<String, String>;

/// A layer as recorded by a layer store.
///
/// Every field is fixed at creation. Re-parenting or changing mutability is not supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Layer {
    /// The caller-assigned id.
    pub(crate) id: String,

    /// The layer this one is stacked on, `None` for a base layer.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub(crate) parent: Option<String>,

    /// Read-only or read-write.
    pub(crate) mutability: Mutability,

    /// The security label applied to the layer's storage path.
    #[serde(default)]
    pub(crate) mount_label: String,

    /// Storage options exactly as given by the caller.
    #[serde(default)]
    pub(crate) storage_options: StorageOptions,

    /// When the layer was created.
    pub(crate) created_at: DateTime<Utc>,
}

/// Options for [`ProtoDriver::create`](crate::ProtoDriver::create) and
/// [`ProtoDriver::create_read_write`](crate::ProtoDriver::create_read_write).
#[derive(Debug, Default, Clone, PartialEq, Eq, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CreateOpts {
    /// The security label for the new layer's storage path.
    #[builder(default, setter(into))]
    pub(crate) mount_label: String,

    /// Driver specific sizing or quota hints.
    #[builder(default)]
    pub(crate) storage_opt: StorageOptions,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Layer {
    /// Creates a new layer record stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        parent: Option<&str>,
        mutability: Mutability,
        opts: &CreateOpts,
    ) -> Self {
        Self {
            id: id.into(),
            parent: parent.map(str::to_string),
            mutability,
            mount_label: opts.mount_label.clone(),
            storage_options: opts.storage_opt.clone(),
            created_at: Utc::now(),
        }
    }

    /// Returns `true` if the layer was created with [`Mutability::ReadWrite`].
    pub fn is_read_write(&self) -> bool {
        self.mutability == Mutability::ReadWrite
    }
}

impl CreateOpts {
    /// Creates options carrying only a mount label.
    pub fn with_label(mount_label: impl Into<String>) -> Self {
        Self {
            mount_label: mount_label.into(),
            storage_opt: StorageOptions::new(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Checks that `id` can name a directory directly under a store root.
pub fn validate_id(id: &str) -> DriverResult<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains('/') || id.contains('\0') {
        return Err(DriverError::InvalidLayerId(id.to_string()));
    }

    Ok(())
}

/// Normalizes a parent argument: an empty id means "no parent".
pub fn normalize_parent(parent: Option<&str>) -> Option<&str> {
    parent.filter(|p| !p.is_empty())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::ReadOnly => write!(f, "ro"),
            Mutability::ReadWrite => write!(f, "rw"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
