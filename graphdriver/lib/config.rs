//! Startup configuration for driver selection.

use std::{
    fs,
    path::{Path, PathBuf},
};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{utils::DEFAULT_GRAPH_ROOT, DriverResult, IdMap};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Which driver to run and how to initialize it.
///
/// ```toml
/// driver = "vfs"
/// root = "/var/lib/graphdriver/vfs"
/// options = []
///
/// [[uid_maps]]
/// container_id = 0
/// host_id = 100000
/// size = 65536
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct GraphConfig {
    /// The driver to use. When unset, the first usable driver in priority order is picked.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default, setter(strip_option, into))]
    pub(crate) driver: Option<String>,

    /// The driver's home directory.
    #[serde(default = "GraphConfig::default_root")]
    #[builder(default = GraphConfig::default_root(), setter(into))]
    pub(crate) root: PathBuf,

    /// `key=value` driver options.
    #[serde(default)]
    #[builder(default)]
    pub(crate) options: Vec<String>,

    /// User id mappings for user-namespaced containers.
    #[serde(default)]
    #[builder(default)]
    pub(crate) uid_maps: Vec<IdMap>,

    /// Group id mappings for user-namespaced containers.
    #[serde(default)]
    #[builder(default)]
    pub(crate) gid_maps: Vec<IdMap>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl GraphConfig {
    /// Parses a configuration from TOML.
    pub fn from_toml_str(contents: &str) -> DriverResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> DriverResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!("loaded graph config from {}", path.display());
        Ok(config)
    }

    fn default_root() -> PathBuf {
        PathBuf::from(DEFAULT_GRAPH_ROOT)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for GraphConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
