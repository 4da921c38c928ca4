//! Name to constructor mapping used to pick a driver at startup.

use std::{collections::BTreeMap, fmt, path::Path};

use crate::{
    drivers::{dfs, vfs, DFS_DRIVER_NAME, VFS_DRIVER_NAME},
    Driver, DriverError, DriverResult, GraphConfig, IdMap,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A driver constructor.
///
/// Receives the driver's home directory, its `key=value` options and the uid/gid mappings. A
/// constructor must either return a fully usable driver or fail; host support problems are
/// reported as unsupported errors so selection can fall back to another driver.
pub type InitFn = fn(
    home: &Path,
    options: &[String],
    uid_maps: &[IdMap],
    gid_maps: &[IdMap],
) -> DriverResult<Box<dyn Driver>>;

/// Collects driver constructors during initialization.
#[derive(Default)]
pub struct RegistryBuilder {
    drivers: BTreeMap<String, InitFn>,
    priority: Vec<String>,
}

/// An immutable table of driver constructors.
///
/// Built once with [`RegistryBuilder`] and only read afterwards, so lookups from any number of
/// threads need no locking.
pub struct Registry {
    drivers: BTreeMap<String, InitFn>,
    priority: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `init` under `name`.
    ///
    /// Registering the same name twice is a programming error and fails with
    /// [`DriverError::DuplicateDriver`].
    pub fn register(mut self, name: impl Into<String>, init: InitFn) -> DriverResult<Self> {
        let name = name.into();
        if self.drivers.contains_key(&name) {
            return Err(DriverError::DuplicateDriver(name));
        }

        tracing::debug!("registered driver {}", name);
        self.drivers.insert(name, init);
        Ok(self)
    }

    /// Sets the order in which [`Registry::select`] tries drivers when none is configured.
    pub fn priority<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.priority = names.into_iter().map(Into::into).collect();
        self
    }

    /// Freezes the registered constructors.
    pub fn build(self) -> Registry {
        Registry {
            drivers: self.drivers,
            priority: self.priority,
        }
    }
}

impl Registry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A registry with the drivers shipped by this crate, preferring `dfs` over `vfs`.
    pub fn with_builtin() -> DriverResult<Self> {
        Ok(Self::builder()
            .register(DFS_DRIVER_NAME, dfs::init)?
            .register(VFS_DRIVER_NAME, vfs::init)?
            .priority([DFS_DRIVER_NAME, VFS_DRIVER_NAME])
            .build())
    }

    /// Constructs the driver registered under `name`.
    pub fn get(
        &self,
        name: &str,
        home: &Path,
        options: &[String],
        uid_maps: &[IdMap],
        gid_maps: &[IdMap],
    ) -> DriverResult<Box<dyn Driver>> {
        let init = self
            .drivers
            .get(name)
            .ok_or_else(|| DriverError::DriverNotFound(name.to_string()))?;

        tracing::debug!("initializing driver {} at {}", name, home.display());
        init(home, options, uid_maps, gid_maps)
    }

    /// Constructs the driver named in `config`, or the first usable one in priority order.
    ///
    /// While falling back, unregistered names and drivers that report missing host support are
    /// skipped. Any other error stops the selection.
    pub fn select(&self, config: &GraphConfig) -> DriverResult<Box<dyn Driver>> {
        let home = config.get_root();
        let options = config.get_options();
        let uid_maps = config.get_uid_maps();
        let gid_maps = config.get_gid_maps();

        if let Some(name) = config.get_driver() {
            return self.get(name, home, options, uid_maps, gid_maps);
        }

        for name in self.priority.iter().filter(|n| self.contains(n)) {
            match self.get(name, home, options, uid_maps, gid_maps) {
                Ok(driver) => {
                    tracing::info!("selected driver {}", name);
                    return Ok(driver);
                }
                Err(e) if e.is_unsupported() => {
                    tracing::debug!("skipping driver {}: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(DriverError::NoSupportedDriver)
    }

    /// The registered driver names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.drivers.keys().map(String::as_str).collect()
    }

    /// The fallback order used by [`Registry::select`].
    pub fn priority(&self) -> &[String] {
        &self.priority
    }

    /// Returns `true` if a driver is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Debug for RegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryBuilder")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("priority", &self.priority)
            .finish()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("drivers", &self.drivers.keys().collect::<Vec<_>>())
            .field("priority", &self.priority)
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
