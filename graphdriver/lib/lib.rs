//! `graphdriver` is a pluggable layered filesystem driver for container runtimes.
//!
//! # Overview
//!
//! A container's root filesystem is a stack of layers: read-only image layers with a
//! read-write layer on top. This crate gives a runtime one interface for creating, mounting,
//! diffing and removing those layers, whatever storage technology does the stacking
//! underneath.
//!
//! # Architecture
//!
//! - **Layer store**: maps each layer id to exactly one directory under a root and persists its
//!   parent, mutability, mount label and storage options
//! - **Drivers**: implement the layer lifecycle ([`ProtoDriver`]) for one storage technology
//! - **Naive diff engine**: [`NaiveDiffDriver`] turns any lifecycle-only driver into a full
//!   [`Driver`] by mounting layers and walking their trees
//! - **Registry**: a [`Registry`] of driver constructors, populated once at startup and read-only
//!   afterwards
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use graphdriver::{CreateOpts, DiffDriver, GraphConfig, ProtoDriver, Registry};
//!
//! fn main() -> anyhow::Result<()> {
//!     let registry = Registry::with_builtin()?;
//!     let config = GraphConfig::builder()
//!         .driver("vfs")
//!         .root("/var/lib/graphdriver/vfs")
//!         .build();
//!
//!     let driver = registry.select(&config)?;
//!     driver.create("base", None, &CreateOpts::default())?;
//!     driver.create_read_write("ctr", Some("base"), &CreateOpts::with_label(""))?;
//!
//!     let rootfs = driver.get("ctr", "")?;
//!     std::fs::write(rootfs.join("hello"), "world")?;
//!     driver.put("ctr")?;
//!
//!     for change in driver.changes("ctr", Some("base"))? {
//!         println!("{change}");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Drivers
//!
//! - `vfs` - every layer is a full copy of its parent in a plain directory
//! - `dfs` - layers are managed by a FUSE filesystem through an extended-attribute control
//!   channel on its root
//!
//! # Modules
//!
//! - [`archive`] - tree diffing, tar export with whiteouts and diff application
//! - [`drivers`] - the shipped drivers
//! - [`idtools`] - uid/gid mappings for user-namespaced containers
//! - [`options`] - driver and storage option parsing
//! - [`store`] - the directory-backed layer store
//! - [`utils`] - common utilities and constants

#![warn(missing_docs)]

mod config;
mod driver;
mod error;
mod label;
mod layer;
mod naive;
mod refcount;
mod registry;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod archive;
pub mod drivers;
pub mod idtools;
pub mod options;
pub mod store;
pub mod utils;

pub use config::*;
pub use driver::*;
pub use error::*;
pub use idtools::IdMap;
pub use label::*;
pub use layer::*;
pub use naive::*;
pub use refcount::*;
pub use registry::*;
pub use store::LayerStore;
