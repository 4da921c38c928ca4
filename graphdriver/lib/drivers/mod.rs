//! The storage drivers that ship with the crate.

pub mod dfs;
pub mod vfs;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use dfs::{DfsDriver, DFS_DRIVER_NAME};
pub use vfs::{VfsDriver, VFS_DRIVER_NAME};
