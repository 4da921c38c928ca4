//! Driver-agnostic tree diffing and diff application.
//!
//! These are the primitives the naive diff engine composes with a driver's `get`/`put`:
//!
//! - [`changes_dirs`] classifies every path of a layer against its parent
//! - [`export_changes`] serializes a change set as a tar stream with OCI whiteouts
//! - [`apply_layer`] materializes such a stream onto a layer directory
//! - [`changes_size`] measures the content a change set adds
//! - [`copy_tree`] clones a parent's content into a fresh layer

mod apply;
mod changes;
mod copy;
mod export;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use apply::*;
pub use changes::*;
pub use copy::*;
pub use export::*;
