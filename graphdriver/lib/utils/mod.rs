//! Utility functions and types.

mod conversion;
mod fs;
mod path;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use conversion::*;
pub use fs::*;
pub use path::*;
