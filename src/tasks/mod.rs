//! Pending and completed task partitions and the registry views observe.

mod collection;
mod registry;

pub use collection::*;
pub use registry::*;
