//! Domain models for tasksync.
//!
//! # Core Concepts
//!
//! - [`NodeRef`]: Non-owning handle to a node of a host document tree.
//! - [`AttributeChangeEvent`]: What a tree reports when a node attribute is
//!   added, removed or changes value.
//! - [`Task`]: A node's due-date obligation, derived from its "Due Date" and
//!   "Completion Date" attributes. Tasks are never written directly.
//! - [`TaskChanged`]: What the task registry publishes to views.

mod change;
mod node;
mod task;

pub use change::*;
pub use node::*;
pub use task::*;
