//! Keeps due-dated tasks in sync with the attributes of mind-map nodes.
//!
//! Tasks are not stored anywhere. A node becomes a task when it carries a
//! "Due Date" attribute, and it counts as completed while it also carries a
//! "Completion Date". The [`sync::AttributeSyncBridge`] listens to a tree's
//! attribute notifications and keeps the [`tasks::TaskRegistry`] in step; the
//! [`scheduler::RefreshScheduler`] tells views when a new day has started.

pub mod api;
pub mod config;
pub mod due_date;
pub mod engine;
pub mod error;
pub mod models;
pub mod scheduler;
pub mod sync;
pub mod tasks;
pub mod tree;
pub mod workspace;
