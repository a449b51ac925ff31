//! NestedSet Core Tree Maintenance Engine
//!
//! This crate keeps trees stored in flat relational tables consistent under the
//! nested-set model: every node carries `lft`/`rgt` bounds, a depth, a parent
//! reference and a cached children count, so subtree and ancestor queries become
//! range comparisons.
//!
//! # Architecture
//!
//! - **Record agnostic**: callers implement `NestedSetNode` for their own record type
//! - **Scoped**: every comparison is restricted to one `ScopeKey` partition
//! - **Transactional**: each mutation runs as one all-or-nothing store transaction
//! - **Pluggable storage**: `TreeStore` with in-memory and libsql implementations
//!
//! # Modules
//!
//! - [`models`] - Node accessor trait, row snapshots and scope keys
//! - [`db`] - Storage contract plus `MemoryStore` and `LibsqlStore`
//! - [`operations`] - Interval planning, arena forest and integrity checks
//! - [`services`] - `NestedSetService` (create, delete, move, rebuild)

pub mod db;
pub mod models;
pub mod operations;
pub mod services;

// Re-export commonly used types
pub use models::*;
pub use operations::{MoveDirection, Violation};
pub use services::*;
