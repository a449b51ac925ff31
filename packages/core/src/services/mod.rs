//! Services
//!
//! - `NestedSetService` - create, delete, move and rebuild over a `TreeStore`
//!
//! The service sequences the pure plans from `operations` into store calls and
//! owns transaction boundaries.

pub mod error;
pub mod nested_set_service;

pub use error::{NestedSetError, NestedSetResult};
pub use nested_set_service::{NestedSetConfig, NestedSetService, RebuildScope};
