//! Data Models
//!
//! This module contains the data structures shared by every layer of the engine:
//!
//! - `NestedSetNode` - Accessor contract implemented once per record type
//! - `NodeRow` - Snapshot of the nested-set columns of one stored node
//! - `ScopeKey` - Opaque partition key selecting one tree inside a table

mod node;

pub use node::{Column, NestedSetNode, NodeId, NodeRow, ScopeKey, ScopeValue};
