//! Nested-Set Node Model
//!
//! This module defines the accessor contract every record type implements to take
//! part in a nested-set tree, plus the plain value types the engine passes around.
//!
//! # Architecture
//!
//! - **Static mapping**: `NestedSetNode` is implemented once per record type; the
//!   engine never introspects field names at runtime
//! - **Row snapshots**: `NodeRow` carries only the nested-set columns and is what
//!   storage backends hand back from reads
//! - **Opaque scopes**: `ScopeKey` partitions one physical table into independent
//!   trees; the engine only ever compares scopes for equality
//!
//! # Examples
//!
//! ```rust
//! use nestedset_core::models::{NestedSetNode, NodeId, ScopeKey};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Chapter {
//!     id: NodeId,
//!     course_id: i64,
//!     parent_id: Option<NodeId>,
//!     lft: i64,
//!     rgt: i64,
//!     depth: i64,
//!     children_count: i64,
//! }
//!
//! impl NestedSetNode for Chapter {
//!     fn id(&self) -> NodeId { self.id }
//!     fn set_id(&mut self, id: NodeId) { self.id = id }
//!     fn parent_id(&self) -> Option<NodeId> { self.parent_id }
//!     fn set_parent_id(&mut self, parent_id: Option<NodeId>) { self.parent_id = parent_id }
//!     fn lft(&self) -> i64 { self.lft }
//!     fn set_lft(&mut self, lft: i64) { self.lft = lft }
//!     fn rgt(&self) -> i64 { self.rgt }
//!     fn set_rgt(&mut self, rgt: i64) { self.rgt = rgt }
//!     fn depth(&self) -> i64 { self.depth }
//!     fn set_depth(&mut self, depth: i64) { self.depth = depth }
//!     fn children_count(&self) -> i64 { self.children_count }
//!     fn set_children_count(&mut self, count: i64) { self.children_count = count }
//!     fn scope(&self) -> ScopeKey { ScopeKey::new().with("course_id", self.course_id) }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a node within its table
pub type NodeId = i64;

/// Accessor contract binding a record type to the five nested-set columns
///
/// Implementations are plain field accessors. The engine reads bounds from the
/// operands it is handed and writes the computed bounds back through the setters
/// before a record is inserted.
///
/// # Thread Safety
///
/// Records cross `.await` points inside storage calls, so implementations must be
/// `Send + Sync`.
pub trait NestedSetNode: Send + Sync + 'static {
    fn id(&self) -> NodeId;
    fn set_id(&mut self, id: NodeId);

    fn parent_id(&self) -> Option<NodeId>;
    fn set_parent_id(&mut self, parent_id: Option<NodeId>);

    fn lft(&self) -> i64;
    fn set_lft(&mut self, lft: i64);

    fn rgt(&self) -> i64;
    fn set_rgt(&mut self, rgt: i64);

    fn depth(&self) -> i64;
    fn set_depth(&mut self, depth: i64);

    fn children_count(&self) -> i64;
    fn set_children_count(&mut self, count: i64);

    /// Partition this record belongs to (defaults to the single global tree)
    fn scope(&self) -> ScopeKey {
        ScopeKey::global()
    }

    /// Snapshot the nested-set columns of this record
    fn to_row(&self) -> NodeRow {
        NodeRow {
            id: self.id(),
            parent_id: self.parent_id(),
            lft: self.lft(),
            rgt: self.rgt(),
            depth: self.depth(),
            children_count: self.children_count(),
        }
    }

    /// Copy parent, bounds, depth and children count from a row (identity is kept)
    fn apply_row(&mut self, row: &NodeRow) {
        self.set_parent_id(row.parent_id);
        self.set_lft(row.lft);
        self.set_rgt(row.rgt);
        self.set_depth(row.depth);
        self.set_children_count(row.children_count);
    }
}

/// One of the integer columns maintained by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Lft,
    Rgt,
    Depth,
    ChildrenCount,
}

impl Column {
    /// Read this column from a row
    pub fn get(self, row: &NodeRow) -> i64 {
        match self {
            Column::Lft => row.lft,
            Column::Rgt => row.rgt,
            Column::Depth => row.depth,
            Column::ChildrenCount => row.children_count,
        }
    }

    /// Write this column on a row
    pub fn set(self, row: &mut NodeRow, value: i64) {
        match self {
            Column::Lft => row.lft = value,
            Column::Rgt => row.rgt = value,
            Column::Depth => row.depth = value,
            Column::ChildrenCount => row.children_count = value,
        }
    }
}

/// Snapshot of a node's nested-set columns as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRow {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub lft: i64,
    pub rgt: i64,
    pub depth: i64,
    pub children_count: i64,
}

impl NodeRow {
    /// `rgt - lft + 1`, twice the number of nodes in the subtree
    pub fn width(&self) -> i64 {
        self.rgt - self.lft + 1
    }

    /// Whether `bound` falls inside this node's closed interval
    pub fn encloses(&self, bound: i64) -> bool {
        self.lft <= bound && bound <= self.rgt
    }

    /// Strict containment of another node's interval
    pub fn contains(&self, other: &NodeRow) -> bool {
        self.lft < other.lft && other.rgt < self.rgt
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

/// Value of one scope field
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScopeValue {
    Null,
    Int(i64),
    Text(String),
}

impl From<i64> for ScopeValue {
    fn from(value: i64) -> Self {
        ScopeValue::Int(value)
    }
}

impl From<&str> for ScopeValue {
    fn from(value: &str) -> Self {
        ScopeValue::Text(value.to_string())
    }
}

impl From<String> for ScopeValue {
    fn from(value: String) -> Self {
        ScopeValue::Text(value)
    }
}

impl<T: Into<ScopeValue>> From<Option<T>> for ScopeValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ScopeValue::Null, Into::into)
    }
}

impl fmt::Display for ScopeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeValue::Null => write!(f, "null"),
            ScopeValue::Int(value) => write!(f, "{}", value),
            ScopeValue::Text(value) => write!(f, "'{}'", value),
        }
    }
}

/// Partition key selecting one independent tree inside a shared table
///
/// Fields are kept sorted by name so two keys built in a different order compare
/// equal. The engine treats a key as an opaque equality filter; only storage
/// backends look at the individual fields.
///
/// # Examples
///
/// ```rust
/// use nestedset_core::models::ScopeKey;
///
/// let a = ScopeKey::new().with("tenant", "acme").with("course_id", 7);
/// let b = ScopeKey::new().with("course_id", 7).with("tenant", "acme");
/// assert_eq!(a, b);
/// assert!(ScopeKey::global().is_global());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeKey {
    fields: Vec<(String, ScopeValue)>,
}

impl ScopeKey {
    /// An empty key (same as [`ScopeKey::global`])
    pub fn new() -> Self {
        Self::default()
    }

    /// The single unpartitioned tree
    pub fn global() -> Self {
        Self::default()
    }

    /// Add or replace one field
    pub fn with(mut self, field: impl Into<String>, value: impl Into<ScopeValue>) -> Self {
        let field = field.into();
        let value = value.into();
        match self.fields.binary_search_by(|(name, _)| name.as_str().cmp(&field)) {
            Ok(index) => self.fields[index].1 = value,
            Err(index) => self.fields.insert(index, (field, value)),
        }
        self
    }

    pub fn is_global(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields in name order
    pub fn fields(&self) -> &[(String, ScopeValue)] {
        &self.fields
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fields.is_empty() {
            return write!(f, "global");
        }
        for (index, (name, value)) in self.fields.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        Ok(())
    }
}
