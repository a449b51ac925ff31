//! Storage Layer
//!
//! This module defines the scoped table contract the engine mutates trees through,
//! and ships two implementations of it:
//!
//! - `MemoryStore` - in-process, transactional, scope-partitioned table
//! - `LibsqlStore` - libsql/SQLite table driven by an explicit `ColumnMap`
//!   (cargo feature `libsql`, on by default)
//!
//! # Architecture
//!
//! The engine only needs five capabilities from storage, always restricted to one
//! scope and one transaction: ordered range reads, counts, bulk conditional updates,
//! single-row inserts and range deletes. `RowFilter` and `RowUpdate` are the small
//! vocabulary those calls are expressed in; every backend must give them the
//! semantics of the in-memory evaluators defined here (`RowFilter::matches`,
//! `RowUpdate::apply`).
//!
//! # Transactions
//!
//! `TreeStore::begin` opens a transaction bound to one scope. The caller finishes it
//! with exactly one of `commit` or `rollback`; a table dropped without either is
//! rolled back by the backend.

mod error;
#[cfg(feature = "libsql")]
mod libsql_store;
mod memory_store;

pub use error::{StoreError, StoreResult};
#[cfg(feature = "libsql")]
pub use libsql_store::{ColumnMap, LibsqlConfig, LibsqlStore, SqlRecord};
pub use memory_store::MemoryStore;

use crate::models::{Column, NestedSetNode, NodeId, NodeRow, ScopeKey};
use async_trait::async_trait;

/// Row selection predicate, always evaluated inside one scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    /// Every row of the scope
    All,
    /// The row with this id
    Id(NodeId),
    /// Rows whose id is in the list (an empty list matches nothing)
    Ids(Vec<NodeId>),
    /// Direct children of a node
    ChildrenOf(NodeId),
    /// `low <= column <= high`
    Between { column: Column, low: i64, high: i64 },
    /// `column > value`
    GreaterThan { column: Column, value: i64 },
    /// `column >= value`
    AtLeast { column: Column, value: i64 },
    /// Rows matching any of the filters (an empty list matches nothing)
    Any(Vec<RowFilter>),
}

impl RowFilter {
    /// Reference evaluation of the filter against one row
    pub fn matches(&self, row: &NodeRow) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Id(id) => row.id == *id,
            RowFilter::Ids(ids) => ids.contains(&row.id),
            RowFilter::ChildrenOf(parent) => row.parent_id == Some(*parent),
            RowFilter::Between { column, low, high } => {
                let value = column.get(row);
                *low <= value && value <= *high
            }
            RowFilter::GreaterThan { column, value } => column.get(row) > *value,
            RowFilter::AtLeast { column, value } => column.get(row) >= *value,
            RowFilter::Any(filters) => filters.iter().any(|filter| filter.matches(row)),
        }
    }
}

/// One column assignment inside a bulk update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChange {
    /// `column = column + delta`
    Shift { column: Column, delta: i64 },
    /// `column = column + delta` only when `low <= column <= high`
    ShiftWithin {
        column: Column,
        low: i64,
        high: i64,
        delta: i64,
    },
    /// `column = value`
    Set { column: Column, value: i64 },
    /// `parent_id = value`
    SetParent(Option<NodeId>),
}

/// Bulk update applied to every row selected by a `RowFilter`
///
/// Like SQL `SET`, every change reads the row as it was before the update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowUpdate {
    changes: Vec<ColumnChange>,
}

impl RowUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shift(mut self, column: Column, delta: i64) -> Self {
        self.changes.push(ColumnChange::Shift { column, delta });
        self
    }

    pub fn shift_within(mut self, column: Column, low: i64, high: i64, delta: i64) -> Self {
        self.changes.push(ColumnChange::ShiftWithin {
            column,
            low,
            high,
            delta,
        });
        self
    }

    pub fn set(mut self, column: Column, value: i64) -> Self {
        self.changes.push(ColumnChange::Set { column, value });
        self
    }

    pub fn set_parent(mut self, parent_id: Option<NodeId>) -> Self {
        self.changes.push(ColumnChange::SetParent(parent_id));
        self
    }

    pub fn changes(&self) -> &[ColumnChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Reference evaluation of the update against one row
    pub fn apply(&self, row: &NodeRow) -> NodeRow {
        let mut next = *row;
        for change in &self.changes {
            match *change {
                ColumnChange::Shift { column, delta } => {
                    column.set(&mut next, column.get(row) + delta)
                }
                ColumnChange::ShiftWithin {
                    column,
                    low,
                    high,
                    delta,
                } => {
                    let value = column.get(row);
                    if low <= value && value <= high {
                        column.set(&mut next, value + delta);
                    }
                }
                ColumnChange::Set { column, value } => column.set(&mut next, value),
                ColumnChange::SetParent(parent_id) => next.parent_id = parent_id,
            }
        }
        next
    }
}

/// One open transaction over one scope of a nested-set table
///
/// All reads, counts and writes are implicitly restricted to `scope()`.
#[async_trait]
pub trait ScopedTable<N: NestedSetNode>: Send {
    /// Scope every call of this handle is restricted to
    fn scope(&self) -> &ScopeKey;

    /// Rows matching `filter`, ordered by `lft` then id
    async fn read(&mut self, filter: &RowFilter) -> StoreResult<Vec<NodeRow>>;

    /// Number of rows matching `filter`
    async fn count(&mut self, filter: &RowFilter) -> StoreResult<u64>;

    /// Apply `update` to every row matching `filter`, returning the affected count
    async fn update(&mut self, filter: &RowFilter, update: &RowUpdate) -> StoreResult<u64>;

    /// Largest `rgt` in the scope, `None` when the scope is empty
    async fn max_rgt(&mut self) -> StoreResult<Option<i64>>;

    /// Insert a record, returning its id (assigned by the store when `id() == 0`)
    async fn insert(&mut self, node: &N) -> StoreResult<NodeId>;

    /// Delete every row matching `filter`, returning the removed count
    async fn delete(&mut self, filter: &RowFilter) -> StoreResult<u64>;

    /// Make every write of this transaction visible
    async fn commit(&mut self) -> StoreResult<()>;

    /// Discard every write of this transaction
    async fn rollback(&mut self) -> StoreResult<()>;
}

/// Factory for scoped transactions plus non-transactional snapshot reads
#[async_trait]
pub trait TreeStore<N: NestedSetNode>: Send + Sync {
    /// Open a transaction bound to `scope`
    ///
    /// Two transactions on the same scope never overlap; the second waits until
    /// the first is finished.
    async fn begin(&self, scope: &ScopeKey) -> StoreResult<Box<dyn ScopedTable<N>>>;

    /// Committed rows of `scope` matching `filter`, ordered by `lft` then id
    async fn read(&self, scope: &ScopeKey, filter: &RowFilter) -> StoreResult<Vec<NodeRow>>;
}
