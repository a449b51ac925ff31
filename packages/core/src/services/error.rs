//! Service Layer Error Types
//!
//! Errors returned by `NestedSetService`. Storage failures are wrapped unchanged;
//! everything else describes why an operation was refused or rolled back.

use crate::db::StoreError;
use crate::models::NodeId;
use crate::operations::{ForestError, IllegalMove, Violation};
use thiserror::Error;

/// Nested-set operation errors
#[derive(Error, Debug)]
pub enum NestedSetError {
    /// An operand cannot be used (unsaved bounds, scope mismatch, missing parent)
    #[error("Invalid source node: {reason}")]
    InvalidSource { reason: String },

    /// The anchor lies inside the subtree being moved
    #[error("Illegal move: node {target} cannot be placed relative to its own descendant {anchor}")]
    IllegalMove { target: NodeId, anchor: NodeId },

    /// Storage operation failed
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StoreError),

    /// Parent pointers loop, so some nodes are unreachable from any root
    #[error("Parent cycle detected through nodes {node_ids:?}")]
    ParentCycle { node_ids: Vec<NodeId> },

    /// Verify-before-commit found broken invariants; the transaction was rolled back
    #[error("Integrity check failed with {} violation(s)", violations.len())]
    IntegrityViolation { violations: Vec<Violation> },
}

impl NestedSetError {
    /// Create an invalid source error
    pub fn invalid_source(reason: impl Into<String>) -> Self {
        Self::InvalidSource {
            reason: reason.into(),
        }
    }

    /// Create an integrity violation error
    pub fn integrity_violation(violations: Vec<Violation>) -> Self {
        Self::IntegrityViolation { violations }
    }
}

impl From<IllegalMove> for NestedSetError {
    fn from(err: IllegalMove) -> Self {
        Self::IllegalMove {
            target: err.target,
            anchor: err.anchor,
        }
    }
}

impl From<ForestError> for NestedSetError {
    fn from(err: ForestError) -> Self {
        match err {
            ForestError::ParentCycle { node_ids } => Self::ParentCycle { node_ids },
            ForestError::UnknownNode(id) => {
                Self::invalid_source(format!("node {} is not in the loaded scope", id))
            }
        }
    }
}

pub type NestedSetResult<T> = Result<T, NestedSetError>;
