//! Integrity checks over one scope's rows.
//!
//! Pure validation: nothing here touches storage. Used by
//! `NestedSetService::check`, by verify-before-commit mode and by the tests.

use super::forest::{Forest, ForestError};
use crate::models::{NodeId, NodeRow};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// One broken nested-set rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Violation {
    /// `lft >= rgt`
    EmptyInterval { id: NodeId, lft: i64, rgt: i64 },
    /// `rgt != lft + 2 * descendants + 1`
    WidthMismatch {
        id: NodeId,
        expected_rgt: i64,
        actual_rgt: i64,
    },
    /// Child interval not strictly inside its parent's
    NotContained { id: NodeId, parent_id: NodeId },
    /// Two siblings whose intervals overlap or are out of order
    SiblingOverlap { first: NodeId, second: NodeId },
    DepthMismatch {
        id: NodeId,
        expected: i64,
        actual: i64,
    },
    /// Cached `children_count` disagrees with the parent pointers
    StaleChildrenCount {
        id: NodeId,
        expected: i64,
        actual: i64,
    },
    ParentCycle { node_ids: Vec<NodeId> },
}

impl Violation {
    /// Everything except a stale children count, which is only a cache
    pub fn is_structural(&self) -> bool {
        !matches!(self, Violation::StaleChildrenCount { .. })
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyInterval { id, lft, rgt } => {
                write!(f, "node {} has empty interval [{}, {}]", id, lft, rgt)
            }
            Violation::WidthMismatch {
                id,
                expected_rgt,
                actual_rgt,
            } => write!(
                f,
                "node {} has rgt {} but its descendants need rgt {}",
                id, actual_rgt, expected_rgt
            ),
            Violation::NotContained { id, parent_id } => {
                write!(f, "node {} is not inside parent {}", id, parent_id)
            }
            Violation::SiblingOverlap { first, second } => {
                write!(f, "siblings {} and {} overlap", first, second)
            }
            Violation::DepthMismatch {
                id,
                expected,
                actual,
            } => write!(f, "node {} has depth {}, expected {}", id, actual, expected),
            Violation::StaleChildrenCount {
                id,
                expected,
                actual,
            } => write!(
                f,
                "node {} caches {} children but has {}",
                id, actual, expected
            ),
            Violation::ParentCycle { node_ids } => {
                write!(f, "parent cycle through {:?}", node_ids)
            }
        }
    }
}

/// Validate a scope snapshot; an empty result means the encoding is sound
pub fn check(rows: &[NodeRow]) -> Vec<Violation> {
    let forest = Forest::build(rows);
    let mut violations = Vec::new();

    // Canonical numbering gives each reachable node's descendant count
    let canonical = match forest.number_all() {
        Ok(numbered) => numbered,
        Err(ForestError::ParentCycle { node_ids }) => {
            violations.push(Violation::ParentCycle { node_ids });
            forest.number(forest.roots(), 1, 0).unwrap_or_default()
        }
        Err(ForestError::UnknownNode(_)) => Vec::new(),
    };
    let descendants: HashMap<NodeId, i64> = canonical
        .iter()
        .map(|row| (row.id, (row.rgt - row.lft - 1) / 2))
        .collect();

    let mut ordered: Vec<&NodeRow> = rows.iter().collect();
    ordered.sort_by_key(|row| (row.lft, row.id));

    for row in ordered {
        if row.lft >= row.rgt {
            violations.push(Violation::EmptyInterval {
                id: row.id,
                lft: row.lft,
                rgt: row.rgt,
            });
        } else if let Some(&d) = descendants.get(&row.id) {
            let expected_rgt = row.lft + 2 * d + 1;
            if row.rgt != expected_rgt {
                violations.push(Violation::WidthMismatch {
                    id: row.id,
                    expected_rgt,
                    actual_rgt: row.rgt,
                });
            }
        }

        match row.parent_id.and_then(|parent| forest.get(parent)) {
            Some(parent) => {
                if !parent.contains(row) {
                    violations.push(Violation::NotContained {
                        id: row.id,
                        parent_id: parent.id,
                    });
                }
                if row.depth != parent.depth + 1 {
                    violations.push(Violation::DepthMismatch {
                        id: row.id,
                        expected: parent.depth + 1,
                        actual: row.depth,
                    });
                }
            }
            None if row.parent_id.is_none() && row.depth != 0 => {
                violations.push(Violation::DepthMismatch {
                    id: row.id,
                    expected: 0,
                    actual: row.depth,
                });
            }
            None => {}
        }

        let child_total = forest.children(row.id).len() as i64;
        if row.children_count != child_total {
            violations.push(Violation::StaleChildrenCount {
                id: row.id,
                expected: child_total,
                actual: row.children_count,
            });
        }
    }

    let sibling_groups = std::iter::once(forest.roots()).chain(
        rows.iter()
            .map(|row| forest.children(row.id))
            .filter(|kids| kids.len() > 1),
    );
    for group in sibling_groups {
        for pair in group.windows(2) {
            if let (Some(first), Some(second)) = (forest.get(pair[0]), forest.get(pair[1])) {
                if first.rgt >= second.lft {
                    violations.push(Violation::SiblingOverlap {
                        first: first.id,
                        second: second.id,
                    });
                }
            }
        }
    }

    violations
}

/// Violations of the encoding itself, ignoring stale children counts
pub fn structural(rows: &[NodeRow]) -> Vec<Violation> {
    check(rows)
        .into_iter()
        .filter(Violation::is_structural)
        .collect()
}
