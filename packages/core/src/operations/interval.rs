//! Interval Engine
//!
//! Pure arithmetic behind every nested-set mutation. Given the current bounds of
//! the operands, each planner returns the numbers the orchestrator needs: the new
//! node's bounds, the ranges that shift and by how much. Nothing here performs I/O.
//!
//! # Shifts
//!
//! A `BoundShift` moves one bound column of every node at or beyond a threshold
//! (`column >= from`). A `ShiftWindow` moves each bound independently, and only
//! when that bound lies inside the window; it is what opens and closes the gap
//! during a move.

use crate::models::{Column, NodeId, NodeRow};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where a moved node lands relative to its anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MoveDirection {
    /// Previous sibling of the anchor
    Before,
    /// Next sibling of the anchor
    After,
    /// First child of the anchor
    FirstChildOf,
    /// Last child of the anchor
    LastChildOf,
}

/// `column += delta` for every node with `column >= from`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundShift {
    pub column: Column,
    pub from: i64,
    pub delta: i64,
}

/// Each bound inside `[low, high]` moves by `delta`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub low: i64,
    pub high: i64,
    pub delta: i64,
}

impl ShiftWindow {
    pub fn contains(&self, bound: i64) -> bool {
        self.low <= bound && bound <= self.high
    }

    /// New value of one bound under this window
    pub fn apply(&self, bound: i64) -> i64 {
        if self.contains(bound) {
            bound + self.delta
        } else {
            bound
        }
    }
}

/// Placement of a new leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertPlan {
    pub lft: i64,
    pub rgt: i64,
    pub depth: i64,
    /// Shifts opening room under the parent, empty for a root-level append
    pub shifts: Vec<BoundShift>,
}

/// Removal of a node together with its whole subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePlan {
    /// Rows with `lft` in `[lft, rgt]` are removed
    pub lft: i64,
    pub rgt: i64,
    pub width: i64,
    /// Shifts closing the gap on the survivors
    pub closing: [BoundShift; 2],
}

/// Relocation of a subtree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    pub target: NodeId,
    /// Stored bounds of the moving subtree
    pub subtree_lft: i64,
    pub subtree_rgt: i64,
    pub new_parent: Option<NodeId>,
    /// Applied to `lft` and `rgt` of every subtree node
    pub move_step: i64,
    /// Applied to `depth` of every subtree node
    pub depth_change: i64,
    /// Gap opened (moving left) or closed (moving right) outside the subtree
    pub window: ShiftWindow,
}

impl MovePlan {
    /// Where one row ends up once the plan is applied
    pub fn relocate(&self, row: &NodeRow) -> NodeRow {
        let mut next = *row;
        if self.subtree_lft <= row.lft && row.lft <= self.subtree_rgt {
            next.lft += self.move_step;
            next.rgt += self.move_step;
            next.depth += self.depth_change;
            if row.id == self.target {
                next.parent_id = self.new_parent;
            }
        } else {
            next.lft = self.window.apply(row.lft);
            next.rgt = self.window.apply(row.rgt);
        }
        next
    }
}

/// Anchor lies inside the subtree of the node being moved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("node {target} cannot be moved relative to node {anchor} inside its own subtree")]
pub struct IllegalMove {
    pub target: NodeId,
    pub anchor: NodeId,
}

/// Plan a new leaf under `parent`, or appended after the last root
///
/// `last_root_rgt` is the largest `rgt` in the scope and is only consulted for a
/// root-level insert; `None` means the scope is empty.
pub fn plan_insert(parent: Option<&NodeRow>, last_root_rgt: Option<i64>) -> InsertPlan {
    match parent {
        Some(parent) => InsertPlan {
            lft: parent.rgt,
            rgt: parent.rgt + 1,
            depth: parent.depth + 1,
            shifts: vec![
                BoundShift {
                    column: Column::Rgt,
                    from: parent.rgt,
                    delta: 2,
                },
                BoundShift {
                    column: Column::Lft,
                    from: parent.rgt + 1,
                    delta: 2,
                },
            ],
        },
        None => {
            let last = last_root_rgt.unwrap_or(0);
            InsertPlan {
                lft: last + 1,
                rgt: last + 2,
                depth: 0,
                shifts: Vec::new(),
            }
        }
    }
}

/// Plan the removal of `target` and its descendants
pub fn plan_delete(target: &NodeRow) -> DeletePlan {
    let width = target.width();
    DeletePlan {
        lft: target.lft,
        rgt: target.rgt,
        width,
        closing: [
            BoundShift {
                column: Column::Rgt,
                from: target.rgt + 1,
                delta: -width,
            },
            BoundShift {
                column: Column::Lft,
                from: target.rgt + 1,
                delta: -width,
            },
        ],
    }
}

/// Plan moving `target` (with its subtree) next to or into `anchor`
///
/// Returns `Ok(None)` when the target already sits at the requested position.
pub fn plan_move(
    target: &NodeRow,
    anchor: &NodeRow,
    direction: MoveDirection,
) -> Result<Option<MovePlan>, IllegalMove> {
    if target.encloses(anchor.lft) || target.encloses(anchor.rgt) {
        return Err(IllegalMove {
            target: target.id,
            anchor: anchor.id,
        });
    }

    let (new_parent, position, depth_change) = match direction {
        MoveDirection::Before => (anchor.parent_id, anchor.lft - 1, anchor.depth - target.depth),
        MoveDirection::After => (anchor.parent_id, anchor.rgt, anchor.depth - target.depth),
        MoveDirection::FirstChildOf => {
            (Some(anchor.id), anchor.lft, anchor.depth + 1 - target.depth)
        }
        MoveDirection::LastChildOf => {
            (Some(anchor.id), anchor.rgt - 1, anchor.depth + 1 - target.depth)
        }
    };

    let width = target.width();
    let mut move_step = position - target.lft + 1;
    let window = if move_step < 0 {
        ShiftWindow {
            low: position + 1,
            high: target.lft - 1,
            delta: width,
        }
    } else if move_step > 0 {
        // the vacated width no longer sits in front of the target
        move_step -= width;
        ShiftWindow {
            low: target.rgt + 1,
            high: position,
            delta: -width,
        }
    } else {
        return Ok(None);
    };

    if window.low > window.high {
        return Ok(None);
    }

    Ok(Some(MovePlan {
        target: target.id,
        subtree_lft: target.lft,
        subtree_rgt: target.rgt,
        new_parent,
        move_step,
        depth_change,
        window,
    }))
}
