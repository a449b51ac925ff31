//! Arena Forest
//!
//! In-memory model used by rebuild. The forest is built from parent pointers alone
//! and stored as flat maps (id → row, parent id → ordered child ids) so that no
//! node owns another. It lives for one rebuild call and is then dropped.
//!
//! Sibling order is the stored `lft` order (ties broken by id). Numbering fixes
//! bounds, depth and children counts; it never reorders siblings.

use crate::models::{NodeId, NodeRow};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Topology problems found while walking parent pointers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForestError {
    #[error("parent pointers form a cycle through nodes {node_ids:?}")]
    ParentCycle { node_ids: Vec<NodeId> },

    #[error("node {0} is not part of the loaded forest")]
    UnknownNode(NodeId),
}

/// Parent-pointer forest over one scope (or part of one)
#[derive(Debug, Default)]
pub struct Forest {
    nodes: HashMap<NodeId, NodeRow>,
    children: HashMap<NodeId, Vec<NodeId>>,
    roots: Vec<NodeId>,
}

enum Visit {
    Enter { id: NodeId, depth: i64 },
    Leave { id: NodeId },
}

impl Forest {
    /// Build the forest from loaded rows
    ///
    /// A row whose parent is absent, or not among `rows`, becomes a root.
    pub fn build(rows: &[NodeRow]) -> Self {
        let mut ordered: Vec<&NodeRow> = rows.iter().collect();
        ordered.sort_by_key(|row| (row.lft, row.id));

        let nodes: HashMap<NodeId, NodeRow> = rows.iter().map(|row| (row.id, *row)).collect();
        let mut children: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut roots = Vec::new();

        for row in ordered {
            match row.parent_id.filter(|parent| nodes.contains_key(parent)) {
                Some(parent) => children.entry(parent).or_default().push(row.id),
                None => roots.push(row.id),
            }
        }

        Self {
            nodes,
            children,
            roots,
        }
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeRow> {
        self.nodes.get(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Canonical numbering of every tree below `roots`, in pre-order
    ///
    /// The first root gets `lft = start_lft`; roots get `depth = base_depth`.
    /// The walk uses an explicit stack, so depth is bounded only by memory.
    pub fn number(
        &self,
        roots: &[NodeId],
        start_lft: i64,
        base_depth: i64,
    ) -> Result<Vec<NodeRow>, ForestError> {
        let mut numbered: Vec<NodeRow> = Vec::with_capacity(self.nodes.len());
        let mut slot: HashMap<NodeId, usize> = HashMap::new();
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut counter = start_lft - 1;

        let mut stack: Vec<Visit> = roots
            .iter()
            .rev()
            .map(|&id| Visit::Enter {
                id,
                depth: base_depth,
            })
            .collect();

        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter { id, depth } => {
                    let stored = self.nodes.get(&id).ok_or(ForestError::UnknownNode(id))?;
                    if !visited.insert(id) {
                        return Err(ForestError::ParentCycle { node_ids: vec![id] });
                    }

                    counter += 1;
                    let kids = self.children(id);
                    let mut row = *stored;
                    row.lft = counter;
                    row.depth = depth;
                    row.children_count = kids.len() as i64;

                    slot.insert(id, numbered.len());
                    numbered.push(row);

                    stack.push(Visit::Leave { id });
                    for &kid in kids.iter().rev() {
                        stack.push(Visit::Enter {
                            id: kid,
                            depth: depth + 1,
                        });
                    }
                }
                Visit::Leave { id } => {
                    counter += 1;
                    if let Some(&index) = slot.get(&id) {
                        numbered[index].rgt = counter;
                    }
                }
            }
        }

        Ok(numbered)
    }

    /// Canonical numbering of the whole forest starting at `lft = 1`, depth 0
    ///
    /// Fails with `ParentCycle` when some nodes cannot be reached from any root.
    pub fn number_all(&self) -> Result<Vec<NodeRow>, ForestError> {
        let numbered = self.number(&self.roots, 1, 0)?;
        let unreachable = self.unreachable(&numbered);
        if !unreachable.is_empty() {
            return Err(ForestError::ParentCycle {
                node_ids: unreachable,
            });
        }
        Ok(numbered)
    }

    /// Ids of loaded nodes missing from a numbering, sorted
    pub fn unreachable(&self, numbered: &[NodeRow]) -> Vec<NodeId> {
        let seen: HashSet<NodeId> = numbered.iter().map(|row| row.id).collect();
        let mut missing: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| !seen.contains(id))
            .copied()
            .collect();
        missing.sort_unstable();
        missing
    }

    /// Rows of `numbered` that differ from what was loaded
    pub fn changed(&self, numbered: Vec<NodeRow>) -> Vec<NodeRow> {
        numbered
            .into_iter()
            .filter(|row| self.nodes.get(&row.id) != Some(row))
            .collect()
    }
}
