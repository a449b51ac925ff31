//! Nested Set Service - Tree Mutations
//!
//! `NestedSetService` is the orchestrator: it asks the interval engine for a plan,
//! executes that plan as ordered bulk updates inside one store transaction, and
//! resynchronizes cached children counts whenever the topology changes.
//!
//! # Operations
//!
//! - `create` - append a new leaf under a parent, or after the last root
//! - `delete` - remove a node with its whole subtree and close the gap
//! - `move_to` - relocate a subtree before/after a sibling or into a new parent
//! - `rebuild` - recompute bounds, depth and children counts from parent pointers
//!
//! Every operation is all-or-nothing: any failure after the transaction opens rolls
//! it back, so the scope is left exactly as it was.
//!
//! # Caller accessors
//!
//! `create` writes the assigned id and bounds back into the caller's record. The
//! other operations only change storage; other in-memory copies of affected
//! records go stale and can be refreshed with `reload`.
//!
//! # Example
//!
//! ```no_run
//! # use nestedset_core::db::MemoryStore;
//! # use nestedset_core::models::{NestedSetNode, NodeId};
//! # use nestedset_core::operations::MoveDirection;
//! # use nestedset_core::services::NestedSetService;
//! # use std::sync::Arc;
//! # async fn example<N: NestedSetNode + Clone + Default>() -> anyhow::Result<()> {
//! let service = NestedSetService::new(Arc::new(MemoryStore::<N>::new()));
//!
//! let mut root = N::default();
//! service.create(&mut root, None).await?;
//! let mut child = N::default();
//! service.create(&mut child, Some(&root)).await?;
//! service.reload(&mut root).await?;
//!
//! let mut sibling = N::default();
//! service.create(&mut sibling, None).await?;
//! service.move_to(&sibling, &child, MoveDirection::After).await?;
//! # Ok(())
//! # }
//! ```

use crate::db::{RowFilter, RowUpdate, ScopedTable, TreeStore};
use crate::models::{Column, NestedSetNode, NodeId, NodeRow, ScopeKey};
use crate::operations::integrity::{self, Violation};
use crate::operations::{plan_delete, plan_insert, plan_move, Forest, MoveDirection, MovePlan};
use crate::services::error::{NestedSetError, NestedSetResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Behaviour switches for `NestedSetService`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NestedSetConfig {
    /// Recount the parent's children after a delete (default: true)
    pub sync_children_on_delete: bool,
    /// Validate invariants inside the transaction before committing (default: false)
    ///
    /// Costs one full scope read per mutation.
    pub verify_before_commit: bool,
}

impl Default for NestedSetConfig {
    fn default() -> Self {
        Self {
            sync_children_on_delete: true,
            verify_before_commit: false,
        }
    }
}

/// How much of a scope `rebuild` renumbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RebuildScope {
    /// Only the given node and its descendants, starting at its stored `lft`
    Subtree,
    /// Every tree of the node's scope, starting at `lft = 1`
    WholeScope,
}

/// Orchestrates nested-set mutations over a [`TreeStore`]
pub struct NestedSetService<N: NestedSetNode> {
    store: Arc<dyn TreeStore<N>>,
    config: NestedSetConfig,
}

impl<N: NestedSetNode + Clone> NestedSetService<N> {
    pub fn new(store: Arc<dyn TreeStore<N>>) -> Self {
        Self::with_config(store, NestedSetConfig::default())
    }

    pub fn with_config(store: Arc<dyn TreeStore<N>>, config: NestedSetConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &NestedSetConfig {
        &self.config
    }

    /// Insert `node` as the last child of `parent`, or after the last root
    ///
    /// On success `node` carries its store-assigned id, bounds, depth and parent.
    #[instrument(skip_all, fields(scope = %node.scope(), parent = ?parent.map(|p| p.id())))]
    pub async fn create(&self, node: &mut N, parent: Option<&N>) -> NestedSetResult<()> {
        if let Some(parent) = parent {
            ensure_saved(parent, "parent")?;
            ensure_same_scope(node, parent)?;
        }

        let mut staged = node.clone();
        let mut tx = self.store.begin(&staged.scope()).await?;
        let result = self
            .create_in(tx.as_mut(), &mut staged, parent.map(|p| p.id()))
            .await;
        self.finish(tx, result).await?;

        *node = staged;
        Ok(())
    }

    async fn create_in(
        &self,
        tx: &mut dyn ScopedTable<N>,
        node: &mut N,
        parent_id: Option<NodeId>,
    ) -> NestedSetResult<()> {
        // Bounds passed by the caller may be stale; the transaction's view is not
        let parent = match parent_id {
            Some(id) => Some(read_one(tx, id).await?.ok_or_else(|| {
                NestedSetError::invalid_source(format!(
                    "parent node {} does not exist in scope {}",
                    id,
                    tx.scope()
                ))
            })?),
            None => None,
        };
        let last_rgt = match parent {
            Some(_) => None,
            None => tx.max_rgt().await?,
        };

        let plan = plan_insert(parent.as_ref(), last_rgt);
        for shift in &plan.shifts {
            let moved = tx
                .update(
                    &RowFilter::AtLeast {
                        column: shift.column,
                        value: shift.from,
                    },
                    &RowUpdate::new().shift(shift.column, shift.delta),
                )
                .await?;
            tracing::debug!(
                "Shifted {:?} >= {} by {} on {} rows",
                shift.column,
                shift.from,
                shift.delta,
                moved
            );
        }

        node.set_parent_id(parent.map(|p| p.id));
        node.set_lft(plan.lft);
        node.set_rgt(plan.rgt);
        node.set_depth(plan.depth);
        node.set_children_count(0);
        let id = tx.insert(node).await?;
        node.set_id(id);

        if let Some(parent) = parent {
            tx.update(
                &RowFilter::Id(parent.id),
                &RowUpdate::new().shift(Column::ChildrenCount, 1),
            )
            .await?;
        }

        tracing::debug!("Created node {} at [{}, {}]", id, plan.lft, plan.rgt);
        self.verify(tx).await
    }

    /// Remove `target` and every descendant, then close the gap
    ///
    /// The bounds carried by `target` are trusted as given.
    #[instrument(skip_all, fields(scope = %target.scope(), target = target.id()))]
    pub async fn delete(&self, target: &N) -> NestedSetResult<()> {
        ensure_saved(target, "target")?;

        let mut tx = self.store.begin(&target.scope()).await?;
        let result = self.delete_in(tx.as_mut(), target.to_row()).await;
        self.finish(tx, result).await
    }

    async fn delete_in(
        &self,
        tx: &mut dyn ScopedTable<N>,
        target: NodeRow,
    ) -> NestedSetResult<()> {
        let plan = plan_delete(&target);

        let removed = tx
            .delete(&RowFilter::Between {
                column: Column::Lft,
                low: plan.lft,
                high: plan.rgt,
            })
            .await?;
        for shift in &plan.closing {
            tx.update(
                &RowFilter::AtLeast {
                    column: shift.column,
                    value: shift.from,
                },
                &RowUpdate::new().shift(shift.column, shift.delta),
            )
            .await?;
        }
        tracing::debug!(
            "Deleted {} rows in [{}, {}], closed gap of {}",
            removed,
            plan.lft,
            plan.rgt,
            plan.width
        );

        if self.config.sync_children_on_delete {
            if let Some(parent_id) = target.parent_id {
                sync_children_count(tx, parent_id).await?;
            }
        }

        self.verify(tx).await
    }

    /// Move `target` with its subtree relative to `anchor`
    ///
    /// Fails with `IllegalMove` (without opening a transaction) when `anchor` lies
    /// inside the subtree of `target`. Moving a node to where it already is does
    /// nothing.
    #[instrument(
        skip_all,
        fields(scope = %target.scope(), target = target.id(), anchor = anchor.id(), ?direction)
    )]
    pub async fn move_to(
        &self,
        target: &N,
        anchor: &N,
        direction: MoveDirection,
    ) -> NestedSetResult<()> {
        ensure_saved(target, "target")?;
        ensure_saved(anchor, "anchor")?;
        ensure_same_scope(target, anchor)?;

        let Some(plan) = plan_move(&target.to_row(), &anchor.to_row(), direction)? else {
            tracing::debug!("Node {} already in place, nothing to move", target.id());
            return Ok(());
        };

        let mut tx = self.store.begin(&target.scope()).await?;
        let result = self.move_in(tx.as_mut(), &plan, target.parent_id()).await;
        self.finish(tx, result).await
    }

    async fn move_in(
        &self,
        tx: &mut dyn ScopedTable<N>,
        plan: &MovePlan,
        old_parent: Option<NodeId>,
    ) -> NestedSetResult<()> {
        // Subtree membership must be captured before the window shift reuses its range
        let subtree: Vec<NodeId> = tx
            .read(&RowFilter::Between {
                column: Column::Lft,
                low: plan.subtree_lft,
                high: plan.subtree_rgt,
            })
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();

        let window = plan.window;
        let shifted = tx
            .update(
                &RowFilter::Any(vec![
                    RowFilter::Between {
                        column: Column::Lft,
                        low: window.low,
                        high: window.high,
                    },
                    RowFilter::Between {
                        column: Column::Rgt,
                        low: window.low,
                        high: window.high,
                    },
                ]),
                &RowUpdate::new()
                    .shift_within(Column::Lft, window.low, window.high, window.delta)
                    .shift_within(Column::Rgt, window.low, window.high, window.delta),
            )
            .await?;

        let moved = tx
            .update(
                &RowFilter::Ids(subtree),
                &RowUpdate::new()
                    .shift(Column::Lft, plan.move_step)
                    .shift(Column::Rgt, plan.move_step)
                    .shift(Column::Depth, plan.depth_change),
            )
            .await?;

        tx.update(
            &RowFilter::Id(plan.target),
            &RowUpdate::new().set_parent(plan.new_parent),
        )
        .await?;

        tracing::debug!(
            "Moved {} rows by {} (depth {:+}), shifted {} rows in [{}, {}] by {}",
            moved,
            plan.move_step,
            plan.depth_change,
            shifted,
            window.low,
            window.high,
            window.delta
        );

        if let Some(old_parent) = old_parent {
            sync_children_count(tx, old_parent).await?;
        }
        if let Some(new_parent) = plan.new_parent.filter(|id| Some(*id) != old_parent) {
            sync_children_count(tx, new_parent).await?;
        }

        self.verify(tx).await
    }

    /// Recompute bounds, depth and children counts from parent pointers
    ///
    /// Only rows whose values change are written; returns how many that was. A
    /// second rebuild of the same scope returns 0.
    #[instrument(skip_all, fields(scope = %root.scope(), root = root.id(), mode = ?scope))]
    pub async fn rebuild(&self, root: &N, scope: RebuildScope) -> NestedSetResult<usize> {
        let mut tx = self.store.begin(&root.scope()).await?;
        let result = self.rebuild_in(tx.as_mut(), root.id(), scope).await;
        let changed = self.finish(tx, result).await?;

        if changed > 0 {
            tracing::info!("Rebuild of node {} rewrote {} rows", root.id(), changed);
        }
        Ok(changed)
    }

    async fn rebuild_in(
        &self,
        tx: &mut dyn ScopedTable<N>,
        root: NodeId,
        scope: RebuildScope,
    ) -> NestedSetResult<usize> {
        let rows = tx.read(&RowFilter::All).await?;
        let changed = canonical_changes(&rows, root, scope)?;

        for row in &changed {
            tx.update(
                &RowFilter::Id(row.id),
                &RowUpdate::new()
                    .set(Column::Lft, row.lft)
                    .set(Column::Rgt, row.rgt)
                    .set(Column::Depth, row.depth)
                    .set(Column::ChildrenCount, row.children_count),
            )
            .await?;
        }

        self.verify(tx).await?;
        Ok(changed.len())
    }

    /// Rows a `rebuild` would rewrite, with their canonical values, without writing
    pub async fn preview_rebuild(
        &self,
        root: &N,
        scope: RebuildScope,
    ) -> NestedSetResult<Vec<NodeRow>> {
        let rows = self.store.read(&root.scope(), &RowFilter::All).await?;
        canonical_changes(&rows, root.id(), scope)
    }

    /// Committed state of one node
    pub async fn load(&self, scope: &ScopeKey, id: NodeId) -> NestedSetResult<Option<NodeRow>> {
        let rows = self.store.read(scope, &RowFilter::Id(id)).await?;
        Ok(rows.into_iter().next())
    }

    /// Refresh the nested-set fields of a caller record from storage
    pub async fn reload(&self, node: &mut N) -> NestedSetResult<()> {
        let scope = node.scope();
        match self.load(&scope, node.id()).await? {
            Some(row) => {
                node.apply_row(&row);
                Ok(())
            }
            None => Err(NestedSetError::invalid_source(format!(
                "node {} does not exist in scope {}",
                node.id(),
                scope
            ))),
        }
    }

    /// Committed rows of a scope, ordered by `lft`
    pub async fn rows(&self, scope: &ScopeKey) -> NestedSetResult<Vec<NodeRow>> {
        Ok(self.store.read(scope, &RowFilter::All).await?)
    }

    /// Every invariant violation in the committed rows of a scope
    pub async fn check(&self, scope: &ScopeKey) -> NestedSetResult<Vec<Violation>> {
        let rows = self.rows(scope).await?;
        Ok(integrity::check(&rows))
    }

    async fn verify(&self, tx: &mut dyn ScopedTable<N>) -> NestedSetResult<()> {
        if !self.config.verify_before_commit {
            return Ok(());
        }

        let rows = tx.read(&RowFilter::All).await?;
        let violations = integrity::structural(&rows);
        if violations.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                "Refusing to commit scope {}: {} integrity violation(s)",
                tx.scope(),
                violations.len()
            );
            Err(NestedSetError::integrity_violation(violations))
        }
    }

    /// Commit on success, roll back on failure
    async fn finish<T>(
        &self,
        mut tx: Box<dyn ScopedTable<N>>,
        result: NestedSetResult<T>,
    ) -> NestedSetResult<T> {
        let err = match result {
            Ok(value) => match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(e) => NestedSetError::from(e),
            },
            Err(e) => e,
        };

        if let Err(rollback_err) = tx.rollback().await {
            tracing::warn!(
                "Failed to roll back transaction on scope {}: {}",
                tx.scope(),
                rollback_err
            );
        }
        Err(err)
    }
}

fn ensure_saved<N: NestedSetNode>(node: &N, role: &str) -> NestedSetResult<()> {
    if node.lft() < 1 || node.lft() >= node.rgt() {
        return Err(NestedSetError::invalid_source(format!(
            "{} node {} has no saved bounds (lft={}, rgt={})",
            role,
            node.id(),
            node.lft(),
            node.rgt()
        )));
    }
    Ok(())
}

fn ensure_same_scope<N: NestedSetNode>(a: &N, b: &N) -> NestedSetResult<()> {
    let (left, right) = (a.scope(), b.scope());
    if left != right {
        return Err(NestedSetError::invalid_source(format!(
            "nodes {} and {} belong to different scopes ({} vs {})",
            a.id(),
            b.id(),
            left,
            right
        )));
    }
    Ok(())
}

async fn read_one<N: NestedSetNode>(
    tx: &mut dyn ScopedTable<N>,
    id: NodeId,
) -> NestedSetResult<Option<NodeRow>> {
    Ok(tx.read(&RowFilter::Id(id)).await?.into_iter().next())
}

/// Write the real number of direct children into a node's cache
async fn sync_children_count<N: NestedSetNode>(
    tx: &mut dyn ScopedTable<N>,
    id: NodeId,
) -> NestedSetResult<()> {
    let count = tx.count(&RowFilter::ChildrenOf(id)).await?;
    tx.update(
        &RowFilter::Id(id),
        &RowUpdate::new().set(Column::ChildrenCount, count as i64),
    )
    .await?;
    Ok(())
}

/// Canonical rows that differ from `rows`, for the requested rebuild scope
fn canonical_changes(
    rows: &[NodeRow],
    root: NodeId,
    scope: RebuildScope,
) -> NestedSetResult<Vec<NodeRow>> {
    let forest = Forest::build(rows);
    let numbered = match scope {
        RebuildScope::WholeScope => forest.number_all()?,
        RebuildScope::Subtree => {
            let stored = forest.get(root).copied().ok_or_else(|| {
                NestedSetError::invalid_source(format!("rebuild root {} does not exist", root))
            })?;
            let numbered = forest.number(&[root], stored.lft, stored.depth)?;
            if let Some(renumbered) = numbered.first().filter(|row| row.rgt != stored.rgt) {
                tracing::warn!(
                    "Subtree rebuild of node {} changes its rgt from {} to {}; the rest of the scope is not shifted",
                    root,
                    stored.rgt,
                    renumbered.rgt
                );
            }
            numbered
        }
    };
    Ok(forest.changed(numbered))
}

#[cfg(test)]
#[path = "nested_set_service_test.rs"]
mod nested_set_service_test;
