//! In-Memory Tree Store
//!
//! `MemoryStore` keeps full records per scope and implements the scoped table
//! contract with real transaction semantics:
//!
//! - one writer per scope at a time (held for the life of a transaction)
//! - writes go to a private working copy and become visible on `commit`
//! - snapshot reads never wait for writers
//!
//! It also supports failure injection (`fail_on_write`) so callers can check that a
//! failed mutation leaves the scope untouched.

use crate::db::{RowFilter, RowUpdate, ScopedTable, StoreError, StoreResult, TreeStore};
use crate::models::{NestedSetNode, NodeId, NodeRow, ScopeKey};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Committed rows of one scope plus the lock serializing its writers
struct Partition<N> {
    writer: Arc<Mutex<()>>,
    rows: RwLock<Vec<N>>,
}

impl<N> Partition<N> {
    fn new(rows: Vec<N>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(())),
            rows: RwLock::new(rows),
        }
    }
}

/// Transactional in-memory implementation of [`TreeStore`]
pub struct MemoryStore<N> {
    partitions: Mutex<HashMap<ScopeKey, Arc<Partition<N>>>>,
    next_id: Arc<AtomicI64>,
    /// 1-based write number (per transaction) that should fail; 0 disables
    fail_at: Arc<AtomicUsize>,
}

impl<N: NestedSetNode + Clone> MemoryStore<N> {
    pub fn new() -> Self {
        Self {
            partitions: Mutex::new(HashMap::new()),
            next_id: Arc::new(AtomicI64::new(1)),
            fail_at: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the committed rows of a scope, bypassing the engine
    ///
    /// Used to load fixtures or simulate out-of-band writes. Waits for any running
    /// transaction on the scope.
    pub async fn seed(&self, scope: &ScopeKey, records: Vec<N>) {
        let partition = self.partition(scope).await;
        let _writer = partition.writer.lock().await;
        if let Some(max_id) = records.iter().map(|record| record.id()).max() {
            self.next_id.fetch_max(max_id + 1, Ordering::SeqCst);
        }
        *partition.rows.write().await = records;
    }

    /// Committed records of a scope, ordered by `lft` then id
    pub async fn records(&self, scope: &ScopeKey) -> Vec<N> {
        let partition = self.partition(scope).await;
        let mut records = partition.rows.read().await.clone();
        records.sort_by_key(|record| (record.lft(), record.id()));
        records
    }

    /// Make the `nth` write (1-based, counted per transaction) of the next
    /// transaction that reaches it fail with `StoreError::InjectedFailure`
    pub fn fail_on_write(&self, nth: usize) {
        self.fail_at.store(nth, Ordering::SeqCst);
    }

    async fn partition(&self, scope: &ScopeKey) -> Arc<Partition<N>> {
        let mut partitions = self.partitions.lock().await;
        partitions
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Partition::new(Vec::new())))
            .clone()
    }
}

impl<N: NestedSetNode + Clone> Default for MemoryStore<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn ordered_rows<N: NestedSetNode>(records: &[N], filter: &RowFilter) -> Vec<NodeRow> {
    let mut rows: Vec<NodeRow> = records
        .iter()
        .map(|record| record.to_row())
        .filter(|row| filter.matches(row))
        .collect();
    rows.sort_by_key(|row| (row.lft, row.id));
    rows
}

#[async_trait]
impl<N: NestedSetNode + Clone> TreeStore<N> for MemoryStore<N> {
    async fn begin(&self, scope: &ScopeKey) -> StoreResult<Box<dyn ScopedTable<N>>> {
        let partition = self.partition(scope).await;
        let writer = partition.writer.clone().lock_owned().await;
        let working = partition.rows.read().await.clone();

        tracing::trace!("Opened in-memory transaction on scope {}", scope);

        Ok(Box::new(MemoryTable {
            scope: scope.clone(),
            partition,
            writer: Some(writer),
            working,
            next_id: self.next_id.clone(),
            fail_at: self.fail_at.clone(),
            writes: 0,
            finished: false,
        }))
    }

    async fn read(&self, scope: &ScopeKey, filter: &RowFilter) -> StoreResult<Vec<NodeRow>> {
        let partition = self.partition(scope).await;
        let rows = partition.rows.read().await;
        Ok(ordered_rows(&rows, filter))
    }
}

/// Working copy of one scope for the duration of a transaction
struct MemoryTable<N> {
    scope: ScopeKey,
    partition: Arc<Partition<N>>,
    /// Released as soon as the transaction finishes, not when the handle drops
    writer: Option<OwnedMutexGuard<()>>,
    working: Vec<N>,
    next_id: Arc<AtomicI64>,
    fail_at: Arc<AtomicUsize>,
    writes: usize,
    finished: bool,
}

impl<N: NestedSetNode + Clone> MemoryTable<N> {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::transaction_closed(&self.scope));
        }
        Ok(())
    }

    /// Count a write and trip the injected failure when it is due
    fn begin_write(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.writes += 1;
        let write = self.writes;
        if self
            .fail_at
            .compare_exchange(write, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return Err(StoreError::InjectedFailure { write });
        }
        Ok(())
    }
}

#[async_trait]
impl<N: NestedSetNode + Clone> ScopedTable<N> for MemoryTable<N> {
    fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    async fn read(&mut self, filter: &RowFilter) -> StoreResult<Vec<NodeRow>> {
        self.ensure_open()?;
        Ok(ordered_rows(&self.working, filter))
    }

    async fn count(&mut self, filter: &RowFilter) -> StoreResult<u64> {
        self.ensure_open()?;
        Ok(self
            .working
            .iter()
            .filter(|record| filter.matches(&record.to_row()))
            .count() as u64)
    }

    async fn update(&mut self, filter: &RowFilter, update: &RowUpdate) -> StoreResult<u64> {
        self.begin_write()?;
        let mut affected = 0;
        for record in self.working.iter_mut() {
            let row = record.to_row();
            if filter.matches(&row) {
                record.apply_row(&update.apply(&row));
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn max_rgt(&mut self) -> StoreResult<Option<i64>> {
        self.ensure_open()?;
        Ok(self.working.iter().map(|record| record.rgt()).max())
    }

    async fn insert(&mut self, node: &N) -> StoreResult<NodeId> {
        self.begin_write()?;
        if node.scope() != self.scope {
            return Err(StoreError::constraint(format!(
                "record belongs to scope {} but the transaction is bound to {}",
                node.scope(),
                self.scope
            )));
        }

        let mut record = node.clone();
        if record.id() == 0 {
            record.set_id(self.next_id.fetch_add(1, Ordering::SeqCst));
        } else if self.working.iter().any(|existing| existing.id() == record.id()) {
            return Err(StoreError::constraint(format!(
                "duplicate node id {} in scope {}",
                record.id(),
                self.scope
            )));
        } else {
            self.next_id.fetch_max(record.id() + 1, Ordering::SeqCst);
        }

        let id = record.id();
        self.working.push(record);
        Ok(id)
    }

    async fn delete(&mut self, filter: &RowFilter) -> StoreResult<u64> {
        self.begin_write()?;
        let before = self.working.len();
        self.working.retain(|record| !filter.matches(&record.to_row()));
        Ok((before - self.working.len()) as u64)
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.finished = true;
        *self.partition.rows.write().await = std::mem::take(&mut self.working);
        self.writer.take();
        tracing::trace!("Committed in-memory transaction on scope {}", self.scope);
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.finished = true;
        self.working.clear();
        self.writer.take();
        tracing::trace!("Rolled back in-memory transaction on scope {}", self.scope);
        Ok(())
    }
}
