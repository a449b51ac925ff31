//! libsql Tree Store
//!
//! This module maps the scoped table contract onto a libsql/SQLite table.
//!
//! # Architecture
//!
//! - **Static mapping**: physical table and column names come from a `ColumnMap`
//!   declared once per record type; scope fields of a `ScopeKey` are used as column
//!   names verbatim
//! - **One connection per transaction**: `begin` opens a connection, issues
//!   `BEGIN IMMEDIATE` and keeps it until `commit`/`rollback`
//! - **Busy timeout**: every connection waits for competing writers instead of
//!   failing with `SQLITE_BUSY`, which is what serializes writers per database
//!
//! Identifiers are validated (`[A-Za-z_][A-Za-z0-9_]*`) and quoted; values are always
//! bound as parameters.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use nestedset_core::db::{ColumnMap, LibsqlConfig, LibsqlStore, SqlRecord};
//! # async fn example<N: SqlRecord>() -> Result<(), Box<dyn std::error::Error>> {
//! let store: LibsqlStore<N> = LibsqlStore::new(
//!     "./data/chapters.db".into(),
//!     ColumnMap::for_table("course_chapters"),
//!     LibsqlConfig::default(),
//! )
//! .await?;
//! store.create_table(&["course_id"], &["title TEXT"]).await?;
//! # Ok(())
//! # }
//! ```

use crate::db::{
    ColumnChange, RowFilter, RowUpdate, ScopedTable, StoreError, StoreResult, TreeStore,
};
use crate::models::{Column, NestedSetNode, NodeId, NodeRow, ScopeKey, ScopeValue};
use async_trait::async_trait;
use libsql::{Builder, Connection, Database, Value};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

/// Record types persisted through [`LibsqlStore`]
pub trait SqlRecord: NestedSetNode {
    /// Columns written on insert in addition to the nested-set and scope columns
    fn extra_values(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }
}

/// Physical table and column names of the nested-set fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMap {
    pub table: String,
    pub id: String,
    pub parent_id: String,
    pub lft: String,
    pub rgt: String,
    pub depth: String,
    pub children_count: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            table: "nodes".to_string(),
            id: "id".to_string(),
            parent_id: "parent_id".to_string(),
            lft: "lft".to_string(),
            rgt: "rgt".to_string(),
            depth: "depth".to_string(),
            children_count: "children_count".to_string(),
        }
    }
}

impl ColumnMap {
    /// Default column names on a custom table
    pub fn for_table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    fn column(&self, column: Column) -> &str {
        match column {
            Column::Lft => &self.lft,
            Column::Rgt => &self.rgt,
            Column::Depth => &self.depth,
            Column::ChildrenCount => &self.children_count,
        }
    }

    fn validate(&self) -> StoreResult<()> {
        for name in [
            &self.table,
            &self.id,
            &self.parent_id,
            &self.lft,
            &self.rgt,
            &self.depth,
            &self.children_count,
        ] {
            quote(name)?;
        }
        Ok(())
    }

    fn select_list(&self) -> String {
        [
            &self.id,
            &self.parent_id,
            &self.lft,
            &self.rgt,
            &self.depth,
            &self.children_count,
        ]
        .iter()
        .map(|name| format!("\"{}\"", name))
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Connection settings for [`LibsqlStore`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibsqlConfig {
    /// How long a connection waits on a locked database (default: 5000ms)
    pub busy_timeout_ms: u64,
    /// Enable write-ahead logging when opening the database (default: true)
    pub wal: bool,
}

impl Default for LibsqlConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            wal: true,
        }
    }
}

fn quote(ident: &str) -> StoreResult<String> {
    let mut chars = ident.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::backend(format!(
            "invalid SQL identifier '{}'",
            ident
        )));
    }
    Ok(format!("\"{}\"", ident))
}

fn scope_value(value: &ScopeValue) -> Value {
    match value {
        ScopeValue::Null => Value::Null,
        ScopeValue::Int(value) => Value::Integer(*value),
        ScopeValue::Text(value) => Value::Text(value.clone()),
    }
}

/// Accumulates SQL text and its positional parameters
struct SqlWriter<'a> {
    columns: &'a ColumnMap,
    sql: String,
    params: Vec<Value>,
}

impl<'a> SqlWriter<'a> {
    fn new(columns: &'a ColumnMap, head: &str) -> Self {
        Self {
            columns,
            sql: head.to_string(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: Value) {
        self.params.push(value);
    }

    fn col(&self, column: Column) -> String {
        format!("\"{}\"", self.columns.column(column))
    }

    fn push_scope(&mut self, scope: &ScopeKey) -> StoreResult<()> {
        if scope.is_global() {
            self.push("1 = 1");
            return Ok(());
        }
        for (index, (field, value)) in scope.fields().iter().enumerate() {
            if index > 0 {
                self.push(" AND ");
            }
            let field = quote(field)?;
            if *value == ScopeValue::Null {
                self.push(&format!("{} IS NULL", field));
            } else {
                self.push(&format!("{} = ?", field));
                self.bind(scope_value(value));
            }
        }
        Ok(())
    }

    fn push_filter(&mut self, filter: &RowFilter) {
        match filter {
            RowFilter::All => self.push("1 = 1"),
            RowFilter::Id(id) => {
                self.push(&format!("\"{}\" = ?", self.columns.id));
                self.bind(Value::Integer(*id));
            }
            RowFilter::Ids(ids) if ids.is_empty() => self.push("0 = 1"),
            RowFilter::Ids(ids) => {
                let marks = vec!["?"; ids.len()].join(", ");
                self.push(&format!("\"{}\" IN ({})", self.columns.id, marks));
                for id in ids {
                    self.bind(Value::Integer(*id));
                }
            }
            RowFilter::ChildrenOf(parent) => {
                self.push(&format!("\"{}\" = ?", self.columns.parent_id));
                self.bind(Value::Integer(*parent));
            }
            RowFilter::Between { column, low, high } => {
                let col = self.col(*column);
                self.push(&format!("{} BETWEEN ? AND ?", col));
                self.bind(Value::Integer(*low));
                self.bind(Value::Integer(*high));
            }
            RowFilter::GreaterThan { column, value } => {
                let col = self.col(*column);
                self.push(&format!("{} > ?", col));
                self.bind(Value::Integer(*value));
            }
            RowFilter::AtLeast { column, value } => {
                let col = self.col(*column);
                self.push(&format!("{} >= ?", col));
                self.bind(Value::Integer(*value));
            }
            RowFilter::Any(filters) if filters.is_empty() => self.push("0 = 1"),
            RowFilter::Any(filters) => {
                self.push("(");
                for (index, inner) in filters.iter().enumerate() {
                    if index > 0 {
                        self.push(" OR ");
                    }
                    self.push("(");
                    self.push_filter(inner);
                    self.push(")");
                }
                self.push(")");
            }
        }
    }

    fn push_update(&mut self, update: &RowUpdate) {
        for (index, change) in update.changes().iter().enumerate() {
            if index > 0 {
                self.push(", ");
            }
            match *change {
                ColumnChange::Shift { column, delta } => {
                    let col = self.col(column);
                    self.push(&format!("{col} = {col} + ?"));
                    self.bind(Value::Integer(delta));
                }
                ColumnChange::ShiftWithin {
                    column,
                    low,
                    high,
                    delta,
                } => {
                    let col = self.col(column);
                    self.push(&format!(
                        "{col} = CASE WHEN {col} BETWEEN ? AND ? THEN {col} + ? ELSE {col} END"
                    ));
                    self.bind(Value::Integer(low));
                    self.bind(Value::Integer(high));
                    self.bind(Value::Integer(delta));
                }
                ColumnChange::Set { column, value } => {
                    let col = self.col(column);
                    self.push(&format!("{} = ?", col));
                    self.bind(Value::Integer(value));
                }
                ColumnChange::SetParent(parent_id) => {
                    self.push(&format!("\"{}\" = ?", self.columns.parent_id));
                    self.bind(parent_id.map_or(Value::Null, Value::Integer));
                }
            }
        }
    }

    /// `WHERE <scope> AND (<filter>)`
    fn push_where(&mut self, scope: &ScopeKey, filter: &RowFilter) -> StoreResult<()> {
        self.push(" WHERE ");
        self.push_scope(scope)?;
        self.push(" AND (");
        self.push_filter(filter);
        self.push(")");
        Ok(())
    }
}

async fn query_rows(conn: &Connection, writer: SqlWriter<'_>) -> StoreResult<Vec<NodeRow>> {
    let mut rows = conn
        .query(&writer.sql, libsql::params_from_iter(writer.params))
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(NodeRow {
            id: row.get::<i64>(0)?,
            parent_id: row.get::<Option<i64>>(1)?,
            lft: row.get::<i64>(2)?,
            rgt: row.get::<i64>(3)?,
            depth: row.get::<i64>(4)?,
            children_count: row.get::<i64>(5)?,
        });
    }
    Ok(out)
}

async fn query_scalar(conn: &Connection, writer: SqlWriter<'_>) -> StoreResult<Option<i64>> {
    let mut rows = conn
        .query(&writer.sql, libsql::params_from_iter(writer.params))
        .await?;
    match rows.next().await? {
        Some(row) => Ok(row.get::<Option<i64>>(0)?),
        None => Ok(None),
    }
}

fn select_rows<'a>(
    columns: &'a ColumnMap,
    scope: &ScopeKey,
    filter: &RowFilter,
) -> StoreResult<SqlWriter<'a>> {
    let mut writer = SqlWriter::new(
        columns,
        &format!(
            "SELECT {} FROM \"{}\"",
            columns.select_list(),
            columns.table
        ),
    );
    writer.push_where(scope, filter)?;
    writer.push(&format!(
        " ORDER BY \"{}\" ASC, \"{}\" ASC",
        columns.lft, columns.id
    ));
    Ok(writer)
}

/// libsql-backed implementation of [`TreeStore`]
pub struct LibsqlStore<N> {
    db: Arc<Database>,
    db_path: PathBuf,
    columns: ColumnMap,
    config: LibsqlConfig,
    _record: PhantomData<fn() -> N>,
}

impl<N: SqlRecord> LibsqlStore<N> {
    /// Open (or create) the database at `db_path`
    ///
    /// The parent directory is created when missing. The table itself is not
    /// created here; see [`LibsqlStore::create_table`].
    pub async fn new(
        db_path: PathBuf,
        columns: ColumnMap,
        config: LibsqlConfig,
    ) -> StoreResult<Self> {
        columns.validate()?;

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::backend(format!(
                        "Failed to create parent directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let db = Builder::new_local(&db_path).build().await?;
        let store = Self {
            db: Arc::new(db),
            db_path,
            columns,
            config,
            _record: PhantomData,
        };

        if store.config.wal {
            let conn = store.connect().await?;
            conn.query("PRAGMA journal_mode = WAL", ()).await?;
        }

        tracing::debug!(
            "Opened libsql tree store at {} (table '{}')",
            store.db_path.display(),
            store.columns.table
        );
        Ok(store)
    }

    /// Open a connection with the configured busy timeout
    pub async fn connect(&self) -> StoreResult<Connection> {
        let conn = self.db.connect()?;
        // PRAGMA returns a row, so it must go through query()
        conn.query(
            &format!("PRAGMA busy_timeout = {}", self.config.busy_timeout_ms),
            (),
        )
        .await?;
        Ok(conn)
    }

    /// Create the table and its bound indexes when missing
    ///
    /// `scope_columns` are plain column names (typed loosely so both integer and
    /// text scopes fit); `extra_columns` are full definitions such as `"title TEXT"`.
    pub async fn create_table(
        &self,
        scope_columns: &[&str],
        extra_columns: &[&str],
    ) -> StoreResult<()> {
        let c = &self.columns;
        let mut definitions = vec![
            format!("\"{}\" INTEGER PRIMARY KEY AUTOINCREMENT", c.id),
            format!("\"{}\" INTEGER", c.parent_id),
            format!("\"{}\" INTEGER NOT NULL", c.lft),
            format!("\"{}\" INTEGER NOT NULL", c.rgt),
            format!("\"{}\" INTEGER NOT NULL DEFAULT 0", c.depth),
            format!("\"{}\" INTEGER NOT NULL DEFAULT 0", c.children_count),
        ];
        let mut scope_list = Vec::new();
        for column in scope_columns {
            let quoted = quote(column)?;
            definitions.push(quoted.clone());
            scope_list.push(quoted);
        }
        definitions.extend(extra_columns.iter().map(|definition| definition.to_string()));

        let conn = self.connect().await?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" ({})",
                c.table,
                definitions.join(", ")
            ),
            (),
        )
        .await?;

        let prefix: String = scope_list.iter().map(|col| format!("{}, ", col)).collect();
        for (suffix, column) in [("lft", &c.lft), ("rgt", &c.rgt)] {
            conn.execute(
                &format!(
                    "CREATE INDEX IF NOT EXISTS \"idx_{table}_{suffix}\" ON \"{table}\" ({prefix}\"{column}\")",
                    table = c.table,
                ),
                (),
            )
            .await?;
        }
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS \"idx_{table}_parent\" ON \"{table}\" (\"{parent}\")",
                table = c.table,
                parent = c.parent_id,
            ),
            (),
        )
        .await?;
        Ok(())
    }

    pub fn columns(&self) -> &ColumnMap {
        &self.columns
    }
}

#[async_trait]
impl<N: SqlRecord> TreeStore<N> for LibsqlStore<N> {
    async fn begin(&self, scope: &ScopeKey) -> StoreResult<Box<dyn ScopedTable<N>>> {
        let conn = self.connect().await?;
        conn.execute("BEGIN IMMEDIATE", ()).await.map_err(|e| {
            StoreError::backend(format!("Failed to begin transaction: {}", e))
        })?;

        Ok(Box::new(LibsqlTable {
            scope: scope.clone(),
            conn,
            columns: self.columns.clone(),
            finished: false,
            _record: PhantomData,
        }))
    }

    async fn read(&self, scope: &ScopeKey, filter: &RowFilter) -> StoreResult<Vec<NodeRow>> {
        let conn = self.connect().await?;
        query_rows(&conn, select_rows(&self.columns, scope, filter)?).await
    }
}

/// One `BEGIN IMMEDIATE` transaction on one connection
struct LibsqlTable<N> {
    scope: ScopeKey,
    conn: Connection,
    columns: ColumnMap,
    finished: bool,
    _record: PhantomData<fn() -> N>,
}

impl<N> LibsqlTable<N> {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.finished {
            return Err(StoreError::transaction_closed(&self.scope));
        }
        Ok(())
    }

    async fn execute(&self, writer: SqlWriter<'_>) -> StoreResult<u64> {
        Ok(self
            .conn
            .execute(&writer.sql, libsql::params_from_iter(writer.params))
            .await?)
    }
}

#[async_trait]
impl<N: SqlRecord> ScopedTable<N> for LibsqlTable<N> {
    fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    async fn read(&mut self, filter: &RowFilter) -> StoreResult<Vec<NodeRow>> {
        self.ensure_open()?;
        query_rows(&self.conn, select_rows(&self.columns, &self.scope, filter)?).await
    }

    async fn count(&mut self, filter: &RowFilter) -> StoreResult<u64> {
        self.ensure_open()?;
        let mut writer = SqlWriter::new(
            &self.columns,
            &format!("SELECT COUNT(*) FROM \"{}\"", self.columns.table),
        );
        writer.push_where(&self.scope, filter)?;
        let count = query_scalar(&self.conn, writer).await?.unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn update(&mut self, filter: &RowFilter, update: &RowUpdate) -> StoreResult<u64> {
        self.ensure_open()?;
        if update.is_empty() {
            return Ok(0);
        }
        let mut writer = SqlWriter::new(
            &self.columns,
            &format!("UPDATE \"{}\" SET ", self.columns.table),
        );
        writer.push_update(update);
        writer.push_where(&self.scope, filter)?;
        self.execute(writer).await
    }

    async fn max_rgt(&mut self) -> StoreResult<Option<i64>> {
        self.ensure_open()?;
        let mut writer = SqlWriter::new(
            &self.columns,
            &format!(
                "SELECT MAX(\"{}\") FROM \"{}\"",
                self.columns.rgt, self.columns.table
            ),
        );
        writer.push_where(&self.scope, &RowFilter::All)?;
        query_scalar(&self.conn, writer).await
    }

    async fn insert(&mut self, node: &N) -> StoreResult<NodeId> {
        self.ensure_open()?;
        if node.scope() != self.scope {
            return Err(StoreError::constraint(format!(
                "record belongs to scope {} but the transaction is bound to {}",
                node.scope(),
                self.scope
            )));
        }

        let c = &self.columns;
        let mut names = Vec::new();
        let mut values = Vec::new();
        if node.id() != 0 {
            names.push(format!("\"{}\"", c.id));
            values.push(Value::Integer(node.id()));
        }
        for (name, value) in [
            (&c.parent_id, node.parent_id().map_or(Value::Null, Value::Integer)),
            (&c.lft, Value::Integer(node.lft())),
            (&c.rgt, Value::Integer(node.rgt())),
            (&c.depth, Value::Integer(node.depth())),
            (&c.children_count, Value::Integer(node.children_count())),
        ] {
            names.push(format!("\"{}\"", name));
            values.push(value);
        }
        for (field, value) in node.scope().fields() {
            names.push(quote(field)?);
            values.push(scope_value(value));
        }
        for (field, value) in node.extra_values() {
            names.push(quote(field)?);
            values.push(value);
        }

        let marks = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            c.table,
            names.join(", "),
            marks
        );
        self.conn
            .execute(&sql, libsql::params_from_iter(values))
            .await?;

        if node.id() != 0 {
            Ok(node.id())
        } else {
            Ok(self.conn.last_insert_rowid())
        }
    }

    async fn delete(&mut self, filter: &RowFilter) -> StoreResult<u64> {
        self.ensure_open()?;
        let mut writer = SqlWriter::new(
            &self.columns,
            &format!("DELETE FROM \"{}\"", self.columns.table),
        );
        writer.push_where(&self.scope, filter)?;
        self.execute(writer).await
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        // A failed COMMIT leaves the transaction open for a ROLLBACK
        self.conn.execute("COMMIT", ()).await.map_err(|e| {
            StoreError::backend(format!("Failed to commit transaction: {}", e))
        })?;
        self.finished = true;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.finished = true;
        self.conn.execute("ROLLBACK", ()).await.map_err(|e| {
            StoreError::backend(format!("Failed to roll back transaction: {}", e))
        })?;
        Ok(())
    }
}
