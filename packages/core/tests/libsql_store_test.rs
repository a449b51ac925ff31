//! Integration tests for the libsql backend
//!
//! Tests cover:
//! - the clothing catalogue built and moved through a real SQLite file
//! - rollback of partially applied shifts when an insert fails
//! - scope isolation between courses sharing one table
//! - rebuild after out-of-band SQL corruption

#![cfg(feature = "libsql")]

mod common;

use anyhow::{anyhow, Result};
use common::{assert_tree, course, create_clothing, node, Category, CLOTHING};
use nestedset_core::db::{ColumnMap, LibsqlConfig, LibsqlStore};
use nestedset_core::{MoveDirection, NestedSetError, NestedSetService, RebuildScope};
use std::sync::Arc;
use tempfile::TempDir;

/// Test helper: Create a test environment
async fn create_test_env() -> Result<(
    NestedSetService<Category>,
    Arc<LibsqlStore<Category>>,
    TempDir,
)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("categories.db");
    let store = Arc::new(
        LibsqlStore::new(
            db_path,
            ColumnMap::for_table("categories"),
            LibsqlConfig::default(),
        )
        .await?,
    );
    store
        .create_table(&["course_id"], &["title TEXT NOT NULL DEFAULT ''"])
        .await?;

    Ok((NestedSetService::new(store.clone()), store, temp_dir))
}

#[tokio::test]
async fn test_clothing_catalogue_round_trip() -> Result<()> {
    common::init_tracing();
    let (service, _store, _temp_dir) = create_test_env().await?;

    create_clothing(&service, 1).await?;
    assert_tree(&service, 1, &CLOTHING).await?;

    let dresses = node(&service, 1, "dresses").await?;
    let jackets = node(&service, 1, "jackets").await?;
    service
        .move_to(&dresses, &jackets, MoveDirection::After)
        .await?;

    assert_tree(
        &service,
        1,
        &[
            ("clothing", 1, 22, 0, 2, None),
            ("mens", 2, 15, 1, 1, Some("clothing")),
            ("suits", 3, 14, 2, 3, Some("mens")),
            ("slacks", 4, 5, 3, 0, Some("suits")),
            ("jackets", 6, 7, 3, 0, Some("suits")),
            ("dresses", 8, 13, 3, 2, Some("suits")),
            ("eveningGowns", 9, 10, 4, 0, Some("dresses")),
            ("sunDresses", 11, 12, 4, 0, Some("dresses")),
            ("womens", 16, 21, 1, 2, Some("clothing")),
            ("skirts", 17, 18, 2, 0, Some("womens")),
            ("blouses", 19, 20, 2, 0, Some("womens")),
        ],
    )
    .await?;
    assert!(service.check(&course(1)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_payload_columns_are_written() -> Result<()> {
    let (service, store, _temp_dir) = create_test_env().await?;
    create_clothing(&service, 1).await?;

    let conn = store.connect().await?;
    let mut rows = conn
        .query(
            "SELECT title FROM categories WHERE id = ?1",
            libsql::params![7],
        )
        .await?;
    let row = rows.next().await?.ok_or_else(|| anyhow!("row 7 missing"))?;
    let title: String = row.get(0)?;

    assert_eq!(title, "dresses");
    Ok(())
}

#[tokio::test]
async fn test_failed_insert_rolls_back_shifts() -> Result<()> {
    let (service, _store, _temp_dir) = create_test_env().await?;
    create_clothing(&service, 1).await?;

    // Both shifts run before the insert hits the primary key
    let suits = node(&service, 1, "suits").await?;
    let mut duplicate = Category::new(1, "duplicate");
    duplicate.id = 3;
    let err = service
        .create(&mut duplicate, Some(&suits))
        .await
        .unwrap_err();

    assert!(matches!(err, NestedSetError::Storage(_)), "got {err}");
    assert_tree(&service, 1, &CLOTHING).await
}

#[tokio::test]
async fn test_scopes_share_a_table_without_interference() -> Result<()> {
    let (service, _store, _temp_dir) = create_test_env().await?;
    create_clothing(&service, 1).await?;
    let second = create_clothing(&service, 2).await?;

    // The bounds returned by create go stale as later siblings are added
    let mut womens = second
        .iter()
        .find(|c| c.title == "womens")
        .cloned()
        .ok_or_else(|| anyhow!("womens missing"))?;
    assert_eq!((womens.lft, womens.rgt), (10, 11));
    service.reload(&mut womens).await?;
    assert_eq!((womens.lft, womens.rgt), (10, 21));
    service.delete(&womens).await?;

    assert_tree(&service, 1, &CLOTHING).await?;
    let rows = service.rows(&course(2)).await?;
    assert_eq!(rows.len(), 5);
    assert_eq!((rows[0].lft, rows[0].rgt, rows[0].children_count), (1, 10, 1));
    assert!(service.check(&course(2)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_rebuild_repairs_sql_corruption() -> Result<()> {
    let (service, store, _temp_dir) = create_test_env().await?;
    create_clothing(&service, 1).await?;

    let conn = store.connect().await?;
    conn.execute(
        "UPDATE categories SET depth = 0, children_count = 7, rgt = rgt + 100 WHERE course_id = ?1",
        libsql::params![1],
    )
    .await?;
    assert!(!service.check(&course(1)).await?.is_empty());

    let clothing = node(&service, 1, "clothing").await?;
    let changed = service
        .rebuild(&clothing, RebuildScope::WholeScope)
        .await?;

    assert_eq!(changed, 11);
    assert_tree(&service, 1, &CLOTHING).await
}
