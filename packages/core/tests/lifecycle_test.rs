//! Create and delete scenarios
//!
//! Tests cover:
//! - building the clothing catalogue through `create`
//! - children counts maintained on create and delete
//! - gap closing after leaf and subtree deletion
//! - atomicity under injected store failures

mod common;

use anyhow::Result;
use common::{assert_tree, course, create_clothing, node, seeded_service, Category, CLOTHING};
use nestedset_core::db::{MemoryStore, StoreError};
use nestedset_core::{NestedSetError, NestedSetService};
use std::sync::Arc;

const COURSE: i64 = 4;

fn fresh_service() -> (NestedSetService<Category>, Arc<MemoryStore<Category>>) {
    let store = Arc::new(MemoryStore::new());
    (NestedSetService::new(store.clone()), store)
}

/// Stored `(lft, rgt)` of a node, `None` once deleted
async fn bounds(service: &NestedSetService<Category>, id: i64) -> Result<Option<(i64, i64)>> {
    let row = service.load(&course(COURSE), id).await?;
    Ok(row.map(|row| (row.lft, row.rgt)))
}

#[tokio::test]
async fn test_create_builds_clothing_catalogue() -> Result<()> {
    common::init_tracing();
    let (service, _store) = fresh_service();

    let created = create_clothing(&service, COURSE).await?;

    let ids: Vec<i64> = created.iter().map(|c| c.id).collect();
    assert_eq!(ids, (1..=11).collect::<Vec<_>>());
    assert_tree(&service, COURSE, &CLOTHING).await?;
    assert!(service.check(&course(COURSE)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_create_children_count_scenario() -> Result<()> {
    let (service, _store) = fresh_service();

    let mut root = Category::new(COURSE, "root");
    service.create(&mut root, None).await?;
    let mut first = Category::new(COURSE, "first");
    service.create(&mut first, Some(&root)).await?;
    let mut second = Category::new(COURSE, "second");
    service.create(&mut second, Some(&root)).await?;
    let mut nested = Category::new(COURSE, "nested");
    service.create(&mut nested, Some(&first)).await?;

    service.reload(&mut root).await?;
    service.reload(&mut first).await?;
    service.reload(&mut second).await?;

    assert_eq!((root.lft, root.rgt, root.children_count), (1, 8, 2));
    assert_eq!((first.lft, first.rgt, first.children_count), (2, 5, 1));
    assert_eq!((nested.lft, nested.rgt, nested.depth), (3, 4, 2));
    assert_eq!((second.lft, second.rgt, second.children_count), (6, 7, 0));
    Ok(())
}

#[tokio::test]
async fn test_create_child_of_second_root() -> Result<()> {
    let (service, _store) = fresh_service();

    let mut first = Category::new(COURSE, "first");
    service.create(&mut first, None).await?;
    assert_eq!((first.lft, first.rgt, first.depth), (1, 2, 0));

    let mut second = Category::new(COURSE, "second");
    service.create(&mut second, None).await?;
    assert_eq!((second.lft, second.rgt, second.depth), (3, 4, 0));

    let mut child = Category::new(COURSE, "child");
    service.create(&mut child, Some(&second)).await?;
    assert_eq!((child.lft, child.rgt, child.depth), (4, 5, 1));
    assert_eq!(child.parent_id, Some(second.id));

    service.reload(&mut first).await?;
    service.reload(&mut second).await?;
    assert_eq!((first.lft, first.rgt, first.children_count), (1, 2, 0));
    assert_eq!((second.lft, second.rgt, second.children_count), (3, 6, 1));
    assert!(service.check(&course(COURSE)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_create_keeps_payload_fields() -> Result<()> {
    let (service, store) = fresh_service();

    let mut root = Category::new(COURSE, "catalogue");
    service.create(&mut root, None).await?;

    let records = store.records(&course(COURSE)).await;
    assert_eq!(records, vec![root]);
    assert_eq!(records[0].title, "catalogue");
    Ok(())
}

#[tokio::test]
async fn test_delete_subtree_closes_gap() -> Result<()> {
    let (service, _store) = seeded_service(COURSE).await;

    let dresses = node(&service, COURSE, "dresses").await?;
    service.delete(&dresses).await?;

    assert_tree(
        &service,
        COURSE,
        &[
            ("clothing", 1, 16, 0, 2, None),
            ("mens", 2, 9, 1, 1, Some("clothing")),
            ("suits", 3, 8, 2, 2, Some("mens")),
            ("slacks", 4, 5, 3, 0, Some("suits")),
            ("jackets", 6, 7, 3, 0, Some("suits")),
            ("womens", 10, 15, 1, 2, Some("clothing")),
            ("skirts", 11, 12, 2, 0, Some("womens")),
            ("blouses", 13, 14, 2, 0, Some("womens")),
        ],
    )
    .await?;
    assert!(service.check(&course(COURSE)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_leaf_shifts_following_sibling() -> Result<()> {
    let (service, _store) = fresh_service();

    let mut root = Category::new(COURSE, "root");
    service.create(&mut root, None).await?;
    let mut leaves = Vec::new();
    for name in ["a", "b", "c", "d"] {
        let mut leaf = Category::new(COURSE, name);
        service.create(&mut leaf, Some(&root)).await?;
        leaves.push(leaf);
    }
    let (b, c, d) = (&leaves[1], &leaves[2], &leaves[3]);
    assert_eq!((c.lft, c.rgt), (6, 7));
    assert_eq!(d.lft, 8);

    service.delete(c).await?;

    assert_eq!(bounds(&service, c.id).await?, None);
    assert_eq!(bounds(&service, d.id).await?, Some((6, 7)));
    assert_eq!(bounds(&service, b.id).await?, Some((4, 5)));
    service.reload(&mut root).await?;
    assert_eq!((root.lft, root.rgt, root.children_count), (1, 8, 3));
    assert!(service.check(&course(COURSE)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_leaf_then_create_reuses_space() -> Result<()> {
    let (service, _store) = seeded_service(COURSE).await;

    let slacks = node(&service, COURSE, "slacks").await?;
    service.delete(&slacks).await?;

    let suits = node(&service, COURSE, "suits").await?;
    assert_eq!((suits.lft, suits.rgt, suits.children_count), (3, 6, 1));

    let mut vests = Category::new(COURSE, "vests");
    service.create(&mut vests, Some(&suits)).await?;
    assert_eq!((vests.lft, vests.rgt, vests.depth), (6, 7, 3));

    let clothing = node(&service, COURSE, "clothing").await?;
    assert_eq!(clothing.rgt, 22);
    assert!(service.check(&course(COURSE)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_delete_root_empties_scope() -> Result<()> {
    let (service, _store) = seeded_service(COURSE).await;

    let clothing = node(&service, COURSE, "clothing").await?;
    service.delete(&clothing).await?;

    assert!(service.rows(&course(COURSE)).await?.is_empty());

    let mut fresh = Category::new(COURSE, "fresh");
    service.create(&mut fresh, None).await?;
    assert_eq!((fresh.lft, fresh.rgt), (1, 2));
    Ok(())
}

#[tokio::test]
async fn test_failed_delete_leaves_scope_untouched() -> Result<()> {
    let (service, store) = seeded_service(COURSE).await;
    let before = store.records(&course(COURSE)).await;

    // Range delete, then the first closing shift
    store.fail_on_write(2);
    let womens = node(&service, COURSE, "womens").await?;
    let err = service.delete(&womens).await.unwrap_err();

    assert!(matches!(
        err,
        NestedSetError::Storage(StoreError::InjectedFailure { write: 2 })
    ));
    assert_eq!(store.records(&course(COURSE)).await, before);
    Ok(())
}

#[tokio::test]
async fn test_failed_children_count_update_rolls_back_create() -> Result<()> {
    let (service, store) = seeded_service(COURSE).await;

    // Two shifts, the insert, then the parent's children count
    store.fail_on_write(4);
    let suits = node(&service, COURSE, "suits").await?;
    let mut vests = Category::new(COURSE, "vests");
    let err = service.create(&mut vests, Some(&suits)).await.unwrap_err();

    assert!(matches!(err, NestedSetError::Storage(_)));
    assert_eq!(vests.id, 0);
    assert_tree(&service, COURSE, &CLOTHING).await
}

#[tokio::test]
async fn test_unsaved_operands_are_invalid() -> Result<()> {
    let (service, _store) = seeded_service(COURSE).await;

    let unsaved = Category::new(COURSE, "unsaved");
    let err = service.delete(&unsaved).await.unwrap_err();
    assert!(matches!(err, NestedSetError::InvalidSource { .. }));

    let mut child = Category::new(COURSE, "child");
    let err = service.create(&mut child, Some(&unsaved)).await.unwrap_err();
    assert!(matches!(err, NestedSetError::InvalidSource { .. }));

    assert_tree(&service, COURSE, &CLOTHING).await
}
