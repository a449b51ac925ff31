//! Shared fixtures for the integration tests
//!
//! `Category` is a course-scoped record with a title, and `CLOTHING` is the
//! 11-node catalogue every move scenario starts from:
//!
//! ```text
//! clothing
//! ├── mens
//! │   └── suits
//! │       ├── slacks
//! │       └── jackets
//! └── womens
//!     ├── dresses
//!     │   ├── eveningGowns
//!     │   └── sunDresses
//!     ├── skirts
//!     └── blouses
//! ```

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use nestedset_core::db::MemoryStore;
#[cfg(feature = "libsql")]
use nestedset_core::db::SqlRecord;
use nestedset_core::models::{NestedSetNode, NodeId, NodeRow, ScopeKey};
use nestedset_core::services::NestedSetService;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Category {
    pub id: NodeId,
    pub course_id: i64,
    pub title: String,
    pub parent_id: Option<NodeId>,
    pub lft: i64,
    pub rgt: i64,
    pub depth: i64,
    pub children_count: i64,
}

impl Category {
    pub fn new(course_id: i64, title: &str) -> Self {
        Self {
            course_id,
            title: title.to_string(),
            ..Default::default()
        }
    }

    /// Accessor carrying the stored state of a row
    pub fn from_row(course_id: i64, row: &NodeRow) -> Self {
        let mut category = Self {
            id: row.id,
            course_id,
            ..Default::default()
        };
        category.apply_row(row);
        category
    }
}

impl NestedSetNode for Category {
    fn id(&self) -> NodeId {
        self.id
    }
    fn set_id(&mut self, id: NodeId) {
        self.id = id
    }
    fn parent_id(&self) -> Option<NodeId> {
        self.parent_id
    }
    fn set_parent_id(&mut self, parent_id: Option<NodeId>) {
        self.parent_id = parent_id
    }
    fn lft(&self) -> i64 {
        self.lft
    }
    fn set_lft(&mut self, lft: i64) {
        self.lft = lft
    }
    fn rgt(&self) -> i64 {
        self.rgt
    }
    fn set_rgt(&mut self, rgt: i64) {
        self.rgt = rgt
    }
    fn depth(&self) -> i64 {
        self.depth
    }
    fn set_depth(&mut self, depth: i64) {
        self.depth = depth
    }
    fn children_count(&self) -> i64 {
        self.children_count
    }
    fn set_children_count(&mut self, count: i64) {
        self.children_count = count
    }
    fn scope(&self) -> ScopeKey {
        course(self.course_id)
    }
}

#[cfg(feature = "libsql")]
impl SqlRecord for Category {
    fn extra_values(&self) -> Vec<(&'static str, libsql::Value)> {
        vec![("title", libsql::Value::Text(self.title.clone()))]
    }
}

pub fn course(course_id: i64) -> ScopeKey {
    ScopeKey::new().with("course_id", course_id)
}

/// Expected state of one node: name, lft, rgt, depth, children count, parent name
pub type Expected = (&'static str, i64, i64, i64, i64, Option<&'static str>);

/// Clothing catalogue in creation order; ids are 1..=11 in this order
pub const CLOTHING: [Expected; 11] = [
    ("clothing", 1, 22, 0, 2, None),
    ("mens", 2, 9, 1, 1, Some("clothing")),
    ("suits", 3, 8, 2, 2, Some("mens")),
    ("slacks", 4, 5, 3, 0, Some("suits")),
    ("jackets", 6, 7, 3, 0, Some("suits")),
    ("womens", 10, 21, 1, 3, Some("clothing")),
    ("dresses", 11, 16, 2, 2, Some("womens")),
    ("eveningGowns", 12, 13, 3, 0, Some("dresses")),
    ("sunDresses", 14, 15, 3, 0, Some("dresses")),
    ("skirts", 17, 18, 2, 0, Some("womens")),
    ("blouses", 19, 20, 2, 0, Some("womens")),
];

pub fn id_of(name: &str) -> NodeId {
    CLOTHING
        .iter()
        .position(|(n, ..)| *n == name)
        .map(|index| index as NodeId + 1)
        .unwrap_or_else(|| panic!("unknown fixture node {name}"))
}

pub fn name_of(id: NodeId) -> &'static str {
    CLOTHING[(id - 1) as usize].0
}

/// The catalogue as stored records, ready for `MemoryStore::seed`
pub fn clothing_records(course_id: i64) -> Vec<Category> {
    CLOTHING
        .iter()
        .map(|&(name, lft, rgt, depth, children_count, parent)| Category {
            id: id_of(name),
            course_id,
            title: name.to_string(),
            parent_id: parent.map(id_of),
            lft,
            rgt,
            depth,
            children_count,
        })
        .collect()
}

/// Service over a memory store seeded with the catalogue in `course(course_id)`
pub async fn seeded_service(
    course_id: i64,
) -> (NestedSetService<Category>, Arc<MemoryStore<Category>>) {
    let store = Arc::new(MemoryStore::new());
    store
        .seed(&course(course_id), clothing_records(course_id))
        .await;
    (NestedSetService::new(store.clone()), store)
}

/// Build the catalogue through `create`, in creation order
pub async fn create_clothing(
    service: &NestedSetService<Category>,
    course_id: i64,
) -> Result<Vec<Category>> {
    let mut created: Vec<Category> = Vec::new();
    for (name, _, _, _, _, parent) in CLOTHING {
        let parent = match parent {
            Some(parent) => Some(
                created
                    .iter()
                    .find(|c| c.title == parent)
                    .cloned()
                    .ok_or_else(|| anyhow!("parent {parent} not created yet"))?,
            ),
            None => None,
        };
        let mut category = Category::new(course_id, name);
        service.create(&mut category, parent.as_ref()).await?;
        created.push(category);
    }
    Ok(created)
}

/// Fresh accessor for a fixture node
pub async fn node(
    service: &NestedSetService<Category>,
    course_id: i64,
    name: &str,
) -> Result<Category> {
    let row = service
        .load(&course(course_id), id_of(name))
        .await?
        .ok_or_else(|| anyhow!("{name} is missing"))?;
    Ok(Category::from_row(course_id, &row))
}

/// Assert the stored scope matches `expected` exactly, in `lft` order
pub async fn assert_tree(
    service: &NestedSetService<Category>,
    course_id: i64,
    expected: &[Expected],
) -> Result<()> {
    let rows = service.rows(&course(course_id)).await?;
    let actual: Vec<Expected> = rows
        .iter()
        .map(|row| {
            (
                name_of(row.id),
                row.lft,
                row.rgt,
                row.depth,
                row.children_count,
                row.parent_id.map(name_of),
            )
        })
        .collect();
    assert_eq!(actual, expected);
    Ok(())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
