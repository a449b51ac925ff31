//! Tree Operations
//!
//! Pure, storage-free building blocks of the engine:
//!
//! - `interval` - plans for create, delete and move
//! - `forest` - arena forest and canonical renumbering used by rebuild
//! - `integrity` - validation of a scope's rows

pub mod forest;
pub mod integrity;
pub mod interval;

pub use forest::{Forest, ForestError};
pub use integrity::{check, Violation};
pub use interval::{
    plan_delete, plan_insert, plan_move, BoundShift, DeletePlan, IllegalMove, InsertPlan,
    MoveDirection, MovePlan, ShiftWindow,
};
