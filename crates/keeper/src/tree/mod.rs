//! Recursive tree maintenance.
//!
//! - `sync` - additive copy of persistent subtrees, within or across stores
//! - `delete` - race-tolerant recursive delete and ancestor pruning

mod delete;
mod sync;

pub use delete::{delete_safe, delete_safe_up_to};
pub use sync::{copy_between, copy_within};
