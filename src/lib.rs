// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # exercise-tree
//!
//! Keeps a hierarchical, ordered tree of workout exercises consistent while
//! it is edited optimistically and synchronized with a remote store.
//!
//! ## Architecture
//!
//! - **Nodes** (`exercise`): exercises, temporary vs. saved ids, metric editing
//! - **Tree primitives** (`tree`): find, insert, remove, flatten, ancestor chains
//! - **Completion** (`completion`): subtree toggling, bottom-up recalculation,
//!   per-day completion ratios
//! - **Orchestration** (`sync`): snapshot → optimistic apply → persist →
//!   reconcile or roll back
//! - **Store boundary** (`client`): the `ExerciseStore` contract, an HTTP
//!   store and an in-memory store
//!
//! ## Library usage
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use exercise_tree::client::MemoryStore;
//! use exercise_tree::exercise::ExerciseDraft;
//! use exercise_tree::sync::{Outcome, Synchronizer};
//!
//! let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! let mut sync = Synchronizer::new(MemoryStore::new());
//! let Outcome::Created { id, .. } = sync.add(None, day, ExerciseDraft::named("Run")).unwrap() else {
//!     unreachable!()
//! };
//! sync.toggle(id).unwrap();
//! assert!(sync.tree().find(id).unwrap().completed);
//! ```

pub mod client;
pub mod completion;
pub mod config;
pub mod error;
pub mod exercise;
pub mod paths;
pub mod sync;
pub mod tree;
