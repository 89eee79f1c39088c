//! # lunchline-core — Shared data model for the lunchline order tracker
//!
//! The types every other crate agrees on: orders, menu items, the student
//! roster, and the [`SharedState`] blob that ties them together. This crate
//! does no I/O; the sync layer owns files and sockets, while the semantics
//! of every mutation live here so the hub and each replica stay in lockstep.
//!
//! ## Modules
//!
//! - [`order`] — Orders, order items, and shallow-merge patches
//! - [`menu`] — Menu items
//! - [`student`] — Roster entries
//! - [`state`] — The shared state blob and its mutation methods

pub mod menu;
pub mod order;
pub mod state;
pub mod student;

// Re-exports for convenience
pub use menu::MenuItem;
pub use order::{Order, OrderId, OrderItem, OrderPatch};
pub use state::{FormSettings, SharedState, StatePatch};
pub use student::Student;
