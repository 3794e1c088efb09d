// src/dag/mod.rs

//! Dependency bookkeeping over logical product names.
//!
//! - [`task`] holds the caller-facing [`Step`] declaration and the internal
//!   [`Task`] the scheduler derives from it.
//! - [`products`] maps product names to the paths they are bound to and
//!   tracks which products are still being produced.

pub mod products;
pub mod task;

pub use products::{reconcile_outputs, Binding, ProductName, ProductTable};
pub use task::{Preparation, Step, Task};
