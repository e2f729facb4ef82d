//! Domain model shared by every tasksync crate.

pub mod domain;
pub mod error;

pub use domain::*;
pub use error::{CoreError, Result};
