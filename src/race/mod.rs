//! In-process duplicate-execution suppression

mod operation_registry;

pub use operation_registry::*;
