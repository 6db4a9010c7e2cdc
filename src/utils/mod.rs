//! Shared helpers: Arrow column access and logging/progress reporting.

pub mod arrow;
pub mod logging;
