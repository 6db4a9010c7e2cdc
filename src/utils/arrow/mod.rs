//! Arrow data handling utilities
//!
//! Helpers for pulling named columns out of record batches as UTF-8 arrays,
//! whatever their stored type, and for loading delimited reference tables.

pub mod array_utils;
pub mod table;

pub use array_utils::{downcast_array, get_column, get_string_column};
pub use table::read_delimited_strings;
