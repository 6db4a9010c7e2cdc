//! Utilities for working with Arrow arrays.

use arrow::array::{Array, ArrayRef, StringArray};
use arrow::compute::kernels::cast::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use log::{debug, warn};

use crate::error::{FlowError, Result};

/// Get a column from a record batch by name
///
/// # Returns
///
/// * `Ok(Some(ArrayRef))` - The column array if found
/// * `Ok(None)` - If the column is not found and `required` is false
/// * `Err` - If the column is not found and `required` is true
pub fn get_column(batch: &RecordBatch, column_name: &str, required: bool) -> Result<Option<ArrayRef>> {
    match batch.schema().index_of(column_name) {
        Ok(idx) => Ok(Some(batch.column(idx).clone())),
        Err(_) if required => Err(FlowError::missing_column(column_name, "record batch")),
        Err(_) => {
            warn!("Column '{column_name}' not found in record batch");
            Ok(None)
        }
    }
}

/// Get a column as a UTF-8 string array, casting numeric or large-string storage
///
/// Admission files are not consistent about whether codes are stored as text
/// or integers, so every key column is normalised to `Utf8` before use.
pub fn get_string_column(
    batch: &RecordBatch,
    column_name: &str,
    required: bool,
) -> Result<Option<StringArray>> {
    let Some(array) = get_column(batch, column_name, required)? else {
        return Ok(None);
    };

    let array = if array.data_type() == &DataType::Utf8 {
        array
    } else {
        debug!(
            "Casting column '{column_name}' from {:?} to Utf8",
            array.data_type()
        );
        cast(&array, &DataType::Utf8)?
    };

    Ok(Some(downcast_array::<StringArray>(&array, column_name, "Utf8")?.clone()))
}

/// Downcast a column to a specific array type with clear error messages
pub fn downcast_array<'a, A: Array + 'static>(
    array: &'a ArrayRef,
    column_name: &str,
    expected_type_name: &str,
) -> Result<&'a A> {
    array.as_any().downcast_ref::<A>().ok_or_else(|| {
        FlowError::Config(format!(
            "Column '{column_name}' could not be read as {expected_type_name}"
        ))
    })
}
