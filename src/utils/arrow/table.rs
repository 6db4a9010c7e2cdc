//! Delimited reference tables read through the Arrow CSV reader.

use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::util::safe_open_file;
use crate::error::{FlowError, Result};

/// Read a delimited text file with a header row, every column as `Utf8`
///
/// Reference tables carry codes with leading zeros, so type inference is only
/// used to discover the column names.
pub fn read_delimited_strings(path: &Path, delimiter: u8) -> Result<Vec<RecordBatch>> {
    let mut file = safe_open_file(path, "reading reference table")?;
    let format = Format::default().with_header(true).with_delimiter(delimiter);

    let (inferred, _) = format.infer_schema(BufReader::new(&mut file), Some(100))?;
    let schema = Schema::new(
        inferred
            .fields()
            .iter()
            .map(|f| Field::new(f.name().trim(), DataType::Utf8, true))
            .collect::<Vec<_>>(),
    );

    file.seek(SeekFrom::Start(0))
        .map_err(|e| FlowError::io(path, "Failed to rewind reference table", e))?;

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_header(true)
        .with_delimiter(delimiter)
        .build(BufReader::new(file))?;

    Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
}
