//! Record store reader: partitioned admission files as Arrow record batches.

pub mod partition;

use std::path::Path;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use itertools::Itertools;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::error::util::safe_open_file;
use crate::utils::logging::{log_operation_complete, log_warning};

pub use partition::{
    FileNaming, PartitionFile, PartitionFilter, discover_partitions, group_by_region,
    select_partitions,
};

/// Default batch size for Parquet reading
pub const DEFAULT_BATCH_SIZE: usize = 16384;

/// Column names of an admission record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordColumns {
    /// Municipality of residence (flow origin)
    pub residence: String,
    /// Municipality of the treating establishment (flow destination)
    pub treating: String,
    /// Principal diagnosis code
    pub diagnosis: String,
    /// Admission year
    pub year: String,
    /// Admission month
    pub month: String,
    /// Treating hospital identifier
    pub hospital: String,
}

impl Default for RecordColumns {
    fn default() -> Self {
        Self {
            residence: "MUNIC_RES".to_string(),
            treating: "MUNIC_MOV".to_string(),
            diagnosis: "DIAG_PRINC".to_string(),
            year: "ANO_CMPT".to_string(),
            month: "MES_CMPT".to_string(),
            hospital: "CGC_HOSP".to_string(),
        }
    }
}

impl RecordColumns {
    /// All record columns in projection order
    #[must_use]
    pub fn all(&self) -> [&str; 6] {
        [
            self.residence.as_str(),
            self.treating.as_str(),
            self.diagnosis.as_str(),
            self.year.as_str(),
            self.month.as_str(),
            self.hospital.as_str(),
        ]
    }
}

/// Read one partition file into record batches, projected onto the record columns
///
/// Columns missing from the file are skipped with a warning; the aggregator
/// decides which of them it actually requires.
pub fn read_partition(
    path: &Path,
    columns: &RecordColumns,
    batch_size: usize,
) -> Result<Vec<RecordBatch>> {
    let start = Instant::now();
    let file = safe_open_file(path, "reading admission partition")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let file_schema = builder.schema().clone();
    let projection = columns
        .all()
        .into_iter()
        .filter_map(|name| match file_schema.index_of(name) {
            Ok(idx) => Some(idx),
            Err(_) => {
                log_warning(&format!("Column {name} not found in partition"), Some(path));
                None
            }
        })
        .sorted()
        .collect_vec();

    let builder = builder.with_batch_size(batch_size.max(1));
    let reader = if projection.is_empty() {
        builder.build()?
    } else {
        let mask = ProjectionMask::roots(builder.parquet_schema(), projection);
        builder.with_projection(mask).build()?
    };

    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    log_operation_complete(
        "read",
        path,
        batches.iter().map(RecordBatch::num_rows).sum(),
        Some(start.elapsed()),
    );
    Ok(batches)
}
