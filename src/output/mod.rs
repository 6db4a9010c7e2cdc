//! Artifact writer
//!
//! Every table is built in memory, converted to a record batch with
//! `serde_arrow` and written to a temporary sibling that is renamed into
//! place, so a reader never observes a partially written artifact.

pub mod tables;

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use arrow::csv::WriterBuilder;
use arrow::datatypes::FieldRef;
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use serde_arrow::schema::{SchemaLike, TracingOptions};

use crate::error::util::ensure_directory;
use crate::error::{FlowError, Result};
use crate::utils::logging::log_operation_start;

pub use tables::{
    ALL_CATEGORIES_CODE, CategoryCodes, CategoryRow, CommunityRow, FlowRow, MunicipalityRow,
    OriginSummaryRow, StateFlowRow, category_rows, community_rows, flow_rows, municipality_rows,
    origin_summary_rows, state_flow_rows,
};

pub const FLOWS_TABLE: &str = "flows";
pub const ORIGIN_SUMMARY_TABLE: &str = "origin_summary";
pub const MUNICIPALITIES_TABLE: &str = "municipalities";
pub const CATEGORIES_TABLE: &str = "categories";
pub const COMMUNITIES_TABLE: &str = "communities";
pub const STATE_FLOWS_TABLE: &str = "state_flows";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

/// Table file format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "parquet" => Ok(Self::Parquet),
            other => Err(FlowError::Config(format!("unknown output format '{other}'"))),
        }
    }
}

/// Convert rows to a record batch; the schema is traced from the row type
pub fn rows_to_batch<T>(rows: &[T]) -> Result<RecordBatch>
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    let options = TracingOptions::default()
        .allow_null_fields(true)
        .strings_as_large_utf8(false);
    let fields = Vec::<FieldRef>::from_type::<T>(options)?;
    Ok(serde_arrow::to_record_batch(&fields, &rows)?)
}

/// Writes artifacts into one directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
    format: OutputFormat,
}

impl ArtifactWriter {
    /// Create the writer and its output directory
    pub fn new(dir: impl Into<PathBuf>, format: OutputFormat) -> Result<Self> {
        let dir = dir.into();
        ensure_directory(&dir, "output artifacts")?;
        Ok(Self { dir, format })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path of a table
    #[must_use]
    pub fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{}", self.format.extension()))
    }

    /// Write rows as a table, returning its path
    pub fn write_table<T>(&self, name: &str, rows: &[T]) -> Result<PathBuf>
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        let batch = rows_to_batch(rows)?;
        let path = self.table_path(name);
        log_operation_start("Writing", &path);

        let format = self.format;
        write_atomically(&path, |file| match format {
            OutputFormat::Csv => {
                let mut writer = WriterBuilder::new().with_header(true).build(file);
                writer.write(&batch)?;
                Ok(writer.into_inner())
            }
            OutputFormat::Parquet => {
                let props = WriterProperties::builder()
                    .set_compression(Compression::SNAPPY)
                    .build();
                let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
                writer.write(&batch)?;
                Ok(writer.into_inner()?)
            }
        })?;

        log::info!("Wrote {} rows to {}", batch.num_rows(), path.display());
        Ok(path)
    }

    /// Write a value as pretty-printed JSON
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        write_atomically(&path, |mut file| {
            serde_json::to_writer_pretty(&mut file, value)?;
            Ok(file)
        })?;
        log::info!("Wrote {}", path.display());
        Ok(path)
    }
}

/// Write through a temporary sibling and rename it over `path`
///
/// The writer handed back by `write` is flushed before the rename, so a failed
/// write never replaces an existing artifact.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(BufWriter<fs::File>) -> Result<BufWriter<fs::File>>,
{
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let file = fs::File::create(&tmp)
        .map_err(|e| FlowError::io(&tmp, "Failed to create temporary artifact", e))?;
    let written = write(BufWriter::new(file)).and_then(|writer| {
        writer
            .into_inner()
            .map_err(|e| FlowError::io(&tmp, "Failed to flush artifact", e.into_error()))
    });
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    fs::rename(&tmp, path).map_err(|e| FlowError::io(path, "Failed to move artifact into place", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, StringArray, UInt32Array};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn rows() -> Vec<CategoryRow> {
        vec![
            CategoryRow { category: "All".to_string(), code: 0 },
            CategoryRow { category: "Circulatory".to_string(), code: 1 },
        ]
    }

    #[test]
    fn csv_tables_have_headers_and_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("out"), OutputFormat::Csv).unwrap();
        let path = writer.write_table(CATEGORIES_TABLE, &rows()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "category,code\nAll,0\nCirculatory,1\n");
        let entries: Vec<_> = fs::read_dir(writer.dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn parquet_tables_round_trip_through_arrow() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), OutputFormat::Parquet).unwrap();
        let path = writer.write_table(CATEGORIES_TABLE, &rows()).unwrap();
        assert!(path.ends_with("categories.parquet"));

        let file = fs::File::open(path).unwrap();
        let batch = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let labels = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        let codes = batch.column(1).as_any().downcast_ref::<UInt32Array>().unwrap();
        assert_eq!(labels.value(1), "Circulatory");
        assert_eq!(codes.value(1), 1);
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn empty_tables_are_written_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), OutputFormat::Csv).unwrap();
        let path = writer.write_table::<CommunityRow>(COMMUNITIES_TABLE, &[]).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn format_parsing() {
        assert_eq!("Parquet".parse::<OutputFormat>().unwrap(), OutputFormat::Parquet);
        assert!("xlsx".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn failed_writes_keep_the_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), OutputFormat::Csv).unwrap();
        let path = writer.write_json(RUN_SUMMARY_FILE, &rows()).unwrap();
        let written: Vec<CategoryRow> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, rows());

        // JSON object keys must be strings
        let unserializable: std::collections::BTreeMap<Vec<u8>, u8> = [(vec![1], 1)].into();
        assert!(writer.write_json(RUN_SUMMARY_FILE, &unserializable).is_err());

        let content: Vec<CategoryRow> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(content, rows());
        assert_eq!(fs::read_dir(writer.dir()).unwrap().count(), 1);
    }
}
