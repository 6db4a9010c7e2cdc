//! Flow aggregator
//!
//! Parallel map-reduce over admission partitions. Every region group of files
//! is tabulated sequentially inside one worker; groups run concurrently on a
//! dedicated rayon pool and their partial tables are merged by summing counts
//! per key. The merge is associative and commutative, so the result does not
//! depend on how files are grouped or in which order partials arrive.

pub mod table;

use std::collections::BTreeMap;
use std::time::Instant;

use arrow::array::{Array, StringArray};
use arrow::record_batch::RecordBatch;
use indicatif::ProgressBar;
use log::{debug, info};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::diagnosis::{DiagnosisFilter, DiagnosisTable};
use crate::error::{FlowError, Result};
use crate::period::Period;
use crate::reader::{PartitionFile, RecordColumns, read_partition};
use crate::utils::arrow::get_string_column;
use crate::utils::logging::{create_main_progress_bar, finish_progress_bar};

pub use table::{FlowKey, FlowTable};

/// How admission periods enter the grouping key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodGrouping {
    /// Periods are not part of the key
    None,
    /// Group by admission year
    #[default]
    Year,
    /// Group by admission year and month
    Month,
}

/// Grouping dimensions beyond origin and destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationOptions {
    /// Include the diagnosis category in the key
    pub by_category: bool,
    /// Include the admission period in the key
    pub period: PeriodGrouping,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            by_category: true,
            period: PeriodGrouping::Year,
        }
    }
}

/// Row accounting of an aggregation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub files_read: usize,
    pub rows_read: u64,
    /// Rows with a missing or blank origin or destination
    pub blank_keys: u64,
    /// Rows rejected by the diagnosis allowlist
    pub filtered_out: u64,
    /// Rows without a valid admission period when periods are grouped
    pub invalid_periods: u64,
    /// Aggregated rows whose diagnosis has no category
    pub unmapped_diagnoses: u64,
    pub rows_aggregated: u64,
}

impl AggregationReport {
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            files_read: self.files_read + other.files_read,
            rows_read: self.rows_read + other.rows_read,
            blank_keys: self.blank_keys + other.blank_keys,
            filtered_out: self.filtered_out + other.filtered_out,
            invalid_periods: self.invalid_periods + other.invalid_periods,
            unmapped_diagnoses: self.unmapped_diagnoses + other.unmapped_diagnoses,
            rows_aggregated: self.rows_aggregated + other.rows_aggregated,
        }
    }
}

/// Partial or final result of the map phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tabulation {
    pub flows: FlowTable<String>,
    pub report: AggregationReport,
}

impl Tabulation {
    /// Combine two tabulations; associative and commutative
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.flows.merge(other.flows);
        self.report = self.report.merge(other.report);
        self
    }
}

/// Read-only inputs shared by all workers
#[derive(Debug, Clone, Copy)]
pub struct AggregationContext<'a> {
    pub columns: &'a RecordColumns,
    pub classifier: &'a DiagnosisTable,
    pub filter: &'a DiagnosisFilter,
    pub options: AggregationOptions,
}

impl AggregationContext<'_> {
    fn needs_diagnosis(&self) -> bool {
        self.options.by_category || !self.filter.is_empty()
    }
}

fn cell(array: &StringArray, row: usize) -> Option<&str> {
    (!array.is_null(row)).then(|| array.value(row))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Tabulate one record batch into `acc`
pub fn tabulate_batch(
    batch: &RecordBatch,
    ctx: &AggregationContext<'_>,
    acc: &mut Tabulation,
) -> Result<()> {
    let columns = ctx.columns;
    let residence = get_string_column(batch, &columns.residence, true)?
        .ok_or_else(|| FlowError::missing_column(&columns.residence, "record batch"))?;
    let treating = get_string_column(batch, &columns.treating, true)?
        .ok_or_else(|| FlowError::missing_column(&columns.treating, "record batch"))?;
    let diagnosis = get_string_column(batch, &columns.diagnosis, ctx.needs_diagnosis())?;
    let with_period = ctx.options.period != PeriodGrouping::None;
    let year = get_string_column(batch, &columns.year, with_period)?;
    let month = match ctx.options.period {
        PeriodGrouping::Month => get_string_column(batch, &columns.month, true)?,
        _ => None,
    };

    let report = &mut acc.report;
    report.rows_read += batch.num_rows() as u64;

    for row in 0..batch.num_rows() {
        let origin = non_blank(cell(&residence, row));
        let destination = non_blank(cell(&treating, row));
        let (Some(origin), Some(destination)) = (origin, destination) else {
            report.blank_keys += 1;
            continue;
        };

        let code = diagnosis.as_ref().and_then(|d| cell(d, row)).unwrap_or("");
        let category = if ctx.needs_diagnosis() {
            ctx.classifier.classify(code)
        } else {
            None
        };
        if !ctx.filter.accepts(code, category) {
            report.filtered_out += 1;
            continue;
        }

        let period = match ctx.options.period {
            PeriodGrouping::None => None,
            PeriodGrouping::Year => {
                let year = year
                    .as_ref()
                    .and_then(|y| cell(y, row))
                    .and_then(|y| y.trim().parse::<u16>().ok());
                match year {
                    Some(year) => Some(Period::year_only(year)),
                    None => {
                        report.invalid_periods += 1;
                        continue;
                    }
                }
            }
            PeriodGrouping::Month => {
                let parts = year
                    .as_ref()
                    .and_then(|y| cell(y, row))
                    .zip(month.as_ref().and_then(|m| cell(m, row)));
                match parts.and_then(|(y, m)| Period::parse_parts(y, m)) {
                    Some(period) => Some(period),
                    None => {
                        report.invalid_periods += 1;
                        continue;
                    }
                }
            }
        };

        if ctx.options.by_category && category.is_none() {
            report.unmapped_diagnoses += 1;
        }
        report.rows_aggregated += 1;

        acc.flows.add(
            FlowKey {
                origin: origin.to_string(),
                destination: destination.to_string(),
                category: ctx.options.by_category.then(|| category.map(str::to_string)).flatten(),
                period,
            },
            1,
        );
    }

    Ok(())
}

/// Tabulate in-memory batches in one pass
pub fn tabulate_batches(
    batches: &[RecordBatch],
    ctx: &AggregationContext<'_>,
) -> Result<Tabulation> {
    let mut acc = Tabulation::default();
    for batch in batches {
        tabulate_batch(batch, ctx, &mut acc)?;
    }
    Ok(acc)
}

/// Tabulate the files of one region group sequentially
fn tabulate_group(
    region: &str,
    files: &[PartitionFile],
    ctx: &AggregationContext<'_>,
    batch_size: usize,
    progress: &ProgressBar,
) -> Result<Tabulation> {
    let start = Instant::now();
    let mut acc = Tabulation::default();

    for file in files {
        for batch in read_partition(&file.path, ctx.columns, batch_size)? {
            tabulate_batch(&batch, ctx, &mut acc)?;
        }
        acc.report.files_read += 1;
        progress.inc(1);
    }

    debug!(
        "Region {region}: {} files, {} rows, {} flow keys in {:?}",
        files.len(),
        acc.report.rows_read,
        acc.flows.len(),
        start.elapsed()
    );
    Ok(acc)
}

/// Worker-count setting for the map phase
#[must_use]
pub fn effective_workers(workers: Option<usize>) -> usize {
    workers.filter(|w| *w > 0).unwrap_or_else(num_cpus::get)
}

/// Aggregate grouped partitions in parallel
///
/// Each region group is one unit of work and is never split. Groups are not
/// pinned to workers ahead of time: the pool's work stealing decides which
/// worker tabulates which group. Partials are merged by key sum, so the result
/// is the same for any assignment and any worker count.
///
/// Any failing group aborts the whole aggregation; no partial result is
/// returned.
pub fn aggregate_partitions(
    groups: &BTreeMap<String, Vec<PartitionFile>>,
    ctx: &AggregationContext<'_>,
    workers: Option<usize>,
    batch_size: usize,
    show_progress: bool,
) -> Result<Tabulation> {
    let workers = effective_workers(workers);
    let total_files: usize = groups.values().map(Vec::len).sum();
    info!(
        "Aggregating {total_files} partition files in {} region groups with {workers} workers",
        groups.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| FlowError::WorkerPool(e.to_string()))?;

    let progress = create_main_progress_bar(
        total_files as u64,
        Some("Aggregating partitions"),
        show_progress,
    );
    let start = Instant::now();

    let partials: Vec<Tabulation> = pool.install(|| {
        groups
            .par_iter()
            .map(|(region, files)| tabulate_group(region, files, ctx, batch_size, &progress))
            .collect::<Result<Vec<_>>>()
    })?;

    let result = partials.into_iter().fold(Tabulation::default(), Tabulation::merge);
    finish_progress_bar(&progress, Some("Aggregation complete"));

    info!(
        "Aggregated {} rows into {} flow keys in {:?} ({} blank keys, {} filtered, {} unmapped diagnoses)",
        result.report.rows_aggregated,
        result.flows.len(),
        start.elapsed(),
        result.report.blank_keys,
        result.report.filtered_out,
        result.report.unmapped_diagnoses
    );
    Ok(result)
}
