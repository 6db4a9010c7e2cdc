//! Partition file discovery and filename-based filtering.
//!
//! Admission files are named after the region and period they cover, e.g.
//! `RDRJ2401.parquet` holds the January 2024 records for region `RJ`. All
//! filtering happens on the file name, without opening the file.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::util::validate_directory;
use crate::error::{FlowError, Result};
use crate::period::Period;
use crate::utils::logging::{log_operation_complete, log_operation_start, log_warning};

/// Character offsets locating region and period inside a partition file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileNaming {
    /// File extension of partition files (without the dot)
    pub extension: String,
    /// Byte range of the region code
    pub region: (usize, usize),
    /// Byte range of the year (two digits mean 2000 + yy)
    pub year: (usize, usize),
    /// Byte range of the month
    pub month: (usize, usize),
}

impl Default for FileNaming {
    fn default() -> Self {
        Self {
            extension: "parquet".to_string(),
            region: (2, 4),
            year: (4, 6),
            month: (6, 8),
        }
    }
}

impl FileNaming {
    /// Parse region and period out of a file name
    ///
    /// Returns `None` when the name is too short or the period digits are not numeric.
    #[must_use]
    pub fn parse(&self, file_name: &str) -> Option<(String, Period)> {
        let slice = |(start, end): (usize, usize)| file_name.get(start..end);

        let region = slice(self.region)?.to_string();
        let year_text = slice(self.year)?;
        let year: u16 = year_text.parse().ok()?;
        let year = if year_text.len() == 2 { 2000 + year } else { year };
        let month: u8 = slice(self.month)?.parse().ok()?;

        Some((region, Period::new(year, month)?))
    }

    /// Check the offsets are usable
    pub fn validate(&self) -> Result<()> {
        for (label, (start, end)) in [
            ("region", self.region),
            ("year", self.year),
            ("month", self.month),
        ] {
            if start >= end {
                return Err(FlowError::Config(format!(
                    "file naming {label} range {start}..{end} is empty"
                )));
            }
        }
        if !matches!(self.year.1 - self.year.0, 2 | 4) {
            return Err(FlowError::Config(
                "file naming year range must cover 2 or 4 characters".to_string(),
            ));
        }
        Ok(())
    }
}

/// A partition file and the region/period encoded in its name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PartitionFile {
    pub path: PathBuf,
    pub region: String,
    pub period: Period,
}

/// Exact-match filters over partition files; empty sets do not filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionFilter {
    pub regions: BTreeSet<String>,
    pub periods: BTreeSet<Period>,
    pub years: BTreeSet<u16>,
    pub months: BTreeSet<u8>,
}

impl PartitionFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
            && self.periods.is_empty()
            && self.years.is_empty()
            && self.months.is_empty()
    }

    /// Whether a partition passes every non-empty filter
    #[must_use]
    pub fn matches(&self, file: &PartitionFile) -> bool {
        (self.regions.is_empty() || self.regions.contains(&file.region))
            && (self.periods.is_empty() || self.periods.contains(&file.period))
            && (self.years.is_empty() || self.years.contains(&file.period.year()))
            && (self.months.is_empty()
                || file.period.month().is_some_and(|m| self.months.contains(&m)))
    }

    /// Human readable description for logs and error messages
    #[must_use]
    pub fn describe(&self) -> String {
        if self.is_empty() {
            return "no filters".to_string();
        }
        let mut parts = Vec::new();
        if !self.regions.is_empty() {
            parts.push(format!("regions={}", self.regions.iter().join(",")));
        }
        if !self.periods.is_empty() {
            parts.push(format!("periods={}", self.periods.iter().join(",")));
        }
        if !self.years.is_empty() {
            parts.push(format!("years={}", self.years.iter().join(",")));
        }
        if !self.months.is_empty() {
            parts.push(format!("months={}", self.months.iter().join(",")));
        }
        parts.join(" ")
    }
}

/// List partition files in a directory, sorted by path
///
/// Files with the right extension whose names cannot be parsed are skipped
/// with a warning.
pub fn discover_partitions(dir: &Path, naming: &FileNaming) -> Result<Vec<PartitionFile>> {
    log_operation_start("Searching for partition files in", dir);
    validate_directory(dir, "discovering partition files")?;

    let entries = fs::read_dir(dir)
        .map_err(|e| FlowError::io(dir, "Failed to read partition directory", e))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| FlowError::io(dir, "Failed to read directory entry", e))?
            .path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != naming.extension.as_str()) {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match naming.parse(file_name) {
            Some((region, period)) => files.push(PartitionFile {
                path: path.clone(),
                region,
                period,
            }),
            None => log_warning("Skipping file with unrecognised name", Some(&path)),
        }
    }

    files.sort();
    log_operation_complete("found", dir, files.len(), None);
    Ok(files)
}

/// Apply a filter to discovered partitions
///
/// An empty result is a terminal error for the invocation.
pub fn select_partitions(
    dir: &Path,
    files: Vec<PartitionFile>,
    filter: &PartitionFilter,
) -> Result<Vec<PartitionFile>> {
    let selected = files.into_iter().filter(|f| filter.matches(f)).collect_vec();
    if selected.is_empty() {
        return Err(FlowError::NoMatchingPartitions {
            dir: dir.to_path_buf(),
            filters: filter.describe(),
        });
    }
    log::info!(
        "Selected {} partition files ({})",
        selected.len(),
        filter.describe()
    );
    Ok(selected)
}

/// Group partitions by region code; each group becomes one unit of parallel work
#[must_use]
pub fn group_by_region(files: Vec<PartitionFile>) -> BTreeMap<String, Vec<PartitionFile>> {
    let mut groups: BTreeMap<String, Vec<PartitionFile>> = BTreeMap::new();
    for file in files {
        groups.entry(file.region.clone()).or_default().push(file);
    }
    groups
}
