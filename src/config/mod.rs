//! Configuration for a pipeline run.
//!
//! Every section has defaults matching the SIH admission files and IBGE
//! reference data, so a JSON configuration only needs the paths.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregationOptions, PeriodGrouping};
use crate::community::{Infomap, SelfLoopPolicy};
use crate::diagnosis::DiagnosisFilter;
use crate::error::util::safe_read_to_string;
use crate::error::{FlowError, Result};
use crate::output::OutputFormat;
use crate::reader::{DEFAULT_BATCH_SIZE, FileNaming, PartitionFilter, RecordColumns};
use crate::spatial::LayerProperties;

/// A delimited reference table with a code column and a value column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimitedTable {
    pub path: PathBuf,
    #[serde(default = "DelimitedTable::default_code_column")]
    pub code_column: String,
    #[serde(default = "DelimitedTable::default_value_column")]
    pub value_column: String,
    #[serde(default = "DelimitedTable::default_delimiter")]
    pub delimiter: char,
}

impl DelimitedTable {
    fn default_code_column() -> String {
        "cod".to_string()
    }

    fn default_value_column() -> String {
        "value".to_string()
    }

    fn default_delimiter() -> char {
        ';'
    }

    /// Municipality code → name table (`cod;value`)
    pub fn municipality_names(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            code_column: Self::default_code_column(),
            value_column: Self::default_value_column(),
            delimiter: Self::default_delimiter(),
        }
    }

    /// Diagnosis code → chapter table (`codigo;descricao`)
    pub fn diagnosis_chapters(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            code_column: "codigo".to_string(),
            value_column: "descricao".to_string(),
            delimiter: ';',
        }
    }

    /// Delimiter as the byte the CSV reader expects
    pub fn delimiter_byte(&self) -> Result<u8> {
        u8::try_from(self.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                FlowError::Config(format!(
                    "delimiter '{}' of {} is not an ASCII character",
                    self.delimiter,
                    self.path.display()
                ))
            })
    }
}

/// Reference data locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencePaths {
    /// Code → municipality name table
    pub municipality_names: Option<DelimitedTable>,
    /// Diagnosis table; the built-in ICD-10 chapters are used when absent
    pub diagnosis_table: Option<DelimitedTable>,
    /// Correction and sentinel JSON file
    pub corrections: Option<PathBuf>,
    /// Municipality boundaries (GeoJSON)
    pub municipality_geometry: Option<PathBuf>,
    pub municipality_properties: LayerProperties,
    /// State boundaries (GeoJSON); enables the state flow table
    pub state_geometry: Option<PathBuf>,
    pub state_properties: LayerProperties,
}

impl Default for ReferencePaths {
    fn default() -> Self {
        Self {
            municipality_names: None,
            diagnosis_table: None,
            corrections: None,
            municipality_geometry: None,
            municipality_properties: LayerProperties::municipalities(),
            state_geometry: None,
            state_properties: LayerProperties::states(),
        }
    }
}

/// Community detection settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    pub enabled: bool,
    pub infomap: Infomap,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            infomap: Infomap::default(),
        }
    }
}

/// Artifact location and format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            format: OutputFormat::Csv,
        }
    }
}

/// Full configuration of a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the partition files
    pub input_dir: PathBuf,
    pub naming: FileNaming,
    pub partitions: PartitionFilter,
    pub columns: RecordColumns,
    pub diagnoses: DiagnosisFilter,
    pub aggregation: AggregationOptions,
    /// Worker threads for the map phase; host concurrency when unset
    pub workers: Option<usize>,
    pub batch_size: usize,
    pub show_progress: bool,
    pub references: ReferencePaths,
    pub community: CommunityConfig,
    pub output: OutputConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("data/SIH"),
            naming: FileNaming::default(),
            partitions: PartitionFilter::default(),
            columns: RecordColumns::default(),
            diagnoses: DiagnosisFilter::default(),
            aggregation: AggregationOptions::default(),
            workers: None,
            batch_size: DEFAULT_BATCH_SIZE,
            show_progress: true,
            references: ReferencePaths::default(),
            community: CommunityConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a configuration for an input directory with default settings
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = safe_read_to_string(path, "pipeline configuration")?;
        let config: Self = serde_json::from_str(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    #[must_use]
    pub fn with_municipality_names(mut self, table: DelimitedTable) -> Self {
        self.references.municipality_names = Some(table);
        self
    }

    #[must_use]
    pub fn with_diagnosis_table(mut self, table: DelimitedTable) -> Self {
        self.references.diagnosis_table = Some(table);
        self
    }

    #[must_use]
    pub fn with_corrections(mut self, path: impl Into<PathBuf>) -> Self {
        self.references.corrections = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_municipality_geometry(mut self, path: impl Into<PathBuf>) -> Self {
        self.references.municipality_geometry = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_state_geometry(mut self, path: impl Into<PathBuf>) -> Self {
        self.references.state_geometry = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_partitions(mut self, filter: PartitionFilter) -> Self {
        self.partitions = filter;
        self
    }

    #[must_use]
    pub fn with_diagnoses(mut self, filter: DiagnosisFilter) -> Self {
        self.diagnoses = filter;
        self
    }

    #[must_use]
    pub fn with_period_grouping(mut self, period: PeriodGrouping) -> Self {
        self.aggregation.period = period;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn with_self_loops(mut self, policy: SelfLoopPolicy) -> Self {
        self.community.infomap.self_loops = policy;
        self
    }

    #[must_use]
    pub fn with_output(mut self, dir: impl Into<PathBuf>, format: OutputFormat) -> Self {
        self.output = OutputConfig {
            dir: dir.into(),
            format,
        };
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Check settings that would otherwise fail late in the run
    pub fn validate(&self) -> Result<()> {
        self.naming.validate()?;
        if self.references.municipality_names.is_none() {
            return Err(FlowError::Config(
                "a municipality name table is required".to_string(),
            ));
        }
        for table in [
            self.references.municipality_names.as_ref(),
            self.references.diagnosis_table.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            table.delimiter_byte()?;
        }
        if self.workers == Some(0) {
            return Err(FlowError::Config("workers must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(FlowError::Config("batch_size must be at least 1".to_string()));
        }
        let teleportation = self.community.infomap.teleportation;
        if !(0.0..1.0).contains(&teleportation) {
            return Err(FlowError::Config(format!(
                "teleportation {teleportation} must lie in [0, 1)"
            )));
        }
        Ok(())
    }
}
