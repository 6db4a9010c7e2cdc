//! Municipality hospitalization flow networks.
//!
//! Reads region/period partitioned Parquet admission records, tabulates
//! residence → treatment flows per diagnosis category, resolves codes to
//! corrected municipality names, adds centroid distances and partitions the
//! resulting directed graphs into communities.

pub mod aggregate;
pub mod community;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod graph;
pub mod output;
pub mod period;
pub mod pipeline;
pub mod reader;
pub mod resolve;
pub mod spatial;
pub mod utils;

// Core types
pub use config::PipelineConfig;
pub use error::{FlowError, Result};
pub use period::Period;
pub use pipeline::{PipelineRun, References, RunSummary, build_network, run};

// Stage types
pub use aggregate::{FlowKey, FlowTable, PeriodGrouping, Tabulation};
pub use community::{CommunityDetector, CommunityOutcome, Infomap, Partition, SelfLoopPolicy};
pub use diagnosis::{DiagnosisFilter, DiagnosisTable};
pub use graph::{FlowGraph, GraphScope};
pub use output::{ArtifactWriter, OutputFormat};
pub use reader::{PartitionFilter, RecordColumns};
pub use resolve::{CorrectionTable, MunicipalityKey, MunicipalityTable, Resolver};
pub use spatial::{FlowEdge, GeometryReference};
