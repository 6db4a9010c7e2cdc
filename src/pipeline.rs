//! Pipeline orchestration
//!
//! Loads the reference data once, runs the parallel map phase over the
//! selected partitions and then the single-threaded stages: resolution,
//! distance enrichment, graph building, community detection and artifacts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::aggregate::{
    AggregationContext, AggregationReport, FlowTable, aggregate_partitions, effective_workers,
};
use crate::community::{CommunityDetector, CommunityOutcome, detect_all};
use crate::config::PipelineConfig;
use crate::diagnosis::{DiagnosisFilter, DiagnosisTable};
use crate::error::{FlowError, Result};
use crate::graph::{FlowGraph, GraphScope, build_graphs};
use crate::output::{
    ArtifactWriter, CATEGORIES_TABLE, COMMUNITIES_TABLE, CategoryCodes, FLOWS_TABLE,
    MUNICIPALITIES_TABLE, ORIGIN_SUMMARY_TABLE, RUN_SUMMARY_FILE, STATE_FLOWS_TABLE,
    category_rows, community_rows, flow_rows, municipality_rows, origin_summary_rows,
    state_flow_rows,
};
use crate::reader::{discover_partitions, group_by_region, select_partitions};
use crate::resolve::{CorrectionTable, MunicipalityKey, MunicipalityTable, ResolutionReport, Resolver};
use crate::spatial::{
    CentroidMode, FlowEdge, GeoReport, GeometryReference, MunicipalityInfo, StateFlow,
    describe_origins, enrich, municipality_code, state_flows,
};

/// Reference data shared by every stage of a run
#[derive(Debug, Clone, Default)]
pub struct References {
    pub classifier: DiagnosisTable,
    pub resolver: Resolver,
    pub municipalities: GeometryReference,
    /// Equal-area state centroids; `None` disables the state flow table
    pub states: Option<GeometryReference>,
}

impl References {
    /// Load every configured reference table
    pub fn load(config: &PipelineConfig) -> Result<Self> {
        let refs = &config.references;

        let names = refs
            .municipality_names
            .as_ref()
            .ok_or_else(|| FlowError::Config("a municipality name table is required".to_string()))?;
        let municipalities = MunicipalityTable::from_csv(
            &names.path,
            &names.code_column,
            &names.value_column,
            names.delimiter_byte()?,
        )?;

        let classifier = match &refs.diagnosis_table {
            Some(table) => DiagnosisTable::from_csv(
                &table.path,
                &table.code_column,
                &table.value_column,
                table.delimiter_byte()?,
            )?,
            None => {
                info!("Using built-in ICD-10 chapters as diagnosis categories");
                DiagnosisTable::icd10_chapters()
            }
        };

        let corrections = match &refs.corrections {
            Some(path) => CorrectionTable::from_json_file(path)?,
            None => {
                warn!("No correction table configured; municipality names are used as recorded");
                CorrectionTable::default()
            }
        };

        let geometry = match &refs.municipality_geometry {
            Some(path) => GeometryReference::from_geojson(
                path,
                &refs.municipality_properties,
                CentroidMode::Native,
                &corrections,
            )?,
            None => {
                warn!("No municipality geometry configured; distances will be empty");
                GeometryReference::default()
            }
        };

        let states = refs
            .state_geometry
            .as_ref()
            .map(|path| {
                GeometryReference::from_geojson(
                    path,
                    &refs.state_properties,
                    CentroidMode::EqualArea,
                    &corrections,
                )
            })
            .transpose()?;

        Ok(Self {
            classifier,
            resolver: Resolver::new(municipalities, corrections),
            municipalities: geometry,
            states,
        })
    }

    /// Correction targets absent from the municipality geometry
    ///
    /// A non-empty result means the correction table and the geometry come
    /// from different reference vintages.
    #[must_use]
    pub fn stale_corrections(&self) -> Vec<String> {
        if self.municipalities.is_empty() {
            return Vec::new();
        }
        let stale: Vec<String> = self
            .municipalities
            .missing(self.resolver.corrections().targets())
            .into_iter()
            .map(str::to_string)
            .collect();
        for target in &stale {
            warn!("Correction target '{target}' has no reference geometry");
        }
        stale
    }
}

/// Everything derived from an aggregated flow table
#[derive(Debug, Clone)]
pub struct FlowNetwork {
    pub edges: Vec<FlowEdge>,
    pub origins: Vec<MunicipalityInfo>,
    /// Output code of every municipality on an edge
    pub codes: BTreeMap<MunicipalityKey, String>,
    pub graphs: BTreeMap<GraphScope, FlowGraph>,
    pub communities: BTreeMap<GraphScope, CommunityOutcome>,
    pub state_flows: Option<Vec<StateFlow>>,
    pub resolution: ResolutionReport,
    pub geo: GeoReport,
}

/// Run the stages after aggregation on an in-memory flow table
///
/// Community detection is skipped entirely when `detector` is `None`.
pub fn build_network(
    flows: FlowTable<String>,
    references: &References,
    detector: Option<&dyn CommunityDetector>,
) -> Result<FlowNetwork> {
    let resolved = references.resolver.resolve_flows(flows);
    let (edges, geo) = enrich(&resolved.flows, &references.municipalities);

    let mut codes = BTreeMap::new();
    for edge in &edges {
        for key in [&edge.origin, &edge.destination] {
            if !codes.contains_key(key) {
                let code = municipality_code(key, &references.municipalities, &resolved.source_codes);
                codes.insert(key.clone(), code);
            }
        }
    }
    let origins = describe_origins(&edges, &references.municipalities, &resolved.source_codes);

    let graphs = build_graphs(&edges);
    let communities = match detector {
        Some(detector) => detect_all(&graphs, detector)?,
        None => graphs
            .keys()
            .map(|scope| (scope.clone(), CommunityOutcome::Skipped))
            .collect(),
    };
    let state_flows = references.states.as_ref().map(|states| state_flows(&edges, states));

    Ok(FlowNetwork {
        edges,
        origins,
        codes,
        graphs,
        communities,
        state_flows,
        resolution: resolved.report,
        geo,
    })
}

/// Summary written next to the artifacts
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub input_dir: PathBuf,
    pub partition_filter: String,
    pub diagnoses: DiagnosisFilter,
    pub partitions: usize,
    pub workers: usize,
    pub aggregation: AggregationReport,
    pub resolution: ResolutionReport,
    pub geo: GeoReport,
    pub stale_corrections: Vec<String>,
    /// Community detector, when detection ran
    pub detector: Option<&'static str>,
    /// Communities per scope; `None` when detection was skipped
    pub communities: BTreeMap<String, Option<usize>>,
    pub artifacts: Vec<PathBuf>,
}

/// Outcome of a complete run
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub network: FlowNetwork,
    pub summary: RunSummary,
}

/// Write every table of a network
pub fn write_artifacts(network: &FlowNetwork, writer: &ArtifactWriter) -> Result<Vec<PathBuf>> {
    let categories = CategoryCodes::from_edges(&network.edges);
    let mut paths = vec![
        writer.write_table(FLOWS_TABLE, &flow_rows(&network.edges, &network.codes, &categories))?,
        writer.write_table(
            ORIGIN_SUMMARY_TABLE,
            &origin_summary_rows(&network.edges, &network.codes, &categories),
        )?,
        writer.write_table(MUNICIPALITIES_TABLE, &municipality_rows(&network.origins))?,
        writer.write_table(CATEGORIES_TABLE, &category_rows(&categories))?,
        writer.write_table(
            COMMUNITIES_TABLE,
            &community_rows(&network.communities, &network.codes, &categories)?,
        )?,
    ];
    if let Some(flows) = &network.state_flows {
        paths.push(writer.write_table(STATE_FLOWS_TABLE, &state_flow_rows(flows))?);
    }
    Ok(paths)
}

/// Run the whole pipeline for a configuration
///
/// Nothing is written when aggregation fails.
pub fn run(config: &PipelineConfig) -> Result<PipelineRun> {
    let started_at = Utc::now();
    let start = Instant::now();
    config.validate()?;

    let references = References::load(config)?;
    let stale_corrections = references.stale_corrections();

    let files = discover_partitions(&config.input_dir, &config.naming)?;
    let selected = select_partitions(&config.input_dir, files, &config.partitions)?;
    let partitions = selected.len();
    let groups = group_by_region(selected);

    let ctx = AggregationContext {
        columns: &config.columns,
        classifier: &references.classifier,
        filter: &config.diagnoses,
        options: config.aggregation,
    };
    let tabulation = aggregate_partitions(
        &groups,
        &ctx,
        config.workers,
        config.batch_size,
        config.show_progress,
    )?;

    let detector: Option<&dyn CommunityDetector> =
        config.community.enabled.then_some(&config.community.infomap as &dyn CommunityDetector);
    let network = build_network(tabulation.flows, &references, detector)?;

    let writer = ArtifactWriter::new(&config.output.dir, config.output.format)?;
    let mut artifacts = write_artifacts(&network, &writer)?;
    artifacts.push(writer.dir().join(RUN_SUMMARY_FILE));

    let communities = network
        .communities
        .iter()
        .map(|(scope, outcome)| {
            (
                scope.to_string(),
                outcome.partition().map(|p| p.num_communities()),
            )
        })
        .collect();
    let summary = RunSummary {
        started_at,
        finished_at: Utc::now(),
        elapsed_seconds: start.elapsed().as_secs_f64(),
        input_dir: config.input_dir.clone(),
        partition_filter: config.partitions.describe(),
        diagnoses: config.diagnoses.clone(),
        partitions,
        workers: effective_workers(config.workers),
        aggregation: tabulation.report,
        resolution: network.resolution.clone(),
        geo: network.geo.clone(),
        stale_corrections,
        detector: detector.map(|d| d.name()),
        communities,
        artifacts,
    };
    writer.write_json(RUN_SUMMARY_FILE, &summary)?;

    info!(
        "Pipeline finished in {:.1}s: {} edges, {} graphs, artifacts in {}",
        summary.elapsed_seconds,
        network.edges.len(),
        network.graphs.len(),
        writer.dir().display()
    );
    Ok(PipelineRun { network, summary })
}
