use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use hosp_flows::config::DelimitedTable;
use hosp_flows::diagnosis::chapters;
use hosp_flows::{OutputFormat, PeriodGrouping, Period, PipelineConfig, SelfLoopPolicy};

/// Command-line arguments for hosp-flows
///
/// Flags override the values of the configuration file.
#[derive(Parser, Debug)]
#[command(name = "hosp-flows")]
#[command(about = "Municipality hospitalization flow networks from SIH admission partitions")]
#[command(version)]
struct Args {
    /// JSON pipeline configuration
    #[arg(short, long, env = "HOSP_FLOWS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory with the partition files
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// Region code to include (repeatable)
    #[arg(long = "region")]
    regions: Vec<String>,

    /// Period YYYYMM to include (repeatable)
    #[arg(long = "period", value_parser = parse_period)]
    periods: Vec<Period>,

    /// Year to include (repeatable)
    #[arg(long = "year")]
    years: Vec<u16>,

    /// Month 1-12 to include (repeatable)
    #[arg(long = "month", value_parser = clap::value_parser!(u8).range(1..=12))]
    months: Vec<u8>,

    /// Diagnosis code prefix to include (repeatable)
    #[arg(long = "diagnosis")]
    diagnoses: Vec<String>,

    /// Diagnosis category label or ICD-10 chapter numeral (repeatable)
    #[arg(long = "category")]
    categories: Vec<String>,

    /// Keep flows apart per year or month
    #[arg(long, value_parser = parse_grouping)]
    group_by: Option<PeriodGrouping>,

    /// Code → municipality name table (`cod;value`)
    #[arg(long, env = "HOSP_FLOWS_MUNICIPALITIES")]
    municipality_names: Option<PathBuf>,

    /// Diagnosis → category table (`codigo;descricao`)
    #[arg(long)]
    diagnosis_table: Option<PathBuf>,

    /// Municipality name corrections (JSON)
    #[arg(long)]
    corrections: Option<PathBuf>,

    /// Municipality boundaries (GeoJSON)
    #[arg(long)]
    municipality_geometry: Option<PathBuf>,

    /// State boundaries (GeoJSON)
    #[arg(long)]
    state_geometry: Option<PathBuf>,

    /// Worker threads for the aggregation phase
    #[arg(short, long)]
    workers: Option<usize>,

    /// Leave within-municipality flows out of community detection
    #[arg(long)]
    drop_self_loops: bool,

    /// Skip community detection
    #[arg(long)]
    no_communities: bool,

    /// Artifact directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Artifact format: csv or parquet
    #[arg(short, long, value_parser = parse_format)]
    format: Option<OutputFormat>,

    /// Hide the progress bar
    #[arg(long)]
    quiet: bool,
}

fn parse_period(value: &str) -> std::result::Result<Period, String> {
    value
        .parse::<u32>()
        .ok()
        .and_then(Period::from_yyyymm)
        .ok_or_else(|| format!("'{value}' is not a YYYYMM period"))
}

fn parse_format(value: &str) -> std::result::Result<OutputFormat, String> {
    value.parse().map_err(|e: hosp_flows::FlowError| e.to_string())
}

fn parse_grouping(value: &str) -> std::result::Result<PeriodGrouping, String> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Ok(PeriodGrouping::None),
        "year" => Ok(PeriodGrouping::Year),
        "month" => Ok(PeriodGrouping::Month),
        other => Err(format!("unknown grouping '{other}' (none, year, month)")),
    }
}

/// Fold the command line into a configuration
fn build_config(args: Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = args.input_dir {
        config.input_dir = dir;
    }
    config.partitions.regions.extend(args.regions);
    config.partitions.periods.extend(args.periods);
    config.partitions.years.extend(args.years);
    config.partitions.months.extend(args.months);

    config.diagnoses.codes.extend(args.diagnoses);
    for category in args.categories {
        let label = chapters::by_numeral(&category).map_or(category, |c| c.label.to_string());
        config.diagnoses.categories.insert(label);
    }
    if let Some(grouping) = args.group_by {
        config = config.with_period_grouping(grouping);
    }

    if let Some(path) = args.municipality_names {
        config = config.with_municipality_names(DelimitedTable::municipality_names(path));
    }
    if let Some(path) = args.diagnosis_table {
        config = config.with_diagnosis_table(DelimitedTable::diagnosis_chapters(path));
    }
    if let Some(path) = args.corrections {
        config = config.with_corrections(path);
    }
    if let Some(path) = args.municipality_geometry {
        config = config.with_municipality_geometry(path);
    }
    if let Some(path) = args.state_geometry {
        config = config.with_state_geometry(path);
    }

    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if args.drop_self_loops {
        config = config.with_self_loops(SelfLoopPolicy::Drop);
    }
    if args.no_communities {
        config.community.enabled = false;
    }
    if let Some(dir) = args.output_dir {
        config.output.dir = dir;
    }
    if let Some(format) = args.format {
        config.output.format = format;
    }
    if args.quiet {
        config = config.with_progress(false);
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = build_config(args)?;

    info!("Reading partitions from {}", config.input_dir.display());
    let run = hosp_flows::run(&config).context("Pipeline run failed")?;

    let summary = &run.summary;
    info!(
        "{} hospitalizations in {} partitions, {} edges ({} without distance)",
        summary.aggregation.rows_aggregated,
        summary.partitions,
        summary.geo.edges,
        summary.geo.unresolved_edges
    );
    for artifact in &summary.artifacts {
        info!("  {}", artifact.display());
    }
    Ok(())
}
