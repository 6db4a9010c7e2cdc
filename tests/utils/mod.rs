//! Fixtures: partition files, reference tables and geometries in temp dirs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use hosp_flows::config::DelimitedTable;
use hosp_flows::{OutputFormat, PipelineConfig};

/// One admission record; `None` cells are written as nulls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub residence: Option<String>,
    pub treating: Option<String>,
    pub diagnosis: Option<String>,
    pub year: String,
    pub month: String,
}

impl Record {
    #[must_use]
    pub fn new(residence: &str, treating: &str, diagnosis: &str, period: u32) -> Self {
        Self {
            residence: Some(residence.to_string()),
            treating: Some(treating.to_string()),
            diagnosis: Some(diagnosis.to_string()),
            year: (period / 100).to_string(),
            month: format!("{:02}", period % 100),
        }
    }
}

/// Record batch with the default SIH column names
#[must_use]
pub fn record_batch(records: &[Record]) -> RecordBatch {
    let strings = |f: &dyn Fn(&Record) -> Option<String>| -> ArrayRef {
        Arc::new(records.iter().map(f).collect::<StringArray>())
    };
    let schema = Schema::new(
        ["MUNIC_RES", "MUNIC_MOV", "DIAG_PRINC", "ANO_CMPT", "MES_CMPT", "CGC_HOSP"]
            .into_iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    );
    RecordBatch::try_new(
        Arc::new(schema),
        vec![
            strings(&|r| r.residence.clone()),
            strings(&|r| r.treating.clone()),
            strings(&|r| r.diagnosis.clone()),
            strings(&|r| Some(r.year.clone())),
            strings(&|r| Some(r.month.clone())),
            strings(&|_| Some("00000000000000".to_string())),
        ],
    )
    .unwrap()
}

/// Write records as a partition file, e.g. `RDRJ2401.parquet`
pub fn write_partition(dir: &Path, file_name: &str, records: &[Record]) -> PathBuf {
    let path = dir.join(file_name);
    let batch = record_batch(records);
    let file = fs::File::create(&path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    path
}

/// Write a `cod;value` municipality name table
pub fn write_municipality_names(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
    let path = dir.join("MUNIC_BR.csv");
    let mut content = String::from("cod;value\n");
    for (code, name) in entries {
        content.push_str(&format!("{code};{name}\n"));
    }
    fs::write(&path, content).unwrap();
    path
}

/// A municipality boundary: a small square around a centroid
#[derive(Debug, Clone)]
pub struct Boundary<'a> {
    pub name: &'a str,
    pub state: &'a str,
    pub code: &'a str,
    pub lon: f64,
    pub lat: f64,
}

fn square(lon: f64, lat: f64) -> serde_json::Value {
    let h = 0.01;
    serde_json::json!([[
        [lon - h, lat - h],
        [lon + h, lat - h],
        [lon + h, lat + h],
        [lon - h, lat + h],
        [lon - h, lat - h]
    ]])
}

/// Write a municipality GeoJSON layer with IBGE property names
pub fn write_municipality_geometry(dir: &Path, boundaries: &[Boundary<'_>]) -> PathBuf {
    let features: Vec<_> = boundaries
        .iter()
        .map(|b| {
            serde_json::json!({
                "type": "Feature",
                "properties": {"NM_MUN": b.name, "NM_UF": b.state, "CD_MUN": b.code},
                "geometry": {"type": "Polygon", "coordinates": square(b.lon, b.lat)}
            })
        })
        .collect();
    let path = dir.join("municipalities.geojson");
    let collection = serde_json::json!({"type": "FeatureCollection", "features": features});
    fs::write(&path, collection.to_string()).unwrap();
    path
}

/// Write a state GeoJSON layer
pub fn write_state_geometry(dir: &Path, states: &[(&str, &str, f64, f64)]) -> PathBuf {
    let features: Vec<_> = states
        .iter()
        .map(|(name, code, lon, lat)| {
            serde_json::json!({
                "type": "Feature",
                "properties": {"name_state": name, "code_state": code},
                "geometry": {"type": "Polygon", "coordinates": square(*lon, *lat)}
            })
        })
        .collect();
    let path = dir.join("states.geojson");
    let collection = serde_json::json!({"type": "FeatureCollection", "features": features});
    fs::write(&path, collection.to_string()).unwrap();
    path
}

/// Longitude offset in degrees of a point `km` east of (0, 0) on the equator
#[must_use]
pub fn degrees_east(km: f64) -> f64 {
    (km / hosp_flows::spatial::EARTH_RADIUS_KM).to_degrees()
}

/// Two Rio de Janeiro municipalities "A" and "B", 100 km apart on the equator
pub struct TwoTownFixture {
    pub dir: tempfile::TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config: PipelineConfig,
}

pub const CODE_A: &str = "330001";
pub const CODE_B: &str = "330002";

impl TwoTownFixture {
    /// Reference data only; partitions are written by each test
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("SIH");
        fs::create_dir_all(&input_dir).unwrap();
        let output_dir = dir.path().join("out");

        let names = write_municipality_names(dir.path(), &[(CODE_A, "A"), (CODE_B, "B")]);
        let geometry = write_municipality_geometry(
            dir.path(),
            &[
                Boundary { name: "A", state: "Rio de Janeiro", code: "3300010", lon: 0.0, lat: 0.0 },
                Boundary {
                    name: "B",
                    state: "Rio de Janeiro",
                    code: "3300020",
                    lon: degrees_east(100.0),
                    lat: 0.0,
                },
            ],
        );

        let config = PipelineConfig::new(&input_dir)
            .with_municipality_names(DelimitedTable::municipality_names(names))
            .with_municipality_geometry(geometry)
            .with_output(&output_dir, OutputFormat::Csv)
            .with_workers(2)
            .with_progress(false);

        Self {
            dir,
            input_dir,
            output_dir,
            config,
        }
    }

    /// The three records of the A/B scenario, in one January 2024 partition
    pub fn write_scenario(&self) {
        write_partition(
            &self.input_dir,
            "RDRJ2401.parquet",
            &[
                Record::new(CODE_A, CODE_A, "I10", 202401),
                Record::new(CODE_A, CODE_B, "I10", 202401),
                Record::new(CODE_B, CODE_A, "J45", 202401),
            ],
        );
    }
}
