//! Full pipeline runs over fixture partitions

use std::collections::BTreeSet;
use std::fs;

use parquet::file::reader::{FileReader, SerializedFileReader};

use hosp_flows::error::FlowError;
use hosp_flows::output::{
    COMMUNITIES_TABLE, FLOWS_TABLE, MUNICIPALITIES_TABLE, RUN_SUMMARY_FILE, STATE_FLOWS_TABLE,
};
use hosp_flows::{
    GraphScope, MunicipalityKey, OutputFormat, PartitionFilter, Period, SelfLoopPolicy, run,
};

use crate::utils::{CODE_A, CODE_B, Record, TwoTownFixture, write_partition, write_state_geometry};

fn key(name: &str) -> MunicipalityKey {
    MunicipalityKey::new(name, "Rio de Janeiro")
}

fn csv_rows(path: &std::path::Path) -> usize {
    fs::read_to_string(path).unwrap().lines().count() - 1
}

#[test]
fn two_town_scenario_end_to_end() {
    let fixture = TwoTownFixture::new();
    fixture.write_scenario();

    let result = run(&fixture.config).unwrap();
    let edges = &result.network.edges;

    let year = Some(Period::year_only(2024));
    let expected = [
        ("A", "A", "Circulatory", 0.0),
        ("A", "B", "Circulatory", 100.0),
        ("B", "A", "Respiratory", 100.0),
    ];
    assert_eq!(edges.len(), expected.len());
    for (edge, (origin, destination, category, distance)) in edges.iter().zip(expected) {
        assert_eq!(edge.origin, key(origin));
        assert_eq!(edge.destination, key(destination));
        assert_eq!(edge.category.as_deref(), Some(category));
        assert_eq!(edge.period, year);
        assert_eq!(edge.count, 1);
        let km = edge.distance_km.unwrap();
        assert!((km - distance).abs() < 1e-6, "{origin}->{destination}: {km}");
    }

    let all = &result.network.graphs[&GraphScope::All];
    assert_eq!(all.edge_count(), 3);
    assert_eq!(all.weight(&key("A"), &key("A")), 1);
    assert_eq!(all.weight(&key("A"), &key("B")), 1);
    assert_eq!(all.weight(&key("B"), &key("A")), 1);
    assert_eq!(all.weight(&key("B"), &key("B")), 0);

    let circulatory = &result.network.graphs[&GraphScope::Category("Circulatory".to_string())];
    assert_eq!(circulatory.edge_count(), 2);

    // Reference codes replace raw record codes in the artifacts
    assert_eq!(result.network.codes[&key("A")], "3300010");
    assert_eq!(result.network.codes[&key("B")], "3300020");

    let flows = fixture.output_dir.join(format!("{FLOWS_TABLE}.csv"));
    assert_eq!(csv_rows(&flows), 3);
    let municipalities = fixture.output_dir.join(format!("{MUNICIPALITIES_TABLE}.csv"));
    assert_eq!(csv_rows(&municipalities), 2);
    assert!(!fixture.output_dir.join(format!("{STATE_FLOWS_TABLE}.csv")).exists());

    let summary: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(fixture.output_dir.join(RUN_SUMMARY_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["aggregation"]["rows_aggregated"], 3);
    assert_eq!(summary["partitions"], 1);
    assert_eq!(
        summary["artifacts"].as_array().unwrap().len(),
        result.summary.artifacts.len()
    );
}

#[test]
fn every_graph_node_gets_one_community() {
    let fixture = TwoTownFixture::new();
    fixture.write_scenario();

    let result = run(&fixture.config).unwrap();
    for (scope, graph) in &result.network.graphs {
        let partition = result.network.communities[scope]
            .partition()
            .unwrap_or_else(|| panic!("no partition for {scope}"));
        let assigned: Vec<_> = partition.assignments().iter().map(|(k, _)| k).collect();
        let unique: BTreeSet<_> = assigned.iter().copied().collect();
        assert_eq!(assigned.len(), unique.len());
        assert_eq!(unique, graph.nodes().collect::<BTreeSet<_>>());
    }

    // One community row per node and scope: All (2) + Circulatory (2) + Respiratory (2)
    let communities = fixture.output_dir.join(format!("{COMMUNITIES_TABLE}.csv"));
    assert_eq!(csv_rows(&communities), 6);
}

#[test]
fn hospitalizations_are_conserved_through_resolution() {
    let fixture = TwoTownFixture::new();
    write_partition(
        &fixture.input_dir,
        "RDRJ2401.parquet",
        &[
            Record::new(CODE_A, CODE_B, "I10", 202401),
            Record::new(CODE_A, CODE_B, "I10", 202401),
            Record::new("339999", CODE_B, "I10", 202401),
            Record::new(CODE_B, CODE_B, "999", 202401),
        ],
    );
    write_partition(
        &fixture.input_dir,
        "RDRJ2402.parquet",
        &[Record::new(CODE_B, "999999", "J45", 202402)],
    );

    let result = run(&fixture.config).unwrap();
    let summary = &result.summary;
    let edge_total: u64 = result.network.edges.iter().map(|e| e.count).sum();

    assert_eq!(summary.aggregation.rows_aggregated, 5);
    assert_eq!(summary.resolution.hospitalizations_dropped, 2);
    assert_eq!(
        edge_total,
        summary.aggregation.rows_aggregated - summary.resolution.hospitalizations_dropped
    );
    // The unmapped diagnosis stays in the aggregate graph
    assert_eq!(result.network.graphs[&GraphScope::All].total_weight(), edge_total);
}

#[test]
fn parquet_artifacts_and_state_flows() {
    let mut fixture = TwoTownFixture::new();
    fixture.write_scenario();
    write_partition(
        &fixture.input_dir,
        "RDSP2401.parquet",
        &[Record::new("355030", CODE_A, "I10", 202401)],
    );
    let names = fixture.dir.path().join("MUNIC_BR.csv");
    fs::write(&names, format!("cod;value\n{CODE_A};A\n{CODE_B};B\n355030;São Paulo\n")).unwrap();
    let states = write_state_geometry(
        fixture.dir.path(),
        &[("Rio de Janeiro", "33", -43.0, -22.0), ("São Paulo", "35", -48.0, -22.5)],
    );
    fixture.config = fixture
        .config
        .clone()
        .with_state_geometry(states)
        .with_self_loops(SelfLoopPolicy::Drop)
        .with_output(&fixture.output_dir, OutputFormat::Parquet);

    let result = run(&fixture.config).unwrap();

    let state_flows = result.network.state_flows.as_ref().unwrap();
    assert_eq!(state_flows.len(), 1);
    assert_eq!(state_flows[0].origin_state, "São Paulo");
    assert_eq!(state_flows[0].destination_state, "Rio de Janeiro");
    assert!(state_flows[0].origin_centroid.is_some());

    let flows = fixture.output_dir.join(format!("{FLOWS_TABLE}.parquet"));
    let reader = SerializedFileReader::new(fs::File::open(flows).unwrap()).unwrap();
    assert_eq!(reader.metadata().file_metadata().num_rows(), 4);
    assert!(fixture.output_dir.join(format!("{STATE_FLOWS_TABLE}.parquet")).exists());

    // São Paulo has no reference geometry: its raw code is kept and it is reported
    assert_eq!(
        result.network.codes[&MunicipalityKey::new("São Paulo", "São Paulo")],
        "355030"
    );
    assert_eq!(
        result.summary.geo.unresolved_municipalities,
        vec!["São Paulo - São Paulo".to_string()]
    );
}

#[test]
fn unmatched_filters_fail_without_artifacts() {
    let mut fixture = TwoTownFixture::new();
    fixture.write_scenario();
    fixture.config = fixture.config.clone().with_partitions(PartitionFilter {
        regions: ["SP".to_string()].into(),
        ..PartitionFilter::default()
    });

    let err = run(&fixture.config).unwrap_err();
    assert!(matches!(err, FlowError::NoMatchingPartitions { .. }));
    assert!(!fixture.output_dir.exists());
}

#[test]
fn community_detection_can_be_disabled() {
    let mut fixture = TwoTownFixture::new();
    fixture.write_scenario();
    fixture.config.community.enabled = false;

    let result = run(&fixture.config).unwrap();
    assert!(result.network.communities.values().all(|o| o.partition().is_none()));
    assert!(result.summary.communities.values().all(Option::is_none));

    let communities = fixture.output_dir.join(format!("{COMMUNITIES_TABLE}.csv"));
    assert_eq!(fs::read_to_string(communities).unwrap().lines().count(), 1);
}
