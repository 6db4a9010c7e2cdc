//! Distance enrichment and reference geometry loading

use geo::Point;
use proptest::prelude::*;

use hosp_flows::aggregate::FlowKey;
use hosp_flows::spatial::{CentroidMode, LayerProperties, enrich, haversine_km};
use hosp_flows::{CorrectionTable, FlowTable, GeometryReference, MunicipalityKey};

use crate::utils::{Boundary, degrees_east, write_municipality_geometry};

fn point() -> impl Strategy<Value = Point<f64>> {
    (-180.0f64..180.0, -90.0f64..90.0).prop_map(|(lon, lat)| Point::new(lon, lat))
}

proptest! {
    #[test]
    fn haversine_is_symmetric(a in point(), b in point()) {
        let ab = haversine_km(a, b);
        let ba = haversine_km(b, a);
        prop_assert!((ab - ba).abs() < 1e-9);
        prop_assert!(ab >= 0.0);
        prop_assert!(haversine_km(a, a).abs() < 1e-9);
    }
}

#[test]
fn enriched_reverse_edges_share_a_distance() {
    let a = MunicipalityKey::new("A", "Pará");
    let b = MunicipalityKey::new("B", "Pará");
    let reference = GeometryReference::from_points([
        (a.to_string(), None, Point::new(-48.5, -1.45)),
        (b.to_string(), None, Point::new(-49.9, -2.2)),
    ]);
    let key = |o: &MunicipalityKey, d: &MunicipalityKey| FlowKey {
        origin: o.clone(),
        destination: d.clone(),
        category: None,
        period: None,
    };
    let flows: FlowTable<MunicipalityKey> =
        [(key(&a, &b), 3), (key(&b, &a), 2)].into_iter().collect();

    let (edges, report) = enrich(&flows, &reference);
    assert_eq!(edges.len(), 2);
    let there = edges[0].distance_km.unwrap();
    let back = edges[1].distance_km.unwrap();
    assert!((there - back).abs() < 1e-9);
    assert_eq!(report.unresolved_edges, 0);
}

#[test]
fn geojson_reference_applies_state_corrections() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_municipality_geometry(
        dir.path(),
        &[
            Boundary { name: "Manaus", state: "Amazônas", code: "1302603", lon: -60.0, lat: -3.1 },
            Boundary { name: "A", state: "Rio de Janeiro", code: "1", lon: 0.0, lat: 0.0 },
            Boundary { name: "B", state: "Rio de Janeiro", code: "2", lon: degrees_east(100.0), lat: 0.0 },
        ],
    );
    let corrections =
        CorrectionTable::from_json_str(r#"{"states": [{"from": "Amazônas", "to": "Amazonas"}]}"#)
            .unwrap();

    let reference = GeometryReference::from_geojson(
        &path,
        &LayerProperties::municipalities(),
        CentroidMode::Native,
        &corrections,
    )
    .unwrap();

    assert_eq!(reference.len(), 3);
    assert!(reference.contains("Manaus - Amazonas"));
    assert_eq!(
        reference.get("Manaus - Amazonas").unwrap().code.as_deref(),
        Some("1302603")
    );

    let a = reference.centroid("A - Rio de Janeiro").unwrap();
    let b = reference.centroid("B - Rio de Janeiro").unwrap();
    assert!((haversine_km(a, b) - 100.0).abs() < 1e-6);
}

#[test]
fn missing_geometry_leaves_distance_empty() {
    let known = MunicipalityKey::new("A", "Pará");
    let unknown = MunicipalityKey::new("Nowhere", "Pará");
    let reference = GeometryReference::from_points([(known.to_string(), None, Point::new(0.0, 0.0))]);
    let flows: FlowTable<MunicipalityKey> = [(
        FlowKey {
            origin: known,
            destination: unknown.clone(),
            category: None,
            period: None,
        },
        4,
    )]
    .into_iter()
    .collect();

    let (edges, report) = enrich(&flows, &reference);
    assert_eq!(edges[0].distance_km, None);
    assert_eq!(edges[0].count, 4);
    assert_eq!(report.unresolved_municipalities, vec![unknown.to_string()]);
    assert_eq!(report.unresolved_hospitalizations, 4);
}
