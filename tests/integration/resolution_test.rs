//! Entity resolution with the bundled correction table

use std::path::PathBuf;

use proptest::prelude::*;

use hosp_flows::aggregate::FlowKey;
use hosp_flows::error::FlowError;
use hosp_flows::resolve::{Correction, CorrectionFile, UNKNOWN_CITY};
use hosp_flows::{CorrectionTable, FlowTable, MunicipalityKey, MunicipalityTable, Resolver};

fn bundled_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("resources/corrections.json")
}

fn bundled_file() -> CorrectionFile {
    serde_json::from_str(&std::fs::read_to_string(bundled_path()).unwrap()).unwrap()
}

fn apply<'a>(table: &'a CorrectionTable, key: &'a str) -> &'a str {
    table.correct(key).unwrap_or(key)
}

#[test]
fn bundled_corrections_are_valid() {
    let table = CorrectionTable::from_json_file(&bundled_path()).unwrap();
    assert!(!table.is_empty());
    assert_eq!(
        apply(&table, "Embu - São Paulo"),
        "Embu das Artes - São Paulo"
    );
    assert!(table.is_invalid("Ignorado - Unknown State"));
    assert!(table.is_invalid(&format!("{UNKNOWN_CITY} - Pará")));
}

#[test]
fn correcting_twice_equals_correcting_once() {
    let file = bundled_file();
    let table = CorrectionTable::new(file.clone()).unwrap();
    for correction in &file.municipalities {
        for key in [correction.from.as_str(), correction.to.as_str()] {
            let once = apply(&table, key);
            assert_eq!(apply(&table, once), once, "correcting '{key}' is not idempotent");
        }
    }
}

proptest! {
    #[test]
    fn correction_is_idempotent_for_any_key(name in "[A-Za-z ]{0,12}", state in "[A-Za-z ]{0,8}") {
        let table = CorrectionTable::from_json_file(&bundled_path()).unwrap();
        let key = MunicipalityKey::new(name, state).to_string();
        let once = apply(&table, &key).to_string();
        prop_assert_eq!(apply(&table, &once), once.as_str());
    }
}

#[test]
fn chained_corrections_are_rejected() {
    let file = CorrectionFile {
        municipalities: vec![
            Correction::new("Old - Pará", "Middle - Pará"),
            Correction::new("Middle - Pará", "New - Pará"),
        ],
        ..CorrectionFile::default()
    };
    assert!(matches!(
        CorrectionTable::new(file),
        Err(FlowError::InvalidCorrections(_))
    ));
}

#[test]
fn resolution_conserves_hospitalizations() {
    let municipalities = MunicipalityTable::from_entries([
        ("351510", "Embu"),
        ("355030", "São Paulo"),
        ("330455", "Rio de Janeiro"),
    ]);
    let corrections = CorrectionTable::from_json_file(&bundled_path()).unwrap();
    let resolver = Resolver::new(municipalities, corrections);

    let key = |o: &str, d: &str| FlowKey {
        origin: o.to_string(),
        destination: d.to_string(),
        category: None,
        period: None,
    };
    let flows: FlowTable<String> = [
        (key("351510", "355030"), 4),
        (key("3515103", "355030"), 1),
        (key("355030", "355030"), 10),
        (key("999999", "330455"), 3),
        (key("330455", "330455"), 7),
    ]
    .into_iter()
    .collect();
    let total = flows.total();

    let resolved = resolver.resolve_flows(flows);
    assert_eq!(
        resolved.flows.total() + resolved.report.hospitalizations_dropped,
        total
    );
    assert_eq!(resolved.report.hospitalizations_dropped, 3);
    assert_eq!(resolved.report.dropped_codes, vec!["999999".to_string()]);

    // Six- and seven-digit codes of the same town merge under the corrected key
    let embu = MunicipalityKey::new("Embu das Artes", "São Paulo");
    let sao_paulo = MunicipalityKey::new("São Paulo", "São Paulo");
    let merged = FlowKey {
        origin: embu.clone(),
        destination: sao_paulo,
        category: None,
        period: None,
    };
    assert_eq!(resolved.flows.get(&merged), 5);
    assert_eq!(resolved.source_codes[&embu], "351510");
}
