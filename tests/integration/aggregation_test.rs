//! Map-reduce aggregation: merge correctness, worker independence and filters

use std::collections::BTreeSet;

use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use hosp_flows::aggregate::{
    AggregationContext, AggregationOptions, Tabulation, aggregate_partitions, tabulate_batches,
};
use hosp_flows::reader::{FileNaming, discover_partitions, group_by_region, select_partitions};
use hosp_flows::{DiagnosisFilter, DiagnosisTable, PartitionFilter, Period, RecordColumns};

use crate::utils::{Record, record_batch, write_partition};

const ORIGINS: &[&str] = &["330455", "330330", "351510", "292740", ""];
const DIAGNOSES: &[&str] = &["I10", "J45", "C50", "O80", "", "999"];

fn record_strategy() -> impl Strategy<Value = Record> {
    (
        prop::sample::select(ORIGINS),
        prop::sample::select(ORIGINS),
        prop::sample::select(DIAGNOSES),
        2022u32..2025,
        1u32..13,
    )
        .prop_map(|(o, d, diag, year, month)| Record::new(o, d, diag, year * 100 + month))
}

fn tabulate(records: &[Record], ctx: &AggregationContext<'_>) -> Tabulation {
    tabulate_batches(&[record_batch(records)], ctx).unwrap()
}

/// Split `records` at the given points into consecutive chunks
fn chunks(records: &[Record], mut splits: Vec<usize>) -> Vec<&[Record]> {
    splits.iter_mut().for_each(|s| *s = (*s).min(records.len()));
    splits.sort_unstable();
    let mut start = 0;
    let mut parts = Vec::new();
    for split in splits {
        parts.push(&records[start..split]);
        start = split;
    }
    parts.push(&records[start..]);
    parts
}

proptest! {
    #[test]
    fn any_partitioning_merges_to_the_single_pass_result(
        records in prop::collection::vec(record_strategy(), 0..80),
        splits in prop::collection::vec(0usize..80, 0..6),
    ) {
        let columns = RecordColumns::default();
        let classifier = DiagnosisTable::icd10_chapters();
        let filter = DiagnosisFilter::default();
        let ctx = AggregationContext {
            columns: &columns,
            classifier: &classifier,
            filter: &filter,
            options: AggregationOptions::default(),
        };

        let whole = tabulate(&records, &ctx);
        let merged = chunks(&records, splits)
            .into_iter()
            .map(|part| tabulate(part, &ctx))
            .fold(Tabulation::default(), Tabulation::merge);

        prop_assert_eq!(&merged.flows, &whole.flows);
        prop_assert_eq!(merged.report, whole.report);
        prop_assert_eq!(whole.flows.total(), whole.report.rows_aggregated);
    }
}

#[test]
fn merge_order_does_not_matter() {
    let columns = RecordColumns::default();
    let classifier = DiagnosisTable::icd10_chapters();
    let filter = DiagnosisFilter::default();
    let ctx = AggregationContext {
        columns: &columns,
        classifier: &classifier,
        filter: &filter,
        options: AggregationOptions::default(),
    };

    let records: Vec<Record> = (0..200u32)
        .map(|i| {
            Record::new(
                ORIGINS[(i % 4) as usize],
                ORIGINS[(i * 7 % 4) as usize],
                DIAGNOSES[(i % 6) as usize],
                202300 + (i % 12) + 1,
            )
        })
        .collect();
    let mut partials: Vec<Tabulation> = records.chunks(17).map(|c| tabulate(c, &ctx)).collect();
    let expected = partials
        .iter()
        .cloned()
        .fold(Tabulation::default(), Tabulation::merge);

    let mut rng = StdRng::seed_from_u64(20240101);
    for _ in 0..10 {
        partials.shuffle(&mut rng);
        let merged = partials
            .iter()
            .cloned()
            .fold(Tabulation::default(), Tabulation::merge);
        assert_eq!(merged, expected);
    }
}

fn write_regions(dir: &std::path::Path) {
    write_partition(
        dir,
        "RDRJ2401.parquet",
        &[
            Record::new("330455", "330455", "I10", 202401),
            Record::new("330330", "330455", "J45", 202401),
            Record::new("330330", "330455", "J45", 202401),
        ],
    );
    write_partition(
        dir,
        "RDRJ2402.parquet",
        &[
            Record::new("330455", "330330", "C50", 202402),
            Record::new("330330", "330330", "999", 202402),
        ],
    );
    write_partition(
        dir,
        "RDSP2401.parquet",
        &[
            Record::new("351510", "330455", "I10", 202401),
            Record::new("351510", "351510", "O80", 202401),
        ],
    );
    write_partition(dir, "RDBA2312.parquet", &[Record::new("292740", "292740", "J45", 202312)]);
}

fn aggregate_dir(
    dir: &std::path::Path,
    partitions: &PartitionFilter,
    diagnoses: &DiagnosisFilter,
    workers: usize,
) -> Tabulation {
    let columns = RecordColumns::default();
    let classifier = DiagnosisTable::icd10_chapters();
    let ctx = AggregationContext {
        columns: &columns,
        classifier: &classifier,
        filter: diagnoses,
        options: AggregationOptions::default(),
    };
    let files = discover_partitions(dir, &FileNaming::default()).unwrap();
    let selected = select_partitions(dir, files, partitions).unwrap();
    aggregate_partitions(&group_by_region(selected), &ctx, Some(workers), 2, false).unwrap()
}

#[test]
fn worker_count_does_not_change_the_result() {
    let dir = tempfile::tempdir().unwrap();
    write_regions(dir.path());
    let none = DiagnosisFilter::default();

    let single = aggregate_dir(dir.path(), &PartitionFilter::default(), &none, 1);
    let parallel = aggregate_dir(dir.path(), &PartitionFilter::default(), &none, 4);

    assert_eq!(single, parallel);
    assert_eq!(single.report.files_read, 4);
    assert_eq!(single.report.rows_read, 8);
    assert_eq!(single.flows.total(), 8);
    assert_eq!(single.report.unmapped_diagnoses, 1);
}

#[test]
fn filters_matching_everything_are_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    write_regions(dir.path());

    let unfiltered = aggregate_dir(
        dir.path(),
        &PartitionFilter::default(),
        &DiagnosisFilter::default(),
        2,
    );

    let files = discover_partitions(dir.path(), &FileNaming::default()).unwrap();
    let every_partition = PartitionFilter {
        regions: files.iter().map(|f| f.region.clone()).collect(),
        periods: files.iter().map(|f| f.period).collect(),
        years: files.iter().map(|f| f.period.year()).collect(),
        months: files.iter().filter_map(|f| f.period.month()).collect(),
    };
    let every_code = DiagnosisFilter {
        codes: ["I10", "J45", "C50", "O80", "999"].into_iter().map(String::from).collect(),
        categories: BTreeSet::new(),
    };
    let filtered = aggregate_dir(dir.path(), &every_partition, &every_code, 2);

    assert_eq!(filtered, unfiltered);
}

#[test]
fn partition_filters_select_files() {
    let dir = tempfile::tempdir().unwrap();
    write_regions(dir.path());

    let filter = PartitionFilter {
        regions: ["RJ".to_string()].into(),
        periods: [Period::new(2024, 2).unwrap()].into(),
        ..PartitionFilter::default()
    };
    let result = aggregate_dir(dir.path(), &filter, &DiagnosisFilter::default(), 2);
    assert_eq!(result.report.files_read, 1);
    assert_eq!(result.flows.total(), 2);
}

#[test]
fn category_filters_exclude_unmapped_codes() {
    let dir = tempfile::tempdir().unwrap();
    write_regions(dir.path());

    let respiratory = DiagnosisFilter {
        codes: BTreeSet::new(),
        categories: ["Respiratory".to_string()].into(),
    };
    let result = aggregate_dir(dir.path(), &PartitionFilter::default(), &respiratory, 2);
    assert_eq!(result.flows.total(), 3);
    assert_eq!(result.report.filtered_out, 5);
    assert!(
        result
            .flows
            .iter()
            .all(|(key, _)| key.category.as_deref() == Some("Respiratory"))
    );
}
