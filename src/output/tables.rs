//! Row types of the dashboard tables and their builders.

use std::collections::BTreeMap;

use geo::Point;
use serde::{Deserialize, Serialize};

use crate::community::CommunityOutcome;
use crate::error::Result;
use crate::graph::{ALL_CATEGORIES, GraphScope};
use crate::resolve::MunicipalityKey;
use crate::spatial::{FlowEdge, MunicipalityInfo, StateFlow};

/// Category code of the aggregate scope
pub const ALL_CATEGORIES_CODE: u32 = 0;

/// Category label → integer code
///
/// 0 is reserved for all categories; labels are numbered from 1 in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryCodes {
    codes: BTreeMap<String, u32>,
}

impl CategoryCodes {
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a str>) -> Self {
        let mut sorted: Vec<&str> = labels.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();
        let codes = sorted
            .into_iter()
            .zip(1..)
            .map(|(label, code)| (label.to_string(), code))
            .collect();
        Self { codes }
    }

    /// Codes of the categories that occur in the edges
    #[must_use]
    pub fn from_edges(edges: &[FlowEdge]) -> Self {
        Self::from_labels(edges.iter().filter_map(|e| e.category.as_deref()))
    }

    #[must_use]
    pub fn code(&self, label: &str) -> Option<u32> {
        self.codes.get(label).copied()
    }

    #[must_use]
    pub fn scope_code(&self, scope: &GraphScope) -> Option<u32> {
        match scope {
            GraphScope::All => Some(ALL_CATEGORIES_CODE),
            GraphScope::Category(label) => self.code(label),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRow {
    pub category: String,
    pub code: u32,
}

#[must_use]
pub fn category_rows(codes: &CategoryCodes) -> Vec<CategoryRow> {
    std::iter::once(CategoryRow {
        category: ALL_CATEGORIES.to_string(),
        code: ALL_CATEGORIES_CODE,
    })
    .chain(codes.codes.iter().map(|(label, &code)| CategoryRow {
        category: label.clone(),
        code,
    }))
    .collect()
}

/// Count-weighted accumulator of distance and same-municipality care
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    count: u64,
    local: u64,
    distance_weight: u64,
    distance_sum: f64,
}

impl Tally {
    fn add(&mut self, edge: &FlowEdge) {
        self.count += edge.count;
        if edge.is_local() {
            self.local += edge.count;
        }
        if let Some(distance) = edge.distance_km {
            self.distance_weight += edge.count;
            self.distance_sum += distance * edge.count as f64;
        }
    }

    fn mean_distance(&self) -> Option<f64> {
        (self.distance_weight > 0).then(|| self.distance_sum / self.distance_weight as f64)
    }

    fn local_share(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.local as f64 / self.count as f64
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn code_of(codes: &BTreeMap<MunicipalityKey, String>, key: &MunicipalityKey) -> String {
    codes.get(key).cloned().unwrap_or_default()
}

/// One row per origin, destination, category and period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRow {
    pub origin_code: String,
    pub destination_code: String,
    /// `None` for hospitalizations without a diagnosis category
    pub category_code: Option<u32>,
    pub period: Option<u32>,
    pub count: u64,
    pub distance_km: Option<f64>,
    pub same_municipality_share: f64,
}

#[must_use]
pub fn flow_rows(
    edges: &[FlowEdge],
    municipality_codes: &BTreeMap<MunicipalityKey, String>,
    categories: &CategoryCodes,
) -> Vec<FlowRow> {
    let mut tallies: BTreeMap<(String, String, Option<u32>, Option<u32>), Tally> = BTreeMap::new();
    for edge in edges {
        let key = (
            code_of(municipality_codes, &edge.origin),
            code_of(municipality_codes, &edge.destination),
            edge.category.as_deref().and_then(|c| categories.code(c)),
            edge.period.map(|p| p.as_u32()),
        );
        tallies.entry(key).or_default().add(edge);
    }

    tallies
        .into_iter()
        .map(|((origin_code, destination_code, category_code, period), tally)| FlowRow {
            origin_code,
            destination_code,
            category_code,
            period,
            count: tally.count,
            distance_km: tally.mean_distance(),
            same_municipality_share: tally.local_share(),
        })
        .collect()
}

/// Per-origin distance summary, per category and for all categories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginSummaryRow {
    pub origin_code: String,
    pub category_code: u32,
    pub period: Option<u32>,
    pub count: u64,
    /// Count-weighted mean distance over edges with a known distance
    pub mean_distance_km: Option<f64>,
    pub same_municipality_share: f64,
}

#[must_use]
pub fn origin_summary_rows(
    edges: &[FlowEdge],
    municipality_codes: &BTreeMap<MunicipalityKey, String>,
    categories: &CategoryCodes,
) -> Vec<OriginSummaryRow> {
    let mut tallies: BTreeMap<(String, u32, Option<u32>), Tally> = BTreeMap::new();
    for edge in edges {
        let origin = code_of(municipality_codes, &edge.origin);
        let period = edge.period.map(|p| p.as_u32());
        tallies
            .entry((origin.clone(), ALL_CATEGORIES_CODE, period))
            .or_default()
            .add(edge);
        if let Some(code) = edge.category.as_deref().and_then(|c| categories.code(c)) {
            tallies.entry((origin, code, period)).or_default().add(edge);
        }
    }

    tallies
        .into_iter()
        .map(|((origin_code, category_code, period), tally)| OriginSummaryRow {
            origin_code,
            category_code,
            period,
            count: tally.count,
            mean_distance_km: tally.mean_distance().map(|d| round_to(d, 3)),
            same_municipality_share: round_to(tally.local_share(), 5),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MunicipalityRow {
    pub code: String,
    pub name: String,
    pub state: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[must_use]
pub fn municipality_rows(infos: &[MunicipalityInfo]) -> Vec<MunicipalityRow> {
    infos
        .iter()
        .map(|info| MunicipalityRow {
            code: info.code.clone(),
            name: info.key.name.clone(),
            state: info.key.state.clone(),
            latitude: info.centroid.map(|p| p.y()),
            longitude: info.centroid.map(|p| p.x()),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunityRow {
    pub municipality_code: String,
    pub category_code: u32,
    pub community_id: u32,
}

/// One row per node and detected scope; ids must fit the `u32` column
pub fn community_rows(
    outcomes: &BTreeMap<GraphScope, CommunityOutcome>,
    municipality_codes: &BTreeMap<MunicipalityKey, String>,
    categories: &CategoryCodes,
) -> Result<Vec<CommunityRow>> {
    let mut rows = Vec::new();
    for (scope, outcome) in outcomes {
        let (Some(category_code), Some(partition)) = (categories.scope_code(scope), outcome.partition())
        else {
            continue;
        };
        for (key, community) in partition.assignments() {
            rows.push(CommunityRow {
                municipality_code: code_of(municipality_codes, key),
                category_code,
                community_id: u32::try_from(*community)?,
            });
        }
    }
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFlowRow {
    pub origin_state: String,
    pub destination_state: String,
    pub count: u64,
    pub origin_latitude: Option<f64>,
    pub origin_longitude: Option<f64>,
    pub destination_latitude: Option<f64>,
    pub destination_longitude: Option<f64>,
}

#[must_use]
pub fn state_flow_rows(flows: &[StateFlow]) -> Vec<StateFlowRow> {
    let lat = |p: Option<Point<f64>>| p.map(|p| p.y());
    let lon = |p: Option<Point<f64>>| p.map(|p| p.x());
    flows
        .iter()
        .map(|f| StateFlowRow {
            origin_state: f.origin_state.clone(),
            destination_state: f.destination_state.clone(),
            count: f.count,
            origin_latitude: lat(f.origin_centroid),
            origin_longitude: lon(f.origin_centroid),
            destination_latitude: lat(f.destination_centroid),
            destination_longitude: lon(f.destination_centroid),
        })
        .collect()
}
