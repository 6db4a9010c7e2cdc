//! Geo enricher
//!
//! Loads reference geometries keyed by canonical name, computes centroids and
//! attaches great-circle distances to resolved flows. Also rolls municipality
//! flows up to inter-state flows.

mod features;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Instant;

use geo::{Centroid, Coord, MapCoords, MultiPolygon, Point};
use geojson::{FeatureCollection, GeoJson};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::aggregate::FlowTable;
use crate::error::util::safe_read_to_string;
use crate::error::Result;
use crate::period::Period;
use crate::resolve::{CorrectionTable, MunicipalityKey};

/// Mean Earth radius used for all distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// How polygon centroids are computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CentroidMode {
    /// Planar centroid of the lon/lat polygon; adequate at municipality scale
    #[default]
    Native,
    /// Centroid in a cylindrical equal-area frame, unprojected back to lon/lat
    EqualArea,
}

fn to_equal_area(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: EARTH_RADIUS_KM * c.x.to_radians(),
        y: EARTH_RADIUS_KM * c.y.to_radians().sin(),
    }
}

fn from_equal_area(c: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (c.x / EARTH_RADIUS_KM).to_degrees(),
        y: (c.y / EARTH_RADIUS_KM).clamp(-1.0, 1.0).asin().to_degrees(),
    }
}

/// Centroid of a lon/lat multipolygon
#[must_use]
pub fn centroid(shape: &MultiPolygon<f64>, mode: CentroidMode) -> Option<Point<f64>> {
    match mode {
        CentroidMode::Native => shape.centroid(),
        CentroidMode::EqualArea => shape
            .map_coords(to_equal_area)
            .centroid()
            .map(|p| Point::from(from_equal_area(p.0))),
    }
}

/// Haversine distance in km between two lon/lat points given in degrees
#[must_use]
pub fn haversine_km(a: Point<f64>, b: Point<f64>) -> f64 {
    let (lat1, lon1) = (a.y().to_radians(), a.x().to_radians());
    let (lat2, lon2) = (b.y().to_radians(), b.x().to_radians());
    let half_dlat = ((lat2 - lat1) / 2.0).sin();
    let half_dlon = ((lon2 - lon1) / 2.0).sin();
    let h = half_dlat * half_dlat + lat1.cos() * lat2.cos() * half_dlon * half_dlon;
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Haversine distances for a slice of point pairs, in input order
#[must_use]
pub fn haversine_batch(pairs: &[(Point<f64>, Point<f64>)]) -> Vec<f64> {
    pairs.iter().map(|&(a, b)| haversine_km(a, b)).collect()
}

/// Feature properties that identify a reference geometry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayerProperties {
    /// Property holding the feature name
    pub name: String,
    /// Property holding the state name; when absent the key is the name alone
    pub state: Option<String>,
    /// Property holding the reference code
    pub code: Option<String>,
}

impl LayerProperties {
    /// IBGE municipality boundaries (`NM_MUN`, `NM_UF`, `CD_MUN`)
    #[must_use]
    pub fn municipalities() -> Self {
        Self {
            name: "NM_MUN".to_string(),
            state: Some("NM_UF".to_string()),
            code: Some("CD_MUN".to_string()),
        }
    }

    /// State boundaries (`name_state`, `code_state`)
    #[must_use]
    pub fn states() -> Self {
        Self {
            name: "name_state".to_string(),
            state: None,
            code: Some("code_state".to_string()),
        }
    }
}

impl Default for LayerProperties {
    fn default() -> Self {
        Self::municipalities()
    }
}

/// One reference feature
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceEntry {
    pub code: Option<String>,
    pub centroid: Option<Point<f64>>,
}

/// Read-only geometry lookup keyed by canonical name
#[derive(Debug, Clone, Default)]
pub struct GeometryReference {
    entries: FxHashMap<String, ReferenceEntry>,
}

impl GeometryReference {
    /// Build from already computed centroids
    pub fn from_points<I, K>(points: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<String>, Point<f64>)>,
        K: Into<String>,
    {
        let mut reference = Self::default();
        for (key, code, point) in points {
            reference.insert(
                key.into(),
                ReferenceEntry {
                    code,
                    centroid: Some(point),
                },
            );
        }
        reference
    }

    /// Insert an entry; the first entry for a key is kept
    fn insert(&mut self, key: String, entry: ReferenceEntry) -> bool {
        if self.entries.contains_key(&key) {
            debug!("Duplicate reference geometry for '{key}', keeping the first");
            return false;
        }
        self.entries.insert(key, entry);
        true
    }

    /// Load a GeoJSON FeatureCollection
    ///
    /// State names pass through the state corrections before keys are built.
    pub fn from_geojson(
        path: &Path,
        properties: &LayerProperties,
        mode: CentroidMode,
        corrections: &CorrectionTable,
    ) -> Result<Self> {
        let start = Instant::now();
        let content = safe_read_to_string(path, "reference geometry")?;
        let reference = Self::from_geojson_str(&content, properties, mode, corrections)?;
        info!(
            "Loaded {} reference geometries from {} in {:?}",
            reference.len(),
            path.display(),
            start.elapsed()
        );
        Ok(reference)
    }

    pub fn from_geojson_str(
        content: &str,
        properties: &LayerProperties,
        mode: CentroidMode,
        corrections: &CorrectionTable,
    ) -> Result<Self> {
        let collection = FeatureCollection::try_from(content.parse::<GeoJson>()?)?;
        let mut reference = Self::default();
        let (mut unnamed, mut duplicates) = (0usize, 0usize);

        for feature in collection.features {
            let Some(name) = features::property_text(&feature, &properties.name) else {
                unnamed += 1;
                continue;
            };
            let key = match properties.state.as_deref() {
                Some(state_property) => {
                    let state = features::property_text(&feature, state_property).unwrap_or_default();
                    MunicipalityKey::new(name, corrections.correct_state(&state)).to_string()
                }
                None => corrections.correct_state(&name).to_string(),
            };
            let code = properties
                .code
                .as_deref()
                .and_then(|c| features::property_text(&feature, c));

            let shape = features::boundary(feature)?;
            let entry = ReferenceEntry {
                code,
                centroid: shape.as_ref().and_then(|s| centroid(s, mode)),
            };
            if !reference.insert(key, entry) {
                duplicates += 1;
            }
        }

        if unnamed > 0 || duplicates > 0 {
            warn!("Skipped {unnamed} unnamed and {duplicates} duplicate reference features");
        }
        Ok(reference)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ReferenceEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn centroid(&self, key: &str) -> Option<Point<f64>> {
        self.entries.get(key).and_then(|e| e.centroid)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys from `keys` with no reference entry, in input order
    pub fn missing<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        keys.into_iter().filter(|k| !self.contains(k)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resolved flow with its distance
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEdge {
    pub origin: MunicipalityKey,
    pub destination: MunicipalityKey,
    pub category: Option<String>,
    pub period: Option<Period>,
    pub count: u64,
    /// `None` when either endpoint has no centroid
    pub distance_km: Option<f64>,
}

impl FlowEdge {
    /// Whether treatment happened in the municipality of residence
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.origin == self.destination
    }
}

/// Geometry coverage of an enrichment pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoReport {
    pub municipalities: usize,
    /// Keys without a centroid, sorted
    pub unresolved_municipalities: Vec<String>,
    pub edges: usize,
    pub unresolved_edges: usize,
    pub unresolved_hospitalizations: u64,
}

/// Attach distances to every flow
///
/// Edges come back sorted by key. Edges touching an unresolved municipality
/// keep a `None` distance and are counted in the report.
#[must_use]
pub fn enrich(flows: &FlowTable<MunicipalityKey>, reference: &GeometryReference) -> (Vec<FlowEdge>, GeoReport) {
    let mut entries: Vec<_> = flows.iter().collect();
    entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

    let mut centroids: BTreeMap<&MunicipalityKey, Option<Point<f64>>> = BTreeMap::new();
    for (key, _) in entries.iter().copied() {
        for node in [&key.origin, &key.destination] {
            centroids
                .entry(node)
                .or_insert_with(|| reference.centroid(&node.to_string()));
        }
    }

    let endpoints: Vec<Option<(Point<f64>, Point<f64>)>> = entries
        .iter()
        .map(|(key, _)| centroids[&key.origin].zip(centroids[&key.destination]))
        .collect();
    let pairs: Vec<_> = endpoints.iter().flatten().copied().collect();
    let mut distances = haversine_batch(&pairs).into_iter();

    let mut report = GeoReport {
        municipalities: centroids.len(),
        unresolved_municipalities: centroids
            .iter()
            .filter(|(_, c)| c.is_none())
            .map(|(k, _)| k.to_string())
            .collect(),
        edges: entries.len(),
        ..GeoReport::default()
    };

    let edges = entries
        .into_iter()
        .zip(endpoints)
        .map(|((key, count), points)| {
            let distance_km = points.and_then(|_| distances.next());
            if distance_km.is_none() {
                report.unresolved_edges += 1;
                report.unresolved_hospitalizations += count;
            }
            FlowEdge {
                origin: key.origin.clone(),
                destination: key.destination.clone(),
                category: key.category.clone(),
                period: key.period,
                count,
                distance_km,
            }
        })
        .collect();

    if report.unresolved_municipalities.is_empty() {
        info!("All {} municipalities matched a reference geometry", report.municipalities);
    } else {
        warn!(
            "{} of {} municipalities have no reference geometry ({} edges, {} hospitalizations without distance)",
            report.unresolved_municipalities.len(),
            report.municipalities,
            report.unresolved_edges,
            report.unresolved_hospitalizations
        );
    }
    (edges, report)
}

/// Attributes of a municipality as first observed among origins
#[derive(Debug, Clone, PartialEq)]
pub struct MunicipalityInfo {
    pub key: MunicipalityKey,
    pub code: String,
    pub centroid: Option<Point<f64>>,
}

/// Output code of a municipality: the reference code when the key resolved,
/// otherwise the smallest raw source code
#[must_use]
pub fn municipality_code(
    key: &MunicipalityKey,
    reference: &GeometryReference,
    source_codes: &BTreeMap<MunicipalityKey, String>,
) -> String {
    reference
        .get(&key.to_string())
        .and_then(|e| e.code.clone())
        .or_else(|| source_codes.get(key).cloned())
        .unwrap_or_default()
}

/// One record per distinct origin, in edge order
#[must_use]
pub fn describe_origins(
    edges: &[FlowEdge],
    reference: &GeometryReference,
    source_codes: &BTreeMap<MunicipalityKey, String>,
) -> Vec<MunicipalityInfo> {
    let mut seen = BTreeSet::new();
    edges
        .iter()
        .filter(|e| seen.insert(&e.origin))
        .map(|e| MunicipalityInfo {
            key: e.origin.clone(),
            code: municipality_code(&e.origin, reference, source_codes),
            centroid: reference.centroid(&e.origin.to_string()),
        })
        .collect()
}

/// Hospitalizations between two different states
#[derive(Debug, Clone, PartialEq)]
pub struct StateFlow {
    pub origin_state: String,
    pub destination_state: String,
    pub count: u64,
    pub origin_centroid: Option<Point<f64>>,
    pub destination_centroid: Option<Point<f64>>,
}

/// Sum inter-state flows over all categories and periods
///
/// `states` is keyed by state name and should use equal-area centroids.
#[must_use]
pub fn state_flows(edges: &[FlowEdge], states: &GeometryReference) -> Vec<StateFlow> {
    let mut totals: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    for edge in edges.iter().filter(|e| e.origin.state != e.destination.state) {
        *totals
            .entry((edge.origin.state.as_str(), edge.destination.state.as_str()))
            .or_insert(0) += edge.count;
    }

    let flows: Vec<StateFlow> = totals
        .into_iter()
        .map(|((origin, destination), count)| StateFlow {
            origin_state: origin.to_string(),
            destination_state: destination.to_string(),
            count,
            origin_centroid: states.centroid(origin),
            destination_centroid: states.centroid(destination),
        })
        .collect();

    let unresolved = flows
        .iter()
        .filter(|f| f.origin_centroid.is_none() || f.destination_centroid.is_none())
        .count();
    if unresolved > 0 {
        warn!("{unresolved} state flows have an endpoint without state geometry");
    }
    info!("Built {} inter-state flows", flows.len());
    flows
}
