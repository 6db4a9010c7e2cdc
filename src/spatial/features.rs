//! GeoJSON features as `geo` multipolygons.

use geo::{Geometry, MultiPolygon};
use geojson::{Feature, JsonValue};

use crate::error::Result;

/// A property rendered as text; numeric codes are stringified
pub(crate) fn property_text(feature: &Feature, name: &str) -> Option<String> {
    match feature.property(name)? {
        JsonValue::String(s) => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Boundary of a feature; `None` for missing, empty or non-areal geometries
pub(crate) fn boundary(feature: Feature) -> Result<Option<MultiPolygon<f64>>> {
    let Some(geometry) = feature.geometry else {
        return Ok(None);
    };
    let shape = match Geometry::<f64>::try_from(geometry)? {
        Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
        Geometry::MultiPolygon(shape) => shape,
        _ => return Ok(None),
    };
    Ok((!shape.0.is_empty()).then_some(shape))
}
