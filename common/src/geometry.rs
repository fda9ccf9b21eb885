use serde::Deserialize;
use serde::Serialize;
use utoipa::ToSchema;

// Schema of a GeoJson value meant to be used **exclusively** in the OpenApi
/// A GeoJSON area: either a Polygon or a MultiPolygon, in EPSG:4326 (longitude, latitude)
#[derive(Serialize, ToSchema)]
#[serde(untagged)]
pub enum GeoJsonArea {
    Polygon(GeoJsonPolygon),
    MultiPolygon(GeoJsonMultiPolygon),
}

#[derive(Serialize, ToSchema)]
#[serde(tag = "type", content = "coordinates")]
pub enum GeoJsonPolygon {
    Polygon(GeoJsonPolygonValue),
}

#[derive(Serialize, ToSchema)]
#[serde(tag = "type", content = "coordinates")]
pub enum GeoJsonMultiPolygon {
    MultiPolygon(GeoJsonMultiPolygonValue),
}

/// A `[longitude, latitude]` pair
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct GeoJsonPosition(pub Vec<f64>);

/// A closed ring of at least 4 positions: the first and last positions are equal
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct GeoJsonRing(pub Vec<GeoJsonPosition>);

/// The exterior ring followed by the holes, if any
#[derive(Serialize, ToSchema)]
pub struct GeoJsonPolygonValue(pub Vec<GeoJsonRing>);

#[derive(Serialize, ToSchema)]
pub struct GeoJsonMultiPolygonValue(pub Vec<GeoJsonPolygonValue>);

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn polygon_schema_serializes_as_geojson() {
        let ring = GeoJsonRing(vec![
            GeoJsonPosition(vec![0.0, 0.0]),
            GeoJsonPosition(vec![1.0, 0.0]),
            GeoJsonPosition(vec![1.0, 1.0]),
            GeoJsonPosition(vec![0.0, 0.0]),
        ]);
        let area = GeoJsonArea::Polygon(GeoJsonPolygon::Polygon(GeoJsonPolygonValue(vec![ring])));
        assert_eq!(
            serde_json::to_value(area).unwrap(),
            json!({
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
            })
        );
    }
}
