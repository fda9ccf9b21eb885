//! Geographic extent of a project
//!
//! A [Boundary] is a Polygon or a MultiPolygon in EPSG:4326 whose positions are
//! `[longitude, latitude]` pairs. It can only be built through validation, so any
//! value of this type is closed, simple and within the WGS84 bounds.

use postgis_diesel::types::GeometryContainer;
use postgis_diesel::types::MultiPolygon;
use postgis_diesel::types::Point;
use postgis_diesel::types::Polygon;
use serde::Deserialize;
use serde::Serialize;

pub const SRID: u32 = 4326;

const MIN_RING_POSITIONS: usize = 4;

/// A `[longitude, latitude]` pair
pub type Position = [f64; 2];
/// A closed sequence of positions
pub type Ring = Vec<Position>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "geojson::Geometry", into = "geojson::Geometry")]
pub enum Boundary {
    /// The exterior ring followed by the holes
    Polygon(Vec<Ring>),
    MultiPolygon(Vec<Vec<Ring>>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoundaryError {
    #[error("a boundary must be a Polygon or a MultiPolygon, got a {0}")]
    NotAnArea(&'static str),
    #[error("a polygon needs at least one ring")]
    EmptyPolygon,
    #[error("a multipolygon needs at least one polygon")]
    EmptyMultiPolygon,
    #[error("positions must have exactly 2 coordinates, got {0}")]
    Dimension(usize),
    #[error("coordinates must be finite numbers")]
    NonFinite,
    #[error("position [{0}, {1}] is outside of the [-180, 180] x [-90, 90] range")]
    OutOfRange(f64, f64),
    #[error("a ring needs at least {MIN_RING_POSITIONS} positions, got {0}")]
    RingTooShort(usize),
    #[error("a ring must end with its first position")]
    RingNotClosed,
    #[error("a ring must not intersect itself")]
    SelfIntersection,
    #[error("a ring must enclose a non-zero area")]
    ZeroArea,
}

impl Boundary {
    pub fn polygon(rings: Vec<Ring>) -> Result<Self, BoundaryError> {
        let boundary = Self::Polygon(rings);
        boundary.validate()?;
        Ok(boundary)
    }

    pub fn multi_polygon(polygons: Vec<Vec<Ring>>) -> Result<Self, BoundaryError> {
        let boundary = Self::MultiPolygon(polygons);
        boundary.validate()?;
        Ok(boundary)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Boundary::Polygon(_) => "Polygon",
            Boundary::MultiPolygon(_) => "MultiPolygon",
        }
    }

    fn validate(&self) -> Result<(), BoundaryError> {
        match self {
            Boundary::Polygon(rings) => validate_polygon(rings),
            Boundary::MultiPolygon(polygons) if polygons.is_empty() => {
                Err(BoundaryError::EmptyMultiPolygon)
            }
            Boundary::MultiPolygon(polygons) => {
                polygons.iter().try_for_each(|rings| validate_polygon(rings))
            }
        }
    }
}

fn validate_polygon(rings: &[Ring]) -> Result<(), BoundaryError> {
    if rings.is_empty() {
        return Err(BoundaryError::EmptyPolygon);
    }
    rings.iter().try_for_each(|ring| validate_ring(ring))
}

fn validate_ring(ring: &[Position]) -> Result<(), BoundaryError> {
    for &[lon, lat] in ring {
        if !lon.is_finite() || !lat.is_finite() {
            return Err(BoundaryError::NonFinite);
        }
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(BoundaryError::OutOfRange(lon, lat));
        }
    }
    if ring.len() < MIN_RING_POSITIONS {
        return Err(BoundaryError::RingTooShort(ring.len()));
    }
    if ring.first() != ring.last() {
        return Err(BoundaryError::RingNotClosed);
    }
    let mut vertices = ring.to_vec();
    vertices.dedup();
    if self_intersects(&vertices) {
        return Err(BoundaryError::SelfIntersection);
    }
    if signed_area(&vertices).abs() < 1e-12 {
        return Err(BoundaryError::ZeroArea);
    }
    Ok(())
}

/// Shoelace formula over a closed ring
fn signed_area(ring: &[Position]) -> f64 {
    ring.windows(2)
        .map(|edge| edge[0][0] * edge[1][1] - edge[1][0] * edge[0][1])
        .sum::<f64>()
        / 2.0
}

fn orientation(p: Position, q: Position, r: Position) -> f64 {
    (q[0] - p[0]) * (r[1] - p[1]) - (q[1] - p[1]) * (r[0] - p[0])
}

fn on_segment(p: Position, q: Position, r: Position) -> bool {
    r[0] >= p[0].min(q[0])
        && r[0] <= p[0].max(q[0])
        && r[1] >= p[1].min(q[1])
        && r[1] <= p[1].max(q[1])
}

fn segments_intersect((a, b): (Position, Position), (c, d): (Position, Position)) -> bool {
    let d1 = orientation(c, d, a);
    let d2 = orientation(c, d, b);
    let d3 = orientation(a, b, c);
    let d4 = orientation(a, b, d);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(c, d, a))
        || (d2 == 0.0 && on_segment(c, d, b))
        || (d3 == 0.0 && on_segment(a, b, c))
        || (d4 == 0.0 && on_segment(a, b, d))
}

/// Checks every pair of non-adjacent edges of a closed ring without repeated positions
fn self_intersects(ring: &[Position]) -> bool {
    let edges: Vec<_> = ring.windows(2).map(|edge| (edge[0], edge[1])).collect();
    let count = edges.len();
    (0..count).any(|i| {
        ((i + 2)..count)
            // the first and the last edges share the closing position
            .filter(|&j| !(i == 0 && j == count - 1))
            .any(|j| segments_intersect(edges[i], edges[j]))
    })
}

fn geojson_kind(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn rings_from_geojson(rings: Vec<Vec<Vec<f64>>>) -> Result<Vec<Ring>, BoundaryError> {
    rings
        .into_iter()
        .map(|ring| {
            ring.into_iter()
                .map(|position| match position[..] {
                    [lon, lat] => Ok([lon, lat]),
                    _ => Err(BoundaryError::Dimension(position.len())),
                })
                .collect()
        })
        .collect()
}

fn rings_to_geojson(rings: Vec<Ring>) -> Vec<Vec<Vec<f64>>> {
    rings
        .into_iter()
        .map(|ring| ring.into_iter().map(Vec::from).collect())
        .collect()
}

impl TryFrom<geojson::Value> for Boundary {
    type Error = BoundaryError;

    fn try_from(value: geojson::Value) -> Result<Self, Self::Error> {
        match value {
            geojson::Value::Polygon(rings) => Boundary::polygon(rings_from_geojson(rings)?),
            geojson::Value::MultiPolygon(polygons) => Boundary::multi_polygon(
                polygons
                    .into_iter()
                    .map(rings_from_geojson)
                    .collect::<Result<_, _>>()?,
            ),
            other => Err(BoundaryError::NotAnArea(geojson_kind(&other))),
        }
    }
}

impl TryFrom<geojson::Geometry> for Boundary {
    type Error = BoundaryError;

    fn try_from(geometry: geojson::Geometry) -> Result<Self, Self::Error> {
        Boundary::try_from(geometry.value)
    }
}

impl From<Boundary> for geojson::Geometry {
    fn from(boundary: Boundary) -> Self {
        let value = match boundary {
            Boundary::Polygon(rings) => geojson::Value::Polygon(rings_to_geojson(rings)),
            Boundary::MultiPolygon(polygons) => geojson::Value::MultiPolygon(
                polygons.into_iter().map(rings_to_geojson).collect(),
            ),
        };
        geojson::Geometry::new(value)
    }
}

fn polygon_to_postgis(rings: &[Ring], srid: Option<u32>) -> Polygon<Point> {
    Polygon {
        rings: rings
            .iter()
            .map(|ring| {
                ring.iter()
                    .map(|&[x, y]| Point { x, y, srid })
                    .collect()
            })
            .collect(),
        srid,
    }
}

fn polygon_from_postgis(polygon: Polygon<Point>) -> Vec<Ring> {
    polygon
        .rings
        .into_iter()
        .map(|ring| ring.into_iter().map(|point| [point.x, point.y]).collect())
        .collect()
}

impl From<&Boundary> for GeometryContainer<Point> {
    fn from(boundary: &Boundary) -> Self {
        match boundary {
            Boundary::Polygon(rings) => {
                GeometryContainer::Polygon(polygon_to_postgis(rings, Some(SRID)))
            }
            Boundary::MultiPolygon(polygons) => GeometryContainer::MultiPolygon(MultiPolygon {
                polygons: polygons
                    .iter()
                    .map(|rings| polygon_to_postgis(rings, None))
                    .collect(),
                srid: Some(SRID),
            }),
        }
    }
}

impl TryFrom<GeometryContainer<Point>> for Boundary {
    type Error = BoundaryError;

    /// Rows are trusted: the database checks the geometry, only the kind is verified here
    fn try_from(geometry: GeometryContainer<Point>) -> Result<Self, Self::Error> {
        match geometry {
            GeometryContainer::Polygon(polygon) => {
                Ok(Boundary::Polygon(polygon_from_postgis(polygon)))
            }
            GeometryContainer::MultiPolygon(multi_polygon) => Ok(Boundary::MultiPolygon(
                multi_polygon
                    .polygons
                    .into_iter()
                    .map(polygon_from_postgis)
                    .collect(),
            )),
            GeometryContainer::Point(_) => Err(BoundaryError::NotAnArea("Point")),
            GeometryContainer::LineString(_) => Err(BoundaryError::NotAnArea("LineString")),
            GeometryContainer::MultiPoint(_) => Err(BoundaryError::NotAnArea("MultiPoint")),
            GeometryContainer::MultiLineString(_) => {
                Err(BoundaryError::NotAnArea("MultiLineString"))
            }
            GeometryContainer::GeometryCollection(_) => {
                Err(BoundaryError::NotAnArea("GeometryCollection"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    fn square(origin: Position, side: f64) -> Ring {
        let [x, y] = origin;
        vec![
            [x, y],
            [x + side, y],
            [x + side, y + side],
            [x, y + side],
            [x, y],
        ]
    }

    #[test]
    fn square_polygon_is_valid() {
        let boundary = Boundary::polygon(vec![square([150.0, -30.0], 0.5)]).unwrap();
        assert_eq!(boundary.kind(), "Polygon");
    }

    #[test]
    fn polygon_with_hole_is_valid() {
        Boundary::polygon(vec![square([0.0, 0.0], 10.0), square([2.0, 2.0], 1.0)]).unwrap();
    }

    #[rstest]
    #[case::no_ring(vec![], BoundaryError::EmptyPolygon)]
    #[case::too_short(vec![vec![[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]], BoundaryError::RingTooShort(3))]
    #[case::open(
        vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]],
        BoundaryError::RingNotClosed
    )]
    #[case::out_of_range(vec![square([179.5, 0.0], 1.0)], BoundaryError::OutOfRange(180.5, 0.0))]
    #[case::latitude(vec![square([0.0, 89.5], 1.0)], BoundaryError::OutOfRange(1.0, 90.5))]
    #[case::not_finite(
        vec![vec![[0.0, 0.0], [f64::NAN, 0.0], [1.0, 1.0], [0.0, 0.0]]],
        BoundaryError::NonFinite
    )]
    #[case::flat(
        vec![vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 0.0]]],
        BoundaryError::ZeroArea
    )]
    #[case::bowtie(
        vec![vec![[0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]]],
        BoundaryError::SelfIntersection
    )]
    fn invalid_polygons_are_rejected(#[case] rings: Vec<Ring>, #[case] expected: BoundaryError) {
        assert_eq!(Boundary::polygon(rings), Err(expected));
    }

    #[test]
    fn empty_multipolygon_is_rejected() {
        assert_eq!(
            Boundary::multi_polygon(vec![]),
            Err(BoundaryError::EmptyMultiPolygon)
        );
    }

    #[test]
    fn repeated_positions_are_not_an_intersection() {
        let ring = vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.0],
            [1.0, 1.0],
            [0.0, 1.0],
            [0.0, 0.0],
        ];
        Boundary::polygon(vec![ring]).unwrap();
    }

    #[test]
    fn geojson_round_trip_keeps_kind_and_coordinates() {
        let input = json!({
            "type": "MultiPolygon",
            "coordinates": [
                [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]],
                [[[5.0, 5.0], [6.0, 5.0], [6.0, 6.0], [5.0, 5.0]]]
            ]
        });
        let boundary: Boundary = serde_json::from_value(input.clone()).unwrap();
        assert_eq!(boundary.kind(), "MultiPolygon");
        assert_eq!(serde_json::to_value(&boundary).unwrap(), input);
    }

    #[test]
    fn geojson_non_area_is_rejected() {
        let error = serde_json::from_value::<Boundary>(json!({
            "type": "Point",
            "coordinates": [1.0, 2.0]
        }))
        .unwrap_err();
        assert!(error.to_string().contains("got a Point"));
    }

    #[test]
    fn geojson_3d_positions_are_rejected() {
        let value = geojson::Value::Polygon(vec![vec![
            vec![0.0, 0.0, 1.0],
            vec![1.0, 0.0, 1.0],
            vec![1.0, 1.0, 1.0],
            vec![0.0, 0.0, 1.0],
        ]]);
        assert_eq!(Boundary::try_from(value), Err(BoundaryError::Dimension(3)));
    }

    #[test]
    fn postgis_round_trip_keeps_kind_and_coordinates() {
        let boundary =
            Boundary::multi_polygon(vec![vec![square([1.0, 1.0], 1.0)], vec![square([3.0, 3.0], 1.0)]])
                .unwrap();
        let geometry = GeometryContainer::<Point>::from(&boundary);
        let GeometryContainer::MultiPolygon(multi_polygon) = &geometry else {
            panic!("expected a multipolygon");
        };
        assert_eq!(multi_polygon.srid, Some(SRID));
        assert_eq!(Boundary::try_from(geometry).unwrap(), boundary);
    }
}
