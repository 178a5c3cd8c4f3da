use geo_types::Point;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl From<Coordinates> for Point<f64> {
    fn from(coordinates: Coordinates) -> Self {
        Point::new(coordinates.lng, coordinates.lat)
    }
}

impl From<Point<f64>> for Coordinates {
    fn from(point: Point<f64>) -> Self {
        Self {
            lat: point.y(),
            lng: point.x(),
        }
    }
}

#[test]
fn point_conversion_keeps_axis_order() {
    let coordinates = Coordinates::new(52.1332, -106.67);
    let point: Point<f64> = coordinates.into();

    assert_eq!(point.x(), -106.67);
    assert_eq!(point.y(), 52.1332);
    assert_eq!(Coordinates::from(point), coordinates);
}
