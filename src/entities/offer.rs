use serde::{Deserialize, Serialize};

use crate::entities::Coordinates;

/// An unsolicited ride assignment waiting for the driver to accept or decline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideOffer {
    pub ride_id: String,
    #[serde(alias = "pickup")]
    pub pickup_address: String,
    #[serde(alias = "dropoff")]
    pub dropoff_address: String,
    #[serde(default)]
    pub pickup_lat: Option<f64>,
    #[serde(default)]
    pub pickup_lng: Option<f64>,
    #[serde(default)]
    pub dropoff_lat: Option<f64>,
    #[serde(default)]
    pub dropoff_lng: Option<f64>,
    pub fare: f64,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<f64>,
    #[serde(default)]
    pub rider_name: Option<String>,
    #[serde(default)]
    pub rider_rating: Option<f64>,
}

impl RideOffer {
    pub fn pickup(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.pickup_lat?, self.pickup_lng?))
    }

    pub fn dropoff(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.dropoff_lat?, self.dropoff_lng?))
    }
}

#[test]
fn accepts_short_address_keys() {
    let offer: RideOffer = serde_json::from_value(serde_json::json!({
        "ride_id": "R1",
        "pickup": "12 Main St",
        "dropoff": "Airport",
        "fare": 18.5
    }))
    .unwrap();

    assert_eq!(offer.pickup_address, "12 Main St");
    assert_eq!(offer.dropoff_address, "Airport");
    assert!(offer.pickup().is_none());
    assert!(offer.rider_name.is_none());
}
