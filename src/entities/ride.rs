use serde::{Deserialize, Serialize};

use crate::entities::Coordinates;

/// The ride record as the backend stores it. Only the fields the driver core
/// reads are kept; everything else in the payload is ignored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideRecord {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub pickup_address: String,
    #[serde(default)]
    pub dropoff_address: String,
    #[serde(default)]
    pub pickup_lat: Option<f64>,
    #[serde(default)]
    pub pickup_lng: Option<f64>,
    #[serde(default)]
    pub dropoff_lat: Option<f64>,
    #[serde(default)]
    pub dropoff_lng: Option<f64>,
    #[serde(default)]
    pub total_fare: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub duration_minutes: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiderSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleTypeSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveRide {
    pub ride: RideRecord,
    #[serde(default)]
    pub rider: Option<RiderSummary>,
    #[serde(default)]
    pub vehicle_type: Option<VehicleTypeSummary>,
}

impl ActiveRide {
    pub fn id(&self) -> &str {
        &self.ride.id
    }

    pub fn status(&self) -> &str {
        &self.ride.status
    }

    pub fn pickup(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.ride.pickup_lat?, self.ride.pickup_lng?))
    }

    pub fn dropoff(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.ride.dropoff_lat?, self.ride.dropoff_lng?))
    }
}

/// Fare breakdown handed back by the complete-ride call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletedRideSummary {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub base_fare: f64,
    #[serde(default)]
    pub distance_fare: f64,
    #[serde(default)]
    pub time_fare: f64,
    #[serde(default, alias = "booking_fee")]
    pub platform_fee: f64,
    #[serde(default, alias = "tip_amount")]
    pub tip: f64,
    #[serde(default)]
    pub total_fare: f64,
    #[serde(default)]
    pub distance_km: f64,
    #[serde(default)]
    pub duration_minutes: f64,
}

#[test]
fn summary_reads_backend_field_names() {
    let summary: CompletedRideSummary = serde_json::from_value(serde_json::json!({
        "id": "R1",
        "status": "completed",
        "base_fare": 3.5,
        "distance_fare": 9.0,
        "time_fare": 2.25,
        "booking_fee": 2.0,
        "tip_amount": 1.0,
        "total_fare": 16.75,
        "distance_km": 6.0,
        "duration_minutes": 17
    }))
    .unwrap();

    assert_eq!(summary.platform_fee, 2.0);
    assert_eq!(summary.tip, 1.0);
    assert_eq!(summary.duration_minutes, 17.0);
}
