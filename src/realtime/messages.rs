use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{LocationSample, RideOffer, TrackingPhase};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Driver,
}

/// Live position report; a sample without its capture timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub ride_id: Option<String>,
    pub tracking_phase: TrackingPhase,
}

impl From<&LocationSample> for DriverLocation {
    fn from(sample: &LocationSample) -> Self {
        Self {
            lat: sample.lat,
            lng: sample.lng,
            speed: sample.speed,
            heading: sample.heading,
            accuracy: sample.accuracy,
            altitude: sample.altitude,
            ride_id: sample.ride_id.clone(),
            tracking_phase: sample.tracking_phase,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Auth {
        token: String,
        role: Role,
    },
    DriverLocation(DriverLocation),
    LocationBatch {
        points: Vec<LocationSample>,
    },
    ChatMessage {
        ride_id: String,
        text: String,
        sender: Role,
    },
}

impl OutboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::DriverLocation(_) => "driver_location",
            Self::LocationBatch { .. } => "location_batch",
            Self::ChatMessage { .. } => "chat_message",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    NewRideAssignment(RideOffer),
    RideCancelled {
        #[serde(default)]
        ride_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    LocationBatchAck {
        count: usize,
    },
    ChatMessage {
        #[serde(default)]
        id: Option<String>,
        ride_id: String,
        text: String,
        sender: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

#[test]
fn auth_message_shape() {
    let message = OutboundMessage::Auth {
        token: "t0k".into(),
        role: Role::Driver,
    };

    assert_eq!(
        serde_json::to_value(&message).unwrap(),
        serde_json::json!({"type": "auth", "token": "t0k", "role": "driver"})
    );
}

#[test]
fn driver_location_shape() {
    let message = OutboundMessage::DriverLocation(DriverLocation {
        lat: 52.1,
        lng: -106.6,
        speed: Some(8.5),
        heading: None,
        accuracy: Some(4.0),
        altitude: None,
        ride_id: Some("R1".into()),
        tracking_phase: TrackingPhase::NavigatingToPickup,
    });

    assert_eq!(
        serde_json::to_value(&message).unwrap(),
        serde_json::json!({
            "type": "driver_location",
            "lat": 52.1,
            "lng": -106.6,
            "speed": 8.5,
            "heading": null,
            "accuracy": 4.0,
            "altitude": null,
            "ride_id": "R1",
            "tracking_phase": "navigating_to_pickup"
        })
    );
}

#[test]
fn parses_inbound_messages() {
    let offer: InboundMessage = serde_json::from_str(
        r#"{"type":"new_ride_assignment","ride_id":"R1","pickup_address":"A","dropoff_address":"B",
            "pickup_lat":52.1332,"pickup_lng":-106.67,"dropoff_lat":52.2,"dropoff_lng":-106.6,
            "fare":21.0,"rider_name":"Sam","rider_rating":4.8}"#,
    )
    .unwrap();

    match offer {
        InboundMessage::NewRideAssignment(offer) => {
            assert_eq!(offer.ride_id, "R1");
            assert_eq!(offer.rider_name.as_deref(), Some("Sam"));
        }
        other => panic!("unexpected message {:?}", other),
    }

    let cancelled: InboundMessage = serde_json::from_str(r#"{"type":"ride_cancelled"}"#).unwrap();
    assert_eq!(
        cancelled,
        InboundMessage::RideCancelled {
            ride_id: None,
            reason: None
        }
    );

    let unknown: InboundMessage =
        serde_json::from_str(r#"{"type":"nearby_drivers","drivers":[]}"#).unwrap();
    assert_eq!(unknown, InboundMessage::Unknown);
}
