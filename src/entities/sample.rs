use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::Coordinates;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPhase {
    OnlineIdle,
    NavigatingToPickup,
    ArrivedAtPickup,
    TripInProgress,
}

impl TrackingPhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OnlineIdle => "online_idle",
            Self::NavigatingToPickup => "navigating_to_pickup",
            Self::ArrivedAtPickup => "arrived_at_pickup",
            Self::TripInProgress => "trip_in_progress",
        }
    }
}

/// Ride context attached to every sample at capture time.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackingContext {
    pub phase: TrackingPhase,
    pub ride_id: Option<String>,
}

impl TrackingContext {
    pub fn idle() -> Self {
        Self {
            phase: TrackingPhase::OnlineIdle,
            ride_id: None,
        }
    }
}

/// A raw position as reported by the device.
#[derive(Clone, Debug, PartialEq)]
pub struct PositionFix {
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PositionFix {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            speed: None,
            heading: None,
            accuracy: None,
            altitude: None,
            timestamp: Utc::now(),
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub lat: f64,
    pub lng: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub accuracy: Option<f64>,
    pub altitude: Option<f64>,
    pub ride_id: Option<String>,
    pub tracking_phase: TrackingPhase,
    pub timestamp: DateTime<Utc>,
}

impl LocationSample {
    pub fn capture(fix: PositionFix, context: TrackingContext) -> Self {
        Self {
            lat: fix.lat,
            lng: fix.lng,
            speed: fix.speed,
            heading: fix.heading,
            accuracy: fix.accuracy,
            altitude: fix.altitude,
            ride_id: context.ride_id,
            tracking_phase: context.phase,
            timestamp: fix.timestamp,
        }
    }
}
