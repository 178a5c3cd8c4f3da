mod location;
mod offer;
mod ride;
mod sample;

pub use location::Coordinates;
pub use offer::RideOffer;
pub use ride::{ActiveRide, CompletedRideSummary, RideRecord, RiderSummary, VehicleTypeSummary};
pub use sample::{LocationSample, PositionFix, TrackingContext, TrackingPhase};
