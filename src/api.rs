use async_trait::async_trait;
use std::sync::Arc;

use crate::entities::{ActiveRide, CompletedRideSummary};
use crate::error::Error;

/// Driver-facing ride endpoints of the backend.
#[async_trait]
pub trait RideAPI {
    async fn accept_ride(&self, ride_id: &str) -> Result<(), Error>;
    async fn decline_ride(&self, ride_id: &str) -> Result<(), Error>;
    async fn arrive_at_pickup(&self, ride_id: &str) -> Result<(), Error>;
    async fn verify_otp(&self, ride_id: &str, otp: &str) -> Result<(), Error>;
    async fn start_ride(&self, ride_id: &str) -> Result<(), Error>;
    async fn complete_ride(&self, ride_id: &str) -> Result<CompletedRideSummary, Error>;
    async fn cancel_ride(&self, ride_id: &str, reason: Option<&str>) -> Result<(), Error>;
    async fn find_active_ride(&self) -> Result<Option<ActiveRide>, Error>;
    async fn rate_rider(
        &self,
        ride_id: &str,
        rating: u8,
        comment: Option<&str>,
    ) -> Result<(), Error>;
}

#[async_trait]
pub trait DriverStatusAPI {
    async fn update_online_status(&self, driver_id: &str, is_online: bool) -> Result<(), Error>;
}

pub trait API: RideAPI + DriverStatusAPI {}

pub type DynAPI = Arc<dyn API + Send + Sync>;
