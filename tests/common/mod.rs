#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use async_trait::async_trait;
use tokio::sync::Mutex;

use caballus_driver::api::{DriverStatusAPI, RideAPI, API};
use caballus_driver::config::Config;
use caballus_driver::entities::{ActiveRide, CompletedRideSummary, RideOffer, RideRecord};
use caballus_driver::error::{
    confirmation_rejected_error, invalid_otp_error, upstream_error, Error,
};
use caballus_driver::lifecycle::{Event, RideLifecycleController};

pub const PICKUP: (f64, f64) = (52.1332, -106.6700);
pub const VALID_OTP: &str = "1234";

/// In-memory backend that records every call and keeps a single active ride.
#[derive(Default)]
pub struct FakeAPI {
    pub calls: Mutex<Vec<String>>,
    pub active: Mutex<Option<ActiveRide>>,
    pub reject_accept: Mutex<bool>,
    pub fail_decline: Mutex<bool>,
    pub fail_lookup: Mutex<bool>,
}

impl FakeAPI {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn with_active(self: Arc<Self>, ride_id: &str, status: &str) -> Arc<Self> {
        *self.active.lock().await = Some(active_ride(ride_id, status));
        self
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn count(&self, call: &str) -> usize {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|logged| logged.as_str() == call)
            .count()
    }

    async fn log(&self, call: String) {
        self.calls.lock().await.push(call);
    }

    async fn set_status(&self, ride_id: &str, status: &str) {
        let mut active = self.active.lock().await;

        match active.as_mut() {
            Some(ride) if ride.id() == ride_id => ride.ride.status = status.into(),
            _ => *active = Some(active_ride(ride_id, status)),
        }
    }
}

#[async_trait]
impl RideAPI for FakeAPI {
    async fn accept_ride(&self, ride_id: &str) -> Result<(), Error> {
        self.log(format!("accept {}", ride_id)).await;

        if *self.reject_accept.lock().await {
            return Err(confirmation_rejected_error(
                409,
                Some("Ride is no longer available".into()),
            ));
        }

        self.set_status(ride_id, "driver_accepted").await;

        Ok(())
    }

    async fn decline_ride(&self, ride_id: &str) -> Result<(), Error> {
        self.log(format!("decline {}", ride_id)).await;

        if *self.fail_decline.lock().await {
            return Err(confirmation_rejected_error(500, None));
        }

        Ok(())
    }

    async fn arrive_at_pickup(&self, ride_id: &str) -> Result<(), Error> {
        self.log(format!("arrive {}", ride_id)).await;
        self.set_status(ride_id, "driver_arrived").await;

        Ok(())
    }

    async fn verify_otp(&self, ride_id: &str, otp: &str) -> Result<(), Error> {
        self.log(format!("verify_otp {} {}", ride_id, otp)).await;

        if otp != VALID_OTP {
            return Err(invalid_otp_error());
        }

        self.set_status(ride_id, "in_progress").await;

        Ok(())
    }

    async fn start_ride(&self, ride_id: &str) -> Result<(), Error> {
        self.log(format!("start {}", ride_id)).await;
        self.set_status(ride_id, "in_progress").await;

        Ok(())
    }

    async fn complete_ride(&self, ride_id: &str) -> Result<CompletedRideSummary, Error> {
        self.log(format!("complete {}", ride_id)).await;
        *self.active.lock().await = None;

        Ok(CompletedRideSummary {
            id: ride_id.into(),
            base_fare: 3.5,
            distance_fare: 9.3,
            time_fare: 5.6,
            platform_fee: 2.0,
            tip: 0.0,
            total_fare: 20.4,
            distance_km: 6.2,
            duration_minutes: 14.0,
        })
    }

    async fn cancel_ride(&self, ride_id: &str, reason: Option<&str>) -> Result<(), Error> {
        self.log(format!("cancel {} {}", ride_id, reason.unwrap_or("-")))
            .await;
        *self.active.lock().await = None;

        Ok(())
    }

    async fn find_active_ride(&self) -> Result<Option<ActiveRide>, Error> {
        self.log("find_active_ride".into()).await;

        if *self.fail_lookup.lock().await {
            return Err(upstream_error());
        }

        Ok(self.active.lock().await.clone())
    }

    async fn rate_rider(
        &self,
        ride_id: &str,
        rating: u8,
        _comment: Option<&str>,
    ) -> Result<(), Error> {
        self.log(format!("rate {} {}", ride_id, rating)).await;

        Ok(())
    }
}

#[async_trait]
impl DriverStatusAPI for FakeAPI {
    async fn update_online_status(&self, driver_id: &str, is_online: bool) -> Result<(), Error> {
        self.log(format!("status {} {}", driver_id, is_online)).await;

        Ok(())
    }
}

impl API for FakeAPI {}

pub fn offer(ride_id: &str) -> RideOffer {
    RideOffer {
        ride_id: ride_id.into(),
        pickup_address: "Broadway Ave".into(),
        dropoff_address: "Airport".into(),
        pickup_lat: Some(PICKUP.0),
        pickup_lng: Some(PICKUP.1),
        dropoff_lat: Some(52.1708),
        dropoff_lng: Some(-106.6997),
        fare: 21.5,
        distance_km: Some(6.2),
        duration_minutes: Some(14.0),
        rider_name: Some("Sam".into()),
        rider_rating: Some(4.8),
    }
}

pub fn active_ride(ride_id: &str, status: &str) -> ActiveRide {
    ActiveRide {
        ride: RideRecord {
            id: ride_id.into(),
            status: status.into(),
            pickup_address: "Broadway Ave".into(),
            dropoff_address: "Airport".into(),
            pickup_lat: Some(PICKUP.0),
            pickup_lng: Some(PICKUP.1),
            dropoff_lat: Some(52.1708),
            dropoff_lng: Some(-106.6997),
            total_fare: Some(21.5),
            distance_km: Some(6.2),
            duration_minutes: Some(14.0),
        },
        rider: None,
        vehicle_type: None,
    }
}

pub fn controller(api: Arc<FakeAPI>) -> (RideLifecycleController, Receiver<Event>) {
    let (tx, rx) = async_channel::unbounded();

    (RideLifecycleController::new(api, &Config::default(), tx), rx)
}

/// Waits for the next call outcome and feeds it to the controller, the way
/// the engine loop does.
pub async fn settle(controller: &mut RideLifecycleController, outcomes: &Receiver<Event>) -> Event {
    let event = tokio::time::timeout(Duration::from_secs(2), outcomes.recv())
        .await
        .expect("no call outcome within 2s")
        .expect("outcome channel closed");

    controller
        .dispatch(event.clone())
        .expect("outcome should apply");

    event
}

/// Gives spawned calls a moment and asserts none of them reported back.
pub async fn assert_quiet(outcomes: &Receiver<Event>) {
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(outcomes.is_empty(), "unexpected outcome {:?}", outcomes.try_recv());
}
