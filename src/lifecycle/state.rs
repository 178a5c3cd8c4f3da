use serde::Serialize;

use crate::entities::{
    ActiveRide, CompletedRideSummary, Coordinates, RideOffer, TrackingContext, TrackingPhase,
};
use crate::error::{
    geofence_violation_error, in_flight_error, invalid_input_error, invalid_state_error,
    no_ride_error, Error,
};
use crate::geofence::{check_arrival, ARRIVAL_RADIUS_METERS};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RideState {
    Idle,
    Offered,
    NavigatingToPickup,
    ArrivedAtPickup,
    TripInProgress,
    TripCompleted,
}

impl RideState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Offered => "offered",
            Self::NavigatingToPickup => "navigating_to_pickup",
            Self::ArrivedAtPickup => "arrived_at_pickup",
            Self::TripInProgress => "trip_in_progress",
            Self::TripCompleted => "trip_completed",
        }
    }

    /// Maps the backend's ride status onto the local state.
    pub fn from_server_status(status: Option<&str>) -> Self {
        match status {
            Some("driver_assigned") | Some("driver_accepted") => Self::NavigatingToPickup,
            Some("driver_arrived") => Self::ArrivedAtPickup,
            Some("in_progress") => Self::TripInProgress,
            _ => Self::Idle,
        }
    }

    pub fn tracking_phase(&self) -> TrackingPhase {
        match self {
            Self::Idle | Self::Offered | Self::TripCompleted => TrackingPhase::OnlineIdle,
            Self::NavigatingToPickup => TrackingPhase::NavigatingToPickup,
            Self::ArrivedAtPickup => TrackingPhase::ArrivedAtPickup,
            Self::TripInProgress => TrackingPhase::TripInProgress,
        }
    }
}

/// Transitions that only happen once the backend confirms them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Arrive,
    VerifyOtp,
    Start,
    Complete,
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Arrive => "arrive",
            Self::VerifyOtp => "verify_otp",
            Self::Start => "start",
            Self::Complete => "complete",
        }
    }
}

/// A successful REST confirmation together with whatever the backend handed back.
#[derive(Clone, Debug, PartialEq)]
pub enum Confirmation {
    Accepted(Option<ActiveRide>),
    Arrived(Option<ActiveRide>),
    OtpVerified(Option<ActiveRide>),
    Started,
    Completed(CompletedRideSummary),
}

impl Confirmation {
    pub fn transition(&self) -> Transition {
        match self {
            Self::Accepted(_) => Transition::Accept,
            Self::Arrived(_) => Transition::Arrive,
            Self::OtpVerified(_) => Transition::VerifyOtp,
            Self::Started => Transition::Start,
            Self::Completed(_) => Transition::Complete,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    OfferReceived(RideOffer),
    Accept {
        ride_id: String,
    },
    Decline {
        ride_id: String,
    },
    CountdownExpired,
    Arrive {
        ride_id: String,
        position: Option<Coordinates>,
    },
    VerifyOtp {
        ride_id: String,
        otp: String,
    },
    Start {
        ride_id: String,
    },
    Complete {
        ride_id: String,
    },
    Cancel {
        ride_id: String,
        reason: Option<String>,
    },
    Acknowledge,
    RateRider {
        ride_id: String,
        rating: u8,
        comment: Option<String>,
    },
    /// Pushed by the backend; the ride is gone no matter what we think.
    RideCancelled {
        ride_id: Option<String>,
        reason: Option<String>,
    },
    Confirmed {
        ride_id: String,
        confirmation: Confirmation,
    },
    Rejected {
        ride_id: String,
        transition: Transition,
        error: Error,
    },
    Reconciled(Option<ActiveRide>),
    ReconcileFailed(Error),
    /// Outcome of a decline, cancel or rating call. Only logged.
    BestEffortSettled {
        call: &'static str,
        ride_id: String,
        result: Result<(), Error>,
    },
    ClearError,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OfferReceived(_) => "offer_received",
            Self::Accept { .. } => "accept",
            Self::Decline { .. } => "decline",
            Self::CountdownExpired => "countdown_expired",
            Self::Arrive { .. } => "arrive",
            Self::VerifyOtp { .. } => "verify_otp",
            Self::Start { .. } => "start",
            Self::Complete { .. } => "complete",
            Self::Cancel { .. } => "cancel",
            Self::Acknowledge => "acknowledge",
            Self::RateRider { .. } => "rate_rider",
            Self::RideCancelled { .. } => "ride_cancelled",
            Self::Confirmed { .. } => "confirmed",
            Self::Rejected { .. } => "rejected",
            Self::Reconciled(_) => "reconciled",
            Self::ReconcileFailed(_) => "reconcile_failed",
            Self::BestEffortSettled { .. } => "best_effort_settled",
            Self::ClearError => "clear_error",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RestCall {
    Accept {
        ride_id: String,
    },
    Decline {
        ride_id: String,
    },
    Arrive {
        ride_id: String,
    },
    VerifyOtp {
        ride_id: String,
        otp: String,
    },
    Start {
        ride_id: String,
    },
    Complete {
        ride_id: String,
    },
    Cancel {
        ride_id: String,
        reason: Option<String>,
    },
    RateRider {
        ride_id: String,
        rating: u8,
        comment: Option<String>,
    },
    FetchActiveRide,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    StartCountdown,
    StopCountdown,
    Call(RestCall),
    /// Fetch the active ride again after a delay.
    RetryReconcile,
    Notice(String),
}

#[derive(Clone, Debug, PartialEq)]
struct Pending {
    transition: Transition,
    ride_id: String,
}

/// The driver's ride state. It only changes through [`RideStore::apply`].
#[derive(Clone, Debug)]
pub struct RideStore {
    state: RideState,
    offer: Option<RideOffer>,
    active: Option<ActiveRide>,
    /// The accepted ride, kept while its details have not been loaded.
    ride_id: Option<String>,
    summary: Option<CompletedRideSummary>,
    last_error: Option<Error>,
    otp_entry: Option<String>,
    pending: Option<Pending>,
    reconciled: bool,
    arrival_radius_meters: f64,
}

impl RideStore {
    pub fn new(arrival_radius_meters: f64) -> Self {
        Self {
            state: RideState::Idle,
            offer: None,
            active: None,
            ride_id: None,
            summary: None,
            last_error: None,
            otp_entry: None,
            pending: None,
            reconciled: false,
            arrival_radius_meters,
        }
    }

    pub fn state(&self) -> RideState {
        self.state
    }

    pub fn offer(&self) -> Option<&RideOffer> {
        self.offer.as_ref()
    }

    pub fn active_ride(&self) -> Option<&ActiveRide> {
        self.active.as_ref()
    }

    pub fn summary(&self) -> Option<&CompletedRideSummary> {
        self.summary.as_ref()
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    pub fn otp_entry(&self) -> Option<&str> {
        self.otp_entry.as_deref()
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciled
    }

    pub fn pending(&self) -> Option<Transition> {
        self.pending.as_ref().map(|pending| pending.transition)
    }

    /// The ride the driver is currently dealing with, if any.
    pub fn current_ride_id(&self) -> Option<&str> {
        match self.state {
            RideState::Offered => self.offer.as_ref().map(|offer| offer.ride_id.as_str()),
            RideState::TripCompleted => self.summary.as_ref().map(|summary| summary.id.as_str()),
            _ => self
                .active
                .as_ref()
                .map(|ride| ride.id())
                .or(self.ride_id.as_deref()),
        }
    }

    /// Phase and ride tag for telemetry. Until the first reconciliation the
    /// local state is not trusted to tag samples with a ride.
    pub fn tracking_context(&self) -> TrackingContext {
        if !self.reconciled {
            return TrackingContext::idle();
        }

        let phase = self.state.tracking_phase();
        let ride_id = match phase {
            TrackingPhase::OnlineIdle => None,
            _ => self.current_ride_id().map(String::from),
        };

        TrackingContext { phase, ride_id }
    }

    /// Stops trusting local state for telemetry until the next reconciliation
    /// lands. Called whenever the driver (re)connects.
    pub fn invalidate(&mut self) {
        self.reconciled = false;
    }

    /// Records an error for the driver to see and dismiss.
    pub fn report(&mut self, error: Error) {
        if error.is_user_visible() {
            self.last_error = Some(error);
        }
    }

    #[tracing::instrument(skip(self, event), fields(state = self.state.name(), event = event.name()))]
    pub fn apply(&mut self, event: Event) -> Result<Vec<Effect>, Error> {
        match event {
            Event::OfferReceived(offer) => self.receive_offer(offer),
            Event::Accept { ride_id } => self.accept(ride_id),
            Event::Decline { ride_id } => self.decline(Some(ride_id)),
            Event::CountdownExpired => self.expire_offer(),
            Event::Arrive { ride_id, position } => self.arrive(ride_id, position),
            Event::VerifyOtp { ride_id, otp } => self.verify_otp(ride_id, otp),
            Event::Start { ride_id } => self.begin(Transition::Start, RideState::ArrivedAtPickup, ride_id),
            Event::Complete { ride_id } => {
                self.begin(Transition::Complete, RideState::TripInProgress, ride_id)
            }
            Event::Cancel { ride_id, reason } => self.cancel(ride_id, reason),
            Event::Acknowledge => self.acknowledge(),
            Event::RateRider {
                ride_id,
                rating,
                comment,
            } => self.rate_rider(ride_id, rating, comment),
            Event::RideCancelled { ride_id, reason } => self.ride_cancelled(ride_id, reason),
            Event::Confirmed {
                ride_id,
                confirmation,
            } => Ok(self.confirmed(ride_id, confirmation)),
            Event::Rejected {
                ride_id,
                transition,
                error,
            } => Ok(self.rejected(ride_id, transition, error)),
            Event::Reconciled(ride) => Ok(self.reconciled(ride)),
            Event::ReconcileFailed(error) => Ok(self.reconcile_failed(error)),
            Event::BestEffortSettled {
                call,
                ride_id,
                result,
            } => {
                if let Err(err) = result {
                    tracing::warn!(call, ride_id = %ride_id, "best-effort call failed: {}", err);
                }
                Ok(vec![])
            }
            Event::ClearError => {
                self.last_error = None;
                Ok(vec![])
            }
        }
    }

    fn receive_offer(&mut self, offer: RideOffer) -> Result<Vec<Effect>, Error> {
        if self.state != RideState::Idle {
            tracing::warn!(ride_id = %offer.ride_id, "offer received while busy");
            return Err(invalid_state_error());
        }

        tracing::info!(ride_id = %offer.ride_id, fare = offer.fare, "ride offered");

        self.offer = Some(offer);
        self.state = RideState::Offered;

        Ok(vec![Effect::StartCountdown])
    }

    fn accept(&mut self, ride_id: String) -> Result<Vec<Effect>, Error> {
        self.ensure_idle_pending()?;
        self.ensure_state(RideState::Offered)?;
        self.ensure_ride(&ride_id)?;

        self.pending = Some(Pending {
            transition: Transition::Accept,
            ride_id: ride_id.clone(),
        });

        Ok(vec![Effect::Call(RestCall::Accept { ride_id })])
    }

    fn decline(&mut self, ride_id: Option<String>) -> Result<Vec<Effect>, Error> {
        self.ensure_state(RideState::Offered)?;

        if let Some(ride_id) = &ride_id {
            self.ensure_ride(ride_id)?;
        }

        let offer = self.offer.take().ok_or_else(no_ride_error)?;

        tracing::info!(ride_id = %offer.ride_id, "offer declined");

        self.pending = None;
        self.state = RideState::Idle;

        Ok(vec![
            Effect::StopCountdown,
            Effect::Call(RestCall::Decline {
                ride_id: offer.ride_id,
            }),
        ])
    }

    fn expire_offer(&mut self) -> Result<Vec<Effect>, Error> {
        // A tick that lands after the offer is gone, or while the driver's
        // accept is being confirmed, does nothing.
        if self.state != RideState::Offered || self.pending.is_some() {
            return Ok(vec![]);
        }

        tracing::info!("offer expired");

        self.decline(None)
    }

    fn arrive(&mut self, ride_id: String, position: Option<Coordinates>) -> Result<Vec<Effect>, Error> {
        self.ensure_idle_pending()?;
        self.ensure_state(RideState::NavigatingToPickup)?;
        self.ensure_ride(&ride_id)?;

        let pickup = self.active.as_ref().and_then(|ride| ride.pickup());

        if let (Some(driver), Some(pickup)) = (position, pickup) {
            let (distance, ok) = check_arrival(driver, pickup, self.arrival_radius_meters);

            if !ok {
                tracing::warn!(distance, "arrival outside pickup geofence");
                return Err(geofence_violation_error(distance, self.arrival_radius_meters));
            }
        }

        self.pending = Some(Pending {
            transition: Transition::Arrive,
            ride_id: ride_id.clone(),
        });

        Ok(vec![Effect::Call(RestCall::Arrive { ride_id })])
    }

    fn verify_otp(&mut self, ride_id: String, otp: String) -> Result<Vec<Effect>, Error> {
        self.ensure_idle_pending()?;
        self.ensure_state(RideState::ArrivedAtPickup)?;
        self.ensure_ride(&ride_id)?;

        let otp = otp.trim().to_string();

        if otp.is_empty() {
            return Err(invalid_input_error());
        }

        self.otp_entry = Some(otp.clone());
        self.pending = Some(Pending {
            transition: Transition::VerifyOtp,
            ride_id: ride_id.clone(),
        });

        Ok(vec![Effect::Call(RestCall::VerifyOtp { ride_id, otp })])
    }

    fn begin(
        &mut self,
        transition: Transition,
        from: RideState,
        ride_id: String,
    ) -> Result<Vec<Effect>, Error> {
        self.ensure_idle_pending()?;
        self.ensure_state(from)?;
        self.ensure_ride(&ride_id)?;

        self.pending = Some(Pending {
            transition,
            ride_id: ride_id.clone(),
        });

        let call = match transition {
            Transition::Start => RestCall::Start { ride_id },
            _ => RestCall::Complete { ride_id },
        };

        Ok(vec![Effect::Call(call)])
    }

    fn cancel(&mut self, ride_id: String, reason: Option<String>) -> Result<Vec<Effect>, Error> {
        match self.state {
            RideState::NavigatingToPickup | RideState::ArrivedAtPickup => {}
            _ => return Err(invalid_state_error()),
        }

        self.ensure_ride(&ride_id)?;

        tracing::info!(ride_id = %ride_id, "ride cancelled by driver");

        self.reset();

        Ok(vec![Effect::Call(RestCall::Cancel { ride_id, reason })])
    }

    fn acknowledge(&mut self) -> Result<Vec<Effect>, Error> {
        self.ensure_state(RideState::TripCompleted)?;

        self.summary = None;
        self.state = RideState::Idle;

        Ok(vec![])
    }

    fn rate_rider(
        &mut self,
        ride_id: String,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Vec<Effect>, Error> {
        self.ensure_state(RideState::TripCompleted)?;
        self.ensure_ride(&ride_id)?;

        if !(1..=5).contains(&rating) {
            return Err(invalid_input_error());
        }

        Ok(vec![Effect::Call(RestCall::RateRider {
            ride_id,
            rating,
            comment,
        })])
    }

    fn ride_cancelled(
        &mut self,
        ride_id: Option<String>,
        reason: Option<String>,
    ) -> Result<Vec<Effect>, Error> {
        if let (Some(pushed), Some(current)) = (ride_id.as_deref(), self.current_ride_id()) {
            if pushed != current {
                tracing::warn!(pushed, current, "cancellation for another ride ignored");
                return Ok(vec![]);
            }
        }

        if self.state == RideState::Idle {
            return Ok(vec![]);
        }

        tracing::info!(state = self.state.name(), "ride cancelled by backend");

        self.reset();

        let notice = match reason {
            Some(reason) if !reason.is_empty() => format!("The ride was cancelled: {}", reason),
            _ => "The ride was cancelled".to_string(),
        };

        Ok(vec![Effect::StopCountdown, Effect::Notice(notice)])
    }

    fn confirmed(&mut self, ride_id: String, confirmation: Confirmation) -> Vec<Effect> {
        let transition = confirmation.transition();

        if !self.is_pending(transition, &ride_id) {
            tracing::warn!(
                transition = transition.name(),
                ride_id = %ride_id,
                "stale confirmation discarded"
            );
            return vec![Effect::Call(RestCall::FetchActiveRide)];
        }

        self.pending = None;
        self.last_error = None;

        let mut effects = vec![];

        match confirmation {
            Confirmation::Accepted(ride) => {
                self.offer = None;
                self.ride_id = Some(ride_id.clone());
                self.state = RideState::NavigatingToPickup;
                effects.push(Effect::StopCountdown);

                match ride {
                    Some(ride) => self.active = Some(ride),
                    None => effects.push(Effect::Call(RestCall::FetchActiveRide)),
                }
            }
            Confirmation::Arrived(ride) => {
                self.refresh(ride, "driver_arrived");
                self.state = RideState::ArrivedAtPickup;
            }
            Confirmation::OtpVerified(ride) => {
                self.refresh(ride, "in_progress");
                self.otp_entry = None;
                self.state = RideState::TripInProgress;
            }
            Confirmation::Started => {
                self.refresh(None, "in_progress");
                self.state = RideState::TripInProgress;
            }
            Confirmation::Completed(mut summary) => {
                if summary.id.is_empty() {
                    summary.id = ride_id.clone();
                }
                self.active = None;
                self.ride_id = None;
                self.summary = Some(summary);
                self.state = RideState::TripCompleted;
            }
        }

        tracing::info!(ride_id = %ride_id, state = self.state.name(), "transition confirmed");

        effects
    }

    fn rejected(&mut self, ride_id: String, transition: Transition, error: Error) -> Vec<Effect> {
        if !self.is_pending(transition, &ride_id) {
            tracing::warn!(transition = transition.name(), "stale rejection ignored");
            return vec![];
        }

        tracing::warn!(transition = transition.name(), ride_id = %ride_id, "confirmation rejected: {}", error);

        self.pending = None;

        if error.is_invalid_otp() {
            self.otp_entry = None;
        }

        self.last_error = Some(error);

        vec![]
    }

    fn reconciled(&mut self, ride: Option<ActiveRide>) -> Vec<Effect> {
        self.reconciled = true;
        self.pending = None;

        let server_state = RideState::from_server_status(ride.as_ref().map(|ride| ride.status()));

        // An unanswered offer shows up either not at all or as the same ride
        // still waiting on the driver.
        if self.state == RideState::Offered {
            let same_offer = match (&ride, &self.offer) {
                (None, _) => true,
                (Some(ride), Some(offer)) => {
                    ride.id() == offer.ride_id && ride.status() == "driver_assigned"
                }
                _ => false,
            };

            if same_offer {
                return vec![];
            }
        }

        if self.state == RideState::TripCompleted && server_state == RideState::Idle {
            return vec![];
        }

        let mut effects = vec![];

        if self.offer.take().is_some() {
            effects.push(Effect::StopCountdown);
        }

        self.summary = None;
        self.otp_entry = None;
        self.ride_id = None;
        self.state = server_state;
        self.active = match server_state {
            RideState::Idle => None,
            _ => ride,
        };

        tracing::info!(state = self.state.name(), "reconciled with backend");

        effects
    }

    /// A failed fetch is retried while the store cannot vouch for the ride:
    /// before the first reconciliation, or in a ride whose details never loaded.
    fn reconcile_failed(&mut self, error: Error) -> Vec<Effect> {
        tracing::warn!("active ride fetch failed: {}", error);

        let ride_without_details = self.active.is_none()
            && matches!(
                self.state,
                RideState::NavigatingToPickup | RideState::ArrivedAtPickup | RideState::TripInProgress
            );

        if !self.reconciled || ride_without_details {
            return vec![Effect::RetryReconcile];
        }

        vec![]
    }

    fn refresh(&mut self, ride: Option<ActiveRide>, status: &str) {
        match ride {
            Some(ride) => self.active = Some(ride),
            None => {
                if let Some(active) = self.active.as_mut() {
                    active.ride.status = status.to_string();
                }
            }
        }
    }

    fn reset(&mut self) {
        self.offer = None;
        self.active = None;
        self.ride_id = None;
        self.summary = None;
        self.pending = None;
        self.otp_entry = None;
        self.state = RideState::Idle;
    }

    fn is_pending(&self, transition: Transition, ride_id: &str) -> bool {
        matches!(&self.pending, Some(pending) if pending.transition == transition && pending.ride_id == ride_id)
    }

    fn ensure_idle_pending(&self) -> Result<(), Error> {
        match &self.pending {
            Some(_) => Err(in_flight_error()),
            None => Ok(()),
        }
    }

    fn ensure_state(&self, expected: RideState) -> Result<(), Error> {
        if self.state != expected {
            return Err(invalid_state_error());
        }

        Ok(())
    }

    fn ensure_ride(&self, ride_id: &str) -> Result<(), Error> {
        match self.current_ride_id() {
            Some(current) if current == ride_id => Ok(()),
            Some(_) => Err(invalid_input_error()),
            None => Err(no_ride_error()),
        }
    }
}

impl Default for RideStore {
    fn default() -> Self {
        Self::new(ARRIVAL_RADIUS_METERS)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::entities::RideRecord;

    pub fn offer(ride_id: &str) -> RideOffer {
        RideOffer {
            ride_id: ride_id.into(),
            pickup_address: "Broadway Ave".into(),
            dropoff_address: "Airport".into(),
            pickup_lat: Some(52.1332),
            pickup_lng: Some(-106.6700),
            dropoff_lat: Some(52.1708),
            dropoff_lng: Some(-106.6997),
            fare: 21.5,
            distance_km: Some(6.2),
            duration_minutes: Some(14.0),
            rider_name: Some("Sam".into()),
            rider_rating: Some(4.8),
        }
    }

    pub fn active(ride_id: &str, status: &str) -> ActiveRide {
        ActiveRide {
            ride: RideRecord {
                id: ride_id.into(),
                status: status.into(),
                pickup_address: "Broadway Ave".into(),
                dropoff_address: "Airport".into(),
                pickup_lat: Some(52.1332),
                pickup_lng: Some(-106.6700),
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

    pub fn summary(ride_id: &str) -> CompletedRideSummary {
        CompletedRideSummary {
            id: ride_id.into(),
            base_fare: 3.5,
            distance_fare: 9.3,
            time_fare: 5.6,
            platform_fee: 2.0,
            tip: 1.1,
            total_fare: 21.5,
            distance_km: 6.2,
            duration_minutes: 14.0,
        }
    }

    /// A reconciled store sitting in `state` with ride "R1".
    pub fn store_in(state: RideState) -> RideStore {
        let mut store = RideStore::default();
        store.apply(Event::Reconciled(None)).unwrap();

        match state {
            RideState::Idle => {}
            RideState::Offered => {
                store.apply(Event::OfferReceived(offer("R1"))).unwrap();
            }
            RideState::NavigatingToPickup
            | RideState::ArrivedAtPickup
            | RideState::TripInProgress => {
                let status = match state {
                    RideState::NavigatingToPickup => "driver_accepted",
                    RideState::ArrivedAtPickup => "driver_arrived",
                    _ => "in_progress",
                };
                store
                    .apply(Event::Reconciled(Some(active("R1", status))))
                    .unwrap();
            }
            RideState::TripCompleted => {
                store
                    .apply(Event::Reconciled(Some(active("R1", "in_progress"))))
                    .unwrap();
                store
                    .apply(Event::Complete {
                        ride_id: "R1".into(),
                    })
                    .unwrap();
                store
                    .apply(Event::Confirmed {
                        ride_id: "R1".into(),
                        confirmation: Confirmation::Completed(summary("R1")),
                    })
                    .unwrap();
            }
        }

        assert_eq!(store.state(), state);
        store
    }
}

#[cfg(test)]
use fixtures::{active, offer, store_in, summary};

#[cfg(test)]
const ALL_STATES: [RideState; 6] = [
    RideState::Idle,
    RideState::Offered,
    RideState::NavigatingToPickup,
    RideState::ArrivedAtPickup,
    RideState::TripInProgress,
    RideState::TripCompleted,
];

#[test]
fn transition_table_is_exhaustive() {
    let intents: Vec<(Event, Vec<RideState>)> = vec![
        (Event::OfferReceived(offer("R1")), vec![RideState::Idle]),
        (Event::Accept { ride_id: "R1".into() }, vec![RideState::Offered]),
        (Event::Decline { ride_id: "R1".into() }, vec![RideState::Offered]),
        (
            Event::Arrive {
                ride_id: "R1".into(),
                position: None,
            },
            vec![RideState::NavigatingToPickup],
        ),
        (
            Event::VerifyOtp {
                ride_id: "R1".into(),
                otp: "1234".into(),
            },
            vec![RideState::ArrivedAtPickup],
        ),
        (Event::Start { ride_id: "R1".into() }, vec![RideState::ArrivedAtPickup]),
        (Event::Complete { ride_id: "R1".into() }, vec![RideState::TripInProgress]),
        (
            Event::Cancel {
                ride_id: "R1".into(),
                reason: None,
            },
            vec![RideState::NavigatingToPickup, RideState::ArrivedAtPickup],
        ),
        (Event::Acknowledge, vec![RideState::TripCompleted]),
        (
            Event::RateRider {
                ride_id: "R1".into(),
                rating: 5,
                comment: None,
            },
            vec![RideState::TripCompleted],
        ),
    ];

    for (event, allowed) in intents {
        for state in ALL_STATES {
            let mut store = store_in(state);
            let result = store.apply(event.clone());

            if allowed.contains(&state) {
                assert!(result.is_ok(), "{} should be allowed in {}", event.name(), state.name());
            } else {
                let err = result.unwrap_err();
                assert!(
                    err.is_invalid_state_error() || err.is_invalid_input_error() || err.code == 106,
                    "{} in {} gave {:?}",
                    event.name(),
                    state.name(),
                    err
                );
                assert_eq!(store.state(), state, "{} moved {}", event.name(), state.name());
            }
        }
    }
}

#[test]
fn stale_countdown_tick_is_a_no_op() {
    for state in ALL_STATES {
        if state == RideState::Offered {
            continue;
        }

        let mut store = store_in(state);

        assert_eq!(store.apply(Event::CountdownExpired).unwrap(), vec![]);
        assert_eq!(store.state(), state);
    }
}

#[test]
fn offer_and_active_ride_are_never_both_set() {
    let mut store = store_in(RideState::Offered);
    store.apply(Event::Accept { ride_id: "R1".into() }).unwrap();
    store
        .apply(Event::Confirmed {
            ride_id: "R1".into(),
            confirmation: Confirmation::Accepted(Some(active("R1", "driver_accepted"))),
        })
        .unwrap();

    assert_eq!(store.state(), RideState::NavigatingToPickup);
    assert!(store.offer().is_none());
    assert_eq!(store.active_ride().map(|r| r.id()), Some("R1"));
}

#[test]
fn second_confirming_intent_is_refused_while_in_flight() {
    let mut store = store_in(RideState::TripInProgress);
    let effects = store.apply(Event::Complete { ride_id: "R1".into() }).unwrap();

    assert_eq!(
        effects,
        vec![Effect::Call(RestCall::Complete { ride_id: "R1".into() })]
    );
    assert!(store
        .apply(Event::Complete { ride_id: "R1".into() })
        .unwrap_err()
        .is_in_flight_error());
}

#[test]
fn rejection_keeps_state_and_records_error() {
    let mut store = store_in(RideState::ArrivedAtPickup);
    store
        .apply(Event::VerifyOtp {
            ride_id: "R1".into(),
            otp: "0000".into(),
        })
        .unwrap();
    assert_eq!(store.otp_entry(), Some("0000"));

    store
        .apply(Event::Rejected {
            ride_id: "R1".into(),
            transition: Transition::VerifyOtp,
            error: crate::error::invalid_otp_error(),
        })
        .unwrap();

    assert_eq!(store.state(), RideState::ArrivedAtPickup);
    assert_eq!(store.otp_entry(), None);
    assert_eq!(store.last_error().map(|e| e.message.as_str()), Some("invalid code"));
    assert_eq!(store.pending(), None);

    store.apply(Event::ClearError).unwrap();
    assert!(store.last_error().is_none());
}

#[test]
fn arrival_outside_geofence_is_refused() {
    let mut store = store_in(RideState::NavigatingToPickup);

    let err = store
        .apply(Event::Arrive {
            ride_id: "R1".into(),
            position: Some(Coordinates::new(52.1350, -106.6700)),
        })
        .unwrap_err();

    assert!(err.is_geofence_violation());
    assert_eq!(store.state(), RideState::NavigatingToPickup);
    assert_eq!(store.pending(), None);

    let effects = store
        .apply(Event::Arrive {
            ride_id: "R1".into(),
            position: Some(Coordinates::new(52.1340, -106.6700)),
        })
        .unwrap();
    assert_eq!(effects, vec![Effect::Call(RestCall::Arrive { ride_id: "R1".into() })]);
}

#[test]
fn confirmation_after_cancel_push_is_stale() {
    let mut store = store_in(RideState::Offered);
    store.apply(Event::Accept { ride_id: "R1".into() }).unwrap();

    let effects = store
        .apply(Event::RideCancelled {
            ride_id: Some("R1".into()),
            reason: Some("rider cancelled".into()),
        })
        .unwrap();
    assert_eq!(
        effects,
        vec![
            Effect::StopCountdown,
            Effect::Notice("The ride was cancelled: rider cancelled".into())
        ]
    );

    let effects = store
        .apply(Event::Confirmed {
            ride_id: "R1".into(),
            confirmation: Confirmation::Accepted(Some(active("R1", "driver_accepted"))),
        })
        .unwrap();

    assert_eq!(effects, vec![Effect::Call(RestCall::FetchActiveRide)]);
    assert_eq!(store.state(), RideState::Idle);
    assert!(store.active_ride().is_none());
}

#[test]
fn cancel_push_for_another_ride_is_ignored() {
    let mut store = store_in(RideState::NavigatingToPickup);

    let effects = store
        .apply(Event::RideCancelled {
            ride_id: Some("R9".into()),
            reason: None,
        })
        .unwrap();

    assert!(effects.is_empty());
    assert_eq!(store.state(), RideState::NavigatingToPickup);
}

#[test]
fn reconciliation_follows_server_status() {
    let cases = [
        ("driver_assigned", RideState::NavigatingToPickup),
        ("driver_accepted", RideState::NavigatingToPickup),
        ("driver_arrived", RideState::ArrivedAtPickup),
        ("in_progress", RideState::TripInProgress),
        ("completed", RideState::Idle),
        ("cancelled", RideState::Idle),
    ];

    for (status, expected) in cases {
        let mut store = RideStore::default();
        assert_eq!(store.tracking_context(), TrackingContext::idle());

        store.apply(Event::Reconciled(Some(active("R7", status)))).unwrap();

        assert_eq!(store.state(), expected, "{}", status);
        assert!(store.is_reconciled());

        let context = store.tracking_context();
        assert_eq!(context.phase, expected.tracking_phase());
        if expected == RideState::Idle {
            assert_eq!(context.ride_id, None);
            assert!(store.active_ride().is_none());
        } else {
            assert_eq!(context.ride_id.as_deref(), Some("R7"));
        }
    }
}

#[test]
fn reconciliation_keeps_unanswered_offer_and_completed_summary() {
    let mut store = store_in(RideState::Offered);
    store
        .apply(Event::Reconciled(Some(active("R1", "driver_assigned"))))
        .unwrap();
    assert_eq!(store.state(), RideState::Offered);
    assert!(store.offer().is_some());

    let mut store = store_in(RideState::TripCompleted);
    store.apply(Event::Reconciled(None)).unwrap();
    assert_eq!(store.state(), RideState::TripCompleted);
    assert_eq!(store.summary(), Some(&summary("R1")));
}

#[test]
fn invalidated_store_untags_telemetry_until_reconciled() {
    let mut store = store_in(RideState::NavigatingToPickup);
    assert_eq!(store.tracking_context().ride_id.as_deref(), Some("R1"));

    store.invalidate();

    assert!(!store.is_reconciled());
    assert_eq!(store.tracking_context(), TrackingContext::idle());
    assert_eq!(store.state(), RideState::NavigatingToPickup);

    // the backend dropped the ride while the driver was away
    store.apply(Event::Reconciled(None)).unwrap();

    assert_eq!(store.state(), RideState::Idle);
    assert_eq!(store.tracking_context(), TrackingContext::idle());
}

/// Accepted, but neither the refresh nor the follow-up fetch returned the ride.
#[cfg(test)]
fn accepted_without_details() -> RideStore {
    let mut store = store_in(RideState::Offered);
    store.apply(Event::Accept { ride_id: "R1".into() }).unwrap();

    let effects = store
        .apply(Event::Confirmed {
            ride_id: "R1".into(),
            confirmation: Confirmation::Accepted(None),
        })
        .unwrap();
    assert_eq!(
        effects,
        vec![Effect::StopCountdown, Effect::Call(RestCall::FetchActiveRide)]
    );

    let effects = store
        .apply(Event::ReconcileFailed(crate::error::upstream_error()))
        .unwrap();
    assert_eq!(effects, vec![Effect::RetryReconcile]);

    store
}

#[test]
fn accepted_ride_without_details_stays_addressable() {
    let mut store = accepted_without_details();

    assert_eq!(store.state(), RideState::NavigatingToPickup);
    assert!(store.active_ride().is_none());
    assert_eq!(store.current_ride_id(), Some("R1"));
    assert_eq!(store.tracking_context().ride_id.as_deref(), Some("R1"));

    let effects = store
        .apply(Event::Cancel {
            ride_id: "R1".into(),
            reason: None,
        })
        .unwrap();

    assert_eq!(
        effects,
        vec![Effect::Call(RestCall::Cancel {
            ride_id: "R1".into(),
            reason: None
        })]
    );
    assert_eq!(store.state(), RideState::Idle);
    assert_eq!(store.current_ride_id(), None);
}

#[test]
fn cancel_push_resets_ride_without_details() {
    let mut store = accepted_without_details();

    let effects = store
        .apply(Event::RideCancelled {
            ride_id: Some("R1".into()),
            reason: None,
        })
        .unwrap();

    assert_eq!(
        effects,
        vec![
            Effect::StopCountdown,
            Effect::Notice("The ride was cancelled".into())
        ]
    );
    assert_eq!(store.state(), RideState::Idle);
}

#[test]
fn late_details_replace_the_kept_ride_id() {
    let mut store = accepted_without_details();

    store
        .apply(Event::Reconciled(Some(active("R1", "driver_accepted"))))
        .unwrap();

    assert_eq!(store.state(), RideState::NavigatingToPickup);
    assert_eq!(store.active_ride().map(|r| r.id()), Some("R1"));
    assert_eq!(
        store
            .apply(Event::ReconcileFailed(crate::error::upstream_error()))
            .unwrap(),
        vec![]
    );
}
