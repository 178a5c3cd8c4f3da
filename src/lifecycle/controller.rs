use std::time::Duration;

use async_channel::Sender;
use tokio::task::JoinHandle;

use crate::api::{DynAPI, API};
use crate::config::Config;
use crate::countdown::{CountdownTimer, Tick};
use crate::entities::{ActiveRide, CompletedRideSummary, RideOffer, TrackingContext};
use crate::error::Error;
use crate::lifecycle::state::{Confirmation, Effect, Event, RestCall, RideState, RideStore, Transition};

/// Drives the [`RideStore`]: feeds it events, runs the countdown and turns REST
/// effects into background calls whose outcomes come back on `events`.
pub struct RideLifecycleController {
    store: RideStore,
    countdown: CountdownTimer,
    api: DynAPI,
    events: Sender<Event>,
    notices: Vec<String>,
    retry: Option<JoinHandle<()>>,
}

const RECONCILE_RETRY_DELAY: Duration = Duration::from_secs(5);

impl RideLifecycleController {
    pub fn new(api: DynAPI, config: &Config, events: Sender<Event>) -> Self {
        Self {
            store: RideStore::new(config.arrival_radius_meters),
            countdown: CountdownTimer::new(config.offer_countdown_secs),
            api,
            events,
            notices: vec![],
            retry: None,
        }
    }

    /// Applies an event and runs whatever it asks for.
    pub fn dispatch(&mut self, event: Event) -> Result<(), Error> {
        let effects = self.store.apply(event)?;

        self.run(effects);

        Ok(())
    }

    /// Like [`dispatch`](Self::dispatch), for driver intents: a refusal is also
    /// kept as the last error so it can be shown and dismissed.
    #[tracing::instrument(skip(self, event), fields(event = event.name()))]
    pub fn perform(&mut self, event: Event) -> Result<(), Error> {
        self.dispatch(event).map_err(|err| {
            tracing::warn!("intent refused: {}", err);
            self.store.report(err.clone());
            err
        })
    }

    pub fn report(&mut self, error: Error) {
        self.store.report(error);
    }

    /// One second of offer countdown. Held while an accept is being confirmed.
    pub fn tick(&mut self) -> Result<(), Error> {
        if self.store.pending() == Some(Transition::Accept) {
            return Ok(());
        }

        match self.countdown.tick() {
            Tick::Expired => self.dispatch(Event::CountdownExpired),
            Tick::Remaining(_) | Tick::Inactive => Ok(()),
        }
    }

    /// Asks the backend for the driver's active ride; the answer arrives as
    /// `Reconciled` or `ReconcileFailed`. Telemetry goes untagged until then.
    #[tracing::instrument(skip(self))]
    pub fn reconcile(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }

        self.store.invalidate();
        self.spawn(RestCall::FetchActiveRide);
    }

    pub fn state(&self) -> RideState {
        self.store.state()
    }

    pub fn offer(&self) -> Option<&RideOffer> {
        self.store.offer()
    }

    pub fn active_ride(&self) -> Option<&ActiveRide> {
        self.store.active_ride()
    }

    pub fn summary(&self) -> Option<&CompletedRideSummary> {
        self.store.summary()
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.store.last_error()
    }

    pub fn current_ride_id(&self) -> Option<&str> {
        self.store.current_ride_id()
    }

    pub fn tracking_context(&self) -> TrackingContext {
        self.store.tracking_context()
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.countdown.remaining()
    }

    pub fn store(&self) -> &RideStore {
        &self.store
    }

    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    fn run(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartCountdown => self.countdown.start(),
                Effect::StopCountdown => self.countdown.stop(),
                Effect::Call(call) => self.spawn(call),
                Effect::RetryReconcile => self.schedule_retry(),
                Effect::Notice(notice) => {
                    tracing::info!(notice = %notice, "notice for driver");
                    self.notices.push(notice);
                }
            }
        }
    }

    fn schedule_retry(&mut self) {
        // at most one retry is waiting at any time
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }

        tracing::info!(delay_secs = RECONCILE_RETRY_DELAY.as_secs(), "retrying active ride fetch");

        let api = self.api.clone();
        let events = self.events.clone();

        self.retry = Some(tokio::spawn(async move {
            tokio::time::sleep(RECONCILE_RETRY_DELAY).await;

            let event = RestCall::FetchActiveRide.execute(api.as_ref()).await;

            if events.send(event).await.is_err() {
                tracing::debug!("controller gone, dropping retried fetch");
            }
        }));
    }

    fn spawn(&self, call: RestCall) {
        let api = self.api.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let event = call.execute(api.as_ref()).await;

            if events.send(event).await.is_err() {
                tracing::debug!("controller gone, dropping call outcome");
            }
        });
    }
}

impl RestCall {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Accept { .. } => "accept",
            Self::Decline { .. } => "decline",
            Self::Arrive { .. } => "arrive",
            Self::VerifyOtp { .. } => "verify_otp",
            Self::Start { .. } => "start",
            Self::Complete { .. } => "complete",
            Self::Cancel { .. } => "cancel",
            Self::RateRider { .. } => "rate_rider",
            Self::FetchActiveRide => "fetch_active_ride",
        }
    }

    /// Performs the call and reports how it went as an [`Event`].
    #[tracing::instrument(skip(self, api), fields(call = self.name()))]
    pub async fn execute(self, api: &(dyn API + Send + Sync)) -> Event {
        match self {
            RestCall::Accept { ride_id } => match api.accept_ride(&ride_id).await {
                Ok(()) => {
                    let ride = refreshed(api, &ride_id).await;
                    confirmed(ride_id, Confirmation::Accepted(ride))
                }
                Err(error) => rejected(ride_id, Transition::Accept, error),
            },
            RestCall::Arrive { ride_id } => match api.arrive_at_pickup(&ride_id).await {
                Ok(()) => {
                    let ride = refreshed(api, &ride_id).await;
                    confirmed(ride_id, Confirmation::Arrived(ride))
                }
                Err(error) => rejected(ride_id, Transition::Arrive, error),
            },
            RestCall::VerifyOtp { ride_id, otp } => match api.verify_otp(&ride_id, &otp).await {
                Ok(()) => {
                    let ride = refreshed(api, &ride_id).await;
                    confirmed(ride_id, Confirmation::OtpVerified(ride))
                }
                Err(error) => rejected(ride_id, Transition::VerifyOtp, error),
            },
            RestCall::Start { ride_id } => match api.start_ride(&ride_id).await {
                Ok(()) => confirmed(ride_id, Confirmation::Started),
                Err(error) => rejected(ride_id, Transition::Start, error),
            },
            RestCall::Complete { ride_id } => match api.complete_ride(&ride_id).await {
                Ok(summary) => confirmed(ride_id, Confirmation::Completed(summary)),
                Err(error) => rejected(ride_id, Transition::Complete, error),
            },
            RestCall::Decline { ride_id } => {
                let result = api.decline_ride(&ride_id).await;
                settled("decline", ride_id, result)
            }
            RestCall::Cancel { ride_id, reason } => {
                let result = api.cancel_ride(&ride_id, reason.as_deref()).await;
                settled("cancel", ride_id, result)
            }
            RestCall::RateRider {
                ride_id,
                rating,
                comment,
            } => {
                let result = api.rate_rider(&ride_id, rating, comment.as_deref()).await;
                settled("rate_rider", ride_id, result)
            }
            RestCall::FetchActiveRide => match api.find_active_ride().await {
                Ok(ride) => Event::Reconciled(ride),
                Err(error) => Event::ReconcileFailed(error),
            },
        }
    }
}

/// Re-reads the ride after a confirmed transition. A failed read is not a
/// failed transition; the store keeps what it has.
async fn refreshed(api: &(dyn API + Send + Sync), ride_id: &str) -> Option<ActiveRide> {
    match api.find_active_ride().await {
        Ok(ride) => ride.filter(|ride| ride.id() == ride_id),
        Err(err) => {
            tracing::warn!(ride_id, "refreshing ride failed: {}", err);
            None
        }
    }
}

fn confirmed(ride_id: String, confirmation: Confirmation) -> Event {
    Event::Confirmed {
        ride_id,
        confirmation,
    }
}

fn rejected(ride_id: String, transition: Transition, error: Error) -> Event {
    Event::Rejected {
        ride_id,
        transition,
        error,
    }
}

fn settled(call: &'static str, ride_id: String, result: Result<(), Error>) -> Event {
    Event::BestEffortSettled {
        call,
        ride_id,
        result,
    }
}
