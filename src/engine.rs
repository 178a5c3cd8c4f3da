use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::{
    api::DynAPI,
    chat::{ChatEntry, ChatLog},
    config::Config,
    entities::{ActiveRide, CompletedRideSummary, Coordinates, PositionFix, RideOffer},
    error::{no_ride_error, Error},
    lifecycle::{Event, RideLifecycleController, RideState},
    realtime::{
        messages::{InboundMessage, OutboundMessage, Role},
        transport::Connector,
        ChannelEvent, ChannelEventKind, RealtimeChannel,
    },
    telemetry::{LocationTelemetryPipeline, PositionSampler},
};

/// What the driver (or the console standing in for them) can ask for.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    GoOnline,
    GoOffline,
    Accept,
    Decline,
    Arrive { position: Option<Coordinates> },
    VerifyOtp(String),
    Start,
    Complete,
    Cancel { reason: Option<String> },
    Acknowledge,
    RateRider { rating: u8, comment: Option<String> },
    ClearError,
    Chat(String),
    Shutdown,
}

/// Everything a screen needs to render the driver's situation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub state: RideState,
    pub offer: Option<RideOffer>,
    pub active_ride: Option<ActiveRide>,
    pub summary: Option<CompletedRideSummary>,
    pub last_error: Option<String>,
    pub countdown_remaining: Option<u32>,
    pub buffered_samples: usize,
    pub online: bool,
    pub chat: Vec<ChatEntry>,
    pub notices: Vec<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: RideState::Idle,
            offer: None,
            active_ride: None,
            summary: None,
            last_error: None,
            countdown_remaining: None,
            buffered_samples: 0,
            online: false,
            chat: vec![],
            notices: vec![],
        }
    }
}

/// Notices kept for display; older ones are dropped.
const MAX_NOTICES: usize = 5;

/// The driver core's event loop. Every source of change is handled here, one
/// event at a time.
pub struct Engine {
    config: Config,
    api: DynAPI,
    connector: Arc<dyn Connector>,
    controller: RideLifecycleController,
    outcomes: Receiver<Event>,
    channel: RealtimeChannel,
    channel_events: Receiver<ChannelEvent>,
    pipeline: LocationTelemetryPipeline,
    sampler: PositionSampler,
    chat: ChatLog,
    notices: Vec<String>,
    last_position: Option<Coordinates>,
    online: bool,
    snapshots: watch::Sender<Snapshot>,
}

impl Engine {
    pub fn new(
        config: Config,
        api: DynAPI,
        connector: Arc<dyn Connector>,
    ) -> (Self, watch::Receiver<Snapshot>) {
        let (outcome_tx, outcomes) = async_channel::unbounded();
        let (channel_tx, channel_events) = async_channel::unbounded();
        let (snapshots, snapshot_rx) = watch::channel(Snapshot::default());

        let engine = Self {
            controller: RideLifecycleController::new(api.clone(), &config, outcome_tx),
            pipeline: LocationTelemetryPipeline::new(config.telemetry_buffer_cap),
            sampler: PositionSampler::new(
                config.location_interval,
                config.location_min_distance_meters,
            ),
            channel: RealtimeChannel::new(channel_tx),
            config,
            api,
            connector,
            outcomes,
            channel_events,
            chat: ChatLog::default(),
            notices: vec![],
            last_position: None,
            online: false,
            snapshots,
        };

        (engine, snapshot_rx)
    }

    /// Runs until `Shutdown` arrives or the command sender goes away.
    #[tracing::instrument(skip_all)]
    pub async fn run(
        mut self,
        commands: Receiver<Command>,
        positions: Receiver<PositionFix>,
    ) -> Result<(), Error> {
        let outcomes = self.outcomes.clone();
        let channel_events = self.channel_events.clone();

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.publish();

        loop {
            let before = self.controller.state();

            tokio::select! {
                command = commands.recv() => match command {
                    Ok(Command::Shutdown) | Err(_) => {
                        self.go_offline().await;
                        self.settle_step(before);
                        self.publish();
                        tracing::info!("engine stopped");
                        return Ok(());
                    }
                    Ok(command) => self.handle_command(command).await,
                },
                Ok(event) = outcomes.recv() => self.handle_outcome(event),
                Ok(event) = channel_events.recv() => self.handle_channel_event(event),
                Ok(fix) = positions.recv() => self.handle_fix(fix).await,
                _ = ticker.tick() => self.handle_tick(),
            }

            self.settle_step(before);
            self.publish();
        }
    }

    pub fn controller(&self) -> &RideLifecycleController {
        &self.controller
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    #[tracing::instrument(skip(self))]
    pub async fn go_online(&mut self) {
        if self.online {
            return;
        }

        self.online = true;

        if let Err(err) = self
            .channel
            .open(self.connector.as_ref(), &self.config.token)
            .await
        {
            tracing::warn!("realtime channel unavailable, buffering samples: {}", err);
        }

        self.announce(true);
        self.controller.reconcile();

        tracing::info!("driver online");
    }

    #[tracing::instrument(skip(self))]
    pub async fn go_offline(&mut self) {
        if !self.online {
            return;
        }

        // Stop taking fixes before anything else so nothing lands in the
        // buffer after this point.
        self.online = false;
        self.sampler.reset();
        self.last_position = None;

        self.channel.close().await;
        self.announce(false);

        tracing::info!(buffered = self.pipeline.buffered(), "driver offline");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::GoOnline => self.go_online().await,
            Command::GoOffline => self.go_offline().await,
            Command::Accept => self.ride_intent(|ride_id| Event::Accept { ride_id }),
            Command::Decline => self.ride_intent(|ride_id| Event::Decline { ride_id }),
            Command::Arrive { position } => {
                let position = position.or(self.last_position);
                self.ride_intent(|ride_id| Event::Arrive { ride_id, position })
            }
            Command::VerifyOtp(otp) => self.ride_intent(|ride_id| Event::VerifyOtp { ride_id, otp }),
            Command::Start => self.ride_intent(|ride_id| Event::Start { ride_id }),
            Command::Complete => self.ride_intent(|ride_id| Event::Complete { ride_id }),
            Command::Cancel { reason } => {
                self.ride_intent(|ride_id| Event::Cancel { ride_id, reason })
            }
            Command::Acknowledge => {
                let _ = self.controller.perform(Event::Acknowledge);
            }
            Command::RateRider { rating, comment } => self.ride_intent(|ride_id| Event::RateRider {
                ride_id,
                rating,
                comment,
            }),
            Command::ClearError => {
                self.notices.clear();
                let _ = self.controller.perform(Event::ClearError);
            }
            Command::Chat(text) => self.send_chat(text).await,
            Command::Shutdown => {}
        }
    }

    fn ride_intent(&mut self, make: impl FnOnce(String) -> Event) {
        let event = match self.controller.current_ride_id() {
            Some(ride_id) => make(ride_id.to_string()),
            None => {
                self.controller.report(no_ride_error());
                return;
            }
        };

        // refusals are kept as the last error by the controller
        let _ = self.controller.perform(event);
    }

    fn handle_outcome(&mut self, event: Event) {
        if let Err(err) = self.controller.dispatch(event) {
            tracing::warn!("call outcome not applied: {}", err);
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        if !self.channel.owns(&event) {
            tracing::debug!(generation = event.generation, "event from old connection ignored");
            return;
        }

        let message = match event.kind {
            ChannelEventKind::Message(message) => message,
            ChannelEventKind::Closed => {
                self.channel.mark_closed();
                return;
            }
        };

        match message {
            InboundMessage::NewRideAssignment(offer) => {
                if let Err(err) = self.controller.dispatch(Event::OfferReceived(offer)) {
                    tracing::warn!("offer ignored: {}", err);
                }
            }
            InboundMessage::RideCancelled { ride_id, reason } => {
                if let Err(err) = self
                    .controller
                    .dispatch(Event::RideCancelled { ride_id, reason })
                {
                    tracing::warn!("cancellation not applied: {}", err);
                }
            }
            InboundMessage::LocationBatchAck { count } => self.pipeline.acknowledge(count),
            InboundMessage::ChatMessage {
                id,
                ride_id,
                text,
                sender,
                timestamp,
            } => {
                if self.controller.current_ride_id() == Some(ride_id.as_str()) {
                    self.chat.receive(id, &ride_id, &text, &sender, timestamp);
                } else {
                    tracing::debug!(ride_id = %ride_id, "chat for another ride ignored");
                }
            }
            InboundMessage::Error { message } => {
                tracing::warn!("backend reported an error: {}", message);
            }
            InboundMessage::Unknown => tracing::debug!("unknown realtime message ignored"),
        }
    }

    async fn handle_fix(&mut self, fix: PositionFix) {
        if !self.online {
            return;
        }

        self.last_position = Some(fix.coordinates());

        if !self.sampler.admit(&fix) {
            return;
        }

        let context = self.controller.tracking_context();

        self.pipeline.record(fix, context, &mut self.channel).await;
    }

    fn handle_tick(&mut self) {
        if let Err(err) = self.controller.tick() {
            tracing::warn!("countdown expiry not applied: {}", err);
        }
    }

    async fn send_chat(&mut self, text: String) {
        let ride_id = match self.controller.state() {
            RideState::NavigatingToPickup
            | RideState::ArrivedAtPickup
            | RideState::TripInProgress => self.controller.current_ride_id().map(String::from),
            _ => None,
        };

        let ride_id = match ride_id {
            Some(ride_id) => ride_id,
            None => {
                self.controller.report(no_ride_error());
                return;
            }
        };

        let id = self.chat.compose(&ride_id, &text);
        let message = OutboundMessage::ChatMessage {
            ride_id,
            text,
            sender: Role::Driver,
        };

        match self.channel.send(&message).await {
            Ok(()) => self.chat.confirm(id),
            Err(err) => {
                tracing::warn!("chat message not sent: {}", err);
                self.chat.fail(id);
            }
        }
    }

    /// Best-effort online flag on the driver profile.
    fn announce(&self, is_online: bool) {
        let driver_id = match self.config.driver_id.clone() {
            Some(driver_id) => driver_id,
            None => return,
        };
        let api = self.api.clone();

        tokio::spawn(async move {
            if let Err(err) = api.update_online_status(&driver_id, is_online).await {
                tracing::warn!(is_online, "online status update failed: {}", err);
            }
        });
    }

    /// Bookkeeping after one event: the chat belongs to the ride, so it goes
    /// when the ride does, and new notices join the bounded list.
    fn settle_step(&mut self, before: RideState) {
        let after = self.controller.state();

        if after != before {
            tracing::debug!(from = before.name(), to = after.name(), "ride state changed");

            if after == RideState::Idle {
                self.chat.clear();
            }
        }

        retain_recent(&mut self.notices, self.controller.take_notices(), MAX_NOTICES);
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.controller.state(),
            offer: self.controller.offer().cloned(),
            active_ride: self.controller.active_ride().cloned(),
            summary: self.controller.summary().cloned(),
            last_error: self.controller.last_error().map(|err| err.message.clone()),
            countdown_remaining: self.controller.countdown_remaining(),
            buffered_samples: self.pipeline.buffered(),
            online: self.online,
            chat: self.chat.entries().to_vec(),
            notices: self.notices.clone(),
        }
    }

    fn publish(&self) {
        let snapshot = self.snapshot();

        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

fn retain_recent(kept: &mut Vec<String>, new: Vec<String>, cap: usize) {
    kept.extend(new);

    if kept.len() > cap {
        let excess = kept.len() - cap;
        kept.drain(..excess);
    }
}

#[test]
fn only_the_most_recent_notices_are_kept() {
    let mut notices = vec!["first".to_string()];

    retain_recent(&mut notices, vec![], 3);
    assert_eq!(notices, vec!["first"]);

    let incoming = (1..=4).map(|n| format!("cancelled {}", n)).collect();
    retain_recent(&mut notices, incoming, 3);

    assert_eq!(notices, vec!["cancelled 2", "cancelled 3", "cancelled 4"]);
}
