pub mod memory;
pub mod messages;
pub mod transport;

use async_channel::Sender;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::error::{channel_error, Error};
use messages::{InboundMessage, OutboundMessage, Role};
use transport::{Connection, Connector, InboundStream, Outbound};

#[derive(Clone, Debug, PartialEq)]
pub enum ChannelEventKind {
    Message(InboundMessage),
    Closed,
}

/// Something that happened on a particular connection. `generation` identifies
/// the connection so that events from a superseded one can be ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelEvent {
    pub generation: u64,
    pub kind: ChannelEventKind,
}

/// Authenticated duplex channel to the backend. Inbound traffic is forwarded as
/// [`ChannelEvent`]s; outbound traffic goes through [`RealtimeChannel::send`].
pub struct RealtimeChannel {
    outbound: Option<Box<dyn Outbound>>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
    events: Sender<ChannelEvent>,
}

impl RealtimeChannel {
    pub fn new(events: Sender<ChannelEvent>) -> Self {
        Self {
            outbound: None,
            reader: None,
            generation: 0,
            events,
        }
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True when the event belongs to the current connection.
    pub fn owns(&self, event: &ChannelEvent) -> bool {
        event.generation == self.generation
    }

    #[tracing::instrument(skip_all)]
    pub async fn open(&mut self, connector: &dyn Connector, token: &str) -> Result<(), Error> {
        self.close().await;

        let Connection {
            mut outbound,
            inbound,
        } = connector.connect().await?;

        let auth = serde_json::to_string(&OutboundMessage::Auth {
            token: token.into(),
            role: Role::Driver,
        })?;
        outbound.send_text(auth).await?;

        self.generation += 1;
        self.outbound = Some(outbound);
        self.reader = Some(tokio::spawn(forward_inbound(
            self.generation,
            inbound,
            self.events.clone(),
        )));

        tracing::info!(generation = self.generation, "realtime channel open");

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(message = message.name()))]
    pub async fn send(&mut self, message: &OutboundMessage) -> Result<(), Error> {
        let outbound = self
            .outbound
            .as_mut()
            .ok_or_else(|| channel_error("channel is not open"))?;

        let text = serde_json::to_string(message)?;

        if let Err(err) = outbound.send_text(text).await {
            tracing::warn!("send failed, marking realtime channel closed");
            self.mark_closed();
            return Err(err);
        }

        Ok(())
    }

    /// Records that the transport went away without trying to talk to it.
    pub fn mark_closed(&mut self) {
        if self.outbound.take().is_some() {
            tracing::warn!(generation = self.generation, "realtime channel closed");
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut outbound) = self.outbound.take() {
            if let Err(err) = outbound.close().await {
                tracing::debug!("closing realtime channel: {}", err);
            }
            tracing::info!(generation = self.generation, "realtime channel closed by client");
        }

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

async fn forward_inbound(generation: u64, mut inbound: InboundStream, events: Sender<ChannelEvent>) {
    while let Some(item) = inbound.next().await {
        let text = match item {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("realtime channel read failed: {}", err);
                break;
            }
        };

        match serde_json::from_str::<InboundMessage>(&text) {
            Ok(message) => {
                let event = ChannelEvent {
                    generation,
                    kind: ChannelEventKind::Message(message),
                };

                if events.send(event).await.is_err() {
                    return;
                }
            }
            Err(err) => tracing::warn!("dropping unreadable realtime message: {}", err),
        }
    }

    let _ = events
        .send(ChannelEvent {
            generation,
            kind: ChannelEventKind::Closed,
        })
        .await;
}

#[test]
fn authenticates_first_then_forwards_messages() {
    use crate::entities::RideOffer;
    use tokio_test::block_on;

    block_on(async {
        let (connector, incoming) = memory::pair();
        let (tx, rx) = async_channel::unbounded();
        let mut channel = RealtimeChannel::new(tx);

        channel.open(&connector, "session-token").await.unwrap();
        let server = incoming.recv().await.unwrap();

        assert_eq!(
            server.recv().await.unwrap(),
            OutboundMessage::Auth {
                token: "session-token".into(),
                role: Role::Driver
            }
        );

        server
            .push_raw(r#"{"type":"ride_cancelled","ride_id":"R1"}"#.into())
            .await
            .unwrap();
        server.push_raw("not json".into()).await.unwrap();
        server
            .push(&InboundMessage::NewRideAssignment(RideOffer {
                ride_id: "R2".into(),
                pickup_address: "A".into(),
                dropoff_address: "B".into(),
                pickup_lat: None,
                pickup_lng: None,
                dropoff_lat: None,
                dropoff_lng: None,
                fare: 10.0,
                distance_km: None,
                duration_minutes: None,
                rider_name: None,
                rider_rating: None,
            }))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.generation, 1);
        assert!(matches!(
            first.kind,
            ChannelEventKind::Message(InboundMessage::RideCancelled { .. })
        ));

        let second = rx.recv().await.unwrap();
        assert!(matches!(
            second.kind,
            ChannelEventKind::Message(InboundMessage::NewRideAssignment(_))
        ));

        server.hang_up();
        let closed = rx.recv().await.unwrap();
        assert_eq!(closed.kind, ChannelEventKind::Closed);
        assert!(channel.owns(&closed));
    });
}

#[test]
fn send_failure_marks_channel_closed() {
    use tokio_test::block_on;

    block_on(async {
        let (connector, incoming) = memory::pair();
        let (tx, _rx) = async_channel::unbounded();
        let mut channel = RealtimeChannel::new(tx);

        channel.open(&connector, "t").await.unwrap();
        incoming.recv().await.unwrap().hang_up();

        let result = channel
            .send(&OutboundMessage::LocationBatch { points: vec![] })
            .await;

        assert!(result.unwrap_err().is_channel_error());
        assert!(!channel.is_open());
    });
}

#[test]
fn reopening_bumps_generation() {
    use tokio_test::block_on;

    block_on(async {
        let (connector, incoming) = memory::pair();
        let (tx, _rx) = async_channel::unbounded();
        let mut channel = RealtimeChannel::new(tx);

        channel.open(&connector, "t").await.unwrap();
        let stale = ChannelEvent {
            generation: channel.generation(),
            kind: ChannelEventKind::Closed,
        };
        channel.open(&connector, "t").await.unwrap();

        assert_eq!(channel.generation(), 2);
        assert!(!channel.owns(&stale));
        assert_eq!(incoming.len(), 2);
    });
}
