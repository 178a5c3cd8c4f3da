use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::entities::{Coordinates, LocationSample, PositionFix, TrackingContext};
use crate::geofence::distance_between;
use crate::realtime::messages::{DriverLocation, OutboundMessage};
use crate::realtime::RealtimeChannel;

/// About forty minutes of samples at a five second cadence.
pub const DEFAULT_BUFFER_CAP: usize = 500;

/// FIFO of samples waiting for the channel to come back. Once the cap is
/// exceeded the oldest samples are dropped.
#[derive(Clone, Debug)]
pub struct TelemetryBuffer {
    samples: VecDeque<LocationSample>,
    cap: usize,
    dropped: u64,
}

impl TelemetryBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            cap,
            dropped: 0,
        }
    }

    pub fn push(&mut self, sample: LocationSample) {
        self.samples.push_back(sample);
        self.enforce_cap();
    }

    /// Empties the buffer, oldest sample first.
    pub fn drain(&mut self) -> Vec<LocationSample> {
        self.samples.drain(..).collect()
    }

    /// Puts a batch that could not be delivered back in front of anything
    /// buffered since.
    pub fn restore_front(&mut self, batch: Vec<LocationSample>) {
        for sample in batch.into_iter().rev() {
            self.samples.push_front(sample);
        }

        self.enforce_cap();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationSample> {
        self.samples.iter()
    }

    fn enforce_cap(&mut self) {
        while self.samples.len() > self.cap {
            self.samples.pop_front();
            self.dropped += 1;
        }
    }
}

impl Default for TelemetryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAP)
    }
}

/// Throttles raw fixes: one is let through when the interval has elapsed or
/// the device moved far enough since the last admitted fix.
#[derive(Clone, Debug)]
pub struct PositionSampler {
    interval: Duration,
    min_distance_meters: f64,
    last: Option<(Coordinates, DateTime<Utc>)>,
}

impl PositionSampler {
    pub fn new(interval: Duration, min_distance_meters: f64) -> Self {
        Self {
            interval,
            min_distance_meters,
            last: None,
        }
    }

    pub fn admit(&mut self, fix: &PositionFix) -> bool {
        let position = fix.coordinates();

        let admitted = match self.last {
            None => true,
            Some((last_position, last_time)) => {
                let elapsed = (fix.timestamp - last_time).to_std().unwrap_or_default();
                let moved = distance_between(last_position.into(), position.into());

                elapsed >= self.interval || moved >= self.min_distance_meters
            }
        };

        if admitted {
            self.last = Some((position, fix.timestamp));
        }

        admitted
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// The live sample went out, preceded by a batch of `flushed` samples.
    Sent { flushed: usize },
    Buffered,
}

/// Turns position fixes into tagged samples and delivers them, buffering
/// whatever the channel cannot take right now.
#[derive(Debug, Default)]
pub struct LocationTelemetryPipeline {
    buffer: TelemetryBuffer,
    acknowledged: u64,
}

impl LocationTelemetryPipeline {
    pub fn new(buffer_cap: usize) -> Self {
        Self {
            buffer: TelemetryBuffer::new(buffer_cap),
            acknowledged: 0,
        }
    }

    #[tracing::instrument(skip_all, fields(phase = context.phase.name()))]
    pub async fn record(
        &mut self,
        fix: PositionFix,
        context: TrackingContext,
        channel: &mut RealtimeChannel,
    ) -> Delivery {
        let sample = LocationSample::capture(fix, context);

        if !channel.is_open() {
            self.buffer.push(sample);
            tracing::debug!(buffered = self.buffer.len(), "channel closed, sample buffered");
            return Delivery::Buffered;
        }

        let points = self.buffer.drain();
        let flushed = points.len();

        if !points.is_empty() {
            let batch = OutboundMessage::LocationBatch { points };

            if channel.send(&batch).await.is_err() {
                if let OutboundMessage::LocationBatch { points } = batch {
                    self.buffer.restore_front(points);
                }
                self.buffer.push(sample);
                return Delivery::Buffered;
            }

            tracing::info!(count = flushed, "flushed buffered samples");
        }

        let live = OutboundMessage::DriverLocation(DriverLocation::from(&sample));

        if channel.send(&live).await.is_err() {
            self.buffer.push(sample);
            return Delivery::Buffered;
        }

        tracing::debug!(lat = sample.lat, lng = sample.lng, "sample sent");

        Delivery::Sent { flushed }
    }

    pub fn acknowledge(&mut self, count: usize) {
        self.acknowledged += count as u64;
        tracing::debug!(count, total = self.acknowledged, "location batch acknowledged");
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn acknowledged(&self) -> u64 {
        self.acknowledged
    }

    pub fn buffer(&self) -> &TelemetryBuffer {
        &self.buffer
    }
}

#[cfg(test)]
fn sample_at(index: usize) -> LocationSample {
    LocationSample::capture(
        PositionFix::new(52.0 + index as f64 * 1e-5, -106.6),
        TrackingContext::idle(),
    )
}

#[test]
fn buffer_keeps_most_recent_samples_in_order() {
    let mut buffer = TelemetryBuffer::new(500);

    for i in 0..600 {
        buffer.push(sample_at(i));
    }

    let kept = buffer.drain();

    assert_eq!(kept.len(), 500);
    assert_eq!(buffer.dropped(), 100);
    assert_eq!(kept[0].lat, sample_at(100).lat);
    assert!(kept.windows(2).all(|pair| pair[0].lat < pair[1].lat));
    assert!(buffer.is_empty());
}

#[test]
fn restored_batch_goes_before_newer_samples() {
    let mut buffer = TelemetryBuffer::new(3);
    buffer.push(sample_at(2));
    buffer.restore_front(vec![sample_at(0), sample_at(1)]);
    buffer.push(sample_at(3));

    let lats: Vec<f64> = buffer.iter().map(|s| s.lat).collect();

    assert_eq!(lats, vec![sample_at(1).lat, sample_at(2).lat, sample_at(3).lat]);
}

#[test]
fn sampler_admits_by_time_or_distance() {
    let mut sampler = PositionSampler::new(Duration::from_secs(5), 10.0);
    let start = Utc::now();

    let mut fix = PositionFix::new(52.1332, -106.67);
    fix.timestamp = start;
    assert!(sampler.admit(&fix));

    fix.timestamp = start + chrono::Duration::seconds(2);
    assert!(!sampler.admit(&fix));

    // about 22 m north
    let mut moved = PositionFix::new(52.1334, -106.67);
    moved.timestamp = start + chrono::Duration::seconds(3);
    assert!(sampler.admit(&moved));

    moved.timestamp = start + chrono::Duration::seconds(8);
    assert!(sampler.admit(&moved));

    sampler.reset();
    assert!(sampler.admit(&moved));
}

#[test]
fn closed_channel_buffers_samples() {
    use tokio_test::block_on;

    let (tx, _rx) = async_channel::unbounded();
    let mut channel = RealtimeChannel::new(tx);
    let mut pipeline = LocationTelemetryPipeline::new(DEFAULT_BUFFER_CAP);

    let delivery = block_on(pipeline.record(
        PositionFix::new(52.1, -106.6),
        TrackingContext::idle(),
        &mut channel,
    ));

    assert_eq!(delivery, Delivery::Buffered);
    assert_eq!(pipeline.buffered(), 1);
}

#[test]
fn reopened_channel_flushes_batch_before_live_sample() {
    use crate::entities::TrackingPhase;
    use crate::realtime::memory;
    use tokio_test::block_on;

    block_on(async {
        let (connector, incoming) = memory::pair();
        let (tx, _rx) = async_channel::unbounded();
        let mut channel = RealtimeChannel::new(tx);
        let mut pipeline = LocationTelemetryPipeline::default();

        for i in 0..3 {
            let fix = PositionFix::new(52.0 + i as f64, -106.6);
            pipeline.record(fix, TrackingContext::idle(), &mut channel).await;
        }

        channel.open(&connector, "t").await.unwrap();
        let server = incoming.recv().await.unwrap();

        let context = TrackingContext {
            phase: TrackingPhase::NavigatingToPickup,
            ride_id: Some("R1".into()),
        };
        let delivery = pipeline
            .record(PositionFix::new(55.0, -106.6), context, &mut channel)
            .await;

        assert_eq!(delivery, Delivery::Sent { flushed: 3 });
        assert_eq!(pipeline.buffered(), 0);

        let sent = server.drain();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].name(), "auth");

        match &sent[1] {
            OutboundMessage::LocationBatch { points } => {
                let lats: Vec<f64> = points.iter().map(|p| p.lat).collect();
                assert_eq!(lats, vec![52.0, 53.0, 54.0]);
            }
            other => panic!("expected a batch, got {:?}", other),
        }

        match &sent[2] {
            OutboundMessage::DriverLocation(location) => {
                assert_eq!(location.lat, 55.0);
                assert_eq!(location.ride_id.as_deref(), Some("R1"));
                assert_eq!(location.tracking_phase, TrackingPhase::NavigatingToPickup);
            }
            other => panic!("expected a live location, got {:?}", other),
        }
    });
}

#[test]
fn failed_flush_keeps_samples_in_order() {
    use crate::realtime::memory;
    use tokio_test::block_on;

    block_on(async {
        let (connector, incoming) = memory::pair();
        let (tx, _rx) = async_channel::unbounded();
        let mut channel = RealtimeChannel::new(tx);
        let mut pipeline = LocationTelemetryPipeline::default();

        for i in 0..2 {
            let fix = PositionFix::new(52.0 + i as f64, -106.6);
            pipeline.record(fix, TrackingContext::idle(), &mut channel).await;
        }

        channel.open(&connector, "t").await.unwrap();
        incoming.recv().await.unwrap().hang_up();

        let delivery = pipeline
            .record(PositionFix::new(60.0, -106.6), TrackingContext::idle(), &mut channel)
            .await;

        assert_eq!(delivery, Delivery::Buffered);
        assert!(!channel.is_open());

        let lats: Vec<f64> = pipeline.buffer().iter().map(|s| s.lat).collect();
        assert_eq!(lats, vec![52.0, 53.0, 60.0]);
    });
}
