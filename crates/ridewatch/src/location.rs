//! Location sources.
//!
//! A source pushes [`Position`] samples into the channel it is subscribed
//! with, at whatever cadence the sensor delivers them. The trip owns the
//! receiving end and unsubscribes the source on every exit path.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::Position;

/// Trait for position providers.
pub trait LocationSource: Send + Sync + std::fmt::Debug {
    /// The name of this source (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Start delivering samples through `sender`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SensorUnavailable`] if the sensor cannot be used, for
    /// example because permission was denied.
    fn subscribe(&mut self, sender: mpsc::Sender<Position>) -> Result<()>;

    /// Stop delivering samples. Safe to call when not subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails to release the sensor.
    fn unsubscribe(&mut self) -> Result<()>;

    /// Check if the source is currently subscribed.
    fn is_subscribed(&self) -> bool;
}

type SharedSender = Arc<Mutex<Option<mpsc::Sender<Position>>>>;

/// A source fed by hand through a [`LocationFeed`].
///
/// Used by embedders that receive positions from elsewhere (a platform
/// callback, a websocket) and by tests.
#[derive(Debug)]
pub struct ManualLocationSource {
    sender: SharedSender,
    denied: bool,
}

/// Push side of a [`ManualLocationSource`].
#[derive(Debug, Clone)]
pub struct LocationFeed {
    sender: SharedSender,
}

impl ManualLocationSource {
    /// Create a source and the feed that drives it.
    #[must_use]
    pub fn new() -> (Self, LocationFeed) {
        let sender = Arc::new(Mutex::new(None));
        (
            Self {
                sender: Arc::clone(&sender),
                denied: false,
            },
            LocationFeed { sender },
        )
    }

    /// Create a source whose subscription always fails, as when the user
    /// refused location permission.
    #[must_use]
    pub fn denied() -> (Self, LocationFeed) {
        let (mut source, feed) = Self::new();
        source.denied = true;
        (source, feed)
    }
}

impl LocationSource for ManualLocationSource {
    fn name(&self) -> &'static str {
        "manual"
    }

    fn subscribe(&mut self, sender: mpsc::Sender<Position>) -> Result<()> {
        if self.denied {
            return Err(Error::sensor_unavailable(
                self.name(),
                "location permission denied",
            ));
        }
        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    fn is_subscribed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl LocationFeed {
    /// Deliver a sample. Returns `false` if nobody is subscribed or the
    /// trip has gone away.
    pub async fn send(&self, position: Position) -> bool {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(sender) => sender.send(position).await.is_ok(),
            None => false,
        }
    }

    /// Check if a trip is currently listening.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.is_closed())
    }
}

/// Replays a recorded track, paced by the gaps between sample timestamps.
#[derive(Debug)]
pub struct ReplaySource {
    track: Vec<Position>,
    speedup: f64,
    cancel: Option<CancellationToken>,
    finished: CancellationToken,
}

impl ReplaySource {
    /// Create a replay. `speedup` divides every gap (2.0 plays twice as fast).
    #[must_use]
    pub fn new(track: Vec<Position>, speedup: f64) -> Self {
        let speedup = if speedup.is_finite() && speedup > 0.0 {
            speedup
        } else {
            warn!(speedup, "Invalid replay speedup, using 1.0");
            1.0
        };
        Self {
            track,
            speedup,
            cancel: None,
            finished: CancellationToken::new(),
        }
    }

    /// Number of samples in the track.
    #[must_use]
    pub fn len(&self) -> usize {
        self.track.len()
    }

    /// Whether the track is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.track.is_empty()
    }

    /// Token cancelled once the last sample was delivered or the replay stopped.
    #[must_use]
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }
}

/// Wall-clock wait between two recorded samples. Saturates instead of
/// overflowing for very small speedups.
fn scaled_gap(recorded: chrono::TimeDelta, speedup: f64) -> Duration {
    let secs = recorded.to_std().unwrap_or_default().as_secs_f64() / speedup;
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

impl LocationSource for ReplaySource {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn subscribe(&mut self, sender: mpsc::Sender<Position>) -> Result<()> {
        if let Some(previous) = self.cancel.take() {
            previous.cancel();
        }
        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let track = self.track.clone();
        let speedup = self.speedup;
        let finished = self.finished.clone();
        tokio::spawn(async move {
            let mut previous: Option<&Position> = None;
            for position in &track {
                if let Some(prev) = previous {
                    let gap = scaled_gap(position.timestamp - prev.timestamp, speedup);
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(gap) => {}
                    }
                }
                if sender.send(*position).await.is_err() {
                    debug!("Replay receiver closed");
                    break;
                }
                previous = Some(position);
            }
            finished.cancel();
        });
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        Ok(())
    }

    fn is_subscribed(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| !c.is_cancelled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};

    fn track(n: i64, gap_secs: i64) -> Vec<Position> {
        let t0 = Utc::now();
        (0..n)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let lat = 52.5 + i as f64 * 0.001;
                Position::new(lat, 13.4, 5.0, t0 + TimeDelta::seconds(i * gap_secs))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_manual_source_delivers() {
        let (mut source, feed) = ManualLocationSource::new();
        assert!(!feed.is_connected());
        assert!(!feed.send(Position::new(0.0, 0.0, 1.0, Utc::now())).await);

        let (tx, mut rx) = mpsc::channel(4);
        source.subscribe(tx).unwrap();
        assert!(source.is_subscribed());
        assert!(feed.is_connected());

        assert!(feed.send(Position::new(1.0, 2.0, 3.0, Utc::now())).await);
        let got = rx.recv().await.unwrap();
        assert!((got.lat - 1.0).abs() < f64::EPSILON);

        source.unsubscribe().unwrap();
        assert!(!source.is_subscribed());
        assert!(!feed.send(Position::new(0.0, 0.0, 1.0, Utc::now())).await);
    }

    #[test]
    fn test_denied_source_fails_to_subscribe() {
        let (mut source, _feed) = ManualLocationSource::denied();
        let (tx, _rx) = mpsc::channel(1);
        let err = source.subscribe(tx).unwrap_err();
        assert!(err.is_sensor_unavailable());
        assert!(!source.is_subscribed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_paces_by_timestamps() {
        let mut source = ReplaySource::new(track(3, 10), 2.0);
        let finished = source.finished();
        let (tx, mut rx) = mpsc::channel(8);

        let start = tokio::time::Instant::now();
        source.subscribe(tx).unwrap();

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
        rx.recv().await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(10));

        finished.cancelled().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_replay_unsubscribe_stops_delivery() {
        let mut source = ReplaySource::new(track(10, 60), 1.0);
        let (tx, mut rx) = mpsc::channel(8);
        source.subscribe(tx).unwrap();
        assert!(source.is_subscribed());

        rx.recv().await.unwrap();
        source.unsubscribe().unwrap();
        assert!(!source.is_subscribed());

        // The task exits and drops its sender
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_tiny_speedup_saturates_gap() {
        let gap = scaled_gap(TimeDelta::seconds(10), 1e-20);
        assert_eq!(gap, Duration::MAX);
        assert_eq!(
            scaled_gap(TimeDelta::seconds(10), 4.0),
            Duration::from_millis(2_500)
        );
        assert_eq!(scaled_gap(TimeDelta::seconds(-5), 1.0), Duration::ZERO);
    }

    #[test]
    fn test_replay_invalid_speedup_defaults() {
        let source = ReplaySource::new(Vec::new(), 0.0);
        assert!(source.is_empty());
        assert!((source.speedup - 1.0).abs() < f64::EPSILON);
    }
}
