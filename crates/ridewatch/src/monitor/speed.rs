//! Speed derivation and the bounded speed log.

use std::collections::VecDeque;

use crate::geo::haversine_distance;
use crate::model::{Position, SpeedSample};

/// Maximum number of samples kept in the speed log.
pub const SPEED_LOG_CAPACITY: usize = 200;

/// Speed in km/h between two positions, rounded to one decimal.
///
/// Returns `None` when the later sample is not strictly after the earlier one.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn speed_kmh(from: &Position, to: &Position) -> Option<f64> {
    let dt_ms = (to.timestamp - from.timestamp).num_milliseconds();
    if dt_ms <= 0 {
        return None;
    }

    let meters_per_sec = haversine_distance(from, to) / (dt_ms as f64 / 1000.0);
    Some((meters_per_sec * 3.6 * 10.0).round() / 10.0)
}

/// Ring buffer of speed samples; the oldest sample is evicted first.
#[derive(Debug, Clone)]
pub struct SpeedLog {
    samples: VecDeque<SpeedSample>,
    capacity: usize,
}

impl SpeedLog {
    /// Create an empty log with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(SPEED_LOG_CAPACITY)
    }

    /// Create an empty log holding at most `capacity` samples.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest if full.
    pub fn push(&mut self, sample: SpeedSample) {
        if self.capacity == 0 {
            return;
        }
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Number of samples held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample.
    #[must_use]
    pub fn latest(&self) -> Option<&SpeedSample> {
        self.samples.back()
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &SpeedSample> {
        self.samples.iter()
    }

    /// Copy out the samples, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<SpeedSample> {
        self.samples.iter().copied().collect()
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for SpeedLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Derives speed samples from the position stream.
///
/// Instantaneous samples come from consecutive positions. The interval flush
/// produces one aggregated sample covering everything since the last flush.
#[derive(Debug, Clone)]
pub struct SpeedSampler {
    previous: Option<Position>,
    flush_anchor: Option<Position>,
    save_log: bool,
    latest: Option<SpeedSample>,
    log: SpeedLog,
}

impl SpeedSampler {
    /// Create a sampler. Samples are only logged when `save_log` is set.
    #[must_use]
    pub fn new(save_log: bool) -> Self {
        Self {
            previous: None,
            flush_anchor: None,
            save_log,
            latest: None,
            log: SpeedLog::new(),
        }
    }

    /// Feed a sample; returns the instantaneous speed sample, if any.
    pub fn on_position(&mut self, position: &Position) -> Option<SpeedSample> {
        if self.flush_anchor.is_none() {
            self.flush_anchor = Some(*position);
        }

        let previous = self.previous.replace(*position)?;
        let speed = speed_kmh(&previous, position)?;
        Some(self.record(position, speed, false))
    }

    /// Produce an aggregated sample covering the span since the last flush.
    pub fn flush(&mut self) -> Option<SpeedSample> {
        let current = self.previous?;
        let anchor = self.flush_anchor.replace(current)?;
        let speed = speed_kmh(&anchor, &current)?;
        Some(self.record(&current, speed, true))
    }

    fn record(&mut self, position: &Position, speed_kmh: f64, aggregated: bool) -> SpeedSample {
        let sample = SpeedSample {
            timestamp: position.timestamp,
            position: *position,
            speed_kmh,
            aggregated,
        };
        self.latest = Some(sample);
        if self.save_log {
            self.log.push(sample);
        }
        sample
    }

    /// The most recently computed sample, logged or not.
    #[must_use]
    pub fn latest(&self) -> Option<&SpeedSample> {
        self.latest.as_ref()
    }

    /// The bounded log.
    #[must_use]
    pub fn log(&self) -> &SpeedLog {
        &self.log
    }

    /// Replace the log contents, e.g. when resuming a persisted trip.
    pub fn restore_log(&mut self, samples: impl IntoIterator<Item = SpeedSample>) {
        self.log.clear();
        for sample in samples {
            self.log.push(sample);
        }
    }

    /// Empty the log.
    pub fn clear_log(&mut self) {
        self.log.clear();
    }
}
