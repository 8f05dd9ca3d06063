//! Detection of significant movement.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::geo::haversine_distance;
use crate::model::Position;

/// Displacement in meters below which a change is treated as sensor noise.
pub const MOVEMENT_THRESHOLD_M: f64 = 15.0;

/// Tracks when the traveller last moved more than the noise threshold.
#[derive(Debug, Clone)]
pub struct MovementTracker {
    previous: Option<Position>,
    last_movement_at: DateTime<Utc>,
}

impl MovementTracker {
    /// Create a tracker; the trip start counts as the last movement.
    #[must_use]
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            previous: None,
            last_movement_at: started_at,
        }
    }

    /// Feed a sample. Returns the displacement if it counted as movement.
    ///
    /// The first sample only seeds the tracker.
    pub fn on_position(&mut self, position: &Position, now: DateTime<Utc>) -> Option<f64> {
        let previous = self.previous.replace(*position)?;

        let distance = haversine_distance(&previous, position);
        if distance > MOVEMENT_THRESHOLD_M {
            trace!(distance_m = distance, "Significant movement");
            self.last_movement_at = now;
            Some(distance)
        } else {
            None
        }
    }

    /// When significant movement was last seen.
    #[must_use]
    pub fn last_movement_at(&self) -> DateTime<Utc> {
        self.last_movement_at
    }

    /// The most recent sample.
    #[must_use]
    pub fn current(&self) -> Option<&Position> {
        self.previous.as_ref()
    }
}
