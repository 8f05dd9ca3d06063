//! Group separation alerts.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geo::haversine_distance;
use crate::model::{GroupMember, Position};
use crate::trip_config::GroupMode;

/// A member who is farther away than the configured separation distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityAlert {
    /// The member's id.
    pub member_id: String,
    /// The member's display name.
    pub name: String,
    /// Distance from the local position in meters.
    pub distance_meters: f64,
}

/// Recomputes the separation alert set on every tick.
#[derive(Debug, Clone)]
pub struct ProximityEvaluator {
    mode: GroupMode,
    threshold_m: f64,
    alerts: Vec<ProximityAlert>,
}

impl ProximityEvaluator {
    /// Create an evaluator.
    #[must_use]
    pub fn new(mode: GroupMode, threshold_m: f64) -> Self {
        Self {
            mode,
            threshold_m,
            alerts: Vec::new(),
        }
    }

    /// Replace the alert set from the current positions.
    ///
    /// Members without a known position are skipped. With no local position
    /// or in driver-only mode the set is empty.
    pub fn evaluate<'a>(
        &mut self,
        local: Option<&Position>,
        members: impl IntoIterator<Item = &'a GroupMember>,
    ) -> &[ProximityAlert] {
        let alerts = match (self.mode, local) {
            (GroupMode::Full, Some(local)) => members
                .into_iter()
                .filter_map(|member| {
                    let theirs = member.last_known_position.as_ref()?;
                    let distance = haversine_distance(local, theirs);
                    (distance > self.threshold_m).then(|| ProximityAlert {
                        member_id: member.id.clone(),
                        name: member.name.clone(),
                        distance_meters: distance,
                    })
                })
                .collect(),
            _ => Vec::new(),
        };

        if alerts.len() != self.alerts.len() {
            debug!(count = alerts.len(), "Proximity alert set changed size");
        }
        self.alerts = alerts;
        &self.alerts
    }

    /// Alerts from the last evaluation.
    #[must_use]
    pub fn alerts(&self) -> &[ProximityAlert] {
        &self.alerts
    }
}
