//! Per-trip configuration supplied by the surrounding application.
//!
//! A [`TripConfig`] is created once when a trip starts and never changes for
//! the lifetime of the trip. Malformed values do not fail the trip; they are
//! replaced with documented defaults by [`TripConfig::normalized`].

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Channel, EmergencyContact, GroupMember};

/// Default minutes without movement before the first reminder.
pub const DEFAULT_STOP_THRESHOLD_MINUTES: f64 = 10.0;

/// Longest accepted stop threshold (one week). Larger values are replaced
/// with the default.
pub const MAX_STOP_THRESHOLD_MINUTES: f64 = 7.0 * 24.0 * 60.0;

/// Default separation distance before a proximity alert.
pub const DEFAULT_PROXIMITY_THRESHOLD_METERS: f64 = 100.0;

/// Default feedback ratio threshold.
pub const DEFAULT_FEEDBACK_RATIO_THRESHOLD: f64 = 0.5;

/// Default p2p sync interval in seconds.
pub const DEFAULT_P2P_INTERVAL_SECS: u64 = 10;

/// Default internet sync interval in seconds.
pub const DEFAULT_INTERNET_INTERVAL_SECS: u64 = 30;

/// The traveller's role in the ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person driving.
    Driver,
    /// A passenger.
    #[default]
    Passenger,
}

/// How much of the local state is shared with peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareLevel {
    /// Share reports only, never the local position.
    Minimum,
    /// Share the local position.
    #[default]
    Standard,
    /// Share the local position and the latest speed sample.
    Full,
}

/// Which group members take part in proximity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupMode {
    /// Only the driver is tracked; proximity alerts are disabled.
    #[default]
    DriverOnly,
    /// Every member is tracked.
    Full,
}

/// Sync channel selection and cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectivityConfig {
    /// The channel the transport starts on.
    pub preferred: Channel,
    /// Seconds between p2p sync attempts.
    #[serde(rename = "p2pIntervalSec")]
    pub p2p_interval_secs: u64,
    /// Seconds between internet sync attempts.
    #[serde(rename = "internetIntervalSec")]
    pub internet_interval_secs: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            preferred: Channel::Internet,
            p2p_interval_secs: DEFAULT_P2P_INTERVAL_SECS,
            internet_interval_secs: DEFAULT_INTERNET_INTERVAL_SECS,
        }
    }
}

impl ConnectivityConfig {
    /// Sync interval for the given channel.
    #[must_use]
    pub fn interval(&self, channel: Channel) -> std::time::Duration {
        let secs = match channel {
            Channel::P2p => self.p2p_interval_secs,
            Channel::Internet => self.internet_interval_secs,
        };
        std::time::Duration::from_secs(secs)
    }
}

/// Speed log settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeedLogConfig {
    /// Append computed samples to the bounded speed log.
    pub save_log: bool,
    /// Seconds between aggregated samples. Zero disables the flush ticker.
    #[serde(rename = "speedIntervalSec")]
    pub interval_secs: u64,
}

/// Configuration for one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TripConfig {
    /// The traveller's role.
    pub role: Role,
    /// What to share with peers.
    pub share_level: ShareLevel,
    /// Who takes part in proximity checks.
    pub group_mode: GroupMode,
    /// Minutes without movement before the first reminder.
    pub stop_threshold_minutes: f64,
    /// Separation distance that raises a proximity alert.
    pub proximity_threshold_meters: f64,
    /// Feedback ratio threshold; escalation levels are derived from it.
    pub feedback_ratio_threshold: f64,
    /// Occupied seats in the ride, driver included. Denominator of the feedback ratio.
    pub group_size: u32,
    /// Who to alert on escalation.
    pub contacts: Vec<EmergencyContact>,
    /// Initial roster of other participants.
    pub members: Vec<GroupMember>,
    /// Sync channel configuration.
    pub connectivity: ConnectivityConfig,
    /// Speed log configuration.
    pub speed: SpeedLogConfig,
}

impl Default for TripConfig {
    fn default() -> Self {
        Self {
            role: Role::default(),
            share_level: ShareLevel::default(),
            group_mode: GroupMode::default(),
            stop_threshold_minutes: DEFAULT_STOP_THRESHOLD_MINUTES,
            proximity_threshold_meters: DEFAULT_PROXIMITY_THRESHOLD_METERS,
            feedback_ratio_threshold: DEFAULT_FEEDBACK_RATIO_THRESHOLD,
            group_size: 1,
            contacts: Vec::new(),
            members: Vec::new(),
            connectivity: ConnectivityConfig::default(),
            speed: SpeedLogConfig::default(),
        }
    }
}

/// `true` if the value is usable as a positive threshold.
fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

impl TripConfig {
    /// Replace every invalid value with its default.
    ///
    /// Each replacement is logged at `warn`. Never fails.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if !is_positive(self.stop_threshold_minutes)
            || self.stop_threshold_minutes > MAX_STOP_THRESHOLD_MINUTES
        {
            warn!(
                value = self.stop_threshold_minutes,
                default = DEFAULT_STOP_THRESHOLD_MINUTES,
                "Invalid stopThresholdMinutes, using default"
            );
            self.stop_threshold_minutes = DEFAULT_STOP_THRESHOLD_MINUTES;
        }

        if !is_positive(self.proximity_threshold_meters) {
            warn!(
                value = self.proximity_threshold_meters,
                default = DEFAULT_PROXIMITY_THRESHOLD_METERS,
                "Invalid proximityThresholdMeters, using default"
            );
            self.proximity_threshold_meters = DEFAULT_PROXIMITY_THRESHOLD_METERS;
        }

        if !is_positive(self.feedback_ratio_threshold) {
            warn!(
                value = self.feedback_ratio_threshold,
                default = DEFAULT_FEEDBACK_RATIO_THRESHOLD,
                "Invalid feedbackRatioThreshold, using default"
            );
            self.feedback_ratio_threshold = DEFAULT_FEEDBACK_RATIO_THRESHOLD;
        }

        if self.group_size == 0 {
            warn!("groupSize of 0, using 1");
            self.group_size = 1;
        }

        if self.connectivity.p2p_interval_secs == 0 {
            warn!(
                default = DEFAULT_P2P_INTERVAL_SECS,
                "Invalid p2pIntervalSec, using default"
            );
            self.connectivity.p2p_interval_secs = DEFAULT_P2P_INTERVAL_SECS;
        }

        if self.connectivity.internet_interval_secs == 0 {
            warn!(
                default = DEFAULT_INTERNET_INTERVAL_SECS,
                "Invalid internetIntervalSec, using default"
            );
            self.connectivity.internet_interval_secs = DEFAULT_INTERNET_INTERVAL_SECS;
        }

        self
    }

    /// The stop threshold as a time delta, rounded to whole seconds.
    ///
    /// Values outside the representable range fall back to the default.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn stop_threshold(&self) -> chrono::TimeDelta {
        let fallback = (DEFAULT_STOP_THRESHOLD_MINUTES * 60.0) as i64;
        let secs = (self.stop_threshold_minutes * 60.0).round();
        let secs = if secs.is_finite() && secs.abs() < i64::MAX as f64 {
            secs as i64
        } else {
            fallback
        };
        chrono::TimeDelta::try_seconds(secs)
            .or_else(|| chrono::TimeDelta::try_seconds(fallback))
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}
