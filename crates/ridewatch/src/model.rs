//! Core data types for a monitored trip.
//!
//! These types cross the boundary to the surrounding web application (sync
//! payloads, snapshots, notifications), so they serialize with camelCase
//! field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single location sample delivered by a location source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
    /// Reported horizontal accuracy in meters.
    pub accuracy_meters: f64,
    /// When the sensor took the sample.
    pub timestamp: DateTime<Utc>,
}

impl Position {
    /// Create a new position sample.
    #[must_use]
    pub fn new(lat: f64, lng: f64, accuracy_meters: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            lat,
            lng,
            accuracy_meters,
            timestamp,
        }
    }
}

/// Someone to alert when a trip escalates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContact {
    /// Display name.
    pub name: String,
    /// Phone number used by the alerting layer.
    pub phone: String,
    /// Relationship to the traveller (e.g. "sibling").
    pub role: String,
}

/// Another participant of the shared ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    /// Stable member identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Last position received through sync, if any.
    #[serde(default)]
    pub last_known_position: Option<Position>,
}

impl GroupMember {
    /// Create a member with no known position.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            last_known_position: None,
        }
    }

    /// Merge a position received from a peer.
    ///
    /// Last write wins by sample timestamp: an older sample never replaces a
    /// newer one. Returns `true` if the stored position changed.
    pub fn merge_position(&mut self, incoming: Position) -> bool {
        match self.last_known_position {
            Some(current) if current.timestamp >= incoming.timestamp => false,
            _ => {
                self.last_known_position = Some(incoming);
                true
            }
        }
    }
}

/// A speed measurement derived from consecutive positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedSample {
    /// Timestamp of the later of the two positions.
    pub timestamp: DateTime<Utc>,
    /// The later of the two positions.
    pub position: Position,
    /// Speed in km/h, rounded to one decimal.
    pub speed_kmh: f64,
    /// Whether this sample was produced by the interval flush.
    pub aggregated: bool,
}

/// An anonymous incident report submitted during a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackReport {
    /// Timestamp-derived identifier, unique within the trip.
    pub id: String,
    /// Free-form reason given by the reporter.
    pub reason: String,
    /// When the report was submitted.
    pub timestamp: DateTime<Utc>,
}

/// A sync channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Short-range local peer exchange.
    P2p,
    /// Networked sync endpoint.
    Internet,
}

impl Channel {
    /// The other channel, used for explicit fallback.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::P2p => Self::Internet,
            Self::Internet => Self::P2p,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P2p => write!(f, "p2p"),
            Self::Internet => write!(f, "internet"),
        }
    }
}

/// Connectivity of the sync transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityStatus {
    /// Transport not started.
    #[default]
    Idle,
    /// Transport started, no attempt has completed yet.
    Connecting,
    /// The last attempt succeeded.
    Connected,
    /// The last attempt failed.
    Error,
}

impl std::fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}
