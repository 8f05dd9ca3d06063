//! Persistence of trip snapshots.
//!
//! A trip is saved when it stops and loaded when a trip with the same id
//! starts again, so the speed log, the feedback reports and the escalation
//! stage survive a process restart.

pub mod migrations;
pub mod schema;
mod sqlite;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::escalation::EscalationState;
use crate::model::{ConnectivityStatus, FeedbackReport, GroupMember, SpeedSample};
use crate::trip_config::TripConfig;

pub use sqlite::SqliteStore;

/// Everything persisted for one trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripSnapshot {
    /// Trip identifier.
    pub trip_id: String,
    /// Configuration the trip ran with.
    pub config: TripConfig,
    /// Stage and last notification time.
    pub escalation: EscalationState,
    /// Roster with last known positions.
    pub members: Vec<GroupMember>,
    /// Speed log, oldest first.
    pub speed_log: Vec<SpeedSample>,
    /// Feedback reports in submission order.
    pub feedback_reports: Vec<FeedbackReport>,
    /// Sync status at save time.
    pub connectivity: ConnectivityStatus,
    /// When the snapshot was taken.
    pub saved_at: DateTime<Utc>,
}

/// Key-value store of snapshots, keyed by trip id.
pub trait PersistenceStore: Send + Sync + std::fmt::Debug {
    /// Load the snapshot of a trip, if one was saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load(&self, trip_id: &str) -> Result<Option<TripSnapshot>>;

    /// Save a snapshot, replacing any earlier one for the same trip.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn save(&self, trip_id: &str, snapshot: &TripSnapshot) -> Result<()>;
}

/// In-process store; contents are lost with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: Mutex<HashMap<String, TripSnapshot>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trips stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PersistenceStore for MemoryStore {
    fn load(&self, trip_id: &str) -> Result<Option<TripSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(trip_id)
            .cloned())
    }

    fn save(&self, trip_id: &str, snapshot: &TripSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(trip_id.to_string(), snapshot.clone());
        Ok(())
    }
}
