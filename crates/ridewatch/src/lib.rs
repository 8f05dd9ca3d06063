//! `ridewatch` - safety monitoring for shared rides
//!
//! A trip is watched by a set of cooperating evaluators: inactivity reminders
//! that escalate to emergency contacts, separation alerts for the group,
//! speed logging, and anonymous incident feedback. State is exchanged with
//! the other participants over a peer-to-peer or an internet channel.
//!
//! Everything for one trip hangs off a [`TripController`]:
//!
//! ```no_run
//! use ridewatch::{ManualLocationSource, TripConfig, TripController};
//!
//! # async fn run() -> ridewatch::Result<()> {
//! let mut trip = TripController::builder(TripConfig::default()).build()?;
//! let mut events = trip.subscribe();
//! let (source, feed) = ManualLocationSource::new();
//! trip.start(source).await?;
//! // feed.send(position).await; events.recv().await; ...
//! trip.stop().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod contacts;
pub mod controller;
pub mod error;
pub mod escalation;
pub mod events;
pub mod geo;
pub mod location;
pub mod logging;
pub mod model;
pub mod monitor;
pub mod state;
pub mod storage;
pub mod sync;
pub mod trip_config;

pub use config::Config;
pub use controller::{Lifecycle, TripController, TripControllerBuilder, TripStatus};
pub use error::{Error, Result};
pub use escalation::{EscalationState, Stage};
pub use events::{BroadcastSink, Notification, NotificationSink, TracingSink};
pub use location::{LocationFeed, LocationSource, ManualLocationSource, ReplaySource};
pub use logging::init_logging;
pub use model::{
    Channel, ConnectivityStatus, EmergencyContact, FeedbackReport, GroupMember, Position,
};
pub use storage::{MemoryStore, PersistenceStore, SqliteStore, TripSnapshot};
pub use trip_config::TripConfig;
