//! Notifications emitted to the surrounding application.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::contacts::AlertReason;
use crate::escalation::Stage;
use crate::model::{Channel, ConnectivityStatus, Position};
use crate::monitor::ProximityAlert;

/// Default capacity of a [`BroadcastSink`].
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// An event a trip reports to its observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Notification {
    /// An inactivity reminder.
    ReminderIssued {
        /// Reminder number within the stop episode.
        level: u8,
        /// Minutes without significant movement.
        stopped_minutes: i64,
        /// Stage after the reminder.
        stage: Stage,
        /// When it was issued.
        at: DateTime<Utc>,
    },
    /// Contacts are being alerted.
    Escalated {
        /// What triggered the escalation.
        reason: AlertReason,
        /// Stage reached.
        stage: Stage,
        /// Last known local position.
        position: Option<Position>,
        /// Number of contacts dispatched to.
        contacts: usize,
        /// When it happened.
        at: DateTime<Utc>,
    },
    /// The current separation alert set. An empty set clears earlier alerts.
    ProximityAlert {
        /// Members beyond the separation distance.
        alerts: Vec<ProximityAlert>,
        /// Time of the evaluation.
        at: DateTime<Utc>,
    },
    /// The sync status changed.
    ConnectivityChanged {
        /// New status.
        status: ConnectivityStatus,
        /// Channel in use.
        channel: Channel,
        /// When the status changed.
        at: DateTime<Utc>,
    },
    /// The feedback ratio reached a new level.
    FeedbackThresholdCrossed {
        /// `doubleKnock` or `immediateAction`.
        stage: Stage,
        /// Reports divided by group size.
        ratio: f64,
        /// Number of reports.
        reports: usize,
        /// When it was crossed.
        at: DateTime<Utc>,
    },
}

impl Notification {
    /// Short event name, as used in the serialized `event` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReminderIssued { .. } => "reminderIssued",
            Self::Escalated { .. } => "escalated",
            Self::ProximityAlert { .. } => "proximityAlert",
            Self::ConnectivityChanged { .. } => "connectivityChanged",
            Self::FeedbackThresholdCrossed { .. } => "feedbackThresholdCrossed",
        }
    }

    /// When the event happened.
    #[must_use]
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::ReminderIssued { at, .. }
            | Self::Escalated { at, .. }
            | Self::ProximityAlert { at, .. }
            | Self::ConnectivityChanged { at, .. }
            | Self::FeedbackThresholdCrossed { at, .. } => *at,
        }
    }
}

/// Receives notifications. Implementations must not block.
pub trait NotificationSink: Send + Sync + std::fmt::Debug {
    /// Deliver one notification.
    fn notify(&self, notification: &Notification);
}

/// Fans notifications out to any number of subscribers.
///
/// Sending with no subscribers is not an error; the event is dropped.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    /// Create a sink with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to future notifications.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_BROADCAST_CAPACITY)
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: &Notification) {
        let _ = self.sender.send(notification.clone());
    }
}

/// Writes every notification to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::Escalated {
                reason, contacts, ..
            } => warn!(%reason, contacts, "Trip escalated"),
            Notification::ConnectivityChanged {
                status, channel, ..
            } => info!(%status, %channel, "Connectivity changed"),
            other => info!(event = other.kind(), "Trip notification"),
        }
    }
}

/// A set of sinks that all receive every notification.
#[derive(Debug, Clone, Default)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl SinkSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink.
    pub fn push(&mut self, sink: Arc<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    /// Number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sink is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Deliver a batch in order.
    pub fn notify_all(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.notify(notification);
        }
    }
}

impl NotificationSink for SinkSet {
    fn notify(&self, notification: &Notification) {
        for sink in &self.sinks {
            sink.notify(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_with_event_tag() {
        let n = Notification::ReminderIssued {
            level: 1,
            stopped_minutes: 10,
            stage: Stage::Reminder(1),
            at: Utc::now(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["event"], "reminderIssued");
        assert_eq!(json["stoppedMinutes"], 10);
        assert_eq!(json["event"], n.kind());
    }

    #[test]
    fn test_connectivity_changed_json() {
        let n = Notification::ConnectivityChanged {
            status: ConnectivityStatus::Error,
            channel: Channel::Internet,
            at: Utc::now(),
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["channel"], "internet");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut a = sink.subscribe();
        let mut b = sink.subscribe();
        assert_eq!(sink.receiver_count(), 2);

        let at = Utc::now();
        sink.notify(&Notification::ProximityAlert {
            alerts: Vec::new(),
            at,
        });

        assert_eq!(a.recv().await.unwrap().at(), at);
        assert_eq!(b.recv().await.unwrap().kind(), "proximityAlert");
    }

    #[tokio::test]
    async fn test_sink_set_fans_out() {
        let first = BroadcastSink::new(4);
        let second = BroadcastSink::new(4);
        let mut rx1 = first.subscribe();
        let mut rx2 = second.subscribe();

        let mut set = SinkSet::new();
        set.push(Arc::new(first));
        set.push(Arc::new(second));
        set.push(Arc::new(TracingSink));
        assert_eq!(set.len(), 3);

        set.notify_all(&[Notification::ConnectivityChanged {
            status: ConnectivityStatus::Connected,
            channel: Channel::P2p,
            at: Utc::now(),
        }]);
        assert_eq!(rx1.recv().await.unwrap().kind(), "connectivityChanged");
        assert_eq!(rx2.recv().await.unwrap().kind(), "connectivityChanged");
    }

    #[test]
    fn test_broadcast_without_subscribers_is_fine() {
        let sink = BroadcastSink::default();
        sink.notify(&Notification::FeedbackThresholdCrossed {
            stage: Stage::DoubleKnock,
            ratio: 0.2,
            reports: 1,
            at: Utc::now(),
        });
    }
}
