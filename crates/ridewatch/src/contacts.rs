//! Alert dispatch to emergency contacts.
//!
//! Dispatch is fire-and-forget: each contact gets its own task, and a failing
//! notifier is logged without affecting the evaluator that triggered it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::escalation::Stage;
use crate::model::{EmergencyContact, Position};

/// Why contacts are being alerted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlertReason {
    /// The traveller stayed stationary past the escalation threshold.
    Inactivity,
    /// Passengers reported enough incidents.
    Feedback,
}

impl std::fmt::Display for AlertReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactivity => write!(f, "inactivity"),
            Self::Feedback => write!(f, "feedback"),
        }
    }
}

/// One alert addressed to one contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactAlert {
    /// Trip the alert belongs to.
    pub trip_id: String,
    /// Recipient.
    pub contact: EmergencyContact,
    /// Trigger.
    pub reason: AlertReason,
    /// Stage reached.
    pub stage: Stage,
    /// Last known position of the traveller.
    pub position: Option<Position>,
    /// When the alert was raised.
    pub at: DateTime<Utc>,
}

/// Delivers alerts to contacts (SMS gateway, push service, ...).
#[async_trait::async_trait]
pub trait ContactNotifier: Send + Sync + std::fmt::Debug {
    /// Deliver one alert.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed. The error is logged, never retried.
    async fn notify(&self, alert: &ContactAlert) -> Result<()>;
}

/// Notifier that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl ContactNotifier for LogNotifier {
    async fn notify(&self, alert: &ContactAlert) -> Result<()> {
        info!(
            trip_id = %alert.trip_id,
            contact = %alert.contact.name,
            reason = %alert.reason,
            stage = %alert.stage,
            "Emergency contact alerted"
        );
        Ok(())
    }
}

/// Spawn one delivery task per contact. Returns the number of tasks spawned.
///
/// Must be called from within a tokio runtime.
pub fn dispatch(
    notifier: &Arc<dyn ContactNotifier>,
    trip_id: &str,
    contacts: &[EmergencyContact],
    reason: AlertReason,
    stage: Stage,
    position: Option<Position>,
    at: DateTime<Utc>,
) -> usize {
    for contact in contacts {
        let notifier = Arc::clone(notifier);
        let alert = ContactAlert {
            trip_id: trip_id.to_string(),
            contact: contact.clone(),
            reason,
            stage,
            position,
            at,
        };
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&alert).await {
                warn!(contact = %alert.contact.name, error = %e, "Failed to alert contact");
            }
        });
    }
    contacts.len()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::error::Error;

    /// Records every alert; fails for contacts named "unreachable".
    #[derive(Debug, Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) alerts: Mutex<Vec<ContactAlert>>,
    }

    impl RecordingNotifier {
        pub(crate) fn alerts(&self) -> Vec<ContactAlert> {
            self.alerts.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ContactNotifier for RecordingNotifier {
        async fn notify(&self, alert: &ContactAlert) -> Result<()> {
            if alert.contact.name == "unreachable" {
                return Err(Error::internal("gateway down"));
            }
            self.alerts.lock().unwrap().push(alert.clone());
            Ok(())
        }
    }

    pub(crate) fn contact(name: &str) -> EmergencyContact {
        EmergencyContact {
            name: name.to_string(),
            phone: "+10000000000".to_string(),
            role: "friend".to_string(),
        }
    }

    #[test]
    fn test_alert_reason_display() {
        assert_eq!(AlertReason::Inactivity.to_string(), "inactivity");
        assert_eq!(AlertReason::Feedback.to_string(), "feedback");
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_contact() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier: Arc<dyn ContactNotifier> = recorder.clone();
        let contacts = vec![contact("ana"), contact("ben"), contact("cy")];

        let spawned = dispatch(
            &notifier,
            "trip-1",
            &contacts,
            AlertReason::Inactivity,
            Stage::Escalated,
            None,
            Utc::now(),
        );
        assert_eq!(spawned, 3);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let mut names: Vec<_> = recorder
            .alerts()
            .into_iter()
            .map(|a| a.contact.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["ana", "ben", "cy"]);
    }

    #[tokio::test]
    async fn test_dispatch_failure_does_not_block_others() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier: Arc<dyn ContactNotifier> = recorder.clone();
        let contacts = vec![contact("unreachable"), contact("ana")];

        dispatch(
            &notifier,
            "trip-1",
            &contacts,
            AlertReason::Feedback,
            Stage::ImmediateAction,
            None,
            Utc::now(),
        );
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let alerts = recorder.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].reason, AlertReason::Feedback);
    }

    #[tokio::test]
    async fn test_log_notifier_succeeds() {
        let alert = ContactAlert {
            trip_id: "t".to_string(),
            contact: contact("ana"),
            reason: AlertReason::Inactivity,
            stage: Stage::Escalated,
            position: None,
            at: Utc::now(),
        };
        assert!(LogNotifier.notify(&alert).await.is_ok());
    }
}
