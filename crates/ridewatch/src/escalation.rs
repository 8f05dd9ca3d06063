//! The combined escalation state machine.
//!
//! Two independent producers advance the stage: the stop evaluator
//! (reminders, then escalation) and the feedback aggregator (double knock,
//! then immediate action). Every change goes through [`EscalationState::raise`],
//! which only accepts a strictly more severe stage. Whichever producer arrives
//! first, the more severe stage is what remains, and the stage never moves
//! backwards within a trip.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Escalation stage of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "stage", content = "level", rename_all = "camelCase")]
pub enum Stage {
    /// No trip has been started.
    #[default]
    Idle,
    /// Trip is being monitored, nothing unusual so far.
    Started,
    /// An inactivity reminder was issued (1 or 2).
    Reminder(u8),
    /// Feedback volume crossed the lower threshold.
    DoubleKnock,
    /// Inactivity escalated to emergency contacts.
    Escalated,
    /// Feedback volume crossed the upper threshold.
    ImmediateAction,
    /// Trip stopped. Terminal.
    Completed,
}

impl Stage {
    /// Ordering key; larger is more severe.
    #[must_use]
    pub fn severity(self) -> u16 {
        match self {
            Self::Idle => 0,
            Self::Started => 10,
            Self::Reminder(n) => 20 + u16::from(n),
            Self::DoubleKnock => 40,
            Self::Escalated => 50,
            Self::ImmediateAction => 60,
            Self::Completed => 100,
        }
    }

    /// `true` once contacts have been (or are being) alerted.
    #[must_use]
    pub fn is_escalated(self) -> bool {
        matches!(self, Self::Escalated | Self::ImmediateAction)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Started => write!(f, "started"),
            Self::Reminder(n) => write!(f, "reminder({n})"),
            Self::DoubleKnock => write!(f, "double_knock"),
            Self::Escalated => write!(f, "escalated"),
            Self::ImmediateAction => write!(f, "immediate_action"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Current stage plus when a notification last went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalationState {
    /// Current stage.
    pub stage: Stage,
    /// Time of the last reminder or escalation notice.
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl EscalationState {
    /// State of a freshly started trip.
    #[must_use]
    pub fn started() -> Self {
        Self {
            stage: Stage::Started,
            last_notified_at: None,
        }
    }

    /// Advance to `stage` if it is more severe than the current one.
    ///
    /// Returns `true` if the stage changed. A completed trip never changes.
    pub fn raise(&mut self, stage: Stage, at: DateTime<Utc>) -> bool {
        if self.stage == Stage::Completed || stage.severity() <= self.stage.severity() {
            return false;
        }
        self.stage = stage;
        self.last_notified_at = Some(at);
        true
    }

    /// Record that a notification went out without changing the stage.
    pub fn mark_notified(&mut self, at: DateTime<Utc>) {
        self.last_notified_at = Some(at);
    }

    /// Move to the terminal stage.
    pub fn complete(&mut self) {
        self.stage = Stage::Completed;
    }
}
