//! Trip evaluators.
//!
//! Every evaluator here is synchronous and side-effect free apart from its own
//! state and the [`EscalationState`](crate::escalation::EscalationState) it is
//! handed. Scheduling, locking, and notification live in the controller.

pub mod feedback;
pub mod movement;
pub mod proximity;
pub mod speed;
pub mod stop;

pub use feedback::{FeedbackAggregator, FeedbackCrossing};
pub use movement::{MovementTracker, MOVEMENT_THRESHOLD_M};
pub use proximity::{ProximityAlert, ProximityEvaluator};
pub use speed::{speed_kmh, SpeedLog, SpeedSampler, SPEED_LOG_CAPACITY};
pub use stop::{StopEscalationEvaluator, StopOutcome};

/// The periodic units a trip runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickerKind {
    /// Inactivity reminders and escalation.
    Stop,
    /// Group separation alerts.
    Proximity,
    /// Aggregated speed samples.
    SpeedFlush,
    /// State push/pull with peers.
    Sync,
}

impl std::fmt::Display for TickerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Proximity => write!(f, "proximity"),
            Self::SpeedFlush => write!(f, "speed_flush"),
            Self::Sync => write!(f, "sync"),
        }
    }
}
