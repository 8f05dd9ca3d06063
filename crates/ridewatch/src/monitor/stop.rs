//! Inactivity reminders and escalation.
//!
//! Evaluated once per tick against the time of the last significant
//! movement. A stop episode lasts as long as `last_movement_at` stays the
//! same; the reminder count belongs to the episode and restarts when
//! movement resumes. The escalation stage does not: once escalated, the trip
//! stays escalated.

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::escalation::{EscalationState, Stage};

/// Reminders issued per stop episode before escalation is considered.
pub const MAX_REMINDERS: u8 = 2;

/// Default time past the stop threshold before escalating.
pub const DEFAULT_ESCALATION_GRACE_MINUTES: i64 = 5;

/// What a tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A reminder was issued.
    Reminder {
        /// Reminder number within the episode (1-based).
        level: u8,
        /// How long the traveller has been stationary.
        stopped_for: TimeDelta,
    },
    /// The trip escalated to emergency contacts.
    Escalated {
        /// How long the traveller has been stationary.
        stopped_for: TimeDelta,
    },
}

/// Drives the reminder → escalation sequence.
#[derive(Debug, Clone)]
pub struct StopEscalationEvaluator {
    threshold: TimeDelta,
    grace: TimeDelta,
    reminder_gap: TimeDelta,
    episode: Option<DateTime<Utc>>,
    reminders: u8,
    last_reminder_at: Option<DateTime<Utc>>,
}

impl StopEscalationEvaluator {
    /// Create an evaluator.
    ///
    /// `threshold` is the stationary time before the first reminder, `grace`
    /// the extra time before escalating, and `reminder_gap` the minimum spacing
    /// between reminders within one episode.
    #[must_use]
    pub fn new(threshold: TimeDelta, grace: TimeDelta, reminder_gap: TimeDelta) -> Self {
        Self {
            threshold,
            grace,
            reminder_gap,
            episode: None,
            reminders: 0,
            last_reminder_at: None,
        }
    }

    /// Reminders issued in the current episode.
    #[must_use]
    pub fn reminders(&self) -> u8 {
        self.reminders
    }

    /// Run one evaluation.
    pub fn evaluate(
        &mut self,
        last_movement_at: DateTime<Utc>,
        now: DateTime<Utc>,
        escalation: &mut EscalationState,
    ) -> Option<StopOutcome> {
        if self.episode != Some(last_movement_at) {
            if self.episode.is_some() && self.reminders > 0 {
                debug!("Movement resumed, reminder count reset");
            }
            self.episode = Some(last_movement_at);
            self.reminders = 0;
            self.last_reminder_at = None;
        }

        let stopped_for = now - last_movement_at;
        if stopped_for < self.threshold {
            return None;
        }

        if self.reminders < MAX_REMINDERS {
            if let Some(previous) = self.last_reminder_at {
                if now - previous < self.reminder_gap {
                    return None;
                }
            }

            self.reminders += 1;
            self.last_reminder_at = Some(now);
            escalation.raise(Stage::Reminder(self.reminders), now);
            escalation.mark_notified(now);

            info!(
                level = self.reminders,
                stopped_secs = stopped_for.num_seconds(),
                "Inactivity reminder"
            );
            return Some(StopOutcome::Reminder {
                level: self.reminders,
                stopped_for,
            });
        }

        let escalate_after = self
            .threshold
            .checked_add(&self.grace)
            .unwrap_or(TimeDelta::MAX);
        if stopped_for >= escalate_after
            && escalation.stage.severity() < Stage::Escalated.severity()
        {
            escalation.raise(Stage::Escalated, now);
            info!(
                stopped_secs = stopped_for.num_seconds(),
                "Inactivity escalated"
            );
            return Some(StopOutcome::Escalated { stopped_for });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator(threshold_min: i64) -> StopEscalationEvaluator {
        StopEscalationEvaluator::new(
            TimeDelta::minutes(threshold_min),
            TimeDelta::minutes(DEFAULT_ESCALATION_GRACE_MINUTES),
            TimeDelta::seconds(60),
        )
    }

    /// Ticks once a minute from `from` to `to` minutes after `start`.
    fn tick_minutes(
        eval: &mut StopEscalationEvaluator,
        state: &mut EscalationState,
        last_movement: DateTime<Utc>,
        start: DateTime<Utc>,
        minutes: std::ops::RangeInclusive<i64>,
    ) -> Vec<(i64, StopOutcome)> {
        minutes
            .filter_map(|m| {
                eval.evaluate(last_movement, start + TimeDelta::minutes(m), state)
                    .map(|o| (m, o))
            })
            .collect()
    }

    #[test]
    fn test_nothing_before_threshold() {
        let start = Utc::now();
        let mut eval = evaluator(10);
        let mut state = EscalationState::started();

        let outcomes = tick_minutes(&mut eval, &mut state, start, start, 0..=9);
        assert!(outcomes.is_empty());
        assert_eq!(state.stage, Stage::Started);
    }

    #[test]
    fn test_first_reminder_at_threshold() {
        let start = Utc::now();
        let mut eval = evaluator(10);
        let mut state = EscalationState::started();

        let outcomes = tick_minutes(&mut eval, &mut state, start, start, 0..=10);
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            outcomes[0],
            (10, StopOutcome::Reminder { level: 1, .. })
        ));
        assert_eq!(state.stage, Stage::Reminder(1));
        assert_eq!(state.last_notified_at, Some(start + TimeDelta::minutes(10)));
    }

    #[test]
    fn test_escalates_once_after_two_reminders() {
        let start = Utc::now();
        let mut eval = evaluator(10);
        let mut state = EscalationState::started();

        let outcomes = tick_minutes(&mut eval, &mut state, start, start, 0..=30);
        let kinds: Vec<_> = outcomes
            .iter()
            .map(|(m, o)| match o {
                StopOutcome::Reminder { level, .. } => (*m, format!("r{level}")),
                StopOutcome::Escalated { .. } => (*m, "esc".to_string()),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (10, "r1".to_string()),
                (11, "r2".to_string()),
                (15, "esc".to_string())
            ]
        );
        assert_eq!(state.stage, Stage::Escalated);
    }

    #[test]
    fn test_unbounded_grace_never_escalates() {
        let start = Utc::now();
        let mut eval =
            StopEscalationEvaluator::new(TimeDelta::minutes(10), TimeDelta::MAX, TimeDelta::zero());
        let mut state = EscalationState::started();

        let outcomes = tick_minutes(&mut eval, &mut state, start, start, 0..=120);
        assert_eq!(outcomes.len(), 2);
        assert_eq!(state.stage, Stage::Reminder(2));
    }

    #[test]
    fn test_reminder_gap_spaces_reminders() {
        let start = Utc::now();
        let mut eval = StopEscalationEvaluator::new(
            TimeDelta::minutes(10),
            TimeDelta::minutes(5),
            TimeDelta::minutes(3),
        );
        let mut state = EscalationState::started();

        let outcomes = tick_minutes(&mut eval, &mut state, start, start, 0..=14);
        let minutes: Vec<i64> = outcomes.iter().map(|(m, _)| *m).collect();
        assert_eq!(minutes, vec![10, 13]);
    }

    #[test]
    fn test_movement_resets_reminder_count() {
        let start = Utc::now();
        let mut eval = evaluator(10);
        let mut state = EscalationState::started();

        tick_minutes(&mut eval, &mut state, start, start, 0..=10);
        assert_eq!(eval.reminders(), 1);

        // Moved at minute 12; the new episode starts counting from zero
        let moved = start + TimeDelta::minutes(12);
        assert!(eval
            .evaluate(moved, start + TimeDelta::minutes(13), &mut state)
            .is_none());
        assert_eq!(eval.reminders(), 0);

        let outcome = eval.evaluate(moved, moved + TimeDelta::minutes(10), &mut state);
        assert!(matches!(outcome, Some(StopOutcome::Reminder { level: 1, .. })));
    }

    #[test]
    fn test_escalation_is_sticky_across_episodes() {
        let start = Utc::now();
        let mut eval = evaluator(10);
        let mut state = EscalationState::started();
        tick_minutes(&mut eval, &mut state, start, start, 0..=15);
        assert_eq!(state.stage, Stage::Escalated);

        // New episode: reminders are issued again but the stage never drops
        let moved = start + TimeDelta::minutes(20);
        let outcomes = tick_minutes(&mut eval, &mut state, moved, moved, 0..=40);
        assert!(outcomes
            .iter()
            .all(|(_, o)| matches!(o, StopOutcome::Reminder { .. })));
        assert_eq!(state.stage, Stage::Escalated);
    }

    #[test]
    fn test_no_escalation_above_escalated() {
        let start = Utc::now();
        let mut eval = evaluator(10);
        let mut state = EscalationState::started();
        state.raise(Stage::ImmediateAction, start);

        let outcomes = tick_minutes(&mut eval, &mut state, start, start, 0..=30);
        assert!(outcomes
            .iter()
            .all(|(_, o)| matches!(o, StopOutcome::Reminder { .. })));
        assert_eq!(state.stage, Stage::ImmediateAction);
    }

    #[test]
    fn test_long_tick_issues_reminder_before_escalating() {
        // A single late tick past threshold + grace still goes through reminders first
        let start = Utc::now();
        let mut eval = evaluator(10);
        let mut state = EscalationState::started();

        let late = start + TimeDelta::minutes(20);
        assert!(matches!(
            eval.evaluate(start, late, &mut state),
            Some(StopOutcome::Reminder { level: 1, .. })
        ));
        assert!(matches!(
            eval.evaluate(start, late + TimeDelta::minutes(1), &mut state),
            Some(StopOutcome::Reminder { level: 2, .. })
        ));
        assert!(matches!(
            eval.evaluate(start, late + TimeDelta::minutes(2), &mut state),
            Some(StopOutcome::Escalated { .. })
        ));
    }
}
