//! Shared per-trip state.
//!
//! Every concurrent unit of a trip (position pipeline, tickers, sync worker,
//! feedback submissions) works on one [`TripState`] behind a single mutex.
//! Critical sections never await, so the lock is a plain `std` mutex.
//! Notifications produced under the lock are collected and delivered after
//! it is released.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::Config;
use crate::contacts::{self, AlertReason, ContactNotifier};
use crate::escalation::{EscalationState, Stage};
use crate::events::{Notification, NotificationSink, SinkSet};
use crate::model::{Channel, ConnectivityStatus, GroupMember};
use crate::monitor::{
    FeedbackAggregator, FeedbackCrossing, MovementTracker, ProximityEvaluator, SpeedSampler,
    StopEscalationEvaluator, TickerKind,
};
use crate::storage::TripSnapshot;
use crate::sync::SyncPayload;
use crate::trip_config::{ShareLevel, TripConfig};

/// Handle to the state of one trip.
pub type SharedState = Arc<Mutex<TripState>>;

/// Lock the trip state.
///
/// A panic in another holder does not invalidate the evaluator state, so a
/// poisoned lock is recovered.
pub fn lock(state: &SharedState) -> MutexGuard<'_, TripState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// How many times each unit has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickCounters {
    /// Inactivity evaluations.
    pub stop: u64,
    /// Proximity evaluations.
    pub proximity: u64,
    /// Aggregated speed flushes.
    pub speed_flush: u64,
    /// Sync attempts (one per tick, retries excluded).
    pub sync: u64,
    /// Position samples processed.
    pub positions: u64,
}

impl TickCounters {
    /// Count one run of `kind`.
    pub fn record(&mut self, kind: TickerKind) {
        match kind {
            TickerKind::Stop => self.stop += 1,
            TickerKind::Proximity => self.proximity += 1,
            TickerKind::SpeedFlush => self.speed_flush += 1,
            TickerKind::Sync => self.sync += 1,
        }
    }
}

/// Everything a running trip knows.
#[derive(Debug)]
pub struct TripState {
    /// Trip identifier.
    pub trip_id: String,
    /// Normalized configuration.
    pub config: TripConfig,
    /// Combined escalation stage.
    pub escalation: EscalationState,
    /// Last significant movement.
    pub movement: MovementTracker,
    /// Speed derivation and log.
    pub speed: SpeedSampler,
    /// Reminder/escalation sequence.
    pub stop: StopEscalationEvaluator,
    /// Separation alerts.
    pub proximity: ProximityEvaluator,
    /// Incident reports.
    pub feedback: FeedbackAggregator,
    /// Other participants by id.
    pub members: BTreeMap<String, GroupMember>,
    /// Sync status.
    pub connectivity: ConnectivityStatus,
    /// Channel the sync worker currently uses.
    pub channel: Channel,
    /// Per-unit run counters.
    pub ticks: TickCounters,
}

impl TripState {
    /// Build the state of a trip starting at `now`.
    #[must_use]
    pub fn new(
        trip_id: impl Into<String>,
        config: TripConfig,
        app: &Config,
        now: DateTime<Utc>,
    ) -> Self {
        let grace = TimeDelta::from_std(app.escalation_grace()).unwrap_or(TimeDelta::MAX);
        let reminder_gap = TimeDelta::from_std(app.reminder_gap()).unwrap_or(TimeDelta::MAX);
        let members = config
            .members
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();

        Self {
            trip_id: trip_id.into(),
            escalation: EscalationState::started(),
            movement: MovementTracker::new(now),
            speed: SpeedSampler::new(config.speed.save_log),
            stop: StopEscalationEvaluator::new(config.stop_threshold(), grace, reminder_gap),
            proximity: ProximityEvaluator::new(
                config.group_mode,
                config.proximity_threshold_meters,
            ),
            feedback: FeedbackAggregator::new(config.group_size, config.feedback_ratio_threshold),
            members,
            connectivity: ConnectivityStatus::Idle,
            channel: config.connectivity.preferred,
            ticks: TickCounters::default(),
            config,
        }
    }

    /// Carry over what a previous run of the same trip persisted.
    ///
    /// The stage is re-applied through [`EscalationState::raise`], so a
    /// resumed trip never starts below where it stopped.
    pub fn resume_from(&mut self, snapshot: &TripSnapshot) {
        self.speed.restore_log(snapshot.speed_log.iter().copied());
        self.feedback.restore(snapshot.feedback_reports.clone());
        if let Some(at) = snapshot.escalation.last_notified_at {
            self.escalation.raise(snapshot.escalation.stage, at);
        } else {
            self.escalation.raise(snapshot.escalation.stage, snapshot.saved_at);
        }
        for member in &snapshot.members {
            self.members
                .entry(member.id.clone())
                .and_modify(|known| {
                    if let Some(position) = member.last_known_position {
                        known.merge_position(position);
                    }
                })
                .or_insert_with(|| member.clone());
        }
    }

    /// Merge members pulled from peers.
    ///
    /// Known members take the newer position; unknown ids are added. Returns
    /// the number of members whose entry changed.
    pub fn merge_members(&mut self, incoming: Vec<GroupMember>) -> usize {
        let mut changed = 0;
        for member in incoming {
            match self.members.get_mut(&member.id) {
                Some(known) => {
                    if let Some(position) = member.last_known_position {
                        if known.merge_position(position) {
                            changed += 1;
                        }
                    }
                }
                None => {
                    self.members.insert(member.id.clone(), member);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Build the outgoing sync payload, shaped by the share level.
    #[must_use]
    pub fn sync_payload(&self, now: DateTime<Utc>) -> SyncPayload {
        let share = self.config.share_level;
        SyncPayload {
            trip_id: self.trip_id.clone(),
            role: self.config.role,
            position: match share {
                ShareLevel::Minimum => None,
                ShareLevel::Standard | ShareLevel::Full => self.movement.current().copied(),
            },
            speed: match share {
                ShareLevel::Full => self.speed.latest().copied(),
                ShareLevel::Minimum | ShareLevel::Standard => None,
            },
            group_members: self.members.values().cloned().collect(),
            feedback_reports: self.feedback.reports().to_vec(),
            timestamp: now,
        }
    }

    /// Capture what must survive a restart.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> TripSnapshot {
        TripSnapshot {
            trip_id: self.trip_id.clone(),
            config: self.config.clone(),
            escalation: self.escalation,
            members: self.members.values().cloned().collect(),
            speed_log: self.speed.log().to_vec(),
            feedback_reports: self.feedback.reports().to_vec(),
            connectivity: self.connectivity,
            saved_at: now,
        }
    }
}

/// What every task of a trip needs besides the state itself.
#[derive(Debug, Clone)]
pub struct TripContext {
    /// Trip state.
    pub state: SharedState,
    /// Notification sinks.
    pub sinks: SinkSet,
    /// Time source.
    pub clock: Arc<dyn Clock>,
    /// Contact alert delivery.
    pub notifier: Arc<dyn ContactNotifier>,
}

impl TripContext {
    /// Deliver notifications collected under the lock.
    pub fn emit(&self, notifications: &[Notification]) {
        self.sinks.notify_all(notifications);
    }

    /// Apply a feedback level crossing to the locked state.
    ///
    /// The stage only moves if the crossing is more severe than the current
    /// stage. Reaching immediate action alerts every contact.
    pub fn apply_feedback_crossing(
        &self,
        state: &mut TripState,
        crossing: FeedbackCrossing,
        now: DateTime<Utc>,
        out: &mut Vec<Notification>,
    ) {
        out.push(Notification::FeedbackThresholdCrossed {
            stage: crossing.stage,
            ratio: crossing.ratio,
            reports: crossing.reports,
            at: now,
        });

        if state.escalation.raise(crossing.stage, now) && crossing.stage == Stage::ImmediateAction {
            out.push(self.escalate(state, AlertReason::Feedback, now));
        }
    }

    /// Alert every contact and describe it as a notification.
    pub fn escalate(
        &self,
        state: &TripState,
        reason: AlertReason,
        now: DateTime<Utc>,
    ) -> Notification {
        let position = state.movement.current().copied();
        let contacts = contacts::dispatch(
            &self.notifier,
            &state.trip_id,
            &state.config.contacts,
            reason,
            state.escalation.stage,
            position,
            now,
        );
        Notification::Escalated {
            reason,
            stage: state.escalation.stage,
            position,
            contacts,
            at: now,
        }
    }

    /// Set the sync status; returns the notification if it changed.
    pub fn set_connectivity(
        &self,
        state: &mut TripState,
        status: ConnectivityStatus,
        now: DateTime<Utc>,
    ) -> Option<Notification> {
        if state.connectivity == status {
            return None;
        }
        state.connectivity = status;
        Some(Notification::ConnectivityChanged {
            status,
            channel: state.channel,
            at: now,
        })
    }
}
