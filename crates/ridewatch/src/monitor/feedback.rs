//! Anonymous incident reports and the feedback ratio.
//!
//! The ratio is `reports / max(1, group_size)`, where `group_size` is the
//! configured seat count of the ride. Two levels are derived from the
//! configured ratio threshold: 0.4x for a double knock, 1.4x for immediate
//! action. Each level is reported once per trip.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::escalation::Stage;
use crate::model::FeedbackReport;

/// Multiplier of the ratio threshold for the double knock level.
pub const DOUBLE_KNOCK_FACTOR: f64 = 0.4;

/// Multiplier of the ratio threshold for the immediate action level.
pub const IMMEDIATE_ACTION_FACTOR: f64 = 1.4;

/// Absorbs float error in ratio comparisons (1/5 vs 0.5 * 0.4).
const RATIO_EPSILON: f64 = 1e-9;

/// A feedback level that was crossed for the first time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackCrossing {
    /// `DoubleKnock` or `ImmediateAction`.
    pub stage: Stage,
    /// Ratio at the time of crossing.
    pub ratio: f64,
    /// Number of reports at the time of crossing.
    pub reports: usize,
}

/// Collects reports for the duration of a trip.
#[derive(Debug, Clone)]
pub struct FeedbackAggregator {
    reports: Vec<FeedbackReport>,
    group_size: u32,
    ratio_threshold: f64,
    level: Option<Stage>,
    seq: u64,
}

impl FeedbackAggregator {
    /// Create an aggregator.
    #[must_use]
    pub fn new(group_size: u32, ratio_threshold: f64) -> Self {
        Self {
            reports: Vec::new(),
            group_size,
            ratio_threshold,
            level: None,
            seq: 0,
        }
    }

    /// Append a report and re-evaluate the levels.
    pub fn submit(
        &mut self,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> (FeedbackReport, Option<FeedbackCrossing>) {
        self.seq += 1;
        let report = FeedbackReport {
            id: format!("fb-{}-{}", now.timestamp_millis(), self.seq),
            reason: reason.into(),
            timestamp: now,
        };
        self.reports.push(report.clone());
        (report, self.evaluate())
    }

    /// Merge reports pulled from peers, skipping ids already held.
    pub fn merge(
        &mut self,
        incoming: impl IntoIterator<Item = FeedbackReport>,
    ) -> Option<FeedbackCrossing> {
        let before = self.reports.len();
        for report in incoming {
            if !self.reports.iter().any(|r| r.id == report.id) {
                self.reports.push(report);
            }
        }
        if self.reports.len() == before {
            return None;
        }
        self.evaluate()
    }

    /// Current report ratio.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        self.reports.len() as f64 / f64::from(self.group_size.max(1))
    }

    fn evaluate(&mut self) -> Option<FeedbackCrossing> {
        let ratio = self.ratio() + RATIO_EPSILON;
        let stage = if ratio >= self.ratio_threshold * IMMEDIATE_ACTION_FACTOR {
            Stage::ImmediateAction
        } else if ratio >= self.ratio_threshold * DOUBLE_KNOCK_FACTOR {
            Stage::DoubleKnock
        } else {
            return None;
        };

        if self
            .level
            .is_some_and(|level| level.severity() >= stage.severity())
        {
            return None;
        }

        self.level = Some(stage);
        let crossing = FeedbackCrossing {
            stage,
            ratio: self.ratio(),
            reports: self.reports.len(),
        };
        info!(
            stage = %stage,
            ratio = crossing.ratio,
            reports = crossing.reports,
            "Feedback threshold crossed"
        );
        Some(crossing)
    }

    /// Reports in submission order.
    #[must_use]
    pub fn reports(&self) -> &[FeedbackReport] {
        &self.reports
    }

    /// Reload reports from a snapshot and recompute the reached level silently.
    pub fn restore(&mut self, reports: Vec<FeedbackReport>) {
        self.reports = reports;
        self.seq = self.reports.len() as u64;
        self.level = None;
        let _ = self.evaluate();
    }

    /// Drop every report; used at trip end.
    pub fn clear(&mut self) {
        self.reports.clear();
        self.level = None;
    }
}
