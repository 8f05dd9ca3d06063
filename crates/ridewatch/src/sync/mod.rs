//! State exchange with the other participants of a ride.
//!
//! Two interchangeable channels exist, a short-range peer link and an
//! internet endpoint. Exactly one runs at a time. Switching channels is an
//! explicit call, never a silent fallback. Each tick makes one attempt (plus
//! bounded retries) to push local state and pull peer updates. A failed tick
//! sets the status to `error` and the next tick tries again.

pub mod http;
pub mod p2p;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::events::Notification;
use crate::model::{
    Channel, ConnectivityStatus, FeedbackReport, GroupMember, Position, SpeedSample,
};
use crate::monitor::TickerKind;
use crate::state::{lock, TripContext};
use crate::trip_config::{ConnectivityConfig, Role};

pub use http::InternetChannel;
pub use p2p::{NullPeerLink, PeerAck, PeerChannel, PeerLink};

/// State pushed to peers on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    /// Trip identifier.
    pub trip_id: String,
    /// Sender's role.
    pub role: Role,
    /// Sender's position; omitted at the minimum share level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Latest speed sample; only at the full share level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<SpeedSample>,
    /// Roster as known locally.
    pub group_members: Vec<GroupMember>,
    /// Reports known locally.
    pub feedback_reports: Vec<FeedbackReport>,
    /// When the payload was built.
    pub timestamp: DateTime<Utc>,
}

/// Updates pulled from peers. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncResponse {
    /// Members with their latest known positions.
    pub group_members: Vec<GroupMember>,
    /// Reports submitted on other devices.
    pub feedback_reports: Vec<FeedbackReport>,
}

/// One way of exchanging state with peers.
#[async_trait::async_trait]
pub trait SyncChannel: Send + Sync + std::fmt::Debug {
    /// Which channel this is.
    fn channel(&self) -> Channel;

    /// Upper bound for one exchange.
    fn timeout(&self) -> Duration;

    /// Push the payload and pull peer updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the exchange failed. The caller treats every error
    /// as a recoverable sync failure.
    async fn exchange(&self, payload: &SyncPayload) -> Result<SyncResponse>;
}

/// Stand-in for a channel that is not configured; every attempt fails.
#[derive(Debug, Clone)]
pub struct UnavailableChannel {
    channel: Channel,
    reason: String,
}

impl UnavailableChannel {
    /// Create a channel that always fails with `reason`.
    #[must_use]
    pub fn new(channel: Channel, reason: impl Into<String>) -> Self {
        Self {
            channel,
            reason: reason.into(),
        }
    }
}

#[async_trait::async_trait]
impl SyncChannel for UnavailableChannel {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn exchange(&self, _payload: &SyncPayload) -> Result<SyncResponse> {
        Err(Error::sync(self.channel, self.reason.clone()))
    }
}

/// Bounded retries within one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per retry.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max: Duration,
}

impl RetryPolicy {
    /// No retries: one attempt per tick.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Build from the sync section of the application config.
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// Never longer than half the tick interval, so retries finish before
    /// the next tick is due.
    #[must_use]
    pub fn delay(&self, retry: u32, interval: Duration) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base
            .saturating_mul(factor)
            .min(self.max)
            .min(interval / 2)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Run one tick's worth of attempts.
///
/// Returns `Ok(None)` if cancelled while waiting, and the last error once
/// every attempt has failed.
async fn attempt_with_retry(
    channel: &dyn SyncChannel,
    payload: &SyncPayload,
    retry: &RetryPolicy,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Option<SyncResponse>> {
    let mut attempt = 0;
    loop {
        let outcome = tokio::select! {
            () = cancel.cancelled() => return Ok(None),
            outcome = tokio::time::timeout(channel.timeout(), channel.exchange(payload)) => outcome,
        };
        let error = match outcome {
            Ok(Ok(response)) => return Ok(Some(response)),
            Ok(Err(e)) => e,
            Err(_) => Error::timeout(format!("{} sync", channel.channel())),
        };

        if attempt >= retry.max_retries {
            return Err(error);
        }
        let delay = retry.delay(attempt, interval);
        debug!(
            channel = %channel.channel(),
            attempt = attempt + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Sync attempt failed, retrying"
        );
        attempt += 1;
        tokio::select! {
            () = cancel.cancelled() => return Ok(None),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// Runs the sync ticker for one channel at a time.
#[derive(Debug)]
pub struct SyncTransport {
    ctx: TripContext,
    channels: HashMap<Channel, Arc<dyn SyncChannel>>,
    intervals: ConnectivityConfig,
    retry: RetryPolicy,
    parent: CancellationToken,
    worker: Option<(CancellationToken, JoinHandle<()>)>,
}

impl SyncTransport {
    /// Create a transport. Its ticker is cancelled with `parent`.
    #[must_use]
    pub fn new(
        ctx: TripContext,
        p2p: Arc<dyn SyncChannel>,
        internet: Arc<dyn SyncChannel>,
        intervals: ConnectivityConfig,
        retry: RetryPolicy,
        parent: CancellationToken,
    ) -> Self {
        let channels = HashMap::from([(Channel::P2p, p2p), (Channel::Internet, internet)]);
        Self {
            ctx,
            channels,
            intervals,
            retry,
            parent,
            worker: None,
        }
    }

    /// Start syncing over `channel`, replacing any running ticker.
    ///
    /// The status becomes `connecting` until the first attempt completes.
    pub fn start(&mut self, channel: Channel) {
        self.cancel_worker();

        let Some(link) = self.channels.get(&channel).cloned() else {
            return;
        };
        let interval = self.intervals.interval(channel);
        let now = self.ctx.clock.now();
        let changed = {
            let mut state = lock(&self.ctx.state);
            state.channel = channel;
            // Force a notification even when already connecting on the old channel
            state.connectivity = ConnectivityStatus::Idle;
            self.ctx
                .set_connectivity(&mut state, ConnectivityStatus::Connecting, now)
        };
        if let Some(notification) = changed {
            self.ctx.emit(&[notification]);
        }

        let cancel = self.parent.child_token();
        let handle = tokio::spawn(run_worker(
            self.ctx.clone(),
            link,
            interval,
            self.retry,
            cancel.clone(),
        ));
        info!(%channel, interval_secs = interval.as_secs(), "Sync started");
        self.worker = Some((cancel, handle));
    }

    /// Stop the ticker and wait for it to exit.
    pub async fn stop(&mut self) {
        if let Some((cancel, handle)) = self.worker.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Sync worker ended abnormally");
            }
        }
    }

    /// Channel of the running ticker.
    #[must_use]
    pub fn active_channel(&self) -> Option<Channel> {
        self.worker
            .as_ref()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|_| lock(&self.ctx.state).channel)
    }

    /// Whether a ticker is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    fn cancel_worker(&mut self) {
        if let Some((cancel, handle)) = self.worker.take() {
            cancel.cancel();
            // The worker exits at its next await point; a channel switch does
            // not wait for it.
            drop(handle);
        }
    }
}

impl Drop for SyncTransport {
    fn drop(&mut self) {
        self.cancel_worker();
    }
}

async fn run_worker(
    ctx: TripContext,
    channel: Arc<dyn SyncChannel>,
    interval: Duration,
    retry: RetryPolicy,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let payload = {
            let mut state = lock(&ctx.state);
            state.ticks.record(TickerKind::Sync);
            state.sync_payload(ctx.clock.now())
        };

        let attempt =
            attempt_with_retry(channel.as_ref(), &payload, &retry, interval, &cancel).await;
        let outcome = match attempt {
            Ok(None) => break,
            Ok(Some(response)) => Ok(response),
            Err(e) => Err(e),
        };
        let out = record_outcome(&ctx, channel.channel(), outcome, &cancel);
        ctx.emit(&out);
    }

    debug!(channel = %channel.channel(), "Sync worker stopped");
}

/// Apply one finished attempt to the trip state.
///
/// A worker cancelled by a channel switch may finish an exchange after the
/// new channel set `connecting`; its result is dropped. The check happens
/// under the state lock, which `SyncTransport::start` also takes after
/// cancelling.
fn record_outcome(
    ctx: &TripContext,
    channel: Channel,
    outcome: Result<SyncResponse>,
    cancel: &CancellationToken,
) -> Vec<Notification> {
    let now = ctx.clock.now();
    let mut out = Vec::new();
    let mut guard = lock(&ctx.state);
    if cancel.is_cancelled() {
        debug!(%channel, "Dropping result of a cancelled sync worker");
        return out;
    }
    let state = &mut *guard;
    match outcome {
        Ok(response) => {
            let merged = state.merge_members(response.group_members);
            if let Some(crossing) = state.feedback.merge(response.feedback_reports) {
                ctx.apply_feedback_crossing(state, crossing, now, &mut out);
            }
            out.extend(ctx.set_connectivity(state, ConnectivityStatus::Connected, now));
            debug!(%channel, merged, "Sync succeeded");
        }
        Err(e) => {
            warn!(%channel, error = %e, "Sync failed");
            out.extend(ctx.set_connectivity(state, ConnectivityStatus::Error, now));
        }
    }
    out
}
