//! Trip lifecycle: `idle → active → ended`.
//!
//! One [`TripController`] owns one trip. Starting it subscribes the location
//! source and spawns the position pipeline, the stop, proximity and speed
//! flush tickers, and the sync transport. Every task hangs off a single
//! cancellation token, so stopping the trip tears all of them down at once.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, TokioClock};
use crate::config::Config;
use crate::contacts::{AlertReason, ContactNotifier, LogNotifier};
use crate::error::{Error, Result};
use crate::escalation::Stage;
use crate::events::{BroadcastSink, Notification, NotificationSink, SinkSet};
use crate::location::LocationSource;
use crate::model::{Channel, ConnectivityStatus, FeedbackReport, Position};
use crate::monitor::{StopOutcome, TickerKind};
use crate::state::{lock, TickCounters, TripContext, TripState};
use crate::storage::{PersistenceStore, TripSnapshot};
use crate::sync::{
    InternetChannel, NullPeerLink, PeerChannel, RetryPolicy, SyncChannel, SyncTransport,
    UnavailableChannel,
};
use crate::trip_config::TripConfig;

/// Where a trip is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Built, not started.
    #[default]
    Idle,
    /// Monitoring.
    Active,
    /// Stopped, or failed to start. Terminal.
    Ended,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Point-in-time view of a trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripStatus {
    /// Trip identifier.
    pub trip_id: String,
    /// Lifecycle state.
    pub lifecycle: Lifecycle,
    /// Escalation stage.
    pub stage: Stage,
    /// Sync status.
    pub connectivity: ConnectivityStatus,
    /// Channel of the running sync ticker, if any.
    pub channel: Option<Channel>,
    /// Members currently beyond the separation distance.
    pub proximity_alerts: usize,
    /// Samples in the speed log.
    pub speed_log_len: usize,
    /// Feedback reports received.
    pub feedback_reports: usize,
    /// Reports divided by group size.
    pub feedback_ratio: f64,
    /// Per-unit run counters.
    pub ticks: TickCounters,
    /// Tasks still running (pipeline, tickers, sync worker).
    pub live_tasks: usize,
}

/// Builder for [`TripController`].
#[derive(Debug)]
pub struct TripControllerBuilder {
    trip_id: Option<String>,
    config: TripConfig,
    app: Config,
    sinks: Vec<Arc<dyn NotificationSink>>,
    notifier: Arc<dyn ContactNotifier>,
    store: Option<Arc<dyn PersistenceStore>>,
    clock: Option<Arc<dyn Clock>>,
    p2p: Option<Arc<dyn SyncChannel>>,
    internet: Option<Arc<dyn SyncChannel>>,
}

impl TripControllerBuilder {
    /// Use a fixed trip id instead of a random one. Needed to resume a
    /// persisted trip.
    #[must_use]
    pub fn trip_id(mut self, trip_id: impl Into<String>) -> Self {
        self.trip_id = Some(trip_id.into());
        self
    }

    /// Application settings (tick intervals, timeouts, endpoint).
    #[must_use]
    pub fn app_config(mut self, app: Config) -> Self {
        self.app = app;
        self
    }

    /// Add a notification sink.
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// How emergency contacts are alerted. Defaults to [`LogNotifier`].
    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn ContactNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Where snapshots are loaded from and saved to. Without a store the trip
    /// is neither resumed nor persisted.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PersistenceStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Time source. Defaults to [`TokioClock`].
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Peer-to-peer channel. Defaults to a [`PeerChannel`] with no link.
    #[must_use]
    pub fn p2p_channel(mut self, channel: Arc<dyn SyncChannel>) -> Self {
        self.p2p = Some(channel);
        self
    }

    /// Internet channel. Defaults to an [`InternetChannel`] on the configured
    /// endpoint, or an always-failing channel when none is configured.
    #[must_use]
    pub fn internet_channel(mut self, channel: Arc<dyn SyncChannel>) -> Self {
        self.internet = Some(channel);
        self
    }

    /// Build the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if the application config is invalid or the default
    /// internet channel cannot be created.
    pub fn build(self) -> Result<TripController> {
        self.app.validate()?;
        let trip_id = self
            .trip_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let config = self.config.normalized();
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(TokioClock::new()) as Arc<dyn Clock>);

        let p2p = self.p2p.unwrap_or_else(|| {
            Arc::new(PeerChannel::new(NullPeerLink, self.app.p2p_timeout())) as Arc<dyn SyncChannel>
        });
        let internet: Arc<dyn SyncChannel> = match (self.internet, &self.app.sync.endpoint) {
            (Some(channel), _) => channel,
            (None, Some(endpoint)) => {
                Arc::new(InternetChannel::new(endpoint, self.app.request_timeout())?)
            }
            (None, None) => Arc::new(UnavailableChannel::new(
                Channel::Internet,
                "no sync endpoint configured",
            )),
        };

        let events = BroadcastSink::default();
        let mut sinks = SinkSet::new();
        sinks.push(Arc::new(events.clone()));
        for sink in self.sinks {
            sinks.push(sink);
        }

        let state = TripState::new(trip_id.clone(), config.clone(), &self.app, clock.now());
        let ctx = TripContext {
            state: Arc::new(std::sync::Mutex::new(state)),
            sinks,
            clock,
            notifier: self.notifier,
        };

        Ok(TripController {
            trip_id,
            config,
            app: self.app,
            ctx,
            events,
            store: self.store,
            p2p,
            internet,
            lifecycle: Lifecycle::Idle,
            cancel: CancellationToken::new(),
            source: None,
            tasks: Vec::new(),
            transport: None,
        })
    }
}

/// Runs one monitored trip.
#[derive(Debug)]
pub struct TripController {
    trip_id: String,
    config: TripConfig,
    app: Config,
    ctx: TripContext,
    events: BroadcastSink,
    store: Option<Arc<dyn PersistenceStore>>,
    p2p: Arc<dyn SyncChannel>,
    internet: Arc<dyn SyncChannel>,
    lifecycle: Lifecycle,
    cancel: CancellationToken,
    source: Option<Box<dyn LocationSource>>,
    tasks: Vec<(String, JoinHandle<()>)>,
    transport: Option<SyncTransport>,
}

impl TripController {
    /// Start building a controller for a trip with `config`.
    #[must_use]
    pub fn builder(config: TripConfig) -> TripControllerBuilder {
        TripControllerBuilder {
            trip_id: None,
            config,
            app: Config::default(),
            sinks: Vec::new(),
            notifier: Arc::new(LogNotifier),
            store: None,
            clock: None,
            p2p: None,
            internet: None,
        }
    }

    /// Trip identifier.
    #[must_use]
    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    /// Lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// The normalized trip configuration.
    #[must_use]
    pub fn config(&self) -> &TripConfig {
        &self.config
    }

    /// Receive every notification emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }

    /// Start monitoring with positions from `source`.
    ///
    /// If a non-completed snapshot of this trip id is stored, the speed log,
    /// reports and stage are restored from it.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyActive`] if the trip is running.
    /// - [`Error::TripEnded`] if the trip has ended.
    /// - [`Error::SensorUnavailable`] if the source cannot be subscribed. The
    ///   trip then ends without ever becoming active.
    pub async fn start(&mut self, source: impl LocationSource + 'static) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Active => return Err(Error::AlreadyActive),
            Lifecycle::Ended => return Err(Error::TripEnded),
            Lifecycle::Idle => {}
        }

        let mut source: Box<dyn LocationSource> = Box::new(source);
        let (tx, rx) = mpsc::channel(self.app.monitor.position_buffer);
        if let Err(e) = source.subscribe(tx) {
            warn!(
                trip_id = %self.trip_id,
                source = source.name(),
                error = %e,
                "Trip failed to start"
            );
            if let Err(e) = source.unsubscribe() {
                debug!(error = %e, "Unsubscribe after failed subscribe");
            }
            self.lifecycle = Lifecycle::Ended;
            return Err(e);
        }

        let now = self.ctx.clock.now();
        let mut state = TripState::new(self.trip_id.clone(), self.config.clone(), &self.app, now);
        if let Some(snapshot) = self.load_snapshot().await {
            if snapshot.escalation.stage == Stage::Completed {
                info!(trip_id = %self.trip_id, "Stored trip already completed, starting fresh");
            } else {
                state.resume_from(&snapshot);
                info!(
                    trip_id = %self.trip_id,
                    stage = %state.escalation.stage,
                    samples = state.speed.log().len(),
                    reports = state.feedback.reports().len(),
                    "Resumed trip"
                );
            }
        }
        *lock(&self.ctx.state) = state;

        self.spawn_ticker(TickerKind::Stop, self.app.stop_check_interval(), stop_tick);
        self.spawn_ticker(
            TickerKind::Proximity,
            self.app.proximity_check_interval(),
            proximity_tick,
        );
        if self.config.speed.interval_secs > 0 {
            self.spawn_ticker(
                TickerKind::SpeedFlush,
                Duration::from_secs(self.config.speed.interval_secs),
                speed_flush_tick,
            );
        }
        self.tasks.push((
            "positions".to_string(),
            tokio::spawn(run_positions(self.ctx.clone(), rx, self.cancel.clone())),
        ));

        let mut transport = SyncTransport::new(
            self.ctx.clone(),
            Arc::clone(&self.p2p),
            Arc::clone(&self.internet),
            self.config.connectivity,
            RetryPolicy::from_config(&self.app.sync),
            self.cancel.clone(),
        );
        transport.start(self.config.connectivity.preferred);

        self.transport = Some(transport);
        self.source = Some(source);
        self.lifecycle = Lifecycle::Active;
        info!(trip_id = %self.trip_id, role = ?self.config.role, "Trip started");
        Ok(())
    }

    /// Stop monitoring.
    ///
    /// Cancels every task, unsubscribes the location source, marks the trip
    /// completed and saves its snapshot. Returns the snapshot on the call
    /// that ended the trip and `None` on later calls.
    ///
    /// # Errors
    ///
    /// - [`Error::NotStarted`] if the trip was never started.
    /// - A storage error if the snapshot could not be saved. The trip has
    ///   ended regardless.
    pub async fn stop(&mut self) -> Result<Option<TripSnapshot>> {
        match self.lifecycle {
            Lifecycle::Idle => return Err(Error::NotStarted),
            Lifecycle::Ended => return Ok(None),
            Lifecycle::Active => {}
        }

        self.cancel.cancel();
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.unsubscribe() {
                warn!(source = source.name(), error = %e, "Failed to unsubscribe location source");
            }
        }
        if let Some(mut transport) = self.transport.take() {
            transport.stop().await;
        }
        for (name, handle) in self.tasks.drain(..) {
            if let Err(e) = handle.await {
                warn!(task = %name, error = %e, "Task ended abnormally");
            }
        }

        let now = self.ctx.clock.now();
        let snapshot = {
            let mut state = lock(&self.ctx.state);
            state.escalation.complete();
            let snapshot = state.snapshot(now);
            state.feedback.clear();
            state.speed.clear_log();
            snapshot
        };
        self.lifecycle = Lifecycle::Ended;
        info!(
            trip_id = %self.trip_id,
            samples = snapshot.speed_log.len(),
            reports = snapshot.feedback_reports.len(),
            "Trip stopped"
        );

        self.save_snapshot(&snapshot).await?;
        Ok(Some(snapshot))
    }

    /// Submit an anonymous incident report.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotActive`] outside an active trip.
    pub fn submit_feedback(&self, reason: impl Into<String>) -> Result<FeedbackReport> {
        if self.lifecycle != Lifecycle::Active {
            return Err(Error::NotActive);
        }

        let now = self.ctx.clock.now();
        let mut out = Vec::new();
        let report = {
            let mut guard = lock(&self.ctx.state);
            let state = &mut *guard;
            let (report, crossing) = state.feedback.submit(reason, now);
            if let Some(crossing) = crossing {
                self.ctx.apply_feedback_crossing(state, crossing, now, &mut out);
            }
            report
        };
        self.ctx.emit(&out);
        Ok(report)
    }

    /// Restart sync on `channel`. This is the only way the channel changes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotActive`] outside an active trip.
    pub fn switch_channel(&mut self, channel: Channel) -> Result<()> {
        if self.lifecycle != Lifecycle::Active {
            return Err(Error::NotActive);
        }
        let transport = self.transport.as_mut().ok_or(Error::NotActive)?;
        info!(trip_id = %self.trip_id, %channel, "Switching sync channel");
        transport.start(channel);
        Ok(())
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> TripStatus {
        let channel = self
            .transport
            .as_ref()
            .and_then(SyncTransport::active_channel);
        let live_tasks = self
            .tasks
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
            + usize::from(self.transport.as_ref().is_some_and(SyncTransport::is_running));

        let state = lock(&self.ctx.state);
        TripStatus {
            trip_id: self.trip_id.clone(),
            lifecycle: self.lifecycle,
            stage: state.escalation.stage,
            connectivity: state.connectivity,
            channel,
            proximity_alerts: state.proximity.alerts().len(),
            speed_log_len: state.speed.log().len(),
            feedback_reports: state.feedback.reports().len(),
            feedback_ratio: state.feedback.ratio(),
            ticks: state.ticks,
            live_tasks,
        }
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> TripSnapshot {
        lock(&self.ctx.state).snapshot(self.ctx.clock.now())
    }

    fn spawn_ticker(&mut self, kind: TickerKind, period: Duration, tick: fn(&TripContext)) {
        let handle = spawn_ticker(self.ctx.clone(), kind, period, self.cancel.clone(), tick);
        self.tasks.push((kind.to_string(), handle));
    }

    async fn load_snapshot(&self) -> Option<TripSnapshot> {
        let store = Arc::clone(self.store.as_ref()?);
        let trip_id = self.trip_id.clone();
        match tokio::task::spawn_blocking(move || store.load(&trip_id)).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                warn!(trip_id = %self.trip_id, error = %e, "Failed to load trip snapshot");
                None
            }
            Err(e) => {
                warn!(trip_id = %self.trip_id, error = %e, "Snapshot load task failed");
                None
            }
        }
    }

    async fn save_snapshot(&self, snapshot: &TripSnapshot) -> Result<()> {
        let Some(store) = self.store.as_ref().map(Arc::clone) else {
            return Ok(());
        };
        let trip_id = self.trip_id.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || store.save(&trip_id, &snapshot))
            .await
            .map_err(|e| Error::internal(format!("snapshot save task failed: {e}")))?
    }
}

impl Drop for TripController {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(mut source) = self.source.take() {
            if let Err(e) = source.unsubscribe() {
                debug!(error = %e, "Unsubscribe on drop");
            }
        }
    }
}

fn spawn_ticker(
    ctx: TripContext,
    kind: TickerKind,
    period: Duration,
    cancel: CancellationToken,
    tick: fn(&TripContext),
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => tick(&ctx),
            }
        }
        debug!(ticker = %kind, "Ticker stopped");
    })
}

async fn run_positions(
    ctx: TripContext,
    mut rx: mpsc::Receiver<Position>,
    cancel: CancellationToken,
) {
    loop {
        let position = tokio::select! {
            () = cancel.cancelled() => break,
            position = rx.recv() => match position {
                Some(position) => position,
                None => break,
            },
        };

        let now = ctx.clock.now();
        let mut guard = lock(&ctx.state);
        let state = &mut *guard;
        state.ticks.positions += 1;
        state.movement.on_position(&position, now);
        state.speed.on_position(&position);
    }
    debug!("Position pipeline stopped");
}

fn stop_tick(ctx: &TripContext) {
    let now = ctx.clock.now();
    let mut out = Vec::new();
    {
        let mut guard = lock(&ctx.state);
        let state = &mut *guard;
        state.ticks.record(TickerKind::Stop);
        let last_movement_at = state.movement.last_movement_at();
        match state
            .stop
            .evaluate(last_movement_at, now, &mut state.escalation)
        {
            Some(StopOutcome::Reminder { level, stopped_for }) => {
                out.push(Notification::ReminderIssued {
                    level,
                    stopped_minutes: stopped_for.num_minutes(),
                    stage: state.escalation.stage,
                    at: now,
                });
            }
            Some(StopOutcome::Escalated { .. }) => {
                out.push(ctx.escalate(state, AlertReason::Inactivity, now));
            }
            None => {}
        }
    }
    ctx.emit(&out);
}

fn proximity_tick(ctx: &TripContext) {
    let now = ctx.clock.now();
    let notification = {
        let mut guard = lock(&ctx.state);
        let state = &mut *guard;
        state.ticks.record(TickerKind::Proximity);
        let had_alerts = !state.proximity.alerts().is_empty();
        let alerts = state
            .proximity
            .evaluate(state.movement.current(), state.members.values())
            .to_vec();
        // An empty set is only worth reporting when it clears earlier alerts
        (had_alerts || !alerts.is_empty())
            .then_some(Notification::ProximityAlert { alerts, at: now })
    };
    if let Some(notification) = notification {
        ctx.emit(&[notification]);
    }
}

fn speed_flush_tick(ctx: &TripContext) {
    let mut state = lock(&ctx.state);
    state.ticks.record(TickerKind::SpeedFlush);
    if let Some(sample) = state.speed.flush() {
        debug!(speed_kmh = sample.speed_kmh, "Aggregated speed sample");
    }
}
