//! `ridewatch` - CLI for the shared-ride safety monitor
//!
//! Replays recorded trips through the monitor, printing every notification
//! as one JSON line, and inspects persisted trip snapshots.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use ridewatch::cli::{Cli, Command, ConfigCommand, RunCommand, SnapshotCommand};
use ridewatch::{
    init_logging, Config, PersistenceStore, Position, ReplaySource, SqliteStore, TracingSink,
    TripConfig, TripController, TripSnapshot,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Run(run) => handle_run(&config, run).await,
        Command::Snapshot(snapshot) => handle_snapshot(&config, &snapshot),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} from {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid {what} in {}", path.display()))
}

async fn handle_run(config: &Config, cmd: RunCommand) -> anyhow::Result<()> {
    let trip: TripConfig = read_json(&cmd.trip, "trip configuration")?;
    let track: Vec<Position> = read_json(&cmd.positions, "position track")?;
    if track.is_empty() {
        bail!("position track {} is empty", cmd.positions.display());
    }

    let mut builder = TripController::builder(trip)
        .app_config(config.clone())
        .sink(Arc::new(TracingSink));
    if let Some(trip_id) = cmd.trip_id {
        builder = builder.trip_id(trip_id);
    }
    if !cmd.no_persist {
        let path = config.database_path();
        let store = SqliteStore::open(&path)
            .with_context(|| format!("failed to open trip store at {}", path.display()))?;
        builder = builder.store(Arc::new(store));
    }
    let mut controller = builder.build()?;

    let done = CancellationToken::new();
    let printer = tokio::spawn(print_notifications(controller.subscribe(), done.clone()));

    let source = ReplaySource::new(track, cmd.speedup);
    let finished = source.finished();
    info!(
        trip_id = controller.trip_id(),
        samples = source.len(),
        "Replaying trip"
    );
    controller.start(source).await?;

    tokio::select! {
        () = finished.cancelled() => info!("Replay finished"),
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            warn!("Interrupted, stopping trip");
        }
    }

    let stopped = controller.stop().await;
    done.cancel();
    if let Err(e) = printer.await {
        warn!(error = %e, "Notification printer failed");
    }
    stopped.context("failed to stop trip")?;

    println!("{}", serde_json::to_string(&controller.status())?);
    Ok(())
}

async fn print_notifications(
    mut events: tokio::sync::broadcast::Receiver<ridewatch::Notification>,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => print_line(&event),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Notification output lagged"),
                Err(RecvError::Closed) => return,
            },
            () = done.cancelled() => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        print_line(&event);
    }
}

fn print_line(event: &ridewatch::Notification) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to serialize notification"),
    }
}

fn handle_snapshot(config: &Config, cmd: &SnapshotCommand) -> anyhow::Result<()> {
    let path = config.database_path();
    if !path.exists() {
        bail!("no trip store at {}", path.display());
    }
    let store = SqliteStore::open(&path)?;

    let Some(trip_id) = &cmd.trip_id else {
        let ids = store.trip_ids()?;
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&ids)?);
        } else if ids.is_empty() {
            println!("No stored trips.");
        } else {
            for id in ids {
                println!("{id}");
            }
        }
        return Ok(());
    };

    let snapshot = store
        .load(trip_id)?
        .with_context(|| format!("no snapshot for trip {trip_id}"))?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn print_snapshot(snapshot: &TripSnapshot) {
    println!("Trip {}", snapshot.trip_id);
    println!("{}", "-".repeat(5 + snapshot.trip_id.len()));
    println!("Saved at:         {}", snapshot.saved_at.to_rfc3339());
    println!("Stage:            {}", snapshot.escalation.stage);
    if let Some(at) = snapshot.escalation.last_notified_at {
        println!("Last notified:    {}", at.to_rfc3339());
    }
    println!("Connectivity:     {}", snapshot.connectivity);
    println!("Group members:    {}", snapshot.members.len());
    println!("Speed samples:    {}", snapshot.speed_log.len());
    if let Some(latest) = snapshot.speed_log.last() {
        println!("Latest speed:     {:.1} km/h", latest.speed_kmh);
    }
    println!("Feedback reports: {}", snapshot.feedback_reports.len());
    for report in &snapshot.feedback_reports {
        println!("  {}  {}", report.timestamp.to_rfc3339(), report.reason);
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:        {}", config.database_path().display());
                println!();
                println!("[Monitor]");
                println!(
                    "  Stop check interval:  {}s",
                    config.monitor.stop_check_interval_secs
                );
                println!(
                    "  Proximity interval:   {}s",
                    config.monitor.proximity_check_interval_secs
                );
                println!("  Reminder gap:         {}s", config.monitor.reminder_gap_secs);
                println!(
                    "  Escalation grace:     {}min",
                    config.monitor.escalation_grace_minutes
                );
                println!();
                println!("[Sync]");
                println!(
                    "  Endpoint:             {}",
                    config.sync.endpoint.as_deref().unwrap_or("(none)")
                );
                println!("  Request timeout:      {}ms", config.sync.request_timeout_ms);
                println!("  P2P timeout:          {}ms", config.sync.p2p_timeout_ms);
                println!("  Max retries:          {}", config.sync.max_retries);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}
