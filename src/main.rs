// src/main.rs
//
// Paceward — supervisory full-course-caution controller.
//
// Two operational modes:
//   live    — attach to the running simulator (needs the platform
//             shared-memory reader; not part of this build)
//   replay  — replay an NDJSON telemetry frame dump (offline runs, testing)
//
// Usage:
//   paceward --mode replay --path session.ndjson
//   paceward --mode replay --path session.ndjson --settings paceward.json

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use paceward::commands::{ChatCommander, MockSink};
use paceward::config::{Settings, Severity};
use paceward::supervisor::{Signals, Supervisor};
use paceward::telemetry::ReplaySource;

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "paceward",
    about   = "Supervisory full-course-caution controller for simulator racing",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "replay")]
    mode: Mode,

    #[arg(long, default_value = "session.ndjson",
          help = "NDJSON telemetry frame dump (replay mode)")]
    path: PathBuf,

    #[arg(long, help = "JSON settings file; built-in defaults apply when omitted")]
    settings: Option<PathBuf>,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Live,   // attach to the running simulator
    Replay, // replay a recorded frame dump
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("paceward=info".parse()?))
        .compact()
        .init();

    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let mut fatal = false;
    for issue in settings.validate() {
        match issue.severity {
            Severity::Error => {
                error!("settings: {}: {}", issue.field, issue.message);
                fatal = true;
            }
            Severity::Warning => warn!("settings: {}: {}", issue.field, issue.message),
        }
    }
    if fatal {
        anyhow::bail!("settings validation failed");
    }

    let source = match cli.mode {
        Mode::Live => {
            // The shared-memory reader is an external collaborator; this
            // build drives everything through the replay source.
            eprintln!("Live mode requires the simulator's shared-memory reader.");
            eprintln!("Falling back to replay mode for this run.\n");
            Box::new(ReplaySource::from_path(&cli.path)?)
        }
        Mode::Replay => {
            info!("replaying {}", cli.path.display());
            Box::new(ReplaySource::from_path(&cli.path)?)
        }
    };

    // The mock sink records and logs every command; wiring the real chat
    // injector in is a one-line swap behind the same trait.
    let sink = MockSink::new();
    let commander = ChatCommander::new(Box::new(sink.clone()));

    let signals = Arc::new(Signals::default());
    let (supervisor, mut state_rx) =
        Supervisor::new(source, commander, settings.shared(), Arc::clone(&signals));

    // Control-side observer: surface state transitions as they happen.
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow_and_update();
            info!("state observable: {state}");
        }
    });

    // Ctrl-C latches the shutdown signal; the supervisor unwinds at its next
    // poll point.
    let shutdown_signals = Arc::clone(&signals);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received; requesting shutdown");
            shutdown_signals.request_shutdown();
        }
    });

    let result = tokio::spawn(supervisor.run()).await?;

    let log = sink.log();
    info!("{} commands emitted this session", log.len());
    result
}
