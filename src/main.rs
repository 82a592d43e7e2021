//! HawkSpeed - GPS Street Racing Server
//!
//! Main entry point: runs the race server and track management commands.

use anyhow::Context;
use clap::{Parser, Subcommand};
use hawkspeed::networking::RaceServer;
use hawkspeed::racing::{leaderboard_for, LeaderboardQuery, ProgressWriter, RaceCoordinator};
use hawkspeed::session::SessionRegistry;
use hawkspeed::storage::config::load_config;
use hawkspeed::storage::{Database, RaceStore, ServerConfig};
use hawkspeed::tracks::import::{export_track, import_directory, import_file, ImportedTrack};
use hawkspeed::tracks::{
    GoogleRoadsSnapper, ImportError, PipelineError, TrackType, TrackVerificationPipeline,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "hawkspeed", version, about = "GPS street racing server")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "HAWKSPEED_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the WebSocket race server
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Import, snap and verify tracks from a GPX/JSON file or a directory
    Import {
        path: PathBuf,
        /// Owner of the imported tracks
        #[arg(long, default_value_t = Uuid::nil())]
        owner: Uuid,
        /// Override the number of laps (circuits only)
        #[arg(long)]
        laps: Option<u32>,
        /// Override the track type: sprint or circuit
        #[arg(long = "type")]
        track_type: Option<String>,
    },
    /// Write a track to the JSON export format
    Export {
        track_id: Uuid,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Cancel ongoing attempts left behind by a previous run
    Recover,
    /// Show a track leaderboard
    Leaderboard {
        track_id: Uuid,
        /// Only this user's attempts
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List stored tracks
    Tracks,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            serve(config).await
        }
        Command::Import {
            path,
            owner,
            laps,
            track_type,
        } => {
            let track_type = match track_type {
                Some(t) => Some(TrackType::parse(&t).with_context(|| format!("unknown track type '{}'", t))?),
                None => None,
            };
            import(&config, &path, owner, laps, track_type).await
        }
        Command::Export { track_id, output } => export(&config, track_id, output.as_deref()),
        Command::Recover => {
            let store: Arc<dyn RaceStore> = Arc::new(open_database(&config)?);
            let registry = SessionRegistry::new(config.server.spectator_buffer);
            let report = registry.recover_stuck_attempts(&store).await?;
            println!("Cancelled {} abandoned attempt(s)", report.cancelled.len());
            for id in report.cancelled {
                println!("  {}", id);
            }
            Ok(())
        }
        Command::Leaderboard { track_id, user, limit } => {
            let db = open_database(&config)?;
            let entries = leaderboard_for(
                &db,
                track_id,
                config.environment,
                LeaderboardQuery {
                    user_id: user,
                    limit: limit.or(Some(config.leaderboard.page_size)),
                },
            )?;
            if entries.is_empty() {
                println!("No finished attempts on track {}", track_id);
            }
            for e in entries {
                println!(
                    "{:>3}. {}  {:>10.3}s  {:>6.1} km/h{}",
                    e.rank,
                    e.user_id,
                    e.stopwatch_ms as f64 / 1000.0,
                    e.average_speed_ms * 3.6,
                    if e.fake { "  (fake)" } else { "" }
                );
            }
            Ok(())
        }
        Command::Tracks => {
            let db = open_database(&config)?;
            for (id, name, verified) in db.list_tracks()? {
                println!("{}  {:<8}  {}", id, if verified { "verified" } else { "-" }, name);
            }
            Ok(())
        }
    }
}

fn open_database(config: &ServerConfig) -> anyhow::Result<Database> {
    let path = config.database_path();
    Database::open(&path).with_context(|| format!("opening database {}", path.display()))
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    tracing::info!("Starting HawkSpeed v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);

    let config = Arc::new(config);
    let db = Arc::new(open_database(&config)?);
    let store: Arc<dyn RaceStore> = db;

    let registry = Arc::new(SessionRegistry::new(config.server.spectator_buffer));
    let (progress, progress_task) = ProgressWriter::spawn(
        Arc::clone(&store),
        Duration::from_millis(config.storage.progress_flush_interval_ms),
    );
    let coordinator = Arc::new(RaceCoordinator::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        progress,
        Arc::clone(&config),
    ));

    // Nothing is live yet, so every ongoing attempt is abandoned
    let report = coordinator.recover().await?;
    tracing::info!("Startup recovery cancelled {} attempt(s)", report.cancelled.len());

    let maintenance = {
        let coordinator = Arc::clone(&coordinator);
        let idle = Duration::from_secs(config.server.idle_timeout_secs);
        let period = Duration::from_secs(config.server.recovery_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                coordinator.registry().sweep_stale(idle).await;
                if let Err(e) = coordinator.recover().await {
                    tracing::error!("Recovery sweep failed: {}", e);
                }
            }
        })
    };

    let server = RaceServer::new(Arc::clone(&config), Arc::clone(&coordinator));
    let listener = server.bind().await?;

    tokio::select! {
        result = server.run(listener) => {
            if let Err(e) = result {
                tracing::error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
        }
    }

    maintenance.abort();
    registry.shutdown().await;
    // Give connection tasks a moment to detach their races
    tokio::time::sleep(Duration::from_millis(250)).await;

    drop(server);
    drop(coordinator);
    if tokio::time::timeout(Duration::from_secs(5), progress_task).await.is_err() {
        tracing::warn!("Progress writer did not flush in time");
    }

    tracing::info!("HawkSpeed stopped");
    Ok(())
}

async fn import(
    config: &ServerConfig,
    path: &Path,
    owner: Uuid,
    laps: Option<u32>,
    track_type: Option<TrackType>,
) -> anyhow::Result<()> {
    let db = open_database(config)?;

    let mut pipeline = TrackVerificationPipeline::new(config.tracks.clone(), config.snapping.clone());
    if config.tracks.snap_to_roads {
        match GoogleRoadsSnapper::from_settings(&config.snapping) {
            Ok(snapper) => pipeline = pipeline.with_snapper(Arc::new(snapper)),
            Err(e) => tracing::warn!("Road snapping disabled: {}", e),
        }
    }

    let files: Vec<(PathBuf, Result<ImportedTrack, ImportError>)> = if path.is_dir() {
        import_directory(path)?
    } else {
        vec![(path.to_path_buf(), import_file(path))]
    };

    let (mut saved, mut unchanged, mut failed) = (0, 0, 0);
    for (file, imported) in files {
        let mut imported = match imported {
            Ok(imported) => imported,
            Err(e) => {
                tracing::error!("Skipping {}: {}", file.display(), e);
                failed += 1;
                continue;
            }
        };
        if let Some(t) = track_type {
            imported.track_type = t;
        }
        if let Some(laps) = laps {
            imported.laps = laps;
        }

        let outcome = match pipeline.import_into(&db, imported, owner).await {
            Ok(outcome) => outcome,
            Err(PipelineError::Database(e)) => return Err(e.into()),
            Err(e) => {
                tracing::error!("Skipping {}: {}", file.display(), e);
                failed += 1;
                continue;
            }
        };

        if outcome.is_new() {
            saved += 1;
        } else {
            unchanged += 1;
        }
        let track = outcome.track();
        println!(
            "{}  {}{}  {} ({:.0}m){}",
            track.id,
            if track.verified { "verified" } else { "unverified" },
            if outcome.is_new() { "" } else { ", unchanged" },
            track.name,
            track.path.length(),
            track
                .verification_failure
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        );
    }

    tracing::info!(
        "Imported {} track(s), {} already stored, {} failed",
        saved,
        unchanged,
        failed
    );
    Ok(())
}

fn export(config: &ServerConfig, track_id: Uuid, output: Option<&Path>) -> anyhow::Result<()> {
    let db = open_database(config)?;
    let track = db
        .load_track(track_id)?
        .with_context(|| format!("track {} not found", track_id))?;
    let json = export_track(&track).to_json()?;

    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Exported '{}' to {}", track.name, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
