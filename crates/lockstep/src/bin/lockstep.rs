//! # LOCKSTEP Command Line
//!
//! ```text
//! lockstep check <scene.toml>              build and verify, start nothing
//! lockstep run   <scene.toml> [--frames N] run N frames into a recorder
//! ```
//!
//! Any construction error is logged at `error` level and exits with
//! status 1 before a worker starts.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lockstep::shared::SceneConfig;
use lockstep::{EngineResult, FrameRecorder, Orchestrator};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Check { scene } => run_check(&scene),
        Commands::Run { scene, frames } => run_scene(&scene, frames),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "fatal");
            ExitCode::FAILURE
        }
    }
}

fn run_check(path: &Path) -> EngineResult<()> {
    let scene = SceneConfig::load(path)?;
    let orchestrator = Orchestrator::from_config(&scene)?;

    for object in orchestrator.registry().iter() {
        let ring = object.ring();
        let roles: Vec<_> = ring.gates().iter().map(|g| g.role.to_string()).collect();
        tracing::info!(
            object = %object.id(),
            vertices = object.model().vertex_count(),
            edges = object.model().edges().len(),
            ?roles,
            exclusive = ring.is_exclusive(),
            "object ok"
        );
    }
    tracing::info!(scene = %path.display(), "scene ok");
    Ok(())
}

fn run_scene(path: &Path, frames: Option<u64>) -> EngineResult<()> {
    let mut scene = SceneConfig::load(path)?;
    if let Some(frames) = frames {
        scene.frames = frames;
    }
    tracing::info!(scene = %path.display(), frames = scene.frames, "starting");

    let mut orchestrator = Orchestrator::from_config(&scene)?;
    let summary = orchestrator.run(FrameRecorder::new())?;

    for object in orchestrator.registry().iter() {
        if let Some(last) = summary.canvas.records_for(object.id()).last() {
            tracing::info!(
                object = %object.id(),
                lap = last.lap,
                digest = %format!("{:08x}", last.digest),
                contention = object.contention(),
                "final frame"
            );
        }
    }
    for report in &summary.reports {
        tracing::debug!(
            module = %report.module,
            object = %report.object,
            role = %report.role,
            laps = report.laps,
            state = %report.state,
            "worker"
        );
    }
    tracing::info!(
        frames = summary.stats.frames,
        workers = summary.reports.len(),
        run_digest = %format!("{:08x}", summary.canvas.run_digest()),
        "done"
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run staged simulation scenes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build every module and verify wiring without starting workers.
    Check {
        /// Scene description.
        scene: PathBuf,
    },
    /// Run a scene and report the final frame of every object.
    Run {
        /// Scene description.
        scene: PathBuf,
        /// Frames to render; overrides the scene.
        #[arg(short, long)]
        frames: Option<u64>,
    },
}
