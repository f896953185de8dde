//! Cartwheel - game library and wasm emulator-core host
//!
//! Command-line entry point.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use cw_core::{Config, logging};
use cw_integration::{EmulatorRunner, Library};
use cw_session::{FrameBufferSurface, FsModuleFetcher, SessionState, SurfaceBinding};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "cartwheel", version, about = "Game library and wasm emulator-core host")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List supported systems
    Systems,
    /// Import game or firmware files into the library
    Import { files: Vec<PathBuf> },
    /// Fill a system's firmware slot from any file
    ImportFirmware { system: String, file: PathBuf },
    /// List games, firmware and save states
    List,
    /// Delete a stored asset or save state
    Delete { name: String },
    /// Write a stored asset or save state to a file
    Export { name: String, dest: PathBuf },
    /// Run a stored game
    Run {
        name: String,
        /// Advance exactly this many frames, headless
        #[arg(long, conflicts_with = "seconds")]
        frames: Option<u64>,
        /// Run in real time for this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<f64>,
    },
    /// Run a game for some frames, then save its state slot
    SaveState {
        name: String,
        #[arg(long, default_value_t = 0)]
        frames: u64,
    },
    /// Restore a game from its state slot, then run some frames
    LoadState {
        name: String,
        #[arg(long, default_value_t = 0)]
        frames: u64,
    },
    /// Run a game for some frames, then write its state to a file
    ExportState {
        name: String,
        dest: PathBuf,
        #[arg(long, default_value_t = 0)]
        frames: u64,
    },
    /// Restore a game from a state file and keep it in the game's state slot
    ImportState {
        name: String,
        file: PathBuf,
        /// System the state was captured on
        #[arg(long)]
        system: String,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    config.map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))
}

fn print(json: bool, value: serde_json::Value, text: impl FnOnce() -> String) {
    if json {
        println!("{value}");
    } else {
        println!("{}", text());
    }
}

fn headless(library: Library, config: &Config) -> (EmulatorRunner, FrameBufferSurface) {
    let fetcher = Arc::new(FsModuleFetcher::new(&config.paths.modules_dir));
    let surface = FrameBufferSurface::new();
    let runner = EmulatorRunner::headless(
        library,
        fetcher,
        SurfaceBinding::new(surface.clone()),
        config,
    );
    (runner, surface)
}

async fn started(library: Library, config: &Config, name: &str) -> anyhow::Result<EmulatorRunner> {
    let (mut runner, _) = headless(library, config);
    runner
        .start(name)
        .await
        .with_context(|| format!("failed to start '{name}'"))?;
    if runner.state() == SessionState::Loaded {
        runner.resume()?;
    }
    Ok(runner)
}

async fn run_realtime(
    library: Library,
    config: &Config,
    name: &str,
    seconds: Option<f64>,
) -> anyhow::Result<u64> {
    let fetcher = Arc::new(FsModuleFetcher::new(&config.paths.modules_dir));
    let (mut runner, driver) =
        EmulatorRunner::realtime(library, fetcher, SurfaceBinding::headless(), config);
    let shutdown = CancellationToken::new();
    let driver = tokio::spawn(driver.run(shutdown.clone()));

    runner.start(name).await?;
    if runner.state() == SessionState::Loaded {
        runner.resume()?;
    }

    match seconds {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await
        }
        Some(seconds) => bail!("invalid duration: {seconds}"),
        None => tokio::signal::ctrl_c().await?,
    }

    runner.stop()?;
    let frames = runner.frames_advanced();
    runner.close();
    shutdown.cancel();
    driver.await?;
    Ok(frames)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    logging::init(config.debug.log_level);
    tracing::debug!("Starting cartwheel");

    let library = Library::open(&config).await?;
    let json = cli.json;

    match cli.command {
        Command::Systems => {
            let systems: Vec<_> = library.registry().systems().collect();
            print(json, serde_json::to_value(&systems)?, || {
                systems
                    .iter()
                    .map(|s| {
                        format!(
                            "{:<5} {:<32} .{:<12} {:>8.4} Hz  {}",
                            s.system_id,
                            s.name,
                            s.accepted_extensions.join(" ."),
                            s.frame_rate_hz,
                            s.firmware_key.as_deref().unwrap_or("-"),
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            });
        }
        Command::Import { files } => {
            for file in files {
                let entry = library
                    .import_file(&file)
                    .await
                    .with_context(|| format!("failed to import {}", file.display()))?;
                print(
                    json,
                    json!({
                        "name": entry.name,
                        "kind": entry.class.kind,
                        "system": entry.class.system_id,
                    }),
                    || format!("imported {} ({})", entry.name, entry.class.system_id),
                );
            }
        }
        Command::ImportFirmware { system, file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let entry = library.import_firmware(&system, &bytes).await?;
            print(
                json,
                json!({ "name": entry.name, "system": entry.class.system_id }),
                || format!("firmware for {} stored as {}", entry.class.system_id, entry.name),
            );
        }
        Command::List => {
            let games = library.list_games().await?;
            let firmware = library.list_firmware().await?;
            let states = library.list_states().await?;
            let value = json!({
                "games": games.iter().map(|e| json!({ "name": e.name, "system": e.class.system_id })).collect::<Vec<_>>(),
                "firmware": firmware.iter().map(|e| json!({ "name": e.name, "system": e.class.system_id })).collect::<Vec<_>>(),
                "states": states.iter().map(|s| json!({ "key": s.key, "system": s.system_id })).collect::<Vec<_>>(),
            });
            print(json, value, || {
                let mut lines = Vec::new();
                lines.extend(games.iter().map(|e| format!("game      {:<5} {}", e.class.system_id, e.name)));
                lines.extend(firmware.iter().map(|e| format!("firmware  {:<5} {}", e.class.system_id, e.name)));
                lines.extend(states.iter().map(|s| format!("state     {:<5} {}", s.system_id, s.key)));
                lines.join("\n")
            });
        }
        Command::Delete { name } => {
            library.delete(&name).await?;
            print(json, json!({ "deleted": name }), || format!("deleted {name}"));
        }
        Command::Export { name, dest } => {
            let len = library.export(&name, &dest).await?;
            print(json, json!({ "name": name, "bytes": len }), || {
                format!("wrote {len} bytes to {}", dest.display())
            });
        }
        Command::Run {
            name,
            frames: Some(frames),
            ..
        } => {
            let (mut runner, surface) = headless(library, &config);
            runner.start(&name).await?;
            if runner.state() == SessionState::Loaded {
                runner.resume()?;
            }
            let advanced = runner.step(frames)?;
            runner.stop()?;
            let presented = surface.presented();
            runner.close();
            print(
                json,
                json!({ "name": name, "frames": advanced, "presented": presented }),
                || format!("{name}: {advanced} frames ({presented} presented)"),
            );
            if advanced < frames {
                bail!("session stopped after {advanced} of {frames} frames");
            }
        }
        Command::Run { name, seconds, .. } => {
            let frames = run_realtime(library, &config, &name, seconds).await?;
            print(json, json!({ "name": name, "frames": frames }), || {
                format!("{name}: {frames} frames")
            });
        }
        Command::SaveState { name, frames } => {
            let mut runner = started(library, &config, &name).await?;
            runner.step(frames)?;
            let key = runner.save_state().await?;
            runner.close();
            print(json, json!({ "key": key }), || format!("saved {key}"));
        }
        Command::LoadState { name, frames } => {
            let mut runner = started(library, &config, &name).await?;
            runner.load_state().await?;
            let advanced = runner.step(frames)?;
            runner.close();
            print(json, json!({ "name": name, "frames": advanced }), || {
                format!("restored {name}, then ran {advanced} frames")
            });
        }
        Command::ExportState { name, dest, frames } => {
            let mut runner = started(library, &config, &name).await?;
            runner.step(frames)?;
            let snapshot = runner.export_state(&dest).await?;
            runner.close();
            print(
                json,
                json!({ "system": snapshot.system_id, "bytes": snapshot.len() }),
                || format!("wrote {} bytes of {} state to {}", snapshot.len(), snapshot.system_id, dest.display()),
            );
        }
        Command::ImportState { name, file, system } => {
            let mut runner = started(library, &config, &name).await?;
            runner.import_state(&file, &system).await?;
            let key = runner.save_state().await?;
            runner.close();
            print(json, json!({ "key": key }), || format!("imported state into {key}"));
        }
    }

    Ok(())
}
