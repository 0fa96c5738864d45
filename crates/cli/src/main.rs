// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use labwired_config::{SessionManifest, SignalRole};
use labwired_core::model::RegisterModel;
use labwired_core::{
    run_free, ChannelSizes, Channels, Dispatcher, FreeRunLimits, SessionPaths, SimModel,
    DEFAULT_RESET_CYCLES,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

mod drive;
mod inspect;

const EXIT_OK: u8 = 0;
const EXIT_SETUP_FAULT: u8 = labwired_core::EXIT_SETUP_FAULT;
const EXIT_CONFIG_ERROR: u8 = 3;
const EXIT_ASSERT_FAIL: u8 = 4;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "LabWired co-simulation link",
    long_about = None
)]
struct Cli {
    /// Log every command at DEBUG level
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the session channels and serve a register model until FIN.
    Serve(ServeArgs),

    /// Clock the register model on its own until success or a cycle limit.
    Run(RunArgs),

    /// Attach to a running simulator and play a drive script (YAML).
    Drive(drive::DriveArgs),

    /// Dump the header of channel files as JSON without joining the protocol.
    Inspect(inspect::InspectArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Path to the session manifest (YAML)
    #[arg(short, long)]
    manifest: PathBuf,

    /// Reset cycles applied before the first command
    #[arg(long, default_value_t = DEFAULT_RESET_CYCLES)]
    reset_cycles: u64,

    /// Write the session summary (JSON) here instead of stdout
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the session manifest (YAML)
    #[arg(short, long)]
    manifest: PathBuf,

    /// Stop after this many cycles past reset
    #[arg(long)]
    max_cycles: Option<u64>,

    /// Reset cycles applied before running
    #[arg(long, default_value_t = DEFAULT_RESET_CYCLES)]
    reset_cycles: u64,

    /// Write the run summary (JSON) here instead of stdout
    #[arg(long)]
    summary: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for JSON.
    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Serve(args) => run_serve(args),
        Commands::Run(args) => run_free_running(args),
        Commands::Drive(args) => drive::run(args),
        Commands::Inspect(args) => inspect::run(args),
    }
}

fn run_serve(args: ServeArgs) -> ExitCode {
    let manifest = match SessionManifest::from_file(&args.manifest) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let command_bytes = match manifest.command_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let (model, table) = match RegisterModel::from_manifest(&manifest) {
        Ok(built) => built,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let paths = SessionPaths::new(&manifest.channels.dir, &manifest.name);
    let sizes = ChannelSizes::for_table(&table)
        .covering(model.widest_signal_words())
        .with_command_bytes(command_bytes);
    let channels = match Channels::create(&paths, sizes) {
        Ok(c) => c,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_SETUP_FAULT);
        }
    };
    info!(
        "Session '{}' listening on {:?}, {:?}, {:?}",
        manifest.name, paths.command, paths.input, paths.output
    );

    let mut dispatcher = Dispatcher::new(model, table, channels);
    dispatcher.apply_initial_reset(args.reset_cycles);

    match dispatcher.run() {
        Ok(summary) => match write_json(args.summary.as_deref(), &summary) {
            Ok(()) => ExitCode::from(EXIT_OK),
            Err(e) => {
                error!("{:#}", e);
                ExitCode::from(EXIT_SETUP_FAULT)
            }
        },
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn run_free_running(args: RunArgs) -> ExitCode {
    let manifest = match SessionManifest::from_file(&args.manifest) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let success = manifest.signal_with_role(SignalRole::Success);
    if success.is_none() && args.max_cycles.is_none() {
        error!("Nothing would stop the run: give --max-cycles or a signal with role 'success'");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }
    let (mut model, _) = match RegisterModel::from_manifest(&manifest) {
        Ok(built) => built,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let success = success.and_then(|decl| model.signal(&decl.name));

    let limits = FreeRunLimits {
        reset_cycles: args.reset_cycles,
        max_cycles: args.max_cycles,
    };
    info!("Running '{}' on its own ({:?})", manifest.top, limits);
    match run_free(&mut model, success, limits) {
        Ok(summary) => match write_json(args.summary.as_deref(), &summary) {
            Ok(()) => ExitCode::from(EXIT_OK),
            Err(e) => {
                error!("{:#}", e);
                ExitCode::from(EXIT_SETUP_FAULT)
            }
        },
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

/// Pretty-print `value` to `path`, or to stdout when no path is given.
pub(crate) fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> anyhow::Result<()> {
    use anyhow::Context;

    let json = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;
    match path {
        Some(path) => std::fs::write(path, json + "\n")
            .with_context(|| format!("Failed to write {:?}", path))?,
        None => println!("{}", json),
    }
    Ok(())
}
