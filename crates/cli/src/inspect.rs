// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{write_json, EXIT_CONFIG_ERROR, EXIT_OK, EXIT_SETUP_FAULT};
use clap::Parser;
use labwired_config::SessionManifest;
use labwired_core::{ChannelState, SessionPaths};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Inspect all three channels of this session manifest
    #[arg(short, long)]
    manifest: Option<PathBuf>,

    /// Channel file to inspect (repeatable)
    #[arg(long)]
    channel: Vec<PathBuf>,

    /// Payload words to include per channel
    #[arg(long, default_value = "4")]
    words: usize,
}

pub fn run(args: InspectArgs) -> ExitCode {
    let mut files = Vec::new();
    if let Some(path) = &args.manifest {
        match SessionManifest::from_file(path) {
            Ok(manifest) => {
                let paths = SessionPaths::new(&manifest.channels.dir, &manifest.name);
                files.extend(paths.iter().map(PathBuf::from));
            }
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        }
    }
    files.extend(args.channel.iter().cloned());

    if files.is_empty() {
        error!("Nothing to inspect: pass --manifest or --channel");
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let mut states = Vec::with_capacity(files.len());
    for file in &files {
        match ChannelState::read(file, args.words) {
            Ok(state) => states.push(state),
            Err(e) => {
                error!("{}", e);
                return ExitCode::from(EXIT_SETUP_FAULT);
            }
        }
    }

    match write_json(None, &states) {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_SETUP_FAULT)
        }
    }
}
