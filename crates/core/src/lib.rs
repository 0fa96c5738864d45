// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod cosim;
pub mod free_run;
pub mod marshal;
pub mod model;
pub mod signals;

pub use cosim::dispatcher::{DispatchState, Dispatcher, SessionSummary, TickOutcome};
pub use cosim::protocol::{Command, UNRESOLVED_ID};
pub use cosim::shm::{Channel, ChannelError, ChannelState, Role};
pub use cosim::tester::Tester;
pub use cosim::{ChannelSizes, Channels, SessionPaths};
pub use free_run::{run_free, FreeRunLimits, FreeRunSummary, DEFAULT_RESET_CYCLES};
pub use marshal::{MarshalError, NativeValue, Width};
pub use model::{SimClock, SimModel};
pub use signals::{Direction, SignalId, SignalRef, SignalTable};

/// Process exit code for a channel setup failure.
pub const EXIT_SETUP_FAULT: u8 = 1;
/// Process exit code when the tester addresses a signal the simulator does
/// not know, which means the two sides were built from different designs.
pub const EXIT_PROTOCOL_FAULT: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum CosimError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    #[error("{command:?} references unknown signal id {id}")]
    UnknownSignal { command: Command, id: u64 },
    #[error("duplicate signal {0}")]
    DuplicateSignal(String),
    #[error("invalid session manifest: {0}")]
    InvalidManifest(String),
    #[error("free run needs a success signal or a cycle limit")]
    Unbounded,
}

impl CosimError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CosimError::UnknownSignal { .. } => EXIT_PROTOCOL_FAULT,
            _ => EXIT_SETUP_FAULT,
        }
    }
}

pub type CosimResult<T> = Result<T, CosimError>;
