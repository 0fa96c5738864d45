// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

/// Command channel payload size when nothing else is configured.
pub const COMMAND_PAYLOAD_BYTES: usize = 1024;

/// GETID response for a name neither the table nor the model knows (-1).
pub const UNRESOLVED_ID: u64 = labwired_config::RESERVED_SIGNAL_ID;

/// Verb words written to the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum Command {
    Reset = 0,
    Step = 1,
    Update = 2,
    Poke = 3,
    Peek = 4,
    Force = 5,
    GetId = 6,
    GetChk = 7,
    Finish = 8,
}

impl Command {
    /// Commands that close an outer iteration and trigger a fresh output publish.
    pub fn ends_iteration(self) -> bool {
        matches!(
            self,
            Command::Reset | Command::Step | Command::Update | Command::Finish
        )
    }

    /// Commands followed by a signal id on the command channel.
    pub fn takes_id(self) -> bool {
        matches!(
            self,
            Command::Poke | Command::Peek | Command::Force | Command::GetChk
        )
    }
}

impl TryFrom<u64> for Command {
    type Error = u64;

    fn try_from(word: u64) -> Result<Self, u64> {
        Ok(match word {
            0 => Command::Reset,
            1 => Command::Step,
            2 => Command::Update,
            3 => Command::Poke,
            4 => Command::Peek,
            5 => Command::Force,
            6 => Command::GetId,
            7 => Command::GetChk,
            8 => Command::Finish,
            other => return Err(other),
        })
    }
}

impl From<Command> for u64 {
    fn from(cmd: Command) -> u64 {
        cmd as u64
    }
}
