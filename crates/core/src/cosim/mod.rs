// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Co-simulation link between an external tester and a cycle-stepped model.
//!
//! A session uses three [`shm::Channel`]s: commands flow tester to simulator,
//! input tokens flow tester to simulator, and output tokens (plus every
//! command response) flow simulator to tester.

pub mod dispatcher;
pub mod protocol;
pub mod shm;
pub mod tester;

use crate::signals::SignalTable;
use protocol::COMMAND_PAYLOAD_BYTES;
use shm::{Channel, ChannelError, Role};
use std::path::{Path, PathBuf};

const WORD_BYTES: usize = std::mem::size_of::<u64>();

/// File names of the three channels of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub command: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl SessionPaths {
    pub fn new(dir: impl AsRef<Path>, name: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            command: dir.join(format!("{}.cmd", name)),
            input: dir.join(format!("{}.in", name)),
            output: dir.join(format!("{}.out", name)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [&self.command, &self.input, &self.output]
            .into_iter()
            .map(PathBuf::as_path)
    }
}

/// Payload sizes in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSizes {
    pub command: usize,
    pub input: usize,
    pub output: usize,
}

impl ChannelSizes {
    /// Token channels must hold a whole batch as well as the widest single
    /// signal, since POKE and PEEK values travel on them too.
    pub fn for_table(table: &SignalTable) -> Self {
        let widest = table.max_signal_words();
        Self {
            command: COMMAND_PAYLOAD_BYTES,
            input: table.input_words().max(widest) * WORD_BYTES,
            output: table.output_words().max(widest) * WORD_BYTES,
        }
    }

    /// Grow both token channels to hold a single value of `words` words.
    pub fn covering(mut self, words: usize) -> Self {
        self.input = self.input.max(words * WORD_BYTES);
        self.output = self.output.max(words * WORD_BYTES);
        self
    }

    pub fn with_command_bytes(mut self, bytes: usize) -> Self {
        self.command = bytes;
        self
    }
}

/// The three mapped channels of one session, all playing the same role.
#[derive(Debug)]
pub struct Channels {
    pub command: Channel,
    pub input: Channel,
    pub output: Channel,
}

impl Channels {
    /// Create and size all three files. Used by the simulator, which owns
    /// the session.
    pub fn create(paths: &SessionPaths, sizes: ChannelSizes) -> Result<Self, ChannelError> {
        Ok(Self {
            command: Channel::create(&paths.command, sizes.command, Role::Simulator)?,
            input: Channel::create(&paths.input, sizes.input, Role::Simulator)?,
            output: Channel::create(&paths.output, sizes.output, Role::Simulator)?,
        })
    }

    /// Map channels the simulator already created.
    pub fn attach(paths: &SessionPaths) -> Result<Self, ChannelError> {
        Ok(Self {
            command: Channel::open(&paths.command, Role::Tester)?,
            input: Channel::open(&paths.input, Role::Tester)?,
            output: Channel::open(&paths.output, Role::Tester)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::Width;
    use crate::signals::{Direction, SignalRef};

    fn sref(slot: usize, bits: u32) -> SignalRef {
        SignalRef {
            slot,
            width: Width::from_bits(bits).unwrap(),
        }
    }

    #[test]
    fn test_session_paths() {
        let paths = SessionPaths::new("/tmp/adept", "adept");
        assert_eq!(paths.command, PathBuf::from("/tmp/adept/adept.cmd"));
        assert_eq!(paths.input, PathBuf::from("/tmp/adept/adept.in"));
        assert_eq!(paths.output, PathBuf::from("/tmp/adept/adept.out"));
        assert_eq!(paths.iter().count(), 3);
    }

    #[test]
    fn test_sizes_cover_widest_signal() {
        let mut table = SignalTable::new();
        table.register("t.a", sref(0, 1), Direction::Input).unwrap();
        table.register("t.b", sref(1, 32), Direction::Output).unwrap();
        table.register("t.c", sref(2, 32), Direction::Output).unwrap();
        table.register("t.wide", sref(3, 512), Direction::Internal).unwrap();

        let sizes = ChannelSizes::for_table(&table);
        assert_eq!(sizes.command, 1024);
        assert_eq!(sizes.input, 8 * 8);
        assert_eq!(sizes.output, 8 * 8);
        assert_eq!(sizes.with_command_bytes(4096).command, 4096);
    }

    #[test]
    fn test_sizes_cover_model_hint() {
        let mut table = SignalTable::new();
        table.register("t.a", sref(0, 8), Direction::Output).unwrap();

        let sizes = ChannelSizes::for_table(&table).covering(34);
        assert_eq!(sizes.input, 34 * 8);
        assert_eq!(sizes.output, 34 * 8);
        // Never shrinks.
        assert_eq!(sizes.covering(1), sizes);
    }

    #[test]
    fn test_sizes_for_batches() {
        let mut table = SignalTable::new();
        for i in 0..5 {
            table
                .register(format!("t.i{}", i), sref(i, 64), Direction::Input)
                .unwrap();
        }
        let sizes = ChannelSizes::for_table(&table);
        assert_eq!(sizes.input, 5 * 8);
        assert_eq!(sizes.output, 8);
    }

    #[test]
    fn test_create_then_attach() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::new(dir.path(), "s");
        let sim = Channels::create(
            &paths,
            ChannelSizes {
                command: 1024,
                input: 64,
                output: 64,
            },
        )
        .unwrap();
        let tester = Channels::attach(&paths).unwrap();

        assert_eq!(sim.command.role(), Role::Simulator);
        assert_eq!(tester.output.role(), Role::Tester);
        assert_eq!(sim.input.map_size(), tester.input.map_size());
    }

    #[test]
    fn test_attach_without_simulator_fails() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::new(dir.path(), "absent");
        assert!(Channels::attach(&paths).is_err());
    }
}
