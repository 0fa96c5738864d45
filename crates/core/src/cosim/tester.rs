// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Driver-side half of the link.
//!
//! The simulator publishes an output batch at the start of every iteration,
//! and that batch shares the output channel with command responses. The
//! tester therefore drains it before issuing the next command.

use crate::cosim::protocol::{Command, UNRESOLVED_ID};
use crate::cosim::shm::ChannelError;
use crate::cosim::{Channels, SessionPaths};
use crate::signals::SignalId;
use std::convert::Infallible;
use tracing::debug;

pub struct Tester {
    channels: Channels,
    output_words: usize,
    outputs: Vec<u64>,
    /// The simulator owes us an output batch.
    outputs_pending: bool,
}

impl Tester {
    pub fn new(channels: Channels, output_words: usize) -> Self {
        Self {
            channels,
            output_words,
            outputs: vec![0; output_words],
            outputs_pending: true,
        }
    }

    /// Map the channels of a running simulator.
    pub fn attach(paths: &SessionPaths, output_words: usize) -> Result<Self, ChannelError> {
        Ok(Self::new(Channels::attach(paths)?, output_words))
    }

    fn sync(&mut self) {
        if !self.outputs_pending {
            return;
        }
        let n = self.output_words;
        let batch = self.channels.output.recv(|payload| {
            Ok::<_, Infallible>(payload.iter().take(n).copied().collect::<Vec<_>>())
        });
        self.outputs = match batch {
            Ok(words) => words,
            Err(never) => match never {},
        };
        self.outputs_pending = false;
    }

    /// Output tokens published at the start of the current iteration.
    pub fn recv_outputs(&mut self) -> &[u64] {
        self.sync();
        &self.outputs
    }

    fn command(&mut self, command: Command) {
        self.sync();
        debug!("Sending {:?}", command);
        self.channels.command.send_word(command.into());
    }

    fn command_with_id(&mut self, command: Command, id: SignalId) {
        self.command(command);
        self.channels.command.send_word(id.0);
    }

    /// Input payloads are checked before the verb goes out, since a verb
    /// without its operand would leave the simulator waiting forever.
    fn check_inputs(&self, words: &[u64]) -> Result<(), ChannelError> {
        let capacity = self.channels.input.capacity_words();
        if words.len() > capacity {
            return Err(ChannelError::PayloadOverflow {
                len: words.len() * 8,
                capacity: capacity * 8,
            });
        }
        Ok(())
    }

    fn send_inputs(&mut self, words: &[u64]) {
        let _ = self.channels.input.send(|payload| {
            payload[..words.len()].copy_from_slice(words);
            Ok::<_, Infallible>(())
        });
    }

    fn end_iteration(&mut self) -> &[u64] {
        self.outputs_pending = true;
        self.recv_outputs()
    }

    /// Reset the model. Returns the outputs of the next iteration.
    pub fn reset(&mut self) -> &[u64] {
        self.command(Command::Reset);
        self.end_iteration()
    }

    /// Drive one input batch and clock a cycle.
    pub fn step(&mut self, inputs: &[u64]) -> Result<&[u64], ChannelError> {
        self.check_inputs(inputs)?;
        self.command(Command::Step);
        self.send_inputs(inputs);
        Ok(self.end_iteration())
    }

    /// Drive one input batch and re-settle without clocking.
    pub fn update(&mut self, inputs: &[u64]) -> Result<&[u64], ChannelError> {
        self.check_inputs(inputs)?;
        self.command(Command::Update);
        self.send_inputs(inputs);
        Ok(self.end_iteration())
    }

    pub fn poke(&mut self, id: SignalId, value: &[u64]) -> Result<(), ChannelError> {
        self.check_inputs(value)?;
        self.command_with_id(Command::Poke, id);
        self.send_inputs(value);
        Ok(())
    }

    pub fn force(&mut self, id: SignalId, value: &[u64]) -> Result<(), ChannelError> {
        self.check_inputs(value)?;
        self.command_with_id(Command::Force, id);
        self.send_inputs(value);
        Ok(())
    }

    /// Words a signal occupies on the wire.
    pub fn word_count(&mut self, id: SignalId) -> usize {
        self.command_with_id(Command::GetChk, id);
        self.channels.output.recv_word() as usize
    }

    /// Read a signal, asking the simulator for its width first.
    pub fn peek(&mut self, id: SignalId) -> Vec<u64> {
        let n = self.word_count(id);
        self.peek_words(id, n)
    }

    /// Read a signal whose word count is already known.
    pub fn peek_words(&mut self, id: SignalId, words: usize) -> Vec<u64> {
        self.command_with_id(Command::Peek, id);
        let value = self.channels.output.recv(|payload| {
            Ok::<_, Infallible>(payload.iter().take(words).copied().collect::<Vec<_>>())
        });
        match value {
            Ok(words) => words,
            Err(never) => match never {},
        }
    }

    /// Look up a signal id by name. `None` when the simulator does not know it.
    pub fn resolve(&mut self, name: &str) -> Result<Option<SignalId>, ChannelError> {
        let capacity = self.channels.command.capacity_bytes();
        if name.len() >= capacity {
            return Err(ChannelError::PayloadOverflow {
                len: name.len() + 1,
                capacity,
            });
        }
        self.command(Command::GetId);
        self.channels.command.send_str(name)?;
        let id = self.channels.output.recv_word();
        Ok((id != UNRESOLVED_ID).then_some(SignalId(id)))
    }

    /// End the session. The simulator publishes nothing after FIN.
    pub fn finish(&mut self) {
        self.command(Command::Finish);
    }

    /// Last output batch received, without waiting.
    pub fn last_outputs(&self) -> &[u64] {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosim::ChannelSizes;

    #[test]
    fn test_oversized_operands_are_rejected_before_the_verb() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::new(dir.path(), "t");
        let sim = Channels::create(
            &paths,
            ChannelSizes {
                command: 16,
                input: 8,
                output: 8,
            },
        )
        .unwrap();
        let mut tester = Tester::attach(&paths, 1).unwrap();
        // Nothing to drain yet; pretend the first batch was already read.
        tester.outputs_pending = false;

        let too_many = vec![0u64; sim.input.capacity_words() + 1];
        assert!(matches!(
            tester.step(&too_many),
            Err(ChannelError::PayloadOverflow { .. })
        ));
        assert!(tester.poke(SignalId(0), &too_many).is_err());

        let long_name = "x".repeat(sim.command.capacity_bytes());
        assert!(tester.resolve(&long_name).is_err());

        assert!(sim.command.is_ready());
        assert!(sim.input.is_ready());
    }
}
