// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Simulator-side command loop.
//!
//! Each outer iteration publishes the current output tokens, then serves
//! commands until one of RESET, STEP, UPDATE or FIN closes the iteration.

use crate::cosim::protocol::{Command, UNRESOLVED_ID};
use crate::cosim::Channels;
use crate::marshal::{from_words, pack_batch, to_words, unpack_batch, NativeValue, Width};
use crate::model::{SimClock, SimModel};
use crate::signals::{Direction, SignalId, SignalRef, SignalTable};
use crate::{CosimError, CosimResult};
use serde::Serialize;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    AwaitingCommand,
    Executing(Command),
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Finished,
}

/// Counters reported when a session ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub cycles: u64,
    pub resets: u64,
    pub updates: u64,
    pub commands: u64,
    /// Simulation time in half-cycle ticks.
    pub sim_time: u64,
}

enum Flow {
    Continue,
    EndIteration,
    Finish,
}

pub struct Dispatcher<M: SimModel> {
    model: M,
    table: SignalTable,
    channels: Channels,
    clock: SimClock,
    inputs: Vec<SignalRef>,
    outputs: Vec<SignalRef>,
    /// A RESET ran last iteration and `clear_reset` is still owed.
    pending_start: bool,
    state: DispatchState,
    summary: SessionSummary,
}

impl<M: SimModel> Dispatcher<M> {
    /// Token batch layout is fixed here from the table's inputs and outputs.
    pub fn new(model: M, table: SignalTable, channels: Channels) -> Self {
        let resolve = |ids: &[SignalId]| -> Vec<SignalRef> {
            ids.iter().filter_map(|id| table.get(*id)).collect()
        };
        let inputs = resolve(table.inputs());
        let outputs = resolve(table.outputs());

        Self {
            model,
            table,
            channels,
            clock: SimClock::new(),
            inputs,
            outputs,
            pending_start: false,
            state: DispatchState::AwaitingCommand,
            summary: SessionSummary::default(),
        }
    }

    /// Hold the model in reset for `cycles` cycles before serving.
    pub fn apply_initial_reset(&mut self, cycles: u64) {
        if cycles == 0 {
            return;
        }
        for _ in 0..cycles {
            self.model.apply_reset(&mut self.clock);
            self.summary.resets += 1;
        }
        self.model.clear_reset();
        debug!("Applied {} initial reset cycles", cycles);
    }

    /// Serve until the tester sends FIN.
    pub fn run(&mut self) -> CosimResult<SessionSummary> {
        info!(
            "Serving co-simulation: {} inputs ({} words), {} outputs ({} words)",
            self.inputs.len(),
            self.table.input_words(),
            self.outputs.len(),
            self.table.output_words()
        );
        while self.tick()? == TickOutcome::Continue {}

        let summary = self.summary();
        info!(
            "Session finished after {} cycles and {} commands",
            summary.cycles, summary.commands
        );
        Ok(summary)
    }

    /// One outer iteration.
    pub fn tick(&mut self) -> CosimResult<TickOutcome> {
        if self.state == DispatchState::Finished {
            return Ok(TickOutcome::Finished);
        }

        self.publish_outputs()?;

        if self.pending_start {
            self.model.clear_reset();
            self.pending_start = false;
        }

        loop {
            self.state = DispatchState::AwaitingCommand;
            let word = self.channels.command.recv_word();
            let command = match Command::try_from(word) {
                Ok(command) => command,
                Err(word) => {
                    warn!("Ignoring unknown command word {}", word);
                    continue;
                }
            };

            self.state = DispatchState::Executing(command);
            self.summary.commands += 1;
            debug!("Executing {:?} at t={}", command, self.clock.now());

            match self.execute(command)? {
                Flow::Continue => {}
                Flow::EndIteration => {
                    self.state = DispatchState::AwaitingCommand;
                    return Ok(TickOutcome::Continue);
                }
                Flow::Finish => {
                    self.state = DispatchState::Finished;
                    return Ok(TickOutcome::Finished);
                }
            }
        }
    }

    fn execute(&mut self, command: Command) -> CosimResult<Flow> {
        match command {
            Command::Reset => {
                self.model.apply_reset(&mut self.clock);
                self.pending_start = true;
                self.summary.resets += 1;
                Ok(Flow::EndIteration)
            }
            Command::Step => {
                self.apply_inputs()?;
                self.model.evaluate_cycle(&mut self.clock);
                self.summary.cycles += 1;
                Ok(Flow::EndIteration)
            }
            Command::Update => {
                self.apply_inputs()?;
                self.model.resettle(&self.clock);
                self.summary.updates += 1;
                Ok(Flow::EndIteration)
            }
            Command::Poke | Command::Force => {
                let signal = self.read_signal_id(command)?;
                let value = self
                    .channels
                    .input
                    .recv(|payload| from_words(signal.width, payload))?;
                self.model
                    .write_signal(signal, value, command == Command::Force);
                Ok(Flow::Continue)
            }
            Command::Peek => {
                let signal = self.read_signal_id(command)?;
                let value = self.model.read_signal(signal);
                self.channels
                    .output
                    .send(|payload| to_words(signal.width, &value, payload))?;
                Ok(Flow::Continue)
            }
            Command::GetId => {
                let name = self.channels.command.recv_str();
                let id = self.resolve_name(&name);
                self.channels.output.send_word(id);
                Ok(Flow::Continue)
            }
            Command::GetChk => {
                let signal = self.read_signal_id(command)?;
                self.channels
                    .output
                    .send_word(signal.width.word_count() as u64);
                Ok(Flow::Continue)
            }
            Command::Finish => {
                self.model.shutdown();
                Ok(Flow::Finish)
            }
        }
    }

    fn publish_outputs(&mut self) -> CosimResult<()> {
        let values: Vec<(Width, NativeValue)> = self
            .outputs
            .iter()
            .map(|s| (s.width, self.model.read_signal(*s)))
            .collect();
        self.channels
            .output
            .send(|payload| pack_batch(values.iter().map(|(w, v)| (*w, v)), payload))?;
        Ok(())
    }

    fn apply_inputs(&mut self) -> CosimResult<()> {
        let widths: Vec<Width> = self.inputs.iter().map(|s| s.width).collect();
        let values = self
            .channels
            .input
            .recv(|payload| unpack_batch(widths, payload))?;
        for (signal, value) in self.inputs.iter().zip(values) {
            self.model.write_signal(*signal, value, false);
        }
        Ok(())
    }

    /// Read the id operand of `command` and look it up. A miss means the two
    /// sides disagree on the design, so the session is torn down.
    fn read_signal_id(&mut self, command: Command) -> CosimResult<SignalRef> {
        let id = self.channels.command.recv_word();
        match self.table.get(SignalId(id)) {
            Some(signal) => Ok(signal),
            None => {
                error!("{:?} references unknown signal id {}", command, id);
                self.model.shutdown();
                self.state = DispatchState::Finished;
                Err(CosimError::UnknownSignal { command, id })
            }
        }
    }

    fn resolve_name(&mut self, name: &str) -> u64 {
        if let Some(id) = self.table.lookup(name) {
            return id.0;
        }

        let Some(signal) = self.model.search(name) else {
            warn!("Signal '{}' not found", name);
            return UNRESOLVED_ID;
        };

        // The same model variable may already be exposed under another name.
        if let Some(id) = self.table.find_slot(signal.slot) {
            self.table.alias(name, id);
            return id.0;
        }

        // A value that cannot cross the token channels would wedge the first
        // PEEK or POKE on it, so it is reported as unresolved instead.
        let words = signal.width.word_count();
        let room = self
            .channels
            .input
            .capacity_words()
            .min(self.channels.output.capacity_words());
        if words > room {
            warn!(
                "Signal '{}' needs {} words but the token channels hold {}",
                name, words, room
            );
            return UNRESOLVED_ID;
        }

        match self.table.register(name, signal, Direction::Internal) {
            Ok(id) => {
                debug!("Registered '{}' as id {}", name, id);
                id.0
            }
            Err(e) => {
                warn!("Could not register '{}': {}", name, e);
                UNRESOLVED_ID
            }
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut M {
        &mut self.model
    }

    pub fn into_model(self) -> M {
        self.model
    }

    pub fn table(&self) -> &SignalTable {
        &self.table
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn clock(&self) -> SimClock {
        self.clock
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            sim_time: self.clock.now(),
            ..self.summary.clone()
        }
    }
}
