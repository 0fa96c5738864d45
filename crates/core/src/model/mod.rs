// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod register;

pub use register::RegisterModel;

use crate::marshal::NativeValue;
use crate::signals::SignalRef;

/// Simulation time in half-cycle ticks, owned by the dispatcher and lent to
/// the model whenever a hook may advance it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimClock {
    ticks: u64,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time stamp, as a waveform dump would record it.
    pub fn now(&self) -> u64 {
        self.ticks
    }

    /// Advance by one clock edge.
    pub fn tick(&mut self) {
        self.ticks += 1;
    }

    /// Full clock cycles elapsed.
    pub fn cycles(&self) -> u64 {
        self.ticks / 2
    }
}

/// The hardware model the dispatcher drives.
///
/// The dispatcher never interprets signal contents; it only moves
/// `NativeValue`s between the model and the channels.
pub trait SimModel {
    /// Advance by exactly one evaluated clock cycle.
    fn evaluate_cycle(&mut self, clock: &mut SimClock);

    /// Re-settle combinational logic without advancing the clock.
    fn resettle(&mut self, clock: &SimClock);

    /// Assert reset and clock it through.
    fn apply_reset(&mut self, clock: &mut SimClock);

    /// Post-reset start hook, e.g. deasserting the reset line.
    fn clear_reset(&mut self);

    fn shutdown(&mut self);

    fn read_signal(&self, signal: SignalRef) -> NativeValue;

    /// `force` asks the model to bypass whatever interlock it applies to
    /// driven values; what that means is up to the model.
    fn write_signal(&mut self, signal: SignalRef, value: NativeValue, force: bool);

    /// Look up a signal the session did not pre-register.
    fn search(&mut self, _name: &str) -> Option<SignalRef> {
        None
    }

    /// Word count of the widest signal `search` can ever return. Token
    /// channels are sized to at least this, so PEEK and POKE work on
    /// anything GETID resolves.
    fn widest_signal_words(&self) -> usize {
        0
    }
}

impl<M: SimModel + ?Sized> SimModel for Box<M> {
    fn evaluate_cycle(&mut self, clock: &mut SimClock) {
        (**self).evaluate_cycle(clock)
    }

    fn resettle(&mut self, clock: &SimClock) {
        (**self).resettle(clock)
    }

    fn apply_reset(&mut self, clock: &mut SimClock) {
        (**self).apply_reset(clock)
    }

    fn clear_reset(&mut self) {
        (**self).clear_reset()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }

    fn read_signal(&self, signal: SignalRef) -> NativeValue {
        (**self).read_signal(signal)
    }

    fn write_signal(&mut self, signal: SignalRef, value: NativeValue, force: bool) {
        (**self).write_signal(signal, value, force)
    }

    fn search(&mut self, name: &str) -> Option<SignalRef> {
        (**self).search(name)
    }

    fn widest_signal_words(&self) -> usize {
        (**self).widest_signal_words()
    }
}
