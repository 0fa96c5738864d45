// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::marshal::Width;
use crate::CosimError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Stable numeric handle the tester uses to address a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalId(pub u64);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference into the model's variable set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalRef {
    /// Model-private index.
    pub slot: usize,
    pub width: Width,
}

/// Which token batch, if any, a signal belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
    Internal,
}

#[derive(Debug, Clone)]
pub struct SignalEntry {
    pub name: String,
    pub signal: SignalRef,
    pub direction: Direction,
}

/// Id and name index over the signals a session exposes.
///
/// Inputs and outputs keep their registration order; that order defines the
/// layout of the token batches.
#[derive(Debug, Clone, Default)]
pub struct SignalTable {
    entries: HashMap<SignalId, SignalEntry>,
    names: HashMap<String, SignalId>,
    inputs: Vec<SignalId>,
    outputs: Vec<SignalId>,
    next_id: u64,
}

impl SignalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a signal under the next free id.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        signal: SignalRef,
        direction: Direction,
    ) -> Result<SignalId, CosimError> {
        let id = SignalId(self.next_id);
        self.register_at(id, name, signal, direction)?;
        Ok(id)
    }

    /// Register a signal under a caller-chosen id.
    pub fn register_at(
        &mut self,
        id: SignalId,
        name: impl Into<String>,
        signal: SignalRef,
        direction: Direction,
    ) -> Result<(), CosimError> {
        let name = name.into();
        if self.entries.contains_key(&id) {
            return Err(CosimError::DuplicateSignal(format!("id {}", id)));
        }
        if self.names.contains_key(&name) {
            return Err(CosimError::DuplicateSignal(name));
        }

        match direction {
            Direction::Input => self.inputs.push(id),
            Direction::Output => self.outputs.push(id),
            Direction::Internal => {}
        }
        self.names.insert(name.clone(), id);
        self.entries.insert(
            id,
            SignalEntry {
                name,
                signal,
                direction,
            },
        );
        if let Some(next) = id.0.checked_add(1) {
            self.next_id = self.next_id.max(next);
        }
        Ok(())
    }

    /// Add another name for an existing id.
    pub fn alias(&mut self, name: impl Into<String>, id: SignalId) {
        if self.entries.contains_key(&id) {
            self.names.insert(name.into(), id);
        }
    }

    pub fn get(&self, id: SignalId) -> Option<SignalRef> {
        self.entries.get(&id).map(|e| e.signal)
    }

    pub fn entry(&self, id: SignalId) -> Option<&SignalEntry> {
        self.entries.get(&id)
    }

    pub fn lookup(&self, name: &str) -> Option<SignalId> {
        self.names.get(name).copied()
    }

    /// Id already registered for a model slot, if any.
    pub fn find_slot(&self, slot: usize) -> Option<SignalId> {
        self.entries
            .iter()
            .find(|(_, e)| e.signal.slot == slot)
            .map(|(id, _)| *id)
    }

    pub fn inputs(&self) -> &[SignalId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[SignalId] {
        &self.outputs
    }

    pub fn input_widths(&self) -> Vec<Width> {
        self.widths_of(&self.inputs)
    }

    pub fn output_widths(&self) -> Vec<Width> {
        self.widths_of(&self.outputs)
    }

    fn widths_of(&self, ids: &[SignalId]) -> Vec<Width> {
        ids.iter()
            .filter_map(|id| self.get(*id))
            .map(|s| s.width)
            .collect()
    }

    /// Words in one input token batch.
    pub fn input_words(&self) -> usize {
        self.input_widths().iter().map(|w| w.word_count()).sum()
    }

    /// Words in one output token batch.
    pub fn output_words(&self) -> usize {
        self.output_widths().iter().map(|w| w.word_count()).sum()
    }

    /// Word count of the widest registered signal.
    pub fn max_signal_words(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.signal.width.word_count())
            .max()
            .unwrap_or(1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sref(slot: usize, bits: u32) -> SignalRef {
        SignalRef {
            slot,
            width: Width::from_bits(bits).unwrap(),
        }
    }

    #[test]
    fn test_register_assigns_unique_ids() {
        let mut table = SignalTable::new();
        let a = table.register("top.a", sref(0, 1), Direction::Input).unwrap();
        let b = table.register("top.b", sref(1, 8), Direction::Output).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.lookup("top.a"), Some(a));
        assert_eq!(table.get(b), Some(sref(1, 8)));
        assert_eq!(table.inputs(), &[a]);
        assert_eq!(table.outputs(), &[b]);
    }

    #[test]
    fn test_sparse_ids_and_followups() {
        let mut table = SignalTable::new();
        table
            .register_at(SignalId(7), "top.wide", sref(0, 96), Direction::Internal)
            .unwrap();
        let next = table.register("top.x", sref(1, 1), Direction::Input).unwrap();
        assert_eq!(next, SignalId(8));
        assert_eq!(table.get(SignalId(0)), None);
        assert_eq!(table.find_slot(0), Some(SignalId(7)));
    }

    #[test]
    fn test_top_id_does_not_overflow() {
        let mut table = SignalTable::new();
        table
            .register_at(SignalId(u64::MAX), "top.last", sref(0, 1), Direction::Internal)
            .unwrap();
        let next = table.register("top.x", sref(1, 1), Direction::Input).unwrap();
        assert_eq!(next, SignalId(0));
        assert_eq!(table.lookup("top.last"), Some(SignalId(u64::MAX)));
    }

    #[test]
    fn test_duplicates_rejected() {
        let mut table = SignalTable::new();
        table
            .register_at(SignalId(1), "top.a", sref(0, 1), Direction::Input)
            .unwrap();
        assert!(table
            .register_at(SignalId(1), "top.b", sref(1, 1), Direction::Input)
            .is_err());
        assert!(table
            .register("top.a", sref(2, 1), Direction::Input)
            .is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_batch_sizes() {
        let mut table = SignalTable::new();
        table.register("i0", sref(0, 1), Direction::Input).unwrap();
        table.register("i1", sref(1, 96), Direction::Input).unwrap();
        table.register("o0", sref(2, 64), Direction::Output).unwrap();
        table.register("n0", sref(3, 256), Direction::Internal).unwrap();

        assert_eq!(table.input_words(), 3);
        assert_eq!(table.output_words(), 1);
        assert_eq!(table.max_signal_words(), 4);
    }

    #[test]
    fn test_alias() {
        let mut table = SignalTable::new();
        let id = table.register("Adept.reset", sref(0, 1), Direction::Internal).unwrap();
        table.alias("reset", id);
        table.alias("ghost", SignalId(99));
        assert_eq!(table.lookup("reset"), Some(id));
        assert_eq!(table.lookup("ghost"), None);
    }
}
