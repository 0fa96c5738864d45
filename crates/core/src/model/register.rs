// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! A small behavioural model made of named registers.
//!
//! Each register can follow an input either on the rising clock edge or
//! combinationally. It stands in for a generated RTL model when exercising
//! the link itself.

use crate::marshal::{NativeValue, Width};
use crate::model::{SimClock, SimModel};
use crate::signals::{Direction, SignalId, SignalRef, SignalTable};
use crate::{CosimError, CosimResult};
use labwired_config::{FollowMode, SessionManifest, SignalDirection, SignalRole};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Name of the built-in cycle counter.
pub const CYCLE_COUNTER: &str = "cycle";

#[derive(Debug, Clone)]
struct Register {
    name: String,
    width: Width,
    init: NativeValue,
    value: NativeValue,
    forced: bool,
    follow: Option<(usize, FollowMode)>,
}

#[derive(Debug)]
pub struct RegisterModel {
    top: String,
    regs: Vec<Register>,
    by_name: HashMap<String, usize>,
    reset: Option<usize>,
    counter: usize,
    in_reset: bool,
    shut_down: bool,
}

impl RegisterModel {
    pub fn new(top: impl Into<String>) -> Self {
        let mut model = Self {
            top: top.into(),
            regs: Vec::new(),
            by_name: HashMap::new(),
            reset: None,
            counter: 0,
            in_reset: false,
            shut_down: false,
        };
        let width = Width::Narrow { bits: 64 };
        model.counter = model.push(CYCLE_COUNTER, width, NativeValue::zero(width));
        model
    }

    fn push(&mut self, name: &str, width: Width, init: NativeValue) -> usize {
        let slot = self.regs.len();
        self.regs.push(Register {
            name: name.to_string(),
            width,
            value: init.clone(),
            init,
            forced: false,
            follow: None,
        });
        self.by_name.insert(name.to_string(), slot);
        slot
    }

    /// Declare a register. Names are local to `top`.
    pub fn add(&mut self, name: &str, width: Width, init: NativeValue) -> CosimResult<SignalRef> {
        if self.by_name.contains_key(name) {
            return Err(CosimError::DuplicateSignal(self.qualified(name)));
        }
        let init = fit(&init, width);
        let slot = self.push(name, width, init);
        Ok(SignalRef { slot, width })
    }

    /// Make `target` follow `source`.
    pub fn follow(&mut self, target: SignalRef, source: SignalRef, mode: FollowMode) {
        if let Some(reg) = self.regs.get_mut(target.slot) {
            reg.follow = Some((source.slot, mode));
        }
    }

    /// Use `signal` as the reset line driven by `apply_reset`/`clear_reset`.
    pub fn set_reset(&mut self, signal: SignalRef) {
        self.reset = Some(signal.slot);
    }

    /// Build the model and the id table for a session manifest.
    ///
    /// Inputs, outputs, the reset line and internals with a fixed id are
    /// pre-registered; other internals stay reachable through `search`.
    pub fn from_manifest(manifest: &SessionManifest) -> CosimResult<(Self, SignalTable)> {
        let mut model = Self::new(&manifest.top);
        let mut refs = HashMap::new();

        for decl in &manifest.signals {
            let width = Width::from_bits(decl.width).ok_or_else(|| {
                CosimError::InvalidManifest(format!("signal '{}' has zero width", decl.name))
            })?;
            let init = NativeValue::from_u64(width, decl.init.unwrap_or(0));
            let sref = model.add(&decl.name, width, init)?;
            refs.insert(decl.name.as_str(), sref);
        }

        for decl in &manifest.signals {
            let target = refs[decl.name.as_str()];
            if let Some(source) = &decl.source {
                let source = refs.get(source.as_str()).copied().ok_or_else(|| {
                    CosimError::InvalidManifest(format!(
                        "signal '{}' follows unknown signal '{}'",
                        decl.name, source
                    ))
                })?;
                model.follow(target, source, decl.mode);
            }
            if decl.role == Some(SignalRole::Reset) {
                model.set_reset(target);
            }
        }

        let exposed = |d: &&labwired_config::SignalDecl| {
            d.direction != SignalDirection::Internal
                || d.role == Some(SignalRole::Reset)
                || d.id.is_some()
        };

        // Batches follow declaration order; automatic ids skip the fixed ones.
        let fixed: HashSet<u64> = manifest.signals.iter().filter_map(|d| d.id).collect();
        let mut next = 0u64;
        let mut table = SignalTable::new();
        for decl in manifest.signals.iter().filter(exposed) {
            let id = match decl.id {
                Some(id) => id,
                None => {
                    while fixed.contains(&next) {
                        next += 1;
                    }
                    let id = next;
                    next += 1;
                    id
                }
            };
            let direction = match decl.direction {
                SignalDirection::Input => Direction::Input,
                SignalDirection::Output => Direction::Output,
                SignalDirection::Internal => Direction::Internal,
            };
            table.register_at(
                SignalId(id),
                manifest.qualified(&decl.name),
                refs[decl.name.as_str()],
                direction,
            )?;
        }

        // Testers address the reset line by its bare name too.
        if let Some(decl) = manifest.signal_with_role(SignalRole::Reset) {
            if let Some(id) = table.lookup(&manifest.qualified(&decl.name)) {
                table.alias(decl.name.clone(), id);
            }
        }

        info!(
            "Built register model '{}': {} registers, {} pre-registered signals",
            manifest.top,
            model.regs.len(),
            table.len()
        );
        Ok((model, table))
    }

    pub fn top(&self) -> &str {
        &self.top
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.top, name)
    }

    fn local<'a>(&self, name: &'a str) -> &'a str {
        name.strip_prefix(self.top.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name)
    }

    pub fn signal(&self, name: &str) -> Option<SignalRef> {
        self.by_name
            .get(self.local(name))
            .map(|&slot| SignalRef {
                slot,
                width: self.regs[slot].width,
            })
    }

    pub fn value(&self, name: &str) -> Option<&NativeValue> {
        self.by_name
            .get(self.local(name))
            .map(|&slot| &self.regs[slot].value)
    }

    pub fn cycles(&self) -> u64 {
        match self.regs[self.counter].value {
            NativeValue::Narrow(v) => v,
            NativeValue::Wide(_) => 0,
        }
    }

    pub fn in_reset(&self) -> bool {
        self.in_reset
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn settle(&mut self) {
        for i in 0..self.regs.len() {
            let reg = &self.regs[i];
            if reg.forced {
                continue;
            }
            if let Some((src, FollowMode::Combinational)) = reg.follow {
                let value = fit(&self.regs[src].value, reg.width);
                self.regs[i].value = value;
            }
        }
    }

    fn rising_edge(&mut self) {
        let captured: Vec<(usize, NativeValue)> = self
            .regs
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.forced)
            .filter_map(|(i, r)| match r.follow {
                Some((_, FollowMode::Registered)) if self.in_reset => Some((i, r.init.clone())),
                Some((src, FollowMode::Registered)) => {
                    Some((i, fit(&self.regs[src].value, r.width)))
                }
                _ => None,
            })
            .collect();
        for (i, value) in captured {
            self.regs[i].value = value;
        }

        if let NativeValue::Narrow(v) = &mut self.regs[self.counter].value {
            *v = v.wrapping_add(1);
        }
    }

    fn drive_reset(&mut self, level: u64) {
        if let Some(slot) = self.reset {
            let width = self.regs[slot].width;
            self.regs[slot].value = NativeValue::from_u64(width, level);
        }
    }
}

impl SimModel for RegisterModel {
    fn evaluate_cycle(&mut self, clock: &mut SimClock) {
        clock.tick();
        self.settle();
        self.rising_edge();
        clock.tick();
        self.settle();
    }

    fn resettle(&mut self, clock: &SimClock) {
        debug!("Re-settling '{}' at t={}", self.top, clock.now());
        self.settle();
    }

    fn apply_reset(&mut self, clock: &mut SimClock) {
        self.in_reset = true;
        self.drive_reset(1);
        self.evaluate_cycle(clock);
    }

    fn clear_reset(&mut self) {
        self.in_reset = false;
        self.drive_reset(0);
    }

    fn shutdown(&mut self) {
        self.settle();
        self.shut_down = true;
        info!("Model '{}' shut down after {} cycles", self.top, self.cycles());
    }

    fn read_signal(&self, signal: SignalRef) -> NativeValue {
        match self.regs.get(signal.slot) {
            Some(reg) => fit(&reg.value, signal.width),
            None => {
                warn!("Read of unknown register slot {}", signal.slot);
                NativeValue::zero(signal.width)
            }
        }
    }

    fn write_signal(&mut self, signal: SignalRef, value: NativeValue, force: bool) {
        let Some(reg) = self.regs.get_mut(signal.slot) else {
            warn!("Write to unknown register slot {}", signal.slot);
            return;
        };
        if force {
            reg.forced = true;
        } else if reg.forced {
            debug!("Releasing force on '{}'", reg.name);
            reg.forced = false;
        }
        reg.value = fit(&value, reg.width);
    }

    fn search(&mut self, name: &str) -> Option<SignalRef> {
        self.signal(name)
    }

    fn widest_signal_words(&self) -> usize {
        self.regs
            .iter()
            .map(|r| r.width.word_count())
            .max()
            .unwrap_or(0)
    }
}

/// Resize `value` to `width`, truncating or zero-extending.
fn fit(value: &NativeValue, width: Width) -> NativeValue {
    let limbs: Vec<u32> = match value {
        NativeValue::Narrow(v) => vec![*v as u32, (*v >> 32) as u32],
        NativeValue::Wide(l) => l.clone(),
    };
    match width {
        Width::Narrow { .. } => {
            let lo = limbs.first().copied().unwrap_or(0) as u64;
            let hi = limbs.get(1).copied().unwrap_or(0) as u64;
            NativeValue::from_u64(width, lo | (hi << 32))
        }
        Width::Wide { limbs: count } => {
            let mut out = limbs;
            out.resize(count, 0);
            NativeValue::Wide(out)
        }
    }
}
