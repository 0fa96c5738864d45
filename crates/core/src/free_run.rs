// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Stand-alone run of a model with no tester attached.
//!
//! The model is held in reset for a burst of cycles, released, and then
//! clocked until its success signal goes high or a cycle budget runs out.

use crate::model::{SimClock, SimModel};
use crate::signals::SignalRef;
use crate::{CosimError, CosimResult};
use labwired_config::StopReason;
use serde::Serialize;
use tracing::{debug, info};

/// Initial reset burst applied before a session starts.
pub const DEFAULT_RESET_CYCLES: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeRunLimits {
    pub reset_cycles: u64,
    /// Clocked cycles after reset, not counting the reset burst.
    pub max_cycles: Option<u64>,
}

impl Default for FreeRunLimits {
    fn default() -> Self {
        Self {
            reset_cycles: DEFAULT_RESET_CYCLES,
            max_cycles: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeRunSummary {
    pub stop_reason: StopReason,
    pub cycles: u64,
    pub resets: u64,
    /// Simulation time in half-cycle ticks.
    pub sim_time: u64,
}

/// Run `model` until `success` reads non-zero or `limits.max_cycles` is
/// spent. At least one of the two must be given.
pub fn run_free<M: SimModel>(
    model: &mut M,
    success: Option<SignalRef>,
    limits: FreeRunLimits,
) -> CosimResult<FreeRunSummary> {
    if success.is_none() && limits.max_cycles.is_none() {
        return Err(CosimError::Unbounded);
    }

    let mut clock = SimClock::new();
    for _ in 0..limits.reset_cycles {
        model.apply_reset(&mut clock);
    }
    model.clear_reset();
    model.resettle(&clock);
    debug!("Released reset after {} cycles", limits.reset_cycles);

    let succeeded = |model: &M| success.is_some_and(|s| !model.read_signal(s).is_zero());

    let mut cycles = 0u64;
    let stop_reason = loop {
        if succeeded(model) {
            break StopReason::Success;
        }
        if limits.max_cycles.is_some_and(|max| cycles >= max) {
            break StopReason::MaxCycles;
        }
        model.evaluate_cycle(&mut clock);
        cycles += 1;
        if cycles % 100_000 == 0 {
            info!("Progress: {} cycles", cycles);
        }
    };
    model.shutdown();

    info!("Free run stopped ({:?}) after {} cycles", stop_reason, cycles);
    Ok(FreeRunSummary {
        stop_reason,
        cycles,
        resets: limits.reset_cycles,
        sim_time: clock.now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RegisterModel;
    use crate::NativeValue;
    use labwired_config::SessionManifest;

    /// `done` captures `go` on every clock edge and is cleared by reset.
    fn model() -> RegisterModel {
        let manifest = SessionManifest::from_yaml(
            r#"
name: "adept"
top: "Adept"
signals:
  - { name: "reset", width: 1, direction: internal, role: reset }
  - { name: "go", width: 1, direction: input, init: 1 }
  - { name: "done", width: 1, direction: output, source: "go", role: success }
"#,
        )
        .unwrap();
        RegisterModel::from_manifest(&manifest).unwrap().0
    }

    #[test]
    fn test_stops_on_success() {
        let mut model = model();
        let done = model.signal("done");
        let summary = run_free(
            &mut model,
            done,
            FreeRunLimits {
                reset_cycles: 3,
                max_cycles: Some(100),
            },
        )
        .unwrap();

        assert_eq!(summary.stop_reason, StopReason::Success);
        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.resets, 3);
        assert_eq!(summary.sim_time, 8);
        assert!(model.is_shut_down());
        assert!(!model.in_reset());
    }

    #[test]
    fn test_stops_at_max_cycles() {
        let mut model = model();
        let go = model.signal("go").unwrap();
        model.write_signal(go, NativeValue::Narrow(0), false);

        let done = model.signal("done");
        let summary = run_free(
            &mut model,
            done,
            FreeRunLimits {
                reset_cycles: 0,
                max_cycles: Some(5),
            },
        )
        .unwrap();
        assert_eq!(summary.stop_reason, StopReason::MaxCycles);
        assert_eq!(summary.cycles, 5);
        assert_eq!(model.cycles(), 5);
    }

    #[test]
    fn test_needs_a_stop_condition() {
        let mut model = model();
        let err = run_free(&mut model, None, FreeRunLimits::default()).unwrap_err();
        assert!(matches!(err, CosimError::Unbounded));
        assert_eq!(model.cycles(), 0);
    }
}
