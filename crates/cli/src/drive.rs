// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{write_json, EXIT_ASSERT_FAIL, EXIT_CONFIG_ERROR, EXIT_OK, EXIT_SETUP_FAULT};
use anyhow::{Context, Result};
use clap::Parser;
use labwired_config::{DriveOp, DriveScript, ScriptValue, SessionManifest};
use labwired_core::cosim::shm::HEADER_BYTES;
use labwired_core::marshal::{from_words, pack_batch, to_words};
use labwired_core::{NativeValue, SessionPaths, SignalId, Tester, Width};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
pub struct DriveArgs {
    /// Path to the session manifest (YAML)
    #[arg(short, long)]
    manifest: PathBuf,

    /// Path to the drive script (YAML)
    #[arg(short = 'c', long)]
    script: PathBuf,

    /// How long to wait for the simulator to create its channels
    #[arg(long, default_value = "5000")]
    connect_timeout_ms: u64,

    /// Write the drive report (JSON) here instead of stdout
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckFailure {
    pub op: usize,
    pub signal: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DriveReport {
    pub status: String,
    pub ops_executed: usize,
    pub steps: u64,
    pub checks: usize,
    pub failures: Vec<CheckFailure>,
}

#[derive(Debug, Clone)]
struct Port {
    name: String,
    width: Width,
}

/// Plays a drive script against a [`Tester`], keeping the last value driven
/// onto every input so each STEP/UPDATE sends a complete batch.
pub struct Driver<'a> {
    manifest: &'a SessionManifest,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    shadow: Vec<NativeValue>,
    ids: HashMap<String, SignalId>,
}

fn ports<'a>(decls: impl Iterator<Item = &'a labwired_config::SignalDecl>) -> Result<Vec<Port>> {
    decls
        .map(|d| {
            let width = Width::from_bits(d.width)
                .with_context(|| format!("Signal '{}' has zero width", d.name))?;
            Ok(Port {
                name: d.name.clone(),
                width,
            })
        })
        .collect()
}

fn parse_value(width: Width, value: &ScriptValue) -> Result<NativeValue> {
    let text = value.as_text();
    NativeValue::parse(width, &text).with_context(|| format!("Invalid value '{}'", text))
}

impl<'a> Driver<'a> {
    pub fn new(manifest: &'a SessionManifest) -> Result<Self> {
        let inputs = ports(manifest.inputs())?;
        let outputs = ports(manifest.outputs())?;
        let shadow = inputs.iter().map(|p| NativeValue::zero(p.width)).collect();
        Ok(Self {
            manifest,
            inputs,
            outputs,
            shadow,
            ids: HashMap::new(),
        })
    }

    pub fn output_words(&self) -> usize {
        self.outputs.iter().map(|p| p.width.word_count()).sum()
    }

    fn local<'n>(&self, name: &'n str) -> &'n str {
        name.strip_prefix(self.manifest.top.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .unwrap_or(name)
    }

    fn qualify(&self, name: &str) -> String {
        if name.contains('.') {
            name.to_string()
        } else {
            self.manifest.qualified(name)
        }
    }

    fn input_index(&self, name: &str) -> Option<usize> {
        let local = self.local(name);
        self.inputs.iter().position(|p| p.name == local)
    }

    fn set_inputs(&mut self, values: &BTreeMap<String, ScriptValue>) -> Result<()> {
        for (name, value) in values {
            let index = self
                .input_index(name)
                .with_context(|| format!("'{}' is not an input", name))?;
            self.shadow[index] = parse_value(self.inputs[index].width, value)?;
        }
        Ok(())
    }

    fn input_words(&self) -> Result<Vec<u64>> {
        let total = self.inputs.iter().map(|p| p.width.word_count()).sum();
        let mut words = vec![0u64; total];
        pack_batch(
            self.inputs.iter().map(|p| p.width).zip(self.shadow.iter()),
            &mut words,
        )?;
        Ok(words)
    }

    fn output_port(&self, name: &str) -> Result<(usize, Width)> {
        let local = self.local(name);
        let mut offset = 0;
        for port in &self.outputs {
            if port.name == local {
                return Ok((offset, port.width));
            }
            offset += port.width.word_count();
        }
        anyhow::bail!("'{}' is not an output", name)
    }

    fn output_value(&self, name: &str, outputs: &[u64]) -> Result<NativeValue> {
        let (offset, width) = self.output_port(name)?;
        let words = outputs.get(offset..).unwrap_or_default();
        Ok(from_words(width, words)?)
    }

    fn resolve(&mut self, tester: &mut Tester, name: &str) -> Result<Option<SignalId>> {
        let qualified = self.qualify(name);
        if let Some(id) = self.ids.get(&qualified) {
            return Ok(Some(*id));
        }
        let id = tester.resolve(&qualified)?;
        if let Some(id) = id {
            debug!("Resolved '{}' to id {}", qualified, id);
            self.ids.insert(qualified, id);
        }
        Ok(id)
    }

    fn require(&mut self, tester: &mut Tester, name: &str) -> Result<SignalId> {
        self.resolve(tester, name)?
            .with_context(|| format!("Simulator does not know signal '{}'", name))
    }

    /// Declared width, or the widest value the simulator's word count allows.
    fn width_of(&self, tester: &mut Tester, name: &str, id: SignalId) -> Width {
        let declared = self
            .manifest
            .signal(self.local(name))
            .and_then(|d| Width::from_bits(d.width));
        declared.unwrap_or_else(|| match tester.word_count(id) {
            0 | 1 => Width::Narrow { bits: 64 },
            n => Width::Wide { limbs: n * 2 },
        })
    }

    pub fn run(&mut self, tester: &mut Tester, script: &DriveScript) -> Result<DriveReport> {
        let mut report = DriveReport::default();
        let mut finished = false;

        for (index, op) in script.ops.iter().enumerate() {
            debug!("Op {}: {:?}", index, op);
            match op {
                DriveOp::Reset => {
                    tester.reset();
                }
                DriveOp::Step { inputs, repeat } => {
                    self.set_inputs(inputs)?;
                    let words = self.input_words()?;
                    for _ in 0..*repeat {
                        tester.step(&words)?;
                    }
                    report.steps += repeat;
                }
                DriveOp::Update { inputs } => {
                    self.set_inputs(inputs)?;
                    let words = self.input_words()?;
                    tester.update(&words)?;
                }
                DriveOp::Poke { signal, value } | DriveOp::Force { signal, value } => {
                    let id = self.require(tester, signal)?;
                    let width = self.width_of(tester, signal, id);
                    let value = parse_value(width, value)?;
                    let mut words = vec![0u64; width.word_count()];
                    to_words(width, &value, &mut words)?;
                    if matches!(op, DriveOp::Force { .. }) {
                        tester.force(id, &words)?;
                    } else {
                        tester.poke(id, &words)?;
                    }
                    // Later batches keep driving what was written.
                    if let Some(i) = self.input_index(signal) {
                        self.shadow[i] = value;
                    }
                }
                DriveOp::ExpectPeek { signal, value } => {
                    let id = self.require(tester, signal)?;
                    let width = self.width_of(tester, signal, id);
                    let expected = parse_value(width, value)?;
                    let words = tester.peek_words(id, width.word_count());
                    let actual = from_words(width, &words)?;
                    report.checks += 1;
                    if actual != expected {
                        report.failures.push(CheckFailure {
                            op: index,
                            signal: signal.clone(),
                            expected: expected.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                }
                DriveOp::ExpectOutput { signal, value } => {
                    let (_, width) = self.output_port(signal)?;
                    let expected = parse_value(width, value)?;
                    let outputs = tester.recv_outputs().to_vec();
                    let actual = self.output_value(signal, &outputs)?;
                    report.checks += 1;
                    if actual != expected {
                        report.failures.push(CheckFailure {
                            op: index,
                            signal: signal.clone(),
                            expected: expected.to_string(),
                            actual: actual.to_string(),
                        });
                    }
                }
                DriveOp::Resolve {
                    signal,
                    expect_found,
                } => {
                    let found = self.resolve(tester, signal)?.is_some();
                    report.checks += 1;
                    if found != *expect_found {
                        let word = |f: bool| if f { "found" } else { "missing" };
                        report.failures.push(CheckFailure {
                            op: index,
                            signal: signal.clone(),
                            expected: word(*expect_found).to_string(),
                            actual: word(found).to_string(),
                        });
                    }
                }
                DriveOp::Finish => {
                    tester.finish();
                    finished = true;
                }
            }
            report.ops_executed += 1;
        }

        if !finished {
            tester.finish();
        }
        report.status = if report.failures.is_empty() {
            "passed".to_string()
        } else {
            "failed".to_string()
        };
        Ok(report)
    }
}

/// Poll until the simulator has created and sized all three channel files.
fn wait_for_channels(paths: &SessionPaths, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    let min_len = HEADER_BYTES as u64 + 8;
    loop {
        let ready = paths.iter().all(|p| {
            std::fs::metadata(p)
                .map(|m| m.len() >= min_len)
                .unwrap_or(false)
        });
        if ready {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

pub fn run(args: DriveArgs) -> ExitCode {
    let manifest = match SessionManifest::from_file(&args.manifest) {
        Ok(m) => m,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let script = match DriveScript::from_file(&args.script)
        .and_then(|s| s.check_signals(&manifest).map(|()| s))
    {
        Ok(s) => s,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    let mut driver = match Driver::new(&manifest) {
        Ok(d) => d,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let paths = SessionPaths::new(&manifest.channels.dir, &manifest.name);
    if !wait_for_channels(&paths, Duration::from_millis(args.connect_timeout_ms)) {
        error!(
            "Timed out after {} ms waiting for channels of session '{}'",
            args.connect_timeout_ms, manifest.name
        );
        return ExitCode::from(EXIT_SETUP_FAULT);
    }
    let mut tester = match Tester::attach(&paths, driver.output_words()) {
        Ok(t) => t,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_SETUP_FAULT);
        }
    };
    info!("Attached to session '{}'", manifest.name);

    let report = match driver.run(&mut tester, &script) {
        Ok(r) => r,
        Err(e) => {
            error!("{:#}", e);
            tester.finish();
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    for failure in &report.failures {
        error!(
            "Op {} ({}): expected {}, got {}",
            failure.op, failure.signal, failure.expected, failure.actual
        );
    }
    info!(
        "Drive {}: {} ops, {} checks, {} failures",
        report.status,
        report.ops_executed,
        report.checks,
        report.failures.len()
    );

    if let Err(e) = write_json(args.summary.as_deref(), &report) {
        error!("{:#}", e);
        return ExitCode::from(EXIT_SETUP_FAULT);
    }
    if report.failures.is_empty() {
        ExitCode::from(EXIT_OK)
    } else {
        ExitCode::from(EXIT_ASSERT_FAIL)
    }
}
