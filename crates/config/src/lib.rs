// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.0";

/// Id answered to a lookup that found nothing; no signal may claim it.
pub const RESERVED_SIGNAL_ID: u64 = u64::MAX;

/// Command channel payload used when the manifest does not set one.
pub const DEFAULT_COMMAND_SIZE: &str = "1KiB";

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn default_channel_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Input,
    Output,
    Internal,
}

/// How a signal follows its `source`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FollowMode {
    /// Captured on the rising clock edge.
    #[default]
    Registered,
    /// Re-evaluated on every settle.
    Combinational,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SignalRole {
    Reset,
    /// A free run stops once this signal reads non-zero.
    Success,
}

/// Why a free run ended.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Success,
    MaxCycles,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SignalDecl {
    pub name: String,
    pub width: u32,
    pub direction: SignalDirection,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub mode: FollowMode,
    #[serde(default)]
    pub role: Option<SignalRole>,
    /// Fixed id to expose the signal under. Others get the next free id.
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub init: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ChannelSettings {
    #[serde(default = "default_channel_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub command_size: Option<String>, // e.g. "1KiB"
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            dir: default_channel_dir(),
            command_size: None,
        }
    }
}

/// Describes one co-simulation session: where its channels live and which
/// signals the model exposes.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SessionManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    /// Hierarchy prefix for signal names, e.g. "Adept".
    pub top: String,
    #[serde(default)]
    pub channels: ChannelSettings,
    pub signals: Vec<SignalDecl>,
}

impl SessionManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session manifest at {:?}", path))?;
        let mut manifest = Self::from_yaml(&content)?;

        // Relative channel directories are anchored at the manifest.
        if manifest.channels.dir.is_relative() {
            if let Some(parent) = path.parent() {
                manifest.channels.dir = parent.join(&manifest.channels.dir);
            }
        }
        tracing::debug!(
            "Loaded session manifest '{}' ({} signals) from {:?}",
            manifest.name,
            manifest.signals.len(),
            path
        );
        Ok(manifest)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Session Manifest YAML")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '{}'",
                self.schema_version,
                SCHEMA_VERSION
            );
        }

        if self.name.trim().is_empty() {
            anyhow::bail!("Session 'name' cannot be empty");
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for sig in &self.signals {
            if sig.width == 0 {
                anyhow::bail!("Signal '{}' must have a width of at least 1 bit", sig.name);
            }
            if !names.insert(sig.name.as_str()) {
                anyhow::bail!("Duplicate signal name '{}'", sig.name);
            }
            if let Some(id) = sig.id {
                if id == RESERVED_SIGNAL_ID {
                    anyhow::bail!(
                        "Signal '{}' uses id {}, which is reserved for unresolved lookups",
                        sig.name,
                        id
                    );
                }
                if !ids.insert(id) {
                    anyhow::bail!("Duplicate signal id {} on '{}'", id, sig.name);
                }
            }
        }

        for sig in &self.signals {
            let Some(source) = &sig.source else {
                continue;
            };
            if sig.direction == SignalDirection::Input {
                anyhow::bail!("Input signal '{}' cannot follow a source", sig.name);
            }
            match self.signal(source) {
                Some(src) if src.direction == SignalDirection::Input => {}
                Some(_) => anyhow::bail!(
                    "Signal '{}' follows '{}', which is not an input",
                    sig.name,
                    source
                ),
                None => anyhow::bail!("Signal '{}' follows unknown signal '{}'", sig.name, source),
            }
        }

        for (role, label) in [(SignalRole::Reset, "reset"), (SignalRole::Success, "success")] {
            let count = self.signals.iter().filter(|s| s.role == Some(role)).count();
            if count > 1 {
                anyhow::bail!("At most one signal may have role '{}'", label);
            }
        }
        if let Some(sig) = self.signal_with_role(SignalRole::Success) {
            if sig.direction == SignalDirection::Input {
                anyhow::bail!("Success signal '{}' cannot be an input", sig.name);
            }
        }

        self.command_bytes()?;
        Ok(())
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDecl> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn signal_with_role(&self, role: SignalRole) -> Option<&SignalDecl> {
        self.signals.iter().find(|s| s.role == Some(role))
    }

    pub fn inputs(&self) -> impl Iterator<Item = &SignalDecl> {
        self.signals
            .iter()
            .filter(|s| s.direction == SignalDirection::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &SignalDecl> {
        self.signals
            .iter()
            .filter(|s| s.direction == SignalDirection::Output)
    }

    /// Fully qualified name the tester resolves, e.g. "Adept.reset".
    pub fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.top, name)
    }

    pub fn command_bytes(&self) -> Result<usize> {
        let size = self
            .channels
            .command_size
            .as_deref()
            .unwrap_or(DEFAULT_COMMAND_SIZE);
        let bytes = parse_size(size)
            .with_context(|| format!("Invalid channels.command_size '{}'", size))?;
        if bytes < 8 {
            anyhow::bail!("channels.command_size must hold at least one 64-bit word");
        }
        Ok(bytes as usize)
    }
}

/// A literal in a drive script: either a plain integer or a string such as
/// "0x33333333_22222222_11111111".
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScriptValue {
    Int(u64),
    Text(String),
}

impl ScriptValue {
    pub fn as_text(&self) -> String {
        match self {
            ScriptValue::Int(v) => v.to_string(),
            ScriptValue::Text(s) => s.clone(),
        }
    }
}

/// One tester-side operation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DriveOp {
    Reset,
    Step {
        #[serde(default)]
        inputs: BTreeMap<String, ScriptValue>,
        #[serde(default = "default_repeat")]
        repeat: u64,
    },
    Update {
        #[serde(default)]
        inputs: BTreeMap<String, ScriptValue>,
    },
    Poke {
        signal: String,
        value: ScriptValue,
    },
    Force {
        signal: String,
        value: ScriptValue,
    },
    ExpectPeek {
        signal: String,
        value: ScriptValue,
    },
    ExpectOutput {
        signal: String,
        value: ScriptValue,
    },
    Resolve {
        signal: String,
        #[serde(default = "default_true")]
        expect_found: bool,
    },
    Finish,
}

fn default_repeat() -> u64 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DriveScript {
    pub schema_version: String,
    pub ops: Vec<DriveOp>,
}

impl DriveScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open drive script at {:?}", path.as_ref()))?;
        let script: Self =
            serde_yaml::from_reader(f).context("Failed to parse Drive Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '{}'",
                self.schema_version,
                SCHEMA_VERSION
            );
        }

        if let Some(pos) = self.ops.iter().position(|op| *op == DriveOp::Finish) {
            if pos + 1 != self.ops.len() {
                anyhow::bail!("'finish' must be the last operation");
            }
        }

        for op in &self.ops {
            if let DriveOp::Step { repeat: 0, .. } = op {
                anyhow::bail!("'step' repeat must be greater than zero");
            }
        }
        Ok(())
    }

    /// Check every signal the script names against the manifest.
    pub fn check_signals(&self, manifest: &SessionManifest) -> Result<()> {
        for op in &self.ops {
            match op {
                DriveOp::Step { inputs, .. } | DriveOp::Update { inputs } => {
                    for name in inputs.keys() {
                        match manifest.signal(name) {
                            Some(s) if s.direction == SignalDirection::Input => {}
                            _ => anyhow::bail!("'{}' is not an input of '{}'", name, manifest.name),
                        }
                    }
                }
                DriveOp::ExpectOutput { signal, .. } => match manifest.signal(signal) {
                    Some(s) if s.direction == SignalDirection::Output => {}
                    _ => anyhow::bail!("'{}' is not an output of '{}'", signal, manifest.name),
                },
                _ => {}
            }
        }
        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADEPT: &str = r#"
schema_version: "1.0"
name: "adept"
top: "Adept"
channels:
  dir: "/tmp/adept"
signals:
  - { name: "io_load_we", width: 1, direction: input }
  - { name: "io_load_addr_w", width: 32, direction: input }
  - { name: "io_success", width: 1, direction: output, source: "io_load_we" }
  - { name: "reset", width: 1, direction: internal, role: reset, id: 0 }
"#;

    #[test]
    fn test_valid_manifest() {
        let m = SessionManifest::from_yaml(ADEPT).unwrap();
        assert_eq!(m.name, "adept");
        assert_eq!(m.signals.len(), 4);
        assert_eq!(m.inputs().count(), 2);
        assert_eq!(m.outputs().count(), 1);
        assert_eq!(m.signal("io_success").unwrap().mode, FollowMode::Registered);
        assert_eq!(m.command_bytes().unwrap(), 1024);
        assert_eq!(m.qualified("reset"), "Adept.reset");
    }

    #[test]
    fn test_invalid_version() {
        let yaml = ADEPT.replace("\"1.0\"", "\"2.0\"");
        let err = SessionManifest::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_zero_width_rejected() {
        let yaml = ADEPT.replace("width: 32", "width: 0");
        assert!(SessionManifest::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_source_must_be_input() {
        let yaml = ADEPT.replace("source: \"io_load_we\"", "source: \"reset\"");
        let err = SessionManifest::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("not an input"));
    }

    #[test]
    fn test_command_size() {
        let yaml = ADEPT.replace("dir: \"/tmp/adept\"", "dir: \"/tmp/adept\"\n  command_size: \"4KiB\"");
        let m = SessionManifest::from_yaml(&yaml).unwrap();
        assert_eq!(m.command_bytes().unwrap(), 4096);
    }

    #[test]
    fn test_drive_script() {
        let yaml = r#"
schema_version: "1.0"
ops:
  - op: reset
  - op: step
    inputs: { io_load_we: 1 }
    repeat: 2
  - op: poke
    signal: "Adept.wide"
    value: "0x33333333_22222222_11111111"
  - op: expect_output
    signal: io_success
    value: 1
  - op: resolve
    signal: "Adept.nothing"
    expect_found: false
  - op: finish
"#;
        let script: DriveScript = serde_yaml::from_str(yaml).unwrap();
        script.validate().unwrap();
        assert_eq!(script.ops.len(), 6);
        assert_eq!(script.ops[0], DriveOp::Reset);
        match &script.ops[1] {
            DriveOp::Step { inputs, repeat } => {
                assert_eq!(*repeat, 2);
                assert_eq!(inputs["io_load_we"], ScriptValue::Int(1));
            }
            other => panic!("unexpected op {:?}", other),
        }

        let manifest = SessionManifest::from_yaml(ADEPT).unwrap();
        script.check_signals(&manifest).unwrap();
    }

    #[test]
    fn test_finish_must_be_last() {
        let yaml = r#"
schema_version: "1.0"
ops:
  - op: finish
  - op: reset
"#;
        let script: DriveScript = serde_yaml::from_str(yaml).unwrap();
        assert!(script.validate().is_err());
    }
}
