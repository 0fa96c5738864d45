// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use labwired_config::{DriveOp, DriveScript, FollowMode, SessionManifest, SignalRole};

#[test]
fn test_manifest_from_file_anchors_channel_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.yaml");
    std::fs::write(
        &path,
        r#"
schema_version: "1.0"
name: "adept"
top: "Adept"
channels:
  dir: "chan"
signals:
  - { name: "a", width: 1, direction: input }
"#,
    )
    .unwrap();

    let m = SessionManifest::from_file(&path).unwrap();
    assert_eq!(m.channels.dir, dir.path().join("chan"));
}

#[test]
fn test_manifest_defaults() {
    let yaml = r#"
name: "minimal"
top: "Top"
signals:
  - { name: "clk_en", width: 1, direction: input }
  - { name: "mirror", width: 1, direction: output, source: "clk_en", mode: combinational }
  - { name: "rst", width: 1, direction: internal, role: reset }
"#;
    let m = SessionManifest::from_yaml(yaml).unwrap();
    assert_eq!(m.schema_version, "1.0");
    assert_eq!(m.channels.dir, std::path::PathBuf::from("."));
    assert_eq!(m.signal("mirror").unwrap().mode, FollowMode::Combinational);
    assert_eq!(m.signal("rst").unwrap().role, Some(SignalRole::Reset));
}

#[test]
fn test_unknown_fields_rejected() {
    let yaml = r#"
name: "bad"
top: "Top"
signals:
  - { name: "a", width: 1, direction: input, colour: "red" }
"#;
    assert!(SessionManifest::from_yaml(yaml).is_err());
}

#[test]
fn test_duplicate_ids_rejected() {
    let yaml = r#"
name: "bad"
top: "Top"
signals:
  - { name: "a", width: 1, direction: input, id: 3 }
  - { name: "b", width: 1, direction: input, id: 3 }
"#;
    let err = SessionManifest::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("Duplicate signal id"));
}

#[test]
fn test_reserved_id_rejected() {
    let yaml = r#"
name: "bad"
top: "Top"
signals:
  - { name: "a", width: 1, direction: input, id: 18446744073709551615 }
"#;
    let err = SessionManifest::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("reserved"));
}

#[test]
fn test_success_role() {
    let yaml = r#"
name: "adept"
top: "Adept"
signals:
  - { name: "io_success", width: 1, direction: output, role: success }
"#;
    let m = SessionManifest::from_yaml(yaml).unwrap();
    let decl = m.signal_with_role(SignalRole::Success).unwrap();
    assert_eq!(decl.name, "io_success");
    assert!(m.signal_with_role(SignalRole::Reset).is_none());

    let input = yaml.replace("direction: output", "direction: input");
    let err = SessionManifest::from_yaml(&input).unwrap_err();
    assert!(err.to_string().contains("cannot be an input"));
}

#[test]
fn test_two_resets_rejected() {
    let yaml = r#"
name: "bad"
top: "Top"
signals:
  - { name: "r0", width: 1, direction: internal, role: reset }
  - { name: "r1", width: 1, direction: internal, role: reset }
"#;
    assert!(SessionManifest::from_yaml(yaml).is_err());
}

#[test]
fn test_drive_script_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("script.yaml");
    std::fs::write(
        &path,
        r#"
schema_version: "1.0"
ops:
  - op: update
    inputs: { a: "0x1" }
  - op: expect_peek
    signal: "Top.a"
    value: 1
"#,
    )
    .unwrap();

    let script = DriveScript::from_file(&path).unwrap();
    assert_eq!(script.ops.len(), 2);
    assert!(matches!(script.ops[0], DriveOp::Update { .. }));
}

#[test]
fn test_drive_script_rejects_unknown_inputs() {
    let manifest = SessionManifest::from_yaml(
        r#"
name: "s"
top: "Top"
signals:
  - { name: "a", width: 1, direction: input }
  - { name: "y", width: 1, direction: output }
"#,
    )
    .unwrap();
    let script: DriveScript = serde_yaml::from_str(
        r#"
schema_version: "1.0"
ops:
  - op: step
    inputs: { y: 1 }
"#,
    )
    .unwrap();
    assert!(script.check_signals(&manifest).is_err());
}
