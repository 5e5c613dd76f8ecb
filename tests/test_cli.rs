//! Runs the `daqc` binary against graph descriptions written to a temp dir.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

const CONV_RELU: &str = r#"{
    "name": "conv_relu",
    "nodes": [
        {"name": "conv", "op_type": "Conv", "inputs": ["x", "w"], "outputs": ["c"],
         "attributes": {"pads": [1, 1, 1, 1]}},
        {"name": "relu", "op_type": "Relu", "inputs": ["c"], "outputs": ["y"]}
    ],
    "initializers": [
        {"name": "w", "dims": [2, 1, 3, 3],
         "float_data": [1, 0, 0, 0, 1, 0, 0, 0, 1, 0, 1, 0, 1, 0, 1, 0, 1, 0]}
    ],
    "inputs": [{"name": "x", "shape": [1, 1, 4, 4]}],
    "outputs": [{"name": "y", "shape": [1, 2, 4, 4]}]
}"#;

fn write_graph(dir: &TempDir, file: &str, text: &str) -> PathBuf {
    let path = dir.path().join(file);
    std::fs::write(&path, text).unwrap();
    path
}

fn daqc(input: &Path, output: &Path, extra: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_daqc"))
        .arg(input)
        .arg(output)
        .args(extra)
        .output()
        .unwrap()
}

#[test]
fn test_cli_converts_json_graph() {
    let dir = TempDir::new().unwrap();
    let input = write_graph(&dir, "model.json", CONV_RELU);
    let output = dir.path().join("model.daq");

    let result = daqc(&input, &output, &[]);
    assert!(
        result.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&result.stderr)
    );
    let stdout = String::from_utf8_lossy(&result.stdout);
    assert!(stdout.contains("1 inputs, 1 tensors, 1 layers"), "{}", stdout);

    let bytes = std::fs::read(&output).unwrap();
    assert!(bytes.len() > 8);
}

#[test]
fn test_cli_output_is_byte_identical_across_runs() {
    let dir = TempDir::new().unwrap();
    let input = write_graph(&dir, "model.json", CONV_RELU);
    let first = dir.path().join("first.daq");
    let second = dir.path().join("second.daq");

    assert!(daqc(&input, &first, &[]).status.success());
    assert!(daqc(&input, &second, &[]).status.success());
    assert_eq!(
        std::fs::read(&first).unwrap(),
        std::fs::read(&second).unwrap()
    );
}

#[test]
fn test_cli_json_format() {
    let dir = TempDir::new().unwrap();
    let input = write_graph(&dir, "model.json", CONV_RELU);
    let output = dir.path().join("model.lowered.json");

    assert!(daqc(&input, &output, &["--format", "json"]).status.success());
    let value: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
    assert_eq!(value["inputs"][0]["shape"], serde_json::json!([1, 4, 4, 1]));
    assert_eq!(value["layers"][0]["type"], "Conv2D");
    assert_eq!(value["layers"][0]["fuse"], "Relu");
}

#[test]
fn test_cli_failure_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let text = CONV_RELU.replace(
        r#"{"name": "relu", "op_type": "Relu", "inputs": ["c"], "outputs": ["y"]}"#,
        r#"{"name": "flat", "op_type": "Reshape", "inputs": ["c"], "outputs": ["r"]},
        {"name": "relu", "op_type": "Relu", "inputs": ["r"], "outputs": ["y"]}"#,
    );
    let input = write_graph(&dir, "model.json", &text);
    let output = dir.path().join("model.daq");

    let result = daqc(&input, &output, &[]);
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("Reshape is only supported"), "{}", stderr);
    assert!(!output.exists());
}

#[test]
fn test_cli_rejects_unknown_format() {
    let dir = TempDir::new().unwrap();
    let input = write_graph(&dir, "model.json", CONV_RELU);
    let output = dir.path().join("model.out");

    let result = daqc(&input, &output, &["--format", "tflite"]);
    assert!(!result.status.success());
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(stderr.contains("no converter registered for format `tflite`"));
    assert!(!output.exists());
}

#[test]
fn test_cli_rejects_unknown_extension() {
    let dir = TempDir::new().unwrap();
    let input = write_graph(&dir, "model.pb", CONV_RELU);
    let output = dir.path().join("model.daq");

    let result = daqc(&input, &output, &[]);
    assert!(!result.status.success());
    assert!(String::from_utf8_lossy(&result.stderr).contains("unsupported graph file format"));
}
