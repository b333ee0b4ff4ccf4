use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};
use zip::ZipArchive;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request_raw(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn fixture_sources() -> serde_json::Value {
    json!({
        "tentative": [
            { "Student ID": "111111", "LAST": "Alvarez", "FIRST": "Ana", "GRADE": "7" }
        ],
        "registrations": [
            { "Student ID": "111111", "Placement Days": 5 }
        ],
        "contactInfo": [],
        "schedules": [],
        "formResponses": [],
        "attendance": [
            { "Student ID": "111111", "Days in Attendance": 3, "Days in Enrollment": 3 }
        ],
        "entryWithdrawal": [
            { "Student ID": "111111", "Entry Date": "08/11/2025" }
        ]
    })
}

#[test]
fn export_bundles_the_last_run_from_the_workspace() {
    let workspace = temp_dir("rosterd-bundle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let built = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.buildRows",
        json!({ "sources": fixture_sources(), "today": "2025-08-25" }),
    );
    let run_id = built["runId"].as_str().expect("runId").to_string();

    let out = workspace.join("export/bundle.zip");
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "run.exportBundle",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(result["bundleFormat"], "rosterd-run-v1");
    assert_eq!(result["entryCount"], 2);

    let mut archive = ZipArchive::new(File::open(&out).expect("open bundle")).expect("zip");
    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(manifest["format"], "rosterd-run-v1");

    let mut run_text = String::new();
    archive
        .by_name("run/last_run.json")
        .expect("run entry")
        .read_to_string(&mut run_text)
        .expect("read run snapshot");
    assert!(run_text.contains(&run_id));
}

#[test]
fn export_without_a_workspace_is_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request_raw(
        &mut stdin,
        &mut reader,
        "1",
        "run.exportBundle",
        json!({ "outPath": "/tmp/never.zip" }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "no_workspace");
}

#[test]
fn export_before_any_run_is_rejected() {
    let workspace = temp_dir("rosterd-bundle-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request_raw(
        &mut stdin,
        &mut reader,
        "2",
        "run.exportBundle",
        json!({ "outPath": workspace.join("bundle.zip").to_string_lossy() }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "export_failed");
}
