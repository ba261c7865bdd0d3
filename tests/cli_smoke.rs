use std::path::Path;
use std::process::Command;

use serde_json::{json, Value};
use tempfile::tempdir;

fn scenario_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_scenario"));
    // Keep the developer's environment and any .env file out of the run.
    cmd.current_dir(dir)
        .env_remove("SCENARIO_API_KEY")
        .env_remove("GITHUB_TOKEN")
        .env("SCENARIO_MAX_TRUTH_CHARS", "200")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn cli_budget_prints_clipped_payload() {
    let dir = tempdir().unwrap();
    let truth_path = dir.path().join("truth.txt");
    let context_path = dir.path().join("context.txt");
    std::fs::write(&truth_path, "T".repeat(1_000)).unwrap();
    std::fs::write(&context_path, "supporting notes").unwrap();

    let output = scenario_cmd(dir.path())
        .arg("budget")
        .arg("--truth")
        .arg(&truth_path)
        .arg("--context")
        .arg(&context_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    let truth = payload["truth"].as_str().unwrap();
    assert!(truth.chars().count() <= 200);
    assert!(truth.starts_with("TTT"));
    assert!(truth.contains("[... TRUNCATED (truth) ...]"));
    assert_eq!(payload["context"], "supporting notes");
    assert_eq!(payload["confluence"], "");
    assert_eq!(payload["dropped_confluence"], false);
    assert!(payload["available_user_tokens"].as_u64().unwrap() > 0);
}

#[test]
fn cli_budget_gathers_from_a_sources_bundle() {
    let dir = tempdir().unwrap();
    let bundle_path = dir.path().join("sources.json");
    let bundle = json!({
        "issues": {
            "TV-1": {
                "key": "TV-1",
                "summary": "Home rail",
                "description": "<p>Rails ordered by rank, see TV-2</p>",
                "epic_link": "EP-1"
            },
            "TV-2": { "key": "TV-2", "summary": "Ranking", "description": "rank field" },
            "EP-1": {
                "key": "EP-1",
                "summary": "Epic",
                "doc_url": "https://confluence.example/epic"
            }
        },
        "documents": { "https://confluence.example/epic": "epic overview" }
    });
    std::fs::write(&bundle_path, bundle.to_string()).unwrap();

    let output = scenario_cmd(dir.path())
        .env("SCENARIO_MAX_TRUTH_CHARS", "20000")
        .arg("budget")
        .arg("--sources")
        .arg(&bundle_path)
        .args(["--story", "TV-1"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let payload: Value = serde_json::from_slice(&output.stdout).unwrap();
    let truth = payload["truth"].as_str().unwrap();
    assert!(truth.starts_with("Ticket: TV-1\nSummary: Home rail"));
    assert!(truth.contains("Ticket: TV-2"));
    assert_eq!(payload["confluence"], "epic overview");
}

#[test]
fn cli_label_reads_scenario_array() {
    let dir = tempdir().unwrap();
    let input_path = dir.path().join("scenarios.json");
    let scenarios = json!([
        {
            "inventory_id": 2,
            "main_function": "Home",
            "test_title": "Placeholder code",
            "scope": "E2E",
            "formatted_description": "d",
            "automation_candidate": true,
            "automation_type": "selenium",
            "automation_code": "# TODO selenium_code_for_home"
        },
        {
            "inventory_id": 1,
            "main_function": "Home",
            "test_title": "Manual only",
            "scope": "System",
            "formatted_description": "d",
            "automation_candidate": false,
            "automation_type": "none",
            "automation_code": ""
        }
    ]);
    std::fs::write(&input_path, scenarios.to_string()).unwrap();

    let output = scenario_cmd(dir.path())
        .arg("label")
        .arg("--input")
        .arg(&input_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let rows: Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["label"] == "Discarded"));
}

#[test]
fn cli_generate_without_api_key_fails_before_any_call() {
    let dir = tempdir().unwrap();
    let truth_path = dir.path().join("truth.txt");
    std::fs::write(&truth_path, "story").unwrap();

    let status = scenario_cmd(dir.path())
        .arg("generate")
        .arg("--truth")
        .arg(&truth_path)
        .arg("--out")
        .arg(dir.path().join("out.json"))
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
    assert!(!dir.path().join("out.json").exists());
}
