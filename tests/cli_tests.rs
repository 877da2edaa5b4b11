//! Integration tests for the crewflow CLI
//!
//! These tests run the actual binary against crew files in a temp dir.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const RESEARCH_CREW: &str = r#"
name: research
description: Two-step research crew
process: sequential
inputs:
  topic: rust
agents:
  - id: researcher
    name: Ada
    role: Researcher
    goal: Find facts
  - id: writer
    name: Grace
    role: Writer
    goal: Write clearly
tasks:
  - id: gather
    description: Gather facts about {topic}
    agent: researcher
  - id: report
    description: Write a report
    agent: writer
    depends_on: [gather]
"#;

/// Get the binary to test, isolated from the caller's config and env
fn crewflow_cmd(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("crewflow").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("CREWFLOW_PROVIDER")
        .env_remove("CREWFLOW_MODEL")
        .env_remove("CREWFLOW_BASE_URL")
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .env("NO_COLOR", "1");
    cmd
}

fn write_crew(dir: &TempDir, name: &str, yaml: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, yaml).unwrap();
    path
}

fn absent_config(dir: &TempDir) -> PathBuf {
    dir.path().join("no-config.toml")
}

#[test]
fn test_help_flag() {
    let dir = TempDir::new().unwrap();
    crewflow_cmd(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("orchestrate crews of LLM agents"));
}

#[test]
fn test_run_help_lists_flags() {
    let dir = TempDir::new().unwrap();
    crewflow_cmd(&dir)
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--input"))
        .stdout(predicate::str::contains("--stream"))
        .stdout(predicate::str::contains("--store-dir"));
}

// ============================================================================
// validate
// ============================================================================

#[test]
fn test_validate_valid_crew() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);

    crewflow_cmd(&dir)
        .arg("validate")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("Process: sequential"))
        .stdout(predicate::str::contains("Tasks: 2"));
}

#[test]
fn test_validate_unknown_agent() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(
        &dir,
        "bad.yaml",
        r#"
name: bad
agents:
  - id: a
    name: A
    role: R
    goal: G
tasks:
  - id: t1
    description: do it
    agent: ghost
"#,
    );

    crewflow_cmd(&dir)
        .arg("validate")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("CREW-005"))
        .stderr(predicate::str::contains("Fix:"));
}

#[test]
fn test_validate_malformed_yaml() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "broken.yaml", "name: [unterminated");

    crewflow_cmd(&dir)
        .arg("validate")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("CREW-001"));
}

#[test]
fn test_validate_missing_file() {
    let dir = TempDir::new().unwrap();
    crewflow_cmd(&dir)
        .args(["validate", "nope.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"));
}

// ============================================================================
// levels
// ============================================================================

#[test]
fn test_levels_diamond() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(
        &dir,
        "diamond.yaml",
        r#"
name: diamond
process: parallel
agents:
  - id: a
    name: A
    role: R
    goal: G
tasks:
  - { id: left, description: l, agent: a }
  - { id: right, description: r, agent: a }
  - { id: merge, description: m, agent: a, depends_on: [left, right] }
"#,
    );

    crewflow_cmd(&dir)
        .arg("levels")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Level 1: left, right"))
        .stdout(predicate::str::contains("Level 2: merge"));
}

#[test]
fn test_levels_reports_cycle() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(
        &dir,
        "cycle.yaml",
        r#"
name: cycle
process: parallel
agents:
  - id: a
    name: A
    role: R
    goal: G
tasks:
  - { id: x, description: x, agent: a, depends_on: [y] }
  - { id: y, description: y, agent: a, depends_on: [x] }
"#,
    );

    crewflow_cmd(&dir)
        .arg("levels")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("(forced)"))
        .stdout(predicate::str::contains("Unsatisfied dependencies"));
}

// ============================================================================
// run
// ============================================================================

#[test]
fn test_run_with_mock_provider() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);

    crewflow_cmd(&dir)
        .arg("run")
        .arg(&file)
        .args(["--provider", "mock", "-i", "topic=ownership", "--config"])
        .arg(absent_config(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("Running crew 'research'"))
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("Mock response"));
}

#[test]
fn test_run_json_output() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);

    let output = crewflow_cmd(&dir)
        .arg("run")
        .arg(&file)
        .args(["--provider", "mock", "--json", "--config"])
        .arg(absent_config(&dir))
        .output()
        .unwrap();
    assert!(output.status.success());

    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "completed");
    assert_eq!(result["final_output"], "Mock response");
    assert_eq!(result["task_results"].as_object().unwrap().len(), 2);
    assert_eq!(result["steps"][0]["type"], "task_start");
}

#[test]
fn test_run_stream_prints_steps() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);

    crewflow_cmd(&dir)
        .arg("run")
        .arg(&file)
        .args(["--provider", "mock", "--stream", "--process", "parallel", "--config"])
        .arg(absent_config(&dir))
        .assert()
        .success()
        .stdout(predicate::str::contains("task_start"))
        .stdout(predicate::str::contains("agent_response"))
        .stdout(predicate::str::contains("task_complete"));
}

#[test]
fn test_run_persists_to_store_dir() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);
    let runs = dir.path().join("runs");

    crewflow_cmd(&dir)
        .arg("run")
        .arg(&file)
        .args(["--provider", "mock", "--store-dir"])
        .arg(&runs)
        .arg("--config")
        .arg(absent_config(&dir))
        .assert()
        .success();

    let records: Vec<_> = fs::read_dir(&runs).unwrap().collect();
    assert_eq!(records.len(), 1);
    let content = fs::read_to_string(records[0].as_ref().unwrap().path()).unwrap();
    assert!(content.contains("\"status\": \"completed\""));
}

#[test]
fn test_run_rejects_malformed_input() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);

    crewflow_cmd(&dir)
        .arg("run")
        .arg(&file)
        .args(["--provider", "mock", "-i", "novalue", "--config"])
        .arg(absent_config(&dir))
        .assert()
        .failure()
        .stderr(predicate::str::contains("CREW-051"));
}

#[test]
fn test_run_unknown_provider() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);

    crewflow_cmd(&dir)
        .arg("run")
        .arg(&file)
        .args(["--provider", "carrier-pigeon", "--config"])
        .arg(absent_config(&dir))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown provider"));
}

#[test]
fn test_run_openai_without_key() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);

    crewflow_cmd(&dir)
        .arg("run")
        .arg(&file)
        .arg("--config")
        .arg(absent_config(&dir))
        .assert()
        .failure()
        .stderr(predicate::str::contains("API key not set"));
}

#[test]
fn test_run_reads_provider_from_config_file() {
    let dir = TempDir::new().unwrap();
    let file = write_crew(&dir, "crew.yaml", RESEARCH_CREW);
    let config = dir.path().join("config.toml");
    fs::write(&config, "[provider]\nname = \"mock\"\n").unwrap();

    crewflow_cmd(&dir)
        .arg("run")
        .arg(&file)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("with mock"));
}
