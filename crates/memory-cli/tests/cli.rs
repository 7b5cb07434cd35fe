use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::Path;

fn cli(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("memory-cli").unwrap();
    cmd.arg("--root")
        .arg(home)
        .env_remove("OPENAI_API_KEY")
        .env_remove("AGENT_MEMORY_DEBUG");
    cmd
}

fn json_out(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

fn append(home: &Path, draft: Value) -> Value {
    json_out(cli(home).arg("append").write_stdin(draft.to_string()))
}

#[test]
fn test_init_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");

    cli(&home).arg("init").assert().success();
    append(&home, json!({"goal_summary": "keep me", "tool_call_count": 3}));
    cli(&home).arg("init").assert().success();

    let recent = json_out(cli(&home).arg("recent"));
    assert_eq!(recent.as_array().unwrap().len(), 1);
    assert_eq!(recent[0]["goal_summary"], "keep me");
}

#[test]
fn test_append_show_and_search() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");

    let first = append(
        &home,
        json!({"goal_summary": "restart docker daemon", "keywords": ["docker"], "tool_call_count": 4,
               "outcome": "SUCCESS", "heuristics": ["check systemctl status first"]}),
    );
    append(&home, json!({"goal_summary": "unrelated task", "tool_call_count": 2}));
    assert_eq!(first["trivial"], false);
    assert_eq!(first["embedded"], false);

    let id = first["id"].as_str().unwrap();
    let episode = json_out(cli(&home).args(["show", id]));
    assert_eq!(episode["outcome"], "SUCCESS");
    assert_eq!(episode["heuristics"][0], "check systemctl status first");

    let scores = json_out(cli(&home).args(["search", "docker daemon", "--keyword-only"]));
    assert_eq!(scores.as_array().unwrap().len(), 1);
    assert_eq!(scores[0]["entry"]["id"], id);
    assert_eq!(scores[0]["match_score"], 1.0);

    let hits = json_out(cli(&home).args(["search", "docker daemon", "--episodes"]));
    assert_eq!(hits[0]["relevance"], 1.0);
    assert_eq!(hits[0]["episode"]["id"], id);

    cli(&home)
        .args(["search", "docker daemon", "--context"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1. [SUCCESS] restart docker daemon (relevance: 1.00)"))
        .stdout(predicate::str::contains("   - check systemctl status first"));
}

#[test]
fn test_show_missing_and_invalid_ids() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");
    cli(&home).arg("init").assert().success();

    cli(&home)
        .args(["show", "ep_nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
    cli(&home)
        .args(["show", "../config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid identifier"));
}

#[test]
fn test_capacity_moves_overflow_to_archive() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");
    cli(&home).args(["config", "set", "max_index_entries", "3"]).assert().success();

    let mut ids = Vec::new();
    for i in 0..5 {
        let out = append(&home, json!({"goal_summary": format!("task {}", i), "tool_call_count": 2}));
        ids.push(out["id"].as_str().unwrap().to_string());
    }

    let live: Vec<String> = json_out(cli(&home).args(["recent", "-n", "10"]))
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(live, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);

    let years = json_out(cli(&home).args(["archive", "--list"]));
    assert_eq!(years.as_array().unwrap().len(), 1);
    let year = years[0].as_i64().unwrap().to_string();
    let archived: Vec<String> = json_out(cli(&home).args(["archive", "--year", &year]))
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(archived, vec![ids[0].clone(), ids[1].clone()]);
}

#[test]
fn test_consolidation_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");

    append(&home, json!({"goal_summary": "say hi", "tool_call_count": 0}));
    let a = append(&home, json!({"goal_summary": "migrate database", "tool_call_count": 5}));
    let b = append(&home, json!({"goal_summary": "tune queries", "tool_call_count": 5}));

    let pending = json_out(cli(&home).arg("unconsolidated"));
    let pending: Vec<&str> = pending.as_array().unwrap().iter().map(|e| e["id"].as_str().unwrap()).collect();
    assert_eq!(pending, vec![b["id"].as_str().unwrap(), a["id"].as_str().unwrap()]);

    let result = json_out(cli(&home).args(["consolidate", b["id"].as_str().unwrap(), "ep_missing"]));
    assert_eq!(result, json!({"requested": 2, "changed": 1}));

    let pending = json_out(cli(&home).arg("unconsolidated"));
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["id"], a["id"]);
}

#[test]
fn test_config_show_and_set() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");
    cli(&home).arg("init").assert().success();

    let config = json_out(cli(&home).args(["config", "show"]));
    assert_eq!(config["retrieval_k"], 5);
    assert_eq!(config["embedding_provider"], "none");

    let config = json_out(cli(&home).args(["config", "set", "team", "infra"]));
    assert_eq!(config["team"], "infra");

    cli(&home)
        .args(["config", "set", "retrieval_k", "many"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value for config key retrieval_k"))
        .stderr(predicate::str::contains("malformed").not());
    let config = json_out(cli(&home).args(["config", "show"]));
    assert_eq!(config["retrieval_k"], 5);
    assert_eq!(config["team"], "infra");
}

#[test]
fn test_rules_add_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");

    let rule = json_out(cli(&home).args([
        "rules", "add", "--trigger", "docker", "--content", "check the daemon first", "--confidence", "0.8",
        "--episode", "ep_1",
    ]));
    assert!(rule["id"].as_str().unwrap().starts_with("rule_"));
    assert_eq!(rule["source"], "manual");

    let rules = json_out(cli(&home).args(["rules", "list"]));
    assert_eq!(rules.as_array().unwrap().len(), 1);
    assert_eq!(rules[0]["trigger_concept"], "docker");
    assert_eq!(rules[0]["source_episodes"], json!(["ep_1"]));
}

#[test]
fn test_check_reports_malformed_documents() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");
    let out = append(&home, json!({"goal_summary": "something", "tool_call_count": 2}));

    cli(&home).arg("check").assert().success();

    let id = out["id"].as_str().unwrap();
    std::fs::write(home.join(format!("episodes/{}.json", id)), "{\"truncated\": ").unwrap();

    let output = cli(&home).arg("check").assert().failure().get_output().stdout.clone();
    let report: Value = serde_json::from_slice(&output).unwrap();
    let bad: Vec<&Value> = report
        .as_array()
        .unwrap()
        .iter()
        .filter(|item| item["status"] == "malformed")
        .collect();
    assert_eq!(bad.len(), 1);
    assert!(bad[0]["path"].as_str().unwrap().ends_with(&format!("{}.json", id)));
}

#[test]
fn test_recent_context_block() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");
    cli(&home).arg("init").assert().success();
    let index = json!({
        "last_updated": "2025-06-14T09:30:00Z",
        "total_entries": 2,
        "entries": [
            {"id": "ep_b", "timestamp": "2025-06-14T09:30:00Z", "outcome": "SUCCESS", "goal_summary": "Restart docker daemon"},
            {"id": "ep_a", "timestamp": "2025-06-12T08:00:00Z", "outcome": "FAILURE", "goal_summary": "Upgrade node"}
        ]
    });
    std::fs::write(home.join("episodes/index.json"), index.to_string()).unwrap();

    let output = cli(&home).args(["recent", "--context"]).assert().success().get_output().stdout.clone();
    insta::assert_snapshot!(String::from_utf8(output).unwrap(), @r###"
    # Recent episodes

    1. [SUCCESS] Restart docker daemon (2025-06-14)
    2. [FAILURE] Upgrade node (2025-06-12)

    ---
    "###);
}

#[test]
fn test_concurrent_processes_append_every_episode() {
    let dir = tempfile::tempdir().unwrap();
    let home = dir.path().join("memory");
    cli(&home).arg("init").assert().success();

    let bin = assert_cmd::cargo::cargo_bin("memory-cli");
    let workers = 8;
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let draft = json!({"goal_summary": format!("parallel task {}", i), "tool_call_count": 2});
            duct::cmd!(&bin, "--root", &home, "append")
                .env_remove("OPENAI_API_KEY")
                .stdin_bytes(draft.to_string())
                .stdout_capture()
                .stderr_capture()
                .unchecked()
                .start()
                .unwrap()
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        let output = handle.into_output().unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let reply: Value = serde_json::from_slice(&output.stdout).unwrap();
        ids.insert(reply["id"].as_str().unwrap().to_string());
    }
    assert_eq!(ids.len(), workers);

    let index: Value = serde_json::from_str(&std::fs::read_to_string(home.join("episodes/index.json")).unwrap()).unwrap();
    assert_eq!(index["total_entries"], workers);
    let indexed: HashSet<String> = index["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(indexed, ids);
}
