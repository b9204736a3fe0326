#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn phasegate(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("phasegate").unwrap();
    cmd.current_dir(dir.path())
        .env("PHASEGATE_ROOT", dir.path())
        .env_remove("PHASEGATE_SESSION");
    cmd
}

fn init_project(dir: &TempDir) {
    phasegate(dir).arg("init").assert().success();
}

fn json(dir: &TempDir, args: &[&str]) -> serde_json::Value {
    let out = phasegate(dir)
        .arg("--json")
        .args(args)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "{args:?} failed: {}",
        String::from_utf8_lossy(&out.stdout)
    );
    serde_json::from_slice(&out.stdout).unwrap()
}

fn create_item(dir: &TempDir, key: &str, ty: &str) {
    phasegate(dir)
        .args(["item", "create", key, "--title", "Test item", "--type", ty])
        .assert()
        .success();
}

const HANDOFF: &str = r#"
executive_summary: Scope approved by LEAD
completeness_report: Objectives, metrics and risks recorded
deliverables_manifest: [objectives]
key_decisions: [Reuse existing tables]
known_issues: [None]
resource_utilization: One session
action_items: [Write the PRD]
"#;

fn write_handoff(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("handoff.yaml");
    std::fs::write(&path, body).unwrap();
    path.display().to_string()
}

// ---------------------------------------------------------------------------
// phasegate init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_config_and_datastore() {
    let dir = TempDir::new().unwrap();
    phasegate(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains(".phasegate/config.yaml"));

    assert!(dir.path().join(".phasegate/config.yaml").exists());
    assert!(dir.path().join(".phasegate/phasegate.db").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    phasegate(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("exists"));
}

#[test]
fn commands_before_init_fail() {
    let dir = TempDir::new().unwrap();
    phasegate(&dir)
        .args(["item", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("phasegate init"));
}

// ---------------------------------------------------------------------------
// phasegate item
// ---------------------------------------------------------------------------

#[test]
fn item_create_list_show() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_item(&dir, "SD-AUTH-001", "feature");

    phasegate(&dir)
        .args(["item", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("SD-AUTH-001"))
        .stdout(predicate::str::contains("LEAD_preapproval"));

    let shown = json(&dir, &["item", "show", "SD-AUTH-001"]);
    assert_eq!(shown["item"]["status"], "draft");
    assert_eq!(shown["item"]["type"], "feature");
}

#[test]
fn duplicate_key_is_rejected() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_item(&dir, "SD-DUP-001", "bugfix");
    phasegate(&dir)
        .args(["item", "create", "SD-DUP-001", "--title", "Again", "--type", "bugfix"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn unknown_type_is_a_usage_error() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    phasegate(&dir)
        .args(["item", "create", "SD-X-001", "--title", "X", "--type", "spike"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown work item type"));
}

// ---------------------------------------------------------------------------
// Handoffs and transitions
// ---------------------------------------------------------------------------

#[test]
fn handoff_gates_the_transition() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_item(&dir, "SD-FLOW-001", "bugfix");
    phasegate(&dir)
        .args(["item", "activate", "SD-FLOW-001"])
        .assert()
        .success();
    phasegate(&dir)
        .args([
            "objectives", "record", "SD-FLOW-001",
            "--objective", "Fix login crash",
            "--metric", "Zero crash reports",
            "--risk", "Session regression",
        ])
        .assert()
        .success();

    phasegate(&dir)
        .args(["transition", "SD-FLOW-001", "PLAN_prd"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no accepted LEAD-TO-PLAN handoff"));

    let file = write_handoff(&dir, HANDOFF);
    let submitted = json(&dir, &["handoff", "submit", "SD-FLOW-001", "--file", &file]);
    assert_eq!(submitted["status"], "pending_acceptance");
    assert_eq!(submitted["to_phase"], "PLAN_prd");
    let id = submitted["id"].as_str().unwrap().to_string();

    // A second pending submission for the same edge conflicts.
    let out = phasegate(&dir)
        .args(["--json", "handoff", "submit", "SD-FLOW-001", "--file", &file])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let err: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(err["kind"], "conflict");
    assert_eq!(err["retryable"], true);

    phasegate(&dir)
        .args(["handoff", "accept", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("accepted"));
    // Accepting again is a no-op success.
    phasegate(&dir).args(["handoff", "accept", &id]).assert().success();

    phasegate(&dir)
        .args(["transition", "SD-FLOW-001", "PLAN_prd"])
        .assert()
        .success()
        .stdout(predicate::str::contains("LEAD_preapproval -> PLAN_prd"));

    let progress = json(&dir, &["progress", "SD-FLOW-001"]);
    assert_eq!(progress["current_phase"], "PLAN_prd");
    assert_eq!(progress["per_phase"]["LEAD_preapproval"]["complete"], true);
}

#[test]
fn incomplete_handoff_names_the_missing_field() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_item(&dir, "SD-FLOW-002", "bugfix");
    let file = write_handoff(&dir, "executive_summary: only this\n");

    let out = phasegate(&dir)
        .args(["--json", "handoff", "submit", "SD-FLOW-002", "--file", &file])
        .output()
        .unwrap();
    assert!(!out.status.success());
    let err: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(err["kind"], "validation");
    assert!(err["error"]
        .as_str()
        .unwrap()
        .contains("completeness_report"));
}

#[test]
fn rejected_handoff_can_be_resubmitted() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_item(&dir, "SD-FLOW-003", "bugfix");
    let file = write_handoff(&dir, HANDOFF);

    let first = json(&dir, &["handoff", "submit", "SD-FLOW-003", "--file", &file]);
    let id = first["id"].as_str().unwrap().to_string();
    phasegate(&dir)
        .args(["handoff", "reject", &id, "--reason", "thin summary"])
        .assert()
        .success();
    phasegate(&dir)
        .args(["handoff", "reject", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already rejected"));

    json(&dir, &["handoff", "submit", "SD-FLOW-003", "--file", &file]);
    let listed = json(&dir, &["handoff", "list", "SD-FLOW-003"]);
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[test]
fn skipping_phases_is_rejected() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_item(&dir, "SD-SKIP-001", "bugfix");
    phasegate(&dir)
        .args(["transition", "SD-SKIP-001", "EXEC_implementation"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("phases cannot be skipped"));
}

// ---------------------------------------------------------------------------
// Leases, sweep, repair
// ---------------------------------------------------------------------------

#[test]
fn lease_conflict_between_sessions() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_item(&dir, "SD-LEASE-001", "feature");

    phasegate(&dir)
        .args(["lease", "claim", "SD-LEASE-001", "--session", "alpha"])
        .assert()
        .success()
        .stdout(predicate::str::contains("claimed by alpha"));
    phasegate(&dir)
        .args(["lease", "claim", "SD-LEASE-001", "--session", "beta"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("conflict"));
    phasegate(&dir)
        .args(["lease", "release", "SD-LEASE-001", "--session", "alpha"])
        .assert()
        .success();
    phasegate(&dir)
        .args(["lease", "claim", "SD-LEASE-001", "--session", "beta"])
        .assert()
        .success();
}

#[test]
fn sweep_reports_and_repair_clears_expired_lease() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    create_item(&dir, "SD-EXP-001", "feature");
    phasegate(&dir)
        .args([
            "lease", "claim", "SD-EXP-001", "--session", "alpha", "--ttl-minutes", "0",
        ])
        .assert()
        .success();

    let found = json(&dir, &["sweep", "--kind", "expired_lease"]);
    let found = found.as_array().unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["id"], "expired_lease:SD-EXP-001");

    let repaired = json(&dir, &["repair", "expired_lease:SD-EXP-001"]);
    assert_eq!(repaired["outcome"], "repaired");
    assert!(repaired["work_item"].get("lease").is_none());

    phasegate(&dir)
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("No violations."));

    let out = phasegate(&dir)
        .args(["--json", "repair", "expired_lease:SD-EXP-001"])
        .output()
        .unwrap();
    let err: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(err["kind"], "not_found");
}

// ---------------------------------------------------------------------------
// phasegate config
// ---------------------------------------------------------------------------

#[test]
fn config_validate_flags_bad_floor() {
    let dir = TempDir::new().unwrap();
    init_project(&dir);
    phasegate(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No warnings"));

    std::fs::write(
        dir.path().join(".phasegate/config.yaml"),
        "version: 1\nproject:\n  name: demo\nprogress:\n  confidence_floor: 150\n",
    )
    .unwrap();
    phasegate(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("confidence_floor"));
}
