//! Runs the `sharewright` binary against mock daemon backends and checks
//! exit codes, stdout and the files it leaves behind.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Fixture {
    dir: tempfile::TempDir,
    settings: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("etc")).unwrap();

        let mut toml = format!(
            "state_dir = \"{}\"\n\n[accounts]\nbackend = \"mock\"\n",
            root.join("state").display()
        );
        for protocol in ["smb", "nfs", "ftp"] {
            toml.push_str(&format!(
                "\n[{protocol}]\nbackend = \"mock\"\nconfig_path = \"{}\"\nbackup_dir = \"{}\"\nverify_timeout_ms = 200\npoll_interval_ms = 10\n",
                root.join("etc").join(format!("{protocol}.conf")).display(),
                root.join("backups").join(protocol).display(),
            ));
        }
        let settings = root.join("sharewright.toml");
        std::fs::write(&settings, toml).unwrap();

        Self { dir, settings }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn conf(&self, protocol: &str) -> PathBuf {
        self.root().join("etc").join(format!("{protocol}.conf"))
    }

    fn share_file(&self, file: &str, body: &str) -> PathBuf {
        let path = self.root().join(file);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn docs_share(&self) -> PathBuf {
        let body = format!(
            "name = \"docs\"\nprotocol = \"smb\"\npath = \"{}\"\nread_only = false\nguest_allowed = true\n",
            self.root().join("shares").join("docs").display()
        );
        self.share_file("docs.toml", &body)
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_sharewright"))
            .arg("--config")
            .arg(&self.settings)
            .args(args)
            .env_remove("SHAREWRIGHT_CONFIG")
            .env_remove("SHAREWRIGHT_LOG")
            .output()
            .unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("invalid JSON ({e}): {}", stdout(output)))
}

#[test]
fn version_exits_zero() {
    let output = Command::new(env!("CARGO_BIN_EXE_sharewright"))
        .arg("--version")
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("sharewright"));
}

#[test]
fn help_lists_commands() {
    let output = Command::new(env!("CARGO_BIN_EXE_sharewright"))
        .arg("--help")
        .output()
        .unwrap();
    assert!(output.status.success());
    let text = stdout(&output);
    for command in ["apply", "remove", "list", "status", "recover", "doctor"] {
        assert!(text.contains(command), "missing {command} in:\n{text}");
    }
}

#[test]
fn apply_writes_smb_section() {
    let fx = Fixture::new();
    let share = fx.docs_share();
    let output = fx.run(&["apply", share.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));

    let conf = std::fs::read_to_string(fx.conf("smb")).unwrap();
    assert!(conf.contains("[docs]"));
    assert!(conf.contains("guest ok = yes"));
    assert!(fx.root().join("shares").join("docs").is_dir());
}

#[test]
fn apply_json_reports_trace() {
    let fx = Fixture::new();
    let share = fx.docs_share();
    let output = fx.run(&["--json", "apply", share.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));

    let result = json(&output);
    assert_eq!(result["status"], "committed");
    assert_eq!(result["protocol"], "smb");
    let trace = result["trace"].as_array().unwrap();
    assert_eq!(trace.first().unwrap(), "pending");
    assert_eq!(trace.last().unwrap(), "committed");

    let again = fx.run(&["--json", "apply", share.to_str().unwrap()]);
    assert_eq!(again.status.code(), Some(0));
    assert_eq!(json(&again)["changed"], false);
}

#[test]
fn reserved_name_exits_two() {
    let fx = Fixture::new();
    let share = fx.share_file(
        "global.toml",
        "name = \"global\"\nprotocol = \"smb\"\npath = \"/srv/global\"\n",
    );
    let output = fx.run(&["apply", share.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!fx.conf("smb").exists());
}

#[test]
fn missing_share_file_exits_one() {
    let fx = Fixture::new();
    let output = fx.run(&["apply", "/nonexistent/share.toml"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error:"));
}

#[test]
fn list_json_matches_applied_shares() {
    let fx = Fixture::new();
    let share = fx.docs_share();
    fx.run(&["apply", share.to_str().unwrap()]);

    let output = fx.run(&["--json", "list", "smb"]);
    assert!(output.status.success());
    let shares = json(&output);
    let shares = shares.as_array().unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0]["name"], "docs");
    assert_eq!(shares[0]["guest_allowed"], true);

    let all = fx.run(&["--json", "list"]);
    assert_eq!(json(&all).as_array().unwrap().len(), 1);
}

#[test]
fn status_of_mock_daemons_is_active() {
    let fx = Fixture::new();
    let output = fx.run(&["--json", "status"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let rows = json(&output);
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r["health"] == "active"));
}

#[test]
fn remove_drops_section() {
    let fx = Fixture::new();
    let share = fx.docs_share();
    fx.run(&["apply", share.to_str().unwrap()]);

    let output = fx.run(&["remove", "smb", "docs"]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let conf = std::fs::read_to_string(fx.conf("smb")).unwrap();
    assert!(!conf.contains("[docs]"));
}

#[test]
fn unknown_protocol_is_a_usage_error() {
    let fx = Fixture::new();
    let output = fx.run(&["remove", "afp", "docs"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("afp"));
}

#[test]
fn backups_and_prune() {
    let fx = Fixture::new();
    let share = fx.docs_share();
    fx.run(&["apply", share.to_str().unwrap()]);
    let public = fx.share_file(
        "public.toml",
        &format!(
            "name = \"public\"\nprotocol = \"smb\"\npath = \"{}\"\nread_only = true\n",
            fx.root().join("shares").join("public").display()
        ),
    );
    fx.run(&["apply", public.to_str().unwrap()]);

    let listed = fx.run(&["--json", "backups", "smb"]);
    assert!(listed.status.success());
    assert_eq!(json(&listed).as_array().unwrap().len(), 2);

    let pruned = fx.run(&["--json", "prune", "smb", "--keep", "1"]);
    assert!(pruned.status.success());
    assert_eq!(json(&pruned)["pruned"].as_array().unwrap().len(), 1);

    let listed = fx.run(&["--json", "backups", "smb"]);
    assert_eq!(json(&listed).as_array().unwrap().len(), 1);
}

#[test]
fn recover_on_clean_journal() {
    let fx = Fixture::new();
    let output = fx.run(&["recover"]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stdout(&output).contains("nothing to recover"));

    let output = fx.run(&["--json", "recover"]);
    assert_eq!(json(&output), serde_json::json!([]));
}

#[test]
fn doctor_json_is_healthy() {
    let fx = Fixture::new();
    let output = fx.run(&["--json", "doctor"]);
    assert_eq!(output.status.code(), Some(0), "stdout: {}", stdout(&output));
    let report = json(&output);
    assert_eq!(report["healthy"], true);
    assert!(report["checks"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c["name"] == "settings" && c["status"] == "pass"));
}

#[test]
fn completions_bash() {
    let output = Command::new(env!("CARGO_BIN_EXE_sharewright"))
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("sharewright"));
}

#[test]
fn unknown_settings_field_exits_one() {
    let fx = Fixture::new();
    std::fs::write(&fx.settings, "[smb]\nconfg_path = \"/tmp/x\"\n").unwrap();
    let output = fx.run(&["list"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("confg_path"));
}
