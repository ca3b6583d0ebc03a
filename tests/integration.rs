//! Black-box integration tests for the `psik` binary.
//!
//! Each test spawns the compiled binary against an isolated prefix
//! directory (via a generated config file) and inspects the on-disk
//! job directory it produces, since the CLI itself is thin glue with
//! no JSON envelope of its own (spec §6).

use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

/// Path to the compiled binary.
fn binary() -> PathBuf {
    let mut p = std::env::current_exe().expect("current exe");
    p.pop(); // remove test binary name
    if p.ends_with("deps") {
        p.pop();
    }
    p.push("psik");
    if cfg!(windows) {
        p.set_extension("exe");
    }
    p
}

/// Test harness owning an isolated prefix directory and a matching
/// config file pointing at it, with a single `local` backend.
struct TestHarness {
    _tmp: tempfile::TempDir,
    prefix: PathBuf,
    config_path: PathBuf,
}

impl TestHarness {
    fn new() -> Self {
        let tmp = tempfile::tempdir().expect("create tempdir");
        let prefix = tmp.path().join("jobs");
        std::fs::create_dir_all(&prefix).unwrap();

        let config_path = tmp.path().join("psik.json");
        let config_body = serde_json::json!({
            "prefix": prefix.to_str().unwrap(),
            "backends": {
                "default": { "type": "local", "attributes": {} }
            }
        });
        let mut f = std::fs::File::create(&config_path).unwrap();
        f.write_all(config_body.to_string().as_bytes()).unwrap();

        Self {
            _tmp: tmp,
            prefix,
            config_path,
        }
    }

    fn run(&self, args: &[&str]) -> std::process::Output {
        Command::new(binary())
            .arg("--config")
            .arg(&self.config_path)
            .args(args)
            .output()
            .expect("run binary")
    }

    fn write_spec_file(&self, script: &str) -> PathBuf {
        let path = self._tmp.path().join("job.json");
        let body = serde_json::json!({
            "script": script,
            "backend": "default",
        });
        std::fs::write(&path, body.to_string()).unwrap();
        path
    }

    fn job_dirs(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.prefix)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .collect();
        names.sort();
        names
    }
}

fn stdout_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// ── version ──────────────────────────────────────────────────────────────

#[test]
fn version_prints_crate_version() {
    let h = TestHarness::new();
    let out = h.run(&["version"]);
    assert!(out.status.success());
    assert!(stdout_of(&out).contains(env!("CARGO_PKG_VERSION")));
}

// ── run ──────────────────────────────────────────────────────────────────

#[test]
fn run_creates_job_directory_with_new_row_and_submits() {
    let h = TestHarness::new();
    let spec_path = h.write_spec_file("#!/bin/sh\necho hello\n");

    let out = h.run(&["run", spec_path.to_str().unwrap()]);
    assert!(
        out.status.success(),
        "run failed: {}",
        stderr_of(&out)
    );
    let stdout = stdout_of(&out);
    assert!(
        stdout.contains("jobndx=") && stdout.contains("native_id="),
        "unexpected run output: {stdout}"
    );

    let dirs = h.job_dirs();
    assert_eq!(dirs.len(), 1, "expected exactly one job directory");

    let job_dir = h.prefix.join(&dirs[0]);
    assert!(job_dir.join("spec.json").is_file());
    assert!(job_dir.join("status.csv").is_file());
    assert!(job_dir.join("work").is_dir());
}

#[test]
fn run_rejects_missing_spec_file() {
    let h = TestHarness::new();
    let out = h.run(&["run", "/no/such/jobspec.json"]);
    assert!(!out.status.success());
}

// ── ls / status ──────────────────────────────────────────────────────────

#[test]
fn ls_lists_created_jobs() {
    let h = TestHarness::new();
    let spec_path = h.write_spec_file("#!/bin/sh\ntrue\n");

    h.run(&["run", spec_path.to_str().unwrap()]);
    std::thread::sleep(std::time::Duration::from_millis(5));
    h.run(&["run", spec_path.to_str().unwrap()]);

    let out = h.run(&["ls"]);
    assert!(out.status.success());
    let stdout = stdout_of(&out);
    assert_eq!(
        stdout.lines().count(),
        2,
        "expected one line per job: {stdout}"
    );
}

#[test]
fn status_reports_state_for_known_job() {
    let h = TestHarness::new();
    let spec_path = h.write_spec_file("#!/bin/sh\ntrue\n");
    h.run(&["run", spec_path.to_str().unwrap()]);
    let stamp = h.job_dirs().remove(0);

    let out = h.run(&["status", &stamp]);
    assert!(out.status.success(), "status failed: {}", stderr_of(&out));
    assert!(stdout_of(&out).contains(&stamp));
}

#[test]
fn status_errors_for_unknown_stamp() {
    let h = TestHarness::new();
    let out = h.run(&["status", "9999999999.000"]);
    assert!(!out.status.success());
    assert!(
        stderr_of(&out).to_lowercase().contains("not found")
            || stderr_of(&out).to_lowercase().contains("no such"),
        "expected a not-found style error: {}",
        stderr_of(&out)
    );
}

// ── cancel / rm ──────────────────────────────────────────────────────────

#[test]
fn cancel_on_a_new_job_records_canceled_sentinel() {
    let h = TestHarness::new();
    let spec_path = h.write_spec_file("#!/bin/sh\nsleep 30\n");
    // Only create the job (no submit), by calling `run` would submit it;
    // since there is no standalone "create" subcommand, cancel is
    // exercised directly against a just-created-but-not-yet-polled job.
    h.run(&["run", spec_path.to_str().unwrap()]);
    let stamp = h.job_dirs().remove(0);

    let out = h.run(&["cancel", &stamp]);
    assert!(out.status.success(), "cancel failed: {}", stderr_of(&out));

    let status_csv = h.prefix.join(&stamp).join("status.csv");
    let contents = std::fs::read_to_string(status_csv).unwrap();
    assert!(
        contents.lines().any(|l| l.contains("canceled")),
        "expected a canceled row in status.csv: {contents}"
    );
}

#[test]
fn rm_deletes_the_job_directory() {
    let h = TestHarness::new();
    let spec_path = h.write_spec_file("#!/bin/sh\ntrue\n");
    h.run(&["run", spec_path.to_str().unwrap()]);
    let stamp = h.job_dirs().remove(0);

    let out = h.run(&["rm", &stamp]);
    assert!(out.status.success(), "rm failed: {}", stderr_of(&out));
    assert!(!h.prefix.join(&stamp).exists());
}

#[test]
fn rm_errors_for_unknown_stamp() {
    let h = TestHarness::new();
    let out = h.run(&["rm", "9999999999.000"]);
    assert!(!out.status.success());
}

// ── hot-start / reached ───────────────────────────────────────────────────

#[test]
fn hot_start_executes_script_and_records_completed() {
    let h = TestHarness::new();
    let jobspec = serde_json::json!({
        "script": "#!/bin/sh\necho from_hot_start\n",
        "backend": "default",
    })
    .to_string();

    let stamp = "1700000000.000";
    let out = h.run(&["hot-start", stamp, "0", &jobspec]);
    assert!(
        out.status.success(),
        "hot-start failed: {}\n{}",
        stdout_of(&out),
        stderr_of(&out)
    );

    let job_dir = h.prefix.join(stamp);
    let status_csv = job_dir.join("status.csv");
    let contents = std::fs::read_to_string(&status_csv).unwrap();
    assert!(
        contents.lines().any(|l| l.contains("completed")),
        "expected a completed row: {contents}"
    );

    let stdout_log = job_dir.join("log").join("stdout.0");
    assert!(stdout_log.is_file());
    let log_contents = std::fs::read_to_string(stdout_log).unwrap();
    assert!(log_contents.contains("from_hot_start"));
}

#[test]
fn hot_start_records_failed_on_nonzero_exit() {
    let h = TestHarness::new();
    let jobspec = serde_json::json!({
        "script": "#!/bin/sh\nexit 3\n",
        "backend": "default",
    })
    .to_string();

    let stamp = "1700000001.000";
    let out = h.run(&["hot-start", stamp, "0", &jobspec]);
    assert_eq!(out.status.code(), Some(3));

    let status_csv = h.prefix.join(stamp).join("status.csv");
    let contents = std::fs::read_to_string(status_csv).unwrap();
    assert!(
        contents.lines().any(|l| l.contains("failed")),
        "expected a failed row: {contents}"
    );
}

#[test]
fn reached_appends_transition_row() {
    let h = TestHarness::new();
    let spec_path = h.write_spec_file("#!/bin/sh\ntrue\n");
    h.run(&["run", spec_path.to_str().unwrap()]);
    let stamp = h.job_dirs().remove(0);
    let job_dir = h.prefix.join(&stamp);

    let out = h.run(&[
        "reached",
        job_dir.to_str().unwrap(),
        "0",
        "completed",
        "manual test note",
    ]);
    assert!(out.status.success(), "reached failed: {}", stderr_of(&out));

    let contents = std::fs::read_to_string(job_dir.join("status.csv")).unwrap();
    assert!(contents.lines().any(|l| l.contains("manual test note")));
}

// ── stdout/stderr discipline ───────────────────────────────────────────────

/// The CLI is diagnostic glue, not a JSON protocol (unlike the old
/// agent-exec contract) — logs go to stderr, never stdout.
#[test]
fn verbose_logs_go_to_stderr_not_stdout() {
    let h = TestHarness::new();
    let spec_path = h.write_spec_file("#!/bin/sh\ntrue\n");
    let out = Command::new(binary())
        .arg("--config")
        .arg(&h.config_path)
        .arg("-vv")
        .args(["run", spec_path.to_str().unwrap()])
        .output()
        .expect("run binary");
    assert!(out.status.success());
    // stdout should only contain the one-line submission summary.
    let stdout = stdout_of(&out);
    for line in stdout.lines() {
        assert!(
            !line.starts_with('{'),
            "stdout should not carry structured log output: {line}"
        );
    }
}

#[test]
fn invalid_subcommand_is_a_usage_error() {
    let out = Command::new(binary())
        .args(["__no_such_subcommand__"])
        .output()
        .expect("run binary");
    assert!(!out.status.success());
}
