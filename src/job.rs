//! Job lifecycle: the state-machine core (spec §4.B, §4.C) bound to
//! one job directory.
//!
//! Structurally this plays the role of `original_source/psik/job.py`'s
//! `Job` class; `execute`'s supervisor loop (spawn, pipe to log files,
//! watch for timeout/signals) is grounded in the teacher's
//! `run.rs: supervise` since the Python revision retrieved here has no
//! `execute` method of its own — see DESIGN.md.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::backend;
use crate::callback;
use crate::error::{PsikError, Result};
use crate::jobdir::JobDir;
use crate::model::{BackendConfig, CallbackPayload, JobState, Transition};
use crate::statuslog;

pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

/// Row 0's `info` is a BackendConfig JSON document, base64-encoded so
/// the CSV's "no unescaped commas" invariant holds (resolved Open
/// Question, SPEC_FULL §C.1).
pub fn encode_backend_config(cfg: &BackendConfig) -> Result<String> {
    Ok(BASE64.encode(serde_json::to_vec(cfg)?))
}

fn decode_backend_config(info: &str) -> Result<BackendConfig> {
    let bytes = BASE64
        .decode(info)
        .map_err(|e| PsikError::InvalidJob(format!("row 0 info is not valid base64: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Result of `summarize` (spec §4.C): the next free run index, and
/// the outstanding run indices bucketed by state.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub next_jobndx: u64,
    pub by_state: BTreeMap<JobState, BTreeSet<u64>>,
}

/// `next_jobndx = 1 + max(jobndx)`; `queued`/`active` sets are reduced
/// by the "done mask" so they only contain genuinely outstanding runs
/// (spec §4.C).
pub fn summarize(history: &[Transition]) -> Summary {
    let next_jobndx = history.iter().map(|t| t.jobndx).max().map_or(0, |m| m + 1);

    let mut by_state: BTreeMap<JobState, BTreeSet<u64>> = BTreeMap::new();
    for t in history {
        by_state.entry(t.state).or_default().insert(t.jobndx);
    }

    let mut done: BTreeSet<u64> = BTreeSet::new();
    for s in [JobState::Completed, JobState::Failed, JobState::Canceled] {
        done.extend(by_state.get(&s).into_iter().flatten().copied());
    }
    if let Some(active) = by_state.get_mut(&JobState::Active) {
        active.retain(|i| !done.contains(i));
    }
    let active_snapshot = by_state.get(&JobState::Active).cloned().unwrap_or_default();
    if let Some(queued) = by_state.get_mut(&JobState::Queued) {
        queued.retain(|i| !active_snapshot.contains(i) && !done.contains(i));
    }

    Summary {
        next_jobndx,
        by_state,
    }
}

/// A hydrated job: its directory, immutable spec, and the
/// BackendConfig it was created under (row 0, not the live config —
/// spec §4.E "Dispatch").
pub struct Job {
    dir: JobDir,
    spec: crate::model::JobSpec,
    backend_config: BackendConfig,
    valid: bool,
}

impl Job {
    /// Load `spec.json` and row 0 of `status.csv`. Malformed rows
    /// elsewhere in the history are tolerated (logged, not raised) by
    /// `read_info`/`summarize`, not here.
    pub fn open(dir: JobDir) -> Result<Self> {
        let spec = dir.read_spec()?;
        let history = statuslog::read(&dir.status_path())?;
        let backend_config = match history.first() {
            Some(row0) => decode_backend_config(&row0.info)?,
            None => BackendConfig::default(),
        };
        Ok(Job {
            dir,
            spec,
            backend_config,
            valid: true,
        })
    }

    pub fn dir(&self) -> &JobDir {
        &self.dir
    }
    pub fn spec(&self) -> &crate::model::JobSpec {
        &self.spec
    }
    pub fn backend_config(&self) -> &BackendConfig {
        &self.backend_config
    }
    pub fn stamp(&self) -> &str {
        &self.dir.stamp
    }
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Idempotent; re-reads the full status log (spec §4.B).
    pub fn read_info(&self) -> Result<Vec<Transition>> {
        statuslog::read(&self.dir.status_path())
    }

    pub fn summarize(&self) -> Result<Summary> {
        Ok(summarize(&self.read_info()?))
    }

    fn fire_callback(&self, jobndx: u64, state: JobState, info: &str) -> bool {
        let Some(url) = &self.spec.callback else {
            return true;
        };
        let payload = CallbackPayload {
            jobid: self.stamp().to_string(),
            jobndx,
            state,
            info: info.to_string(),
        };
        match callback::dispatch(url, &payload, self.spec.cb_secret.as_deref()) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, jobndx, %state, "callback delivery failed");
                false
            }
        }
    }

    /// `reached` (spec §4.C). A `backdate` marks a replay from an
    /// authoritative source (polling) and never fires the callback;
    /// dedup on `(jobndx, state)` is the caller's job.
    pub fn reached(
        &self,
        jobndx: u64,
        state: JobState,
        info: &str,
        backdate: Option<f64>,
    ) -> Result<bool> {
        let time = backdate.unwrap_or_else(now_seconds);
        let t = Transition::new(time, jobndx, state, info)?;
        statuslog::append(&self.dir.status_path(), &t)?;
        if backdate.is_some() {
            return Ok(true);
        }
        Ok(self.fire_callback(jobndx, state, info))
    }

    /// `submit` (spec §4.C). Both `next_jobndx` and the backend call
    /// happen while the exclusive lock is held: reading the index
    /// before acquiring the guard would let two racing `submit()`
    /// calls both observe the same `next_jobndx` and each append
    /// `queued` at it (spec §8.6, §3 invariant 5). This is what gives
    /// an at-most-one `queued` row per jobndx even across racing
    /// processes — do not refactor this into "compute index, then
    /// lock" or "submit then record".
    pub fn submit(&self) -> Result<(u64, String)> {
        if !self.valid {
            return Err(PsikError::InvalidJob(
                "job is not fully hydrated".to_string(),
            ));
        }

        let mut guard = statuslog::WriteGuard::lock_blocking(&self.dir.status_path())?;
        let next_jobndx = summarize(&guard.read_locked()?).next_jobndx;
        let driver = backend::resolve(&self.backend_config.kind)?;
        let native_id = driver
            .submit(self, next_jobndx)?
            .ok_or(PsikError::SubmitError)?;
        let t = Transition::new(now_seconds(), next_jobndx, JobState::Queued, native_id.clone())?;
        guard.append_locked(&t)?;
        drop(guard);

        // Best-effort: the submission already occurred, a failed
        // callback here does not undo the queued state.
        let _ = self.fire_callback(next_jobndx, JobState::Queued, &native_id);
        Ok((next_jobndx, native_id))
    }

    /// `cancel` (spec §4.C). The sentinel is recorded before the
    /// outstanding-id scan so a run that starts between the read and
    /// the kill still gets terminated on the next cancel, not missed.
    pub fn cancel(&self) -> Result<()> {
        self.reached(0, JobState::Canceled, "", None)?;

        let history = self.read_info()?;
        let mut outstanding: BTreeMap<u64, String> = BTreeMap::new();
        for t in &history {
            match t.state {
                JobState::Queued => {
                    outstanding.insert(t.jobndx, t.info.clone());
                }
                JobState::Completed | JobState::Failed => {
                    outstanding.remove(&t.jobndx);
                }
                _ => {}
            }
        }
        let ids: Vec<String> = outstanding.into_values().collect();
        let driver = backend::resolve(&self.backend_config.kind)?;
        driver.cancel(&ids)
    }

    pub fn poll(&self) -> Result<()> {
        let driver = backend::resolve(&self.backend_config.kind)?;
        driver.poll(self)
    }

    /// `execute` (spec §4.C). Internal errors are caught and mapped
    /// to exit code 7 with a diagnostic, rather than propagated —
    /// this function is the last line of defense before a process
    /// exit code is decided.
    pub fn execute(&self, jobndx: u64, env_overrides: &BTreeMap<String, String>) -> Result<i32> {
        match self.execute_inner(jobndx, env_overrides) {
            Ok(code) => Ok(code),
            Err(e) => {
                tracing::error!(error = %e, jobndx, "execute failed internally");
                let _ = self.reached(jobndx, JobState::Failed, &e.to_string(), None);
                Ok(7)
            }
        }
    }

    fn execute_inner(&self, jobndx: u64, env_overrides: &BTreeMap<String, String>) -> Result<i32> {
        self.reached(jobndx, JobState::Active, "", None)?;

        let work_dir = self
            .spec
            .directory
            .as_ref()
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| self.dir.work_dir());
        std::fs::create_dir_all(&work_dir)?;

        let mut env: BTreeMap<String, String> = BTreeMap::new();
        if self.spec.inherit_environment {
            env.extend(std::env::vars());
        }
        env.extend(self.spec.environment.clone());
        env.extend(env_overrides.clone());
        env.insert("jobndx".to_string(), jobndx.to_string());
        env.insert("base".to_string(), self.dir.path.display().to_string());

        std::fs::create_dir_all(self.dir.scripts_dir())?;
        let script_path = self.dir.scripts_dir().join(format!("run.{jobndx}.sh"));
        std::fs::write(&script_path, self.spec.prepared_script("/bin/sh"))?;
        make_executable(&script_path)?;

        let stdout_file = std::fs::File::create(self.dir.stdout_path(jobndx))?;
        let stderr_file = std::fs::File::create(self.dir.stderr_path(jobndx))?;

        let mut cmd = Command::new(&script_path);
        cmd.current_dir(&work_dir)
            .env_clear()
            .envs(&env)
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file));

        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setpgid(0, 0) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        // A spawn failure yields exit code 9, same as a supervisor
        // timeout/kill — it is not a generic internal error (those go
        // through `execute`'s catch-all and map to 7).
        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(error = %e, jobndx, "spawn failed");
                self.reached(jobndx, JobState::Failed, &format!("spawn failed: {e}"), None)?;
                return Ok(9);
            }
        };
        let exit_code = supervise(child, self.spec.resources.duration)?;

        if exit_code == 0 {
            self.reached(jobndx, JobState::Completed, "", None)?;
        } else {
            self.reached(jobndx, JobState::Failed, &exit_code.to_string(), None)?;
        }
        Ok(exit_code)
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Spawn-to-exit supervision: polls for completion, forwards
/// SIGTERM/SIGINT to the child's process group with a 5s grace period
/// before escalating to SIGKILL, and applies the same escalation on
/// timeout (spec §4.F — shared by every backend's `execute`, not just
/// the local one's double-fork grandchild).
#[cfg(unix)]
fn supervise(mut child: Child, duration_minutes: u32) -> Result<i32> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let pid = child.id() as i32;
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_writer = Arc::clone(&shutdown);

    let mut signals = Signals::new([SIGTERM, SIGINT])
        .map_err(|e| PsikError::Backend(format!("signal registration failed: {e}")))?;
    let handle = signals.handle();
    let signal_thread = std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            shutdown_writer.store(true, Ordering::SeqCst);
        }
    });

    let deadline = Instant::now() + Duration::from_secs(duration_minutes as u64 * 60);

    let exit_code = loop {
        if let Some(status) = child.try_wait().map_err(PsikError::Io)? {
            break status.code().unwrap_or(9);
        }
        if shutdown.load(Ordering::SeqCst) || Instant::now() >= deadline {
            break terminate_with_escalation(pid, &mut child);
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    handle.close();
    let _ = signal_thread.join();
    Ok(exit_code)
}

#[cfg(not(unix))]
fn supervise(mut child: Child, _duration_minutes: u32) -> Result<i32> {
    let status = child.wait().map_err(PsikError::Io)?;
    Ok(status.code().unwrap_or(9))
}

#[cfg(unix)]
fn terminate_with_escalation(pid: i32, child: &mut Child) -> i32 {
    unsafe {
        libc::killpg(pid, libc::SIGTERM);
    }
    let grace = Duration::from_secs(5);
    let start = Instant::now();
    while start.elapsed() < grace {
        if let Ok(Some(_)) = child.try_wait() {
            return 9;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    unsafe {
        libc::killpg(pid, libc::SIGKILL);
    }
    let _ = child.wait();
    9
}
