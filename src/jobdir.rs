//! Job directory layout (spec §3): the on-disk identity of a job.
//!
//! Path-helper shape follows the teacher's `JobDir` in
//! `jobstore.rs`; the layout itself (`work/`, `log/console`,
//! `log/stdout.<ndx>`) is `original_source/psik/manager.py:
//! create_job`'s directory contract translated to spec.md's names.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::JobSpec;

/// Handle to one job's directory. Does not itself hold the status
/// log lock or any file handles — it is just a set of resolved paths.
#[derive(Debug, Clone)]
pub struct JobDir {
    pub path: PathBuf,
    pub stamp: String,
}

impl JobDir {
    pub fn new(prefix: &Path, stamp: &str) -> Self {
        JobDir {
            path: prefix.join(stamp),
            stamp: stamp.to_string(),
        }
    }

    /// Build a handle directly from a job directory path (used by the
    /// `reached` entrypoint, which is invoked with a `base` path
    /// rather than a prefix + stamp pair — spec §6).
    pub fn at(path: PathBuf) -> Self {
        let stamp = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        JobDir { path, stamp }
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn spec_path(&self) -> PathBuf {
        self.path.join("spec.json")
    }

    pub fn status_path(&self) -> PathBuf {
        self.path.join("status.csv")
    }

    pub fn work_dir(&self) -> PathBuf {
        self.path.join("work")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.path.join("log")
    }

    pub fn console_log_path(&self) -> PathBuf {
        self.log_dir().join("console")
    }

    pub fn stdout_path(&self, jobndx: u64) -> PathBuf {
        self.log_dir().join(format!("stdout.{jobndx}"))
    }

    pub fn stderr_path(&self, jobndx: u64) -> PathBuf {
        self.log_dir().join(format!("stderr.{jobndx}"))
    }

    /// Scripts rendered for external submitters (batch backend only;
    /// not part of spec.md's core directory contract but needed by
    /// `backend::batch`).
    pub fn scripts_dir(&self) -> PathBuf {
        self.path.join("scripts")
    }

    /// Create `work/` and `log/` (spec.json and status.csv are
    /// written separately by the caller under the write lock).
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }

    pub fn read_spec(&self) -> Result<JobSpec> {
        let raw = std::fs::read_to_string(self.spec_path())?;
        JobSpec::from_json(&raw)
    }

    pub fn write_spec(&self, spec: &JobSpec) -> Result<()> {
        std::fs::write(self.spec_path(), spec.to_json_pretty()?)?;
        Ok(())
    }

    /// Read the last `max_bytes` of a log file, lossily decoded. Used
    /// by `status`/`tail`-style callers; mirrors the teacher's
    /// `tail_log`.
    pub fn tail_log(&self, path: &Path, tail_lines: u64, max_bytes: u64) -> String {
        let Ok(data) = std::fs::read(path) else {
            return String::new();
        };
        let start = if data.len() as u64 > max_bytes {
            (data.len() as u64 - max_bytes) as usize
        } else {
            0
        };
        let text = String::from_utf8_lossy(&data[start..]);
        if tail_lines == 0 {
            return text.into_owned();
        }
        let lines: Vec<&str> = text.lines().collect();
        let skip = lines.len().saturating_sub(tail_lines as usize);
        lines[skip..].join("\n")
    }
}
