//! Job directory manager (spec §4.I).
//!
//! Grounded on `original_source/psik/manager.py` (`JobManager._alloc`,
//! `create`, `ls`) and `original_source/psik/manager.py: create_job`
//! for the write sequence (directory, spec.json, initial transition).

use std::path::Path;
use std::time::Duration;

use crate::backend;
use crate::config::Config;
use crate::error::{PsikError, Result};
use crate::job::{encode_backend_config, now_seconds, Job};
use crate::jobdir::JobDir;
use crate::model::{JobSpec, JobState, Transition};
use crate::statuslog;

pub struct Manager {
    config: Config,
}

impl Manager {
    /// Verifies every distinct driver type configured passes `check`
    /// (spec §4.I).
    pub fn new(config: Config) -> Result<Self> {
        let mut kinds: Vec<&str> = config.backends.values().map(|b| b.kind.as_str()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        for kind in kinds {
            backend::check(kind)?;
        }
        Ok(Manager { config })
    }

    pub fn prefix(&self) -> &Path {
        &self.config.prefix
    }

    /// `allocate` (spec §4.I): propose `prefix/%.3f`, retry with a
    /// 1ms backoff on a directory-creation conflict. This bounds
    /// throughput to roughly 1000 allocations/sec per prefix, which
    /// is deliberate (spec §9).
    pub fn allocate(&self) -> Result<JobDir> {
        loop {
            let stamp = format!("{:.3}", now_seconds());
            let path = self.config.prefix.join(&stamp);
            match std::fs::create_dir(&path) {
                Ok(()) => return Ok(JobDir::new(&self.config.prefix, &stamp)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// `create` (spec §4.I). `base`, when given, reuses an
    /// already-allocated directory (hot-start repair) instead of
    /// allocating a fresh stamp — if it already holds a valid
    /// `spec.json` that spec is reused as-is.
    pub fn create(&self, mut spec: JobSpec, base: Option<JobDir>) -> Result<Job> {
        spec.validate()?;

        let dir = match base {
            Some(existing) if existing.spec_path().is_file() => return Job::open(existing),
            Some(existing) => {
                std::fs::create_dir_all(&existing.path)?;
                existing
            }
            None => self.allocate()?,
        };

        dir.ensure_dirs()?;
        if spec.directory.is_none() {
            spec.directory = Some(dir.work_dir().display().to_string());
        }
        std::fs::create_dir_all(dir.work_dir())?;

        let backend_cfg = self.config.backends.get(&spec.backend).ok_or_else(|| {
            PsikError::InvalidJob(format!("no such backend: {}", spec.backend))
        })?;
        let mut merged = backend_cfg.clone();
        for (k, v) in &spec.attributes {
            merged.attributes.insert(k.clone(), v.clone());
        }

        dir.write_spec(&spec)?;
        let info = encode_backend_config(&merged)?;
        statuslog::append(
            &dir.status_path(),
            &Transition::new(now_seconds(), 0, JobState::New, info)?,
        )?;

        Job::open(dir)
    }

    /// `ls` (spec §4.I): sorted by stamp; directories lacking a valid
    /// `spec.json` are silently skipped (debug-logged).
    pub fn ls(&self) -> Result<Vec<Job>> {
        let mut stamps: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&self.config.prefix)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    stamps.push(name.to_string());
                }
            }
        }
        stamps.sort_by(|a, b| {
            let fa: f64 = a.parse().unwrap_or(f64::MIN);
            let fb: f64 = b.parse().unwrap_or(f64::MIN);
            fa.partial_cmp(&fb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut jobs = Vec::with_capacity(stamps.len());
        for stamp in stamps {
            let dir = JobDir::new(&self.config.prefix, &stamp);
            match Job::open(dir) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    tracing::debug!(stamp, error = %e, "skipping job dir with no valid spec.json")
                }
            }
        }
        Ok(jobs)
    }

    pub fn open(&self, stamp: &str) -> Result<Job> {
        let dir = JobDir::new(&self.config.prefix, stamp);
        if !dir.exists() {
            return Err(PsikError::JobNotFound(dir.path));
        }
        Job::open(dir)
    }

    /// `rm` (SPEC_FULL §B): a CLI convenience, not a core state-machine
    /// operation — the core itself never deletes (spec §3).
    pub fn remove(&self, stamp: &str) -> Result<()> {
        let dir = JobDir::new(&self.config.prefix, stamp);
        if !dir.exists() {
            return Err(PsikError::JobNotFound(dir.path));
        }
        std::fs::remove_dir_all(&dir.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackendConfig, ResourceSpec};
    use std::collections::BTreeMap;

    fn manager_in(prefix: &Path) -> Manager {
        let mut backends = BTreeMap::new();
        backends.insert("default".to_string(), BackendConfig::default());
        Manager::new(Config {
            prefix: prefix.to_path_buf(),
            backends,
        })
        .unwrap()
    }

    fn sample_spec() -> JobSpec {
        JobSpec {
            name: Some("demo".into()),
            directory: None,
            script: "#!/bin/sh\npwd\nhostname\n".into(),
            environment: BTreeMap::new(),
            inherit_environment: true,
            resources: ResourceSpec::default(),
            backend: "default".into(),
            attributes: BTreeMap::new(),
            callback: None,
            cb_secret: None,
        }
    }

    #[test]
    fn create_writes_spec_and_initial_new_row() {
        let prefix = tempfile::tempdir().unwrap();
        let manager = manager_in(prefix.path());
        let job = manager.create(sample_spec(), None).unwrap();

        let history = job.read_info().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].state, JobState::New);
        assert_eq!(history[0].jobndx, 0);
        assert!(job.dir().work_dir().is_dir());
        assert!(job.dir().spec_path().is_file());
    }

    #[test]
    fn ls_sorts_by_stamp_and_skips_invalid_dirs() {
        let prefix = tempfile::tempdir().unwrap();
        let manager = manager_in(prefix.path());
        let first = manager.create(sample_spec(), None).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let second = manager.create(sample_spec(), None).unwrap();
        std::fs::create_dir_all(prefix.path().join("not-a-job")).unwrap();

        let jobs = manager.ls().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].stamp(), first.stamp());
        assert_eq!(jobs[1].stamp(), second.stamp());
    }

    #[test]
    fn remove_deletes_job_directory() {
        let prefix = tempfile::tempdir().unwrap();
        let manager = manager_in(prefix.path());
        let job = manager.create(sample_spec(), None).unwrap();
        let stamp = job.stamp().to_string();
        drop(job);

        manager.remove(&stamp).unwrap();
        assert!(manager.open(&stamp).is_err());
    }

    #[test]
    fn create_rejects_unknown_backend() {
        let prefix = tempfile::tempdir().unwrap();
        let manager = manager_in(prefix.path());
        let mut spec = sample_spec();
        spec.backend = "nonexistent".to_string();
        assert!(manager.create(spec, None).is_err());
    }
}
