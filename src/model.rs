//! Data model (spec §3): JobSpec, BackendConfig, JobState, Transition.
//!
//! Field names and defaults follow `psik/models.py` from the reference
//! implementation; JSON (de)serialization uses `serde` the way the
//! teacher's `schema.rs` does.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{PsikError, Result};

/// The closed set of six job states (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    New,
    Queued,
    Active,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::New,
        JobState::Queued,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
        JobState::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::New => "new",
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }

    /// `{completed, failed, canceled}` is the final subset (spec §3).
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Canceled
        )
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(JobState::New),
            "queued" => Ok(JobState::Queued),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "canceled" => Ok(JobState::Canceled),
            other => Err(PsikError::InvalidJob(format!("unknown job state: {other}"))),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_duration() -> u32 {
    10
}
fn default_cpu_cores() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_backend_type() -> String {
    "local".to_string()
}
fn default_backend_name() -> String {
    "default".to_string()
}

/// Resource requirements for a job run (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Max walltime of the job in minutes.
    #[serde(default = "default_duration")]
    pub duration: u32,
    pub node_count: Option<u32>,
    /// Mutually exclusive with `node_count` + `processes_per_node`.
    pub process_count: Option<u32>,
    pub processes_per_node: Option<u32>,
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores_per_process: u32,
    #[serde(default)]
    pub gpu_cores_per_process: u32,
    #[serde(default = "default_true")]
    pub exclusive_node_use: bool,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        ResourceSpec {
            duration: default_duration(),
            node_count: None,
            process_count: None,
            processes_per_node: None,
            cpu_cores_per_process: default_cpu_cores(),
            gpu_cores_per_process: 0,
            exclusive_node_use: true,
        }
    }
}

impl ResourceSpec {
    /// `process_count` is mutually exclusive with `node_count` +
    /// `processes_per_node` (spec §3 constraint).
    pub fn validate(&self) -> Result<()> {
        let uses_process_count = self.process_count.is_some();
        let uses_node_layout = self.node_count.is_some() || self.processes_per_node.is_some();
        if uses_process_count && uses_node_layout {
            return Err(PsikError::InvalidJob(
                "resources.process_count is mutually exclusive with node_count/processes_per_node"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Named backend configuration; merged with `JobSpec::attributes` at
/// job-creation time (spec §3: "JobSpec overrides backend defaults").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(rename = "type", default = "default_backend_type")]
    pub kind: String,
    #[serde(default)]
    pub queue_name: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub reservation_id: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            kind: default_backend_type(),
            queue_name: None,
            project_name: None,
            reservation_id: None,
            attributes: BTreeMap::new(),
        }
    }
}

/// A job description, immutable after creation (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
    pub script: String,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub inherit_environment: bool,
    #[serde(default)]
    pub resources: ResourceSpec,
    #[serde(default = "default_backend_name")]
    pub backend: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub callback: Option<String>,
    #[serde(default)]
    pub cb_secret: Option<String>,
}

impl JobSpec {
    pub fn validate(&self) -> Result<()> {
        self.resources.validate()
    }

    pub fn from_json(s: &str) -> Result<Self> {
        let spec: JobSpec = serde_json::from_str(s)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// If the script has no shebang, prepend one built from `rc_path`
    /// (`psik/manager.py: prepare_script`); always ensure a trailing
    /// newline.
    pub fn prepared_script(&self, rc_path: &str) -> String {
        let mut s = self.script.clone();
        if !s.starts_with("#!") {
            s = format!("#!{rc_path}\n{s}");
        }
        if !s.ends_with('\n') {
            s.push('\n');
        }
        s
    }
}

/// One row of `status.csv`: an atomic state transition (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub time: f64,
    pub jobndx: u64,
    pub state: JobState,
    pub info: String,
}

impl Transition {
    pub fn new(time: f64, jobndx: u64, state: JobState, info: impl Into<String>) -> Result<Self> {
        let info = info.into();
        validate_info(&info)?;
        Ok(Transition {
            time,
            jobndx,
            state,
            info,
        })
    }
}

/// `info` may not contain a comma or newline (spec §3, §6).
pub fn validate_info(info: &str) -> Result<()> {
    if info.contains(',') || info.contains('\n') {
        return Err(PsikError::InvalidJob(
            "transition info must not contain a comma or newline".to_string(),
        ));
    }
    Ok(())
}

/// Outbound callback POST body (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub jobid: String,
    pub jobndx: u64,
    pub state: JobState,
    pub info: String,
}

/// Validate a stamp/jobid against `^[0-9]+(\.[0-9]+)?$` (spec §6).
pub fn is_valid_job_id(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');
    let whole = match parts.next() {
        Some(p) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => p,
        _ => return false,
    };
    let _ = whole;
    match parts.next() {
        None => true,
        Some(frac) => !frac.is_empty() && frac.bytes().all(|b| b.is_ascii_digit()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_round_trips_through_json() {
        for s in JobState::ALL {
            let j = serde_json::to_string(&s).unwrap();
            let back: JobState = serde_json::from_str(&j).unwrap();
            assert_eq!(s, back);
        }
    }

    #[test]
    fn job_id_format_accepts_stamp() {
        assert!(is_valid_job_id("1700000000.123"));
        assert!(is_valid_job_id("42"));
        assert!(!is_valid_job_id("1700000000."));
        assert!(!is_valid_job_id("abc"));
        assert!(!is_valid_job_id(""));
    }

    #[test]
    fn process_count_conflicts_with_node_layout() {
        let mut r = ResourceSpec {
            process_count: Some(4),
            node_count: Some(2),
            ..Default::default()
        };
        assert!(r.validate().is_err());
        r.node_count = None;
        assert!(r.validate().is_ok());
    }

    #[test]
    fn transition_rejects_comma_in_info() {
        assert!(Transition::new(0.0, 0, JobState::New, "a,b").is_err());
        assert!(Transition::new(0.0, 0, JobState::New, "ab").is_ok());
    }

    #[test]
    fn jobspec_round_trips_json() {
        let spec = JobSpec {
            name: Some("hello".into()),
            directory: None,
            script: "#!/bin/sh\necho hi\n".into(),
            environment: BTreeMap::new(),
            inherit_environment: true,
            resources: ResourceSpec::default(),
            backend: "default".into(),
            attributes: BTreeMap::new(),
            callback: None,
            cb_secret: None,
        };
        let json = spec.to_json_pretty().unwrap();
        let back = JobSpec::from_json(&json).unwrap();
        assert_eq!(back.script, spec.script);
        assert_eq!(back.name, spec.name);
    }

    #[test]
    fn prepared_script_adds_shebang_and_newline() {
        let spec = JobSpec {
            name: None,
            directory: None,
            script: "echo hi".into(),
            environment: BTreeMap::new(),
            inherit_environment: true,
            resources: ResourceSpec::default(),
            backend: "default".into(),
            attributes: BTreeMap::new(),
            callback: None,
            cb_secret: None,
        };
        let out = spec.prepared_script("/bin/sh");
        assert_eq!(out, "#!/bin/sh\necho hi\n");
    }
}
