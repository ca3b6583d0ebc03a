//! SLURM-style batch backend (spec §4.G).
//!
//! Script-template shape and id-parsing follow
//! `original_source/psik/backends/slurm.py` (`slurm_script`, `mk_args`,
//! `submit`/`cancel` via external `sbatch`/`scancel`).

use std::process::Command;

use crate::archive::pack_dir;
use crate::error::{PsikError, Result};
use crate::job::Job;

use super::Backend;

#[derive(Debug, Clone)]
pub struct BatchBackend {
    pub submit_cmd: String,
    pub cancel_cmd: String,
}

impl Default for BatchBackend {
    fn default() -> Self {
        BatchBackend {
            submit_cmd: "sbatch".to_string(),
            cancel_cmd: "scancel".to_string(),
        }
    }
}

impl Backend for BatchBackend {
    fn submit(&self, job: &Job, jobndx: u64) -> Result<Option<String>> {
        let script = render_script(job, jobndx)?;
        let scripts_dir = job.dir().scripts_dir();
        std::fs::create_dir_all(&scripts_dir)?;
        let script_path = scripts_dir.join(format!("submit.{jobndx}.sh"));
        std::fs::write(&script_path, &script)?;

        let output = Command::new(&self.submit_cmd)
            .arg(&script_path)
            .output()
            .map_err(|e| {
                PsikError::Backend(format!("{} failed to start: {e}", self.submit_cmd))
            })?;

        if !output.status.success() {
            tracing::warn!(
                cmd = %self.submit_cmd,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "batch submitter reported failure"
            );
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let native_id = stdout.split_whitespace().last().map(str::to_string);
        if native_id.is_none() {
            tracing::warn!(stdout = %stdout, "batch submitter returned no parseable id");
        }
        Ok(native_id)
    }

    fn cancel(&self, native_ids: &[String]) -> Result<()> {
        if native_ids.is_empty() {
            return Ok(());
        }
        let output = Command::new(&self.cancel_cmd)
            .args(native_ids)
            .output()
            .map_err(|e| {
                PsikError::Backend(format!("{} failed to start: {e}", self.cancel_cmd))
            })?;
        if !output.status.success() {
            tracing::warn!(
                cmd = %self.cancel_cmd,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "batch canceller reported failure"
            );
        }
        Ok(())
    }

    fn poll(&self, _job: &Job) -> Result<()> {
        // The scheduler is authoritative; the running job records its
        // own transitions via `reached` (spec §4.G).
        Ok(())
    }
}

/// Render a submit script embedding scheduler directives plus a call
/// into the engine's `hot-start` entrypoint (spec §4.G).
fn render_script(job: &Job, jobndx: u64) -> Result<String> {
    let spec = job.spec();
    let r = &spec.resources;
    let backend = job.backend_config();

    let mut directives = String::from("#!/bin/bash\n");
    directives.push_str(&format!(
        "#SBATCH --time={}\n",
        minutes_to_hhmmss(r.duration)
    ));
    if let Some(n) = r.node_count {
        directives.push_str(&format!("#SBATCH --nodes={n}\n"));
    }
    if let Some(n) = r.process_count {
        directives.push_str(&format!("#SBATCH --ntasks={n}\n"));
    }
    if let Some(n) = r.processes_per_node {
        directives.push_str(&format!("#SBATCH --ntasks-per-node={n}\n"));
    }
    directives.push_str(&format!(
        "#SBATCH --cpus-per-task={}\n",
        r.cpu_cores_per_process
    ));
    if r.gpu_cores_per_process > 0 {
        directives.push_str(&format!(
            "#SBATCH --gpus-per-task={}\n",
            r.gpu_cores_per_process
        ));
    }
    if r.exclusive_node_use {
        directives.push_str("#SBATCH --exclusive\n");
    }
    if let Some(name) = &spec.name {
        directives.push_str(&format!("#SBATCH --job-name={name}\n"));
    }
    if let Some(queue) = &backend.queue_name {
        directives.push_str(&format!("#SBATCH --partition={queue}\n"));
    }
    if let Some(account) = &backend.project_name {
        directives.push_str(&format!("#SBATCH --account={account}\n"));
    }
    if let Some(reservation) = &backend.reservation_id {
        directives.push_str(&format!("#SBATCH --reservation={reservation}\n"));
    }
    directives.push_str(&format!(
        "#SBATCH --export={}\n",
        if spec.inherit_environment {
            "ALL"
        } else {
            "NONE"
        }
    ));
    for (key, value) in &backend.attributes {
        directives.push_str(&format!("#SBATCH --{key}={value}\n"));
    }

    let spec_json = spec.to_json_pretty()?;
    let archive = pack_dir(&job.dir().work_dir()).unwrap_or_default();
    let stamp = job.stamp();

    // `exec` so signals propagate straight to the engine process
    // (spec §4.G).
    Ok(format!(
        "{directives}\nexec psik hot-start {stamp} {jobndx} {spec_json:?} {archive:?}\n"
    ))
}

fn minutes_to_hhmmss(minutes: u32) -> String {
    format!("{:02}:{:02}:00", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minutes_to_hhmmss_formats_hours_and_minutes() {
        assert_eq!(minutes_to_hhmmss(0), "00:00:00");
        assert_eq!(minutes_to_hhmmss(90), "01:30:00");
        assert_eq!(minutes_to_hhmmss(600), "10:00:00");
    }
}
