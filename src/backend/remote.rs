//! Remote backend: pack working dir, invoke remote executor, mirror
//! back (spec §4.H).
//!
//! The remote host runs the same engine; this driver is a thin HTTP
//! client around its `hot-start`/`reached`/`cancel` entrypoints
//! (spec §6). `original_source/psik/web.py` supplies the request
//! shape, `casparian_security`'s `reqwest` choice supplies the stack.

use std::time::SystemTime;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::archive::pack_dir;
use crate::error::{PsikError, Result};
use crate::job::Job;
use crate::statuslog;

use super::Backend;

#[derive(Debug, Clone, Default)]
pub struct RemoteBackend;

#[derive(Debug, Serialize)]
struct HotStartRequest<'a> {
    stamp: &'a str,
    jobndx: u64,
    spec: serde_json::Value,
    archive: String,
}

#[derive(Debug, Deserialize)]
struct HotStartResponse {
    native_id: Option<String>,
}

fn remote_endpoint(job: &Job) -> Result<String> {
    job.backend_config()
        .attributes
        .get("endpoint")
        .cloned()
        .ok_or_else(|| {
            PsikError::Backend("remote backend requires attributes.endpoint".to_string())
        })
}

impl Backend for RemoteBackend {
    fn submit(&self, job: &Job, jobndx: u64) -> Result<Option<String>> {
        let endpoint = remote_endpoint(job)?;
        let spec = job.spec();
        let archive = pack_dir(&job.dir().work_dir())?;
        let body = HotStartRequest {
            stamp: job.stamp(),
            jobndx,
            spec: serde_json::to_value(spec)?,
            archive,
        };

        let client = Client::new();
        let resp = client
            .post(format!("{endpoint}/hot-start"))
            .json(&body)
            .send()
            .map_err(|e| PsikError::Backend(format!("remote submit failed: {e}")))?;

        if !resp.status().is_success() {
            tracing::warn!(status = %resp.status(), "remote submit rejected");
            return Ok(None);
        }
        let parsed: HotStartResponse = resp
            .json()
            .map_err(|e| PsikError::Backend(format!("remote submit: bad response: {e}")))?;
        Ok(parsed.native_id)
    }

    fn cancel(&self, native_ids: &[String]) -> Result<()> {
        if native_ids.is_empty() {
            return Ok(());
        }
        // Each native id here is `<endpoint>|<remote-stamp>`, set by
        // `submit` via the row-0 BackendConfig it was created under.
        let client = Client::new();
        for id in native_ids {
            let Some((endpoint, stamp)) = id.split_once('|') else {
                tracing::warn!(id, "malformed remote native id, skipping cancel");
                continue;
            };
            if let Err(e) = client
                .post(format!("{endpoint}/cancel/{stamp}"))
                .send()
            {
                tracing::warn!(id, %e, "remote cancel request failed");
            }
        }
        Ok(())
    }

    fn poll(&self, job: &Job) -> Result<()> {
        let endpoint = remote_endpoint(job)?;
        let client = Client::new();
        let remote_csv = client
            .get(format!("{endpoint}/status/{}", job.stamp()))
            .send()
            .map_err(|e| PsikError::Backend(format!("remote poll failed: {e}")))?
            .text()
            .map_err(|e| PsikError::Backend(format!("remote poll: bad body: {e}")))?;

        let remote_rows = statuslog::parse_csv_text(&remote_csv);
        let local_rows = statuslog::read(&job.dir().status_path())?;
        let seen: std::collections::HashSet<(u64, crate::model::JobState)> = local_rows
            .iter()
            .map(|t| (t.jobndx, t.state))
            .collect();

        // For each remote transition not already present locally,
        // record it with its original timestamp (spec §4.H "poll").
        for row in remote_rows {
            if !seen.contains(&(row.jobndx, row.state)) {
                job.reached(row.jobndx, row.state, &row.info, Some(row.time))?;
            }
        }

        mirror_logs(job, &endpoint)?;
        let latest_final = statuslog::read(&job.dir().status_path())?
            .iter()
            .any(|t| t.state.is_final());
        if latest_final {
            mirror_work(job, &endpoint)?;
        }
        Ok(())
    }
}

/// Mirror `log/` from the remote host on every poll (spec §9 resolves
/// this as incremental, not final-only).
fn mirror_logs(job: &Job, endpoint: &str) -> Result<()> {
    mirror_dir(job, endpoint, "log")
}

/// Mirror `work/` only once the job has reached a final state.
fn mirror_work(job: &Job, endpoint: &str) -> Result<()> {
    mirror_dir(job, endpoint, "work")
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    relpath: String,
    size: u64,
    mtime: u64,
    content_b64: String,
}

fn mirror_dir(job: &Job, endpoint: &str, which: &str) -> Result<()> {
    let client = Client::new();
    let listing: Vec<RemoteFile> = match client
        .get(format!("{endpoint}/listing/{}/{which}", job.stamp()))
        .send()
        .and_then(|r| r.json())
    {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(which, %e, "remote listing unavailable, skipping mirror");
            return Ok(());
        }
    };

    for file in listing {
        let local_path = job.dir().path.join(which).join(&file.relpath);
        if let Ok(meta) = std::fs::metadata(&local_path) {
            let local_mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);
            // Skip iff local is at least as large and at least as new
            // (spec §4.H: `local.size == remote.size and
            // local.mtime >= remote.mtime`).
            if meta.len() == file.size && local_mtime >= file.mtime {
                continue;
            }
        }
        if let Some(parent) = local_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = crate::archive::unpack_file(&file.content_b64).unwrap_or_default();
        std::fs::write(&local_path, bytes)?;
    }
    Ok(())
}
