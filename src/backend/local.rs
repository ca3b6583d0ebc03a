//! Local backend: double-fork process-group supervisor (spec §4.F).
//!
//! Protocol and exit-code semantics translated from
//! `original_source/psik/backends/local.py` (`os.fork`/`os.setsid`
//! pipe handoff) and `original_source/psik/console.py` (process-group
//! creation, signal forwarding); the supervising loop itself —
//! spawning the script, enforcing the timeout, forwarding signals —
//! lives in `Job::execute` so that batch/remote `hot-start` paths get
//! the identical supervisor without going through `fork()` at all.

#[cfg(unix)]
use std::collections::BTreeMap;
#[cfg(unix)]
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::unix::io::FromRawFd;

use crate::error::{PsikError, Result};
use crate::job::Job;

use super::Backend;

#[derive(Debug, Default)]
pub struct LocalBackend;

impl Backend for LocalBackend {
    fn submit(&self, job: &Job, jobndx: u64) -> Result<Option<String>> {
        #[cfg(unix)]
        {
            Ok(Some(spawn_detached(job, jobndx)?.to_string()))
        }
        #[cfg(not(unix))]
        {
            let _ = (job, jobndx);
            Err(PsikError::Backend(
                "local backend requires a unix target".to_string(),
            ))
        }
    }

    fn cancel(&self, native_ids: &[String]) -> Result<()> {
        #[cfg(unix)]
        {
            for id in native_ids {
                if let Ok(pgid) = id.parse::<i32>() {
                    send_signal(pgid, libc::SIGTERM);
                } else {
                    tracing::warn!(id, "local native id is not a pid, skipping cancel");
                }
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            let _ = native_ids;
            Ok(())
        }
    }

    fn poll(&self, _job: &Job) -> Result<()> {
        // The local backend's supervisor records transitions directly
        // (it runs `Job::execute` in-process); there's nothing external
        // to reconcile.
        Ok(())
    }
}

#[cfg(unix)]
fn send_signal(pgid: i32, sig: i32) {
    unsafe {
        if libc::killpg(pgid, sig) != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                tracing::warn!(pgid, sig, %err, "killpg failed");
            }
        }
    }
}

/// Double-fork protocol (spec §4.F):
/// 1. Caller creates a pipe.
/// 2. First fork: parent reads the grandchild pid from the pipe,
///    reaps the intermediate child, returns the pid as the native id.
/// 3. Intermediate child: `setsid`, second fork, writes the
///    grandchild pid to the pipe, exits.
/// 4. Grandchild: new process group, redirect handled inside
///    `Job::execute`, runs the script, exits with its return code.
#[cfg(unix)]
fn spawn_detached(job: &Job, jobndx: u64) -> Result<i32> {
    let mut fds = [0i32; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(PsikError::Io(std::io::Error::last_os_error()));
    }
    let (read_fd, write_fd) = (fds[0], fds[1]);

    let first = unsafe { libc::fork() };
    if first < 0 {
        return Err(PsikError::Io(std::io::Error::last_os_error()));
    }

    if first == 0 {
        unsafe {
            libc::close(read_fd);
            libc::setsid();
        }
        let second = unsafe { libc::fork() };
        if second < 0 {
            unsafe { libc::_exit(9) };
        }
        if second == 0 {
            unsafe { libc::close(write_fd) };
            grandchild_main(job, jobndx);
        }
        let mut pipe_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
        let _ = writeln!(pipe_file, "{second}");
        unsafe { libc::_exit(0) };
    }

    unsafe { libc::close(write_fd) };
    let mut pipe_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
    let mut line = String::new();
    pipe_file.read_to_string(&mut line)?;
    let mut status: i32 = 0;
    unsafe { libc::waitpid(first, &mut status, 0) };
    line.trim()
        .parse::<i32>()
        .map_err(|_| PsikError::Backend("local backend did not report a pid".to_string()))
}

/// Runs inside the grandchild: become a process-group leader, hand
/// off to the shared execute supervisor, exit with its return code.
/// Never returns.
#[cfg(unix)]
fn grandchild_main(job: &Job, jobndx: u64) -> ! {
    unsafe {
        libc::setpgid(0, 0);
    }
    let code = job.execute(jobndx, &BTreeMap::new()).unwrap_or(9);
    unsafe { libc::_exit(code) };
}
