//! Append-only CSV status log with whole-file advisory locks (spec §4.A).
//!
//! Mirrors `original_source/psik/statfile.py`'s `FLock`/`append_csv`/
//! `read_csv` using the teacher's `fs2`-based locking idiom (see
//! `casparian_db/src/lock.rs`): the lock is keyed on the open file
//! descriptor, so each writer opens its own handle.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;

use fs2::FileExt;

use crate::error::{PsikError, Result};
use crate::model::{JobState, Transition};

fn open_for_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)?)
}

/// Holds the exclusive write lock on a `status.csv` for the duration
/// of one or more appends (`append_locked`, spec §4.A).
pub struct WriteGuard {
    file: File,
}

impl WriteGuard {
    /// Block until the exclusive lock is available.
    pub fn lock_blocking(path: &Path) -> Result<Self> {
        let file = open_for_append(path)?;
        file.lock_exclusive().map_err(PsikError::Io)?;
        Ok(WriteGuard { file })
    }

    /// Non-blocking: returns `Contention` immediately if another
    /// writer holds the lock.
    pub fn try_lock(path: &Path) -> Result<Self> {
        let file = open_for_append(path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(WriteGuard { file }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(PsikError::Contention),
            Err(e) => Err(PsikError::Io(e)),
        }
    }

    /// Append one row while still holding the lock. Callers combining
    /// an external call (e.g. `backend.submit`) with the transition
    /// record use this directly rather than going through [`append`].
    pub fn append_locked(&mut self, t: &Transition) -> Result<()> {
        write_row(&mut self.file, t)
    }

    /// Read the full history while still holding the exclusive lock.
    /// Callers that need to decide the next row to append based on
    /// the current history (e.g. the next `jobndx`) must go through
    /// this rather than the standalone [`read`], or the decision is
    /// made against a stale read taken outside the write lock.
    pub fn read_locked(&mut self) -> Result<Vec<Transition>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut rows = Vec::new();
        for line in BufReader::new(&self.file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match parse_row(&line) {
                Ok(t) => rows.push(t),
                Err(e) => tracing::warn!(row = %line, error = %e, "skipping malformed status row"),
            }
        }
        Ok(rows)
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn write_row(file: &mut File, t: &Transition) -> Result<()> {
    crate::model::validate_info(&t.info)?;
    let line = format!(
        "{:.3},{},{},{}\n",
        t.time,
        t.jobndx,
        t.state.as_str(),
        t.info
    );
    file.write_all(line.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Acquire the exclusive lock, write one row, release (spec §4.A
/// `append`).
pub fn append(path: &Path, t: &Transition) -> Result<()> {
    let mut guard = WriteGuard::lock_blocking(path)?;
    guard.append_locked(t)
}

/// Acquire a shared lock, read every row to EOF, release (spec §4.A
/// `read`). Rows that fail to parse are logged and skipped — the
/// rest of the history still loads (spec §4.B).
pub fn read(path: &Path) -> Result<Vec<Transition>> {
    let file = match OpenOptions::new().read(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    file.lock_shared().map_err(PsikError::Io)?;
    let result = (|| {
        let mut rows = Vec::new();
        for line in BufReader::new(&file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match parse_row(&line) {
                Ok(t) => rows.push(t),
                Err(e) => tracing::warn!(row = %line, error = %e, "skipping malformed status row"),
            }
        }
        Ok(rows)
    })();
    let _ = FileExt::unlock(&file);
    result
}

/// Parse an in-memory CSV blob (e.g. fetched over HTTP by the remote
/// backend) the same way [`read`] parses a file: malformed rows are
/// skipped, not raised.
pub fn parse_csv_text(text: &str) -> Vec<Transition> {
    text.lines()
        .filter(|l| !l.is_empty())
        .filter_map(|line| match parse_row(line) {
            Ok(t) => Some(t),
            Err(e) => {
                tracing::warn!(row = %line, error = %e, "skipping malformed status row");
                None
            }
        })
        .collect()
}

fn parse_row(line: &str) -> Result<Transition> {
    let mut parts = line.splitn(4, ',');
    let time: f64 = parts
        .next()
        .ok_or_else(|| PsikError::InvalidJob("missing time field".to_string()))?
        .parse()
        .map_err(|_| PsikError::InvalidJob("bad time field".to_string()))?;
    let jobndx: u64 = parts
        .next()
        .ok_or_else(|| PsikError::InvalidJob("missing jobndx field".to_string()))?
        .parse()
        .map_err(|_| PsikError::InvalidJob("bad jobndx field".to_string()))?;
    let state = JobState::parse(
        parts
            .next()
            .ok_or_else(|| PsikError::InvalidJob("missing state field".to_string()))?,
    )?;
    let info = parts.next().unwrap_or("").to_string();
    Ok(Transition {
        time,
        jobndx,
        state,
        info,
    })
}
