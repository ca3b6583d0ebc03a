//! Work-directory archive packer (spec §4.H, §8 property 9).
//!
//! Out of scope per spec.md §1 ("the archive-into-base64 helper used
//! only by remote backends" is named as an external collaborator),
//! but the byte-identical round-trip testable property (§8.9) and the
//! remote backend's work-directory packing both need a concrete
//! implementation, so a minimal one lives here. tar+gzip+base64 stack
//! follows `philiptaron-maelstrom`'s dependency choices.

use std::io::{Read, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{PsikError, Result};

/// Pack every file under `dir` into a tar+gzip archive, base64-encoded.
pub fn pack_dir(dir: &Path) -> Result<String> {
    let mut tar_gz = Vec::new();
    {
        let encoder = GzEncoder::new(&mut tar_gz, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", dir)?;
        builder.into_inner()?.finish()?;
    }
    Ok(BASE64.encode(tar_gz))
}

/// Unpack a base64 tar+gzip archive into `dest` (created if missing).
pub fn unpack_to_dir(archive_b64: &str, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let bytes = decode(archive_b64)?;
    let decoder = GzDecoder::new(bytes.as_slice());
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest)?;
    Ok(())
}

/// Pack a single file's bytes (used by the archive round-trip test;
/// the remote backend packs whole directories via [`pack_dir`]).
pub fn pack_file(path: &Path) -> Result<String> {
    let data = std::fs::read(path)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&data)?;
    Ok(BASE64.encode(encoder.finish()?))
}

pub fn unpack_file(archive_b64: &str) -> Result<Vec<u8>> {
    let compressed = decode(archive_b64)?;
    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn decode(archive_b64: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(archive_b64)
        .map_err(|e| PsikError::InvalidJob(format!("bad archive encoding: {e}")))
}
