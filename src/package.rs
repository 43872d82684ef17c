//! Hand-off packaging: ZIP + SHA-1
//!
//! The run directory is packed into a single ZIP for transfer. The
//! `.eml` payloads are opaque compressed-ish blobs already and the
//! archive exists for hand-off integrity, not space, so entries are
//! stored uncompressed. The SHA-1 of the finished archive goes into
//! the sidecar next to it.
//!
//! Everything here is blocking I/O; callers on a runtime thread wrap
//! it in `spawn_blocking`.

use crate::error::{Error, Result};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::ZipWriter;
use zip::write::FileOptions;

const HASH_CHUNK: usize = 4 * 1024 * 1024;

/// Integrity data for a packaged run.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    pub zip_path: PathBuf,
    pub size: u64,
    pub sha1: String,
}

/// Pack `run_dir` into `zip_path` and hash the result.
pub fn package_run_dir(run_dir: &Path, zip_path: &Path) -> Result<ArchiveInfo> {
    let file = File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    add_dir(&mut zip, run_dir, run_dir, options)?;
    zip.finish()
        .map_err(|e| Error::Archive(format!("finalizing {}: {e}", zip_path.display())))?;

    let size = std::fs::metadata(zip_path)?.len();
    let sha1 = sha1_of_file(zip_path)?;
    Ok(ArchiveInfo {
        zip_path: zip_path.to_path_buf(),
        size,
        sha1,
    })
}

fn add_dir(
    zip: &mut ZipWriter<File>,
    base: &Path,
    dir: &Path,
    options: FileOptions,
) -> Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            add_dir(zip, base, &path, options)?;
            continue;
        }

        let arcname = path
            .strip_prefix(base)
            .map_err(|e| Error::Archive(format!("path outside archive root: {e}")))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(arcname.as_str(), options)
            .map_err(|e| Error::Archive(format!("adding {arcname}: {e}")))?;
        let data = std::fs::read(&path)?;
        zip.write_all(&data)?;
    }
    Ok(())
}

/// SHA-1 of a file, read in fixed-size chunks so large archives do
/// not get slurped into memory.
fn sha1_of_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; HASH_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
