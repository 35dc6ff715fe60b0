//! Crash-safe file writes.

use std::io::{self, Write};
use std::path::Path;

/// Prefix of in-flight temp files; anything carrying it is never a
/// finished record.
pub const TEMP_FILE_PREFIX: &str = ".tmp-";

/// Write `bytes` to `path` via a temp file in the same directory followed by
/// an atomic rename, so readers see either the old file or the complete new
/// one.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .suffix(".partial")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    {
        // Best effort: make the rename itself durable.
        if let Ok(handle) = std::fs::File::open(dir) {
            let _ = handle.sync_all();
        }
    }

    Ok(())
}

/// Remove temp files left behind by a crash mid-write. Returns how many were
/// removed.
pub fn sweep_temp_files(dir: &Path) -> io::Result<usize> {
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(TEMP_FILE_PREFIX) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => {
                tracing::warn!(
                    path = %entry.path().display(),
                    error = %e,
                    "Failed to remove stale temp file"
                );
            }
        }
    }
    Ok(removed)
}
