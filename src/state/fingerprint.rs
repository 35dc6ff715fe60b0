//! Compatibility keys: a fingerprint of the target file set.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::state::models::CompatibilityKey;

/// Fingerprint `files` by path, size and content hash.
///
/// Order of `files` does not matter. Unreadable or missing files still
/// contribute (as `missing`), so a deleted file changes the key.
pub fn compute_compatibility_key(files: &[PathBuf]) -> CompatibilityKey {
    let mut entries: Vec<String> = files.iter().map(|path| fingerprint_file(path)).collect();
    entries.sort();
    entries.dedup();

    let mut hasher = Sha256::new();
    for entry in &entries {
        hasher.update(entry.as_bytes());
        hasher.update(b"\n");
    }
    CompatibilityKey(format!("{:x}", hasher.finalize()))
}

fn fingerprint_file(path: &Path) -> String {
    let shown = path.display();
    match fs::read(path) {
        Ok(bytes) => {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            format!("{shown}\t{}\t{:x}", bytes.len(), hasher.finalize())
        }
        Err(e) => {
            tracing::debug!(path = %shown, error = %e, "Fingerprinting unreadable target file");
            format!("{shown}\tmissing")
        }
    }
}

/// Render a path list the way snapshots record it.
pub fn display_paths(files: &[PathBuf]) -> Vec<String> {
    let mut out: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    out.sort();
    out.dedup();
    out
}
