//! Versioned on-disk encoding for [`Snapshot`]s.
//!
//! A snapshot file is a single pretty-printed JSON envelope:
//!
//! ```json
//! { "schema_version": 1, "snapshot": { ... } }
//! ```
//!
//! Encoding is deterministic (struct field order, sorted maps and sets) so
//! two encodes of the same snapshot are byte-identical and files diff
//! cleanly. Redaction happens here, at encode time, and is never skipped.

use serde::{Deserialize, Serialize};

use crate::state::error::{StateError, StateResult};
use crate::state::models::Snapshot;
use crate::state::scrub::ScrubConfig;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;
pub const MIN_SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema_version: u32,
    snapshot: &'a Snapshot,
}

#[derive(Deserialize)]
struct Envelope {
    #[allow(dead_code)]
    schema_version: u32,
    snapshot: Snapshot,
}

/// Only the version, so unknown versions are rejected before the body is
/// interpreted.
#[derive(Deserialize)]
struct VersionHeader {
    schema_version: Option<u32>,
}

/// Result of encoding: the bytes plus how many secrets were redacted.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub redactions: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotCodec {
    scrub: ScrubConfig,
}

impl SnapshotCodec {
    pub fn new(scrub: ScrubConfig) -> Self {
        Self { scrub }
    }

    pub fn scrub(&self) -> &ScrubConfig {
        &self.scrub
    }

    /// Fails on values JSON cannot carry (NaN and infinities would be
    /// written as `null` and the file could never be decoded again).
    pub fn encode(&self, snapshot: &Snapshot) -> StateResult<Encoded> {
        if let Some(memory) = &snapshot.memory_summary {
            if let Some((key, value)) = memory.traced.iter().find(|(_, v)| !v.is_finite()) {
                return Err(StateError::Encode(format!(
                    "memory aggregate '{key}' is {value}, not a finite number"
                )));
            }
        }

        let mut redacted = snapshot.clone();
        let redactions = self.scrub.scrub_snapshot(&mut redacted);

        let mut bytes = serde_json::to_vec_pretty(&EnvelopeRef {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            snapshot: &redacted,
        })?;
        bytes.push(b'\n');

        if redactions > 0 {
            tracing::info!(
                snapshot = %snapshot.id,
                redactions,
                "Redacted secrets from snapshot before persisting"
            );
        }

        Ok(Encoded { bytes, redactions })
    }

    /// Decode a snapshot file. Fails closed: any schema or parse problem is
    /// an error, never a partially filled snapshot.
    pub fn decode(bytes: &[u8]) -> StateResult<Snapshot> {
        let header: VersionHeader =
            serde_json::from_slice(bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        let version = header
            .schema_version
            .ok_or_else(|| StateError::Decode("missing schema_version".to_string()))?;

        if !(MIN_SUPPORTED_SCHEMA_VERSION..=SNAPSHOT_SCHEMA_VERSION).contains(&version) {
            return Err(StateError::IncompatibleVersion {
                found: version,
                min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
                max_supported: SNAPSHOT_SCHEMA_VERSION,
            });
        }

        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| StateError::Decode(e.to_string()))?;
        Ok(envelope.snapshot)
    }
}
