//! Building [`Snapshot`]s from the live session.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::state::fingerprint::{compute_compatibility_key, display_paths};
use crate::state::models::{
    bound_text, BreakpointRecord, MemorySummary, RuntimeSummary, Snapshot, SnapshotKind,
    TRUNCATION_MARKER,
};
use crate::state::remap::DEFAULT_SNIPPET_RADIUS;
use crate::state::scrub::ScrubConfig;
use crate::state::target::{SessionStateSource, SourceAccessor};

pub const DEFAULT_SUMMARY_CHAR_BUDGET: usize = 4000;
pub const DEFAULT_MAX_STACK_FRAMES: usize = 64;
pub const DEFAULT_MAX_LOCAL_CHARS: usize = 256;

/// Size bounds applied while capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureLimits {
    pub summary_char_budget: usize,
    pub snippet_radius: usize,
    pub max_stack_frames: usize,
    pub max_local_chars: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            summary_char_budget: DEFAULT_SUMMARY_CHAR_BUDGET,
            snippet_radius: DEFAULT_SNIPPET_RADIUS,
            max_stack_frames: DEFAULT_MAX_STACK_FRAMES,
            max_local_chars: DEFAULT_MAX_LOCAL_CHARS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub snapshot: Snapshot,
    /// Truncations and other lossy steps the user should hear about.
    pub warnings: Vec<String>,
    /// Secrets removed from text before it was bounded.
    pub redactions: usize,
}

/// Id for a rolling checkpoint taken at `at`.
pub fn auto_snapshot_id(at: DateTime<Utc>) -> String {
    format!("auto-{}", at.format("%Y%m%dT%H%M%S%6fZ"))
}

/// Copy the session's current state into a new snapshot.
///
/// For `Auto` snapshots `id` is ignored and derived from the capture time.
/// Free text is scrubbed before it is bounded, so a cut can never leave a
/// fragment of a secret too short for the patterns to match.
pub fn capture_snapshot(
    source: &dyn SessionStateSource,
    accessor: &dyn SourceAccessor,
    limits: &CaptureLimits,
    scrub: &ScrubConfig,
    kind: SnapshotKind,
    id: Option<&str>,
    reason: &str,
) -> Captured {
    let created_at = Utc::now();
    let id = match (kind, id) {
        (SnapshotKind::Named, Some(name)) => name.trim().to_string(),
        _ => auto_snapshot_id(created_at),
    };

    let mut warnings = Vec::new();
    let controls = source.current_control_state();

    let breakpoints = controls
        .breakpoints
        .into_iter()
        .map(|bp| {
            let lines = accessor.lines(&bp.file);
            if lines.is_none() {
                warnings.push(format!(
                    "Source for {} is unavailable; breakpoint at line {} saved without context",
                    bp.file, bp.line
                ));
            }
            BreakpointRecord::capture(bp, lines.as_deref(), limits.snippet_radius)
        })
        .collect();

    let (summary, mut redactions) = scrub.scrub_str(&source.conversation_summary());
    let (conversation_summary, cut) = bound_text(&summary, limits.summary_char_budget);
    if let Some(cut) = cut {
        tracing::warn!(
            budget = limits.summary_char_budget,
            removed = cut,
            "Conversation summary truncated"
        );
        warnings.push(format!(
            "Conversation summary exceeded {} characters; {cut} characters were truncated",
            limits.summary_char_budget
        ));
    }

    let runtime_summary = source
        .current_runtime_summary()
        .map(|summary| bound_runtime(summary, limits, scrub, &mut redactions, &mut warnings));

    let memory_summary = source
        .current_memory_summary()
        .map(|summary| finite_memory(summary, &mut warnings));

    let target_files = source.target_files();
    let compatibility_key = compute_compatibility_key(&target_files);

    let focus_filters: BTreeSet<_> = controls.focus_filters.into_iter().collect();

    Captured {
        snapshot: Snapshot {
            id,
            created_at,
            kind,
            reason: reason.to_string(),
            compatibility_key,
            target_files: display_paths(&target_files),
            breakpoints,
            watches: controls.watches,
            focus_filters,
            runtime_summary,
            memory_summary,
            conversation_summary,
        },
        warnings,
        redactions,
    }
}

/// JSON has no NaN or infinity, so such aggregates are dropped here rather
/// than producing a snapshot that cannot be read back.
fn finite_memory(mut summary: MemorySummary, warnings: &mut Vec<String>) -> MemorySummary {
    let before = summary.traced.len();
    summary.traced.retain(|key, value| {
        if value.is_finite() {
            return true;
        }
        tracing::warn!(key = %key, value = %value, "Dropping non-finite memory aggregate");
        false
    });
    let dropped = before - summary.traced.len();
    if dropped > 0 {
        warnings.push(format!(
            "{dropped} memory aggregate(s) in '{}' were not finite numbers and were dropped",
            summary.label
        ));
    }
    summary
}

fn bound_runtime(
    mut summary: RuntimeSummary,
    limits: &CaptureLimits,
    scrub: &ScrubConfig,
    redactions: &mut usize,
    warnings: &mut Vec<String>,
) -> RuntimeSummary {
    if summary.stack_frames.len() > limits.max_stack_frames {
        let dropped = summary.stack_frames.len() - limits.max_stack_frames;
        summary.stack_frames.truncate(limits.max_stack_frames);
        warnings.push(format!(
            "Stack summary capped at {} frames ({dropped} omitted)",
            limits.max_stack_frames
        ));
    }

    let mut truncated = 0;
    for value in summary.safe_locals.values_mut() {
        let (scrubbed, hits) = scrub.scrub_str(value);
        *redactions += hits;
        let (bounded, cut) = bound_text(&scrubbed, limits.max_local_chars);
        if cut.is_some() {
            truncated += 1;
        }
        *value = bounded;
    }
    if truncated > 0 {
        tracing::debug!(truncated, marker = TRUNCATION_MARKER, "Bounded local values");
        warnings.push(format!(
            "{truncated} local value(s) longer than {} characters were truncated",
            limits.max_local_chars
        ));
    }
    summary
}
