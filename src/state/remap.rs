//! Drift-tolerant breakpoint remapping.
//!
//! Each saved breakpoint carries a small window of source lines captured
//! around it. On restore the window is looked up in the current source:
//!
//! 1. exact match at the saved line → [`RemapResult::Applied`];
//! 2. best similarity within `search_radius` lines of the saved line;
//! 3. best similarity over the whole file.
//!
//! A candidate from steps 2 or 3 is only accepted at or above the confidence
//! threshold ([`RemapResult::Relocated`]); otherwise the breakpoint is
//! [`RemapResult::Skipped`]. Ties go to the candidate closest to the saved
//! line, then to the lower line number.

use sha2::{Digest, Sha256};
use similar::TextDiff;

use crate::state::models::BreakpointRecord;
use crate::state::scrub::ScrubConfig;
use crate::state::target::{ActiveBreakpoint, SourceAccessor};

pub const DEFAULT_SNIPPET_RADIUS: usize = 3;
pub const DEFAULT_SEARCH_RADIUS: usize = 80;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.80;

/// Snippet lines longer than this are cut when captured and compared.
pub const MAX_SNIPPET_LINE_CHARS: usize = 240;

const SCORE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub enum RemapResult {
    /// Saved context matched exactly at the saved line.
    Applied { line: usize },
    /// Context found elsewhere (or changed in place) with enough confidence.
    Relocated {
        line: usize,
        confidence: f64,
        reason: String,
    },
    /// No confident match.
    Skipped { reason: String },
}

impl RemapResult {
    pub fn target_line(&self) -> Option<usize> {
        match self {
            RemapResult::Applied { line } | RemapResult::Relocated { line, .. } => Some(*line),
            RemapResult::Skipped { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RemapResult::Applied { .. } => None,
            RemapResult::Relocated { reason, .. } | RemapResult::Skipped { reason } => {
                Some(reason)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemapConfig {
    pub search_radius: usize,
    pub confidence_threshold: f64,
}

impl Default for RemapConfig {
    fn default() -> Self {
        Self {
            search_radius: DEFAULT_SEARCH_RADIUS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Normalize a source line for capture and comparison.
pub fn normalize_line(line: &str) -> String {
    let trimmed = line.trim_end();
    if trimmed.chars().count() > MAX_SNIPPET_LINE_CHARS {
        trimmed.chars().take(MAX_SNIPPET_LINE_CHARS).collect()
    } else {
        trimmed.to_string()
    }
}

pub fn snippet_hash(snippet: &[String]) -> String {
    let mut hasher = Sha256::new();
    for line in snippet {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

impl BreakpointRecord {
    /// Record `breakpoint`, capturing up to `radius` lines of context on
    /// each side when the source is available.
    pub fn capture(breakpoint: ActiveBreakpoint, source: Option<&[String]>, radius: usize) -> Self {
        let line = breakpoint.line;
        let (context_snippet, snippet_anchor) = match source {
            Some(lines) if line >= 1 && line <= lines.len() => {
                let idx = line - 1;
                let start = idx.saturating_sub(radius);
                let end = (idx + radius + 1).min(lines.len());
                let snippet: Vec<String> =
                    lines[start..end].iter().map(|l| normalize_line(l)).collect();
                (snippet, idx - start)
            }
            _ => (Vec::new(), 0),
        };
        Self {
            file: breakpoint.file,
            line,
            condition: breakpoint.condition,
            enabled: breakpoint.enabled,
            temporary: breakpoint.temporary,
            hits: breakpoint.hits,
            ignore_count: breakpoint.ignore_count,
            snippet_hash: snippet_hash(&context_snippet),
            context_snippet,
            snippet_anchor,
        }
    }

    /// The breakpoint to set in the debugger, placed at `line`.
    pub fn to_active(&self, line: usize) -> ActiveBreakpoint {
        ActiveBreakpoint {
            file: self.file.clone(),
            line,
            condition: self.condition.clone(),
            enabled: self.enabled,
            temporary: self.temporary,
            hits: self.hits,
            ignore_count: self.ignore_count,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    line: usize,
    score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct BreakpointRemapper {
    config: RemapConfig,
    scrub: Option<ScrubConfig>,
}

impl BreakpointRemapper {
    pub fn new(config: RemapConfig) -> Self {
        Self {
            config,
            scrub: None,
        }
    }

    /// Apply the same redaction to current source that was applied to saved
    /// snippets, so redacted lines still compare equal.
    pub fn with_scrub(mut self, scrub: ScrubConfig) -> Self {
        self.scrub = Some(scrub);
        self
    }

    pub fn config(&self) -> &RemapConfig {
        &self.config
    }

    pub fn remap(
        &self,
        records: &[BreakpointRecord],
        source: &dyn SourceAccessor,
    ) -> Vec<RemapResult> {
        records
            .iter()
            .map(|record| {
                let lines = source.lines(&record.file).map(|raw| self.prepare(&raw));
                let result = self.remap_one(record, lines.as_deref());
                tracing::debug!(
                    file = %record.file,
                    line = record.line,
                    result = ?result,
                    "Remapped breakpoint"
                );
                result
            })
            .collect()
    }

    fn prepare(&self, raw: &[String]) -> Vec<String> {
        raw.iter()
            .map(|line| {
                let normalized = normalize_line(line);
                match &self.scrub {
                    Some(scrub) => scrub.scrub_string(&normalized),
                    None => normalized,
                }
            })
            .collect()
    }

    pub fn remap_one(&self, record: &BreakpointRecord, lines: Option<&[String]>) -> RemapResult {
        let Some(lines) = lines else {
            return RemapResult::Skipped {
                reason: format!("source file {} is not available", record.file),
            };
        };

        let snippet = &record.context_snippet;
        if snippet.is_empty() || record.snippet_anchor >= snippet.len() {
            // Nothing to verify against; keep the line if it still exists.
            return if record.line >= 1 && record.line <= lines.len() {
                RemapResult::Applied { line: record.line }
            } else {
                RemapResult::Skipped {
                    reason: format!(
                        "no saved context and line {} is past the end of {} ({} lines)",
                        record.line,
                        record.file,
                        lines.len()
                    ),
                }
            };
        }

        if lines.is_empty() {
            return RemapResult::Skipped {
                reason: format!("{} is empty", record.file),
            };
        }

        let expected_hash = if record.snippet_hash.is_empty() {
            snippet_hash(snippet)
        } else {
            record.snippet_hash.clone()
        };
        if let Some(window) = window_at(lines, record.line, record.snippet_anchor, snippet.len()) {
            if snippet_hash(&window) == expected_hash {
                return RemapResult::Applied { line: record.line };
            }
        }

        let threshold = self.config.confidence_threshold;
        let near_start = record.line.saturating_sub(self.config.search_radius).max(1);
        let near_end = record
            .line
            .saturating_add(self.config.search_radius)
            .min(lines.len());

        let accepted = |c: &Candidate| c.score + SCORE_EPSILON >= threshold;
        let best = match self.best_candidate(record, lines, near_start..=near_end) {
            Some(c) if accepted(&c) => c,
            _ => match self.best_candidate(record, lines, 1..=lines.len()) {
                Some(c) if accepted(&c) => c,
                Some(c) => return skipped_below_threshold(record, c, threshold),
                None => {
                    return RemapResult::Skipped {
                        reason: format!("no candidate region for {}:{}", record.file, record.line),
                    }
                }
            },
        };

        let reason = if best.line == record.line {
            format!(
                "context around {}:{} changed; kept at line {} (similarity {:.2})",
                record.file, record.line, best.line, best.score
            )
        } else {
            format!(
                "context moved from {}:{} to line {} (similarity {:.2})",
                record.file, record.line, best.line, best.score
            )
        };
        RemapResult::Relocated {
            line: best.line,
            confidence: best.score,
            reason,
        }
    }

    fn best_candidate(
        &self,
        record: &BreakpointRecord,
        lines: &[String],
        range: std::ops::RangeInclusive<usize>,
    ) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;
        for line in range {
            let candidate = Candidate {
                line,
                score: score_window(record, lines, line),
            };
            best = Some(match best {
                Some(current) => pick(current, candidate, record.line),
                None => candidate,
            });
        }
        best
    }
}

/// Better of two candidates: higher score, then closer to `origin`, then
/// lower line.
fn pick(a: Candidate, b: Candidate, origin: usize) -> Candidate {
    if (a.score - b.score).abs() > SCORE_EPSILON {
        return if a.score > b.score { a } else { b };
    }
    let da = a.line.abs_diff(origin);
    let db = b.line.abs_diff(origin);
    match da.cmp(&db) {
        std::cmp::Ordering::Less => a,
        std::cmp::Ordering::Greater => b,
        std::cmp::Ordering::Equal => {
            if a.line <= b.line {
                a
            } else {
                b
            }
        }
    }
}

fn skipped_below_threshold(record: &BreakpointRecord, best: Candidate, threshold: f64) -> RemapResult {
    RemapResult::Skipped {
        reason: format!(
            "no region of {} resembles the saved context of line {} (best similarity {:.2} at line {}, threshold {:.2})",
            record.file, record.line, best.score, best.line, threshold
        ),
    }
}

/// The `len` lines that would surround `line` if the snippet's anchor sat
/// there, or `None` if the window runs off either end of the file.
fn window_at(lines: &[String], line: usize, anchor: usize, len: usize) -> Option<Vec<String>> {
    let start = line.checked_sub(1)?.checked_sub(anchor)?;
    let end = start.checked_add(len)?;
    if end > lines.len() {
        return None;
    }
    Some(lines[start..end].to_vec())
}

/// Similarity of the saved snippet to the window anchored at `line`.
///
/// The anchor line carries half of the weight, the surrounding context the
/// other half; context lines that fall outside the file score zero.
fn score_window(record: &BreakpointRecord, lines: &[String], line: usize) -> f64 {
    let snippet = &record.context_snippet;
    let anchor = record.snippet_anchor;

    let anchor_score = line_similarity(&snippet[anchor], &lines[line - 1]);
    if snippet.len() == 1 {
        return anchor_score;
    }

    let mut context_total = 0.0;
    for (offset, saved) in snippet.iter().enumerate() {
        if offset == anchor {
            continue;
        }
        let idx = (line - 1) as isize + offset as isize - anchor as isize;
        if idx >= 0 && (idx as usize) < lines.len() {
            context_total += line_similarity(saved, &lines[idx as usize]);
        }
    }
    let context_score = context_total / (snippet.len() - 1) as f64;

    0.5 * anchor_score + 0.5 * context_score
}

fn line_similarity(saved: &str, current: &str) -> f64 {
    let a = saved.trim();
    let b = current.trim();
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    TextDiff::from_chars(a, b).ratio() as f64
}
