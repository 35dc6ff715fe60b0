use regex::Regex;

use crate::state::models::Snapshot;
use crate::state::remap::snippet_hash;

pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Secret patterns applied to every free-text field of a snapshot before it
/// touches disk.
#[derive(Debug, Clone)]
pub struct ScrubConfig {
    patterns: Vec<Regex>,
}

impl ScrubConfig {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    pub fn default_patterns() -> Vec<Regex> {
        // Keep patterns simple: the Rust `regex` crate doesn't support look-behind.
        let raw = [
            r"sk-[A-Za-z0-9_-]{10,}",
            r"Bearer\s+[A-Za-z0-9._-]{10,}",
            r"AKIA[0-9A-Z]{16}",
            r"gh[pousr]_[A-Za-z0-9]{20,}",
            r"xox[abposr]-[A-Za-z0-9-]{10,}",
            // `name = "literal"` / `NAME=longtoken` style assignments only, so that
            // expressions like `token_count = len(tokens)` survive.
            r#"(?i)\b[a-z0-9_]*(api[_-]?key|secret|token|passw(or)?d)[a-z0-9_]*\s*[:=]\s*(["'][^"'\s]{6,}["']|[A-Za-z0-9_./+-]{12,})"#,
        ];
        raw.into_iter().filter_map(|p| Regex::new(p).ok()).collect()
    }

    /// Default patterns plus user-configured extras. Invalid extras are
    /// logged and skipped.
    pub fn with_extra_patterns(extra: &[String]) -> Self {
        let mut patterns = Self::default_patterns();
        for raw in extra {
            match Regex::new(raw) {
                Ok(re) => patterns.push(re),
                Err(e) => {
                    tracing::warn!(pattern = %raw, error = %e, "Ignoring invalid redaction pattern");
                }
            }
        }
        Self::new(patterns)
    }

    /// Redact `input`, returning the scrubbed text and the number of matches.
    pub fn scrub_str(&self, input: &str) -> (String, usize) {
        let mut out = input.to_string();
        let mut count = 0;
        for re in &self.patterns {
            let hits = re.find_iter(&out).count();
            if hits > 0 {
                count += hits;
                out = re.replace_all(&out, REDACTION_MARKER).into_owned();
            }
        }
        (out, count)
    }

    pub fn scrub_string(&self, input: &str) -> String {
        self.scrub_str(input).0
    }

    fn scrub_in_place(&self, field: &mut String) -> usize {
        let (out, count) = self.scrub_str(field);
        if count > 0 {
            *field = out;
        }
        count
    }

    /// Redact every free-text field of `snapshot`; returns the total number
    /// of redactions performed.
    pub fn scrub_snapshot(&self, snapshot: &mut Snapshot) -> usize {
        let mut total = self.scrub_in_place(&mut snapshot.conversation_summary);

        for watch in &mut snapshot.watches {
            total += self.scrub_in_place(&mut watch.expression);
            if let Some(label) = watch.label.as_mut() {
                total += self.scrub_in_place(label);
            }
        }

        for bp in &mut snapshot.breakpoints {
            if let Some(condition) = bp.condition.as_mut() {
                total += self.scrub_in_place(condition);
            }
            let mut snippet_hits = 0;
            for line in &mut bp.context_snippet {
                snippet_hits += self.scrub_in_place(line);
            }
            if snippet_hits > 0 {
                // Keep the hash consistent with what is actually stored.
                bp.snippet_hash = snippet_hash(&bp.context_snippet);
                total += snippet_hits;
            }
        }

        if let Some(runtime) = snapshot.runtime_summary.as_mut() {
            for value in runtime.safe_locals.values_mut() {
                total += self.scrub_in_place(value);
            }
        }

        total
    }
}

impl Default for ScrubConfig {
    fn default() -> Self {
        Self::new(Self::default_patterns())
    }
}
