//! Parsing of backend output.
//!
//! Backends are asked for a fixed three-section layout, but real output
//! drifts: heading levels vary, bold markers appear, a section goes missing.
//! Parsing here is lenient and never fails; anything unrecognised ends up in
//! the synthesis text.

use super::prompt::{FOLLOW_UP_HEADING, SELF_ASSESSMENT_HEADING, SYNTHESIS_HEADING};
use crate::config::PipelineLimits;
use crate::{char_len, truncate_chars};

/// Used when synthesis produced no usable follow-up question.
pub const GENERIC_FOLLOW_UP: &str =
    "Please provide more details on the uncertain aspects of the research so far.";

/// Used when both synthesis backends failed for a round.
pub const SYNTHESIS_FAILED_FOLLOW_UP: &str = "Synthesis was unavailable for this round. \
     Please continue the research, focusing on the claims that are still unverified.";

/// Placeholder synthesis text for a failed round.
pub const SYNTHESIS_UNAVAILABLE: &str = "(synthesis unavailable)";

/// Minimum characters for a line to count as a claim.
const MIN_CLAIM_CHARS: usize = 6;

/// Minimum characters for a line to count as a follow-up question.
const MIN_QUESTION_CHARS: usize = 11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    SelfAssessment,
    Synthesis,
    FollowUp,
}

/// The three sections of a synthesis response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SynthesisSections {
    pub self_assessment: String,
    pub synthesis: String,
    /// Raw follow-up section body, if present.
    pub follow_up: Option<String>,
}

/// Recognise a section heading line, tolerating `#` depth, bold markers,
/// trailing colons, and the older "Meta-Assessment" name.
fn heading_of(line: &str) -> Option<Section> {
    let trimmed = line.trim();
    let is_heading = trimmed.starts_with('#')
        || (trimmed.starts_with("**") && trimmed.ends_with("**") && char_len(trimmed) > 4);
    if !is_heading {
        return None;
    }
    let name = trimmed
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_lowercase();
    if name == SELF_ASSESSMENT_HEADING.to_lowercase() || name == "meta-assessment" {
        Some(Section::SelfAssessment)
    } else if name == SYNTHESIS_HEADING.to_lowercase() {
        Some(Section::Synthesis)
    } else if name == FOLLOW_UP_HEADING.to_lowercase() || name == "follow-up" {
        Some(Section::FollowUp)
    } else {
        None
    }
}

/// Split a synthesis response into its sections.
///
/// Text before the first recognised heading, or the whole text when no
/// heading appears, is treated as synthesis.
pub fn parse_synthesis(text: &str) -> SynthesisSections {
    let mut assessment = Vec::new();
    let mut synthesis = Vec::new();
    let mut follow_up = Vec::new();
    let mut saw_follow_up = false;
    let mut current = Section::Preamble;

    for line in text.lines() {
        if let Some(section) = heading_of(line) {
            current = section;
            if section == Section::FollowUp {
                saw_follow_up = true;
            }
            continue;
        }
        match current {
            Section::Preamble | Section::Synthesis => synthesis.push(line),
            Section::SelfAssessment => assessment.push(line),
            Section::FollowUp => follow_up.push(line),
        }
    }

    SynthesisSections {
        self_assessment: assessment.join("\n").trim().to_string(),
        synthesis: synthesis.join("\n").trim().to_string(),
        follow_up: saw_follow_up.then(|| follow_up.join("\n").trim().to_string()),
    }
}

/// Pick the question out of a follow-up section: the first substantive
/// line, with list markers and bold stripped.
pub fn extract_follow_up(section: Option<&str>) -> String {
    section
        .into_iter()
        .flat_map(str::lines)
        .map(|l| strip_list_marker(l.trim()).trim_matches('*').trim())
        .find(|l| char_len(l) >= MIN_QUESTION_CHARS)
        .map(str::to_string)
        .unwrap_or_else(|| GENERIC_FOLLOW_UP.to_string())
}

/// First line of the self-assessment, clipped for a progress entry.
pub fn assessment_breadcrumb(self_assessment: &str) -> Option<String> {
    self_assessment
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| truncate_chars(l, 80).to_string())
}

/// Strip a leading list marker: `1.`, `2)`, `3、`, `-`, `*`, `•`.
pub fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim_start();
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = trimmed.get(digits..).unwrap_or(trimmed);
        for marker in ['.', ')', '、'] {
            if let Some(stripped) = rest.strip_prefix(marker) {
                return stripped.trim_start();
            }
        }
        return trimmed;
    }
    for marker in ["- ", "* ", "• "] {
        if let Some(stripped) = trimmed.strip_prefix(marker) {
            return stripped.trim_start();
        }
    }
    trimmed
}

/// Turn backend A's extraction output into at most `max` claims.
pub fn parse_claims(text: &str, max: usize) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| char_len(l) >= MIN_CLAIM_CHARS)
        .take(max)
        .map(str::to_string)
        .collect()
}

/// Build the question actually submitted to the host: the follow-up plus a
/// verification context block carrying evidence and synthesis.
pub fn enrich_question(
    follow_up: &str,
    evidence: Option<&str>,
    synthesis: &str,
    limits: &PipelineLimits,
) -> String {
    let synthesis = truncate_chars(synthesis.trim(), limits.enrich_synthesis_chars);
    let evidence = evidence
        .map(|e| truncate_chars(e.trim(), limits.enrich_evidence_chars))
        .filter(|e| !e.is_empty());

    if synthesis.is_empty() && evidence.is_none() {
        return follow_up.to_string();
    }

    let mut out = format!("{follow_up}\n\n[Context: external verification]\n");
    if let Some(evidence) = evidence {
        out.push_str(evidence);
        out.push_str("\n\n");
    }
    if !synthesis.is_empty() {
        out.push_str("[Analysis summary]\n");
        out.push_str(synthesis);
        out.push_str("\n\n");
    }
    out.push_str(
        "Use the verification context above to make the next round more accurate and deeper.",
    );
    out
}
