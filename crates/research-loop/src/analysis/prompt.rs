//! Prompt assembly for the analysis pipeline and the final summary.
//!
//! [`SystemPromptBuilder`] joins `## Section` blocks with blank lines and
//! skips empty ones. The free functions build the concrete prompts the
//! pipeline sends: claim extraction, synthesis (system + user), and the
//! host-surface summary request.

use crate::config::PipelineLimits;
use crate::truncate_chars;

/// Builder for multi-section prompts.
///
/// ```
/// use research_loop::analysis::prompt::SystemPromptBuilder;
///
/// let prompt = SystemPromptBuilder::new("You are a research critic.")
///     .section("Topic", "Battery degradation")
///     .section_opt("Previous Questions", None::<String>)
///     .build();
///
/// assert!(prompt.contains("## Topic"));
/// assert!(!prompt.contains("## Previous Questions"));
/// ```
pub struct SystemPromptBuilder {
    sections: Vec<String>,
}

impl SystemPromptBuilder {
    /// Start with a preamble, included as-is.
    pub fn new(preamble: impl Into<String>) -> Self {
        let preamble = preamble.into();
        Self {
            sections: if preamble.is_empty() {
                Vec::new()
            } else {
                vec![preamble]
            },
        }
    }

    /// Append `## heading` followed by `content`. Skipped if `content` is empty.
    pub fn section(mut self, heading: &str, content: impl Into<String>) -> Self {
        let content = content.into();
        if !content.trim().is_empty() {
            self.sections.push(format!("## {heading}\n{content}"));
        }
        self
    }

    /// Append a section only when `condition` holds. `content_fn` is not
    /// called otherwise.
    pub fn section_if(
        self,
        condition: bool,
        heading: &str,
        content_fn: impl FnOnce() -> String,
    ) -> Self {
        if condition {
            self.section(heading, content_fn())
        } else {
            self
        }
    }

    pub fn section_opt(self, heading: &str, content: Option<impl Into<String>>) -> Self {
        match content {
            Some(c) => self.section(heading, c),
            None => self,
        }
    }

    /// Append raw text without a heading.
    pub fn raw(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        if !text.is_empty() {
            self.sections.push(text);
        }
        self
    }

    pub fn build(self) -> String {
        self.sections.join("\n\n")
    }
}

// ── Research phase ─────────────────────────────────────────────────

/// Where the session is in its round budget. Drives the synthesis
/// guidance so late rounds converge instead of branching out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchPhase {
    /// First quarter: map the landscape.
    Foundation,
    /// Up to half: causes and mechanisms.
    Mechanism,
    /// Up to three quarters: cross-check and compare.
    Verification,
    /// Remainder: integrate into a judgment.
    Integration,
}

impl ResearchPhase {
    pub fn for_round(round: u32, max_rounds: u32) -> Self {
        let ratio = f64::from(round) / f64::from(max_rounds.max(1));
        if ratio <= 0.25 {
            Self::Foundation
        } else if ratio <= 0.5 {
            Self::Mechanism
        } else if ratio <= 0.75 {
            Self::Verification
        } else {
            Self::Integration
        }
    }

    pub fn guidance(&self) -> &'static str {
        match self {
            Self::Foundation => {
                "EARLY PHASE (foundation): establish the core facts and the basic structure of \
                 the topic. Survey its key variables and current state broadly."
            }
            Self::Mechanism => {
                "MID PHASE (mechanism): dig into causal relationships and structural dynamics \
                 between the key variables. Ask \"why?\" and \"through what mechanism?\"."
            }
            Self::Verification => {
                "LATE PHASE (verification): cross-check established facts against other \
                 perspectives and comparison groups. Explore dissent, risks, and alternative \
                 interpretations."
            }
            Self::Integration => {
                "FINAL PHASE (integration): pull the analysis together into actionable \
                 conclusions. Ask questions that bind everything into a single judgment \
                 framework: verdicts, practical application, scenario responses."
            }
        }
    }
}

// ── Section headings ───────────────────────────────────────────────

pub const SELF_ASSESSMENT_HEADING: &str = "Self-Assessment";
pub const SYNTHESIS_HEADING: &str = "Synthesis";
pub const FOLLOW_UP_HEADING: &str = "Follow-up Question";

// ── Prompts ────────────────────────────────────────────────────────

/// Claim extraction prompt for backend A.
pub fn extraction_prompt(report: &str, limits: &PipelineLimits) -> String {
    format!(
        "Extract the 3-{} most important verifiable factual claims from the report below. \
         Output one claim per line, claim text only, no commentary.\n\n{}",
        limits.max_claims,
        truncate_chars(report, limits.extraction_chars)
    )
}

/// System prompt for synthesis. Anchors the backend on the original topic.
pub fn synthesis_system_prompt(topic: &str, phase: ResearchPhase) -> String {
    SystemPromptBuilder::new(
        "You are a research synthesis coordinator investigating a specific topic. \
         Your conversation persists across rounds, so you remember every previous analysis.",
    )
    .section("CORE TOPIC (NEVER DRIFT FROM THIS)", format!("\"{topic}\""))
    .section(
        "Your Role",
        "- Synthesize each round's report with the external evidence provided\n\
         - Identify what is confirmed, what is uncertain, and what is missing\n\
         - Generate follow-up questions that DEEPEN understanding of the CORE TOPIC",
    )
    .section("Research Phase Strategy", phase.guidance())
    .section(
        "Quality Rules for Follow-up Questions",
        "- Every follow-up MUST directly relate to the CORE TOPIC\n\
         - Revisiting an earlier angle from a deeper perspective is encouraged\n\
         - Never ask the same question at the same depth\n\
         - If the report drifts off-topic, steer the follow-up back to the core topic\n\
         - Prefer HOW and WHY questions over WHAT questions\n\
         - Ask about mechanisms, causal paths, and trade-offs rather than simple facts",
    )
    .section(
        "Output Format",
        format!(
            "Output EXACTLY three sections in this order, with no other text:\n\n\
             ### {SELF_ASSESSMENT_HEADING}\n\
             (2-4 short lines: axes explored so far, gaps remaining, self-diagnosis \
             (repetitive? biased? shallow? drifting?), strategy adjustment for this round)\n\n\
             ### {SYNTHESIS_HEADING}\n\
             (Your analysis of this round's report and the external evidence)\n\n\
             ### {FOLLOW_UP_HEADING}\n\
             (A single-sentence question, informed by your self-assessment)"
        ),
    )
    .section(
        "Rules",
        "- Respond in the SAME language as the report\n\
         - No translations, no meta-commentary outside the self-assessment, no markdown bold\n\
         - Be honest and critical about the research trajectory in the self-assessment",
    )
    .build()
}

/// User prompt for synthesis.
pub fn synthesis_prompt(
    round: u32,
    max_rounds: u32,
    prior_questions: &[String],
    report: &str,
    evidence: Option<&str>,
    limits: &PipelineLimits,
) -> String {
    let prior = (!prior_questions.is_empty()).then(|| {
        prior_questions
            .iter()
            .enumerate()
            .map(|(i, q)| format!("Round {}: {q}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    });
    SystemPromptBuilder::new(format!("## Round {round}/{max_rounds}"))
        .section_opt(
            "Previous Follow-up Questions (avoid exact repetition, deeper revisits OK)",
            prior,
        )
        .section(
            "Report (this round)",
            truncate_chars(report, limits.synthesis_chars),
        )
        .section(
            "External Evidence",
            evidence.unwrap_or("(No search results available)"),
        )
        .raw("Produce your synthesis and follow-up question now.")
        .build()
}

/// Request sent to the host surface to produce the final summary.
pub fn final_summary_prompt(topic: &str) -> String {
    SystemPromptBuilder::new(
        "Combine everything researched so far into a final report and provide it as a \
         downloadable markdown (.md) file.",
    )
    .section("Topic", topic)
    .section(
        "Structure",
        "1. Key findings\n\
         2. Detailed analysis\n\
         3. What is confirmed versus what remains uncertain\n\
         4. Conclusions and recommendations",
    )
    .build()
}
