//! Markdown report assembly.
//!
//! [`render_report`] is a pure function of the session: same session, same
//! text. It never fails. Rounds are rendered in increasing order and a round
//! appears only once its analysis exists, so a session cancelled mid-round
//! shows exactly the completed rounds.

use crate::session::{
    AnalysisEntry, ClosingReason, FinalReportSource, NO_SEARCH_RESULTS, ResearchSession,
};
use crate::analysis::sections::SYNTHESIS_UNAVAILABLE;
use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::path::Path;
use tracing::info;

/// Characters of each search description shown in the report.
const REPORT_DESCRIPTION_CHARS: usize = 150;

fn timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Render the full report for `session`.
pub fn render_report(session: &ResearchSession) -> String {
    let mut out = String::new();
    let completed = completed_rounds(session);

    let _ = writeln!(out, "# Research Report: {}", session.topic());
    out.push('\n');
    let _ = writeln!(out, "- Session: `{}`", session.id());
    let _ = writeln!(out, "- Started: {}", timestamp(session.created_at()));
    let _ = writeln!(
        out,
        "- Rounds completed: {}/{}",
        completed.len(),
        session.max_rounds()
    );
    let usage = session.usage();
    let _ = writeln!(
        out,
        "- Backend calls: A={} B={}",
        usage.backend_a_calls, usage.backend_b_calls
    );
    if let Some(report) = session.final_report() {
        let status = match report.source {
            FinalReportSource::HostSurface => "completed".to_string(),
            FinalReportSource::Internal(reason) => format!("ended early ({reason})"),
        };
        let _ = writeln!(out, "- Status: {status}");
        let _ = writeln!(out, "- Finished: {}", timestamp(report.received_at));
    } else {
        let _ = writeln!(out, "- Status: in progress ({})", session.state());
    }

    if let Some(report) = session.final_report()
        && report.source == FinalReportSource::HostSurface
    {
        out.push_str("\n## Final Summary\n\n");
        out.push_str(report.text.trim());
        out.push('\n');
    }

    if completed.is_empty() {
        out.push_str("\n_No rounds were completed._\n");
    }

    for analysis in &completed {
        render_round(&mut out, session, analysis);
    }

    if let Some(report) = session.final_report()
        && report.is_internal()
    {
        out.push_str("\n---\n\n## Closing Summary\n\n");
        out.push_str(report.text.trim());
        out.push('\n');
    }

    out
}

/// Analyses in strictly increasing round order, each with its report.
fn completed_rounds(session: &ResearchSession) -> Vec<&AnalysisEntry> {
    let mut rounds: Vec<&AnalysisEntry> = session
        .analyses()
        .iter()
        .filter(|a| session.report_for_round(a.round).is_some())
        .collect();
    rounds.sort_by_key(|a| a.round);
    rounds.dedup_by_key(|a| a.round);
    rounds
}

fn render_round(out: &mut String, session: &ResearchSession, analysis: &AnalysisEntry) {
    let _ = writeln!(out, "\n---\n\n## Round {}\n", analysis.round);

    if let Some(report) = session.report_for_round(analysis.round) {
        out.push_str("### 1. Host Report\n\n");
        out.push_str(report.content.trim());
        out.push_str("\n\n");
    }

    if !analysis.claims.is_empty() {
        out.push_str("### 2. Extracted Claims\n\n");
        for claim in &analysis.claims {
            let _ = writeln!(out, "- {claim}");
        }
        out.push('\n');
    }

    out.push_str("### 3. Web Evidence\n\n");
    let evidence = analysis.evidence_markdown(REPORT_DESCRIPTION_CHARS);
    if evidence == NO_SEARCH_RESULTS {
        let _ = writeln!(out, "_{NO_SEARCH_RESULTS}_");
    } else {
        out.push_str(&evidence);
        out.push('\n');
    }
    out.push('\n');

    if !analysis.self_assessment.trim().is_empty() {
        out.push_str("### 4. Self-Assessment\n\n");
        out.push_str(analysis.self_assessment.trim());
        out.push_str("\n\n");
    }

    out.push_str("### 5. Synthesis\n\n");
    let synthesis = analysis.synthesis.trim();
    out.push_str(if synthesis.is_empty() {
        SYNTHESIS_UNAVAILABLE
    } else {
        synthesis
    });
    out.push_str("\n\n");

    out.push_str("### 6. Follow-up Question\n\n");
    out.push_str(analysis.follow_up_question.trim());
    out.push('\n');

    if analysis.enriched_question.trim() != analysis.follow_up_question.trim() {
        out.push_str("\n### 7. Question Sent to Host\n\n");
        out.push_str(analysis.enriched_question.trim());
        out.push('\n');
    }
}

/// Short internal summary used when the host's own final report is
/// unavailable.
pub fn closing_summary(session: &ResearchSession, reason: ClosingReason) -> String {
    let completed = completed_rounds(session);
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Session ended: {reason}. {} of {} round(s) completed on \"{}\".",
        completed.len(),
        session.max_rounds(),
        session.topic()
    );
    if let Some(last) = completed.last() {
        if !last.synthesis_failed {
            out.push_str("\nLatest synthesis:\n\n");
            out.push_str(last.synthesis.trim());
            out.push('\n');
        }
        out.push_str("\nOpen questions:\n\n");
        for a in &completed {
            let _ = writeln!(out, "- Round {}: {}", a.round, a.follow_up_question.trim());
        }
    }
    out
}

/// Write a rendered report to `path`, creating parent directories.
pub fn export_report(path: &Path, report: &str) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    std::fs::write(path, report).map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    info!("report written to {} ({} bytes)", path.display(), report.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendRole;
    use crate::backend::search::SearchResult;
    use crate::session::SessionState;

    fn analysis(round: u32, with_evidence: bool) -> AnalysisEntry {
        AnalysisEntry {
            round,
            claims: vec![format!("claim {round}")],
            search_evidence: if with_evidence {
                vec![SearchResult {
                    title: "Source".into(),
                    url: "https://example.com".into(),
                    description: "evidence".into(),
                }]
            } else {
                vec![]
            },
            synthesis: format!("synthesis {round}"),
            self_assessment: String::new(),
            follow_up_question: format!("question {round}?"),
            enriched_question: format!("question {round}?\n\n[ctx]"),
            synthesis_failed: false,
            created_at: Utc::now(),
        }
    }

    fn two_round_session() -> ResearchSession {
        let mut s = ResearchSession::new("rs-1", "tidal power", 3, true);
        s.set_state(SessionState::WaitingResearch);
        s.record_report("report one".into());
        s.record_analysis(analysis(1, true));
        s.advance_round();
        s.record_report("report two".into());
        s.record_analysis(analysis(2, false));
        s.record_backend_call(BackendRole::Extraction);
        s.record_backend_call(BackendRole::Synthesis);
        s
    }

    #[test]
    fn render_is_deterministic() {
        let s = two_round_session();
        assert_eq!(render_report(&s), render_report(&s));
    }

    #[test]
    fn rounds_in_increasing_order() {
        let r = render_report(&two_round_session());
        let one = r.find("## Round 1").unwrap();
        let two = r.find("## Round 2").unwrap();
        assert!(one < two);
        assert!(r.contains("report one"));
        assert!(r.contains("- [Source](https://example.com): evidence"));
        assert!(r.contains("_(no search results)_"));
        assert!(r.contains("Rounds completed: 2/3"));
        assert!(r.contains("Backend calls: A=1 B=1"));
    }

    #[test]
    fn mid_round_report_without_analysis_is_omitted() {
        let mut s = two_round_session();
        s.advance_round();
        s.record_report("report three, analysis pending".into());
        let r = render_report(&s);
        assert!(!r.contains("## Round 3"));
        assert!(!r.contains("analysis pending"));
    }

    #[test]
    fn empty_session_renders() {
        let s = ResearchSession::new("rs-2", "empty", 2, true);
        let r = render_report(&s);
        assert!(r.contains("No rounds were completed"));
        assert!(r.contains("in progress (IDLE)"));
    }

    #[test]
    fn host_summary_at_top_internal_at_bottom() {
        let mut s = two_round_session();
        s.set_final_report(FinalReportSource::HostSurface, "HOST SUMMARY".into());
        let r = render_report(&s);
        assert!(r.find("HOST SUMMARY").unwrap() < r.find("## Round 1").unwrap());

        let mut s = two_round_session();
        let text = closing_summary(&s, ClosingReason::Cancelled);
        s.set_final_report(FinalReportSource::Internal(ClosingReason::Cancelled), text);
        let r = render_report(&s);
        assert!(r.find("## Closing Summary").unwrap() > r.find("## Round 2").unwrap());
        assert!(r.contains("ended early (cancelled by user)"));
    }

    #[test]
    fn closing_summary_lists_open_questions() {
        let s = two_round_session();
        let c = closing_summary(&s, ClosingReason::FinalReportTimeout);
        assert!(c.contains("2 of 3 round(s)"));
        assert!(c.contains("- Round 1: question 1?"));
        assert!(c.contains("synthesis 2"));
    }

    #[test]
    fn enriched_question_shown_only_when_different() {
        let mut s = ResearchSession::new("rs-3", "t", 2, true);
        s.record_report("r".into());
        let mut a = analysis(1, false);
        a.enriched_question = a.follow_up_question.clone();
        s.record_analysis(a);
        assert!(!render_report(&s).contains("Question Sent to Host"));
    }

    #[test]
    fn export_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/nested/rs-1.md");
        let text = render_report(&two_round_session());
        export_report(&path, &text).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
    }

    #[test]
    fn export_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let err = export_report(&blocker.join("report.md"), "r").unwrap_err();
        assert!(err.contains("failed to"));
    }
}
