//! Report renderers.

use crate::domain::Report;

/// Renders a report for humans or machines.
pub trait Reporter {
    fn render(&self, report: &Report) -> String;
}

/// Pretty JSON of the unmodified data model.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReporter;

impl Reporter for JsonReporter {
    fn render(&self, report: &Report) -> String {
        serde_json::to_string_pretty(report).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

/// Markdown summary for PR comments and check output.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownReporter;

/// Short status label shared by the renderers.
pub fn status_label(report: &Report) -> &'static str {
    if report.verified {
        "VERIFIED"
    } else if report.requires_human_review {
        "ESCALATED"
    } else {
        "FAILED"
    }
}

fn score_cell(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{s:.2}"))
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

impl Reporter for MarkdownReporter {
    fn render(&self, report: &Report) -> String {
        let mut out = String::new();
        out.push_str("# Verification Report\n\n");
        out.push_str(&format!(
            "- status: **{}**\n- overall score: {:.3}\n- attempt: {}\n- report: `{}`\n- session: `{}`\n",
            status_label(report),
            report.overall_score,
            report.attempt_number,
            report.id,
            report.session_id,
        ));
        if let Some(reason) = &report.escalation_reason {
            out.push_str(&format!("- escalation: {}\n", reason));
        }
        out.push('\n');

        out.push_str("## Stages\n\n");
        out.push_str("| stage | passed | score | error |\n");
        out.push_str("|---|---|---|---|\n");
        for r in &report.results {
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                r.stage_name,
                if r.passed { "yes" } else { "no" },
                score_cell(r.score),
                escape_cell(r.error.as_deref().unwrap_or("")),
            ));
        }
        out.push('\n');

        let with_findings: Vec<_> = report
            .results
            .iter()
            .filter(|r| !r.findings.is_empty())
            .collect();
        if !with_findings.is_empty() {
            out.push_str("## Findings\n\n");
            for r in with_findings {
                out.push_str(&format!("### {}\n", r.stage_name));
                for f in &r.findings {
                    out.push_str(&format!("- {}\n", f));
                }
                out.push('\n');
            }
        }

        if !report.correction_history.is_empty() {
            out.push_str("## Correction History\n\n");
            for (i, id) in report.correction_history.iter().enumerate() {
                out.push_str(&format!("{}. `{}`\n", i + 1, id));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CheckResult, Requirements, VerificationRequest};
    use uuid::Uuid;

    fn sample() -> Report {
        Report::new(
            Uuid::new_v4(),
            VerificationRequest::new("x", Requirements::new("vue")),
            vec![
                CheckResult::pass("syntax"),
                CheckResult::fail("pattern", vec!["missing `<template>`".into()]),
                CheckResult::timed_out("lint"),
            ],
            0.4,
            false,
            2,
        )
        .with_history(vec![Uuid::new_v4()])
    }

    #[test]
    fn json_round_trips() {
        let report = sample();
        let json = JsonReporter.render(&report);
        let back: Report = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn markdown_has_sections() {
        let mut report = sample();
        report.escalate("not verified after 2 attempt(s)");
        let md = MarkdownReporter.render(&report);
        assert!(md.contains("**ESCALATED**"));
        assert!(md.contains("| pattern | no | 0.00 |"));
        assert!(md.contains("| lint | no | 0.00 | timeout |"));
        assert!(md.contains("## Findings"));
        assert!(md.contains("missing `<template>`"));
        assert!(md.contains("## Correction History"));
        assert!(md.contains("escalation: not verified"));
    }

    #[test]
    fn status_labels() {
        let mut report = sample();
        assert_eq!(status_label(&report), "FAILED");
        report.verified = true;
        assert_eq!(status_label(&report), "VERIFIED");
    }
}
