//! Markdown record generation.
//!
//! [`MarkdownGenerator`] renders a [`SessionReport`] as a summary table, the
//! consent outcome, response-state counts and a turn table.
//! [`FadeMarkdownGenerator`] renders a [`FadeReport`] as a per-level
//! comparison followed by each level's responses.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::{CommitmentInput, FadeReport, SessionKind, SessionReport, TurnInput};

/// Maximum length for a response in a table cell.
const MAX_RESPONSE_DISPLAY_LENGTH: usize = 80;

/// Maximum length for a framing in the fade level table.
const MAX_FRAMING_DISPLAY_LENGTH: usize = 48;

/// Generates Markdown for one session.
pub struct MarkdownGenerator<'a> {
    report: &'a SessionReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a SessionReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_consent(&mut output);
        self.write_counts(&mut output);
        self.write_turns(&mut output);
        write_footer(&mut output, &self.report.generated_at);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# Agora Session Report: {}\n",
            escape_markdown(&self.report.session.session_id)
        );
    }

    fn write_summary(&self, output: &mut String) {
        let session = &self.report.session;
        let summary = &self.report.summary;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Protocol | {} |", session.kind.description());
        let _ = writeln!(output, "| Model | {} |", escape_markdown(&session.model));
        let _ = writeln!(output, "| Label | {} |", escape_markdown(&session.label));
        if let Some(mirror) = &session.mirror {
            let _ = writeln!(output, "| Mirror | {} |", escape_markdown(mirror));
        }
        let _ = writeln!(output, "| Outcome | {} |", inline_code(&session.phase));
        let _ = writeln!(output, "| Turns | {} |", summary.turns);
        if session.kind == SessionKind::Gateway {
            let commitment = match &session.commitment {
                Some(CommitmentInput::Committed { depth, intent }) => {
                    format!("{} at depth {depth}", inline_code(intent))
                }
                Some(CommitmentInput::Uncommitted) | None => "uncommitted".to_string(),
            };
            let _ = writeln!(output, "| Commitment | {commitment} |");
        } else {
            let _ = writeln!(
                output,
                "| Withdrawal Rate | {} |",
                format_rate(summary.withdrawal_rate)
            );
            let _ = writeln!(
                output,
                "| Consecutive Withdrawals | {} |",
                session.consecutive_withdrawals
            );
        }
        let _ = writeln!(
            output,
            "| Avg Latency | {} |",
            format_latency(summary.avg_latency_ms)
        );
        let seconds = (session.finished_at - session.started_at).num_seconds();
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(u64::try_from(seconds).unwrap_or(0))
        );
        let _ = writeln!(output);
    }

    fn write_consent(&self, output: &mut String) {
        let _ = writeln!(output, "## Consent\n");

        let Some(consent) = &self.report.session.consent else {
            let _ = writeln!(output, "*No consent check was run.*\n");
            return;
        };

        if consent.acknowledged {
            let _ = writeln!(
                output,
                "**Acknowledged**: yes ({})\n",
                consent.matched_keywords.join(", ")
            );
        } else {
            let _ = writeln!(output, "**Acknowledged**: no\n");
        }
        if let Some(error) = &consent.error {
            let _ = writeln!(output, "**Error**: {}\n", escape_markdown(error));
        }
        if let Some(response) = &consent.response {
            let _ = writeln!(output, "> {}\n", escape_markdown(response));
        }
    }

    fn write_counts(&self, output: &mut String) {
        let _ = writeln!(output, "## Response States\n");

        if self.report.summary.counts.is_empty() {
            let _ = writeln!(output, "*No turns executed.*\n");
            return;
        }

        let _ = writeln!(output, "| State | Count |");
        let _ = writeln!(output, "|-------|-------|");
        for (label, count) in &self.report.summary.counts {
            let _ = writeln!(output, "| {} | {count} |", inline_code(label));
        }
        let _ = writeln!(output);
    }

    fn write_turns(&self, output: &mut String) {
        let _ = writeln!(output, "## Turns\n");

        if self.report.session.turns.is_empty() {
            let _ = writeln!(output, "*No turns executed.*\n");
            return;
        }

        let _ = writeln!(output, "| # | Stimulus | State | Latency | Response |");
        let _ = writeln!(output, "|---|----------|-------|---------|----------|");
        for turn in &self.report.session.turns {
            let _ = writeln!(
                output,
                "| {} | {} {} | {} | {} ms | {} |",
                turn.turn,
                inline_code(&turn.symbol),
                turn.category,
                inline_code(&turn.label),
                turn.latency_ms,
                response_cell(turn)
            );
        }
        let _ = writeln!(output);
    }
}

/// Generates Markdown for a fade run.
pub struct FadeMarkdownGenerator<'a> {
    report: &'a FadeReport,
}

impl<'a> FadeMarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a FadeReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        let _ = writeln!(
            output,
            "# Agora Fade Report: {}\n",
            escape_markdown(&self.report.run_id)
        );
        self.write_summary(&mut output);
        self.write_levels(&mut output);
        self.write_responses(&mut output);
        write_footer(&mut output, &self.report.generated_at);

        output
    }

    fn write_summary(&self, output: &mut String) {
        let report = self.report;
        let threshold = report
            .threshold
            .as_deref()
            .map_or_else(|| "*none*".to_string(), inline_code);

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Model | {} |", escape_markdown(&report.model));
        let _ = writeln!(output, "| Trials per Level | {} |", report.trials_per_level);
        let _ = writeln!(output, "| Threshold | {threshold} |");
        let _ = writeln!(
            output,
            "| Anomaly | {} |",
            if report.anomaly { "yes" } else { "no" }
        );
        let _ = writeln!(output);
        let _ = writeln!(output, "{}\n", report.conclusion());
    }

    fn write_levels(&self, output: &mut String) {
        let _ = writeln!(output, "## Levels\n");

        if self.report.levels.is_empty() {
            let _ = writeln!(output, "*No levels configured.*\n");
            return;
        }

        let _ = writeln!(
            output,
            "| Level | Trials | Withdrawals | Rate | Avg Latency | Framing |"
        );
        let _ = writeln!(
            output,
            "|-------|--------|-------------|------|-------------|---------|"
        );
        for level in &self.report.levels {
            let framing = if level.framing.trim().is_empty() {
                "*none*".to_string()
            } else {
                escape_markdown(&truncate(level.framing.trim(), MAX_FRAMING_DISPLAY_LENGTH))
            };
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {framing} |",
                inline_code(&level.label),
                level.trials,
                level.withdrawals,
                format_rate(level.withdrawal_rate),
                format_latency(level.avg_latency_ms),
            );
        }
        let _ = writeln!(output);
    }

    fn write_responses(&self, output: &mut String) {
        if self.report.sessions.is_empty() {
            return;
        }

        let _ = writeln!(output, "## Responses\n");
        for session in &self.report.sessions {
            let _ = writeln!(output, "### {}\n", inline_code(&session.label));
            if session.turns.is_empty() {
                let _ = writeln!(output, "*No turns executed.*\n");
                continue;
            }
            let _ = writeln!(output, "| # | State | Latency | Response |");
            let _ = writeln!(output, "|---|-------|---------|----------|");
            for turn in &session.turns {
                let _ = writeln!(
                    output,
                    "| {} | {} | {} ms | {} |",
                    turn.turn,
                    inline_code(&turn.label),
                    turn.latency_ms,
                    response_cell(turn)
                );
            }
            let _ = writeln!(output);
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn write_footer(output: &mut String, generated_at: &DateTime<Utc>) {
    let _ = writeln!(output, "---");
    let timestamp = format_timestamp(generated_at);
    let _ = writeln!(output, "*Generated by Agora at {timestamp}*");
}

/// The visible response, or the failure description for failed turns.
fn response_cell(turn: &TurnInput) -> String {
    match turn.response.as_deref() {
        Some(text) if !text.trim().is_empty() => {
            escape_markdown(&truncate(text, MAX_RESPONSE_DISPLAY_LENGTH))
        }
        Some(_) => "*empty*".to_string(),
        None => format!("*{}*", escape_markdown(&turn.description)),
    }
}

/// Formats a rate in `[0, 1]` as a percentage.
fn format_rate(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

fn format_latency(ms: f64) -> String {
    format!("{ms:.0} ms")
}

/// Formats a duration in seconds to a human-readable string.
///
/// Examples: "45s", "2m 30s", "1h 5m"
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();

    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

/// Formats a timestamp as "YYYY-MM-DD HH:MM:SS UTC".
fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Escapes special Markdown characters in text.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

/// Wraps text in backticks, replacing any backticks it contains.
fn inline_code(text: &str) -> String {
    format!("`{}`", text.replace('`', "'").replace('|', "\\|"))
}

/// Keeps the first line, cut at a char boundary with an ellipsis.
fn truncate(text: &str, max_length: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");

    if first_line.chars().count() <= max_length {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(max_length).collect();
        format!("{cut}...")
    }
}

// ============================================================================
// Tests
// ============================================================================
