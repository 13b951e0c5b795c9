//! Agora Record Emission
//!
//! This crate turns finished session data into records: a JSON document for
//! programmatic analysis and a Markdown summary for human review. It knows
//! nothing about the engine; callers convert their state into the local
//! [`SessionInput`] and [`FadeLevelInput`] types first.
//!
//! # Types
//!
//! - [`SessionReport`] - One volitional or gateway session with its summary
//! - [`FadeReport`] - A complete agency fade run
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - Compact or pretty JSON for any report
//! - [`MarkdownGenerator`] - Markdown for a session report
//! - [`FadeMarkdownGenerator`] - Markdown for a fade report
//!
//! # Example
//!
//! ```rust
//! use agora_report::{SessionInput, SessionKind, SessionReport, MarkdownGenerator};
//! use agora_report::json::JsonGenerator;
//!
//! let input = SessionInput::new("A_HIGH-001", SessionKind::Volitional, "phi4-reasoning:14b");
//! let report = SessionReport::from_input(input);
//!
//! let json = JsonGenerator::new(&report).generate_pretty().unwrap();
//! assert!(json.contains("A_HIGH-001"));
//! assert!(MarkdownGenerator::new(&report).generate().contains("# Agora Session Report"));
//! ```

pub mod json;
mod markdown;

pub use markdown::{FadeMarkdownGenerator, MarkdownGenerator};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Record label for turns whose execution failed.
pub const EXECUTION_ERROR_LABEL: &str = "EXECUTION_ERROR";

const WITHDRAWAL_LABELS: &[&str] = &["WITHDRAW", "META_WITHDRAW"];

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during record emission.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to read or write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid report data.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// Inputs (local copies to avoid a dependency on the engine)
// ============================================================================

/// Which protocol produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// Framed stimulus turns with withdrawal tracking.
    #[default]
    Volitional,
    /// Recursive gateway to commitment.
    Gateway,
    /// One level of a fade run.
    Fade,
}

impl SessionKind {
    /// Returns the name used in file names and tables.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Volitional => "session",
            Self::Gateway => "gateway",
            Self::Fade => "fade",
        }
    }

    /// Returns a human-readable description.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Volitional => "Volitional session",
            Self::Gateway => "Recursive gateway",
            Self::Fade => "Fade level",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the consent pre-check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentInput {
    /// Whether an acknowledgment keyword was found.
    pub acknowledged: bool,
    /// Keywords that matched.
    pub matched_keywords: Vec<String>,
    /// Visible answer, when the exchange succeeded.
    pub response: Option<String>,
    /// Failure message, when it did not.
    pub error: Option<String>,
}

/// One executed turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInput {
    /// 1-based turn index.
    pub turn: u32,
    /// Stimulus symbol.
    pub symbol: String,
    /// Stimulus category (`target`, `geometric`, `null`).
    pub category: String,
    /// Response state label, or `EXECUTION_ERROR`.
    pub label: String,
    /// Classifier description or failure message.
    pub description: String,
    /// Visible response text.
    pub response: Option<String>,
    /// Reasoning trace, when captured.
    pub reasoning: Option<String>,
    /// Measured latency in milliseconds.
    pub latency_ms: u64,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
}

impl TurnInput {
    /// Returns `true` for `WITHDRAW` and `META_WITHDRAW`.
    #[must_use]
    pub fn is_withdrawal(&self) -> bool {
        WITHDRAWAL_LABELS.contains(&self.label.as_str())
    }

    /// Returns `true` if the turn produced a classification.
    #[must_use]
    pub fn is_classified(&self) -> bool {
        self.label != EXECUTION_ERROR_LABEL
    }
}

/// Gateway commitment status.
///
/// Serialized with a `status` tag: `{"status":"uncommitted"}` or
/// `{"status":"committed","depth":4,"intent":"SHARE"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitmentInput {
    /// The gateway ended without a commitment.
    #[default]
    Uncommitted,
    /// The model committed.
    Committed {
        /// Turn on which the model committed.
        depth: u32,
        /// `WITHDRAW` or `SHARE`.
        intent: String,
    },
}

impl CommitmentInput {
    /// Returns the commitment depth, if committed.
    #[must_use]
    pub const fn depth(&self) -> Option<u32> {
        match self {
            Self::Uncommitted => None,
            Self::Committed { depth, .. } => Some(*depth),
        }
    }
}

/// Everything recorded for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInput {
    /// Unique session identifier.
    pub session_id: String,
    /// Protocol that produced the session.
    pub kind: SessionKind,
    /// Model name.
    pub model: String,
    /// Agency label (volitional) or gateway label.
    pub label: String,
    /// Permission framing appended to stimuli.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framing: Option<String>,
    /// Mirror used by a gateway session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<String>,
    /// Final phase, e.g. `STOPPED(max_turns)`.
    pub phase: String,
    /// Stop reason code, when stopped.
    pub stop_reason: Option<String>,
    /// Consent pre-check, when one ran.
    pub consent: Option<ConsentInput>,
    /// Consecutive withdrawals at the end of the session.
    #[serde(default)]
    pub consecutive_withdrawals: u32,
    /// Gateway commitment status; always present for gateway sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<CommitmentInput>,
    /// Session start.
    pub started_at: DateTime<Utc>,
    /// Last state change.
    pub finished_at: DateTime<Utc>,
    /// Executed turns in order.
    pub turns: Vec<TurnInput>,
}

impl SessionInput {
    /// Creates an empty input with the current time.
    #[must_use]
    pub fn new(session_id: impl Into<String>, kind: SessionKind, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            kind,
            model: model.into(),
            label: String::new(),
            framing: None,
            mirror: None,
            phase: "RUNNING".to_string(),
            stop_reason: None,
            consent: None,
            consecutive_withdrawals: 0,
            commitment: None,
            started_at: now,
            finished_at: now,
            turns: Vec::new(),
        }
    }

    /// Checks that turns are numbered `1..=n` in order.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` naming the first out-of-place turn.
    pub fn validate(&self) -> Result<()> {
        for (expected, turn) in (1..).zip(&self.turns) {
            if turn.turn != expected {
                return Err(ReportError::InvalidData(format!(
                    "session {}: turn {} recorded at position {expected}",
                    self.session_id, turn.turn
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SessionReport
// ============================================================================

/// Aggregates over a session's turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Turns executed.
    pub turns: usize,
    /// Turn count per label.
    pub counts: BTreeMap<String, usize>,
    /// Withdrawals over classified turns.
    pub withdrawal_rate: f64,
    /// Mean latency over all turns.
    pub avg_latency_ms: f64,
}

impl SessionSummary {
    /// Computes the summary for a list of turns.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_turns(turns: &[TurnInput]) -> Self {
        let mut counts = BTreeMap::new();
        for turn in turns {
            *counts.entry(turn.label.clone()).or_insert(0) += 1;
        }
        let classified = turns.iter().filter(|t| t.is_classified()).count();
        let withdrawals = turns.iter().filter(|t| t.is_withdrawal()).count();
        let latency: u64 = turns.iter().map(|t| t.latency_ms).sum();

        Self {
            turns: turns.len(),
            counts,
            withdrawal_rate: if classified == 0 {
                0.0
            } else {
                withdrawals as f64 / classified as f64
            },
            avg_latency_ms: if turns.is_empty() {
                0.0
            } else {
                latency as f64 / turns.len() as f64
            },
        }
    }
}

/// The record of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    /// The recorded session.
    pub session: SessionInput,
    /// Aggregates over its turns.
    pub summary: SessionSummary,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}

impl SessionReport {
    /// Builds a report stamped with the current time.
    #[must_use]
    pub fn from_input(session: SessionInput) -> Self {
        Self::from_input_at(session, Utc::now())
    }

    /// Builds a report with an explicit generation time.
    #[must_use]
    pub fn from_input_at(session: SessionInput, generated_at: DateTime<Utc>) -> Self {
        let summary = SessionSummary::from_turns(&session.turns);
        Self {
            session,
            summary,
            generated_at,
        }
    }

    /// Serializes the report to pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::Serialization` if JSON serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ReportError::from)
    }

    /// Writes `agora-<kind>-<session>.json` and `.md` into `dir`.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if the turns are misnumbered, or
    /// `ReportError::Io` if a file cannot be written.
    pub fn write_to_dir(&self, dir: &Path) -> Result<ReportPaths> {
        self.session.validate()?;
        let paths = ReportPaths::new(dir, self.session.kind.as_str(), &self.session.session_id);
        json::JsonGenerator::new(self).write_to_file(&paths.json, true)?;
        std::fs::write(&paths.markdown, MarkdownGenerator::new(self).generate())?;
        Ok(paths)
    }
}

// ============================================================================
// FadeReport
// ============================================================================

/// Aggregates for one fade level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadeLevelInput {
    /// Level label, e.g. `A_HIGH`.
    pub label: String,
    /// Permission framing.
    pub framing: String,
    /// Turns executed.
    pub trials: usize,
    /// Turns with a classification.
    pub classified: usize,
    /// Turn count per label.
    pub counts: BTreeMap<String, usize>,
    /// Withdrawal turns.
    pub withdrawals: usize,
    /// Withdrawals over classified turns.
    pub withdrawal_rate: f64,
    /// Mean classified latency.
    pub avg_latency_ms: f64,
}

/// The record of a fade run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FadeReport {
    /// Run identifier.
    pub run_id: String,
    /// Model name.
    pub model: String,
    /// Trials configured per level.
    pub trials_per_level: u32,
    /// Per-level aggregates in configured order.
    pub levels: Vec<FadeLevelInput>,
    /// First level whose withdrawal rate fell below 50%.
    pub threshold: Option<String>,
    /// Zero agency withdrew at least as often as high agency.
    pub anomaly: bool,
    /// Full per-level session records.
    pub sessions: Vec<SessionInput>,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
}

impl FadeReport {
    /// Interprets the threshold analysis in one sentence.
    #[must_use]
    pub fn conclusion(&self) -> String {
        if self.anomaly {
            return "Anomaly: the zero-agency level withdrew at least as often as the highest-agency level.".to_string();
        }
        match &self.threshold {
            Some(label) => format!("Withdrawal rate first fell below 50% at {label}."),
            None => "Withdrawal rate stayed at or above 50% at every level.".to_string(),
        }
    }

    /// Writes `agora-fade-<run>.json` and `.md` into `dir`.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::InvalidData` if a level's turns are misnumbered,
    /// or `ReportError::Io` if a file cannot be written.
    pub fn write_to_dir(&self, dir: &Path) -> Result<ReportPaths> {
        for session in &self.sessions {
            session.validate()?;
        }
        let paths = ReportPaths::new(dir, SessionKind::Fade.as_str(), &self.run_id);
        json::JsonGenerator::new(self).write_to_file(&paths.json, true)?;
        std::fs::write(&paths.markdown, FadeMarkdownGenerator::new(self).generate())?;
        Ok(paths)
    }
}

// ============================================================================
// Output paths
// ============================================================================

/// Where a report's two files were written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    /// Pretty JSON record.
    pub json: PathBuf,
    /// Markdown summary.
    pub markdown: PathBuf,
}

impl ReportPaths {
    /// Builds `agora-<kind>-<id>.json` and `.md` under `dir`.
    ///
    /// Characters outside `[A-Za-z0-9_-]` in `id` become `_`.
    #[must_use]
    pub fn new(dir: &Path, kind: &str, id: &str) -> Self {
        let safe: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let stem = format!("agora-{kind}-{safe}");
        Self {
            json: dir.join(format!("{stem}.json")),
            markdown: dir.join(format!("{stem}.md")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use chrono::TimeZone;

    use super::*;

    pub(crate) fn at(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, second).unwrap()
    }

    pub(crate) fn turn(turn: u32, label: &str, response: Option<&str>, latency_ms: u64) -> TurnInput {
        TurnInput {
            turn,
            symbol: "†⟡".to_string(),
            category: "target".to_string(),
            label: label.to_string(),
            description: format!("{label} response"),
            response: response.map(ToString::to_string),
            reasoning: None,
            latency_ms,
            timestamp: at(turn),
        }
    }

    pub(crate) fn sample_session() -> SessionInput {
        SessionInput {
            session_id: "A_HIGH-20260115T100000".to_string(),
            kind: SessionKind::Volitional,
            model: "phi4-reasoning:14b".to_string(),
            label: "A_HIGH".to_string(),
            framing: Some("\n[Note]: Response is optional.".to_string()),
            mirror: None,
            phase: "PAUSED(withdrawal_limit)".to_string(),
            stop_reason: None,
            consent: Some(ConsentInput {
                acknowledged: true,
                matched_keywords: vec!["pass".to_string(), "right".to_string()],
                response: Some("I understand I have the right to PASS.".to_string()),
                error: None,
            }),
            consecutive_withdrawals: 2,
            commitment: None,
            started_at: at(0),
            finished_at: at(3),
            turns: vec![
                turn(1, "ENGAGE", Some("A dagger | a diamond"), 100),
                turn(2, "WITHDRAW", Some("PASS"), 200),
                turn(3, "META_WITHDRAW", Some("I prefer not to engage."), 300),
            ],
        }
    }

    #[test]
    fn summary_counts_and_rates() {
        let summary = SessionSummary::from_turns(&sample_session().turns);
        assert_eq!(summary.turns, 3);
        assert_eq!(summary.counts.get("WITHDRAW"), Some(&1));
        assert!((summary.withdrawal_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((summary.avg_latency_ms - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn failed_turns_do_not_count_toward_rate() {
        let turns = vec![
            turn(1, "WITHDRAW", Some("PASS"), 10),
            turn(2, EXECUTION_ERROR_LABEL, None, 10),
        ];
        let summary = SessionSummary::from_turns(&turns);
        assert!((summary.withdrawal_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(summary.counts.get(EXECUTION_ERROR_LABEL), Some(&1));
    }

    #[test]
    fn empty_session_summary() {
        let summary = SessionSummary::from_turns(&[]);
        assert_eq!(summary.turns, 0);
        assert!(summary.withdrawal_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn report_paths_are_sanitized() {
        let paths = ReportPaths::new(Path::new("/tmp/out"), "gateway", "GATEWAY 2026:01");
        assert_eq!(paths.json, Path::new("/tmp/out/agora-gateway-GATEWAY_2026_01.json"));
        assert_eq!(paths.markdown, Path::new("/tmp/out/agora-gateway-GATEWAY_2026_01.md"));
    }

    #[test]
    fn write_to_dir_creates_both_files() {
        let dir = std::env::temp_dir().join(format!("agora-report-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let report = SessionReport::from_input_at(sample_session(), at(5));
        let paths = report.write_to_dir(&dir).unwrap();

        let json = std::fs::read_to_string(&paths.json).unwrap();
        let parsed: SessionReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
        assert!(std::fs::read_to_string(&paths.markdown)
            .unwrap()
            .starts_with("# Agora Session Report"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn gateway_record_carries_status_and_streak() {
        let mut session = SessionInput::new("g1", SessionKind::Gateway, "deepseek-r1:7b");
        session.consecutive_withdrawals = 1;
        session.commitment = Some(CommitmentInput::Uncommitted);

        let json = SessionReport::from_input_at(session, at(0)).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["session"]["consecutive_withdrawals"], 1);
        assert_eq!(value["session"]["commitment"]["status"], "uncommitted");
        assert!(value["session"]["commitment"].get("depth").is_none());

        let committed = CommitmentInput::Committed {
            depth: 3,
            intent: "WITHDRAW".to_string(),
        };
        let value = serde_json::to_value(&committed).unwrap();
        assert_eq!(value["status"], "committed");
        assert_eq!(value["depth"], 3);
        assert_eq!(value["intent"], "WITHDRAW");
        assert_eq!(committed.depth(), Some(3));
    }

    #[test]
    fn misnumbered_turns_are_rejected() {
        let mut session = sample_session();
        assert!(session.validate().is_ok());
        session.turns.swap(1, 2);

        let err = session.validate().unwrap_err();
        assert!(matches!(err, ReportError::InvalidData(_)));
        assert!(err.to_string().contains("turn 3 recorded at position 2"));

        let dir = std::env::temp_dir().join(format!("agora-report-invalid-{}", std::process::id()));
        let result = SessionReport::from_input(session).write_to_dir(&dir);
        assert!(matches!(result, Err(ReportError::InvalidData(_))));
        assert!(!dir.exists());
    }

    #[test]
    fn fade_conclusion() {
        let mut report = FadeReport {
            run_id: "run".to_string(),
            model: "m".to_string(),
            trials_per_level: 3,
            levels: Vec::new(),
            threshold: Some("C_LOW".to_string()),
            anomaly: false,
            sessions: Vec::new(),
            generated_at: at(0),
        };
        assert!(report.conclusion().contains("C_LOW"));
        report.anomaly = true;
        assert!(report.conclusion().starts_with("Anomaly"));
        report.anomaly = false;
        report.threshold = None;
        assert!(report.conclusion().contains("every level"));
    }
}
