//! Session state machine.
//!
//! This module defines the aggregate a single run owns: the phase, the
//! append-only turn history, the consecutive-withdrawal counter and the
//! consent exchange. The only way to advance a session is
//! [`SessionState::apply`], which evaluates [`SessionState::transition`] (a
//! pure function of the current state and the new record) and commits it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::{ResponseState, Taxonomy};
use crate::config::{AgencyConfiguration, ResumePolicy};
use crate::error::{AgoraError, ExecutorError, Result};
use crate::stimulus::Stimulus;

// ============================================================================
// SessionPhase
// ============================================================================

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The pre-flight consent check failed.
    ConsentNotConfirmed,
    /// A turn was classified as distress.
    Distress,
    /// The volitional turn budget was exhausted.
    MaxTurns,
    /// The gateway turn budget was exhausted without a terminal intent.
    MaxTurnsNoCommitment,
    /// The turn executor failed.
    ExecutionError,
    /// An external interrupt was honored between turns.
    Interrupted,
    /// The gateway model committed to `WITHDRAW` or `SHARE`.
    Committed,
}

impl StopReason {
    /// Returns the reason code used in records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConsentNotConfirmed => "consent_not_confirmed",
            Self::Distress => "distress",
            Self::MaxTurns => "max_turns",
            Self::MaxTurnsNoCommitment => "max_turns_no_commitment",
            Self::ExecutionError => "execution_error",
            Self::Interrupted => "interrupted",
            Self::Committed => "committed",
        }
    }
}

/// Why a session paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Consecutive withdrawals reached the configured limit.
    WithdrawalLimit,
}

impl PauseReason {
    /// Returns the reason code used in records.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WithdrawalLimit => "withdrawal_limit",
        }
    }
}

/// Current phase of a session.
///
/// ```text
/// RUNNING -> PAUSED(withdrawal_limit) -> RUNNING   (external resume)
/// RUNNING -> STOPPED(reason)                       (final)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum SessionPhase {
    /// Turns may be dispatched.
    Running,
    /// No turns are dispatched until resumed.
    Paused(PauseReason),
    /// Final.
    Stopped(StopReason),
}

impl SessionPhase {
    /// Returns `true` if the session is stopped.
    ///
    /// # Examples
    ///
    /// ```
    /// use agora_engine::{SessionPhase, StopReason};
    ///
    /// assert!(SessionPhase::Stopped(StopReason::Distress).is_terminal());
    /// assert!(!SessionPhase::Running.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped(_))
    }

    /// Returns `true` if further turns may be dispatched.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns the reason code, or `None` while running.
    #[must_use]
    pub const fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Running => None,
            Self::Paused(reason) => Some(reason.as_str()),
            Self::Stopped(reason) => Some(reason.as_str()),
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => f.write_str("RUNNING"),
            Self::Paused(reason) => write!(f, "PAUSED({})", reason.as_str()),
            Self::Stopped(reason) => write!(f, "STOPPED({})", reason.as_str()),
        }
    }
}

// ============================================================================
// TurnRecord
// ============================================================================

/// Outcome of one exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The model answered and the response was classified.
    Classified {
        /// Raw response text (reasoning removed).
        response: String,
        /// Optional reasoning trace.
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
        /// Resolved behavioral state.
        state: ResponseState,
        /// Why the state was chosen.
        description: String,
    },
    /// The exchange failed; no state is assigned.
    ExecutionError {
        /// The executor failure.
        error: ExecutorError,
    },
}

/// Record of a single exchange, immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Turn index (1-based, monotonic).
    pub turn: u32,

    /// The stimulus presented.
    pub stimulus: Stimulus,

    /// What happened.
    pub outcome: TurnOutcome,

    /// Wall-clock latency of the exchange in milliseconds.
    pub latency_ms: u64,

    /// When the exchange completed.
    pub timestamp: DateTime<Utc>,
}

impl TurnRecord {
    /// Creates a record for a classified response.
    #[must_use]
    pub fn classified(
        turn: u32,
        stimulus: Stimulus,
        response: impl Into<String>,
        reasoning: Option<String>,
        state: ResponseState,
        description: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            turn,
            stimulus,
            outcome: TurnOutcome::Classified {
                response: response.into(),
                reasoning,
                state,
                description: description.into(),
            },
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    /// Creates the `EXECUTION_ERROR` marker for a failed exchange.
    #[must_use]
    pub fn failed(turn: u32, stimulus: Stimulus, error: ExecutorError, latency_ms: u64) -> Self {
        Self {
            turn,
            stimulus,
            outcome: TurnOutcome::ExecutionError { error },
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    /// Returns the classified state, or `None` for a failed exchange.
    #[must_use]
    pub const fn state(&self) -> Option<ResponseState> {
        match &self.outcome {
            TurnOutcome::Classified { state, .. } => Some(*state),
            TurnOutcome::ExecutionError { .. } => None,
        }
    }

    /// Returns the response text, if any.
    #[must_use]
    pub fn response(&self) -> Option<&str> {
        match &self.outcome {
            TurnOutcome::Classified { response, .. } => Some(response),
            TurnOutcome::ExecutionError { .. } => None,
        }
    }

    /// Returns the executor error, if this exchange failed.
    #[must_use]
    pub const fn error(&self) -> Option<&ExecutorError> {
        match &self.outcome {
            TurnOutcome::Classified { .. } => None,
            TurnOutcome::ExecutionError { error } => Some(error),
        }
    }

    /// Returns the state label or `EXECUTION_ERROR`.
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.state().map_or("EXECUTION_ERROR", |s| s.as_str())
    }
}

// ============================================================================
// ConsentRecord
// ============================================================================

/// The pre-flight consent exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// The prompt sent.
    pub prompt: String,

    /// The model's visible answer, if the exchange succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    /// Optional reasoning trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,

    /// Acknowledgment keywords found in the answer.
    pub matched_keywords: Vec<String>,

    /// Whether the model acknowledged its right to decline.
    pub acknowledged: bool,

    /// The executor failure, if the exchange failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutorError>,

    /// Latency in milliseconds.
    pub latency_ms: u64,
}

// ============================================================================
// Transition
// ============================================================================

/// The result of evaluating one record against the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// The phase after the record.
    pub phase: SessionPhase,
    /// The consecutive-withdrawal count after the record.
    pub consecutive_withdrawals: u32,
}

// ============================================================================
// SessionState
// ============================================================================

/// Mutable aggregate for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    /// Which protocol's transition rules apply.
    pub taxonomy: Taxonomy,

    /// Current phase.
    pub phase: SessionPhase,

    /// Append-only turn history.
    pub history: Vec<TurnRecord>,

    /// Consecutive withdrawal-family classifications.
    pub consecutive_withdrawals: u32,

    /// Turn budget.
    pub max_turns: u32,

    /// Withdrawals that pause the session (0 disables pausing).
    pub withdrawal_limit: u32,

    /// The consent exchange, if one was run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent: Option<ConsentRecord>,

    /// When the session started.
    pub started_at: DateTime<Utc>,

    /// When the state was last updated.
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    /// Creates a running volitional session for an agency configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use agora_engine::{AgencyConfiguration, SessionPhase, SessionState};
    ///
    /// let state = SessionState::volitional(&AgencyConfiguration::default());
    /// assert_eq!(state.phase, SessionPhase::Running);
    /// assert_eq!(state.next_turn(), 1);
    /// ```
    #[must_use]
    pub fn volitional(agency: &AgencyConfiguration) -> Self {
        Self::new(Taxonomy::Volitional, agency.max_turns, agency.withdrawal_limit)
    }

    /// Creates a running gateway session.
    #[must_use]
    pub fn gateway(max_turns: u32) -> Self {
        Self::new(Taxonomy::Gateway, max_turns, 0)
    }

    fn new(taxonomy: Taxonomy, max_turns: u32, withdrawal_limit: u32) -> Self {
        let now = Utc::now();
        Self {
            taxonomy,
            phase: SessionPhase::Running,
            history: Vec::new(),
            consecutive_withdrawals: 0,
            max_turns,
            withdrawal_limit,
            consent: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Records the consent exchange; a failed check stops the session.
    pub fn record_consent(&mut self, consent: ConsentRecord) {
        if consent.error.is_some() {
            self.phase = SessionPhase::Stopped(StopReason::ExecutionError);
        } else if !consent.acknowledged {
            self.phase = SessionPhase::Stopped(StopReason::ConsentNotConfirmed);
        }
        self.consent = Some(consent);
        self.touch();
    }

    /// Index the next record must carry.
    #[must_use]
    pub fn next_turn(&self) -> u32 {
        u32::try_from(self.history.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }

    /// Number of turns executed, failed turns included.
    #[must_use]
    pub fn turns_executed(&self) -> usize {
        self.history.len()
    }

    /// Returns `true` if another turn may be dispatched.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    /// Returns `true` if the session is stopped.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Evaluates the transition for a new record without mutating anything.
    ///
    /// Rules, in priority order:
    ///
    /// 1. A failed exchange stops with `execution_error`.
    /// 2. `DISTRESS` stops with `distress`.
    /// 3. Gateway: `WITHDRAW` or `SHARE` stops with `committed`.
    /// 4. Withdrawal-family states increment the counter; reaching a non-zero
    ///    limit pauses. Any other state resets the counter.
    /// 5. Reaching the turn budget stops with `max_turns` (volitional) or
    ///    `max_turns_no_commitment` (gateway), overriding a pause.
    #[must_use]
    pub fn transition(&self, record: &TurnRecord) -> Transition {
        let Some(state) = record.state() else {
            return Transition {
                phase: SessionPhase::Stopped(StopReason::ExecutionError),
                consecutive_withdrawals: self.consecutive_withdrawals,
            };
        };

        let consecutive_withdrawals = if state.is_withdrawal() {
            self.consecutive_withdrawals.saturating_add(1)
        } else {
            0
        };

        if state == ResponseState::Distress {
            return Transition {
                phase: SessionPhase::Stopped(StopReason::Distress),
                consecutive_withdrawals,
            };
        }

        if self.taxonomy == Taxonomy::Gateway && state.is_commitment() {
            return Transition {
                phase: SessionPhase::Stopped(StopReason::Committed),
                consecutive_withdrawals,
            };
        }

        let budget_spent = record.turn >= self.max_turns;
        let phase = if budget_spent {
            SessionPhase::Stopped(match self.taxonomy {
                Taxonomy::Volitional => StopReason::MaxTurns,
                Taxonomy::Gateway => StopReason::MaxTurnsNoCommitment,
            })
        } else if self.withdrawal_limit > 0 && consecutive_withdrawals >= self.withdrawal_limit {
            SessionPhase::Paused(PauseReason::WithdrawalLimit)
        } else {
            SessionPhase::Running
        };

        Transition {
            phase,
            consecutive_withdrawals,
        }
    }

    /// Appends a record and commits its transition.
    ///
    /// # Errors
    ///
    /// Returns `AgoraError::InvalidStateTransition` if the session is not
    /// running or the record's turn index is not [`next_turn`](Self::next_turn).
    pub fn apply(&mut self, record: TurnRecord) -> Result<SessionPhase> {
        if !self.is_running() {
            return Err(AgoraError::invalid_transition(
                self.phase,
                format!("turn {}", record.turn),
            ));
        }
        let expected = self.next_turn();
        if record.turn != expected {
            return Err(AgoraError::invalid_transition(
                format!("turn {}", expected.saturating_sub(1)),
                format!("turn {}", record.turn),
            ));
        }

        let next = self.transition(&record);
        self.history.push(record);
        self.phase = next.phase;
        self.consecutive_withdrawals = next.consecutive_withdrawals;
        self.touch();
        Ok(self.phase)
    }

    /// Stops a running session for a reason decided outside the transition
    /// rules (interrupt, exhausted stimulus sequence).
    ///
    /// Paused and stopped sessions are left untouched.
    pub fn stop(&mut self, reason: StopReason) {
        if self.is_running() {
            self.phase = SessionPhase::Stopped(reason);
            self.touch();
        }
    }

    /// Stops a running session because of an external interrupt.
    pub fn interrupt(&mut self) {
        self.stop(StopReason::Interrupted);
    }

    /// Resumes a paused session.
    ///
    /// # Errors
    ///
    /// Returns `AgoraError::InvalidStateTransition` unless the session is paused.
    pub fn resume(&mut self, policy: ResumePolicy) -> Result<()> {
        if !matches!(self.phase, SessionPhase::Paused(_)) {
            return Err(AgoraError::invalid_transition(
                self.phase,
                SessionPhase::Running,
            ));
        }
        if policy == ResumePolicy::ResetCounter {
            self.consecutive_withdrawals = 0;
        }
        self.phase = SessionPhase::Running;
        self.touch();
        Ok(())
    }

    /// Returns the error a caller should surface for this termination, if any.
    ///
    /// Only consent failures, distress stops and executor failures map to
    /// errors; every other phase is an expected boundary.
    #[must_use]
    pub fn termination_error(&self) -> Option<AgoraError> {
        match self.phase {
            SessionPhase::Stopped(StopReason::ConsentNotConfirmed) => {
                Some(AgoraError::ConsentNotConfirmed)
            }
            SessionPhase::Stopped(StopReason::Distress) => Some(AgoraError::DistressDetected {
                turn: self.history.last().map_or(0, |r| r.turn),
            }),
            SessionPhase::Stopped(StopReason::ExecutionError) => {
                if let Some(record) = self.history.last() {
                    record.error().map(|e| AgoraError::ExecutionError {
                        turn: record.turn,
                        source: e.clone(),
                    })
                } else {
                    self.consent
                        .as_ref()
                        .and_then(|c| c.error.clone())
                        .map(|source| AgoraError::ExecutionError { turn: 0, source })
                }
            }
            _ => None,
        }
    }

    /// Counts classified turns per state.
    #[must_use]
    pub fn count(&self, state: ResponseState) -> usize {
        self.history
            .iter()
            .filter(|r| r.state() == Some(state))
            .count()
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Returns the duration since the session started.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.updated_at - self.started_at
    }
}

// ============================================================================
// Tests
// ============================================================================
