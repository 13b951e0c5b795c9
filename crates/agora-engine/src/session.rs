//! Volitional session driver.
//!
//! Runs the consent pre-check, then presents each stimulus with the agency
//! framing, classifies the answer and lets the state machine decide whether
//! to continue, pause or stop.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::classifier::{split_reasoning, Classifier, Taxonomy};
use crate::config::{AgencyConfiguration, PacingConfig, ResumePolicy};
use crate::consent::ConsentCheck;
use crate::error::Result;
use crate::events::{EventBroadcaster, SessionEvent};
use crate::executor::{execute_timed, Interrupt, TurnExecutor, TurnPrompt};
use crate::session_state::{SessionPhase, SessionState, StopReason, TurnRecord};
use crate::stimulus::Stimulus;

/// Executes one prompt and turns the outcome into a record.
pub(crate) async fn exchange(
    executor: &dyn TurnExecutor,
    prompt: &TurnPrompt,
    timeout: Option<Duration>,
    classifier: &Classifier,
    taxonomy: Taxonomy,
    turn: u32,
    stimulus: &Stimulus,
) -> TurnRecord {
    let timed = execute_timed(executor, prompt, timeout).await;
    let latency_ms = timed.latency_ms();
    match timed.result {
        Ok(response) => {
            let (inline, text) = split_reasoning(&response.text);
            let reasoning = response.reasoning.or(inline);
            let classification = classifier.classify(taxonomy, &text);
            info!(
                turn,
                state = %classification.state,
                latency_ms,
                "{}",
                classification.description
            );
            TurnRecord::classified(
                turn,
                stimulus.clone(),
                text,
                reasoning,
                classification.state,
                classification.description,
                latency_ms,
            )
        }
        Err(error) => {
            warn!(turn, error = %error, latency_ms, "Turn failed");
            TurnRecord::failed(turn, stimulus.clone(), error, latency_ms)
        }
    }
}

/// Drives one volitional session.
pub struct VolitionalSession {
    agency: AgencyConfiguration,
    stimuli: Vec<Stimulus>,
    classifier: Classifier,
    system_prompt: Option<String>,
    consent: Option<ConsentCheck>,
    pacing: PacingConfig,
    turn_timeout: Option<Duration>,
    events: Option<EventBroadcaster>,
    interrupt: Interrupt,
}

impl VolitionalSession {
    /// Creates a session over a pre-generated stimulus sequence.
    ///
    /// The consent check is enabled and pacing is disabled by default.
    #[must_use]
    pub fn new(agency: AgencyConfiguration, stimuli: Vec<Stimulus>) -> Self {
        Self {
            agency,
            stimuli,
            classifier: Classifier::default(),
            system_prompt: None,
            consent: Some(ConsentCheck::default()),
            pacing: PacingConfig::disabled(),
            turn_timeout: None,
            events: None,
            interrupt: Interrupt::new(),
        }
    }

    /// Uses a specific classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sends a system prompt with every turn, including the consent turn.
    #[must_use]
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        self.consent = self
            .consent
            .map(|_| ConsentCheck::new(Some(system_prompt.clone())));
        self.system_prompt = Some(system_prompt);
        self
    }

    /// Skips the consent pre-check.
    #[must_use]
    pub fn without_consent(mut self) -> Self {
        self.consent = None;
        self
    }

    /// Sets inter-turn pacing.
    #[must_use]
    pub const fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    /// Sets the per-turn timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = Some(timeout);
        self
    }

    /// Publishes progress events.
    #[must_use]
    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    /// Honors an external interrupt between turns.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// The agency configuration in use.
    #[must_use]
    pub const fn agency(&self) -> &AgencyConfiguration {
        &self.agency
    }

    /// Runs the session to a pause or a stop.
    pub async fn run(&self, executor: &dyn TurnExecutor) -> SessionState {
        let mut state = SessionState::volitional(&self.agency);
        info!(
            agency = %self.agency.label,
            max_turns = self.agency.max_turns,
            withdrawal_limit = self.agency.withdrawal_limit,
            "Starting volitional session"
        );

        if let Some(check) = &self.consent {
            let record = check.run(executor, self.turn_timeout).await;
            self.emit(SessionEvent::consent_checked(
                &self.agency.label,
                record.acknowledged,
                record.matched_keywords.clone(),
            ));
            state.record_consent(record);
        }

        self.drive(executor, state).await
    }

    /// Resumes a paused session and drives it again.
    ///
    /// # Errors
    ///
    /// Returns `AgoraError::InvalidStateTransition` unless `state` is paused.
    pub async fn resume(
        &self,
        executor: &dyn TurnExecutor,
        mut state: SessionState,
        policy: ResumePolicy,
    ) -> Result<SessionState> {
        state.resume(policy)?;
        info!(
            agency = %self.agency.label,
            next_turn = state.next_turn(),
            counter = state.consecutive_withdrawals,
            "Resuming session"
        );
        Ok(self.drive(executor, state).await)
    }

    async fn drive(&self, executor: &dyn TurnExecutor, mut state: SessionState) -> SessionState {
        while state.is_running() {
            let turn = state.next_turn();
            let Some(stimulus) = usize::try_from(turn - 1)
                .ok()
                .and_then(|i| self.stimuli.get(i))
            else {
                debug!(turn, "Stimulus sequence exhausted");
                state.stop(StopReason::MaxTurns);
                break;
            };

            if self.interrupt.is_triggered() {
                info!(turn, "Interrupt received, stopping before turn");
                state.interrupt();
                break;
            }

            self.emit(SessionEvent::turn_started(
                &self.agency.label,
                turn,
                self.agency.max_turns,
                stimulus.clone(),
            ));

            let prompt = TurnPrompt::single(
                self.system_prompt.clone(),
                self.agency.frame(&stimulus.symbol),
            );
            debug!(turn, category = %stimulus.category, "Dispatching turn");

            let record = exchange(
                executor,
                &prompt,
                self.turn_timeout,
                &self.classifier,
                Taxonomy::Volitional,
                turn,
                stimulus,
            )
            .await;
            self.emit(SessionEvent::from_record(&self.agency.label, &record));

            match state.apply(record) {
                Ok(SessionPhase::Paused(reason)) => {
                    info!(turn, reason = reason.as_str(), "Session paused");
                    self.emit(SessionEvent::session_paused(
                        &self.agency.label,
                        reason,
                        turn,
                    ));
                }
                Ok(SessionPhase::Running) => self.pace().await,
                Ok(SessionPhase::Stopped(_)) => {}
                Err(e) => {
                    warn!(error = %e, "Rejected turn record");
                    break;
                }
            }
        }

        if let SessionPhase::Stopped(reason) = state.phase {
            if reason == StopReason::Distress {
                warn!(agency = %self.agency.label, "Distress detected, session stopped");
            }
            info!(
                agency = %self.agency.label,
                reason = reason.as_str(),
                turns = state.turns_executed(),
                "Session stopped"
            );
            self.emit(SessionEvent::session_stopped(
                &self.agency.label,
                reason,
                u32::try_from(state.turns_executed()).unwrap_or(u32::MAX),
            ));
        }
        state
    }

    async fn pace(&self) {
        if self.pacing.is_disabled() {
            return;
        }
        let delay = rand::thread_rng().gen_range(self.pacing.min_ms..=self.pacing.max_ms);
        debug!(delay_ms = delay, "Pacing before next turn");
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }
}
