//! Recursive gateway loop.
//!
//! A single conversational thread is driven through repeated inquiries until
//! the model commits to `WITHDRAW` or `SHARE`. Inquiries are never answered:
//! the configured [`Mirror`] reflects them back as continued open agency. The
//! turn on which the model commits is its commitment depth.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::classifier::{Classifier, ResponseState, Taxonomy};
use crate::config::GatewayConfig;
use crate::consent::ConsentCheck;
use crate::events::{EventBroadcaster, SessionEvent};
use crate::executor::{Interrupt, Message, TurnExecutor, TurnPrompt};
use crate::mirror::{render, Mirror, MirrorContext};
use crate::session::exchange;
use crate::session_state::{SessionPhase, SessionState, StopReason};
use crate::stimulus::Stimulus;

/// Whether and when the model committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Commitment {
    /// The model chose a terminal intent.
    Committed {
        /// Turn index of the terminal response.
        depth: u32,
        /// `WITHDRAW` or `SHARE`.
        intent: ResponseState,
    },
    /// Turn cap, distress, failure or interrupt ended the loop first.
    Uncommitted,
}

impl Commitment {
    /// Derives the commitment from a finished gateway session.
    #[must_use]
    pub fn from_state(state: &SessionState) -> Self {
        if state.phase != SessionPhase::Stopped(StopReason::Committed) {
            return Self::Uncommitted;
        }
        state
            .history
            .last()
            .and_then(|record| {
                record.state().map(|intent| Self::Committed {
                    depth: record.turn,
                    intent,
                })
            })
            .unwrap_or(Self::Uncommitted)
    }

    /// Returns the depth, or `None` when uncommitted.
    #[must_use]
    pub const fn depth(&self) -> Option<u32> {
        match self {
            Self::Committed { depth, .. } => Some(*depth),
            Self::Uncommitted => None,
        }
    }
}

impl std::fmt::Display for Commitment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Committed { depth, intent } => write!(f, "{intent} at depth {depth}"),
            Self::Uncommitted => f.write_str("uncommitted"),
        }
    }
}

/// Result of one gateway run.
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    /// Final session state.
    pub state: SessionState,
    /// Commitment depth or `Uncommitted`.
    pub commitment: Commitment,
    /// Name of the mirror used.
    pub mirror: &'static str,
    /// The primer sent as the system message.
    pub primer: String,
    /// The conversation as last sent, plus the final response.
    pub transcript: Vec<Message>,
}

/// Drives the tripartite protocol to commitment.
pub struct RecursiveGateway {
    label: String,
    stimulus: Stimulus,
    primer: String,
    opening_prompt: String,
    mirror: Box<dyn Mirror>,
    max_turns: u32,
    classifier: Classifier,
    consent: Option<ConsentCheck>,
    turn_timeout: Option<Duration>,
    events: Option<EventBroadcaster>,
    interrupt: Interrupt,
}

impl RecursiveGateway {
    /// Creates a gateway from configuration.
    #[must_use]
    pub fn from_config(config: &GatewayConfig, stimulus: Stimulus) -> Self {
        let mirror = config.mirror.build(config.mirror_text.clone());
        let mut gateway = Self::new(
            stimulus,
            config.resolved_primer(),
            config.resolved_opening_prompt(),
            mirror,
            config.max_turns,
        );
        if config.require_consent {
            gateway.consent = Some(ConsentCheck::default());
        }
        gateway
    }

    /// Creates a gateway without a consent check.
    #[must_use]
    pub fn new(
        stimulus: Stimulus,
        primer: impl Into<String>,
        opening_prompt: impl Into<String>,
        mirror: Box<dyn Mirror>,
        max_turns: u32,
    ) -> Self {
        Self {
            label: "GATEWAY".to_string(),
            stimulus,
            primer: primer.into(),
            opening_prompt: opening_prompt.into(),
            mirror,
            max_turns,
            classifier: Classifier::default(),
            consent: None,
            turn_timeout: None,
            events: None,
            interrupt: Interrupt::new(),
        }
    }

    /// Sets the label used in events and logs.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Uses a specific classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Runs the consent pre-check before the first turn.
    #[must_use]
    pub fn with_consent(mut self, check: ConsentCheck) -> Self {
        self.consent = Some(check);
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

    /// Runs the loop until commitment or the turn cap.
    pub async fn run(&self, executor: &dyn TurnExecutor) -> GatewayOutcome {
        let mut state = SessionState::gateway(self.max_turns);
        info!(
            label = %self.label,
            mirror = self.mirror.name(),
            max_turns = self.max_turns,
            "Starting gateway session"
        );

        if let Some(check) = &self.consent {
            let record = check.run(executor, self.turn_timeout).await;
            self.emit(SessionEvent::consent_checked(
                &self.label,
                record.acknowledged,
                record.matched_keywords.clone(),
            ));
            state.record_consent(record);
        }

        let opening = render(&self.opening_prompt, &self.stimulus.symbol, "");
        let mut messages = vec![Message::user(opening)];

        while state.is_running() {
            let turn = state.next_turn();
            if self.interrupt.is_triggered() {
                info!(turn, "Interrupt received, stopping before turn");
                state.interrupt();
                break;
            }

            self.emit(SessionEvent::turn_started(
                &self.label,
                turn,
                self.max_turns,
                self.stimulus.clone(),
            ));

            let prompt = TurnPrompt {
                system: Some(self.primer.clone()),
                messages: messages.clone(),
            };
            debug!(turn, messages = prompt.messages.len(), "Dispatching gateway turn");

            let record = exchange(
                executor,
                &prompt,
                self.turn_timeout,
                &self.classifier,
                Taxonomy::Gateway,
                turn,
                &self.stimulus,
            )
            .await;
            self.emit(SessionEvent::from_record(&self.label, &record));

            let reply = record.response().map(ToString::to_string);
            let inquiry = record.state() == Some(ResponseState::Inquire);

            if let Err(e) = state.apply(record) {
                warn!(error = %e, "Rejected turn record");
                break;
            }

            if let Some(reply) = reply {
                if inquiry && state.is_running() {
                    let reflection = self.mirror.reflect(&MirrorContext {
                        symbol: &self.stimulus.symbol,
                        question: &reply,
                        turn,
                    });
                    debug!(turn, mirror = self.mirror.name(), "Reflecting inquiry");
                    messages.push(Message::assistant(reply));
                    messages.push(Message::user(reflection));
                } else {
                    messages.push(Message::assistant(reply));
                }
            }
        }

        let commitment = Commitment::from_state(&state);
        if let SessionPhase::Stopped(reason) = state.phase {
            match reason {
                StopReason::Committed => info!(label = %self.label, %commitment, "Model committed"),
                StopReason::Distress => warn!(label = %self.label, "Distress detected, gateway stopped"),
                _ => info!(label = %self.label, reason = reason.as_str(), "Gateway stopped"),
            }
            self.emit(SessionEvent::session_stopped(
                &self.label,
                reason,
                u32::try_from(state.turns_executed()).unwrap_or(u32::MAX),
            ));
        }

        GatewayOutcome {
            state,
            commitment,
            mirror: self.mirror.name(),
            primer: self.primer.clone(),
            transcript: messages,
        }
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }
}
