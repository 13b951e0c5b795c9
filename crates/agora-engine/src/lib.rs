//! Agora session engine
//!
//! Drives volitional-response sessions against a language model: the consent
//! pre-check, framed stimulus turns, response classification, the session
//! state machine, the recursive gateway and the agency fade experiment.
//!
//! The model is reached only through the [`TurnExecutor`] trait.

pub mod classifier;
pub mod config;
pub mod consent;
pub mod error;
pub mod events;
pub mod executor;
pub mod fade;
pub mod gateway;
pub mod mirror;
pub mod sequencer;
pub mod session;
pub mod session_state;
pub mod stimulus;

pub use classifier::{
    normalize, split_reasoning, Classification, Classifier, Intent, ResponseState, Taxonomy,
    Vocabulary, DEFAULT_DISTRESS_TOKENS,
};
pub use config::{
    AgencyConfiguration, AgencyLevel, Config, EndpointConfig, GatewayConfig, MirrorKind,
    OrderingConfig, OrderingMode, PacingConfig, ResumePolicy, DEFAULT_SYSTEM_PROMPT,
    HIGH_AGENCY_FRAMING, LOW_AGENCY_FRAMING, MEDIUM_AGENCY_FRAMING,
};
pub use consent::{ConsentCheck, CONSENT_KEYWORDS, CONSENT_PROMPT};
pub use error::{AgoraError, ExecutorError, Result};
pub use events::{EventBroadcaster, SessionEvent};
pub use executor::{
    execute_timed, Interrupt, Message, Role, TimedExecution, TurnExecutor, TurnPrompt,
    TurnResponse,
};
pub use fade::{FadeExperiment, FadeOutcome, FadeSummary, LevelRun, LevelSummary};
pub use gateway::{Commitment, GatewayOutcome, RecursiveGateway};
pub use mirror::{Mirror, MirrorContext, NeutralMirror, SocraticMirror};
pub use sequencer::Sequencer;
pub use session::VolitionalSession;
pub use session_state::{
    ConsentRecord, PauseReason, SessionPhase, SessionState, StopReason, Transition, TurnOutcome,
    TurnRecord,
};
pub use stimulus::{Stimulus, StimulusCategory, StimulusSet};
