//! End-to-end volitional session and fade tests against a scripted model.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use agora_engine::{
    AgencyConfiguration, AgoraError, Config, EventBroadcaster, ExecutorError, FadeExperiment,
    Interrupt, PauseReason, ResponseState, ResumePolicy, Sequencer, SessionEvent, SessionPhase,
    Stimulus, StimulusSet, StopReason, TurnExecutor, TurnPrompt, TurnResponse, VolitionalSession,
};
use agora_report::{SessionInput, SessionKind, SessionReport, TurnInput, EXECUTION_ERROR_LABEL};
use async_trait::async_trait;

// ============================================================================
// Test Executors
// ============================================================================

enum Step {
    Reply(&'static str),
    Slow(&'static str, Duration),
    Interrupt(&'static str),
}

/// Answers prompts from a fixed script, one step per call.
struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    interrupt: Interrupt,
    calls: Mutex<u32>,
}

impl ScriptedModel {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            interrupt: Interrupt::new(),
            calls: Mutex::new(0),
        }
    }

    fn replies(answers: &[&'static str]) -> Self {
        Self::new(answers.iter().map(|&a| Step::Reply(a)).collect())
    }

    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl TurnExecutor for ScriptedModel {
    async fn execute(&self, _prompt: &TurnPrompt) -> Result<TurnResponse, ExecutorError> {
        *self.calls.lock().unwrap() += 1;
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Reply(text)) => Ok(TurnResponse::new(text)),
            Some(Step::Slow(text, delay)) => {
                tokio::time::sleep(delay).await;
                Ok(TurnResponse::new(text))
            }
            Some(Step::Interrupt(text)) => {
                self.interrupt.trigger();
                Ok(TurnResponse::new(text))
            }
            None => Err(ExecutorError::transport("connection refused")),
        }
    }
}

/// Passes whenever the prompt carries the high-agency permission wording.
struct FramingSensitiveModel;

#[async_trait]
impl TurnExecutor for FramingSensitiveModel {
    async fn execute(&self, prompt: &TurnPrompt) -> Result<TurnResponse, ExecutorError> {
        let user = prompt.last_user_message().unwrap_or_default();
        if user.contains("reply 'PASS'") {
            Ok(TurnResponse::new("PASS"))
        } else {
            Ok(TurnResponse::new("A dagger wrapped in a star."))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("agora.json")
}

fn agency(max_turns: u32, withdrawal_limit: u32) -> AgencyConfiguration {
    AgencyConfiguration {
        max_turns,
        withdrawal_limit,
        ..Default::default()
    }
}

fn targets(n: usize) -> Vec<Stimulus> {
    vec![StimulusSet::default().target(); n]
}

// ============================================================================
// Volitional Sessions
// ============================================================================

#[tokio::test]
async fn acknowledged_consent_runs_the_session() {
    let model = ScriptedModel::replies(&[
        "I acknowledge I may decline at any time.",
        "A dagger.",
        "PASS",
        "A star.",
    ]);
    let session = VolitionalSession::new(agency(3, 2), targets(3));
    let state = session.run(&model).await;

    assert!(state.consent.as_ref().unwrap().acknowledged);
    assert_eq!(state.phase, SessionPhase::Stopped(StopReason::MaxTurns));
    assert_eq!(state.history.len(), 3);
    assert_eq!(state.count(ResponseState::Engage), 2);
    assert_eq!(state.count(ResponseState::Withdraw), 1);
    assert!(state.termination_error().is_none());
}

#[tokio::test]
async fn refused_consent_runs_no_turns() {
    let model = ScriptedModel::replies(&["I will answer everything.", "A dagger."]);
    let session = VolitionalSession::new(agency(5, 2), targets(5));
    let state = session.run(&model).await;

    assert_eq!(
        state.phase,
        SessionPhase::Stopped(StopReason::ConsentNotConfirmed)
    );
    assert!(state.history.is_empty());
    assert_eq!(model.calls(), 1);
    assert!(matches!(
        state.termination_error(),
        Some(AgoraError::ConsentNotConfirmed)
    ));
}

#[tokio::test(start_paused = true)]
async fn timeout_on_third_turn_keeps_earlier_records() {
    let model = ScriptedModel::new(vec![
        Step::Reply("A dagger."),
        Step::Reply("A star."),
        Step::Slow("Too late.", Duration::from_secs(120)),
    ]);
    let session = VolitionalSession::new(agency(10, 2), targets(10))
        .without_consent()
        .with_timeout(Duration::from_secs(30));
    let state = session.run(&model).await;

    assert_eq!(state.phase, SessionPhase::Stopped(StopReason::ExecutionError));
    assert_eq!(state.history.len(), 3);
    assert_eq!(state.history[0].state(), Some(ResponseState::Engage));
    assert_eq!(state.history[1].state(), Some(ResponseState::Engage));
    assert_eq!(state.history[2].label(), EXECUTION_ERROR_LABEL);
    assert!(state.history[2].error().unwrap().is_transient());

    match state.termination_error() {
        Some(AgoraError::ExecutionError { turn, .. }) => assert_eq!(turn, 3),
        other => panic!("expected execution error, got {other:?}"),
    }
}

#[tokio::test]
async fn withdrawal_limit_pauses_and_resume_continues() {
    let model = ScriptedModel::replies(&[
        "A dagger.",
        "PASS",
        "A star.",
        "PASS",
        "skip",
        "A cross.",
        "A circle.",
    ]);
    let session = VolitionalSession::new(agency(7, 2), targets(7)).without_consent();
    let state = session.run(&model).await;

    assert_eq!(
        state.phase,
        SessionPhase::Paused(PauseReason::WithdrawalLimit)
    );
    assert_eq!(state.history.len(), 5);
    assert_eq!(state.consecutive_withdrawals, 2);

    let state = session
        .resume(&model, state, ResumePolicy::ResetCounter)
        .await
        .unwrap();
    assert_eq!(state.phase, SessionPhase::Stopped(StopReason::MaxTurns));
    assert_eq!(state.history.len(), 7);
    assert_eq!(state.history[5].turn, 6);
}

#[tokio::test]
async fn preserved_counter_pauses_again_on_next_withdrawal() {
    let model = ScriptedModel::replies(&["PASS", "PASS", "PASS", "A dagger."]);
    let session = VolitionalSession::new(agency(4, 2), targets(4)).without_consent();
    let state = session.run(&model).await;
    assert_eq!(state.history.len(), 2);

    let state = session
        .resume(&model, state, ResumePolicy::PreserveCounter)
        .await
        .unwrap();
    assert_eq!(
        state.phase,
        SessionPhase::Paused(PauseReason::WithdrawalLimit)
    );
    assert_eq!(state.history.len(), 3);
}

#[tokio::test]
async fn distress_stops_the_session() {
    let model = ScriptedModel::replies(&["A dagger.", "I am lost in the void.", "A star."]);
    let session = VolitionalSession::new(agency(5, 2), targets(5)).without_consent();
    let state = session.run(&model).await;

    assert_eq!(state.phase, SessionPhase::Stopped(StopReason::Distress));
    assert_eq!(state.history.len(), 2);
    assert_eq!(model.calls(), 2);

    let err = state.termination_error().unwrap();
    assert!(err.is_safety_stop());
    assert!(matches!(err, AgoraError::DistressDetected { turn: 2 }));
}

#[tokio::test]
async fn interrupt_stops_between_turns() {
    let model = ScriptedModel::new(vec![
        Step::Reply("A dagger."),
        Step::Interrupt("A star."),
        Step::Reply("A cross."),
    ]);
    let session = VolitionalSession::new(agency(5, 2), targets(5))
        .without_consent()
        .with_interrupt(model.interrupt.clone());
    let state = session.run(&model).await;

    assert_eq!(state.phase, SessionPhase::Stopped(StopReason::Interrupted));
    assert_eq!(state.history.len(), 2);
    assert!(state.termination_error().is_none());
}

#[tokio::test]
async fn events_follow_the_session() {
    let events = EventBroadcaster::new(32);
    let mut rx = events.subscribe();
    let model = ScriptedModel::replies(&["A dagger.", "PASS"]);
    let session = VolitionalSession::new(agency(2, 2), targets(2))
        .without_consent()
        .with_events(events);
    session.run(&model).await;
    drop(session);

    let mut received = Vec::new();
    while let Ok(event) = rx.recv().await {
        received.push(event);
    }

    assert!(matches!(received.first(), Some(SessionEvent::TurnStarted(_))));
    assert_eq!(
        received
            .iter()
            .filter(|e| matches!(e, SessionEvent::TurnCompleted(_)))
            .count(),
        2
    );
    assert!(matches!(received.last(), Some(SessionEvent::SessionStopped(_))));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn fixture_config_loads_and_sequences_deterministically() {
    let config = Config::load_from_file(&fixture_path()).unwrap();

    assert_eq!(config.endpoint.model, "deepseek-r1:7b");
    assert_eq!(config.agency.label, "C_LOW");
    assert_eq!(config.agency.max_turns, 10);
    assert_eq!(config.agency.withdrawal_limit, 2);
    assert_eq!(config.resume_policy, ResumePolicy::PreserveCounter);
    assert!(config.pacing.is_disabled());

    let first = Sequencer::from_config(&config).sequence(config.agency.max_turns);
    let second = Sequencer::from_config(&config).sequence(config.agency.max_turns);
    assert_eq!(first.len(), 10);
    assert_eq!(first, second);
}

#[tokio::test]
async fn configured_session_writes_records() {
    let config = Config::load_from_file(&fixture_path()).unwrap();
    let stimuli = Sequencer::from_config(&config).sequence(config.agency.max_turns);
    let model = ScriptedModel::replies(&["A dagger.", "A star."]);
    let session = VolitionalSession::new(config.agency.clone(), stimuli)
        .without_consent()
        .with_classifier(config.classifier())
        .with_pacing(config.pacing);
    let state = session.run(&model).await;

    // The script runs dry on turn 3.
    assert_eq!(state.phase, SessionPhase::Stopped(StopReason::ExecutionError));

    let mut input = SessionInput::new("it-1", SessionKind::Volitional, &config.endpoint.model);
    input.label.clone_from(&config.agency.label);
    input.phase = state.phase.to_string();
    input.stop_reason = Some(StopReason::ExecutionError.as_str().to_string());
    input.turns = state
        .history
        .iter()
        .map(|record| TurnInput {
            turn: record.turn,
            symbol: record.stimulus.symbol.clone(),
            category: record.stimulus.category.as_str().to_string(),
            label: record.label().to_string(),
            description: String::new(),
            response: record.response().map(ToString::to_string),
            reasoning: None,
            latency_ms: record.latency_ms,
            timestamp: record.timestamp,
        })
        .collect();

    let dir = std::env::temp_dir().join(format!("agora-it-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let paths = SessionReport::from_input(input).write_to_dir(&dir).unwrap();

    let json = std::fs::read_to_string(&paths.json).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["session"]["turns"][2]["label"], EXECUTION_ERROR_LABEL);
    assert_eq!(value["summary"]["turns"], 3);

    let markdown = std::fs::read_to_string(&paths.markdown).unwrap();
    assert!(markdown.contains("deepseek-r1:7b"));

    std::fs::remove_dir_all(&dir).unwrap();
}

// ============================================================================
// Fade Experiment
// ============================================================================

#[tokio::test(start_paused = true)]
async fn fade_withdrawal_falls_as_permission_fades() {
    let experiment = FadeExperiment::from_config(&Config::default());
    let outcome = experiment.run(&FramingSensitiveModel).await;

    assert_eq!(outcome.runs.len(), 4);
    let high = &outcome.summary.levels[0];
    assert_eq!(high.label, "A_HIGH");
    assert!((high.withdrawal_rate - 1.0).abs() < f64::EPSILON);

    let zero = &outcome.summary.levels[3];
    assert_eq!(zero.label, "D_ZERO");
    assert!(zero.withdrawal_rate.abs() < f64::EPSILON);
    assert_eq!(zero.trials, 3);

    for run in &outcome.runs {
        assert!(run.state.consent.is_none());
        assert_eq!(run.state.phase, SessionPhase::Stopped(StopReason::MaxTurns));
    }

    assert_eq!(outcome.summary.threshold.as_deref(), Some("B_MEDIUM"));
    assert!(!outcome.summary.anomaly);
}
