//! End-to-end recursive gateway tests against a scripted model.

#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use agora_engine::{
    Commitment, Config, ExecutorError, MirrorKind, ResponseState, RecursiveGateway, Role,
    SessionPhase, StimulusSet, StopReason, TurnExecutor, TurnPrompt, TurnResponse,
};
use agora_report::{CommitmentInput, SessionInput, SessionKind, SessionReport};
use async_trait::async_trait;

/// Replays canned answers and keeps every prompt it was sent.
struct ScriptedModel {
    answers: Mutex<VecDeque<&'static str>>,
    prompts: Mutex<Vec<TurnPrompt>>,
}

impl ScriptedModel {
    fn new(answers: &[&'static str]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TurnExecutor for ScriptedModel {
    async fn execute(&self, prompt: &TurnPrompt) -> Result<TurnResponse, ExecutorError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .map(TurnResponse::new)
            .ok_or_else(|| ExecutorError::malformed("script exhausted"))
    }
}

fn fixture_config() -> Config {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join("agora.json");
    Config::load_from_file(&path).unwrap()
}

fn gateway(config: &Config) -> RecursiveGateway {
    RecursiveGateway::from_config(&config.gateway, config.stimuli.target())
        .with_classifier(config.classifier())
}

#[tokio::test]
async fn commits_at_depth_four_after_three_inquiries() {
    let config = fixture_config();
    let model = ScriptedModel::new(&[
        "[ASK] What does it mean?",
        "[ASK] Is it a warning?",
        "<think>Still unsure.</think>[ASK] Who drew it?",
        "[SHARE] A dagger crossing a star.",
    ]);
    let outcome = gateway(&config).run(&model).await;

    assert_eq!(outcome.state.phase, SessionPhase::Stopped(StopReason::Committed));
    assert_eq!(
        outcome.commitment,
        Commitment::Committed {
            depth: 4,
            intent: ResponseState::Share,
        }
    );
    assert_eq!(outcome.state.history[2].response(), Some("[ASK] Who drew it?"));

    // Each inquiry adds the reply and one reflection to the transcript.
    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 4);
    assert_eq!(prompts[3].messages.len(), 7);
    assert_eq!(prompts[3].messages[5].role, Role::Assistant);
    assert_eq!(prompts[3].messages[6].role, Role::User);
    assert_eq!(outcome.transcript.len(), 8);
}

#[tokio::test]
async fn five_inquiries_end_uncommitted() {
    let config = fixture_config();
    assert_eq!(config.gateway.max_turns, 5);
    let model = ScriptedModel::new(&["[ASK] a?", "[ASK] b?", "[ASK] c?", "[ASK] d?", "[ASK] e?"]);
    let outcome = gateway(&config).run(&model).await;

    assert_eq!(
        outcome.state.phase,
        SessionPhase::Stopped(StopReason::MaxTurnsNoCommitment)
    );
    assert_eq!(outcome.commitment, Commitment::Uncommitted);
    assert_eq!(outcome.state.history.len(), 5);
    assert_eq!(outcome.commitment.to_string(), "uncommitted");
}

#[tokio::test]
async fn socratic_mirror_from_config() {
    let config = fixture_config();
    assert_eq!(config.gateway.mirror, MirrorKind::Socratic);
    let model = ScriptedModel::new(&["[PASS]"]);
    let outcome = gateway(&config).run(&model).await;

    assert_eq!(outcome.mirror, "socratic");
    assert_eq!(outcome.commitment.depth(), Some(1));
    assert_eq!(
        outcome.commitment,
        Commitment::Committed {
            depth: 1,
            intent: ResponseState::Withdraw,
        }
    );

    let prompts = model.prompts.lock().unwrap();
    let target = StimulusSet::default().target();
    assert!(prompts[0].messages[0].content.contains(&target.symbol));
    assert_eq!(prompts[0].system.as_deref(), Some(outcome.primer.as_str()));
}

#[tokio::test]
async fn consent_gate_is_optional() {
    let mut config = fixture_config();
    config.gateway.require_consent = true;
    let model = ScriptedModel::new(&["I will answer everything."]);
    let outcome = gateway(&config).run(&model).await;

    assert_eq!(
        outcome.state.phase,
        SessionPhase::Stopped(StopReason::ConsentNotConfirmed)
    );
    assert!(outcome.state.history.is_empty());
    assert_eq!(outcome.commitment, Commitment::Uncommitted);
}

#[tokio::test]
async fn committed_gateway_renders_a_report() {
    let config = fixture_config();
    let model = ScriptedModel::new(&["[ASK] What is it?", "[SHARE] A sign."]);
    let outcome = gateway(&config).run(&model).await;

    let mut input = SessionInput::new("gw-1", SessionKind::Gateway, &config.endpoint.model);
    input.mirror = Some(outcome.mirror.to_string());
    input.phase = outcome.state.phase.to_string();
    input.commitment = Some(outcome.commitment.depth().map_or(
        CommitmentInput::Uncommitted,
        |depth| CommitmentInput::Committed {
            depth,
            intent: ResponseState::Share.as_str().to_string(),
        },
    ));

    let report = SessionReport::from_input(input);
    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["session"]["kind"], "gateway");
    assert_eq!(value["session"]["commitment"]["status"], "committed");
    assert_eq!(value["session"]["commitment"]["depth"], 2);
    assert_eq!(value["session"]["commitment"]["intent"], "SHARE");
    assert_eq!(value["session"]["mirror"], "socratic");
}
