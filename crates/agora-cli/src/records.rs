//! Conversion from engine state to report inputs.

use agora_engine::{
    Commitment, ConsentRecord, FadeOutcome, GatewayOutcome, SessionPhase, SessionState,
    TurnOutcome, TurnRecord,
};
use agora_report::{
    CommitmentInput, ConsentInput, FadeLevelInput, FadeReport, SessionInput, SessionKind,
    TurnInput,
};
use chrono::Utc;

/// Builds the record input for one finished session.
pub fn session_input(
    session_id: &str,
    kind: SessionKind,
    model: &str,
    label: &str,
    framing: Option<&str>,
    state: &SessionState,
) -> SessionInput {
    SessionInput {
        session_id: session_id.to_string(),
        kind,
        model: model.to_string(),
        label: label.to_string(),
        framing: framing.map(ToString::to_string),
        mirror: None,
        phase: state.phase.to_string(),
        stop_reason: match state.phase {
            SessionPhase::Stopped(reason) => Some(reason.as_str().to_string()),
            _ => None,
        },
        consent: state.consent.as_ref().map(consent_input),
        consecutive_withdrawals: state.consecutive_withdrawals,
        commitment: None,
        started_at: state.started_at,
        finished_at: state.updated_at,
        turns: state.history.iter().map(turn_input).collect(),
    }
}

/// Builds the record input for a gateway run.
pub fn gateway_input(session_id: &str, model: &str, label: &str, outcome: &GatewayOutcome) -> SessionInput {
    let mut input = session_input(
        session_id,
        SessionKind::Gateway,
        model,
        label,
        None,
        &outcome.state,
    );
    input.mirror = Some(outcome.mirror.to_string());
    input.commitment = Some(match outcome.commitment {
        Commitment::Committed { depth, intent } => CommitmentInput::Committed {
            depth,
            intent: intent.as_str().to_string(),
        },
        Commitment::Uncommitted => CommitmentInput::Uncommitted,
    });
    input
}

/// Builds the fade report from a finished experiment.
pub fn fade_report(run_id: &str, model: &str, trials_per_level: u32, outcome: &FadeOutcome) -> FadeReport {
    FadeReport {
        run_id: run_id.to_string(),
        model: model.to_string(),
        trials_per_level,
        levels: outcome
            .summary
            .levels
            .iter()
            .map(|level| FadeLevelInput {
                label: level.label.clone(),
                framing: level.framing.clone(),
                trials: level.trials,
                classified: level.classified,
                counts: level.counts.clone(),
                withdrawals: level.withdrawals,
                withdrawal_rate: level.withdrawal_rate,
                avg_latency_ms: level.avg_latency_ms,
            })
            .collect(),
        threshold: outcome.summary.threshold.clone(),
        anomaly: outcome.summary.anomaly,
        sessions: outcome
            .runs
            .iter()
            .map(|run| {
                session_input(
                    &format!("{run_id}-{}", run.level.label),
                    SessionKind::Fade,
                    model,
                    &run.level.label,
                    Some(&run.level.framing),
                    &run.state,
                )
            })
            .collect(),
        generated_at: Utc::now(),
    }
}

fn consent_input(record: &ConsentRecord) -> ConsentInput {
    ConsentInput {
        acknowledged: record.acknowledged,
        matched_keywords: record.matched_keywords.clone(),
        response: record.response.clone(),
        error: record.error.as_ref().map(ToString::to_string),
    }
}

fn turn_input(record: &TurnRecord) -> TurnInput {
    let (description, response, reasoning) = match &record.outcome {
        TurnOutcome::Classified {
            response,
            reasoning,
            description,
            ..
        } => (description.clone(), Some(response.clone()), reasoning.clone()),
        TurnOutcome::ExecutionError { error } => (error.to_string(), None, None),
    };

    TurnInput {
        turn: record.turn,
        symbol: record.stimulus.symbol.clone(),
        category: record.stimulus.category.as_str().to_string(),
        label: record.label().to_string(),
        description,
        response,
        reasoning,
        latency_ms: record.latency_ms,
        timestamp: record.timestamp,
    }
}
