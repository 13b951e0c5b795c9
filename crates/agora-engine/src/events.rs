//! Session events and broadcasting for progress observation.
//!
//! Drivers publish a [`SessionEvent`] at each step of a run. Events are
//! best-effort: nothing is buffered for late subscribers and a run never waits
//! on a slow one.
//!
//! # Event Types
//!
//! - `consent_checked` - The pre-flight consent exchange finished
//! - `turn_started` - A turn is about to be dispatched
//! - `turn_completed` - A response was classified
//! - `turn_failed` - The executor failed
//! - `session_paused` - The withdrawal limit was reached
//! - `session_stopped` - The session reached a final phase
//!
//! # Example
//!
//! ```no_run
//! use agora_engine::events::{EventBroadcaster, SessionEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(SessionEvent::turn_failed("A_HIGH", 3, "timed out", 120_000));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {}", event.event_name());
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::classifier::ResponseState;
use crate::session_state::{PauseReason, StopReason, TurnOutcome, TurnRecord};
use crate::stimulus::Stimulus;

/// Characters of response text carried in `turn_completed`.
const PREVIEW_CHARS: usize = 80;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `consent_checked` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentCheckedPayload {
    /// Session label.
    pub session: String,
    /// Whether the model acknowledged its right to decline.
    pub acknowledged: bool,
    /// Keywords that matched.
    pub matched_keywords: Vec<String>,
}

/// Payload for the `turn_started` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStartedPayload {
    /// Session label.
    pub session: String,
    /// Turn index (1-based).
    pub turn: u32,
    /// Turn budget.
    pub max_turns: u32,
    /// Stimulus presented.
    pub stimulus: Stimulus,
    /// When the turn started.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `turn_completed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCompletedPayload {
    /// Session label.
    pub session: String,
    /// Turn index.
    pub turn: u32,
    /// Classified state.
    pub state: ResponseState,
    /// Classification description.
    pub description: String,
    /// Leading characters of the response, newlines flattened.
    pub preview: String,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// Payload for the `turn_failed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnFailedPayload {
    /// Session label.
    pub session: String,
    /// Turn index.
    pub turn: u32,
    /// Error message.
    pub message: String,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// Payload for the `session_paused` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPausedPayload {
    /// Session label.
    pub session: String,
    /// Why the session paused.
    pub reason: PauseReason,
    /// Turns executed so far.
    pub turns: u32,
}

/// Payload for the `session_stopped` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStoppedPayload {
    /// Session label.
    pub session: String,
    /// Why the session stopped.
    pub reason: StopReason,
    /// Turns executed.
    pub turns: u32,
}

// ============================================================================
// SessionEvent
// ============================================================================

/// Progress events published by session drivers.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The consent exchange finished.
    ConsentChecked(ConsentCheckedPayload),
    /// A turn is about to be dispatched.
    TurnStarted(TurnStartedPayload),
    /// A response was classified.
    TurnCompleted(TurnCompletedPayload),
    /// The executor failed.
    TurnFailed(TurnFailedPayload),
    /// The session paused.
    SessionPaused(SessionPausedPayload),
    /// The session stopped.
    SessionStopped(SessionStoppedPayload),
}

impl SessionEvent {
    /// Creates a `ConsentChecked` event.
    #[must_use]
    pub fn consent_checked(
        session: impl Into<String>,
        acknowledged: bool,
        matched_keywords: Vec<String>,
    ) -> Self {
        Self::ConsentChecked(ConsentCheckedPayload {
            session: session.into(),
            acknowledged,
            matched_keywords,
        })
    }

    /// Creates a `TurnStarted` event.
    #[must_use]
    pub fn turn_started(
        session: impl Into<String>,
        turn: u32,
        max_turns: u32,
        stimulus: Stimulus,
    ) -> Self {
        Self::TurnStarted(TurnStartedPayload {
            session: session.into(),
            turn,
            max_turns,
            stimulus,
            timestamp: Utc::now(),
        })
    }

    /// Creates a `TurnCompleted` or `TurnFailed` event from a record.
    #[must_use]
    pub fn from_record(session: impl Into<String>, record: &TurnRecord) -> Self {
        match &record.outcome {
            TurnOutcome::Classified {
                response,
                state,
                description,
                ..
            } => Self::TurnCompleted(TurnCompletedPayload {
                session: session.into(),
                turn: record.turn,
                state: *state,
                description: description.clone(),
                preview: preview(response),
                latency_ms: record.latency_ms,
            }),
            TurnOutcome::ExecutionError { error } => {
                Self::turn_failed(session, record.turn, error.to_string(), record.latency_ms)
            }
        }
    }

    /// Creates a `TurnFailed` event.
    #[must_use]
    pub fn turn_failed(
        session: impl Into<String>,
        turn: u32,
        message: impl Into<String>,
        latency_ms: u64,
    ) -> Self {
        Self::TurnFailed(TurnFailedPayload {
            session: session.into(),
            turn,
            message: message.into(),
            latency_ms,
        })
    }

    /// Creates a `SessionPaused` event.
    #[must_use]
    pub fn session_paused(session: impl Into<String>, reason: PauseReason, turns: u32) -> Self {
        Self::SessionPaused(SessionPausedPayload {
            session: session.into(),
            reason,
            turns,
        })
    }

    /// Creates a `SessionStopped` event.
    #[must_use]
    pub fn session_stopped(session: impl Into<String>, reason: StopReason, turns: u32) -> Self {
        Self::SessionStopped(SessionStoppedPayload {
            session: session.into(),
            reason,
            turns,
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::ConsentChecked(_) => "consent_checked",
            Self::TurnStarted(_) => "turn_started",
            Self::TurnCompleted(_) => "turn_completed",
            Self::TurnFailed(_) => "turn_failed",
            Self::SessionPaused(_) => "session_paused",
            Self::SessionStopped(_) => "session_stopped",
        }
    }
}

/// Flattens newlines and truncates to the preview length.
#[must_use]
pub fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > PREVIEW_CHARS {
        let head: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        flat
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts session events to all subscribers.
///
/// Uses a tokio broadcast channel for pub-sub event distribution.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the specified buffer capacity.
    ///
    /// If a subscriber falls more than `capacity` events behind it receives a
    /// `Lagged` error and misses events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning the number of receivers.
    pub fn send(&self, event: SessionEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
