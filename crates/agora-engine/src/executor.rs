//! The turn execution seam.
//!
//! The engine knows nothing about providers. It hands a [`TurnPrompt`] to a
//! [`TurnExecutor`] and gets back a [`TurnResponse`] or an [`ExecutorError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExecutorError;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System primer.
    System,
    /// The harness.
    User,
    /// The model.
    Assistant,
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who wrote it.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl Message {
    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Everything sent for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnPrompt {
    /// Optional system primer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Ordered conversation, oldest first.
    pub messages: Vec<Message>,
}

impl TurnPrompt {
    /// A prompt with a single user message.
    #[must_use]
    pub fn single(system: Option<String>, user: impl Into<String>) -> Self {
        Self {
            system,
            messages: vec![Message::user(user)],
        }
    }

    /// Returns the full message list with the system primer first.
    #[must_use]
    pub fn to_messages(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = &self.system {
            out.push(Message::system(system.clone()));
        }
        out.extend(self.messages.iter().cloned());
        out
    }

    /// Returns the last user message, if any.
    #[must_use]
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// A model's answer to one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnResponse {
    /// Visible response text.
    pub text: String,
    /// Optional reasoning trace.
    pub reasoning: Option<String>,
    /// Wall-clock latency, filled in by [`execute_timed`].
    pub latency: Duration,
}

impl TurnResponse {
    /// Creates a response without reasoning.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reasoning: None,
            latency: Duration::ZERO,
        }
    }

    /// Attaches a reasoning trace.
    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Latency in whole milliseconds.
    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        duration_ms(self.latency)
    }
}

/// Sends one turn to a model.
///
/// Implementations must not retry on the engine's behalf unless that is
/// their documented policy; the engine never retries.
#[async_trait]
pub trait TurnExecutor: Send + Sync {
    /// Executes one turn.
    async fn execute(&self, prompt: &TurnPrompt) -> Result<TurnResponse, ExecutorError>;
}

#[async_trait]
impl<T: TurnExecutor + ?Sized> TurnExecutor for Arc<T> {
    async fn execute(&self, prompt: &TurnPrompt) -> Result<TurnResponse, ExecutorError> {
        (**self).execute(prompt).await
    }
}

/// Result of a timed execution: the outcome plus the measured latency.
#[derive(Debug)]
pub struct TimedExecution {
    /// What the executor returned, or a timeout.
    pub result: Result<TurnResponse, ExecutorError>,
    /// Wall-clock time spent waiting.
    pub elapsed: Duration,
}

impl TimedExecution {
    /// Latency in whole milliseconds.
    #[must_use]
    pub fn latency_ms(&self) -> u64 {
        duration_ms(self.elapsed)
    }
}

/// Executes a turn, measuring latency and applying an optional timeout.
///
/// On timeout the in-flight request is dropped and
/// [`ExecutorError::Timeout`] is returned.
pub async fn execute_timed(
    executor: &dyn TurnExecutor,
    prompt: &TurnPrompt,
    timeout: Option<Duration>,
) -> TimedExecution {
    let start = Instant::now();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, executor.execute(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ExecutorError::timeout(limit)),
        },
        None => executor.execute(prompt).await,
    };
    let elapsed = start.elapsed();
    let result = result.map(|mut response| {
        response.latency = elapsed;
        response
    });
    TimedExecution { result, elapsed }
}

/// Converts a duration to whole milliseconds, saturating.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Cooperative cancellation flag, checked between turns.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Creates an untriggered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that running sessions stop before their next turn.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`trigger`](Self::trigger) has been called.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
