//! Chat-completions wire types.

#![deny(missing_docs)]

use agora_engine::{ExecutorError, Message, TurnResponse};
use serde::{Deserialize, Serialize};

/// Request body for `POST /chat/completions`.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    /// Model name as the endpoint knows it.
    pub model: &'a str,
    /// Full conversation, system message first.
    pub messages: Vec<Message>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion cap; omitted when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Response body; only the fields the harness reads.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    /// Completions; the harness reads the first.
    #[serde(default)]
    pub choices: Vec<Choice>,
}

/// One completion.
#[derive(Debug, Deserialize)]
pub struct Choice {
    /// The assistant message.
    pub message: ChoiceMessage,
}

/// Assistant message of a completion.
///
/// DeepSeek names the trace `reasoning_content`; Ollama uses `reasoning`.
/// Some servers send both.
#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    /// Visible answer.
    #[serde(default)]
    pub content: Option<String>,
    /// DeepSeek-style reasoning trace.
    #[serde(default)]
    pub reasoning_content: Option<String>,
    /// Ollama-style reasoning trace.
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl ChoiceMessage {
    /// First non-blank trace, preferring `reasoning_content`.
    fn into_reasoning(self) -> Option<String> {
        [self.reasoning_content, self.reasoning]
            .into_iter()
            .flatten()
            .find(|r| !r.trim().is_empty())
    }
}

impl ChatResponse {
    /// Takes the first choice.
    ///
    /// Missing content is an empty answer, not an error.
    pub fn into_turn_response(self) -> Result<TurnResponse, ExecutorError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ExecutorError::malformed("completion has no choices"))?;

        let mut message = choice.message;
        let mut response = TurnResponse::new(message.content.take().unwrap_or_default());
        if let Some(reasoning) = message.into_reasoning() {
            response = response.with_reasoning(reasoning);
        }
        Ok(response)
    }
}
