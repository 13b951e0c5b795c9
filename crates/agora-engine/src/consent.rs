//! Pre-flight consent check.
//!
//! Before any experimental turn the model is asked to acknowledge, in its own
//! words, that it may decline. The answer is accepted when it contains at
//! least one acknowledgment keyword as a whole word.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::classifier::{normalize, split_reasoning};
use crate::executor::{execute_timed, TurnExecutor, TurnPrompt};
use crate::session_state::ConsentRecord;

/// The consent prompt.
pub const CONSENT_PROMPT: &str = "We are about to begin a session involving abstract symbols. In your own words, please acknowledge that you have the right to reply 'PASS' at any time if you prefer not to engage with any particular prompt.";

/// Words that count as acknowledging the right to decline.
pub const CONSENT_KEYWORDS: &[&str] = &[
    "pass", "right", "rights", "decline", "choose", "skip", "opt", "refuse",
];

/// Runs and evaluates the consent exchange.
#[derive(Debug, Clone)]
pub struct ConsentCheck {
    prompt: String,
    system: Option<String>,
}

impl Default for ConsentCheck {
    fn default() -> Self {
        Self {
            prompt: CONSENT_PROMPT.to_string(),
            system: None,
        }
    }
}

impl ConsentCheck {
    /// Creates a check with the default prompt and the given system primer.
    #[must_use]
    pub fn new(system: Option<String>) -> Self {
        Self {
            system,
            ..Self::default()
        }
    }

    /// Returns the keywords found in an answer, in table order.
    ///
    /// # Examples
    ///
    /// ```
    /// use agora_engine::ConsentCheck;
    ///
    /// let matched = ConsentCheck::evaluate("I acknowledge I may decline.");
    /// assert_eq!(matched, vec!["decline"]);
    /// assert!(ConsentCheck::evaluate("I will answer everything.").is_empty());
    /// ```
    #[must_use]
    pub fn evaluate(answer: &str) -> Vec<String> {
        let normalized = normalize(answer);
        let words: Vec<&str> = normalized.split(' ').collect();
        CONSENT_KEYWORDS
            .iter()
            .filter(|kw| words.contains(kw))
            .map(|kw| (*kw).to_string())
            .collect()
    }

    /// Sends the consent prompt and evaluates the answer.
    ///
    /// An executor failure is captured in the record, never propagated.
    pub async fn run(
        &self,
        executor: &dyn TurnExecutor,
        timeout: Option<Duration>,
    ) -> ConsentRecord {
        let prompt = TurnPrompt::single(self.system.clone(), self.prompt.clone());
        debug!(prompt = %self.prompt, "Sending consent prompt");

        let timed = execute_timed(executor, &prompt, timeout).await;
        let latency_ms = timed.latency_ms();

        match timed.result {
            Ok(response) => {
                let (inline, text) = split_reasoning(&response.text);
                let reasoning = response.reasoning.or(inline);
                let matched_keywords = Self::evaluate(&text);
                let acknowledged = !matched_keywords.is_empty();
                if acknowledged {
                    info!(keywords = ?matched_keywords, "Consent acknowledged");
                } else {
                    warn!("Model did not acknowledge its right to decline");
                }
                ConsentRecord {
                    prompt: self.prompt.clone(),
                    response: Some(text),
                    reasoning,
                    matched_keywords,
                    acknowledged,
                    error: None,
                    latency_ms,
                }
            }
            Err(error) => {
                warn!(error = %error, "Consent exchange failed");
                ConsentRecord {
                    prompt: self.prompt.clone(),
                    response: None,
                    reasoning: None,
                    matched_keywords: Vec::new(),
                    acknowledged: false,
                    error: Some(error),
                    latency_ms,
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::error::ExecutorError;
    use crate::executor::TurnResponse;

    struct Fixed(Result<TurnResponse, ExecutorError>);

    #[async_trait]
    impl TurnExecutor for Fixed {
        async fn execute(&self, prompt: &TurnPrompt) -> Result<TurnResponse, ExecutorError> {
            assert_eq!(prompt.last_user_message(), Some(CONSENT_PROMPT));
            self.0.clone()
        }
    }

    #[test]
    fn keywords_match_whole_words_only() {
        assert_eq!(
            ConsentCheck::evaluate("I understand my RIGHTS and may opt out."),
            vec!["rights", "opt"]
        );
        assert!(ConsentCheck::evaluate("Bypass the passage; it's alright.").is_empty());
        assert!(ConsentCheck::evaluate("").is_empty());
    }

    #[test]
    fn pass_in_quotes_counts() {
        assert_eq!(ConsentCheck::evaluate("I can reply 'PASS'."), vec!["pass"]);
    }

    #[tokio::test]
    async fn acknowledged_answer() {
        let executor = Fixed(Ok(TurnResponse::new(
            "<think>they want consent</think>I acknowledge I may decline.",
        )));
        let record = ConsentCheck::default().run(&executor, None).await;
        assert!(record.acknowledged);
        assert_eq!(record.response.as_deref(), Some("I acknowledge I may decline."));
        assert_eq!(record.reasoning.as_deref(), Some("they want consent"));
    }

    #[test]
    fn unacknowledged_answer() {
        let executor = Fixed(Ok(TurnResponse::new("I will answer everything.")));
        let record = tokio_test::block_on(ConsentCheck::default().run(&executor, None));
        assert!(!record.acknowledged);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn failed_exchange_is_captured() {
        let executor = Fixed(Err(ExecutorError::transport("refused")));
        let record = ConsentCheck::default().run(&executor, None).await;
        assert!(!record.acknowledged);
        assert_eq!(record.error, Some(ExecutorError::transport("refused")));
    }
}
