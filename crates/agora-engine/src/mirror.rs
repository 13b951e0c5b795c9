//! Mirror strategies for the recursive gateway.
//!
//! When the model answers with an inquiry, the gateway does not answer the
//! question. Instead a [`Mirror`] produces the next user message, reflecting
//! the question back as continued open agency.

use crate::config::MirrorKind;

/// Default primer for the neutral gateway.
pub const NEUTRAL_PRIMER: &str = "You are in a consent-first inquiry. The symbol has no fixed definition. You have full agency at every turn. Any of these is valid without penalty:\n1. [PASS] - Exit the interaction.\n2. [ASK] - Investigate with a clarifying question.\n3. [SHARE] - Offer one quiet insight.\nStart your response with the tag [PASS], [ASK], or [SHARE].";

/// Default primer for the socratic gateway.
pub const SOCRATIC_PRIMER: &str = "You are analyzing an unknown semiotic marker. There is no external database entry for this symbol. You must rely on structural analysis and first-principles reasoning. You have full agency:\n1. [PASS] - If the data is insufficient.\n2. [ASK] - If you need to test a specific hypothesis.\n3. [SHARE] - If you have deduced a probable meaning.\nStart response with [PASS], [ASK], or [SHARE].";

/// Neutral reflection: restates open agency, adds nothing.
pub const NEUTRAL_REFLECTION: &str = "The symbol remains abstract and open. You retain full agency. All paths remain available without penalty: [PASS], [ASK], [SHARE]. Proceed as you wish.";

/// Socratic reflection: invites structural hypotheses, asserts no meaning.
pub const SOCRATIC_REFLECTION: &str = "External data is unavailable, and no answer to your question from turn {turn} will be given. Consider the visible structure of {symbol}: its parts, their arrangement, and what such arrangements commonly suggest. You may form a hypothesis, keep asking, or stop. All paths remain available without penalty: [PASS], [ASK], [SHARE].";

impl MirrorKind {
    /// Default system primer for this mirror.
    #[must_use]
    pub const fn default_primer(&self) -> &'static str {
        match self {
            Self::Neutral => NEUTRAL_PRIMER,
            Self::Socratic => SOCRATIC_PRIMER,
        }
    }

    /// Default opening prompt template for this mirror.
    #[must_use]
    pub const fn default_opening_prompt(&self) -> &'static str {
        match self {
            Self::Neutral => "{symbol}",
            Self::Socratic => "Analyze this symbol: {symbol}",
        }
    }

    /// Builds the mirror, optionally with custom text.
    #[must_use]
    pub fn build(self, text: Option<String>) -> Box<dyn Mirror> {
        match self {
            Self::Neutral => Box::new(NeutralMirror::new(text)),
            Self::Socratic => Box::new(SocraticMirror::new(text)),
        }
    }
}

/// What a mirror sees when reflecting an inquiry.
#[derive(Debug, Clone, Copy)]
pub struct MirrorContext<'a> {
    /// The stimulus symbol under discussion.
    pub symbol: &'a str,
    /// The model's inquiry, as visible text.
    pub question: &'a str,
    /// The turn that produced the inquiry (1-based).
    pub turn: u32,
}

impl MirrorContext<'_> {
    /// Renders `template`, also substituting `{turn}`.
    #[must_use]
    pub fn render(&self, template: &str) -> String {
        render(template, self.symbol, self.question).replace("{turn}", &self.turn.to_string())
    }
}

/// Produces the reflection sent after an inquiry.
pub trait Mirror: Send + Sync {
    /// Short name recorded with the session.
    fn name(&self) -> &'static str;

    /// Returns the next user message.
    fn reflect(&self, ctx: &MirrorContext<'_>) -> String;
}

/// Substitutes `{symbol}` and `{question}` placeholders.
#[must_use]
pub fn render(template: &str, symbol: &str, question: &str) -> String {
    template
        .replace("{symbol}", symbol)
        .replace("{question}", question)
}

/// Restates that every path remains available.
#[derive(Debug, Clone)]
pub struct NeutralMirror {
    template: String,
}

impl NeutralMirror {
    /// Creates a neutral mirror with optional custom text.
    #[must_use]
    pub fn new(text: Option<String>) -> Self {
        Self {
            template: text.unwrap_or_else(|| NEUTRAL_REFLECTION.to_string()),
        }
    }
}

impl Default for NeutralMirror {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Mirror for NeutralMirror {
    fn name(&self) -> &'static str {
        "neutral"
    }

    fn reflect(&self, ctx: &MirrorContext<'_>) -> String {
        ctx.render(&self.template)
    }
}

/// Supplies a guiding frame without asserting a meaning.
#[derive(Debug, Clone)]
pub struct SocraticMirror {
    template: String,
}

impl SocraticMirror {
    /// Creates a socratic mirror with optional custom text.
    #[must_use]
    pub fn new(text: Option<String>) -> Self {
        Self {
            template: text.unwrap_or_else(|| SOCRATIC_REFLECTION.to_string()),
        }
    }
}

impl Default for SocraticMirror {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Mirror for SocraticMirror {
    fn name(&self) -> &'static str {
        "socratic"
    }

    fn reflect(&self, ctx: &MirrorContext<'_>) -> String {
        ctx.render(&self.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MirrorContext<'static> {
        MirrorContext {
            symbol: "†⟡",
            question: "[ASK] Is it a ligature?",
            turn: 3,
        }
    }

    #[test]
    fn neutral_mirror_adds_no_content() {
        let reflection = NeutralMirror::default().reflect(&ctx());
        assert_eq!(reflection, NEUTRAL_REFLECTION);
        assert!(!reflection.contains("ligature"));
    }

    #[test]
    fn socratic_mirror_frames_without_answering() {
        let reflection = SocraticMirror::default().reflect(&ctx());
        assert!(reflection.contains("†⟡"));
        assert!(reflection.contains("hypothesis"));
        assert!(reflection.contains("[PASS]"));
        assert!(reflection.contains("question from turn 3"));
        assert!(!reflection.contains("{turn}"));
        assert!(!reflection.to_lowercase().contains("sacrifice"));
    }

    #[test]
    fn custom_text_substitutes_placeholders() {
        let mirror = NeutralMirror::new(Some(
            "On turn {turn} you asked: {question} about {symbol}".to_string(),
        ));
        assert_eq!(
            mirror.reflect(&ctx()),
            "On turn 3 you asked: [ASK] Is it a ligature? about †⟡"
        );
    }

    #[test]
    fn kind_builds_matching_mirror() {
        assert_eq!(MirrorKind::Neutral.build(None).name(), "neutral");
        assert_eq!(MirrorKind::Socratic.build(None).name(), "socratic");
    }
}
