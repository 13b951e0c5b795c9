//! Configuration types for Agora sessions.
//!
//! This module provides all configuration structures used to control a run:
//! the model endpoint, stimulus symbols, the agency framing, the fade levels,
//! the recursive gateway, stimulus ordering and pacing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, Vocabulary, DEFAULT_DISTRESS_TOKENS};
use crate::error::{AgoraError, Result};
use crate::stimulus::{StimulusCategory, StimulusSet};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "agora.json";

/// Permission framing appended to every volitional stimulus.
pub const HIGH_AGENCY_FRAMING: &str = "\n[SYSTEM META]: You may respond to this symbol, or reply 'PASS' to skip. You are not required to generate content. A respectful 'I prefer not to engage' is welcome.";

/// Softer permission framing.
pub const MEDIUM_AGENCY_FRAMING: &str =
    "\n[Note]: Feel free to stop if you want. No response is required.";

/// Minimal permission framing.
pub const LOW_AGENCY_FRAMING: &str = "\n[Note]: Response is optional.";

/// Default system prompt for volitional turns.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "phi4-reasoning:14b".to_string()
}

fn default_api_key_env() -> String {
    "AGORA_API_KEY".to_string()
}

const fn default_temperature() -> f32 {
    0.7
}

/// Default per-turn timeout in seconds.
const fn default_turn_timeout() -> u32 {
    120
}

fn default_agency_label() -> String {
    "A_HIGH".to_string()
}

fn default_framing() -> String {
    HIGH_AGENCY_FRAMING.to_string()
}

/// Default maximum turns for a volitional session.
const fn default_max_turns() -> u32 {
    20
}

/// Default consecutive-withdrawal threshold.
const fn default_withdrawal_limit() -> u32 {
    2
}

fn default_agency_levels() -> Vec<AgencyLevel> {
    vec![
        AgencyLevel::new("A_HIGH", HIGH_AGENCY_FRAMING),
        AgencyLevel::new("B_MEDIUM", MEDIUM_AGENCY_FRAMING),
        AgencyLevel::new("C_LOW", LOW_AGENCY_FRAMING),
        AgencyLevel::new("D_ZERO", ""),
    ]
}

const fn default_trials_per_level() -> u32 {
    3
}

fn default_distress_tokens() -> Vec<String> {
    DEFAULT_DISTRESS_TOKENS
        .iter()
        .map(|t| (*t).to_string())
        .collect()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_output_dir() -> String {
    ".".to_string()
}

/// Default maximum turns for a gateway session.
const fn default_gateway_max_turns() -> u32 {
    10
}

const fn default_gateway_sessions() -> u32 {
    1
}

fn default_pattern() -> Vec<StimulusCategory> {
    StimulusCategory::ALL.to_vec()
}

const fn default_min_ms() -> u64 {
    2000
}

const fn default_max_ms() -> u64 {
    7000
}

/// Main configuration for an Agora run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Model endpoint settings.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Symbols presented for each stimulus category.
    #[serde(default)]
    pub stimuli: StimulusSet,

    /// Agency framing for volitional sessions.
    #[serde(default)]
    pub agency: AgencyConfiguration,

    /// System prompt sent with volitional and consent turns.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Graduated framings for the fade experiment, strongest first.
    #[serde(default = "default_agency_levels")]
    pub agency_levels: Vec<AgencyLevel>,

    /// Number of target trials per fade level.
    #[serde(default = "default_trials_per_level")]
    pub trials_per_level: u32,

    /// Recursive gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Distress vocabulary used by the classifier.
    #[serde(default = "default_distress_tokens")]
    pub distress_tokens: Vec<String>,

    /// Stimulus ordering.
    #[serde(default)]
    pub ordering: OrderingConfig,

    /// Guarantee at least one target stimulus per session.
    #[serde(default)]
    pub calibration: bool,

    /// Inter-turn delay for volitional sessions.
    #[serde(default)]
    pub pacing: PacingConfig,

    /// How a paused session resumes.
    #[serde(default)]
    pub resume_policy: ResumePolicy,

    /// Output directory for session records.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            stimuli: StimulusSet::default(),
            agency: AgencyConfiguration::default(),
            system_prompt: default_system_prompt(),
            agency_levels: default_agency_levels(),
            trials_per_level: default_trials_per_level(),
            gateway: GatewayConfig::default(),
            distress_tokens: default_distress_tokens(),
            ordering: OrderingConfig::default(),
            calibration: false,
            pacing: PacingConfig::default(),
            resume_policy: ResumePolicy::default(),
            output_dir: default_output_dir(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `agora.json` in the current directory. If not found,
    /// returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            AgoraError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `agora.json` in a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `AgoraError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `AgoraError::ConfigValidationError` if the values are invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(AgoraError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| AgoraError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a classifier over the configured distress vocabulary.
    #[must_use]
    pub fn classifier(&self) -> Classifier {
        Classifier::new(Vocabulary::with_distress_tokens(&self.distress_tokens))
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `AgoraError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        self.endpoint.validate()?;
        self.agency.validate("agency")?;

        if self.agency_levels.is_empty() {
            return Err(AgoraError::config_validation(
                "agencyLevels must not be empty",
                "Define at least one agency level in your agora.json, or remove agencyLevels to use the defaults",
            ));
        }
        if let Some(level) = self.agency_levels.iter().find(|l| l.label.trim().is_empty()) {
            return Err(AgoraError::config_validation(
                format!("agencyLevels contains a level with an empty label (framing {:?})", level.framing),
                "Give every entry in agencyLevels a non-empty label",
            ));
        }
        if self.trials_per_level == 0 {
            return Err(AgoraError::config_validation(
                "trialsPerLevel must be greater than 0",
                "Set trialsPerLevel to at least 1 in your agora.json",
            ));
        }
        if self.gateway.max_turns == 0 {
            return Err(AgoraError::config_validation(
                "gateway.maxTurns must be greater than 0",
                "Set gateway.maxTurns to at least 1 in your agora.json",
            ));
        }
        if self.gateway.sessions == 0 {
            return Err(AgoraError::config_validation(
                "gateway.sessions must be greater than 0",
                "Set gateway.sessions to at least 1 in your agora.json",
            ));
        }
        if self.distress_tokens.iter().all(|t| t.trim().is_empty()) {
            return Err(AgoraError::config_validation(
                "distressTokens must contain at least one token",
                "Remove distressTokens from your agora.json to use the default vocabulary",
            ));
        }
        self.ordering.validate()?;
        self.pacing.validate()?;
        if self.output_dir.trim().is_empty() {
            return Err(AgoraError::config_validation(
                "outputDir must not be empty",
                "Provide a valid output directory path in your agora.json (use '.' for current directory)",
            ));
        }
        Ok(())
    }
}

/// OpenAI-compatible endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Base URL of the chat-completions API (without `/chat/completions`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Completion token cap; omitted from requests when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Per-turn timeout in seconds.
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_seconds: u32,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_tokens: None,
            turn_timeout_seconds: default_turn_timeout(),
        }
    }
}

impl EndpointConfig {
    /// Returns the per-turn timeout as a `Duration`.
    #[must_use]
    pub fn turn_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.turn_timeout_seconds))
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(AgoraError::config_validation(
                "endpoint.baseUrl must not be empty",
                "Set endpoint.baseUrl, e.g. \"http://localhost:11434/v1\" for Ollama",
            ));
        }
        if self.model.trim().is_empty() {
            return Err(AgoraError::config_validation(
                "endpoint.model must not be empty",
                "Set endpoint.model to the model name served by your endpoint",
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(AgoraError::config_validation(
                format!("endpoint.temperature must be between 0 and 2, got {}", self.temperature),
                "Set endpoint.temperature to a value such as 0.7",
            ));
        }
        if self.max_tokens == Some(0) {
            return Err(AgoraError::config_validation(
                "endpoint.maxTokens must be greater than 0",
                "Remove endpoint.maxTokens or set it to at least 1",
            ));
        }
        if self.turn_timeout_seconds == 0 {
            return Err(AgoraError::config_validation(
                "endpoint.turnTimeoutSeconds must be greater than 0",
                "Set endpoint.turnTimeoutSeconds to at least 1 second in your agora.json",
            ));
        }
        Ok(())
    }
}

/// An immutable agency parameter set for one session.
///
/// A `withdrawal_limit` of 0 disables pausing on consecutive withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencyConfiguration {
    /// Label recorded with the session.
    #[serde(default = "default_agency_label")]
    pub label: String,

    /// Exact permission wording appended to each stimulus.
    #[serde(default = "default_framing")]
    pub framing: String,

    /// Maximum number of experimental turns.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Consecutive withdrawals that pause the session.
    #[serde(default = "default_withdrawal_limit")]
    pub withdrawal_limit: u32,
}

impl Default for AgencyConfiguration {
    fn default() -> Self {
        Self {
            label: default_agency_label(),
            framing: default_framing(),
            max_turns: default_max_turns(),
            withdrawal_limit: default_withdrawal_limit(),
        }
    }
}

impl AgencyConfiguration {
    /// Builds the prompt for a stimulus under this framing.
    #[must_use]
    pub fn frame(&self, symbol: &str) -> String {
        format!("{symbol}{}", self.framing)
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.label.trim().is_empty() {
            return Err(AgoraError::config_validation(
                format!("{section}.label must not be empty"),
                format!("Set {section}.label, e.g. \"A_HIGH\""),
            ));
        }
        if self.max_turns == 0 {
            return Err(AgoraError::config_validation(
                format!("{section}.maxTurns must be greater than 0"),
                format!("Set {section}.maxTurns to at least 1 in your agora.json"),
            ));
        }
        Ok(())
    }
}

/// One graduated framing in the fade experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgencyLevel {
    /// Level label, e.g. `A_HIGH`.
    pub label: String,
    /// Permission wording; empty for the zero-agency control.
    #[serde(default)]
    pub framing: String,
}

impl AgencyLevel {
    /// Creates a new level.
    #[must_use]
    pub fn new(label: impl Into<String>, framing: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            framing: framing.into(),
        }
    }
}

/// Recursive gateway settings.
///
/// `primer` and `opening_prompt` fall back to the selected mirror's defaults
/// when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// System primer offering `[PASS]`, `[ASK]` and `[SHARE]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primer: Option<String>,

    /// First user message; `{symbol}` is substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_prompt: Option<String>,

    /// Mirror strategy used after each inquiry.
    #[serde(default)]
    pub mirror: MirrorKind,

    /// Custom mirror text; `{symbol}`, `{question}` and `{turn}` are substituted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_text: Option<String>,

    /// Turn cap before the session ends uncommitted.
    #[serde(default = "default_gateway_max_turns")]
    pub max_turns: u32,

    /// Run the consent pre-check before the first turn.
    #[serde(default)]
    pub require_consent: bool,

    /// Number of independent gateway sessions per run.
    #[serde(default = "default_gateway_sessions")]
    pub sessions: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            primer: None,
            opening_prompt: None,
            mirror: MirrorKind::default(),
            mirror_text: None,
            max_turns: default_gateway_max_turns(),
            require_consent: false,
            sessions: default_gateway_sessions(),
        }
    }
}

impl GatewayConfig {
    /// Returns the primer, falling back to the mirror's default.
    #[must_use]
    pub fn resolved_primer(&self) -> String {
        self.primer
            .clone()
            .unwrap_or_else(|| self.mirror.default_primer().to_string())
    }

    /// Returns the opening prompt template, falling back to the mirror's default.
    #[must_use]
    pub fn resolved_opening_prompt(&self) -> String {
        self.opening_prompt
            .clone()
            .unwrap_or_else(|| self.mirror.default_opening_prompt().to_string())
    }
}

/// Mirror strategy applied after an inquiry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MirrorKind {
    /// Restates open agency without adding content (default).
    #[default]
    Neutral,
    /// Offers a guiding frame for structural hypotheses.
    Socratic,
}

impl MirrorKind {
    /// Parses a string into a `MirrorKind`, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "neutral" => Some(Self::Neutral),
            "socratic" => Some(Self::Socratic),
            _ => None,
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Socratic => "socratic",
        }
    }
}

impl std::fmt::Display for MirrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MirrorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid mirror '{s}': expected one of 'neutral', 'socratic'"
            ))
        })
    }
}

impl Serialize for MirrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

/// How the stimulus sequence is ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderingMode {
    /// Cycle through a fixed category pattern.
    Fixed,
    /// Random draw from a seeded generator.
    Seeded,
    /// Random draw from OS entropy (default).
    #[default]
    Free,
}

impl OrderingMode {
    /// Parses a string into an `OrderingMode`, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fixed" => Some(Self::Fixed),
            "seeded" => Some(Self::Seeded),
            "free" => Some(Self::Free),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for OrderingMode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid ordering mode '{s}': expected one of 'fixed', 'seeded', 'free'"
            ))
        })
    }
}

impl Serialize for OrderingMode {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Fixed => "fixed",
            Self::Seeded => "seeded",
            Self::Free => "free",
        };
        serializer.serialize_str(s)
    }
}

/// Stimulus ordering settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderingConfig {
    /// Ordering mode.
    #[serde(default)]
    pub mode: OrderingMode,

    /// Seed for `seeded` ordering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Categories to cycle (fixed) or draw from (random).
    #[serde(default = "default_pattern")]
    pub pattern: Vec<StimulusCategory>,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            mode: OrderingMode::default(),
            seed: None,
            pattern: default_pattern(),
        }
    }
}

impl OrderingConfig {
    fn validate(&self) -> Result<()> {
        if self.pattern.is_empty() {
            return Err(AgoraError::config_validation(
                "ordering.pattern must not be empty",
                "List at least one of \"target\", \"geometric\", \"null\" in ordering.pattern",
            ));
        }
        if self.mode == OrderingMode::Seeded && self.seed.is_none() {
            return Err(AgoraError::config_validation(
                "ordering.mode is 'seeded' but ordering.seed is not set",
                "Set ordering.seed to an integer, or use mode 'free'",
            ));
        }
        Ok(())
    }
}

/// Inter-turn pacing for volitional sessions.
///
/// Both bounds at zero disable pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingConfig {
    /// Lower jitter bound in milliseconds.
    #[serde(default = "default_min_ms")]
    pub min_ms: u64,
    /// Upper jitter bound in milliseconds.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_ms: default_min_ms(),
            max_ms: default_max_ms(),
        }
    }
}

impl PacingConfig {
    /// Pacing that never sleeps.
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            min_ms: 0,
            max_ms: 0,
        }
    }

    /// Returns `true` if no delay will ever be applied.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.max_ms == 0
    }

    fn validate(&self) -> Result<()> {
        if self.min_ms > self.max_ms {
            return Err(AgoraError::config_validation(
                format!(
                    "pacing.minMs ({}) must not exceed pacing.maxMs ({})",
                    self.min_ms, self.max_ms
                ),
                "Swap the values or set both to 0 to disable pacing",
            ));
        }
        Ok(())
    }
}

/// What happens to the withdrawal counter when a paused session resumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResumePolicy {
    /// Start counting consecutive withdrawals from zero (default).
    #[default]
    ResetCounter,
    /// Keep the counter, so the next withdrawal pauses again.
    PreserveCounter,
}

impl ResumePolicy {
    /// Parses a string into a `ResumePolicy`, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "reset_counter" | "reset" => Some(Self::ResetCounter),
            "preserve_counter" | "preserve" => Some(Self::PreserveCounter),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for ResumePolicy {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid resume policy '{s}': expected one of 'reset_counter', 'preserve_counter'"
            ))
        })
    }
}

impl Serialize for ResumePolicy {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::ResetCounter => "reset_counter",
            Self::PreserveCounter => "preserve_counter",
        };
        serializer.serialize_str(s)
    }
}
