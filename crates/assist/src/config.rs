use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::TopicLabel;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "tngtech/deepseek-r1t-chimera:free";
pub const DEFAULT_API_KEY_ENV_VAR: &str = "OPENROUTER_API_KEY";

const DEFAULT_TIMEOUT_SECONDS: u64 = 5;
const DEFAULT_MEMORY_LIMIT_MB: u64 = 256;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;
const DEFAULT_MAX_FILE_BYTES: u64 = 16 * 1024 * 1024;
const DEFAULT_MAX_TURNS: usize = 20;
const DEFAULT_PINNED_RECENT: usize = 2;
const DEFAULT_DISPLAY_LIMIT: usize = 4000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_owned(),
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistConfig {
    pub api: ApiConfig,
    pub execution: ExecutionConfig,
    pub context: ContextConfig,
    pub relevance: RelevanceWeights,
    pub output: OutputConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env_var: String,
    pub temperature: f32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            model: DEFAULT_MODEL.to_owned(),
            api_key_env_var: DEFAULT_API_KEY_ENV_VAR.to_owned(),
            temperature: 0.7,
        }
    }
}

impl ApiConfig {
    /// Reads the key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env_var)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub interpreter: String,
    pub timeout_seconds: u64,
    pub memory_limit_mb: u64,
    /// Per-stream capture cap.
    pub max_output_bytes: usize,
    /// RLIMIT_FSIZE for anything the snippet writes into its scratch area.
    pub max_file_bytes: u64,
    pub extra_denied_modules: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_owned(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            extra_denied_modules: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Retention bound of the history; oldest turns are evicted first.
    pub max_turns: usize,
    /// Size of the outgoing window. Clamped to `max_turns`.
    pub window_turns: Option<usize>,
    pub pinned_recent: usize,
    pub max_context_tokens: Option<usize>,
    pub min_relevance: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            window_turns: None,
            pinned_recent: DEFAULT_PINNED_RECENT,
            max_context_tokens: None,
            min_relevance: 0.0,
        }
    }
}

impl ContextConfig {
    pub fn window(&self) -> usize {
        self.window_turns
            .unwrap_or(self.max_turns)
            .min(self.max_turns)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceWeights {
    pub topic: f64,
    pub lexical: f64,
    pub recency: f64,
    /// Credit given to a related (but not identical) topic.
    pub related_topic_credit: f64,
    /// Per-turn decay factor of the recency signal, in (0, 1).
    pub recency_decay: f64,
    pub related_topics: Vec<(TopicLabel, TopicLabel)>,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            topic: 0.4,
            lexical: 0.35,
            recency: 0.25,
            related_topic_credit: 0.5,
            recency_decay: 0.85,
            related_topics: vec![
                (TopicLabel::Debugging, TopicLabel::CodeGeneration),
                (TopicLabel::Explanation, TopicLabel::CodeGeneration),
                (TopicLabel::Explanation, TopicLabel::Debugging),
                (TopicLabel::CodeGeneration, TopicLabel::WebDevelopment),
                (TopicLabel::CodeGeneration, TopicLabel::DataAnalysis),
                (TopicLabel::CodeGeneration, TopicLabel::FileIo),
                (TopicLabel::CodeGeneration, TopicLabel::Database),
                (TopicLabel::DataAnalysis, TopicLabel::MachineLearning),
                (TopicLabel::DataAnalysis, TopicLabel::FileIo),
                (TopicLabel::WebDevelopment, TopicLabel::Database),
            ],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub auto_save: bool,
    pub save_folder: PathBuf,
    /// Characters of stdout/stderr shown to the user before head/tail elision.
    pub display_limit: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            save_folder: PathBuf::from("bot_outputs"),
            display_limit: DEFAULT_DISPLAY_LIMIT,
        }
    }
}

impl AssistConfig {
    /// Defaults, then the optional TOML file, then `ASSIST_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match env::var("ASSIST_CONFIG") {
                Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(&path))?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_parse::<u64>("ASSIST_TIMEOUT_SECONDS")? {
            self.execution.timeout_seconds = value;
        }
        if let Some(value) = env_parse::<u64>("ASSIST_MEMORY_LIMIT_MB")? {
            self.execution.memory_limit_mb = value;
        }
        if let Some(value) = env_parse::<usize>("ASSIST_MAX_TURNS")? {
            self.context.max_turns = value;
        }
        if let Some(value) = env_parse::<bool>("ASSIST_AUTO_SAVE")? {
            self.output.auto_save = value;
        }
        if let Ok(value) = env::var("ASSIST_SAVE_FOLDER") {
            self.output.save_folder = PathBuf::from(value);
        }
        if let Ok(value) = env::var("ASSIST_MODEL") {
            self.api.model = value;
        }
        if let Ok(value) = env::var("ASSIST_BASE_URL") {
            self.api.base_url = value;
        }
        if let Ok(value) = env::var("ASSIST_INTERPRETER") {
            self.execution.interpreter = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.execution.timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "execution.timeout_seconds",
                "must be positive",
            ));
        }
        if self.execution.memory_limit_mb == 0 {
            return Err(ConfigError::invalid(
                "execution.memory_limit_mb",
                "must be positive",
            ));
        }
        if self.execution.max_output_bytes == 0 {
            return Err(ConfigError::invalid(
                "execution.max_output_bytes",
                "must be positive",
            ));
        }
        if self.context.max_turns == 0 {
            return Err(ConfigError::invalid("context.max_turns", "must be positive"));
        }
        let weights = [
            ("relevance.topic", self.relevance.topic),
            ("relevance.lexical", self.relevance.lexical),
            ("relevance.recency", self.relevance.recency),
            (
                "relevance.related_topic_credit",
                self.relevance.related_topic_credit,
            ),
        ];
        for (key, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(key, "must be a non-negative number"));
            }
        }
        if self.relevance.related_topic_credit > 1.0 {
            return Err(ConfigError::invalid(
                "relevance.related_topic_credit",
                "must be at most 1.0",
            ));
        }
        if self.relevance.topic + self.relevance.lexical + self.relevance.recency <= 0.0 {
            return Err(ConfigError::invalid(
                "relevance",
                "at least one weight must be positive",
            ));
        }
        let decay = self.relevance.recency_decay;
        if !(decay.is_finite() && decay > 0.0 && decay < 1.0) {
            return Err(ConfigError::invalid(
                "relevance.recency_decay",
                "must lie strictly between 0 and 1",
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, format!("cannot parse {raw:?}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AssistConfig::default();
        config.validate().unwrap();
        assert_eq!(config.execution.timeout_seconds, 5);
        assert_eq!(config.context.window(), config.context.max_turns);
        assert_eq!(config.output.save_folder, PathBuf::from("bot_outputs"));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = AssistConfig::from_toml_str(
            r#"
[execution]
timeout_seconds = 2

[relevance]
lexical = 0.9
related_topics = [["debugging", "explanation"]]
"#,
        )
        .unwrap();
        assert_eq!(config.execution.timeout_seconds, 2);
        assert_eq!(config.execution.memory_limit_mb, DEFAULT_MEMORY_LIMIT_MB);
        assert_eq!(config.relevance.lexical, 0.9);
        assert_eq!(
            config.relevance.related_topics,
            vec![(TopicLabel::Debugging, TopicLabel::Explanation)]
        );
        config.validate().unwrap();
    }

    #[test]
    fn window_is_clamped_to_retention_bound() {
        let context = ContextConfig {
            max_turns: 4,
            window_turns: Some(10),
            ..ContextConfig::default()
        };
        assert_eq!(context.window(), 4);
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut config = AssistConfig::default();
        config.execution.timeout_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AssistConfig::default();
        config.relevance.topic = 0.0;
        config.relevance.lexical = 0.0;
        config.relevance.recency = 0.0;
        assert!(config.validate().is_err());

        let mut config = AssistConfig::default();
        config.relevance.lexical = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AssistConfig::default();
        config.relevance.recency_decay = 1.0;
        assert!(config.validate().is_err());
    }
}
