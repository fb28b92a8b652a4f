use std::fmt;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopicLabel {
    Debugging,
    CodeGeneration,
    Explanation,
    DataAnalysis,
    WebDevelopment,
    MachineLearning,
    Database,
    FileIo,
    #[default]
    General,
}

impl TopicLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debugging => "debugging",
            Self::CodeGeneration => "code_generation",
            Self::Explanation => "explanation",
            Self::DataAnalysis => "data_analysis",
            Self::WebDevelopment => "web_development",
            Self::MachineLearning => "machine_learning",
            Self::Database => "database",
            Self::FileIo => "file_io",
            Self::General => "general",
        }
    }
}

impl fmt::Display for TopicLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the detector's table: first matching rule wins.
pub struct TopicRule {
    pub label: TopicLabel,
    pattern: Regex,
}

impl TopicRule {
    pub fn new(label: TopicLabel, pattern: &str) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self { label, pattern })
    }

    pub fn matches(&self, message: &str) -> bool {
        self.pattern.is_match(message)
    }
}

impl fmt::Debug for TopicRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicRule")
            .field("label", &self.label)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

const DEFAULT_RULES: &[(TopicLabel, &str)] = &[
    // Tracebacks and error names are the strongest cue.
    (
        TopicLabel::Debugging,
        r"Traceback \(most recent call last\)|\b[A-Z]\w*(Error|Exception)\b|\b(error|errors|bug|bugs|debug|debugging|fix|crash|crashes|exception|broken|not working|fails?|failing)\b",
    ),
    (
        TopicLabel::CodeGeneration,
        r"^\s*(please\s+)?(write|create|generate|implement|build|make|add|code|refactor|modify|update|extend)\b|\b(write|create|generate|implement)\s+(a|an|the|me|some)\b",
    ),
    (
        TopicLabel::Explanation,
        r"\b(explain|explanation|understand|meaning|concept|what\s+(is|are|does)|why|how\s+(does|do|is|can))\b",
    ),
    (
        TopicLabel::DataAnalysis,
        r"\b(pandas|numpy|dataframe|matplotlib|seaborn|plot|graph|chart|csv|statistics|analy[sz]e|analysis)\b",
    ),
    (
        TopicLabel::WebDevelopment,
        r"\b(flask|django|fastapi|html|css|javascript|web|http|endpoint|route|api)\b",
    ),
    (
        TopicLabel::MachineLearning,
        r"\b(sklearn|tensorflow|keras|pytorch|torch|neural|train|training|predict|classifier|regression|ml)\b",
    ),
    (
        TopicLabel::Database,
        r"\b(sql|sqlite|mysql|postgres(ql)?|database|table|join|select|query)\b",
    ),
    (
        TopicLabel::FileIo,
        r"\b(file|files|read|write|open|save|load|directory|folder|path)\b",
    ),
];

/// Deterministic, rule-based topic classification. Never calls out to a model.
#[derive(Debug)]
pub struct TopicDetector {
    rules: Vec<TopicRule>,
}

impl TopicDetector {
    pub fn new() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(label, pattern)| TopicRule::new(*label, pattern).ok())
            .collect();
        Self { rules }
    }

    pub fn with_rules(rules: Vec<TopicRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TopicRule] {
        &self.rules
    }

    pub fn detect(&self, message: &str) -> TopicLabel {
        if message.trim().is_empty() {
            return TopicLabel::General;
        }
        self.rules
            .iter()
            .find(|rule| rule.matches(message))
            .map_or(TopicLabel::General, |rule| rule.label)
    }
}

impl Default for TopicDetector {
    fn default() -> Self {
        Self::new()
    }
}
