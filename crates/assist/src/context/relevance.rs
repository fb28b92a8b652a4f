use std::collections::HashSet;

use serde::Serialize;

use crate::config::RelevanceWeights;

use super::topic::TopicLabel;
use super::ConversationTurn;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "from", "have", "what", "you", "your", "are",
    "was", "were", "can", "could", "would", "should", "how", "why", "into", "about", "there",
    "then", "than", "them", "they", "its", "it's", "not", "but", "all", "any", "our", "out",
    "use", "using", "please", "just", "also", "some", "like", "make", "does", "did", "will",
    "want", "need", "here", "when", "which", "who",
];

/// A clamped relevance value in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd, Serialize)]
pub struct RelevanceScore(f64);

impl RelevanceScore {
    pub const ZERO: Self = Self(0.0);

    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self::ZERO;
        }
        Self(value.clamp(0.0, 1.0))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// The message a window is being built for, tokenized once.
#[derive(Clone, Debug)]
pub struct CurrentMessage {
    pub topic: TopicLabel,
    tokens: HashSet<String>,
}

impl CurrentMessage {
    pub fn new(text: &str, topic: TopicLabel) -> Self {
        Self {
            topic,
            tokens: significant_tokens(text),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RelevanceScorer {
    weights: RelevanceWeights,
}

impl RelevanceScorer {
    pub fn new(weights: RelevanceWeights) -> Self {
        Self { weights }
    }

    /// `age` is the number of retained turns newer than `candidate` (0 = newest).
    pub fn score(
        &self,
        candidate: &ConversationTurn,
        current: &CurrentMessage,
        age: usize,
    ) -> RelevanceScore {
        let total = self.weights.topic + self.weights.lexical + self.weights.recency;
        if !(total.is_finite() && total > 0.0) {
            return RelevanceScore::ZERO;
        }
        let topic = self.topic_match(candidate.topic, current.topic);
        let lexical = lexical_overlap(&significant_tokens(&candidate.content), &current.tokens);
        let recency = self.recency(age);
        RelevanceScore::new(
            (self.weights.topic * topic
                + self.weights.lexical * lexical
                + self.weights.recency * recency)
                / total,
        )
    }

    pub fn score_message(
        &self,
        candidate: &ConversationTurn,
        message: &str,
        topic: TopicLabel,
        age: usize,
    ) -> RelevanceScore {
        self.score(candidate, &CurrentMessage::new(message, topic), age)
    }

    fn topic_match(&self, candidate: TopicLabel, current: TopicLabel) -> f64 {
        if candidate == current {
            return 1.0;
        }
        let related = self
            .weights
            .related_topics
            .iter()
            .any(|&(a, b)| (a == candidate && b == current) || (a == current && b == candidate));
        if related {
            self.weights.related_topic_credit
        } else {
            0.0
        }
    }

    fn recency(&self, age: usize) -> f64 {
        let exponent = i32::try_from(age).unwrap_or(i32::MAX);
        self.weights.recency_decay.powi(exponent)
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(RelevanceWeights::default())
    }
}

/// Lowercased word tokens of three or more characters, minus stopwords.
pub fn significant_tokens(text: &str) -> HashSet<String> {
    text.split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|token| token.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .collect()
}

/// Share of the current message's tokens that also appear in the candidate.
fn lexical_overlap(candidate: &HashSet<String>, current: &HashSet<String>) -> f64 {
    if current.is_empty() || candidate.is_empty() {
        return 0.0;
    }
    let shared = current.intersection(candidate).count();
    shared as f64 / current.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;

    fn turn(content: &str, topic: TopicLabel) -> ConversationTurn {
        ConversationTurn::for_test(Role::User, content, topic)
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let scorer = RelevanceScorer::default();
        let candidate = turn("pandas dataframe filter", TopicLabel::DataAnalysis);
        let current = CurrentMessage::new("pandas dataframe filter", TopicLabel::DataAnalysis);
        let score = scorer.score(&candidate, &current, 0).value();
        assert!((score - 1.0).abs() < 1e-9);

        let unrelated = CurrentMessage::new("", TopicLabel::General);
        let score = scorer.score(&candidate, &unrelated, 10_000).value();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn more_recent_turn_never_scores_lower() {
        let scorer = RelevanceScorer::default();
        let candidate = turn("create a flask app", TopicLabel::CodeGeneration);
        let current = CurrentMessage::new("flask routes", TopicLabel::WebDevelopment);
        for age in 0..50 {
            let newer = scorer.score(&candidate, &current, age);
            let older = scorer.score(&candidate, &current, age + 1);
            assert!(newer >= older, "age {age}");
        }
    }

    #[test]
    fn related_topics_get_partial_credit() {
        let weights = RelevanceWeights {
            topic: 1.0,
            lexical: 0.0,
            recency: 0.0,
            ..RelevanceWeights::default()
        };
        let scorer = RelevanceScorer::new(weights);
        let current = CurrentMessage::new("anything", TopicLabel::Debugging);
        let same = scorer.score(&turn("x", TopicLabel::Debugging), &current, 0);
        let related = scorer.score(&turn("x", TopicLabel::CodeGeneration), &current, 0);
        let unrelated = scorer.score(&turn("x", TopicLabel::Database), &current, 0);
        assert_eq!(same.value(), 1.0);
        assert_eq!(related.value(), 0.5);
        assert_eq!(unrelated.value(), 0.0);
    }

    #[test]
    fn lexical_overlap_ignores_stopwords_and_case() {
        let tokens = significant_tokens("How do I read the CSV file with Pandas?");
        assert!(tokens.contains("csv"));
        assert!(tokens.contains("pandas"));
        assert!(!tokens.contains("the"));
        assert!(!tokens.contains("how"));

        let candidate = significant_tokens("pandas.read_csv loads a file");
        let current = significant_tokens("read file pandas");
        assert!(lexical_overlap(&candidate, &current) > 0.6);
        assert_eq!(lexical_overlap(&candidate, &HashSet::new()), 0.0);
    }

    #[test]
    fn nan_scores_collapse_to_zero() {
        assert_eq!(RelevanceScore::new(f64::NAN), RelevanceScore::ZERO);
        assert_eq!(RelevanceScore::new(7.0).value(), 1.0);
        assert_eq!(RelevanceScore::new(-1.0).value(), 0.0);
    }
}
