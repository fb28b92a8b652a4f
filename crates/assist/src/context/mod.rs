//! Conversation history and context-window selection.
//!
//! The [`ContextManager`] owns one conversation. Mutations (`add_turn`, `clear`,
//! `import_json`) are serialized behind a lock; window building works on an
//! immutable snapshot taken at call time, so it never blocks writers for long and
//! has nothing to unwind when abandoned.

mod history;
pub mod relevance;
pub mod topic;

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{ContextConfig, RelevanceWeights};
use crate::utils::estimate_tokens;

pub use history::ConversationHistory;
pub use relevance::{CurrentMessage, RelevanceScore, RelevanceScorer};
pub use topic::{TopicDetector, TopicLabel, TopicRule};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Insertion sequence number; unique and increasing within a conversation.
    pub index: u64,
    pub role: Role,
    pub content: String,
    pub topic: TopicLabel,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    #[cfg(test)]
    pub(crate) fn for_test(role: Role, content: &str, topic: TopicLabel) -> Self {
        Self {
            index: 0,
            role,
            content: content.to_owned(),
            topic,
            timestamp: Utc::now(),
        }
    }
}

/// A turn selected for the window, with the score that got it there.
#[derive(Clone, Debug, Serialize)]
pub struct ScoredTurn {
    pub turn: ConversationTurn,
    pub score: RelevanceScore,
    pub pinned: bool,
}

#[derive(Debug, Error)]
pub enum HistoryIoError {
    #[error("history file io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("history file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
struct Conversation {
    history: ConversationHistory,
    current_topic: TopicLabel,
}

#[derive(Debug)]
pub struct ContextManager {
    config: ContextConfig,
    detector: TopicDetector,
    scorer: RelevanceScorer,
    conversation: RwLock<Conversation>,
}

impl ContextManager {
    pub fn new(config: ContextConfig, weights: RelevanceWeights) -> Self {
        Self::with_components(config, TopicDetector::new(), RelevanceScorer::new(weights))
    }

    pub fn with_components(
        config: ContextConfig,
        detector: TopicDetector,
        scorer: RelevanceScorer,
    ) -> Self {
        let history = ConversationHistory::new(config.max_turns);
        Self {
            config,
            detector,
            scorer,
            conversation: RwLock::new(Conversation {
                history,
                current_topic: TopicLabel::General,
            }),
        }
    }

    pub fn detector(&self) -> &TopicDetector {
        &self.detector
    }

    pub fn len(&self) -> usize {
        self.read().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().history.is_empty()
    }

    /// Appends a turn. User turns are classified; assistant turns inherit the
    /// topic of the latest user turn; system turns are `general`.
    pub fn add_turn(&self, role: Role, content: impl Into<String>) -> ConversationTurn {
        let content = content.into();
        let detected = match role {
            Role::User => Some(self.detector.detect(&content)),
            Role::Assistant | Role::System => None,
        };

        let mut conversation = self.write();
        let topic = match (role, detected) {
            (Role::User, Some(topic)) => {
                conversation.current_topic = topic;
                topic
            }
            (Role::Assistant, _) => conversation.current_topic,
            _ => TopicLabel::General,
        };
        let turn = ConversationTurn {
            index: conversation.history.next_index(),
            role,
            content,
            topic,
            timestamp: conversation.history.next_timestamp(Utc::now()),
        };
        let evicted = conversation.history.push(turn.clone());
        debug!(
            index = turn.index,
            role = %role,
            topic = %topic,
            evicted,
            "appended conversation turn"
        );
        turn
    }

    /// Chronologically ordered window for `current_message`.
    pub fn build_context(&self, current_message: &str) -> Vec<ConversationTurn> {
        self.build_context_scored(current_message)
            .into_iter()
            .map(|scored| scored.turn)
            .collect()
    }

    pub fn build_context_scored(&self, current_message: &str) -> Vec<ScoredTurn> {
        let topic = self.detector.detect(current_message);
        let snapshot = self.read().history.snapshot();
        self.select(&snapshot, &CurrentMessage::new(current_message, topic))
    }

    pub fn history(&self) -> Vec<ConversationTurn> {
        self.read().history.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut conversation = self.write();
        conversation.history.clear();
        conversation.current_topic = TopicLabel::General;
    }

    pub fn export_json(&self, path: &Path) -> Result<usize, HistoryIoError> {
        let turns = self.history();
        let payload = serde_json::to_vec_pretty(&turns)?;
        fs::write(path, payload)?;
        Ok(turns.len())
    }

    /// Replaces the conversation with the turns stored at `path`, keeping the
    /// newest `max_turns` of them.
    pub fn import_json(&self, path: &Path) -> Result<usize, HistoryIoError> {
        let raw = fs::read(path)?;
        let turns: Vec<ConversationTurn> = serde_json::from_slice(&raw)?;
        let skip = turns.len().saturating_sub(self.config.max_turns);

        let mut conversation = self.write();
        conversation.history.clear();
        conversation.current_topic = TopicLabel::General;
        let mut imported = 0;
        for turn in turns.into_iter().skip(skip) {
            if turn.role == Role::User {
                conversation.current_topic = turn.topic;
            }
            let turn = ConversationTurn {
                index: conversation.history.next_index(),
                timestamp: conversation.history.next_timestamp(turn.timestamp),
                ..turn
            };
            conversation.history.push(turn);
            imported += 1;
        }
        Ok(imported)
    }

    fn select(&self, snapshot: &[Arc<ConversationTurn>], current: &CurrentMessage) -> Vec<ScoredTurn> {
        let window = self.config.window();
        if window == 0 || snapshot.is_empty() {
            return Vec::new();
        }
        let newest = snapshot.len() - 1;
        let pinned_count = self.config.pinned_recent.min(window).min(snapshot.len());
        let pinned_from = snapshot.len() - pinned_count;

        let mut budget = self.config.max_context_tokens;
        let mut selected: Vec<ScoredTurn> = Vec::with_capacity(window);
        for (position, turn) in snapshot.iter().enumerate().skip(pinned_from) {
            let score = self.scorer.score(turn, current, newest - position);
            if let Some(remaining) = budget.as_mut() {
                *remaining = remaining.saturating_sub(estimate_tokens(&turn.content));
            }
            selected.push(ScoredTurn {
                turn: turn.as_ref().clone(),
                score,
                pinned: true,
            });
        }

        let mut candidates: Vec<(usize, RelevanceScore)> = snapshot[..pinned_from]
            .iter()
            .enumerate()
            .map(|(position, turn)| (position, self.scorer.score(turn, current, newest - position)))
            .filter(|(_, score)| score.value() >= self.config.min_relevance)
            .collect();
        // Highest score first; equal scores go to the more recent turn.
        candidates.sort_by(|(pos_a, score_a), (pos_b, score_b)| {
            score_b
                .value()
                .total_cmp(&score_a.value())
                .then_with(|| pos_b.cmp(pos_a))
        });

        for (position, score) in candidates {
            if selected.len() >= window {
                break;
            }
            let turn = &snapshot[position];
            if let Some(remaining) = budget.as_mut() {
                let cost = estimate_tokens(&turn.content);
                if cost > *remaining {
                    continue;
                }
                *remaining -= cost;
            }
            selected.push(ScoredTurn {
                turn: turn.as_ref().clone(),
                score,
                pinned: false,
            });
        }

        selected.sort_by_key(|scored| scored.turn.index);
        debug!(
            retained = snapshot.len(),
            selected = selected.len(),
            topic = %current.topic,
            "built context window"
        );
        selected
    }

    fn read(&self) -> RwLockReadGuard<'_, Conversation> {
        self.conversation.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Conversation> {
        self.conversation
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
