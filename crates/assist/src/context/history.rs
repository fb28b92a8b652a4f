use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::ConversationTurn;

/// Append-only log of turns bounded by `max_turns`; the oldest turn is evicted first.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<Arc<ConversationTurn>>,
    max_turns: usize,
    next_index: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

impl ConversationHistory {
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
            next_index: 0,
            last_timestamp: None,
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Timestamp to stamp the next turn with; never earlier than the previous one.
    pub fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        }
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Appends and returns how many turns were evicted.
    pub fn push(&mut self, turn: ConversationTurn) -> usize {
        debug_assert_eq!(turn.index, self.next_index);
        self.next_index = turn.index + 1;
        self.last_timestamp = Some(turn.timestamp);
        self.turns.push_back(Arc::new(turn));
        let mut evicted = 0;
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back().map(Arc::as_ref)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> {
        self.turns.iter().map(Arc::as_ref)
    }

    /// Cheap immutable copy for readers that must not hold the lock.
    pub fn snapshot(&self) -> Vec<Arc<ConversationTurn>> {
        self.turns.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.last_timestamp = None;
    }
}
