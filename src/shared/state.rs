//! Result aggregation shared between recognition workers and the presentation layer
//!
//! Target plate, current best match and reading history live behind a single
//! mutex: they are always updated together, so a reader can never observe a
//! plate text paired with a stale classification.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

use crate::vision::plate::normalize_plate;

/// Default number of readings kept in the history ring
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Classification of a reading against the target plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    /// Reading equals the target plate
    Match,
    /// Reading differs from the target plate (or no target is set)
    Mismatch,
}

impl MatchStatus {
    pub fn label(&self) -> &'static str {
        match self {
            MatchStatus::Match => "MATCH",
            MatchStatus::Mismatch => "MISMATCH",
        }
    }
}

/// An accepted plate reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Normalized, validated plate text
    pub text: String,
    /// Recognizer confidence of the selected candidate
    pub confidence: f32,
    /// Classification at publication time
    pub status: MatchStatus,
    /// Wall-clock publication time
    pub recognized_at: DateTime<Local>,
    /// Publication order, starting at 1
    pub sequence: u64,
}

impl Reading {
    /// History line in the `[HH:MM:SS] TEXT` form
    pub fn log_line(&self) -> String {
        format!("[{}] {}", self.recognized_at.format("%H:%M:%S"), self.text)
    }
}

/// Most recent accepted reading and its classification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentMatch {
    pub text: String,
    pub status: MatchStatus,
    pub sequence: u64,
}

/// Consistent copy of the whole aggregator, taken under one lock
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatorSnapshot {
    /// Target plate, if one is set
    pub target: Option<String>,
    /// Current best match
    pub current: Option<CurrentMatch>,
    /// Recent readings, newest first
    pub history: Vec<Reading>,
    /// Total readings ever published (including evicted ones)
    pub total_published: u64,
}

#[derive(Debug)]
struct AggregatorState {
    target: String,
    current: Option<CurrentMatch>,
    history: VecDeque<Reading>,
    capacity: usize,
    published: u64,
}

/// Thread-safe holder of target plate, current match and bounded history
#[derive(Debug)]
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
}

impl ResultAggregator {
    /// Create an aggregator keeping at most `capacity` readings (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(AggregatorState {
                target: String::new(),
                current: None,
                history: VecDeque::with_capacity(capacity),
                capacity,
                published: 0,
            }),
        }
    }

    /// Publish an accepted reading.
    ///
    /// Sets the current match (classified against the target plate) and
    /// appends to history, evicting the oldest entry when full. Both updates
    /// happen under the same lock acquisition.
    pub fn publish(&self, text: &str, confidence: f32) -> Reading {
        let mut state = self.state.lock();

        let status = if !state.target.is_empty() && state.target == text {
            MatchStatus::Match
        } else {
            MatchStatus::Mismatch
        };

        state.published += 1;
        let reading = Reading {
            text: text.to_string(),
            confidence,
            status,
            recognized_at: Local::now(),
            sequence: state.published,
        };

        state.current = Some(CurrentMatch {
            text: reading.text.clone(),
            status,
            sequence: reading.sequence,
        });

        if state.history.len() == state.capacity {
            state.history.pop_front();
        }
        state.history.push_back(reading.clone());

        reading
    }

    /// Current best match, if any reading has been published
    pub fn current_match(&self) -> Option<CurrentMatch> {
        self.state.lock().current.clone()
    }

    /// Snapshot of the history, newest first
    pub fn history(&self) -> Vec<Reading> {
        self.state.lock().history.iter().rev().cloned().collect()
    }

    /// Set the target plate. The input is normalized (trimmed, uppercased,
    /// stripped to alphanumerics) and the stored value is returned.
    ///
    /// Only affects the classification of readings published afterwards.
    pub fn set_target(&self, raw: &str) -> String {
        let normalized = normalize_plate(raw);
        self.state.lock().target = normalized.clone();
        normalized
    }

    /// Remove the target plate
    pub fn clear_target(&self) {
        self.state.lock().target.clear();
    }

    /// Current target plate, `None` when unset
    pub fn target(&self) -> Option<String> {
        let state = self.state.lock();
        (!state.target.is_empty()).then(|| state.target.clone())
    }

    /// History capacity
    pub fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    /// Take a consistent copy of all fields
    pub fn snapshot(&self) -> AggregatorSnapshot {
        let state = self.state.lock();
        AggregatorSnapshot {
            target: (!state.target.is_empty()).then(|| state.target.clone()),
            current: state.current.clone(),
            history: state.history.iter().rev().cloned().collect(),
            total_published: state.published,
        }
    }
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
