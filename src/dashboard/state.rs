//! Dashboard view state
//!
//! Tracks what the console has already shown so each refresh only prints
//! what changed.

use std::fmt;

use crate::capture::ConnectionState;
use crate::shared::{AggregatorSnapshot, MatchStatus, Reading};

/// The one-line status shown above the reading log
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StatusLine {
    /// No target has been set
    #[default]
    Idle,
    /// A target is set and nothing has been read since
    Searching(String),
    /// Classification of the newest reading
    Result { status: MatchStatus, text: String },
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusLine::Idle => write!(f, "No plate searched yet."),
            StatusLine::Searching(target) => write!(f, "Searching for plate: {}", target),
            StatusLine::Result { status, text } => write!(f, "{}: {}", status.label(), text),
        }
    }
}

/// Changes found by [`DashboardState::observe`]
#[derive(Debug, Default)]
pub struct Observed {
    /// Readings not shown before, oldest first
    pub readings: Vec<Reading>,
    /// Set when the status line changed
    pub status_changed: bool,
}

/// What the console has shown so far
#[derive(Debug, Default)]
pub struct DashboardState {
    /// Highest reading sequence already shown
    pub last_sequence: u64,
    pub target: Option<String>,
    pub status: StatusLine,
    pub connection: Option<ConnectionState>,
}

impl DashboardState {
    /// Compare a fresh aggregator snapshot with what was shown last
    pub fn observe(&mut self, snapshot: &AggregatorSnapshot) -> Observed {
        let mut observed = Observed::default();
        let previous_status = self.status.clone();

        if snapshot.target != self.target {
            self.target = snapshot.target.clone();
            self.status = match &self.target {
                Some(target) => StatusLine::Searching(target.clone()),
                None => StatusLine::Idle,
            };
        }

        // History is newest first
        observed.readings = snapshot
            .history
            .iter()
            .rev()
            .filter(|reading| reading.sequence > self.last_sequence)
            .cloned()
            .collect();

        if let Some(newest) = observed.readings.last() {
            self.last_sequence = newest.sequence;
            self.status = StatusLine::Result {
                status: newest.status,
                text: newest.text.clone(),
            };
        }

        observed.status_changed = self.status != previous_status;
        observed
    }

    /// Record `state`; returns true if it differs from the last one seen
    pub fn observe_connection(&mut self, state: ConnectionState) -> bool {
        if self.connection == Some(state) {
            return false;
        }
        self.connection = Some(state);
        true
    }
}

/// Human readable connection state
pub fn describe_connection(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Connecting => "connecting".to_string(),
        ConnectionState::Connected => "connected".to_string(),
        ConnectionState::Disconnected => "disconnected".to_string(),
        ConnectionState::Reconnecting { attempt, delay } => {
            format!("reconnecting (attempt {}, in {} ms)", attempt, delay.as_millis())
        }
        ConnectionState::Stopped => "stopped".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ResultAggregator;
    use std::time::Duration;

    #[test]
    fn test_initial_status() {
        assert_eq!(StatusLine::default().to_string(), "No plate searched yet.");
    }

    #[test]
    fn test_status_follows_target_then_readings() {
        let aggregator = ResultAggregator::new(10);
        let mut state = DashboardState::default();

        aggregator.set_target(" abc-1234 ");
        let observed = state.observe(&aggregator.snapshot());
        assert!(observed.status_changed);
        assert_eq!(state.target.as_deref(), Some("ABC1234"));
        assert_eq!(state.status.to_string(), "Searching for plate: ABC1234");

        aggregator.publish("XYZ9876", 0.7);
        aggregator.publish("ABC1234", 0.9);
        let observed = state.observe(&aggregator.snapshot());
        let texts: Vec<_> = observed.readings.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["XYZ9876", "ABC1234"]);
        assert_eq!(state.status.to_string(), "MATCH: ABC1234");

        // Nothing new
        let observed = state.observe(&aggregator.snapshot());
        assert!(observed.readings.is_empty());
        assert!(!observed.status_changed);
    }

    #[test]
    fn test_readings_without_target_are_mismatches() {
        let aggregator = ResultAggregator::new(10);
        let mut state = DashboardState::default();
        aggregator.publish("ABC1234", 0.9);

        let observed = state.observe(&aggregator.snapshot());
        assert_eq!(observed.readings.len(), 1);
        assert_eq!(state.status.to_string(), "MISMATCH: ABC1234");
    }

    #[test]
    fn test_clearing_target_returns_to_idle() {
        let aggregator = ResultAggregator::new(10);
        let mut state = DashboardState::default();
        aggregator.set_target("ABC1234");
        state.observe(&aggregator.snapshot());

        aggregator.clear_target();
        let observed = state.observe(&aggregator.snapshot());
        assert!(observed.status_changed);
        assert!(state.target.is_none());
        assert_eq!(state.status, StatusLine::Idle);
    }

    #[test]
    fn test_connection_changes() {
        let mut state = DashboardState::default();
        assert!(state.observe_connection(ConnectionState::Connecting));
        assert!(!state.observe_connection(ConnectionState::Connecting));
        assert!(state.observe_connection(ConnectionState::Connected));
        assert_eq!(
            describe_connection(&ConnectionState::Reconnecting {
                attempt: 2,
                delay: Duration::from_millis(1000)
            }),
            "reconnecting (attempt 2, in 1000 ms)"
        );
    }
}
