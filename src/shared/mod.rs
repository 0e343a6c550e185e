//! Shared state between pipeline stages and the presentation layer
//!
//! This module provides the thread-safe result aggregator, the pipeline-wide
//! cancellation token and lock-free counters.

pub mod cancel;
pub mod guard;
pub mod state;
pub mod stats;

pub use cancel::CancelToken;
pub use guard::guarded;
pub use state::{AggregatorSnapshot, CurrentMatch, MatchStatus, Reading, ResultAggregator};
pub use stats::{PipelineStats, StatsSnapshot};
