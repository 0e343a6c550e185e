//! Recognition Layer
//!
//! Plate crops flow from the detection stage through a rate-limited
//! [`Dispatcher`] into a work queue drained by a fixed [`RecognitionPool`].
//! Workers read text, keep the best candidate, normalize and validate it,
//! and publish accepted plates to the shared result aggregator.

pub mod dispatcher;
pub mod pool;

pub use dispatcher::{Dispatcher, SubmitOutcome};
pub use pool::{PoolContext, RecognitionPool, Rejection, ShutdownReport, WorkerState};
