//! Console presentation
//!
//! A terminal dashboard for a running pipeline: status line, reading log,
//! stdin commands, optional JSON-lines output and PNG snapshots.

pub mod app;
pub mod commands;
pub mod state;

pub use app::{compose_snapshot, ConsoleDashboard, DashboardOptions, Flow};
pub use commands::{Command, CommandError};
pub use state::{DashboardState, StatusLine};
