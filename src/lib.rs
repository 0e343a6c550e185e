//! plate-reader - real-time license plate reading
//!
//! Frames from a video source land in a single-slot mailbox, a detection
//! stage finds plates on the newest frame only, and a small worker pool reads
//! plate text at a bounded rate and compares it with a target plate.

pub mod app;
pub mod capture;
pub mod config;
pub mod dashboard;
pub mod recognition;
pub mod shared;
pub mod storage;
pub mod vision;

#[cfg(test)]
mod testing;

pub use app::{Collaborators, PlatePipeline};
pub use config::AppConfig;
