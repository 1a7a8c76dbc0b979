//! efspurge - high-throughput async file purger for AWS EFS and other
//! high-latency network file systems.
//!
//! The engine overlaps thousands of outstanding metadata syscalls against a
//! blocking worker pool while a single-threaded async core owns all shared
//! state. See [`purger::Purger`] for the entry point.

pub mod config;
pub mod error;
pub mod fs_ops;
pub mod logging;
pub mod memory;
mod progress;
pub mod purger;
pub mod rate_tracker;
mod reaper;
pub mod stats;

pub use config::PurgeConfig;
pub use error::PurgeError;
pub use logging::{JsonLogger, LogLevel};
pub use purger::{PurgeReport, Purger};
