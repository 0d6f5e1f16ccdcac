//! soma-detect: micro-batching in front of a serial face detector
//!
//! Frames submitted concurrently by any number of producers are grouped into
//! bounded batches (by count and by wait time). Each batch is handed to the
//! detection worker in a single call, and every submitter receives exactly
//! one outcome for its own frame.

pub mod config;
mod batch;
pub mod scheduler;
pub mod submission;

pub use config::BatchConfig;
pub use scheduler::{BatchScheduler, SchedulerStats};
pub use submission::{Outcome, Submission};
