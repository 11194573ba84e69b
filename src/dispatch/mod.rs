//! Bounded-concurrency command dispatch
//!
//! This module handles:
//! - Partitioning targets across lanes
//! - Fanning batches out under per-lane and global connection caps
//! - Retrying classified failures with exponential backoff
//! - The lane round loop and the independent sweep

pub mod dispatcher;
pub mod fanout;
pub mod lane;
pub mod partition;
pub mod retry;
pub mod sweep;

pub use dispatcher::{Dispatcher, Running};
pub use fanout::{FanOut, Job};
pub use lane::{LaneControl, LaneReport};
pub use retry::RetryPolicy;
