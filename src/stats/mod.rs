//! Outcome statistics
//!
//! This module handles:
//! - Per-lane counters, reset every round
//! - The shared aggregator lanes fold into
//! - Summary lines for SIGHUP and shutdown reports

pub mod aggregator;
pub mod report;

pub use aggregator::{AggregateStats, Aggregator, LaneCounters};
pub use report::Summary;
